//! The per-module RPC engine.
//!
//! # Thread Safety
//!
//! `call` blocks the issuing thread on a one-shot channel until its reply,
//! exception or a disconnect resolves the slot. Incoming calls run on the
//! worker pool. The outgoing-call table and the worker slots each have their
//! own mutex; the receiver and listener list sit behind `RwLock`s.

use super::message::{
    build_exception, build_invoke, build_reply, decode_frame, InvokeHeader, Message, MessageKind,
};
use super::outcall::{CallOutcome, OutCallTable};
use super::{SessionListener, SystemMethod, SYSTEM_SERVICE_ID};
use crate::codec::{DataBlockReader, DataBlockWriter};
use crate::receiver::{NoReceiver, Receiver};
use crate::shutdown::ShutdownToken;
use crate::signature::{self, Signature};
use crate::transport::Transport;
use crate::worker::{JobProcessor, WorkerPool, WorkerState};
use crate::{MethodId, ModuleId, RelayError, Result, ServiceId};
use bytes::Bytes;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const CONNECTED: u8 = 0;
const DISCONNECTING: u8 = 1;
const CLOSED: u8 = 2;

/// A Call or Send waiting for a worker.
#[derive(Debug)]
pub struct IncomingCall {
    pub kind: MessageKind,
    pub header: InvokeHeader,
    pub args: DataBlockReader,
}

/// One module's view of the session: outgoing calls, incoming dispatch and
/// lifecycle.
pub struct RpcEngine {
    module_id: ModuleId,
    transport: Arc<dyn Transport>,
    receiver: RwLock<Arc<dyn Receiver>>,
    listeners: RwLock<Vec<Arc<dyn SessionListener>>>,
    out_calls: OutCallTable,
    pool: WorkerPool<IncomingCall>,
    state: AtomicU8,
    closed: ShutdownToken,
}

impl RpcEngine {
    /// Create an engine for `module_id` that sends through `transport`.
    ///
    /// The transport delivers inbound frames by calling [`receive`](Self::receive).
    pub fn new(module_id: ModuleId, transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<RpcEngine>| {
            let processor: Weak<dyn JobProcessor<IncomingCall>> = weak.clone();
            RpcEngine {
                module_id,
                transport,
                receiver: RwLock::new(Arc::new(NoReceiver)),
                listeners: RwLock::new(Vec::new()),
                out_calls: OutCallTable::new(),
                pool: WorkerPool::new(module_id.to_string(), processor),
                state: AtomicU8::new(CONNECTED),
                closed: ShutdownToken::new(),
            }
        })
    }

    pub fn module_id(&self) -> ModuleId {
        self.module_id
    }

    pub fn is_connected(&self) -> bool {
        self.state.load(Ordering::Acquire) == CONNECTED
    }

    /// Call a method and block until its result arrives.
    pub fn call(
        &self,
        to: ModuleId,
        service: ServiceId,
        method: MethodId,
        args: &DataBlockWriter,
    ) -> Result<DataBlockReader> {
        self.ensure_connected()?;
        let (message_id, reply_rx) = self.out_calls.allocate(to)?;
        let header = InvokeHeader {
            message_id,
            from: self.module_id,
            service,
            method,
        };
        let sent = build_invoke(MessageKind::Call, to, header, args)
            .and_then(|frame| self.transmit(to, frame));
        if let Err(err) = sent {
            self.out_calls.release(message_id);
            return Err(err);
        }
        debug!(
            "Module {} waiting on call {} to {}.{}.{}",
            self.module_id, message_id, to, service, method
        );

        match reply_rx.recv() {
            Ok(CallOutcome::Reply(result)) => Ok(result),
            Ok(CallOutcome::Exception(err)) => Err(err),
            Ok(CallOutcome::ModuleDisconnected) => Err(RelayError::disconnected(
                "implementation module disconnected",
            )),
            Ok(CallOutcome::BrokerDisconnected) | Err(_) => {
                Err(RelayError::disconnected("broker disconnected"))
            }
        }
    }

    /// Send a one-way message. Failures on the receiving side are never reported.
    pub fn send(
        &self,
        to: ModuleId,
        service: ServiceId,
        method: MethodId,
        args: &DataBlockWriter,
    ) -> Result<()> {
        self.ensure_connected()?;
        let header = InvokeHeader {
            message_id: super::SEND_MESSAGE_ID,
            from: self.module_id,
            service,
            method,
        };
        let frame = build_invoke(MessageKind::Send, to, header, args)?;
        self.transmit(to, frame)
    }

    /// Entry point for the transport: handle one inbound frame.
    pub fn receive(&self, frame: Bytes) -> Result<()> {
        trace!("Module {} received {} bytes", self.module_id, frame.len());
        let frame = decode_frame(frame).inspect_err(|err| {
            warn!("Module {} dropped corrupt frame: {}", self.module_id, err);
        })?;
        if frame.destination != self.module_id {
            warn!(
                "Module {} received a frame addressed to {}",
                self.module_id, frame.destination
            );
        }

        match frame.message {
            Message::Invoke { kind, header, args } => {
                self.pool.dispatch(IncomingCall { kind, header, args })
            }
            Message::Reply { message_id, result } => {
                if !self.out_calls.resolve(message_id, CallOutcome::Reply(result)) {
                    warn!(
                        "Module {} got a reply for unknown call {}",
                        self.module_id, message_id
                    );
                }
                Ok(())
            }
            Message::Exception { message_id, error } => {
                if !self.out_calls.resolve(message_id, CallOutcome::Exception(error)) {
                    warn!(
                        "Module {} got an exception for unknown call {}",
                        self.module_id, message_id
                    );
                }
                Ok(())
            }
        }
    }

    /// Hand a frame to the transport, or straight back to `receive` when it is
    /// addressed to this module.
    fn transmit(&self, to: ModuleId, frame: Bytes) -> Result<()> {
        if to == self.module_id {
            self.receive(frame)
        } else {
            self.transport.transmit(to, frame)
        }
    }

    /// Install the object that answers incoming calls.
    pub fn register_receiver(&self, receiver: Arc<dyn Receiver>) {
        *self.receiver.write().unwrap_or_else(PoisonError::into_inner) = receiver;
    }

    /// Remove the receiver. Later calls fail with `Disconnected`.
    pub fn unregister_receiver(&self) {
        self.register_receiver(Arc::new(NoReceiver));
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn listeners(&self) -> Vec<Arc<dyn SessionListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ask the transport to close this module's connection. Returns at once.
    pub fn signal_disconnect(&self) {
        if self
            .state
            .compare_exchange(CONNECTED, DISCONNECTING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!("Module {} disconnecting", self.module_id);
            self.transport.signal_disconnect(self.module_id);
        }
    }

    /// Block until the connection has closed and teardown has finished.
    pub fn wait_for_disconnect(&self) {
        self.closed.wait();
    }

    pub fn wait_for_disconnect_timeout(&self, timeout: Duration) -> bool {
        self.closed.wait_timeout(timeout)
    }

    /// Graceful disconnect: signal, then wait.
    pub fn disconnect(&self) {
        self.signal_disconnect();
        self.wait_for_disconnect();
    }

    /// Called by the transport once the connection is gone.
    ///
    /// Fails every pending call, notifies listeners, stops and joins the
    /// workers. Later invocations do nothing.
    pub fn connection_closed(&self) {
        if self.state.swap(CLOSED, Ordering::AcqRel) == CLOSED {
            return;
        }
        let failed = self.out_calls.fail_all();
        debug!(
            "Module {} failed {} pending calls on close",
            self.module_id, failed
        );
        for listener in self.listeners() {
            listener.on_shutdown();
        }
        self.pool.shutdown();
        info!("Module {} disconnected", self.module_id);
        self.closed.cancel();
    }

    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.pool.worker_states()
    }

    pub fn pending_calls(&self) -> usize {
        self.out_calls.pending_count()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(RelayError::disconnected(format!(
                "module {} is not connected",
                self.module_id
            )))
        }
    }

    /// Service names hosted by `module`.
    pub fn services(&self, module: ModuleId) -> Result<Vec<String>> {
        self.call(
            module,
            SYSTEM_SERVICE_ID,
            SystemMethod::GetServices.id(),
            &DataBlockWriter::new(),
        )?
        .get()
    }

    /// Id of the service called `name` on `module`.
    pub fn find_service(&self, module: ModuleId, name: &str) -> Result<ServiceId> {
        self.services(module)?
            .iter()
            .position(|service| service == name)
            .and_then(|index| ServiceId::try_from(index).ok())
            .ok_or_else(|| {
                RelayError::service_not_found(format!(
                    "service {name} not found on module {module}"
                ))
            })
    }

    /// Signature strings of every method of a service.
    pub fn method_signatures(&self, module: ModuleId, service: ServiceId) -> Result<Vec<String>> {
        let mut args = DataBlockWriter::new();
        args.add(&service);
        self.call(
            module,
            SYSTEM_SERVICE_ID,
            SystemMethod::GetMethods.id(),
            &args,
        )?
        .get()
    }

    /// Resolve `candidate` against a remote service's methods.
    pub fn find_method(
        &self,
        module: ModuleId,
        service: ServiceId,
        candidate: &str,
    ) -> Result<MethodId> {
        let signatures = self
            .method_signatures(module, service)?
            .iter()
            .map(|text| Signature::parse(text))
            .collect::<Result<Vec<_>>>()?;
        let index = signature::resolve(&signatures, candidate)?;
        MethodId::try_from(index).map_err(|_| RelayError::method_not_found(candidate))
    }

    pub fn method_help(
        &self,
        module: ModuleId,
        service: ServiceId,
        method: MethodId,
    ) -> Result<String> {
        let mut args = DataBlockWriter::new();
        args.add(&service).add(&method);
        self.call(
            module,
            SYSTEM_SERVICE_ID,
            SystemMethod::GetMethodHelp.id(),
            &args,
        )?
        .get()
    }

    /// Session notifications are answered here; everything else goes to the receiver.
    fn dispatch(&self, header: &InvokeHeader, args: &mut DataBlockReader) -> Result<DataBlockWriter> {
        if header.service == SYSTEM_SERVICE_ID {
            match SystemMethod::from_id(header.method) {
                Some(SystemMethod::OnModuleShutdown) => {
                    let module: ModuleId = args.get()?;
                    let failed = self.out_calls.fail_module(module);
                    debug!(
                        "Module {} saw module {} shut down, failed {} calls",
                        self.module_id, module, failed
                    );
                    for listener in self.listeners() {
                        listener.on_module_shutdown(module);
                    }
                    return Ok(DataBlockWriter::new());
                }
                Some(SystemMethod::OnModuleStartup) => {
                    let module: ModuleId = args.get()?;
                    for listener in self.listeners() {
                        listener.on_module_start(module);
                    }
                    return Ok(DataBlockWriter::new());
                }
                Some(SystemMethod::OnRegistrationChange) => {
                    for listener in self.listeners() {
                        listener.on_registration_change();
                    }
                    return Ok(DataBlockWriter::new());
                }
                _ => {}
            }
        }
        let receiver = self
            .receiver
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        receiver.receive(header.from, header.service, header.method, args)
    }
}

impl JobProcessor<IncomingCall> for RpcEngine {
    fn process(&self, call: IncomingCall) {
        let IncomingCall {
            kind,
            header,
            mut args,
        } = call;
        debug!(
            "Module {} running {:?} {}.{} from {}",
            self.module_id, kind, header.service, header.method, header.from
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(&header, &mut args)))
            .unwrap_or_else(|payload| Err(RelayError::unexpected(panic_message(payload.as_ref()))));

        if kind != MessageKind::Call {
            if let Err(err) = outcome {
                warn!(
                    "Send {}.{} from module {} failed: {}",
                    header.service, header.method, header.from, err
                );
            }
            return;
        }

        let frame = match &outcome {
            Ok(result) => build_reply(header.from, header.message_id, result),
            Err(err) => build_exception(header.from, header.message_id, err),
        };
        let delivered = frame
            .or_else(|err| build_exception(header.from, header.message_id, &err))
            .and_then(|frame| self.transmit(header.from, frame));
        if let Err(err) = delivered {
            error!(
                "Module {} could not answer call {} from {}: {}",
                self.module_id, header.message_id, header.from, err
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "handler panicked".to_string()
    }
}

impl std::fmt::Debug for RpcEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcEngine")
            .field("module_id", &self.module_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}
