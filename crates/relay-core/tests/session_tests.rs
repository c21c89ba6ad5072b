//! Session tests for the relay engine.
//!
//! These tests run several modules against a broker on an in-process hub and
//! exercise calls, sends, errors, worker concurrency and disconnects.

use relay_core::codec::DataBlockWriter;
use relay_core::service::{ModuleReceiver, Service};
use relay_core::worker::WorkerState;
use relay_core::{
    Broker, ErrorCode, LocalHub, ModuleRegistry, RelayError, RpcEngine, SessionConfig,
    SessionListener, ShutdownToken,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver as EventReceiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn start_broker() -> Arc<Broker> {
    Broker::start(
        LocalHub::new(),
        Arc::new(ModuleRegistry::new()),
        &SessionConfig::default(),
    )
    .unwrap()
}

/// Connect a module that hosts `service`.
fn host(broker: &Broker, name: &str, service: Service) -> Arc<RpcEngine> {
    let engine = broker.connect_module(name).unwrap();
    let receiver = ModuleReceiver::new();
    receiver.services().add(service);
    engine.register_receiver(Arc::new(receiver));
    engine
}

fn math_service() -> Service {
    let mut service = Service::new("math", "Math", "/Test/Math", "arithmetic");
    service
        .add_method("int add(int, int)", "sum of two integers", false, |_, args| {
            let a: i32 = args.get()?;
            let b: i32 = args.get()?;
            let mut out = DataBlockWriter::new();
            out.add(&(a + b));
            Ok(out)
        })
        .unwrap();
    service
        .add_method("double scale(double)", "doubles a value", false, |_, args| {
            let x: f64 = args.get()?;
            let mut out = DataBlockWriter::new();
            out.add(&(x * 2.0));
            Ok(out)
        })
        .unwrap();
    service
        .add_method("double scale(int)", "doubles an integer", false, |_, args| {
            let x: i32 = args.get()?;
            let mut out = DataBlockWriter::new();
            out.add(&(f64::from(x) * 2.0));
            Ok(out)
        })
        .unwrap();
    service
        .add_method("void fail(int)", "raises the given code", false, |_, args| {
            let code: i32 = args.get()?;
            Err(RelayError::from_wire(
                u8::try_from(code).unwrap_or(0),
                "requested failure",
                format!("code {code}"),
            ))
        })
        .unwrap();
    service
        .add_method("void crash()", "panics", false, |_, _| {
            panic!("handler blew up");
        })
        .unwrap();
    service
}

fn sum(client: &RpcEngine, module: i32, a: i32, b: i32) -> relay_core::Result<i32> {
    let mut args = DataBlockWriter::new();
    args.add(&a).add(&b);
    client.call(module, 0, 0, &args)?.get()
}

/// Records session events on a channel.
struct EventLog {
    events: Mutex<Sender<String>>,
}

impl EventLog {
    fn new() -> (Arc<Self>, EventReceiver<String>) {
        let (tx, rx) = channel();
        (
            Arc::new(Self {
                events: Mutex::new(tx),
            }),
            rx,
        )
    }

    fn record(&self, event: String) {
        let _ = self.events.lock().unwrap().send(event);
    }
}

impl SessionListener for EventLog {
    fn on_module_start(&self, module: i32) {
        self.record(format!("start {module}"));
    }

    fn on_module_shutdown(&self, module: i32) {
        self.record(format!("stop {module}"));
    }

    fn on_registration_change(&self) {
        self.record("registry".to_string());
    }

    fn on_shutdown(&self) {
        self.record("shutdown".to_string());
    }
}

#[test]
fn test_call_between_modules() {
    let broker = start_broker();
    let math = host(&broker, "math", math_service());
    let client = broker.connect_module("client").unwrap();

    assert_eq!(sum(&client, math.module_id(), 2, 3).unwrap(), 5);
    assert_eq!(sum(&client, math.module_id(), -7, 7).unwrap(), 0);
    assert_eq!(client.pending_calls(), 0);
    assert!(math.worker_count() >= 1);
}

#[test]
fn test_self_call_runs_on_own_workers() {
    let broker = start_broker();
    let math = host(&broker, "math", math_service());

    assert_eq!(sum(&math, math.module_id(), 20, 22).unwrap(), 42);
}

#[test]
fn test_send_is_delivered_without_reply() {
    let broker = start_broker();
    let (seen_tx, seen_rx) = channel();
    let seen_tx = Mutex::new(seen_tx);
    let mut service = Service::new("sink", "Sink", "/Test", "");
    service
        .add_method("void push(string)", "", false, move |from, args| {
            let text: String = args.get()?;
            seen_tx.lock().unwrap().send((from, text)).unwrap();
            Ok(DataBlockWriter::new())
        })
        .unwrap();
    let sink = host(&broker, "sink", service);
    let client = broker.connect_module("client").unwrap();

    let mut args = DataBlockWriter::new();
    args.add("hello");
    client.send(sink.module_id(), 0, 0, &args).unwrap();

    let (from, text) = seen_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(from, client.module_id());
    assert_eq!(text, "hello");
    assert_eq!(client.pending_calls(), 0);
}

#[test]
fn test_failed_send_is_not_reported() {
    let broker = start_broker();
    let math = host(&broker, "math", math_service());
    let client = broker.connect_module("client").unwrap();

    client
        .send(math.module_id(), 9, 0, &DataBlockWriter::new())
        .unwrap();
    // The module keeps answering after the failed send.
    assert_eq!(sum(&client, math.module_id(), 1, 1).unwrap(), 2);
}

#[test]
fn test_unknown_service_and_method() {
    let broker = start_broker();
    let math = host(&broker, "math", math_service());
    let client = broker.connect_module("client").unwrap();

    let err = client
        .call(math.module_id(), 9, 0, &DataBlockWriter::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorCode::ServiceNotFound);
    assert_eq!(err.user_message(), "Unknown service id 9");

    let err = client
        .call(math.module_id(), 0, 99, &DataBlockWriter::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorCode::MethodNotFound);
}

#[test]
fn test_exceptions_keep_code_message_and_detail() {
    let broker = start_broker();
    let math = host(&broker, "math", math_service());
    let client = broker.connect_module("client").unwrap();

    let mut args = DataBlockWriter::new();
    args.add(&17);
    let err = client.call(math.module_id(), 0, 3, &args).unwrap_err();
    assert_eq!(err.code(), 17);
    assert_eq!(err.kind(), ErrorCode::SecurityDenied);
    assert_eq!(err.user_message(), "requested failure");
    assert_eq!(err.detail(), "code 17");

    let mut args = DataBlockWriter::new();
    args.add(&42);
    let err = client.call(math.module_id(), 0, 3, &args).unwrap_err();
    assert_eq!(err.code(), 42);
    assert_eq!(err.kind(), ErrorCode::Application);
}

#[test]
fn test_panicking_handler_becomes_unexpected_error() {
    let broker = start_broker();
    let math = host(&broker, "math", math_service());
    let client = broker.connect_module("client").unwrap();

    let err = client
        .call(math.module_id(), 0, 4, &DataBlockWriter::new())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::UNEXPECTED);
    assert_eq!(err.user_message(), "unexpected error");
    assert!(err.detail().contains("handler blew up"));

    // The worker survives the panic.
    assert_eq!(sum(&client, math.module_id(), 3, 4).unwrap(), 7);
}

#[test]
fn test_argument_type_mismatch_is_reported() {
    let broker = start_broker();
    let math = host(&broker, "math", math_service());
    let client = broker.connect_module("client").unwrap();

    let mut args = DataBlockWriter::new();
    args.add("two").add(&3);
    let err = client.call(math.module_id(), 0, 0, &args).unwrap_err();
    assert_eq!(err.kind(), ErrorCode::TypeMismatch);
}

#[test]
fn test_client_helpers_resolve_overloads() {
    let broker = start_broker();
    let math = host(&broker, "math", math_service());
    let client = broker.connect_module("client").unwrap();
    let module = math.module_id();

    assert_eq!(client.services(module).unwrap(), vec!["math".to_string()]);
    let service = client.find_service(module, "math").unwrap();
    assert_eq!(service, 0);
    let err = client.find_service(module, "physics").unwrap_err();
    assert_eq!(err.kind(), ErrorCode::ServiceNotFound);

    assert_eq!(client.find_method(module, service, "add").unwrap(), 0);
    assert_eq!(client.find_method(module, service, "scale(int)").unwrap(), 2);
    assert_eq!(client.find_method(module, service, "scale(double)").unwrap(), 1);
    let err = client.find_method(module, service, "scale").unwrap_err();
    assert_eq!(err.kind(), ErrorCode::MethodAmbiguous);
    let err = client.find_method(module, service, "divide").unwrap_err();
    assert_eq!(err.kind(), ErrorCode::MethodNotFound);

    assert_eq!(
        client.method_help(module, service, 1).unwrap(),
        "doubles a value"
    );

    let method = client.find_method(module, service, "scale(int)").unwrap();
    let mut args = DataBlockWriter::new();
    args.add(&21);
    let scaled: f64 = client.call(module, service, method, &args).unwrap().get().unwrap();
    assert_eq!(scaled, 42.0);
}

#[test]
fn test_unsynchronized_calls_overlap() {
    let broker = start_broker();
    let (started_tx, started_rx) = channel();
    let started_tx = Mutex::new(started_tx);
    let gate = ShutdownToken::new();
    let handler_gate = gate.clone();
    let mut service = Service::new("slow", "Slow", "/Test", "");
    service
        .add_method("boolean hold()", "", false, move |_, _| {
            started_tx.lock().unwrap().send(()).unwrap();
            let released = handler_gate.wait_timeout(WAIT);
            let mut out = DataBlockWriter::new();
            out.add(&released);
            Ok(out)
        })
        .unwrap();
    let slow = host(&broker, "slow", service);
    let client = broker.connect_module("client").unwrap();

    let callers: Vec<_> = (0..2)
        .map(|_| {
            let client = client.clone();
            let target = slow.module_id();
            thread::spawn(move || -> bool {
                client
                    .call(target, 0, 0, &DataBlockWriter::new())
                    .unwrap()
                    .get()
                    .unwrap()
            })
        })
        .collect();

    // Both calls are inside the handler at the same time.
    started_rx.recv_timeout(WAIT).unwrap();
    started_rx.recv_timeout(WAIT).unwrap();
    assert!(slow.worker_count() >= 2);
    gate.cancel();

    for caller in callers {
        assert!(caller.join().unwrap());
    }
}

#[test]
fn test_synchronized_calls_are_serialized() {
    let broker = start_broker();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut service = Service::new("counter", "Counter", "/Test", "");
    {
        let active = active.clone();
        let peak = peak.clone();
        service
            .add_method("void bump()", "", true, move |_, _| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(30));
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(DataBlockWriter::new())
            })
            .unwrap();
    }
    let counter = host(&broker, "counter", service);
    let client = broker.connect_module("client").unwrap();

    let callers: Vec<_> = (0..3)
        .map(|_| {
            let client = client.clone();
            let target = counter.module_id();
            thread::spawn(move || {
                client.call(target, 0, 0, &DataBlockWriter::new()).unwrap();
            })
        })
        .collect();
    for caller in callers {
        caller.join().unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(active.load(Ordering::SeqCst), 0);
}

#[test]
fn test_listeners_see_modules_start_and_stop() {
    let broker = start_broker();
    let watcher = broker.connect_module("watcher").unwrap();
    let (log, events) = EventLog::new();
    watcher.add_listener(log);

    let other = broker.connect_module("other").unwrap();
    let id = other.module_id();
    assert_eq!(events.recv_timeout(WAIT).unwrap(), format!("start {id}"));

    other.disconnect();
    assert_eq!(events.recv_timeout(WAIT).unwrap(), format!("stop {id}"));
    assert!(broker.registry().instance_host(id).is_none());
}

#[test]
fn test_own_disconnect_fails_pending_calls() {
    let broker = start_broker();
    let (started_tx, started_rx) = channel();
    let started_tx = Mutex::new(started_tx);
    let gate = ShutdownToken::new();
    let handler_gate = gate.clone();
    let mut service = Service::new("slow", "Slow", "/Test", "");
    service
        .add_method("void hold()", "", false, move |_, _| {
            started_tx.lock().unwrap().send(()).unwrap();
            handler_gate.wait_timeout(WAIT);
            Ok(DataBlockWriter::new())
        })
        .unwrap();
    let slow = host(&broker, "slow", service);
    let client = broker.connect_module("client").unwrap();
    let (log, events) = EventLog::new();
    client.add_listener(log);

    let caller = {
        let client = client.clone();
        let target = slow.module_id();
        thread::spawn(move || client.call(target, 0, 0, &DataBlockWriter::new()))
    };
    started_rx.recv_timeout(WAIT).unwrap();

    client.signal_disconnect();
    let err = caller.join().unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorCode::Disconnected);
    assert_eq!(err.user_message(), "broker disconnected");
    assert!(client.wait_for_disconnect_timeout(WAIT));
    assert_eq!(events.recv_timeout(WAIT).unwrap(), "shutdown");
    assert_eq!(client.pending_calls(), 0);

    let err = sum(&client, slow.module_id(), 1, 2).unwrap_err();
    assert_eq!(err.kind(), ErrorCode::Disconnected);

    gate.cancel();
    slow.disconnect();
    assert!(slow
        .worker_states()
        .iter()
        .all(|state| *state == WorkerState::Stopped));
}

#[test]
fn test_callee_disconnect_fails_pending_calls() {
    let broker = start_broker();
    let (started_tx, started_rx) = channel();
    let started_tx = Mutex::new(started_tx);
    let gate = ShutdownToken::new();
    let handler_gate = gate.clone();
    let mut service = Service::new("slow", "Slow", "/Test", "");
    service
        .add_method("void hold()", "", false, move |_, _| {
            started_tx.lock().unwrap().send(()).unwrap();
            handler_gate.wait_timeout(WAIT);
            Ok(DataBlockWriter::new())
        })
        .unwrap();
    let slow = host(&broker, "slow", service);
    let client = broker.connect_module("client").unwrap();

    let caller = {
        let client = client.clone();
        let target = slow.module_id();
        thread::spawn(move || client.call(target, 0, 0, &DataBlockWriter::new()))
    };
    started_rx.recv_timeout(WAIT).unwrap();

    // Detaching joins the busy worker, so run it aside.
    let detach = {
        let broker = broker.clone();
        let target = slow.module_id();
        thread::spawn(move || broker.disconnect_module(target))
    };
    let err = caller.join().unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorCode::Disconnected);
    assert_eq!(err.user_message(), "implementation module disconnected");
    assert!(client.is_connected());

    gate.cancel();
    detach.join().unwrap();
    assert!(!slow.is_connected());
}

#[test]
fn test_broker_shutdown_asks_modules_to_stop() {
    let broker = start_broker();
    let module = broker.connect_module("worker").unwrap();
    let receiver = ModuleReceiver::new();
    let stop_requested = receiver.shutdown_requested();
    module.register_receiver(Arc::new(receiver));

    broker.shutdown();
    assert!(module.wait_for_disconnect_timeout(WAIT));
    assert!(broker.engine().wait_for_disconnect_timeout(WAIT));
    assert!(stop_requested.wait_timeout(WAIT));
    assert!(broker.hub().module_ids().is_empty());
}
