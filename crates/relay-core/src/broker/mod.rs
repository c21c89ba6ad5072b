//! The broker: registry, dispatcher and session facade.
//!
//! A [`Broker`] attaches the broker engine (module id -1) to a [`LocalHub`],
//! answers the broker service through a [`BrokerDispatcher`], and tells
//! modules when other modules start or stop.

mod backend;
mod category;
mod dispatcher;
mod methods;
mod registry;

pub use backend::{
    BrokerBackend, InstanceHost, ModuleDescriptor, ModuleLauncher, ModuleManagement,
    ServiceDescriptor,
};
pub use category::{matches as category_matches, normalize as normalize_category, subcategories};
pub use dispatcher::BrokerDispatcher;
pub use methods::BrokerMethod;
pub use registry::{ModuleRecord, ModuleRegistry};

use crate::codec::DataBlockWriter;
use crate::config::SessionConfig;
use crate::protocol::{RpcEngine, SystemMethod, BROKER_MODULE_ID, SYSTEM_SERVICE_ID};
use crate::transport::LocalHub;
use crate::{ErrorCode, ModuleId, RelayError, Result};
use std::sync::{Arc, Weak};
use tracing::{info, warn};

/// A running broker session.
pub struct Broker {
    hub: Arc<LocalHub>,
    engine: Arc<RpcEngine>,
    registry: Arc<ModuleRegistry>,
    dispatcher: Arc<BrokerDispatcher>,
}

impl Broker {
    /// Attach the broker to `hub` and start answering broker calls.
    pub fn start(
        hub: Arc<LocalHub>,
        registry: Arc<ModuleRegistry>,
        config: &SessionConfig,
    ) -> Result<Arc<Self>> {
        let engine = hub.attach(BROKER_MODULE_ID).map_err(|err| {
            RelayError::new(
                ErrorCode::BrokerStart,
                "the broker could not be started",
                err.user_message().to_string(),
            )
        })?;
        let dispatcher = Arc::new(BrokerDispatcher::new(registry.clone(), config.secure)?);
        dispatcher.bind_engine(&engine);
        engine.register_receiver(dispatcher.clone());

        let hook_registry = Arc::downgrade(&registry);
        let hook_engine = Arc::downgrade(&engine);
        hub.set_disconnect_hook(move |module| {
            if module == BROKER_MODULE_ID {
                return;
            }
            module_stopped(&hook_registry, &hook_engine, module);
        });

        info!(
            "Broker {} started ({} mode)",
            config.module_name,
            if config.secure { "secure" } else { "insecure" }
        );
        Ok(Arc::new(Self {
            hub,
            engine,
            registry,
            dispatcher,
        }))
    }

    /// Connect a module running on this machine.
    pub fn connect_module(&self, name: &str) -> Result<Arc<RpcEngine>> {
        self.connect(name, InstanceHost::Local)
    }

    /// Connect a module that reached this broker from `host`.
    pub fn connect_remote_module(&self, name: &str, host: &str) -> Result<Arc<RpcEngine>> {
        self.connect(name, InstanceHost::Remote(host.to_string()))
    }

    fn connect(&self, name: &str, host: InstanceHost) -> Result<Arc<RpcEngine>> {
        let id = self.registry.add_instance(name, host);
        let engine = match self.hub.attach(id) {
            Ok(engine) => engine,
            Err(err) => {
                self.registry.remove_instance(id);
                return Err(err);
            }
        };
        info!("Module '{}' connected as {}", name, id);
        notify_instances(
            &self.engine,
            &self.registry,
            SystemMethod::OnModuleStartup,
            id,
        );
        Ok(engine)
    }

    /// Close a module's connection from the broker side.
    pub fn disconnect_module(&self, module: ModuleId) {
        self.hub.detach(module);
    }

    /// Ask every module to shut down, then close all connections.
    pub fn shutdown(&self) {
        info!("Broker shutting down");
        let args = DataBlockWriter::new();
        for module in self.registry.instance_ids() {
            if self.registry.is_remote_instance(module) {
                continue;
            }
            if let Err(err) = self.engine.send(
                module,
                SYSTEM_SERVICE_ID,
                SystemMethod::Shutdown.id(),
                &args,
            ) {
                warn!("Could not ask module {} to shut down: {}", module, err);
            }
        }
        self.hub.shutdown_all();
    }

    /// Block until a `shutdownBroker` call is accepted.
    pub fn wait_for_shutdown_request(&self) {
        self.registry.shutdown_token().wait();
    }

    pub fn engine(&self) -> &Arc<RpcEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<BrokerDispatcher> {
        &self.dispatcher
    }

    pub fn hub(&self) -> &Arc<LocalHub> {
        &self.hub
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("registry", &self.registry)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

fn module_stopped(registry: &Weak<ModuleRegistry>, engine: &Weak<RpcEngine>, module: ModuleId) {
    let (Some(registry), Some(engine)) = (registry.upgrade(), engine.upgrade()) else {
        return;
    };
    let name = registry.remove_instance(module);
    info!(
        "Module {} ({}) disconnected",
        module,
        name.as_deref().unwrap_or("unknown")
    );
    if !engine.is_connected() {
        return;
    }
    notify_instances(&engine, &registry, SystemMethod::OnModuleShutdown, module);
    // The broker's own outstanding calls to the module fail too.
    send_notification(&engine, BROKER_MODULE_ID, SystemMethod::OnModuleShutdown, module);
}

/// Send a startup or shutdown notification about `subject` to every other
/// local instance.
fn notify_instances(
    engine: &RpcEngine,
    registry: &ModuleRegistry,
    notification: SystemMethod,
    subject: ModuleId,
) {
    for module in registry.instance_ids() {
        if module == subject || registry.is_remote_instance(module) {
            continue;
        }
        send_notification(engine, module, notification, subject);
    }
}

fn send_notification(
    engine: &RpcEngine,
    to: ModuleId,
    notification: SystemMethod,
    subject: ModuleId,
) {
    let mut args = DataBlockWriter::new();
    args.add(&subject);
    if let Err(err) = engine.send(to, SYSTEM_SERVICE_ID, notification.id(), &args) {
        warn!(
            "Could not send {:?} about module {} to {}: {}",
            notification, subject, to, err
        );
    }
}
