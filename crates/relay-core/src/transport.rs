//! Frame delivery between engines.
//!
//! The engine only needs two things from a transport: deliver a frame to a
//! module, and start closing a module's connection. [`LocalHub`] does both
//! for engines living in one process.

use crate::protocol::RpcEngine;
use crate::{ErrorCode, ModuleId, RelayError, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::{debug, info, warn};

/// Moves frames between modules.
pub trait Transport: Send + Sync + 'static {
    /// Deliver a complete frame to module `to`.
    fn transmit(&self, to: ModuleId, frame: Bytes) -> Result<()>;

    /// Request that the connection of module `from` be closed.
    ///
    /// Returns without waiting; the transport later calls
    /// [`RpcEngine::connection_closed`].
    fn signal_disconnect(&self, from: ModuleId);
}

type DisconnectHook = Arc<dyn Fn(ModuleId) + Send + Sync>;

/// In-process router for engines attached under distinct module ids.
pub struct LocalHub {
    modules: RwLock<HashMap<ModuleId, Arc<RpcEngine>>>,
    on_disconnect: RwLock<Option<DisconnectHook>>,
    self_ref: Weak<LocalHub>,
}

impl LocalHub {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|self_ref| LocalHub {
            modules: RwLock::new(HashMap::new()),
            on_disconnect: RwLock::new(None),
            self_ref: self_ref.clone(),
        })
    }

    /// Create an engine for `module` and start routing frames to it.
    pub fn attach(&self, module: ModuleId) -> Result<Arc<RpcEngine>> {
        let hub: Arc<dyn Transport> = self.self_ref.upgrade().ok_or_else(|| {
            RelayError::new(ErrorCode::Communication, "hub is gone", "")
        })?;
        let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);
        if modules.contains_key(&module) {
            return Err(RelayError::new(
                ErrorCode::Communication,
                format!("module {module} is already connected"),
                "",
            ));
        }
        let engine = RpcEngine::new(module, hub);
        modules.insert(module, engine.clone());
        info!("Module {} attached", module);
        Ok(engine)
    }

    /// Close the connection of `module`.
    ///
    /// The engine is removed from routing first, so nothing the disconnect
    /// hook broadcasts reaches it. The hook runs before the engine's own
    /// teardown, which may block joining workers still inside a handler.
    pub fn detach(&self, module: ModuleId) {
        let engine = self
            .modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&module);
        let Some(engine) = engine else {
            debug!("Module {} is not attached", module);
            return;
        };
        let hook = self
            .on_disconnect
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            hook(module);
        }
        engine.connection_closed();
        info!("Module {} detached", module);
    }

    /// Install a callback run when a module detaches.
    pub fn set_disconnect_hook(&self, hook: impl Fn(ModuleId) + Send + Sync + 'static) {
        *self
            .on_disconnect
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    pub fn engine(&self, module: ModuleId) -> Option<Arc<RpcEngine>> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&module)
            .cloned()
    }

    pub fn module_ids(&self) -> Vec<ModuleId> {
        let mut ids: Vec<ModuleId> = self
            .modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Detach every module, highest id first.
    pub fn shutdown_all(&self) {
        for module in self.module_ids().into_iter().rev() {
            self.detach(module);
        }
    }
}

impl Transport for LocalHub {
    fn transmit(&self, to: ModuleId, frame: Bytes) -> Result<()> {
        let engine = self.engine(to).ok_or_else(|| {
            RelayError::new(
                ErrorCode::Communication,
                format!("module {to} is not connected"),
                "",
            )
        })?;
        engine.receive(frame)
    }

    fn signal_disconnect(&self, from: ModuleId) {
        // Detach runs teardown, which joins workers; keep it off the caller.
        let Some(hub) = self.self_ref.upgrade() else {
            return;
        };
        let spawned = std::thread::Builder::new()
            .name(format!("relay-detach-{from}"))
            .spawn(move || hub.detach(from));
        if let Err(err) = spawned {
            warn!("Could not spawn detach thread for module {}: {}", from, err);
            self.detach(from);
        }
    }
}

impl std::fmt::Debug for LocalHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalHub")
            .field("modules", &self.module_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DataBlockWriter;
    use std::time::Duration;

    #[test]
    fn test_duplicate_attach_is_rejected() {
        let hub = LocalHub::new();
        hub.attach(3).unwrap();
        let err = hub.attach(3).unwrap_err();
        assert_eq!(err.kind(), ErrorCode::Communication);
    }

    #[test]
    fn test_transmit_to_unknown_module_fails() {
        let hub = LocalHub::new();
        let engine = hub.attach(0).unwrap();
        let err = engine
            .call(7, 0, 0, &DataBlockWriter::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorCode::Communication);
        assert_eq!(err.user_message(), "module 7 is not connected");
        assert_eq!(engine.pending_calls(), 0);
    }

    #[test]
    fn test_signal_disconnect_detaches_and_runs_hook() {
        let hub = LocalHub::new();
        let (seen_tx, seen_rx) = std::sync::mpsc::channel();
        let seen_tx = std::sync::Mutex::new(seen_tx);
        hub.set_disconnect_hook(move |module| {
            seen_tx.lock().unwrap().send(module).unwrap();
        });
        let engine = hub.attach(2).unwrap();

        engine.signal_disconnect();
        assert!(engine.wait_for_disconnect_timeout(Duration::from_secs(5)));
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
        assert!(hub.engine(2).is_none());
        assert!(!engine.is_connected());
    }
}
