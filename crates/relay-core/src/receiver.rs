//! Pluggable call receivers and method handlers.

use crate::codec::{DataBlockReader, DataBlockWriter};
use crate::{MethodId, ModuleId, RelayError, Result, ServiceId};

/// Dispatches an incoming call to its implementation.
///
/// Implemented by [`ModuleReceiver`](crate::service::ModuleReceiver) for
/// ordinary modules and by
/// [`BrokerDispatcher`](crate::broker::BrokerDispatcher) for the broker.
pub trait Receiver: Send + Sync + 'static {
    /// Run `service`/`method` on behalf of `from` and return the encoded result.
    fn receive(
        &self,
        from: ModuleId,
        service: ServiceId,
        method: MethodId,
        args: &mut DataBlockReader,
    ) -> Result<DataBlockWriter>;
}

/// Placeholder installed when no receiver is registered.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReceiver;

impl Receiver for NoReceiver {
    fn receive(
        &self,
        _from: ModuleId,
        _service: ServiceId,
        _method: MethodId,
        _args: &mut DataBlockReader,
    ) -> Result<DataBlockWriter> {
        Err(RelayError::disconnected("Receiver disconnected"))
    }
}

/// Implementation of one method.
pub trait Handler: Send + Sync {
    fn invoke(&self, from: ModuleId, args: &mut DataBlockReader) -> Result<DataBlockWriter>;
}

impl<F> Handler for F
where
    F: Fn(ModuleId, &mut DataBlockReader) -> Result<DataBlockWriter> + Send + Sync,
{
    fn invoke(&self, from: ModuleId, args: &mut DataBlockReader) -> Result<DataBlockWriter> {
        self(from, args)
    }
}
