//! Relay: a broker-mediated RPC engine.
//!
//! Independently started modules expose numbered services and methods and
//! call each other through a central broker using a compact binary wire
//! format.
//!
//! # Architecture
//!
//! - [`codec`]: tagged data blocks (scalars, strings, lists, 1-D/2-D arrays)
//! - [`signature`]: method signature grammar and overload resolution
//! - [`protocol`]: message framing, call correlation and the [`RpcEngine`]
//! - [`worker`]: grow-only pool of threads that run incoming calls
//! - [`service`]: services, methods and the module-side receiver
//! - [`transport`]: the transport seam and the in-process [`LocalHub`]
//! - [`broker`]: broker dispatcher, security policy and module registry
//!
//! # Example
//!
//! ```no_run
//! use relay_core::codec::DataBlockWriter;
//! use relay_core::service::{ModuleReceiver, Service};
//! use relay_core::{Broker, LocalHub, ModuleRegistry, SessionConfig};
//! use std::sync::Arc;
//!
//! # fn main() -> relay_core::Result<()> {
//! let hub = LocalHub::new();
//! let broker = Broker::start(hub, Arc::new(ModuleRegistry::new()), &SessionConfig::default())?;
//!
//! let math = broker.connect_module("math")?;
//! let receiver = ModuleReceiver::new();
//! let mut service = Service::new("calc", "Calculator", "/Math", "");
//! service.add_method("int add(int, int)", "", false, |_from, args| {
//!     let (a, b): (i32, i32) = (args.get()?, args.get()?);
//!     let mut out = DataBlockWriter::new();
//!     out.add(&(a + b));
//!     Ok(out)
//! })?;
//! receiver.services().add(service);
//! math.register_receiver(Arc::new(receiver));
//!
//! let client = broker.connect_module("client")?;
//! let service = client.find_service(math.module_id(), "calc")?;
//! let method = client.find_method(math.module_id(), service, "add")?;
//! let mut args = DataBlockWriter::new();
//! args.add(&2).add(&3);
//! let sum: i32 = client.call(math.module_id(), service, method, &args)?.get()?;
//! assert_eq!(sum, 5);
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod receiver;
pub mod service;
pub mod shutdown;
pub mod signature;
pub mod transport;
pub mod worker;

/// Identifies a running module instance within a broker session.
pub type ModuleId = i32;
/// Identifies a service within one module.
pub type ServiceId = i32;
/// Identifies a method within one service.
pub type MethodId = i32;

pub use broker::{Broker, BrokerBackend, BrokerDispatcher, ModuleRegistry};
pub use config::SessionConfig;
pub use error::{ErrorCode, RelayError, Result};
pub use protocol::{RpcEngine, SessionListener};
pub use receiver::{Handler, Receiver};
pub use shutdown::ShutdownToken;
pub use transport::{LocalHub, Transport};
