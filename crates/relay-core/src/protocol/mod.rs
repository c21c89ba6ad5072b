//! Call/send/reply/exception protocol.
//!
//! The [`RpcEngine`] frames outgoing messages, correlates replies with the
//! threads waiting on them, and hands incoming calls to the worker pool.

mod engine;
mod listener;
mod message;
mod outcall;

pub use engine::RpcEngine;
pub use listener::SessionListener;
pub use message::{
    build_exception, build_invoke, build_reply, decode_frame, Frame, InvokeHeader, Message,
    MessageKind,
};

pub use engine::IncomingCall;

use crate::{MethodId, ModuleId, ServiceId};

/// Module id of the broker.
pub const BROKER_MODULE_ID: ModuleId = -1;
/// Module id used when the sender is unknown.
pub const ERROR_MODULE_ID: ModuleId = -2;
/// Service id of the per-module system service.
pub const SYSTEM_SERVICE_ID: ServiceId = -1;
pub const ERROR_SERVICE_ID: ServiceId = -2;
/// Message id carried by Send frames, which are never answered.
pub const SEND_MESSAGE_ID: i32 = -1;

/// Methods of the reserved system service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemMethod {
    GetServices,
    GetMethods,
    OnModuleShutdown,
    Shutdown,
    GetMethodHelp,
    OnModuleStartup,
    OnRegistrationChange,
}

impl SystemMethod {
    pub fn id(self) -> MethodId {
        match self {
            SystemMethod::GetServices => 0,
            SystemMethod::GetMethods => 1,
            SystemMethod::OnModuleShutdown => 2,
            SystemMethod::Shutdown => 3,
            SystemMethod::GetMethodHelp => 4,
            SystemMethod::OnModuleStartup => 5,
            SystemMethod::OnRegistrationChange => 6,
        }
    }

    pub fn from_id(id: MethodId) -> Option<Self> {
        match id {
            0 => Some(SystemMethod::GetServices),
            1 => Some(SystemMethod::GetMethods),
            2 => Some(SystemMethod::OnModuleShutdown),
            3 => Some(SystemMethod::Shutdown),
            4 => Some(SystemMethod::GetMethodHelp),
            5 => Some(SystemMethod::OnModuleStartup),
            6 => Some(SystemMethod::OnRegistrationChange),
            _ => None,
        }
    }
}
