//! Registry interface the broker dispatcher runs against.

use crate::codec::{DataBlockReader, DataBlockWriter};
use crate::{ErrorCode, ModuleId, RelayError, Result};
use serde::{Deserialize, Serialize};

/// How a module's instances are managed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleManagement {
    /// At most one instance, started by the broker on demand.
    Unique,
    /// The module starts and stops its own instances.
    SelfManaged,
}

impl ModuleManagement {
    pub fn to_i32(self) -> i32 {
        match self {
            ModuleManagement::Unique => 0,
            ModuleManagement::SelfManaged => 1,
        }
    }

    pub fn from_i32(value: i32) -> Result<Self> {
        match value {
            0 => Ok(ModuleManagement::Unique),
            1 => Ok(ModuleManagement::SelfManaged),
            other => Err(RelayError::new(
                ErrorCode::ModuleDefinition,
                "Invalid module type specified",
                format!("module type {other} must be 0 (unique) or 1 (self managed)"),
            )),
        }
    }
}

/// Registry record of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDescriptor {
    pub name: String,
    pub display_name: String,
    pub management: ModuleManagement,
    pub command_line: String,
    pub help: String,
}

impl ModuleDescriptor {
    /// Descriptor for a module that is running but never registered.
    pub fn unregistered(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: String::new(),
            management: ModuleManagement::Unique,
            command_line: String::new(),
            help: String::new(),
        }
    }

    /// Wire form: `{name, displayName, managementType, commandLine, help}`.
    pub fn to_list(&self) -> DataBlockWriter {
        let mut list = DataBlockWriter::new();
        list.add(&self.name)
            .add(&self.display_name)
            .add(&self.management.to_i32())
            .add(&self.command_line)
            .add(&self.help);
        list
    }

    pub fn from_list(list: &mut DataBlockReader) -> Result<Self> {
        Ok(Self {
            name: list.get()?,
            display_name: list.get()?,
            management: ModuleManagement::from_i32(list.get()?)?,
            command_line: list.get()?,
            help: list.get()?,
        })
    }
}

/// Registry record of one service of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub module_name: String,
    pub service_name: String,
    pub display_name: String,
    pub category: String,
    pub help: String,
}

impl ServiceDescriptor {
    /// Descriptor carrying nothing but the module and service names.
    pub fn named(module_name: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            service_name: service_name.into(),
            display_name: String::new(),
            category: String::new(),
            help: String::new(),
        }
    }

    /// Wire form: `{moduleName, serviceName, displayName, category, help}`.
    pub fn to_list(&self) -> DataBlockWriter {
        let mut list = DataBlockWriter::new();
        list.add(&self.module_name)
            .add(&self.service_name)
            .add(&self.display_name)
            .add(&self.category)
            .add(&self.help);
        list
    }

    pub fn from_list(list: &mut DataBlockReader) -> Result<Self> {
        Ok(Self {
            module_name: list.get()?,
            service_name: list.get()?,
            display_name: list.get()?,
            category: list.get()?,
            help: list.get()?,
        })
    }
}

/// Where a module instance runs relative to this broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceHost {
    Local,
    Remote(String),
}

/// Starts registered modules for `getModuleInstance`.
pub trait ModuleLauncher: Send + Sync {
    /// Start `module` and return the id of the connected instance.
    fn launch(&self, module: &ModuleDescriptor) -> Result<ModuleId>;
}

/// Registry and instance table behind the broker service.
///
/// Every method here is a local operation; calls into other modules are
/// made by the dispatcher.
pub trait BrokerBackend: Send + Sync + 'static {
    fn version(&self) -> String;

    /// Id of a running instance of `name`, launching one if needed.
    fn module_instance(&self, name: &str) -> Result<ModuleId>;

    /// Registered modules, plus running unregistered ones when
    /// `include_running`. `local_only` skips modules reached through linked
    /// brokers.
    fn module_descriptors(&self, local_only: bool, include_running: bool) -> Vec<ModuleDescriptor>;

    fn module_descriptor(&self, name: &str, include_running: bool) -> Result<ModuleDescriptor>;

    /// Name of the module running as instance `id`.
    fn instance_name(&self, id: ModuleId) -> Result<String>;

    /// Ids of running instances of `name`, lowest first.
    fn instances_named(&self, name: &str) -> Vec<ModuleId>;

    /// Registered services of `module`. `None` when the module is unregistered.
    fn registered_services(&self, module: &str) -> Option<Vec<ServiceDescriptor>>;

    /// Services whose category matches. Recursive searches include
    /// sub-categories.
    fn find_services(
        &self,
        category: &str,
        recursive: bool,
        local_only: bool,
    ) -> Result<Vec<ServiceDescriptor>>;

    /// Categories below `parent`, relative to it.
    fn service_categories(&self, parent: &str) -> Result<Vec<String>>;

    /// Id standing for the broker on `host`.
    fn link_broker(&self, host: &str) -> Result<ModuleId>;

    fn instance_ids(&self) -> Vec<ModuleId>;

    /// `(id, name)` of every running instance.
    fn running_modules(&self) -> Vec<(ModuleId, String)>;

    fn register_module(&self, module: ModuleDescriptor) -> Result<()>;

    fn change_module_name(&self, id: ModuleId, name: &str) -> Result<()>;

    fn register_service(&self, service: ServiceDescriptor) -> Result<()>;

    fn unregister_module(&self, name: &str) -> Result<()>;

    fn unregister_service(&self, module: &str, service: &str) -> Result<()>;

    /// Ask the broker host to stop.
    fn shutdown_broker(&self);

    /// Whether `id` runs on another machine.
    fn is_remote_instance(&self, id: ModuleId) -> bool;
}
