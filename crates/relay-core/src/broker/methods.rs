//! The broker service's method table.

use crate::MethodId;

/// Operations of the broker service, in method id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerMethod {
    GetVersion,
    GetModuleInstance,
    GetModuleDescriptors,
    GetModuleDescriptorByName,
    GetModuleDescriptorById,
    FindServices,
    GetServiceCategories,
    LinkBroker,
    GetExistingModuleInstanceIds,
    GetServiceDescriptorByName,
    GetServiceDescriptorById,
    GetServiceDescriptorsByName,
    GetServiceDescriptorsById,
    RegisterModule,
    ChangeModuleName,
    RegisterService,
    UnregisterModule,
    ShutdownBroker,
    GetListOfModules,
    GetMethodIdsById,
    GetMethodIdsByName,
    ReadFromFile,
    FindLocalServices,
    UnregisterService,
}

impl BrokerMethod {
    const ALL: [BrokerMethod; 24] = [
        BrokerMethod::GetVersion,
        BrokerMethod::GetModuleInstance,
        BrokerMethod::GetModuleDescriptors,
        BrokerMethod::GetModuleDescriptorByName,
        BrokerMethod::GetModuleDescriptorById,
        BrokerMethod::FindServices,
        BrokerMethod::GetServiceCategories,
        BrokerMethod::LinkBroker,
        BrokerMethod::GetExistingModuleInstanceIds,
        BrokerMethod::GetServiceDescriptorByName,
        BrokerMethod::GetServiceDescriptorById,
        BrokerMethod::GetServiceDescriptorsByName,
        BrokerMethod::GetServiceDescriptorsById,
        BrokerMethod::RegisterModule,
        BrokerMethod::ChangeModuleName,
        BrokerMethod::RegisterService,
        BrokerMethod::UnregisterModule,
        BrokerMethod::ShutdownBroker,
        BrokerMethod::GetListOfModules,
        BrokerMethod::GetMethodIdsById,
        BrokerMethod::GetMethodIdsByName,
        BrokerMethod::ReadFromFile,
        BrokerMethod::FindLocalServices,
        BrokerMethod::UnregisterService,
    ];

    pub fn all() -> &'static [BrokerMethod] {
        &Self::ALL
    }

    pub fn id(self) -> MethodId {
        self as MethodId
    }

    pub fn from_id(id: MethodId) -> Option<Self> {
        usize::try_from(id)
            .ok()
            .and_then(|index| Self::ALL.get(index))
            .copied()
    }

    pub fn signature(self) -> &'static str {
        match self {
            BrokerMethod::GetVersion => "string getVersion()",
            BrokerMethod::GetModuleInstance => "int getModuleInstance(string)",
            BrokerMethod::GetModuleDescriptors => "{}[] getModuleDescriptors(boolean, boolean)",
            BrokerMethod::GetModuleDescriptorByName => "{} getModuleDescriptor(string, boolean)",
            BrokerMethod::GetModuleDescriptorById => "{} getModuleDescriptor(int)",
            BrokerMethod::FindServices => "{}[] findServices(string, boolean)",
            BrokerMethod::GetServiceCategories => "string[] getServiceCategories(string)",
            BrokerMethod::LinkBroker => "int linkBroker(string)",
            BrokerMethod::GetExistingModuleInstanceIds => "int[] getExistingModuleInstanceIds()",
            BrokerMethod::GetServiceDescriptorByName => "{} getServiceDescriptor(int, string)",
            BrokerMethod::GetServiceDescriptorById => "{} getServiceDescriptor(int, int)",
            BrokerMethod::GetServiceDescriptorsByName => "{}[] getServiceDescriptors(string)",
            BrokerMethod::GetServiceDescriptorsById => "{}[] getServiceDescriptors(int)",
            BrokerMethod::RegisterModule => {
                "void registerModule(string, string, int, string, string)"
            }
            BrokerMethod::ChangeModuleName => "void changeModuleName(int, string)",
            BrokerMethod::RegisterService => {
                "void registerService(string, string, string, string, string)"
            }
            BrokerMethod::UnregisterModule => "void unregisterModule(string)",
            BrokerMethod::ShutdownBroker => "void shutdownBroker()",
            BrokerMethod::GetListOfModules => "{} getListOfModules()",
            BrokerMethod::GetMethodIdsById => "{} getMethodIds(int, int)",
            BrokerMethod::GetMethodIdsByName => "{} getMethodIds(string, string)",
            BrokerMethod::ReadFromFile => "string readFromFile(string)",
            BrokerMethod::FindLocalServices => "{}[] findLocalServices(string, boolean)",
            BrokerMethod::UnregisterService => "void unregisterService(string, string)",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            BrokerMethod::GetVersion => "returns the version of the broker",
            BrokerMethod::GetModuleInstance => {
                "returns the id of a running instance of the named module, starting one if needed"
            }
            BrokerMethod::GetModuleDescriptors => {
                "returns module descriptors; the flags are localOnly and includeRunning"
            }
            BrokerMethod::GetModuleDescriptorByName => {
                "returns the descriptor of the named module; the flag includes running unregistered modules"
            }
            BrokerMethod::GetModuleDescriptorById => {
                "returns the descriptor of the module with the given id"
            }
            BrokerMethod::FindServices => {
                "returns the services in a category; the flag includes sub-categories"
            }
            BrokerMethod::GetServiceCategories => {
                "returns the sub-categories of a category; '/' is the root"
            }
            BrokerMethod::LinkBroker => "links this broker to the broker on the given host",
            BrokerMethod::GetExistingModuleInstanceIds => "returns the ids of running modules",
            BrokerMethod::GetServiceDescriptorByName => {
                "returns the descriptor of the named service of a module"
            }
            BrokerMethod::GetServiceDescriptorById => {
                "returns the descriptor of a service of a module by service id"
            }
            BrokerMethod::GetServiceDescriptorsByName => {
                "returns the service descriptors of the named module"
            }
            BrokerMethod::GetServiceDescriptorsById => {
                "returns the service descriptors of the module with the given id"
            }
            BrokerMethod::RegisterModule => {
                "registers a module: name, display name, management type, command line, help"
            }
            BrokerMethod::ChangeModuleName => "renames the module with the given id",
            BrokerMethod::RegisterService => {
                "registers a service: module name, service name, display name, category, help"
            }
            BrokerMethod::UnregisterModule => "removes the registration of the named module",
            BrokerMethod::ShutdownBroker => "shuts down the broker",
            BrokerMethod::GetListOfModules => "returns the ids and names of running modules",
            BrokerMethod::GetMethodIdsById => {
                "returns the method ids and signatures of a service by module and service id"
            }
            BrokerMethod::GetMethodIdsByName => {
                "returns the method ids and signatures of a service by module and service name"
            }
            BrokerMethod::ReadFromFile => "returns the contents of a local file (absolute path)",
            BrokerMethod::FindLocalServices => {
                "returns the local services in a category; the flag includes sub-categories"
            }
            BrokerMethod::UnregisterService => "removes the registration of a service",
        }
    }

    /// Detail message when a remote caller is refused this operation in
    /// secure mode. `None` for operations open to everyone.
    pub fn remote_denial(self) -> Option<&'static str> {
        match self {
            BrokerMethod::LinkBroker => {
                Some("linking the remote broker to another computer is not allowed.")
            }
            BrokerMethod::RegisterModule
            | BrokerMethod::ChangeModuleName
            | BrokerMethod::RegisterService
            | BrokerMethod::UnregisterModule
            | BrokerMethod::UnregisterService => Some("changing the remote registry is not allowed"),
            BrokerMethod::ShutdownBroker => Some("shutdown of remote broker is not supported."),
            BrokerMethod::ReadFromFile => Some("reading a file on a remote machine is not allowed"),
            _ => None,
        }
    }

    /// Whether a successful call changes the registry.
    pub fn changes_registry(self) -> bool {
        matches!(
            self,
            BrokerMethod::RegisterModule
                | BrokerMethod::ChangeModuleName
                | BrokerMethod::RegisterService
                | BrokerMethod::UnregisterModule
                | BrokerMethod::UnregisterService
        )
    }
}
