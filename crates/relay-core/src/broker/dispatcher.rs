//! Receiver used by the broker module.
//!
//! Service 0 is the broker service. Its methods are answered from the
//! [`BrokerBackend`]; registry-changing and filesystem operations are refused
//! to remote callers when the session is secure. Any further services added
//! to the table are dispatched like in an ordinary module.

use super::backend::{BrokerBackend, ModuleDescriptor, ModuleManagement, ServiceDescriptor};
use super::methods::BrokerMethod;
use crate::codec::{DataBlockReader, DataBlockWriter};
use crate::config::BrokerConfig;
use crate::protocol::{RpcEngine, SystemMethod, BROKER_MODULE_ID, SYSTEM_SERVICE_ID};
use crate::receiver::Receiver;
use crate::service::{Service, ServiceTable};
use crate::{ErrorCode, MethodId, ModuleId, RelayError, Result, ServiceId};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, warn};

pub struct BrokerDispatcher {
    backend: Arc<dyn BrokerBackend>,
    services: ServiceTable,
    secure: bool,
    engine: OnceLock<Weak<RpcEngine>>,
}

impl BrokerDispatcher {
    pub fn new(backend: Arc<dyn BrokerBackend>, secure: bool) -> Result<Self> {
        let mut broker = Service::new(
            BrokerConfig::SERVICE_NAME,
            BrokerConfig::SERVICE_DISPLAY_NAME,
            BrokerConfig::SERVICE_CATEGORY,
            "The BROKER service implements the services of the broker.",
        );
        for method in BrokerMethod::all() {
            broker.declare_method(method.signature(), method.help())?;
        }
        let services = ServiceTable::new();
        let id = services.add(broker);
        debug_assert_eq!(id, BrokerConfig::SERVICE_ID);
        Ok(Self {
            backend,
            services,
            secure,
            engine: OnceLock::new(),
        })
    }

    /// Give the dispatcher the engine it answers on. Needed by operations
    /// that query other modules. Later calls are ignored.
    pub fn bind_engine(&self, engine: &Arc<RpcEngine>) {
        if self.engine.set(Arc::downgrade(engine)).is_err() {
            warn!("Broker dispatcher is already bound to an engine");
        }
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn services(&self) -> &ServiceTable {
        &self.services
    }

    fn engine(&self) -> Result<Arc<RpcEngine>> {
        self.engine
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| RelayError::disconnected("broker engine is not running"))
    }

    /// Refuse guarded operations to remote callers in secure mode.
    fn check_access(&self, method: BrokerMethod, from: ModuleId) -> Result<()> {
        let Some(detail) = method.remote_denial() else {
            return Ok(());
        };
        if self.secure && self.backend.is_remote_instance(from) {
            warn!("Denied {:?} to remote module {}", method, from);
            return Err(RelayError::new(
                ErrorCode::SecurityDenied,
                "insecure execution denied",
                detail,
            ));
        }
        Ok(())
    }

    fn broker_call(
        &self,
        method: BrokerMethod,
        from: ModuleId,
        args: &mut DataBlockReader,
    ) -> Result<DataBlockWriter> {
        self.check_access(method, from)?;
        debug!("Module {} invoking broker {:?}", from, method);

        let mut result = DataBlockWriter::new();
        match method {
            BrokerMethod::GetVersion => {
                result.add(&self.backend.version());
            }
            BrokerMethod::GetModuleInstance => {
                let name: String = args.get()?;
                result.add(&self.backend.module_instance(&name)?);
            }
            BrokerMethod::GetModuleDescriptors => {
                let local_only: bool = args.get()?;
                let include_running: bool = args.get()?;
                let lists: Vec<DataBlockWriter> = self
                    .backend
                    .module_descriptors(local_only, include_running)
                    .iter()
                    .map(ModuleDescriptor::to_list)
                    .collect();
                result.add(&lists);
            }
            BrokerMethod::GetModuleDescriptorByName => {
                let name: String = args.get()?;
                let include_running: bool = args.get()?;
                result.add(&self.backend.module_descriptor(&name, include_running)?.to_list());
            }
            BrokerMethod::GetModuleDescriptorById => {
                let id: ModuleId = args.get()?;
                let name = self.backend.instance_name(id)?;
                let descriptor = self
                    .backend
                    .module_descriptor(&name, true)
                    .unwrap_or_else(|_| ModuleDescriptor::unregistered(name));
                result.add(&descriptor.to_list());
            }
            BrokerMethod::FindServices | BrokerMethod::FindLocalServices => {
                let category: String = args.get()?;
                let recursive: bool = args.get()?;
                let local_only = method == BrokerMethod::FindLocalServices;
                let found = self.backend.find_services(&category, recursive, local_only)?;
                result.add(&service_lists(&found));
            }
            BrokerMethod::GetServiceCategories => {
                let parent: String = args.get()?;
                result.add(&self.backend.service_categories(&parent)?);
            }
            BrokerMethod::LinkBroker => {
                let host: String = args.get()?;
                result.add(&self.backend.link_broker(&host)?);
            }
            BrokerMethod::GetExistingModuleInstanceIds => {
                result.add(&self.backend.instance_ids());
            }
            BrokerMethod::GetServiceDescriptorByName => {
                let module: ModuleId = args.get()?;
                let service: String = args.get()?;
                result.add(&self.service_descriptor(module, &service)?.to_list());
            }
            BrokerMethod::GetServiceDescriptorById => {
                let module: ModuleId = args.get()?;
                let service: ServiceId = args.get()?;
                let names = self.service_names(module)?;
                let name = usize::try_from(service)
                    .ok()
                    .and_then(|index| names.get(index))
                    .ok_or_else(|| {
                        RelayError::new(
                            ErrorCode::ServiceNotFound,
                            format!("Service id {service} is out of range"),
                            format!(
                                "service id {service} is not within the range of service \
                                 identifiers recognized by module {module}"
                            ),
                        )
                    })?;
                result.add(&self.service_descriptor(module, name)?.to_list());
            }
            BrokerMethod::GetServiceDescriptorsByName => {
                let name: String = args.get()?;
                result.add(&service_lists(&self.service_descriptors_named(&name)?));
            }
            BrokerMethod::GetServiceDescriptorsById => {
                let module: ModuleId = args.get()?;
                result.add(&service_lists(&self.service_descriptors_of(module)?));
            }
            BrokerMethod::RegisterModule => {
                let name: String = args.get()?;
                let display_name: String = args.get()?;
                let management: i32 = args.get()?;
                let command_line: String = args.get()?;
                let help: String = args.get()?;
                self.backend.register_module(ModuleDescriptor {
                    name,
                    display_name,
                    management: ModuleManagement::from_i32(management)?,
                    command_line,
                    help,
                })?;
            }
            BrokerMethod::ChangeModuleName => {
                let id: ModuleId = args.get()?;
                let name: String = args.get()?;
                self.backend.change_module_name(id, &name)?;
            }
            BrokerMethod::RegisterService => {
                self.backend.register_service(ServiceDescriptor {
                    module_name: args.get()?,
                    service_name: args.get()?,
                    display_name: args.get()?,
                    category: args.get()?,
                    help: args.get()?,
                })?;
            }
            BrokerMethod::UnregisterModule => {
                let name: String = args.get()?;
                self.backend.unregister_module(&name)?;
            }
            BrokerMethod::UnregisterService => {
                let module: String = args.get()?;
                let service: String = args.get()?;
                self.backend.unregister_service(&module, &service)?;
            }
            BrokerMethod::ShutdownBroker => {
                self.backend.shutdown_broker();
            }
            BrokerMethod::GetListOfModules => {
                let mut modules = DataBlockWriter::new();
                for (id, name) in self.backend.running_modules() {
                    let mut entry = DataBlockWriter::new();
                    entry.add(&id).add(&name);
                    modules.add(&entry);
                }
                result.add(&modules);
            }
            BrokerMethod::GetMethodIdsById => {
                let module: ModuleId = args.get()?;
                let service: ServiceId = args.get()?;
                result.add(&self.method_ids(module, service)?);
            }
            BrokerMethod::GetMethodIdsByName => {
                let module: String = args.get()?;
                let service: String = args.get()?;
                result.add(&self.method_ids_named(&module, &service)?);
            }
            BrokerMethod::ReadFromFile => {
                let path: String = args.get()?;
                result.add(&read_file_lines(&path)?);
            }
        }

        if method.changes_registry() {
            self.broadcast_registration_change();
        }
        Ok(result)
    }

    /// Service names hosted by `module`. The broker answers for itself.
    fn service_names(&self, module: ModuleId) -> Result<Vec<String>> {
        if module == BROKER_MODULE_ID {
            return Ok(self.services.names());
        }
        self.backend.instance_name(module)?;
        self.engine()?.services(module)
    }

    fn service_descriptor(&self, module: ModuleId, service: &str) -> Result<ServiceDescriptor> {
        let name = self.backend.instance_name(module)?;
        if let Some(found) = self
            .backend
            .registered_services(&name)
            .and_then(|services| services.into_iter().find(|sd| sd.service_name == service))
        {
            return Ok(found);
        }
        // Anonymous modules have no registered services; trust what the
        // module itself reports.
        if self.service_names(module)?.iter().any(|known| known == service) {
            return Ok(ServiceDescriptor::named(name, service));
        }
        Err(RelayError::new(
            ErrorCode::ServiceNotFound,
            format!("Cannot find a service named '{service}' on {name}"),
            format!("module {name} does not define a service named '{service}'"),
        ))
    }

    fn service_descriptors_of(&self, module: ModuleId) -> Result<Vec<ServiceDescriptor>> {
        let name = self.backend.instance_name(module)?;
        match self.backend.registered_services(&name) {
            Some(services) => Ok(services),
            None => Ok(self
                .service_names(module)?
                .into_iter()
                .map(|service| ServiceDescriptor::named(name.clone(), service))
                .collect()),
        }
    }

    fn service_descriptors_named(&self, name: &str) -> Result<Vec<ServiceDescriptor>> {
        if let Some(services) = self.backend.registered_services(name) {
            return Ok(services);
        }
        match self.backend.instances_named(name).first() {
            Some(&module) => self.service_descriptors_of(module),
            None => Err(RelayError::new(
                ErrorCode::ModuleNotFound,
                format!("Unknown/unregistered module '{name}'"),
                format!("no module named '{name}' is registered or running"),
            )),
        }
    }

    /// `{ {id, signature}... }` for every method of a service.
    fn method_ids(&self, module: ModuleId, service: ServiceId) -> Result<DataBlockWriter> {
        let signatures = if module == BROKER_MODULE_ID {
            self.services.get(service)?.signatures()
        } else {
            self.backend.instance_name(module)?;
            self.engine()?.method_signatures(module, service)?
        };
        let mut methods = DataBlockWriter::new();
        for (id, signature) in signatures.iter().enumerate() {
            let id = MethodId::try_from(id)
                .map_err(|_| RelayError::application("too many methods", signature.clone()))?;
            let mut entry = DataBlockWriter::new();
            entry.add(&id).add(signature);
            methods.add(&entry);
        }
        Ok(methods)
    }

    fn method_ids_named(&self, module: &str, service: &str) -> Result<DataBlockWriter> {
        let retrieval_error = || {
            RelayError::application(
                format!("error retrieving method ids for {module} and {service}"),
                "",
            )
        };
        let id = if module == BrokerConfig::MODULE_NAME {
            BROKER_MODULE_ID
        } else {
            *self
                .backend
                .instances_named(module)
                .first()
                .ok_or_else(retrieval_error)?
        };
        let service_id = self
            .service_names(id)?
            .iter()
            .position(|known| known == service)
            .and_then(|index| ServiceId::try_from(index).ok())
            .ok_or_else(|| {
                RelayError::service_not_found(format!("service {service} not found on {module}"))
            })?;
        self.method_ids(id, service_id)
    }

    /// Tell every local instance that the registry changed.
    fn broadcast_registration_change(&self) {
        let Ok(engine) = self.engine() else {
            return;
        };
        let args = DataBlockWriter::new();
        for module in self.backend.instance_ids() {
            if self.backend.is_remote_instance(module) {
                continue;
            }
            if let Err(err) = engine.send(
                module,
                SYSTEM_SERVICE_ID,
                SystemMethod::OnRegistrationChange.id(),
                &args,
            ) {
                warn!("Could not notify module {} of registration change: {}", module, err);
            }
        }
    }
}

fn service_lists(services: &[ServiceDescriptor]) -> Vec<DataBlockWriter> {
    services.iter().map(ServiceDescriptor::to_list).collect()
}

/// The file's lines concatenated without their terminators.
fn read_file_lines(path: &str) -> Result<String> {
    std::fs::read_to_string(path)
        .map(|text| text.lines().collect())
        .map_err(|err| {
            RelayError::application(
                "error reading file",
                format!("an error occurred while trying to read '{path}': {err}"),
            )
        })
}

impl Receiver for BrokerDispatcher {
    fn receive(
        &self,
        from: ModuleId,
        service: ServiceId,
        method: MethodId,
        args: &mut DataBlockReader,
    ) -> Result<DataBlockWriter> {
        if service == SYSTEM_SERVICE_ID {
            return self.services.answer_system(method, args);
        }
        let target = self.services.get(service)?;
        if service != BrokerConfig::SERVICE_ID {
            return target.invoke(method, from, args);
        }
        target.method(method)?;
        let method = BrokerMethod::from_id(method)
            .ok_or_else(|| RelayError::method_not_found(format!("broker method {method}")))?;
        self.broker_call(method, from, args)
    }
}

impl std::fmt::Debug for BrokerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerDispatcher")
            .field("secure", &self.secure)
            .field("services", &self.services.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::backend::InstanceHost;
    use crate::broker::ModuleRegistry;
    use tempfile::TempDir;

    fn dispatcher(secure: bool) -> (Arc<ModuleRegistry>, BrokerDispatcher) {
        let registry = Arc::new(ModuleRegistry::new());
        let dispatcher = BrokerDispatcher::new(registry.clone(), secure).unwrap();
        (registry, dispatcher)
    }

    fn call(
        dispatcher: &BrokerDispatcher,
        from: ModuleId,
        method: BrokerMethod,
        args: &DataBlockWriter,
    ) -> Result<DataBlockReader> {
        dispatcher
            .receive(from, BrokerConfig::SERVICE_ID, method.id(), &mut args.reader())
            .map(|result| result.reader())
    }

    fn register_math(dispatcher: &BrokerDispatcher, from: ModuleId) -> Result<DataBlockReader> {
        let mut args = DataBlockWriter::new();
        args.add("math").add("Math").add(&0).add("math --serve").add("");
        call(dispatcher, from, BrokerMethod::RegisterModule, &args)
    }

    #[test]
    fn test_system_service_lists_broker_methods() {
        let (_, dispatcher) = dispatcher(true);
        let mut args = DataBlockWriter::new();
        let names: Vec<String> = dispatcher
            .receive(0, SYSTEM_SERVICE_ID, SystemMethod::GetServices.id(), &mut args.reader())
            .unwrap()
            .reader()
            .get()
            .unwrap();
        assert_eq!(names, vec!["BROKER".to_string()]);

        args.add(&0);
        let signatures: Vec<String> = dispatcher
            .receive(0, SYSTEM_SERVICE_ID, SystemMethod::GetMethods.id(), &mut args.reader())
            .unwrap()
            .reader()
            .get()
            .unwrap();
        assert_eq!(signatures.len(), BrokerMethod::all().len());
        assert_eq!(signatures[7], "int linkBroker(string)");
    }

    #[test]
    fn test_unknown_ids() {
        let (_, dispatcher) = dispatcher(true);
        let empty = DataBlockWriter::new();
        let err = dispatcher
            .receive(0, 5, 0, &mut empty.reader())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorCode::ServiceNotFound);
        assert_eq!(err.user_message(), "Unknown service id 5");

        let err = dispatcher
            .receive(0, BrokerConfig::SERVICE_ID, 99, &mut empty.reader())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorCode::MethodNotFound);

        let err = dispatcher
            .receive(0, SYSTEM_SERVICE_ID, 42, &mut empty.reader())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorCode::MethodNotFound);
    }

    #[test]
    fn test_secure_mode_denies_remote_registry_changes() {
        let (registry, dispatcher) = dispatcher(true);
        let remote = registry.add_instance("visitor", InstanceHost::Remote("far".to_string()));
        let local = registry.add_instance("tool", InstanceHost::Local);

        let err = register_math(&dispatcher, remote).unwrap_err();
        assert_eq!(err.kind(), ErrorCode::SecurityDenied);
        assert_eq!(err.user_message(), "insecure execution denied");
        assert_eq!(err.detail(), "changing the remote registry is not allowed");
        assert!(registry.records().is_empty());

        register_math(&dispatcher, local).unwrap();
        assert_eq!(registry.records().len(), 1);
    }

    #[test]
    fn test_security_check_is_per_operation() {
        let (registry, dispatcher) = dispatcher(true);
        let remote = registry.add_instance("visitor", InstanceHost::Remote("far".to_string()));

        let version: String = call(&dispatcher, remote, BrokerMethod::GetVersion, &DataBlockWriter::new())
            .unwrap()
            .get()
            .unwrap();
        assert!(version.starts_with(BrokerConfig::VERSION));

        let err = call(&dispatcher, remote, BrokerMethod::ShutdownBroker, &DataBlockWriter::new())
            .unwrap_err();
        assert_eq!(err.detail(), "shutdown of remote broker is not supported.");
        assert!(!registry.shutdown_token().is_cancelled());

        let mut args = DataBlockWriter::new();
        args.add("/etc/hostname");
        let err = call(&dispatcher, remote, BrokerMethod::ReadFromFile, &args).unwrap_err();
        assert_eq!(err.kind(), ErrorCode::SecurityDenied);
        assert_eq!(err.detail(), "reading a file on a remote machine is not allowed");

        let mut args = DataBlockWriter::new();
        args.add("elsewhere");
        let err = call(&dispatcher, remote, BrokerMethod::LinkBroker, &args).unwrap_err();
        assert_eq!(
            err.detail(),
            "linking the remote broker to another computer is not allowed."
        );
    }

    #[test]
    fn test_insecure_mode_allows_remote_callers() {
        let (registry, dispatcher) = dispatcher(false);
        let remote = registry.add_instance("visitor", InstanceHost::Remote("far".to_string()));
        register_math(&dispatcher, remote).unwrap();
        call(&dispatcher, remote, BrokerMethod::ShutdownBroker, &DataBlockWriter::new()).unwrap();
        assert!(registry.shutdown_token().is_cancelled());
    }

    #[test]
    fn test_read_from_file_joins_lines() {
        let (registry, dispatcher) = dispatcher(true);
        let local = registry.add_instance("tool", InstanceHost::Local);
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("model.txt");
        std::fs::write(&path, "first\nsecond\r\nthird\n").unwrap();

        let mut args = DataBlockWriter::new();
        args.add(path.to_str().unwrap());
        let text: String = call(&dispatcher, local, BrokerMethod::ReadFromFile, &args)
            .unwrap()
            .get()
            .unwrap();
        assert_eq!(text, "firstsecondthird");

        let mut args = DataBlockWriter::new();
        args.add(temp_dir.path().join("missing.txt").to_str().unwrap());
        let err = call(&dispatcher, local, BrokerMethod::ReadFromFile, &args).unwrap_err();
        assert_eq!(err.user_message(), "error reading file");
    }

    #[test]
    fn test_module_descriptor_lists() {
        let (registry, dispatcher) = dispatcher(true);
        register_math(&dispatcher, -1).unwrap();
        registry.add_instance("anonymous", InstanceHost::Local);

        let mut args = DataBlockWriter::new();
        args.add(&true).add(&true);
        let mut lists: Vec<DataBlockReader> =
            call(&dispatcher, -1, BrokerMethod::GetModuleDescriptors, &args)
                .unwrap()
                .get()
                .unwrap();
        let names: Vec<String> = lists
            .iter_mut()
            .map(|list| ModuleDescriptor::from_list(list).unwrap().name)
            .collect();
        assert_eq!(names, vec!["BROKER", "math", "anonymous"]);
    }

    #[test]
    fn test_broker_answers_its_own_descriptors() {
        let (_, dispatcher) = dispatcher(true);
        let mut args = DataBlockWriter::new();
        args.add(&BROKER_MODULE_ID).add("BROKER");
        let mut list: DataBlockReader =
            call(&dispatcher, -1, BrokerMethod::GetServiceDescriptorByName, &args)
                .unwrap()
                .get()
                .unwrap();
        let descriptor = ServiceDescriptor::from_list(&mut list).unwrap();
        assert_eq!(descriptor.category, "/Broker");

        let mut args = DataBlockWriter::new();
        args.add("BROKER").add("BROKER");
        let mut methods: DataBlockReader =
            call(&dispatcher, -1, BrokerMethod::GetMethodIdsByName, &args)
                .unwrap()
                .get()
                .unwrap();
        let mut first = methods.get_list().unwrap();
        assert_eq!(first.get::<i32>().unwrap(), 0);
        assert_eq!(first.get::<String>().unwrap(), "string getVersion()");
    }
}
