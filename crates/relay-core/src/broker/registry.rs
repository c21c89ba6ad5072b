//! In-memory module registry and instance table.
//!
//! Registered modules and their services can be persisted as JSON. Running
//! instances are session state and never persisted. Instance ids start at 0
//! and are never reused within a session.

use super::backend::{
    BrokerBackend, InstanceHost, ModuleDescriptor, ModuleLauncher, ModuleManagement,
    ServiceDescriptor,
};
use super::category;
use crate::config::BrokerConfig;
use crate::protocol::BROKER_MODULE_ID;
use crate::shutdown::ShutdownToken;
use crate::{ErrorCode, ModuleId, RelayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

const REGISTRY_FORMAT_VERSION: u32 = 1;

/// A registered module with its services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub module: ModuleDescriptor,
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    version: u32,
    modules: Vec<ModuleRecord>,
}

#[derive(Debug, Clone)]
struct Instance {
    name: String,
    host: InstanceHost,
}

impl Instance {
    fn display_name(&self) -> String {
        match &self.host {
            InstanceHost::Local => self.name.clone(),
            InstanceHost::Remote(host) => format!("{}:{}", host, self.name),
        }
    }
}

#[derive(Debug)]
struct RegistryState {
    modules: BTreeMap<String, ModuleRecord>,
    instances: BTreeMap<ModuleId, Instance>,
    next_instance: ModuleId,
}

impl RegistryState {
    fn seeded(modules: impl IntoIterator<Item = ModuleRecord>) -> Self {
        let mut state = RegistryState {
            modules: BTreeMap::new(),
            instances: BTreeMap::new(),
            next_instance: 0,
        };
        let broker = broker_record();
        state.modules.insert(broker.module.name.clone(), broker);
        for record in modules {
            if record.module.name == BrokerConfig::MODULE_NAME {
                continue;
            }
            state.modules.insert(record.module.name.clone(), record);
        }
        state
    }
}

fn broker_record() -> ModuleRecord {
    ModuleRecord {
        module: ModuleDescriptor {
            name: BrokerConfig::MODULE_NAME.to_string(),
            display_name: BrokerConfig::SERVICE_DISPLAY_NAME.to_string(),
            management: ModuleManagement::SelfManaged,
            command_line: String::new(),
            help: "Tracks modules and services and brokers lookups".to_string(),
        },
        services: vec![ServiceDescriptor {
            module_name: BrokerConfig::MODULE_NAME.to_string(),
            service_name: BrokerConfig::SERVICE_NAME.to_string(),
            display_name: BrokerConfig::SERVICE_DISPLAY_NAME.to_string(),
            category: BrokerConfig::SERVICE_CATEGORY.to_string(),
            help: "The BROKER service implements the services of the broker.".to_string(),
        }],
    }
}

fn definition_error(message: &str, detail: impl Into<String>) -> RelayError {
    RelayError::new(ErrorCode::ModuleDefinition, message, detail)
}

fn module_not_found(name: &str) -> RelayError {
    RelayError::new(
        ErrorCode::ModuleNotFound,
        format!("Unknown/unregistered module '{name}'"),
        format!("no module named '{name}' is known to the registry"),
    )
}

fn unknown_instance(id: ModuleId) -> RelayError {
    RelayError::new(
        ErrorCode::ModuleNotFound,
        format!("Unknown module identifier {id}"),
        format!("no module with identifier {id} is known to the broker"),
    )
}

fn reject_host_prefix(name: &str, operation: &str) -> Result<()> {
    if name.contains(':') {
        return Err(definition_error(
            &format!("{operation} cannot use host:modulename format"),
            format!("'{name}' names a module on another host"),
        ));
    }
    Ok(())
}

fn reject_reserved(name: &str) -> Result<()> {
    if name == BrokerConfig::MODULE_NAME {
        return Err(definition_error(
            "module name is reserved",
            format!("'{name}' is the broker's own module"),
        ));
    }
    Ok(())
}

fn is_local_host(host: &str) -> bool {
    matches!(host, "" | "localhost" | "127.0.0.1" | "::1")
}

/// The broker's registry and instance table.
pub struct ModuleRegistry {
    state: RwLock<RegistryState>,
    path: Option<PathBuf>,
    launcher: RwLock<Option<Arc<dyn ModuleLauncher>>>,
    shutdown: ShutdownToken,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    /// Registry kept only in memory.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::seeded(Vec::new())),
            path: None,
            launcher: RwLock::new(None),
            shutdown: ShutdownToken::new(),
        }
    }

    /// Registry backed by `path`. A missing file starts empty; every
    /// registration change is written back.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let modules = match read_registry(&path)? {
            Some(file) => file.modules,
            None => {
                debug!("No registry at {}, starting empty", path.display());
                Vec::new()
            }
        };
        info!("Loaded {} registered modules", modules.len());
        Ok(Self {
            state: RwLock::new(RegistryState::seeded(modules)),
            path: Some(path),
            launcher: RwLock::new(None),
            shutdown: ShutdownToken::new(),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn set_launcher(&self, launcher: Arc<dyn ModuleLauncher>) {
        *self.launcher.write().unwrap_or_else(PoisonError::into_inner) = Some(launcher);
    }

    /// Fires when `shutdownBroker` is accepted.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Record a newly connected instance and return its id.
    pub fn add_instance(&self, name: &str, host: InstanceHost) -> ModuleId {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let id = state.next_instance;
        state.next_instance += 1;
        state.instances.insert(
            id,
            Instance {
                name: name.to_string(),
                host,
            },
        );
        debug!("Instance {} is module '{}'", id, name);
        id
    }

    /// Forget a disconnected instance. Returns its name.
    pub fn remove_instance(&self, id: ModuleId) -> Option<String> {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .instances
            .remove(&id)
            .map(|instance| instance.name)
    }

    pub fn instance_host(&self, id: ModuleId) -> Option<InstanceHost> {
        self.read()
            .instances
            .get(&id)
            .map(|instance| instance.host.clone())
    }

    /// Registered modules, excluding the broker's own record.
    pub fn records(&self) -> Vec<ModuleRecord> {
        self.read()
            .modules
            .values()
            .filter(|record| record.module.name != BrokerConfig::MODULE_NAME)
            .cloned()
            .collect()
    }

    /// Write the registered modules to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let file = RegistryFile {
            version: REGISTRY_FORMAT_VERSION,
            modules: self.records(),
        };
        write_registry(path, &file)
    }

    /// Write back to the file the registry was opened from, if any.
    pub fn save(&self) -> Result<()> {
        match &self.path {
            Some(path) => self.save_to(path),
            None => Ok(()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BrokerBackend for ModuleRegistry {
    fn version(&self) -> String {
        format!(
            "{} (Rust, {} {})",
            BrokerConfig::VERSION,
            std::env::consts::OS,
            std::env::consts::ARCH
        )
    }

    fn module_instance(&self, name: &str) -> Result<ModuleId> {
        if name == BrokerConfig::MODULE_NAME {
            return Ok(BROKER_MODULE_ID);
        }
        let descriptor = {
            let state = self.read();
            if let Some((id, _)) = state
                .instances
                .iter()
                .find(|(_, instance)| instance.display_name() == name)
            {
                return Ok(*id);
            }
            state
                .modules
                .get(name)
                .map(|record| record.module.clone())
                .ok_or_else(|| module_not_found(name))?
        };

        let launcher = self
            .launcher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match launcher {
            Some(launcher) => {
                info!("Launching module '{}'", name);
                launcher.launch(&descriptor)
            }
            None => Err(RelayError::new(
                ErrorCode::ModuleStart,
                format!("{name} couldn't be started"),
                "no module launcher is configured",
            )),
        }
    }

    fn module_descriptors(&self, local_only: bool, include_running: bool) -> Vec<ModuleDescriptor> {
        let state = self.read();
        let mut descriptors: Vec<ModuleDescriptor> = state
            .modules
            .values()
            .map(|record| record.module.clone())
            .collect();
        if include_running {
            for instance in state.instances.values() {
                let remote = matches!(instance.host, InstanceHost::Remote(_));
                if remote && local_only {
                    continue;
                }
                let name = instance.display_name();
                if descriptors.iter().all(|known| known.name != name) {
                    descriptors.push(ModuleDescriptor::unregistered(name));
                }
            }
        }
        descriptors
    }

    fn module_descriptor(&self, name: &str, include_running: bool) -> Result<ModuleDescriptor> {
        let state = self.read();
        if let Some(record) = state.modules.get(name) {
            return Ok(record.module.clone());
        }
        if include_running
            && state
                .instances
                .values()
                .any(|instance| instance.display_name() == name)
        {
            return Ok(ModuleDescriptor::unregistered(name));
        }
        Err(module_not_found(name))
    }

    fn instance_name(&self, id: ModuleId) -> Result<String> {
        if id == BROKER_MODULE_ID {
            return Ok(BrokerConfig::MODULE_NAME.to_string());
        }
        self.read()
            .instances
            .get(&id)
            .map(|instance| instance.name.clone())
            .ok_or_else(|| unknown_instance(id))
    }

    fn instances_named(&self, name: &str) -> Vec<ModuleId> {
        self.read()
            .instances
            .iter()
            .filter(|(_, instance)| instance.display_name() == name)
            .map(|(id, _)| *id)
            .collect()
    }

    fn registered_services(&self, module: &str) -> Option<Vec<ServiceDescriptor>> {
        self.read()
            .modules
            .get(module)
            .map(|record| record.services.clone())
    }

    fn find_services(
        &self,
        wanted: &str,
        recursive: bool,
        _local_only: bool,
    ) -> Result<Vec<ServiceDescriptor>> {
        let wanted = category::normalize(wanted)?;
        let state = self.read();
        let mut found = Vec::new();
        for service in state.modules.values().flat_map(|record| &record.services) {
            if category::matches(&category::normalize(&service.category)?, &wanted, recursive) {
                found.push(service.clone());
            }
        }
        Ok(found)
    }

    fn service_categories(&self, parent: &str) -> Result<Vec<String>> {
        let state = self.read();
        category::subcategories(
            state
                .modules
                .values()
                .flat_map(|record| &record.services)
                .map(|service| service.category.as_str()),
            parent,
        )
    }

    fn link_broker(&self, host: &str) -> Result<ModuleId> {
        let host = host.trim();
        if is_local_host(host) {
            return Ok(BROKER_MODULE_ID);
        }
        let existing = self
            .read()
            .instances
            .iter()
            .find(|(_, instance)| {
                instance.name == BrokerConfig::MODULE_NAME
                    && instance.host == InstanceHost::Remote(host.to_string())
            })
            .map(|(id, _)| *id);
        match existing {
            Some(id) => Ok(id),
            None => {
                info!("Linking broker on {}", host);
                Ok(self.add_instance(
                    BrokerConfig::MODULE_NAME,
                    InstanceHost::Remote(host.to_string()),
                ))
            }
        }
    }

    fn instance_ids(&self) -> Vec<ModuleId> {
        self.read().instances.keys().copied().collect()
    }

    fn running_modules(&self) -> Vec<(ModuleId, String)> {
        self.read()
            .instances
            .iter()
            .map(|(id, instance)| (*id, instance.display_name()))
            .collect()
    }

    fn register_module(&self, module: ModuleDescriptor) -> Result<()> {
        if module.name.trim().is_empty() {
            return Err(definition_error(
                "Null or empty module name",
                "empty strings are invalid module names",
            ));
        }
        reject_host_prefix(&module.name, "Module registration")?;
        reject_reserved(&module.name)?;
        if module.display_name.trim().is_empty() {
            return Err(definition_error(
                "Null or empty module display name",
                "module display names cannot be empty",
            ));
        }
        if module.command_line.trim().is_empty() {
            return Err(definition_error(
                "Empty command line given for module",
                "the broker needs a command line to start the module",
            ));
        }

        info!("Registering module '{}'", module.name);
        {
            let mut state = self.write();
            match state.modules.get_mut(&module.name) {
                Some(record) => record.module = module,
                None => {
                    state.modules.insert(
                        module.name.clone(),
                        ModuleRecord {
                            module,
                            services: Vec::new(),
                        },
                    );
                }
            }
        }
        self.save()
    }

    fn change_module_name(&self, id: ModuleId, name: &str) -> Result<()> {
        reject_host_prefix(name, "New module name")?;
        reject_reserved(name)?;
        {
            let mut state = self.write();
            let old = state
                .instances
                .get(&id)
                .map(|instance| instance.name.clone())
                .ok_or_else(|| unknown_instance(id))?;
            info!("Renaming module {} from '{}' to '{}'", id, old, name);

            let record = match state.modules.get(&old) {
                Some(record) => {
                    let mut renamed = record.clone();
                    renamed.module.name = name.to_string();
                    for service in &mut renamed.services {
                        service.module_name = name.to_string();
                    }
                    renamed
                }
                None => ModuleRecord {
                    module: ModuleDescriptor {
                        management: ModuleManagement::SelfManaged,
                        ..ModuleDescriptor::unregistered(name)
                    },
                    services: Vec::new(),
                },
            };
            state.modules.insert(name.to_string(), record);
            if let Some(instance) = state.instances.get_mut(&id) {
                instance.name = name.to_string();
            }
        }
        self.save()
    }

    fn register_service(&self, mut service: ServiceDescriptor) -> Result<()> {
        if service.module_name.trim().is_empty() {
            return Err(definition_error(
                "Null or empty module name",
                "empty strings are invalid module names",
            ));
        }
        reject_host_prefix(&service.module_name, "Service registration")?;
        if service.service_name.trim().is_empty() {
            return Err(definition_error(
                "Null or empty service name",
                "empty strings are invalid service names",
            ));
        }
        if service.display_name.trim().is_empty() {
            service.display_name = service.service_name.clone();
        }
        service.category = category::normalize(&service.category)?;

        {
            let mut state = self.write();
            let record = state.modules.get_mut(&service.module_name).ok_or_else(|| {
                RelayError::new(
                    ErrorCode::ModuleNotFound,
                    format!("No such module '{}'", service.module_name),
                    "a module must be registered before services can be registered on it",
                )
            })?;
            info!(
                "Registering service '{}' on module '{}'",
                service.service_name, service.module_name
            );
            match record
                .services
                .iter_mut()
                .find(|known| known.service_name == service.service_name)
            {
                Some(known) => {
                    debug!("Overwriting service '{}'", service.service_name);
                    *known = service;
                }
                None => record.services.push(service),
            }
        }
        self.save()
    }

    fn unregister_module(&self, name: &str) -> Result<()> {
        reject_host_prefix(name, "Module registration")?;
        reject_reserved(name)?;
        if name.trim().is_empty() {
            return Err(RelayError::new(
                ErrorCode::ModuleNotFound,
                "Null or empty module name",
                "empty strings are invalid module names",
            ));
        }
        if self.write().modules.remove(name).is_none() {
            debug!("Module '{}' was not registered", name);
            return Ok(());
        }
        info!("Removed registration for module '{}'", name);
        self.save()
    }

    fn unregister_service(&self, module: &str, service: &str) -> Result<()> {
        reject_reserved(module)?;
        {
            let mut state = self.write();
            let record = state
                .modules
                .get_mut(module)
                .ok_or_else(|| module_not_found(module))?;
            let before = record.services.len();
            record.services.retain(|known| known.service_name != service);
            if record.services.len() == before {
                return Err(RelayError::new(
                    ErrorCode::ServiceNotFound,
                    format!("Cannot find a service named '{service}' on {module}"),
                    "",
                ));
            }
        }
        info!("Removed service '{}' from module '{}'", service, module);
        self.save()
    }

    fn shutdown_broker(&self) {
        info!("Broker shutdown requested");
        self.shutdown.cancel();
    }

    fn is_remote_instance(&self, id: ModuleId) -> bool {
        matches!(self.instance_host(id), Some(InstanceHost::Remote(_)))
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("ModuleRegistry")
            .field("modules", &state.modules.len())
            .field("instances", &state.instances.len())
            .field("path", &self.path)
            .finish()
    }
}

fn io_error(message: String, path: &Path, err: std::io::Error) -> RelayError {
    RelayError::Io {
        message,
        path: Some(path.to_path_buf()),
        source: Some(err),
    }
}

fn read_registry(path: &Path) -> Result<Option<RegistryFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path)
        .map_err(|err| io_error(format!("Failed to read {}", path.display()), path, err))?;
    let file: RegistryFile = serde_json::from_str(&text).map_err(|err| RelayError::Json {
        message: format!("Failed to parse {}: {}", path.display(), err),
        source: Some(err),
    })?;
    if file.version != REGISTRY_FORMAT_VERSION {
        warn!(
            "Registry {} has format version {}, expected {}",
            path.display(),
            file.version,
            REGISTRY_FORMAT_VERSION
        );
    }
    Ok(Some(file))
}

/// Write through a temp file and rename so readers never see a partial file.
fn write_registry(path: &Path, file: &RegistryFile) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            io_error(
                format!("Failed to create directory {}", parent.display()),
                parent,
                err,
            )
        })?;
    }
    let serialized = serde_json::to_string_pretty(file)?;
    let temp_path = path.with_extension(format!("json.{}.tmp", std::process::id()));
    {
        let mut temp = File::create(&temp_path).map_err(|err| {
            io_error(
                format!("Failed to create temp file {}", temp_path.display()),
                &temp_path,
                err,
            )
        })?;
        temp.write_all(serialized.as_bytes())
            .and_then(|()| temp.sync_all())
            .map_err(|err| {
                io_error(
                    format!("Failed to write temp file {}", temp_path.display()),
                    &temp_path,
                    err,
                )
            })?;
    }
    fs::rename(&temp_path, path).map_err(|err| {
        io_error(
            format!("Failed to replace {}", path.display()),
            path,
            err,
        )
    })?;
    debug!("Saved registry to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn module(name: &str) -> ModuleDescriptor {
        ModuleDescriptor {
            name: name.to_string(),
            display_name: name.to_uppercase(),
            management: ModuleManagement::Unique,
            command_line: format!("{name} --serve"),
            help: String::new(),
        }
    }

    fn service(module: &str, name: &str, category: &str) -> ServiceDescriptor {
        ServiceDescriptor {
            module_name: module.to_string(),
            service_name: name.to_string(),
            display_name: String::new(),
            category: category.to_string(),
            help: String::new(),
        }
    }

    #[test]
    fn test_seeded_with_broker() {
        let registry = ModuleRegistry::new();
        assert_eq!(registry.module_instance("BROKER").unwrap(), BROKER_MODULE_ID);
        assert_eq!(registry.instance_name(BROKER_MODULE_ID).unwrap(), "BROKER");
        let services = registry.registered_services("BROKER").unwrap();
        assert_eq!(services[0].category, "/Broker");
        assert!(registry.records().is_empty());
    }

    #[test]
    fn test_instance_ids_are_never_reused() {
        let registry = ModuleRegistry::new();
        let a = registry.add_instance("a", InstanceHost::Local);
        let b = registry.add_instance("b", InstanceHost::Local);
        assert_eq!((a, b), (0, 1));
        registry.remove_instance(b);
        assert_eq!(registry.add_instance("c", InstanceHost::Local), 2);
        assert_eq!(registry.instance_ids(), vec![0, 2]);
    }

    #[test]
    fn test_register_service_requires_module() {
        let registry = ModuleRegistry::new();
        let err = registry
            .register_service(service("math", "calc", "/Math"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorCode::ModuleNotFound);

        registry.register_module(module("math")).unwrap();
        registry
            .register_service(service("math", "calc", "Math/Basic/"))
            .unwrap();
        let services = registry.registered_services("math").unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].category, "/Math/Basic");
        assert_eq!(services[0].display_name, "calc");
    }

    #[test]
    fn test_register_module_validation() {
        let registry = ModuleRegistry::new();
        let mut bad = module("remote:math");
        assert_eq!(
            registry.register_module(bad.clone()).unwrap_err().kind(),
            ErrorCode::ModuleDefinition
        );
        bad.name = "math".to_string();
        bad.command_line.clear();
        assert_eq!(
            registry.register_module(bad).unwrap_err().kind(),
            ErrorCode::ModuleDefinition
        );
        assert_eq!(
            registry.register_module(module("BROKER")).unwrap_err().kind(),
            ErrorCode::ModuleDefinition
        );
    }

    #[test]
    fn test_find_services_and_categories() {
        let registry = ModuleRegistry::new();
        registry.register_module(module("sim")).unwrap();
        registry
            .register_service(service("sim", "steady", "/Analysis/Steady"))
            .unwrap();
        registry
            .register_service(service("sim", "overview", "/Analysis"))
            .unwrap();

        let shallow = registry.find_services("/Analysis", false, true).unwrap();
        assert_eq!(shallow.len(), 1);
        assert_eq!(shallow[0].service_name, "overview");
        assert_eq!(registry.find_services("Analysis", true, true).unwrap().len(), 2);
        assert_eq!(
            registry.service_categories("/Analysis").unwrap(),
            vec!["Steady".to_string()]
        );
    }

    #[derive(Default)]
    struct RecordingLauncher {
        launched: std::sync::Mutex<Vec<String>>,
    }

    impl ModuleLauncher for RecordingLauncher {
        fn launch(&self, module: &ModuleDescriptor) -> Result<ModuleId> {
            self.launched.lock().unwrap().push(module.name.clone());
            Ok(41)
        }
    }

    #[test]
    fn test_module_instance_resolution() {
        let registry = ModuleRegistry::new();
        assert_eq!(
            registry.module_instance("ghost").unwrap_err().kind(),
            ErrorCode::ModuleNotFound
        );
        registry.register_module(module("math")).unwrap();
        assert_eq!(
            registry.module_instance("math").unwrap_err().kind(),
            ErrorCode::ModuleStart
        );

        let launcher = Arc::new(RecordingLauncher::default());
        registry.set_launcher(launcher.clone());
        assert_eq!(registry.module_instance("math").unwrap(), 41);
        assert_eq!(*launcher.launched.lock().unwrap(), vec!["math".to_string()]);

        let running = registry.add_instance("math", InstanceHost::Local);
        assert_eq!(registry.module_instance("math").unwrap(), running);
    }

    #[test]
    fn test_link_broker_reuses_links() {
        let registry = ModuleRegistry::new();
        assert_eq!(registry.link_broker("localhost").unwrap(), BROKER_MODULE_ID);
        let first = registry.link_broker("lab-server").unwrap();
        assert_eq!(registry.link_broker("lab-server").unwrap(), first);
        assert!(registry.is_remote_instance(first));
        assert_eq!(
            registry.running_modules(),
            vec![(first, "lab-server:BROKER".to_string())]
        );
    }

    #[test]
    fn test_change_module_name_moves_registration() {
        let registry = ModuleRegistry::new();
        registry.register_module(module("old")).unwrap();
        registry
            .register_service(service("old", "calc", "/Math"))
            .unwrap();
        let id = registry.add_instance("old", InstanceHost::Local);

        registry.change_module_name(id, "new").unwrap();
        assert_eq!(registry.instance_name(id).unwrap(), "new");
        let services = registry.registered_services("new").unwrap();
        assert_eq!(services[0].module_name, "new");
        assert_eq!(
            registry.change_module_name(99, "x").unwrap_err().kind(),
            ErrorCode::ModuleNotFound
        );
    }

    #[test]
    fn test_registry_persists_registrations() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("registry.json");

        let registry = ModuleRegistry::open(&path).unwrap();
        registry.register_module(module("math")).unwrap();
        registry
            .register_service(service("math", "calc", "/Math"))
            .unwrap();
        registry.add_instance("math", InstanceHost::Local);
        assert!(path.exists());

        let reopened = ModuleRegistry::open(&path).unwrap();
        assert_eq!(reopened.records(), registry.records());
        assert!(reopened.instance_ids().is_empty());

        reopened.unregister_module("math").unwrap();
        assert!(ModuleRegistry::open(&path).unwrap().records().is_empty());
    }

    #[test]
    fn test_corrupt_registry_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("registry.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ModuleRegistry::open(&path).unwrap_err(),
            RelayError::Json { .. }
        ));
    }
}
