//! Services, methods and the receiver used by ordinary modules.

use crate::codec::{DataBlockReader, DataBlockWriter};
use crate::protocol::{SystemMethod, SYSTEM_SERVICE_ID};
use crate::receiver::{Handler, Receiver};
use crate::shutdown::ShutdownToken;
use crate::signature::{self, Signature};
use crate::{ErrorCode, MethodId, ModuleId, RelayError, Result, ServiceId};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

/// One numbered method of a service.
pub struct Method {
    signature: Signature,
    help: String,
    synchronized: bool,
    handler: Option<Arc<dyn Handler>>,
}

impl Method {
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    /// Synchronized methods of one service never run concurrently.
    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("signature", &self.signature.text())
            .field("synchronized", &self.synchronized)
            .field("implemented", &self.handler.is_some())
            .finish()
    }
}

/// A named group of methods. Method ids are positions in registration order.
#[derive(Debug)]
pub struct Service {
    name: String,
    display_name: String,
    category: String,
    help: String,
    methods: Vec<Method>,
    guard: Arc<Mutex<()>>,
}

impl Service {
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        category: impl Into<String>,
        help: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            category: category.into(),
            help: help.into(),
            methods: Vec::new(),
            guard: Arc::new(Mutex::new(())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// Register a method implemented by a closure.
    pub fn add_method<F>(
        &mut self,
        signature: &str,
        help: &str,
        synchronized: bool,
        handler: F,
    ) -> Result<MethodId>
    where
        F: Fn(ModuleId, &mut DataBlockReader) -> Result<DataBlockWriter> + Send + Sync + 'static,
    {
        self.push(signature, help, synchronized, Some(Arc::new(handler)))
    }

    /// Register a method implemented by a shared handler object.
    pub fn add_handler(
        &mut self,
        signature: &str,
        help: &str,
        synchronized: bool,
        handler: Arc<dyn Handler>,
    ) -> Result<MethodId> {
        self.push(signature, help, synchronized, Some(handler))
    }

    /// Register a method whose calls are answered by the receiver itself.
    pub fn declare_method(&mut self, signature: &str, help: &str) -> Result<MethodId> {
        self.push(signature, help, false, None)
    }

    fn push(
        &mut self,
        signature: &str,
        help: &str,
        synchronized: bool,
        handler: Option<Arc<dyn Handler>>,
    ) -> Result<MethodId> {
        let signature = Signature::parse(signature)?;
        let id = MethodId::try_from(self.methods.len())
            .map_err(|_| RelayError::application("too many methods", self.name.clone()))?;
        self.methods.push(Method {
            signature,
            help: help.to_string(),
            synchronized,
            handler,
        });
        Ok(id)
    }

    pub fn method(&self, id: MethodId) -> Result<&Method> {
        usize::try_from(id)
            .ok()
            .and_then(|index| self.methods.get(index))
            .ok_or_else(|| {
                RelayError::new(
                    ErrorCode::MethodNotFound,
                    "method not found",
                    format!("method {} does not exist on service {}", id, self.name),
                )
            })
    }

    /// Overload resolution of `candidate` against this service's methods.
    pub fn resolve_method(&self, candidate: &str) -> Result<MethodId> {
        let index = signature::resolve(self.methods.iter().map(Method::signature), candidate)?;
        MethodId::try_from(index).map_err(|_| RelayError::method_not_found(candidate))
    }

    /// Registered signature strings, in method id order.
    pub fn signatures(&self) -> Vec<String> {
        self.methods
            .iter()
            .map(|method| method.signature.text().to_string())
            .collect()
    }

    /// Run a method. Synchronized methods hold the service guard while they run.
    pub fn invoke(
        &self,
        method: MethodId,
        from: ModuleId,
        args: &mut DataBlockReader,
    ) -> Result<DataBlockWriter> {
        let entry = self.method(method)?;
        let handler = entry.handler.as_ref().ok_or_else(|| {
            RelayError::application(
                "method has no implementation",
                entry.signature.text().to_string(),
            )
        })?;
        if entry.synchronized {
            let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
            handler.invoke(from, args)
        } else {
            handler.invoke(from, args)
        }
    }
}

/// The services hosted by one module. Removed ids stay as holes so that ids
/// already handed out never change meaning.
#[derive(Debug, Default)]
pub struct ServiceTable {
    services: RwLock<Vec<Option<Arc<Service>>>>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, service: Service) -> ServiceId {
        let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
        services.push(Some(Arc::new(service)));
        ServiceId::try_from(services.len() - 1).unwrap_or(ServiceId::MAX)
    }

    pub fn remove(&self, id: ServiceId) -> Result<Arc<Service>> {
        let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
        usize::try_from(id)
            .ok()
            .and_then(|index| services.get_mut(index))
            .and_then(Option::take)
            .ok_or_else(|| unknown_service(id))
    }

    pub fn get(&self, id: ServiceId) -> Result<Arc<Service>> {
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        match usize::try_from(id).ok().and_then(|index| services.get(index)) {
            Some(Some(service)) => Ok(service.clone()),
            Some(None) => Err(RelayError::new(
                ErrorCode::ServiceNotFound,
                format!("Service id {id} no longer supported"),
                "the service was removed",
            )),
            None => Err(unknown_service(id)),
        }
    }

    pub fn find(&self, name: &str) -> Option<ServiceId> {
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        services
            .iter()
            .position(|service| service.as_ref().is_some_and(|s| s.name() == name))
            .and_then(|index| ServiceId::try_from(index).ok())
    }

    /// Service names by id. Removed services read as empty names.
    pub fn names(&self) -> Vec<String> {
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        services
            .iter()
            .map(|service| {
                service
                    .as_ref()
                    .map(|s| s.name().to_string())
                    .unwrap_or_default()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Answer a call on the reserved system service.
    pub fn answer_system(
        &self,
        method: MethodId,
        args: &mut DataBlockReader,
    ) -> Result<DataBlockWriter> {
        let mut result = DataBlockWriter::new();
        match SystemMethod::from_id(method) {
            Some(SystemMethod::GetServices) => {
                result.add(&self.names());
            }
            Some(SystemMethod::GetMethods) => {
                let service: ServiceId = args.get()?;
                result.add(&self.get(service)?.signatures());
            }
            Some(SystemMethod::GetMethodHelp) => {
                let service: ServiceId = args.get()?;
                let method: MethodId = args.get()?;
                result.add(self.get(service)?.method(method)?.help());
            }
            Some(_) => {
                result.add(&0);
            }
            None => {
                return Err(RelayError::new(
                    ErrorCode::MethodNotFound,
                    format!("Method {method} does not exist on service {SYSTEM_SERVICE_ID}"),
                    "",
                ));
            }
        }
        Ok(result)
    }
}

fn unknown_service(id: ServiceId) -> RelayError {
    RelayError::new(
        ErrorCode::ServiceNotFound,
        format!("Unknown service id {id}"),
        "",
    )
}

/// Receiver for ordinary modules: a [`ServiceTable`] plus the system service.
#[derive(Debug, Default)]
pub struct ModuleReceiver {
    services: ServiceTable,
    shutdown_requested: ShutdownToken,
}

impl ModuleReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn services(&self) -> &ServiceTable {
        &self.services
    }

    /// Fires when the broker asks this module to shut down.
    pub fn shutdown_requested(&self) -> ShutdownToken {
        self.shutdown_requested.clone()
    }
}

impl Receiver for ModuleReceiver {
    fn receive(
        &self,
        from: ModuleId,
        service: ServiceId,
        method: MethodId,
        args: &mut DataBlockReader,
    ) -> Result<DataBlockWriter> {
        if service == SYSTEM_SERVICE_ID {
            if SystemMethod::from_id(method) == Some(SystemMethod::Shutdown) {
                debug!("Module {} requested shutdown", from);
                self.shutdown_requested.cancel();
            }
            return self.services.answer_system(method, args);
        }
        self.services.get(service)?.invoke(method, from, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_service() -> Service {
        let mut service = Service::new("echo", "Echo", "/Test", "echoes");
        service
            .add_method("string echo(string)", "returns its argument", false, |_, args| {
                let text: String = args.get()?;
                let mut out = DataBlockWriter::new();
                out.add(&text);
                Ok(out)
            })
            .unwrap();
        service.declare_method("void ping()", "").unwrap();
        service
    }

    #[test]
    fn test_add_method_rejects_bad_signature() {
        let mut service = Service::new("s", "", "", "");
        let err = service
            .add_method("nonsense(", "", false, |_, _| Ok(DataBlockWriter::new()))
            .unwrap_err();
        assert!(matches!(err, RelayError::SignatureSyntax { .. }));
        assert!(service.methods().is_empty());
    }

    #[test]
    fn test_invoke_and_missing_method() {
        let service = echo_service();
        let mut args = DataBlockWriter::new();
        args.add("hi");
        let mut result = service.invoke(0, 3, &mut args.reader()).unwrap().reader();
        assert_eq!(result.get::<String>().unwrap(), "hi");

        assert!(matches!(
            service.invoke(9, 3, &mut DataBlockReader::default()),
            Err(RelayError::MethodNotFound { .. })
        ));
        assert!(matches!(
            service.invoke(1, 3, &mut DataBlockReader::default()),
            Err(RelayError::Application { .. })
        ));
    }

    #[test]
    fn test_resolve_method() {
        let service = echo_service();
        assert_eq!(service.resolve_method("ping").unwrap(), 1);
        assert_eq!(service.resolve_method("echo(string)").unwrap(), 0);
    }

    #[test]
    fn test_table_holes() {
        let table = ServiceTable::new();
        assert_eq!(table.add(echo_service()), 0);
        assert_eq!(table.add(Service::new("other", "", "", "")), 1);
        table.remove(0).unwrap();

        let err = table.get(0).unwrap_err();
        assert!(matches!(err, RelayError::ServiceNotFound { .. }));
        assert_eq!(err.user_message(), "Service id 0 no longer supported");
        assert_eq!(
            table.get(7).unwrap_err().user_message(),
            "Unknown service id 7"
        );
        assert_eq!(table.names(), vec!["".to_string(), "other".to_string()]);
        assert_eq!(table.find("other"), Some(1));
        assert_eq!(table.find("echo"), None);
    }

    #[test]
    fn test_system_queries() {
        let table = ServiceTable::new();
        table.add(echo_service());

        let mut names = table
            .answer_system(SystemMethod::GetServices.id(), &mut DataBlockReader::default())
            .unwrap()
            .reader();
        assert_eq!(names.get::<Vec<String>>().unwrap(), vec!["echo"]);

        let mut args = DataBlockWriter::new();
        args.add(&0);
        let mut methods = table
            .answer_system(SystemMethod::GetMethods.id(), &mut args.reader())
            .unwrap()
            .reader();
        assert_eq!(
            methods.get::<Vec<String>>().unwrap(),
            vec!["string echo(string)", "void ping()"]
        );

        let mut args = DataBlockWriter::new();
        args.add(&0).add(&0);
        let mut help = table
            .answer_system(SystemMethod::GetMethodHelp.id(), &mut args.reader())
            .unwrap()
            .reader();
        assert_eq!(help.get::<String>().unwrap(), "returns its argument");

        let err = table
            .answer_system(42, &mut DataBlockReader::default())
            .unwrap_err();
        assert_eq!(err.user_message(), "Method 42 does not exist on service -1");
    }

    #[test]
    fn test_shutdown_request_fires_token() {
        let receiver = ModuleReceiver::new();
        let token = receiver.shutdown_requested();
        receiver
            .receive(
                -1,
                SYSTEM_SERVICE_ID,
                SystemMethod::Shutdown.id(),
                &mut DataBlockReader::default(),
            )
            .unwrap();
        assert!(token.is_cancelled());
    }
}
