//! Capability registry
//!
//! An immutable catalog of modules, each a named group of operations with
//! declared parameters. Built once at startup from the wired-in operation
//! providers and shared read-only afterwards.

pub mod descriptor;
pub mod params;

pub use descriptor::{json_type_name, OperationDescriptor, ParamType, ParameterSpec};
pub use params::Params;

use crate::core::{error::OperationError, error::RegistryError, event::ProgressStream};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A callable operation producing a progress stream
pub trait Operation: Send + Sync {
    /// Start the operation. Returning `Err` means it raised before producing
    /// any progress.
    fn invoke(&self, params: Params) -> Result<ProgressStream, OperationError>;
}

impl<F> Operation for F
where
    F: Fn(Params) -> Result<ProgressStream, OperationError> + Send + Sync,
{
    fn invoke(&self, params: Params) -> Result<ProgressStream, OperationError> {
        self(params)
    }
}

/// Supplies the operations of one module at startup
pub trait OperationProvider {
    fn module_name(&self) -> &str;

    fn operations(&self) -> Vec<(OperationDescriptor, Arc<dyn Operation>)>;
}

/// An operation's declared shape together with its implementation
#[derive(Clone)]
pub struct RegisteredOperation {
    pub descriptor: OperationDescriptor,
    pub handler: Arc<dyn Operation>,
}

impl std::fmt::Debug for RegisteredOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredOperation")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// A named group of operations
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    pub name: String,
    pub operations: BTreeMap<String, RegisteredOperation>,
}

/// Collects registrations before the registry is frozen
#[derive(Default)]
pub struct RegistryBuilder {
    modules: BTreeMap<String, ModuleDescriptor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single operation under a module
    pub fn register(
        mut self,
        module: &str,
        descriptor: OperationDescriptor,
        handler: Arc<dyn Operation>,
    ) -> Result<Self, RegistryError> {
        let run_ids = descriptor
            .parameters
            .iter()
            .filter(|p| p.is_run_identifier)
            .count();
        if run_ids > 1 {
            return Err(RegistryError::MultipleRunIdentifiers {
                module: module.to_string(),
                operation: descriptor.name.clone(),
            });
        }

        let entry = self
            .modules
            .entry(module.to_string())
            .or_insert_with(|| ModuleDescriptor {
                name: module.to_string(),
                operations: BTreeMap::new(),
            });

        if entry.operations.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateOperation {
                module: module.to_string(),
                operation: descriptor.name.clone(),
            });
        }

        debug!("Registered operation {}:{}", module, descriptor.name);
        entry.operations.insert(
            descriptor.name.clone(),
            RegisteredOperation {
                descriptor,
                handler,
            },
        );
        Ok(self)
    }

    /// Register every operation a provider exposes
    pub fn provider(self, provider: &dyn OperationProvider) -> Result<Self, RegistryError> {
        let module = provider.module_name().to_string();
        provider
            .operations()
            .into_iter()
            .try_fold(self, |builder, (descriptor, handler)| {
                builder.register(&module, descriptor, handler)
            })
    }

    pub fn build(self) -> CapabilityRegistry {
        CapabilityRegistry {
            modules: self.modules,
        }
    }
}

/// Operation name -> (parameter name -> declared type name)
pub type OperationShapes = BTreeMap<String, BTreeMap<String, String>>;

/// Immutable catalog of modules and operations
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    modules: BTreeMap<String, ModuleDescriptor>,
}

impl CapabilityRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Build a registry from a fixed set of providers
    pub fn from_providers(providers: &[&dyn OperationProvider]) -> Result<Self, RegistryError> {
        providers
            .iter()
            .try_fold(RegistryBuilder::new(), |builder, provider| {
                builder.provider(*provider)
            })
            .map(RegistryBuilder::build)
    }

    /// Names of all modules, sorted
    pub fn list_modules(&self) -> Vec<&str> {
        self.modules.keys().map(String::as_str).collect()
    }

    pub fn module(&self, module: &str) -> Result<&ModuleDescriptor, RegistryError> {
        self.modules
            .get(module)
            .ok_or_else(|| RegistryError::ModuleNotFound(module.to_string()))
    }

    /// Names of all operations in a module, sorted
    pub fn list_operations(&self, module: &str) -> Result<Vec<&str>, RegistryError> {
        Ok(self
            .module(module)?
            .operations
            .keys()
            .map(String::as_str)
            .collect())
    }

    /// Registered operation with its handler
    pub fn lookup(&self, module: &str, operation: &str) -> Result<&RegisteredOperation, RegistryError> {
        self.module(module)?
            .operations
            .get(operation)
            .ok_or_else(|| RegistryError::OperationNotFound {
                module: module.to_string(),
                operation: operation.to_string(),
            })
    }

    pub fn describe(&self, module: &str, operation: &str) -> Result<&OperationDescriptor, RegistryError> {
        self.lookup(module, operation).map(|op| &op.descriptor)
    }

    /// Caller-facing parameter shapes of a module's operations.
    ///
    /// Run identifier parameters are left out since callers never set them.
    pub fn describe_operations(&self, module: &str) -> Result<OperationShapes, RegistryError> {
        Ok(self
            .module(module)?
            .operations
            .iter()
            .map(|(name, op)| {
                let params = op
                    .descriptor
                    .caller_parameters()
                    .map(|p| (p.name.clone(), p.declared_type.to_string()))
                    .collect();
                (name.clone(), params)
            })
            .collect())
    }
}
