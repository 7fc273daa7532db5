use std::collections::BTreeMap;
use std::sync::Arc;

use idmapper_core::{MapperError, Result};

use super::steps::{self, Operation, OperationServices, StepParameters};

/// Builds a configured operation from a step's resolved parameters.
pub type OperationFactory =
    Arc<dyn Fn(&StepParameters, &OperationServices) -> Result<Box<dyn Operation>> + Send + Sync>;

/// Registry mapping operation names to the factories that build them
pub struct OperationRegistry {
    factories: BTreeMap<String, OperationFactory>,
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self { factories: BTreeMap::new() }
    }

    /// Create a registry holding every built-in operation
    pub fn with_builtin_operations() -> Result<Self> {
        let mut registry = Self::new();
        steps::register_builtin_operations(&mut registry)?;
        Ok(registry)
    }

    /// Register a factory under `name`. Names are unique: registering one twice is an error.
    pub fn register<F>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn(&StepParameters, &OperationServices) -> Result<Box<dyn Operation>> + Send + Sync + 'static,
    {
        if self.factories.contains_key(name) {
            return Err(MapperError::DuplicateOperation(name.to_string()));
        }
        self.factories.insert(name.to_string(), Arc::new(factory));
        Ok(())
    }

    /// Look up the factory for `name`
    pub fn dispatch(&self, name: &str) -> Result<&OperationFactory> {
        self.factories.get(name).ok_or_else(|| {
            MapperError::UnknownOperation(format!(
                "'{}' is not registered (known operations: {})",
                name,
                self.names().join(", ")
            ))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// List all registered operation names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(|k| k.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants;
    use crate::pipeline::context::ExecutionContext;
    use crate::pipeline::steps::StepOutput;
    use async_trait::async_trait;
    use idmapper_core::ErrorKind;

    struct Noop;

    #[async_trait]
    impl Operation for Noop {
        async fn execute(&self, _context: &ExecutionContext) -> Result<StepOutput> {
            Ok(StepOutput::new())
        }
    }

    fn noop_factory(_: &StepParameters, _: &OperationServices) -> Result<Box<dyn Operation>> {
        Ok(Box::new(Noop))
    }

    #[test]
    fn test_registry_has_built_in_operations() {
        let registry = OperationRegistry::with_builtin_operations().unwrap();
        for name in constants::builtin_operations() {
            assert!(registry.contains(name), "missing built-in operation {}", name);
        }
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = OperationRegistry::new();
        registry.register("noop", noop_factory).unwrap();

        let err = registry.register("noop", noop_factory).unwrap_err();
        assert!(matches!(err, MapperError::DuplicateOperation(ref name) if name == "noop"));
        assert_eq!(registry.names(), vec!["noop"]);
    }

    #[test]
    fn test_dispatch_unknown_operation_fails() {
        let mut registry = OperationRegistry::new();
        registry.register("direct_match", noop_factory).unwrap();

        let err = registry.dispatch("direct_matc").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::UnknownOperation);
        assert!(err.to_string().contains("direct_match"));
    }

    #[test]
    fn test_dispatch_builds_operation() {
        let mut registry = OperationRegistry::new();
        registry.register("noop", noop_factory).unwrap();

        let factory = registry.dispatch("noop").unwrap();
        assert!(factory(&StepParameters::new(), &OperationServices::default()).is_ok());
    }
}
