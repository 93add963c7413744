//! Component type catalog and the compiler boundary
//!
//! Factories are registered by type name before the root starts; containers
//! instantiate children through the catalog when handling `add-child` or
//! rebuilding a snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::ContainerError;
use super::iteration::{Behavior, empty_behavior};

/// Component type name (e.g. "core:container", "demo:counter")
pub type TypeName = String;

/// Factory producing a fresh behavior for a component type
pub type BehaviorFactory = Arc<dyn Fn() -> Arc<dyn Behavior> + Send + Sync>;

/// Type name of the built-in empty container
pub const CONTAINER_TYPE: &str = "core:container";

/// Type name reported by root units
pub const ROOT_TYPE: &str = "core:root";

/// Turns source text into a new behavior for a unit of the given type
pub trait Compiler: Send + Sync {
    /// Compile `source`; errors leave the installed iteration untouched
    fn compile(&self, type_name: &str, source: &str) -> anyhow::Result<Arc<dyn Behavior>>;
}

#[derive(Clone)]
struct ComponentTypeInfo {
    factory: BehaviorFactory,
    container: bool,
}

/// Named behavior factories
#[derive(Clone)]
pub struct ComponentCatalog {
    types: BTreeMap<TypeName, ComponentTypeInfo>,
}

impl Default for ComponentCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentCatalog {
    /// Catalog with the built-in container type
    pub fn new() -> Self {
        let mut catalog = Self {
            types: BTreeMap::new(),
        };
        catalog.register_container(CONTAINER_TYPE, empty_behavior);
        catalog
    }

    /// Register a leaf component type
    pub fn register<F>(&mut self, type_name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn Behavior> + Send + Sync + 'static,
    {
        self.insert(type_name, Arc::new(factory), false);
    }

    /// Register a component type that can hold children
    pub fn register_container<F>(&mut self, type_name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn Behavior> + Send + Sync + 'static,
    {
        self.insert(type_name, Arc::new(factory), true);
    }

    fn insert(&mut self, type_name: &str, factory: BehaviorFactory, container: bool) {
        if self
            .types
            .insert(type_name.to_string(), ComponentTypeInfo { factory, container })
            .is_some()
        {
            tracing::debug!(type_name, "component type re-registered");
        }
    }

    /// Instantiate a behavior; the flag tells whether the type is a container
    pub fn create(&self, type_name: &str) -> Result<(Arc<dyn Behavior>, bool), ContainerError> {
        let info = self
            .types
            .get(type_name)
            .ok_or_else(|| ContainerError::UnknownType(type_name.to_string()))?;
        Ok(((info.factory)(), info.container))
    }

    /// Whether a type is registered
    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Registered type names, sorted
    pub fn type_names(&self) -> Vec<String> {
        self.types.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::iteration::IterationBuilder;

    #[test]
    fn test_catalog_registration() {
        let mut catalog = ComponentCatalog::new();
        catalog.register("test:leaf", || {
            Arc::new(|b: &mut IterationBuilder| -> anyhow::Result<()> {
                b.output("out")?;
                Ok(())
            }) as Arc<dyn Behavior>
        });
        assert!(catalog.contains(CONTAINER_TYPE));
        let (_, container) = catalog.create("test:leaf").unwrap();
        assert!(!container);
        let (_, container) = catalog.create(CONTAINER_TYPE).unwrap();
        assert!(container);
        assert!(matches!(
            catalog.create("missing"),
            Err(ContainerError::UnknownType(_))
        ));
        assert_eq!(catalog.type_names(), vec![CONTAINER_TYPE, "test:leaf"]);
    }
}
