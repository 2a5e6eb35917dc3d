//! Name → factory resolution for components.
//!
//! Configuration references components by `component_module`; the
//! registry turns that name into instances. Builtins are registered by
//! the runtime, code-defined apps add their own factories.

use crate::{Component, ComponentContext, ComponentError};
use std::collections::HashMap;
use std::sync::Arc;

/// Creates one component instance for one worker. Called once per
/// worker, with the worker's context.
pub type ComponentFactory =
    Arc<dyn Fn(&ComponentContext) -> Result<Box<dyn Component>, ComponentError> + Send + Sync>;

/// Registry of component factories.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    factories: HashMap<String, ComponentFactory>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under a module name.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::Config`] when the name is taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: ComponentFactory,
    ) -> Result<(), ComponentError> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(ComponentError::config(
                &name,
                "a component is already registered under this name",
            ));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Whether a module name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered module names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Instantiates a component for a worker.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::Config`] for unknown names and
    /// propagates factory failures.
    pub fn create(
        &self,
        name: &str,
        ctx: &ComponentContext,
    ) -> Result<Box<dyn Component>, ComponentError> {
        let factory = self.factories.get(name).ok_or_else(|| {
            ComponentError::config(name, "unknown component_module (not registered)")
        })?;
        factory(ctx)
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ComponentInfo;
    use async_trait::async_trait;
    use braid_event::Message;
    use serde_json::Value;

    struct Probe {
        info: ComponentInfo,
    }

    #[async_trait]
    impl Component for Probe {
        fn info(&self) -> &ComponentInfo {
            &self.info
        }

        async fn invoke(
            &mut self,
            _ctx: &ComponentContext,
            _message: &mut Message,
            data: Value,
        ) -> Result<Option<Value>, ComponentError> {
            Ok(Some(data))
        }
    }

    fn probe_factory() -> ComponentFactory {
        Arc::new(|_ctx| {
            Ok(Box::new(Probe {
                info: ComponentInfo::new("probe", "test probe"),
            }) as Box<dyn Component>)
        })
    }

    #[test]
    fn register_and_create() {
        let mut registry = ComponentRegistry::new();
        registry.register("probe", probe_factory()).expect("register");
        assert!(registry.contains("probe"));

        let ctx = ComponentContext::builder("p").build();
        let component = registry.create("probe", &ctx).expect("create");
        assert_eq!(component.info().name, "probe");
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ComponentRegistry::new();
        registry.register("probe", probe_factory()).expect("register");
        assert!(registry.register("probe", probe_factory()).is_err());
    }

    #[test]
    fn unknown_name_is_rejected() {
        let registry = ComponentRegistry::new();
        let ctx = ComponentContext::builder("p").build();
        assert!(registry.create("ghost", &ctx).is_err());
    }
}
