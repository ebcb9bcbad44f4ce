use std::collections::BTreeMap;
use std::fmt;

use super::listener::{LISTENER_APP, ListenerService};
use super::{Service, ServiceError};

/// Builds a fresh, unconfigured service instance.
pub type ServiceFactory = Box<dyn Fn() -> Box<dyn Service> + Send + Sync>;

/// Named service factories the `app` setting selects from.
#[derive(Default)]
pub struct ServiceRegistry {
    factories: BTreeMap<String, ServiceFactory>,
}

impl ServiceRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the services shipped with the daemon.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(LISTENER_APP, Box::new(|| Box::new(ListenerService::new())));
        registry
    }

    /// Registers `factory` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, factory: ServiceFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Builds a new instance of the service registered as `app`.
    pub fn build(&self, app: &str) -> Result<Box<dyn Service>, ServiceError> {
        self.factories
            .get(app)
            .map(|factory| factory())
            .ok_or_else(|| ServiceError::UnknownApplication {
                app: app.to_owned(),
                registered: self.names().collect::<Vec<_>>().join(", "),
            })
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::MockBackend;

    #[test]
    fn builtin_registry_provides_the_listener() {
        let registry = ServiceRegistry::builtin();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec![LISTENER_APP]);
        assert!(registry.build(LISTENER_APP).is_ok());
    }

    #[test]
    fn unknown_application_lists_registered_names() {
        let mut registry = ServiceRegistry::builtin();
        registry.register("demo.app", Box::new(|| Box::new(MockBackend::new())));
        let Err(error) = registry.build("missing.app") else {
            panic!("unknown app should not build");
        };
        assert_eq!(
            error.to_string(),
            "unknown application 'missing.app' (registered: demo.app, warden.listener)"
        );
    }
}
