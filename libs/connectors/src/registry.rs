//! Connector registry: service name → connector instance.

use crate::Connector;
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable-after-build lookup table the worker runtime routes jobs with.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector under its own name. The last registration for
    /// a name wins.
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors
            .insert(connector.name().to_string(), connector);
    }

    pub fn with(mut self, connector: Arc<dyn Connector>) -> Self {
        self.register(connector);
        self
    }

    pub fn get(&self, service: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(service).cloned()
    }

    /// Service names this worker can advertise.
    pub fn services(&self) -> Vec<String> {
        let mut services: Vec<String> = self.connectors.keys().cloned().collect();
        services.sort();
        services
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn Connector>)> {
        self.connectors.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SimulationConnector;

    #[test]
    fn test_register_and_lookup() {
        let registry =
            ConnectorRegistry::new().with(Arc::new(SimulationConnector::default()));

        assert!(registry.get("simulation").is_some());
        assert!(registry.get("comfyui").is_none());
        assert_eq!(registry.services(), vec!["simulation".to_string()]);
    }

    #[test]
    fn test_empty_registry() {
        let registry = ConnectorRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.services().is_empty());
    }
}
