//! The ordered service registry.
//!
//! Service definitions are loaded once from configuration and never change
//! shape afterwards; registration order is significant. Position 0 is the
//! foundational dependency every other service implicitly waits on during a
//! start-all sequence. The one runtime-mutable piece of a definition, the
//! artifact path, lives in the per-service state guarded by the supervisor
//! so edits are synchronized against concurrent starts.

use crate::config::Config;

/// Identity of one service: display name plus its initial artifact path.
#[derive(Debug, Clone)]
pub struct ServiceDef {
    pub name: String,
    pub artifact: String,
}

/// Insertion-ordered list of service definitions.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    services: Vec<ServiceDef>,
}

impl ServiceRegistry {
    pub fn new(services: Vec<ServiceDef>) -> Self {
        Self { services }
    }

    pub fn from_config(config: &Config) -> Self {
        let services = config
            .services
            .iter()
            .map(|s| ServiceDef {
                name: s.name.clone(),
                artifact: s.artifact.clone(),
            })
            .collect();
        Self { services }
    }

    /// The definitions in registration order.
    pub fn list(&self) -> &[ServiceDef] {
        &self.services
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn into_services(self) -> Vec<ServiceDef> {
        self.services
    }
}
