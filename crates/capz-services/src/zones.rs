//! Availability zone discovery

use std::collections::HashMap;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use capz_common::ReconcileError;

/// Finds the availability zones of a location
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ZoneResolver: Send + Sync {
    /// Zones of `location`, empty when the region has none
    async fn zones(&self, location: &str) -> Result<Vec<String>, ReconcileError>;
}

/// Zones from operator configuration
///
/// Locations without an override get the default list.
#[derive(Debug, Clone, Default)]
pub struct StaticZoneResolver {
    default: Vec<String>,
    overrides: HashMap<String, Vec<String>>,
}

impl StaticZoneResolver {
    pub fn new(default: Vec<String>) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Use `zones` for `location`; an empty list means no zones
    pub fn with_override(mut self, location: impl Into<String>, zones: Vec<String>) -> Self {
        self.overrides.insert(location.into().to_lowercase(), zones);
        self
    }
}

#[async_trait]
impl ZoneResolver for StaticZoneResolver {
    async fn zones(&self, location: &str) -> Result<Vec<String>, ReconcileError> {
        Ok(self
            .overrides
            .get(&location.to_lowercase())
            .unwrap_or(&self.default)
            .clone())
    }
}
