//! The system value
//!
//! One [`System`] is constructed at startup and threaded by explicit
//! reference into port drivers and workers. It owns the shared port registry
//! and the named dataplanes; there are no process-global tables.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::dataplane::{Dataplane, DataplaneConfig};
use crate::error::{Error, Result};
use crate::port::{Port, PortTable};

/// Top-level registry of ports and dataplanes
pub struct System {
    ports: Arc<PortTable>,
    dataplanes: DashMap<String, Arc<Dataplane>>,
}

impl System {
    /// Build an empty system
    pub fn new() -> Self {
        Self {
            ports: PortTable::new(),
            dataplanes: DashMap::new(),
        }
    }

    /// The shared port registry
    pub fn ports(&self) -> &PortTable {
        &self.ports
    }

    /// Register a port with every dataplane in this system
    pub fn add_port(&self, port: Arc<dyn Port>) {
        self.ports.add(port);
    }

    /// Remove a port; no-op when absent
    pub fn delete_port(&self, id: u32) {
        if self.ports.remove(id).is_some() {
            info!(port = id, "port deleted");
        }
    }

    /// Create and register a dataplane under a unique name
    pub fn create_dataplane(&self, name: &str, config: DataplaneConfig) -> Result<Arc<Dataplane>> {
        match self.dataplanes.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(Error::DuplicateDataplaneName(name.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let dp = Arc::new(Dataplane::new(name, config, self.ports.clone()));
                entry.insert(dp.clone());
                Ok(dp)
            }
        }
    }

    /// The dataplane registered under `name`
    pub fn dataplane(&self, name: &str) -> Option<Arc<Dataplane>> {
        self.dataplanes.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a dataplane; fails when the name is not in use
    pub fn delete_dataplane(&self, name: &str) -> Result<()> {
        self.dataplanes
            .remove(name)
            .map(|_| info!(dataplane = name, "dataplane deleted"))
            .ok_or_else(|| Error::UnknownDataplane(name.to_string()))
    }
}

impl Default for System {
    fn default() -> Self {
        Self::new()
    }
}
