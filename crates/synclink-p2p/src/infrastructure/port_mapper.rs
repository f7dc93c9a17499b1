//! In-process port mapping table.
//!
//! Keeps the mappings a NAT backend would be asked to maintain, keyed by
//! label.  Re-adding a label replaces its entry; removing an unknown label
//! does nothing.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{info, warn};

use crate::application::{MappingProtocol, PortMapper};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub port: u16,
    pub protocol: MappingProtocol,
    pub description: String,
}

#[derive(Debug, Default)]
pub struct LocalPortMapper {
    mappings: Mutex<HashMap<String, PortMapping>>,
}

impl LocalPortMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mapping(&self, label: &str) -> Option<PortMapping> {
        self.lock().get(label).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PortMapping>> {
        // A poisoned table is still a valid table.
        self.mappings
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl PortMapper for LocalPortMapper {
    fn add_port(&self, label: &str, port: u16, protocol: MappingProtocol, description: &str) {
        let previous = self.lock().insert(
            label.to_string(),
            PortMapping {
                port,
                protocol,
                description: description.to_string(),
            },
        );
        if let Some(old) = previous {
            warn!(label, old_port = old.port, "replacing existing port mapping");
        }
        info!(label, port, ?protocol, description, "port mapping added");
    }

    fn remove_port(&self, label: &str) {
        if let Some(old) = self.lock().remove(label) {
            info!(label, port = old.port, "port mapping removed");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
