//! Scheme-keyed lookup of transports.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::command::{CommandTransport, CommandTransportConfig};
use super::traits::Transport;
use crate::task::url_scheme;
use crate::{Error, Result};

/// Maps URL schemes to the transport that fetches them.
#[derive(Default)]
pub struct TransportRegistry {
    transports: RwLock<HashMap<String, Arc<dyn Transport>>>,
}

impl TransportRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in command transports.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        let defaults = [
            ("gsiftp", CommandTransportConfig::globus_url_copy()),
            ("http", CommandTransportConfig::wget()),
            ("https", CommandTransportConfig::wget()),
            ("ftp", CommandTransportConfig::wget()),
            ("sftp", CommandTransportConfig::scp()),
            ("file", CommandTransportConfig::local_copy()),
        ];
        {
            let mut transports = registry.transports.write();
            for (scheme, config) in defaults {
                transports.insert(
                    scheme.to_string(),
                    Arc::new(CommandTransport::new(scheme, config)),
                );
            }
        }
        registry
    }

    /// Register (or replace) the transport for a scheme.
    pub fn register(&self, scheme: impl Into<String>, transport: Arc<dyn Transport>) {
        let scheme = scheme.into().to_ascii_lowercase();
        debug!(scheme = %scheme, transport = transport.name(), "Registering transport");
        self.transports.write().insert(scheme, transport);
    }

    /// Replace transports with command configurations, keyed by scheme.
    pub fn apply_overrides(&self, overrides: &HashMap<String, CommandTransportConfig>) {
        for (scheme, config) in overrides {
            self.register(
                scheme.clone(),
                Arc::new(CommandTransport::new(scheme.clone(), config.clone())),
            );
        }
    }

    /// Look up the transport for a source URL.
    pub fn get(&self, url: &str) -> Result<Arc<dyn Transport>> {
        let scheme = url_scheme(url).to_ascii_lowercase();
        self.transports
            .read()
            .get(&scheme)
            .cloned()
            .ok_or(Error::UnsupportedScheme(scheme))
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.transports.read().keys().cloned().collect();
        schemes.sort();
        schemes
    }
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}
