//! Registry configuration.

use serde::{Deserialize, Serialize};

/// Default id of the provider describing the gateway itself.
pub const DEFAULT_SELF_PROVIDER: &str = "gateway";

/// Configuration for a [`Registry`](crate::Registry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Id of the built-in self provider. It always exists and cannot be
    /// deleted.
    pub self_provider_id: String,
    /// Model of the self provider. Created as a dynamic model if absent.
    pub self_model: String,
    /// Drop low-level updates whose timestamp is older than the stored one.
    pub drop_stale_updates: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            self_provider_id: DEFAULT_SELF_PROVIDER.to_string(),
            self_model: DEFAULT_SELF_PROVIDER.to_string(),
            drop_stale_updates: true,
        }
    }
}
