//! Provider and model registries.
//!
//! Both registries are built once at process start and read-only
//! afterwards. Alias/key collisions are boot-time configuration errors;
//! unknown keys at request time surface as `configuration` errors that
//! name the available keys so misconfigured clients get an actionable
//! message.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{
    BlobStorage, RealtimeProvider, SttProvider, TextCapabilities, TextProvider, TtsProvider,
};
use crate::error::GatewayError;

/// Resolved configuration for one model alias.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Client-facing alias (registry key).
    pub alias: String,
    /// Provider registry key this alias routes to.
    pub provider_key: String,
    /// Vendor-side model name.
    pub model_name: String,
    /// Capability flags the dispatcher reads before selecting code paths.
    pub capabilities: TextCapabilities,
    /// Upper bound on the context window, when the vendor publishes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_context_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

/// Alias → [`ModelConfig`] lookup table.
#[derive(Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelConfig>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model alias. Collision is an error.
    pub fn register(&mut self, config: ModelConfig) -> Result<(), GatewayError> {
        if self.models.contains_key(&config.alias) {
            return Err(GatewayError::Configuration(format!(
                "model alias already registered: {}",
                config.alias
            )));
        }
        self.models.insert(config.alias.clone(), config);
        Ok(())
    }

    /// Resolve an alias, listing the available keys on failure.
    pub fn resolve(&self, alias: &str) -> Result<&ModelConfig, GatewayError> {
        self.models.get(alias).ok_or_else(|| {
            let mut known: Vec<&str> = self.models.keys().map(String::as_str).collect();
            known.sort_unstable();
            GatewayError::Configuration(format!(
                "unknown model '{alias}' (available: {})",
                known.join(", ")
            ))
        })
    }

    pub fn aliases(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }
}

/// String key → adapter instance, per capability class.
#[derive(Default)]
pub struct ProviderRegistry {
    text: HashMap<String, Arc<dyn TextProvider>>,
    tts: HashMap<String, Arc<dyn TtsProvider>>,
    stt: HashMap<String, Arc<dyn SttProvider>>,
    realtime: HashMap<String, Arc<dyn RealtimeProvider>>,
    storage: Option<Arc<dyn BlobStorage>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_text(
        &mut self,
        key: &str,
        provider: Arc<dyn TextProvider>,
    ) -> Result<(), GatewayError> {
        insert_unique(&mut self.text, key, provider, "text")
    }

    pub fn register_tts(
        &mut self,
        key: &str,
        provider: Arc<dyn TtsProvider>,
    ) -> Result<(), GatewayError> {
        insert_unique(&mut self.tts, key, provider, "tts")
    }

    pub fn register_stt(
        &mut self,
        key: &str,
        provider: Arc<dyn SttProvider>,
    ) -> Result<(), GatewayError> {
        insert_unique(&mut self.stt, key, provider, "stt")
    }

    pub fn register_realtime(
        &mut self,
        key: &str,
        provider: Arc<dyn RealtimeProvider>,
    ) -> Result<(), GatewayError> {
        insert_unique(&mut self.realtime, key, provider, "realtime")
    }

    pub fn set_storage(&mut self, storage: Arc<dyn BlobStorage>) {
        self.storage = Some(storage);
    }

    pub fn text(&self, key: &str) -> Result<Arc<dyn TextProvider>, GatewayError> {
        lookup(&self.text, key, "text")
    }

    pub fn tts(&self, key: &str) -> Result<Arc<dyn TtsProvider>, GatewayError> {
        lookup(&self.tts, key, "tts")
    }

    pub fn stt(&self, key: &str) -> Result<Arc<dyn SttProvider>, GatewayError> {
        lookup(&self.stt, key, "stt")
    }

    pub fn realtime(&self, key: &str) -> Result<Arc<dyn RealtimeProvider>, GatewayError> {
        lookup(&self.realtime, key, "realtime")
    }

    pub fn storage(&self) -> Option<Arc<dyn BlobStorage>> {
        self.storage.clone()
    }
}

fn insert_unique<T: ?Sized>(
    map: &mut HashMap<String, Arc<T>>,
    key: &str,
    value: Arc<T>,
    class: &str,
) -> Result<(), GatewayError> {
    if map.contains_key(key) {
        return Err(GatewayError::Configuration(format!(
            "{class} provider already registered: {key}"
        )));
    }
    map.insert(key.to_string(), value);
    Ok(())
}

fn lookup<T: ?Sized>(
    map: &HashMap<String, Arc<T>>,
    key: &str,
    class: &str,
) -> Result<Arc<T>, GatewayError> {
    map.get(key).cloned().ok_or_else(|| {
        let mut known: Vec<&str> = map.keys().map(String::as_str).collect();
        known.sort_unstable();
        GatewayError::Configuration(format!(
            "unknown {class} provider '{key}' (available: {})",
            known.join(", ")
        ))
    })
}
