//! Composition root: provider wiring and dependency assembly.
//!
//! This is the ONLY place where infrastructure (database, blob store,
//! provider adapters) is wired together. Vendor adapters slot in here —
//! they read their credentials from the `PROVIDER_*` environment variables
//! and register next to the loopback set. This build ships the loopback
//! providers so the gateway runs end-to-end with no external services.

use std::sync::Arc;

use anyhow::Context as _;
use tracing::info;

use voxgate_axum::FsBlobStore;
use voxgate_core::TimeoutConfig;
use voxgate_core::provider::{
    LoopbackRealtimeProvider, LoopbackSttProvider, LoopbackTextProvider, LoopbackTtsProvider,
    ModelConfig, ModelRegistry, ProviderRegistry, TextCapabilities,
};
use voxgate_core::workflow::WorkflowDeps;
use voxgate_db::{SqliteSessionStore, setup_database};

use crate::ServeArgs;

/// Build the core dependency bundle from resolved arguments.
pub async fn build_deps(args: &ServeArgs) -> anyhow::Result<Arc<WorkflowDeps>> {
    let mut providers = ProviderRegistry::new();
    providers.register_text("loopback", Arc::new(LoopbackTextProvider::new()))?;
    providers.register_tts("loopback", Arc::new(LoopbackTtsProvider::streaming()))?;
    providers.register_tts(
        "loopback-buffered",
        Arc::new(LoopbackTtsProvider::buffered_only()),
    )?;
    providers.register_stt("loopback", Arc::new(LoopbackSttProvider))?;
    providers.register_realtime("loopback", Arc::new(LoopbackRealtimeProvider))?;

    if let Some(bucket) = &args.blob_bucket {
        let store = FsBlobStore::new(bucket)
            .with_context(|| format!("failed to open blob bucket {}", bucket.display()))?;
        providers.set_storage(Arc::new(store));
        info!(bucket = %bucket.display(), "blob storage enabled");
    }

    let mut models = ModelRegistry::new();
    models
        .register(ModelConfig {
            alias: "loopback-mini".into(),
            provider_key: "loopback".into(),
            model_name: "loopback-mini".into(),
            capabilities: TextCapabilities {
                supports_audio_input: true,
                ..TextCapabilities::default()
            },
            max_context_tokens: Some(32_768),
            max_output_tokens: Some(4_096),
        })?;

    let store = match &args.database_path {
        Some(path) => {
            let pool = setup_database(path)
                .await
                .with_context(|| format!("failed to open database {}", path.display()))?;
            info!(path = %path.display(), "session store enabled");
            Some(Arc::new(SqliteSessionStore::new(pool)) as Arc<dyn voxgate_core::SessionStore>)
        }
        None => {
            info!("no DATABASE_PATH set; running without persistence");
            None
        }
    };

    Ok(Arc::new(WorkflowDeps {
        providers: Arc::new(providers),
        models: Arc::new(models),
        store,
        timeouts: TimeoutConfig::default(),
    }))
}
