//! Layered configuration for the wiki assistant
//!
//! Priority: environment variables (`WIKI_AGENT_*`) > `config/{env}.yaml`
//! > `config/default.yaml` > serde defaults. Defaults match the deployment
//! policy exactly; `Settings::validate` rejects out-of-range values early.

pub mod constants;
mod settings;

use thiserror::Error;

pub use settings::{
    AliasSettings, ConversationSettings, DedupSettings, EmbeddingSettings, LlmSettings,
    ModelSettings, ObservabilitySettings, PersistenceSettings, RateLimitSettings,
    RetrievalSettings, ServerSettings, Settings, TimeoutSettings, VectorIndexSettings,
};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Load settings from `config/` and the environment.
///
/// `env` selects an overlay file, e.g. `Some("production")` layers
/// `config/production.yaml` over the defaults.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = config::Config::builder()
        .add_source(config::File::with_name("config/default").required(false));

    if let Some(env) = env {
        builder = builder
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false));
    }

    let loaded = builder
        .add_source(
            config::Environment::with_prefix("WIKI_AGENT")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let settings: Settings = loaded.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}
