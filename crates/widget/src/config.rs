use std::path::PathBuf;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};

use crate::error::{ConfigSnafu, MissingEmbedIdSnafu, WidgetResult};

pub const DEFAULT_API_BASE_URL: &str = "https://api.cordial.chat";
const CONFIG_FILE: &str = "cordial.toml";
const ENV_PREFIX: &str = "CORDIAL_";

/// Per-widget-instance configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetConfig {
    /// Chatbot/embed identifier this widget instance belongs to.
    pub embed_id: String,
    /// Base URL of the collaborator backend.
    pub api_base_url: String,
    /// Override for the client-side state directory. Platform default when
    /// unset.
    pub state_dir: Option<PathBuf>,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            embed_id: String::new(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            state_dir: None,
        }
    }
}

impl WidgetConfig {
    pub fn new(embed_id: impl Into<String>, api_base_url: impl Into<String>) -> Self {
        Self {
            embed_id: embed_id.into(),
            api_base_url: api_base_url.into(),
            state_dir: None,
        }
    }

    /// Loads configuration from defaults, then `cordial.toml`, then
    /// `CORDIAL_*` environment variables (later sources win).
    pub fn load() -> WidgetResult<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .context(ConfigSnafu {
                stage: "load-config",
            })?;

        ensure!(
            !config.embed_id.trim().is_empty(),
            MissingEmbedIdSnafu {
                stage: "load-config-embed-id",
            }
        );
        Ok(config)
    }
}
