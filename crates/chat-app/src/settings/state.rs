use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use lumen_chat::{ControllerConfig, DEFAULT_FALLBACK_MESSAGE, OverlapPolicy, VisibilityConfig};
use lumen_llm::{
    ANSWERING_SERVICE_DISPATCHER_ID, CANNED_DISPATCHER_ID, DEFAULT_ANSWER_PATH,
    DEFAULT_CANNED_DELAY, DEFAULT_CANNED_REPLY, DEFAULT_OPENAI_MODEL, DEFAULT_REQUEST_TIMEOUT,
    DispatchResult, DispatcherConfig, RIG_OPENAI_DISPATCHER_ID, RigDispatcherConfig,
    parse_dispatcher_kind,
};
use serde::{Deserialize, Deserializer, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "lumen";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const SETTINGS_ENV_PREFIX: &str = "LUMEN_";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    #[serde(deserialize_with = "lenient_string")]
    pub api_key: String,
    #[serde(deserialize_with = "lenient_string")]
    pub base_url: String,
    #[serde(deserialize_with = "lenient_string")]
    pub model: String,
    #[serde(deserialize_with = "lenient_string")]
    pub preamble: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

impl OpenAiSettings {
    fn normalized(mut self) -> Self {
        self.api_key = self.api_key.trim().to_string();
        self.base_url = self.base_url.trim().to_string();
        self.model = if self.model.trim().is_empty() {
            DEFAULT_OPENAI_MODEL.to_string()
        } else {
            self.model.trim().to_string()
        };
        self.preamble = self.preamble.trim().to_string();
        self
    }
}

/// Everything the host needs to mount a conversational screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Dispatcher kind. Blank picks the answering service when an endpoint is set.
    #[serde(deserialize_with = "lenient_string")]
    pub dispatcher: String,
    #[serde(deserialize_with = "lenient_string")]
    pub answering_endpoint: String,
    #[serde(deserialize_with = "lenient_string")]
    pub answer_path: String,
    pub request_timeout_secs: u64,
    #[serde(deserialize_with = "lenient_string")]
    pub fallback_message: String,
    pub overlap_policy: OverlapPolicy,
    #[serde(deserialize_with = "lenient_string")]
    pub canned_reply: String,
    pub canned_delay_ms: u64,
    pub openai: OpenAiSettings,
    pub tab_bar: VisibilityConfig,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            dispatcher: String::new(),
            answering_endpoint: String::new(),
            answer_path: DEFAULT_ANSWER_PATH.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
            overlap_policy: OverlapPolicy::default(),
            canned_reply: DEFAULT_CANNED_REPLY.to_string(),
            canned_delay_ms: DEFAULT_CANNED_DELAY.as_millis() as u64,
            openai: OpenAiSettings::default().normalized(),
            tab_bar: VisibilityConfig::default(),
        }
    }
}

impl EngineSettings {
    pub fn normalized(mut self) -> Self {
        self.dispatcher = self.dispatcher.trim().to_ascii_lowercase();
        self.answering_endpoint = self.answering_endpoint.trim().to_string();
        self.answer_path = if self.answer_path.trim().is_empty() {
            DEFAULT_ANSWER_PATH.to_string()
        } else {
            self.answer_path.trim().to_string()
        };
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = DEFAULT_REQUEST_TIMEOUT.as_secs();
        }
        self.fallback_message = if self.fallback_message.trim().is_empty() {
            DEFAULT_FALLBACK_MESSAGE.to_string()
        } else {
            self.fallback_message.trim().to_string()
        };
        if self.canned_reply.trim().is_empty() {
            self.canned_reply = DEFAULT_CANNED_REPLY.to_string();
        }
        self.openai = self.openai.normalized();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Dispatcher id the settings select, after alias resolution.
    pub fn dispatcher_kind(&self) -> DispatchResult<&'static str> {
        if self.dispatcher.trim().is_empty() {
            return Ok(if self.answering_endpoint.trim().is_empty() {
                CANNED_DISPATCHER_ID
            } else {
                ANSWERING_SERVICE_DISPATCHER_ID
            });
        }
        parse_dispatcher_kind(&self.dispatcher)
    }

    pub fn dispatcher_config(&self) -> DispatchResult<DispatcherConfig> {
        self.dispatcher_config_with(|name| std::env::var(name).ok())
    }

    /// Same as [`Self::dispatcher_config`], reading environment fallbacks through `lookup`.
    pub fn dispatcher_config_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> DispatchResult<DispatcherConfig> {
        let config = match self.dispatcher_kind()? {
            ANSWERING_SERVICE_DISPATCHER_ID => DispatcherConfig::AnsweringService {
                base_url: self.answering_endpoint.clone(),
                answer_path: self.answer_path.clone(),
                timeout: self.request_timeout(),
            },
            RIG_OPENAI_DISPATCHER_ID => {
                let api_key = if self.openai.api_key.is_empty() {
                    lookup(OPENAI_API_KEY_ENV).unwrap_or_default()
                } else {
                    self.openai.api_key.clone()
                };
                let mut config = RigDispatcherConfig::new(
                    api_key,
                    &self.openai.base_url,
                    self.request_timeout(),
                )
                .with_model(&self.openai.model);
                if !self.openai.preamble.is_empty() {
                    config = config.with_preamble(&self.openai.preamble);
                }
                if let Some(temperature) = self.openai.temperature {
                    config = config.with_temperature(temperature);
                }
                if let Some(max_tokens) = self.openai.max_tokens {
                    config = config.with_max_tokens(max_tokens);
                }
                DispatcherConfig::RigOpenAi(config)
            }
            _ => self.canned_dispatcher_config(),
        };
        Ok(config)
    }

    /// The offline dispatcher, also used when the configured one cannot be built.
    pub fn canned_dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig::Canned {
            reply_template: self.canned_reply.clone(),
            delay: Duration::from_millis(self.canned_delay_ms),
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig::default()
            .with_fallback_message(&self.fallback_message)
            .with_overlap_policy(self.overlap_policy)
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<EngineSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".lumen"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_layered(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<EngineSettings> {
        self.settings.load_full()
    }

    /// Re-reads every layer and swaps the result in.
    pub fn reload(&self) -> Arc<EngineSettings> {
        let settings = Arc::new(Self::load_layered(&self.config_path));
        self.settings.store(settings.clone());
        tracing::debug!(path = ?self.config_path, "settings reloaded");
        settings
    }

    /// Defaults, then the JSON file, then `LUMEN_` variables.
    ///
    /// A layer that fails to extract is skipped with a warning naming it.
    fn load_layered(path: &Path) -> EngineSettings {
        if !path.exists() {
            tracing::info!(path = ?path, "settings file not found, using defaults");
        }

        let env = Env::prefixed(SETTINGS_ENV_PREFIX).split("__");
        let error = match Self::extract(Self::file_layers(path).merge(env)) {
            Ok(settings) => return settings,
            Err(error) => error,
        };
        tracing::warn!(
            layer = "environment",
            prefix = SETTINGS_ENV_PREFIX,
            %error,
            "ignoring environment settings"
        );

        match Self::extract(Self::file_layers(path)) {
            Ok(settings) => settings,
            Err(error) => {
                tracing::warn!(
                    layer = "file",
                    path = ?path,
                    %error,
                    "invalid settings, using defaults"
                );
                EngineSettings::default()
            }
        }
    }

    fn file_layers(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(EngineSettings::default())).merge(Json::file(path))
    }

    fn extract(figment: Figment) -> Result<EngineSettings, SettingsError> {
        let settings = figment
            .extract::<EngineSettings>()
            .map_err(Box::new)
            .context(ExtractSnafu {
                stage: "extract-layered-settings",
            })?;
        Ok(settings.normalized())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to extract settings on `{stage}`: {source}"))]
    Extract {
        stage: &'static str,
        source: Box<figment::Error>,
    },
}

/// Accepts scalars for free-text fields; environment values such as `42` or `true`
/// arrive typed.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Unsigned(u64),
        Signed(i64),
        Float(f64),
        Flag(bool),
    }

    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Text(text) => text,
        Scalar::Unsigned(value) => value.to_string(),
        Scalar::Signed(value) => value.to_string(),
        Scalar::Float(value) => value.to_string(),
        Scalar::Flag(value) => value.to_string(),
    })
}
