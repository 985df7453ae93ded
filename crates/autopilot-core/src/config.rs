//! Session configuration.
//!
//! Everything the hosting application supplies for one call: the assistant's
//! scripted messages, its idle policy, the tools it may use, and the bounds
//! the dialogue engine works within. Loaded from a file plus `AUTOPILOT__*`
//! environment overrides, then validated before a session may start.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// The assistant's per-session script. All fields are required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Played once when the call is answered
    pub first_message: String,
    /// Played once when the session ends on its own terms
    pub goodbye_message: String,
    /// System prompt for the model; knowledge snippets are appended to it
    pub system_template: String,
    /// Spoken when a turn fails
    pub system_error_message: String,
    /// Spoken each time the caller stays silent for `idle_timeout`
    pub idle_message: String,
    #[serde(rename = "idle_timeout_ms", with = "duration_ms")]
    pub idle_timeout: Duration,
    /// Consecutive idle firings before the session ends. Zero disables.
    pub max_idle_timeout_count: u32,
}

/// Bounds for the dialogue engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Model round-trips carrying tool calls allowed in one turn
    pub max_tool_iterations: usize,
    /// Knowledge snippets fetched per turn
    pub knowledge_top_k: usize,
    /// Shortest text flushed to playback as a sentence
    pub min_sentence_chars: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_tool_iterations: 5,
            knowledge_top_k: 3,
            min_sentence_chars: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub assistant: AssistantConfig,
    /// Names of registered tools the model may call
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub engine: EngineSettings,
}

impl SessionConfig {
    /// Load from the file named by `AUTOPILOT_CONFIG` (default
    /// `config/autopilot`, any format the `config` crate knows), overlaid by
    /// `AUTOPILOT__SECTION__KEY` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var("AUTOPILOT_CONFIG").unwrap_or_else(|_| "config/autopilot".to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(target: "autopilot::session", path = %path.display(), "loading session config");

        let built = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("AUTOPILOT")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("tools")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: SessionConfig = built.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let a = &self.assistant;
        for (field, value) in [
            ("first_message", &a.first_message),
            ("goodbye_message", &a.goodbye_message),
            ("system_template", &a.system_template),
            ("system_error_message", &a.system_error_message),
            ("idle_message", &a.idle_message),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(field, "must not be empty"));
            }
        }
        if a.idle_timeout.is_zero() {
            return Err(ConfigError::invalid("idle_timeout_ms", "must be greater than zero"));
        }
        if self.engine.max_tool_iterations == 0 {
            return Err(ConfigError::invalid("max_tool_iterations", "must be at least 1"));
        }
        if self.engine.knowledge_top_k == 0 {
            return Err(ConfigError::invalid("knowledge_top_k", "must be at least 1"));
        }
        Ok(())
    }
}

/// Connection settings for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 250,
            temperature: 0.7,
        }
    }
}

impl ModelSettings {
    /// Defaults overridden by `OPENAI_API_KEY`, `OPENAI_BASE_URL` and `AUTOPILOT_MODEL`.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                settings.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            settings.base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(model) = std::env::var("AUTOPILOT_MODEL") {
            settings.model = model;
        }
        settings
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) fn sample() -> SessionConfig {
        SessionConfig {
            assistant: AssistantConfig {
                first_message: "Hello, how can I help?".into(),
                goodbye_message: "Goodbye!".into(),
                system_template: "You are a helpful receptionist.".into(),
                system_error_message: "Sorry, something went wrong.".into(),
                idle_message: "Are you still there?".into(),
                idle_timeout: Duration::from_millis(10_000),
                max_idle_timeout_count: 3,
            },
            tools: vec![],
            engine: EngineSettings::default(),
        }
    }

    #[test]
    fn sample_is_valid() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn empty_message_is_rejected() {
        let mut cfg = sample();
        cfg.assistant.idle_message = "  ".into();
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "idle_message", .. }));
    }

    #[test]
    fn zero_idle_timeout_is_rejected() {
        let mut cfg = sample();
        cfg.assistant.idle_timeout = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_tool_iterations_is_rejected() {
        let mut cfg = sample();
        cfg.engine.max_tool_iterations = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn loads_toml_with_engine_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
tools = ["hangup"]

[assistant]
first_message = "Hi there"
goodbye_message = "Bye"
system_template = "Be brief."
system_error_message = "Oops"
idle_message = "Hello?"
idle_timeout_ms = 2500
max_idle_timeout_count = 2
"#
        )
        .unwrap();

        let cfg = SessionConfig::load_from(file.path()).unwrap();
        assert_eq!(cfg.assistant.idle_timeout, Duration::from_millis(2500));
        assert_eq!(cfg.assistant.max_idle_timeout_count, 2);
        assert_eq!(cfg.tools, vec!["hangup".to_string()]);
        assert_eq!(cfg.engine, EngineSettings::default());
    }

    #[test]
    fn shipped_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/autopilot.toml");
        let cfg = SessionConfig::load_from(path).unwrap();
        assert_eq!(cfg.assistant.max_idle_timeout_count, 3);
        assert_eq!(cfg.assistant.idle_timeout, Duration::from_secs(10));
        assert_eq!(cfg.tools, vec!["hangup".to_string()]);
    }

    #[test]
    fn missing_required_field_fails_to_load() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[assistant]\nfirst_message = \"Hi\"").unwrap();
        assert!(matches!(
            SessionConfig::load_from(file.path()),
            Err(ConfigError::Load(_))
        ));
    }
}
