use std::time::Duration;

use serde::Deserialize;

use crate::generation::GenerationDefaults;
use crate::openai_settings;
use crate::scoring::ScoringPolicy;

fn default_openai_base_url() -> String {
    openai_settings::DEFAULT_API_BASE.into()
}

fn default_openai_model() -> String {
    openai_settings::DEFAULT_MODEL.into()
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_http_bind() -> String {
    "0.0.0.0".into()
}

fn default_http_port() -> u16 {
    4000
}

fn default_context_ttl_secs() -> u64 {
    3600
}

fn default_weight_general() -> u32 {
    1
}

fn default_weight_specific() -> u32 {
    2
}

fn default_weight_values() -> u32 {
    3
}

fn default_blend_answer_share() -> f64 {
    0.7
}

fn default_rate_limit_per_minute() -> u32 {
    60
}

fn default_framing_cta() -> String {
    "Shall we break this down with ten questions?".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    #[serde(default)]
    pub openai_temperature: Option<f32>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub cors_origin: Option<String>,
    #[serde(default = "default_http_bind")]
    pub http_bind: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_context_ttl_secs")]
    pub context_ttl_secs: u64,
    #[serde(default = "default_weight_general")]
    pub scoring_weight_general: u32,
    #[serde(default = "default_weight_specific")]
    pub scoring_weight_specific: u32,
    #[serde(default = "default_weight_values")]
    pub scoring_weight_values: u32,
    #[serde(default = "default_blend_answer_share")]
    pub blend_answer_share: f64,
    #[serde(default = "default_framing_cta")]
    pub framing_cta: String,
    /// Requests per minute per client address; 0 disables the limit.
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
}

impl Settings {
    /// Loads settings from an optional `decision.toml` next to the binary and
    /// the process environment, the latter taking precedence.
    pub fn new() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name("decision").required(false))
            .add_source(config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn context_ttl(&self) -> Duration {
        Duration::from_secs(self.context_ttl_secs)
    }

    pub fn scoring_policy(&self) -> ScoringPolicy {
        ScoringPolicy::new(
            [
                self.scoring_weight_general,
                self.scoring_weight_specific,
                self.scoring_weight_values,
            ],
            self.blend_answer_share,
        )
    }

    pub fn generation_defaults(&self) -> GenerationDefaults {
        GenerationDefaults {
            model: self.openai_model.clone(),
            temperature: self.openai_temperature,
            timeout: self.timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[serial]
    #[test]
    fn defaults_apply_without_environment() {
        std::env::remove_var("OPENAI_MODEL");
        std::env::remove_var("TIMEOUT_MS");
        std::env::remove_var("BLEND_ANSWER_SHARE");
        let settings = Settings::new().unwrap();
        assert_eq!(settings.openai_model, openai_settings::DEFAULT_MODEL);
        assert_eq!(settings.timeout(), Duration::from_secs(60));
        assert_eq!(settings.scoring_policy(), ScoringPolicy::default());
    }

    #[serial]
    #[test]
    fn environment_overrides_timeout_and_weights() {
        std::env::set_var("TIMEOUT_MS", "2500");
        std::env::set_var("SCORING_WEIGHT_VALUES", "5");
        let settings = Settings::new().unwrap();
        std::env::remove_var("TIMEOUT_MS");
        std::env::remove_var("SCORING_WEIGHT_VALUES");

        assert_eq!(settings.timeout_ms, 2500);
        assert_eq!(settings.scoring_policy().weight_for(9), 5);
        assert_eq!(settings.scoring_policy().weight_for(1), 1);
    }
}
