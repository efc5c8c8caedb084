//! Run configuration and the model catalog.
//!
//! [`RunConfig`] is the flat key/value record the UI persists between
//! sessions. It is read once at run start and shared read-only with every
//! chunk request of that run.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{error::ConfigError, types::LanguageFamily};

/// How `chunk_size` is interpreted by the segmenter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkUnit {
    /// Words for Latin text, characters for everything else.
    #[default]
    Words,
    Tokens,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub model: String,
    pub chunk_size: usize,
    pub chunk_unit: ChunkUnit,
    pub max_tokens_rec: usize,
    pub max_tokens_final: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub persona_rec: String,
    pub persona_final: String,
    pub language: String,
    /// Skips language detection when set.
    pub language_family: Option<LanguageFamily>,
    pub delay_secs: f64,
    /// Process chunks one at a time instead of all at once.
    pub legacy_mode: bool,
    pub final_summary: bool,
    /// Upper bound on simultaneous requests; `None` dispatches every chunk at once.
    pub concurrency_limit: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::for_language("English")
    }
}

impl RunConfig {
    pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

    /// Default configuration with personas asking for output in `language`.
    pub fn for_language(language: &str) -> Self {
        Self {
            model: Self::DEFAULT_MODEL.into(),
            chunk_size: 800,
            chunk_unit: ChunkUnit::Words,
            max_tokens_rec: 250,
            max_tokens_final: 650,
            temperature: 0.7,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            persona_rec: format!(
                "You are a comprehensive summarizer that summarizes large chunks of text into \
                 detailed paragraphs in perfect {language} while making sure all the key points \
                 are included."
            ),
            persona_final: format!(
                "Write a detailed summary in perfect {language} that is concise, clear and \
                 coherent while capturing the main ideas of the text. The summary is to be \
                 written in markdown format, with a heading (###) that captures the core concept \
                 of the content."
            ),
            language: language.into(),
            language_family: None,
            delay_secs: 0.0,
            legacy_mode: false,
            final_summary: true,
            concurrency_limit: None,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str::<Self>(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(path, body).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Hex SHA-256 of the canonical JSON form. Any field change yields a new
    /// fingerprint, which invalidates memoized results.
    pub fn fingerprint(&self) -> String {
        // serializing a plain struct of scalars and strings cannot fail
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.into(),
            }
        }

        if self.model.trim().is_empty() {
            return Err(invalid("model", "must not be empty"));
        }
        if self.chunk_size == 0 {
            return Err(invalid("chunk_size", "must be greater than zero"));
        }
        if self.max_tokens_rec == 0 {
            return Err(invalid("max_tokens_rec", "must be greater than zero"));
        }
        if self.final_summary && self.max_tokens_final == 0 {
            return Err(invalid("max_tokens_final", "must be greater than zero"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid("temperature", format!("{} is outside 0.0..=2.0", self.temperature)));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(invalid("top_p", format!("{} is outside 0.0..=1.0", self.top_p)));
        }
        for (field, value) in [
            ("frequency_penalty", self.frequency_penalty),
            ("presence_penalty", self.presence_penalty),
        ] {
            if !(-2.0..=2.0).contains(&value) {
                return Err(invalid(field, format!("{value} is outside -2.0..=2.0")));
            }
        }
        if self.persona_rec.trim().is_empty() {
            return Err(invalid("persona_rec", "must not be empty"));
        }
        if self.final_summary && self.persona_final.trim().is_empty() {
            return Err(invalid("persona_final", "must not be empty"));
        }
        if !self.delay_secs.is_finite() || self.delay_secs < 0.0 {
            return Err(invalid("delay_secs", "must be a non-negative number of seconds"));
        }
        if self.concurrency_limit == Some(0) {
            return Err(invalid("concurrency_limit", "must be at least 1 when set"));
        }
        Ok(())
    }

    /// Checks the per-pass output limits against what the model can generate.
    pub fn validate_against(&self, model: &ModelSpec) -> Result<(), ConfigError> {
        if self.max_tokens_rec > model.max_output_tokens {
            return Err(ConfigError::Invalid {
                field: "max_tokens_rec",
                reason: format!(
                    "{} exceeds the {} output limit of {}",
                    self.max_tokens_rec, model.name, model.max_output_tokens
                ),
            });
        }
        if self.final_summary && self.max_tokens_final > model.max_output_tokens {
            return Err(ConfigError::Invalid {
                field: "max_tokens_final",
                reason: format!(
                    "{} exceeds the {} output limit of {}",
                    self.max_tokens_final, model.name, model.max_output_tokens
                ),
            });
        }
        Ok(())
    }
}

/// USD per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    #[serde(rename = "model")]
    pub name: String,
    pub context_window: usize,
    pub max_output_tokens: usize,
    pub pricing: ModelPricing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelCatalog {
    models: Vec<ModelSpec>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelSpec>) -> Self {
        Self { models }
    }

    pub fn builtin() -> Self {
        fn spec(
            name: &str,
            context_window: usize,
            max_output_tokens: usize,
            input: f64,
            output: f64,
            cached: Option<f64>,
        ) -> ModelSpec {
            ModelSpec {
                name: name.into(),
                context_window,
                max_output_tokens,
                pricing: ModelPricing {
                    input,
                    output,
                    cached,
                },
            }
        }

        Self::new(vec![
            spec("gpt-4o-mini", 128_000, 16_384, 0.15, 0.6, Some(0.075)),
            spec("gpt-4o", 128_000, 16_384, 2.5, 10.0, Some(1.25)),
            spec("gpt-4.1", 1_047_576, 32_768, 2.0, 8.0, Some(0.5)),
            spec("gpt-4.1-mini", 1_047_576, 32_768, 0.4, 1.6, Some(0.1)),
            spec("gpt-4-turbo", 128_000, 4_096, 10.0, 30.0, None),
            spec("gpt-4", 8_192, 8_192, 30.0, 60.0, None),
            spec("gpt-3.5-turbo", 16_385, 4_096, 0.5, 1.5, None),
        ])
    }

    /// Parses a `models.json` array.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(serde_json::from_str(raw)?))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn get(&self, name: &str) -> Result<&ModelSpec, ConfigError> {
        self.models
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| ConfigError::UnknownModel(name.into()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(|m| m.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_size, 800);
        assert!(config.persona_rec.contains("English"));
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: RunConfig =
            serde_json::from_str(r#"{"model": "gpt-4o", "chunk_size": 300, "legacy_mode": true}"#)
                .unwrap();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.chunk_size, 300);
        assert!(config.legacy_mode);
        assert_eq!(config.max_tokens_rec, 250);
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let config = RunConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "chunk_size",
                ..
            })
        ));

        let config = RunConfig {
            top_p: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "top_p", .. })
        ));

        let config = RunConfig {
            concurrency_limit: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fingerprint_changes_with_any_field() {
        let base = RunConfig::default();
        let same = RunConfig::default();
        let changed = RunConfig {
            temperature: 0.2,
            ..Default::default()
        };
        assert_eq!(base.fingerprint(), same.fingerprint());
        assert_ne!(base.fingerprint(), changed.fingerprint());
        assert_eq!(base.fingerprint().len(), 64);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = RunConfig {
            chunk_size: 1200,
            final_summary: false,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(RunConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_catalog_lookup_and_json_loading() {
        let catalog = ModelCatalog::builtin();
        assert_eq!(catalog.get("gpt-4").unwrap().context_window, 8_192);
        assert!(matches!(
            catalog.get("nope"),
            Err(ConfigError::UnknownModel(name)) if name == "nope"
        ));

        let catalog = ModelCatalog::from_json_str(
            r#"[{"model": "tiny", "context_window": 4096, "max_output_tokens": 1024,
                 "pricing": {"input": 1.0, "output": 2.0}}]"#,
        )
        .unwrap();
        let tiny = catalog.get("tiny").unwrap();
        assert_eq!(tiny.pricing.cached, None);
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["tiny"]);
    }

    #[test]
    fn test_validate_against_model_output_limit() {
        let catalog = ModelCatalog::builtin();
        let config = RunConfig {
            model: "gpt-4-turbo".into(),
            max_tokens_final: 8_000,
            ..Default::default()
        };
        let err = config
            .validate_against(catalog.get("gpt-4-turbo").unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "max_tokens_final",
                ..
            }
        ));
    }
}
