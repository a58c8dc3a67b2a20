use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::FeatureWeights;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub fusion: FusionConfig,
    pub distillation: DistillationConfig,
    pub planner: PlannerConfig,
    pub checkpoint: CheckpointConfig,
    pub correction: CorrectionConfig,
    pub pipeline: PipelineConfig,
    pub store: StoreConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    /// Deadline for one `/v1/requests` pipeline run.
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            allowed_origins: vec!["*".into()],
            request_timeout_ms: 120_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    /// Deadline applied to every LLM call.
    pub timeout_ms: u64,
    pub small: ModelEndpoint,
    pub large: ModelEndpoint,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            small: ModelEndpoint {
                provider: "openai".into(),
                model: "gpt-4o-mini".into(),
            },
            large: ModelEndpoint {
                provider: "openai".into(),
                model: "gpt-4o".into(),
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ModelEndpoint {
    /// `openai` or `anthropic`.
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FusionConfig {
    pub enable_rule_based: bool,
    pub enable_llm_fusion: bool,
    pub max_fusion_window: usize,
    pub llm_fusion_confidence_threshold: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            enable_rule_based: true,
            enable_llm_fusion: true,
            max_fusion_window: 5,
            llm_fusion_confidence_threshold: 0.8,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DistillationConfig {
    pub enabled: bool,
    pub fallback_enabled: bool,
    /// Scores below this are `simple`.
    pub simple_threshold: f64,
    /// Scores at or above this are `complex`.
    pub complex_threshold: f64,
    /// Minimum small-tier quality before escalating.
    pub quality_threshold: f64,
    pub weights: FeatureWeights,
    pub learning: LearningConfig,
}

impl Default for DistillationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fallback_enabled: true,
            simple_threshold: 0.3,
            complex_threshold: 0.6,
            quality_threshold: 0.7,
            weights: FeatureWeights::default(),
            learning: LearningConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LearningConfig {
    /// Most recent records examined.
    pub window: usize,
    /// Samples a bucket needs before it can move weights.
    pub min_samples: usize,
    /// Fallback rate at which a bucket is considered under-scored.
    pub fallback_rate_threshold: f64,
    pub learning_rate: f64,
    pub max_weight: f64,
    /// Feature value at which a feature counts as active.
    pub active_feature_threshold: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            window: 200,
            min_samples: 5,
            fallback_rate_threshold: 0.3,
            learning_rate: 0.1,
            max_weight: 1.0,
            active_feature_threshold: 0.1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PlannerConfig {
    /// Upper bound on steps kept per layer.
    pub max_steps_per_layer: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_steps_per_layer: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CheckpointConfig {
    pub enable_llm_check: bool,
    pub quality_threshold: f64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enable_llm_check: true,
            quality_threshold: 0.7,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CorrectionConfig {
    pub max_retries: u32,
    /// Deadline applied to every step execution.
    pub step_timeout_ms: u64,
    pub enable_llm_diagnosis: bool,
    /// Run the checkpoint validator after each successful step.
    pub validate_steps: bool,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            step_timeout_ms: 60_000,
            enable_llm_diagnosis: true,
            validate_steps: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Run fused intents without dependencies concurrently.
    pub parallel_independent: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    /// `memory` or `sqlite`.
    pub backend: String,
    pub sqlite_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "memory".into(),
            sqlite_path: "data/intentflow.db".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    pub json_logs: bool,
    pub service_name: String,
    pub enable_metrics: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            service_name: "intentflow".into(),
            enable_metrics: true,
        }
    }
}

impl AppConfig {
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("INTENTFLOW_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map APP__SERVER__PORT=3000 to server.port
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Reject settings no component can work with.
    pub fn validate(&self) -> Result<()> {
        let d = &self.distillation;
        if !(0.0..=1.0).contains(&d.simple_threshold) || !(0.0..=1.0).contains(&d.complex_threshold) {
            return Err(Error::config("distillation thresholds must be within [0, 1]"));
        }
        if d.simple_threshold > d.complex_threshold {
            return Err(Error::config(format!(
                "distillation.simple_threshold ({}) exceeds complex_threshold ({})",
                d.simple_threshold, d.complex_threshold
            )));
        }
        if self.fusion.max_fusion_window < 2 {
            return Err(Error::config("fusion.max_fusion_window must be at least 2"));
        }
        if !matches!(self.store.backend.as_str(), "memory" | "sqlite") {
            return Err(Error::config(format!("unknown store backend '{}'", self.store.backend)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.fusion.max_fusion_window, 5);
        assert_eq!(cfg.distillation.quality_threshold, 0.7);
        assert_eq!(cfg.correction.max_retries, 3);
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let mut cfg = AppConfig::default();
        cfg.distillation.simple_threshold = 0.8;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_partial_source_fills_defaults() {
        let cfg: AppConfig = Config::builder()
            .add_source(config::File::from_str(
                "[fusion]\nmax_fusion_window = 3\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.fusion.max_fusion_window, 3);
        assert!(cfg.fusion.enable_rule_based);
        assert_eq!(cfg.server.port, 3000);
    }
}
