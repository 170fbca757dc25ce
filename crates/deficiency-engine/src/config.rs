//! Engine configuration.

use std::str::FromStr;
use std::time::Duration;

use deficiency_ai::ClassifierConfig;
use deficiency_store::FusionWeights;

use crate::EngineError;

/// Exponential backoff for retrieval and model calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` counts from 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let secs = self.initial_backoff.as_secs_f64() * exp;
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Items analysed at once within a session.
    pub concurrency: usize,
    /// Evidence chunks handed to the classifier per request.
    pub retrieval_limit: usize,
    /// Fused candidates passed to the reranker.
    pub candidate_cap: usize,
    pub fusion: FusionWeights,
    pub retry: RetryPolicy,
    pub retrieval_timeout: Duration,
    pub model_timeout: Duration,
    pub classifier: ClassifierConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            retrieval_limit: 20,
            candidate_cap: 100,
            fusion: FusionWeights::default(),
            retry: RetryPolicy::default(),
            retrieval_timeout: Duration::from_secs(30),
            model_timeout: Duration::from_secs(60),
            classifier: ClassifierConfig::default(),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, raw: Option<String>) -> Result<Option<T>, EngineError> {
    match raw {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| EngineError::Config(format!("{name}={raw:?} is not a valid value"))),
    }
}

impl EngineConfig {
    /// Defaults overlaid with `DEFICIENCY_*` environment variables.
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overlaid with variables from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EngineError> {
        let mut config = Self::default();
        if let Some(v) = parse_var("DEFICIENCY_CONCURRENCY", lookup("DEFICIENCY_CONCURRENCY"))? {
            config.concurrency = v;
        }
        if let Some(v) = parse_var(
            "DEFICIENCY_RETRIEVAL_LIMIT",
            lookup("DEFICIENCY_RETRIEVAL_LIMIT"),
        )? {
            config.retrieval_limit = v;
        }
        if let Some(v) = parse_var("DEFICIENCY_MAX_ATTEMPTS", lookup("DEFICIENCY_MAX_ATTEMPTS"))? {
            config.retry.max_attempts = v;
        }
        if let Some(secs) = parse_var::<u64>(
            "DEFICIENCY_MODEL_TIMEOUT_SECS",
            lookup("DEFICIENCY_MODEL_TIMEOUT_SECS"),
        )? {
            config.model_timeout = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.concurrency == 0 {
            return Err(EngineError::Config("concurrency must be at least 1".into()));
        }
        if self.retrieval_limit == 0 {
            return Err(EngineError::Config("retrieval_limit must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(EngineError::Config("max_attempts must be at least 1".into()));
        }
        if self.retry.multiplier < 1.0 {
            return Err(EngineError::Config("backoff multiplier must be >= 1".into()));
        }
        if self.retrieval_timeout.is_zero() || self.model_timeout.is_zero() {
            return Err(EngineError::Config("timeouts must be non-zero".into()));
        }
        let c = self.classifier.no_responsive_confidence;
        if !(0.0..=1.0).contains(&c) {
            return Err(EngineError::Config(format!(
                "no_responsive_confidence {c} outside [0, 1]"
            )));
        }
        Ok(())
    }
}
