use std::time::Duration;

use serde::Deserialize;

/// Credit prices per operation, injected by the host. The orchestrator checks
/// the balance before running a pipeline and debits only after success.
#[derive(Debug, Clone, Deserialize)]
pub struct CreditCosts {
    pub carousel_slide: u32,
    pub edit: u32,
    pub demo: u32,
}

impl Default for CreditCosts {
    fn default() -> Self {
        Self {
            carousel_slide: 4,
            edit: 2,
            demo: 4,
        }
    }
}

/// Externally injected limits. Nothing here is hard-coded in the state
/// machine; the transport layer constructs one of these (typically from its
/// own config file) and passes it into every `apply` call.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Hard limit of the image-generation capability.
    pub max_images: usize,
    /// Maximum finalized steps per multi-step flow.
    pub max_steps: usize,
    /// Maximum length of a user instruction, in characters.
    pub max_prompt_chars: usize,
    /// After this much time a held session lock is considered stale and may
    /// be forcibly re-acquired.
    #[serde(with = "secs")]
    pub lock_timeout: Duration,
    /// Per-image budget for the vision classification sub-call.
    #[serde(with = "secs")]
    pub vision_timeout: Duration,
    /// Budget for the image-generation call.
    #[serde(with = "secs")]
    pub generation_timeout: Duration,
    pub credit_costs: CreditCosts,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_images: 8,
            max_steps: 10,
            max_prompt_chars: 2000,
            lock_timeout: Duration::from_secs(5 * 60),
            vision_timeout: Duration::from_secs(30),
            generation_timeout: Duration::from_secs(120),
            credit_costs: CreditCosts::default(),
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        u64::deserialize(de).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_capability_limits() {
        let cfg = FlowConfig::default();
        assert_eq!(cfg.max_images, 8);
        assert_eq!(cfg.max_steps, 10);
        assert_eq!(cfg.lock_timeout, Duration::from_secs(300));
    }

    #[test]
    fn deserializes_partial_override() {
        let cfg: FlowConfig =
            serde_json::from_str(r#"{"max_steps": 5, "lock_timeout": 60}"#).unwrap();
        assert_eq!(cfg.max_steps, 5);
        assert_eq!(cfg.lock_timeout, Duration::from_secs(60));
        assert_eq!(cfg.max_images, 8);
    }
}
