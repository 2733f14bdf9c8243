use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Job polling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Back-off settings for one kind of server-side job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub timeout_ms: u64,
}

impl PollSettings {
    /// Uploaded sources usually finish processing within a couple of minutes.
    pub fn sources() -> Self {
        Self {
            initial_interval_ms: 1_000,
            max_interval_ms: 10_000,
            timeout_ms: 120_000,
        }
    }

    /// Generated artifacts (audio, reports) take considerably longer.
    pub fn artifacts() -> Self {
        Self {
            initial_interval_ms: 2_000,
            max_interval_ms: 10_000,
            timeout_ms: 300_000,
        }
    }

    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "PollSettings::sources")]
    pub sources: PollSettings,
    #[serde(default = "PollSettings::artifacts")]
    pub artifacts: PollSettings,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            sources: PollSettings::sources(),
            artifacts: PollSettings::artifacts(),
        }
    }
}
