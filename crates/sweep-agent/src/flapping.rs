//! Circuit breaker for sweeps whose trials keep failing right after start.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

use crate::settings::{AgentConfig, ENV_DISABLE_FLAPPING};

/// Decision taken after a trial error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlapVerdict {
    /// Keep dispatching.
    Continue,
    /// The disable switch is on; any error ends the sweep.
    FailureDisabled,
    /// Too many errors inside the startup window.
    Flapping { failures: usize, window: Duration },
}

impl FlapVerdict {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FlapVerdict::Continue)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlappingGuard {
    window: Duration,
    max_failures: usize,
    disabled: bool,
}

impl FlappingGuard {
    pub fn new(window: Duration, max_failures: usize, disabled: bool) -> Self {
        Self {
            window,
            max_failures,
            disabled,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            config.flapping_window,
            config.flapping_max_failures,
            config.disable_flapping,
        )
    }

    /// Evaluate after a trial error. `elapsed` is time since the agent
    /// started; `errored_runs` is the total number of errored runs so far,
    /// including the one that just failed.
    pub fn check(&self, elapsed: Duration, errored_runs: usize) -> FlapVerdict {
        if self.disabled {
            error!("trial failed and {ENV_DISABLE_FLAPPING} is set, stopping sweep");
            return FlapVerdict::FailureDisabled;
        }

        if elapsed < self.window && errored_runs >= self.max_failures {
            error!(
                failures = self.max_failures,
                window_secs = self.window.as_secs(),
                "Detected {} failed runs in the first {} seconds, killing sweep.",
                self.max_failures,
                self.window.as_secs()
            );
            info!("To disable this check set {ENV_DISABLE_FLAPPING}=true");
            return FlapVerdict::Flapping {
                failures: errored_runs,
                window: self.window,
            };
        }

        FlapVerdict::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> FlappingGuard {
        FlappingGuard::new(Duration::from_secs(60), 3, false)
    }

    #[test]
    fn below_threshold_continues() {
        let g = guard();
        assert_eq!(g.check(Duration::from_secs(1), 1), FlapVerdict::Continue);
        assert_eq!(g.check(Duration::from_secs(10), 2), FlapVerdict::Continue);
    }

    #[test]
    fn threshold_inside_window_is_fatal() {
        let verdict = guard().check(Duration::from_secs(10), 3);
        assert_eq!(
            verdict,
            FlapVerdict::Flapping {
                failures: 3,
                window: Duration::from_secs(60)
            }
        );
        assert!(verdict.is_fatal());
    }

    #[test]
    fn threshold_after_window_continues() {
        assert_eq!(
            guard().check(Duration::from_secs(61), 5),
            FlapVerdict::Continue
        );
        // The window is exclusive.
        assert_eq!(
            guard().check(Duration::from_secs(60), 3),
            FlapVerdict::Continue
        );
    }

    #[test]
    fn disabled_switch_makes_first_error_fatal() {
        let g = FlappingGuard::new(Duration::from_secs(60), 3, true);
        assert_eq!(
            g.check(Duration::from_secs(3600), 1),
            FlapVerdict::FailureDisabled
        );
    }

    #[test]
    fn built_from_config() {
        let config = AgentConfig::new("q7x2k")
            .with_flapping(Duration::from_secs(5), 2)
            .with_disable_flapping(false);
        let g = FlappingGuard::from_config(&config);
        assert!(g.check(Duration::from_secs(1), 2).is_fatal());
        assert!(!g.check(Duration::from_secs(1), 1).is_fatal());
    }
}
