use std::time::{Duration, Instant};

/// GPS silence after which the fix stream counts as unhealthy
pub const DEFAULT_FIX_SILENCE_SECS: u64 = 30;

/// Tracks how long the position stream has gone without a fix.
///
/// The detector itself ignores missing samples; this is how the guardian
/// decides to report staleness.
#[derive(Clone, Debug)]
pub struct FixHealth {
    last_update: Instant,
    silence_threshold: Duration,
    warned: bool,
}

impl FixHealth {
    pub fn new(silence_threshold: Duration) -> Self {
        FixHealth {
            last_update: Instant::now(),
            silence_threshold,
            warned: false,
        }
    }

    pub fn update(&mut self) {
        if self.warned {
            log::info!("[HEALTH] GPS fixes resumed");
        }
        self.last_update = Instant::now();
        self.warned = false;
    }

    pub fn time_since_last_update(&self) -> Duration {
        self.last_update.elapsed()
    }

    pub fn is_silent(&self) -> bool {
        self.time_since_last_update() > self.silence_threshold
    }

    /// Log once per silence period. Returns true if the stream is silent.
    pub fn check(&mut self) -> bool {
        let silent = self.is_silent();
        if silent && !self.warned {
            log::warn!(
                "[HEALTH] GPS SILENT for {:.1}s, keeping last known breach state",
                self.time_since_last_update().as_secs_f64()
            );
            self.warned = true;
        }
        silent
    }

    pub fn format_status(&self) -> String {
        if self.is_silent() {
            format!(
                "GPS ⚠ (silent {:.1}s)",
                self.time_since_last_update().as_secs_f64()
            )
        } else {
            "GPS ✓".to_string()
        }
    }
}

impl Default for FixHealth {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_FIX_SILENCE_SECS))
    }
}
