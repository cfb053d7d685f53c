use serde::{Deserialize, Serialize};

/// Countdown states. `Fired` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountdownState {
    Idle,
    Counting(u32),
    Fired,
}

/// One-shot alert countdown driven by an external one-second tick.
#[derive(Debug, Clone)]
pub struct AlertCountdown {
    state: CountdownState,
}

impl AlertCountdown {
    pub fn new() -> Self {
        Self {
            state: CountdownState::Idle,
        }
    }

    pub fn state(&self) -> CountdownState {
        self.state
    }

    pub fn is_counting(&self) -> bool {
        matches!(self.state, CountdownState::Counting(_))
    }

    pub fn is_fired(&self) -> bool {
        self.state == CountdownState::Fired
    }

    pub fn remaining_seconds(&self) -> Option<u32> {
        match self.state {
            CountdownState::Counting(n) => Some(n),
            _ => None,
        }
    }

    /// Idle -> Counting(initial_seconds). Returns false and changes nothing
    /// when already counting, already fired, or asked for zero seconds.
    pub fn start(&mut self, initial_seconds: u32) -> bool {
        if self.state != CountdownState::Idle || initial_seconds == 0 {
            return false;
        }
        self.state = CountdownState::Counting(initial_seconds);
        true
    }

    /// Advance one second. Returns true exactly once: on Counting(1) -> Fired.
    pub fn tick(&mut self) -> bool {
        match self.state {
            CountdownState::Counting(n) if n > 1 => {
                self.state = CountdownState::Counting(n - 1);
                false
            }
            CountdownState::Counting(_) => {
                self.state = CountdownState::Fired;
                true
            }
            CountdownState::Idle | CountdownState::Fired => false,
        }
    }

    /// Counting -> Fired without waiting out the remaining seconds
    pub fn fire_now(&mut self) -> bool {
        if self.is_counting() {
            self.state = CountdownState::Fired;
            true
        } else {
            false
        }
    }

    /// Counting -> Idle. Returns whether anything was canceled.
    pub fn cancel(&mut self) -> bool {
        if self.is_counting() {
            self.state = CountdownState::Idle;
            true
        } else {
            false
        }
    }
}

impl Default for AlertCountdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_second_countdown_fires_once() {
        let mut cd = AlertCountdown::new();
        assert!(cd.start(5));

        let mut states = Vec::new();
        let mut fires = 0;
        for _ in 0..5 {
            if cd.tick() {
                fires += 1;
            }
            states.push(cd.state());
        }

        assert_eq!(
            states,
            vec![
                CountdownState::Counting(4),
                CountdownState::Counting(3),
                CountdownState::Counting(2),
                CountdownState::Counting(1),
                CountdownState::Fired,
            ]
        );
        assert_eq!(fires, 1);

        // Extra ticks after firing stay silent
        assert!(!cd.tick());
        assert!(cd.is_fired());
    }

    #[test]
    fn test_start_is_idempotent_while_counting() {
        let mut cd = AlertCountdown::new();
        assert!(cd.start(10));
        cd.tick();
        assert!(!cd.start(10));
        assert_eq!(cd.remaining_seconds(), Some(9));
    }

    #[test]
    fn test_start_zero_is_noop() {
        let mut cd = AlertCountdown::new();
        assert!(!cd.start(0));
        assert_eq!(cd.state(), CountdownState::Idle);
    }

    #[test]
    fn test_cancel_at_any_count_never_fires() {
        for cancel_after in 0..3 {
            let mut cd = AlertCountdown::new();
            cd.start(3);
            for _ in 0..cancel_after {
                cd.tick();
            }
            assert!(cd.cancel());
            assert_eq!(cd.state(), CountdownState::Idle);
            for _ in 0..5 {
                assert!(!cd.tick());
            }
        }
    }

    #[test]
    fn test_fired_ignores_cancel() {
        let mut cd = AlertCountdown::new();
        cd.start(1);
        assert!(cd.tick());
        assert!(!cd.cancel());
        assert!(cd.is_fired());
        assert!(!cd.start(5));
    }

    #[test]
    fn test_cancel_idle_is_noop() {
        let mut cd = AlertCountdown::default();
        assert!(!cd.cancel());
        assert!(!cd.tick());
    }

    #[test]
    fn test_fire_now_skips_remaining_seconds() {
        let mut cd = AlertCountdown::new();
        assert!(!cd.fire_now());
        cd.start(3);
        cd.tick();
        assert!(cd.fire_now());
        assert!(cd.is_fired());
        assert!(!cd.fire_now());
        for _ in 0..5 {
            assert!(!cd.tick());
        }
    }
}
