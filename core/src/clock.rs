//! Match clock: the driver's tick state machine.
//!
//! Idle -> Running(tick 0..=final_tick) -> Terminated. Terminated is
//! reached either after the final tick or directly on cancellation.

use crate::{
    error::{SimError, SimResult},
    types::{RunId, Tick},
};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DriverState {
    Idle,
    Running { tick: Tick },
    Terminated,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle            => f.write_str("idle"),
            Self::Running { tick } => write!(f, "running(tick={tick})"),
            Self::Terminated      => f.write_str("terminated"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchClock {
    pub run_id:  Option<RunId>,
    state:       DriverState,
    final_tick:  Tick,
}

impl MatchClock {
    pub fn new(final_tick: Tick) -> Self {
        Self {
            run_id: None,
            state: DriverState::Idle,
            final_tick,
        }
    }

    /// Idle -> Running at tick 0.
    pub fn start(&mut self, run_id: RunId) -> SimResult<Tick> {
        if self.state != DriverState::Idle {
            return Err(SimError::DriverNotIdle { state: self.state.to_string() });
        }
        self.run_id = Some(run_id);
        self.state = DriverState::Running { tick: 0 };
        Ok(0)
    }

    /// Advance one tick. Returns the new tick, or `None` once the final
    /// tick has been played (the clock is then Terminated).
    pub fn advance(&mut self) -> Option<Tick> {
        match self.state {
            DriverState::Running { tick } if tick < self.final_tick => {
                self.state = DriverState::Running { tick: tick + 1 };
                Some(tick + 1)
            }
            DriverState::Running { .. } => {
                self.state = DriverState::Terminated;
                None
            }
            DriverState::Idle | DriverState::Terminated => None,
        }
    }

    pub fn terminate(&mut self) {
        self.state = DriverState::Terminated;
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn current_tick(&self) -> Option<Tick> {
        match self.state {
            DriverState::Running { tick } => Some(tick),
            _ => None,
        }
    }

    pub fn final_tick(&self) -> Tick {
        self.final_tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_idle_running_terminated() {
        let mut clock = MatchClock::new(2);
        assert_eq!(clock.state(), DriverState::Idle);
        assert_eq!(clock.start(RunId::from_raw("20240101_090000")).unwrap(), 0);
        assert_eq!(clock.advance(), Some(1));
        assert_eq!(clock.advance(), Some(2));
        assert_eq!(clock.advance(), None);
        assert_eq!(clock.state(), DriverState::Terminated);
        assert_eq!(clock.advance(), None);
    }

    #[test]
    fn cannot_start_twice() {
        let mut clock = MatchClock::new(90);
        clock.start(RunId::from_raw("a")).unwrap();
        assert!(matches!(
            clock.start(RunId::from_raw("b")),
            Err(SimError::DriverNotIdle { .. })
        ));
    }

    #[test]
    fn terminate_from_running() {
        let mut clock = MatchClock::new(90);
        clock.start(RunId::from_raw("a")).unwrap();
        clock.advance();
        clock.terminate();
        assert_eq!(clock.current_tick(), None);
        assert_eq!(clock.state(), DriverState::Terminated);
    }
}
