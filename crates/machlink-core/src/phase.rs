//! Bring-up phase state machine
//!
//! Phases are a backend-specific ordered enum. The machine only moves
//! forward one phase per successful step; any failure sends it back to the
//! initial phase. Running the steps themselves is the provider's job, this
//! module holds the transition rules.

use parking_lot::Mutex;
use std::fmt::{Debug, Display};
use tokio::sync::watch;

/// Ordered bring-up phases of one backend.
///
/// `ALL` lists every phase in order, initial first and terminal last.
pub trait ConnectionPhase: Copy + Eq + Debug + Display + Send + Sync + 'static {
    /// Every phase in bring-up order
    const ALL: &'static [Self];

    /// First phase that needs an open transport; polling starts here
    const INITIALIZING: Self;

    /// Position in [`Self::ALL`]
    fn index(self) -> usize {
        Self::ALL.iter().position(|p| *p == self).unwrap_or(0)
    }

    /// Initial phase
    fn initial() -> Self {
        Self::ALL[0]
    }

    /// Terminal phase
    fn terminal() -> Self {
        Self::ALL[Self::ALL.len() - 1]
    }

    /// The following phase; the terminal phase is its own successor
    fn next(self) -> Self {
        Self::ALL.get(self.index() + 1).copied().unwrap_or(self)
    }

    /// Whether bring-up is complete
    fn is_terminal(self) -> bool {
        self == Self::terminal()
    }

    /// Whether the transport or session is still being opened
    fn is_connecting(self) -> bool {
        self.index() < Self::INITIALIZING.index()
    }

    /// Whether the machine is being brought to an operational state
    fn is_initializing(self) -> bool {
        !self.is_connecting() && !self.is_terminal()
    }

    /// Phase index normalized to `0.0..=1.0`
    fn progress(self) -> f64 {
        let last = Self::ALL.len().saturating_sub(1);
        if last == 0 {
            1.0
        } else {
            self.index() as f64 / last as f64
        }
    }
}

/// Result of one bring-up step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The phase's work is done; move on
    Advance,
    /// Not ready yet; try again next tick without counting a failure
    Wait,
    /// Soft failure; try again next tick, counting against the budget
    Retry(String),
    /// Hard failure; go back to the initial phase
    Restart(String),
}

/// How many soft failures a phase tolerates before a restart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive retries allowed in one phase
    pub max_retries_per_phase: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries_per_phase: 40,
        }
    }
}

/// What a step did to the machine
#[derive(Debug, Clone, PartialEq)]
pub enum Transition<P> {
    /// Moved forward
    Advanced {
        /// Phase that completed
        from: P,
        /// New phase
        to: P,
    },
    /// Stayed in the same phase
    Stayed(P),
    /// Went back to the initial phase
    Restarted {
        /// Phase that failed
        from: P,
        /// Why
        reason: String,
    },
    /// Already terminal and still alive; nothing to do
    Idle,
}

/// Current phase plus the retry counter
pub struct PhaseMachine<P: ConnectionPhase> {
    phase: watch::Sender<P>,
    retries: Mutex<u32>,
    policy: RetryPolicy,
}

impl<P: ConnectionPhase> PhaseMachine<P> {
    /// A machine at the initial phase
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            phase: watch::channel(P::initial()).0,
            retries: Mutex::new(0),
            policy,
        }
    }

    /// Current phase
    pub fn current(&self) -> P {
        *self.phase.borrow()
    }

    /// Phase changes
    pub fn subscribe(&self) -> watch::Receiver<P> {
        self.phase.subscribe()
    }

    /// Jump to `phase` and clear the retry counter
    pub fn reset_to(&self, phase: P) {
        *self.retries.lock() = 0;
        self.phase.send_replace(phase);
    }

    /// Back to the initial phase
    pub fn reset(&self) {
        self.reset_to(P::initial());
    }

    /// Apply the result of a step taken at `at`.
    ///
    /// An `Err` is a fault and always restarts, the terminal phase included.
    /// A result for a phase that is no longer current (the machine was reset
    /// meanwhile) is ignored.
    pub fn apply(&self, at: P, result: Result<StepOutcome, String>) -> Transition<P> {
        let current = self.current();
        if current != at {
            return Transition::Stayed(current);
        }
        if current.is_terminal() {
            return match result {
                Err(reason) | Ok(StepOutcome::Restart(reason)) => {
                    self.reset();
                    Transition::Restarted {
                        from: current,
                        reason,
                    }
                }
                Ok(_) => Transition::Idle,
            };
        }

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(reason) => StepOutcome::Restart(reason),
        };

        match outcome {
            StepOutcome::Advance => {
                let to = current.next();
                self.reset_to(to);
                Transition::Advanced { from: current, to }
            }
            StepOutcome::Wait => Transition::Stayed(current),
            StepOutcome::Retry(reason) => {
                let mut retries = self.retries.lock();
                *retries += 1;
                if *retries > self.policy.max_retries_per_phase {
                    drop(retries);
                    self.reset();
                    Transition::Restarted {
                        from: current,
                        reason: format!("retry budget exhausted: {}", reason),
                    }
                } else {
                    Transition::Stayed(current)
                }
            }
            StepOutcome::Restart(reason) => {
                self.reset();
                Transition::Restarted {
                    from: current,
                    reason,
                }
            }
        }
    }
}
