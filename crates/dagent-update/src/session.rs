//! Update session state
//!
//! The finalization deadline is owned by an [`UpdateSession`] instead of
//! living in a global. All reads and writes go through one
//! `parking_lot::Mutex`, and the outstanding-update guard is evaluated in
//! the same lock scope that reserves the session, so two concurrent
//! updates cannot both pass it.
//!
//! # States
//!
//! ```text
//! Idle --begin_update--> Updating --arm--> Armed --begin_finalize--> Finalizing --complete--> Idle
//!                           |                 |                           |
//!                        (drop)           (expired)                    (drop)
//!                           v                 v                           v
//!                    prior state            Idle                        Armed
//! ```
//!
//! `Updating` keeps the deadline armed before the call (relaxed policy
//! re-trigger). A finalization arriving meanwhile is told to retry.

use crate::config::OutstandingUpdatePolicy;
use crate::error::UpdateError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Wall clock in Unix seconds
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current Unix time in seconds
    fn now_unix(&self) -> i64;
}

/// System wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Updating { prior: Option<i64> },
    Armed { deadline: i64 },
    Finalizing { deadline: i64 },
}

/// Snapshot of the session for callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// No update outstanding
    Idle,
    /// A `self_update` call is running
    Updating {
        /// Deadline armed before the call, still pending confirmation
        prior_deadline: Option<i64>,
    },
    /// Replacement running, waiting for confirmation
    Armed {
        /// Unix deadline
        deadline: i64,
        /// Whether the deadline has passed
        expired: bool,
    },
    /// Removal of the old container in flight
    Finalizing {
        /// Unix deadline being honoured
        deadline: i64,
    },
}

/// What `begin_finalize` found
#[derive(Debug)]
pub enum FinalizeDecision<'a> {
    /// Nothing armed
    Noop,
    /// A deadline is armed but a re-trigger holds the session
    Busy {
        /// The pending deadline
        deadline: i64,
    },
    /// Deadline passed; the session has been cleared
    Expired {
        /// The deadline that passed
        deadline: i64,
    },
    /// Deadline still ahead; removal may proceed
    InTime(FinalizeTicket<'a>),
}

/// Owned handover state with an injectable clock
#[derive(Debug)]
pub struct UpdateSession {
    state: Mutex<SessionState>,
    policy: OutstandingUpdatePolicy,
    clock: Arc<dyn Clock>,
}

impl UpdateSession {
    /// Create idle session
    #[must_use]
    pub fn new(policy: OutstandingUpdatePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
            policy,
            clock,
        }
    }

    /// Current Unix time from the session clock
    #[inline]
    #[must_use]
    pub fn now(&self) -> i64 {
        self.clock.now_unix()
    }

    /// Guard policy in force
    #[inline]
    #[must_use]
    pub fn policy(&self) -> OutstandingUpdatePolicy {
        self.policy
    }

    /// Snapshot of the session
    #[must_use]
    pub fn status(&self) -> UpdateStatus {
        match *self.state.lock() {
            SessionState::Idle => UpdateStatus::Idle,
            SessionState::Updating { prior } => UpdateStatus::Updating {
                prior_deadline: prior,
            },
            SessionState::Armed { deadline } => UpdateStatus::Armed {
                deadline,
                expired: self.now() > deadline,
            },
            SessionState::Finalizing { deadline } => UpdateStatus::Finalizing { deadline },
        }
    }

    /// Armed deadline, if any
    #[must_use]
    pub fn deadline(&self) -> Option<i64> {
        match *self.state.lock() {
            SessionState::Armed { deadline } | SessionState::Finalizing { deadline } => {
                Some(deadline)
            }
            SessionState::Updating { prior } => prior,
            SessionState::Idle => None,
        }
    }

    /// Check the outstanding-update guard and reserve the session
    ///
    /// # Errors
    /// `UpdateError::AlreadyInProgress` if another update or finalization
    /// is running, or an armed deadline blocks per the policy.
    pub fn begin_update(&self) -> Result<UpdateTicket<'_>, UpdateError> {
        let mut state = self.state.lock();
        let prior = match *state {
            SessionState::Idle => None,
            SessionState::Armed { deadline } => match self.policy {
                OutstandingUpdatePolicy::RejectWhileArmed => {
                    return Err(UpdateError::AlreadyInProgress)
                }
                OutstandingUpdatePolicy::RejectExpired if self.now() > deadline => {
                    return Err(UpdateError::AlreadyInProgress)
                }
                OutstandingUpdatePolicy::RejectExpired => Some(deadline),
            },
            SessionState::Updating { .. } | SessionState::Finalizing { .. } => {
                return Err(UpdateError::AlreadyInProgress)
            }
        };
        *state = SessionState::Updating { prior };

        Ok(UpdateTicket {
            session: self,
            prior,
            armed: false,
        })
    }

    /// Decide what a finalization should do and reserve the session
    pub fn begin_finalize(&self) -> FinalizeDecision<'_> {
        let mut state = self.state.lock();
        match *state {
            SessionState::Armed { deadline } if self.now() > deadline => {
                *state = SessionState::Idle;
                FinalizeDecision::Expired { deadline }
            }
            SessionState::Armed { deadline } => {
                *state = SessionState::Finalizing { deadline };
                FinalizeDecision::InTime(FinalizeTicket {
                    session: self,
                    deadline,
                    completed: false,
                })
            }
            SessionState::Updating {
                prior: Some(deadline),
            } => FinalizeDecision::Busy { deadline },
            SessionState::Idle
            | SessionState::Updating { prior: None }
            | SessionState::Finalizing { .. } => FinalizeDecision::Noop,
        }
    }

    fn set(&self, next: SessionState) {
        *self.state.lock() = next;
    }
}

/// Reservation held by a running `self_update`
///
/// Dropping it without [`arm`](Self::arm) restores the state the session
/// had before the call.
#[derive(Debug)]
pub struct UpdateTicket<'a> {
    session: &'a UpdateSession,
    prior: Option<i64>,
    armed: bool,
}

impl UpdateTicket<'_> {
    /// Deadline that was armed before this update, if any
    #[inline]
    #[must_use]
    pub fn prior_deadline(&self) -> Option<i64> {
        self.prior
    }

    /// Arm the finalization deadline `now + timeout_secs`
    pub fn arm(mut self, timeout_secs: u32) -> i64 {
        let deadline = self.session.now().saturating_add(i64::from(timeout_secs));
        self.session.set(SessionState::Armed { deadline });
        self.armed = true;
        deadline
    }
}

impl Drop for UpdateTicket<'_> {
    fn drop(&mut self) {
        if !self.armed {
            self.session.set(match self.prior {
                Some(deadline) => SessionState::Armed { deadline },
                None => SessionState::Idle,
            });
        }
    }
}

/// Reservation held while the old container is being removed
///
/// Dropping it without [`complete`](Self::complete) re-arms the deadline.
#[derive(Debug)]
pub struct FinalizeTicket<'a> {
    session: &'a UpdateSession,
    deadline: i64,
    completed: bool,
}

impl FinalizeTicket<'_> {
    /// Deadline being honoured
    #[inline]
    #[must_use]
    pub fn deadline(&self) -> i64 {
        self.deadline
    }

    /// Clear the session after a successful removal
    pub fn complete(mut self) {
        self.session.set(SessionState::Idle);
        self.completed = true;
    }
}

impl Drop for FinalizeTicket<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.session.set(SessionState::Armed {
                deadline: self.deadline,
            });
        }
    }
}
