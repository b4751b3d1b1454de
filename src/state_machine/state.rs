use std::fmt;

use serde::{Deserialize, Serialize};

/// Where the coordinator is in the lifecycle of the current job.
///
/// Jobs flow: IDLE → STARTING → EXECUTING → REPORTING → IDLE.
/// DISCONNECTING is terminal and reachable from every phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    Starting,
    Executing,
    Reporting,
    Disconnecting,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "IDLE"),
            Phase::Starting => write!(f, "STARTING"),
            Phase::Executing => write!(f, "EXECUTING"),
            Phase::Reporting => write!(f, "REPORTING"),
            Phase::Disconnecting => write!(f, "DISCONNECTING"),
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A next-job-changed event arrived.
    JobChanged { has_job: bool },
    /// Explicit attempt to start the next job.
    RequestStart,
    /// The job queue accepted a start-next request.
    StartAccepted { has_job: bool },
    /// The work executor returned for the current job.
    WorkFinished,
    /// The job queue accepted the status update.
    UpdateAccepted,
    /// A fatal error or an explicit stop.
    Shutdown,
}

/// Side effect the caller must perform after a transition, outside the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    /// Publish a start-next request.
    RequestStart,
    /// Hand the accepted job to the work executor.
    Execute,
    /// Publish the terminal status of the job.
    Report,
    /// Disconnect the transport and finish.
    Disconnect,
}

/// Mutable state of the coordinator, kept behind a single lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorState {
    phase: Phase,
    next_waiting: bool,
    received_initial_listing: bool,
}

impl Default for CoordinatorState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            next_waiting: false,
            received_initial_listing: false,
        }
    }
}

impl CoordinatorState {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// True from the start-next request until the job is done.
    pub fn is_executing(&self) -> bool {
        matches!(
            self.phase,
            Phase::Starting | Phase::Executing | Phase::Reporting
        )
    }

    pub fn disconnect_requested(&self) -> bool {
        self.phase == Phase::Disconnecting
    }

    /// A job change arrived while busy; one more start attempt is owed.
    pub fn is_next_waiting(&self) -> bool {
        self.next_waiting
    }

    pub fn has_received_initial_listing(&self) -> bool {
        self.received_initial_listing
    }

    pub fn mark_initial_listing(&mut self) {
        self.received_initial_listing = true;
    }

    /// Apply `trigger` and return the side effect it calls for.
    ///
    /// Triggers that do not fit the current phase (duplicates, responses
    /// arriving out of order, anything after disconnect) leave the state
    /// untouched and return [`Action::None`].
    pub fn transition(&mut self, trigger: Trigger) -> Action {
        match (self.phase, trigger) {
            (Phase::Disconnecting, _) => Action::None,
            (_, Trigger::Shutdown) => {
                self.phase = Phase::Disconnecting;
                Action::Disconnect
            }

            (Phase::Idle, Trigger::JobChanged { has_job: true })
            | (Phase::Idle, Trigger::RequestStart) => self.begin_start(),
            (_, Trigger::JobChanged { has_job: true }) => {
                // Coalesced: any number of changes while busy owe one retry.
                self.next_waiting = true;
                Action::None
            }
            (_, Trigger::JobChanged { has_job: false }) => Action::None,
            (_, Trigger::RequestStart) => Action::None,

            (Phase::Starting, Trigger::StartAccepted { has_job: true }) => {
                self.phase = Phase::Executing;
                Action::Execute
            }
            (Phase::Starting, Trigger::StartAccepted { has_job: false }) => self.finish_job(),
            (Phase::Executing, Trigger::WorkFinished) => {
                self.phase = Phase::Reporting;
                Action::Report
            }
            (Phase::Reporting, Trigger::UpdateAccepted) => self.finish_job(),

            _ => Action::None,
        }
    }

    fn begin_start(&mut self) -> Action {
        self.phase = Phase::Starting;
        self.next_waiting = false;
        Action::RequestStart
    }

    fn finish_job(&mut self) -> Action {
        self.phase = Phase::Idle;
        if std::mem::take(&mut self.next_waiting) {
            self.begin_start()
        } else {
            Action::None
        }
    }
}
