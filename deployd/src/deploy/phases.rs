//! Phase tables for each pipeline kind

use crate::models::task::{TaskKind, TaskStatus};

/// A discrete, ordered step of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    // App deployment
    Clone,
    Build,
    StopPrevious,
    Deploy,
    ConfigureProxy,
    Finalize,

    // Database provisioning
    Prepare,
    PullImage,
    CreateContainer,
    StartContainer,
    WaitReady,
    Verify,
}

/// Static description of a phase: its step name, label, status and the
/// overall progress range it covers.
///
/// Ranges describe pipeline position, not elapsed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSpec {
    pub phase: Phase,
    pub name: &'static str,
    pub label: &'static str,
    pub status: TaskStatus,
    pub start: u8,
    pub end: u8,
}

impl PhaseSpec {
    /// Overall progress when this phase is `percent` done
    pub fn progress_at(&self, percent: u8) -> u8 {
        let percent = u32::from(percent.min(100));
        let span = u32::from(self.end - self.start);
        self.start + (span * percent / 100) as u8
    }
}

pub const APP_PHASES: &[PhaseSpec] = &[
    PhaseSpec {
        phase: Phase::Clone,
        name: "clone",
        label: "Cloning repository",
        status: TaskStatus::Cloning,
        start: 5,
        end: 20,
    },
    PhaseSpec {
        phase: Phase::Build,
        name: "build",
        label: "Building image",
        status: TaskStatus::Building,
        start: 20,
        end: 70,
    },
    PhaseSpec {
        phase: Phase::StopPrevious,
        name: "stop-previous",
        label: "Stopping previous container",
        status: TaskStatus::Deploying,
        start: 70,
        end: 75,
    },
    PhaseSpec {
        phase: Phase::Deploy,
        name: "deploy",
        label: "Creating and starting container",
        status: TaskStatus::Deploying,
        start: 75,
        end: 90,
    },
    PhaseSpec {
        phase: Phase::ConfigureProxy,
        name: "proxy",
        label: "Configuring reverse proxy",
        status: TaskStatus::Deploying,
        start: 90,
        end: 95,
    },
    PhaseSpec {
        phase: Phase::Finalize,
        name: "finalize",
        label: "Finalizing deployment",
        status: TaskStatus::Deploying,
        start: 95,
        end: 100,
    },
];

pub const DATABASE_PHASES: &[PhaseSpec] = &[
    PhaseSpec {
        phase: Phase::Prepare,
        name: "prepare",
        label: "Preparing",
        status: TaskStatus::Pending,
        start: 0,
        end: 10,
    },
    PhaseSpec {
        phase: Phase::PullImage,
        name: "pull",
        label: "Pulling image",
        status: TaskStatus::Pulling,
        start: 10,
        end: 30,
    },
    PhaseSpec {
        phase: Phase::CreateContainer,
        name: "create",
        label: "Creating container",
        status: TaskStatus::Creating,
        start: 30,
        end: 45,
    },
    PhaseSpec {
        phase: Phase::StartContainer,
        name: "start",
        label: "Starting container",
        status: TaskStatus::Starting,
        start: 45,
        end: 55,
    },
    PhaseSpec {
        phase: Phase::WaitReady,
        name: "wait",
        label: "Waiting for database to accept connections",
        status: TaskStatus::Waiting,
        start: 55,
        end: 90,
    },
    PhaseSpec {
        phase: Phase::Verify,
        name: "verify",
        label: "Verifying and registering server",
        status: TaskStatus::Verifying,
        start: 90,
        end: 100,
    },
];

pub fn phases_for(kind: TaskKind) -> &'static [PhaseSpec] {
    match kind {
        TaskKind::App => APP_PHASES,
        TaskKind::Database => DATABASE_PHASES,
    }
}
