//! Call lifecycle: controller, silence-driven hangup, session events.

pub mod controller;
pub mod silence;

use chrono::{DateTime, Local};

use crate::usage::{CostEstimate, UsageCounters};

pub use controller::{ActiveCall, SessionController};
pub use silence::SilenceDetector;

/// Lifecycle phase of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting,
    Active,
    Terminating,
    Closed,
}

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// End-of-call usage and cost figures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallSummary {
    pub usage: UsageCounters,
    pub cost: CostEstimate,
}

/// Local events surfaced to whoever is driving the call (CLI, UI, tests).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A finalized transcript line from either side of the conversation.
    Transcript { role: Role, text: String, at: DateTime<Local> },
    /// A system notice (settings applied, hanging up, ...).
    Notice(String),
    /// The end-of-call summary; emitted exactly once per call.
    Summary(CallSummary),
    /// Negotiation failed; the controller is back at idle.
    Failed(String),
}
