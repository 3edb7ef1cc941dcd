//! Post-run counters for the human-readable summary and the step-time log.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use super::Step;
use crate::reservoir::ReagentUsage;
use crate::tips::TipUsage;
use crate::transfer::TransferStats;

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    /// Step ordinal
    pub ordinal: u32,
    /// Step description
    pub description: String,
    /// False for disabled steps
    pub executed: bool,
    /// Configured wait, even when the step was skipped
    pub wait_time: Option<Duration>,
    /// Wall-clock time, `None` for skipped steps
    pub elapsed: Option<Duration>,
}

impl StepRecord {
    /// Snapshot a step after the run
    pub fn from_step(step: &Step) -> Self {
        Self {
            ordinal: step.ordinal,
            description: step.description.clone(),
            executed: step.enabled,
            wait_time: step.wait_time,
            elapsed: step.elapsed,
        }
    }
}

/// Everything a finished run reports.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Unique id of this run
    pub run_id: Uuid,
    /// Local time the first step started
    pub started_at: DateTime<Local>,
    /// Local time the last step ended
    pub finished_at: DateTime<Local>,
    /// Total wall-clock time
    pub elapsed: Duration,
    /// Every step, skipped ones included
    pub steps: Vec<StepRecord>,
    /// Tip counters per mount
    pub tips: Vec<TipUsage>,
    /// Volume counters per reagent
    pub reagents: Vec<ReagentUsage>,
    /// Engine totals
    pub transfers: TransferStats,
}

impl RunSummary {
    /// Tips consumed across all mounts
    pub fn total_tips_consumed(&self) -> u32 {
        self.tips.iter().map(|t| t.total_consumed).sum()
    }

    /// Rack refills across all mounts
    pub fn total_refills(&self) -> u32 {
        self.tips.iter().map(|t| t.refills).sum()
    }

    /// Reagent volume drawn from all reservoirs, in uL
    pub fn total_volume_used(&self) -> f64 {
        self.reagents.iter().map(|r| r.volume_used).sum()
    }

    /// Steps that actually ran
    pub fn executed_steps(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| s.executed)
    }
}
