//! Sequential step execution.
//!
//! A protocol run is an ordered list of [`Step`]s. The [`StepSequencer`] runs
//! them one at a time in ordinal order against a single [`RunContext`]:
//!
//! - disabled steps are skipped without side effects and without timing
//! - every enabled step is timed and its elapsed time stored on the step
//! - the first error halts the run; there is no retry or skip-ahead
//!
//! The only recoverable condition, tip exhaustion, is handled inside the
//! [`crate::tips::TipInventory`] and never reaches the sequencer.
//!
//! # Example
//!
//! ```rust,ignore
//! let steps = vec![
//!     Step::new(1, "Transfer lysis", lysis_transfer),
//!     Step::new(2, "Incubate", Wait::new("Binding beads")).wait(Duration::from_secs(300)),
//!     Step::new(3, "Magnet ON", EngageMagnet::new(7.0)).enabled(false),
//! ];
//! let summary = StepSequencer::new(ctx).run(&mut steps).await?;
//! ```

pub mod actions;
pub mod context;
pub mod summary;

pub use actions::{DisengageMagnet, EngageMagnet, SetTemperature, Wait};
pub use context::{Reservoirs, RunContext};
pub use summary::{RunSummary, StepRecord};

use async_trait::async_trait;
use chrono::Local;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::error::{AppResult, HandlerError};

const BANNER: &str = "###############################################";

/// Future returned by closure step bodies.
pub type StepFuture<'a> = Pin<Box<dyn Future<Output = AppResult<()>> + Send + 'a>>;

/// Work performed by one step.
#[async_trait]
pub trait StepBody: Send {
    /// Run the step; `wait_time` is the step's configured incubation time.
    async fn execute(&mut self, ctx: &mut RunContext, wait_time: Option<Duration>) -> AppResult<()>;
}

/// Adapter turning a closure into a [`StepBody`].
pub struct FnStep<F>(F);

#[async_trait]
impl<F> StepBody for FnStep<F>
where
    F: for<'a> FnMut(&'a mut RunContext) -> StepFuture<'a> + Send,
{
    async fn execute(&mut self, ctx: &mut RunContext, _wait_time: Option<Duration>) -> AppResult<()> {
        (self.0)(ctx).await
    }
}

/// One named unit of protocol work.
pub struct Step {
    /// 1-based position, checked against the run order
    pub ordinal: u32,
    /// Shown in the run log and the step-time report
    pub description: String,
    /// Disabled steps are recorded but never executed
    pub enabled: bool,
    /// Handed to the body, which decides how to honour it
    pub wait_time: Option<Duration>,
    /// Set after the step ran
    pub elapsed: Option<Duration>,
    body: Box<dyn StepBody>,
}

impl Step {
    /// Enabled step with no wait time.
    pub fn new(ordinal: u32, description: impl Into<String>, body: impl StepBody + 'static) -> Self {
        Self::boxed(ordinal, description, Box::new(body))
    }

    fn boxed(ordinal: u32, description: impl Into<String>, body: Box<dyn StepBody>) -> Self {
        Self {
            ordinal,
            description: description.into(),
            enabled: true,
            wait_time: None,
            elapsed: None,
            body,
        }
    }

    /// Step whose body is an async closure over the run context.
    pub fn from_fn<F>(ordinal: u32, description: impl Into<String>, body: F) -> Self
    where
        F: for<'a> FnMut(&'a mut RunContext) -> StepFuture<'a> + Send + 'static,
    {
        Self::new(ordinal, description, FnStep(body))
    }

    /// Enable or disable the step
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Attach a wait time
    pub fn wait(mut self, wait_time: Duration) -> Self {
        self.wait_time = Some(wait_time);
        self
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("ordinal", &self.ordinal)
            .field("description", &self.description)
            .field("enabled", &self.enabled)
            .field("wait_time", &self.wait_time)
            .field("elapsed", &self.elapsed)
            .finish_non_exhaustive()
    }
}

/// Runs steps strictly in sequence against one owned context.
pub struct StepSequencer {
    ctx: RunContext,
}

impl StepSequencer {
    /// Sequencer owning `ctx` for the whole run.
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }

    /// Give the context back, for inspection after a run
    pub fn into_context(self) -> RunContext {
        self.ctx
    }

    fn check_order(steps: &[Step]) -> AppResult<()> {
        for pair in steps.windows(2) {
            if pair[1].ordinal <= pair[0].ordinal {
                return Err(HandlerError::StepOrder {
                    ordinal: pair[1].ordinal,
                    previous: pair[0].ordinal,
                });
            }
        }
        Ok(())
    }

    /// Run every step in order and summarise the run.
    ///
    /// # Errors
    ///
    /// `StepOrder` if ordinals are not strictly increasing (nothing runs), or
    /// the first error returned by a step body (later steps do not run).
    pub async fn run(&mut self, steps: &mut [Step]) -> AppResult<RunSummary> {
        Self::check_order(steps)?;

        let run_id = Uuid::new_v4();
        let started_at = Local::now();
        let run_start = Instant::now();
        let mut records = Vec::with_capacity(steps.len());
        info!(%run_id, steps = steps.len(), "Protocol run started");

        for step in steps.iter_mut() {
            if !step.enabled {
                info!(step = step.ordinal, description = %step.description, "Step disabled, skipping");
                records.push(StepRecord::from_step(step));
                continue;
            }

            self.ctx.comment(BANNER);
            self.ctx
                .comment(&format!("Step {}: {}", step.ordinal, step.description));
            self.ctx.comment(BANNER);

            let span = info_span!("step", ordinal = step.ordinal);
            let start = Instant::now();
            let result = step
                .body
                .execute(&mut self.ctx, step.wait_time)
                .instrument(span)
                .await;

            if let Err(err) = result {
                error!(step = step.ordinal, description = %step.description, %err, "Step failed, halting run");
                return Err(err);
            }

            let elapsed = start.elapsed();
            step.elapsed = Some(elapsed);
            records.push(StepRecord::from_step(step));

            self.ctx.comment(&format!(
                "Step {}: {} took {:.1} s",
                step.ordinal,
                step.description,
                elapsed.as_secs_f64()
            ));
            self.ctx.comment(&format!(
                "Used tips in total: {}",
                self.ctx.tips.total_consumed()
            ));
            info!(step = step.ordinal, elapsed_secs = elapsed.as_secs_f64(), "Step finished");
        }

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Local::now(),
            elapsed: run_start.elapsed(),
            steps: records,
            tips: self.ctx.tips.usage(),
            reagents: self.ctx.reservoirs.usage(),
            transfers: self.ctx.engine.stats(),
        };
        info!(
            %run_id,
            tips = summary.total_tips_consumed(),
            refills = summary.total_refills(),
            volume = summary.total_volume_used(),
            "Protocol run finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{MockMagnet, RecordingOperator};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_out_of_order_steps_rejected() {
        let operator = Arc::new(RecordingOperator::new());
        let mut sequencer = StepSequencer::new(RunContext::new(operator.clone()));
        let mut steps = vec![
            Step::new(2, "second", Wait::new("b")),
            Step::new(1, "first", Wait::new("a")),
        ];
        let err = sequencer.run(&mut steps).await.unwrap_err();
        assert!(matches!(err, HandlerError::StepOrder { ordinal: 1, previous: 2 }));
        assert!(operator.comments().is_empty());
    }

    #[tokio::test]
    async fn test_closure_step_and_timing() {
        let operator = Arc::new(RecordingOperator::new());
        let mut sequencer = StepSequencer::new(RunContext::new(operator.clone()));
        let mut steps = vec![
            Step::from_fn(1, "say hello", |ctx| {
                Box::pin(async move {
                    ctx.comment("hello from step");
                    Ok(())
                })
            }),
            Step::new(2, "rest", Wait::new("resting")).wait(Duration::from_secs(60)),
        ];

        let summary = sequencer.run(&mut steps).await.unwrap();
        assert!(steps.iter().all(|s| s.elapsed.is_some()));
        assert_eq!(summary.steps.len(), 2);
        assert!(operator.comments().iter().any(|c| c == "hello from step"));
        assert!(operator.comments().iter().any(|c| c == "Step 2: rest"));
        assert_eq!(operator.delays(), vec![Duration::from_secs(60)]);
    }

    #[tokio::test]
    async fn test_failure_halts_run() {
        let operator = Arc::new(RecordingOperator::new());
        let magnet = Arc::new(MockMagnet::new());
        let ctx = RunContext::new(operator.clone()).with_magnet(magnet.clone());
        let mut sequencer = StepSequencer::new(ctx);
        let mut steps = vec![
            Step::new(1, "set temperature", SetTemperature::new(4.0)),
            Step::new(2, "magnet on", EngageMagnet::new(7.0)),
        ];

        let err = sequencer.run(&mut steps).await.unwrap_err();
        assert!(matches!(err, HandlerError::ModuleNotLoaded("temperature")));
        assert!(steps[0].elapsed.is_none());
        assert!(magnet.history().is_empty());
    }

    #[tokio::test]
    async fn test_magnet_steps() {
        let operator = Arc::new(RecordingOperator::new());
        let magnet = Arc::new(MockMagnet::new());
        let ctx = RunContext::new(operator.clone()).with_magnet(magnet.clone());
        let mut sequencer = StepSequencer::new(ctx);
        let mut steps = vec![
            Step::new(1, "magnet on", EngageMagnet::new(7.0)).wait(Duration::from_secs(600)),
            Step::new(2, "magnet off", DisengageMagnet),
        ];
        sequencer.run(&mut steps).await.unwrap();
        assert_eq!(magnet.history(), vec![Some(7.0), None]);
        assert_eq!(operator.delays(), vec![Duration::from_secs(600)]);
    }
}
