//! Built-in step bodies that need no transfer logic.

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use super::{RunContext, StepBody};
use crate::error::AppResult;

/// Incubation or rest period with no liquid handling.
pub struct Wait {
    message: String,
}

impl Wait {
    /// Wait showing `message` while the operator delay runs.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl StepBody for Wait {
    async fn execute(&mut self, ctx: &mut RunContext, wait_time: Option<Duration>) -> AppResult<()> {
        match wait_time {
            Some(duration) => ctx.operator().delay(duration, &self.message).await?,
            None => warn!(message = %self.message, "Wait step has no wait time configured"),
        }
        Ok(())
    }
}

/// Engage the magnet, then hold for the step's wait time.
pub struct EngageMagnet {
    height: f64,
}

impl EngageMagnet {
    /// Engage at `height` above the labware base
    pub fn new(height: f64) -> Self {
        Self { height }
    }
}

#[async_trait]
impl StepBody for EngageMagnet {
    async fn execute(&mut self, ctx: &mut RunContext, wait_time: Option<Duration>) -> AppResult<()> {
        ctx.magnet()?.engage(self.height).await?;
        if let Some(duration) = wait_time {
            ctx.operator()
                .delay(
                    duration,
                    &format!(
                        "Incubating ON magnet for {} seconds.",
                        duration.as_secs_f64()
                    ),
                )
                .await?;
        }
        Ok(())
    }
}

/// Lower the magnet, then hold for the step's wait time.
pub struct DisengageMagnet;

#[async_trait]
impl StepBody for DisengageMagnet {
    async fn execute(&mut self, ctx: &mut RunContext, wait_time: Option<Duration>) -> AppResult<()> {
        ctx.magnet()?.disengage().await?;
        if let Some(duration) = wait_time {
            ctx.operator()
                .delay(
                    duration,
                    &format!(
                        "Incubating OFF magnet for {} seconds.",
                        duration.as_secs_f64()
                    ),
                )
                .await?;
        }
        Ok(())
    }
}

/// Bring the temperature module to a set point.
pub struct SetTemperature {
    celsius: f64,
}

impl SetTemperature {
    /// Set point in degrees Celsius
    pub fn new(celsius: f64) -> Self {
        Self { celsius }
    }
}

#[async_trait]
impl StepBody for SetTemperature {
    async fn execute(&mut self, ctx: &mut RunContext, _wait_time: Option<Duration>) -> AppResult<()> {
        ctx.temperature()?.set_temperature(self.celsius).await?;
        ctx.comment(&format!("Temperature set to {} C", self.celsius));
        Ok(())
    }
}
