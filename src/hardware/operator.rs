//! Operator gate implementations.
//!
//! A pause is a cooperative blocking call: the run stops at the call site until a
//! resume signal arrives. Two implementations are provided:
//!
//! - [`ChannelOperator`] forwards each pause as a [`PauseRequest`] over an mpsc
//!   channel and waits on a oneshot for the controller to resume it.
//! - [`ConsoleOperator`] prints the pause message and waits for Enter on stdin.
//!
//! Both skip real sleeping for delays when `simulate` is set, so a full protocol
//! can be dry-run in seconds.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use super::Operator;

/// A pending operator pause; the run stays blocked until [`PauseRequest::resume`].
#[derive(Debug)]
pub struct PauseRequest {
    /// Text shown to the operator
    pub message: String,
    resume: oneshot::Sender<()>,
}

impl PauseRequest {
    /// Release the blocked run
    pub fn resume(self) {
        // The run side may already be gone if it was aborted; nothing to resume then.
        let _ = self.resume.send(());
    }
}

/// Operator that hands pauses to a controller over a channel.
pub struct ChannelOperator {
    requests: mpsc::Sender<PauseRequest>,
    simulate: bool,
}

impl ChannelOperator {
    /// Create the operator and the receiving end the controller listens on.
    pub fn new(capacity: usize, simulate: bool) -> (Self, mpsc::Receiver<PauseRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                requests: tx,
                simulate,
            },
            rx,
        )
    }
}

#[async_trait]
impl Operator for ChannelOperator {
    fn comment(&self, message: &str) {
        info!(target: "run_log", "{}", message);
    }

    async fn pause(&self, message: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let request = PauseRequest {
            message: message.to_string(),
            resume: tx,
        };
        warn!(message, "Run paused, waiting for operator");
        self.requests
            .send(request)
            .await
            .map_err(|_| anyhow!("Operator gate closed before pause could be delivered"))?;
        rx.await
            .map_err(|_| anyhow!("Operator gate closed while waiting for resume"))?;
        info!("Run resumed by operator");
        Ok(())
    }

    async fn delay(&self, duration: Duration, message: &str) -> Result<()> {
        info!(seconds = duration.as_secs_f64(), "{}", message);
        if !self.simulate {
            tokio::time::sleep(duration).await;
        }
        Ok(())
    }
}

/// Operator for interactive terminal runs.
pub struct ConsoleOperator {
    simulate: bool,
    auto_resume: bool,
}

impl ConsoleOperator {
    /// `simulate` skips delays. `auto_resume` resumes pauses without waiting for Enter.
    pub fn new(simulate: bool, auto_resume: bool) -> Self {
        Self {
            simulate,
            auto_resume,
        }
    }
}

#[async_trait]
impl Operator for ConsoleOperator {
    fn comment(&self, message: &str) {
        println!("{}", message);
    }

    async fn pause(&self, message: &str) -> Result<()> {
        println!("PAUSED: {}", message);
        if self.auto_resume {
            info!(message, "Pause auto-resumed");
            return Ok(());
        }
        println!("Press Enter to resume...");
        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .context("Failed to read resume confirmation from stdin")?;
        Ok(())
    }

    async fn delay(&self, duration: Duration, message: &str) -> Result<()> {
        println!("{}", message);
        if !self.simulate {
            tokio::time::sleep(duration).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_pause_blocks_until_resumed() {
        let (operator, mut requests) = ChannelOperator::new(1, true);
        let resumed = Arc::new(AtomicBool::new(false));

        let flag = resumed.clone();
        let controller = tokio::spawn(async move {
            let request = requests.recv().await.unwrap();
            assert_eq!(request.message, "Replace 300 uL tipracks");
            flag.store(true, Ordering::SeqCst);
            request.resume();
        });

        operator.pause("Replace 300 uL tipracks").await.unwrap();
        assert!(resumed.load(Ordering::SeqCst));
        controller.await.unwrap();
    }

    #[tokio::test]
    async fn test_pause_fails_when_controller_dropped() {
        let (operator, requests) = ChannelOperator::new(1, true);
        drop(requests);
        assert!(operator.pause("nobody listening").await.is_err());
    }

    #[tokio::test]
    async fn test_dropped_request_fails_pause() {
        let (operator, mut requests) = ChannelOperator::new(1, true);
        tokio::spawn(async move {
            let request = requests.recv().await.unwrap();
            drop(request);
        });
        assert!(operator.pause("abandoned").await.is_err());
    }

    #[tokio::test]
    async fn test_simulated_delay_returns_immediately() {
        let (operator, _requests) = ChannelOperator::new(1, true);
        let started = std::time::Instant::now();
        operator
            .delay(Duration::from_secs(600), "Incubating")
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
