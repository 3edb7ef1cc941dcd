//! Mock Hardware Implementations
//!
//! Provides simulated devices for testing and dry runs without a robot.
//! Every mock records the calls it receives so tests can assert on the exact
//! actuation sequence the core produced.
//!
//! # Available Mocks
//!
//! - `MockPipette` - Records actuation calls and tracks tip/liquid state
//! - `MockMagnet` - Tracks engage/disengage state
//! - `MockTemperature` - Tracks the last set point
//! - `RecordingOperator` - Records comments, pauses and delays; resumes instantly

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use super::{Location, MagneticModule, Mount, Operator, Pipette, TemperatureModule};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// MockPipette - Simulated Pipette
// =============================================================================

/// One actuation call received by a [`MockPipette`].
#[derive(Debug, Clone, PartialEq)]
pub enum PipetteAction {
    /// `pick_up_tip`
    PickUpTip,
    /// `drop_tip`
    DropTip,
    /// `return_tip`
    ReturnTip,
    /// `reset_tipracks`
    ResetTipracks,
    /// `aspirate`
    Aspirate {
        /// Volume in uL
        volume: f64,
        /// Where the liquid was drawn
        location: Location,
        /// Flow rate multiplier
        rate: f64,
    },
    /// `dispense`
    Dispense {
        /// Volume in uL
        volume: f64,
        /// Where the liquid went
        location: Location,
        /// Flow rate multiplier
        rate: f64,
    },
    /// `move_to`
    MoveTo {
        /// Destination
        location: Location,
    },
    /// `air_gap`
    AirGap {
        /// Air volume in uL
        volume: f64,
        /// Height above the well top
        height: f64,
    },
    /// `blow_out`
    BlowOut {
        /// Where the tip was emptied
        location: Location,
    },
    /// `touch_tip`
    TouchTip {
        /// Wipe speed
        speed: f64,
        /// Vertical offset from the well top
        v_offset: f64,
        /// Fraction of the well radius
        radius: f64,
    },
}

#[derive(Debug, Default)]
struct PipetteState {
    actions: Vec<PipetteAction>,
    has_tip: bool,
    loaded: f64,
    tips_picked: u32,
}

/// Mock pipette with tip and liquid bookkeeping
///
/// Behaves like a real driver for the failure modes the core cares about:
/// - liquid handling without a tip fails
/// - picking up a second tip fails
/// - loading more than `max_volume` into the tip fails
///
/// # Example
///
/// ```rust,ignore
/// let p300 = Arc::new(MockPipette::multichannel(Mount::Right, 300.0));
/// p300.pick_up_tip().await?;
/// p300.aspirate(150.0, &well.bottom(1.0), 1.0).await?;
/// assert_eq!(p300.loaded_volume(), 150.0);
/// ```
pub struct MockPipette {
    mount: Mount,
    channels: u32,
    max_volume: f64,
    min_volume: f64,
    state: Mutex<PipetteState>,
}

impl MockPipette {
    /// Pipette with explicit channel count and volume range.
    pub fn new(mount: Mount, channels: u32, max_volume: f64, min_volume: f64) -> Self {
        Self {
            mount,
            channels,
            max_volume,
            min_volume,
            state: Mutex::new(PipetteState::default()),
        }
    }

    /// 8-channel pipette with a 20 uL minimum volume (p300 multi style)
    pub fn multichannel(mount: Mount, max_volume: f64) -> Self {
        Self::new(mount, 8, max_volume, 20.0)
    }

    /// Single-channel pipette with a minimum of 1/10 of the max volume
    pub fn single_channel(mount: Mount, max_volume: f64) -> Self {
        Self::new(mount, 1, max_volume, max_volume / 10.0)
    }

    /// Every call received so far, in order
    pub fn actions(&self) -> Vec<PipetteAction> {
        locked(&self.state).actions.clone()
    }

    /// Volumes of every dispense call, in order
    pub fn dispensed_volumes(&self) -> Vec<f64> {
        locked(&self.state)
            .actions
            .iter()
            .filter_map(|a| match a {
                PipetteAction::Dispense { volume, .. } => Some(*volume),
                _ => None,
            })
            .collect()
    }

    /// Volumes of every aspirate call, in order
    pub fn aspirated_volumes(&self) -> Vec<f64> {
        locked(&self.state)
            .actions
            .iter()
            .filter_map(|a| match a {
                PipetteAction::Aspirate { volume, .. } => Some(*volume),
                _ => None,
            })
            .collect()
    }

    /// Liquid plus air currently held in the tip
    pub fn loaded_volume(&self) -> f64 {
        locked(&self.state).loaded
    }

    /// Whether a tip is attached
    pub fn has_tip(&self) -> bool {
        locked(&self.state).has_tip
    }

    /// Number of successful tip pick-ups
    pub fn tips_picked(&self) -> u32 {
        locked(&self.state).tips_picked
    }

    fn load(&self, state: &mut PipetteState, volume: f64) -> Result<()> {
        if !state.has_tip {
            bail!("MockPipette ({}): cannot aspirate without a tip", self.mount);
        }
        if state.loaded + volume > self.max_volume + f64::EPSILON {
            bail!(
                "MockPipette ({}): {:.2} uL would exceed tip capacity {:.2} uL",
                self.mount,
                state.loaded + volume,
                self.max_volume
            );
        }
        state.loaded += volume;
        Ok(())
    }
}

#[async_trait]
impl Pipette for MockPipette {
    fn mount(&self) -> Mount {
        self.mount
    }

    fn channels(&self) -> u32 {
        self.channels
    }

    fn max_volume(&self) -> f64 {
        self.max_volume
    }

    fn min_volume(&self) -> f64 {
        self.min_volume
    }

    async fn pick_up_tip(&self) -> Result<()> {
        let mut state = locked(&self.state);
        if state.has_tip {
            bail!("MockPipette ({}): tip already attached", self.mount);
        }
        state.has_tip = true;
        state.tips_picked += 1;
        state.actions.push(PipetteAction::PickUpTip);
        Ok(())
    }

    async fn drop_tip(&self) -> Result<()> {
        let mut state = locked(&self.state);
        if !state.has_tip {
            bail!("MockPipette ({}): no tip to drop", self.mount);
        }
        state.has_tip = false;
        state.loaded = 0.0;
        state.actions.push(PipetteAction::DropTip);
        Ok(())
    }

    async fn return_tip(&self) -> Result<()> {
        let mut state = locked(&self.state);
        if !state.has_tip {
            bail!("MockPipette ({}): no tip to return", self.mount);
        }
        state.has_tip = false;
        state.loaded = 0.0;
        state.actions.push(PipetteAction::ReturnTip);
        Ok(())
    }

    async fn reset_tipracks(&self) -> Result<()> {
        locked(&self.state).actions.push(PipetteAction::ResetTipracks);
        Ok(())
    }

    async fn aspirate(&self, volume: f64, location: &Location, rate: f64) -> Result<()> {
        let mut state = locked(&self.state);
        self.load(&mut state, volume)?;
        debug!(mount = %self.mount, volume, well = %location.well, z = location.z, "mock aspirate");
        state.actions.push(PipetteAction::Aspirate {
            volume,
            location: location.clone(),
            rate,
        });
        Ok(())
    }

    async fn dispense(&self, volume: f64, location: &Location, rate: f64) -> Result<()> {
        let mut state = locked(&self.state);
        if !state.has_tip {
            bail!("MockPipette ({}): cannot dispense without a tip", self.mount);
        }
        state.loaded = (state.loaded - volume).max(0.0);
        debug!(mount = %self.mount, volume, well = %location.well, z = location.z, "mock dispense");
        state.actions.push(PipetteAction::Dispense {
            volume,
            location: location.clone(),
            rate,
        });
        Ok(())
    }

    async fn move_to(&self, location: &Location) -> Result<()> {
        locked(&self.state).actions.push(PipetteAction::MoveTo {
            location: location.clone(),
        });
        Ok(())
    }

    async fn air_gap(&self, volume: f64, height: f64) -> Result<()> {
        let mut state = locked(&self.state);
        self.load(&mut state, volume)?;
        state.actions.push(PipetteAction::AirGap { volume, height });
        Ok(())
    }

    async fn blow_out(&self, location: &Location) -> Result<()> {
        let mut state = locked(&self.state);
        state.loaded = 0.0;
        state.actions.push(PipetteAction::BlowOut {
            location: location.clone(),
        });
        Ok(())
    }

    async fn touch_tip(&self, speed: f64, v_offset: f64, radius: f64) -> Result<()> {
        let mut state = locked(&self.state);
        if !state.has_tip {
            bail!("MockPipette ({}): cannot touch tip without a tip", self.mount);
        }
        state.actions.push(PipetteAction::TouchTip {
            speed,
            v_offset,
            radius,
        });
        Ok(())
    }
}

// =============================================================================
// Modules
// =============================================================================

/// Mock magnetic module
#[derive(Default)]
pub struct MockMagnet {
    history: Mutex<Vec<Option<f64>>>,
}

impl MockMagnet {
    /// Disengaged magnet with no history
    pub fn new() -> Self {
        Self::default()
    }

    /// Current engage height, `None` when disengaged
    pub fn engaged_height(&self) -> Option<f64> {
        locked(&self.history).last().copied().flatten()
    }

    /// Every engage (`Some(height)`) and disengage (`None`) call in order
    pub fn history(&self) -> Vec<Option<f64>> {
        locked(&self.history).clone()
    }
}

#[async_trait]
impl MagneticModule for MockMagnet {
    async fn engage(&self, height: f64) -> Result<()> {
        locked(&self.history).push(Some(height));
        Ok(())
    }

    async fn disengage(&self) -> Result<()> {
        locked(&self.history).push(None);
        Ok(())
    }
}

/// Mock temperature module
#[derive(Default)]
pub struct MockTemperature {
    target: Mutex<Option<f64>>,
}

impl MockTemperature {
    /// Module with no set point
    pub fn new() -> Self {
        Self::default()
    }

    /// Last set point
    pub fn target(&self) -> Option<f64> {
        *locked(&self.target)
    }
}

#[async_trait]
impl TemperatureModule for MockTemperature {
    async fn set_temperature(&self, celsius: f64) -> Result<()> {
        *locked(&self.target) = Some(celsius);
        Ok(())
    }
}

// =============================================================================
// RecordingOperator
// =============================================================================

/// Operator that records everything and resumes pauses immediately.
///
/// Delays are recorded, never slept.
#[derive(Default)]
pub struct RecordingOperator {
    comments: Mutex<Vec<String>>,
    pauses: Mutex<Vec<String>>,
    delays: Mutex<Vec<Duration>>,
}

impl RecordingOperator {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `comment` in order
    pub fn comments(&self) -> Vec<String> {
        locked(&self.comments).clone()
    }

    /// Every pause message in order
    pub fn pauses(&self) -> Vec<String> {
        locked(&self.pauses).clone()
    }

    /// Every requested delay in order
    pub fn delays(&self) -> Vec<Duration> {
        locked(&self.delays).clone()
    }
}

#[async_trait]
impl Operator for RecordingOperator {
    fn comment(&self, message: &str) {
        locked(&self.comments).push(message.to_string());
    }

    async fn pause(&self, message: &str) -> Result<()> {
        locked(&self.pauses).push(message.to_string());
        Ok(())
    }

    async fn delay(&self, duration: Duration, _message: &str) -> Result<()> {
        locked(&self.delays).push(duration);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::WellRef;

    #[tokio::test]
    async fn test_mock_pipette_requires_tip() {
        let pipette = MockPipette::multichannel(Mount::Right, 300.0);
        let well = WellRef::new("reservoir", 0);
        assert!(pipette.aspirate(100.0, &well.bottom(1.0), 1.0).await.is_err());

        pipette.pick_up_tip().await.unwrap();
        pipette.aspirate(100.0, &well.bottom(1.0), 1.0).await.unwrap();
        assert_eq!(pipette.loaded_volume(), 100.0);
        assert!(pipette.pick_up_tip().await.is_err());
    }

    #[tokio::test]
    async fn test_mock_pipette_capacity() {
        let pipette = MockPipette::single_channel(Mount::Left, 200.0);
        let well = WellRef::new("tube", 0);
        pipette.pick_up_tip().await.unwrap();
        pipette.aspirate(195.0, &well.bottom(1.0), 1.0).await.unwrap();
        assert!(pipette.air_gap(10.0, 0.0).await.is_err());
        pipette.dispense(195.0, &well.top(0.0), 1.0).await.unwrap();
        assert_eq!(pipette.loaded_volume(), 0.0);
        pipette.drop_tip().await.unwrap();
        assert!(!pipette.has_tip());
        assert_eq!(pipette.tips_picked(), 1);
    }

    #[tokio::test]
    async fn test_mock_magnet_history() {
        let magnet = MockMagnet::new();
        magnet.engage(7.0).await.unwrap();
        assert_eq!(magnet.engaged_height(), Some(7.0));
        magnet.disengage().await.unwrap();
        assert_eq!(magnet.engaged_height(), None);
        assert_eq!(magnet.history(), vec![Some(7.0), None]);
    }

    #[tokio::test]
    async fn test_recording_operator_never_sleeps() {
        let operator = RecordingOperator::new();
        operator
            .delay(Duration::from_secs(3600), "incubate")
            .await
            .unwrap();
        operator.pause("replace tips").await.unwrap();
        operator.comment("hello");
        assert_eq!(operator.delays(), vec![Duration::from_secs(3600)]);
        assert_eq!(operator.pauses(), vec!["replace tips".to_string()]);
        assert_eq!(operator.comments(), vec!["hello".to_string()]);
    }
}
