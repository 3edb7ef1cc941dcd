//! Hardware capability traits consumed by the liquid-handling core.
//!
//! The core never talks to a robot directly. It drives a narrow set of
//! capability traits that a driver layer implements:
//!
//! - [`Pipette`]: aspirate, dispense, move, air gap, blow-out, touch-tip and tip handling
//! - [`MagneticModule`]: engage/disengage for bead separation
//! - [`TemperatureModule`]: hold a block at a set temperature
//! - [`Operator`]: run-log comments, timed delays and operator-gated pauses
//!
//! Wells are addressed through [`WellRef`] handles and [`Location`] values that
//! only carry the scalar height and lateral offset the core derives. Physical
//! coordinates are the driver's business.
//!
//! # Thread Safety
//!
//! All traits require `Send + Sync` so implementations can be shared behind `Arc`.
//! The core itself calls them strictly one at a time.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub mod mock;
pub mod operator;

pub use mock::{MockMagnet, MockPipette, MockTemperature, PipetteAction, RecordingOperator};
pub use operator::{ChannelOperator, ConsoleOperator, PauseRequest};

/// Pipette mount on the robot gantry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mount {
    /// Left-hand mount
    Left,
    /// Right-hand mount
    Right,
}

impl fmt::Display for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mount::Left => write!(f, "left"),
            Mount::Right => write!(f, "right"),
        }
    }
}

/// Opaque reference to one well (or one column for multichannel addressing).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WellRef {
    /// Labware name as loaded on the deck
    pub labware: String,
    /// Zero-based well/column index within the labware
    pub index: usize,
}

impl WellRef {
    /// Well `index` of `labware`.
    pub fn new(labware: impl Into<String>, index: usize) -> Self {
        Self {
            labware: labware.into(),
            index,
        }
    }

    /// Location `z` units above the well bottom.
    pub fn bottom(&self, z: f64) -> Location {
        Location {
            well: self.clone(),
            anchor: Anchor::Bottom,
            z,
            x_offset: 0.0,
        }
    }

    /// Location `z` units relative to the well top (negative is inside the well).
    pub fn top(&self, z: f64) -> Location {
        Location {
            well: self.clone(),
            anchor: Anchor::Top,
            z,
            x_offset: 0.0,
        }
    }
}

impl fmt::Display for WellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.labware, self.index)
    }
}

/// Vertical reference a [`Location`] height is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Anchor {
    /// Height measured up from the well bottom
    Bottom,
    /// Height measured from the well top, negative goes down into the well
    Top,
}

/// A point inside or above a well: anchor, height and lateral offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Target well
    pub well: WellRef,
    /// Reference the height is measured from
    pub anchor: Anchor,
    /// Height relative to the anchor
    pub z: f64,
    /// Lateral offset from the well center
    pub x_offset: f64,
}

impl Location {
    /// Shift the location laterally along the x axis.
    pub fn moved_x(mut self, dx: f64) -> Self {
        self.x_offset += dx;
        self
    }
}

/// Liquid-handling actuation capability of one mounted pipette.
///
/// Flow `rate` arguments are multipliers of the pipette's default flow rate.
#[async_trait]
pub trait Pipette: Send + Sync {
    /// Mount the pipette is attached to
    fn mount(&self) -> Mount;

    /// Number of channels (1 for single-channel, 8 for multichannel)
    fn channels(&self) -> u32;

    /// Nominal maximum volume of one tip in uL
    fn max_volume(&self) -> f64;

    /// Minimum volume the pipette can aspirate accurately in uL
    fn min_volume(&self) -> f64;

    /// Pick up the next available tip
    async fn pick_up_tip(&self) -> Result<()>;

    /// Discard the attached tip into the trash
    async fn drop_tip(&self) -> Result<()>;

    /// Put the attached tip back where it was picked up
    async fn return_tip(&self) -> Result<()>;

    /// Mark every tip rack as full again after an operator refill
    async fn reset_tipracks(&self) -> Result<()>;

    /// Draw `volume` uL at `location`
    async fn aspirate(&self, volume: f64, location: &Location, rate: f64) -> Result<()>;

    /// Push out `volume` uL at `location`
    async fn dispense(&self, volume: f64, location: &Location, rate: f64) -> Result<()>;

    /// Move without actuating the plunger
    async fn move_to(&self, location: &Location) -> Result<()>;

    /// Draw `volume` of air `height` units above the current well top
    async fn air_gap(&self, volume: f64, height: f64) -> Result<()>;

    /// Expel any remaining liquid at `location`
    async fn blow_out(&self, location: &Location) -> Result<()>;

    /// Wipe the tip against the current well wall
    async fn touch_tip(&self, speed: f64, v_offset: f64, radius: f64) -> Result<()>;
}

/// Magnetic module used to pull beads against the well wall.
#[async_trait]
pub trait MagneticModule: Send + Sync {
    /// Raise the magnets to `height` above the labware base
    async fn engage(&self, height: f64) -> Result<()>;
    /// Lower the magnets
    async fn disengage(&self) -> Result<()>;
}

/// Temperature module holding a labware block at a set point.
#[async_trait]
pub trait TemperatureModule: Send + Sync {
    /// Set the target temperature and wait until it is reached
    async fn set_temperature(&self, celsius: f64) -> Result<()>;
}

/// Operator-facing capability: run log, timed waits and blocking pauses.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Append a line to the run log; never blocks
    fn comment(&self, message: &str);

    /// Block until the operator resumes the run
    async fn pause(&self, message: &str) -> Result<()>;

    /// Wait a fixed duration (incubation, drying, settling)
    async fn delay(&self, duration: Duration, message: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_builders() {
        let well = WellRef::new("deepwell", 3);
        let loc = well.bottom(1.5).moved_x(-2.0).moved_x(0.5);
        assert_eq!(loc.anchor, Anchor::Bottom);
        assert_eq!(loc.z, 1.5);
        assert_eq!(loc.x_offset, -1.5);
        assert_eq!(well.top(-5.0).anchor, Anchor::Top);
        assert_eq!(well.to_string(), "deepwell[3]");
    }

    #[test]
    fn test_mount_serde_lowercase() {
        let json = serde_json::to_string(&Mount::Right).unwrap();
        assert_eq!(json, "\"right\"");
        let mount: Mount = serde_json::from_str("\"left\"").unwrap();
        assert_eq!(mount, Mount::Left);
    }
}
