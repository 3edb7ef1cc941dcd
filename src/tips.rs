//! Tip consumption tracking per pipette mount.
//!
//! Each registered pipette owns a [`PipetteTipResource`] with a per-refill
//! capacity. Dropping a tip consumes one tip per channel. When the racks are
//! empty the next [`TipInventory::acquire_tip`] pauses the run, asks the
//! operator to replace the racks and resumes with a fresh count. This is the
//! only recoverable resource exhaustion of a run.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::error::{AppResult, HandlerError};
use crate::hardware::{Mount, Operator, Pipette};

/// What happens to a tip when it is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TipDisposal {
    /// Discard into the trash, consuming the tip
    Drop,
    /// Put the tip back in its rack without consuming it (dry runs only)
    Recycle,
}

/// Tip state of one pipette.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipetteTipResource {
    channels: u32,
    capacity: u32,
    consumed: u32,
    refills: u32,
    total_consumed: u32,
    has_tip: bool,
}

impl PipetteTipResource {
    /// Tips consumed since the last refill
    pub fn consumed(&self) -> u32 {
        self.consumed
    }

    /// Tips the loaded racks hold
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Rack refills so far
    pub fn refills(&self) -> u32 {
        self.refills
    }

    /// Whether a tip is attached
    pub fn has_tip(&self) -> bool {
        self.has_tip
    }

    /// No tip left for another pick-up
    pub fn is_exhausted(&self) -> bool {
        self.consumed >= self.capacity
    }
}

/// Tip counters of one mount, as reported in the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TipUsage {
    /// Pipette mount
    pub mount: Mount,
    /// Consumed since the last refill
    pub consumed: u32,
    /// Rack capacity in tips
    pub capacity: u32,
    /// Refills during the run
    pub refills: u32,
    /// Consumed over the whole run
    pub total_consumed: u32,
}

/// Tip state of every pipette in a run.
#[derive(Debug, Default, Clone)]
pub struct TipInventory {
    resources: BTreeMap<Mount, PipetteTipResource>,
}

impl TipInventory {
    /// Inventory with no pipettes registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a pipette with `capacity` tips per rack refill.
    ///
    /// # Errors
    ///
    /// The capacity must be a positive multiple of the channel count, otherwise
    /// the last pick-up of a refill would reach past the racks.
    pub fn register(&mut self, mount: Mount, channels: u32, capacity: u32) -> AppResult<()> {
        if channels == 0 || capacity == 0 || capacity % channels != 0 {
            return Err(HandlerError::Configuration(format!(
                "Tip capacity {} on {} mount must be a positive multiple of {} channels",
                capacity, mount, channels
            )));
        }
        self.resources.insert(
            mount,
            PipetteTipResource {
                channels,
                capacity,
                consumed: 0,
                refills: 0,
                total_consumed: 0,
                has_tip: false,
            },
        );
        Ok(())
    }

    /// Tip state of `mount`.
    ///
    /// # Errors
    ///
    /// `UnknownPipette` when the mount was never registered.
    pub fn resource(&self, mount: Mount) -> AppResult<&PipetteTipResource> {
        self.resources
            .get(&mount)
            .ok_or(HandlerError::UnknownPipette(mount))
    }

    fn resource_mut(&mut self, mount: Mount) -> AppResult<&mut PipetteTipResource> {
        self.resources
            .get_mut(&mount)
            .ok_or(HandlerError::UnknownPipette(mount))
    }

    /// Whether the pipette on `mount` holds a tip, false for unknown mounts
    pub fn has_tip(&self, mount: Mount) -> bool {
        self.resources.get(&mount).is_some_and(|r| r.has_tip)
    }

    /// Pick up a fresh tip, pausing for a rack refill first if the racks are empty.
    ///
    /// Returns `true` when a refill pause happened.
    ///
    /// # Errors
    ///
    /// `TipAlreadyAttached` if the pipette still holds a tip, or any hardware
    /// or operator failure.
    pub async fn acquire_tip(
        &mut self,
        pipette: &dyn Pipette,
        operator: &dyn Operator,
    ) -> AppResult<bool> {
        let mount = pipette.mount();
        let resource = self.resource_mut(mount)?;
        if resource.has_tip {
            return Err(HandlerError::TipAlreadyAttached(mount));
        }

        let mut refilled = false;
        if resource.is_exhausted() {
            operator
                .pause(&format!(
                    "Replace {} uL tipracks before resuming.",
                    pipette.max_volume()
                ))
                .await?;
            pipette.reset_tipracks().await?;
            resource.consumed = 0;
            resource.refills += 1;
            refilled = true;
            info!(%mount, refills = resource.refills, "Tip racks refilled");
        }

        pipette.pick_up_tip().await?;
        resource.has_tip = true;
        debug!(%mount, consumed = resource.consumed, "Tip picked up");
        Ok(refilled)
    }

    /// Pick up a tip only if the pipette does not hold one already.
    pub async fn ensure_tip(
        &mut self,
        pipette: &dyn Pipette,
        operator: &dyn Operator,
    ) -> AppResult<()> {
        if !self.has_tip(pipette.mount()) {
            self.acquire_tip(pipette, operator).await?;
        }
        Ok(())
    }

    /// Release the attached tip.
    ///
    /// # Errors
    ///
    /// `NoTipAttached` if the pipette holds no tip, or any hardware failure.
    pub async fn release_tip(
        &mut self,
        pipette: &dyn Pipette,
        disposal: TipDisposal,
    ) -> AppResult<()> {
        let mount = pipette.mount();
        let resource = self.resource_mut(mount)?;
        if !resource.has_tip {
            return Err(HandlerError::NoTipAttached(mount));
        }

        match disposal {
            TipDisposal::Drop => {
                pipette.drop_tip().await?;
                resource.consumed += resource.channels;
                resource.total_consumed += resource.channels;
            }
            TipDisposal::Recycle => pipette.return_tip().await?,
        }
        resource.has_tip = false;
        debug!(%mount, consumed = resource.consumed, ?disposal, "Tip released");
        Ok(())
    }

    /// Tips consumed over the whole run, all mounts
    pub fn total_consumed(&self) -> u32 {
        self.resources.values().map(|r| r.total_consumed).sum()
    }

    /// Refills across all mounts
    pub fn total_refills(&self) -> u32 {
        self.resources.values().map(|r| r.refills).sum()
    }

    /// Counters per mount, in mount order
    pub fn usage(&self) -> Vec<TipUsage> {
        self.resources
            .iter()
            .map(|(mount, r)| TipUsage {
                mount: *mount,
                consumed: r.consumed,
                capacity: r.capacity,
                refills: r.refills,
                total_consumed: r.total_consumed,
            })
            .collect()
    }
}
