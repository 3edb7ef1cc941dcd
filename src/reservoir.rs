//! Reagent reservoir volume and liquid-height tracking.
//!
//! A [`ReservoirState`] follows one reagent through the wells (columns) it was
//! provisioned in. Before every aspirate the caller asks for a pickup height;
//! the state answers from a linear container model and debits the volume about
//! to be drawn. When the active column can no longer supply a full aliquot
//! the state moves on to the next column, which is assumed to hold its
//! nominal fill.
//!
//! The height computation is split in two:
//!
//! - [`ReservoirState::plan_height`] is pure and describes what would happen.
//! - [`ReservoirState::apply`] commits a plan and reports a [`HeightUpdate`].
//!
//! [`ReservoirState::calc_height`] chains both.

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{AppResult, HandlerError};
use crate::hardware::WellRef;
use crate::reagent::{Reagent, ReservoirPlan};

/// Hardware floor for the pickup height above the well bottom.
pub const DEFAULT_MIN_HEIGHT: f64 = 0.5;

/// Outcome of a pure height computation, not yet committed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightPlan {
    /// Height from the linear model before clamping
    pub raw_height: f64,
    /// Height after clamping to the floor
    pub height: f64,
    /// The active column cannot supply the draw and the next one is opened
    pub column_advanced: bool,
    /// Column the aspirate draws from
    pub column: usize,
    /// Volume the column holds after the draw
    pub volume_after: f64,
    /// Volume the draw removes from the column
    pub drawn: f64,
}

/// State change reported after a committed height computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeightUpdate {
    /// Pickup height above the well bottom
    pub height: f64,
    /// This draw opened a new column
    pub column_advanced: bool,
    /// 0-based column the draw came from
    pub column: usize,
    /// Volume left in that column
    pub volume_remaining: f64,
}

/// Per-reagent usage, as reported in the run summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReagentUsage {
    /// Reagent name
    pub reagent: String,
    /// Volume drawn over the run, in uL
    pub volume_used: f64,
    /// Columns drawn from, 0 if the reagent was never used
    pub columns_used: usize,
    /// Columns the operator filled
    pub columns_provisioned: usize,
    /// Volume left behind in abandoned columns
    pub unused_volume: f64,
}

/// Mutable column and volume state of one reagent source.
#[derive(Debug, Clone)]
pub struct ReservoirState {
    reagent: Reagent,
    wells: Vec<WellRef>,
    channels: u32,
    nominal_fill: f64,
    column_index: usize,
    volume_remaining: f64,
    volume_drawn: f64,
    unused: Vec<f64>,
}

impl ReservoirState {
    /// Create a state drawing from `wells` in order, each filled with `nominal_fill`.
    pub fn new(reagent: Reagent, wells: Vec<WellRef>, nominal_fill: f64, channels: u32) -> Self {
        Self {
            reagent,
            wells,
            channels: channels.max(1),
            nominal_fill,
            column_index: 0,
            volume_remaining: nominal_fill,
            volume_drawn: 0.0,
            unused: Vec::new(),
        }
    }

    /// Create a state from a provisioning plan; `wells` must hold `plan.num_wells` entries.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::Configuration` when the well list and the plan
    /// disagree, or when a filled well cannot supply one pipette pass.
    pub fn provisioned(
        reagent: Reagent,
        wells: Vec<WellRef>,
        plan: &ReservoirPlan,
        channels: u32,
    ) -> AppResult<Self> {
        if wells.len() != plan.num_wells {
            return Err(HandlerError::Configuration(format!(
                "Reagent '{}' planned {} wells but {} were assigned",
                reagent.name,
                plan.num_wells,
                wells.len()
            )));
        }
        let usable = plan.fill_volume - reagent.dead_volume;
        if plan.num_wells > 0 && usable < plan.pass_volume {
            return Err(HandlerError::Configuration(format!(
                "Reagent '{}': a fill of {:.1} uL leaves {:.1} uL above the dead volume, \
                 less than one pass of {:.1} uL",
                reagent.name, plan.fill_volume, usable, plan.pass_volume
            )));
        }
        Ok(Self::new(reagent, wells, plan.fill_volume, channels))
    }

    /// Handling parameters of the tracked reagent
    pub fn reagent(&self) -> &Reagent {
        &self.reagent
    }

    /// Reagent name
    pub fn name(&self) -> &str {
        &self.reagent.name
    }

    /// 0-based index of the active column
    pub fn column_index(&self) -> usize {
        self.column_index
    }

    /// Volume left in the active column, in uL
    pub fn volume_remaining(&self) -> f64 {
        self.volume_remaining
    }

    /// Fill of every provisioned column
    pub fn nominal_fill(&self) -> f64 {
        self.nominal_fill
    }

    /// Provisioned column count
    pub fn num_wells(&self) -> usize {
        self.wells.len()
    }

    /// Provisioned wells in draw order
    pub fn wells(&self) -> &[WellRef] {
        &self.wells
    }

    /// Volume left behind in each abandoned column, in advance order
    pub fn unused_volumes(&self) -> &[f64] {
        &self.unused
    }

    /// Disposal volume wasted once per pass of a multichannel pipette
    pub fn disposal_share(&self) -> f64 {
        self.reagent.disposal_volume * self.channels as f64
    }

    /// Well the next aspirate draws from.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::ReservoirOverrun` when no well was provisioned.
    pub fn current_well(&self) -> AppResult<&WellRef> {
        self.wells
            .get(self.column_index)
            .ok_or_else(|| self.overrun(self.column_index))
    }

    fn overrun(&self, column: usize) -> HandlerError {
        HandlerError::ReservoirOverrun {
            reagent: self.reagent.name.clone(),
            column: column + 1,
            provisioned: self.wells.len(),
        }
    }

    /// Compute the pickup height for an aspirate without touching the state.
    ///
    /// `aspirate_volume` is the total drawn by all channels, disposal included.
    pub fn plan_height(
        &self,
        cross_section_area: f64,
        aspirate_volume: f64,
        min_height: f64,
    ) -> HeightPlan {
        let required = aspirate_volume - self.disposal_share();
        let usable = self.volume_remaining - self.reagent.dead_volume;

        let (column_advanced, column, base) = if usable < required {
            (true, self.column_index + 1, self.nominal_fill)
        } else {
            (false, self.column_index, self.volume_remaining)
        };

        let raw_height =
            (base - aspirate_volume - self.reagent.geometry.cone_volume) / cross_section_area;
        let height = if raw_height < min_height {
            min_height
        } else {
            raw_height
        };

        HeightPlan {
            raw_height,
            height,
            column_advanced,
            column,
            volume_after: base - required,
            drawn: required,
        }
    }

    /// Commit a plan produced by [`Self::plan_height`] on this same state.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::ReservoirOverrun` when the plan advances past the
    /// last provisioned well, or `HandlerError::ColumnTooSmall` when the newly
    /// opened column cannot supply the draw. The state is left unchanged in both
    /// cases.
    pub fn apply(&mut self, plan: HeightPlan) -> AppResult<HeightUpdate> {
        if plan.column >= self.wells.len() {
            return Err(self.overrun(plan.column));
        }
        let usable_fill = self.nominal_fill - self.reagent.dead_volume;
        if plan.column_advanced && usable_fill < plan.drawn {
            return Err(HandlerError::ColumnTooSmall {
                reagent: self.reagent.name.clone(),
                column: plan.column + 1,
                usable: usable_fill,
                needed: plan.drawn,
            });
        }

        if plan.column_advanced {
            self.unused.push(self.volume_remaining);
            info!(
                reagent = %self.reagent.name,
                column = plan.column + 1,
                left_behind = self.volume_remaining,
                "Advancing to next reservoir column"
            );
        }

        self.column_index = plan.column;
        self.volume_remaining = plan.volume_after;
        self.volume_drawn += plan.drawn;

        debug!(
            reagent = %self.reagent.name,
            column = self.column_index + 1,
            height = plan.height,
            raw_height = plan.raw_height,
            remaining = self.volume_remaining,
            "Pickup height"
        );

        Ok(HeightUpdate {
            height: plan.height,
            column_advanced: plan.column_advanced,
            column: self.column_index,
            volume_remaining: self.volume_remaining,
        })
    }

    /// Compute the safe pickup height for the next aspirate and debit the volume.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::ReservoirOverrun` if the reagent runs out of
    /// provisioned columns and `HandlerError::ColumnTooSmall` if the next column
    /// is filled below one aspirate.
    pub fn calc_height(
        &mut self,
        cross_section_area: f64,
        aspirate_volume: f64,
        min_height: f64,
    ) -> AppResult<HeightUpdate> {
        let plan = self.plan_height(cross_section_area, aspirate_volume, min_height);
        self.apply(plan)
    }

    /// [`Self::calc_height`] with the reagent's own geometry and the default floor.
    pub fn pickup_height(&mut self, aspirate_volume: f64) -> AppResult<HeightUpdate> {
        self.calc_height(
            self.reagent.geometry.cross_section_area,
            aspirate_volume,
            DEFAULT_MIN_HEIGHT,
        )
    }

    /// Account for a draw made at a fixed height, outside the height model.
    pub fn record_unmetered(&mut self, volume: f64) {
        self.volume_drawn += volume;
        self.volume_remaining = (self.volume_remaining - volume).max(0.0);
    }

    /// Counters for the run summary
    pub fn usage(&self) -> ReagentUsage {
        ReagentUsage {
            reagent: self.reagent.name.clone(),
            volume_used: self.volume_drawn,
            columns_used: if self.volume_drawn > 0.0 {
                self.column_index + 1
            } else {
                0
            },
            columns_provisioned: self.wells.len(),
            unused_volume: self.unused.iter().sum(),
        }
    }
}
