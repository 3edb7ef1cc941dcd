//! Liquid-handling step bodies built from configuration.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{AppResult, HandlerError};
use crate::hardware::{Mount, WellRef};
use crate::reagent::{split_into_trips, Reagent};
use crate::sequencer::{RunContext, StepBody};
use crate::transfer::{DistributeOptions, MixOptions, TouchTip, TransferEngine, TransferOptions};

/// Lateral side for a column: left for even columns, right for odd ones.
pub fn find_side(column: usize) -> f64 {
    if column % 2 == 0 {
        -1.0
    } else {
        1.0
    }
}

/// Wells or columns a pipette addresses for `passes` sample passes.
pub fn sample_wells(labware: &str, passes: usize) -> Vec<WellRef> {
    (0..passes).map(|i| WellRef::new(labware, i)).collect()
}

/// Source column mixing before each reservoir draw.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservoirMix {
    /// Rounds on every later draw
    pub rounds: u32,
    /// Rounds the first time a column is drawn from
    pub first_rounds: u32,
    /// Mix volume in uL
    pub volume: f64,
    /// Aspirate height above the well bottom
    pub height: f64,
}

/// Transfer of a tracked reagent from its reservoir into every sample column.
pub struct ReservoirTransfer {
    /// Reservoir to draw from
    pub reagent: String,
    /// Pipette doing the transfer
    pub mount: Mount,
    /// One entry per sample column
    pub destinations: Vec<WellRef>,
    /// Volume delivered to each sample
    pub volume_per_sample: f64,
    /// Draw at this height instead of the height model
    pub fixed_pickup_height: Option<f64>,
    /// Use a fresh tip for every column
    pub tip_per_column: bool,
    /// Lateral dispense offset, sign alternated per column
    pub side_offset: f64,
    /// Stage settings for each trip
    pub options: TransferOptions,
    /// Mix the source column before drawing
    pub reservoir_mix: Option<ReservoirMix>,
    /// Mix each destination after its last trip
    pub destination_mix: Option<MixOptions>,
    last_mixed_column: Option<usize>,
}

impl ReservoirTransfer {
    /// Transfer with default stages, one tip for the whole step.
    pub fn new(
        reagent: impl Into<String>,
        mount: Mount,
        destinations: Vec<WellRef>,
        volume_per_sample: f64,
    ) -> Self {
        Self {
            reagent: reagent.into(),
            mount,
            destinations,
            volume_per_sample,
            fixed_pickup_height: None,
            tip_per_column: true,
            side_offset: 0.0,
            options: TransferOptions::default(),
            reservoir_mix: None,
            destination_mix: None,
            last_mixed_column: None,
        }
    }

    fn rinse_for(&mut self, column: usize) -> Option<MixOptions> {
        let mix = self.reservoir_mix.as_ref()?;
        let fresh = self.last_mixed_column != Some(column);
        self.last_mixed_column = Some(column);
        let rounds = if fresh { mix.first_rounds } else { mix.rounds };
        (rounds > 0).then(|| MixOptions::new(rounds, mix.volume).mix_height(mix.height))
    }
}

#[async_trait]
impl StepBody for ReservoirTransfer {
    async fn execute(&mut self, ctx: &mut RunContext, _wait_time: Option<Duration>) -> AppResult<()> {
        let pipette = ctx.pipette(self.mount)?;
        let operator = ctx.operator();
        let disposal = ctx.tip_disposal();
        let channels = pipette.channels() as f64;

        let reagent: Reagent = ctx.reservoirs.get(&self.reagent)?.reagent().clone();
        let trips = split_into_trips(self.volume_per_sample, reagent.max_volume_allowed);
        let destinations = self.destinations.clone();

        for (i, dest) in destinations.iter().enumerate() {
            ctx.tips.ensure_tip(pipette.as_ref(), operator.as_ref()).await?;

            for trip in &trips {
                let aspirate = trip + reagent.disposal_volume;
                let reservoir = ctx.reservoirs.get_mut(&self.reagent)?;
                let (height, advanced) = match self.fixed_pickup_height {
                    Some(height) => {
                        reservoir.record_unmetered(trip * channels);
                        (height, false)
                    }
                    None => {
                        let update = reservoir.pickup_height(aspirate * channels)?;
                        (update.height, update.column_advanced)
                    }
                };
                let column = reservoir.column_index();
                let source = reservoir.current_well()?.clone();

                if advanced {
                    ctx.comment(&format!("Aspirate from reservoir column: {}", column + 1));
                }

                let mut options = self
                    .options
                    .clone()
                    .dest_x_offset(find_side(i) * self.side_offset);
                if let Some(rinse) = self.rinse_for(column) {
                    options = options.rinse(rinse);
                }

                ctx.engine
                    .transfer(
                        pipette.as_ref(),
                        &reagent,
                        &source,
                        dest,
                        aspirate,
                        height,
                        &options,
                    )
                    .await?;
            }

            if let Some(mix) = &self.destination_mix {
                ctx.engine.mix(pipette.as_ref(), &reagent, dest, mix).await?;
            }

            if self.tip_per_column {
                pipette.move_to(&dest.top(0.0)).await?;
                if reagent.air_gap_bottom > 0.0 {
                    pipette.air_gap(reagent.air_gap_bottom, 0.0).await?;
                }
                ctx.tips.release_tip(pipette.as_ref(), disposal).await?;
            }
        }

        if ctx.tips.has_tip(self.mount) {
            ctx.tips.release_tip(pipette.as_ref(), disposal).await?;
        }
        info!(reagent = %self.reagent, columns = destinations.len(), "Reservoir transfer finished");
        Ok(())
    }
}

/// Column-by-column transfer between plates, or from every column to a waste.
///
/// The aspirate offset alternates side per column so the tip avoids the pellet.
pub struct ColumnTransfer {
    /// Liquid being moved, for flow rates and gaps
    pub liquid: Reagent,
    /// Pipette doing the transfer
    pub mount: Mount,
    /// Source columns
    pub sources: Vec<WellRef>,
    /// Destination columns, paired with `sources`
    pub destinations: Vec<WellRef>,
    /// Volume moved per sample
    pub volume_per_sample: f64,
    /// Aspirate height above the source bottom
    pub pickup_height: f64,
    /// Aspirate offset, sign alternated per column
    pub side_offset: f64,
    /// Push out the trailing gap before each aspirate
    pub release_trailing_air_gap: bool,
    /// Stage settings for each trip
    pub options: TransferOptions,
}

impl ColumnTransfer {
    /// Pair every source column with its destination.
    ///
    /// # Errors
    ///
    /// `Configuration` when sources and destinations differ in length.
    pub fn new(
        liquid: Reagent,
        mount: Mount,
        sources: Vec<WellRef>,
        destinations: Vec<WellRef>,
        volume_per_sample: f64,
    ) -> AppResult<Self> {
        if sources.len() != destinations.len() {
            return Err(HandlerError::Configuration(format!(
                "Column transfer of '{}' has {} sources but {} destinations",
                liquid.name,
                sources.len(),
                destinations.len()
            )));
        }
        Ok(Self {
            liquid,
            mount,
            sources,
            destinations,
            volume_per_sample,
            pickup_height: 0.5,
            side_offset: 2.0,
            release_trailing_air_gap: true,
            options: TransferOptions::default().wait_after_aspirate(Duration::from_secs(2)),
        })
    }
}

#[async_trait]
impl StepBody for ColumnTransfer {
    async fn execute(&mut self, ctx: &mut RunContext, _wait_time: Option<Duration>) -> AppResult<()> {
        let pipette = ctx.pipette(self.mount)?;
        let operator = ctx.operator();
        let disposal = ctx.tip_disposal();
        let trips = split_into_trips(self.volume_per_sample, self.liquid.max_volume_allowed);

        for (i, (source, dest)) in self.sources.iter().zip(&self.destinations).enumerate() {
            ctx.tips.ensure_tip(pipette.as_ref(), operator.as_ref()).await?;

            for (trip_index, trip) in trips.iter().enumerate() {
                let options = self
                    .options
                    .clone()
                    .source_x_offset(find_side(i) * self.side_offset)
                    .release_trailing_air_gap(self.release_trailing_air_gap && trip_index > 0);
                ctx.engine
                    .transfer(
                        pipette.as_ref(),
                        &self.liquid,
                        source,
                        dest,
                        trip + self.liquid.disposal_volume,
                        self.pickup_height,
                        &options,
                    )
                    .await?;
                if self.liquid.air_gap_bottom > 0.0 {
                    pipette.air_gap(self.liquid.air_gap_bottom, 0.0).await?;
                }
            }

            ctx.tips.release_tip(pipette.as_ref(), disposal).await?;
            debug!(column = i + 1, source = %source, dest = %dest, "Column transferred");
        }
        Ok(())
    }
}

/// Reservoir reagent fanned out to sample wells, several wells per aspirate.
pub struct DistributeToWells {
    /// Reservoir to draw from
    pub reagent: String,
    /// Pipette doing the transfer
    pub mount: Mount,
    /// Wells receiving `volume_per_well` each
    pub destinations: Vec<WellRef>,
    /// Volume per destination in uL
    pub volume_per_well: f64,
    /// Where the leftover is blown out
    pub waste: WellRef,
    /// Safety volume and air gaps
    pub options: DistributeOptions,
}

#[async_trait]
impl StepBody for DistributeToWells {
    async fn execute(&mut self, ctx: &mut RunContext, _wait_time: Option<Duration>) -> AppResult<()> {
        let pipette = ctx.pipette(self.mount)?;
        let operator = ctx.operator();
        let disposal = ctx.tip_disposal();
        let channels = pipette.channels() as f64;
        let reagent: Reagent = ctx.reservoirs.get(&self.reagent)?.reagent().clone();

        let per_aspirate = TransferEngine::destinations_per_aspirate(
            pipette.as_ref(),
            &reagent,
            self.volume_per_well,
            &self.options,
        );
        if per_aspirate == 0 {
            return Err(HandlerError::PipetteCapacityExceeded {
                requested: self.volume_per_well + self.options.extra_dispensal + self.options.air_gap,
                max: pipette.max_volume(),
            });
        }

        ctx.tips.ensure_tip(pipette.as_ref(), operator.as_ref()).await?;
        for chunk in self.destinations.chunks(per_aspirate) {
            let total = self.volume_per_well * chunk.len() as f64 + self.options.extra_dispensal;
            let reservoir = ctx.reservoirs.get_mut(&self.reagent)?;
            let update = reservoir.pickup_height((total + reagent.disposal_volume) * channels)?;
            let source = reservoir.current_well()?.clone();
            if update.column_advanced {
                ctx.comment(&format!("Aspirate from reservoir column: {}", update.column + 1));
            }

            ctx.engine
                .distribute(
                    pipette.as_ref(),
                    &reagent,
                    &source,
                    chunk,
                    self.volume_per_well,
                    update.height,
                    &self.waste,
                    &self.options,
                )
                .await?;
        }
        ctx.tips.release_tip(pipette.as_ref(), disposal).await?;
        Ok(())
    }
}

/// Touch-tip settings used by configured steps.
pub(crate) fn configured_touch_tip(enabled: bool) -> Option<TouchTip> {
    enabled.then(TouchTip::default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{MockPipette, RecordingOperator};
    use crate::reservoir::ReservoirState;
    use std::sync::Arc;

    #[test]
    fn test_find_side_alternates() {
        assert_eq!(find_side(0), -1.0);
        assert_eq!(find_side(1), 1.0);
        assert_eq!(find_side(10), -1.0);
    }

    #[test]
    fn test_fresh_column_uses_first_rounds() {
        let mut body = ReservoirTransfer::new("Beads", Mount::Right, Vec::new(), 100.0);
        body.reservoir_mix = Some(ReservoirMix {
            rounds: 2,
            first_rounds: 10,
            volume: 150.0,
            height: 1.5,
        });
        assert_eq!(body.rinse_for(0).map(|m| m.rounds), Some(10));
        assert_eq!(body.rinse_for(0).map(|m| m.rounds), Some(2));
        assert_eq!(body.rinse_for(1).map(|m| m.rounds), Some(10));
    }

    #[test]
    fn test_column_transfer_length_mismatch() {
        let liquid = Reagent::builder("Supernatant").build().unwrap();
        let result = ColumnTransfer::new(
            liquid,
            Mount::Right,
            sample_wells("deepwell", 2),
            sample_wells("waste", 1),
            100.0,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_distribute_debits_every_aspirate() {
        let pipette = Arc::new(MockPipette::multichannel(Mount::Right, 300.0));
        let reagent = Reagent::builder("MasterMix")
            .disposal_volume(1.0)
            .build()
            .unwrap();
        let reservoir = ReservoirState::new(
            reagent,
            vec![WellRef::new("reservoir", 0)],
            11500.0,
            8,
        );
        let mut ctx = RunContext::new(Arc::new(RecordingOperator::new()))
            .with_pipette(pipette.clone(), 96)
            .unwrap()
            .with_reservoir(reservoir);

        let mut body = DistributeToWells {
            reagent: "MasterMix".to_string(),
            mount: Mount::Right,
            destinations: sample_wells("pcr_plate", 6),
            volume_per_well: 40.0,
            waste: WellRef::new("waste", 0),
            options: DistributeOptions {
                extra_dispensal: 10.0,
                air_gap: 5.0,
                ..Default::default()
            },
        };
        body.execute(&mut ctx, None).await.unwrap();

        assert_eq!(pipette.aspirated_volumes(), vec![170.0, 90.0]);
        let state = ctx.reservoirs.get("MasterMix").unwrap();
        assert_eq!(state.volume_remaining(), 11500.0 - (170.0 + 90.0) * 8.0);
        assert_eq!(state.usage().volume_used, 2080.0);
    }
}
