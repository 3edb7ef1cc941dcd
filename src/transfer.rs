//! Staged liquid transfers.
//!
//! [`TransferEngine`] performs one liquid move as a fixed sequence of stages,
//! each switched on or off through [`TransferOptions`]:
//!
//! 1. rinse (mix at the source)
//! 2. release of the previous trailing air gap
//! 3. top air gap
//! 4. aspirate (direct or x-scroll)
//! 5. bottom air gap
//! 6. wait
//! 7. avoid-droplet move
//! 8. dispense `volume - disposal + bottom air gap`
//! 9. dispense of the top air gap
//! 10. blow-out
//! 11. touch-tip
//! 12. wait
//!
//! The engine also provides [`TransferEngine::mix`] and the multi-destination
//! [`TransferEngine::distribute`]. Every call is parameterised by the
//! [`Reagent`] being moved; the engine holds no per-protocol logic.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{AppResult, HandlerError};
use crate::hardware::{Operator, Pipette, WellRef};
use crate::reagent::Reagent;

/// Touch-tip wipe parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchTip {
    /// Wipe speed in mm/s
    pub speed: f64,
    /// Vertical offset from the well top
    pub v_offset: f64,
    /// Fraction of the well radius
    pub radius: f64,
}

impl Default for TouchTip {
    fn default() -> Self {
        Self {
            speed: 20.0,
            v_offset: -5.0,
            radius: 0.7,
        }
    }
}

/// How the liquid is drawn from the source.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum AspirateMode {
    /// Single aspirate at the source offset
    #[default]
    Direct,
    /// Aspirate in steps of at least the pipette's minimum volume while the
    /// lateral offset moves from `start` to `stop`
    XScroll {
        /// Offset of the first partial aspirate
        start: f64,
        /// Offset of the last partial aspirate
        stop: f64,
    },
}

/// Mix parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct MixOptions {
    /// Aspirate/dispense cycles
    pub rounds: u32,
    /// Volume per cycle in uL
    pub volume: f64,
    /// Aspirate height above the bottom, 0 falls back to 1 mm
    pub mix_height: f64,
    /// Lateral offset of the dispense
    pub x_offset: f64,
    /// Dispense height relative to the well top
    pub drop_height: f64,
    /// Blow out above the well after mixing
    pub blow_out: bool,
    /// Pause after mixing
    pub wait: Option<Duration>,
    /// Dispense near the bottom for the first two thirds of the rounds
    pub two_thirds_mix_bottom: bool,
}

impl MixOptions {
    /// Mix `rounds` times with `volume` uL per cycle.
    pub fn new(rounds: u32, volume: f64) -> Self {
        Self {
            rounds,
            volume,
            mix_height: 1.5,
            x_offset: 0.0,
            drop_height: -1.0,
            blow_out: false,
            wait: None,
            two_thirds_mix_bottom: false,
        }
    }

    /// Set `mix_height`
    pub fn mix_height(mut self, height: f64) -> Self {
        self.mix_height = height;
        self
    }

    /// Set `x_offset`
    pub fn x_offset(mut self, offset: f64) -> Self {
        self.x_offset = offset;
        self
    }

    /// Set `drop_height`
    pub fn drop_height(mut self, height: f64) -> Self {
        self.drop_height = height;
        self
    }

    /// Set `blow_out`
    pub fn blow_out(mut self, enabled: bool) -> Self {
        self.blow_out = enabled;
        self
    }

    /// Set `wait`
    pub fn wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    /// Set `two_thirds_mix_bottom`
    pub fn two_thirds_mix_bottom(mut self, enabled: bool) -> Self {
        self.two_thirds_mix_bottom = enabled;
        self
    }
}

/// Stage toggles of a single transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOptions {
    /// Mix the source before the aspirate
    pub rinse: Option<MixOptions>,
    /// Dispense the previous trailing gap before aspirating
    pub release_trailing_air_gap: bool,
    /// Direct or x-scroll aspirate
    pub aspirate_mode: AspirateMode,
    /// Lateral offset at the source
    pub source_x_offset: f64,
    /// Pause after the aspirate
    pub wait_after_aspirate: Option<Duration>,
    /// Withdraw slowly to shed droplets
    pub avoid_droplet: bool,
    /// Lateral offset at the destination
    pub dest_x_offset: f64,
    /// Dispense height relative to the destination top
    pub drop_height: f64,
    /// Blow out after the dispense
    pub blow_out: bool,
    /// Touch the destination wall after dispensing
    pub touch_tip: Option<TouchTip>,
    /// Pause after the dispense
    pub wait_after_dispense: Option<Duration>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            rinse: None,
            release_trailing_air_gap: false,
            aspirate_mode: AspirateMode::Direct,
            source_x_offset: 0.0,
            wait_after_aspirate: None,
            avoid_droplet: false,
            dest_x_offset: 0.0,
            drop_height: -5.0,
            blow_out: false,
            touch_tip: None,
            wait_after_dispense: None,
        }
    }
}

impl TransferOptions {
    /// Set `rinse`
    pub fn rinse(mut self, mix: MixOptions) -> Self {
        self.rinse = Some(mix);
        self
    }

    /// Set `release_trailing_air_gap`
    pub fn release_trailing_air_gap(mut self, enabled: bool) -> Self {
        self.release_trailing_air_gap = enabled;
        self
    }

    /// Switch to an x-scroll aspirate between two lateral offsets
    pub fn x_scroll(mut self, start: f64, stop: f64) -> Self {
        self.aspirate_mode = AspirateMode::XScroll { start, stop };
        self
    }

    /// Set `source_x_offset`
    pub fn source_x_offset(mut self, offset: f64) -> Self {
        self.source_x_offset = offset;
        self
    }

    /// Set `wait_after_aspirate`
    pub fn wait_after_aspirate(mut self, wait: Duration) -> Self {
        self.wait_after_aspirate = Some(wait);
        self
    }

    /// Set `avoid_droplet`
    pub fn avoid_droplet(mut self, enabled: bool) -> Self {
        self.avoid_droplet = enabled;
        self
    }

    /// Set `dest_x_offset`
    pub fn dest_x_offset(mut self, offset: f64) -> Self {
        self.dest_x_offset = offset;
        self
    }

    /// Set `drop_height`
    pub fn drop_height(mut self, height: f64) -> Self {
        self.drop_height = height;
        self
    }

    /// Set `blow_out`
    pub fn blow_out(mut self, enabled: bool) -> Self {
        self.blow_out = enabled;
        self
    }

    /// Set `touch_tip`
    pub fn touch_tip(mut self, touch: TouchTip) -> Self {
        self.touch_tip = Some(touch);
        self
    }

    /// Set `wait_after_dispense`
    pub fn wait_after_dispense(mut self, wait: Duration) -> Self {
        self.wait_after_dispense = Some(wait);
        self
    }
}

/// Parameters of a one-aspirate, many-destination distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributeOptions {
    /// Safety volume aspirated on top of the destinations' total
    pub extra_dispensal: f64,
    /// Air gap drawn after leaving the source and after each drop
    pub air_gap: f64,
    /// Dispense height relative to each destination top
    pub drop_height: f64,
    /// Lateral offset at each destination
    pub dest_x_offset: f64,
    /// Touch each destination wall
    pub touch_tip: Option<TouchTip>,
}

impl Default for DistributeOptions {
    fn default() -> Self {
        Self {
            extra_dispensal: 0.0,
            air_gap: 5.0,
            drop_height: -5.0,
            dest_x_offset: 0.0,
            touch_tip: None,
        }
    }
}

/// Volumes moved by one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransferReport {
    /// Liquid and air gaps drawn into the tip
    pub aspirated: f64,
    /// Liquid plus trailing air gap dispensed at the destination
    pub dispensed: f64,
    /// Liquid that reached the destination
    pub delivered: f64,
}

/// Running totals of everything the engine moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TransferStats {
    /// Completed transfers
    pub transfers: u64,
    /// Completed mixes
    pub mixes: u64,
    /// Completed distributions
    pub distributions: u64,
    /// Liquid drawn over all operations, air excluded
    pub volume_aspirated: f64,
    /// Liquid that reached a destination
    pub volume_delivered: f64,
}

/// Runs transfers, mixes and distributions and keeps their totals.
pub struct TransferEngine {
    operator: Arc<dyn Operator>,
    stats: TransferStats,
}

impl TransferEngine {
    /// Engine reporting waits through `operator`
    pub fn new(operator: Arc<dyn Operator>) -> Self {
        Self {
            operator,
            stats: TransferStats::default(),
        }
    }

    /// Totals so far
    pub fn stats(&self) -> TransferStats {
        self.stats
    }

    fn check_tip_load(pipette: &dyn Pipette, load: f64) -> AppResult<()> {
        if load > pipette.max_volume() + f64::EPSILON {
            return Err(HandlerError::PipetteCapacityExceeded {
                requested: load,
                max: pipette.max_volume(),
            });
        }
        Ok(())
    }

    /// Move `volume` (disposal included) of `reagent` from `source` to `dest`.
    ///
    /// `pickup_height` is measured from the source bottom, usually taken from
    /// [`crate::reservoir::ReservoirState::calc_height`].
    ///
    /// # Errors
    ///
    /// - `VolumeExceedsLimit` if `volume - disposal` is above the reagent's ceiling
    /// - `PipetteCapacityExceeded` if liquid plus air gaps do not fit the tip
    /// - `Hardware` for any actuation failure
    #[allow(clippy::too_many_arguments)]
    pub async fn transfer(
        &mut self,
        pipette: &dyn Pipette,
        reagent: &Reagent,
        source: &WellRef,
        dest: &WellRef,
        volume: f64,
        pickup_height: f64,
        options: &TransferOptions,
    ) -> AppResult<TransferReport> {
        let delivered = volume - reagent.disposal_volume;
        if delivered > reagent.max_volume_allowed + f64::EPSILON {
            return Err(HandlerError::VolumeExceedsLimit {
                reagent: reagent.name.clone(),
                requested: delivered,
                max: reagent.max_volume_allowed,
            });
        }
        Self::check_tip_load(
            pipette,
            reagent.air_gap_top + volume + reagent.air_gap_bottom,
        )?;

        if let Some(rinse) = &options.rinse {
            self.mix(pipette, reagent, source, rinse).await?;
        }

        if options.release_trailing_air_gap && reagent.air_gap_bottom > 0.0 {
            pipette
                .dispense(
                    reagent.air_gap_bottom,
                    &source.top(-2.0),
                    reagent.flow_rate_dispense,
                )
                .await?;
        }

        if reagent.air_gap_top > 0.0 {
            pipette.air_gap(reagent.air_gap_top, 0.0).await?;
        }

        match options.aspirate_mode {
            AspirateMode::Direct => {
                let location = source
                    .bottom(pickup_height)
                    .moved_x(options.source_x_offset);
                pipette
                    .aspirate(volume, &location, reagent.flow_rate_aspirate)
                    .await?;
            }
            AspirateMode::XScroll { start, stop } => {
                self.aspirate_x_scroll(pipette, reagent, source, volume, pickup_height, start, stop)
                    .await?;
            }
        }

        if reagent.air_gap_bottom > 0.0 {
            pipette.air_gap(reagent.air_gap_bottom, 0.0).await?;
        }

        if let Some(wait) = options.wait_after_aspirate {
            self.operator
                .delay(wait, &format!("Waiting {} seconds.", wait.as_secs_f64()))
                .await?;
        }

        if options.avoid_droplet {
            pipette.move_to(&source.bottom(pickup_height)).await?;
        }

        let dispensed = delivered + reagent.air_gap_bottom;
        let drop = dest.top(options.drop_height).moved_x(options.dest_x_offset);
        pipette
            .dispense(dispensed, &drop, reagent.flow_rate_dispense)
            .await?;

        if reagent.air_gap_top > 0.0 {
            pipette
                .dispense(reagent.air_gap_top, &dest.top(0.0), reagent.flow_rate_dispense)
                .await?;
        }

        if options.blow_out {
            pipette.blow_out(&dest.top(options.drop_height)).await?;
        }

        if let Some(touch) = options.touch_tip {
            pipette
                .touch_tip(touch.speed, touch.v_offset, touch.radius)
                .await?;
        }

        if let Some(wait) = options.wait_after_dispense {
            self.operator
                .delay(wait, &format!("Waiting {} seconds.", wait.as_secs_f64()))
                .await?;
        }

        self.stats.transfers += 1;
        self.stats.volume_aspirated += volume;
        self.stats.volume_delivered += delivered;
        debug!(
            reagent = %reagent.name,
            source = %source,
            dest = %dest,
            volume,
            pickup_height,
            "Transfer complete"
        );

        Ok(TransferReport {
            aspirated: volume,
            dispensed,
            delivered,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn aspirate_x_scroll(
        &self,
        pipette: &dyn Pipette,
        reagent: &Reagent,
        source: &WellRef,
        volume: f64,
        pickup_height: f64,
        start: f64,
        stop: f64,
    ) -> AppResult<()> {
        let min_volume = pipette.min_volume().max(f64::EPSILON);
        let steps = ((volume / min_volume).floor() as usize).max(1);
        let step_volume = volume / steps as f64;
        let increment = (stop - start) / steps as f64;

        for i in 1..=steps {
            let location = source
                .bottom(pickup_height)
                .moved_x(start + increment * i as f64);
            pipette
                .aspirate(step_volume, &location, reagent.flow_rate_aspirate)
                .await?;
        }
        Ok(())
    }

    /// Mix in place at `location`.
    ///
    /// # Errors
    ///
    /// `PipetteCapacityExceeded` if the mix volume plus the 1 uL prime does not
    /// fit the tip, or any hardware failure.
    pub async fn mix(
        &mut self,
        pipette: &dyn Pipette,
        reagent: &Reagent,
        location: &WellRef,
        options: &MixOptions,
    ) -> AppResult<()> {
        Self::check_tip_load(pipette, options.volume + 1.0)?;

        let mix_height = if options.mix_height <= 0.0 {
            1.0
        } else {
            options.mix_height
        };
        let aspirate_at = location.bottom(mix_height);
        let bottom_rounds = (options.rounds * 2).div_ceil(3);

        pipette
            .aspirate(1.0, &aspirate_at, reagent.flow_rate_aspirate_mix)
            .await?;
        for i in 0..options.rounds {
            pipette
                .aspirate(options.volume, &aspirate_at, reagent.flow_rate_aspirate_mix)
                .await?;
            let drop = if options.two_thirds_mix_bottom && i < bottom_rounds {
                location.bottom(5.0)
            } else {
                location.top(options.drop_height)
            }
            .moved_x(options.x_offset);
            pipette
                .dispense(options.volume, &drop, reagent.flow_rate_dispense_mix)
                .await?;
        }
        pipette
            .dispense(1.0, &aspirate_at, reagent.flow_rate_dispense_mix)
            .await?;

        if options.blow_out {
            pipette.blow_out(&location.top(-2.0)).await?;
        }
        if let Some(wait) = options.wait {
            self.operator
                .delay(wait, &format!("Waiting {} seconds.", wait.as_secs_f64()))
                .await?;
        }

        self.stats.mixes += 1;
        debug!(reagent = %reagent.name, well = %location, rounds = options.rounds, "Mix complete");
        Ok(())
    }

    /// Most destinations one aspirate of `volume_each` can serve.
    pub fn destinations_per_aspirate(
        pipette: &dyn Pipette,
        reagent: &Reagent,
        volume_each: f64,
        options: &DistributeOptions,
    ) -> usize {
        if volume_each <= 0.0 {
            return 0;
        }
        let by_tip =
            (pipette.max_volume() - options.extra_dispensal - options.air_gap) / volume_each;
        let by_reagent = reagent.max_volume_allowed / volume_each;
        by_tip.min(by_reagent).max(0.0).floor() as usize
    }

    /// Aspirate once and dispense `volume_each` into every destination in turn.
    ///
    /// The extra dispensal volume is blown out into `waste` at the end.
    /// Returns the volume delivered to the destinations.
    ///
    /// # Errors
    ///
    /// `PipetteCapacityExceeded` when the destinations, extra volume and air gap
    /// do not fit one tip, or any hardware failure.
    #[allow(clippy::too_many_arguments)]
    pub async fn distribute(
        &mut self,
        pipette: &dyn Pipette,
        reagent: &Reagent,
        source: &WellRef,
        destinations: &[WellRef],
        volume_each: f64,
        pickup_height: f64,
        waste: &WellRef,
        options: &DistributeOptions,
    ) -> AppResult<f64> {
        let delivered = volume_each * destinations.len() as f64;
        let total = delivered + options.extra_dispensal;
        Self::check_tip_load(pipette, total + options.air_gap)?;

        pipette
            .aspirate(total, &source.bottom(pickup_height), reagent.flow_rate_aspirate)
            .await?;
        if let Some(touch) = options.touch_tip {
            pipette
                .touch_tip(touch.speed, touch.v_offset, touch.radius)
                .await?;
        }
        pipette.move_to(&source.top(5.0)).await?;
        pipette.air_gap(options.air_gap, 5.0).await?;

        for dest in destinations {
            let drop = dest.top(options.drop_height).moved_x(options.dest_x_offset);
            pipette
                .dispense(volume_each + options.air_gap, &drop, reagent.flow_rate_dispense)
                .await?;
            pipette.move_to(&dest.top(5.0)).await?;
            pipette.air_gap(options.air_gap, 5.0).await?;
        }

        pipette.blow_out(&waste.bottom(pickup_height + 3.0)).await?;

        self.stats.distributions += 1;
        self.stats.volume_aspirated += total;
        self.stats.volume_delivered += delivered;
        debug!(
            reagent = %reagent.name,
            destinations = destinations.len(),
            volume_each,
            "Distribute complete"
        );
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{Anchor, MockPipette, Mount, PipetteAction, RecordingOperator};

    fn engine() -> (TransferEngine, Arc<RecordingOperator>) {
        let operator = Arc::new(RecordingOperator::new());
        (TransferEngine::new(operator.clone()), operator)
    }

    fn beads() -> Reagent {
        Reagent::builder("Beads")
            .air_gaps(5.0, 0.0)
            .disposal_volume(1.0)
            .max_volume_allowed(200.0)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_transfer_stage_order() {
        let (mut engine, operator) = engine();
        let pipette = MockPipette::multichannel(Mount::Right, 300.0);
        pipette.pick_up_tip().await.unwrap();
        let src = WellRef::new("reservoir", 0);
        let dst = WellRef::new("deepwell", 2);
        let options = TransferOptions::default()
            .release_trailing_air_gap(true)
            .wait_after_aspirate(Duration::from_secs(2))
            .avoid_droplet(true)
            .blow_out(true)
            .touch_tip(TouchTip::default());

        let report = engine
            .transfer(&pipette, &beads(), &src, &dst, 101.0, 1.5, &options)
            .await
            .unwrap();
        assert_eq!(report.dispensed, 105.0);
        assert_eq!(report.delivered, 100.0);

        let actions = pipette.actions();
        assert!(matches!(actions[0], PipetteAction::PickUpTip));
        assert!(matches!(actions[1], PipetteAction::Dispense { volume, .. } if volume == 5.0));
        assert!(matches!(actions[2], PipetteAction::Aspirate { volume, .. } if volume == 101.0));
        assert!(matches!(actions[3], PipetteAction::AirGap { volume, .. } if volume == 5.0));
        assert!(matches!(actions[4], PipetteAction::MoveTo { .. }));
        match &actions[5] {
            PipetteAction::Dispense { volume, location, .. } => {
                assert_eq!(*volume, 105.0);
                assert_eq!(location.anchor, Anchor::Top);
                assert_eq!(location.z, -5.0);
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert!(matches!(actions[6], PipetteAction::BlowOut { .. }));
        assert!(matches!(actions[7], PipetteAction::TouchTip { .. }));
        assert_eq!(operator.delays(), vec![Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn test_top_air_gap_released_above_destination() {
        let (mut engine, _) = engine();
        let pipette = MockPipette::single_channel(Mount::Left, 300.0);
        pipette.pick_up_tip().await.unwrap();
        let reagent = Reagent::builder("Ethanol")
            .air_gaps(0.0, 10.0)
            .build()
            .unwrap();
        let dst = WellRef::new("deepwell", 0);
        engine
            .transfer(
                &pipette,
                &reagent,
                &WellRef::new("reservoir", 0),
                &dst,
                150.0,
                1.0,
                &TransferOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(pipette.dispensed_volumes(), vec![150.0, 10.0]);
        assert_eq!(pipette.loaded_volume(), 0.0);
    }

    #[tokio::test]
    async fn test_transfer_validation() {
        let (mut engine, _) = engine();
        let pipette = MockPipette::multichannel(Mount::Right, 200.0);
        pipette.pick_up_tip().await.unwrap();
        let src = WellRef::new("reservoir", 0);
        let dst = WellRef::new("deepwell", 0);

        let err = engine
            .transfer(&pipette, &beads(), &src, &dst, 250.0, 1.0, &TransferOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::VolumeExceedsLimit { .. }));

        let err = engine
            .transfer(&pipette, &beads(), &src, &dst, 198.0, 1.0, &TransferOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::PipetteCapacityExceeded { .. }));
        // nothing touched the hardware
        assert_eq!(pipette.actions().len(), 1);
    }

    #[tokio::test]
    async fn test_x_scroll_aspirate() {
        let (mut engine, _) = engine();
        let pipette = MockPipette::multichannel(Mount::Right, 300.0);
        pipette.pick_up_tip().await.unwrap();
        let options = TransferOptions::default().x_scroll(0.0, 2.0);
        let reagent = Reagent::builder("Supernatant").build().unwrap();
        engine
            .transfer(
                &pipette,
                &reagent,
                &WellRef::new("deepwell", 0),
                &WellRef::new("waste", 0),
                100.0,
                0.5,
                &options,
            )
            .await
            .unwrap();

        let offsets: Vec<f64> = pipette
            .actions()
            .into_iter()
            .filter_map(|a| match a {
                PipetteAction::Aspirate { location, .. } => Some(location.x_offset),
                _ => None,
            })
            .collect();
        assert_eq!(offsets.len(), 5);
        assert!((offsets[4] - 2.0).abs() < 1e-9);
        assert!(offsets.windows(2).all(|w| w[1] > w[0]));
        assert!((pipette.aspirated_volumes().iter().sum::<f64>() - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_mix_two_thirds_bottom() {
        let (mut engine, _) = engine();
        let pipette = MockPipette::multichannel(Mount::Right, 300.0);
        pipette.pick_up_tip().await.unwrap();
        let well = WellRef::new("deepwell", 0);
        let options = MixOptions::new(6, 150.0)
            .mix_height(0.0)
            .two_thirds_mix_bottom(true)
            .blow_out(true);
        engine.mix(&pipette, &beads(), &well, &options).await.unwrap();

        let aspirates: Vec<_> = pipette
            .actions()
            .into_iter()
            .filter_map(|a| match a {
                PipetteAction::Aspirate { location, .. } => Some(location.z),
                _ => None,
            })
            .collect();
        assert_eq!(aspirates, vec![1.0; 7]);

        let drops: Vec<Anchor> = pipette
            .actions()
            .into_iter()
            .filter_map(|a| match a {
                PipetteAction::Dispense { volume, location, .. } if volume == 150.0 => {
                    Some(location.anchor)
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            drops,
            vec![
                Anchor::Bottom,
                Anchor::Bottom,
                Anchor::Bottom,
                Anchor::Bottom,
                Anchor::Top,
                Anchor::Top
            ]
        );
        assert!(matches!(pipette.actions().last(), Some(PipetteAction::BlowOut { .. })));
        assert_eq!(engine.stats().mixes, 1);
    }

    #[tokio::test]
    async fn test_mix_bottom_rounds_round_up() {
        for (rounds, bottom) in [(4, 3), (5, 4), (7, 5)] {
            let (mut engine, _) = engine();
            let pipette = MockPipette::multichannel(Mount::Right, 300.0);
            pipette.pick_up_tip().await.unwrap();
            let well = WellRef::new("deepwell", 0);
            let options = MixOptions::new(rounds, 150.0).two_thirds_mix_bottom(true);
            engine.mix(&pipette, &beads(), &well, &options).await.unwrap();

            let drops: Vec<Anchor> = pipette
                .actions()
                .into_iter()
                .filter_map(|a| match a {
                    PipetteAction::Dispense { volume, location, .. } if volume == 150.0 => {
                        Some(location.anchor)
                    }
                    _ => None,
                })
                .collect();
            assert_eq!(drops.len(), rounds as usize);
            assert_eq!(
                drops.iter().filter(|a| **a == Anchor::Bottom).count(),
                bottom,
                "rounds = {rounds}"
            );
            assert!(drops[..bottom].iter().all(|a| *a == Anchor::Bottom));
        }
    }

    #[tokio::test]
    async fn test_distribute() {
        let (mut engine, _) = engine();
        let pipette = MockPipette::single_channel(Mount::Left, 300.0);
        pipette.pick_up_tip().await.unwrap();
        let reagent = Reagent::builder("MasterMix").build().unwrap();
        let dests: Vec<WellRef> = (0..4).map(|i| WellRef::new("pcr_plate", i)).collect();
        let options = DistributeOptions {
            extra_dispensal: 10.0,
            air_gap: 5.0,
            ..Default::default()
        };

        let delivered = engine
            .distribute(
                &pipette,
                &reagent,
                &WellRef::new("tube", 0),
                &dests,
                20.0,
                1.0,
                &WellRef::new("waste", 0),
                &options,
            )
            .await
            .unwrap();
        assert_eq!(delivered, 80.0);
        assert_eq!(pipette.aspirated_volumes(), vec![90.0]);
        assert_eq!(pipette.dispensed_volumes(), vec![25.0; 4]);
        assert!(matches!(pipette.actions().last(), Some(PipetteAction::BlowOut { .. })));
        assert_eq!(
            TransferEngine::destinations_per_aspirate(&pipette, &reagent, 20.0, &options),
            9
        );
    }
}
