//! End-to-end checks of reservoir tracking, tip refills and transfer volumes.

use std::sync::Arc;

use liquid_handling::hardware::{
    ChannelOperator, MockPipette, Mount, Pipette, PipetteAction, RecordingOperator, WellRef,
};
use liquid_handling::reagent::{ContainerShape, Reagent};
use liquid_handling::reservoir::ReservoirState;
use liquid_handling::tips::{TipDisposal, TipInventory};
use liquid_handling::transfer::{TransferEngine, TransferOptions};
use liquid_handling::HandlerError;
use tokio_test::{assert_err, assert_ok};

const AREA: f64 = 8.0 * 71.0;
const ALIQUOT: f64 = 8.0 * 270.0;

fn reservoir(num_wells: usize) -> ReservoirState {
    let reagent = Reagent::builder("Lysis")
        .dead_volume(700.0)
        .container(ContainerShape::Custom {
            cross_section_area: AREA,
            cone_volume: 0.0,
        })
        .build()
        .unwrap();
    let wells = (0..num_wells)
        .map(|i| WellRef::new("reagent_reservoir", i))
        .collect();
    ReservoirState::new(reagent, wells, 11500.0, 8)
}

#[test]
fn column_advances_only_after_usable_volume_is_drawn() {
    let mut state = reservoir(2);
    let whole_aliquots = ((11500.0 - 700.0) / ALIQUOT).floor() as usize;
    assert_eq!(whole_aliquots, 5);

    for _ in 0..whole_aliquots {
        let update = state.calc_height(AREA, ALIQUOT, 0.5).unwrap();
        assert!(!update.column_advanced);
        assert!(update.height >= 0.5);
    }
    assert_eq!(state.column_index(), 0);

    let update = state.calc_height(AREA, ALIQUOT, 0.5).unwrap();
    assert!(update.column_advanced);
    assert_eq!(update.column, 1);
    assert_eq!(update.volume_remaining, 11500.0 - ALIQUOT);
}

#[test]
fn single_well_reservoir_reports_overrun() {
    let mut state = reservoir(1);
    for _ in 0..5 {
        assert_ok!(state.calc_height(AREA, ALIQUOT, 0.5));
    }
    let err = assert_err!(state.calc_height(AREA, ALIQUOT, 0.5));
    assert!(matches!(err, HandlerError::ReservoirOverrun { provisioned: 1, .. }));
    assert_eq!(state.column_index(), 0);
}

#[tokio::test]
async fn refill_pause_after_capacity_is_consumed() {
    let pipette = MockPipette::single_channel(Mount::Left, 300.0);
    let operator = RecordingOperator::new();
    let mut tips = TipInventory::new();
    tips.register(Mount::Left, 1, 96).unwrap();

    let mut previous = 0;
    for _ in 0..96 {
        let refilled = tips.acquire_tip(&pipette, &operator).await.unwrap();
        assert!(!refilled);
        tips.release_tip(&pipette, TipDisposal::Drop).await.unwrap();
        let consumed = tips.resource(Mount::Left).unwrap().consumed();
        assert!(consumed > previous);
        previous = consumed;
    }
    assert!(operator.pauses().is_empty());

    // 97th pick-up: pause, refill, then pick up.
    assert!(tips.acquire_tip(&pipette, &operator).await.unwrap());
    assert_eq!(operator.pauses().len(), 1);
    let resource = tips.resource(Mount::Left).unwrap();
    assert_eq!(resource.consumed(), 0);
    assert_eq!(resource.refills(), 1);
    let actions = pipette.actions();
    assert_eq!(
        &actions[actions.len() - 2..],
        &[PipetteAction::ResetTipracks, PipetteAction::PickUpTip]
    );

    // The next pick-up after the refill does not pause again.
    tips.release_tip(&pipette, TipDisposal::Drop).await.unwrap();
    assert!(!tips.acquire_tip(&pipette, &operator).await.unwrap());
    assert_eq!(operator.pauses().len(), 1);
    assert_eq!(tips.total_consumed(), 97);
}

#[tokio::test]
async fn refill_blocks_until_operator_resumes() {
    let pipette = MockPipette::multichannel(Mount::Right, 300.0);
    let (operator, mut requests) = ChannelOperator::new(1, true);
    let mut tips = TipInventory::new();
    tips.register(Mount::Right, 8, 8).unwrap();

    tips.acquire_tip(&pipette, &operator).await.unwrap();
    tips.release_tip(&pipette, TipDisposal::Drop).await.unwrap();

    let controller = tokio::spawn(async move {
        let request = requests.recv().await.unwrap();
        assert!(request.message.contains("Replace"));
        request.resume();
    });

    assert!(tips.acquire_tip(&pipette, &operator).await.unwrap());
    assert!(pipette.has_tip());
    controller.await.unwrap();
}

#[tokio::test]
async fn dispensed_volume_includes_trailing_air_gap() {
    let operator = Arc::new(RecordingOperator::new());
    let mut engine = TransferEngine::new(operator);
    let pipette = MockPipette::single_channel(Mount::Left, 300.0);
    pipette.pick_up_tip().await.unwrap();
    let reagent = Reagent::builder("Sample")
        .air_gaps(5.0, 0.0)
        .disposal_volume(1.0)
        .max_volume_allowed(200.0)
        .build()
        .unwrap();

    let report = engine
        .transfer(
            &pipette,
            &reagent,
            &WellRef::new("tube_rack", 0),
            &WellRef::new("deepwell", 0),
            200.0,
            1.0,
            &TransferOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(report.dispensed, 204.0);
    assert_eq!(pipette.dispensed_volumes(), vec![204.0]);
    // Only the disposal volume is left in the tip.
    assert!((pipette.loaded_volume() - 1.0).abs() < 1e-9);
    assert_eq!(pipette.max_volume(), 300.0);
}
