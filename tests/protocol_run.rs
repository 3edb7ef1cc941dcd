//! Configured runs against mock hardware.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use liquid_handling::config::RunConfig;
use liquid_handling::hardware::{
    MagneticModule, MockMagnet, MockPipette, MockTemperature, Mount, Operator, Pipette,
    PipetteAction, RecordingOperator, TemperatureModule,
};
use liquid_handling::protocol::{Hardware, ProtocolRun};
use liquid_handling::report::{self, STEP_LOG_HEADER};
use liquid_handling::HandlerError;
use tempfile::TempDir;

const CONFIG: &str = r#"
[application]
name = "Lysis and clean-up"

[run]
num_samples = 16
temperature = 4.0

[[pipettes]]
mount = "right"
channels = 8
max_volume = 300.0
tip_racks = 1

[[reagents]]
name = "Lysis"
air_gap_bottom = 5.0
disposal_volume = 1.0
volume_per_sample = 300.0
container = { shape = "custom", cross_section_area = 568.0, cone_volume = 695.0 }

[[reagents]]
name = "Sample"
air_gap_bottom = 5.0
disposal_volume = 1.0
container = { shape = "spherical_tube", radius = 4.0 }

[[steps]]
description = "Transfer lysis"
[steps.action]
kind = "reservoir_transfer"
reagent = "Lysis"
destination = "deepwell"
destination_mix = { rounds = 3, volume = 150.0 }

[[steps]]
description = "Skipped wait"
enabled = false
wait_time_secs = 120
action = { kind = "wait" }

[[steps]]
description = "Magnet ON"
wait_time_secs = 600
action = { kind = "engage_magnet" }

[[steps]]
description = "Discard supernatant"
[steps.action]
kind = "column_transfer"
liquid = "Sample"
source = "deepwell"
destination = "waste"
to_waste = true
volume_per_sample = 300.0

[[steps]]
description = "Magnet OFF"
action = { kind = "disengage_magnet" }
"#;

struct Rig {
    pipette: Arc<MockPipette>,
    magnet: Arc<MockMagnet>,
    temperature: Arc<MockTemperature>,
    operator: Arc<RecordingOperator>,
}

impl Rig {
    fn new() -> Self {
        Self {
            pipette: Arc::new(MockPipette::multichannel(Mount::Right, 300.0)),
            magnet: Arc::new(MockMagnet::new()),
            temperature: Arc::new(MockTemperature::new()),
            operator: Arc::new(RecordingOperator::new()),
        }
    }

    fn hardware(&self, with_magnet: bool) -> Hardware {
        Hardware {
            pipettes: vec![self.pipette.clone() as Arc<dyn Pipette>],
            operator: self.operator.clone() as Arc<dyn Operator>,
            magnet: with_magnet.then(|| self.magnet.clone() as Arc<dyn MagneticModule>),
            temperature: Some(self.temperature.clone() as Arc<dyn TemperatureModule>),
        }
    }
}

#[tokio::test]
async fn configured_run_executes_enabled_steps_in_order() {
    let config = RunConfig::from_toml_str(CONFIG).unwrap();
    let rig = Rig::new();
    let run = ProtocolRun::build(&config, rig.hardware(true)).unwrap();
    assert_eq!(run.provisioning.len(), 1);
    assert_eq!(run.steps.len(), 5);

    let summary = run.execute().await.unwrap();

    assert_eq!(summary.steps.len(), 5);
    assert_eq!(summary.executed_steps().count(), 4);
    let skipped = &summary.steps[1];
    assert!(!skipped.executed);
    assert_eq!(skipped.elapsed, None);
    assert!(summary.steps[0].elapsed.is_some());

    // Two columns of lysis plus two columns of supernatant, 8 tips each.
    assert_eq!(summary.total_tips_consumed(), 32);
    assert_eq!(summary.total_refills(), 0);
    assert!(summary.total_volume_used() > 0.0);

    assert_eq!(rig.temperature.target(), Some(4.0));
    assert_eq!(rig.magnet.history(), vec![Some(7.0), None]);
    assert!(rig.operator.delays().contains(&Duration::from_secs(600)));

    let comments = rig.operator.comments();
    assert!(comments.iter().any(|c| c == "Step 1: Transfer lysis"));
    assert!(!comments.iter().any(|c| c.contains("Skipped wait")));
    assert!(!rig.pipette.has_tip());
}

#[tokio::test]
async fn failing_step_halts_the_run() {
    let config = RunConfig::from_toml_str(CONFIG).unwrap();
    let rig = Rig::new();
    let run = ProtocolRun::build(&config, rig.hardware(false)).unwrap();

    let err = run.execute().await.unwrap_err();
    assert!(matches!(err, HandlerError::ModuleNotLoaded(_)));

    // Only the lysis transfer touched the pipette: 2 columns, one tip each.
    let picked = rig
        .pipette
        .actions()
        .into_iter()
        .filter(|a| *a == PipetteAction::PickUpTip)
        .count();
    assert_eq!(picked, 2);
    assert!(!rig
        .operator
        .comments()
        .iter()
        .any(|c| c.contains("Discard supernatant")));
}

#[tokio::test]
async fn step_log_lists_every_step() {
    let config = RunConfig::from_toml_str(CONFIG).unwrap();
    let rig = Rig::new();
    let summary = ProtocolRun::build(&config, rig.hardware(true))
        .unwrap()
        .execute()
        .await
        .unwrap();

    let dir = TempDir::new().unwrap();
    let path = report::write_step_log(&summary, dir.path()).unwrap();
    let contents = fs::read_to_string(path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();

    assert_eq!(lines[0], STEP_LOG_HEADER.join("\t"));
    assert_eq!(lines.len(), 6);
    assert!(lines[2].starts_with("2\tno\tSkipped wait\t0:02:00\t"));
    assert!(lines[3].starts_with("3\tyes\tMagnet ON\t0:10:00\t"));

    let json = report::summary_json(&summary).unwrap();
    assert!(json.contains(&summary.run_id.to_string()));
}

#[test]
fn build_rejects_unloaded_pipette() {
    let config = RunConfig::from_toml_str(CONFIG).unwrap();
    let rig = Rig::new();
    let mut hardware = rig.hardware(true);
    hardware.pipettes =
        vec![Arc::new(MockPipette::single_channel(Mount::Left, 300.0)) as Arc<dyn Pipette>];

    let result = ProtocolRun::build(&config, hardware);
    assert!(matches!(result, Err(HandlerError::UnknownPipette(Mount::Left))));
}
