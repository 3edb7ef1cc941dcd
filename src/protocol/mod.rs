//! Data-driven protocol layer.
//!
//! Turns a [`RunConfig`] into a ready-to-run [`ProtocolRun`]: reagents are
//! provisioned and placed in reservoir wells, pipettes and modules are loaded
//! into a [`RunContext`], and every `[[steps]]` entry becomes a [`Step`].

pub mod steps;

pub use steps::{
    find_side, sample_wells, ColumnTransfer, DistributeToWells, ReservoirMix, ReservoirTransfer,
};

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{RunConfig, StepAction, StepConfig};
use crate::error::{AppResult, HandlerError};
use crate::hardware::{
    MagneticModule, MockMagnet, MockPipette, MockTemperature, Operator, Pipette,
    TemperatureModule, WellRef,
};
use crate::reagent::{num_passes, ReservoirPlan};
use crate::reservoir::ReservoirState;
use crate::sequencer::{
    DisengageMagnet, EngageMagnet, RunContext, RunSummary, SetTemperature, Step, StepSequencer,
    Wait,
};
use crate::transfer::{DistributeOptions, MixOptions, TransferOptions};
use steps::configured_touch_tip;

/// Devices a run drives.
pub struct Hardware {
    /// Pipettes, at most one per mount
    pub pipettes: Vec<Arc<dyn Pipette>>,
    /// Receives comments, waits and pauses
    pub operator: Arc<dyn Operator>,
    /// Required by magnet steps
    pub magnet: Option<Arc<dyn MagneticModule>>,
    /// Required when a run temperature is set
    pub temperature: Option<Arc<dyn TemperatureModule>>,
}

impl Hardware {
    /// Mock devices matching the configuration, for dry runs.
    pub fn simulated(config: &RunConfig, operator: Arc<dyn Operator>) -> Self {
        let pipettes = config
            .pipettes
            .iter()
            .map(|p| {
                Arc::new(MockPipette::new(
                    p.mount,
                    p.channels,
                    p.max_volume,
                    p.min_volume(),
                )) as Arc<dyn Pipette>
            })
            .collect();
        Self {
            pipettes,
            operator,
            magnet: Some(Arc::new(MockMagnet::new())),
            temperature: Some(Arc::new(MockTemperature::new())),
        }
    }
}

/// Reagent placement reported to the operator before the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisionLine {
    /// Reagent name
    pub reagent: String,
    /// Reservoir labware the reagent is loaded into
    pub labware: String,
    /// 1-based first well
    pub first_well: usize,
    /// Consecutive wells to fill
    pub num_wells: usize,
    /// Volume per well in uL
    pub fill_volume: f64,
}

impl ProvisionLine {
    /// Operator-facing setup line.
    pub fn message(&self) -> String {
        format!(
            "{}: {} wells from well {} with volume {:.1} uL each",
            self.reagent, self.num_wells, self.first_well, self.fill_volume
        )
    }
}

/// Plan every reagent drawn from a reservoir and place it in consecutive wells.
///
/// Reagents sharing a labware are placed one after another in configuration
/// order. A configured `first_well` is honoured only if it does not precede
/// the next free well.
///
/// # Errors
///
/// `Configuration` when a reagent cannot be provisioned or the shared
/// reservoir runs out of wells.
pub fn provision(config: &RunConfig) -> AppResult<Vec<(ProvisionLine, ReservoirPlan)>> {
    let mut next_free: HashMap<String, usize> = HashMap::new();
    let mut lines = Vec::new();

    for reagent_cfg in config.reagents.iter().filter(|r| r.volume_per_sample > 0.0) {
        let channels = config
            .pipette(reagent_cfg.mount)
            .map(|p| p.channels)
            .ok_or(HandlerError::UnknownPipette(reagent_cfg.mount))?;
        let reagent = reagent_cfg.to_reagent()?;
        let plan = reagent_cfg.provisioning.plan(
            &reagent,
            reagent_cfg.volume_per_sample,
            config.run.num_samples,
            channels,
        )?;

        let labware = reagent_cfg
            .labware
            .clone()
            .unwrap_or_else(|| config.run.reservoir_labware.clone());
        let free = next_free.entry(labware.clone()).or_insert(0);
        let start = match reagent_cfg.first_well {
            Some(well) if well >= 1 && well - 1 >= *free => well - 1,
            _ => *free,
        };
        *free = start + plan.num_wells;

        if labware == config.run.reservoir_labware && *free > config.run.reservoir_wells {
            return Err(HandlerError::Configuration(format!(
                "Reagent '{}' needs wells {}..={} but {} only has {}",
                reagent.name,
                start + 1,
                *free,
                labware,
                config.run.reservoir_wells
            )));
        }

        lines.push((
            ProvisionLine {
                reagent: reagent.name.clone(),
                labware,
                first_well: start + 1,
                num_wells: plan.num_wells,
                fill_volume: plan.fill_volume,
            },
            plan,
        ));
    }
    Ok(lines)
}

/// A configured run, ready for [`ProtocolRun::execute`].
pub struct ProtocolRun {
    /// Application name from the configuration
    pub name: String,
    /// Devices and state the steps share
    pub context: RunContext,
    /// Steps in run order, disabled ones included
    pub steps: Vec<Step>,
    /// Reagent setup shown before the run
    pub provisioning: Vec<ProvisionLine>,
    temperature: Option<f64>,
}

impl ProtocolRun {
    /// Build the run context and step list from configuration.
    ///
    /// # Errors
    ///
    /// `Configuration`, `UnknownReagent` or `UnknownPipette` for inconsistent
    /// configuration or hardware.
    pub fn build(config: &RunConfig, hardware: Hardware) -> AppResult<Self> {
        let mut context = RunContext::new(hardware.operator.clone())
            .with_recycled_tips(config.run.recycle_tips);

        for pipette in hardware.pipettes {
            let pipette_cfg = config
                .pipette(pipette.mount())
                .ok_or(HandlerError::UnknownPipette(pipette.mount()))?;
            context = context.with_pipette(pipette, pipette_cfg.tip_capacity())?;
        }
        if let Some(magnet) = hardware.magnet {
            context = context.with_magnet(magnet);
        }
        if let Some(temperature) = hardware.temperature {
            context = context.with_temperature(temperature);
        }

        let mut provisioning = Vec::new();
        for (line, plan) in provision(config)? {
            let reagent_cfg = config
                .reagent(&line.reagent)
                .ok_or_else(|| HandlerError::UnknownReagent(line.reagent.clone()))?;
            let channels = context.pipette(reagent_cfg.mount)?.channels();
            let wells = (0..plan.num_wells)
                .map(|i| WellRef::new(line.labware.clone(), line.first_well - 1 + i))
                .collect();
            let state =
                ReservoirState::provisioned(reagent_cfg.to_reagent()?, wells, &plan, channels)?;
            context = context.with_reservoir(state);
            provisioning.push(line);
        }

        let mut steps = Vec::with_capacity(config.steps.len());
        for (i, step_cfg) in config.steps.iter().enumerate() {
            steps.push(build_step(config, &context, i as u32 + 1, step_cfg)?);
        }

        Ok(Self {
            name: config.application.name.clone(),
            context,
            steps,
            provisioning,
            temperature: config.run.temperature,
        })
    }

    /// Announce reagent placement, apply the set point and run every step.
    pub async fn execute(self) -> AppResult<RunSummary> {
        let ProtocolRun {
            name,
            context,
            mut steps,
            provisioning,
            temperature,
        } = self;

        context.comment(&format!("Starting protocol: {}", name));
        for line in &provisioning {
            context.comment(&line.message());
        }
        if let Some(celsius) = temperature {
            context.temperature()?.set_temperature(celsius).await?;
            info!(celsius, "Temperature module set");
        }

        let mut sequencer = StepSequencer::new(context);
        sequencer.run(&mut steps).await
    }
}

fn secs(value: Option<f64>) -> Option<Duration> {
    value.map(Duration::from_secs_f64)
}

fn build_step(
    config: &RunConfig,
    context: &RunContext,
    ordinal: u32,
    step_cfg: &StepConfig,
) -> AppResult<Step> {
    let description = step_cfg.description.clone();
    let step = match &step_cfg.action {
        StepAction::Wait { message } => Step::new(
            ordinal,
            description.clone(),
            Wait::new(message.clone().unwrap_or(description)),
        ),
        StepAction::EngageMagnet { height } => Step::new(
            ordinal,
            description,
            EngageMagnet::new(height.unwrap_or(config.run.magnet_height)),
        ),
        StepAction::DisengageMagnet => Step::new(ordinal, description, DisengageMagnet),
        StepAction::SetTemperature { celsius } => {
            Step::new(ordinal, description, SetTemperature::new(*celsius))
        }
        StepAction::ReservoirTransfer(c) => {
            let channels = context.pipette(c.mount)?.channels();
            let reagent_cfg = config
                .reagent(&c.reagent)
                .ok_or_else(|| HandlerError::UnknownReagent(c.reagent.clone()))?;
            let passes = num_passes(config.run.num_samples, channels);

            let mut body = ReservoirTransfer::new(
                &c.reagent,
                c.mount,
                sample_wells(&c.destination, passes),
                c.volume_per_sample.unwrap_or(reagent_cfg.volume_per_sample),
            );
            body.fixed_pickup_height = c.fixed_pickup_height;
            body.tip_per_column = c.tip_per_column;
            body.side_offset = c.side_offset;
            body.options = TransferOptions {
                drop_height: c.drop_height,
                blow_out: c.blow_out,
                touch_tip: configured_touch_tip(c.touch_tip),
                wait_after_aspirate: secs(c.wait_after_aspirate_secs),
                ..TransferOptions::default()
            };
            body.reservoir_mix = c.reservoir_mix.as_ref().map(|m| ReservoirMix {
                rounds: m.rounds,
                first_rounds: m.first_rounds,
                volume: m.volume,
                height: m.height,
            });
            body.destination_mix = c.destination_mix.as_ref().map(|m| {
                MixOptions::new(m.rounds, m.volume)
                    .mix_height(m.height)
                    .two_thirds_mix_bottom(m.two_thirds_mix_bottom)
                    .blow_out(m.blow_out)
            });
            Step::new(ordinal, description, body)
        }
        StepAction::ColumnTransfer(c) => {
            let channels = context.pipette(c.mount)?.channels();
            let liquid = config
                .reagent(&c.liquid)
                .ok_or_else(|| HandlerError::UnknownReagent(c.liquid.clone()))?
                .to_reagent()?;
            let passes = num_passes(config.run.num_samples, channels);
            let destinations = if c.to_waste {
                vec![WellRef::new(c.destination.clone(), 0); passes]
            } else {
                sample_wells(&c.destination, passes)
            };

            let mut body = ColumnTransfer::new(
                liquid,
                c.mount,
                sample_wells(&c.source, passes),
                destinations,
                c.volume_per_sample,
            )?;
            body.pickup_height = c.pickup_height;
            body.side_offset = c.side_offset;
            body.release_trailing_air_gap = c.release_trailing_air_gap;
            let mut options = TransferOptions {
                drop_height: c.drop_height,
                blow_out: c.blow_out,
                touch_tip: configured_touch_tip(c.touch_tip),
                wait_after_aspirate: secs(c.settle_secs),
                ..TransferOptions::default()
            };
            if let Some(scroll) = c.x_scroll {
                options = options.x_scroll(scroll.start, scroll.stop);
            }
            body.options = options;
            Step::new(ordinal, description, body)
        }
        StepAction::Distribute(c) => {
            let channels = context.pipette(c.mount)?.channels();
            let passes = num_passes(config.run.num_samples, channels);
            Step::new(
                ordinal,
                description,
                DistributeToWells {
                    reagent: c.reagent.clone(),
                    mount: c.mount,
                    destinations: sample_wells(&c.destination, passes),
                    volume_per_well: c.volume_per_well,
                    waste: WellRef::new(c.waste.clone(), 0),
                    options: DistributeOptions {
                        extra_dispensal: c.extra_dispensal,
                        air_gap: c.air_gap,
                        drop_height: c.drop_height,
                        ..DistributeOptions::default()
                    },
                },
            )
        }
    };

    let mut step = step.enabled(step_cfg.enabled);
    if let Some(wait) = secs(step_cfg.wait_time_secs) {
        step = step.wait(wait);
    }
    Ok(step)
}
