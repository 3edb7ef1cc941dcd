//! Run configuration using Figment
//!
//! A protocol run is described by one TOML file. Values are loaded from:
//! 1. the TOML file (base configuration)
//! 2. environment variables prefixed with `LIQUID_` (nested keys split on `__`)
//!
//! # Environment Variable Overrides
//!
//! ```text
//! LIQUID_APPLICATION__LOG_LEVEL=debug
//! LIQUID_RUN__NUM_SAMPLES=48
//! LIQUID_RUN__SIMULATE=false
//! ```
//!
//! # Example
//!
//! ```no_run
//! use liquid_handling::config::RunConfig;
//!
//! let config = RunConfig::load_from("config/extraction.toml")?;
//! println!("{}: {} samples", config.application.name, config.run.num_samples);
//! # Ok::<(), liquid_handling::error::HandlerError>(())
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{AppResult, HandlerError};
use crate::hardware::Mount;
use crate::reagent::{ContainerShape, Provisioning, Reagent, DEFAULT_DEAD_VOLUME};

/// Top-level run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Application name and logging
    pub application: ApplicationConfig,
    /// Sample count and run-wide settings
    pub run: RunSettings,
    /// Loaded pipettes, at most one per mount
    pub pipettes: Vec<PipetteConfig>,
    /// Reagents and liquid classes
    #[serde(default)]
    pub reagents: Vec<ReagentConfig>,
    /// Protocol steps in run order
    #[serde(default)]
    pub steps: Vec<StepConfig>,
    /// Step-time log export
    #[serde(default)]
    pub report: ReportConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Protocol name shown in logs and reports
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Console output format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Run-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    /// Samples processed, filled column by column
    pub num_samples: usize,
    /// Return tips to their racks instead of discarding them (dry runs only)
    #[serde(default)]
    pub recycle_tips: bool,
    /// Skip real waiting on delays
    #[serde(default = "default_true")]
    pub simulate: bool,
    /// Default magnet engage height
    #[serde(default = "default_magnet_height")]
    pub magnet_height: f64,
    /// Temperature module set point applied before the first step
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Shared multi-well reagent reservoir
    #[serde(default = "default_reservoir_labware")]
    pub reservoir_labware: String,
    /// Wells in the shared reservoir
    #[serde(default = "default_reservoir_wells")]
    pub reservoir_wells: usize,
}

/// Pipette definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipetteConfig {
    /// Gantry mount
    pub mount: Mount,
    /// 1 or 8
    pub channels: u32,
    /// Tip volume in uL
    pub max_volume: f64,
    /// Defaults to 1/10 of `max_volume`
    #[serde(default)]
    pub min_volume: Option<f64>,
    /// Racks loaded per refill
    #[serde(default = "default_tip_racks")]
    pub tip_racks: u32,
    /// Tips in one rack
    #[serde(default = "default_tips_per_rack")]
    pub tips_per_rack: u32,
}

impl PipetteConfig {
    /// Tips available per refill
    pub fn tip_capacity(&self) -> u32 {
        self.tip_racks * self.tips_per_rack
    }

    /// Smallest accurate aspirate
    pub fn min_volume(&self) -> f64 {
        self.min_volume.unwrap_or(self.max_volume / 10.0)
    }
}

/// Reagent definition with its reservoir placement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReagentConfig {
    /// Unique reagent name, referenced by steps
    pub name: String,
    /// Aspirate flow multiplier
    #[serde(default = "default_flow_rate")]
    pub flow_rate_aspirate: f64,
    /// Dispense flow multiplier
    #[serde(default = "default_flow_rate")]
    pub flow_rate_dispense: f64,
    /// Aspirate flow multiplier while mixing
    #[serde(default = "default_flow_rate")]
    pub flow_rate_aspirate_mix: f64,
    /// Dispense flow multiplier while mixing
    #[serde(default = "default_flow_rate")]
    pub flow_rate_dispense_mix: f64,
    /// Trailing air gap in uL
    #[serde(default)]
    pub air_gap_bottom: f64,
    /// Leading air gap in uL
    #[serde(default)]
    pub air_gap_top: f64,
    /// Per-channel volume aspirated and never dispensed
    #[serde(default)]
    pub disposal_volume: f64,
    /// Ceiling for the delivered volume of one aspirate
    #[serde(default = "default_max_volume_allowed")]
    pub max_volume_allowed: f64,
    /// Residual volume left in every well
    #[serde(default = "default_dead_volume")]
    pub dead_volume: f64,
    /// Source container shape
    pub container: ContainerShape,
    /// Volume delivered to each sample; 0 for liquids that are never drawn from a reservoir
    #[serde(default)]
    pub volume_per_sample: f64,
    /// How the reservoir wells are filled
    #[serde(default = "default_provisioning")]
    pub provisioning: Provisioning,
    /// Labware holding the reagent; defaults to the shared reservoir
    #[serde(default)]
    pub labware: Option<String>,
    /// 1-based first well, ignored when it precedes the next free well
    #[serde(default)]
    pub first_well: Option<usize>,
    /// Pipette that draws this reagent
    #[serde(default = "default_mount")]
    pub mount: Mount,
}

impl ReagentConfig {
    /// Validated [`Reagent`] for the transfer engine.
    ///
    /// # Errors
    ///
    /// `Configuration` when a handling parameter is out of range.
    pub fn to_reagent(&self) -> AppResult<Reagent> {
        Reagent::builder(&self.name)
            .flow_rates(self.flow_rate_aspirate, self.flow_rate_dispense)
            .mix_flow_rates(self.flow_rate_aspirate_mix, self.flow_rate_dispense_mix)
            .air_gaps(self.air_gap_bottom, self.air_gap_top)
            .disposal_volume(self.disposal_volume)
            .max_volume_allowed(self.max_volume_allowed)
            .dead_volume(self.dead_volume)
            .container(self.container)
            .build()
    }
}

/// One `[[steps]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Shown in the run log
    pub description: String,
    /// Disabled steps are logged but never run
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Hold time handed to the step body
    #[serde(default)]
    pub wait_time_secs: Option<f64>,
    /// What the step does
    pub action: StepAction,
}

/// Step body kinds, tagged by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    /// Operator delay of `wait_time_secs`
    Wait {
        /// Text shown while waiting
        #[serde(default)]
        message: Option<String>,
    },
    /// Engage the magnet, then incubate
    EngageMagnet {
        /// Defaults to `run.magnet_height`
        #[serde(default)]
        height: Option<f64>,
    },
    /// Disengage the magnet, then incubate
    DisengageMagnet,
    /// Change the temperature set point
    SetTemperature {
        /// Set point in degrees Celsius
        celsius: f64,
    },
    /// Reservoir reagent into every sample column
    ReservoirTransfer(ReservoirTransferConfig),
    /// Column to column, or to a waste
    ColumnTransfer(ColumnTransferConfig),
    /// One aspirate to several wells
    Distribute(DistributeConfig),
}

impl StepAction {
    fn mount(&self) -> Option<Mount> {
        match self {
            StepAction::ReservoirTransfer(c) => Some(c.mount),
            StepAction::ColumnTransfer(c) => Some(c.mount),
            StepAction::Distribute(c) => Some(c.mount),
            _ => None,
        }
    }
}

/// Reagent reservoir to every sample column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservoirTransferConfig {
    /// Reagent to draw
    pub reagent: String,
    /// Pipette that performs the step
    #[serde(default = "default_mount")]
    pub mount: Mount,
    /// Destination labware
    pub destination: String,
    /// Per-sample volume, defaults to the reagent's `volume_per_sample`
    #[serde(default)]
    pub volume_per_sample: Option<f64>,
    /// Use this height instead of tracking the reservoir level
    #[serde(default)]
    pub fixed_pickup_height: Option<f64>,
    /// Dispense height relative to the destination top
    #[serde(default = "default_drop_height")]
    pub drop_height: f64,
    /// Lateral dispense offset, alternating side per column when non-zero
    #[serde(default)]
    pub side_offset: f64,
    /// Blow out after each dispense
    #[serde(default)]
    pub blow_out: bool,
    /// Touch the destination wall after dispensing
    #[serde(default)]
    pub touch_tip: bool,
    /// Pause after each aspirate
    #[serde(default)]
    pub wait_after_aspirate_secs: Option<f64>,
    /// Fresh tip for every column; otherwise one tip for the whole step
    #[serde(default = "default_true")]
    pub tip_per_column: bool,
    /// Mix the source column before each draw
    #[serde(default)]
    pub reservoir_mix: Option<ReservoirMixConfig>,
    /// Mix every destination after the transfer
    #[serde(default)]
    pub destination_mix: Option<MixConfig>,
}

/// Re-homogenising of the source column before draws
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservoirMixConfig {
    /// Rounds on later draws
    pub rounds: u32,
    /// Rounds for the first draw from a freshly opened column
    pub first_rounds: u32,
    /// Mix volume in uL
    pub volume: f64,
    /// Aspirate height above the well bottom
    #[serde(default = "default_mix_height")]
    pub height: f64,
}

/// Mix settings for destination wells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixConfig {
    /// Mix rounds
    pub rounds: u32,
    /// Volume per round in uL
    pub volume: f64,
    /// Aspirate height above the well bottom
    #[serde(default = "default_mix_height")]
    pub height: f64,
    /// Dispense near the bottom for two thirds of the rounds
    #[serde(default)]
    pub two_thirds_mix_bottom: bool,
    /// Blow out after mixing
    #[serde(default)]
    pub blow_out: bool,
}

/// Column to column (or to waste) transfer of sample liquid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnTransferConfig {
    /// Reagent whose liquid class (flow rates, air gaps, disposal) is used
    pub liquid: String,
    /// Pipette that performs the step
    #[serde(default = "default_mount")]
    pub mount: Mount,
    /// Source labware
    pub source: String,
    /// Destination labware
    pub destination: String,
    /// Send every column to well 0 of the destination
    #[serde(default)]
    pub to_waste: bool,
    /// Volume moved per sample in uL
    pub volume_per_sample: f64,
    /// Aspirate height above the source bottom
    #[serde(default = "default_column_pickup_height")]
    pub pickup_height: f64,
    /// Lateral aspirate offset magnitude, side alternates per column
    #[serde(default = "default_side_offset")]
    pub side_offset: f64,
    /// Pause after aspirating, for beads to settle
    #[serde(default = "default_settle_secs")]
    pub settle_secs: Option<f64>,
    /// Dispense the previous trailing air gap first
    #[serde(default = "default_true")]
    pub release_trailing_air_gap: bool,
    /// Aspirate while scrolling between two offsets
    #[serde(default)]
    pub x_scroll: Option<XScrollConfig>,
    /// Dispense height relative to the destination top
    #[serde(default = "default_drop_height")]
    pub drop_height: f64,
    /// Blow out after each dispense
    #[serde(default)]
    pub blow_out: bool,
    /// Touch the destination wall after dispensing
    #[serde(default)]
    pub touch_tip: bool,
}

/// Lateral offsets of an x-scroll aspirate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct XScrollConfig {
    /// First offset
    pub start: f64,
    /// Last offset
    pub stop: f64,
}

/// One reservoir aspirate fanned out to several sample wells
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributeConfig {
    /// Reagent to draw
    pub reagent: String,
    /// Pipette that performs the step
    #[serde(default = "default_mount")]
    pub mount: Mount,
    /// Destination labware
    pub destination: String,
    /// Volume per destination well
    pub volume_per_well: f64,
    /// Safety volume aspirated on top of the total
    #[serde(default)]
    pub extra_dispensal: f64,
    /// Air gap after each drop
    #[serde(default = "default_air_gap")]
    pub air_gap: f64,
    /// Dispense height relative to the destination top
    #[serde(default = "default_drop_height")]
    pub drop_height: f64,
    /// Labware receiving the blow-out
    #[serde(default = "default_waste")]
    pub waste: String,
}

/// Step-time log export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Write the step-time log after a run
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Directory the log is written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: default_output_dir(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_magnet_height() -> f64 {
    7.0
}

fn default_reservoir_labware() -> String {
    "reagent_reservoir".to_string()
}

fn default_reservoir_wells() -> usize {
    12
}

fn default_tip_racks() -> u32 {
    1
}

fn default_tips_per_rack() -> u32 {
    96
}

fn default_flow_rate() -> f64 {
    1.0
}

fn default_max_volume_allowed() -> f64 {
    180.0
}

fn default_dead_volume() -> f64 {
    DEFAULT_DEAD_VOLUME
}

fn default_provisioning() -> Provisioning {
    Provisioning::MultiWell {
        well_capacity: 11500.0,
    }
}

fn default_mount() -> Mount {
    Mount::Right
}

fn default_drop_height() -> f64 {
    -5.0
}

fn default_mix_height() -> f64 {
    1.5
}

fn default_column_pickup_height() -> f64 {
    0.5
}

fn default_side_offset() -> f64 {
    2.0
}

fn default_settle_secs() -> Option<f64> {
    Some(2.0)
}

fn default_air_gap() -> f64 {
    5.0
}

fn default_waste() -> String {
    "waste".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl RunConfig {
    /// Load configuration from a TOML file and `LIQUID_` environment variables
    ///
    /// Environment variables take precedence over the file. The result is
    /// validated before it is returned.
    ///
    /// # Errors
    ///
    /// `HandlerError::Config` if the file cannot be parsed, or
    /// `HandlerError::Configuration` if validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("LIQUID_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string, without environment overrides
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        let config: Self = Figment::new().merge(Toml::string(toml)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid
    /// - At least one sample and one pipette, pipette mounts unique
    /// - Pipettes have 1 or 8 channels and a tip capacity that is a multiple of them
    /// - Reagent names unique, reagent parameters valid
    /// - Every step references a known reagent and a loaded pipette
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(HandlerError::Configuration(msg));

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.run.num_samples == 0 {
            return invalid("num_samples must be > 0".to_string());
        }

        if self.pipettes.is_empty() {
            return invalid("At least one pipette must be configured".to_string());
        }
        let mut mounts = HashSet::new();
        for pipette in &self.pipettes {
            if !mounts.insert(pipette.mount) {
                return invalid(format!("Duplicate pipette on {} mount", pipette.mount));
            }
            if pipette.channels != 1 && pipette.channels != 8 {
                return invalid(format!(
                    "Pipette on {} mount: channels must be 1 or 8, got {}",
                    pipette.mount, pipette.channels
                ));
            }
            if pipette.max_volume <= 0.0 {
                return invalid(format!(
                    "Pipette on {} mount: max_volume must be > 0",
                    pipette.mount
                ));
            }
            let capacity = pipette.tip_capacity();
            if capacity == 0 || capacity % pipette.channels != 0 {
                return invalid(format!(
                    "Pipette on {} mount: {} tips is not a multiple of {} channels",
                    pipette.mount, capacity, pipette.channels
                ));
            }
        }

        let mut names = HashSet::new();
        for reagent in &self.reagents {
            if !names.insert(reagent.name.as_str()) {
                return invalid(format!("Duplicate reagent name: '{}'", reagent.name));
            }
            reagent.to_reagent()?;
            if reagent.volume_per_sample < 0.0 {
                return invalid(format!(
                    "Reagent '{}': volume_per_sample cannot be negative",
                    reagent.name
                ));
            }
            if !mounts.contains(&reagent.mount) {
                return invalid(format!(
                    "Reagent '{}' uses the {} mount but no pipette is loaded there",
                    reagent.name, reagent.mount
                ));
            }
        }

        for step in &self.steps {
            if let Some(mount) = step.action.mount() {
                if !mounts.contains(&mount) {
                    return invalid(format!(
                        "Step '{}' uses the {} mount but no pipette is loaded there",
                        step.description, mount
                    ));
                }
            }
            if step.wait_time_secs.is_some_and(|s| s < 0.0 || !s.is_finite()) {
                return invalid(format!(
                    "Step '{}': wait_time_secs must be a non-negative number",
                    step.description
                ));
            }
            self.validate_step_reagent(step)?;
        }

        if self.report.enabled && self.report.output_dir.as_os_str().is_empty() {
            return invalid("report.output_dir cannot be empty".to_string());
        }

        Ok(())
    }

    fn validate_step_reagent(&self, step: &StepConfig) -> AppResult<()> {
        let (name, needs_reservoir) = match &step.action {
            StepAction::ReservoirTransfer(c) => (&c.reagent, true),
            StepAction::Distribute(c) => (&c.reagent, true),
            StepAction::ColumnTransfer(c) => (&c.liquid, false),
            _ => return Ok(()),
        };
        let reagent = self
            .reagent(name)
            .ok_or_else(|| HandlerError::UnknownReagent(name.clone()))?;
        if needs_reservoir && reagent.volume_per_sample <= 0.0 {
            return Err(HandlerError::Configuration(format!(
                "Step '{}' draws '{}' from a reservoir but its volume_per_sample is 0",
                step.description, name
            )));
        }
        Ok(())
    }

    /// Reagent called `name`
    pub fn reagent(&self, name: &str) -> Option<&ReagentConfig> {
        self.reagents.iter().find(|r| r.name == name)
    }

    /// Pipette on `mount`
    pub fn pipette(&self, mount: Mount) -> Option<&PipetteConfig> {
        self.pipettes.iter().find(|p| p.mount == mount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [application]
        name = "Test"

        [run]
        num_samples = 16

        [[pipettes]]
        mount = "right"
        channels = 8
        max_volume = 300.0
        tip_racks = 2

        [[reagents]]
        name = "Lysis"
        volume_per_sample = 300.0
        disposal_volume = 1.0
        container = { shape = "custom", cross_section_area = 568.0, cone_volume = 695.0 }

        [[steps]]
        description = "Transfer lysis"
        action = { kind = "reservoir_transfer", reagent = "Lysis", destination = "deepwell" }

        [[steps]]
        description = "Incubate"
        wait_time_secs = 300
        action = { kind = "wait" }
    "#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = RunConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.application.log_level, "info");
        assert_eq!(config.application.log_format, LogFormat::Pretty);
        assert!(config.run.simulate);
        assert_eq!(config.pipettes[0].tip_capacity(), 192);
        assert_eq!(config.pipettes[0].min_volume(), 30.0);
        assert_eq!(config.reagents[0].max_volume_allowed, 180.0);
        assert!(matches!(
            config.reagents[0].provisioning,
            Provisioning::MultiWell { .. }
        ));
        assert_eq!(config.steps.len(), 2);
        assert!(matches!(config.steps[1].action, StepAction::Wait { message: None }));
        assert!(config.report.enabled);
    }

    #[test]
    fn test_unknown_reagent_in_step() {
        let toml = MINIMAL.replace("reagent = \"Lysis\"", "reagent = \"Beads\"");
        let err = RunConfig::from_toml_str(&toml).unwrap_err();
        assert!(matches!(err, HandlerError::UnknownReagent(name) if name == "Beads"));
    }

    #[test]
    fn test_invalid_channel_count() {
        let toml = MINIMAL.replace("channels = 8", "channels = 4");
        assert!(matches!(
            RunConfig::from_toml_str(&toml),
            Err(HandlerError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_log_level() {
        let toml = MINIMAL.replace("name = \"Test\"", "name = \"Test\"\nlog_level = \"loud\"");
        assert!(RunConfig::from_toml_str(&toml).is_err());
    }

    #[test]
    fn test_missing_pipette_mount() {
        let toml = MINIMAL.replace(
            "destination = \"deepwell\" }",
            "destination = \"deepwell\", mount = \"left\" }",
        );
        assert!(matches!(
            RunConfig::from_toml_str(&toml),
            Err(HandlerError::Configuration(_))
        ));
    }
}
