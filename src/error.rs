//! Custom error types for the liquid handler.
//!
//! This module defines the primary error type, `HandlerError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! every fault that can stop a protocol run, from configuration problems to
//! reagent and tip accounting violations.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type
//!   mismatches while extracting the run configuration.
//! - **`Configuration`**: Semantic errors in a configuration that parsed fine but
//!   is logically wrong (unknown reagent in a step, zero samples, ...).
//! - **`Hardware`**: Any failure reported by a capability implementation (pipette,
//!   magnetic module, temperature module, operator). Drivers speak `anyhow`, the
//!   core converts with `?`.
//! - **`VolumeExceedsLimit`** / **`PipetteCapacityExceeded`**: a requested transfer
//!   does not fit the reagent's per-aspirate ceiling or the physical tip.
//! - **`ReservoirOverrun`** / **`ColumnTooSmall`**: a reagent ran out of provisioned
//!   wells, or a fresh well cannot supply one aspirate. The robot would otherwise
//!   aspirate from an empty or non-existent column, so both are fatal.
//! - **`TipAlreadyAttached`** / **`NoTipAttached`**: tip state machine violations.
//!
//! Tip exhaustion is deliberately absent: it is not an error but a pause-and-refill
//! transition handled inside [`crate::tips::TipInventory`].

use crate::hardware::Mount;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, HandlerError>;

/// Every fault that can stop a protocol run.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The configuration sources could not be parsed or extracted
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// The configuration parsed but is inconsistent
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure reported by a pipette, module or operator implementation
    #[error("Hardware error: {0}")]
    Hardware(#[from] anyhow::Error),

    /// Delivered volume above the reagent's per-aspirate ceiling
    #[error("Volume {requested} uL for '{reagent}' exceeds the allowed {max} uL per aspirate")]
    VolumeExceedsLimit {
        /// Reagent being moved
        reagent: String,
        /// Delivered volume of the rejected aspirate
        requested: f64,
        /// Configured `max_volume_allowed`
        max: f64,
    },

    /// Liquid plus air gaps do not fit the tip
    #[error("Tip load of {requested} uL exceeds pipette capacity of {max} uL")]
    PipetteCapacityExceeded {
        /// Total tip load of the rejected operation
        requested: f64,
        /// Nominal pipette maximum
        max: f64,
    },

    /// A reagent needs a column past the last provisioned well
    #[error("Reagent '{reagent}' needs column {column} but only {provisioned} were provisioned")]
    ReservoirOverrun {
        /// Reagent that ran out
        reagent: String,
        /// 1-based column the draw would need
        column: usize,
        /// Wells provisioned for the reagent
        provisioned: usize,
    },

    /// A freshly opened column cannot supply even one aspirate
    #[error(
        "Reagent '{reagent}' column {column} holds {usable} uL above the dead volume, less than the {needed} uL one aspirate draws"
    )]
    ColumnTooSmall {
        /// Reagent being drawn
        reagent: String,
        /// 1-based column that was about to be opened
        column: usize,
        /// Nominal fill minus dead volume
        usable: f64,
        /// Volume the aspirate removes from the column
        needed: f64,
    },

    /// Pick-up requested while a tip is attached
    #[error("Pipette on {0} mount already holds a tip")]
    TipAlreadyAttached(Mount),

    /// Release requested without a tip
    #[error("Pipette on {0} mount has no tip attached")]
    NoTipAttached(Mount),

    /// No pipette on the mount
    #[error("No pipette loaded on {0} mount")]
    UnknownPipette(Mount),

    /// No reagent or reservoir with this name
    #[error("Unknown reagent '{0}'")]
    UnknownReagent(String),

    /// A step needs a module the run did not load
    #[error("No {0} module loaded")]
    ModuleNotLoaded(&'static str),

    /// Step ordinals are not strictly increasing
    #[error("Step {ordinal} is out of order (previous step was {previous})")]
    StepOrder {
        /// Offending ordinal
        ordinal: u32,
        /// Ordinal of the step before it
        previous: u32,
    },

    /// Step log or summary could not be written
    #[error("Report error: {0}")]
    Report(String),
}

#[cfg(feature = "storage_csv")]
impl From<csv::Error> for HandlerError {
    fn from(err: csv::Error) -> Self {
        HandlerError::Report(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HandlerError::ReservoirOverrun {
            reagent: "Lysis".to_string(),
            column: 3,
            provisioned: 3,
        };
        assert_eq!(
            err.to_string(),
            "Reagent 'Lysis' needs column 3 but only 3 were provisioned"
        );
    }

    #[test]
    fn test_hardware_error_from_anyhow() {
        let err: HandlerError = anyhow::anyhow!("plunger stalled").into();
        assert!(matches!(err, HandlerError::Hardware(_)));
        assert!(err.to_string().contains("plunger stalled"));
    }

    #[test]
    fn test_tip_errors_name_the_mount() {
        let err = HandlerError::NoTipAttached(Mount::Right);
        assert_eq!(err.to_string(), "Pipette on right mount has no tip attached");
    }
}
