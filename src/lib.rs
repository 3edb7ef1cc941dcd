//! # Liquid Handling
//!
//! Reagent tracking, tip inventory and a staged transfer engine for
//! liquid-handling robot protocols (sample intake, RNA extraction, qPCR setup).
//!
//! ## Architecture
//!
//! - [`reservoir`]: per-reagent column/volume state and pickup height model
//! - [`tips`]: tip consumption per pipette with operator-gated rack refills
//! - [`transfer`]: one liquid move as a fixed sequence of optional stages
//! - [`sequencer`]: ordered, individually enabled steps run one at a time
//!
//! The robot itself is reached only through the capability traits in
//! [`hardware`]; [`protocol`] builds complete runs from a [`config::RunConfig`].

pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod protocol;
pub mod reagent;
pub mod report;
pub mod reservoir;
pub mod sequencer;
pub mod tips;
pub mod transfer;

pub use error::{AppResult, HandlerError};
