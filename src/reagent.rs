//! Reagent definitions, container geometry and reservoir provisioning.
//!
//! A [`Reagent`] is immutable liquid-class data: flow rates, air gaps, disposal
//! volume, the per-aspirate ceiling and the geometry of the container it sits in.
//! The mutable column/volume state lives in [`crate::reservoir::ReservoirState`].

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::{AppResult, HandlerError};

/// Default dead volume of a reservoir well in uL.
pub const DEFAULT_DEAD_VOLUME: f64 = 700.0;

/// Liquid-height model constants of one container type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContainerGeometry {
    /// Horizontal cross section in mm²
    pub cross_section_area: f64,
    /// Volume held below the flat-estimate zero line (cone, sphere, prism bottom) in uL
    pub cone_volume: f64,
}

impl ContainerGeometry {
    /// Geometry from raw constants.
    pub fn new(cross_section_area: f64, cone_volume: f64) -> Self {
        Self {
            cross_section_area,
            cone_volume,
        }
    }
}

/// Container shapes with a known liquid-height model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum ContainerShape {
    /// Flat-bottom cylindrical well
    Cylinder {
        /// Well radius in mm
        radius: f64,
    },
    /// Rectangular reservoir trough with a V-shaped bottom
    Prismatic {
        /// Trough cross section in mm²
        cross_section_area: f64,
        /// Depth of the V bottom in mm
        bottom_height: f64,
    },
    /// Tube with a conical tip
    ConicalTube {
        /// Tube radius in mm
        radius: f64,
        /// Height of the conical tip in mm
        cone_height: f64,
    },
    /// Tube with a round bottom
    SphericalTube {
        /// Tube radius in mm
        radius: f64,
    },
    /// Explicit constants, for containers measured empirically
    Custom {
        /// Horizontal cross section in mm²
        cross_section_area: f64,
        /// Volume below the zero line in uL
        cone_volume: f64,
    },
}

impl ContainerShape {
    /// Area and bottom volume for the height model
    pub fn geometry(&self) -> ContainerGeometry {
        match *self {
            ContainerShape::Cylinder { radius } => ContainerGeometry::new(PI * radius * radius, 0.0),
            ContainerShape::Prismatic {
                cross_section_area,
                bottom_height,
            } => ContainerGeometry::new(cross_section_area, bottom_height * cross_section_area / 2.0),
            ContainerShape::ConicalTube {
                radius,
                cone_height,
            } => {
                let area = PI * radius * radius;
                ContainerGeometry::new(area, area * cone_height / 3.0)
            }
            // Whole-sphere volume; overestimates the cap so the tip stays clear of the bottom.
            ContainerShape::SphericalTube { radius } => {
                ContainerGeometry::new(PI * radius * radius, 4.0 * PI * radius.powi(3) / 3.0)
            }
            ContainerShape::Custom {
                cross_section_area,
                cone_volume,
            } => ContainerGeometry::new(cross_section_area, cone_volume),
        }
    }
}

/// A named liquid consumable and its handling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reagent {
    /// Name used in logs and reports
    pub name: String,
    /// Aspirate flow multiplier
    pub flow_rate_aspirate: f64,
    /// Dispense flow multiplier
    pub flow_rate_dispense: f64,
    /// Aspirate flow multiplier while mixing
    pub flow_rate_aspirate_mix: f64,
    /// Dispense flow multiplier while mixing
    pub flow_rate_dispense_mix: f64,
    /// Trailing air cushion drawn after the liquid
    pub air_gap_bottom: f64,
    /// Leading air cushion drawn before the liquid
    pub air_gap_top: f64,
    /// Extra volume aspirated and never dispensed
    pub disposal_volume: f64,
    /// Ceiling for the delivered volume of one aspirate
    pub max_volume_allowed: f64,
    /// Unreachable residual volume of one well
    pub dead_volume: f64,
    /// Source container constants
    pub geometry: ContainerGeometry,
}

impl Reagent {
    /// Start a builder with the default handling parameters.
    pub fn builder(name: impl Into<String>) -> ReagentBuilder {
        ReagentBuilder::new(name)
    }
}

/// Builder for [`Reagent`] with the defaults shared by most protocols.
#[derive(Debug, Clone)]
pub struct ReagentBuilder {
    reagent: Reagent,
}

impl ReagentBuilder {
    /// Builder for a reagent called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            reagent: Reagent {
                name: name.into(),
                flow_rate_aspirate: 1.0,
                flow_rate_dispense: 1.0,
                flow_rate_aspirate_mix: 1.0,
                flow_rate_dispense_mix: 1.0,
                air_gap_bottom: 0.0,
                air_gap_top: 0.0,
                disposal_volume: 0.0,
                max_volume_allowed: 180.0,
                dead_volume: DEFAULT_DEAD_VOLUME,
                geometry: ContainerGeometry::new(1.0, 0.0),
            },
        }
    }

    /// Aspirate and dispense flow multipliers
    pub fn flow_rates(mut self, aspirate: f64, dispense: f64) -> Self {
        self.reagent.flow_rate_aspirate = aspirate;
        self.reagent.flow_rate_dispense = dispense;
        self
    }

    /// Flow multipliers while mixing
    pub fn mix_flow_rates(mut self, aspirate: f64, dispense: f64) -> Self {
        self.reagent.flow_rate_aspirate_mix = aspirate;
        self.reagent.flow_rate_dispense_mix = dispense;
        self
    }

    /// Trailing and leading air gaps in uL
    pub fn air_gaps(mut self, bottom: f64, top: f64) -> Self {
        self.reagent.air_gap_bottom = bottom;
        self.reagent.air_gap_top = top;
        self
    }

    /// Per-channel volume aspirated and never dispensed
    pub fn disposal_volume(mut self, volume: f64) -> Self {
        self.reagent.disposal_volume = volume;
        self
    }

    /// Ceiling for the delivered volume of one aspirate
    pub fn max_volume_allowed(mut self, volume: f64) -> Self {
        self.reagent.max_volume_allowed = volume;
        self
    }

    /// Residual volume left in every reservoir well
    pub fn dead_volume(mut self, volume: f64) -> Self {
        self.reagent.dead_volume = volume;
        self
    }

    /// Derive the geometry from a container shape
    pub fn container(mut self, shape: ContainerShape) -> Self {
        self.reagent.geometry = shape.geometry();
        self
    }

    /// Set the geometry constants directly
    pub fn geometry(mut self, geometry: ContainerGeometry) -> Self {
        self.reagent.geometry = geometry;
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::Configuration` for an empty name, non-positive flow
    /// rates, area or ceiling, or negative volumes.
    pub fn build(self) -> AppResult<Reagent> {
        let r = self.reagent;
        let invalid = |what: &str| {
            Err(HandlerError::Configuration(format!(
                "Reagent '{}': {}",
                r.name, what
            )))
        };

        if r.name.trim().is_empty() {
            return Err(HandlerError::Configuration(
                "Reagent name cannot be empty".to_string(),
            ));
        }
        let rates = [
            r.flow_rate_aspirate,
            r.flow_rate_dispense,
            r.flow_rate_aspirate_mix,
            r.flow_rate_dispense_mix,
        ];
        if rates.iter().any(|rate| *rate <= 0.0) {
            return invalid("flow rates must be positive");
        }
        if r.max_volume_allowed <= 0.0 {
            return invalid("max_volume_allowed must be positive");
        }
        if r.geometry.cross_section_area <= 0.0 {
            return invalid("cross section area must be positive");
        }
        let volumes = [
            r.air_gap_bottom,
            r.air_gap_top,
            r.disposal_volume,
            r.dead_volume,
            r.geometry.cone_volume,
        ];
        if volumes.iter().any(|v| *v < 0.0) {
            return invalid("volumes cannot be negative");
        }
        Ok(r)
    }
}

/// How a reagent's source container is filled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provisioning {
    /// Spread over as many wells of a multi-well reservoir as needed
    MultiWell {
        /// Usable volume of one well, dead volume excluded
        well_capacity: f64,
    },
    /// One large single-well reservoir holding the whole run
    SingleWell,
    /// Operator-defined fill per well
    Fixed {
        /// Volume loaded into each well
        fill_volume: f64,
        /// Wells loaded
        num_wells: usize,
    },
}

/// Wells and per-well fill volume the operator has to load.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReservoirPlan {
    /// Wells to fill, 0 for reagents never drawn from a reservoir
    pub num_wells: usize,
    /// Volume per well, dead volume included
    pub fill_volume: f64,
    /// Volume one pipette pass draws from a well, all channels, disposal excluded
    pub pass_volume: f64,
}

/// Split a per-sample volume into equal trips that respect `max_volume`.
pub fn split_into_trips(volume: f64, max_volume: f64) -> Vec<f64> {
    if volume <= 0.0 || max_volume <= 0.0 {
        return Vec::new();
    }
    let trips = (volume / max_volume).ceil() as usize;
    vec![volume / trips as f64; trips]
}

/// Number of pipette passes (columns for multichannel, wells otherwise) for a sample count.
pub fn num_passes(num_samples: usize, channels: u32) -> usize {
    num_samples.div_ceil(channels.max(1) as usize)
}

impl Provisioning {
    /// Compute how many wells a reagent needs and how full each must be.
    ///
    /// For multi-well reservoirs every well holds a whole number of multichannel
    /// trips plus the dead volume, so a column is never abandoned with a usable
    /// partial aliquot left.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::Configuration` when a single trip does not fit in
    /// one well.
    pub fn plan(
        &self,
        reagent: &Reagent,
        volume_per_sample: f64,
        num_samples: usize,
        channels: u32,
    ) -> AppResult<ReservoirPlan> {
        if volume_per_sample * num_samples as f64 <= 0.0 {
            return Ok(ReservoirPlan {
                num_wells: 0,
                fill_volume: 0.0,
                pass_volume: 0.0,
            });
        }

        let trips = split_into_trips(volume_per_sample, reagent.max_volume_allowed).len();
        let vol_trip = volume_per_sample / trips as f64 * channels as f64;

        match *self {
            Provisioning::MultiWell { well_capacity } => {
                let max_trips_well = (well_capacity / vol_trip).floor() as usize;
                if max_trips_well == 0 {
                    return Err(HandlerError::Configuration(format!(
                        "Reagent '{}': one trip of {:.1} uL does not fit a {:.1} uL well",
                        reagent.name, vol_trip, well_capacity
                    )));
                }
                let total_trips = num_passes(num_samples, channels) * trips;
                let num_wells = total_trips.div_ceil(max_trips_well);
                let trips_per_well = total_trips.div_ceil(num_wells);
                Ok(ReservoirPlan {
                    num_wells,
                    fill_volume: trips_per_well as f64 * vol_trip + reagent.dead_volume,
                    pass_volume: vol_trip,
                })
            }
            Provisioning::SingleWell => Ok(ReservoirPlan {
                num_wells: 1,
                fill_volume: volume_per_sample * num_samples as f64 + reagent.dead_volume,
                pass_volume: vol_trip,
            }),
            Provisioning::Fixed {
                fill_volume,
                num_wells,
            } => Ok(ReservoirPlan {
                num_wells,
                fill_volume,
                pass_volume: vol_trip,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lysis() -> Reagent {
        Reagent::builder("Lysis")
            .air_gaps(5.0, 0.0)
            .disposal_volume(1.0)
            .max_volume_allowed(180.0)
            .container(ContainerShape::Custom {
                cross_section_area: 8.0 * 71.0,
                cone_volume: 695.0,
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_split_into_trips() {
        assert_eq!(split_into_trips(300.0, 180.0), vec![150.0, 150.0]);
        assert_eq!(split_into_trips(90.0, 180.0), vec![90.0]);
        assert_eq!(split_into_trips(180.0, 180.0), vec![180.0]);
        assert!(split_into_trips(0.0, 180.0).is_empty());
    }

    #[test]
    fn test_num_passes() {
        assert_eq!(num_passes(96, 8), 12);
        assert_eq!(num_passes(20, 8), 3);
        assert_eq!(num_passes(5, 1), 5);
    }

    #[test]
    fn test_multi_well_provisioning() {
        // 96 samples x 300 uL, two trips of 150 uL per column, 1200 uL per 8-channel trip.
        let plan = Provisioning::MultiWell {
            well_capacity: 18000.0,
        }
        .plan(&lysis(), 300.0, 96, 8)
        .unwrap();
        // 15 trips fit in a well, 24 trips needed -> 2 wells of 12 trips each.
        assert_eq!(plan.num_wells, 2);
        assert_eq!(plan.fill_volume, 12.0 * 1200.0 + 700.0);
        assert_eq!(plan.pass_volume, 1200.0);
    }

    #[test]
    fn test_single_well_and_empty_provisioning() {
        let plan = Provisioning::SingleWell.plan(&lysis(), 100.0, 16, 8).unwrap();
        assert_eq!(plan.num_wells, 1);
        assert_eq!(plan.fill_volume, 1600.0 + 700.0);

        let plan = Provisioning::SingleWell.plan(&lysis(), 0.0, 16, 8).unwrap();
        assert_eq!(plan.num_wells, 0);
    }

    #[test]
    fn test_trip_larger_than_well_is_rejected() {
        let result = Provisioning::MultiWell {
            well_capacity: 1000.0,
        }
        .plan(&lysis(), 150.0, 8, 8);
        assert!(matches!(result, Err(HandlerError::Configuration(_))));
    }

    #[test]
    fn test_geometry_models() {
        let prism = ContainerShape::Prismatic {
            cross_section_area: 568.0,
            bottom_height: 1.95,
        }
        .geometry();
        assert!((prism.cone_volume - 553.8).abs() < 1e-9);

        let sphere = ContainerShape::SphericalTube { radius: 4.0 }.geometry();
        assert!((sphere.cone_volume - 4.0 * PI * 64.0 / 3.0).abs() < 1e-9);

        let cylinder = ContainerShape::Cylinder { radius: 1.0 }.geometry();
        assert_eq!(cylinder.cone_volume, 0.0);
    }

    #[test]
    fn test_builder_validation() {
        assert!(Reagent::builder("").build().is_err());
        assert!(Reagent::builder("Beads").flow_rates(0.0, 1.0).build().is_err());
        assert!(Reagent::builder("Beads").disposal_volume(-1.0).build().is_err());
        assert!(Reagent::builder("Beads").build().is_ok());
    }
}
