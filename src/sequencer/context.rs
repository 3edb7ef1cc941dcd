//! Resources shared by every step of one run.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{AppResult, HandlerError};
use crate::hardware::{MagneticModule, Mount, Operator, Pipette, TemperatureModule};
use crate::reservoir::{ReagentUsage, ReservoirState};
use crate::tips::{TipDisposal, TipInventory};
use crate::transfer::TransferEngine;

/// Reagent reservoirs of a run, keyed by reagent name.
#[derive(Debug, Default)]
pub struct Reservoirs {
    by_name: HashMap<String, ReservoirState>,
    order: Vec<String>,
}

impl Reservoirs {
    /// Add a reservoir; a second state for the same reagent replaces the first
    pub fn insert(&mut self, state: ReservoirState) {
        let name = state.name().to_string();
        if self.by_name.insert(name.clone(), state).is_none() {
            self.order.push(name);
        }
    }

    /// Reservoir of `name`.
    ///
    /// # Errors
    ///
    /// `UnknownReagent` when no reservoir was provisioned for it.
    pub fn get(&self, name: &str) -> AppResult<&ReservoirState> {
        self.by_name
            .get(name)
            .ok_or_else(|| HandlerError::UnknownReagent(name.to_string()))
    }

    /// Mutable [`Self::get`].
    ///
    /// # Errors
    ///
    /// `UnknownReagent` when no reservoir was provisioned for it.
    pub fn get_mut(&mut self, name: &str) -> AppResult<&mut ReservoirState> {
        self.by_name
            .get_mut(name)
            .ok_or_else(|| HandlerError::UnknownReagent(name.to_string()))
    }

    /// Reservoirs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &ReservoirState> {
        self.order.iter().filter_map(|name| self.by_name.get(name))
    }

    /// Usage of every reservoir in insertion order
    pub fn usage(&self) -> Vec<ReagentUsage> {
        self.iter().map(ReservoirState::usage).collect()
    }
}

/// Everything a step body may act on.
///
/// The context is owned by one [`super::StepSequencer`] and lent to each step
/// in turn, so no resource is ever shared between runs or touched concurrently.
/// Fields that bodies need to borrow together (`tips`, `engine`, `reservoirs`)
/// are public; hardware handles are cloned out as `Arc`s.
pub struct RunContext {
    pipettes: BTreeMap<Mount, Arc<dyn Pipette>>,
    operator: Arc<dyn Operator>,
    magnet: Option<Arc<dyn MagneticModule>>,
    temperature: Option<Arc<dyn TemperatureModule>>,
    /// Tip state of every loaded pipette
    pub tips: TipInventory,
    /// Reagent reservoirs by name
    pub reservoirs: Reservoirs,
    /// Transfer engine and its totals
    pub engine: TransferEngine,
    /// Return tips to the rack instead of dropping them
    pub recycle_tips: bool,
}

impl RunContext {
    /// Context with no devices loaded beyond the operator.
    pub fn new(operator: Arc<dyn Operator>) -> Self {
        Self {
            pipettes: BTreeMap::new(),
            engine: TransferEngine::new(operator.clone()),
            operator,
            magnet: None,
            temperature: None,
            tips: TipInventory::new(),
            reservoirs: Reservoirs::default(),
            recycle_tips: false,
        }
    }

    /// Load a pipette and register its tip racks.
    pub fn with_pipette(mut self, pipette: Arc<dyn Pipette>, tip_capacity: u32) -> AppResult<Self> {
        self.tips
            .register(pipette.mount(), pipette.channels(), tip_capacity)?;
        self.pipettes.insert(pipette.mount(), pipette);
        Ok(self)
    }

    /// Add a provisioned reservoir
    pub fn with_reservoir(mut self, state: ReservoirState) -> Self {
        self.reservoirs.insert(state);
        self
    }

    /// Load a magnetic module
    pub fn with_magnet(mut self, magnet: Arc<dyn MagneticModule>) -> Self {
        self.magnet = Some(magnet);
        self
    }

    /// Load a temperature module
    pub fn with_temperature(mut self, module: Arc<dyn TemperatureModule>) -> Self {
        self.temperature = Some(module);
        self
    }

    /// Dry-run tip recycling
    pub fn with_recycled_tips(mut self, recycle: bool) -> Self {
        self.recycle_tips = recycle;
        self
    }

    /// Pipette on `mount`.
    ///
    /// # Errors
    ///
    /// `UnknownPipette` when nothing is loaded there.
    pub fn pipette(&self, mount: Mount) -> AppResult<Arc<dyn Pipette>> {
        self.pipettes
            .get(&mount)
            .cloned()
            .ok_or(HandlerError::UnknownPipette(mount))
    }

    /// Shared operator handle
    pub fn operator(&self) -> Arc<dyn Operator> {
        self.operator.clone()
    }

    /// Write `message` to the run log
    pub fn comment(&self, message: &str) {
        self.operator.comment(message);
    }

    /// Loaded magnetic module.
    ///
    /// # Errors
    ///
    /// `ModuleNotLoaded` when the run has none.
    pub fn magnet(&self) -> AppResult<Arc<dyn MagneticModule>> {
        self.magnet
            .clone()
            .ok_or(HandlerError::ModuleNotLoaded("magnetic"))
    }

    /// Loaded temperature module.
    ///
    /// # Errors
    ///
    /// `ModuleNotLoaded` when the run has none.
    pub fn temperature(&self) -> AppResult<Arc<dyn TemperatureModule>> {
        self.temperature
            .clone()
            .ok_or(HandlerError::ModuleNotLoaded("temperature"))
    }

    /// Disposal used when a step releases a tip
    pub fn tip_disposal(&self) -> TipDisposal {
        if self.recycle_tips {
            TipDisposal::Recycle
        } else {
            TipDisposal::Drop
        }
    }
}
