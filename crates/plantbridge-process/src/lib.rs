//! Process model, its single-owner task and the address space over it.

pub mod address_space;
pub mod errors;
pub mod fanout;
pub mod history;
pub mod model;
pub mod owner;
pub mod plant;
pub mod simulation;

use std::sync::Arc;

pub use address_space::AddressSpace;
pub use errors::ModelError;
pub use fanout::{ChangeFanout, ChangeListener};
pub use history::{History, HistorySample};
pub use model::{PlantState, PlantVariable, ProcessModel, ProcessVariable};
pub use owner::{ModelHandle, ModelOwner, OwnerConfig};
pub use plant::{heater_plant, nodes};
pub use simulation::{HeaterParams, HeaterSimulation, ScriptedSimulation, Simulation};

/// Wire a model to its owner and an address space sharing one fan-out.
///
/// The returned owner must be driven with [`ModelOwner::run`].
pub fn build_plant(model: ProcessModel, config: &OwnerConfig) -> (ModelOwner, AddressSpace) {
    let descriptors = model.descriptors();
    let fanout = Arc::new(ChangeFanout::new());
    let (owner, handle) = ModelOwner::new(model, Arc::clone(&fanout), config);
    (owner, AddressSpace::new(descriptors, handle, fanout))
}
