//! DOM mutation engine: translates protocol node events into a replayable
//! update stream.

mod model;
mod update;

pub use model::{DomError, DomModel};
pub use update::{Action, DomUpdate, UpdateBatch, UpdateNode};
