//! Blueprint Types - Core type definitions for the visual scripting system
//!
//! This crate contains the pure data structures used by the blueprint engine:
//! the dynamic [`Value`], pin and connection definitions, the blueprint
//! document itself and the pre-built [`BlueprintGraph`] indexes.

mod graph;
mod types;
mod value;

pub use graph::*;
pub use types::*;
pub use value::*;
