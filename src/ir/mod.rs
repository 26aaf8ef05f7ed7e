//! # Haze SSA Intermediate Representation
//!
//! A control-flow-graph based SSA representation of one compiled closure
//! variant, designed for the JIT's optimization passes.
//!
//! ## Key Properties
//!
//! | Property | Representation |
//! |----------|----------------|
//! | Values | Defined by instructions; one shared id space |
//! | Storage | Flat arenas indexed by stable ids |
//! | Control flow | Explicit block terminators, including speculative guards |
//! | Laziness | Promise bodies are independent CFGs owned by the version |
//!
//! ## Module Structure
//!
//! - [`types`] - Ids, instruction and terminator kinds, effects
//! - [`body`] - [`ClosureVersion`] and its construction API
//! - [`cfg`] - Reachability, reverse postorder, dominance queries
//! - [`transform`] - Block splitting, subgraph cloning, use replacement
//! - [`validate`] - Well-formedness checks between passes

pub mod body;
pub mod cfg;
pub mod transform;
pub mod types;
pub mod validate;

pub use body::{ClosureVersion, Promise, Properties};
pub use cfg::{Cfg, DomTree, EdgeMode};
pub use transform::{clone_subgraph, inline_return, replace_dominated_uses, replace_uses, replace_uses_in, split_block, CloneMap};
pub use types::{BlockData, BlockId, EffectSet, Instr, InstrId, InstrKind, PromiseId, Terminator, Ty, ValueId};
pub use validate::{validate, ValidateError};
