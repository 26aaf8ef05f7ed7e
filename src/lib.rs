//! # Haze JIT Optimizer Core
//!
//! Optimization infrastructure for the Haze just-in-time compiler. Haze
//! is a lazily-evaluated dynamic language: call arguments are bound as
//! promises and only evaluated when forced. The JIT lowers closures to an
//! SSA control-flow graph, and the passes here remove the laziness
//! overhead that lowering leaves behind.
//!
//! ## Pipeline
//!
//! ```text
//! Bytecode -> SSA lowering -> [analysis + optimization passes] -> codegen
//!                                       ^^^^ this crate
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use hazec::ir::{ClosureVersion, InstrKind, Terminator, Ty};
//! use hazec::opt::ForceDominance;
//!
//! // fn f(x) { x! ; x! }  -- the second force is redundant
//! let mut cv = ClosureVersion::new("f", 1);
//! let entry = cv.entry;
//! let x = cv.push(entry, InstrKind::LdArg { index: 0 }, Ty::Lazy);
//! let first = cv.push(entry, InstrKind::Force { arg: x, env: None, strict: false }, Ty::Value);
//! let again = cv.push(entry, InstrKind::Force { arg: first, env: None, strict: false }, Ty::Value);
//! cv.set_terminator(entry, Terminator::Return { value: again });
//!
//! ForceDominance::new().apply(&mut cv);
//!
//! // The redundant force is gone and the closure is proven eager-like.
//! assert_eq!(cv.block(entry).instrs, vec![x, first]);
//! assert!(cv.properties.is_eager);
//! ```
//!
//! ## Module Overview
//!
//! - [`ir`] - The SSA representation and CFG edit primitives
//! - [`analysis`] - Generic fixed-point dataflow engine and side queries
//! - [`opt`] - The optimization passes themselves
//! - [`config`] - Externally tunable thresholds

pub mod analysis;
pub mod config;
pub mod ir;
pub mod opt;

pub use config::Config;
pub use ir::{ClosureVersion, InstrId, InstrKind, Terminator, Ty};
pub use opt::ForceDominance;
