//! # Analysis Infrastructure
//!
//! - [`dataflow`] - Generic forward fixed-point engine over a CFG
//! - [`query`] - Cached side queries over promise bodies

pub mod dataflow;
pub mod query;

pub use dataflow::{run, AbstractDomain, AbstractResult, Converged, TransferFunction};
pub use query::PromiseQuery;
