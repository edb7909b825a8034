//! # slimp
//!
//! Data marshaling and diagnostics around an external MCMC sampling engine.
//!
//! - [`var_context`] turns named scalars and n-dimensional arrays into the typed, column-major
//!   variable context a model is instantiated on.
//! - [`writer`] turns the engine's per-draw callbacks into writes against one chain of a shared
//!   `(columns, chains, draws)` array.
//! - [`stats`] computes effective sample size and potential scale reduction, optionally batched
//!   over independent parameter sets on a bounded worker pool.
//! - [`actions`] glues them together: model lookup in a [`engine::ModelRegistry`], one writer per
//!   chain, engine call, column naming.
//!
//! The engine and the models are external collaborators, reached through the traits in
//! [`engine`].

pub mod actions;
pub mod config;
pub mod engine;
pub mod error;
pub mod io;
pub mod stats;
pub mod summary;
pub mod var_context;
pub mod writer;

pub use actions::{generate_quantities, parallel_sample, sample, SampleOutput};
pub use error::{Error, Result};
pub use var_context::VariableContext;
