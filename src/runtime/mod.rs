//! Run lifecycle around a messaging engine.

pub mod run;

pub use run::{RunController, RunState, RunStatus};
