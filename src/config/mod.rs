//! Configuration models for the engine.

pub mod engine;

pub use engine::EngineConfig;
