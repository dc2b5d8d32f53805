#![allow(dead_code)]

pub mod engine;
pub mod fixtures;
pub mod probe;
pub mod store;

pub use engine::{EngineOp, MockEngine};
pub use fixtures::{elected_config, node_config, static_config};
pub use probe::ScriptedProbe;
pub use store::InMemoryStore;
