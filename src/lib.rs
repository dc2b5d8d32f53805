#![allow(clippy::result_large_err)]

pub mod app;
pub mod config;
pub mod container;
pub mod coordination;
pub mod election;
pub mod error;
pub mod liveness;
pub mod logging;
pub mod management;
pub mod metrics;
pub mod runtime;
pub mod status;
pub mod supervisor;
pub mod telemetry;
