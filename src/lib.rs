pub mod config;
pub mod db;
pub mod diagnostics;
pub mod engine;
pub mod errors;
pub mod interval;
pub mod models;
pub mod numerics;
pub mod returns;
pub mod rows;
pub mod server;
pub mod state;
pub mod variables;

pub use engine::{compute, compute_with, ComputeOutput};
pub use errors::{EngineError, EngineResult};
pub use rows::{ComputedRow, InputRow, RowReason};
pub use variables::{normalize, RawConfigBag, Variables, VolModel};
