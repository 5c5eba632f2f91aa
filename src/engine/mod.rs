pub mod cp_sat_engine;
pub mod solver_engine;

pub use cp_sat_engine::CpSatEngine;
pub use solver_engine::{SolveOutcome, SolverEngine};
