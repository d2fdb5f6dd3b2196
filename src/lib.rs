pub mod algorithms;
pub mod config;
pub mod data;
pub mod error;
pub mod io;
pub mod logging;
pub mod session;
pub mod visualization;

pub use algorithms::*;
pub use data::*;
pub use error::{AlignError, AlignResult};
pub use session::{AlignmentSession, OptimizationHandle, RunOutcome};

pub type Result<T> = anyhow::Result<T>;
