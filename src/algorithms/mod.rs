pub mod convergence;
pub mod correlation;
pub mod model;
pub mod optimizer;
pub mod powell;
pub mod traits;

pub use convergence::*;
pub use correlation::*;
pub use model::*;
pub use optimizer::*;
pub use powell::*;
pub use traits::*;
