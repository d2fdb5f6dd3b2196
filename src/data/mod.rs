pub mod loader;
pub mod params;
pub mod projection;
pub mod stack;
pub mod synthetic;
pub mod transformer;

pub use loader::*;
pub use params::*;
pub use projection::*;
pub use stack::*;
pub use synthetic::*;
pub use transformer::*;
