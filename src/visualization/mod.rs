pub mod overlay;

pub use overlay::{compose_overlay, packed_overlay, ChannelScale};
