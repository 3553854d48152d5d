pub mod overlay;
pub mod skeleton;

pub use overlay::{Overlay, OverlaySurface};
pub use skeleton::SKELETON_CONNECTIONS;
