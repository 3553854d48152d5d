#[cfg(feature = "camera-opencv")]
pub mod capture;
pub mod facing;
pub mod source;

#[cfg(feature = "camera-opencv")]
pub use capture::OpenCvCamera;
pub use facing::FacingController;
pub use source::{CameraFacing, FrameDimensions, VideoSource};
