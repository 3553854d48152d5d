pub mod estimator;
pub mod keypoint;
#[cfg(feature = "backend-movenet")]
pub mod movenet;

pub use estimator::{EstimateOptions, ModelConfig, PoseEstimator};
pub use keypoint::{Keypoint, KeypointIndex, Pose};
#[cfg(feature = "backend-movenet")]
pub use movenet::MoveNetEstimator;
