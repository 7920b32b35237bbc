pub use api::{
    DetectionOptions, FrameSize, Keypoint, ModuleLogger, Pose, PoseModel, VideoFrame, VideoSource,
};

mod config;
mod eyes;
mod tracker;

pub use config::{load_config, ConfigError, PluginConfig, TrackerConfig};
pub use eyes::{extract_eye_pair, filter_eyes, is_eye_part, normalize, EyePair, EyePosition};
pub use tracker::{EyePairHandle, EyeSnapshot, EyeTracker, ModelStatus, TrackerState};
