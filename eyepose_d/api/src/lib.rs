mod options;
pub use options::{DetectionOptions, OptionsError};

use anyhow::Result;
use glam::Vec2;
use serde::{Deserialize, Serialize};

/// A labeled landmark produced by a pose model, in source pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub part: String,
    pub position: Vec2,
    pub score: f32,
}

impl Keypoint {
    pub fn new(part: impl Into<String>, x: f32, y: f32, score: f32) -> Self {
        Self {
            part: part.into(),
            position: Vec2::new(x, y),
            score,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub score: f32,
    pub keypoints: Vec<Keypoint>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn as_vec2(&self) -> Vec2 {
        Vec2::new(self.width as f32, self.height as f32)
    }
}

/// A single RGB8 video frame, row major.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Uniformly filled frame.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self::new(width, height, pixels)
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }
}

/// log level for module logging
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

/// logger callback for plugins
pub type LogCallback = extern "C" fn(level: LogLevel, target: *const i8, message: *const i8);

/// Logger handed to plugins; routes messages back into the host's `log` setup.
pub struct ModuleLogger {
    callback: LogCallback,
    module_name: String,
}

impl ModuleLogger {
    pub fn new(callback: LogCallback, module_name: String) -> Self {
        Self {
            callback,
            module_name,
        }
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn trace(&self, message: &str) {
        self.log(LogLevel::Trace, message);
    }

    fn log(&self, level: LogLevel, message: &str) {
        // Interior NULs would truncate; strip them rather than drop the message.
        let target = std::ffi::CString::new(self.module_name.replace('\0', "")).unwrap_or_default();
        let msg = std::ffi::CString::new(message.replace('\0', "")).unwrap_or_default();
        (self.callback)(level, target.as_ptr(), msg.as_ptr());
    }
}

impl Clone for ModuleLogger {
    fn clone(&self) -> Self {
        Self::new(self.callback, self.module_name.clone())
    }
}

/// A pre-trained single-person pose estimator.
pub trait PoseModel: Send {
    /// Load weights and prepare for inference. Called exactly once.
    fn load(&mut self, logger: ModuleLogger) -> Result<()>;
    fn estimate_single_pose(
        &mut self,
        frame: &VideoFrame,
        options: &DetectionOptions,
    ) -> Result<Pose>;
    fn unload(&mut self);
}

/// A live video feed. `current_frame` returns `None` until the feed has data.
pub trait VideoSource: Send {
    fn open(&mut self, logger: ModuleLogger) -> Result<()>;
    fn current_frame(&mut self) -> Option<VideoFrame>;
    fn close(&mut self);
}

/// Symbol a pose plugin exports to construct its model.
pub const CREATE_POSE_MODEL_SYMBOL: &[u8] = b"create_pose_model";
/// Optional symbol a plugin exports to construct its video source.
pub const CREATE_VIDEO_SOURCE_SYMBOL: &[u8] = b"create_video_source";

#[allow(improper_ctypes_definitions)]
pub type CreatePoseModelFn = unsafe extern "C" fn() -> *mut dyn PoseModel;
#[allow(improper_ctypes_definitions)]
pub type CreateVideoSourceFn = unsafe extern "C" fn() -> *mut dyn VideoSource;
