// Synthetic pose plugin: a scripted head orbiting the frame center, for demos
// and for exercising the daemon without a camera or inference backend.

use anyhow::{bail, Result};
use api::{
    DetectionOptions, Keypoint, ModuleLogger, Pose, PoseModel, VideoFrame, VideoSource,
};
use glam::Vec2;
use std::time::Duration;

const FRAME_WIDTH: u32 = 640;
const FRAME_HEIGHT: u32 = 480;
const LOAD_LATENCY: Duration = Duration::from_millis(250);
const ORBIT_RADIUS: f32 = 80.0;
const RADIANS_PER_FRAME: f32 = 0.05;

/// Offsets from the nose, in pixels, for a face looking at the camera.
const FACE_LAYOUT: [(&str, Vec2); 5] = [
    ("nose", Vec2::new(0.0, 0.0)),
    ("leftEye", Vec2::new(-30.0, -25.0)),
    ("rightEye", Vec2::new(30.0, -25.0)),
    ("leftEar", Vec2::new(-70.0, -10.0)),
    ("rightEar", Vec2::new(70.0, -10.0)),
];

pub struct SyntheticPoseModel {
    logger: Option<ModuleLogger>,
    frame_count: u64,
    load_latency: Duration,
    radians_per_frame: f32,
}

impl SyntheticPoseModel {
    pub fn new() -> Self {
        Self {
            logger: None,
            frame_count: 0,
            load_latency: LOAD_LATENCY,
            radians_per_frame: RADIANS_PER_FRAME,
        }
    }

    pub fn with_load_latency(mut self, latency: Duration) -> Self {
        self.load_latency = latency;
        self
    }

    /// Orbit speed of the head; zero keeps it parked right of center.
    pub fn with_orbit_speed(mut self, radians_per_frame: f32) -> Self {
        self.radians_per_frame = radians_per_frame;
        self
    }

    fn head_center(&self, width: f32, height: f32) -> Vec2 {
        let angle = self.frame_count as f32 * self.radians_per_frame;
        Vec2::new(width / 2.0, height / 2.0) + Vec2::new(angle.cos(), angle.sin()) * ORBIT_RADIUS
    }
}

impl Default for SyntheticPoseModel {
    fn default() -> Self {
        Self::new()
    }
}

impl PoseModel for SyntheticPoseModel {
    fn load(&mut self, logger: ModuleLogger) -> Result<()> {
        logger.info("Loading synthetic pose model");
        std::thread::sleep(self.load_latency);
        logger.debug(&format!(
            "Synthetic model ready after {} ms",
            self.load_latency.as_millis()
        ));
        self.logger = Some(logger);
        Ok(())
    }

    fn estimate_single_pose(
        &mut self,
        frame: &VideoFrame,
        options: &DetectionOptions,
    ) -> Result<Pose> {
        if self.logger.is_none() {
            bail!("synthetic model used before load");
        }
        let expected = frame.width as usize * frame.height as usize * 3;
        if frame.pixels.len() != expected {
            bail!(
                "frame buffer is {} bytes, expected {} for {}x{} RGB",
                frame.pixels.len(),
                expected,
                frame.width,
                frame.height
            );
        }

        self.frame_count += 1;
        if let Some(logger) = &self.logger {
            if self.frame_count == 1 {
                logger.info(&format!(
                    "First estimate: scale {:.2}, stride {}, flip {}",
                    options.image_scale_factor, options.output_stride, options.flip_horizontal
                ));
            } else {
                logger.trace(&format!("Frame {}", self.frame_count));
            }
        }

        let width = frame.width as f32;
        let center = self.head_center(width, frame.height as f32);
        let keypoints = FACE_LAYOUT
            .iter()
            .map(|(part, offset)| {
                let mut position = center + *offset;
                if options.flip_horizontal {
                    position.x = width - position.x;
                }
                Keypoint {
                    part: part.to_string(),
                    position,
                    score: 0.9,
                }
            })
            .collect();

        Ok(Pose {
            score: 0.9,
            keypoints,
        })
    }

    fn unload(&mut self) {
        if let Some(logger) = self.logger.take() {
            logger.info(&format!(
                "Unloading synthetic pose model. Total frames estimated: {}",
                self.frame_count
            ));
        }
    }
}

pub struct SyntheticVideo {
    frame: Option<VideoFrame>,
}

impl SyntheticVideo {
    pub fn new() -> Self {
        Self { frame: None }
    }
}

impl Default for SyntheticVideo {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoSource for SyntheticVideo {
    fn open(&mut self, logger: ModuleLogger) -> Result<()> {
        logger.info(&format!(
            "Opening synthetic video feed {}x{}",
            FRAME_WIDTH, FRAME_HEIGHT
        ));
        self.frame = Some(VideoFrame::filled(FRAME_WIDTH, FRAME_HEIGHT, [96, 96, 96]));
        Ok(())
    }

    fn current_frame(&mut self) -> Option<VideoFrame> {
        self.frame.clone()
    }

    fn close(&mut self) {
        self.frame = None;
    }
}

#[no_mangle]
#[allow(improper_ctypes_definitions)]
pub extern "C" fn create_pose_model() -> *mut dyn PoseModel {
    Box::into_raw(Box::new(SyntheticPoseModel::new()))
}

#[no_mangle]
#[allow(improper_ctypes_definitions)]
pub extern "C" fn create_video_source() -> *mut dyn VideoSource {
    Box::into_raw(Box::new(SyntheticVideo::new()))
}
