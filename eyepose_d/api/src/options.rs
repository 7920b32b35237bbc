use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_IMAGE_SCALE_FACTOR: f32 = 0.2;
pub const MAX_IMAGE_SCALE_FACTOR: f32 = 1.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptionsError {
    #[error("image_scale_factor must be within [0.2, 1.0], got {0}")]
    ImageScaleFactor(f32),

    #[error("output_stride must be non-zero")]
    ZeroOutputStride,
}

/// Parameters forwarded untouched to [`crate::PoseModel::estimate_single_pose`].
///
/// `image_scale_factor` trades accuracy for speed (larger is more accurate),
/// `flip_horizontal` mirrors the result for mirrored webcams and
/// `output_stride` is the model's output resolution stride.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionOptions {
    pub image_scale_factor: f32,
    pub flip_horizontal: bool,
    pub output_stride: u32,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            image_scale_factor: 0.2,
            flip_horizontal: false,
            output_stride: 16,
        }
    }
}

impl DetectionOptions {
    pub fn new(
        image_scale_factor: f32,
        flip_horizontal: bool,
        output_stride: u32,
    ) -> Result<Self, OptionsError> {
        let options = Self {
            image_scale_factor,
            flip_horizontal,
            output_stride,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        // NaN fails the range check too.
        if !(MIN_IMAGE_SCALE_FACTOR..=MAX_IMAGE_SCALE_FACTOR).contains(&self.image_scale_factor) {
            return Err(OptionsError::ImageScaleFactor(self.image_scale_factor));
        }
        if self.output_stride == 0 {
            return Err(OptionsError::ZeroOutputStride);
        }
        Ok(())
    }
}
