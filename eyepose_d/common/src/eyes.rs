use api::{FrameSize, Keypoint, Pose};
use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Eye position relative to the video frame; `(0, 0)` is the top-left corner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EyePosition {
    pub x: f32,
    pub y: f32,
}

impl EyePosition {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl From<Vec2> for EyePosition {
    fn from(v: Vec2) -> Self {
        Self { x: v.x, y: v.y }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EyePair {
    pub left: EyePosition,
    pub right: EyePosition,
}

const EYE_LABEL: &str = "eye";

pub fn is_eye_part(part: &str) -> bool {
    part.to_ascii_lowercase().contains(EYE_LABEL)
}

/// Eye keypoints in the order the model returned them.
pub fn filter_eyes(keypoints: &[Keypoint]) -> impl Iterator<Item = &Keypoint> {
    keypoints.iter().filter(|k| is_eye_part(&k.part))
}

pub fn normalize(position: Vec2, size: FrameSize) -> EyePosition {
    (position / size.as_vec2()).into()
}

/// First two eye keypoints become left and right.
///
/// Returns `None` if the frame size is empty or the pose carries fewer than two
/// eye keypoints; callers keep whatever they published last.
pub fn extract_eye_pair(pose: &Pose, size: FrameSize) -> Option<EyePair> {
    if size.is_empty() {
        return None;
    }
    let mut eyes = filter_eyes(&pose.keypoints).map(|k| normalize(k.position, size));
    let left = eyes.next()?;
    let right = eyes.next()?;
    Some(EyePair { left, right })
}
