//! Detection loop behavior against scripted models and fixed video feeds.

use anyhow::{bail, Result};
use api::LogLevel;
use common::{
    DetectionOptions, EyePair, EyePosition, EyeTracker, Keypoint, ModelStatus, ModuleLogger, Pose,
    PoseModel, TrackerConfig, TrackerState, VideoFrame, VideoSource,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

extern "C" fn discard_log(_level: LogLevel, _target: *const i8, _message: *const i8) {}

fn logger() -> ModuleLogger {
    ModuleLogger::new(discard_log, "tracker_tests".to_string())
}

fn fast_config() -> TrackerConfig {
    TrackerConfig {
        refresh_hz: 1000.0,
        ..Default::default()
    }
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Probe {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    options: Mutex<Vec<DetectionOptions>>,
    unloaded: AtomicBool,
    opened: AtomicBool,
    closed: AtomicBool,
}

enum LoadBehavior {
    Ok,
    Fail,
    Delay(Duration),
}

struct ScriptedModel {
    probe: Arc<Probe>,
    load: LoadBehavior,
    /// One entry per call; the last entry repeats.
    script: Vec<Result<Pose, String>>,
    estimate_delay: Duration,
}

impl ScriptedModel {
    fn new(probe: Arc<Probe>, script: Vec<Result<Pose, String>>) -> Self {
        Self {
            probe,
            load: LoadBehavior::Ok,
            script,
            estimate_delay: Duration::ZERO,
        }
    }
}

impl PoseModel for ScriptedModel {
    fn load(&mut self, _logger: ModuleLogger) -> Result<()> {
        match self.load {
            LoadBehavior::Ok => Ok(()),
            LoadBehavior::Fail => bail!("weights not found"),
            LoadBehavior::Delay(d) => {
                thread::sleep(d);
                Ok(())
            }
        }
    }

    fn estimate_single_pose(
        &mut self,
        _frame: &VideoFrame,
        options: &DetectionOptions,
    ) -> Result<Pose> {
        let in_flight = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        self.probe.options.lock().unwrap().push(*options);

        thread::sleep(self.estimate_delay);

        let call = self.probe.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script[call.min(self.script.len() - 1)].clone();
        self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);
        step.map_err(anyhow::Error::msg)
    }

    fn unload(&mut self) {
        self.probe.unloaded.store(true, Ordering::SeqCst);
    }
}

struct FixedVideo {
    probe: Arc<Probe>,
    frame: Option<VideoFrame>,
}

impl FixedVideo {
    fn new(probe: Arc<Probe>, width: u32, height: u32) -> Self {
        Self {
            probe,
            frame: Some(VideoFrame::filled(width, height, [0, 0, 0])),
        }
    }

    fn never_ready(probe: Arc<Probe>) -> Self {
        Self { probe, frame: None }
    }
}

impl VideoSource for FixedVideo {
    fn open(&mut self, _logger: ModuleLogger) -> Result<()> {
        self.probe.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn current_frame(&mut self) -> Option<VideoFrame> {
        self.frame.clone()
    }

    fn close(&mut self) {
        self.probe.closed.store(true, Ordering::SeqCst);
    }
}

fn reference_pose() -> Pose {
    Pose {
        score: 0.95,
        keypoints: vec![
            Keypoint::new("nose", 150.0, 80.0, 0.99),
            Keypoint::new("leftEye", 100.0, 50.0, 0.97),
            Keypoint::new("rightEye", 200.0, 50.0, 0.96),
            Keypoint::new("leftEar", 60.0, 60.0, 0.5),
        ],
    }
}

fn reference_eyes() -> EyePair {
    EyePair {
        left: EyePosition::new(0.25, 0.25),
        right: EyePosition::new(0.5, 0.25),
    }
}

fn spawn(model: ScriptedModel, video: FixedVideo, config: &TrackerConfig) -> EyeTracker {
    let _ = env_logger::builder().is_test(true).try_init();
    EyeTracker::spawn(Box::new(model), Box::new(video), logger(), config).expect("spawn tracker")
}

#[test]
fn publishes_normalized_eyes_for_reference_frame() {
    let probe = Arc::new(Probe::default());
    let model = ScriptedModel::new(probe.clone(), vec![Ok(reference_pose())]);
    let video = FixedVideo::new(probe.clone(), 400, 200);
    let tracker = spawn(model, video, &fast_config());

    let eyes = tracker.eyes();
    assert!(wait_until(TIMEOUT, || eyes.snapshot().frame > 0));
    assert_eq!(eyes.current(), reference_eyes());
    assert_eq!(tracker.model_status(), ModelStatus::Loaded);
    assert_eq!(tracker.state(), TrackerState::Detecting);
}

#[test]
fn failed_model_load_keeps_default_eyes() {
    let probe = Arc::new(Probe::default());
    let mut model = ScriptedModel::new(probe.clone(), vec![Ok(reference_pose())]);
    model.load = LoadBehavior::Fail;
    let video = FixedVideo::new(probe.clone(), 400, 200);
    let tracker = spawn(model, video, &fast_config());

    assert!(wait_until(TIMEOUT, || tracker.model_status() == ModelStatus::Failed));
    thread::sleep(Duration::from_millis(30));

    assert_eq!(tracker.eyes().current(), EyePair::default());
    assert_eq!(tracker.eyes().snapshot().frame, 0);
    assert_eq!(tracker.state(), TrackerState::Idle);
    assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn model_still_loading_keeps_default_eyes() {
    let probe = Arc::new(Probe::default());
    let mut model = ScriptedModel::new(probe.clone(), vec![Ok(reference_pose())]);
    model.load = LoadBehavior::Delay(Duration::from_millis(300));
    let video = FixedVideo::new(probe.clone(), 400, 200);
    let tracker = spawn(model, video, &fast_config());

    thread::sleep(Duration::from_millis(50));
    assert_eq!(tracker.model_status(), ModelStatus::Loading);
    assert_eq!(tracker.state(), TrackerState::Idle);
    assert_eq!(tracker.eyes().current(), EyePair::default());

    let eyes = tracker.eyes();
    assert!(wait_until(TIMEOUT, || eyes.snapshot().frame > 0));
    assert_eq!(eyes.current(), reference_eyes());
}

#[test]
fn missing_video_skips_detection() {
    let probe = Arc::new(Probe::default());
    let model = ScriptedModel::new(probe.clone(), vec![Ok(reference_pose())]);
    let video = FixedVideo::never_ready(probe.clone());
    let tracker = spawn(model, video, &fast_config());

    assert!(wait_until(TIMEOUT, || tracker.model_status() == ModelStatus::Loaded));
    thread::sleep(Duration::from_millis(30));

    assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    assert_eq!(tracker.eyes().current(), EyePair::default());
    assert_eq!(tracker.state(), TrackerState::Idle);
}

#[test]
fn empty_frame_counts_as_not_ready() {
    let probe = Arc::new(Probe::default());
    let model = ScriptedModel::new(probe.clone(), vec![Ok(reference_pose())]);
    let video = FixedVideo::new(probe.clone(), 0, 0);
    let tracker = spawn(model, video, &fast_config());

    assert!(wait_until(TIMEOUT, || tracker.model_status() == ModelStatus::Loaded));
    thread::sleep(Duration::from_millis(30));

    assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    assert_eq!(tracker.eyes().snapshot().frame, 0);
}

#[test]
fn ready_until_first_estimate_returns() {
    let probe = Arc::new(Probe::default());
    let mut model = ScriptedModel::new(probe.clone(), vec![Ok(reference_pose())]);
    model.estimate_delay = Duration::from_millis(300);
    let video = FixedVideo::new(probe.clone(), 400, 200);
    let tracker = spawn(model, video, &fast_config());

    assert!(wait_until(TIMEOUT, || probe.in_flight.load(Ordering::SeqCst) == 1));
    assert_eq!(tracker.state(), TrackerState::Ready);

    assert!(wait_until(TIMEOUT, || tracker.state() == TrackerState::Detecting));
    assert_eq!(tracker.eyes().current(), reference_eyes());
}

#[test]
fn unrepresentable_refresh_rate_is_an_error_not_a_panic() {
    let probe = Arc::new(Probe::default());
    let model = ScriptedModel::new(probe.clone(), vec![Ok(reference_pose())]);
    let video = FixedVideo::new(probe.clone(), 400, 200);
    let config = TrackerConfig {
        refresh_hz: 1e-20,
        ..Default::default()
    };

    let result = EyeTracker::spawn(Box::new(model), Box::new(video), logger(), &config);
    assert!(result.is_err());
}

#[test]
fn at_most_one_estimation_in_flight() {
    let probe = Arc::new(Probe::default());
    let mut model = ScriptedModel::new(probe.clone(), vec![Ok(reference_pose())]);
    model.estimate_delay = Duration::from_millis(3);
    let video = FixedVideo::new(probe.clone(), 400, 200);
    let _tracker = spawn(model, video, &fast_config());

    assert!(wait_until(TIMEOUT, || probe.calls.load(Ordering::SeqCst) >= 10));
    assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);
}

#[test]
fn options_reach_the_model_without_changing_normalization() {
    let options = DetectionOptions::new(0.5, true, 8).expect("valid options");
    let config = TrackerConfig {
        detection: options,
        ..fast_config()
    };

    let probe = Arc::new(Probe::default());
    let model = ScriptedModel::new(probe.clone(), vec![Ok(reference_pose())]);
    let video = FixedVideo::new(probe.clone(), 400, 200);
    let tracker = spawn(model, video, &config);

    let eyes = tracker.eyes();
    assert!(wait_until(TIMEOUT, || eyes.snapshot().frame > 0));
    assert_eq!(eyes.current(), reference_eyes());

    let seen = probe.options.lock().unwrap();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|o| *o == options));
}

#[test]
fn fewer_than_two_eyes_retains_previous_pair() {
    let one_eye = Pose {
        score: 0.4,
        keypoints: vec![Keypoint::new("rightEye", 300.0, 100.0, 0.4)],
    };

    let probe = Arc::new(Probe::default());
    let model = ScriptedModel::new(probe.clone(), vec![Ok(reference_pose()), Ok(one_eye)]);
    let video = FixedVideo::new(probe.clone(), 400, 200);
    let tracker = spawn(model, video, &fast_config());

    assert!(wait_until(TIMEOUT, || probe.calls.load(Ordering::SeqCst) >= 5));
    let snapshot = tracker.eyes().snapshot();
    assert_eq!(snapshot.eyes, reference_eyes());
    assert_eq!(snapshot.frame, 1);
}

#[test]
fn estimation_error_retains_previous_pair() {
    let probe = Arc::new(Probe::default());
    let model = ScriptedModel::new(
        probe.clone(),
        vec![Ok(reference_pose()), Err("inference backend lost".to_string())],
    );
    let video = FixedVideo::new(probe.clone(), 400, 200);
    let tracker = spawn(model, video, &fast_config());

    assert!(wait_until(TIMEOUT, || probe.calls.load(Ordering::SeqCst) >= 5));
    let snapshot = tracker.eyes().snapshot();
    assert_eq!(snapshot.eyes, reference_eyes());
    assert_eq!(snapshot.frame, 1);
}

#[test]
fn shutdown_releases_model_and_video() {
    let probe = Arc::new(Probe::default());
    let model = ScriptedModel::new(probe.clone(), vec![Ok(reference_pose())]);
    let video = FixedVideo::new(probe.clone(), 400, 200);
    let mut tracker = spawn(model, video, &fast_config());

    let eyes = tracker.eyes();
    assert!(wait_until(TIMEOUT, || eyes.snapshot().frame > 0));
    tracker.shutdown();

    assert_eq!(tracker.state(), TrackerState::Stopped);
    assert!(probe.opened.load(Ordering::SeqCst));
    assert!(probe.closed.load(Ordering::SeqCst));
    assert!(probe.unloaded.load(Ordering::SeqCst));

    let calls = probe.calls.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(probe.calls.load(Ordering::SeqCst), calls);
    // Readers keep the last value after shutdown.
    assert_eq!(eyes.current(), reference_eyes());
}

#[test]
fn dropping_while_loading_unloads_late_model() {
    let probe = Arc::new(Probe::default());
    let mut model = ScriptedModel::new(probe.clone(), vec![Ok(reference_pose())]);
    model.load = LoadBehavior::Delay(Duration::from_millis(100));
    let video = FixedVideo::new(probe.clone(), 400, 200);
    let tracker = spawn(model, video, &fast_config());

    drop(tracker);

    assert!(probe.unloaded.load(Ordering::SeqCst));
    assert!(probe.closed.load(Ordering::SeqCst));
    assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn rejects_invalid_config() {
    let probe = Arc::new(Probe::default());
    let model = ScriptedModel::new(probe.clone(), vec![Ok(reference_pose())]);
    let video = FixedVideo::new(probe.clone(), 400, 200);
    let config = TrackerConfig {
        refresh_hz: 0.0,
        ..Default::default()
    };

    let result = EyeTracker::spawn(Box::new(model), Box::new(video), logger(), &config);
    assert!(result.is_err());
}
