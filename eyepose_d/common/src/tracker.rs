//! Eye-position tracker.
//!
//! Owns a pose model and a video source. The model is loaded once on a loader
//! thread while a detection thread polls for it; once both the model and a
//! video frame are available, the detection thread runs one estimation per
//! refresh tick and publishes the normalized eye pair.

use anyhow::Result;
use api::{DetectionOptions, ModuleLogger, PoseModel, VideoSource};
use log::{debug, error, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::eyes::{extract_eye_pair, EyePair};
use crate::TrackerConfig;

const ESTIMATE_WARN_INTERVAL: Duration = Duration::from_secs(5);
const SHUTDOWN_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    Absent,
    Loading,
    Loaded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// No model yet (or loading failed).
    Idle,
    /// Model loaded and video available; the first estimation has not returned yet.
    Ready,
    /// At least one estimation has completed.
    Detecting,
    Stopped,
}

/// Latest published eye pair and the number of detection cycles that produced one.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EyeSnapshot {
    pub eyes: EyePair,
    pub frame: u64,
}

/// Read-only view of the tracker output. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct EyePairHandle {
    inner: Arc<RwLock<EyeSnapshot>>,
}

impl EyePairHandle {
    pub fn snapshot(&self) -> EyeSnapshot {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> EyePair {
        self.snapshot().eyes
    }

    fn publish(&self, eyes: EyePair) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.eyes = eyes;
        guard.frame += 1;
    }
}

/// Hand-off point between the loader and detection threads.
struct ModelSlot {
    status: ModelStatus,
    pending: Option<Box<dyn PoseModel>>,
    closed: bool,
}

type SharedSlot = Arc<Mutex<ModelSlot>>;

pub struct EyeTracker {
    eyes: EyePairHandle,
    slot: SharedSlot,
    state: Arc<RwLock<TrackerState>>,
    running: Arc<AtomicBool>,
    loader: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

impl EyeTracker {
    /// Starts loading `model` and the detection loop over `video`.
    ///
    /// The tracker takes ownership of both; the video is opened on the
    /// detection thread and closed, with the model unloaded, on shutdown.
    pub fn spawn(
        mut model: Box<dyn PoseModel>,
        video: Box<dyn VideoSource>,
        logger: ModuleLogger,
        config: &TrackerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let tick = config.tick()?;

        let eyes = EyePairHandle::default();
        let slot: SharedSlot = Arc::new(Mutex::new(ModelSlot {
            status: ModelStatus::Loading,
            pending: None,
            closed: false,
        }));
        let state = Arc::new(RwLock::new(TrackerState::Idle));
        let running = Arc::new(AtomicBool::new(true));

        let loader_slot = slot.clone();
        let loader_logger = logger.clone();
        let loader = thread::Builder::new()
            .name("pose-model-loader".to_string())
            .spawn(move || {
                info!("Loading pose model...");
                let result = model.load(loader_logger);
                let Ok(mut slot) = loader_slot.lock() else {
                    model.unload();
                    return;
                };
                match result {
                    Ok(()) if slot.closed => {
                        debug!("Tracker stopped while the model was loading; unloading it");
                        model.unload();
                    }
                    Ok(()) => {
                        info!("✓ Pose model loaded");
                        slot.status = ModelStatus::Loaded;
                        slot.pending = Some(model);
                    }
                    Err(e) => {
                        error!("✗ Failed to load pose model: {:#}", e);
                        slot.status = ModelStatus::Failed;
                    }
                }
            })?;

        let ctx = LoopContext {
            eyes: eyes.clone(),
            slot: slot.clone(),
            state: state.clone(),
            running: running.clone(),
            video,
            logger,
            options: config.detection,
            tick,
        };
        let worker = match thread::Builder::new()
            .name("eye-detection".to_string())
            .spawn(move || ctx.run())
        {
            Ok(worker) => worker,
            Err(e) => {
                if let Ok(mut slot) = slot.lock() {
                    slot.closed = true;
                }
                return Err(e.into());
            }
        };

        Ok(Self {
            eyes,
            slot,
            state,
            running,
            loader: Some(loader),
            worker: Some(worker),
        })
    }

    pub fn eyes(&self) -> EyePairHandle {
        self.eyes.clone()
    }

    pub fn state(&self) -> TrackerState {
        self.state.read().map(|s| *s).unwrap_or(TrackerState::Stopped)
    }

    pub fn model_status(&self) -> ModelStatus {
        self.slot
            .lock()
            .map(|s| s.status)
            .unwrap_or(ModelStatus::Absent)
    }

    /// Stops the detection loop and releases the model and video.
    ///
    /// Blocks until an in-flight estimation or a pending model load finishes.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Eye detection thread panicked");
            }
        }
        if let Some(loader) = self.loader.take() {
            if loader.join().is_err() {
                error!("Pose model loader thread panicked");
            }
        }
    }
}

impl Drop for EyeTracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct LoopContext {
    eyes: EyePairHandle,
    slot: SharedSlot,
    state: Arc<RwLock<TrackerState>>,
    running: Arc<AtomicBool>,
    video: Box<dyn VideoSource>,
    logger: ModuleLogger,
    options: DetectionOptions,
    tick: Duration,
}

impl LoopContext {
    fn run(mut self) {
        info!("Eye detection loop started");

        if let Err(e) = self.video.open(self.logger.clone()) {
            error!("✗ Failed to open video source: {:#}", e);
        }

        let mut model: Option<Box<dyn PoseModel>> = None;
        let mut next_tick = Instant::now();
        let mut last_estimate_warn: Option<Instant> = None;

        while self.running.load(Ordering::SeqCst) {
            if model.is_none() {
                model = self.take_pending_model();
            }

            if let Some(model) = model.as_mut() {
                if let Some(frame) = self.video.current_frame().filter(|f| !f.size().is_empty()) {
                    if self.state() == TrackerState::Idle {
                        info!(
                            "Model and video ready ({}x{}), starting detection",
                            frame.width, frame.height
                        );
                        self.set_state(TrackerState::Ready);
                    }

                    let estimate = model.estimate_single_pose(&frame, &self.options);
                    self.set_state(TrackerState::Detecting);
                    match estimate {
                        Ok(pose) => match extract_eye_pair(&pose, frame.size()) {
                            Some(eyes) => {
                                #[cfg(feature = "xtralog")]
                                trace!("Eyes: {:?}", eyes);
                                self.eyes.publish(eyes);
                            }
                            None => trace!("Fewer than two eye keypoints; keeping previous eye pair"),
                        },
                        Err(e) => {
                            let now = Instant::now();
                            let should_log = last_estimate_warn
                                .is_none_or(|last| now.duration_since(last) >= ESTIMATE_WARN_INTERVAL);
                            if should_log {
                                warn!("Pose estimation failed: {:#}", e);
                                last_estimate_warn = Some(now);
                            }
                        }
                    }
                }
            }

            next_tick = Self::following_tick(next_tick, self.tick, Instant::now());
            self.sleep_until(next_tick);
        }

        self.set_state(TrackerState::Stopped);
        self.video.close();

        if let Ok(mut slot) = self.slot.lock() {
            slot.closed = true;
            if model.is_none() {
                model = slot.pending.take();
            }
        }
        if let Some(mut model) = model {
            model.unload();
            debug!("Pose model unloaded");
        }
        info!("Eye detection loop stopped");
    }

    fn take_pending_model(&self) -> Option<Box<dyn PoseModel>> {
        self.slot.lock().ok().and_then(|mut slot| slot.pending.take())
    }

    fn state(&self) -> TrackerState {
        self.state.read().map(|s| *s).unwrap_or(TrackerState::Idle)
    }

    fn set_state(&self, state: TrackerState) {
        if let Ok(mut guard) = self.state.write() {
            *guard = state;
        }
    }

    /// First tick boundary strictly after `now`.
    fn following_tick(previous: Instant, tick: Duration, now: Instant) -> Instant {
        let next = previous + tick;
        if next > now {
            return next;
        }
        let behind = now.duration_since(next).as_nanos() / tick.as_nanos().max(1);
        // Too far behind to count in ticks; restart the schedule from now.
        u32::try_from(behind + 1)
            .ok()
            .and_then(|skip| tick.checked_mul(skip))
            .and_then(|d| next.checked_add(d))
            .unwrap_or(now + tick)
    }

    fn sleep_until(&self, deadline: Instant) {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep((deadline - now).min(SHUTDOWN_POLL));
        }
    }
}
