mod plugins;

use anyhow::{Context, Result};
use api::{LogLevel, ModuleLogger};
use common::{load_config, EyeTracker, TrackerConfig};
use log::{debug, error, info, trace, warn};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use plugins::NativePlugin;

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const NO_DATA_WARN_AFTER: Duration = Duration::from_secs(10);

extern "C" fn module_log_callback(level: LogLevel, target: *const i8, message: *const i8) {
    unsafe {
        let target_str = std::ffi::CStr::from_ptr(target)
            .to_str()
            .unwrap_or("unknown");
        let message_str = std::ffi::CStr::from_ptr(message).to_str().unwrap_or("");

        match level {
            LogLevel::Error => error!(target: target_str, "{}", message_str),
            LogLevel::Warn => warn!(target: target_str, "{}", message_str),
            LogLevel::Info => info!(target: target_str, "{}", message_str),
            LogLevel::Debug => debug!(target: target_str, "{}", message_str),
            LogLevel::Trace => trace!(target: target_str, "{}", message_str),
        }
    }
}

fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }
    env_logger::init();

    info!("Starting...");
    debug!("Debug logging is active");
    trace!("Trace logging is active");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        info!("Received Ctrl-C, shutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl-C handler")?;

    let config_path = Path::new("config.json");
    let config = load_config(config_path).unwrap_or_else(|e| {
        error!("Failed to load config: {:#}. Using defaults.", e);
        TrackerConfig::default()
    });
    info!("Loaded Config: {:?}", config);

    let Some(plugin_path) = NativePlugin::locate(&config.plugin) else {
        error!(
            "✗ Plugin '{}' not found in {:?}",
            config.plugin.name, config.plugin.search_dirs
        );
        anyhow::bail!("no pose plugin available");
    };

    let plugin = NativePlugin::load(&plugin_path)?;
    info!("✓ Loaded plugin: {}", plugin.name());

    let model = plugin.create_pose_model()?;
    let video = plugin.create_video_source()?;
    let logger = ModuleLogger::new(
        module_log_callback,
        format!("eyepose_d::plugins::{}", plugin.name()),
    );

    let mut tracker = EyeTracker::spawn(model, video, logger, &config)?;
    let eyes = tracker.eyes();

    info!("Entering Main Loop...");

    let started = Instant::now();
    let mut warned_no_data = false;
    let mut last_frame: u64 = 0;
    let mut next_report: u64 = config.report_interval;
    let mut log_interval: u64 = config.report_interval;
    let mut last_log = Instant::now();
    let mut frames_at_last_log: u64 = 0;

    while running.load(Ordering::SeqCst) {
        let snapshot = eyes.snapshot();

        if snapshot.frame != last_frame {
            last_frame = snapshot.frame;
            #[cfg(feature = "xtralog")]
            trace!(
                "Frame {}: left ({:.3}, {:.3}) right ({:.3}, {:.3})",
                snapshot.frame,
                snapshot.eyes.left.x,
                snapshot.eyes.left.y,
                snapshot.eyes.right.x,
                snapshot.eyes.right.y
            );

            if snapshot.frame >= next_report {
                let elapsed = last_log.elapsed().as_secs_f32();
                let rate = (snapshot.frame - frames_at_last_log) as f32 / elapsed;
                info!(
                    "Tracking Active: {} detections (approx {:.1} per second), eyes L({:.3}, {:.3}) R({:.3}, {:.3})",
                    snapshot.frame,
                    rate,
                    snapshot.eyes.left.x,
                    snapshot.eyes.left.y,
                    snapshot.eyes.right.x,
                    snapshot.eyes.right.y
                );
                last_log = Instant::now();
                frames_at_last_log = snapshot.frame;

                if snapshot.frame >= 1_000_000 {
                    log_interval = log_interval.max(1_000_000);
                } else if snapshot.frame >= 100_000 {
                    log_interval = log_interval.max(100_000);
                } else if snapshot.frame >= 10_000 {
                    log_interval = log_interval.max(10_000);
                }
                next_report = snapshot.frame + log_interval;
            }
        } else if !warned_no_data && last_frame == 0 && started.elapsed() > NO_DATA_WARN_AFTER {
            warn!(
                "No eye positions after {}s (model {:?}, tracker {:?})",
                NO_DATA_WARN_AFTER.as_secs(),
                tracker.model_status(),
                tracker.state()
            );
            warned_no_data = true;
        }

        thread::sleep(POLL_INTERVAL);
    }

    info!("Shutting down...");
    tracker.shutdown();
    // Model and video live in the plugin's code; release them before unloading it.
    drop(tracker);
    drop(plugin);
    Ok(())
}
