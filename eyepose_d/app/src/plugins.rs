//! Native pose plugins (`.dll`/`.so`/`.dylib`) loaded at runtime.

use anyhow::{bail, Context, Result};
use api::{
    CreatePoseModelFn, CreateVideoSourceFn, PoseModel, VideoSource, CREATE_POSE_MODEL_SYMBOL,
    CREATE_VIDEO_SOURCE_SYMBOL,
};
use common::PluginConfig;
use libloading::{Library, Symbol};
use log::{debug, info};
use std::path::{Path, PathBuf};

/// A loaded plugin library.
///
/// Objects created from it run code inside the library, so they must be
/// dropped before the plugin itself.
pub struct NativePlugin {
    name: String,
    library: Library,
}

impl NativePlugin {
    /// First search dir containing the plugin's platform-specific file name.
    pub fn locate(config: &PluginConfig) -> Option<PathBuf> {
        let filename = libloading::library_filename(&config.name);
        config
            .search_dirs
            .iter()
            .map(|dir| dir.join(&filename))
            .inspect(|path| debug!("Looking for plugin at {:?}", path))
            .find(|path| path.exists())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let name = path
            .file_stem()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .trim_start_matches("lib")
            .to_string();

        info!("Loading plugin: {:?}", path);
        // SAFETY: plugins are trusted native code built against the same `api` crate.
        let library = unsafe { Library::new(path) }
            .with_context(|| format!("Failed to load plugin library {:?}", path))?;
        Ok(Self { name, library })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create_pose_model(&self) -> Result<Box<dyn PoseModel>> {
        unsafe {
            let func: Symbol<CreatePoseModelFn> = self
                .library
                .get(CREATE_POSE_MODEL_SYMBOL)
                .with_context(|| format!("Plugin '{}' does not export create_pose_model", self.name))?;
            let raw = func();
            if raw.is_null() {
                bail!("Plugin '{}' returned a null pose model", self.name);
            }
            Ok(Box::from_raw(raw))
        }
    }

    pub fn create_video_source(&self) -> Result<Box<dyn VideoSource>> {
        unsafe {
            let func: Symbol<CreateVideoSourceFn> = self
                .library
                .get(CREATE_VIDEO_SOURCE_SYMBOL)
                .with_context(|| {
                    format!("Plugin '{}' does not export create_video_source", self.name)
                })?;
            let raw = func();
            if raw.is_null() {
                bail!("Plugin '{}' returned a null video source", self.name);
            }
            Ok(Box::from_raw(raw))
        }
    }
}
