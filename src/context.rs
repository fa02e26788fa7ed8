use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

/// Environment variable overriding [`LoaderConfig::assets_root`].
pub const ASSETS_ENV: &str = "FLOW_LOADER_ASSETS";

/// Settings shared by every load started from one [`crate::loader::Loader`].
#[derive(Clone, Debug)]
pub struct LoaderConfig {
    /// Relative urls are resolved against this directory (native only).
    pub assets_root: PathBuf,
    /// Byte granularity of `progress` messages while reading an asset.
    pub read_chunk_size: usize,
    /// Report texture decode failures as `LoadEvent::Warning`. They are logged either way.
    pub emit_texture_warnings: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            assets_root: PathBuf::from("./").join("assets"),
            read_chunk_size: 64 * 1024,
            emit_texture_warnings: true,
        }
    }
}

impl LoaderConfig {
    /// Defaults, with the assets root taken from `FLOW_LOADER_ASSETS` when it is set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(root) = std::env::var_os(ASSETS_ENV) {
            config.assets_root = PathBuf::from(root);
        }
        config
    }

    pub fn with_assets_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.assets_root = root.into();
        self
    }

    pub fn with_read_chunk_size(mut self, bytes: usize) -> Self {
        self.read_chunk_size = bytes.max(1);
        self
    }

    pub fn with_texture_warnings(mut self, enabled: bool) -> Self {
        self.emit_texture_warnings = enabled;
        self
    }
}

/// Cooperative cancellation flag shared by everything working on one load.
///
/// Cancelling never interrupts running work. Continuations check the flag when they resume and
/// discard their result once it is set.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call flipped the flag.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
