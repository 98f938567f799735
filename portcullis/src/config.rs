//! Daemon configuration and the process-wide data directory layout.
//!
//! The layout is resolved once into a static value, per the "global path
//! cache" design note: a process-wide value initialized once at startup,
//! then read-only.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use portcullis_shared::errors::{PortcullisError, PortcullisResult};

/// Default maximum accepted policy size (spec.md §4.3 / §6.2).
pub const DEFAULT_MAX_POLICY_BYTES: u64 = 1024 * 1024;

/// Default mutator lock acquisition timeout (spec.md §5).
pub const DEFAULT_MUTATOR_TIMEOUT_MS: u64 = 30_000;

/// Default hot-reload debounce window (spec.md §4.8: >= 250ms, <= 2s).
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Tunable parameters for the running daemon.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub data_dir: PathBuf,
    pub socket_name: String,
    pub max_frame_bytes: u32,
    pub max_policy_bytes: u64,
    pub mutator_timeout_ms: u64,
    pub debounce_ms: u64,
    pub rate_limit_per_sec: u32,
    pub rate_limit_burst: u32,
}

impl DaemonConfig {
    /// Resolve the default data directory: `$PORTCULLIS_HOME` if set,
    /// otherwise `<platform data dir>/portcullis`.
    pub fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("PORTCULLIS_HOME") {
            return PathBuf::from(dir);
        }
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("portcullis")
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: Self::default_data_dir(),
            socket_name: "portcullis-control".to_string(),
            max_frame_bytes: portcullis_shared::wire::DEFAULT_MAX_FRAME_BYTES,
            max_policy_bytes: DEFAULT_MAX_POLICY_BYTES,
            mutator_timeout_ms: DEFAULT_MUTATOR_TIMEOUT_MS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            rate_limit_per_sec: 20,
            rate_limit_burst: 40,
        }
    }
}

/// On-disk layout rooted at the data directory (spec.md §6.3).
///
/// Directory creation is idempotent; callers may construct a `Layout` and
/// call `ensure_dirs` any number of times.
#[derive(Debug, Clone)]
pub struct Layout {
    data_dir: PathBuf,
}

static LAYOUT: OnceLock<Layout> = OnceLock::new();

impl Layout {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Initialize (or retrieve) the process-wide layout singleton.
    ///
    /// Idempotent: the first call's `data_dir` wins; later calls are ignored
    /// aside from returning the already-initialized value.
    pub fn init_global(data_dir: impl Into<PathBuf>) -> &'static Layout {
        LAYOUT.get_or_init(|| Layout::new(data_dir))
    }

    pub fn global() -> Option<&'static Layout> {
        LAYOUT.get()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn lkg_path(&self) -> PathBuf {
        self.data_dir.join("lkg_policy.json")
    }

    pub fn lkg_tmp_path(&self) -> PathBuf {
        self.data_dir.join("lkg_policy.json.tmp")
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.data_dir.join("audit.log")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn socket_dir(&self) -> PathBuf {
        self.data_dir.join("run")
    }

    /// Create the data directory (and subdirectories used for logs/run) if
    /// absent. Idempotent.
    pub fn ensure_dirs(&self) -> PortcullisResult<()> {
        std::fs::create_dir_all(&self.data_dir)
            .map_err(|e| PortcullisError::IoError(format!("create data dir: {e}")))?;
        std::fs::create_dir_all(self.logs_dir())
            .map_err(|e| PortcullisError::IoError(format!("create logs dir: {e}")))?;
        std::fs::create_dir_all(self.socket_dir())
            .map_err(|e| PortcullisError::IoError(format!("create run dir: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_rooted_at_data_dir() {
        let layout = Layout::new("/tmp/pc-test");
        assert_eq!(
            layout.lkg_path(),
            PathBuf::from("/tmp/pc-test/lkg_policy.json")
        );
        assert_eq!(
            layout.audit_log_path(),
            PathBuf::from("/tmp/pc-test/audit.log")
        );
    }

    #[test]
    fn ensure_dirs_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path().join("data"));
        layout.ensure_dirs().unwrap();
        layout.ensure_dirs().unwrap();
        assert!(layout.data_dir().exists());
        assert!(layout.logs_dir().exists());
    }
}
