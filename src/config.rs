use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use directories::ProjectDirs;
use strum_macros::{Display, EnumString};

const NOTIFICATION_LOG_FILE_NAME: &str = "notification-log.jsonl";

/// Default connect deadline.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);
/// Default deadline for every other device operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(5_000);
/// Upper bound for a bounded pick-one scan.
pub const MAX_SCAN_DURATION: Duration = Duration::from_millis(30_000);

/// How continuous scans suppress repeated advertisements.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum DuplicateFilter {
    /// Report each device identifier once per scan.
    #[default]
    PerDevice,
    /// Report each distinct advertisement payload once per scan.
    PerAdvertisement,
}

/// Runtime settings for a [`crate::BleOrchestrator`].
///
/// ```
/// use std::time::Duration;
///
/// let config = blesession::OrchestratorConfig::builder()
///     .operation_timeout(Duration::from_secs(2))
///     .build();
/// assert_eq!(Duration::from_secs(10), config.connect_timeout());
/// ```
#[derive(Debug, Clone, Builder)]
pub struct OrchestratorConfig {
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    connect_timeout: Duration,
    #[builder(default = DEFAULT_OPERATION_TIMEOUT)]
    operation_timeout: Duration,
    #[builder(default = MAX_SCAN_DURATION)]
    max_scan_duration: Duration,
    #[builder(default)]
    duplicate_filter: DuplicateFilter,
    notification_log_path: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    #[must_use]
    pub fn max_scan_duration(&self) -> Duration {
        self.max_scan_duration
    }

    #[must_use]
    pub fn duplicate_filter(&self) -> DuplicateFilter {
        self.duplicate_filter
    }

    /// Returns the configured log path, or the per-user default.
    #[must_use]
    pub fn notification_log_path(&self) -> PathBuf {
        self.notification_log_path
            .clone()
            .unwrap_or_else(default_notification_log_path)
    }
}

/// Per-user state location for the notification log.
#[must_use]
pub fn default_notification_log_path() -> PathBuf {
    let project_dirs = ProjectDirs::from("dev", "blesession", "blesession");
    let Some(project_dirs) = project_dirs else {
        return std::env::temp_dir()
            .join("blesession")
            .join(NOTIFICATION_LOG_FILE_NAME);
    };

    let root = project_dirs
        .state_dir()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| project_dirs.data_local_dir().to_path_buf());
    root.join(NOTIFICATION_LOG_FILE_NAME)
}
