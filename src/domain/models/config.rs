use serde::{Deserialize, Serialize};

/// Main configuration structure for BuildMaster
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Filesystem locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// External build command
    #[serde(default)]
    pub build: BuildCommandConfig,

    /// Supervisor timing
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Worker tracking
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Build notifications
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allow cross-origin requests from the dashboard frontend
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    8889
}

const fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            enable_cors: true,
        }
    }
}

/// Filesystem locations used by the build monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PathsConfig {
    /// Checkout the build script runs in
    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    /// One raw log file per build
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// One JSON status record per build
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Where the build script drops `*-workers.json` files
    #[serde(default = "default_worker_status_dir")]
    pub worker_status_dir: String,
}

fn default_working_dir() -> String {
    "/var/www/dintrafikskolax_dev".to_string()
}

fn default_log_dir() -> String {
    "/var/www/build/logs/builds".to_string()
}

fn default_data_dir() -> String {
    "/var/www/build/data".to_string()
}

fn default_worker_status_dir() -> String {
    "/var/www/build/status".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            working_dir: default_working_dir(),
            log_dir: default_log_dir(),
            data_dir: default_data_dir(),
            worker_status_dir: default_worker_status_dir(),
        }
    }
}

/// External build command. The script name chosen by the build mode is
/// appended as the final argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BuildCommandConfig {
    #[serde(default = "default_program")]
    pub program: String,

    #[serde(default = "default_args")]
    pub args: Vec<String>,
}

fn default_program() -> String {
    "pnpm".to_string()
}

fn default_args() -> Vec<String> {
    vec!["run".to_string()]
}

impl Default for BuildCommandConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
        }
    }
}

/// Supervisor timing, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MonitorConfig {
    /// Log poll interval
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Hard ceiling on build wall-clock time
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// No log growth for this long means the build is stalled
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,

    /// Interval between out-of-memory scans
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// Builds running longer than this get a warning on their record
    #[serde(default = "default_long_running_warning_secs")]
    pub long_running_warning_secs: u64,

    /// Grace period between SIGTERM and SIGKILL on cancellation
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,
}

const fn default_poll_interval_secs() -> u64 {
    5
}

const fn default_timeout_secs() -> u64 {
    1800
}

const fn default_stall_timeout_secs() -> u64 {
    600
}

const fn default_health_check_interval_secs() -> u64 {
    30
}

const fn default_long_running_warning_secs() -> u64 {
    900
}

const fn default_cancel_grace_secs() -> u64 {
    5
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_timeout_secs(),
            stall_timeout_secs: default_stall_timeout_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            long_running_warning_secs: default_long_running_warning_secs(),
            cancel_grace_secs: default_cancel_grace_secs(),
        }
    }
}

/// Worker tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkersConfig {
    /// A running worker not updated for this long is reported as stalled
    #[serde(default = "default_worker_stall_secs")]
    pub stall_threshold_secs: u64,
}

const fn default_worker_stall_secs() -> u64 {
    300
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            stall_threshold_secs: default_worker_stall_secs(),
        }
    }
}

/// Build notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NotifierConfig {
    /// POST build events here; notifications are only logged when unset
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Operator the notifications are addressed to
    #[serde(default = "default_recipient")]
    pub recipient: String,

    /// Link included in notifications
    #[serde(default = "default_dashboard_url")]
    pub dashboard_url: String,

    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_recipient() -> String {
    "operator@localhost".to_string()
}

fn default_dashboard_url() -> String {
    "http://127.0.0.1:8889".to_string()
}

const fn default_notify_timeout_secs() -> u64 {
    10
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            recipient: default_recipient(),
            dashboard_url: default_dashboard_url(),
            timeout_secs: default_notify_timeout_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rotated JSON log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}
