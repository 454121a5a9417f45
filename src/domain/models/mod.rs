pub mod build;
pub mod config;

pub use build::{BuildId, BuildMode, BuildRecord, BuildRequest, BuildStatus, ErrorType};
pub use config::{
    BuildCommandConfig, Config, LoggingConfig, MonitorConfig, NotifierConfig, PathsConfig,
    ServerConfig, WorkersConfig,
};
