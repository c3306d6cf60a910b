//! Shared ambient concerns: logging, error taxonomy, configuration.

pub mod config_base;
pub mod config_loader;
pub mod errors;
pub mod structured_logging;

pub use config_base::{
    CacheConfigBase, CircuitBreakerConfigBase, OrchestratorSettings, RetryConfigBase,
    SchedulerConfigBase, TelemetryConfigBase,
};
pub use config_loader::ConfigurationLoader;
pub use errors::{ConfigError, ConfigResult, ErrorKind, GenerationError, GenerationResultOf};
pub use structured_logging::{
    init_structured_logging, LoggingConfig, OperationTimer, RequestContext, StructuredLogEntry,
};
