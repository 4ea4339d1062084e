use std::path::Path;

use flexi_logger::{
    detailed_format, Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming,
};

use crate::config::LoggingConfig;
use crate::error::DataKitError;

const LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;
const LOG_FILES_KEPT: usize = 5;

/// Starts logging to rotating files under `log_dir`, with warnings and
/// errors duplicated to stderr. The returned handle must be kept alive for
/// the lifetime of the process.
pub fn init_file_logging(
    config: &LoggingConfig,
    log_dir: &Path,
) -> Result<LoggerHandle, DataKitError> {
    Logger::try_with_str(config.log_spec())
        .map_err(|e| DataKitError::Error(format!("Invalid log specification: {e}")))?
        .log_to_file(
            FileSpec::default()
                .directory(log_dir)
                .basename("datakit"),
        )
        .duplicate_to_stderr(Duplicate::Warn)
        .format_for_files(detailed_format)
        .rotate(
            Criterion::Size(LOG_FILE_SIZE),
            Naming::Numbers,
            Cleanup::KeepLogFiles(LOG_FILES_KEPT),
        )
        .start()
        .map_err(|e| DataKitError::Error(format!("Failed to start logger: {e}")))
}

/// Logs to stderr only. Used when file logging cannot be started.
pub fn init_stderr_logging(config: &LoggingConfig) -> Result<LoggerHandle, DataKitError> {
    Logger::try_with_str(config.log_spec())
        .map_err(|e| DataKitError::Error(format!("Invalid log specification: {e}")))?
        .log_to_stderr()
        .start()
        .map_err(|e| DataKitError::Error(format!("Failed to start logger: {e}")))
}
