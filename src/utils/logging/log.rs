//! Logging utilities
//!
//! Standardized log lines for warehouse and file operations.

use std::fmt::Display;
use std::time::Duration;

/// Log an operation start with consistent format
///
/// # Arguments
/// * `operation` - Description of the operation
/// * `target` - Table, query step or path being operated on
pub fn log_operation_start(operation: &str, target: impl Display) {
    log::info!("{operation} {target}");
}

/// Log an operation completion with consistent format
///
/// # Arguments
/// * `operation` - Description of the operation
/// * `target` - Table, query step or path that was operated on
/// * `items` - Number of items processed, if known
/// * `elapsed` - Optional elapsed time
pub fn log_operation_complete(
    operation: &str,
    target: impl Display,
    items: Option<usize>,
    elapsed: Option<Duration>,
) {
    match (items, elapsed) {
        (Some(items), Some(duration)) => {
            log::info!("Successfully {operation} {items} items for {target} in {duration:?}");
        }
        (Some(items), None) => log::info!("Successfully {operation} {items} items for {target}"),
        (None, Some(duration)) => log::info!("Successfully {operation} {target} in {duration:?}"),
        (None, None) => log::info!("Successfully {operation} {target}"),
    }
}

/// Log an operation warning with consistent format
///
/// # Arguments
/// * `message` - Warning message
/// * `target` - Optional table or path related to the warning
pub fn log_warning(message: &str, target: Option<&dyn Display>) {
    if let Some(target) = target {
        log::warn!("{message}: {target}");
    } else {
        log::warn!("{message}");
    }
}
