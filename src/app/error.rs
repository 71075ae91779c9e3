use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub error: String,
    pub code: String,
    pub trace_id: String,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            trace_id: trace_id.into(),
        }
    }

    pub fn validation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_VALIDATION", message, trace_id)
    }

    pub fn system(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_SYSTEM", message, trace_id)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code)
    }
}

impl std::error::Error for AppError {}

/// Failures of the automation core.
///
/// Per-item trouble is not an error: the automator turns `CommandFailed` into a
/// recorded failed item and keeps going. Everything else ends the run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AutomationError {
    #[error("adb is not available: {0}")]
    BridgeUnavailable(String),
    #[error("no online device: {0}")]
    DeviceUnreachable(String),
    #[error("no navigation path from {from} to {to}")]
    NoPathDefined { from: String, to: String },
    #[error("`{command}` exited with {exit_code:?}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("screen check failed after reaching {state}: {detail}")]
    ScreenMismatch { state: String, detail: String },
    #[error("an automation run is already in progress")]
    AlreadyRunning,
    #[error("cannot {action} while {status}")]
    InvalidTransition { action: String, status: String },
    #[error("invalid batch: {0}")]
    InvalidBatch(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl AutomationError {
    pub fn code(&self) -> &'static str {
        match self {
            AutomationError::BridgeUnavailable(_) => "ERR_BRIDGE_UNAVAILABLE",
            AutomationError::DeviceUnreachable(_) => "ERR_DEVICE_UNREACHABLE",
            AutomationError::NoPathDefined { .. } => "ERR_NO_PATH_DEFINED",
            AutomationError::CommandFailed { .. } => "ERR_COMMAND_FAILED",
            AutomationError::ScreenMismatch { .. } => "ERR_SCREEN_MISMATCH",
            AutomationError::AlreadyRunning => "ERR_ALREADY_RUNNING",
            AutomationError::InvalidTransition { .. } => "ERR_INVALID_TRANSITION",
            AutomationError::InvalidBatch(_) => "ERR_VALIDATION",
            AutomationError::Config(_) => "ERR_CONFIG",
        }
    }

    /// Connection-level failures abort the whole run; the rest are either soft or
    /// programming errors caught before a run starts.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            AutomationError::BridgeUnavailable(_) | AutomationError::DeviceUnreachable(_)
        )
    }

    pub fn into_app_error(self, trace_id: &str) -> AppError {
        AppError::new(self.code(), self.to_string(), trace_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_taxonomy_to_stable_codes() {
        let err = AutomationError::DeviceUnreachable("offline".to_string());
        assert_eq!(err.code(), "ERR_DEVICE_UNREACHABLE");
        assert!(err.is_connection_loss());

        let err = AutomationError::CommandFailed {
            command: "input tap 1 2".to_string(),
            exit_code: Some(1),
            stderr: "boom".to_string(),
        };
        assert_eq!(err.code(), "ERR_COMMAND_FAILED");
        assert!(!err.is_connection_loss());
    }

    #[test]
    fn converts_into_command_envelope() {
        let app = AutomationError::AlreadyRunning.into_app_error("trace-9");
        assert_eq!(app.code, "ERR_ALREADY_RUNNING");
        assert_eq!(app.trace_id, "trace-9");
        assert!(app.error.contains("already in progress"));
    }
}
