use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::app::adb::link::{verify_connection, DeviceBridge};
use crate::app::adb::locator::{locate_adb, normalize_command_path, validate_adb_program};
use crate::app::adb::runner::run_command_with_timeout;
use crate::app::batch_file::{load_identifiers, load_item_state_pairs, load_transfer_data};
use crate::app::config::load_config;
use crate::app::error::{AppError, AutomationError};
use crate::app::models::{
    AdbInfo, Batch, BatchSnapshot, CommandResponse, ConnectionReport, OperationKind, WorkItem,
};
use crate::app::publisher::StatusSubscription;
use crate::app::state::AppState;


fn resolve_trace_id(input: Option<String>) -> String {
    input
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn ensure_non_empty(value: &str, field: &str, trace_id: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation(
            format!("{field} is required"),
            trace_id,
        ));
    }
    Ok(())
}

fn with_trace(mut err: AppError, trace_id: &str) -> AppError {
    err.trace_id = trace_id.to_string();
    err
}

fn respond<T>(
    result: Result<T, AutomationError>,
    action: &str,
    trace_id: String,
) -> Result<CommandResponse<T>, AppError> {
    match result {
        Ok(data) => Ok(CommandResponse { trace_id, data }),
        Err(err) => {
            warn!(trace_id = %trace_id, action = action, code = err.code(), error = %err, "command rejected");
            Err(err.into_app_error(&trace_id))
        }
    }
}

pub fn check_adb(
    command_path: Option<String>,
    trace_id: Option<String>,
) -> Result<CommandResponse<AdbInfo>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    info!(trace_id = %trace_id, "check_adb");

    let config = load_config().map_err(|err| with_trace(err, &trace_id))?;
    let configured = command_path
        .as_deref()
        .map(normalize_command_path)
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| config.adb.command_path.clone());

    let unavailable = |program: String, message: String| {
        warn!(trace_id = %trace_id, error = %message, "adb check failed");
        AdbInfo {
            available: false,
            version_output: String::new(),
            command_path: program,
            error: Some(message),
        }
    };

    let program = match locate_adb(&configured) {
        Ok(program) => program,
        Err(err) => {
            let data = unavailable(configured, err.to_string());
            return Ok(CommandResponse { trace_id, data });
        }
    };
    if let Err(message) = validate_adb_program(&program) {
        let data = unavailable(program, message);
        return Ok(CommandResponse { trace_id, data });
    }

    let args = vec!["version".to_string()];
    let output = match run_command_with_timeout(&program, &args, Duration::from_secs(5)) {
        Ok(output) => output,
        Err(err) => {
            let data = unavailable(program, err.to_string());
            return Ok(CommandResponse { trace_id, data });
        }
    };

    let mut version_output = output.stdout.trim().to_string();
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        if !version_output.is_empty() {
            version_output.push('\n');
        }
        version_output.push_str(stderr);
    }

    let available = output.success();
    Ok(CommandResponse {
        trace_id,
        data: AdbInfo {
            available,
            version_output,
            command_path: program,
            error: if available {
                None
            } else if stderr.is_empty() {
                Some("ADB command returned a non-zero exit code".to_string())
            } else {
                Some(stderr.to_string())
            },
        },
    })
}

pub fn list_devices(trace_id: Option<String>) -> Result<CommandResponse<ConnectionReport>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    info!(trace_id = %trace_id, "list_devices");
    let config = load_config().map_err(|err| with_trace(err, &trace_id))?;
    let report = verify_connection(&config.adb.command_path, &trace_id);
    Ok(CommandResponse {
        trace_id,
        data: report,
    })
}

/// Reads one of the plain-text batch files.
pub fn load_batch(
    operation: OperationKind,
    path: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<Batch>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&path, "path", &trace_id)?;
    let path = PathBuf::from(path.trim());
    let result = match operation {
        OperationKind::Transfer => load_transfer_data(&path),
        OperationKind::ChangeItemState => load_item_state_pairs(&path),
        OperationKind::StockAdd | OperationKind::Receive => load_identifiers(operation, &path),
    };
    respond(result, "load_batch", trace_id)
}

pub fn start_batch<B: DeviceBridge + 'static>(
    state: &AppState<B>,
    batch: Batch,
    trace_id: Option<String>,
) -> Result<CommandResponse<BatchSnapshot>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    info!(
        trace_id = %trace_id,
        operation = batch.operation.label(),
        items = batch.len(),
        "start_batch"
    );
    respond(state.controller.start(batch), "start_batch", trace_id)
}

pub fn start_single<B: DeviceBridge + 'static>(
    state: &AppState<B>,
    operation: OperationKind,
    item: WorkItem,
    trace_id: Option<String>,
) -> Result<CommandResponse<BatchSnapshot>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&item.imei, "imei", &trace_id)?;
    if operation == OperationKind::Transfer {
        ensure_non_empty(&item.from_location, "from_location", &trace_id)?;
        ensure_non_empty(&item.to_location, "to_location", &trace_id)?;
    }
    info!(trace_id = %trace_id, operation = operation.label(), imei = %item.imei, "start_single");
    respond(
        state.controller.run_single(operation, item),
        "start_single",
        trace_id,
    )
}

pub fn pause_batch<B: DeviceBridge + 'static>(
    state: &AppState<B>,
    trace_id: Option<String>,
) -> Result<CommandResponse<BatchSnapshot>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    respond(state.controller.pause(), "pause_batch", trace_id)
}

pub fn resume_batch<B: DeviceBridge + 'static>(
    state: &AppState<B>,
    trace_id: Option<String>,
) -> Result<CommandResponse<BatchSnapshot>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    respond(state.controller.resume(), "resume_batch", trace_id)
}

pub fn stop_batch<B: DeviceBridge + 'static>(
    state: &AppState<B>,
    trace_id: Option<String>,
) -> Result<CommandResponse<BatchSnapshot>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    respond(state.controller.stop(), "stop_batch", trace_id)
}

pub fn get_status<B: DeviceBridge + 'static>(
    state: &AppState<B>,
    trace_id: Option<String>,
) -> Result<CommandResponse<BatchSnapshot>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    Ok(CommandResponse {
        trace_id,
        data: state.controller.status(),
    })
}

pub fn subscribe_status<B: DeviceBridge + 'static>(state: &AppState<B>) -> StatusSubscription {
    state.controller.subscribe()
}
