use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use transfer_pilot_lib::app::adb::link::{AdbDeviceLink, DeviceBridge};
use transfer_pilot_lib::app::adb::locator::locate_adb;
use transfer_pilot_lib::app::automator::OperationPlan;
use transfer_pilot_lib::app::batch_file::write_progress;
use transfer_pilot_lib::app::commands::{
    check_adb, list_devices, load_batch, pause_batch, resume_batch, start_batch, stop_batch,
    subscribe_status,
};
use transfer_pilot_lib::app::config::{load_config, AppConfig};
use transfer_pilot_lib::app::error::AppError;
use transfer_pilot_lib::app::logging::init_logging;
use transfer_pilot_lib::app::models::{Batch, BatchSnapshot, BatchStatus, OperationKind};
use transfer_pilot_lib::app::navigator::Navigator;
use transfer_pilot_lib::app::profile::{builtin_profiles, ScreenState};
use transfer_pilot_lib::app::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "transfer-pilot", version, about = "Drives the inventory app on an Android device over adb")]
struct Cli {
    /// Device serial; overrides adb.serial from the config file.
    #[arg(long, global = true)]
    serial: Option<String>,
    /// Profile name, or `auto`; overrides automation.profile.
    #[arg(long, global = true)]
    profile: Option<String>,
    /// Skip every settle delay.
    #[arg(long, global = true)]
    no_delays: bool,
    /// Print JSON instead of text.
    #[arg(long, global = true)]
    json: bool,
    /// Keep `current,total` in this file while a batch runs.
    #[arg(long, global = true)]
    progress_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show where adb is and its version.
    Check {
        #[arg(long)]
        adb: Option<String>,
    },
    /// List attached devices.
    Devices,
    /// List built-in and configured device profiles.
    Profiles,
    /// Check adb, the device and the navigation graph without sending input.
    Preflight,
    /// Transfer IMEIs typed on the command line.
    Transfer {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(required = true)]
        imeis: Vec<String>,
    },
    /// Run a batch file: transfer_data.txt, receive.txt or a plain list.
    Run {
        #[arg(value_enum)]
        operation: OperationArg,
        file: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OperationArg {
    Transfer,
    StockAdd,
    Receive,
    ChangeState,
}

impl From<OperationArg> for OperationKind {
    fn from(value: OperationArg) -> Self {
        match value {
            OperationArg::Transfer => OperationKind::Transfer,
            OperationArg::StockAdd => OperationKind::StockAdd,
            OperationArg::Receive => OperationKind::Receive,
            OperationArg::ChangeState => OperationKind::ChangeItemState,
        }
    }
}

#[derive(Serialize)]
struct PreflightSummary {
    tool: &'static str,
    status: &'static str,
    trace_id: String,
    adb_program: Option<String>,
    serial: Option<String>,
    profile: Option<String>,
    checks: Vec<PreflightCheck>,
}

#[derive(Serialize)]
struct PreflightCheck {
    name: String,
    status: &'static str, // pass|fail
    duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl PreflightCheck {
    fn pass(name: impl Into<String>, started: Instant, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: "pass",
            duration_ms: started.elapsed().as_millis(),
            detail: Some(detail.into()),
            error_code: None,
            error: None,
        }
    }

    fn fail(name: impl Into<String>, started: Instant, code: &'static str, error: String) -> Self {
        Self {
            name: name.into(),
            status: "fail",
            duration_ms: started.elapsed().as_millis(),
            detail: None,
            error_code: Some(code),
            error: Some(error),
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(raw) => println!("{raw}"),
        Err(err) => eprintln!("failed to encode output: {err}"),
    }
}

fn report_error(err: &AppError, json: bool) -> ExitCode {
    if json {
        print_json(err);
    } else {
        eprintln!("error: {err} [trace {}]", err.trace_id);
    }
    ExitCode::FAILURE
}

fn apply_overrides(mut config: AppConfig, cli: &Cli) -> AppConfig {
    if let Some(serial) = cli.serial.as_deref() {
        config.adb.serial = serial.trim().to_string();
    }
    if let Some(profile) = cli.profile.as_deref() {
        config.automation.profile = profile.trim().to_string();
    }
    if cli.no_delays {
        config.automation.no_delays = true;
    }
    config
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match load_config() {
        Ok(config) => apply_overrides(config, &cli),
        Err(err) => {
            init_logging("info");
            return report_error(&err, cli.json);
        }
    };
    init_logging(&config.logging.log_level);
    let trace_id = Uuid::new_v4().to_string();

    match &cli.command {
        Command::Check { adb } => match check_adb(adb.clone(), Some(trace_id)) {
            Ok(response) if cli.json => {
                print_json(&response);
                ExitCode::SUCCESS
            }
            Ok(response) => {
                let info = response.data;
                println!("adb: {}", info.command_path);
                if info.available {
                    println!("{}", info.version_output);
                    ExitCode::SUCCESS
                } else {
                    println!("unavailable: {}", info.error.unwrap_or_default());
                    ExitCode::FAILURE
                }
            }
            Err(err) => report_error(&err, cli.json),
        },
        Command::Devices => match list_devices(Some(trace_id)) {
            Ok(response) if cli.json => {
                print_json(&response);
                ExitCode::SUCCESS
            }
            Ok(response) => {
                let report = response.data;
                if let Some(error) = report.error {
                    println!("{error}");
                    return ExitCode::FAILURE;
                }
                if report.devices.is_empty() {
                    println!("no devices attached");
                }
                for device in report.devices {
                    println!(
                        "{}\t{:?}\t{}",
                        device.serial,
                        device.state,
                        device.model.unwrap_or_default()
                    );
                }
                ExitCode::SUCCESS
            }
            Err(err) => report_error(&err, cli.json),
        },
        Command::Profiles => {
            let mut profiles = builtin_profiles();
            profiles.extend(config.profiles.iter().cloned());
            if cli.json {
                print_json(&profiles);
            } else {
                for profile in profiles {
                    println!("{}\t{}", profile.name, profile.description);
                }
            }
            ExitCode::SUCCESS
        }
        Command::Preflight => preflight(&config, &trace_id, cli.json),
        Command::Transfer { from, to, imeis } => {
            match Batch::transfer(from, to, imeis) {
                Ok(batch) => run_batch(config, batch, &trace_id, &cli),
                Err(err) => report_error(&err.into_app_error(&trace_id), cli.json),
            }
        }
        Command::Run { operation, file } => {
            let path = file.to_string_lossy().to_string();
            match load_batch((*operation).into(), path, Some(trace_id.clone())) {
                Ok(response) => run_batch(config, response.data, &trace_id, &cli),
                Err(err) => report_error(&err, cli.json),
            }
        }
    }
}

fn run_batch(config: AppConfig, batch: Batch, trace_id: &str, cli: &Cli) -> ExitCode {
    let state = match AppState::connect(config, trace_id) {
        Ok(state) => Arc::new(state),
        Err(err) => return report_error(&err.into_app_error(trace_id), cli.json),
    };

    let subscription = subscribe_status(&*state);
    if let Err(err) = start_batch(&*state, batch, Some(trace_id.to_string())) {
        return report_error(&err, cli.json);
    }
    if !cli.json {
        println!("running on profile {}; type p + Enter to pause, r to resume, s to stop", state.profile.name);
    }
    spawn_keyboard_control(Arc::clone(&state));

    let mut last = BatchSnapshot::default();
    for snapshot in subscription.iter() {
        if snapshot.run_id.is_none() {
            continue;
        }
        if let Some(path) = cli.progress_file.as_deref() {
            if let Err(err) = write_progress(path, &snapshot) {
                warn!(trace_id = %trace_id, error = %err, "progress file not written");
            }
        }
        if cli.json {
            match serde_json::to_string(&snapshot) {
                Ok(line) => println!("{line}"),
                Err(err) => eprintln!("failed to encode snapshot: {err}"),
            }
        } else if snapshot.status != last.status || snapshot.current_index != last.current_index {
            println!(
                "[{}/{}] {} - {}",
                snapshot.current_index,
                snapshot.total,
                snapshot.status.label(),
                snapshot.message
            );
        }
        let finished = snapshot.status.is_terminal();
        last = snapshot;
        if finished {
            break;
        }
    }

    if !cli.json {
        for failed in &last.failed_items {
            println!("failed {}: {}", failed.item.imei, failed.reason);
        }
        if let Some(teardown) = &last.teardown_error {
            println!("could not return to the main menu: {teardown}");
        }
        println!("{}", last.summary());
    }
    match last.status {
        BatchStatus::Completed if last.failed_items.is_empty() => ExitCode::SUCCESS,
        BatchStatus::Completed => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}

/// Reads p / r / s lines from stdin until the process exits.
fn spawn_keyboard_control(state: Arc<AppState>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let result = match line.trim().to_lowercase().as_str() {
                "p" | "pause" => pause_batch(&*state, None),
                "r" | "resume" => resume_batch(&*state, None),
                "s" | "stop" => stop_batch(&*state, None),
                "" => continue,
                other => {
                    eprintln!("unknown control {other:?}; use p, r or s");
                    continue;
                }
            };
            if let Err(err) = result {
                eprintln!("{}", err.error);
            }
        }
    });
}

fn preflight(config: &AppConfig, trace_id: &str, json: bool) -> ExitCode {
    let mut summary = PreflightSummary {
        tool: "transfer_pilot_preflight",
        status: "pass",
        trace_id: trace_id.to_string(),
        adb_program: None,
        serial: None,
        profile: None,
        checks: Vec::new(),
    };

    let started = Instant::now();
    let mut link = match locate_adb(&config.adb.command_path) {
        Ok(program) => {
            summary.checks.push(PreflightCheck::pass("locate_adb", started, program.clone()));
            summary.adb_program = Some(program.clone());
            Some(AdbDeviceLink::new(
                program,
                config.adb.preferred_serial(),
                config.adb.input_timeout(),
                trace_id,
            ))
        }
        Err(err) => {
            summary
                .checks
                .push(PreflightCheck::fail("locate_adb", started, err.code(), err.to_string()));
            None
        }
    };

    let mut screen_size = None;
    if let Some(link) = link.as_mut() {
        let started = Instant::now();
        match link.require_online() {
            Ok(device) => {
                summary.serial = Some(device.serial.clone());
                summary.checks.push(PreflightCheck::pass(
                    "device_online",
                    started,
                    device.model.unwrap_or(device.serial),
                ));
                let started = Instant::now();
                match link.screen_size() {
                    Ok(Some((width, height))) => {
                        screen_size = Some((width, height));
                        summary.checks.push(PreflightCheck::pass(
                            "screen_size",
                            started,
                            format!("{width}x{height}"),
                        ));
                    }
                    Ok(None) => summary.checks.push(PreflightCheck::fail(
                        "screen_size",
                        started,
                        "ERR_COMMAND_FAILED",
                        "wm size printed no size".to_string(),
                    )),
                    Err(err) => summary.checks.push(PreflightCheck::fail(
                        "screen_size",
                        started,
                        err.code(),
                        err.to_string(),
                    )),
                }
            }
            Err(err) => summary.checks.push(PreflightCheck::fail(
                "device_online",
                started,
                err.code(),
                err.to_string(),
            )),
        }
    }

    let started = Instant::now();
    match config.resolve_profile(screen_size) {
        Ok(profile) => {
            summary.profile = Some(profile.name.clone());
            summary
                .checks
                .push(PreflightCheck::pass("profile", started, profile.description.clone()));

            let navigator = Navigator::new(Arc::new(profile), trace_id);
            for kind in [
                OperationKind::Transfer,
                OperationKind::StockAdd,
                OperationKind::Receive,
                OperationKind::ChangeItemState,
            ] {
                let started = Instant::now();
                let entry = OperationPlan::for_kind(kind, &navigator.profile().operations).entry;
                let name = format!("route_{}", kind.label());
                let plan = navigator
                    .plan(ScreenState::MainMenu, entry)
                    .and_then(|inbound| {
                        navigator
                            .plan(entry, ScreenState::MainMenu)
                            .map(|outbound| inbound.len() + outbound.len())
                    });
                summary.checks.push(match plan {
                    Ok(steps) => PreflightCheck::pass(name, started, format!("{steps} input events")),
                    Err(err) => PreflightCheck::fail(name, started, err.code(), err.to_string()),
                });
            }
        }
        Err(err) => summary
            .checks
            .push(PreflightCheck::fail("profile", started, err.code(), err.to_string())),
    }

    if summary.checks.iter().any(|check| check.status == "fail") {
        summary.status = "fail";
    }
    if json {
        print_json(&summary);
    } else {
        for check in &summary.checks {
            let note = check
                .error
                .as_deref()
                .or(check.detail.as_deref())
                .unwrap_or_default();
            println!("{:<24} {:<4} {note}", check.name, check.status);
        }
        println!("preflight: {}", summary.status);
    }
    if summary.status == "pass" {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
