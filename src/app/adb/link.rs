use std::time::Duration;

use tracing::{debug, info, warn};

use crate::app::adb::input::InputAction;
use crate::app::adb::locator::locate_adb;
use crate::app::adb::parse::{is_device_unreachable, parse_adb_devices, parse_wm_size};
use crate::app::adb::runner::{describe, run_command_with_timeout, CommandOutput};
use crate::app::error::AutomationError;
use crate::app::models::{ConnectionReport, DeviceHandle};

const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything the automation needs from a device. Implemented by [`AdbDeviceLink`]
/// and by scripted bridges in tests.
pub trait DeviceBridge: Send {
    fn list_devices(&mut self) -> Result<Vec<DeviceHandle>, AutomationError>;

    fn send_tap(&mut self, x: u32, y: u32) -> Result<(), AutomationError>;

    fn send_swipe(
        &mut self,
        from: (u32, u32),
        to: (u32, u32),
        duration_ms: u32,
    ) -> Result<(), AutomationError>;

    fn send_text(&mut self, text: &str) -> Result<(), AutomationError>;

    fn send_key(&mut self, keycode: &str) -> Result<(), AutomationError>;

    /// Resolves the device commands will go to.
    fn require_online(&mut self) -> Result<DeviceHandle, AutomationError> {
        let devices = self.list_devices()?;
        select_target(&devices, None)
    }

    fn apply(&mut self, action: &InputAction) -> Result<(), AutomationError> {
        match action {
            InputAction::Tap { x, y } => self.send_tap(*x, *y),
            InputAction::Swipe {
                x1,
                y1,
                x2,
                y2,
                duration_ms,
            } => self.send_swipe((*x1, *y1), (*x2, *y2), *duration_ms),
            InputAction::Text { value } => self.send_text(value),
            InputAction::Key { keycode } => self.send_key(keycode),
        }
    }
}

/// Picks the preferred serial when given, otherwise the only online device.
pub fn select_target(
    devices: &[DeviceHandle],
    preferred: Option<&str>,
) -> Result<DeviceHandle, AutomationError> {
    if let Some(serial) = preferred.map(str::trim).filter(|value| !value.is_empty()) {
        return match devices.iter().find(|device| device.serial == serial) {
            Some(device) if device.state.is_online() => Ok(device.clone()),
            Some(device) => Err(AutomationError::DeviceUnreachable(format!(
                "device {serial} is {:?}",
                device.state
            ))),
            None => Err(AutomationError::DeviceUnreachable(format!(
                "device {serial} is not connected"
            ))),
        };
    }

    let online = devices
        .iter()
        .filter(|device| device.state.is_online())
        .collect::<Vec<_>>();
    match online.as_slice() {
        [device] => Ok((*device).clone()),
        [] if devices.is_empty() => Err(AutomationError::DeviceUnreachable(
            "no device connected".to_string(),
        )),
        [] => Err(AutomationError::DeviceUnreachable(format!(
            "{} device(s) attached but none online",
            devices.len()
        ))),
        many => Err(AutomationError::DeviceUnreachable(format!(
            "{} devices online; set adb.serial to pick one",
            many.len()
        ))),
    }
}

pub struct AdbDeviceLink {
    program: String,
    preferred_serial: Option<String>,
    serial: Option<String>,
    input_timeout: Duration,
    trace_id: String,
}

impl AdbDeviceLink {
    pub fn new(
        program: impl Into<String>,
        preferred_serial: Option<String>,
        input_timeout: Duration,
        trace_id: impl Into<String>,
    ) -> Self {
        let preferred_serial = preferred_serial.filter(|value| !value.trim().is_empty());
        Self {
            program: program.into(),
            serial: preferred_serial.clone(),
            preferred_serial,
            input_timeout,
            trace_id: trace_id.into(),
        }
    }

    pub fn locate(
        config_command_path: &str,
        preferred_serial: Option<String>,
        input_timeout: Duration,
        trace_id: &str,
    ) -> Result<Self, AutomationError> {
        let program = locate_adb(config_command_path)?;
        info!(trace_id = %trace_id, adb = %program, "located adb");
        Ok(Self::new(program, preferred_serial, input_timeout, trace_id))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    /// Resolution the app renders at, used to pick a matching profile.
    pub fn screen_size(&mut self) -> Result<Option<(u32, u32)>, AutomationError> {
        let mut args = self.target_args();
        args.extend(["shell".to_string(), "wm".to_string(), "size".to_string()]);
        let output = run_command_with_timeout(&self.program, &args, QUERY_TIMEOUT)?;
        let output = self.check_exit(&args, output)?;
        Ok(parse_wm_size(&output.stdout))
    }

    fn target_args(&self) -> Vec<String> {
        match &self.serial {
            Some(serial) => vec!["-s".to_string(), serial.clone()],
            None => Vec::new(),
        }
    }

    fn check_exit(
        &self,
        args: &[String],
        output: CommandOutput,
    ) -> Result<CommandOutput, AutomationError> {
        if output.success() {
            return Ok(output);
        }
        let stderr = output.stderr.trim().to_string();
        if is_device_unreachable(&stderr) {
            warn!(trace_id = %self.trace_id, serial = ?self.serial, stderr = %stderr, "device unreachable");
            return Err(AutomationError::DeviceUnreachable(stderr));
        }
        Err(AutomationError::CommandFailed {
            command: describe(args),
            exit_code: output.exit_code,
            stderr,
        })
    }

    fn send(&mut self, action: InputAction) -> Result<(), AutomationError> {
        let mut args = self.target_args();
        args.extend(action.adb_args());
        debug!(trace_id = %self.trace_id, command = %describe(&args), "adb input");
        let output = run_command_with_timeout(&self.program, &args, self.input_timeout)?;
        self.check_exit(&args, output).map(|_| ())
    }
}

impl DeviceBridge for AdbDeviceLink {
    fn list_devices(&mut self) -> Result<Vec<DeviceHandle>, AutomationError> {
        let args = vec!["devices".to_string(), "-l".to_string()];
        let output = run_command_with_timeout(&self.program, &args, QUERY_TIMEOUT)?;
        if !output.success() {
            return Err(AutomationError::BridgeUnavailable(format!(
                "adb devices failed: {}",
                output.stderr.trim()
            )));
        }
        Ok(parse_adb_devices(&output.stdout))
    }

    fn send_tap(&mut self, x: u32, y: u32) -> Result<(), AutomationError> {
        self.send(InputAction::tap(x, y))
    }

    fn send_swipe(
        &mut self,
        from: (u32, u32),
        to: (u32, u32),
        duration_ms: u32,
    ) -> Result<(), AutomationError> {
        self.send(InputAction::Swipe {
            x1: from.0,
            y1: from.1,
            x2: to.0,
            y2: to.1,
            duration_ms,
        })
    }

    fn send_text(&mut self, text: &str) -> Result<(), AutomationError> {
        self.send(InputAction::text(text))
    }

    fn send_key(&mut self, keycode: &str) -> Result<(), AutomationError> {
        self.send(InputAction::key(keycode))
    }

    fn require_online(&mut self) -> Result<DeviceHandle, AutomationError> {
        let devices = self.list_devices()?;
        let device = select_target(&devices, self.preferred_serial.as_deref())?;
        info!(trace_id = %self.trace_id, serial = %device.serial, "target device selected");
        self.serial = Some(device.serial.clone());
        Ok(device)
    }
}

/// Never fails: a missing adb or an empty device list is reported in the result.
pub fn verify_connection(config_command_path: &str, trace_id: &str) -> ConnectionReport {
    let program = match locate_adb(config_command_path) {
        Ok(program) => program,
        Err(err) => {
            warn!(trace_id = %trace_id, error = %err, "adb not located");
            return ConnectionReport {
                adb_path: None,
                connected: false,
                devices: Vec::new(),
                error: Some(err.to_string()),
            };
        }
    };

    let mut link = AdbDeviceLink::new(program.clone(), None, QUERY_TIMEOUT, trace_id);
    match link.list_devices() {
        Ok(devices) => ConnectionReport {
            adb_path: Some(program),
            connected: devices.iter().any(|device| device.state.is_online()),
            devices,
            error: None,
        },
        Err(err) => ConnectionReport {
            adb_path: Some(program),
            connected: false,
            devices: Vec::new(),
            error: Some(err.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::ConnectionState;

    fn device(serial: &str, state: ConnectionState) -> DeviceHandle {
        DeviceHandle {
            serial: serial.to_string(),
            state,
            model: None,
            product: None,
            transport_id: None,
        }
    }

    #[test]
    fn selects_the_only_online_device() {
        let devices = vec![
            device("A", ConnectionState::Offline),
            device("B", ConnectionState::Online),
        ];
        assert_eq!(select_target(&devices, None).unwrap().serial, "B");
    }

    #[test]
    fn no_online_device_is_unreachable() {
        let err = select_target(&[], None).unwrap_err();
        assert_eq!(err.code(), "ERR_DEVICE_UNREACHABLE");

        let err = select_target(&[device("A", ConnectionState::Unauthorized)], None).unwrap_err();
        assert!(err.to_string().contains("none online"));
    }

    #[test]
    fn multiple_online_devices_need_a_serial() {
        let devices = vec![
            device("A", ConnectionState::Online),
            device("B", ConnectionState::Online),
        ];
        assert!(select_target(&devices, None).is_err());
        assert_eq!(select_target(&devices, Some("A")).unwrap().serial, "A");
        assert!(select_target(&devices, Some("C")).is_err());
    }

    #[cfg(unix)]
    mod with_fake_adb {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        fn write_script(dir: &Path, body: &str) -> String {
            let path = dir.join("adb");
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
            let mut perms = fs::metadata(&path).expect("meta").permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&path, perms).expect("chmod");
            path.to_string_lossy().to_string()
        }

        #[test]
        fn input_goes_to_the_selected_serial() {
            let dir = tempfile::tempdir().expect("tempdir");
            let log = dir.path().join("calls.log");
            let script = write_script(
                dir.path(),
                &format!(
                    "echo \"$@\" >> {log}\nif [ \"$1\" = devices ]; then printf 'List of devices attached\\nemu-1 device\\n'; fi",
                    log = log.display()
                ),
            );
            let mut link = AdbDeviceLink::new(script, None, Duration::from_secs(5), "trace");
            link.require_online().expect("online");
            link.send_tap(660, 950).expect("tap");
            link.send_text("Shelf A").expect("text");

            let calls = fs::read_to_string(&log).expect("log");
            let lines = calls.lines().collect::<Vec<_>>();
            assert_eq!(lines[0], "devices -l");
            assert_eq!(lines[1], "-s emu-1 shell input tap 660 950");
            assert_eq!(lines[2], "-s emu-1 shell input text Shelf%sA");
        }

        #[test]
        fn dropped_device_maps_to_unreachable() {
            let dir = tempfile::tempdir().expect("tempdir");
            let script = write_script(dir.path(), "echo \"error: device 'emu-1' not found\" >&2\nexit 1");
            let mut link =
                AdbDeviceLink::new(script, Some("emu-1".to_string()), Duration::from_secs(5), "t");
            let err = link.send_key("KEYCODE_ENTER").unwrap_err();
            assert_eq!(err.code(), "ERR_DEVICE_UNREACHABLE");
        }

        #[test]
        fn other_failures_are_command_failed() {
            let dir = tempfile::tempdir().expect("tempdir");
            let script = write_script(dir.path(), "echo 'Error: bad input' >&2\nexit 2");
            let mut link =
                AdbDeviceLink::new(script, Some("emu-1".to_string()), Duration::from_secs(5), "t");
            let err = link.send_tap(1, 2).unwrap_err();
            match err {
                AutomationError::CommandFailed { exit_code, stderr, .. } => {
                    assert_eq!(exit_code, Some(2));
                    assert_eq!(stderr, "Error: bad input");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[test]
        fn verify_connection_reports_empty_device_list() {
            let dir = tempfile::tempdir().expect("tempdir");
            let script = write_script(dir.path(), "printf 'List of devices attached\\n\\n'");
            let report = verify_connection(&script, "trace");
            assert_eq!(report.adb_path.as_deref(), Some(script.as_str()));
            assert!(!report.connected);
            assert!(report.devices.is_empty());
            assert!(report.error.is_none());
        }

        #[test]
        fn screen_size_reads_wm_size() {
            let dir = tempfile::tempdir().expect("tempdir");
            let script = write_script(dir.path(), "echo 'Physical size: 2400x1080'");
            let mut link =
                AdbDeviceLink::new(script, Some("emu-1".to_string()), Duration::from_secs(5), "t");
            assert_eq!(link.screen_size().unwrap(), Some((2400, 1080)));
        }
    }

    #[test]
    fn verify_connection_reports_missing_adb() {
        let report = verify_connection("/this/path/should/not/exist/adb", "trace");
        assert!(report.adb_path.is_none());
        assert!(!report.connected);
        assert!(report.error.unwrap().contains("Platform Tools"));
    }
}
