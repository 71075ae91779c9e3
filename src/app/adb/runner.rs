use std::io::Read;
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::app::error::AutomationError;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub fn run_command(program: &str, args: &[String]) -> Result<CommandOutput, AutomationError> {
    run_command_with_timeout(program, args, Duration::from_secs(10))
}

/// Spawn failures mean the bridge itself is missing; a timeout is reported as a
/// failed command because the device may or may not have received the event.
pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<CommandOutput, AutomationError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| {
            AutomationError::BridgeUnavailable(format!("failed to spawn {program}: {err}"))
        })?;

    // Drain both pipes while waiting; a chatty child blocks once the pipe buffer fills.
    let stdout_handle = drain(child.stdout.take());
    let stderr_handle = drain(child.stderr.take());

    let start = Instant::now();
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_handle.join();
                    let _ = stderr_handle.join();
                    return Err(AutomationError::CommandFailed {
                        command: describe(args),
                        exit_code: None,
                        stderr: format!("timed out after {} ms", timeout.as_millis()),
                    });
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(err) => {
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(AutomationError::CommandFailed {
                    command: describe(args),
                    exit_code: None,
                    stderr: format!("failed to poll command: {err}"),
                });
            }
        }
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        exit_code,
    })
}

pub fn describe(args: &[String]) -> String {
    args.join(" ")
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buffer = Vec::<u8>::new();
        if let Some(mut reader) = pipe {
            let mut temp = [0u8; 4096];
            loop {
                match reader.read(&mut temp) {
                    Ok(0) => break,
                    Ok(count) => buffer.extend_from_slice(&temp[..count]),
                    Err(_) => break,
                }
            }
        }
        buffer
    })
}
