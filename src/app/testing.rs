//! Scripted device bridge for unit tests. Clones share state, so a test keeps a
//! handle after moving the bridge into an automator or controller.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use crate::app::adb::input::InputAction;
use crate::app::adb::link::DeviceBridge;
use crate::app::error::AutomationError;
use crate::app::models::{ConnectionState, DeviceHandle};
use crate::app::profile::{find_profile, DeviceProfile, DEFAULT_PROFILE};

pub fn fast_profile() -> DeviceProfile {
    find_profile(DEFAULT_PROFILE, &[])
        .expect("default profile")
        .without_delays()
}

struct Gate {
    text: String,
    entered: Sender<()>,
    release: Receiver<()>,
}

pub struct GateHandle {
    pub entered: Receiver<()>,
    pub release: Sender<()>,
}

#[derive(Clone)]
pub struct FakeBridge {
    delivered: Arc<Mutex<Vec<InputAction>>>,
    attempted: Arc<Mutex<Vec<InputAction>>>,
    online: Arc<AtomicBool>,
    failing_texts: Arc<Mutex<HashSet<String>>>,
    offline_on_text: Arc<Mutex<Option<String>>>,
    gate: Arc<Mutex<Option<Gate>>>,
}

impl FakeBridge {
    pub fn new() -> Self {
        Self {
            delivered: Arc::new(Mutex::new(Vec::new())),
            attempted: Arc::new(Mutex::new(Vec::new())),
            online: Arc::new(AtomicBool::new(true)),
            failing_texts: Arc::new(Mutex::new(HashSet::new())),
            offline_on_text: Arc::new(Mutex::new(None)),
            gate: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Typing `text` fails with a non-zero exit.
    pub fn fail_text(&self, text: &str) {
        self.failing_texts.lock().unwrap().insert(text.to_string());
    }

    /// The device drops right before `text` would be typed.
    pub fn go_offline_on_text(&self, text: &str) {
        *self.offline_on_text.lock().unwrap() = Some(text.to_string());
    }

    /// Typing `text` blocks until the returned handle releases it.
    pub fn hold_on_text(&self, text: &str) -> GateHandle {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.gate.lock().unwrap() = Some(Gate {
            text: text.to_string(),
            entered: entered_tx,
            release: release_rx,
        });
        GateHandle {
            entered: entered_rx,
            release: release_tx,
        }
    }

    pub fn delivered(&self) -> Vec<InputAction> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn attempted(&self) -> Vec<InputAction> {
        self.attempted.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.delivered()
            .into_iter()
            .filter_map(|action| match action {
                InputAction::Text { value } => Some(value),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, action: &InputAction) -> usize {
        self.delivered()
            .iter()
            .filter(|delivered| *delivered == action)
            .count()
    }

    fn deliver(&mut self, action: InputAction) -> Result<(), AutomationError> {
        self.attempted.lock().unwrap().push(action.clone());

        if let InputAction::Text { value } = &action {
            let drop_now = self.offline_on_text.lock().unwrap().as_deref() == Some(value.as_str());
            if drop_now {
                self.set_online(false);
            }
            let mut gate = self.gate.lock().unwrap();
            if gate.as_ref().map(|gate| gate.text == *value).unwrap_or(false) {
                if let Some(gate) = gate.take() {
                    let _ = gate.entered.send(());
                    let _ = gate.release.recv();
                }
            }
        }

        if !self.online.load(Ordering::SeqCst) {
            return Err(AutomationError::DeviceUnreachable(
                "error: device 'fake-1' not found".to_string(),
            ));
        }
        if let InputAction::Text { value } = &action {
            if self.failing_texts.lock().unwrap().contains(value) {
                return Err(AutomationError::CommandFailed {
                    command: format!("shell input text {value}"),
                    exit_code: Some(1),
                    stderr: "injected failure".to_string(),
                });
            }
        }
        self.delivered.lock().unwrap().push(action);
        Ok(())
    }
}

impl DeviceBridge for FakeBridge {
    fn list_devices(&mut self) -> Result<Vec<DeviceHandle>, AutomationError> {
        let state = if self.online.load(Ordering::SeqCst) {
            ConnectionState::Online
        } else {
            ConnectionState::Offline
        };
        Ok(vec![DeviceHandle {
            serial: "fake-1".to_string(),
            state,
            model: Some("Scripted".to_string()),
            product: None,
            transport_id: None,
        }])
    }

    fn send_tap(&mut self, x: u32, y: u32) -> Result<(), AutomationError> {
        self.deliver(InputAction::tap(x, y))
    }

    fn send_swipe(
        &mut self,
        from: (u32, u32),
        to: (u32, u32),
        duration_ms: u32,
    ) -> Result<(), AutomationError> {
        self.deliver(InputAction::Swipe {
            x1: from.0,
            y1: from.1,
            x2: to.0,
            y2: to.1,
            duration_ms,
        })
    }

    fn send_text(&mut self, text: &str) -> Result<(), AutomationError> {
        self.deliver(InputAction::text(text))
    }

    fn send_key(&mut self, keycode: &str) -> Result<(), AutomationError> {
        self.deliver(InputAction::key(keycode))
    }
}
