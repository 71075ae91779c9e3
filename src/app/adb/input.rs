use serde::{Deserialize, Serialize};

pub const KEYCODE_ENTER: &str = "KEYCODE_ENTER";
pub const KEYCODE_DPAD_DOWN: &str = "KEYCODE_DPAD_DOWN";

/// One raw input event as `adb shell input` understands it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputAction {
    Tap {
        x: u32,
        y: u32,
    },
    Swipe {
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,
        duration_ms: u32,
    },
    Text {
        value: String,
    },
    Key {
        keycode: String,
    },
}

impl InputAction {
    pub fn tap(x: u32, y: u32) -> Self {
        InputAction::Tap { x, y }
    }

    pub fn text(value: impl Into<String>) -> Self {
        InputAction::Text {
            value: value.into(),
        }
    }

    pub fn key(keycode: impl Into<String>) -> Self {
        InputAction::Key {
            keycode: keycode.into(),
        }
    }

    /// Arguments after the adb program (and `-s serial`).
    pub fn adb_args(&self) -> Vec<String> {
        let mut args = vec!["shell".to_string(), "input".to_string()];
        match self {
            InputAction::Tap { x, y } => {
                args.extend(["tap".to_string(), x.to_string(), y.to_string()]);
            }
            InputAction::Swipe {
                x1,
                y1,
                x2,
                y2,
                duration_ms,
            } => {
                args.extend([
                    "swipe".to_string(),
                    x1.to_string(),
                    y1.to_string(),
                    x2.to_string(),
                    y2.to_string(),
                    duration_ms.to_string(),
                ]);
            }
            InputAction::Text { value } => {
                args.extend(["text".to_string(), escape_input_text(value)]);
            }
            InputAction::Key { keycode } => {
                args.extend(["keyevent".to_string(), keycode.clone()]);
            }
        }
        args
    }
}

/// `input text` runs through the device shell: spaces become `%s` and shell
/// metacharacters are backslash-escaped.
pub fn escape_input_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        match ch {
            ' ' => escaped.push_str("%s"),
            '\'' | '"' | '&' | '<' | '>' | '(' | ')' | '|' | ';' | '$' | '+' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            _ => escaped.push(ch),
        }
    }
    escaped
}
