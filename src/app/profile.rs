//! Device profiles: where the app's controls sit on screen, how long each screen
//! takes to settle, and the navigation graph between screens.
//!
//! A profile is plain data so a new resolution or orientation can be added from
//! the config file without touching code.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::app::adb::input::{InputAction, KEYCODE_DPAD_DOWN, KEYCODE_ENTER};
use crate::app::error::AutomationError;

pub const DEFAULT_PROFILE: &str = "landscape_2400x1080";
pub const KEYPAD_PROFILE: &str = "keypad_portrait_1080x2400";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ScreenState {
    MainMenu,
    MoreMenu,
    MoreMenuPage3,
    TransferMenu,
    TransferFromScreen,
    StockChangeMenu,
    StockAddScreen,
    ReceiveScreen,
    ChangeItemStateScreen,
}

impl ScreenState {
    pub fn label(self) -> &'static str {
        match self {
            ScreenState::MainMenu => "main_menu",
            ScreenState::MoreMenu => "more_menu",
            ScreenState::MoreMenuPage3 => "more_menu_page3",
            ScreenState::TransferMenu => "transfer_menu",
            ScreenState::TransferFromScreen => "transfer_from_screen",
            ScreenState::StockChangeMenu => "stock_change_menu",
            ScreenState::StockAddScreen => "stock_add_screen",
            ScreenState::ReceiveScreen => "receive_screen",
            ScreenState::ChangeItemStateScreen => "change_item_state_screen",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// A step as written in a profile. Named controls are looked up in
/// [`DeviceProfile::controls`] when the step runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    Tap { control: String },
    TapAt { x: u32, y: u32 },
    Swipe { from: String, to: String, duration_ms: u32 },
    Key { keycode: String },
    Text { value: String },
}

impl StepAction {
    pub fn tap(control: &str) -> Self {
        StepAction::Tap {
            control: control.to_string(),
        }
    }

    pub fn key(keycode: &str) -> Self {
        StepAction::Key {
            keycode: keycode.to_string(),
        }
    }

    fn controls(&self) -> Vec<&str> {
        match self {
            StepAction::Tap { control } => vec![control.as_str()],
            StepAction::Swipe { from, to, .. } => vec![from.as_str(), to.as_str()],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EdgeStep {
    pub action: StepAction,
    #[serde(default)]
    pub settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EdgeSpec {
    pub from: ScreenState,
    pub to: ScreenState,
    pub steps: Vec<EdgeStep>,
}

/// A multi-hop path the automation is allowed to take; every consecutive pair
/// must be an edge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteSpec {
    pub path: Vec<ScreenState>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimingProfile {
    pub after_tap_ms: u64,
    pub after_type_ms: u64,
    pub screen_transition_ms: u64,
    /// Wait after submitting an item; the app round-trips to its backend here.
    pub sync_ms: u64,
    pub after_confirm_ms: u64,
}

impl TimingProfile {
    pub fn immediate() -> Self {
        Self {
            after_tap_ms: 0,
            after_type_ms: 0,
            screen_transition_ms: 0,
            sync_ms: 0,
            after_confirm_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationSettings {
    /// Tap the confirm control after every Nth stock-add item.
    pub stock_add_confirm_every: u32,
    /// Receive items starting with one of these (case-insensitive) need an extra submit first.
    pub receive_extra_submit_prefixes: Vec<String>,
}

impl Default for OperationSettings {
    fn default() -> Self {
        Self {
            stock_add_confirm_every: 2,
            receive_extra_submit_prefixes: vec!["ipad".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub resolution: Option<Resolution>,
    #[serde(default)]
    pub controls: BTreeMap<String, Point>,
    pub submit: StepAction,
    pub confirm: StepAction,
    pub timing: TimingProfile,
    pub edges: Vec<EdgeSpec>,
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
    #[serde(default)]
    pub operations: OperationSettings,
}

impl DeviceProfile {
    pub fn resolve(&self, action: &StepAction) -> Result<InputAction, AutomationError> {
        match action {
            StepAction::Tap { control } => {
                let point = self.control(control)?;
                Ok(InputAction::tap(point.x, point.y))
            }
            StepAction::TapAt { x, y } => Ok(InputAction::tap(*x, *y)),
            StepAction::Swipe {
                from,
                to,
                duration_ms,
            } => {
                let from = self.control(from)?;
                let to = self.control(to)?;
                Ok(InputAction::Swipe {
                    x1: from.x,
                    y1: from.y,
                    x2: to.x,
                    y2: to.y,
                    duration_ms: *duration_ms,
                })
            }
            StepAction::Key { keycode } => Ok(InputAction::key(keycode.clone())),
            StepAction::Text { value } => Ok(InputAction::text(value.clone())),
        }
    }

    pub fn edge(&self, from: ScreenState, to: ScreenState) -> Option<&EdgeSpec> {
        self.edges
            .iter()
            .find(|edge| edge.from == from && edge.to == to)
    }

    pub fn matches_resolution(&self, width: u32, height: u32) -> bool {
        self.resolution
            .map(|res| res.width == width && res.height == height)
            .unwrap_or(false)
    }

    /// Zeroes every delay; used for dry runs and tests.
    pub fn without_delays(mut self) -> Self {
        self.timing = TimingProfile::immediate();
        for edge in &mut self.edges {
            for step in &mut edge.steps {
                step.settle_ms = 0;
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), AutomationError> {
        let invalid = |message: String| {
            Err(AutomationError::Config(format!("profile {}: {message}", self.name)))
        };
        if self.name.trim().is_empty() {
            return Err(AutomationError::Config("profile name is empty".to_string()));
        }

        let mut seen = HashSet::new();
        for edge in &self.edges {
            if !seen.insert((edge.from, edge.to)) {
                return invalid(format!(
                    "duplicate edge {} -> {}",
                    edge.from.label(),
                    edge.to.label()
                ));
            }
            if edge.steps.is_empty() {
                return invalid(format!(
                    "edge {} -> {} has no steps",
                    edge.from.label(),
                    edge.to.label()
                ));
            }
        }

        let referenced = self
            .edges
            .iter()
            .flat_map(|edge| edge.steps.iter().map(|step| &step.action))
            .chain([&self.submit, &self.confirm])
            .flat_map(StepAction::controls)
            .collect::<Vec<_>>();
        if let Some(missing) = referenced
            .iter()
            .find(|name| !self.controls.contains_key(**name))
        {
            return invalid(format!("unknown control {missing}"));
        }

        for route in &self.routes {
            if route.path.len() < 2 {
                return invalid("route needs at least two screens".to_string());
            }
            for hop in route.path.windows(2) {
                if self.edge(hop[0], hop[1]).is_none() {
                    return invalid(format!(
                        "route uses missing edge {} -> {}",
                        hop[0].label(),
                        hop[1].label()
                    ));
                }
            }
        }
        Ok(())
    }

    fn control(&self, name: &str) -> Result<Point, AutomationError> {
        self.controls.get(name).copied().ok_or_else(|| {
            AutomationError::Config(format!("profile {}: unknown control {name}", self.name))
        })
    }
}

pub fn builtin_profiles() -> Vec<DeviceProfile> {
    vec![landscape_profile(), keypad_profile()]
}

/// Custom profiles shadow built-ins with the same name.
pub fn find_profile(name: &str, custom: &[DeviceProfile]) -> Option<DeviceProfile> {
    custom
        .iter()
        .find(|profile| profile.name == name)
        .cloned()
        .or_else(|| {
            builtin_profiles()
                .into_iter()
                .find(|profile| profile.name == name)
        })
}

pub fn profile_for_resolution(
    width: u32,
    height: u32,
    custom: &[DeviceProfile],
) -> Option<DeviceProfile> {
    custom
        .iter()
        .cloned()
        .chain(builtin_profiles())
        .find(|profile| profile.matches_resolution(width, height))
}

fn step(action: StepAction, settle_ms: u64) -> EdgeStep {
    EdgeStep { action, settle_ms }
}

fn edge(from: ScreenState, to: ScreenState, steps: Vec<EdgeStep>) -> EdgeSpec {
    EdgeSpec { from, to, steps }
}

fn route(path: &[ScreenState]) -> RouteSpec {
    RouteSpec {
        path: path.to_vec(),
    }
}

/// Tablet in landscape. The app draws on a SurfaceView, so every control is a
/// fixed coordinate: a bottom button row and four stacked menu slots.
fn landscape_profile() -> DeviceProfile {
    use ScreenState::*;

    let timing = TimingProfile {
        after_tap_ms: 1000,
        after_type_ms: 500,
        screen_transition_ms: 1500,
        sync_ms: 2000,
        after_confirm_ms: 1000,
    };
    let hop = timing.after_tap_ms + timing.screen_transition_ms;

    let controls = BTreeMap::from([
        ("back_button".to_string(), Point { x: 120, y: 950 }),
        ("enter_button".to_string(), Point { x: 390, y: 950 }),
        ("more_button".to_string(), Point { x: 660, y: 950 }),
        ("menu_item_1".to_string(), Point { x: 400, y: 185 }),
        ("menu_item_2".to_string(), Point { x: 400, y: 280 }),
        ("menu_item_3".to_string(), Point { x: 400, y: 375 }),
        ("menu_item_4".to_string(), Point { x: 400, y: 470 }),
        ("confirm_button".to_string(), Point { x: 1310, y: 580 }),
        ("confirm_back_button".to_string(), Point { x: 245, y: 580 }),
    ]);

    // Scan screens share the same exit: the right button opens the menu, whose
    // first entry is "Exit to main menu".
    let exit_to_main = |from: ScreenState| {
        edge(
            from,
            MainMenu,
            vec![
                step(StepAction::tap("more_button"), timing.after_tap_ms),
                step(StepAction::tap("menu_item_1"), hop),
            ],
        )
    };

    DeviceProfile {
        name: DEFAULT_PROFILE.to_string(),
        description: "Denali on a 2400x1080 landscape tablet, coordinate taps".to_string(),
        resolution: Some(Resolution {
            width: 2400,
            height: 1080,
        }),
        controls,
        submit: StepAction::tap("enter_button"),
        confirm: StepAction::tap("confirm_button"),
        edges: vec![
            edge(MainMenu, MoreMenu, vec![step(StepAction::tap("more_button"), hop)]),
            edge(MoreMenu, TransferMenu, vec![step(StepAction::tap("menu_item_2"), hop)]),
            edge(
                TransferMenu,
                TransferFromScreen,
                vec![step(StepAction::tap("menu_item_3"), hop)],
            ),
            edge(MoreMenu, MoreMenuPage3, vec![step(StepAction::tap("more_button"), hop)]),
            edge(
                MoreMenuPage3,
                ChangeItemStateScreen,
                vec![step(StepAction::tap("menu_item_1"), hop)],
            ),
            edge(MainMenu, ReceiveScreen, vec![step(StepAction::tap("menu_item_3"), hop)]),
            edge(MainMenu, StockChangeMenu, vec![step(StepAction::tap("menu_item_4"), hop)]),
            edge(
                StockChangeMenu,
                StockAddScreen,
                vec![step(StepAction::tap("menu_item_1"), hop)],
            ),
            exit_to_main(TransferFromScreen),
            exit_to_main(ChangeItemStateScreen),
            exit_to_main(ReceiveScreen),
            exit_to_main(StockAddScreen),
        ],
        routes: vec![
            route(&[MainMenu, MoreMenu, TransferMenu, TransferFromScreen]),
            route(&[MainMenu, MoreMenu, MoreMenuPage3, ChangeItemStateScreen]),
            route(&[MainMenu, StockChangeMenu, StockAddScreen]),
        ],
        timing,
        operations: OperationSettings::default(),
    }
}

/// Phone in portrait driven with the d-pad: menus are walked with DOWN presses
/// and ENTER instead of taps. Only the confirm dialog needs a coordinate.
fn keypad_profile() -> DeviceProfile {
    use ScreenState::*;

    let timing = TimingProfile {
        after_tap_ms: 100,
        after_type_ms: 20,
        screen_transition_ms: 250,
        sync_ms: 300,
        after_confirm_ms: 400,
    };

    let down_then_enter = |count: usize| {
        let mut steps = (0..count)
            .map(|_| step(StepAction::key(KEYCODE_DPAD_DOWN), 20))
            .collect::<Vec<_>>();
        steps.push(step(
            StepAction::key(KEYCODE_ENTER),
            timing.after_tap_ms + timing.screen_transition_ms,
        ));
        steps
    };
    let back_to_main = |from: ScreenState, presses: usize| {
        edge(
            from,
            MainMenu,
            (0..presses)
                .map(|_| step(StepAction::key("KEYCODE_BACK"), timing.screen_transition_ms))
                .collect(),
        )
    };

    DeviceProfile {
        name: KEYPAD_PROFILE.to_string(),
        description: "Denali on a 1080x2400 portrait phone, d-pad navigation".to_string(),
        resolution: Some(Resolution {
            width: 1080,
            height: 2400,
        }),
        controls: BTreeMap::from([("confirm_button".to_string(), Point { x: 900, y: 2100 })]),
        submit: StepAction::key(KEYCODE_ENTER),
        confirm: StepAction::tap("confirm_button"),
        edges: vec![
            edge(MainMenu, TransferMenu, down_then_enter(5)),
            edge(TransferMenu, TransferFromScreen, down_then_enter(2)),
            edge(MainMenu, ChangeItemStateScreen, down_then_enter(9)),
            edge(MainMenu, ReceiveScreen, down_then_enter(2)),
            edge(MainMenu, StockChangeMenu, down_then_enter(3)),
            edge(StockChangeMenu, StockAddScreen, down_then_enter(0)),
            back_to_main(TransferFromScreen, 2),
            back_to_main(ChangeItemStateScreen, 1),
            back_to_main(ReceiveScreen, 1),
            back_to_main(StockAddScreen, 2),
        ],
        routes: vec![
            route(&[MainMenu, TransferMenu, TransferFromScreen]),
            route(&[MainMenu, StockChangeMenu, StockAddScreen]),
        ],
        timing,
        operations: OperationSettings::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_profiles_validate() {
        for profile in builtin_profiles() {
            profile.validate().expect("builtin profile should validate");
        }
    }

    #[test]
    fn resolves_named_controls() {
        let profile = landscape_profile();
        assert_eq!(
            profile.resolve(&StepAction::tap("more_button")).unwrap(),
            InputAction::tap(660, 950)
        );
        let err = profile.resolve(&StepAction::tap("nope")).unwrap_err();
        assert_eq!(err.code(), "ERR_CONFIG");
    }

    #[test]
    fn rejects_routes_over_missing_edges() {
        let mut profile = landscape_profile();
        profile.routes.push(route(&[
            ScreenState::MainMenu,
            ScreenState::ReceiveScreen,
            ScreenState::StockAddScreen,
        ]));
        let err = profile.validate().unwrap_err();
        assert!(err.to_string().contains("missing edge"));
    }

    #[test]
    fn rejects_unknown_controls() {
        let mut profile = landscape_profile();
        profile.submit = StepAction::tap("enter_key");
        assert!(profile.validate().is_err());
    }

    #[test]
    fn picks_profile_by_resolution_and_name() {
        assert_eq!(
            profile_for_resolution(1080, 2400, &[]).unwrap().name,
            KEYPAD_PROFILE
        );
        assert!(profile_for_resolution(720, 1280, &[]).is_none());

        let mut custom = landscape_profile();
        custom.description = "tuned".to_string();
        let found = find_profile(DEFAULT_PROFILE, &[custom]).unwrap();
        assert_eq!(found.description, "tuned");
    }

    #[test]
    fn without_delays_zeroes_every_settle() {
        let profile = landscape_profile().without_delays();
        assert_eq!(profile.timing, TimingProfile::immediate());
        assert!(profile
            .edges
            .iter()
            .flat_map(|edge| &edge.steps)
            .all(|step| step.settle_ms == 0));
    }

    #[test]
    fn profiles_round_trip_through_json() {
        let profile = keypad_profile();
        let raw = serde_json::to_string(&profile).expect("serialize");
        let parsed: DeviceProfile = serde_json::from_str(&raw).expect("parse");
        assert_eq!(parsed, profile);
    }
}
