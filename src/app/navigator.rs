use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::app::adb::input::InputAction;
use crate::app::adb::link::DeviceBridge;
use crate::app::error::AutomationError;
use crate::app::profile::{DeviceProfile, EdgeSpec, ScreenState};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    /// State advanced on timing alone.
    Unverified,
    Verified,
}

/// Record of one completed navigation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Transition {
    pub from: ScreenState,
    pub to: ScreenState,
    pub hops: Vec<ScreenState>,
    pub commands: Vec<InputAction>,
    pub confirmation: Confirmation,
}

/// Hook for checking the screen after a hop, e.g. with a screenshot or UI dump.
/// `Err` carries what was seen instead.
pub trait ScreenVerifier: Send {
    fn confirm(&mut self, expected: ScreenState) -> Result<Confirmation, String>;
}

/// Trusts the settle delays.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeArrived;

impl ScreenVerifier for AssumeArrived {
    fn confirm(&mut self, _expected: ScreenState) -> Result<Confirmation, String> {
        Ok(Confirmation::Unverified)
    }
}

/// Walks the profile's screen graph. The app exposes no accessibility tree, so
/// the current screen is whatever the last successful hop said it is.
pub struct Navigator {
    profile: Arc<DeviceProfile>,
    current: ScreenState,
    verifier: Box<dyn ScreenVerifier>,
    trace_id: String,
}

impl Navigator {
    pub fn new(profile: Arc<DeviceProfile>, trace_id: impl Into<String>) -> Self {
        Self {
            profile,
            current: ScreenState::MainMenu,
            verifier: Box::new(AssumeArrived),
            trace_id: trace_id.into(),
        }
    }

    pub fn with_verifier(mut self, verifier: Box<dyn ScreenVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn current_state(&self) -> ScreenState {
        self.current
    }

    /// Overrides the tracked state, e.g. after the operator fixed the screen by hand.
    pub fn reset(&mut self, state: ScreenState) {
        self.current = state;
    }

    /// Edges to walk, either the direct one or a stretch of a declared route.
    pub fn route(&self, from: ScreenState, to: ScreenState) -> Result<Vec<&EdgeSpec>, AutomationError> {
        if from == to {
            return Ok(Vec::new());
        }
        if let Some(edge) = self.profile.edge(from, to) {
            return Ok(vec![edge]);
        }

        for route in &self.profile.routes {
            let start = route.path.iter().position(|state| *state == from);
            let end = route.path.iter().rposition(|state| *state == to);
            if let (Some(start), Some(end)) = (start, end) {
                if start < end {
                    let edges = route.path[start..=end]
                        .windows(2)
                        .map(|hop| self.profile.edge(hop[0], hop[1]))
                        .collect::<Option<Vec<_>>>();
                    if let Some(edges) = edges {
                        return Ok(edges);
                    }
                }
            }
        }

        Err(AutomationError::NoPathDefined {
            from: from.label().to_string(),
            to: to.label().to_string(),
        })
    }

    /// The input events `navigate(from, to)` would send, without sending them.
    pub fn plan(&self, from: ScreenState, to: ScreenState) -> Result<Vec<InputAction>, AutomationError> {
        let mut commands = Vec::new();
        for edge in self.route(from, to)? {
            for step in &edge.steps {
                commands.push(self.profile.resolve(&step.action)?);
            }
        }
        Ok(commands)
    }

    pub fn navigate_to(
        &mut self,
        bridge: &mut dyn DeviceBridge,
        to: ScreenState,
    ) -> Result<Transition, AutomationError> {
        self.navigate(bridge, self.current, to)
    }

    /// Sends every step of the route in order. The tracked state advances hop by
    /// hop, so a failure leaves it at the last screen actually reached.
    pub fn navigate(
        &mut self,
        bridge: &mut dyn DeviceBridge,
        from: ScreenState,
        to: ScreenState,
    ) -> Result<Transition, AutomationError> {
        let profile = Arc::clone(&self.profile);
        let edges = self.route(from, to)?;
        let mut transition = Transition {
            from,
            to,
            hops: Vec::with_capacity(edges.len()),
            commands: Vec::new(),
            confirmation: Confirmation::Verified,
        };

        let hops = edges
            .into_iter()
            .map(|edge| (edge.to, edge.steps.clone()))
            .collect::<Vec<_>>();
        if hops.is_empty() {
            transition.confirmation = Confirmation::Unverified;
        }
        self.current = from;

        for (next, steps) in hops {
            for step in steps {
                let action = profile.resolve(&step.action)?;
                bridge.apply(&action)?;
                transition.commands.push(action);
                if step.settle_ms > 0 {
                    thread::sleep(Duration::from_millis(step.settle_ms));
                }
            }
            self.current = next;
            debug!(trace_id = %self.trace_id, screen = next.label(), "reached screen");

            match self.verifier.confirm(next) {
                Ok(Confirmation::Verified) => {}
                Ok(Confirmation::Unverified) => transition.confirmation = Confirmation::Unverified,
                Err(detail) => {
                    return Err(AutomationError::ScreenMismatch {
                        state: next.label().to_string(),
                        detail,
                    })
                }
            }
            transition.hops.push(next);
        }

        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::profile::{find_profile, KEYPAD_PROFILE};
    use crate::app::testing::{fast_profile, FakeBridge};

    fn navigator() -> Navigator {
        Navigator::new(Arc::new(fast_profile()), "trace")
    }

    #[test]
    fn main_menu_to_transfer_from_walks_three_taps() {
        let mut nav = navigator();
        let mut bridge = FakeBridge::new();
        let transition = nav
            .navigate(&mut bridge, ScreenState::MainMenu, ScreenState::TransferFromScreen)
            .expect("navigate");

        let expected = vec![
            InputAction::tap(660, 950),
            InputAction::tap(400, 280),
            InputAction::tap(400, 375),
        ];
        assert_eq!(bridge.delivered(), expected);
        assert_eq!(transition.commands, expected);
        assert_eq!(
            transition.hops,
            vec![
                ScreenState::MoreMenu,
                ScreenState::TransferMenu,
                ScreenState::TransferFromScreen
            ]
        );
        assert_eq!(transition.confirmation, Confirmation::Unverified);
        assert_eq!(nav.current_state(), ScreenState::TransferFromScreen);
    }

    #[test]
    fn plan_matches_what_navigate_sends() {
        let nav = navigator();
        let plan = nav
            .plan(ScreenState::MainMenu, ScreenState::ChangeItemStateScreen)
            .expect("plan");
        assert_eq!(
            plan,
            vec![
                InputAction::tap(660, 950),
                InputAction::tap(660, 950),
                InputAction::tap(400, 185),
            ]
        );
        assert_eq!(nav.current_state(), ScreenState::MainMenu);
    }

    #[test]
    fn routes_can_start_mid_way() {
        let nav = navigator();
        let plan = nav
            .plan(ScreenState::MoreMenu, ScreenState::TransferFromScreen)
            .expect("plan");
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn undeclared_path_is_an_error_and_sends_nothing() {
        let mut nav = navigator();
        let mut bridge = FakeBridge::new();
        let err = nav
            .navigate(&mut bridge, ScreenState::ReceiveScreen, ScreenState::TransferMenu)
            .unwrap_err();
        assert_eq!(err.code(), "ERR_NO_PATH_DEFINED");
        assert!(bridge.attempted().is_empty());
    }

    #[test]
    fn same_screen_is_a_no_op() {
        let mut nav = navigator();
        let mut bridge = FakeBridge::new();
        let transition = nav.navigate_to(&mut bridge, ScreenState::MainMenu).expect("noop");
        assert!(transition.commands.is_empty());
        assert!(bridge.attempted().is_empty());
    }

    #[test]
    fn failure_leaves_state_at_last_reached_screen() {
        let mut nav = navigator();
        let mut bridge = FakeBridge::new();
        nav.navigate_to(&mut bridge, ScreenState::TransferFromScreen)
            .expect("first");
        bridge.set_online(false);
        let err = nav.navigate_to(&mut bridge, ScreenState::MainMenu).unwrap_err();
        assert!(err.is_connection_loss());
        assert_eq!(nav.current_state(), ScreenState::TransferFromScreen);

        nav.reset(ScreenState::MainMenu);
        assert_eq!(nav.current_state(), ScreenState::MainMenu);
    }

    struct RejectAt(ScreenState);

    impl ScreenVerifier for RejectAt {
        fn confirm(&mut self, expected: ScreenState) -> Result<Confirmation, String> {
            if expected == self.0 {
                Err("still on more_menu".to_string())
            } else {
                Ok(Confirmation::Verified)
            }
        }
    }

    #[test]
    fn verifier_rejection_is_a_screen_mismatch() {
        let mut nav = navigator().with_verifier(Box::new(RejectAt(ScreenState::TransferMenu)));
        let mut bridge = FakeBridge::new();
        let err = nav
            .navigate_to(&mut bridge, ScreenState::TransferFromScreen)
            .unwrap_err();
        assert_eq!(err.code(), "ERR_SCREEN_MISMATCH");
        assert_eq!(nav.current_state(), ScreenState::TransferMenu);
        assert_eq!(bridge.delivered().len(), 2);
    }

    #[test]
    fn verified_hops_report_verified() {
        let mut nav = navigator().with_verifier(Box::new(RejectAt(ScreenState::ReceiveScreen)));
        let mut bridge = FakeBridge::new();
        let transition = nav
            .navigate_to(&mut bridge, ScreenState::StockAddScreen)
            .expect("navigate");
        assert_eq!(transition.confirmation, Confirmation::Verified);
    }

    #[test]
    fn keypad_profile_navigates_with_keys() {
        let profile = find_profile(KEYPAD_PROFILE, &[]).unwrap().without_delays();
        let nav = Navigator::new(Arc::new(profile), "trace");
        let plan = nav
            .plan(ScreenState::MainMenu, ScreenState::TransferFromScreen)
            .expect("plan");
        let downs = plan
            .iter()
            .filter(|action| **action == InputAction::key("KEYCODE_DPAD_DOWN"))
            .count();
        assert_eq!(downs, 7);
        assert_eq!(plan.len(), 9);
        assert_eq!(plan.last(), Some(&InputAction::key("KEYCODE_ENTER")));
    }
}
