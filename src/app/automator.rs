use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::adb::link::DeviceBridge;
use crate::app::error::AutomationError;
use crate::app::models::{Batch, DeviceHandle, OperationKind, WorkItem};
use crate::app::navigator::{Navigator, ScreenVerifier, Transition};
use crate::app::profile::{DeviceProfile, OperationSettings, ScreenState, StepAction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded,
    Failed(String),
}

/// How one operation kind drives the app once its entry screen is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationPlan {
    pub kind: OperationKind,
    pub entry: ScreenState,
    /// Tap confirm after every Nth item (counted from the start of the batch).
    pub confirm_every: Option<u32>,
    pub extra_submit_prefixes: Vec<String>,
}

impl OperationPlan {
    pub fn for_kind(kind: OperationKind, settings: &OperationSettings) -> Self {
        match kind {
            OperationKind::Transfer => Self {
                kind,
                entry: ScreenState::TransferFromScreen,
                confirm_every: None,
                extra_submit_prefixes: Vec::new(),
            },
            OperationKind::StockAdd => Self {
                kind,
                entry: ScreenState::StockAddScreen,
                confirm_every: Some(settings.stock_add_confirm_every).filter(|every| *every > 0),
                extra_submit_prefixes: Vec::new(),
            },
            OperationKind::Receive => Self {
                kind,
                entry: ScreenState::ReceiveScreen,
                confirm_every: None,
                extra_submit_prefixes: settings
                    .receive_extra_submit_prefixes
                    .iter()
                    .map(|prefix| prefix.to_lowercase())
                    .collect(),
            },
            OperationKind::ChangeItemState => Self {
                kind,
                entry: ScreenState::ChangeItemStateScreen,
                confirm_every: Some(1),
                extra_submit_prefixes: Vec::new(),
            },
        }
    }
}

/// Drives one operation at a time on the device: navigate in, feed items, navigate out.
pub struct TransferAutomator<B: DeviceBridge> {
    bridge: B,
    navigator: Navigator,
    profile: Arc<DeviceProfile>,
    plan: Option<OperationPlan>,
    attempted: u32,
    trace_id: String,
}

impl<B: DeviceBridge> TransferAutomator<B> {
    pub fn new(bridge: B, profile: Arc<DeviceProfile>, trace_id: impl Into<String>) -> Self {
        let trace_id = trace_id.into();
        Self {
            navigator: Navigator::new(Arc::clone(&profile), trace_id.clone()),
            bridge,
            profile,
            plan: None,
            attempted: 0,
            trace_id,
        }
    }

    pub fn with_verifier(mut self, verifier: Box<dyn ScreenVerifier>) -> Self {
        self.navigator = self.navigator.with_verifier(verifier);
        self
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn require_online(&mut self) -> Result<DeviceHandle, AutomationError> {
        self.bridge.require_online()
    }

    /// Opens the entry screen for the batch's operation and, for transfers,
    /// fills in the two locations.
    pub fn begin(&mut self, batch: &Batch) -> Result<(), AutomationError> {
        match batch.operation {
            OperationKind::Transfer => {
                self.setup_locations(&batch.from_location, &batch.to_location)
            }
            kind => {
                let plan = OperationPlan::for_kind(kind, &self.profile.operations);
                self.navigate_to(plan.entry)?;
                self.start_plan(plan);
                Ok(())
            }
        }
    }

    /// Opens "Transfer from" and enters both locations; once per transfer batch.
    pub fn setup_locations(&mut self, from: &str, to: &str) -> Result<(), AutomationError> {
        let plan = OperationPlan::for_kind(OperationKind::Transfer, &self.profile.operations);
        self.navigate_to(plan.entry)?;
        for location in [from, to] {
            self.type_text(location)?;
            self.submit()?;
            self.pause(self.profile.timing.screen_transition_ms);
        }
        info!(trace_id = %self.trace_id, from = %from, to = %to, "transfer locations set");
        self.start_plan(plan);
        Ok(())
    }

    /// Processes one item. Connection loss and screen trouble come back as `Err`
    /// and end the batch; a single rejected command only fails this item.
    pub fn transfer_one(&mut self, item: &WorkItem) -> Result<ItemOutcome, AutomationError> {
        let plan = self
            .plan
            .clone()
            .ok_or_else(|| AutomationError::InvalidTransition {
                action: "process an item".to_string(),
                status: "no operation is set up".to_string(),
            })?;

        let result = self.process(&plan, item);
        self.attempted += 1;
        match result {
            Ok(()) => Ok(ItemOutcome::Succeeded),
            Err(err @ AutomationError::CommandFailed { .. }) => {
                warn!(trace_id = %self.trace_id, imei = %item.imei, error = %err, "item failed");
                Ok(ItemOutcome::Failed(err.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    /// Confirms items left over from the periodic confirm, e.g. the last item of
    /// an odd-length stock add batch. Call once after the last item.
    pub fn finish(&mut self) -> Result<(), AutomationError> {
        let Some(every) = self.plan.as_ref().and_then(|plan| plan.confirm_every) else {
            return Ok(());
        };
        if self.attempted % every == 0 {
            return Ok(());
        }
        let confirm = self.profile.confirm.clone();
        self.perform(&confirm, self.profile.timing.after_confirm_ms)?;
        self.attempted = 0;
        info!(trace_id = %self.trace_id, "pending items confirmed");
        Ok(())
    }

    /// Returns to the main menu and forgets the current operation.
    pub fn teardown(&mut self) -> Result<(), AutomationError> {
        self.plan = None;
        self.attempted = 0;
        self.navigate_to(ScreenState::MainMenu).map(|_| ())
    }

    fn start_plan(&mut self, plan: OperationPlan) {
        self.plan = Some(plan);
        self.attempted = 0;
    }

    fn navigate_to(&mut self, to: ScreenState) -> Result<Transition, AutomationError> {
        self.navigator.navigate_to(&mut self.bridge, to)
    }

    fn process(&mut self, plan: &OperationPlan, item: &WorkItem) -> Result<(), AutomationError> {
        let timing = self.profile.timing.clone();
        match plan.kind {
            OperationKind::Transfer | OperationKind::StockAdd => {
                self.type_text(&item.imei)?;
                self.submit()?;
                self.pause(timing.sync_ms);
            }
            OperationKind::Receive => {
                let lower = item.imei.to_lowercase();
                let needs_extra = self.attempted > 0
                    && plan
                        .extra_submit_prefixes
                        .iter()
                        .any(|prefix| lower.starts_with(prefix.as_str()));
                if needs_extra {
                    self.submit()?;
                }
                self.type_text(&item.imei)?;
                self.submit()?;
                self.pause(timing.sync_ms);
            }
            OperationKind::ChangeItemState => {
                let product_id = item.product_id.as_deref().ok_or_else(|| {
                    AutomationError::InvalidBatch(format!("{} has no product id", item.imei))
                })?;
                for value in [item.imei.as_str(), product_id] {
                    self.type_text(value)?;
                    self.submit()?;
                    self.pause(timing.screen_transition_ms);
                }
            }
        }

        if let Some(every) = plan.confirm_every {
            if (self.attempted + 1) % every == 0 {
                let confirm = self.profile.confirm.clone();
                self.perform(&confirm, timing.after_confirm_ms)?;
            }
        }
        Ok(())
    }

    fn type_text(&mut self, value: &str) -> Result<(), AutomationError> {
        self.bridge.send_text(value)?;
        self.pause(self.profile.timing.after_type_ms);
        Ok(())
    }

    fn submit(&mut self) -> Result<(), AutomationError> {
        let submit = self.profile.submit.clone();
        self.perform(&submit, self.profile.timing.after_tap_ms)
    }

    fn perform(&mut self, step: &StepAction, settle_ms: u64) -> Result<(), AutomationError> {
        let action = self.profile.resolve(step)?;
        self.bridge.apply(&action)?;
        self.pause(settle_ms);
        Ok(())
    }

    fn pause(&self, millis: u64) {
        if millis > 0 {
            thread::sleep(Duration::from_millis(millis));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::adb::input::InputAction;
    use crate::app::testing::{fast_profile, FakeBridge};

    const ENTER: InputAction = InputAction::Tap { x: 390, y: 950 };
    const CONFIRM: InputAction = InputAction::Tap { x: 1310, y: 580 };

    fn automator(bridge: &FakeBridge) -> TransferAutomator<FakeBridge> {
        TransferAutomator::new(bridge.clone(), Arc::new(fast_profile()), "trace")
    }

    #[test]
    fn transfer_setup_types_both_locations_once() {
        let bridge = FakeBridge::new();
        let mut automator = automator(&bridge);
        let batch = Batch::transfer("Shelf A", "Bin 7", ["111", "222"]).unwrap();
        automator.begin(&batch).expect("begin");
        for item in &batch.items {
            assert_eq!(automator.transfer_one(item).unwrap(), ItemOutcome::Succeeded);
        }
        automator.teardown().expect("teardown");

        assert_eq!(bridge.texts(), vec!["Shelf A", "Bin 7", "111", "222"]);
        assert_eq!(bridge.count(&ENTER), 4);
        assert_eq!(
            automator.navigator().current_state(),
            ScreenState::MainMenu
        );
        let delivered = bridge.delivered();
        assert_eq!(
            &delivered[delivered.len() - 2..],
            &[InputAction::tap(660, 950), InputAction::tap(400, 185)]
        );
    }

    #[test]
    fn items_need_a_prepared_operation() {
        let bridge = FakeBridge::new();
        let mut automator = automator(&bridge);
        let err = automator
            .transfer_one(&WorkItem::transfer("A", "B", "111"))
            .unwrap_err();
        assert_eq!(err.code(), "ERR_INVALID_TRANSITION");
        assert!(bridge.attempted().is_empty());
    }

    #[test]
    fn rejected_command_fails_only_that_item() {
        let bridge = FakeBridge::new();
        bridge.fail_text("222");
        let mut automator = automator(&bridge);
        let batch = Batch::transfer("A", "B", ["111", "222", "333"]).unwrap();
        automator.begin(&batch).unwrap();

        let outcomes = batch
            .items
            .iter()
            .map(|item| automator.transfer_one(item).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(outcomes[0], ItemOutcome::Succeeded);
        assert!(matches!(&outcomes[1], ItemOutcome::Failed(reason) if reason.contains("injected")));
        assert_eq!(outcomes[2], ItemOutcome::Succeeded);
    }

    #[test]
    fn connection_loss_is_returned_as_error() {
        let bridge = FakeBridge::new();
        bridge.go_offline_on_text("222");
        let mut automator = automator(&bridge);
        let batch = Batch::transfer("A", "B", ["111", "222"]).unwrap();
        automator.begin(&batch).unwrap();
        automator.transfer_one(&batch.items[0]).unwrap();
        let err = automator.transfer_one(&batch.items[1]).unwrap_err();
        assert!(err.is_connection_loss());
    }

    #[test]
    fn stock_add_confirms_every_second_item() {
        let bridge = FakeBridge::new();
        let mut automator = automator(&bridge);
        let batch =
            Batch::identifiers(OperationKind::StockAdd, ["1", "2", "3", "4", "5"]).unwrap();
        automator.begin(&batch).unwrap();
        for item in &batch.items {
            automator.transfer_one(item).unwrap();
        }
        assert_eq!(bridge.count(&CONFIRM), 2);
        automator.finish().unwrap();
        assert_eq!(bridge.count(&CONFIRM), 3);
        automator.finish().unwrap();
        assert_eq!(bridge.count(&CONFIRM), 3);
        // Stock change menu, then its first entry.
        assert_eq!(&bridge.delivered()[..2], &[InputAction::tap(400, 470), InputAction::tap(400, 185)]);
    }

    #[test]
    fn finish_skips_the_confirm_when_nothing_is_pending() {
        let bridge = FakeBridge::new();
        let mut automator = automator(&bridge);
        let batch = Batch::identifiers(OperationKind::StockAdd, ["1", "2"]).unwrap();
        automator.begin(&batch).unwrap();
        for item in &batch.items {
            automator.transfer_one(item).unwrap();
        }
        automator.finish().unwrap();
        assert_eq!(bridge.count(&CONFIRM), 1);

        let transfer = Batch::transfer("A", "B", ["111"]).unwrap();
        automator.begin(&transfer).unwrap();
        automator.transfer_one(&transfer.items[0]).unwrap();
        automator.finish().unwrap();
        assert_eq!(bridge.count(&CONFIRM), 1);
    }

    #[test]
    fn receive_adds_a_submit_before_ipads_after_the_first_item() {
        let bridge = FakeBridge::new();
        let mut automator = automator(&bridge);
        let batch =
            Batch::identifiers(OperationKind::Receive, ["IPAD-1", "phone-2", "iPad-3"]).unwrap();
        automator.begin(&batch).unwrap();
        for item in &batch.items {
            automator.transfer_one(item).unwrap();
        }
        // Three normal submits plus one extra for the third item.
        assert_eq!(bridge.count(&ENTER), 4);
        let delivered = bridge.delivered();
        let third = delivered
            .iter()
            .position(|action| *action == InputAction::text("iPad-3"))
            .unwrap();
        assert_eq!(delivered[third - 1], ENTER);
        assert_eq!(delivered[third - 2], ENTER);
    }

    #[test]
    fn change_item_state_enters_pairs_and_confirms_each() {
        let bridge = FakeBridge::new();
        let mut automator = automator(&bridge);
        let batch = Batch::change_item_state(vec![
            ("111".to_string(), "P-1".to_string()),
            ("222".to_string(), "P-2".to_string()),
        ])
        .unwrap();
        automator.begin(&batch).unwrap();
        for item in &batch.items {
            assert_eq!(automator.transfer_one(item).unwrap(), ItemOutcome::Succeeded);
        }
        assert_eq!(bridge.texts(), vec!["111", "P-1", "222", "P-2"]);
        assert_eq!(bridge.count(&CONFIRM), 2);
        assert_eq!(bridge.count(&ENTER), 4);
    }
}
