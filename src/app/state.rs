use std::sync::Arc;

use tracing::{info, warn};

use crate::app::adb::link::{AdbDeviceLink, DeviceBridge};
use crate::app::automator::TransferAutomator;
use crate::app::config::{AppConfig, AUTO_PROFILE};
use crate::app::controller::BatchController;
use crate::app::error::AutomationError;
use crate::app::profile::DeviceProfile;

/// One live automation session: the resolved profile and the controller that
/// owns the device link.
pub struct AppState<B: DeviceBridge + 'static = AdbDeviceLink> {
    pub config: AppConfig,
    pub profile: Arc<DeviceProfile>,
    pub controller: BatchController<B>,
}

impl AppState<AdbDeviceLink> {
    /// Locates adb and picks the profile. In `auto` mode the device's screen
    /// size decides; an unreachable device falls back to the default profile.
    pub fn connect(config: AppConfig, trace_id: &str) -> Result<Self, AutomationError> {
        let mut link = AdbDeviceLink::locate(
            &config.adb.command_path,
            config.adb.preferred_serial(),
            config.adb.input_timeout(),
            trace_id,
        )?;

        let screen_size = if config.automation.profile.eq_ignore_ascii_case(AUTO_PROFILE) {
            match link.require_online().and_then(|_| link.screen_size()) {
                Ok(size) => size,
                Err(err) => {
                    warn!(trace_id = %trace_id, error = %err, "screen size unknown, using default profile");
                    None
                }
            }
        } else {
            None
        };

        let profile = config.resolve_profile(screen_size)?;
        info!(
            trace_id = %trace_id,
            profile = %profile.name,
            screen = ?screen_size,
            "automation profile selected"
        );
        Ok(Self::with_bridge(config, profile, link, trace_id))
    }
}

impl<B: DeviceBridge + 'static> AppState<B> {
    pub fn with_bridge(config: AppConfig, profile: DeviceProfile, bridge: B, trace_id: &str) -> Self {
        let profile = Arc::new(profile);
        let automator = TransferAutomator::new(bridge, Arc::clone(&profile), trace_id);
        Self {
            config,
            profile,
            controller: BatchController::new(automator, trace_id),
        }
    }
}
