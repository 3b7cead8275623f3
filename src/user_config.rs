//! Global (not per-tab) user configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserConfigurationData {
    /// True until the user has answered the telemetry consent prompt.
    pub is_first_time: bool,
    pub enable_telemetry: bool,
}

impl Default for UserConfigurationData {
    fn default() -> Self {
        Self {
            is_first_time: true,
            enable_telemetry: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct UserConfigurationStore {
    state: UserConfigurationData,
}

impl UserConfigurationStore {
    #[must_use]
    pub const fn new(state: UserConfigurationData) -> Self {
        Self { state }
    }

    #[must_use]
    pub fn get_state(&self) -> UserConfigurationData {
        self.state.clone()
    }

    /// Records the consent answer; the first-run gate opens either way.
    pub fn set_telemetry_state(&mut self, enabled: bool) {
        self.state.enable_telemetry = enabled;
        self.state.is_first_time = false;
        tracing::info!(enabled, "telemetry consent recorded");
    }
}
