//! Per-tab action catalogue.
//!
//! Actions travel as `{ tabId, type, payload }` messages. [`TabAction::decode`]
//! turns the string type into a closed sum type; types outside the catalogue
//! decode to [`TabAction::Unknown`] and are ignored by the interpreter.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::browser::{Tab, TabId};
use crate::visualization::VisualizationType;

pub mod message_types {
    pub const VISUALIZATION_TOGGLE: &str = "insights/visualization/toggle";
    pub const SCAN_COMPLETED: &str = "insights/visualization/scanCompleted";
    pub const SCAN_FAILED: &str = "insights/visualization/scanFailed";
    pub const SCROLL_REQUESTED: &str = "insights/visualization/scrollRequested";
    pub const UPDATE_FOCUSED_INSTANCE: &str =
        "insights/visualization/issues/targets/focused/update";
    pub const INJECTION_STARTED: &str = "insights/visualization/state/InjectionStarted";
    pub const INJECTION_COMPLETED: &str = "insights/visualization/state/injectionCompleted";
    pub const INJECTION_FAILED: &str = "insights/visualization/state/injectionFailed";
    pub const TAB_UPDATE: &str = "insights/tab/update";
    pub const TAB_CHANGE: &str = "insights/tab/change";
    pub const TAB_REMOVE: &str = "insights/tab/remove";
    pub const TAB_VISIBILITY_CHANGE: &str = "insights/tab/visibilitychange";
}

/// Wire form of one action addressed to one tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpreterMessage {
    pub tab_id: TabId,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggeredBy {
    #[serde(rename = "shortcut")]
    Shortcut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TelemetryEventSource {
    ShortcutCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleTelemetryData {
    pub triggered_by: TriggeredBy,
    pub enabled: bool,
    pub source: TelemetryEventSource,
}

impl ToggleTelemetryData {
    /// Telemetry for a toggle issued from a browser keyboard command.
    #[must_use]
    pub const fn by_shortcut(enabled: bool) -> Self {
        Self {
            triggered_by: TriggeredBy::Shortcut,
            enabled,
            source: TelemetryEventSource::ShortcutCommand,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualizationTogglePayload {
    pub test: VisualizationType,
    pub enabled: bool,
    pub telemetry: ToggleTelemetryData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusedInstancePayload {
    /// Selector path, outermost frame first.
    pub target: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageVisibilityChangePayload {
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabAction {
    Toggle(VisualizationTogglePayload),
    ScanCompleted,
    ScanFailed,
    ScrollRequested,
    UpdateFocusedInstance(FocusedInstancePayload),
    InjectionStarted,
    InjectionCompleted,
    InjectionFailed,
    /// A tab seen for the first time.
    TabUpdate(Tab),
    /// A tracked tab navigated or changed its url.
    TabChange(Tab),
    TabRemove,
    VisibilityChange(PageVisibilityChangePayload),
    /// Action type outside the catalogue; dispatching it changes nothing.
    Unknown(String),
}

impl TabAction {
    /// Decodes a wire type and payload. Payload-less actions ignore `payload`.
    pub fn decode(message_type: &str, payload: Value) -> Result<Self, serde_json::Error> {
        use message_types as t;

        Ok(match message_type {
            t::VISUALIZATION_TOGGLE => Self::Toggle(serde_json::from_value(payload)?),
            t::SCAN_COMPLETED => Self::ScanCompleted,
            t::SCAN_FAILED => Self::ScanFailed,
            t::SCROLL_REQUESTED => Self::ScrollRequested,
            t::UPDATE_FOCUSED_INSTANCE => {
                Self::UpdateFocusedInstance(serde_json::from_value(payload)?)
            }
            t::INJECTION_STARTED => Self::InjectionStarted,
            t::INJECTION_COMPLETED => Self::InjectionCompleted,
            t::INJECTION_FAILED => Self::InjectionFailed,
            t::TAB_UPDATE => Self::TabUpdate(serde_json::from_value(payload)?),
            t::TAB_CHANGE => Self::TabChange(serde_json::from_value(payload)?),
            t::TAB_REMOVE => Self::TabRemove,
            t::TAB_VISIBILITY_CHANGE => Self::VisibilityChange(serde_json::from_value(payload)?),
            other => Self::Unknown(other.to_string()),
        })
    }

    #[must_use]
    pub fn message_type(&self) -> &str {
        use message_types as t;

        match self {
            Self::Toggle(_) => t::VISUALIZATION_TOGGLE,
            Self::ScanCompleted => t::SCAN_COMPLETED,
            Self::ScanFailed => t::SCAN_FAILED,
            Self::ScrollRequested => t::SCROLL_REQUESTED,
            Self::UpdateFocusedInstance(_) => t::UPDATE_FOCUSED_INSTANCE,
            Self::InjectionStarted => t::INJECTION_STARTED,
            Self::InjectionCompleted => t::INJECTION_COMPLETED,
            Self::InjectionFailed => t::INJECTION_FAILED,
            Self::TabUpdate(_) => t::TAB_UPDATE,
            Self::TabChange(_) => t::TAB_CHANGE,
            Self::TabRemove => t::TAB_REMOVE,
            Self::VisibilityChange(_) => t::TAB_VISIBILITY_CHANGE,
            Self::Unknown(message_type) => message_type,
        }
    }

    /// Encodes the action as a message for `tab_id`.
    pub fn into_message(self, tab_id: TabId) -> Result<InterpreterMessage, serde_json::Error> {
        let message_type = self.message_type().to_string();
        let payload = match self {
            Self::Toggle(payload) => serde_json::to_value(payload)?,
            Self::UpdateFocusedInstance(payload) => serde_json::to_value(payload)?,
            Self::TabUpdate(tab) | Self::TabChange(tab) => serde_json::to_value(tab)?,
            Self::VisibilityChange(payload) => serde_json::to_value(payload)?,
            Self::ScanCompleted
            | Self::ScanFailed
            | Self::ScrollRequested
            | Self::InjectionStarted
            | Self::InjectionCompleted
            | Self::InjectionFailed
            | Self::TabRemove
            | Self::Unknown(_) => Value::Null,
        };
        Ok(InterpreterMessage {
            tab_id,
            message_type,
            payload,
        })
    }
}
