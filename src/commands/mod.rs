//! Browser keyboard commands.
//!
//! A command toggles one visualization on the active tab, but only after a
//! chain of guards passes: telemetry consent answered, an active tracked tab,
//! a scannable URL, no scan in flight, and a command bound to a visualization.
//! Any failed guard ends the command without touching tab state.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::Instrument as _;

use crate::browser::{BrowserAdapter, TabId};
use crate::logging;
use crate::tabs::TabContextRegistry;
use crate::tabs::actions::{TabAction, ToggleTelemetryData, VisualizationTogglePayload};
use crate::user_config::UserConfigurationStore;
use crate::visualization::{VisualizationConfigurationFactory, VisualizationType};

pub mod url_validator;

pub use url_validator::{UrlSupport, UrlValidator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Idle,
    AwaitingUrlCheck,
    Eligible,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Telemetry consent has not been answered yet.
    FirstRun,
    NoActiveTab,
    NoTabContext(TabId),
    FileUrlWithoutAccess,
    UnsupportedUrl,
    ScanInProgress(VisualizationType),
    UnmappedCommand(String),
    /// The toggle could not be encoded or interpreted.
    DispatchFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Dispatched {
        tab_id: TabId,
        test: VisualizationType,
        to_enabled: bool,
    },
    Rejected(RejectReason),
}

/// Turns browser commands into guarded visualization toggles.
pub struct CommandGuard {
    registry: Rc<RefCell<TabContextRegistry>>,
    browser: Rc<dyn BrowserAdapter>,
    user_config: Rc<RefCell<UserConfigurationStore>>,
    url_validator: UrlValidator,
    visualizations: VisualizationConfigurationFactory,
    state: Cell<GuardState>,
    usage: Cell<u64>,
}

impl fmt::Debug for CommandGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandGuard")
            .field("state", &self.state.get())
            .field("usage", &self.usage.get())
            .finish_non_exhaustive()
    }
}

impl CommandGuard {
    #[must_use]
    pub fn new(
        registry: Rc<RefCell<TabContextRegistry>>,
        browser: Rc<dyn BrowserAdapter>,
        user_config: Rc<RefCell<UserConfigurationStore>>,
    ) -> Self {
        Self {
            registry,
            browser,
            user_config,
            url_validator: UrlValidator,
            visualizations: VisualizationConfigurationFactory::new(),
            state: Cell::new(GuardState::Idle),
            usage: Cell::new(0),
        }
    }

    #[must_use]
    pub fn state(&self) -> GuardState {
        self.state.get()
    }

    /// Commands that got past the first-run gate.
    #[must_use]
    pub fn usage_count(&self) -> u64 {
        self.usage.get()
    }

    pub async fn on_command(&self, command_id: &str) -> CommandOutcome {
        let outcome = self
            .run(command_id)
            .instrument(logging::command_span(command_id))
            .await;
        match &outcome {
            CommandOutcome::Dispatched { .. } => tracing::debug!(?outcome, "command dispatched"),
            CommandOutcome::Rejected(reason) => tracing::debug!(?reason, "command rejected"),
        }
        self.state.set(GuardState::Idle);
        outcome
    }

    async fn run(&self, command_id: &str) -> CommandOutcome {
        if self.user_config.borrow().get_state().is_first_time {
            return self.reject(RejectReason::FirstRun);
        }
        self.usage.set(self.usage.get() + 1);
        self.state.set(GuardState::AwaitingUrlCheck);

        let Some(tab) = self.browser.active_tab().await else {
            return self.reject(RejectReason::NoActiveTab);
        };
        if !self.registry.borrow().contains(tab.id) {
            return self.reject(RejectReason::NoTabContext(tab.id));
        }

        match self.url_validator.check(&tab.url, self.browser.as_ref()).await {
            UrlSupport::Supported => {}
            UrlSupport::FileAccessDenied => {
                self.browser
                    .create_notification(url_validator::FILE_URL_DOES_NOT_HAVE_ACCESS);
                return self.reject(RejectReason::FileUrlWithoutAccess);
            }
            UrlSupport::Unsupported => {
                tracing::debug!(url = %logging::redact_url(&tab.url), "unscannable page");
                self.browser
                    .create_notification(&url_validator::url_not_scannable_message());
                return self.reject(RejectReason::UnsupportedUrl);
            }
        }
        self.state.set(GuardState::Eligible);

        // The tab may have closed while the URL check was pending.
        let visualization_state = match self.registry.borrow().get(tab.id) {
            Some(context) => context.stores().visualization().get_state(),
            None => return self.reject(RejectReason::NoTabContext(tab.id)),
        };
        if let Some(scanning) = visualization_state.scanning {
            return self.reject(RejectReason::ScanInProgress(scanning));
        }
        let Some(test) = self.visualizations.test_for_command(command_id) else {
            return self.reject(RejectReason::UnmappedCommand(command_id.to_string()));
        };

        let to_enabled = !visualization_state.is_enabled(test);
        let configuration = self.visualizations.configuration(test);
        if to_enabled && configuration.warns_on_enable() {
            if let Some(message) = configuration.enable_message {
                self.browser.create_notification(message);
            }
        }

        let action = TabAction::Toggle(VisualizationTogglePayload {
            test,
            enabled: to_enabled,
            telemetry: ToggleTelemetryData::by_shortcut(to_enabled),
        });
        let dispatched = action
            .into_message(tab.id)
            .map_err(|err| err.to_string())
            .and_then(|message| {
                self.registry
                    .borrow_mut()
                    .interpret(message)
                    .map_err(|err| err.to_string())
            });
        match dispatched {
            Ok(_) => CommandOutcome::Dispatched {
                tab_id: tab.id,
                test,
                to_enabled,
            },
            Err(error) => {
                tracing::warn!(tab_id = tab.id, %error, "toggle dispatch failed");
                self.reject(RejectReason::DispatchFailed)
            }
        }
    }

    fn reject(&self, reason: RejectReason) -> CommandOutcome {
        self.state.set(GuardState::Rejected);
        CommandOutcome::Rejected(reason)
    }
}
