//! Ad hoc visualizations and their browser command bindings.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VisualizationType {
    Issues,
    Landmarks,
    Headings,
    TabStops,
    Color,
}

impl VisualizationType {
    pub const ALL: [Self; 5] = [
        Self::Issues,
        Self::Landmarks,
        Self::Headings,
        Self::TabStops,
        Self::Color,
    ];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Issues => "issues",
            Self::Landmarks => "landmarks",
            Self::Headings => "headings",
            Self::TabStops => "tabStops",
            Self::Color => "color",
        }
    }
}

impl fmt::Display for VisualizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualizationConfiguration {
    pub test: VisualizationType,
    /// Browser keyboard command bound to this visualization, if any.
    pub command: Option<&'static str>,
    /// Shown when the visualization is switched on from a keyboard command.
    pub enable_message: Option<&'static str>,
    pub notify_on_enable: bool,
}

impl VisualizationConfiguration {
    #[must_use]
    pub const fn warns_on_enable(&self) -> bool {
        self.notify_on_enable && self.enable_message.is_some()
    }
}

static CONFIGURATIONS: [VisualizationConfiguration; 5] = [
    VisualizationConfiguration {
        test: VisualizationType::Issues,
        command: Some("01_toggle-issues"),
        enable_message: Some("Running automated checks..."),
        notify_on_enable: true,
    },
    VisualizationConfiguration {
        test: VisualizationType::Landmarks,
        command: Some("02_toggle-landmarks"),
        enable_message: Some("Finding landmarks..."),
        notify_on_enable: true,
    },
    VisualizationConfiguration {
        test: VisualizationType::Headings,
        command: Some("03_toggle-headings"),
        enable_message: Some("Finding headings..."),
        notify_on_enable: true,
    },
    VisualizationConfiguration {
        test: VisualizationType::TabStops,
        command: Some("04_toggle-tabStops"),
        enable_message: Some("Start pressing Tab to start visualizing tab stops."),
        notify_on_enable: false,
    },
    VisualizationConfiguration {
        test: VisualizationType::Color,
        command: Some("05_toggle-color"),
        enable_message: Some("Showing color..."),
        notify_on_enable: true,
    },
];

/// Lookup tables over the fixed visualization catalogue.
#[derive(Debug, Clone)]
pub struct VisualizationConfigurationFactory {
    command_to_test: HashMap<&'static str, VisualizationType>,
}

impl Default for VisualizationConfigurationFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl VisualizationConfigurationFactory {
    #[must_use]
    pub fn new() -> Self {
        let command_to_test = CONFIGURATIONS
            .iter()
            .filter_map(|config| config.command.map(|command| (command, config.test)))
            .collect();
        Self { command_to_test }
    }

    #[must_use]
    pub fn configuration(&self, test: VisualizationType) -> &'static VisualizationConfiguration {
        // Declared in enum order.
        &CONFIGURATIONS[test as usize]
    }

    #[must_use]
    pub fn test_for_command(&self, command_id: &str) -> Option<VisualizationType> {
        self.command_to_test.get(command_id).copied()
    }

    #[must_use]
    pub fn command_map(&self) -> &HashMap<&'static str, VisualizationType> {
        &self.command_to_test
    }
}
