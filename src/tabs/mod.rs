//! Per-tab contexts.
//!
//! Every tracked browser tab owns one [`TabContext`]: an [`Interpreter`] and
//! the [`StoreSet`] behind it. Contexts never share state, so an action
//! interpreted for one tab cannot affect another.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::browser::TabId;

pub mod actions;
pub mod controller;
pub mod interpreter;
pub mod stores;

pub use actions::{InterpreterMessage, TabAction};
pub use controller::TabController;
pub use interpreter::{InterpretError, Interpreter};
pub use stores::{InterpretOutcome, StoreSet};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tab {0} is not tracked")]
    NotTracked(TabId),

    #[error(transparent)]
    Interpret(#[from] InterpretError),
}

#[derive(Debug)]
pub struct TabContext {
    interpreter: Interpreter,
}

impl TabContext {
    #[must_use]
    pub fn new(tab_id: TabId) -> Self {
        Self {
            interpreter: Interpreter::new(tab_id),
        }
    }

    #[must_use]
    pub const fn tab_id(&self) -> TabId {
        self.interpreter.tab_id()
    }

    #[must_use]
    pub const fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    pub fn interpreter_mut(&mut self) -> &mut Interpreter {
        &mut self.interpreter
    }

    #[must_use]
    pub const fn stores(&self) -> &StoreSet {
        self.interpreter.stores()
    }

    pub fn stores_mut(&mut self) -> &mut StoreSet {
        self.interpreter.stores_mut()
    }
}

/// Tab id to context map. One context per live tracked tab.
#[derive(Debug, Default)]
pub struct TabContextRegistry {
    contexts: BTreeMap<TabId, TabContext>,
}

impl TabContextRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fresh context for `tab_id`, or returns the existing one.
    pub fn register(&mut self, tab_id: TabId) -> &mut TabContext {
        self.contexts.entry(tab_id).or_insert_with(|| {
            tracing::debug!(tab_id, "registered tab context");
            TabContext::new(tab_id)
        })
    }

    /// Removes the context for `tab_id`, dropping its interpreter and stores.
    pub fn unregister(&mut self, tab_id: TabId) -> Result<TabContext, RegistryError> {
        let context = self
            .contexts
            .remove(&tab_id)
            .ok_or(RegistryError::NotTracked(tab_id))?;
        tracing::debug!(tab_id, "unregistered tab context");
        Ok(context)
    }

    #[must_use]
    pub fn get(&self, tab_id: TabId) -> Option<&TabContext> {
        self.contexts.get(&tab_id)
    }

    pub fn get_mut(&mut self, tab_id: TabId) -> Option<&mut TabContext> {
        self.contexts.get_mut(&tab_id)
    }

    #[must_use]
    pub fn contains(&self, tab_id: TabId) -> bool {
        self.contexts.contains_key(&tab_id)
    }

    /// Routes `message` to the interpreter of the tab it names.
    pub fn interpret(
        &mut self,
        message: InterpreterMessage,
    ) -> Result<InterpretOutcome, RegistryError> {
        let tab_id = message.tab_id;
        let context = self
            .contexts
            .get_mut(&tab_id)
            .ok_or(RegistryError::NotTracked(tab_id))?;
        Ok(context.interpreter_mut().interpret(message)?)
    }

    #[must_use]
    pub fn tab_ids(&self) -> Vec<TabId> {
        self.contexts.keys().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabs::actions::{ToggleTelemetryData, VisualizationTogglePayload};
    use crate::visualization::VisualizationType;

    fn enable(tab_id: TabId, test: VisualizationType) -> InterpreterMessage {
        TabAction::Toggle(VisualizationTogglePayload {
            test,
            enabled: true,
            telemetry: ToggleTelemetryData::by_shortcut(true),
        })
        .into_message(tab_id)
        .expect("encode toggle")
    }

    #[test]
    fn register_is_idempotent() {
        let mut registry = TabContextRegistry::new();
        registry.register(1);
        registry
            .interpret(enable(1, VisualizationType::Issues))
            .expect("tracked tab");
        let context = registry.register(1);
        assert!(
            context
                .stores()
                .visualization()
                .get_state()
                .is_enabled(VisualizationType::Issues),
            "re-registering must keep existing state"
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn tabs_are_isolated() {
        let mut registry = TabContextRegistry::new();
        registry.register(1);
        registry.register(2);
        registry
            .interpret(enable(1, VisualizationType::Headings))
            .expect("tracked tab");

        let other = registry.get(2).expect("tab 2").stores().visualization().get_state();
        assert_eq!(other.scanning, None);
        assert!(!other.is_enabled(VisualizationType::Headings));
        assert_eq!(registry.tab_ids(), vec![1, 2]);
    }

    #[test]
    fn unregister_and_untracked_errors() {
        let mut registry = TabContextRegistry::new();
        registry.register(7);
        let context = registry.unregister(7).expect("tracked");
        assert_eq!(context.tab_id(), 7);
        assert!(registry.is_empty());
        assert!(matches!(registry.unregister(7), Err(RegistryError::NotTracked(7))));
        assert!(matches!(
            registry.interpret(enable(7, VisualizationType::Color)),
            Err(RegistryError::NotTracked(7))
        ));
    }
}
