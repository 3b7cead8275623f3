//! Routes action messages to the stores of one tab.

use thiserror::Error;

use super::actions::{InterpreterMessage, TabAction};
use super::stores::{InterpretOutcome, StoreSet};
use crate::browser::TabId;

#[derive(Debug, Error)]
pub enum InterpretError {
    #[error("message for tab {message_tab} delivered to interpreter of tab {interpreter_tab}")]
    TabMismatch {
        interpreter_tab: TabId,
        message_tab: TabId,
    },

    #[error("invalid payload for {message_type}: {source}")]
    InvalidPayload {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug)]
pub struct Interpreter {
    tab_id: TabId,
    stores: StoreSet,
}

impl Interpreter {
    #[must_use]
    pub fn new(tab_id: TabId) -> Self {
        Self {
            tab_id,
            stores: StoreSet::new(),
        }
    }

    #[must_use]
    pub const fn tab_id(&self) -> TabId {
        self.tab_id
    }

    #[must_use]
    pub const fn stores(&self) -> &StoreSet {
        &self.stores
    }

    pub fn stores_mut(&mut self) -> &mut StoreSet {
        &mut self.stores
    }

    /// Decodes `message` and dispatches it synchronously to the owning store.
    pub fn interpret(
        &mut self,
        message: InterpreterMessage,
    ) -> Result<InterpretOutcome, InterpretError> {
        if message.tab_id != self.tab_id {
            return Err(InterpretError::TabMismatch {
                interpreter_tab: self.tab_id,
                message_tab: message.tab_id,
            });
        }
        let action = TabAction::decode(&message.message_type, message.payload).map_err(|source| {
            InterpretError::InvalidPayload {
                message_type: message.message_type.clone(),
                source,
            }
        })?;
        Ok(self.dispatch(action))
    }

    /// Dispatches an already-typed action.
    pub fn dispatch(&mut self, action: TabAction) -> InterpretOutcome {
        let message_type = action.message_type().to_string();
        let outcome = self.stores.dispatch(action);
        tracing::trace!(tab_id = self.tab_id, %message_type, ?outcome, "interpreted action");
        outcome
    }
}
