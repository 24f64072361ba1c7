//! Plan section edit transaction.
//!
//! One shared slot for the whole plan: beginning an edit on another section
//! silently retargets the slot. `idle → editing → submitting → applied|error`,
//! and the terminal states return to `idle` once acknowledged.

use dossier_protocol::{ClientFrame, SectionKey};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditPhase {
    #[default]
    Idle,
    Editing,
    Submitting,
    Applied,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("No section is being edited")]
    NotEditing,

    #[error("Edit instructions are empty")]
    EmptyInstructions,

    #[error("An edit is already being submitted")]
    AlreadySubmitting,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EditTransaction {
    section: Option<SectionKey>,
    instructions: String,
    phase: EditPhase,
    failure: Option<String>,
}

impl EditTransaction {
    pub fn phase(&self) -> EditPhase {
        self.phase
    }

    pub fn section(&self) -> Option<SectionKey> {
        self.section
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Error text of a failed transaction, until acknowledged
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn is_submitting(&self) -> bool {
        self.phase == EditPhase::Submitting
    }

    /// Open the slot on `section`. Replaces any edit that is not in flight.
    pub fn begin(&mut self, section: SectionKey) -> Result<(), EditError> {
        if self.is_submitting() {
            return Err(EditError::AlreadySubmitting);
        }
        *self = Self {
            section: Some(section),
            phase: EditPhase::Editing,
            ..Self::default()
        };
        Ok(())
    }

    pub fn set_instructions(&mut self, text: impl Into<String>) -> Result<(), EditError> {
        if self.phase != EditPhase::Editing {
            return Err(EditError::NotEditing);
        }
        self.instructions = text.into();
        Ok(())
    }

    /// Abandon an edit that has not been submitted
    pub fn cancel(&mut self) {
        if !self.is_submitting() {
            *self = Self::default();
        }
    }

    /// Move to `submitting` and build the outbound frame
    pub fn submit(&mut self) -> Result<ClientFrame, EditError> {
        match self.phase {
            EditPhase::Submitting => return Err(EditError::AlreadySubmitting),
            EditPhase::Editing => {}
            _ => return Err(EditError::NotEditing),
        }
        let section = self.section.ok_or(EditError::NotEditing)?;
        let instructions = self.instructions.trim();
        if instructions.is_empty() {
            return Err(EditError::EmptyInstructions);
        }

        let frame = ClientFrame::EditSection {
            section: section.as_str().to_string(),
            instructions: instructions.to_string(),
        };
        self.phase = EditPhase::Submitting;
        Ok(frame)
    }

    /// Returns false when nothing was in flight
    pub fn resolve_applied(&mut self) -> bool {
        if !self.is_submitting() {
            return false;
        }
        self.phase = EditPhase::Applied;
        true
    }

    /// Returns false when nothing was in flight
    pub fn resolve_error(&mut self, message: impl Into<String>) -> bool {
        if !self.is_submitting() {
            return false;
        }
        self.phase = EditPhase::Error;
        self.failure = Some(message.into());
        true
    }

    /// UI has seen the outcome; back to idle. No-op for non-terminal phases.
    pub fn acknowledge(&mut self) {
        if matches!(self.phase, EditPhase::Applied | EditPhase::Error) {
            *self = Self::default();
        }
    }
}
