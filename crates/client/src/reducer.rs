//! Pure state transition function
//!
//! Every inbound stream event is folded into the view state here:
//! `transition(state, event) -> (state, effects)`. No IO, no async, no
//! locking. Effects describe follow-up work for the session controller.

use dossier_protocol::{Message, MessageRole, Plan, Progress, SectionKey, ServerEvent};
use tracing::{debug, warn};

use crate::edit::EditTransaction;

// ---------------------------------------------------------------------------
// ViewState — everything the UI renders for the active session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    pub messages: Vec<Message>,
    pub progress: Option<Progress>,
    /// `None` until research has produced a plan
    pub plan: Option<Plan>,
    pub plan_visible: bool,
    /// A generation request is outstanding
    pub generating: bool,
    pub edit: EditTransaction,
    /// Concatenated deltas of the response currently streaming
    pub stream_buffer: String,
}

impl ViewState {
    /// Single flight: one generation or one edit at a time
    pub fn is_busy(&self) -> bool {
        self.generating || self.edit.is_submitting()
    }

    /// Record a locally sent user message and open a new generation
    pub fn begin_generation(&mut self, content: &str) {
        self.messages.push(Message::user(content));
        self.stream_buffer.clear();
        self.generating = true;
    }

    /// Content of the trailing assistant message, if the log ends with one
    pub fn trailing_assistant_text(&self) -> Option<&str> {
        self.messages
            .last()
            .filter(|m| m.role == MessageRole::Assistant)
            .map(|m| m.content.as_str())
    }
}

// ---------------------------------------------------------------------------
// Effects — describe IO to be executed by the caller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Cached session labels are stale (the backend learned a company name)
    RefreshSessions,
    /// A `done` closed the current generation
    GenerationFinished { final_text: Option<String> },
}

// ---------------------------------------------------------------------------
// transition() — the pure core
// ---------------------------------------------------------------------------

const DEFAULT_ERROR_TEXT: &str = "Something went wrong while processing your request.";

pub fn transition(mut state: ViewState, event: ServerEvent) -> (ViewState, Vec<Effect>) {
    let mut effects = Vec::new();

    match event {
        // -- Streaming text -----------------------------------------------------
        ServerEvent::Message { content } => {
            state.stream_buffer.push_str(&content);
            match state.messages.last_mut() {
                Some(last) if last.role == MessageRole::Assistant => {
                    last.content = state.stream_buffer.clone();
                }
                _ => state.messages.push(Message::assistant(content)),
            }
        }

        ServerEvent::Status { progress, message } => {
            state.progress = Some(Progress::clamped(progress, message));
        }

        ServerEvent::Conflicts {
            conflicts,
            recommendation,
        } => {
            let text = recommendation
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| "Conflicting information found during research.".to_string());
            state.messages.push(Message::conflicts(text, conflicts));
        }

        // -- Plan ---------------------------------------------------------------
        ServerEvent::PlanComplete { plan } => {
            let announcement = if plan.company_name.trim().is_empty() {
                "Account plan is ready.".to_string()
            } else {
                format!("Account plan for {} is ready.", plan.company_name)
            };
            state.plan = Some(plan);
            state.plan_visible = true;
            state.messages.push(Message::system(announcement));
            effects.push(Effect::RefreshSessions);
        }

        ServerEvent::Plan { plan } => {
            state.plan = Some(plan);
            state.plan_visible = true;
        }

        ServerEvent::SectionUpdated {
            section,
            updated_content,
            full_plan,
        } => {
            let key = section.parse::<SectionKey>();

            if let Some(plan) = full_plan {
                if state.plan.is_none() {
                    state.plan_visible = true;
                }
                state.plan = Some(plan);
            } else if let Some(content) = updated_content {
                match (&key, state.plan.as_mut()) {
                    (Ok(key), Some(plan)) => {
                        plan.replace_section(*key, content);
                    }
                    (Ok(key), None) => warn!(
                        component = "reducer",
                        event = "reducer.section_updated.no_plan",
                        section = %key,
                        "Section update arrived before any plan; ignored"
                    ),
                    (Err(err), _) => warn!(
                        component = "reducer",
                        event = "reducer.section_updated.unknown_section",
                        error = %err,
                        "Section update for unknown section; ignored"
                    ),
                }
            }

            if !state.edit.resolve_applied() {
                debug!(
                    component = "reducer",
                    event = "reducer.section_updated.unsolicited",
                    section = %section,
                    "Section update with no edit in flight"
                );
            }

            let label = match key {
                Ok(key) => key.title().to_string(),
                Err(_) => section,
            };
            state
                .messages
                .push(Message::system(format!("Updated the {label} section.")));
        }

        // -- Terminal events ----------------------------------------------------
        ServerEvent::Done => {
            state.progress = None;
            state.stream_buffer.clear();
            state.generating = false;
            if state.edit.resolve_error("Edit finished without a result") {
                warn!(
                    component = "reducer",
                    event = "reducer.done.edit_unresolved",
                    "Stream finished while an edit was still submitting"
                );
            }
            effects.push(Effect::GenerationFinished {
                final_text: state.trailing_assistant_text().map(str::to_string),
            });
        }

        ServerEvent::Error { message } => {
            let text = if message.trim().is_empty() {
                DEFAULT_ERROR_TEXT.to_string()
            } else {
                message
            };
            state.progress = None;
            state.generating = false;
            state.edit.resolve_error(text.clone());
            state.messages.push(Message::error(text));
        }

        // -- Informational ------------------------------------------------------
        ServerEvent::Intent { intent, confidence } => {
            debug!(
                component = "reducer",
                event = "reducer.intent",
                intent = %intent,
                confidence,
            );
        }

        ServerEvent::ResearchUpdate { section, .. } => {
            debug!(
                component = "reducer",
                event = "reducer.research_update",
                section = %section,
            );
        }

        ServerEvent::Unknown => {
            debug!(
                component = "reducer",
                event = "reducer.unknown_event",
                "Ignoring unrecognised event type"
            );
        }
    }

    (state, effects)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
