//! Server → Client stream events

use serde::{Deserialize, Serialize};

use crate::plan::{Plan, SectionValue};
use crate::types::ConflictRecord;

/// Events pushed by the backend agent over the session stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Incremental text of the assistant response
    Message { content: String },

    Status {
        #[serde(default, alias = "percent")]
        progress: i64,
        #[serde(default)]
        message: String,
    },

    Conflicts {
        #[serde(default)]
        conflicts: Vec<ConflictRecord>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recommendation: Option<String>,
    },

    PlanComplete { plan: Plan },

    SectionUpdated {
        section: String,
        #[serde(default, alias = "content", skip_serializing_if = "Option::is_none")]
        updated_content: Option<SectionValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        full_plan: Option<Plan>,
    },

    /// Reply to `get_plan`
    Plan { plan: Plan },

    Done,

    Error {
        #[serde(default, alias = "error")]
        message: String,
    },

    // Informational
    Intent {
        #[serde(default)]
        intent: String,
        #[serde(default)]
        confidence: f64,
    },
    ResearchUpdate {
        #[serde(default)]
        section: String,
        #[serde(default)]
        preview: String,
    },

    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Wire name of the event, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Message { .. } => "message",
            ServerEvent::Status { .. } => "status",
            ServerEvent::Conflicts { .. } => "conflicts",
            ServerEvent::PlanComplete { .. } => "plan_complete",
            ServerEvent::SectionUpdated { .. } => "section_updated",
            ServerEvent::Plan { .. } => "plan",
            ServerEvent::Done => "done",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Intent { .. } => "intent",
            ServerEvent::ResearchUpdate { .. } => "research_update",
            ServerEvent::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ServerEvent;
    use crate::plan::{SectionKey, SectionValue};

    fn parse(json: &str) -> ServerEvent {
        serde_json::from_str(json).expect("parse server event")
    }

    #[test]
    fn deserializes_status_with_progress_field() {
        match parse(r#"{"type":"status","message":"Searching news","progress":40}"#) {
            ServerEvent::Status { progress, message } => {
                assert_eq!(progress, 40);
                assert_eq!(message, "Searching news");
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn deserializes_status_with_percent_alias() {
        match parse(r#"{"type":"status","percent":12,"message":"Planning"}"#) {
            ServerEvent::Status { progress, .. } => assert_eq!(progress, 12),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn deserializes_section_updated_from_edit_reply() {
        let event = parse(
            r#"{
              "type":"section_updated",
              "success":true,
              "section":"leadership",
              "updated_content":{"executives":[{"name":"Jane Doe","title":"CTO"}]}
            }"#,
        );
        match event {
            ServerEvent::SectionUpdated {
                section,
                updated_content,
                full_plan,
            } => {
                assert_eq!(section.parse::<SectionKey>(), Ok(SectionKey::Leadership));
                let content = updated_content.expect("updated content");
                assert!(content.get("executives").is_some());
                assert!(full_plan.is_none());
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn section_updated_accepts_content_alias_and_full_plan() {
        let event = parse(
            r#"{
              "type":"section_updated",
              "section":"news",
              "content":"Quiet quarter",
              "full_plan":{"company_name":"Stripe"}
            }"#,
        );
        match event {
            ServerEvent::SectionUpdated {
                updated_content,
                full_plan,
                ..
            } => {
                assert_eq!(updated_content, Some(SectionValue::text("Quiet quarter")));
                assert_eq!(full_plan.map(|p| p.company_name).as_deref(), Some("Stripe"));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn error_accepts_error_key_from_edit_failures() {
        match parse(r#"{"type":"error","error":"No plan exists to edit"}"#) {
            ServerEvent::Error { message } => assert_eq!(message, "No plan exists to edit"),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn conflicts_carry_recommendation() {
        let event = parse(
            r#"{"type":"conflicts","conflicts":["Revenue mismatch"],"recommendation":"Verify with filings"}"#,
        );
        match event {
            ServerEvent::Conflicts {
                conflicts,
                recommendation,
            } => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].topic, "Revenue mismatch");
                assert_eq!(recommendation.as_deref(), Some("Verify with filings"));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn conflicts_frame_survives_record_without_topic() {
        let event = parse(
            r#"{"type":"conflicts","conflicts":[{"source_1":"a","source_2":"b","severity":"medium","suggested_resolution":"x"}]}"#,
        );
        match event {
            ServerEvent::Conflicts { conflicts, .. } => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].topic, "a vs b");
                assert_eq!(conflicts[0].suggested_resolution.as_deref(), Some("x"));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn done_and_unknown_types() {
        assert_eq!(parse(r#"{"type":"done"}"#), ServerEvent::Done);
        assert_eq!(
            parse(r#"{"type":"complete","company":"Stripe","conflicts_found":false}"#),
            ServerEvent::Unknown
        );
    }
}
