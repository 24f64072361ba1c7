//! Terminal rendering: tables for lists and plans, incremental transcript output

use std::io::Write;

use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use console::style;
use dossier_client::ViewState;
use dossier_protocol::{Message, MessageRole, Plan, Progress, SessionSummary};

pub fn sessions_table(sessions: &[SessionSummary], active: Option<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["", "Session", "Company", "Messages", "Updated"]);

    for session in sessions {
        let marker = if Some(session.id.as_str()) == active {
            "*"
        } else {
            ""
        };
        table.add_row(vec![
            marker.to_string(),
            session.id.clone(),
            session.label.clone().unwrap_or_else(|| "New research".to_string()),
            session.message_count.to_string(),
            session.updated_at.clone().unwrap_or_default(),
        ]);
    }
    table
}

pub fn plan_table(plan: &Plan) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Section", "Content"]);

    for (key, value) in plan.sections() {
        if value.is_empty() {
            continue;
        }
        table.add_row(vec![key.title().to_string(), value.render_lines().join("\n")]);
    }
    if !plan.sources.is_empty() {
        table.add_row(vec!["Sources".to_string(), plan.sources.join("\n")]);
    }
    table
}

pub fn print_plan(plan: &Plan) {
    let title = if plan.company_name.is_empty() {
        "Account plan".to_string()
    } else {
        format!("Account plan: {}", plan.company_name)
    };
    println!("\n{}", style(title).bold().cyan());
    if let Some(focus) = &plan.research_focus {
        println!("{}", style(format!("Focus: {focus}")).dim());
    }
    println!("{}", plan_table(plan));
}

fn format_message(message: &Message) -> String {
    match message.role {
        MessageRole::User => format!("{} {}", style("you ›").bold().green(), message.content),
        MessageRole::Assistant => format!("{} {}", style("dossier ›").bold().cyan(), message.content),
        MessageRole::System => style(format!("· {}", message.content)).dim().to_string(),
        MessageRole::Error => style(format!("! {}", message.content)).red().to_string(),
    }
}

fn print_message(message: &Message) {
    println!("{}", format_message(message));
    for conflict in &message.conflicts {
        match &conflict.suggested_resolution {
            Some(resolution) => println!(
                "  {} {} ({})",
                style("conflict").yellow(),
                conflict.topic,
                resolution
            ),
            None => println!("  {} {}", style("conflict").yellow(), conflict.topic),
        }
    }
}

pub fn format_progress(progress: &Progress) -> String {
    style(format!("[{:>3}%] {}", progress.percent, progress.message))
        .dim()
        .to_string()
}

/// Prints only what changed in the transcript since the last call.
/// A streaming assistant message is written delta by delta on one line.
#[derive(Debug, Default)]
pub struct Transcript {
    committed: usize,
    partial: Option<usize>,
    last_progress: Option<Progress>,
    last_plan: Option<Plan>,
}

impl Transcript {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn update(&mut self, view: &ViewState) {
        let messages = &view.messages;
        if messages.len() < self.committed {
            self.reset();
        }

        while self.committed < messages.len() {
            let index = self.committed;
            let message = &messages[index];
            let streaming = index + 1 == messages.len()
                && message.role == MessageRole::Assistant
                && view.generating;

            match (self.partial, streaming) {
                (None, true) => {
                    print!("{}", format_message(message));
                    self.partial = Some(message.content.len());
                    break;
                }
                (Some(written), true) => {
                    print!("{}", message.content.get(written..).unwrap_or_default());
                    self.partial = Some(message.content.len());
                    break;
                }
                (Some(written), false) => {
                    println!("{}", message.content.get(written..).unwrap_or_default());
                    self.partial = None;
                }
                (None, false) => print_message(message),
            }
            self.committed += 1;
        }
        let _ = std::io::stdout().flush();

        if view.progress != self.last_progress {
            if let Some(progress) = &view.progress {
                if self.partial.is_none() {
                    println!("{}", format_progress(progress));
                }
            }
            self.last_progress = view.progress.clone();
        }

        if view.plan_visible && view.plan != self.last_plan {
            if let Some(plan) = &view.plan {
                if self.partial.is_none() {
                    print_plan(plan);
                    self.last_plan = Some(plan.clone());
                }
            }
        }
    }
}
