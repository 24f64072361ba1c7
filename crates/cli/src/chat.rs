//! Interactive chat session

use std::sync::Arc;

use console::style;
use dossier_client::{
    ClientConfig, ClientError, ControllerEvent, EditPhase, HttpResources, SessionController,
    VoiceState, WsConnector,
};
use dossier_protocol::SectionKey;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use crate::render::{print_plan, sessions_table, Transcript};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Send(String),
    Sessions,
    New,
    Switch(String),
    Delete(String),
    Edit {
        section: SectionKey,
        instructions: String,
    },
    Plan,
    Voice,
    Help,
    Quit,
}

const HELP: &str = "\
/sessions                 list sessions
/new                      start a new research session
/switch <id>              switch to another session
/delete <id>              delete a session
/edit <section> <text>    rewrite one plan section
/plan                     show the current plan
/voice                    toggle dictation
/quit                     exit";

pub fn parse_command(line: &str) -> Result<ChatCommand, String> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(ChatCommand::Send(line.to_string()));
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    match name {
        "sessions" | "ls" => Ok(ChatCommand::Sessions),
        "new" => Ok(ChatCommand::New),
        "switch" if !args.is_empty() => Ok(ChatCommand::Switch(args.to_string())),
        "delete" | "rm" if !args.is_empty() => Ok(ChatCommand::Delete(args.to_string())),
        "edit" => {
            let (section, instructions) = args
                .split_once(char::is_whitespace)
                .ok_or_else(|| "usage: /edit <section> <instructions>".to_string())?;
            let section = section.parse::<SectionKey>().map_err(|e| e.to_string())?;
            Ok(ChatCommand::Edit {
                section,
                instructions: instructions.trim().to_string(),
            })
        }
        "plan" => Ok(ChatCommand::Plan),
        "voice" | "mic" => Ok(ChatCommand::Voice),
        "help" | "?" => Ok(ChatCommand::Help),
        "quit" | "exit" | "q" => Ok(ChatCommand::Quit),
        "switch" | "delete" | "rm" => Err(format!("usage: /{name} <session id>")),
        other => Err(format!("unknown command: /{other}")),
    }
}

type Controller = SessionController<WsConnector, HttpResources>;

pub async fn run(config: ClientConfig, preferred: Option<String>) -> anyhow::Result<()> {
    let resources = Arc::new(HttpResources::new(&config)?);
    let connector = WsConnector::new(config.ws_base()?, config.reconnect_delay);
    let mut controller =
        SessionController::new(connector, resources).with_speak_responses(config.speak_responses);

    let session_id = controller.start(preferred.as_deref()).await;
    println!(
        "{} {}  {}",
        style("Dossier").bold(),
        style(format!("session {session_id}")).dim(),
        style("type /help for commands").dim()
    );

    let (lines_tx, mut lines_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if lines_tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut transcript = Transcript::default();
    loop {
        tokio::select! {
            event = controller.next_event() => {
                let Some(event) = event else { break };
                let rehydrated = matches!(event, ControllerEvent::HistoryLoaded { .. });
                controller.handle(event);
                if rehydrated {
                    transcript.reset();
                }
            }
            line = lines_rx.recv() => {
                let Some(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(ChatCommand::Quit) => break,
                    Ok(command) => {
                        let switched = matches!(
                            command,
                            ChatCommand::New | ChatCommand::Switch(_) | ChatCommand::Delete(_)
                        );
                        execute(&mut controller, command).await;
                        if switched {
                            transcript.reset();
                        }
                    }
                    Err(usage) => println!("{}", style(usage).yellow()),
                }
            }
        }

        render(&mut controller, &mut transcript);
    }

    controller.dispose();
    info!(component = "cli", event = "chat.exited");
    Ok(())
}

fn render(controller: &mut Controller, transcript: &mut Transcript) {
    transcript.update(controller.view());

    match controller.view().edit.phase() {
        EditPhase::Applied => {
            println!("{}", style("Edit applied.").green());
            controller.acknowledge_edit();
        }
        EditPhase::Error => {
            let failure = controller
                .view()
                .edit
                .failure()
                .unwrap_or("Edit failed")
                .to_string();
            println!("{}", style(failure).red());
            controller.acknowledge_edit();
        }
        _ => {}
    }

    if let Some(notice) = controller.take_notice() {
        println!("{}", style(notice).yellow());
    }
}

async fn execute(controller: &mut Controller, command: ChatCommand) {
    match command {
        ChatCommand::Send(text) => {
            controller.composer_mut().set(text);
            match controller.send_composed() {
                Ok(()) => {}
                Err(ClientError::Busy) => {
                    println!("{}", style("Still working on the previous request.").yellow())
                }
                Err(err) => println!("{}", style(err).red()),
            }
        }
        ChatCommand::Sessions => {
            println!(
                "{}",
                sessions_table(controller.sessions(), controller.active_session_id())
            );
            controller.refresh_sessions();
        }
        ChatCommand::New => {
            let id = controller.new_session().await;
            println!("{}", style(format!("Started session {id}")).dim());
        }
        ChatCommand::Switch(id) => {
            controller.switch_to(&id);
            println!("{}", style(format!("Switched to session {id}")).dim());
        }
        ChatCommand::Delete(id) => match controller.delete_session(&id).await {
            Ok(()) => println!(
                "{}",
                style(format!(
                    "Deleted {id}; active session is {}",
                    controller.active_session_id().unwrap_or("-")
                ))
                .dim()
            ),
            Err(err) => println!("{}", style(err).red()),
        },
        ChatCommand::Edit {
            section,
            instructions,
        } => {
            match submit_edit(controller, section, instructions) {
                Ok(()) => println!(
                    "{}",
                    style(format!("Rewriting the {} section...", section.title())).dim()
                ),
                Err(err) => {
                    controller.cancel_edit();
                    println!("{}", style(err).red());
                }
            }
        }
        ChatCommand::Plan => match controller.view().plan.as_ref() {
            Some(plan) => print_plan(plan),
            None => {
                if let Err(err) = controller.request_plan() {
                    println!("{}", style(err).red());
                } else {
                    println!("{}", style("No plan yet; asked the server.").dim());
                }
            }
        },
        ChatCommand::Voice => match controller.toggle_voice() {
            VoiceState::Listening => println!("{}", style("Listening...").dim()),
            VoiceState::Idle => {
                let draft = controller.composer().text().to_string();
                if !draft.is_empty() {
                    println!("{}", style(format!("Dictated: {draft}")).dim());
                }
            }
        },
        ChatCommand::Help => println!("{HELP}"),
        ChatCommand::Quit => {}
    }
}

fn submit_edit(
    controller: &mut Controller,
    section: SectionKey,
    instructions: String,
) -> Result<(), ClientError> {
    controller.begin_edit(section)?;
    controller.set_edit_instructions(instructions)?;
    controller.submit_edit()
}
