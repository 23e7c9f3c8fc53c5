use std::io::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use rho_agent_core::{Config, Orchestrator, ProviderRegistry, RuntimeState, TurnResult};

use crate::commands::{filter_commands, COMMANDS};
use crate::history::InputHistory;
use crate::speech::{spawn_transcriber, SilentTranscriber};

const CTRL_C_EXIT_WINDOW: Duration = Duration::from_secs(2);
const SPINNER_FRAMES: [&str; 4] = ["◰", "◳", "◲", "◱"];
const SPINNER_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, PartialEq, Eq)]
pub enum CommandAction {
    Continue,
    Exit,
}

/// Runs the interactive session: reads keyboard and transcription input,
/// serializes turns through the orchestrator, and keeps the terminal live
/// with a spinner while a turn is in flight.
pub async fn run_session(
    mut orchestrator: Orchestrator,
    state: Arc<RuntimeState>,
    providers: Arc<ProviderRegistry>,
    config: &Config,
) -> Result<()> {
    print_welcome(config, &state);

    let mut history = InputHistory::load_default();
    let (mut transcripts, _transcriber) = spawn_transcriber(Box::new(SilentTranscriber));

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut ctrl_c_armed_at: Option<Instant> = None;

    loop {
        print!("rho> ");
        std::io::stdout()
            .flush()
            .context("failed to flush stdout")?;

        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read input")? else {
                    break;
                };
                ctrl_c_armed_at = None;

                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                history.push(trimmed);

                if trimmed.starts_with('/') {
                    let (action, message) =
                        execute_slash_command(trimmed, &state, &providers, config);
                    if !message.is_empty() {
                        println!("{message}");
                    }
                    if action == CommandAction::Exit {
                        break;
                    }
                    continue;
                }

                submit_turn(&mut orchestrator, trimmed).await;
            }
            transcript = transcripts.recv() => {
                let Some(text) = transcript else {
                    debug!("transcription channel closed");
                    continue;
                };
                let text = text.trim().to_string();
                if text.is_empty() || !state.speech_enabled() {
                    continue;
                }

                ctrl_c_armed_at = None;
                println!("(voice) {text}");
                history.push(&text);
                submit_turn(&mut orchestrator, &text).await;
            }
            _ = tokio::signal::ctrl_c() => {
                match ctrl_c_armed_at {
                    Some(armed) if armed.elapsed() <= CTRL_C_EXIT_WINDOW => break,
                    _ => {
                        ctrl_c_armed_at = Some(Instant::now());
                        println!();
                        println!("Press Ctrl+C again to exit");
                    }
                }
            }
        }
    }

    if let Err(error) = history.save() {
        debug!("failed to persist input history: {error}");
    }

    Ok(())
}

/// Exactly one assistant-style output is rendered per submitted input. A
/// Ctrl+C while the turn is in flight cancels it instead of exiting.
async fn submit_turn(orchestrator: &mut Orchestrator, input: &str) {
    let cancel = CancellationToken::new();
    let cancel_on_interrupt = cancel.clone();
    let interrupt_watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_on_interrupt.cancel();
        }
    });

    let spinner = spawn_spinner();
    let result = orchestrator.run_turn(input, &cancel).await;
    spinner.abort();
    interrupt_watcher.abort();
    clear_spinner_line();

    match result {
        TurnResult::Completed { text, .. } => {
            if text.is_empty() {
                println!("⏺ (no response)");
            } else {
                println!("⏺ {text}");
            }
        }
        TurnResult::Cancelled => {
            println!("request cancelled");
        }
    }
    println!();
}

fn spawn_spinner() -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut index = 0;
        loop {
            print!("\r{} thinking...", SPINNER_FRAMES[index % SPINNER_FRAMES.len()]);
            let _ = std::io::stdout().flush();
            index += 1;
            tokio::time::sleep(SPINNER_INTERVAL).await;
        }
    })
}

fn clear_spinner_line() {
    print!("\r                \r");
    let _ = std::io::stdout().flush();
}

fn print_welcome(config: &Config, state: &RuntimeState) {
    println!("{}", config.name);
    println!("{}", status_line(state));
    println!("Type /help for commands. Press Ctrl+C twice to exit.");
    println!();
}

fn status_line(state: &RuntimeState) -> String {
    format!(
        "• {} • tools {} • speech-to-text {}",
        state.current_model(),
        on_off(state.tools_enabled()),
        on_off(state.speech_enabled()),
    )
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

/// Handles one slash command against the runtime state atom, returning the
/// action to take plus the text to print.
pub fn execute_slash_command(
    input: &str,
    state: &RuntimeState,
    providers: &ProviderRegistry,
    config: &Config,
) -> (CommandAction, String) {
    let mut parts = input.split_whitespace();
    let command = parts.next().unwrap_or_default();
    let argument = parts.next();

    match command {
        "/exit" => (CommandAction::Exit, String::new()),
        "/help" => (CommandAction::Continue, help_text(state)),
        "/tools" => {
            let enabled = state.toggle_tools();
            (
                CommandAction::Continue,
                format!("Tools {}", if enabled { "enabled" } else { "disabled" }),
            )
        }
        "/speech" => {
            let enabled = state.toggle_speech();
            (
                CommandAction::Continue,
                format!("Speech-to-text {}", if enabled { "enabled" } else { "disabled" }),
            )
        }
        "/model" => match argument {
            None => (CommandAction::Continue, model_listing(state, providers, config)),
            Some(target) => (
                CommandAction::Continue,
                switch_model(target, state, providers, config),
            ),
        },
        other => {
            let matches = filter_commands(other);
            if matches.is_empty() {
                (
                    CommandAction::Continue,
                    format!("Unknown command {other}. Type /help for commands."),
                )
            } else {
                let suggestions: Vec<&str> =
                    matches.iter().map(|command| command.name).collect();
                (
                    CommandAction::Continue,
                    format!("Unknown command {other}. Did you mean: {}?", suggestions.join(", ")),
                )
            }
        }
    }
}

fn help_text(state: &RuntimeState) -> String {
    let mut text = String::from("Available commands:\n");
    for command in COMMANDS {
        text.push_str(&format!("  {:<10} {}\n", command.name, command.description));
    }
    text.push_str(&status_line(state));
    text
}

fn model_listing(
    state: &RuntimeState,
    providers: &ProviderRegistry,
    config: &Config,
) -> String {
    let current = state.current_model();
    let mut text = String::from("Available models:\n");
    for (provider, models) in providers.models_by_provider(config) {
        text.push_str(&format!("  {provider}:\n"));
        for model in models {
            let marker = if model == current { " (current)" } else { "" };
            text.push_str(&format!("    {model}{marker}\n"));
        }
    }
    text.push_str("Switch with /model <id|provider>");
    text
}

fn switch_model(
    target: &str,
    state: &RuntimeState,
    providers: &ProviderRegistry,
    config: &Config,
) -> String {
    if providers.provider_for(target).is_some() {
        state.set_current_model(target);
        return format!("Switched to model {target}");
    }

    let alias = target.to_ascii_lowercase();
    let configured = config
        .providers
        .get(&alias)
        .and_then(|provider| provider.models.first());
    match configured {
        Some(model) => {
            state.set_current_model(model.clone());
            format!("Switched to provider {target} (model {model})")
        }
        None => format!("Unknown model or provider: {target}"),
    }
}
