//! oracle - command-line chat client for the oracle answering service

mod commands;
mod config;
mod utils;

use clap::Parser;
use std::{
    io::{self, Write},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, bail};
use oracle_chat::{
    ChatEvent, ChatSession, DecodeErrorPolicy, HttpTransport, SessionConfig, SubmitMode,
    TurnOutcome,
};
use oracle_render::Tooltip;
use oracle_wire::{ClientConfig, OracleClient, ProtocolVersion, RequestEnvelope};
use tokio::sync::broadcast;

/// oracle - ask questions, get cited answers
#[derive(Parser, Debug)]
#[command(name = "oracle")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the oracle deployment
    #[arg(short, long)]
    url: Option<String>,

    /// Use the batch endpoint instead of streaming
    #[arg(short, long)]
    batch: bool,

    /// Payload shape spoken by the backend (current, legacy)
    #[arg(long)]
    protocol: Option<String>,

    /// Request body shape (bare, wrapped)
    #[arg(long)]
    envelope: Option<String>,

    /// Give up on an answer after this many seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Stop an answer at the first undecodable payload
    #[arg(long)]
    halt_on_decode_error: bool,

    /// Ask a single question and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Print the conversation as HTML after a single question
    #[arg(long, requires = "command")]
    html: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

fn parse_mode(s: &str) -> anyhow::Result<SubmitMode> {
    match s.to_lowercase().as_str() {
        "streaming" | "stream" => Ok(SubmitMode::Streaming),
        "batch" => Ok(SubmitMode::Batch),
        other => bail!("unknown mode: {other} (expected streaming or batch)"),
    }
}

fn parse_decode_policy(s: &str) -> anyhow::Result<DecodeErrorPolicy> {
    match s.to_lowercase().as_str() {
        "skip" => Ok(DecodeErrorPolicy::Skip),
        "halt" => Ok(DecodeErrorPolicy::Halt),
        other => bail!("unknown decode error policy: {other} (expected skip or halt)"),
    }
}

/// Merge config with CLI args (CLI takes precedence)
fn build_configs(args: &Args, cfg: &config::Config) -> anyhow::Result<(ClientConfig, SessionConfig)> {
    let mut client = ClientConfig::default();
    if let Some(url) = args.url.clone().or_else(|| cfg.base_url.clone()) {
        client.base_url = url;
    }
    if let Some(protocol) = args.protocol.as_ref().or(cfg.protocol.as_ref()) {
        client.protocol = protocol.parse::<ProtocolVersion>()?;
    }
    if let Some(envelope) = args.envelope.as_ref().or(cfg.envelope.as_ref()) {
        client.envelope = RequestEnvelope::parse(envelope)?;
    }

    let mut session = SessionConfig::default();
    if args.batch {
        session.mode = SubmitMode::Batch;
    } else if let Some(mode) = cfg.mode.as_deref() {
        session.mode = parse_mode(mode)?;
    }
    session.turn_timeout = args
        .timeout
        .or(cfg.timeout_secs)
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);
    if args.halt_on_decode_error {
        session.decode_errors = DecodeErrorPolicy::Halt;
    } else if let Some(policy) = cfg.decode_errors.as_deref() {
        session.decode_errors = parse_decode_policy(policy)?;
    }

    Ok((client, session))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("oracle=debug,oracle_wire=debug,oracle_chat=debug")
            .with_writer(io::stderr)
            .init();
    }

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load();
    let (client_config, session_config) = build_configs(&args, &cfg)?;

    let client = OracleClient::new(client_config).context("Failed to create oracle client")?;
    tracing::debug!("Using oracle at {}", client.config().base_url);
    let transport = Arc::new(HttpTransport::new(client));
    let mut session = ChatSession::new(session_config, transport);

    // Ctrl-C stops the answer in flight, or exits when idle
    let handle = session.handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if handle.is_busy() {
                handle.abort();
            } else {
                std::process::exit(130);
            }
        }
    });

    // Non-interactive mode
    if let Some(command) = args.command {
        let outcome = run_turn(&mut session, &command).await?;
        if args.html {
            println!("{}", oracle_render::render_transcript(session.conversation().turns()));
        }
        if !outcome.is_complete() {
            std::process::exit(1);
        }
        return Ok(());
    }

    run_interactive(&mut session).await
}

/// Submit one question, printing the answer as it arrives
async fn run_turn(session: &mut ChatSession, input: &str) -> anyhow::Result<TurnOutcome> {
    let printer = tokio::spawn(print_turn(session.subscribe()));

    match session.submit(input).await {
        Ok(outcome) => {
            let _ = printer.await;
            Ok(outcome)
        }
        Err(e) => {
            printer.abort();
            Err(e.into())
        }
    }
}

/// Print one turn's events until it ends
async fn print_turn(mut receiver: broadcast::Receiver<ChatEvent>) {
    let mut printed = 0usize;
    let mut sources = Vec::new();

    loop {
        let event = match receiver.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Display fell behind by {} events", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            ChatEvent::Updated { conversation, .. } => {
                // Only the last turn changes while an answer streams
                if let Some(turn) = conversation.last().filter(|t| t.is_assistant()) {
                    let new_text = utils::unprinted_suffix(turn.text(), printed);
                    if !new_text.is_empty() {
                        print!("{}", new_text);
                        io::stdout().flush().ok();
                        printed += new_text.chars().count();
                    }
                    sources = turn.sources().to_vec();
                }
            }
            ChatEvent::DecodeError { message, .. } => {
                eprintln!("\n[skipped payload: {}]", message);
            }
            ChatEvent::Warning { message, .. } => {
                eprintln!("\n[{}]", message);
            }
            ChatEvent::Error { message } => {
                eprintln!("\nError: {}", message);
            }
            ChatEvent::TurnEnd { outcome, .. } => {
                println!();
                if !sources.is_empty() {
                    println!("\nSources:\n{}", commands::list_sources(&sources));
                }
                match outcome {
                    TurnOutcome::Finished => {}
                    TurnOutcome::Cancelled => eprintln!("[stopped]"),
                    TurnOutcome::Incomplete => eprintln!("[answer incomplete]"),
                    TurnOutcome::TimedOut => eprintln!("[answer timed out]"),
                    TurnOutcome::Halted => eprintln!("[answer halted]"),
                    TurnOutcome::Failed(_) => eprintln!("[answer failed]"),
                }
                break;
            }
            ChatEvent::TurnStart { .. } => {}
        }
    }
}

async fn run_interactive(session: &mut ChatSession) -> anyhow::Result<()> {
    let mut tooltip = Tooltip::new();

    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        eprintln!("oracle - type a question, /help for commands");
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        // Handle slash commands
        if let Some(result) =
            commands::execute_command(input, session.conversation(), &mut tooltip)
        {
            match result {
                commands::CommandResult::Clear => {
                    session.clear()?;
                    tooltip.hide();
                    println!("Started a new conversation.");
                }
                commands::CommandResult::Exit => {
                    break;
                }
                commands::CommandResult::Message(msg) => {
                    println!("{}", msg);
                }
                commands::CommandResult::Unknown(cmd) => {
                    println!("Unknown command: /{}", cmd);
                    println!("Type /help for available commands.");
                }
            }
            println!();
            continue;
        }

        println!();
        tooltip.hide();
        if let Err(e) = run_turn(session, input).await {
            eprintln!("Error: {}", e);
        }
        println!();
    }

    Ok(())
}
