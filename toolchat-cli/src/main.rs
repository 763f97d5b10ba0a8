//! # toolchat CLI
//!
//! Interactive chat with a model that can run shell commands and save and
//! run code on this machine.
//!
//! Usage:
//!   toolchat                  start the interactive REPL (same as `toolchat chat`)
//!   toolchat ask <prompt>     run one exchange and print the answer
//!   toolchat sessions         list saved conversation snapshots
//!
//! Examples:
//!   toolchat --model gpt-4o-mini
//!   toolchat --provider anthropic ask "How much disk space is free?"
//!   toolchat --max-rounds 8 --tool-timeout 10

mod repl;

use clap::{Parser, Subcommand};
use repl::{render_turn, Command, HELP};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use toolchat_agent::{is_resumable, Agent, ChatSession, Exchange};
use toolchat_core::{
    default_system_prompt, ConfiguredProvider, ErrorKind, ProviderGateway, Result,
    ToolRegistry, ToolchatConfig, TranscriptStore,
};
use tracing_subscriber::EnvFilter;

type Gateway = ProviderGateway<ConfiguredProvider>;

#[derive(Parser)]
#[command(name = "toolchat")]
#[command(author, version, about = "toolchat - chat with a model that can use your shell")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (default: ./toolchat.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Model to start with
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Provider kind: openai or anthropic
    #[arg(long, global = true)]
    provider: Option<String>,

    /// Maximum tool call rounds per exchange
    #[arg(long, global = true)]
    max_rounds: Option<usize>,

    /// Per-tool timeout in seconds
    #[arg(long, global = true, value_name = "SECS")]
    tool_timeout: Option<u64>,

    /// Directory for saved conversations
    #[arg(long, global = true)]
    session_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive session, resuming the saved history
    Chat,
    /// Run a single exchange
    Ask {
        /// The message to send
        #[arg(trailing_var_arg = true, required = true)]
        prompt: Vec<String>,
    },
    /// List saved conversation snapshots
    Sessions,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// File configuration with command-line overrides applied
fn load_config(cli: &Cli) -> Result<ToolchatConfig> {
    let mut config = ToolchatConfig::load(cli.config.as_deref())?;
    if let Some(kind) = &cli.provider {
        config.provider.kind = kind.parse()?;
    }
    if let Some(model) = &cli.model {
        config.provider.default_model = Some(model.clone());
    }
    if let Some(rounds) = cli.max_rounds {
        config.limits.max_tool_call_rounds = rounds;
    }
    if let Some(secs) = cli.tool_timeout {
        config.limits.per_tool_timeout_secs = secs;
    }
    if let Some(dir) = &cli.session_dir {
        config.storage.dir = dir.clone();
    }
    Ok(config)
}

fn build_agent(config: &ToolchatConfig) -> Result<Agent<Gateway>> {
    let provider = ConfiguredProvider::from_section(&config.provider)?;
    let prompt = config
        .system_prompt
        .clone()
        .unwrap_or_else(|| default_system_prompt(&config.tools.scripts_dir));
    let gateway = ProviderGateway::new(provider)
        .with_system_prompt(prompt)
        .with_temperature(config.provider.temperature)
        .with_max_tokens(config.provider.max_tokens);
    Ok(Agent::new(
        gateway,
        ToolRegistry::with_defaults(&config.tools),
        config.limits.session_limits(),
    ))
}

fn open_store(config: &ToolchatConfig) -> Result<TranscriptStore> {
    TranscriptStore::open(&config.storage.dir, config.storage.prefix.clone())
}

/// Cancel `token` on Ctrl-C until the returned task is aborted
fn spawn_interrupt_watcher(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n[interrupt] stopping the running tools...");
            token.cancel();
        }
    })
}

/// Print an exchange outcome. Returns false when the exchange failed.
fn report(exchange: Exchange) -> bool {
    let ok = match exchange.answer {
        Ok(answer) => {
            println!("\n{}\n", answer.text);
            println!(
                "[{} rounds, {} tool calls, {:.1}s{}]",
                answer.rounds,
                answer.tool_calls,
                answer.elapsed.as_secs_f64(),
                if answer.truncated { ", round limit reached" } else { "" }
            );
            true
        }
        Err(e) if e.kind() == ErrorKind::Cancelled => {
            eprintln!("Interrupted. Completed tool rounds are kept; /retry resubmits.");
            false
        }
        Err(e) if is_resumable(&e) => {
            eprintln!("Error: {}", e);
            eprintln!("The conversation is intact; /retry resubmits it.");
            false
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            false
        }
    };
    if let Err(e) = exchange.autosave {
        eprintln!("Warning: autosave failed: {}", e);
    }
    ok
}

async fn run_exchange(session: &mut ChatSession<Gateway>, message: Option<&str>) -> bool {
    let cancel = CancellationToken::new();
    let watcher = spawn_interrupt_watcher(cancel.clone());
    let exchange = match message {
        Some(text) => session.send(text, &cancel).await,
        None => session.retry(&cancel).await,
    };
    watcher.abort();
    report(exchange)
}

fn list_sessions(names: Result<Vec<String>>) {
    match names {
        Ok(names) if names.is_empty() => println!("  (no saved conversations)"),
        Ok(names) => {
            for name in names {
                println!("  - {}", name);
            }
        }
        Err(e) => eprintln!("Error: {}", e),
    }
}

async fn run_repl(config: &ToolchatConfig) -> Result<()> {
    let agent = build_agent(config)?;
    let (mut session, diagnostic) = ChatSession::resume_history(agent, open_store(config)?);
    if let Some(e) = diagnostic {
        eprintln!("Warning: history could not be restored, starting empty: {}", e);
    }

    println!("toolchat - model {}", session.model());
    if !session.transcript().is_empty() {
        println!("Resumed {} turns of history.", session.transcript().len());
    }
    println!("Type /help for commands.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                break;
            }
        };

        match Command::parse(&line) {
            Command::Empty => {}
            Command::Quit => break,
            Command::Help => println!("{}", HELP),
            Command::Message(text) => {
                run_exchange(&mut session, Some(&text)).await;
            }
            Command::Retry => {
                run_exchange(&mut session, None).await;
            }
            Command::Model(name) => match session.switch_model(name.as_deref()) {
                Ok(model) => println!("Switched to model {}", model),
                Err(e) => eprintln!("Error: {}", e),
            },
            Command::Clear => {
                session.clear();
                println!("Conversation cleared.");
            }
            Command::Save => match session.save() {
                Ok(path) => println!("Saved to {}", path),
                Err(e) => eprintln!("Error: {}", e),
            },
            Command::Load(path) => match session.load(&path) {
                Ok(None) => println!(
                    "Loaded {} turns from {}",
                    session.transcript().len(),
                    path
                ),
                Ok(Some(e)) => {
                    eprintln!("Warning: {} is corrupt, starting empty: {}", path, e)
                }
                Err(e) => eprintln!("Error: {}", e),
            },
            Command::List => list_sessions(session.list()),
            Command::History => {
                if session.transcript().is_empty() {
                    println!("(empty)");
                }
                for turn in session.transcript().iter() {
                    println!("{}", render_turn(turn));
                }
            }
            Command::Usage => println!("{}", session.agent().gateway().usage()),
            Command::Invalid(message) => eprintln!("{}", message),
        }
    }

    tracing::debug!(usage = %session.agent().gateway().usage(), "session finished");
    let path = session.close()?;
    println!("History saved to {}", path);
    Ok(())
}

async fn run_ask(config: &ToolchatConfig, prompt: &str) -> Result<bool> {
    let mut session = ChatSession::new(build_agent(config)?, open_store(config)?);
    Ok(run_exchange(&mut session, Some(prompt)).await)
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    tracing::debug!(
        provider = config.provider.kind.as_str(),
        max_rounds = config.limits.max_tool_call_rounds,
        "configuration loaded"
    );

    let outcome = match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_repl(&config).await.map(|_| true),
        Commands::Ask { prompt } => run_ask(&config, &prompt.join(" ")).await,
        Commands::Sessions => open_store(&config).map(|store| {
            println!("Saved conversations in {}:", config.storage.dir.display());
            list_sessions(store.list());
            true
        }),
    };

    match outcome {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
