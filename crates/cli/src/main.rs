use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use lib::chat::{ChatController, ChatUpdate, SendOutcome};
use lib::history::{LocalMessageStore, Role};
use lib::realtime::{ClientOptions, RealtimeClient};
use lib::storage::{FileStore, KeyValueStore};
use lib::timeline::{display, TimelineEntry};

#[derive(Parser)]
#[command(name = "advisor")]
#[command(about = "Advisor CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, a default config and the storage directory.
    Init {
        /// Config file path (default: ADVISOR_CONFIG_PATH or ~/.advisor/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Print the persisted session id, creating one if needed.
    Session {
        /// Config file path (default: ADVISOR_CONFIG_PATH or ~/.advisor/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Query the backend's advisor status endpoint.
    Status {
        /// Config file path (default: ADVISOR_CONFIG_PATH or ~/.advisor/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Print the stored conversation for the current session.
    History {
        /// Config file path (default: ADVISOR_CONFIG_PATH or ~/.advisor/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Delete the stored conversation instead of printing it.
        #[arg(long)]
        clear: bool,
    },

    /// Chat with the advisor (interactive). Agent reasoning and tool calls are shown live.
    Chat {
        /// Config file path (default: ADVISOR_CONFIG_PATH or ~/.advisor/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Use this session id instead of the persisted one.
        #[arg(long, value_name = "ID")]
        session: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("advisor {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Session { config }) => run_session(config),
        Some(Commands::Status { config }) => run_status(config).await,
        Some(Commands::History { config, clear }) => run_history(config, clear),
        Some(Commands::Chat { config, session }) => run_chat(config, session).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let storage = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", path.display());
    println!("session storage at {}", storage.display());
    Ok(())
}

/// Loaded config plus the file store it points at.
struct Context {
    config: lib::config::Config,
    store: Arc<FileStore>,
}

fn load_context(config_path: Option<PathBuf>) -> anyhow::Result<Context> {
    let (config, path) = lib::config::load_config(config_path)?;
    lib::init::require_initialized(&path, &config)?;
    let dir = lib::config::resolve_storage_dir(&config, &path);
    log::debug!("storage directory {}", dir.display());
    Ok(Context {
        config,
        store: Arc::new(FileStore::new(dir)),
    })
}

fn run_session(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let ctx = load_context(config_path)?;
    println!("{}", lib::session::get_or_create_session_id(ctx.store.as_ref()));
    Ok(())
}

async fn run_status(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    use lib::api::AdvisorApi;

    let (config, _) = lib::config::load_config(config_path)?;
    let token = lib::config::resolve_api_token(&config);
    let api = lib::api::HttpAdvisorApi::new(&config.api, token)?;
    let status = api.status().await?;
    println!("status: {}", status.status);
    if let Some(agents) = status.agents {
        println!("agents: {}", serde_json::to_string_pretty(&agents)?);
    }
    Ok(())
}

fn run_history(config_path: Option<PathBuf>, clear: bool) -> anyhow::Result<()> {
    let ctx = load_context(config_path)?;
    let session_id = lib::session::get_or_create_session_id(ctx.store.as_ref());
    let history = LocalMessageStore::new(ctx.store.clone());
    if clear {
        history.clear(&session_id);
        println!("cleared history for {}", session_id);
        return Ok(());
    }
    let messages = history.load(&session_id);
    if messages.is_empty() {
        println!("no messages for {}", session_id);
    }
    for m in messages {
        println!(
            "[{}] {}: {}",
            lib::time::to_iso_millis(&m.timestamp),
            m.role,
            m.content
        );
    }
    Ok(())
}

fn print_update(update: &ChatUpdate) {
    match update {
        ChatUpdate::Message(m) => match m.role {
            Role::User => {}
            Role::Assistant => println!("< {}", m.content.trim()),
            Role::Error => eprintln!("! {}", m.content.trim()),
        },
        ChatUpdate::Reasoning(step) => {
            for line in display::render_entry(&TimelineEntry::Reasoning(step)) {
                println!("  {}", line);
            }
        }
        ChatUpdate::ToolStarted(call) | ChatUpdate::ToolFinished(call) => {
            for line in display::render_entry(&TimelineEntry::Tool(call)) {
                println!("  {}", line);
            }
        }
        ChatUpdate::Connection { connected } => {
            log::info!("realtime {}", if *connected { "connected" } else { "disconnected" });
        }
        ChatUpdate::TransportError(reason) => log::warn!("realtime: {}", reason),
    }
}

async fn run_chat(config_path: Option<PathBuf>, session: Option<String>) -> anyhow::Result<()> {
    let ctx = load_context(config_path)?;
    let session_id = match session {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => lib::session::get_or_create_session_id(ctx.store.as_ref()),
    };
    let token = lib::config::resolve_api_token(&ctx.config);
    let api = Arc::new(lib::api::HttpAdvisorApi::new(&ctx.config.api, token.clone())?);
    let store: Arc<dyn KeyValueStore> = ctx.store.clone();

    let mut client = RealtimeClient::new(ClientOptions::from_config(&ctx.config.realtime, token));
    let events = client.connect(&session_id);
    let mut chat = ChatController::new(session_id.clone(), api, LocalMessageStore::new(store))
        .with_realtime(Box::new(client), events)
        .with_response_timeout(ctx.config.realtime.response_timeout());

    println!("session {}", session_id);
    for m in chat.messages() {
        match m.role {
            Role::User => println!("> {}", m.content),
            Role::Assistant => println!("< {}", m.content.trim()),
            Role::Error => println!("! {}", m.content.trim()),
        }
    }
    chat.on_update(print_update);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    'prompt: loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let line = loop {
            tokio::select! {
                line = lines.next_line() => break line?,
                _ = chat.next_event(), if chat.is_listening() => {}
            }
        };
        let Some(line) = line else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if is_exit(input) {
            break;
        }
        if input.eq_ignore_ascii_case("/timeline") {
            let entries = chat.correlator().timeline();
            if entries.is_empty() {
                println!("  (no agent activity this turn)");
            }
            for line in display::render_timeline(&entries) {
                println!("  {}", line);
            }
            continue;
        }

        match chat.send_query(input).await {
            SendOutcome::Rejected(reason) => eprintln!("! {}", reason),
            SendOutcome::AwaitingRealtime => {
                // stdin stays live so a hung turn can still be left with /exit
                while chat.is_loading() {
                    tokio::select! {
                        line = lines.next_line() => match line? {
                            None => break 'prompt,
                            Some(l) if is_exit(l.trim()) => break 'prompt,
                            Some(_) => eprintln!("! still waiting for the previous answer"),
                        },
                        _ = chat.wait_for_turn() => {
                            if chat.is_loading() {
                                // stream closed with no timeout; nothing more can arrive
                                break;
                            }
                        }
                    }
                }
            }
            SendOutcome::Settled => {}
        }
    }

    chat.teardown();
    Ok(())
}

fn is_exit(input: &str) -> bool {
    input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit")
}

#[cfg(test)]
mod tests {
    use super::is_exit;

    #[test]
    fn exit_commands_are_case_insensitive() {
        assert!(is_exit("/exit"));
        assert!(is_exit("/QUIT"));
        assert!(!is_exit("/timeline"));
        assert!(!is_exit("exit"));
    }
}
