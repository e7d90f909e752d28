mod config;
mod error;
mod spinner;

use std::io::{self, BufRead, Write};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use mcp::ClientConfig;
use runtime::{McpToolHost, OllamaBackend, Session, ToolHost};
use toolhost::ServerConfig;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{Error, Result};
use spinner::Spinner;

const EXIT_COMMAND: &str = "exit";

/// Extra time the loop allows past the client's request deadline, so a
/// client timeout is reported as the tool's result.
const TOOL_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "fsagent")]
#[command(about = "A language-model agent that works on files through a tool host", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the filesystem toolhost
    Serve {
        /// Config file (defaults to ./fsagent.toml if present)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Address to bind
        #[arg(long)]
        host: Option<IpAddr>,
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Base directory for relative tool paths
        #[arg(short, long)]
        workdir: Option<PathBuf>,
    },
    /// Start an interactive chat session
    Chat {
        /// Config file (defaults to ./fsagent.toml if present)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Model name
        #[arg(short, long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve {
            config,
            host,
            port,
            workdir,
        }) => {
            init_tracing("info");
            let mut config = load_config(config)?;
            if let Some(host) = host {
                config.toolhost.host = host;
            }
            if let Some(port) = port {
                config.toolhost.port = port;
            }
            if let Some(workdir) = workdir {
                config.toolhost.workdir = Some(workdir);
            }
            cmd_serve(config).await
        }
        Some(Commands::Chat { config, model }) => {
            init_tracing("warn");
            let mut config = load_config(config)?;
            if let Some(model) = model {
                config.driver.model = model;
            }
            cmd_chat(config).await
        }
        None => {
            init_tracing("warn");
            cmd_chat(load_config(None)?).await
        }
    }
}

fn init_tracing(default: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let mut config = Config::discover(path.as_deref())?;
    config.apply_env()?;
    Ok(config)
}

async fn cmd_serve(config: Config) -> Result<()> {
    let workdir = match config.toolhost.workdir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let server = ServerConfig {
        addr: config.toolhost.addr(),
        workdir,
        tool_timeout: config.toolhost.tool_timeout(),
        idle_timeout: config.toolhost.idle_timeout(),
        sweep_interval: config.toolhost.sweep_interval(),
    };
    toolhost::serve(server).await?;
    Ok(())
}

async fn cmd_chat(config: Config) -> Result<()> {
    let driver = config.driver;
    println!("fsagent v{}", env!("CARGO_PKG_VERSION"));

    let backend = OllamaBackend::builder(&driver.model)
        .url(&driver.model_url)
        .build();

    let client_config = ClientConfig {
        url: driver.toolhost_url.clone(),
        timeout: driver.tool_timeout(),
    };
    let tools = McpToolHost::connect(client_config)
        .await
        .map_err(|source| Error::Connect {
            url: driver.toolhost_url.clone(),
            source,
        })?;
    info!(tools = tools.specs().len(), url = %driver.toolhost_url, "connected to toolhost");

    let mut session = Session::new(backend, tools)
        .with_model_timeout(driver.model_timeout())
        .with_tool_timeout(driver.tool_timeout() + TOOL_GRACE);
    if let Some(system) = &driver.system_prompt {
        session = session.with_system(system.as_str());
    }

    println!("Model: {} ({})", driver.model, driver.model_url);
    println!("Toolhost: {}", driver.toolhost_url);
    println!("Type '{EXIT_COMMAND}' or Ctrl+D to exit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            // EOF
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if is_exit(input) {
            break;
        }

        let reply = {
            let _spinner = Spinner::start("thinking");
            session.chat(input).await
        };
        match reply {
            Ok(response) => println!("\n{response}\n"),
            Err(e) => eprintln!("Error: {e}\n"),
        }
    }

    if let Err(e) = session.tools().close().await {
        warn!(error = %e, "failed to close toolhost session");
    }
    println!("\nSession ended.");
    Ok(())
}

fn is_exit(input: &str) -> bool {
    input.trim().eq_ignore_ascii_case(EXIT_COMMAND)
}
