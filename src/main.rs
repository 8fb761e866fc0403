//! Line Bridge - newline-delimited numeric message bridge over process stdio.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use line_bridge::config::{
    BridgeSettings, ChildSettings, ConfigError, ConfigLoader, DEFAULT_TERMINATE_TIMEOUT_MS,
};
use line_bridge::{
    codec, display, BoxError, BridgeError, BridgeHandlers, BridgeOptions, ChildBridge,
    ChildCommand, LineBridge, MessageSender, SpawnError,
};

/// How long to wait for blocking stdin reads when shutting down.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(
    name = "line-bridge",
    about = "Exchange newline-delimited numeric messages over stdio",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Disable message and lifecycle traces.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the encoded line for a message.
    Encode {
        /// The message to encode.
        text: String,
    },
    /// Decode an encoded line.
    Decode {
        /// The comma-separated line to decode.
        line: String,
    },
    /// Answer every message on stdin with an echo on stdout.
    Echo,
    /// Spawn a child and bridge local stdin lines to it.
    Run {
        /// Program to run; falls back to `[child]` in the config file.
        program: Option<String>,
        /// Arguments for the program.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("Failed to start child: {0}")]
    Spawn(#[from] SpawnError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed line: {0}")]
    Malformed(#[from] line_bridge::DecodeError),
    #[error("No program given and no [child] section in config")]
    MissingProgram,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // stdout carries the protocol; diagnostics go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_settings(cli: &Cli) -> Result<BridgeSettings, ConfigError> {
    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path.clone()),
        None => ConfigLoader::new(),
    };
    let mut settings = loader.load()?;
    if cli.quiet {
        settings.logging = false;
    }
    Ok(settings)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(cli));
    // A pending stdin read must not keep the process alive.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "line-bridge failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let settings = load_settings(&cli)?;

    match cli.command {
        Commands::Encode { text } => {
            println!("{}", codec::encode_message(&text));
            Ok(())
        }
        Commands::Decode { line } => {
            let message = codec::decode(&line)?;
            let message = if settings.strip_padding {
                codec::strip_padding(&message)
            } else {
                message.as_str()
            };
            println!("{message}");
            Ok(())
        }
        Commands::Echo => run_echo(settings.options()).await,
        Commands::Run { program, args } => {
            let child_settings = match program {
                Some(program) => ChildSettings {
                    program,
                    args,
                    working_dir: None,
                    terminate_timeout_ms: settings
                        .child
                        .as_ref()
                        .map_or(DEFAULT_TERMINATE_TIMEOUT_MS, |c| c.terminate_timeout_ms),
                },
                None => settings.child.clone().ok_or(CliError::MissingProgram)?,
            };
            run_child(&child_settings, settings.options()).await
        }
    }
}

/// Echo peer: replies to each message until `exit` or end of input.
async fn run_echo(options: BridgeOptions) -> Result<(), CliError> {
    let cancel = CancellationToken::new();
    let sender = MessageSender::new(tokio::io::stdout(), options.logging);

    let reply = sender.clone();
    let stop = cancel.clone();
    let handlers = BridgeHandlers::new()
        .on_message(move |message| {
            let reply = reply.clone();
            let stop = stop.clone();
            async move {
                let text = message.trim();
                if text == "exit" {
                    reply.send("Terminating...").await?;
                    stop.cancel();
                } else {
                    reply.send(&format!("Echo: {text}")).await?;
                }
                Ok::<(), BoxError>(())
            }
        })
        .on_error(|err| tracing::warn!(error = %err, "Echo error"))
        .on_close(|| tracing::debug!("Connection closed"));

    let bridge = LineBridge::with_sender(tokio::io::stdin(), sender, handlers, options);
    let listener = bridge.start_with_cancellation(cancel)?;
    listener.join().await;
    Ok(())
}

/// Spawn a child and forward local stdin lines to it as messages.
async fn run_child(settings: &ChildSettings, options: BridgeOptions) -> Result<(), CliError> {
    let command: ChildCommand = settings.command();
    let program = command.program().to_string();

    let error_program = program.clone();
    let handlers = BridgeHandlers::new()
        .on_message(|message| async move {
            display::print_received(&message);
            Ok(())
        })
        .on_error(move |err| match err {
            BridgeError::Peer(line) => display::print_error(&error_program, line),
            other => display::print_error(&error_program, &other.to_string()),
        });

    let mut child = ChildBridge::spawn(&command, handlers, options)?;
    let listener = child.start()?;

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = input.next_line().await? {
        match child.send(&line).await {
            Ok(()) => display::print_sent(&line),
            Err(BridgeError::Io(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                tracing::warn!("Child closed its input");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    child.close().await?;
    let code = match tokio::time::timeout(settings.terminate_timeout(), child.wait()).await {
        Ok(status) => status?.code(),
        Err(_) => {
            tracing::warn!(program = %program, "Child did not exit, terminating");
            child.graceful_terminate(settings.terminate_timeout()).await?;
            None
        }
    };

    listener.join().await;
    display::print_closed(&program, code);
    Ok(())
}
