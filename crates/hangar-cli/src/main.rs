mod commands;

use clap::{Parser, Subcommand};
use commands::{Context, EXIT_DESCRIPTOR_ERROR, EXIT_FAILURE, EXIT_STORE_ERROR};
use hangar_core::install_signal_handler;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "hangar",
    version,
    about = "Workspace environment orchestration engine"
)]
struct Cli {
    /// Path to the Hangar store directory (snapshots and local machines).
    #[arg(long, default_value = "~/.local/share/hangar")]
    store: String,

    /// Engine configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for machine and process logs. Defaults to <store>/logs.
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the start order of the machines of an environment descriptor.
    Order {
        /// Path to the environment descriptor.
        #[arg(default_value = "hangar.toml")]
        descriptor: PathBuf,
    },
    /// Start an environment, optionally run a command in its dev machine, then stop it.
    Up {
        /// Path to the environment descriptor.
        #[arg(default_value = "hangar.toml")]
        descriptor: PathBuf,
        /// Workspace the environment belongs to.
        #[arg(long, default_value = "default")]
        workspace: String,
        /// Start machines from their stored snapshots.
        #[arg(long, default_value_t = false)]
        recover: bool,
        /// Command to run in the dev machine once the environment is up.
        #[arg(long)]
        exec: Option<String>,
        /// Snapshot the dev machine before stopping.
        #[arg(long, default_value_t = false)]
        snapshot: bool,
        /// Keep the environment running until interrupted.
        #[arg(long, default_value_t = false)]
        hold: bool,
    },
    /// List stored snapshots of a workspace.
    Snapshots {
        /// Workspace to list.
        #[arg(long, default_value = "default")]
        workspace: String,
    },
    /// Remove a stored snapshot and its image.
    RemoveSnapshot {
        /// Snapshot id.
        id: String,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("HANGAR_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    let ctx = Context {
        store_path: expand_tilde(&cli.store),
        config_path: cli.config,
        logs_dir: cli.logs_dir,
        json: cli.json,
    };

    let result = match cli.command {
        Commands::Order { descriptor } => commands::order::run(&descriptor, ctx.json),
        Commands::Up {
            descriptor,
            workspace,
            recover,
            exec,
            snapshot,
            hold,
        } => commands::up::run(
            &ctx,
            &descriptor,
            &commands::up::UpOptions {
                workspace,
                recover,
                exec,
                snapshot,
                hold,
            },
        ),
        Commands::Snapshots { workspace } => commands::snapshots::run(&ctx, &workspace),
        Commands::RemoveSnapshot { id } => commands::snapshots::remove(&ctx, &id),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("descriptor error:") {
                EXIT_DESCRIPTOR_ERROR
            } else if msg.starts_with("store error:") {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
