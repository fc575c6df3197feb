mod commands;

use std::ffi::OsString;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use cmdstamp::hook::script::Shell;

#[derive(Parser)]
#[command(
    name = "cmdstamp",
    version,
    about = "Log every interactive shell command with its start and stop time"
)]
struct Cli {
    /// Shell session id (set by the integration script)
    #[arg(long, env = "CMDSTAMP_SESSION", global = true, hide_env_values = true)]
    session: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the shell integration script
    Init {
        /// Shell to generate the script for
        shell: Shell,
    },
    /// Notification entry points called by the integration script
    #[command(hide = true)]
    Hook {
        #[command(subcommand)]
        event: HookEvent,
    },
    /// Resume recording in this shell session
    Enable,
    /// Stop recording in this shell session (drops the command in flight)
    Disable,
    /// Show recording state and log location
    Status,
    /// Stop recording commands matching a regular expression in this session
    Ignore {
        /// Anchored regex matched against the whole command text
        rule: String,
    },
    /// List logged commands with their sequence numbers
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one logged command with its timestamps
    Show {
        /// Sequence number as printed by `cmdstamp list`
        index: usize,
    },
}

#[derive(Subcommand)]
enum HookEvent {
    /// A command is about to run
    Before,
    /// The prompt is about to be drawn
    After {
        /// Text reported by the shell's history for the finished command
        #[arg(long, allow_hyphen_values = true)]
        command: Option<OsString>,
        /// The text carries a leading history sequence number
        #[arg(long)]
        numbered: bool,
    },
    /// The shell is exiting
    End,
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("CMDSTAMP_LOG")
        .unwrap_or_else(|_| "cmdstamp=warn".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .without_time()
                .with_target(false),
        )
        .init();
}

/// Whether the subcommand on the command line is `hook`.
fn is_hook_invocation() -> bool {
    let mut args = std::env::args_os().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--session" {
            args.next();
        } else if !arg.to_string_lossy().starts_with('-') {
            return arg == "hook";
        }
    }
    false
}

fn main() {
    init_logging();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // Hooks run inside the user's prompt: a bad invocation must not
        // print usage into the terminal or fail the prompt.
        Err(e) if is_hook_invocation() => {
            tracing::warn!("hook: {}", e.kind());
            std::process::exit(0);
        }
        Err(e) => e.exit(),
    };
    let session = cli.session.as_deref();
    let exit_code = match &cli.command {
        Commands::Init { shell } => commands::cmd_init(*shell),
        Commands::Hook { event } => match event {
            HookEvent::Before => commands::cmd_hook_before(session),
            HookEvent::After { command, numbered } => {
                let command = command.as_ref().map(|c| c.to_string_lossy().into_owned());
                commands::cmd_hook_after(session, command, *numbered)
            }
            HookEvent::End => commands::cmd_hook_end(session),
        },
        Commands::Enable => commands::cmd_set_enabled(session, true),
        Commands::Disable => commands::cmd_set_enabled(session, false),
        Commands::Status => commands::cmd_status(session),
        Commands::Ignore { rule } => commands::cmd_ignore(session, rule),
        Commands::List { json } => commands::cmd_list(*json),
        Commands::Show { index } => commands::cmd_show(*index),
    };
    std::process::exit(exit_code);
}
