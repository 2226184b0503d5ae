//! Mirador: preview instance switching CLI.
//!
//! # Usage
//!
//! ```text
//! mirador init --repo <path> [--template <url>] [--repository <name>] [--ssh-key <path>]
//! mirador instance add <id> --port <port> --channel <channel>
//! mirador instance list [--json]
//! mirador switch <instance> <namespace> <ref> [--merge-master]
//! mirador switch-any <namespace> <ref> [--merge-master]
//! mirador refresh <instance>
//! mirador news <instance> --year <yyyy> --file <name.md> --content-file <path>
//! mirador flags <instance> [--redate true|false] [--master true|false]
//! mirador link <instance> [--id <id> --number <n>]
//! mirador release <instance>
//! mirador state [<instance>] [--json]
//! mirador diff <from> <to> [--json]
//! mirador daemon start|stop|status
//! ```

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand,
    diff::DiffArgs,
    init::InitArgs,
    instance::InstanceCommand,
    preview::{FlagsArgs, InstanceArg, LinkArgs, NewsArgs, SwitchAnyArgs, SwitchArgs},
    state::StateArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "mirador",
    version,
    about = "Switch preview instances between branches of content forks",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write ~/.mirador/config.yaml pointing at the shared clone.
    Init(InitArgs),

    /// Manage preview instance definitions.
    Instance {
        #[command(subcommand)]
        command: InstanceCommand,
    },

    /// Show a fork's ref on an instance.
    Switch(SwitchArgs),

    /// Show a fork's ref on the first free instance.
    SwitchAny(SwitchAnyArgs),

    /// Re-apply what an instance currently shows.
    Refresh(InstanceArg),

    /// Preview a news post on top of upstream master.
    News(NewsArgs),

    /// Change the stored flags of an instance.
    Flags(FlagsArgs),

    /// Attach (or clear) the pull request an instance is previewing.
    Link(LinkArgs),

    /// Give an instance back for automatic reuse.
    Release(InstanceArg),

    /// Show what each instance shows and whether it is reserved.
    State(StateArgs),

    /// List changed content files between two revisions of the shared clone.
    Diff(DiffArgs),

    /// Run or query the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Instance { command } => commands::instance::run(command),
        Commands::Switch(args) => args.run(),
        Commands::SwitchAny(args) => args.run(),
        Commands::Refresh(args) => commands::preview::refresh(args),
        Commands::News(args) => args.run(),
        Commands::Flags(args) => args.run(),
        Commands::Link(args) => args.run(),
        Commands::Release(args) => commands::preview::release(args),
        Commands::State(args) => args.run(),
        Commands::Diff(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}

pub(crate) fn home_dir() -> Result<std::path::PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}
