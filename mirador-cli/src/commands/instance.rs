//! `mirador instance add` and `mirador instance list`

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use mirador_core::{store, Instance, InstanceId};

/// Manage preview instance definitions.
#[derive(Subcommand, Debug)]
pub enum InstanceCommand {
    /// Register a new preview instance.
    Add(AddArgs),

    /// List registered instances.
    List {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Numeric instance id; its sync branch is `sync-<id>`.
    pub id: u32,

    /// Port the instance's site listens on.
    #[arg(long)]
    pub port: u16,

    /// Chat channel that controls the instance.
    #[arg(long)]
    pub channel: String,
}

pub fn run(cmd: InstanceCommand) -> Result<()> {
    let home = crate::home_dir()?;
    match cmd {
        InstanceCommand::Add(args) => {
            let instance = Instance {
                id: InstanceId(args.id),
                control_channel: args.channel,
                port: args.port,
            };
            store::add_instance_at(&home, &instance)
                .with_context(|| format!("failed to add instance {}", instance.id))?;
            println!(
                "✓ Added instance {} (port {}, channel {})",
                instance.id, instance.port, instance.control_channel
            );
            Ok(())
        }
        InstanceCommand::List { json } => {
            let instances =
                store::list_instances_at(&home).context("failed to read instance definitions")?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&instances)
                        .context("failed to serialize instances")?
                );
                return Ok(());
            }
            if instances.is_empty() {
                println!("No instances registered.");
                println!("Run: mirador instance add <id> --port <port> --channel <channel>");
                return Ok(());
            }
            for instance in &instances {
                println!(
                    "  {}  port {}  channel {}",
                    instance.id, instance.port, instance.control_channel
                );
            }
            Ok(())
        }
    }
}
