//! `mirador diff <from> <to>`: changed content files between two revisions
//! of the shared clone, computed locally without the daemon.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use mirador_core::config;
use mirador_sync::{HttpSiteHook, Switcher};

/// Arguments for `mirador diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Base revision (branch, remote-tracking ref, or commit id).
    pub from: String,

    /// Revision to compare against the base.
    pub to: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let home = crate::home_dir()?;
        let settings = config::load_at(&home).context("failed to read config")?;
        let hook = Arc::new(HttpSiteHook::from_settings(&settings));
        let switcher = Switcher::from_settings(&settings, hook).with_context(|| {
            format!(
                "failed to open clone at {}; run `mirador init` first",
                settings.repository_path.display()
            )
        })?;

        let entries = switcher
            .diff(&self.from, &self.to)
            .with_context(|| format!("diff {}..{} failed", self.from, self.to))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&entries).context("failed to serialize diff JSON")?
            );
            return Ok(());
        }

        if entries.is_empty() {
            println!("No content changes.");
            return Ok(());
        }
        for entry in &entries {
            let label = entry.change_type.to_string();
            let path = if entry.is_news() {
                entry.path.cyan().to_string()
            } else {
                entry.path.clone()
            };
            println!("{label:<10} {path}");
        }
        Ok(())
    }
}
