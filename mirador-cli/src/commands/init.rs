//! `mirador init --repo <path> [--template ...] [--repository ...] [--ssh-key ...]`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use mirador_core::config;

/// Point Mirador at the shared working clone.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Path to the shared clone of the content repository.
    #[arg(long)]
    pub repo: PathBuf,

    /// Remote URL pattern; `{namespace}` and `{repository}` are substituted.
    #[arg(long)]
    pub template: Option<String>,

    /// Repository name every fork shares.
    #[arg(long)]
    pub repository: Option<String>,

    /// SSH private key used for fetch and push.
    #[arg(long)]
    pub ssh_key: Option<PathBuf>,

    /// Host the preview sites listen on.
    #[arg(long)]
    pub site_host: Option<String>,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = crate::home_dir()?;
        let repo = self
            .repo
            .canonicalize()
            .with_context(|| format!("cannot resolve path '{}'", self.repo.display()))?;

        let mut settings = config::load_at(&home).context("failed to read existing config")?;
        settings.repository_path = repo;
        if let Some(template) = self.template {
            settings.remote_url_template = template;
        }
        if let Some(repository) = self.repository {
            settings.repository = repository;
        }
        if let Some(key) = self.ssh_key {
            settings.ssh_key = Some(key);
        }
        if let Some(host) = self.site_host {
            settings.site_host = host;
        }
        config::save_at(&home, &settings).context("failed to write config")?;

        println!(
            "✓ Using clone at {}",
            settings.repository_path.display()
        );
        println!(
            "  Saved to: {}",
            config::settings_path_at(&home).display()
        );
        Ok(())
    }
}
