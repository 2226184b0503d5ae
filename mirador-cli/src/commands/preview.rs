//! Preview commands forwarded to the daemon: `switch`, `switch-any`,
//! `refresh`, `news`, `flags`, `link`, `release`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;

use mirador_core::{InstanceId, PreviewState, PullRequestRef};
use mirador_daemon::{
    request_flags, request_link, request_news, request_refresh, request_release, request_switch,
    request_switch_any, DaemonError,
};
use mirador_sync::{NewsPost, NotifyStatus, SwitchReport, SwitchRequest};

#[derive(Args, Debug)]
pub struct SwitchArgs {
    /// Instance to switch.
    pub instance: u32,

    /// Fork owner, or the upstream remote name.
    pub namespace: String,

    /// Branch name or commit id inside the namespace.
    pub git_ref: String,

    /// Merge upstream master into the target before publishing.
    #[arg(long)]
    pub merge_master: bool,
}

impl SwitchArgs {
    pub fn run(self) -> Result<()> {
        let home = crate::home_dir()?;
        let request = SwitchRequest::new(self.namespace, self.git_ref, self.merge_master);
        let data = request_switch(&home, InstanceId(self.instance), &request)
            .map_err(|err| daemon_failure(err, "switch failed"))?;
        print_report(data)
    }
}

#[derive(Args, Debug)]
pub struct SwitchAnyArgs {
    /// Fork owner, or the upstream remote name.
    pub namespace: String,

    /// Branch name or commit id inside the namespace.
    pub git_ref: String,

    /// Merge upstream master into the target before publishing.
    #[arg(long)]
    pub merge_master: bool,
}

impl SwitchAnyArgs {
    pub fn run(self) -> Result<()> {
        let home = crate::home_dir()?;
        let request = SwitchRequest::new(self.namespace, self.git_ref, self.merge_master);
        let data = request_switch_any(&home, &request)
            .map_err(|err| daemon_failure(err, "switch failed"))?;
        print_report(data)
    }
}

#[derive(Args, Debug)]
pub struct InstanceArg {
    /// Instance id.
    pub instance: u32,
}

pub fn refresh(args: InstanceArg) -> Result<()> {
    let home = crate::home_dir()?;
    let data = request_refresh(&home, InstanceId(args.instance))
        .map_err(|err| daemon_failure(err, "refresh failed"))?;
    print_report(data)
}

pub fn release(args: InstanceArg) -> Result<()> {
    let home = crate::home_dir()?;
    let data = request_release(&home, InstanceId(args.instance))
        .map_err(|err| daemon_failure(err, "release failed"))?;
    let state = parse_state(data)?;
    println!(
        "✓ Instance {} released ({}:{})",
        args.instance, state.namespace, state.git_ref
    );
    Ok(())
}

#[derive(Args, Debug)]
pub struct NewsArgs {
    /// Instance to show the post on.
    pub instance: u32,

    /// Four-digit year directory under `news/`.
    #[arg(long)]
    pub year: String,

    /// File name of the post, ending in `.md`.
    #[arg(long = "file")]
    pub filename: String,

    /// Local file holding the post body.
    #[arg(long)]
    pub content_file: PathBuf,
}

impl NewsArgs {
    pub fn run(self) -> Result<()> {
        let content = std::fs::read_to_string(&self.content_file)
            .with_context(|| format!("failed to read {}", self.content_file.display()))?;
        let post = NewsPost::new(content, self.year, self.filename);
        post.validate()?;

        let home = crate::home_dir()?;
        let data = request_news(&home, InstanceId(self.instance), &post)
            .map_err(|err| daemon_failure(err, "news preview failed"))?;
        print_report(data)
    }
}

#[derive(Args, Debug)]
pub struct FlagsArgs {
    /// Instance id.
    pub instance: u32,

    /// Re-date news posts to today when the site renders them.
    #[arg(long)]
    pub redate: Option<bool>,

    /// Merge upstream master on the next refresh.
    #[arg(long)]
    pub master: Option<bool>,
}

impl FlagsArgs {
    pub fn run(self) -> Result<()> {
        if self.redate.is_none() && self.master.is_none() {
            bail!("nothing to change: pass --redate and/or --master");
        }
        let home = crate::home_dir()?;
        let data = request_flags(&home, InstanceId(self.instance), self.redate, self.master)
            .map_err(|err| daemon_failure(err, "flag update failed"))?;
        let state = parse_state(data)?;
        println!(
            "✓ Instance {}: redate={} master={}",
            self.instance, state.redate_news, state.merge_master
        );
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Instance id.
    pub instance: u32,

    /// Pull request id; omit together with --number to clear the link.
    #[arg(long, requires = "number")]
    pub id: Option<u64>,

    /// Pull request number.
    #[arg(long, requires = "id")]
    pub number: Option<u64>,
}

impl LinkArgs {
    pub fn run(self) -> Result<()> {
        let pull_request = match (self.id, self.number) {
            (Some(id), Some(number)) => Some(PullRequestRef { id, number }),
            _ => None,
        };
        let home = crate::home_dir()?;
        let data = request_link(&home, InstanceId(self.instance), pull_request)
            .map_err(|err| daemon_failure(err, "link update failed"))?;
        let state = parse_state(data)?;
        match state.pull_request {
            Some(pr) => println!("✓ Instance {} linked to #{}", self.instance, pr.number),
            None => println!("✓ Instance {} unlinked", self.instance),
        }
        Ok(())
    }
}

fn daemon_failure(err: DaemonError, what: &str) -> anyhow::Error {
    match err {
        DaemonError::DaemonNotRunning { .. } => {
            anyhow::anyhow!("{what}: daemon is not running (start it with `mirador daemon start`)")
        }
        other => anyhow::Error::new(other).context(what.to_string()),
    }
}

fn parse_state(data: Value) -> Result<PreviewState> {
    serde_json::from_value(data).context("daemon returned an unexpected preview state")
}

fn print_report(data: Value) -> Result<()> {
    let report: SwitchReport =
        serde_json::from_value(data).context("daemon returned an unexpected switch report")?;
    let result = &report.outcome.result;

    println!(
        "{} instance {} → {}:{} ({})",
        "✓".green().bold(),
        report.instance,
        report.state.namespace,
        report.state.git_ref,
        result.new_head.short()
    );
    if result.diff.is_empty() {
        println!("  no content changes against master");
    } else {
        for entry in &result.diff {
            println!("  {:<8} {}", entry.change_type.to_string(), entry.path);
        }
    }
    print_notify("wiki", &report.outcome.wiki);
    if let Some(news) = &report.outcome.news {
        print_notify("news", news);
    }
    Ok(())
}

fn print_notify(target: &str, status: &NotifyStatus) {
    match status {
        NotifyStatus::Delivered => {}
        NotifyStatus::Failed { reason } => println!(
            "  {} {target} notification failed: {reason}",
            "!".yellow().bold()
        ),
        NotifyStatus::Skipped => println!(
            "  {} {target} notification skipped",
            "!".yellow().bold()
        ),
    }
}
