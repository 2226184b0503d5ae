//! `mirador state`: what each instance shows and whether it is reserved.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use mirador_core::{store, Instance, InstanceId, PreviewState};

/// Arguments for `mirador state`.
#[derive(Args, Debug)]
pub struct StateArgs {
    /// Only show this instance.
    pub instance: Option<u32>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StateJson {
    instance: Instance,
    state: Option<PreviewState>,
    available: bool,
}

#[derive(Tabled)]
struct StateTableRow {
    #[tabled(rename = "instance")]
    instance: String,
    #[tabled(rename = "port")]
    port: u16,
    #[tabled(rename = "showing")]
    showing: String,
    #[tabled(rename = "flags")]
    flags: String,
    #[tabled(rename = "pull request")]
    pull_request: String,
    #[tabled(rename = "available")]
    available: String,
}

impl StateArgs {
    pub fn run(self) -> Result<()> {
        let home = crate::home_dir()?;
        let mut instances =
            store::list_instances_at(&home).context("failed to read instance definitions")?;
        if let Some(id) = self.instance {
            instances.retain(|instance| instance.id == InstanceId(id));
            if instances.is_empty() {
                anyhow::bail!("instance {id} is not registered");
            }
        }

        let now = Utc::now();
        let mut rows = Vec::with_capacity(instances.len());
        for instance in instances {
            let state = store::load_preview_at(&home, instance.id)
                .with_context(|| format!("failed to read preview state of instance {}", instance.id))?;
            let available = state.as_ref().map_or(true, |s| s.is_available(now));
            rows.push(StateJson {
                instance,
                state,
                available,
            });
        }

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to serialize state JSON")?
            );
            return Ok(());
        }

        print_table(rows, now);
        Ok(())
    }
}

fn print_table(rows: Vec<StateJson>, now: DateTime<Utc>) {
    if rows.is_empty() {
        println!("No instances registered.");
        return;
    }

    let table_rows: Vec<StateTableRow> = rows
        .into_iter()
        .map(|row| {
            let (showing, flags, pull_request) = match &row.state {
                Some(state) => (
                    format!("{}:{}", state.namespace, state.git_ref),
                    flag_label(state),
                    state
                        .pull_request
                        .map(|pr| format!("#{}", pr.number))
                        .unwrap_or_else(|| "-".to_string()),
                ),
                None => ("-".to_string(), "-".to_string(), "-".to_string()),
            };
            StateTableRow {
                instance: row.instance.id.to_string(),
                port: row.instance.port,
                showing,
                flags,
                pull_request,
                available: availability(row.state.as_ref(), now),
            }
        })
        .collect();

    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn flag_label(state: &PreviewState) -> String {
    let mut flags = Vec::new();
    if state.redate_news {
        flags.push("redate");
    }
    if state.merge_master {
        flags.push("master");
    }
    if flags.is_empty() {
        "-".to_string()
    } else {
        flags.join(",")
    }
}

fn availability(state: Option<&PreviewState>, now: DateTime<Utc>) -> String {
    match state {
        Some(state) if !state.is_available(now) => {
            let minutes = (state.available_at - now).num_minutes();
            format!("reserved {minutes}m").yellow().to_string()
        }
        _ => "free".green().to_string(),
    }
}
