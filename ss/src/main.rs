use chrono::{Local, TimeZone};
use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use sessionstore::cli::{Cli, Command};
use sessionstore::{LockStore, SessionStore, Turn};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
    Ok(())
}

fn format_ms(ms: i64) -> String {
    Local
        .timestamp_millis_opt(ms)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn print_turn(turn: &Turn) {
    println!(
        "{} {} {} {}",
        format!("Turn {}", turn.turn_number).bold(),
        format!("[{}]", turn.mode).dimmed(),
        format!("${:.4}", turn.total_cost.usd).yellow(),
        format!("{:.1}s", turn.elapsed_seconds).dimmed()
    );
    println!("  {} {}", "Q:".cyan(), turn.prompt);

    if let Some(response) = &turn.response {
        println!("  {} {}", "A:".cyan(), response);
    }
    if let Some(perspectives) = &turn.perspectives {
        for p in perspectives {
            let label = if p.failed { p.perspective.red() } else { p.perspective.green() };
            println!("  {} {}", "-".dimmed(), label);
        }
    }
    if let Some(synthesis) = &turn.synthesis {
        println!("  {} {}", "Synthesis:".cyan(), synthesis);
    }
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let dir = cli.sessions_dir();
    let store = SessionStore::open(&dir).context(format!("Failed to open session store at {}", dir.display()))?;

    info!("sessionstore starting in {}", dir.display());

    match cli.command {
        Command::List { json } => {
            let summaries = store.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else if summaries.is_empty() {
                println!("No sessions found");
            } else {
                for s in summaries {
                    let marker = if s.has_error { " !".red().to_string() } else { String::new() };
                    println!(
                        "{}{}  {} turns  {}  {}  {}",
                        s.session_name.cyan(),
                        marker,
                        s.turn_count,
                        format!("${:.4}", s.total_cost.usd).yellow(),
                        format_ms(s.updated_at).dimmed(),
                        s.last_prompt
                    );
                }
            }
        }
        Command::Show { name, json } => {
            let session = store.load(&name)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&session)?);
            } else {
                println!("Session: {}", session.session_name.cyan());
                println!("  Created: {}", format_ms(session.created_at));
                println!("  Updated: {}", format_ms(session.updated_at));
                println!("  Total cost: ${:.4}", session.total_cost.usd);
                if let Some(err) = &session.error {
                    println!("  {} turn {}: {}", "Error".red(), err.turn_number, err.message);
                }
                println!();
                for turn in &session.turns {
                    print_turn(turn);
                    println!();
                }
            }
        }
        Command::Rename { old, new } => {
            store.rename(&old, &new)?;
            println!("{} Renamed {} -> {}", "✓".green(), old, new.cyan());
        }
        Command::Delete { name } => {
            store.delete(&name)?;
            println!("{} Deleted session: {}", "✓".green(), name);
        }
        Command::Locks => {
            let records = LockStore::new(&dir).list()?;
            if records.is_empty() {
                println!("No in-flight sessions");
            } else {
                for r in records {
                    let state = if r.is_expired() { "expired".red() } else { "held".green() };
                    println!(
                        "{}  {}  {}  heartbeat {}",
                        r.session_name.cyan(),
                        state,
                        r.holder.dimmed(),
                        format_ms(r.heartbeat_at)
                    );
                }
            }
        }
    }

    Ok(())
}
