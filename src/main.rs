use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};

use logwarden_backends::{AnalysisStore, SqliteStore};
use logwarden_report::{ReportGenerator, SendOutcome, render_html};
use logwarden_types::{AnalysisId, Frequency, ReportSchedule, TimeOfDay};

mod app;
mod config;

use config::Config;

/// Logwarden - tails system logs, analyses error lines and mails scheduled reports
#[derive(Parser, Debug)]
#[command(name = "logwarden")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "logwarden.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the tailer, analysis worker, live server and report scheduler (default)
    Run,

    /// Check whether the scheduled report is due and send it
    Report {
        /// Ignore the configured time and day (the refractory window still applies)
        #[arg(long)]
        force: bool,

        /// Render the report without mailing it
        #[arg(long, conflicts_with = "force")]
        preview: bool,

        /// Where to write the preview (stdout when omitted)
        #[arg(long, requires = "preview")]
        output: Option<PathBuf>,
    },

    /// Show or change the report schedule
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Print one stored analysis as JSON
    Analysis {
        id: i64,
    },

    /// List recent analyses
    Logs {
        /// Only modules containing this text
        #[arg(long)]
        module: Option<String>,

        #[arg(long, default_value = "20")]
        limit: u32,
    },
}

#[derive(Subcommand, Debug)]
enum ScheduleAction {
    Show,

    Set {
        #[arg(long, value_parser = parse_recipient)]
        email: String,

        /// hourly, daily, weekly (Sundays) or monthly (the 1st)
        #[arg(long, default_value = "daily")]
        frequency: Frequency,

        /// HH:MM, local time
        #[arg(long, default_value = "09:00")]
        time: TimeOfDay,

        /// Sample lines per module
        #[arg(long, default_value = "3")]
        samples: u32,
    },
}

/// A single mail address with no whitespace or control characters
fn parse_recipient(value: &str) -> std::result::Result<String, String> {
    let value = value.trim();
    if value.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err("must not contain whitespace or control characters".to_string());
    }
    match value.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(value.to_string()),
        _ => Err(format!("'{}' is not a mail address", value)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(&args.config)?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => app::run_daemon(config).await,
        Command::Report {
            force: _,
            preview: true,
            output,
        } => preview_report(&config, output).await,
        Command::Report { force, .. } => send_report(&config, force).await,
        Command::Schedule { action } => schedule(&config, action).await,
        Command::Analysis { id } => show_analysis(&config, id).await,
        Command::Logs { module, limit } => list_logs(&config, module, limit).await,
    }
}

fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    Ok(Arc::new(SqliteStore::new(app::open_database(config)?)))
}

async fn send_report(config: &Config, force: bool) -> Result<()> {
    let scheduler = app::build_scheduler(config, open_store(config)?);
    match scheduler.check_and_send(force).await? {
        SendOutcome::Sent {
            message_id,
            report_path,
        } => println!("Sent {} (saved to {})", message_id, report_path.display()),
        SendOutcome::RecentlySent => println!("A report for this frequency was sent recently"),
        SendOutcome::NotDue => println!("Not due yet; use --force to send now"),
        SendOutcome::NoSchedule => println!("No report schedule with a recipient is configured"),
    }
    Ok(())
}

async fn preview_report(config: &Config, output: Option<PathBuf>) -> Result<()> {
    let store = open_store(config)?;
    let schedule = store.get_schedule().await?.unwrap_or_default();
    let now = Local::now();

    let report = ReportGenerator::new(store)
        .generate(schedule.frequency, schedule.samples_per_module, &now)
        .await?;
    let html = render_html(&report, Utc::now());

    match output {
        Some(path) => {
            std::fs::write(&path, html).with_context(|| format!("writing {}", path.display()))?;
            println!(
                "Wrote {} report ({} errors in {} modules) to {}",
                schedule.frequency,
                report.total(),
                report.modules.len(),
                path.display()
            );
        }
        None => print!("{}", html),
    }
    Ok(())
}

async fn schedule(config: &Config, action: ScheduleAction) -> Result<()> {
    let store = open_store(config)?;
    match action {
        ScheduleAction::Show => {
            let Some(schedule) = store.get_schedule().await? else {
                println!("No report schedule configured");
                return Ok(());
            };
            println!("email:     {}", schedule.email);
            println!("frequency: {}", schedule.frequency);
            println!("time:      {}", schedule.time_of_day);
            println!("samples:   {}", schedule.samples_per_module);

            let ledger = logwarden_report::SendLedger::new(config.reports.ledger_path());
            match ledger.last_sent(schedule.frequency).await {
                Some(record) => println!(
                    "last sent: {}{}",
                    record.last_sent_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                    if record.blocks_at(Utc::now()) {
                        " (within refractory window)"
                    } else {
                        ""
                    }
                ),
                None => println!("last sent: never"),
            }
        }
        ScheduleAction::Set {
            email,
            frequency,
            time,
            samples,
        } => {
            let schedule = ReportSchedule {
                email,
                frequency,
                time_of_day: time,
                samples_per_module: samples,
            };
            store.upsert_schedule(schedule.clone()).await?;
            println!(
                "Saved: {} report at {} to {}. A running daemon picks this up on its next watchdog check.",
                schedule.frequency, schedule.time_of_day, schedule.email
            );
        }
    }
    Ok(())
}

async fn show_analysis(config: &Config, id: i64) -> Result<()> {
    let store = open_store(config)?;
    let record = store
        .find_analysis_by_id(AnalysisId(id))
        .await?
        .with_context(|| format!("no analysis with id {}", id))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn list_logs(config: &Config, module: Option<String>, limit: u32) -> Result<()> {
    let store = open_store(config)?;
    let total = store.count_analyses().await?;
    let records = store.list_recent(module, limit).await?;

    for record in &records {
        println!(
            "{:>6}  {}  {:<13}  {:<8}  {}",
            record.id.0,
            record.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            record.module,
            record.origin.as_str(),
            record.log_message
        );
    }
    println!("{} of {} analyses", records.len(), total);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_recipient() {
        assert_eq!(parse_recipient(" ops@example.com ").unwrap(), "ops@example.com");
        assert!(parse_recipient("ops@example.com\r\nBcc: x@example.net").is_err());
        assert!(parse_recipient("ops@example.com\n").is_ok());
        assert!(parse_recipient("ops").is_err());
        assert!(parse_recipient("@example.com").is_err());
    }

    #[test]
    fn test_schedule_set_rejects_header_injection() {
        let args = Args::try_parse_from([
            "logwarden",
            "schedule",
            "set",
            "--email",
            "ops@example.com\r\nBcc: attacker@example.net",
        ]);
        assert!(args.is_err());

        let args =
            Args::try_parse_from(["logwarden", "schedule", "set", "--email", "ops@example.com"])
                .unwrap();
        assert!(matches!(
            args.command,
            Some(Command::Schedule {
                action: ScheduleAction::Set { ref email, .. }
            }) if email == "ops@example.com"
        ));
    }
}
