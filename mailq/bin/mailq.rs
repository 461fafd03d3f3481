//! Command-line front end for the mailq delivery queue
//!
//! Meant to be run from cron (`mailq send`) or as a long-lived service
//! (`mailq serve`).

use std::{
    path::PathBuf,
    time::{Duration, SystemTime},
};

use clap::{Parser, Subcommand};
use mailq::{Mailq, config};
use mailq_common::{Message, Priority, logging};
use mailq_delivery::DrainOutcome;
use mailq_spool::QueuedMessageId;
use tokio::io::AsyncReadExt;

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

/// Store-and-forward email delivery queue
#[derive(Parser, Debug)]
#[command(name = "mailq")]
#[command(about = "Queue and deliver email", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to $MAILQ_CONFIG, ./mailq.config.ron,
    /// then /etc/mailq/mailq.config.ron)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one drain pass and exit
    Send,
    /// Drain on an interval until interrupted
    Serve,
    /// Add a message to the queue
    Enqueue {
        /// Envelope sender
        #[arg(long)]
        from: String,

        /// Envelope recipient (repeatable)
        #[arg(long, required = true)]
        to: Vec<String>,

        #[arg(long, default_value = "")]
        subject: String,

        /// low, medium, high or a number
        #[arg(long, default_value = "medium")]
        priority: Priority,

        /// File holding the encoded message; read from stdin when omitted
        #[arg(long)]
        body_file: Option<PathBuf>,
    },
    /// Make deferred messages eligible straight away
    RetryDeferred {
        /// Only release messages deferred fewer times than this
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// Show queued messages
    List {
        /// Show permanently failed messages instead
        #[arg(long)]
        failed: bool,
    },
    /// Move a failed message back onto the queue
    Requeue {
        /// Message ID to requeue
        message_id: QueuedMessageId,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => config::find_config_file()?,
    };
    let mailq: Mailq = config::load(&config_path)?;

    logging::init();

    match cli.command {
        Commands::Send => match mailq.send().await? {
            DrainOutcome::Completed(summary) => println!("{summary}"),
            DrainOutcome::AlreadyLocked | DrainOutcome::LockTimedOut => {}
        },
        Commands::Serve => mailq.serve().await?,
        Commands::Enqueue {
            from,
            to,
            subject,
            priority,
            body_file,
        } => {
            let body = match body_file {
                Some(path) => tokio::fs::read(&path).await.map_err(|e| {
                    anyhow::anyhow!("Failed to read message body from {}: {e}", path.display())
                })?,
                None => {
                    let mut body = Vec::new();
                    tokio::io::stdin().read_to_end(&mut body).await?;
                    body
                }
            };

            let id = mailq
                .enqueue(Message::new(from, to, subject, body), priority)
                .await?;
            println!("{id}");
        }
        Commands::RetryDeferred { max_retries } => {
            let count = mailq.retry_deferred(max_retries).await?;
            println!("{count} message(s) queued for retry");
        }
        Commands::List { failed: false } => cmd_list(&mailq).await?,
        Commands::List { failed: true } => cmd_list_failed(&mailq).await?,
        Commands::Requeue { message_id } => {
            mailq.requeue(&message_id).await?;
            println!("Requeued {message_id}");
        }
    }

    Ok(())
}

async fn cmd_list(mailq: &Mailq) -> anyhow::Result<()> {
    let queue = mailq.list_queue().await?;
    let now = SystemTime::now();

    println!(
        "{:<28} {:<8} {:<8} {:<12} {:<12} SUBJECT",
        "MESSAGE ID", "PRIORITY", "RETRIES", "AGE", "NEXT"
    );
    println!("{}", "-".repeat(90));

    for entry in &queue {
        let next = entry
            .deferred_until
            .and_then(|until| until.duration_since(now).ok())
            .map_or_else(|| String::from("now"), |wait| format!("in {}", format_duration(wait)));

        println!(
            "{:<28} {:<8} {:<8} {:<12} {:<12} {}",
            entry.id.to_string(),
            entry.priority.to_string(),
            entry.retries,
            format_age(entry.queued_at, now),
            next,
            entry.message.subject
        );
        if let Some(error) = &entry.last_error {
            println!("{:<28} last error: {error}", "");
        }
    }

    println!("\nTotal: {} message(s)", queue.len());
    Ok(())
}

async fn cmd_list_failed(mailq: &Mailq) -> anyhow::Result<()> {
    let failed = mailq.list_failed().await?;
    let now = SystemTime::now();

    println!("{:<28} {:<12} {:<30} ERROR", "MESSAGE ID", "FAILED", "TO");
    println!("{}", "-".repeat(90));

    for record in &failed {
        println!(
            "{:<28} {:<12} {:<30} {}",
            record.id().to_string(),
            format_age(record.failed_at, now),
            record.entry.message.recipients(),
            record.error().unwrap_or("-")
        );
    }

    println!("\nTotal: {} message(s)", failed.len());
    Ok(())
}

fn format_age(then: SystemTime, now: SystemTime) -> String {
    format!("{} ago", format_duration(now.duration_since(then).unwrap_or_default()))
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m {}s", secs / 60, secs % 60),
        3600..86400 => format!("{}h {}m", secs / 3600, (secs % 3600) / 60),
        _ => format!("{}d {}h", secs / 86400, (secs % 86400) / 3600),
    }
}
