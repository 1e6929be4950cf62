//! leaseq CLI: operator interface to a Postgres-backed queue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use leaseq::config::Config;
use leaseq::db::Db;
use leaseq::engine::Maintenance;
use leaseq::model::{MessageId, NewMessage};
use leaseq::queue::MessageQueue;
use leaseq::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;

#[derive(Parser)]
#[command(name = "leaseq", about = "Lease-based at-least-once message queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply database migrations
    Migrate,
    /// Enqueue a message
    Enqueue {
        /// Target queue
        queue: String,
        /// Message type tag
        message_type: String,
        /// Opaque payload, stored verbatim
        payload: String,
        /// Priority (higher = served first)
        #[arg(long, default_value_t = 0)]
        priority: i32,
        /// Retry budget (defaults to the configured value)
        #[arg(long)]
        max_retries: Option<u32>,
        /// Not claimable before this RFC 3339 instant
        #[arg(long)]
        scheduled_for: Option<DateTime<Utc>>,
        /// Not claimable at or after this RFC 3339 instant
        #[arg(long)]
        expires_at: Option<DateTime<Utc>>,
        #[arg(long)]
        correlation_id: Option<String>,
        /// Tenant code
        #[arg(long)]
        organization: Option<String>,
        #[arg(long)]
        created_by: Option<String>,
    },
    /// Show a message
    Show {
        /// Message ID (full UUID)
        id: MessageId,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Count pending messages in a queue
    Count { queue: String },
    /// Message counts per status for a queue
    Stats { queue: String },
    /// Cancel a pending message
    Cancel { id: MessageId },
    /// List dead-lettered messages, newest first
    DeadLetters {
        /// Filter by queue
        #[arg(long)]
        queue: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Return stuck leases to pending
    Reap {
        /// Lease age in seconds (defaults to the configured stuck timeout)
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Delete completed messages past retention
    Cleanup {
        /// Retention in days (defaults to the configured value)
        #[arg(long)]
        retention_days: Option<u64>,
    },
    /// Run the reaper and sweeper periodically until ctrl-c
    Maintain,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    let _guard = init_telemetry(TelemetryConfig::from_config(&config, "leaseq"))?;

    let db = Db::connect_with(
        config.database_url.expose_secret(),
        config.settings.max_connections,
    )
    .await?;
    if let Command::Migrate = cli.command {
        db.migrate().await?;
        println!("Migrations applied.");
        return Ok(());
    }

    let queue = MessageQueue::new(Arc::new(db)).with_settings(&config.settings);

    match cli.command {
        Command::Migrate => Ok(()),
        Command::Enqueue {
            queue: queue_name,
            message_type,
            payload,
            priority,
            max_retries,
            scheduled_for,
            expires_at,
            correlation_id,
            organization,
            created_by,
        } => {
            let mut new = NewMessage::new(queue_name, message_type, payload).priority(priority);
            if let Some(n) = max_retries {
                new = new.max_retries(n);
            }
            if let Some(at) = scheduled_for {
                new = new.scheduled_for(at);
            }
            if let Some(at) = expires_at {
                new = new.expires_at(at);
            }
            if let Some(id) = correlation_id {
                new = new.correlation_id(id);
            }
            if let Some(code) = organization {
                new = new.organization(code);
            }
            if let Some(who) = created_by {
                new = new.created_by(who);
            }

            let message = queue.enqueue(new).await?;
            println!("Enqueued: {} (queue: {})", message.id, message.queue_name);
            Ok(())
        }
        Command::Show { id, json } => cmd_show(&queue, id, json).await,
        Command::Count { queue: queue_name } => {
            println!("{}", queue.get_pending_count(&queue_name).await?);
            Ok(())
        }
        Command::Stats { queue: queue_name } => {
            let stats = queue.stats(&queue_name).await?;
            println!("Pending:     {}", stats.pending);
            println!("Processing:  {}", stats.processing);
            println!("Completed:   {}", stats.completed);
            println!("Failed:      {}", stats.failed);
            println!("Dead Letter: {}", stats.dead_letter);
            println!("Cancelled:   {}", stats.cancelled);
            println!("Total:       {}", stats.total());
            Ok(())
        }
        Command::Cancel { id } => {
            let message = queue.cancel(id).await?;
            println!("Cancelled: {} (status: {})", message.id, message.status);
            Ok(())
        }
        Command::DeadLetters {
            queue: queue_name,
            limit,
        } => cmd_dead_letters(&queue, queue_name, limit).await,
        Command::Reap { timeout_secs } => {
            let timeout = timeout_secs
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| config.settings.stuck_timeout());
            let reclaimed = queue.reset_stuck_messages(timeout).await?;
            for id in &reclaimed {
                println!("{id}");
            }
            println!("{} lease(s) reclaimed", reclaimed.len());
            Ok(())
        }
        Command::Cleanup { retention_days } => {
            let retention = retention_days
                .map(|days| std::time::Duration::from_secs(days.saturating_mul(24 * 60 * 60)))
                .unwrap_or_else(|| config.settings.retention());
            let deleted = queue.cleanup_old_messages(retention).await?;
            println!("{deleted} completed message(s) deleted");
            Ok(())
        }
        Command::Maintain => {
            let maintenance = Maintenance::new(queue, config.settings.maintenance_config());

            let handle = maintenance.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                handle.shutdown();
            });

            maintenance.run().await?;
            Ok(())
        }
    }
}

async fn cmd_show(queue: &MessageQueue<Db>, id: MessageId, json: bool) -> anyhow::Result<()> {
    let message = queue.get(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&message)?);
        return Ok(());
    }

    println!("ID:          {}", message.id);
    println!("Queue:       {}", message.queue_name);
    println!("Type:        {}", message.message_type);
    println!("Status:      {}", message.status);
    println!("Priority:    {}", message.priority);
    println!("Retries:     {}/{}", message.retry_count, message.max_retries);
    println!("Correlation: {}", message.correlation_id);
    println!("Org:         {}", message.organization_code);
    println!("Created:     {}", message.created_at);
    if let Some(by) = &message.created_by {
        println!("Created By:  {by}");
    }
    if let Some(at) = message.scheduled_for {
        println!("Scheduled:   {at}");
    }
    if let Some(at) = message.expires_at {
        println!("Expires:     {at}");
    }
    if let Some(at) = message.processed_at {
        println!("Processed:   {at}");
    }
    if let Some(err) = &message.error_message {
        println!("Error:       {err}");
    }
    println!("Payload:     {}", message.payload);
    Ok(())
}

async fn cmd_dead_letters(
    queue: &MessageQueue<Db>,
    queue_name: Option<String>,
    limit: u32,
) -> anyhow::Result<()> {
    let entries = queue.list_dead_letters(queue_name.as_deref(), limit).await?;

    if entries.is_empty() {
        println!("No dead-lettered messages.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<16}  {:<16}  {:<7}  FAILED",
        "MESSAGE", "QUEUE", "TYPE", "RETRIES"
    );
    println!("{}", "-".repeat(100));

    for entry in &entries {
        println!(
            "{:<36}  {:<16}  {:<16}  {:<7}  {}",
            entry.original_message_id,
            entry.queue_name,
            entry.message_type,
            entry.retry_count,
            entry.failed_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} entry(ies)", entries.len());
    Ok(())
}
