//! Command-line utility for operating a courier queue
//!
//! This tool works directly against the configured queue store:
//! - Running a worker in the foreground, or a single job
//! - Queueing a message
//! - Inspecting pending and failed jobs, and per-queue counts
//! - Retrying failed jobs and bulk deletion
//! - Generating DKIM keys

use std::{
    fs::Permissions,
    io::{self, Write},
    os::unix::fs::PermissionsExt,
    path::PathBuf,
    sync::Arc,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use courier::{Courier, SHUTDOWN_BROADCAST, find_config_file};
use courier_common::{Signal, TracingEventSink};
use courier_control::{AdminCommand, QueueAdmin, Report, RetryTarget};
use courier_delivery::{Mailer, Resolution};
use courier_dkim::{DEFAULT_KEY_BITS, generate_keys};
use courier_queue::{AttachmentRef, MailPayload};

/// Command-line utility for operating a courier queue
#[derive(Parser, Debug)]
#[command(name = "courierctl")]
#[command(about = "Manage a courier mail queue", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file (defaults to `COURIER_CONFIG`, then the
    /// standard locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Process jobs in the foreground
    Work {
        /// Process a single job and exit
        #[arg(long)]
        once: bool,

        /// Queues to poll, highest priority first (defaults to the configured queues)
        queues: Vec<String>,
    },
    /// Queue a message for delivery
    Send {
        /// Recipient, or a comma separated list of recipients
        to: String,

        #[arg(long)]
        subject: Option<String>,

        /// Plain text body
        #[arg(long, default_value = "")]
        content: String,

        /// HTML body
        #[arg(long)]
        html: Option<String>,

        #[arg(long)]
        from: Option<String>,

        /// Attachment path or URL (repeatable)
        #[arg(long = "attach")]
        attachments: Vec<String>,

        /// Queue to put the message on
        #[arg(long, default_value = courier_delivery::DEFAULT_QUEUE)]
        queue: String,
    },
    /// List pending and reserved jobs
    List {
        /// Only this queue (defaults to every known queue)
        queue: Option<String>,
    },
    /// List failed jobs
    Failed,
    /// Push failed jobs back onto their queue
    Retry {
        /// Failed job id, or `all`
        target: String,
    },
    /// Delete every failed job
    Flush {
        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Delete the pending jobs of a queue
    Clear {
        /// Queue to clear (defaults to the default queue)
        queue: Option<String>,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Delete the jobs and failed records of a queue, or of every queue
    Purge {
        /// Queue to purge (defaults to every queue)
        queue: Option<String>,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Show queue statistics
    Stats,
    /// DKIM key management
    Dkim {
        #[command(subcommand)]
        action: DkimAction,
    },
}

#[derive(Subcommand, Debug)]
enum DkimAction {
    /// Generate an RSA key pair and print the DNS record to publish
    GenerateKeys {
        /// Key size in bits
        #[arg(long, default_value_t = DEFAULT_KEY_BITS)]
        bits: usize,

        /// Selector the DNS record is published under
        #[arg(long, default_value = "mail")]
        selector: String,

        /// Directory to write `private.pem` and `public.pem` into (prints
        /// them when omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let admin_command = match cli.command {
        Commands::Dkim { action } => return cmd_dkim(action).await,
        Commands::Work { once, queues } => {
            return cmd_work(&load_config(cli.config)?, once, queues).await;
        }
        Commands::Send {
            to,
            subject,
            content,
            html,
            from,
            attachments,
            queue,
        } => {
            let mut payload = MailPayload::new(to).with_content(content);
            payload.subject = subject;
            payload.html = html;
            payload.from = from;
            payload.attachments = attachments.into_iter().map(AttachmentRef::new).collect();
            return cmd_send(&load_config(cli.config)?, &queue, payload, cli.json).await;
        }
        Commands::List { queue } => AdminCommand::List { queue },
        Commands::Failed => AdminCommand::Failed,
        Commands::Retry { target } => AdminCommand::Retry(
            target
                .parse::<RetryTarget>()
                .with_context(|| format!("'{target}' is neither a job id nor 'all'"))?,
        ),
        Commands::Flush { yes } => confirmed(AdminCommand::Flush, yes)?,
        Commands::Clear { queue, yes } => confirmed(AdminCommand::Clear { queue }, yes)?,
        Commands::Purge { queue, yes } => confirmed(AdminCommand::Purge { queue }, yes)?,
        Commands::Stats => AdminCommand::Stats,
    };

    let courier = load_config(cli.config)?;
    let admin = QueueAdmin::new(courier.store()?);
    let report = admin.execute(admin_command).await?;
    print_report(&report, cli.json)
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Courier> {
    let path = match path {
        Some(path) => path,
        None => find_config_file()?,
    };
    Courier::load(&path)
}

/// Ask before running a command that deletes data. Exits when declined.
fn confirmed(command: AdminCommand, skip_confirm: bool) -> anyhow::Result<AdminCommand> {
    if skip_confirm || !command.is_destructive() {
        return Ok(command);
    }

    print!("This permanently deletes jobs ({command:?}). Continue? [y/N] ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    if !matches!(input.trim().to_lowercase().as_str(), "y" | "yes") {
        println!("Cancelled.");
        std::process::exit(1);
    }

    Ok(command)
}

fn print_report(report: &Report, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}

/// Run a worker in the foreground
async fn cmd_work(courier: &Courier, once: bool, queues: Vec<String>) -> anyhow::Result<()> {
    let mut worker = courier.worker(courier.store()?, Arc::new(TracingEventSink))?;
    if !queues.is_empty() {
        worker = worker.with_queues(queues);
    }

    if once {
        match worker.run_once().await? {
            None => println!("No jobs available"),
            Some(processed) => {
                let outcome = match processed.resolution {
                    Resolution::Acknowledged => "sent".to_string(),
                    Resolution::Released { delay } => {
                        format!("released, retrying in {:.1}s", delay.as_secs_f64())
                    }
                    Resolution::Failed { reason } => format!("failed: {reason}"),
                };
                println!(
                    "Job {} from {} (attempt {}): {outcome}",
                    processed.id, processed.queue, processed.attempts
                );
            }
        }
        return Ok(());
    }

    let receiver = SHUTDOWN_BROADCAST.subscribe();
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            SHUTDOWN_BROADCAST.send(Signal::Shutdown).ok();
        }
    });

    let exit = worker.run(receiver).await?;
    println!("Worker exited: {exit:?}");
    Ok(())
}

/// Queue a message
async fn cmd_send(
    courier: &Courier,
    queue: &str,
    payload: MailPayload,
    json: bool,
) -> anyhow::Result<()> {
    let mailer = Mailer::new(courier.store()?, Arc::new(TracingEventSink));
    let id = mailer.queue(queue, payload).await?;

    if json {
        println!("{}", serde_json::json!({ "id": id, "queue": queue }));
    } else {
        println!("Queued {id} on {queue}");
    }
    Ok(())
}

/// Generate DKIM keys
async fn cmd_dkim(action: DkimAction) -> anyhow::Result<()> {
    let DkimAction::GenerateKeys {
        bits,
        selector,
        out,
    } = action;

    let keys = tokio::task::spawn_blocking(move || generate_keys(bits)).await??;
    let record = keys.dns_record()?;

    if let Some(dir) = out {
        tokio::fs::create_dir_all(&dir).await?;
        let private = dir.join("private.pem");
        tokio::fs::write(&private, &keys.private_key).await?;
        tokio::fs::set_permissions(&private, Permissions::from_mode(0o600)).await?;
        tokio::fs::write(dir.join("public.pem"), &keys.public_key).await?;
        println!("Private key written to {}", private.display());
    } else {
        println!("{}", keys.private_key);
        println!("{}", keys.public_key);
    }

    println!("Publish this TXT record at {selector}._domainkey.<your domain>:");
    println!("{record}");
    Ok(())
}
