//! pipewatch CLI - monitor and manage pipeline tasks from the terminal.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pipewatch_client::{
    ChannelConnector, FixedEndpoint, HttpClient, PipelineApi, StreamEndpoint,
};
use pipewatch_core::{
    NotificationId, TaskFilter, TaskId, TaskParams, TaskStatus, TASK_TYPE_EMBED_QUESTION,
    TASK_TYPE_PIPELINE,
};
use pipewatch_monitor::{
    DeleteOutcome, FileRepository, MonitorConfig, NotificationStore, TaskListController,
    TaskMonitor, TaskQuery,
};

mod render;

/// pipewatch - pipeline task monitor
#[derive(Parser)]
#[command(name = "pipewatch")]
#[command(about = "Monitor and manage pipeline tasks", long_about = None)]
#[command(version)]
struct Cli {
    /// Backend base URL
    #[arg(short, long, default_value = "http://localhost:8000")]
    api: String,

    /// Push stream URL (defaults to the backend's events endpoint)
    #[arg(long)]
    stream_url: Option<String>,

    /// Directory for persisted client state
    #[arg(long, default_value = ".pipewatch")]
    data_dir: PathBuf,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow task updates live and record notifications
    #[command(alias = "w")]
    Watch {
        /// Also poll and print the task list
        #[arg(long)]
        tasks: bool,

        /// Status filter for the polled task list
        #[arg(long)]
        status: Option<TaskStatus>,

        /// Seconds to wait before reconnecting a lost stream
        #[arg(long, default_value = "5")]
        reconnect_delay: u64,

        /// Task list refresh interval in seconds
        #[arg(long, default_value = "5")]
        poll_interval: u64,
    },

    /// Manage tasks
    Tasks {
        #[command(subcommand)]
        command: TaskCommands,
    },

    /// Show pipeline statistics
    Stats,

    /// Manage stored notifications
    Notifications {
        #[command(subcommand)]
        command: NotificationCommands,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// List tasks, one page at a time
    List {
        /// Only show tasks with this status
        #[arg(short, long)]
        status: Option<TaskStatus>,

        /// Page number, starting at 1
        #[arg(short, long, default_value = "1")]
        page: u32,

        /// Tasks per page
        #[arg(long, default_value = "10")]
        page_size: u32,
    },

    /// Show a task and its result
    Show {
        /// Task ID
        id: String,

        /// Do not truncate long results
        #[arg(long)]
        full: bool,
    },

    /// Create a task
    Create {
        #[command(subcommand)]
        kind: CreateCommands,
    },

    /// Delete a task (running tasks are refused)
    Delete {
        /// Task ID
        id: String,
    },
}

#[derive(Subcommand)]
enum CreateCommands {
    /// Ingest a channel through the full pipeline
    Pipeline {
        /// Channel URL to ingest
        #[arg(long)]
        channel_url: String,

        /// Maximum number of videos to ingest
        #[arg(long, default_value = "10", value_parser = clap::value_parser!(u32).range(1..=100))]
        max_videos: u32,

        /// Skip downloading media
        #[arg(long)]
        no_download: bool,
    },

    /// Embed a single question
    EmbedQuestion {
        /// Question text
        #[arg(long, value_parser = clap::builder::NonEmptyStringValueParser::new())]
        question: String,
    },
}

#[derive(Subcommand)]
enum NotificationCommands {
    /// List stored notifications
    List,

    /// Mark one notification as read
    Read {
        /// Notification ID
        id: String,
    },

    /// Mark every notification as read
    ReadAll,

    /// Delete one notification
    Delete {
        /// Notification ID
        id: String,
    },

    /// Delete every notification
    Clear,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    let mut config = MonitorConfig {
        api_base_url: cli.api,
        stream_url: cli.stream_url,
        data_dir: cli.data_dir,
        ..MonitorConfig::default()
    };
    let client = Arc::new(HttpClient::new(&config.api_base_url)?);
    let json = cli.json;

    match cli.command {
        Commands::Watch {
            tasks,
            status,
            reconnect_delay,
            poll_interval,
        } => {
            config.reconnect_delay_secs = reconnect_delay;
            config.poll_interval_secs = poll_interval;
            watch(&config, client, tasks, status).await?;
        }
        Commands::Tasks { command } => {
            run_task_command(&config, client, command, json).await?;
        }
        Commands::Stats => {
            let stats = client.stats().await?;
            if json {
                print_json(&stats)?;
            } else {
                render::print_stats(&stats);
            }
        }
        Commands::Notifications { command } => {
            run_notification_command(&config, command, json)?;
        }
    }

    Ok(())
}

/// Logs go to stderr, or to `log_file` without ANSI colors.
fn init_tracing(log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pipewatch=info"));

    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            tracing_subscriber::fmt()
                .with_writer(std::sync::Mutex::new(file))
                .with_env_filter(filter)
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
    }
    Ok(())
}

fn open_store(config: &MonitorConfig) -> NotificationStore {
    NotificationStore::load_with_capacity(
        FileRepository::new(&config.data_dir),
        config.notification_capacity,
    )
}

async fn watch(
    config: &MonitorConfig,
    client: Arc<HttpClient>,
    tasks: bool,
    status: Option<TaskStatus>,
) -> Result<(), Box<dyn Error>> {
    let endpoint = match &config.stream_url {
        Some(url) => Arc::new(FixedEndpoint(url.clone())) as Arc<dyn StreamEndpoint>,
        None => Arc::clone(&client) as Arc<dyn StreamEndpoint>,
    };
    info!(
        api = %config.api_base_url,
        stream = %endpoint.stream_url(),
        "Starting watch"
    );

    let connector = Arc::clone(&client) as Arc<dyn ChannelConnector>;
    let mut monitor = TaskMonitor::new(
        open_store(config),
        connector,
        endpoint,
        config.reconnect_delay(),
    );
    let mut state = monitor.subscribe();
    monitor.activate();

    let unread = monitor.unread_count();
    if unread > 0 {
        println!("{} unread notifications", unread);
    }

    // The command sender stays alive for the whole watch so the poll loop
    // only stops on cancellation.
    let cancel = CancellationToken::new();
    let (_cmd_tx, cmd_rx) = mpsc::channel(16);
    let (update_tx, mut update_rx) = mpsc::channel(16);
    let poller = if tasks {
        let query = TaskQuery {
            filter: TaskFilter { status },
            page: 1,
            page_size: config.page_size,
        };
        let controller = TaskListController::with_query(Arc::clone(&client), query);
        Some(tokio::spawn(controller.run(
            config.poll_interval(),
            cmd_rx,
            update_tx,
            cancel.clone(),
        )))
    } else {
        None
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }

            event = monitor.next_event() => match event {
                Some(event) => render::print_monitor_event(&event),
                None => break,
            },

            Some(update) = update_rx.recv(), if tasks => {
                render::print_task_update(&update, config.page_size);
            }

            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                render::print_connection_state(current);
            }
        }
    }

    cancel.cancel();
    monitor.deactivate();
    if let Some(handle) = poller {
        let _ = handle.await;
    }

    info!("Watch stopped");
    Ok(())
}

async fn run_task_command(
    config: &MonitorConfig,
    client: Arc<HttpClient>,
    command: TaskCommands,
    json: bool,
) -> Result<(), Box<dyn Error>> {
    match command {
        TaskCommands::List {
            status,
            page,
            page_size,
        } => {
            let query = TaskQuery {
                filter: TaskFilter { status },
                page,
                page_size,
            };
            let mut controller = TaskListController::with_query(client, query);
            controller.refresh().await?;
            if let Some(tasks) = controller.current() {
                if json {
                    print_json(tasks)?;
                } else {
                    render::print_task_page(tasks, controller.query());
                }
            }
        }
        TaskCommands::Show { id, full } => {
            let task = client.get_task(&TaskId::new(id)).await?;
            if json {
                print_json(&task)?;
            } else {
                render::print_task(&task, full);
            }
        }
        TaskCommands::Create { kind } => {
            let (task_type, params) = match kind {
                CreateCommands::Pipeline {
                    channel_url,
                    max_videos,
                    no_download,
                } => (
                    TASK_TYPE_PIPELINE,
                    TaskParams::pipeline(channel_url)
                        .with_max_videos(max_videos)
                        .with_download(!no_download),
                ),
                CreateCommands::EmbedQuestion { question } => {
                    (TASK_TYPE_EMBED_QUESTION, TaskParams::embed_question(question))
                }
            };
            let query = TaskQuery {
                page_size: config.page_size,
                ..TaskQuery::default()
            };
            let mut controller = TaskListController::with_query(client, query);
            let created = controller.create(task_type, &params).await?;
            if json {
                print_json(&created)?;
            } else {
                println!("Task created:");
                println!("  ID:         {}", created.task_id);
                println!("  Status:     {}", created.status);
            }
        }
        TaskCommands::Delete { id } => {
            let task = client.get_task(&TaskId::new(id)).await?;
            let mut controller = TaskListController::new(client);
            match controller.delete(&task).await? {
                DeleteOutcome::Deleted => println!("Task {} deleted", task.id),
                DeleteOutcome::Blocked => {
                    return Err(format!("Task {} is running and cannot be deleted", task.id).into());
                }
            }
        }
    }

    Ok(())
}

fn run_notification_command(
    config: &MonitorConfig,
    command: NotificationCommands,
    json: bool,
) -> Result<(), Box<dyn Error>> {
    let mut store = open_store(config);

    match command {
        NotificationCommands::List => {
            if json {
                print_json(store.notifications())?;
            } else {
                render::print_notifications(store.notifications(), store.unread_count());
            }
        }
        NotificationCommands::Read { id } => {
            let id = existing_notification(&store, id)?;
            store.mark_read(&id);
            println!("Notification {} marked as read", id);
        }
        NotificationCommands::ReadAll => {
            store.mark_all_read();
            println!("All notifications marked as read");
        }
        NotificationCommands::Delete { id } => {
            let id = existing_notification(&store, id)?;
            store.delete(&id);
            println!("Notification {} deleted", id);
        }
        NotificationCommands::Clear => {
            store.clear_all();
            println!("Notifications cleared");
        }
    }

    Ok(())
}

fn existing_notification(store: &NotificationStore, id: String) -> Result<NotificationId, Box<dyn Error>> {
    let id = NotificationId::new(id);
    if store.get(&id).is_none() {
        return Err(format!("Notification {} not found", id).into());
    }
    Ok(id)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_embed_question_parses() {
        let cli = Cli::try_parse_from([
            "pipewatch",
            "tasks",
            "create",
            "embed-question",
            "--question",
            "what is a vector?",
        ])
        .unwrap();
        match cli.command {
            Commands::Tasks {
                command:
                    TaskCommands::Create {
                        kind: CreateCommands::EmbedQuestion { question },
                    },
            } => assert_eq!(question, "what is a vector?"),
            _ => panic!("Expected embed-question command"),
        }

        assert!(Cli::try_parse_from([
            "pipewatch",
            "tasks",
            "create",
            "embed-question",
            "--question",
            "",
        ])
        .is_err());
    }
}
