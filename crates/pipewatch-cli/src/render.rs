//! Plain-text output for the CLI.

use chrono::{DateTime, Local, Utc};

use pipewatch_core::{
    Notification, NotificationKind, PipelineStats, ResultPanel, StepInfo, Task, TaskPage,
    TaskStatus,
};
use pipewatch_monitor::{ConnectionState, MonitorEvent, TaskListUpdate, TaskQuery};

pub fn print_task_page(page: &TaskPage, query: &TaskQuery) {
    let filter = query
        .filter
        .status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "all".to_string());
    println!(
        "Tasks ({} {}, page {}/{}):",
        page.total,
        filter,
        query.page,
        page.total_pages.max(1)
    );
    println!(
        "{:<36}  {:<10}  {:<14}  {:>5}  {}",
        "ID", "STATUS", "TYPE", "PROG", "CREATED"
    );
    println!("{}", "-".repeat(90));

    for task in &page.items {
        println!(
            "{:<36}  {:<10}  {:<14}  {:>4}%  {}",
            task.id,
            status_name(task.status),
            task.task_type,
            task.progress_percent(),
            format_timestamp(&task.created_at)
        );
    }
}

pub fn print_task(task: &Task, full: bool) {
    println!("  ID:         {}", task.id);
    println!("  Type:       {}", task.task_type);
    println!("  Status:     {}", status_name(task.status));
    if task.status == TaskStatus::Running {
        println!("  Progress:   {}%", task.progress_percent());
    }
    println!("  Created:    {}", format_timestamp(&task.created_at));
    if let Some(started) = &task.started_at {
        println!("  Started:    {}", format_timestamp(started));
    }
    if let Some(completed) = &task.completed_at {
        println!("  Completed:  {}", format_timestamp(completed));
    }
    if let Some(elapsed) = task.elapsed(Utc::now()) {
        println!("  Elapsed:    {}", format_duration(elapsed));
    }
    if let Some(error) = &task.error_message {
        println!("  Error:      {}", error);
    }

    print_result_panel(&ResultPanel::for_task(task), full);
}

fn print_result_panel(panel: &ResultPanel, full: bool) {
    match panel {
        ResultPanel::InProgress { info, progress } => {
            println!("  Result:");
            print_step(info);
            if let Some(fraction) = progress {
                println!(
                    "    {} {:.0}%",
                    progress_bar(*fraction, 30),
                    fraction * 100.0
                );
            }
        }
        ResultPanel::CompletedSummary { message, entries } => {
            println!("  Result:");
            if let Some(message) = message {
                println!("    {}", message);
            }
            for (key, value) in entries {
                println!("    {}: {}", key, value);
            }
        }
        ResultPanel::Embedding { preview, .. } => {
            println!("  Embedding:  {}", preview);
        }
        ResultPanel::Text {
            preview,
            full: text,
            expandable,
        } => {
            if full || !expandable {
                println!("  Result:     {}", text);
            } else {
                println!("  Result:     {}", preview);
                println!("              (truncated, use --full to show everything)");
            }
        }
        ResultPanel::Hidden => {}
    }
}

fn print_step(info: &StepInfo) {
    if let Some(step) = &info.step {
        match (info.current_step, info.total_steps) {
            (Some(current), Some(total)) => println!("    Step {}/{}: {}", current, total, step),
            _ => println!("    Step: {}", step),
        }
    }
    if let Some(message) = &info.message {
        println!("    {}", message);
    }
    if let Some(details) = &info.details {
        println!("    {}", details);
    }
    if let Some(title) = &info.video_title {
        match &info.video_id {
            Some(id) => println!("    Video: {} ({})", title, id),
            None => println!("    Video: {}", title),
        }
    }
    if let Some(channel) = &info.channel_name {
        println!("    Channel: {}", channel);
    }
    if let (Some(processed), Some(total)) = (info.processed, info.total) {
        println!("    Processed: {}/{}", processed, total);
    }
}

pub fn print_stats(stats: &PipelineStats) {
    println!("Pipeline stats:");
    println!("  Channels:     {}", stats.total_channels);
    println!("  Videos:       {}", stats.total_videos);
    println!("  Downloaded:   {}", stats.videos_downloaded);
    println!("  Transcribed:  {}", stats.videos_transcribed);
    println!("  Chunks:       {}", stats.total_chunks);
    println!(
        "  Embedded:     {} ({:.1}%)",
        stats.chunks_embedded,
        stats.embedded_ratio() * 100.0
    );
}

pub fn print_notifications(notifications: &[Notification], unread: usize) {
    println!("Notifications ({}, {} unread):", notifications.len(), unread);
    println!("{}", "-".repeat(90));
    for notification in notifications {
        print_notification(notification);
    }
}

pub fn print_notification(notification: &Notification) {
    let marker = if notification.read { ' ' } else { '*' };
    println!(
        "{} {}  {:<7}  {}  {}",
        marker,
        notification.id,
        kind_name(notification.kind),
        format_timestamp(&notification.timestamp),
        notification.title
    );
    println!("    {}", notification.message);
}

pub fn print_monitor_event(event: &MonitorEvent) {
    match event {
        MonitorEvent::Connected => println!("[stream] subscribed"),
        MonitorEvent::Heartbeat => {}
        MonitorEvent::TaskUpdated { task, notification } => match notification {
            Some(notification) => print_notification(notification),
            None => println!(
                "[task] {} {} {} {}%",
                task.id,
                task.task_type,
                status_name(task.status),
                task.progress.min(100)
            ),
        },
    }
}

pub fn print_connection_state(state: ConnectionState) {
    let label = match state {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Connected => "connected",
        ConnectionState::ReconnectPending => "connection lost, reconnecting",
    };
    println!("[stream] {}", label);
}

pub fn print_task_update(update: &TaskListUpdate, page_size: u32) {
    match update {
        TaskListUpdate::Page {
            filter,
            page,
            tasks,
        } => {
            let query = TaskQuery {
                filter: *filter,
                page: *page,
                page_size,
            };
            print_task_page(tasks, &query);
        }
        TaskListUpdate::Deleted(id) => println!("Task {} deleted", id),
        TaskListUpdate::Blocked(id) => println!("Task {} is running and cannot be deleted", id),
        TaskListUpdate::Created(created) => {
            println!("Task {} created ({})", created.task_id, created.status)
        }
        TaskListUpdate::Error(message) => eprintln!("Task list error: {}", message),
    }
}

fn status_name(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "PENDING",
        TaskStatus::Running => "RUNNING",
        TaskStatus::Completed => "COMPLETED",
        TaskStatus::Failed => "FAILED",
    }
}

fn kind_name(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::Success => "SUCCESS",
        NotificationKind::Error => "ERROR",
        NotificationKind::Info => "INFO",
        NotificationKind::Warning => "WARNING",
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn format_duration(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(0);
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

fn progress_bar(fraction: f64, width: usize) -> String {
    let filled = ((fraction.clamp(0.0, 1.0) * width as f64).round() as usize).min(width);
    format!("[{}{}]", "#".repeat(filled), ".".repeat(width - filled))
}
