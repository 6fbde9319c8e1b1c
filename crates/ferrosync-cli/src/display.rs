//! Terminal output for the FerroSync CLI

use chrono::{DateTime, Local, Utc};
use console::style;
use ferrosync_engine::SchedulerStatus;
use ferrosync_filter::MatchStrategy;
use ferrosync_types::{FileStatus, Frequency, RunRecord, RunStatus, Schedule, ScheduleStatus};
use std::time::Duration;

/// Print schedules as an aligned table
pub fn display_schedules(schedules: &[Schedule]) {
    if schedules.is_empty() {
        display_info("No schedules defined");
        return;
    }

    println!(
        "{}",
        style(format!(
            "{:<28} {:<8} {:<9} {:<20} {:<20}",
            "SCHEDULE", "FREQ", "STATUS", "LAST RUN", "NEXT RUN"
        ))
        .bold()
        .underlined()
    );
    for schedule in schedules {
        let identity = format!("{}/{}", schedule.connection_id, schedule.name);
        let next_run = if !schedule.enabled {
            "disabled".to_string()
        } else if schedule.frequency == Frequency::Manual {
            "manual".to_string()
        } else {
            format_time(schedule.next_run)
        };
        println!(
            "{:<28} {:<8} {:<9} {:<20} {:<20}",
            identity,
            schedule.frequency,
            status_cell(schedule.status),
            format_time(schedule.last_run),
            next_run,
        );
        println!(
            "  {} {} {}",
            style(&schedule.source).dim(),
            style("→").dim(),
            style(&schedule.destination).dim()
        );
    }
}

fn status_cell(status: ScheduleStatus) -> String {
    let text = format!("{status:<9}");
    match status {
        ScheduleStatus::Idle => style(text).dim().to_string(),
        ScheduleStatus::Running => style(text).cyan().to_string(),
        ScheduleStatus::Success => style(text).green().to_string(),
        ScheduleStatus::Failed => style(text).red().to_string(),
    }
}

/// Print run history, newest first
pub fn display_history(records: &[RunRecord]) {
    if records.is_empty() {
        display_info("No runs recorded");
        return;
    }

    for record in records {
        let marker = match record.status {
            RunStatus::Success => style("✓").green().bold(),
            RunStatus::Failed => style("✗").red().bold(),
            RunStatus::Running => style("…").cyan().bold(),
        };
        println!(
            "{} {}/{} {} {} files, {}{}",
            marker,
            record.connection_id,
            record.schedule_name,
            style(format_time(Some(record.start_time))).dim(),
            record.files_transferred,
            format_bytes(record.total_bytes),
            record
                .end_time
                .and_then(|end| (end - record.start_time).to_std().ok())
                .map(|elapsed| format!(" in {}", format_duration(elapsed)))
                .unwrap_or_default(),
        );
        for error in &record.errors {
            println!("    {}", style(error).red());
        }
    }
}

/// Print the outcome of one run with its per-file results
pub fn display_run_summary(record: &RunRecord) {
    println!();
    println!("{}", style("Run Summary:").bold().underlined());
    let status = match record.status {
        RunStatus::Success => style("success").green().bold(),
        RunStatus::Failed => style("failed").red().bold(),
        RunStatus::Running => style("running").cyan().bold(),
    };
    println!("  Status: {}", status);
    println!("  Files transferred: {}", style(record.files_transferred).green());
    println!("  Bytes transferred: {}", style(format_bytes(record.total_bytes)).green());
    println!(
        "  Files skipped: {}",
        style(record.count(FileStatus::Skipped)).yellow()
    );
    let failed = record.count(FileStatus::Failed);
    println!(
        "  Files failed: {}",
        if failed > 0 {
            style(failed).red()
        } else {
            style(failed).green()
        }
    );
    if let Some(elapsed) = record
        .end_time
        .and_then(|end| (end - record.start_time).to_std().ok())
    {
        println!("  Duration: {}", style(format_duration(elapsed)).blue());
    }

    for file in &record.details.files {
        match file.status {
            FileStatus::Success => {}
            FileStatus::Skipped => println!(
                "    {} {} {}",
                style("-").yellow(),
                file.file,
                style(file.reason.as_deref().unwrap_or_default()).dim()
            ),
            FileStatus::Failed => println!(
                "    {} {} {}",
                style("✗").red(),
                file.file,
                style(file.error.as_deref().unwrap_or_default()).red()
            ),
        }
    }
    for error in &record.errors {
        display_error(error);
    }
}

/// Print scheduler counters
pub fn display_status(status: &SchedulerStatus) {
    println!();
    println!("{}", style("Scheduler Statistics:").bold().underlined());
    println!("  Checks: {}", style(status.stats.ticks).cyan());
    println!("  Runs dispatched: {}", style(status.stats.dispatched).cyan());
    println!("  Succeeded: {}", style(status.stats.succeeded).green());
    println!(
        "  Failed: {}",
        if status.stats.failed > 0 {
            style(status.stats.failed).red()
        } else {
            style(status.stats.failed).green()
        }
    );
    println!(
        "  Rejected duplicates: {}",
        style(status.stats.rejected_duplicates).yellow()
    );
    println!(
        "  Transferred: {} files, {}",
        status.stats.files_transferred,
        format_bytes(status.stats.bytes_transferred)
    );
    println!(
        "  Uptime: {}",
        style(format_duration(Duration::from_secs(status.stats.uptime_secs))).blue()
    );
}

/// Print the next trigger instants
pub fn display_next_runs(frequency: Frequency, runs: &[DateTime<Utc>]) {
    if frequency == Frequency::Manual {
        display_info("Manual schedules never run automatically");
        return;
    }
    for run in runs {
        println!(
            "{} {}",
            style("→").green().bold(),
            style(run.with_timezone(&Local).format("%a %Y-%m-%d %H:%M %Z")).cyan()
        );
    }
}

/// Print one match result
pub fn display_match(file: &str, strategy: Option<MatchStrategy>) {
    match strategy {
        Some(strategy) => println!(
            "{} {} {}",
            style("✓").green().bold(),
            file,
            style(format!("({strategy})")).dim()
        ),
        None => println!("{} {}", style("✗").red().bold(), style(file).dim()),
    }
}

/// Local wall-clock time, or `-` when unset
pub fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map_or_else(
        || "-".to_string(),
        |time| time.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
    )
}

/// Byte count in binary units; exact below 1 KiB
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Compact elapsed time: `4.2s`, `2m05s`, `1h02m`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        0..=59 => format!("{:.1}s", duration.as_secs_f64()),
        60..=3599 => format!("{}m{:02}s", secs / 60, secs % 60),
        _ => format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60),
    }
}

fn notice(symbol: &str, message: &str, color: console::Color) {
    println!(
        "{} {}",
        style(symbol).fg(color).bold(),
        style(message).fg(color)
    );
}

pub fn display_warning(message: &str) {
    notice("!", message, console::Color::Yellow);
}

pub fn display_error(message: &str) {
    notice("✗", message, console::Color::Red);
}

pub fn display_success(message: &str) {
    notice("✓", message, console::Color::Green);
}

pub fn display_info(message: &str) {
    notice("i", message, console::Color::Blue);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, "0 B")]
    #[case(1023, "1023 B")]
    #[case(1536, "1.5 KiB")]
    #[case(5 * 1024 * 1024, "5.0 MiB")]
    fn test_format_bytes(#[case] bytes: u64, #[case] expected: &str) {
        assert_eq!(format_bytes(bytes), expected);
    }

    #[rstest]
    #[case(Duration::from_millis(1500), "1.5s")]
    #[case(Duration::from_secs(125), "2m05s")]
    #[case(Duration::from_secs(3723), "1h02m")]
    fn test_format_duration(#[case] duration: Duration, #[case] expected: &str) {
        assert_eq!(format_duration(duration), expected);
    }

    #[test]
    fn test_unset_time() {
        assert_eq!(format_time(None), "-");
    }
}
