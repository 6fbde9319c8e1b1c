//! Live progress for sync runs

use console::style;
use ferrosync_engine::RunEvent;
use ferrosync_types::{FileStatus, JobKey, RunId, RunStatus};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast::{error::RecvError, Receiver};

/// Spinner following the events of one schedule's run
pub struct RunProgress {
    key: JobKey,
    run_id: Option<RunId>,
    progress_bar: Option<ProgressBar>,
    transferred: u64,
    skipped: u64,
    failed: u64,
}

impl RunProgress {
    /// Follow the next run of `key`
    pub fn new(key: JobKey, quiet: bool) -> Self {
        let progress_bar = if quiet {
            None
        } else {
            let pb = ProgressBar::new_spinner();
            if let Ok(spinner) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]") {
                pb.set_style(spinner);
            }
            pb.set_message(format!("Waiting for {key}..."));
            pb.enable_steady_tick(Duration::from_millis(100));
            Some(pb)
        };

        Self {
            key,
            run_id: None,
            progress_bar,
            transferred: 0,
            skipped: 0,
            failed: 0,
        }
    }

    /// Feed one event; events of other runs are ignored
    pub fn observe(&mut self, event: &RunEvent) {
        match event {
            RunEvent::Started { run_id, key } if *key == self.key => {
                self.run_id = Some(*run_id);
                self.set_message("Connecting...".to_string());
            }
            RunEvent::FileFinished {
                run_id,
                file,
                status,
                ..
            } if Some(*run_id) == self.run_id => {
                match status {
                    FileStatus::Success => self.transferred += 1,
                    FileStatus::Skipped => self.skipped += 1,
                    FileStatus::Failed => self.failed += 1,
                }
                self.set_message(format!(
                    "{} transferred, {} skipped, {} failed - {}",
                    self.transferred, self.skipped, self.failed, file
                ));
            }
            _ => {}
        }
    }

    fn set_message(&self, message: String) {
        if let Some(pb) = &self.progress_bar {
            pb.set_message(message);
        }
    }

    /// Stop the spinner
    pub fn finish(&self, success: bool) {
        if let Some(pb) = &self.progress_bar {
            let message = if success {
                format!("{} {} finished", style("✓").green(), self.key)
            } else {
                format!("{} {} failed", style("✗").red(), self.key)
            };
            pb.finish_with_message(message);
        }
    }
}

/// Print one line per finished run until the channel closes
pub async fn log_runs(mut events: Receiver<RunEvent>, quiet: bool) {
    let mut keys: HashMap<RunId, JobKey> = HashMap::new();
    loop {
        match events.recv().await {
            Ok(RunEvent::Started { run_id, key }) => {
                if !quiet {
                    println!("{} {} started", style("→").blue().bold(), style(&key).cyan());
                }
                keys.insert(run_id, key);
            }
            Ok(RunEvent::Finished {
                run_id,
                status,
                files_transferred,
                total_bytes,
            }) => {
                let key = keys
                    .remove(&run_id)
                    .map_or_else(|| run_id.to_string(), |key| key.to_string());
                if quiet {
                    continue;
                }
                match status {
                    RunStatus::Success => println!(
                        "{} {} finished: {} files, {}",
                        style("✓").green().bold(),
                        style(key).cyan(),
                        files_transferred,
                        crate::display::format_bytes(total_bytes)
                    ),
                    _ => println!("{} {} failed", style("✗").red().bold(), style(key).cyan()),
                }
            }
            Ok(RunEvent::FileFinished { .. }) => {}
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Progress output fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_only_the_followed_run() {
        let key = JobKey::new("conn-1", "pull");
        let mut progress = RunProgress::new(key.clone(), true);
        let run_id = RunId::new_v4();

        progress.observe(&RunEvent::FileFinished {
            run_id,
            file: "early.csv".to_string(),
            status: FileStatus::Success,
            size: 1,
        });
        progress.observe(&RunEvent::Started { run_id, key });
        progress.observe(&RunEvent::FileFinished {
            run_id,
            file: "a.csv".to_string(),
            status: FileStatus::Success,
            size: 1,
        });
        progress.observe(&RunEvent::FileFinished {
            run_id,
            file: "b.csv".to_string(),
            status: FileStatus::Skipped,
            size: 1,
        });
        progress.observe(&RunEvent::Started {
            run_id: RunId::new_v4(),
            key: JobKey::new("conn-1", "other"),
        });

        assert_eq!(progress.run_id, Some(run_id));
        assert_eq!((progress.transferred, progress.skipped, progress.failed), (1, 1, 0));
    }
}
