use colored::*;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use maestro_sync_core::reporter::SourceChange;
use maestro_sync_core::{ScanState, ScanStats, SyncReporter};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// CLI reporter: one spinner per scanning source.
pub struct CliReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl CliReporter {
    pub fn new(multi: MultiProgress) -> Self {
        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn bars(&self) -> MutexGuard<'_, HashMap<String, ProgressBar>> {
        self.bars.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Show the current phase of `source` next to its spinner.
    pub fn set_phase(&self, source: &str, state: ScanState) {
        if let Some(pb) = self.bars().get(source) {
            pb.set_message(format!("{}: {}", source, state));
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {msg} ({pos} files touched)")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
}

impl SyncReporter for CliReporter {
    fn on_file_state_changed(&self, _path: &Path) {
        for pb in self.bars().values() {
            pb.inc(1);
        }
    }

    fn on_source_changed(&self, change: SourceChange, name: &str) {
        let verb = match change {
            SourceChange::Added => "added".green(),
            SourceChange::Changed => "changed".yellow(),
            SourceChange::Deleted => "removed".red(),
        };
        self.multi
            .suspend(|| eprintln!("  Source {} {}", name.bold(), verb));
    }

    fn on_scan_started(&self, source: &str) {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(spinner_style());
        pb.set_message(format!("{}: {}", source, ScanState::InitialScan));
        pb.enable_steady_tick(Duration::from_millis(80));
        if let Some(old) = self.bars().insert(source.to_string(), pb) {
            old.finish_and_clear();
        }
    }

    fn on_scan_finished(&self, source: &str, stats: &ScanStats) {
        if let Some(pb) = self.bars().remove(source) {
            pb.finish_and_clear();
        }
        self.multi.suspend(|| {
            eprintln!(
                "  {} {}: {} files, {} new, {} hashed, {} checked",
                "✓".green(),
                source.bold(),
                stats.files_on_disk,
                stats.new_files.to_string().cyan(),
                stats.hash_requests,
                stats.modified_checked,
            );
            if stats.renames_detected + stats.relocated + stats.deleted > 0 {
                eprintln!(
                    "    {} renamed, {} relocated, {} deleted",
                    stats.renames_detected.to_string().cyan(),
                    stats.relocated.to_string().cyan(),
                    stats.deleted.to_string().red(),
                );
            }
            if stats.unresolved_missing > 0 {
                eprintln!(
                    "    {} files missing from disk",
                    stats.unresolved_missing.to_string().red()
                );
            }
        });
    }
}
