use colored::*;
use dashmap::DashMap;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

use collate_core::ProgressReporter;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(TICKS)
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸─")
        .tick_chars(TICKS)
}

/// CLI progress reporter using indicatif progress bars.
///
/// - Scan: spinner (unknown entry count upfront)
/// - Plan: one bar over groups
/// - Run: one bar per active group
pub struct CliReporter {
    multi: MultiProgress,
    phase: Mutex<Option<ProgressBar>>,
    groups: DashMap<String, ProgressBar>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            phase: Mutex::new(None),
            groups: DashMap::new(),
        }
    }

    fn set_phase(&self, pb: ProgressBar) {
        let mut guard = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(self.multi.add(pb));
    }

    fn with_phase(&self, update: impl FnOnce(&ProgressBar)) {
        let guard = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pb) = guard.as_ref() {
            update(pb);
        }
    }

    fn finish_phase(&self) {
        let mut guard = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pb) = guard.take() {
            pb.finish_and_clear();
        }
    }

    pub fn on_scan_start(&self) {
        let pb = ProgressBar::new_spinner();
        pb.set_style(spinner_style());
        pb.set_message("Scanning mirror...");
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_phase(pb);
    }

    pub fn on_scan_progress(&self, entries: usize) {
        self.with_phase(|pb| pb.set_message(format!("Scanning... {} entries fingerprinted", entries)));
    }

    pub fn on_scan_complete(&self, files: usize, folders: usize, duration_secs: f64) {
        self.finish_phase();
        eprintln!(
            "  {} Scan complete: {} files, {} folders in {:.2}s",
            "✓".green(),
            files,
            folders,
            duration_secs
        );
    }
}

impl ProgressReporter for CliReporter {
    fn on_diff_complete(&self, added: usize, removed: usize, modified: usize) {
        eprintln!(
            "  {} Diff: {} added, {} removed, {} modified",
            "✓".green(),
            added.to_string().green(),
            removed.to_string().red(),
            modified.to_string().yellow()
        );
    }

    fn on_plan_start(&self, groups: usize) {
        let pb = ProgressBar::new(groups as u64);
        pb.set_style(bar_style(
            "  {spinner:.cyan} Planning [{bar:30.cyan/dim}] {pos}/{len} groups",
        ));
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_phase(pb);
    }

    fn on_plan_progress(&self, planned: usize, _groups: usize) {
        self.with_phase(|pb| pb.set_position(planned as u64));
    }

    fn on_plan_complete(&self, changed: usize, failed: usize, duration_secs: f64) {
        self.finish_phase();
        eprintln!(
            "  {} Plan complete: {} changed, {} failed in {:.2}s",
            "✓".green(),
            changed.to_string().cyan(),
            failed.to_string().red(),
            duration_secs
        );
    }

    fn on_run_start(&self, groups: usize) {
        eprintln!("  Running {} group(s)...", groups.to_string().cyan());
    }

    fn on_group_start(&self, group: &str, tasks: usize) {
        let pb = self.multi.add(ProgressBar::new(tasks as u64));
        pb.set_style(bar_style(
            "  {spinner:.cyan} {prefix:20!} [{bar:30.cyan/dim}] {pos}/{len} tasks ({eta} remaining)",
        ));
        pb.set_prefix(group.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        self.groups.insert(group.to_string(), pb);
    }

    fn on_task_complete(&self, group: &str, done: usize, _tasks: usize) {
        if let Some(pb) = self.groups.get(group) {
            pb.set_position(done as u64);
        }
    }

    fn on_group_complete(&self, group: &str, succeeded: bool) {
        if let Some((_, pb)) = self.groups.remove(group) {
            pb.finish_and_clear();
        }
        let mark = if succeeded { "✓".green() } else { "✗".red() };
        eprintln!("  {} {}", mark, group);
    }

    fn on_run_complete(&self, completed: usize, failed: usize, duration_secs: f64) {
        eprintln!(
            "  {} Run complete: {} completed, {} failed in {:.2}s",
            "✓".green(),
            completed.to_string().green(),
            failed.to_string().red(),
            duration_secs
        );
    }
}
