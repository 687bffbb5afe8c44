use std::collections::HashMap;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use console::style;
use crate::controller::{LoopEvent, LoopState};
use crate::models::Verdict;
use crate::utils::formatting::format_duration;

/// One spinner per running lineage plus a status line with verdict counts.
pub struct LoopProgress {
    multi: MultiProgress,
    lineage_bars: HashMap<String, ProgressBar>,
    status_bar: ProgressBar,
    finished: HashMap<Verdict, usize>,
    start_time: std::time::Instant,
}

impl LoopProgress {
    pub fn new() -> Self {
        let multi = MultiProgress::new();
        let status_bar = multi.add(ProgressBar::new_spinner());
        status_bar.set_style(spinner_style("  {spinner:.cyan} {msg}"));
        status_bar.set_message("Starting...");
        status_bar.enable_steady_tick(std::time::Duration::from_millis(120));

        Self {
            multi,
            lineage_bars: HashMap::new(),
            status_bar,
            finished: HashMap::new(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn handle_event(&mut self, event: &LoopEvent) {
        match event {
            LoopEvent::IterationStarted { lineage, iteration, plan_version } => {
                let bar = self.bar_for(lineage);
                bar.set_message(format!("{} iteration {} (plan v{})", lineage, iteration, plan_version));
            }
            LoopEvent::StateChanged { lineage, state } => {
                if *state == LoopState::Done {
                    return;
                }
                if let Some(bar) = self.lineage_bars.get(lineage) {
                    let message = bar.message();
                    let base = message.split(" [").next().unwrap_or_default().to_string();
                    bar.set_message(format!("{} [{}]", base, state));
                }
            }
            LoopEvent::Classified { lineage, iteration, verdict } => {
                if *verdict != Verdict::Green {
                    self.println(&format!(
                        "  {} {} iteration {}: {}",
                        style("·").dim(), lineage, iteration, style_verdict(*verdict)
                    ));
                }
            }
            LoopEvent::PlanCommitted { lineage, version, applied } => {
                self.println(&format!(
                    "    {} {} plan v{} ({})",
                    style("→").cyan(), lineage, version, applied
                ));
            }
            LoopEvent::Finished { lineage, verdict, iterations, duration_ms } => {
                if let Some(bar) = self.lineage_bars.remove(lineage) {
                    bar.finish_and_clear();
                }
                *self.finished.entry(*verdict).or_default() += 1;
                self.println(&format!(
                    "  {} {} after {} iteration(s) in {}",
                    style_verdict(*verdict), lineage, iterations, format_duration(*duration_ms)
                ));
            }
        }
        self.update_status();
    }

    pub fn finish(&mut self) {
        for (_, bar) in self.lineage_bars.drain() {
            bar.finish_and_clear();
        }
        self.status_bar.finish_and_clear();
    }

    fn bar_for(&mut self, lineage: &str) -> ProgressBar {
        if let Some(bar) = self.lineage_bars.get(lineage) {
            return bar.clone();
        }
        let bar = self.multi.insert_before(&self.status_bar, ProgressBar::new_spinner());
        bar.set_style(spinner_style("    {spinner:.yellow} {msg}"));
        bar.enable_steady_tick(std::time::Duration::from_millis(100));
        self.lineage_bars.insert(lineage.to_string(), bar.clone());
        bar
    }

    fn update_status(&self) {
        let green = self.finished.get(&Verdict::Green).copied().unwrap_or(0);
        let done: usize = self.finished.values().sum();
        self.status_bar.set_message(format!(
            "{} | {} running | {} done, {} green",
            format_duration(self.start_time.elapsed().as_millis() as u64),
            self.lineage_bars.len(),
            done,
            green,
        ));
    }

    /// Print above the bars without tearing them.
    pub fn println(&self, msg: &str) {
        let _ = self.multi.println(msg);
    }
}

impl Default for LoopProgress {
    fn default() -> Self {
        Self::new()
    }
}

fn spinner_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn style_verdict(verdict: Verdict) -> String {
    let label = verdict.as_str();
    match verdict {
        Verdict::Green => style(label).green().bold().to_string(),
        Verdict::BudgetExhausted => style(label).yellow().bold().to_string(),
        Verdict::InfraError => style(label).red().bold().to_string(),
        Verdict::Cancelled => style(label).magenta().to_string(),
        _ => style(label).yellow().to_string(),
    }
}
