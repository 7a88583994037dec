//! Table output for run summaries, run listings and transfer reports.

use std::time::Duration;

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};

use super::{format_score, truncate};
use crate::domain::models::{IterationOutcome, IterationRecord};
use crate::infrastructure::checkpoint::RunInfo;
use crate::services::TransferEntry;

pub struct TableFormatter {
    use_colors: bool,
    max_width: Option<u16>,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    pub const fn with_config(use_colors: bool, max_width: Option<u16>) -> Self {
        Self { use_colors, max_width }
    }

    fn header(names: &[&str]) -> Vec<Cell> {
        names
            .iter()
            .map(|name| Cell::new(name).add_attribute(Attribute::Bold))
            .collect()
    }

    pub fn format_iterations(&self, records: &[IterationRecord]) -> String {
        let mut table = self.create_base_table();
        table.set_header(Self::header(&["Iteration", "Outcome", "Score", "Reason", "Elapsed"]));

        for record in records {
            let (label, score, reason) = match &record.outcome {
                IterationOutcome::Accepted { score } => ("accepted", format_score(Some(*score)), String::new()),
                IterationOutcome::Reverted { kind, reason } => {
                    ("reverted", "-".to_string(), format!("{kind}: {}", truncate(reason, 60)))
                }
            };
            let outcome = if self.use_colors {
                Cell::new(label).fg(outcome_color(record))
            } else {
                Cell::new(format!("{} {label}", outcome_icon(record)))
            };
            table.add_row(vec![
                Cell::new(record.iteration),
                outcome,
                Cell::new(score),
                Cell::new(reason),
                Cell::new(format!(
                    "{:.1}s",
                    Duration::from_millis(record.elapsed_ms).as_secs_f64()
                )),
            ]);
        }

        table.to_string()
    }

    pub fn format_runs(&self, runs: &[RunInfo]) -> String {
        let mut table = self.create_base_table();
        table.set_header(Self::header(&["Run", "Last iteration", "Val", "Test", "Evaluations"]));

        for run in runs {
            let last = run
                .last_iteration
                .map_or_else(|| "-".to_string(), |i| i.to_string());
            table.add_row(vec![
                Cell::new(run.run_id.as_str()),
                Cell::new(last),
                Cell::new(format_score(run.latest_score.map(|s| s.val))),
                Cell::new(format_score(run.latest_score.map(|s| s.test))),
                Cell::new(run.evaluations),
            ]);
        }

        table.to_string()
    }

    pub fn format_transfer(&self, entries: &[TransferEntry]) -> String {
        let mut table = self.create_base_table();
        table.set_header(Self::header(&["Task", "Val", "Test"]));
        for entry in entries {
            table.add_row(vec![
                Cell::new(&entry.task),
                Cell::new(format_score(Some(entry.utility))),
                Cell::new(format_score(Some(entry.utility_test))),
            ]);
        }
        table.to_string()
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        if let Some(width) = self.max_width {
            table.set_width(width);
        }
        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

/// Colors unless `NO_COLOR` is set or the terminal cannot show them.
fn supports_color() -> bool {
    std::env::var_os("NO_COLOR").is_none() && console::colors_enabled()
}

const fn outcome_color(record: &IterationRecord) -> Color {
    if record.accepted() {
        Color::Green
    } else {
        Color::Yellow
    }
}

const fn outcome_icon(record: &IterationRecord) -> &'static str {
    if record.accepted() {
        "✓"
    } else {
        "↺"
    }
}
