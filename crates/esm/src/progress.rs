//! 📊 progress.rs: "Are we there yet?" Every pipeline, every time, forever.
//!
//! Two bars on one `MultiProgress`: documents pulled off the scroll, and documents
//! settled by the bulk workers. Then, once it's all over, a comfy table with the
//! final score, so the 3am operator has something to screenshot for the postmortem.
//!
//! ⚠️ Watching the bars will not make them go faster. Science says no. 🦆

use std::time::Duration;

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::supervisors::MigrationReport;

/// 🔢 "1000000" → "1,000,000". You're welcome, eyes.
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS if you should probably call your mom.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

fn bar_style(color: &str) -> ProgressStyle {
    // -- 🎨 the template is a literal; if it ever fails to parse we just go plain
    ProgressStyle::default_bar()
        .template(&format!(
            "{{prefix:>6}} [{{bar:40.{color}/blue}}] {{pos}}/{{len}} ({{per_sec}}, eta {{eta}})"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

/// 📊 The scroll bar and the bulk bar, sharing one terminal.
///
/// Cheap to clone; every clone drives the same bars.
#[derive(Clone)]
pub(crate) struct MigrationProgress {
    scroll: ProgressBar,
    bulk: ProgressBar,
    fan_out: u64,
    // -- 🧷 keeps the draw target alive as long as any clone is around
    _multi: MultiProgress,
}

impl std::fmt::Debug for MigrationProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("MigrationProgress")
            .field("scroll", &self.scroll.position())
            .field("bulk", &self.bulk.position())
            .field("fan_out", &self.fan_out)
            .finish()
    }
}

impl MigrationProgress {
    pub(crate) fn new(visible: bool, fan_out: usize) -> Self {
        let multi = if visible {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };
        let scroll = multi.add(ProgressBar::new(0));
        scroll.set_style(bar_style("cyan"));
        scroll.set_prefix("scroll");
        let bulk = multi.add(ProgressBar::new(0));
        bulk.set_style(bar_style("green"));
        bulk.set_prefix("bulk");
        Self {
            scroll,
            bulk,
            fan_out: fan_out.max(1) as u64,
            _multi: multi,
        }
    }

    /// 📏 A slice just learned its share of the total. Both bars get longer.
    pub(crate) fn add_expected(&self, hits: u64) {
        self.scroll.inc_length(hits);
        self.bulk.inc_length(hits * self.fan_out);
    }

    pub(crate) fn scrolled(&self, docs: u64) {
        self.scroll.inc(docs);
    }

    pub(crate) fn settled(&self, docs: u64) {
        self.bulk.inc(docs);
    }

    pub(crate) fn scroll_position(&self) -> u64 {
        self.scroll.position()
    }

    pub(crate) fn bulk_position(&self) -> u64 {
        self.bulk.position()
    }

    pub(crate) fn finish(&self) {
        self.scroll.finish();
        self.bulk.finish();
    }
}

fn right(text: impl ToString) -> Cell {
    Cell::new(text.to_string()).set_alignment(CellAlignment::Right)
}

/// 🍽️ Render the final score as a comfy table.
pub fn render_summary(report: &MigrationReport) -> String {
    let summary = &report.summary;
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.add_row(vec![Cell::new("phase"), right(format!("{:?}", report.phase))]);
    table.add_row(vec![Cell::new("read"), right(format_number(summary.read))]);
    table.add_row(vec![Cell::new("written"), right(format_number(summary.written))]);
    table.add_row(vec![Cell::new("succeeded"), right(format_number(summary.succeeded))]);
    table.add_row(vec![
        Cell::new("version conflicts"),
        right(format_number(summary.version_conflicts)),
    ]);
    table.add_row(vec![
        Cell::new("fatal errors"),
        right(format_number(summary.fatal_errors)),
    ]);
    if summary.retried > 0 {
        table.add_row(vec![Cell::new("retried"), right(format_number(summary.retried))]);
    }
    if summary.failed_slices > 0 {
        table.add_row(vec![
            Cell::new("failed slices"),
            right(format_number(summary.failed_slices)),
        ]);
    }
    table.add_row(vec![Cell::new("elapsed"), right(format_duration(report.elapsed))]);
    if let Some(cause) = &report.cause {
        table.add_row(vec![Cell::new("cause"), Cell::new(cause)]);
    }

    let mut rendered = table.to_string();

    if !summary.failures_by_kind.is_empty() {
        let mut reasons = Table::new();
        reasons.load_preset(NOTHING);
        reasons.set_header(vec![Cell::new("failure"), right("count")]);
        for (kind, count) in &summary.failures_by_kind {
            reasons.add_row(vec![Cell::new(kind), right(format_number(*count))]);
        }
        rendered.push_str("\n\n");
        rendered.push_str(&reasons.to_string());
    }

    if !summary.failed_documents.is_empty() {
        let mut itemized = Table::new();
        itemized.load_preset(NOTHING);
        itemized.set_content_arrangement(ContentArrangement::Dynamic);
        itemized.set_header(vec!["document", "failure", "reason"]);
        for failed in &summary.failed_documents {
            itemized.add_row(vec![
                failed.document.as_str(),
                failed.kind.as_str(),
                failed.reason.as_str(),
            ]);
        }
        rendered.push_str("\n\n");
        rendered.push_str(&itemized.to_string());
        if summary.unlisted_failures > 0 {
            rendered.push_str(&format!(
                "\n... and {} more",
                format_number(summary.unlisted_failures)
            ));
        }
    }

    rendered
}
