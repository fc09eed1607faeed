//! Text rendering of a [`TaskDiff`].
//!
//! Both sides are serialized to YAML and compared line by line, producing a
//! unified diff with the task headers as file labels.

use colored::Colorize;
use similar::{ChangeTag, TextDiff};

use super::TaskDiff;
use crate::error::Result;

/// Options for rendering a diff.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Number of context lines around changes
    pub context_lines: usize,
    /// Whether to use color output
    pub use_color: bool,
    /// Whether to append an insertion/deletion summary
    pub show_stats: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            context_lines: 3,
            use_color: true,
            show_stats: false,
        }
    }
}

impl RenderOptions {
    pub fn with_color(mut self, use_color: bool) -> Self {
        self.use_color = use_color;
        self
    }

    pub fn with_context_lines(mut self, lines: usize) -> Self {
        self.context_lines = lines;
        self
    }

    pub fn with_stats(mut self, show: bool) -> Self {
        self.show_stats = show;
        self
    }
}

/// Line counts of a rendered diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub insertions: usize,
    pub deletions: usize,
    pub hunks: usize,
}

impl DiffStats {
    pub fn has_changes(&self) -> bool {
        self.insertions > 0 || self.deletions > 0
    }

    /// Short summary such as `+3 -1`.
    pub fn summary(&self, use_color: bool) -> String {
        let ins = format!("+{}", self.insertions);
        let del = format!("-{}", self.deletions);
        if use_color {
            format!("{} {}", ins.green(), del.red())
        } else {
            format!("{ins} {del}")
        }
    }
}

fn side_to_text(side: &indexmap::IndexMap<String, serde_json::Value>) -> Result<String> {
    if side.is_empty() {
        return Ok(String::new());
    }
    Ok(serde_yaml::to_string(side)?)
}

/// Render `diff` as a unified text diff.
///
/// Returns an empty string when both sides serialize identically.
pub fn render(diff: &TaskDiff, options: &RenderOptions) -> Result<(String, DiffStats)> {
    let old = side_to_text(&diff.before)?;
    let new = side_to_text(&diff.after)?;
    let text_diff = TextDiff::from_lines(&old, &new);
    let mut stats = DiffStats::default();
    let mut output = Vec::new();

    let mut unified = text_diff.unified_diff();
    for hunk in unified.context_radius(options.context_lines).iter_hunks() {
        stats.hunks += 1;
        let header = hunk.header().to_string();
        output.push(if options.use_color {
            header.cyan().to_string()
        } else {
            header
        });

        for change in hunk.iter_changes() {
            let content = change.value().trim_end_matches('\n');
            let line = match change.tag() {
                ChangeTag::Delete => {
                    stats.deletions += 1;
                    let line = format!("-{content}");
                    if options.use_color {
                        line.red().to_string()
                    } else {
                        line
                    }
                }
                ChangeTag::Insert => {
                    stats.insertions += 1;
                    let line = format!("+{content}");
                    if options.use_color {
                        line.green().to_string()
                    } else {
                        line
                    }
                }
                ChangeTag::Equal => format!(" {content}"),
            };
            output.push(line);
        }
    }

    if !stats.has_changes() {
        return Ok((String::new(), stats));
    }

    let old_header = format!("--- {}", diff.before_header);
    let new_header = format!("+++ {}", diff.after_header);
    let mut lines = if options.use_color {
        vec![
            old_header.red().bold().to_string(),
            new_header.green().bold().to_string(),
        ]
    } else {
        vec![old_header, new_header]
    };
    lines.extend(output);
    if options.show_stats {
        lines.push(stats.summary(options.use_color));
    }
    Ok((lines.join("\n"), stats))
}
