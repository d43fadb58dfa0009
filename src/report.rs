#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Result rendering: a summary table, a human-readable report, and the
//! machine-readable JSON array the judge consumes.

use anyhow::Result;
use colored::Colorize;
use itertools::Itertools;
use serde_json::Value;
use tabled::{
    Table, Tabled,
    settings::{Panel, Style},
};

use crate::runner::{ResultRecord, Status};

/// One summary-table row.
#[derive(Tabled)]
struct RecordRow {
    /// Case name.
    #[tabled(rename = "Case")]
    name:   String,
    /// Classified status.
    #[tabled(rename = "Status")]
    status: String,
    /// Attached tag codes.
    #[tabled(rename = "Tags")]
    tags:   String,
}

/// Renders the summary table for one stage's records.
pub fn render_table(stage_name: &str, records: &[ResultRecord]) -> String {
    let rows = records.iter().map(|r| RecordRow {
        name:   r.name.clone(),
        status: r.status.to_string(),
        tags:   r.tag_names().join(", "),
    });
    Table::new(rows)
        .with(Panel::header(format!("Evaluation results for {stage_name}")))
        .with(Style::modern())
        .to_string()
}

/// Colors a status for terminal detail headers.
fn colored_status(status: Status) -> String {
    match status {
        Status::Pass => "pass".green().to_string(),
        Status::Fail => "fail".red().to_string(),
        Status::Error => "error".yellow().to_string(),
        Status::Unknown => "unknown".dimmed().to_string(),
    }
}

/// Renders the full human-readable report: summary table, one detail
/// block per non-passing case, and a legend of the tags that appeared.
pub fn render_report(stage_name: &str, records: &[ResultRecord]) -> String {
    let mut out = render_table(stage_name, records);
    out.push('\n');

    for record in records.iter().filter(|r| r.status != Status::Pass) {
        out.push('\n');
        out.push_str(&format!(
            "{} {} {}\n",
            "--".bright_black(),
            record.name.bold(),
            colored_status(record.status)
        ));
        if !record.err.is_empty() {
            out.push_str(&record.err);
            out.push('\n');
        }
        if !record.msg.is_empty() {
            out.push_str(&record.msg);
            out.push('\n');
        }
    }

    if let Some(legend) = used_tag_legend(records) {
        out.push('\n');
        out.push_str(&legend);
        out.push('\n');
    }
    out
}

/// A legend covering only the visible tags the records mention, in
/// first-appearance order. `None` when no visible tag appeared.
fn used_tag_legend(records: &[ResultRecord]) -> Option<String> {
    /// One legend row.
    #[derive(Tabled)]
    struct LegendRow {
        /// Tag code.
        #[tabled(rename = "Tag")]
        name:        String,
        /// Tag description.
        #[tabled(rename = "Description")]
        description: String,
    }

    let rows: Vec<LegendRow> = records
        .iter()
        .flat_map(|r| r.tags.iter())
        .unique_by(|tag| tag.name())
        .filter(|tag| tag.visible())
        .map(|tag| LegendRow {
            name:        tag.name().to_string(),
            description: tag.description().to_string(),
        })
        .collect();
    if rows.is_empty() {
        return None;
    }
    Some(Table::new(rows).with(Style::modern()).to_string())
}

/// Serializes the records into the judge's JSON array.
///
/// Each element carries exactly the fields `name`, `status`, `tags`,
/// `err`, and `msg`.
pub fn render_json(records: &[ResultRecord]) -> Result<Value> {
    Ok(serde_json::to_value(records)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::{EvaluationTag, predefined_tags};

    fn tag(name: &str) -> EvaluationTag {
        predefined_tags().lookup(name).unwrap().clone()
    }

    fn sample_records() -> Vec<ResultRecord> {
        vec![
            ResultRecord {
                name:   "test_add".to_string(),
                status: Status::Pass,
                tags:   vec![tag("CO")],
                err:    String::new(),
                msg:    String::new(),
            },
            ResultRecord {
                name:   "test_sub".to_string(),
                status: Status::Fail,
                tags:   vec![tag("IO")],
                err:    "AssertionError: 3 != 4".to_string(),
                msg:    "expected subtraction".to_string(),
            },
        ]
    }

    #[test]
    fn json_records_carry_exactly_the_judge_fields() {
        let value = render_json(&sample_records()).unwrap();
        let first = value.as_array().unwrap().first().unwrap().as_object().unwrap();
        let mut keys: Vec<&str> = first.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["err", "msg", "name", "status", "tags"]);
        assert_eq!(first["status"], "pass");
    }

    #[test]
    fn report_details_cover_only_non_passing_cases() {
        colored::control::set_override(false);
        let report = render_report("stage", &sample_records());
        assert!(report.contains("test_sub"));
        assert!(report.contains("AssertionError: 3 != 4"));
        assert!(report.contains("expected subtraction"));
        // Passing cases appear in the table but never get a detail block.
        assert!(!report.contains("-- test_add"));
    }

    #[test]
    fn legend_lists_each_visible_tag_once() {
        let mut records = sample_records();
        records.push(records[1].clone());
        let legend = used_tag_legend(&records).unwrap();
        assert_eq!(legend.matches("IO").count(), 1);
    }
}
