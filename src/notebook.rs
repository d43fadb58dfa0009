#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Notebook document plumbing: a minimal cell model, load/save helpers,
//! and the metadata blocks stamped onto masters and submission forms.

use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{Context, Result, bail, ensure};
use serde_json::{Value, json};

/// The kinds of notebook cell the toolchain understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellType {
    /// An executable code cell.
    Code,
    /// A Markdown prose cell.
    Markdown,
    /// A raw text cell.
    Raw,
}

impl CellType {
    /// The `cell_type` property value.
    pub fn as_str(self) -> &'static str {
        match self {
            CellType::Code => "code",
            CellType::Markdown => "markdown",
            CellType::Raw => "raw",
        }
    }

    /// Parses a `cell_type` property value.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "code" => Ok(CellType::Code),
            "markdown" => Ok(CellType::Markdown),
            "raw" => Ok(CellType::Raw),
            other => bail!("Invalid cell_type `{other}`"),
        }
    }
}

/// A normalized cell: type plus joined, trimmed source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    /// The cell's kind.
    pub cell_type: CellType,
    /// The cell's source, joined into one string and trimmed.
    pub source:    String,
}

impl Cell {
    /// A code cell with the given source.
    pub fn code(source: impl Into<String>) -> Self {
        Self {
            cell_type: CellType::Code,
            source:    source.into(),
        }
    }

    /// A Markdown cell with the given source.
    pub fn markdown(source: impl Into<String>) -> Self {
        Self {
            cell_type: CellType::Markdown,
            source:    source.into(),
        }
    }

    /// Renders the cell in ipynb JSON form.
    pub fn to_ipynb(&self) -> Value {
        let source: Vec<String> = split_keepends(&self.source);
        match self.cell_type {
            CellType::Code => json!({
                "cell_type": "code",
                "execution_count": null,
                "metadata": {},
                "outputs": [],
                "source": source,
            }),
            _ => json!({
                "cell_type": self.cell_type.as_str(),
                "metadata": {},
                "source": source,
            }),
        }
    }
}

/// Splits source into lines that keep their trailing newline, the way
/// notebook files store cell sources.
fn split_keepends(source: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut rest = source;
    while let Some(idx) = rest.find('\n') {
        lines.push(rest[..=idx].to_string());
        rest = &rest[idx + 1..];
    }
    if !rest.is_empty() {
        lines.push(rest.to_string());
    }
    lines
}

/// Joins an ipynb `source` property (string or array of strings).
pub fn join_source(source: &Value) -> String {
    match source {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .concat(),
        _ => String::new(),
    }
}

/// Loads a notebook's raw cells and metadata.
pub fn load_cells(path: &Path) -> Result<(Vec<Value>, Value)> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Could not read notebook {}", path.display()))?;
    let data: Value = serde_json::from_str(&text)
        .with_context(|| format!("Invalid notebook JSON in {}", path.display()))?;

    let cells = data
        .get("cells")
        .and_then(Value::as_array)
        .with_context(|| format!("Invalid notebook: {} has no 'cells' property", path.display()))?
        .clone();
    let metadata = data
        .get("metadata")
        .with_context(|| {
            format!("Invalid notebook: {} has no 'metadata' property", path.display())
        })?
        .clone();
    Ok((cells, metadata))
}

/// Normalizes raw cells: joins sources, trims, drops empty cells.
pub fn normalized_cells(raw_cells: &[Value]) -> Result<Vec<Cell>> {
    let mut cells = Vec::new();
    for raw in raw_cells {
        let cell_type = raw
            .get("cell_type")
            .and_then(Value::as_str)
            .context("Invalid notebook: cell has no 'cell_type' property")?;
        let source = raw
            .get("source")
            .context("Invalid notebook: cell has no 'source' property")?;
        let cell = Cell {
            cell_type: CellType::parse(cell_type)?,
            source:    join_source(source).trim().to_string(),
        };
        if !cell.source.is_empty() {
            cells.push(cell);
        }
    }
    Ok(cells)
}

/// Saves cells and metadata as an nbformat-4 notebook.
pub fn save_as_notebook(path: &Path, cells: Vec<Value>, metadata: Value) -> Result<()> {
    let ipynb = json!({
        "cells": cells,
        "metadata": metadata,
        "nbformat": 4,
        "nbformat_minor": 4,
    });
    let mut text = serde_json::to_string_pretty(&ipynb)?;
    text.push('\n');
    fs::write(path, text).with_context(|| format!("Could not write {}", path.display()))
}

/// Kernel and language metadata shared by every generated notebook.
fn common_metadata() -> Value {
    json!({
        "kernelspec": {
            "display_name": "Python 3",
            "language": "python",
            "name": "python3",
        },
        "language_info": { "name": "" },
    })
}

/// Metadata stamped onto a generated submission form.
pub fn submission_metadata(key_to_version: &BTreeMap<String, String>, extraction: bool) -> Value {
    let mut metadata = common_metadata();
    metadata["judge_submission"] = json!({
        "exercises": key_to_version,
        "extraction": extraction,
    });
    metadata
}

/// Metadata stamped onto an exercise master.
pub fn master_metadata(
    exercise_key: &str,
    autograde: bool,
    version: &str,
    title: &str,
    deadlines: &Value,
) -> Value {
    let mut metadata = common_metadata();
    metadata["judge_master"] = json!({
        "autograde": autograde,
        "deadlines": deadlines,
        "exercise_key": exercise_key,
        "title": title,
        "version": version,
    });
    metadata
}

/// Reads the version string from master metadata, empty if unset.
pub fn master_metadata_version(metadata: &Value) -> String {
    metadata
        .pointer("/judge_master/version")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Reads the deadlines block from master metadata.
pub fn master_metadata_deadlines(metadata: &Value) -> Value {
    metadata
        .pointer("/judge_master/deadlines")
        .cloned()
        .unwrap_or_else(|| json!({}))
}

/// Marker metadata attached to the uniquely-named answer cell in a
/// generated form, so grading can locate it later.
pub fn answer_cell_metadata() -> Value {
    json!({ "name": "answer_cell", "deletable": false })
}

/// Finds the single cell carrying the given metadata `name`.
///
/// Fails with a lookup error if zero or more than one cell matches.
pub fn find_named_cell<'a>(cells: &'a [Value], name: &str) -> Result<&'a Value> {
    let matches: Vec<&Value> = cells
        .iter()
        .filter(|c| {
            c.pointer("/metadata/name").and_then(Value::as_str) == Some(name)
        })
        .collect();
    ensure!(
        matches.len() == 1,
        "Expected exactly one cell named `{name}`, found {}",
        matches.len()
    );
    Ok(matches[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_cells_round_trip_through_ipynb_form() {
        let cell = Cell::code("x = 1\ny = 2");
        let ipynb = cell.to_ipynb();
        assert_eq!(ipynb["cell_type"], "code");
        assert_eq!(ipynb["outputs"], json!([]));
        let joined = join_source(&ipynb["source"]);
        assert_eq!(joined, "x = 1\ny = 2");
    }

    #[test]
    fn normalization_drops_empty_cells_and_joins_sources() {
        let raw = vec![
            json!({"cell_type": "markdown", "source": ["# Title\n", "body"]}),
            json!({"cell_type": "code", "source": []}),
            json!({"cell_type": "code", "source": "print(1)\n"}),
        ];
        let cells = normalized_cells(&raw).unwrap();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].source, "# Title\nbody");
        assert_eq!(cells[1].cell_type, CellType::Code);
    }

    #[test]
    fn named_cell_lookup_requires_exactly_one_match() {
        let answer = json!({
            "cell_type": "code",
            "metadata": answer_cell_metadata(),
            "source": ["x = 1\n"],
        });
        let plain = json!({"cell_type": "code", "metadata": {}, "source": ["y = 2\n"]});

        let cells = vec![plain.clone(), answer.clone()];
        assert!(find_named_cell(&cells, "answer_cell").is_ok());

        let none = vec![plain.clone()];
        assert!(find_named_cell(&none, "answer_cell").is_err());

        let two = vec![answer.clone(), answer];
        assert!(find_named_cell(&two, "answer_cell").is_err());
    }

    #[test]
    fn submission_metadata_carries_versions() {
        let mut versions = BTreeMap::new();
        versions.insert("ex1-1".to_string(), "abc123".to_string());
        let metadata = submission_metadata(&versions, true);
        assert_eq!(metadata["judge_submission"]["exercises"]["ex1-1"], "abc123");
        assert_eq!(metadata["kernelspec"]["language"], "python");
    }
}
