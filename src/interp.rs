#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Interpreter plumbing for stages that execute the learner's answer.
//!
//! The engine imposes no timeout or resource limit of its own; grading
//! always runs inside the external judge sandbox, which enforces the
//! limits declared in the judge setting.

use std::{path::PathBuf, process::Command};

use anyhow::{Context, Result, anyhow};
use which::which;

use crate::{
    analysis::Parser,
    case::{CaseError, ExceptionKind},
};

/// Finds the Python interpreter on the path.
pub fn python_path() -> Result<PathBuf> {
    which("python3")
        .or_else(|_| which("python"))
        .context("Cannot find a Python interpreter on path (python3)")
}

/// Parses a Python traceback on stderr into a typed error.
///
/// The last non-empty line of a traceback is `ClassName: message` (or a
/// bare `ClassName`); anything unrecognizable maps to the root class.
pub fn parse_traceback(stderr: &str) -> CaseError {
    let last = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or_default()
        .trim();

    let (class, message) = match last.split_once(':') {
        Some((class, message)) => (class.trim(), message.trim()),
        None => (last, ""),
    };
    let kind = if class.chars().all(|c| c.is_ascii_alphanumeric()) && !class.is_empty() {
        ExceptionKind::from_name(class)
    } else {
        ExceptionKind::Exception
    };

    CaseError::new(kind, message).with_traceback(stderr.trim_end())
}

/// The learner's answer, executed as an importable unit.
///
/// Exposed to `exec_answer` stages as `ctx.answer()`; each evaluation
/// re-enters the interpreter with the answer's directory as the working
/// directory, so the namespace never leaks between runs.
#[derive(Debug, Clone)]
pub struct Answer {
    /// Directory holding the answer module.
    dir:    PathBuf,
    /// Module name, without the `.py` suffix.
    module: String,
    /// The answer's source code.
    source: String,
}

impl Answer {
    /// Imports the module once to validate it, then returns a handle.
    ///
    /// A failure here is a stage-setup failure: the answer's top level
    /// raised before any case could run.
    pub fn load(dir: impl Into<PathBuf>, module: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        let module = module.into();
        let path = dir.join(format!("{module}.py"));
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("Could not read answer module {}", path.display()))?;

        let answer = Self { dir, module, source };
        answer
            .run(&format!("import {}", answer.module))
            .map_err(|e| anyhow!("Answer module raised at import: {}", e.formatted()))?;
        Ok(answer)
    }

    /// The answer's source code.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names the answer binds at module level, found statically.
    pub fn defined_names(&self) -> Result<Vec<String>> {
        Ok(Parser::new(self.source.as_str())?.top_level_bindings())
    }

    /// Evaluates `module.expr` and returns its `repr`.
    pub fn eval(&self, expr: &str) -> Result<String, CaseError> {
        let program = format!(
            "import {module}\nprint(repr({module}.{expr}), end='')",
            module = self.module
        );
        self.run(&program)
    }

    /// Calls `module.func(args...)` and returns the result's `repr`.
    ///
    /// Arguments are Python expressions, already rendered as text.
    pub fn call(&self, func: &str, args: &[&str]) -> Result<String, CaseError> {
        self.eval(&format!("{func}({})", args.join(", ")))
    }

    /// Runs a program in the answer's directory, classifying stderr.
    fn run(&self, program: &str) -> Result<String, CaseError> {
        let python = python_path().map_err(|e| {
            CaseError::new(ExceptionKind::RuntimeError, format!("{e:#}"))
        })?;
        let output = Command::new(python)
            .arg("-c")
            .arg(program)
            .current_dir(&self.dir)
            .output()
            .map_err(|e| {
                CaseError::new(ExceptionKind::OsError, format!("Failed to run interpreter: {e}"))
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(parse_traceback(&String::from_utf8_lossy(&output.stderr)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_traceback_last_lines() {
        let stderr = "Traceback (most recent call last):\n  File \"<string>\", line 1, in \
                      <module>\nNameError: name 'sqrt' is not defined\n";
        let err = parse_traceback(stderr);
        assert_eq!(err.kind, ExceptionKind::NameError);
        assert_eq!(err.message, "name 'sqrt' is not defined");
        assert!(err.traceback.starts_with("Traceback"));
    }

    #[test]
    fn unknown_classes_map_to_the_root() {
        let err = parse_traceback("somemodule.CustomBoom: it broke\n");
        assert_eq!(err.kind, ExceptionKind::Exception);
    }

    #[test]
    fn bare_class_lines_parse_without_message() {
        let err = parse_traceback("KeyboardInterrupt\n");
        assert_eq!(err.kind, ExceptionKind::Exception);
        assert_eq!(err.message, "");
    }
}
