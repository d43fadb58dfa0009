#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Evaluation cases: one named, executable check bound to an evaluation
//! role, with declaration-time and run-time tag assignment.
//!
//! A case body is an ordinary closure over a [`CaseContext`]. Declaring a
//! case appends a descriptor to its stage; there is no dynamic method
//! synthesis. Assertion failures are a recognized soft-failure signal,
//! distinct from arbitrary exceptions raised by learner code.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{interp::Answer, tags::TagRef};

/// The evaluation role of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseRole {
    /// An informational check; participates in tag reporting but not in
    /// the stage's pass/fail aggregate.
    Check,
    /// A scored assertion; every test-role case must pass for the stage
    /// to pass.
    Test,
}

/// Python-style exception classes observed while evaluating learner code.
///
/// The dynamic class hierarchy is modeled as a closed enum with an
/// explicit subclass relation over the classes grading cares about.
/// Unrecognized classes map to [`ExceptionKind::Exception`], the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExceptionKind {
    /// Root of the hierarchy.
    Exception,
    /// Arithmetic failures.
    ArithmeticError,
    /// Division by zero; subclass of `ArithmeticError`.
    ZeroDivisionError,
    /// Attribute access on an object that lacks it.
    AttributeError,
    /// Import machinery failure.
    ImportError,
    /// A module could not be found; subclass of `ImportError`.
    ModuleNotFoundError,
    /// Invalid subscript lookups.
    LookupError,
    /// Sequence index out of range; subclass of `LookupError`.
    IndexError,
    /// Mapping key not found; subclass of `LookupError`.
    KeyError,
    /// An unbound name was referenced.
    NameError,
    /// A local was referenced before assignment; subclass of `NameError`.
    UnboundLocalError,
    /// Operating-system-level failure.
    OsError,
    /// A file or directory was not found; subclass of `OsError`.
    FileNotFoundError,
    /// Generic runtime failure.
    RuntimeError,
    /// Interpreter recursion limit hit; subclass of `RuntimeError`.
    RecursionError,
    /// The source could not be parsed.
    SyntaxError,
    /// An operation was applied to a value of the wrong type.
    TypeError,
    /// An operation received a value of the right type but wrong value.
    ValueError,
}

impl ExceptionKind {
    /// The class's direct superclass, `None` for the root.
    fn parent(self) -> Option<ExceptionKind> {
        use ExceptionKind::*;
        match self {
            Exception => None,
            ZeroDivisionError => Some(ArithmeticError),
            ModuleNotFoundError => Some(ImportError),
            IndexError | KeyError => Some(LookupError),
            UnboundLocalError => Some(NameError),
            FileNotFoundError => Some(OsError),
            RecursionError => Some(RuntimeError),
            _ => Some(Exception),
        }
    }

    /// Whether `self` is `ancestor` or one of its subclasses.
    pub fn is_subclass_of(self, ancestor: ExceptionKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == ancestor {
                return true;
            }
            current = kind.parent();
        }
        false
    }

    /// The class name as it appears in a traceback.
    pub fn name(self) -> &'static str {
        use ExceptionKind::*;
        match self {
            Exception => "Exception",
            ArithmeticError => "ArithmeticError",
            ZeroDivisionError => "ZeroDivisionError",
            AttributeError => "AttributeError",
            ImportError => "ImportError",
            ModuleNotFoundError => "ModuleNotFoundError",
            LookupError => "LookupError",
            IndexError => "IndexError",
            KeyError => "KeyError",
            NameError => "NameError",
            UnboundLocalError => "UnboundLocalError",
            OsError => "OSError",
            FileNotFoundError => "FileNotFoundError",
            RuntimeError => "RuntimeError",
            RecursionError => "RecursionError",
            SyntaxError => "SyntaxError",
            TypeError => "TypeError",
            ValueError => "ValueError",
        }
    }

    /// Maps a traceback class name back to a kind; unknown names map to
    /// the root class.
    pub fn from_name(name: &str) -> ExceptionKind {
        use ExceptionKind::*;
        match name {
            "ArithmeticError" => ArithmeticError,
            "ZeroDivisionError" => ZeroDivisionError,
            "AttributeError" => AttributeError,
            "ImportError" => ImportError,
            "ModuleNotFoundError" => ModuleNotFoundError,
            "LookupError" => LookupError,
            "IndexError" => IndexError,
            "KeyError" => KeyError,
            "NameError" => NameError,
            "UnboundLocalError" => UnboundLocalError,
            "OSError" | "IOError" => OsError,
            "FileNotFoundError" => FileNotFoundError,
            "RuntimeError" => RuntimeError,
            "RecursionError" => RecursionError,
            "SyntaxError" | "IndentationError" | "TabError" => SyntaxError,
            "TypeError" => TypeError,
            "ValueError" => ValueError,
            _ => Exception,
        }
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A hard error raised while evaluating a case: any failure that is not
/// one of the case's own assertions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct CaseError {
    /// The exception class.
    pub kind:      ExceptionKind,
    /// Short failure message.
    pub message:   String,
    /// Full formatted traceback, possibly empty.
    pub traceback: String,
}

impl CaseError {
    /// Constructs an error without a traceback.
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            traceback: String::new(),
        }
    }

    /// Attaches a formatted traceback.
    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = traceback.into();
        self
    }

    /// The text recorded in a result record's `err` field.
    pub fn formatted(&self) -> String {
        if self.traceback.is_empty() {
            format!("{self}")
        } else {
            self.traceback.clone()
        }
    }
}

/// The two ways a case body can come back unsuccessful.
#[derive(Debug, Clone, Error)]
pub enum CaseFailure {
    /// A soft failure: one of the case's own assertions did not hold.
    #[error("AssertionError: {0}")]
    Assertion(String),
    /// A hard error: an unexpected exception from case or learner code.
    #[error(transparent)]
    Exception(#[from] CaseError),
}

/// Tolerance for approximate numeric comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tolerance {
    /// Equal when the difference rounds to zero at this many decimal
    /// places.
    Places(u32),
    /// Equal when the absolute difference is at most this delta.
    Delta(f64),
}

/// The run context threaded through every case body for one execution.
///
/// Owns the dynamic tag assignments, the dynamically registered error-tag
/// rules, and the diagnostic message side channel. A fresh context is
/// constructed per case, so nothing leaks between cases or between runs.
pub struct CaseContext<'a> {
    /// The learner's submission source, if the stage bound one.
    submission:      Option<&'a str>,
    /// The executed answer namespace, if the stage requested it.
    answer:          Option<&'a Answer>,
    /// Tag attached when the case passes.
    ok_tag:          Option<TagRef>,
    /// Tag attached when the case fails its own assertions.
    fail_tag:        Option<TagRef>,
    /// Exception-class-to-tag rules, in registration order.
    error_tag_rules: Vec<(ExceptionKind, TagRef)>,
    /// Diagnostic message recorded during the run.
    message:         String,
}

impl<'a> CaseContext<'a> {
    /// Constructs a fresh context for one case execution.
    pub(crate) fn new(submission: Option<&'a str>, answer: Option<&'a Answer>) -> Self {
        Self {
            submission,
            answer,
            ok_tag: None,
            fail_tag: None,
            error_tag_rules: Vec::new(),
            message: String::new(),
        }
    }

    /// The submission source bound by the stage.
    pub fn submission(&self) -> Result<&'a str, CaseFailure> {
        self.submission.ok_or_else(|| {
            CaseError::new(ExceptionKind::RuntimeError, "no submission bound to this stage").into()
        })
    }

    /// The executed answer namespace.
    pub fn answer(&self) -> Result<&'a Answer, CaseFailure> {
        self.answer.ok_or_else(|| {
            CaseError::new(ExceptionKind::RuntimeError, "stage does not execute the answer").into()
        })
    }

    /// Marks a conditional success with the given tag.
    pub fn set_ok_tag(&mut self, tag: impl Into<TagRef>) {
        self.ok_tag = Some(tag.into());
    }

    /// Overrides the tag attached on assertion failure.
    pub fn set_fail_tag(&mut self, tag: impl Into<TagRef>) {
        self.fail_tag = Some(tag.into());
    }

    /// Registers an exception-class-to-tag rule for this execution.
    pub fn set_error_tag(&mut self, tag: impl Into<TagRef>, kind: ExceptionKind) {
        self.error_tag_rules.push((kind, tag.into()));
    }

    /// Appends a line to the diagnostic message side channel.
    pub fn log(&mut self, message: impl AsRef<str>) {
        if !self.message.is_empty() {
            self.message.push('\n');
        }
        self.message.push_str(message.as_ref());
    }

    /// Current ok tag, if any.
    pub(crate) fn ok_tag(&self) -> Option<&TagRef> {
        self.ok_tag.as_ref()
    }

    /// Current fail tag, if any.
    pub(crate) fn fail_tag(&self) -> Option<&TagRef> {
        self.fail_tag.as_ref()
    }

    /// Rules registered during this execution.
    pub(crate) fn error_tag_rules(&self) -> &[(ExceptionKind, TagRef)] {
        &self.error_tag_rules
    }

    /// The diagnostic message recorded so far.
    pub(crate) fn message(&self) -> &str {
        &self.message
    }

    /// Seeds declaration-time state before the body runs.
    pub(crate) fn seed(
        &mut self,
        ok_tag: Option<TagRef>,
        fail_tag: Option<TagRef>,
        rules: &[(ExceptionKind, TagRef)],
    ) {
        self.ok_tag = ok_tag;
        self.fail_tag = fail_tag;
        self.error_tag_rules.extend_from_slice(rules);
    }

    /// Asserts that a condition holds.
    pub fn assert_true(&self, condition: bool, what: &str) -> Result<(), CaseFailure> {
        if condition {
            Ok(())
        } else {
            Err(CaseFailure::Assertion(format!("{what} is not true")))
        }
    }

    /// Asserts that a condition does not hold.
    pub fn assert_false(&self, condition: bool, what: &str) -> Result<(), CaseFailure> {
        if condition {
            Err(CaseFailure::Assertion(format!("{what} is not false")))
        } else {
            Ok(())
        }
    }

    /// Asserts `left == right`.
    pub fn assert_eq<T: fmt::Debug + PartialEq>(
        &self,
        left: T,
        right: T,
    ) -> Result<(), CaseFailure> {
        if left == right {
            Ok(())
        } else {
            Err(CaseFailure::Assertion(format!("{left:?} != {right:?}")))
        }
    }

    /// Asserts `left != right`.
    pub fn assert_ne<T: fmt::Debug + PartialEq>(
        &self,
        left: T,
        right: T,
    ) -> Result<(), CaseFailure> {
        if left != right {
            Ok(())
        } else {
            Err(CaseFailure::Assertion(format!("{left:?} == {right:?}")))
        }
    }

    /// Asserts that `needle` is a member of `haystack`.
    pub fn assert_in<T: fmt::Debug + PartialEq>(
        &self,
        needle: T,
        haystack: &[T],
    ) -> Result<(), CaseFailure> {
        if haystack.contains(&needle) {
            Ok(())
        } else {
            Err(CaseFailure::Assertion(format!("{needle:?} not found in {haystack:?}")))
        }
    }

    /// Asserts approximate equality under the given tolerance.
    pub fn assert_almost_eq(
        &self,
        left: f64,
        right: f64,
        tolerance: Tolerance,
    ) -> Result<(), CaseFailure> {
        let close = match tolerance {
            Tolerance::Places(places) => {
                (left - right).abs() < 0.5 * 10f64.powi(-(places as i32))
            }
            Tolerance::Delta(delta) => (left - right).abs() <= delta,
        };
        if close {
            Ok(())
        } else {
            Err(CaseFailure::Assertion(format!(
                "{left:?} != {right:?} within {tolerance:?}"
            )))
        }
    }
}

/// The executable body of a case.
pub type CaseBody = Box<dyn Fn(&mut CaseContext) -> Result<(), CaseFailure> + Send + Sync>;

/// One named, executable check bound to a declared role.
pub struct EvaluationCase {
    /// Case identifier, unique within its stage.
    name:            String,
    /// Informational check or scored test.
    role:            CaseRole,
    /// Fail tag fixed at declaration time, for check-role cases.
    fixed_fail_tag:  Option<TagRef>,
    /// Declaration-time exception-class-to-tag rules.
    error_tag_rules: Vec<(ExceptionKind, TagRef)>,
    /// The check itself.
    body:            CaseBody,
}

impl EvaluationCase {
    /// Declares an informational check with an optional fixed fail tag.
    ///
    /// The body may call [`CaseContext::set_ok_tag`] to mark a conditional
    /// success; no ok tag is pre-assigned.
    pub fn check(
        name: impl Into<String>,
        fail_tag: Option<TagRef>,
        body: impl Fn(&mut CaseContext) -> Result<(), CaseFailure> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name:            name.into(),
            role:            CaseRole::Check,
            fixed_fail_tag:  fail_tag,
            error_tag_rules: Vec::new(),
            body:            Box::new(body),
        }
    }

    /// Declares a scored assertion.
    ///
    /// On entry the ok tag is pre-set to `CO` and the fail tag to `IO`;
    /// the body performs the actual comparison.
    pub fn test(
        name: impl Into<String>,
        body: impl Fn(&mut CaseContext) -> Result<(), CaseFailure> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name:            name.into(),
            role:            CaseRole::Test,
            fixed_fail_tag:  None,
            error_tag_rules: Vec::new(),
            body:            Box::new(body),
        }
    }

    /// Registers a declaration-time exception-class-to-tag rule.
    ///
    /// When the case raises an uncaught exception, every rule whose class
    /// is a superclass of the raised class applies, in registration order.
    pub fn error_tag(mut self, tag: impl Into<TagRef>, kind: ExceptionKind) -> Self {
        self.error_tag_rules.push((kind, tag.into()));
        self
    }

    /// The case's identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The case's declared role.
    pub fn role(&self) -> CaseRole {
        self.role
    }

    /// The fail tag fixed at declaration, if any.
    pub(crate) fn fixed_fail_tag(&self) -> Option<&TagRef> {
        self.fixed_fail_tag.as_ref()
    }

    /// Declaration-time error-tag rules.
    pub(crate) fn declared_error_tag_rules(&self) -> &[(ExceptionKind, TagRef)] {
        &self.error_tag_rules
    }

    /// Executes the body against the given context.
    pub(crate) fn execute(&self, ctx: &mut CaseContext) -> Result<(), CaseFailure> {
        (self.body)(ctx)
    }
}

impl fmt::Debug for EvaluationCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationCase")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("fixed_fail_tag", &self.fixed_fail_tag)
            .field("error_tag_rules", &self.error_tag_rules)
            .finish_non_exhaustive()
    }
}
