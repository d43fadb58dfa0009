#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Semantic outcome tags and the registry that validates and resolves them.
//!
//! A tag is a short, styled label attached to a case outcome ("correct
//! output", "no definition", ...). Tags are immutable once constructed;
//! the registry rejects malformed or duplicate tags eagerly, at
//! configuration-build time.

use std::sync::LazyLock;

use anyhow::{Context, Result, ensure};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tabled::{
    Table, Tabled,
    settings::{Panel, Style},
};

/// Tag names are short alphanumeric codes.
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Za-z]{1,16}$").expect("valid tag name pattern"));

/// Colors are `#RRGGBB` hex strings.
static COLOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("valid color pattern"));

/// A named semantic outcome tag with display styling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationTag {
    /// Short alphanumeric code, at most 16 characters.
    name:             String,
    /// Human-readable description.
    description:      String,
    /// Background color as `#RRGGBB`.
    background_color: String,
    /// Font color as `#RRGGBB`.
    font_color:       String,
    /// Whether the tag is shown to learners.
    visible:          bool,
}

impl EvaluationTag {
    /// Constructs a tag, validating every field.
    pub fn new(
        name: &str,
        description: &str,
        background_color: &str,
        font_color: &str,
        visible: bool,
    ) -> Result<Self> {
        ensure!(NAME_RE.is_match(name), "Tag name `{name}` must match [0-9A-Za-z]{{1,16}}");
        ensure!(
            !description.chars().any(char::is_control),
            "Tag `{name}` has a control character in its description"
        );
        for color in [background_color, font_color] {
            ensure!(COLOR_RE.is_match(color), "Tag `{name}` has a malformed color `{color}`");
        }
        Ok(Self {
            name:             name.to_string(),
            description:      description.to_string(),
            background_color: background_color.to_string(),
            font_color:       font_color.to_string(),
            visible,
        })
    }

    /// The tag's short code.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tag's human-readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Background color as `#RRGGBB`.
    pub fn background_color(&self) -> &str {
        &self.background_color
    }

    /// Font color as `#RRGGBB`.
    pub fn font_color(&self) -> &str {
        &self.font_color
    }

    /// Whether the tag is shown to learners.
    pub fn visible(&self) -> bool {
        self.visible
    }
}

/// A reference to a tag: either a literal tag value or a registry name.
///
/// Case authors usually refer to predefined tags by their short code and
/// construct ad hoc tags inline; both forms resolve through
/// [`TagRegistry::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagRef {
    /// A name to be looked up in the registry.
    Name(String),
    /// A literal, already-constructed tag.
    Literal(EvaluationTag),
}

impl From<&str> for TagRef {
    fn from(name: &str) -> Self {
        TagRef::Name(name.to_string())
    }
}

impl From<String> for TagRef {
    fn from(name: String) -> Self {
        TagRef::Name(name)
    }
}

impl From<EvaluationTag> for TagRef {
    fn from(tag: EvaluationTag) -> Self {
        TagRef::Literal(tag)
    }
}

/// A fixed, ordered set of distinct-by-name tags.
#[derive(Debug, Clone)]
pub struct TagRegistry {
    /// Tags in registration order.
    tags: Vec<EvaluationTag>,
}

impl TagRegistry {
    /// Builds a registry from the given tags.
    ///
    /// Fails if two tags share a name. Field-format invariants are enforced
    /// by [`EvaluationTag::new`] at construction time.
    pub fn register(tags: Vec<EvaluationTag>) -> Result<Self> {
        for (i, tag) in tags.iter().enumerate() {
            ensure!(
                !tags[..i].iter().any(|t| t.name == tag.name),
                "Duplicate tag name `{}`",
                tag.name
            );
        }
        Ok(Self { tags })
    }

    /// Looks a tag up by its short code.
    pub fn lookup(&self, name: &str) -> Result<&EvaluationTag> {
        self.tags
            .iter()
            .find(|t| t.name == name)
            .with_context(|| format!("No tag named `{name}` is registered"))
    }

    /// Whether a tag with the given name is registered. Never fails.
    pub fn contains(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t.name == name)
    }

    /// Resolves a [`TagRef`] to a tag value.
    pub fn resolve(&self, tag: &TagRef) -> Result<EvaluationTag> {
        match tag {
            TagRef::Name(name) => self.lookup(name).cloned(),
            TagRef::Literal(tag) => Ok(tag.clone()),
        }
    }

    /// Tags in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &EvaluationTag> {
        self.tags.iter()
    }

    /// Renders the registry as a legend mapping code to description.
    pub fn legend(&self) -> String {
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

        let rows = self.tags.iter().map(|t| LegendRow {
            name:        t.name.clone(),
            description: t.description.clone(),
        });
        Table::new(rows)
            .with(Panel::header("Tag legend"))
            .with(Style::modern())
            .to_string()
    }
}

/// The predefined registry shared by the stage/case layer.
///
/// These are conventions consumed by stage and case declarations, not
/// enforced by the registry itself.
pub fn predefined_tags() -> TagRegistry {
    /// Compact constructor for the table below; inputs are static and valid.
    fn tag(name: &str, description: &str, bg: &str, fg: &str, visible: bool) -> EvaluationTag {
        EvaluationTag::new(name, description, bg, fg, visible).expect("predefined tag is valid")
    }

    TagRegistry::register(vec![
        tag("CO", "Correct output", "#d4edda", "#155724", true),
        tag("IO", "Incorrect output", "#f8d7da", "#721c24", true),
        tag("ND", "No definition found", "#fff3cd", "#856404", true),
        tag("NF", "Placeholder not filled in", "#fff3cd", "#856404", true),
        tag("IM", "Required import missing", "#fff3cd", "#856404", true),
        tag("SE", "Syntax error", "#f8d7da", "#721c24", true),
        tag("SCE", "Shell command in code", "#f8d7da", "#721c24", true),
        tag("MCE", "Magic command in code", "#f8d7da", "#721c24", true),
        tag("UMI", "Unsupported module import", "#f8d7da", "#721c24", true),
        tag("TE", "Error at top level", "#f8d7da", "#721c24", true),
        tag("IOT", "I/O at top level", "#f8d7da", "#721c24", true),
        tag("QE", "Question marker present", "#d1ecf1", "#0c5460", false),
    ])
    .expect("predefined tags are distinct")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_names() {
        assert!(EvaluationTag::new("", "empty", "#ffffff", "#000000", true).is_err());
        assert!(EvaluationTag::new("has space", "sp", "#ffffff", "#000000", true).is_err());
        assert!(
            EvaluationTag::new("WayTooLongTagName17", "long", "#ffffff", "#000000", true).is_err()
        );
    }

    #[test]
    fn rejects_malformed_colors_and_descriptions() {
        assert!(EvaluationTag::new("OK", "fine", "ffffff", "#000000", true).is_err());
        assert!(EvaluationTag::new("OK", "fine", "#ffffff", "#00", true).is_err());
        assert!(EvaluationTag::new("OK", "ctrl\x07char", "#ffffff", "#000000", true).is_err());
    }

    #[test]
    fn rejects_duplicate_names() {
        let a = EvaluationTag::new("CO", "one", "#ffffff", "#000000", true).unwrap();
        let b = EvaluationTag::new("CO", "two", "#ffffff", "#000000", true).unwrap();
        assert!(TagRegistry::register(vec![a, b]).is_err());
    }

    #[test]
    fn lookup_is_idempotent_and_agrees_with_contains() {
        let registry = predefined_tags();
        let first = registry.lookup("CO").unwrap().clone();
        let second = registry.lookup("CO").unwrap().clone();
        assert_eq!(first, second);
        assert!(registry.contains("CO"));
        assert!(!registry.contains("ZZ"));
        assert!(registry.lookup("ZZ").is_err());
    }

    #[test]
    fn resolves_names_and_literals() {
        let registry = predefined_tags();
        let by_name = registry.resolve(&TagRef::from("IO")).unwrap();
        assert_eq!(by_name.name(), "IO");

        let ad_hoc = EvaluationTag::new("XX", "ad hoc", "#ffffff", "#000000", true).unwrap();
        let resolved = registry.resolve(&TagRef::from(ad_hoc.clone())).unwrap();
        assert_eq!(resolved, ad_hoc);
    }
}
