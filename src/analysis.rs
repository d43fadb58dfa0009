#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Static-analysis helpers over learner Python source.
//!
//! These are pure predicates a case body may call (unfilled-template
//! detection, loop detection, AST congruence); they are building blocks,
//! not part of the execution or classification engine.

use std::fmt::Formatter;

use anyhow::{Context, Result, anyhow};
use tree_sitter::{Node, Query, QueryCursor, StreamingIterator, Tree};

/// Capture-name-to-text map for one query match.
pub type Captures = std::collections::HashMap<String, String>;

/// A tree-sitter parse of one Python source.
#[derive(Clone)]
pub struct Parser {
    /// The source code being parsed.
    code: String,
    /// The parse tree.
    tree: Tree,
    /// The tree-sitter Python grammar.
    lang: tree_sitter::Language,
}

/// Returns the compiled tree-sitter Python language.
fn python_language() -> tree_sitter::Language {
    tree_sitter_python::LANGUAGE.into()
}

impl std::fmt::Debug for Parser {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser").field("code", &self.code).finish()
    }
}

impl Parser {
    /// Parses the given source.
    pub fn new(source_code: impl Into<String>) -> Result<Self> {
        let code = source_code.into();
        let mut parser = tree_sitter::Parser::new();
        let language = python_language();

        parser
            .set_language(&language)
            .with_context(|| "Failed to load Python grammar")?;
        let tree = parser
            .parse(code.as_str(), None)
            .ok_or_else(|| anyhow!("Error parsing Python code"))?;

        Ok(Self {
            code,
            tree,
            lang: language,
        })
    }

    /// The parsed source code.
    pub fn code(&self) -> &str {
        self.code.as_str()
    }

    /// The parse tree's root node.
    pub fn root_node(&self) -> Node<'_> {
        self.tree.root_node()
    }

    /// Whether the source failed to parse cleanly.
    pub fn has_syntax_error(&self) -> bool {
        self.root_node().has_error()
    }

    /// The 1-based line number and text of the first syntax error, if any.
    pub fn first_error_line(&self) -> Option<(usize, String)> {
        preorder(self.root_node())
            .into_iter()
            .find(|n| n.is_error() || n.is_missing())
            .map(|n| {
                let row = n.start_position().row;
                let text = self.code.lines().nth(row).unwrap_or_default().to_string();
                (row + 1, text)
            })
    }

    /// Applies a tree-sitter query and returns each match's captures.
    pub fn query(&self, q: &str) -> Result<Vec<Captures>> {
        let mut results = vec![];
        let query = Query::new(&self.lang, q)
            .with_context(|| format!("Failed to compile tree-sitter query: {q}"))?;
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&query, self.root_node(), self.code.as_bytes());
        let mut capture_indices = Vec::new();

        for name in query.capture_names() {
            let index = query
                .capture_index_for_name(name)
                .ok_or_else(|| anyhow!("Capture name {name} has no index associated."))?;
            capture_indices.push((index, name.to_string()));
        }

        while let Some(m) = matches.next() {
            let mut result = Captures::new();

            for (index, name) in &capture_indices {
                let value = match m.captures.iter().find(|c| c.index == *index) {
                    Some(v) => v,
                    None => continue,
                };
                let value = value
                    .node
                    .utf8_text(self.code.as_bytes())
                    .with_context(|| format!("Cannot map capture `{name}` to source text"))?;
                result.insert(name.clone(), value.to_string());
            }
            results.push(result);
        }

        Ok(results)
    }

    /// The text of a node within this parse.
    fn text(&self, node: Node<'_>) -> &str {
        node.utf8_text(self.code.as_bytes()).unwrap_or_default()
    }

    /// Finds the top-level function definition with the given name.
    fn find_function(&self, name: &str) -> Result<Node<'_>> {
        preorder(self.root_node())
            .into_iter()
            .find(|n| {
                n.kind() == "function_definition"
                    && n.child_by_field_name("name")
                        .is_some_and(|id| self.text(id) == name)
            })
            .with_context(|| format!("No function named `{name}` is defined"))
    }

    /// Whether the function's body consists only of ellipsis placeholders.
    pub fn is_ellipsis_body(&self, func: &str) -> Result<bool> {
        let node = self.find_function(func)?;
        let body = node
            .child_by_field_name("body")
            .context("Function definition has no body")?;
        let mut cursor = body.walk();
        let all_ellipsis = body.named_children(&mut cursor).all(|stmt| {
            stmt.kind() == "expression_statement"
                && stmt.named_child_count() == 1
                && stmt.named_child(0).is_some_and(|e| e.kind() == "ellipsis")
        });
        Ok(all_ellipsis)
    }

    /// Whether the function contains a `for` or `while` loop.
    pub fn has_loop(&self, func: &str) -> Result<bool> {
        let node = self.find_function(func)?;
        Ok(preorder(node)
            .into_iter()
            .any(|n| matches!(n.kind(), "for_statement" | "while_statement")))
    }

    /// Whether two functions are AST-congruent up to consistent renaming
    /// of the functions' own names.
    pub fn congruent(&self, func: &str, other: &Parser, other_func: &str) -> Result<bool> {
        let left = preorder_named(self.find_function(func)?);
        let right = preorder_named(other.find_function(other_func)?);
        if left.len() != right.len() {
            return Ok(false);
        }

        let aliases = [(func, other_func), (other_func, func)];
        for (a, b) in left.into_iter().zip(right) {
            if a.kind() != b.kind() {
                return Ok(false);
            }
            let (ta, tb) = (self.text(a), other.text(b));
            match a.kind() {
                "identifier" => {
                    let aliased = aliases.iter().any(|(x, y)| ta == *x && tb == *y);
                    if ta != tb && !aliased {
                        return Ok(false);
                    }
                }
                "integer" | "float" | "string" | "true" | "false" | "none" => {
                    if ta != tb {
                        return Ok(false);
                    }
                }
                _ => {}
            }
        }
        Ok(true)
    }

    /// Names bound at module level: functions, classes, and assigned
    /// variables, in source order.
    pub fn top_level_bindings(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut cursor = self.root_node().walk();
        for stmt in self.root_node().named_children(&mut cursor) {
            match stmt.kind() {
                "function_definition" | "class_definition" => {
                    if let Some(id) = stmt.child_by_field_name("name") {
                        names.push(self.text(id).to_string());
                    }
                }
                "expression_statement" => {
                    if let Some(expr) = stmt.named_child(0)
                        && expr.kind() == "assignment"
                        && let Some(left) = expr.child_by_field_name("left")
                        && left.kind() == "identifier"
                    {
                        names.push(self.text(left).to_string());
                    }
                }
                _ => {}
            }
        }
        names
    }

    /// Module names imported anywhere in the source.
    pub fn imported_modules(&self) -> Vec<String> {
        let mut modules = Vec::new();
        for node in preorder(self.root_node()) {
            match node.kind() {
                "import_statement" => {
                    let mut cursor = node.walk();
                    for child in node.named_children(&mut cursor) {
                        let name = match child.kind() {
                            "dotted_name" => Some(self.text(child).to_string()),
                            "aliased_import" => child
                                .child_by_field_name("name")
                                .map(|n| self.text(n).to_string()),
                            _ => None,
                        };
                        if let Some(name) = name
                            && !modules.contains(&name)
                        {
                            modules.push(name);
                        }
                    }
                }
                "import_from_statement" => {
                    if let Some(module) = node.child_by_field_name("module_name") {
                        let name = self.text(module).to_string();
                        if !modules.contains(&name) {
                            modules.push(name);
                        }
                    }
                }
                _ => {}
            }
        }
        modules
    }

    /// Whether `var = True` is assigned anywhere in the source.
    pub fn flag_assignment_exists(&self, var: &str) -> bool {
        preorder(self.root_node()).into_iter().any(|n| {
            n.kind() == "assignment"
                && n.child_by_field_name("left")
                    .is_some_and(|l| l.kind() == "identifier" && self.text(l) == var)
                && n.child_by_field_name("right").is_some_and(|r| r.kind() == "true")
        })
    }

    /// Whether `open(...)` is called outside any function or class body.
    pub fn has_toplevel_open_call(&self) -> bool {
        preorder(self.root_node()).into_iter().any(|n| {
            if n.kind() != "call" {
                return false;
            }
            let is_open = n
                .child_by_field_name("function")
                .is_some_and(|f| f.kind() == "identifier" && self.text(f) == "open");
            if !is_open {
                return false;
            }
            let mut parent = n.parent();
            while let Some(p) = parent {
                if matches!(p.kind(), "function_definition" | "class_definition") {
                    return false;
                }
                parent = p.parent();
            }
            true
        })
    }
}

/// All nodes of a subtree in preorder, including anonymous ones.
fn preorder(root: Node<'_>) -> Vec<Node<'_>> {
    let mut nodes = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        nodes.push(node);
        for i in (0..node.child_count()).rev() {
            if let Some(child) = node.child(i) {
                stack.push(child);
            }
        }
    }
    nodes
}

/// Named nodes of a subtree in preorder.
fn preorder_named(root: Node<'_>) -> Vec<Node<'_>> {
    preorder(root).into_iter().filter(Node::is_named).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_ellipsis_bodies() {
        let parser = Parser::new("def f():\n    ...\n\ndef g():\n    return 1\n").unwrap();
        assert!(parser.is_ellipsis_body("f").unwrap());
        assert!(!parser.is_ellipsis_body("g").unwrap());
        assert!(parser.is_ellipsis_body("missing").is_err());
    }

    #[test]
    fn detects_loops() {
        let parser = Parser::new(
            "def a(xs):\n    for x in xs:\n        print(x)\n\ndef b(x):\n    return x\n",
        )
        .unwrap();
        assert!(parser.has_loop("a").unwrap());
        assert!(!parser.has_loop("b").unwrap());
    }

    #[test]
    fn congruence_allows_renaming_the_function_itself() {
        let left = Parser::new("def f(n):\n    if n == 0:\n        return 1\n    return n * f(n - 1)\n").unwrap();
        let right = Parser::new("def g(n):\n    if n == 0:\n        return 1\n    return n * g(n - 1)\n").unwrap();
        assert!(left.congruent("f", &right, "g").unwrap());

        let different = Parser::new("def g(n):\n    if n == 0:\n        return 2\n    return n * g(n - 1)\n").unwrap();
        assert!(!left.congruent("f", &different, "g").unwrap());
    }

    #[test]
    fn congruence_rejects_renamed_locals() {
        let left = Parser::new("def f(x):\n    return x + 1\n").unwrap();
        let right = Parser::new("def g(y):\n    return y + 1\n").unwrap();
        assert!(!left.congruent("f", &right, "g").unwrap());
    }

    #[test]
    fn finds_top_level_bindings_and_imports() {
        let parser = Parser::new(
            "import math\nfrom pathlib import Path\n\nTHRESHOLD = 3\n\ndef f():\n    import json\n    return json\n",
        )
        .unwrap();
        assert_eq!(parser.top_level_bindings(), vec!["THRESHOLD", "f"]);
        assert_eq!(parser.imported_modules(), vec!["math", "pathlib", "json"]);
    }

    #[test]
    fn reports_syntax_errors_with_line_text() {
        let parser = Parser::new("x = 1\n!ls\n").unwrap();
        assert!(parser.has_syntax_error());
        let (_, text) = parser.first_error_line().unwrap();
        assert!(text.contains('!'));

        let clean = Parser::new("x = 1\n").unwrap();
        assert!(!clean.has_syntax_error());
        assert!(clean.first_error_line().is_none());
    }

    #[test]
    fn detects_question_flags_and_toplevel_io() {
        let parser = Parser::new("QUESTION_EXISTS = True\nf = open('data.txt')\n").unwrap();
        assert!(parser.flag_assignment_exists("QUESTION_EXISTS"));
        assert!(!parser.flag_assignment_exists("OTHER_FLAG"));
        assert!(parser.has_toplevel_open_call());

        let inside = Parser::new("def f():\n    return open('data.txt')\n").unwrap();
        assert!(!inside.has_toplevel_open_call());
    }
}
