//! Symbol extraction: enumerate the public module-level definitions of a
//! parsed Python source file.
//!
//! The walk visits the module node's direct children. Control-flow containers
//! (`if`/`elif`/`else`/`try`/`except` and their blocks) are descended into so
//! that definitions guarded at module scope — the conditional-import idiom —
//! are elevated to module-level exports. Names assigned in only one branch
//! are still reported; that over-approximation matches how real Python code
//! uses these guards.

use tree_sitter::Node;

use crate::parse::ParseHandle;
use crate::types::{Symbol, SymbolKind};

/// Enumerate the public symbols of the module.
///
/// Returns an empty list when the tree's root is not a `module` node. Name
/// slices borrow from the handle's source buffer. Underscore-prefixed names
/// are filtered; a name the same guard emits on several branches appears
/// once per branch.
pub fn extract<'a>(handle: &ParseHandle<'a>) -> Vec<Symbol<'a>> {
    let root = handle.root();
    if root.kind_id() != handle.kinds().module {
        return Vec::new();
    }

    let mut symbols = Vec::new();
    collect(handle, root, &mut symbols);
    symbols
}

/// Enumerate one statement sequence; recurses into guard containers.
fn collect<'a>(handle: &ParseHandle<'a>, parent: Node<'_>, out: &mut Vec<Symbol<'a>>) {
    let kinds = handle.kinds();
    let mut cursor = parent.walk();
    for child in parent.children(&mut cursor) {
        let kind = child.kind_id();

        if kinds.is_container(kind) {
            collect(handle, child, out);
            continue;
        }

        if kind == kinds.decorated_definition {
            if let Some(definition) = child.child(1) {
                emit_definition(handle, definition, out);
            }
            continue;
        }

        emit_definition(handle, child, out);
    }
}

/// Emit the symbol for a single definition-shaped node, if it is one.
fn emit_definition<'a>(handle: &ParseHandle<'a>, node: Node<'_>, out: &mut Vec<Symbol<'a>>) {
    let kinds = handle.kinds();
    let kind = node.kind_id();

    if kind == kinds.class_definition || kind == kinds.function_definition {
        let symbol_kind = if kind == kinds.class_definition {
            SymbolKind::Class
        } else {
            SymbolKind::Function
        };
        if let Some(name) = public_identifier(handle, node.named_child(0)) {
            out.push(Symbol {
                kind: symbol_kind,
                name,
            });
        }
        return;
    }

    if kind == kinds.expression_statement {
        let Some(expression) = node.child(0) else { return };
        if expression.kind_id() != kinds.assignment {
            return;
        }
        if let Some(name) = public_identifier(handle, expression.named_child(0)) {
            out.push(Symbol {
                kind: SymbolKind::Variable,
                name,
            });
        }
    }
}

/// The node's source text, when the node is an identifier that does not
/// start with `_` and is valid UTF-8.
fn public_identifier<'a>(handle: &ParseHandle<'a>, node: Option<Node<'_>>) -> Option<&'a str> {
    let node = node?;
    if node.kind_id() != handle.kinds().identifier {
        return None;
    }
    let text = node.utf8_text(handle.source()).ok()?;
    if text.starts_with('_') {
        return None;
    }
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn symbols_of(source: &str) -> Vec<(SymbolKind, String)> {
        let handle = parse(source.as_bytes()).expect("parse");
        extract(&handle)
            .into_iter()
            .map(|s| (s.kind, s.name.to_string()))
            .collect()
    }

    // ── plain module scope ────────────────────────────────────────────────────

    #[test]
    fn test_class_variable_function_with_private_filtered() {
        let symbols = symbols_of(
            "class A: pass\n\
             def _hidden(): pass\n\
             X = 1\n\
             def pub(): pass\n",
        );
        assert_eq!(
            symbols,
            vec![
                (SymbolKind::Class, "A".to_string()),
                (SymbolKind::Variable, "X".to_string()),
                (SymbolKind::Function, "pub".to_string()),
            ]
        );
    }

    #[test]
    fn test_underscore_names_never_emitted() {
        let symbols = symbols_of(
            "_private = 1\n\
             __dunder__ = 2\n\
             class _Internal: pass\n\
             def _helper(): pass\n",
        );
        assert!(symbols.is_empty(), "got {symbols:?}");
    }

    #[test]
    fn test_non_module_constructs_are_skipped() {
        let symbols = symbols_of(
            "import os\n\
             from sys import path\n\
             x.attr = 1\n\
             print('hello')\n\
             VALUE = 3\n",
        );
        assert_eq!(symbols, vec![(SymbolKind::Variable, "VALUE".to_string())]);
    }

    // ── guarded definitions ───────────────────────────────────────────────────

    #[test]
    fn test_try_except_guard_elevates_assignments() {
        let symbols = symbols_of(
            "try:\n\
             \x20   import foo\n\
             \x20   HAS = True\n\
             except ImportError:\n\
             \x20   HAS = False\n",
        );
        let has: Vec<_> = symbols
            .iter()
            .filter(|(kind, name)| *kind == SymbolKind::Variable && name == "HAS")
            .collect();
        assert!(
            !has.is_empty(),
            "HAS should be elevated from the guard: {symbols:?}"
        );
    }

    #[test]
    fn test_if_else_guard_elevates_definitions() {
        let symbols = symbols_of(
            "import sys\n\
             if sys.version_info >= (3, 8):\n\
             \x20   def impl(): pass\n\
             elif sys.version_info >= (3, 6):\n\
             \x20   def impl_old(): pass\n\
             else:\n\
             \x20   IMPL = None\n",
        );
        assert!(symbols.contains(&(SymbolKind::Function, "impl".to_string())));
        assert!(symbols.contains(&(SymbolKind::Function, "impl_old".to_string())));
        assert!(symbols.contains(&(SymbolKind::Variable, "IMPL".to_string())));
    }

    #[test]
    fn test_function_locals_are_not_module_symbols() {
        let symbols = symbols_of(
            "def outer():\n\
             \x20   inner = 1\n\
             \x20   def nested(): pass\n\
             \x20   return inner\n",
        );
        assert_eq!(symbols, vec![(SymbolKind::Function, "outer".to_string())]);
    }

    // ── decorated definitions ────────────────────────────────────────────────

    #[test]
    fn test_decorated_function_is_unwrapped() {
        let symbols = symbols_of(
            "@decorator\n\
             def wrapped(): pass\n",
        );
        assert_eq!(symbols, vec![(SymbolKind::Function, "wrapped".to_string())]);
    }

    #[test]
    fn test_decorated_private_is_filtered() {
        let symbols = symbols_of(
            "@decorator\n\
             def _wrapped(): pass\n",
        );
        assert!(symbols.is_empty());
    }

    // ── structure edge cases ─────────────────────────────────────────────────

    #[test]
    fn test_empty_source() {
        assert!(symbols_of("").is_empty());
    }

    #[test]
    fn test_tuple_assignment_targets_are_skipped() {
        // First named child of the assignment is a pattern, not an identifier.
        let symbols = symbols_of("a, b = 1, 2\n");
        assert!(symbols.is_empty(), "got {symbols:?}");
    }

    #[test]
    fn test_augmented_assignment_is_skipped() {
        let symbols = symbols_of("x = 0\nx += 1\n");
        assert_eq!(symbols, vec![(SymbolKind::Variable, "x".to_string())]);
    }
}
