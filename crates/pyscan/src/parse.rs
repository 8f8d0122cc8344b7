//! Parser facade over tree-sitter and the Python grammar.
//!
//! [`parse`] produces a [`ParseHandle`] that owns the language, the parser,
//! and the resulting tree while borrowing the input bytes. The node-kind ids
//! the extractor needs are resolved once per handle and cached there, never
//! in process-wide state: concurrent parses on pool workers must not share
//! anything mutable.

use tree_sitter::{Language, Node, Parser, Tree};

/// Errors produced while obtaining a parse tree.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The parser declined to produce a tree (e.g. cancellation).
    #[error("parser produced no tree")]
    TreeNotFound,

    /// The grammar was rejected by the parser (ABI mismatch).
    #[error("failed to load python grammar: {0}")]
    Language(#[from] tree_sitter::LanguageError),

    /// A required node kind is unknown to the grammar; the kind-id cache
    /// could not be populated.
    #[error("grammar is missing node kind `{0}`")]
    NotInitialized(&'static str),
}

/// Node-kind ids for the fixed set of kinds the extractor inspects.
///
/// Resolved once per [`ParseHandle`] from the grammar.
#[derive(Debug, Clone, Copy)]
pub struct KindIds {
    pub module: u16,
    pub class_definition: u16,
    pub function_definition: u16,
    pub expression_statement: u16,
    pub assignment: u16,
    pub identifier: u16,
    pub decorated_definition: u16,
    pub block: u16,
    pub try_statement: u16,
    pub except_clause: u16,
    pub if_statement: u16,
    pub else_clause: u16,
    pub elif_clause: u16,
}

impl KindIds {
    fn resolve(language: &Language) -> Result<KindIds, ParseError> {
        let id = |kind: &'static str| -> Result<u16, ParseError> {
            match language.id_for_node_kind(kind, true) {
                0 => Err(ParseError::NotInitialized(kind)),
                id => Ok(id),
            }
        };
        Ok(KindIds {
            module: id("module")?,
            class_definition: id("class_definition")?,
            function_definition: id("function_definition")?,
            expression_statement: id("expression_statement")?,
            assignment: id("assignment")?,
            identifier: id("identifier")?,
            decorated_definition: id("decorated_definition")?,
            block: id("block")?,
            try_statement: id("try_statement")?,
            except_clause: id("except_clause")?,
            if_statement: id("if_statement")?,
            else_clause: id("else_clause")?,
            elif_clause: id("elif_clause")?,
        })
    }

    /// True for the control-flow containers whose children are elevated to
    /// module scope by the extractor.
    pub fn is_container(&self, kind: u16) -> bool {
        kind == self.block
            || kind == self.if_statement
            || kind == self.else_clause
            || kind == self.elif_clause
            || kind == self.try_statement
            || kind == self.except_clause
    }
}

/// An owning bundle of language + parser + tree over a borrowed source
/// buffer. The source must outlive the handle; extracted symbol names borrow
/// from it.
pub struct ParseHandle<'a> {
    // Field order is drop order: tree, then parser, then language — the
    // reverse of acquisition.
    tree: Tree,
    #[allow(dead_code)]
    parser: Parser,
    language: Language,
    source: &'a [u8],
    kinds: KindIds,
}

impl<'a> ParseHandle<'a> {
    /// The root node of the parse tree.
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    /// The source bytes this handle was parsed from.
    pub fn source(&self) -> &'a [u8] {
        self.source
    }

    /// The per-handle node-kind cache.
    pub fn kinds(&self) -> &KindIds {
        &self.kinds
    }

    /// ABI version reported by the linked grammar (the reference Python
    /// grammar reports 14).
    pub fn abi_version(&self) -> usize {
        self.language.abi_version()
    }
}

/// Parse Python source bytes into a [`ParseHandle`].
pub fn parse(source: &[u8]) -> Result<ParseHandle<'_>, ParseError> {
    let language: Language = tree_sitter_python::LANGUAGE.into();
    let mut parser = Parser::new();
    parser.set_language(&language)?;
    let kinds = KindIds::resolve(&language)?;
    let tree = parser.parse(source, None).ok_or(ParseError::TreeNotFound)?;
    Ok(ParseHandle {
        tree,
        parser,
        language,
        source,
        kinds,
    })
}
