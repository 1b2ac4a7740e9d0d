//! Compilation options shared by every pipeline stage.
//!
//! The dialect is resolved here, before lexing, and never detected from the
//! source text itself.

use std::path::Path;

use crate::token::{BASIC_KEYWORDS, FULL_KEYWORDS, TokenKind};

/// Source language variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// Indentation-delimited blocks closed by `stop`, scalar variables only.
    Basic,
    /// Braced blocks, functions, arrays and both `for` forms.
    #[default]
    Full,
}

impl Dialect {
    /// `.xb` files are Basic; everything else is Full.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("xb") => Dialect::Basic,
            _ => Dialect::Full,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "basic" => Some(Dialect::Basic),
            "full" => Some(Dialect::Full),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Dialect::Basic => "basic",
            Dialect::Full => "full",
        }
    }

    /// Whether the lexer synthesizes `Newline`/`Indent`/`Dedent` tokens.
    pub fn is_offside(self) -> bool {
        matches!(self, Dialect::Basic)
    }

    pub fn functions_enabled(self) -> bool {
        matches!(self, Dialect::Full)
    }

    pub fn keyword(self, ident: &str) -> Option<TokenKind<'static>> {
        let table = match self {
            Dialect::Basic => &BASIC_KEYWORDS,
            Dialect::Full => &FULL_KEYWORDS,
        };
        table.get(ident).cloned()
    }
}

/// Lowering used for `name[index] = value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexAssignment {
    /// Append when `index == length`, otherwise overwrite the element in place.
    #[default]
    Overwrite,
    /// Append when `index == length`, otherwise drop the tail element and
    /// append the new value, whatever `index` was.
    TailReplace,
}

/// A host function callable from source code by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternFunction {
    pub name: String,
    pub arity: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub dialect: Dialect,
    pub index_assignment: IndexAssignment,
    pub externs: Vec<ExternFunction>,
}

impl Options {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    pub fn with_index_assignment(mut self, index_assignment: IndexAssignment) -> Self {
        self.index_assignment = index_assignment;
        self
    }

    pub fn with_extern(mut self, name: impl Into<String>, arity: usize) -> Self {
        self.externs.push(ExternFunction {
            name: name.into(),
            arity,
        });
        self
    }

    pub fn find_extern(&self, name: &str) -> Option<&ExternFunction> {
        self.externs.iter().find(|function| function.name == name)
    }
}
