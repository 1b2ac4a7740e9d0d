use std::borrow::Cow;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind<'a> {
    Identifier(&'a str),
    Integer(i64),
    String(Cow<'a, str>),

    // Keywords shared by both dialects
    If,
    Else,

    // Basic dialect keywords
    Make,
    Show,
    Loop,
    Stop,

    // Full dialect keywords
    Func,
    While,
    For,
    In,
    To,
    Return,

    // Operators
    Equal,        // =
    EqualEqual,   // ==
    NotEqual,     // !=
    Less,         // <
    LessEqual,    // <=
    Greater,      // >
    GreaterEqual, // >=
    Plus,         // +
    Minus,        // -
    Star,         // *
    Slash,        // /
    Percent,      // %

    // Delimiters
    Colon,    // :
    Comma,    // ,
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]
    LBrace,   // {
    RBrace,   // }

    // Structural
    Newline,
    Indent,
    Dedent,
    EOF,
}

impl TokenKind<'_> {
    /// Human-readable name used in syntax diagnostics.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Identifier(name) => format!("identifier '{name}'"),
            TokenKind::Integer(value) => format!("number {value}"),
            TokenKind::String(text) => format!("string \"{text}\""),
            TokenKind::Newline => "end of line".to_string(),
            TokenKind::Indent => "indent".to_string(),
            TokenKind::Dedent => "dedent".to_string(),
            TokenKind::EOF => "end of input".to_string(),
            other => format!("'{}'", other.lexeme()),
        }
    }

    fn lexeme(&self) -> &'static str {
        match self {
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::Make => "make",
            TokenKind::Show => "show",
            TokenKind::Loop => "loop",
            TokenKind::Stop => "stop",
            TokenKind::Func => "func",
            TokenKind::While => "while",
            TokenKind::For => "for",
            TokenKind::In => "in",
            TokenKind::To => "to",
            TokenKind::Return => "return",
            TokenKind::Equal => "=",
            TokenKind::EqualEqual => "==",
            TokenKind::NotEqual => "!=",
            TokenKind::Less => "<",
            TokenKind::LessEqual => "<=",
            TokenKind::Greater => ">",
            TokenKind::GreaterEqual => ">=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Colon => ":",
            TokenKind::Comma => ",",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Identifier(_)
            | TokenKind::Integer(_)
            | TokenKind::String(_)
            | TokenKind::Newline
            | TokenKind::Indent
            | TokenKind::Dedent
            | TokenKind::EOF => "",
        }
    }
}

impl fmt::Display for TokenKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub span: Span,
}

impl<'a> Token<'a> {
    pub fn new(kind: TokenKind<'a>, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn kind(&self) -> &TokenKind<'a> {
        &self.kind
    }

    pub fn line(&self) -> usize {
        self.span.line
    }
}

pub static BASIC_KEYWORDS: phf::Map<&'static str, TokenKind<'static>> = phf::phf_map! {
    "make" => TokenKind::Make,
    "show" => TokenKind::Show,
    "loop" => TokenKind::Loop,
    "if" => TokenKind::If,
    "else" => TokenKind::Else,
    "stop" => TokenKind::Stop,
};

pub static FULL_KEYWORDS: phf::Map<&'static str, TokenKind<'static>> = phf::phf_map! {
    "func" => TokenKind::Func,
    "if" => TokenKind::If,
    "else" => TokenKind::Else,
    "while" => TokenKind::While,
    "for" => TokenKind::For,
    "in" => TokenKind::In,
    "to" => TokenKind::To,
    "return" => TokenKind::Return,
};
