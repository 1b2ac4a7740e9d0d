use std::borrow::Cow;
use std::collections::VecDeque;
use std::{iter::Peekable, str::CharIndices};

use crate::config::Dialect;
use crate::token::{Span, Token, TokenKind};

mod error;

pub use error::{LexError, LexResult};

const TAB_WIDTH: usize = 4;

pub struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
    dialect: Dialect,
    indent_stack: Vec<usize>,
    pending_tokens: VecDeque<Token<'a>>,
    at_line_start: bool,
    eof_reached: bool,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str, dialect: Dialect) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
            dialect,
            indent_stack: vec![0],
            pending_tokens: VecDeque::new(),
            at_line_start: dialect.is_offside(),
            eof_reached: false,
            line: 1,
            column: 0,
        }
    }

    pub fn next_token(&mut self) -> LexResult<Token<'a>> {
        if let Some(token) = self.pending_tokens.pop_front() {
            return Ok(token);
        }

        if self.eof_reached {
            return Ok(Token::new(TokenKind::EOF, self.empty_span()));
        }

        if self.at_line_start {
            self.begin_line();
            if let Some(token) = self.pending_tokens.pop_front() {
                return Ok(token);
            }
        }

        self.skip_whitespace();

        let Some(&(start_idx, ch)) = self.chars.peek() else {
            return Ok(self.finish());
        };

        let start_line = self.line;
        let start_column = self.column;
        let single = |lexer: &mut Self, kind: TokenKind<'a>| {
            lexer.advance_char();
            Token::new(
                kind,
                Span {
                    start: start_idx,
                    end: start_idx + 1,
                    line: start_line,
                    column: start_column,
                },
            )
        };
        let double = |lexer: &mut Self, kind: TokenKind<'a>| {
            lexer.advance_char();
            lexer.advance_char();
            Token::new(
                kind,
                Span {
                    start: start_idx,
                    end: start_idx + 2,
                    line: start_line,
                    column: start_column,
                },
            )
        };

        let token = match ch {
            '\n' => {
                let token = single(self, TokenKind::Newline);
                self.at_line_start = true;
                token
            }
            '=' if self.peek_second() == Some('=') => double(self, TokenKind::EqualEqual),
            '=' => single(self, TokenKind::Equal),
            '!' if self.peek_second() == Some('=') => double(self, TokenKind::NotEqual),
            '<' if self.peek_second() == Some('=') => double(self, TokenKind::LessEqual),
            '<' => single(self, TokenKind::Less),
            '>' if self.peek_second() == Some('=') => double(self, TokenKind::GreaterEqual),
            '>' => single(self, TokenKind::Greater),
            '+' => single(self, TokenKind::Plus),
            '-' => single(self, TokenKind::Minus),
            '*' => single(self, TokenKind::Star),
            '/' => single(self, TokenKind::Slash),
            '%' => single(self, TokenKind::Percent),
            ':' => single(self, TokenKind::Colon),
            ',' => single(self, TokenKind::Comma),
            '(' => single(self, TokenKind::LParen),
            ')' => single(self, TokenKind::RParen),
            '[' => single(self, TokenKind::LBracket),
            ']' => single(self, TokenKind::RBracket),
            '{' => single(self, TokenKind::LBrace),
            '}' => single(self, TokenKind::RBrace),
            '"' | '\'' => self.read_string(ch, start_idx, start_line, start_column),
            c if c.is_ascii_alphabetic() || c == '_' => {
                self.read_identifier(start_idx, start_line, start_column)
            }
            c if c.is_ascii_digit() => self.read_integer(start_idx, start_line, start_column)?,
            _ => {
                return Err(LexError::UnexpectedCharacter {
                    character: ch,
                    line: start_line,
                    column: start_column,
                });
            }
        };
        Ok(token)
    }

    /// Consumes blank and comment-only lines, then measures the indentation of
    /// the first line carrying tokens and queues the matching block markers.
    fn begin_line(&mut self) {
        loop {
            let mut width = 0;
            while let Some(&(_, c)) = self.chars.peek() {
                match c {
                    ' ' => width += 1,
                    '\t' => width += TAB_WIDTH,
                    '\r' => {}
                    _ => break,
                }
                self.advance_char();
            }

            match self.chars.peek().copied() {
                None => return,
                Some((_, '\n')) => {
                    self.advance_char();
                }
                Some((_, '/')) if self.peek_second() == Some('/') => self.skip_comment(),
                Some(_) => {
                    self.at_line_start = false;
                    self.apply_indentation(width);
                    return;
                }
            }
        }
    }

    fn apply_indentation(&mut self, width: usize) {
        let span = self.empty_span();
        let current = self.indent_stack.last().copied().unwrap_or(0);

        if width > current {
            self.indent_stack.push(width);
            self.pending_tokens
                .push_back(Token::new(TokenKind::Indent, span));
            return;
        }

        // A width that matches no open level pops down to the nearest
        // enclosing one without complaint.
        while let Some(&top) = self.indent_stack.last() {
            if top <= width {
                break;
            }
            self.indent_stack.pop();
            self.pending_tokens
                .push_back(Token::new(TokenKind::Dedent, span));
        }
    }

    fn finish(&mut self) -> Token<'a> {
        self.eof_reached = true;
        let span = self.empty_span();
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.pending_tokens
                .push_back(Token::new(TokenKind::Dedent, span));
        }
        self.pending_tokens
            .pop_front()
            .unwrap_or_else(|| Token::new(TokenKind::EOF, span))
    }

    fn skip_whitespace(&mut self) {
        while let Some(&(_, c)) = self.chars.peek() {
            match c {
                ' ' | '\t' | '\r' => {
                    self.advance_char();
                }
                '\n' if !self.dialect.is_offside() => {
                    self.advance_char();
                }
                '/' if self.peek_second() == Some('/') => self.skip_comment(),
                _ => break,
            }
        }
    }

    /// Leaves the terminating newline in place.
    fn skip_comment(&mut self) {
        while let Some(&(_, c)) = self.chars.peek() {
            if c == '\n' {
                break;
            }
            self.advance_char();
        }
    }

    fn read_identifier(&mut self, start: usize, line: usize, column: usize) -> Token<'a> {
        self.advance_char(); // Consume first char
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.advance_char();
            } else {
                break;
            }
        }

        let end_idx = self.current_index();
        let ident = &self.input[start..end_idx];
        let kind = self
            .dialect
            .keyword(ident)
            .unwrap_or(TokenKind::Identifier(ident));
        Token::new(
            kind,
            Span {
                start,
                end: end_idx,
                line,
                column,
            },
        )
    }

    fn read_integer(&mut self, start: usize, line: usize, column: usize) -> LexResult<Token<'a>> {
        self.advance_char(); // Consume first digit
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                self.advance_char();
            } else {
                break;
            }
        }

        let end_idx = self.current_index();
        let literal = &self.input[start..end_idx];
        let value = literal
            .parse::<i64>()
            .map_err(|_| LexError::InvalidIntegerLiteral {
                literal: literal.to_string(),
                line,
                column,
            })?;
        Ok(Token::new(
            TokenKind::Integer(value),
            Span {
                start,
                end: end_idx,
                line,
                column,
            },
        ))
    }

    /// Strings end at the matching quote or, when unterminated, at end of
    /// input. Only the delimiter itself can be escaped.
    fn read_string(&mut self, quote: char, start: usize, line: usize, column: usize) -> Token<'a> {
        let input = self.input;
        self.advance_char(); // Consume opening quote
        let content_start = start + quote.len_utf8();
        let mut escaped: Option<String> = None;

        let (content_end, end) = loop {
            match self.chars.peek().copied() {
                None => break (input.len(), input.len()),
                Some((idx, c)) if c == quote => {
                    self.advance_char();
                    break (idx, idx + quote.len_utf8());
                }
                Some((idx, '\\')) if self.peek_second() == Some(quote) => {
                    let buffer =
                        escaped.get_or_insert_with(|| input[content_start..idx].to_string());
                    buffer.push(quote);
                    self.advance_char();
                    self.advance_char();
                }
                Some((_, c)) => {
                    if let Some(buffer) = escaped.as_mut() {
                        buffer.push(c);
                    }
                    self.advance_char();
                }
            }
        };

        let text = match escaped {
            Some(buffer) => Cow::Owned(buffer),
            None => Cow::Borrowed(&input[content_start..content_end]),
        };
        Token::new(
            TokenKind::String(text),
            Span {
                start,
                end,
                line,
                column,
            },
        )
    }

    fn advance_char(&mut self) -> Option<(usize, char)> {
        let next = self.chars.next();
        if let Some((_, c)) = next {
            if c == '\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += 1;
            }
        }
        next
    }

    fn peek_second(&self) -> Option<char> {
        let mut ahead = self.chars.clone();
        ahead.next();
        ahead.peek().map(|&(_, c)| c)
    }

    fn current_index(&mut self) -> usize {
        self.chars
            .peek()
            .map(|(idx, _)| *idx)
            .unwrap_or(self.input.len())
    }

    fn empty_span(&mut self) -> Span {
        let index = self.current_index();
        Span {
            start: index,
            end: index,
            line: self.line,
            column: self.column,
        }
    }
}

pub fn tokenize(input: &str, dialect: Dialect) -> LexResult<Vec<Token<'_>>> {
    let mut lexer = Lexer::new(input, dialect);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let is_eof = matches!(token.kind, TokenKind::EOF);
        tokens.push(token);
        if is_eof {
            break;
        }
    }
    log::debug!("lexed {} tokens ({} dialect)", tokens.len(), dialect.name());
    Ok(tokens)
}
