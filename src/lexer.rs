//! Mode-stack tokenizer for Echo templates.
//!
//! Whitespace is preserved verbatim in text mode and skipped in every other
//! mode. The lexer never gives up on the first problem: invalid characters
//! are reported and skipped, and any mode still open at the end of input is
//! reported at the location where it was opened.

use crate::ast::Position;
use crate::error::{LexError, LexErrorKind, LexModeName};

const CONTEXT_OPEN: &str = "#context(";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Literal text in default mode.
    Text,
    /// `{{`
    VariableOpen,
    /// `}}`
    VariableClose,
    /// `??` inside a variable reference.
    DefaultOp,
    /// `[#IF`
    If,
    /// `[ELSE IF`
    ElseIf,
    /// `[ELSE`
    Else,
    /// `[END`
    End,
    /// `[#SECTION`
    Section,
    /// `[#IMPORT`
    Import,
    /// `[#INCLUDE`
    Include,
    /// `[#` followed by a keyword the grammar does not know.
    UnknownDirective,
    /// `]`
    DirectiveClose,
    /// A bare word: a keyword, name, or variable path.
    Identifier,
    /// A quoted string, quotes included.
    StringLiteral,
    /// `=`
    Equals,
    /// `#name`; the token text excludes the `#`.
    OperatorName,
    /// `#context`
    ContextOpen,
    /// `(`
    LParen,
    /// Free-form text between `(` and the matching `)`.
    Argument,
    /// `)`
    RParen,
}

impl TokenKind {
    pub const fn describe(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::VariableOpen => "'{{'",
            Self::VariableClose => "'}}'",
            Self::DefaultOp => "'??'",
            Self::If => "'[#IF'",
            Self::ElseIf => "'[ELSE IF'",
            Self::Else => "'[ELSE'",
            Self::End => "'[END'",
            Self::Section => "'[#SECTION'",
            Self::Import => "'[#IMPORT'",
            Self::Include => "'[#INCLUDE'",
            Self::UnknownDirective => "unknown directive",
            Self::DirectiveClose => "']'",
            Self::Identifier => "identifier",
            Self::StringLiteral => "string",
            Self::Equals => "'='",
            Self::OperatorName => "operator",
            Self::ContextOpen => "'#context'",
            Self::LParen => "'('",
            Self::Argument => "argument",
            Self::RParen => "')'",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
enum LexMode {
    Directive,
    Variable,
    Argument,
}

impl LexMode {
    const fn name(self) -> LexModeName {
        match self {
            Self::Directive => LexModeName::Directive,
            Self::Variable => LexModeName::Variable,
            Self::Argument => LexModeName::Argument,
        }
    }
}

/// The output of [`tokenize`]: every token recognised, plus every error hit
/// along the way.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tokenized<'a> {
    pub tokens: Vec<Token<'a>>,
    pub errors: Vec<LexError>,
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// Current column in characters (1-indexed)
    column: usize,
    /// Open modes with the position that opened them. Empty means text mode.
    modes: Vec<(LexMode, Position)>,
    tokens: Vec<Token<'a>>,
    errors: Vec<LexError>,
}

impl<'a> Lexer<'a> {
    const fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
            column: 1,
            modes: Vec::new(),
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    const fn position(&self) -> Position {
        Position {
            offset: self.pos,
            line: self.line,
            column: self.column,
        }
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn rest(&self) -> &'a str {
        self.input.get(self.pos..).unwrap_or_default()
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Advances past one character, tracking line breaks.
    fn advance(&mut self, current_char: char) {
        let char_len = current_char.len_utf8();
        if current_char == '\n' {
            self.line = self.line.saturating_add(1);
            self.column = 1;
        } else {
            self.column = self.column.saturating_add(1);
        }
        self.pos = self.pos.saturating_add(char_len);
    }

    /// Advances past `len` bytes known not to contain a newline.
    fn advance_bytes_no_newline(&mut self, len: usize) {
        let end = self.pos.saturating_add(len).min(self.input.len());
        let skipped = self.input.get(self.pos..end).map_or(0, |s| s.chars().count());
        self.column = self.column.saturating_add(skipped);
        self.pos = end;
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if !c.is_whitespace() {
                break;
            }
            self.advance(c);
        }
    }

    fn mode(&self) -> Option<LexMode> {
        self.modes.last().map(|(mode, _)| *mode)
    }

    fn push_mode(&mut self, mode: LexMode, opened_at: Position) {
        self.modes.push((mode, opened_at));
    }

    fn pop_mode(&mut self) {
        self.modes.pop();
    }

    fn emit(&mut self, kind: TokenKind, start: Position) {
        let end = self.position();
        self.emit_text(kind, start, end, start.offset);
    }

    fn emit_text(&mut self, kind: TokenKind, start: Position, end: Position, text_from: usize) {
        let text = self.input.get(text_from..end.offset).unwrap_or_default();
        self.tokens.push(Token {
            kind,
            text,
            start,
            end,
        });
    }

    /// Consumes a fixed, newline-free delimiter and emits it as a token.
    fn emit_fixed(&mut self, kind: TokenKind, len: usize) -> Position {
        let start = self.position();
        self.advance_bytes_no_newline(len);
        self.emit(kind, start);
        start
    }

    fn error(&mut self, position: Position, kind: LexErrorKind) {
        self.errors.push(LexError::at(position, kind));
    }

    fn run(mut self) -> Tokenized<'a> {
        while !self.eof() {
            match self.mode() {
                None => self.lex_text(),
                Some(LexMode::Directive) => self.lex_directive(),
                Some(LexMode::Variable) => self.lex_variable(),
                Some(LexMode::Argument) => self.lex_argument(),
            }
        }

        while let Some((mode, opened_at)) = self.modes.pop() {
            let kind = match mode {
                LexMode::Directive => LexErrorKind::UnterminatedDirective,
                LexMode::Variable => LexErrorKind::UnterminatedVariable,
                LexMode::Argument => LexErrorKind::UnterminatedArgument,
            };
            self.error(opened_at, kind);
        }
        self.errors.sort_by_key(|e| (e.line, e.column));

        Tokenized {
            tokens: self.tokens,
            errors: self.errors,
        }
    }

    /// Recognises a directive opening sequence at the current position.
    fn directive_opener(&self) -> Option<(TokenKind, usize)> {
        let rest = self.rest();
        if let Some(after) = rest.strip_prefix("[#") {
            let word_len = after
                .bytes()
                .take_while(|b| b.is_ascii_uppercase() || *b == b'_')
                .count();
            let word = after.get(..word_len)?;
            if word.is_empty() || !at_word_boundary(after.get(word_len..)?) {
                return None;
            }
            let kind = match word {
                "IF" => TokenKind::If,
                "SECTION" => TokenKind::Section,
                "IMPORT" => TokenKind::Import,
                "INCLUDE" => TokenKind::Include,
                _ => TokenKind::UnknownDirective,
            };
            return Some((kind, word_len.saturating_add(2)));
        }
        if let Some(after) = rest.strip_prefix("[ELSE") {
            if !at_word_boundary(after) {
                return None;
            }
            let spaced = after.trim_start_matches([' ', '\t']);
            if let Some(after_if) = spaced.strip_prefix("IF") {
                if at_word_boundary(after_if) {
                    let gap = after.len().saturating_sub(spaced.len());
                    return Some((TokenKind::ElseIf, gap.saturating_add(7)));
                }
            }
            return Some((TokenKind::Else, 5));
        }
        if let Some(after) = rest.strip_prefix("[END") {
            if at_word_boundary(after) {
                return Some((TokenKind::End, 4));
            }
        }
        None
    }

    fn at_reserved(&self) -> bool {
        let rest = self.rest();
        rest.starts_with("{{") || rest.starts_with(CONTEXT_OPEN) || self.directive_opener().is_some()
    }

    fn lex_text(&mut self) {
        if self.rest().starts_with("{{") {
            let start = self.emit_fixed(TokenKind::VariableOpen, 2);
            self.push_mode(LexMode::Variable, start);
            return;
        }
        if let Some((kind, len)) = self.directive_opener() {
            let start = self.emit_fixed(kind, len);
            self.push_mode(LexMode::Directive, start);
            return;
        }
        if self.rest().starts_with(CONTEXT_OPEN) {
            self.emit_fixed(TokenKind::ContextOpen, CONTEXT_OPEN.len().saturating_sub(1));
            let paren = self.emit_fixed(TokenKind::LParen, 1);
            self.push_mode(LexMode::Argument, paren);
            return;
        }

        let start = self.position();
        while let Some(c) = self.peek_char() {
            if self.pos > start.offset && self.at_reserved() {
                break;
            }
            self.advance(c);
        }
        self.emit(TokenKind::Text, start);
    }

    fn lex_directive(&mut self) {
        self.skip_whitespace();
        let Some(c) = self.peek_char() else {
            return;
        };
        let start = self.position();

        if self.rest().starts_with("{{") {
            self.emit_fixed(TokenKind::VariableOpen, 2);
            self.push_mode(LexMode::Variable, start);
            return;
        }

        match c {
            ']' => {
                self.emit_fixed(TokenKind::DirectiveClose, 1);
                self.pop_mode();
            }
            '(' => {
                self.emit_fixed(TokenKind::LParen, 1);
                self.push_mode(LexMode::Argument, start);
            }
            '=' => {
                self.emit_fixed(TokenKind::Equals, 1);
            }
            '"' | '\'' => self.lex_string(c),
            '#' => {
                self.advance(c);
                let name_start = self.pos;
                self.consume_while(is_word_char);
                if self.pos == name_start {
                    self.error(
                        start,
                        LexErrorKind::InvalidCharacter {
                            found: '#',
                            mode: LexModeName::Directive,
                        },
                    );
                } else {
                    let end = self.position();
                    self.emit_text(TokenKind::OperatorName, start, end, name_start);
                }
            }
            c if is_word_char(c) => {
                self.consume_while(is_word_char);
                self.emit(TokenKind::Identifier, start);
            }
            other => {
                self.error(
                    start,
                    LexErrorKind::InvalidCharacter {
                        found: other,
                        mode: LexModeName::Directive,
                    },
                );
                self.advance(other);
            }
        }
    }

    fn lex_variable(&mut self) {
        self.skip_whitespace();
        let Some(c) = self.peek_char() else {
            return;
        };
        let start = self.position();
        let rest = self.rest();

        if rest.starts_with("}}") {
            self.emit_fixed(TokenKind::VariableClose, 2);
            self.pop_mode();
        } else if rest.starts_with("??") {
            self.emit_fixed(TokenKind::DefaultOp, 2);
        } else if c == '"' || c == '\'' {
            self.lex_string(c);
        } else if is_path_char(c) {
            self.consume_while(is_path_char);
            self.emit(TokenKind::Identifier, start);
        } else {
            self.error(
                start,
                LexErrorKind::InvalidCharacter {
                    found: c,
                    mode: LexMode::Variable.name(),
                },
            );
            self.advance(c);
        }
    }

    /// Captures everything up to the matching `)` as a single token.
    fn lex_argument(&mut self) {
        let start = self.position();
        let mut depth = 0_usize;
        while let Some(c) = self.peek_char() {
            match c {
                '(' => depth = depth.saturating_add(1),
                ')' if depth == 0 => break,
                ')' => depth = depth.saturating_sub(1),
                _ => {}
            }
            self.advance(c);
        }
        self.emit(TokenKind::Argument, start);

        if !self.eof() {
            self.emit_fixed(TokenKind::RParen, 1);
            self.pop_mode();
        }
    }

    fn lex_string(&mut self, quote: char) {
        let start = self.position();
        self.advance(quote);
        while let Some(c) = self.peek_char() {
            self.advance(c);
            if c == quote {
                self.emit(TokenKind::StringLiteral, start);
                return;
            }
        }
        self.error(start, LexErrorKind::UnterminatedString { quote });
    }

    fn consume_while<F: Fn(char) -> bool>(&mut self, predicate: F) {
        while let Some(c) = self.peek_char() {
            if !predicate(c) {
                break;
            }
            self.advance(c);
        }
    }
}

fn at_word_boundary(rest: &str) -> bool {
    rest.chars()
        .next()
        .is_none_or(|c| !(c.is_alphanumeric() || c == '_'))
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':')
}

fn is_path_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '[' | ']')
}

/// Tokenizes `source`, returning every token and every lex error.
pub fn tokenize(source: &str) -> Tokenized<'_> {
    let tokenized = Lexer::new(source).run();
    log::trace!(
        "tokenized {} bytes into {} tokens ({} errors)",
        source.len(),
        tokenized.tokens.len(),
        tokenized.errors.len()
    );
    tokenized
}
