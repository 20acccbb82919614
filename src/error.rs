use crate::ast::{Position, SourceLocation};

pub type EchoResult<T> = std::result::Result<T, EchoError>;

/// The lexing mode a [`LexError`] was raised in.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LexModeName {
    Text,
    Directive,
    Variable,
    Argument,
}

impl std::fmt::Display for LexModeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Directive => "directive",
            Self::Variable => "variable reference",
            Self::Argument => "operator argument",
        };
        f.write_str(name)
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum LexErrorKind {
    #[error("Unterminated variable reference (expected '}}}}')")]
    UnterminatedVariable,
    #[error("Unterminated directive (expected ']')")]
    UnterminatedDirective,
    #[error("Unterminated operator argument (expected ')')")]
    UnterminatedArgument,
    #[error("Unterminated string literal (expected {quote})")]
    UnterminatedString { quote: char },
    #[error("Invalid character '{found}' inside {mode}")]
    InvalidCharacter { found: char, mode: LexModeName },
}

/// A tokenizer failure. Unterminated constructs report the location where
/// they were opened.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("Lex error at line {line}, column {column}: {kind}")]
pub struct LexError {
    pub line: usize,
    pub column: usize,
    #[source]
    pub kind: LexErrorKind,
}

impl LexError {
    pub(crate) const fn at(position: Position, kind: LexErrorKind) -> Self {
        Self {
            line: position.line,
            column: position.column,
            kind,
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ParseErrorKind {
    #[error(transparent)]
    Lex(LexErrorKind),
    #[error("Expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },
    #[error("Unexpected end of template (expected {expected})")]
    UnexpectedEof { expected: String },
    #[error("Unclosed {directive} (expected {closing})")]
    UnclosedDirective { directive: String, closing: String },
    #[error("Unknown directive '{keyword}'")]
    UnknownDirective { keyword: String },
    #[error("{directive} without a matching {opening}")]
    Unmatched { directive: String, opening: String },
    #[error("Duplicate [ELSE] in conditional")]
    DuplicateElse,
    #[error("[ELSE IF] cannot follow [ELSE]")]
    ElseIfAfterElse,
    #[error("Expected {expected} to close the block, found {found}")]
    MismatchedEnd { expected: String, found: String },
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("Parse error at line {line}, column {column}: {kind}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    #[source]
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub(crate) const fn at(position: Position, kind: ParseErrorKind) -> Self {
        Self {
            line: position.line,
            column: position.column,
            kind,
        }
    }
}

impl From<LexError> for ParseError {
    fn from(error: LexError) -> Self {
        Self {
            line: error.line,
            column: error.column,
            kind: ParseErrorKind::Lex(error.kind),
        }
    }
}

/// Every diagnostic a failed parse produced, in source order.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ParseErrors(pub Vec<ParseError>);

impl ParseErrors {
    pub fn iter(&self) -> std::slice::Iter<'_, ParseError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ParseErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseErrors {}

/// Failure raised by an operator handler.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum OperatorError {
    #[error("operator '{operator}' is not configured: {hint}")]
    NotConfigured { operator: String, hint: String },
    #[error("operator requires an argument")]
    MissingArgument,
    #[error("{0}")]
    Handler(String),
}

/// Failure reported by a [`crate::ContextResolver`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ContextError {
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("invalid asset path: {0}")]
    InvalidPath(String),
    #[error("{0}")]
    Resolver(String),
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum EchoError {
    #[error("Template failed to parse: {0}")]
    Parse(ParseErrors),
    #[error("Undefined variable: {path}")]
    UndefinedVariable { path: String },
    #[error("Invalid variable path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("Unknown operator: {operator}")]
    UnknownOperator { operator: String },
    #[error("Operator '{operator}' failed on '{variable}': {source}")]
    Operator {
        operator: String,
        variable: String,
        #[source]
        source: OperatorError,
    },
    #[error("Section not found: {name}")]
    MissingSection { name: String },
    #[error("Section '{name}' includes itself")]
    RecursiveInclude { name: String },
    #[error("Unresolved include reached the renderer: {name}")]
    UnresolvedInclude { name: String },
    #[error("Unresolved import reached the renderer: {path}")]
    UnresolvedImport { path: String },
    #[error("Context reference was not resolved: {path}")]
    UnresolvedContext { path: String },
    #[error("Failed to resolve context '{path}': {source}")]
    Context {
        path: String,
        #[source]
        source: ContextError,
    },
    #[error("Plugin already loaded: {name}")]
    PluginExists { name: String },
    #[error("Plugin '{name}' failed to load: {message}")]
    Plugin { name: String, message: String },
}

impl From<ParseErrors> for EchoError {
    fn from(errors: ParseErrors) -> Self {
        Self::Parse(errors)
    }
}

/// A non-fatal finding from [`crate::Echo::validate`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidationWarning {
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(
                f,
                "line {}, column {}: {}",
                location.start_line, location.start_column, self.message
            ),
            None => f.write_str(&self.message),
        }
    }
}
