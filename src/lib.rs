mod assets;
mod ast;
mod config;
mod engine;
mod error;
mod evaluator;
mod interface;
mod lexer;
mod operators;
mod parser;
mod renderer;
mod resolver;
mod template;

// Public exports.
pub use assets::{ContextResolver, ResolvedContent, ResolvedContexts};
pub use ast::{
    Alternate, AstNode, ConditionExpr, Conditional, OperatorArgument, Position, SourceLocation,
};
pub use config::{EchoConfig, EchoPlugin, PluginHook};
pub use engine::Echo;
pub use error::{
    ContextError, EchoError, EchoResult, LexError, LexErrorKind, LexModeName, OperatorError,
    ParseError, ParseErrorKind, ParseErrors, ValidationWarning,
};
pub use evaluator::evaluate;
pub use interface::{Context, EchoInterface};
pub use lexer::{Token, TokenKind, Tokenized, tokenize};
pub use operators::{
    AiJudge, AsyncPredicate, OperatorDefinition, OperatorKind, OperatorRegistry, SyncHandler,
    deprecated_replacement,
};
pub use parser::{ParseResult, parse};
pub use renderer::{ContentBlock, render, render_blocks, stringify};
pub use resolver::resolve_variable;
pub use template::{Template, ValidationResult, validate};
