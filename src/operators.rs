//! Named condition predicates.
//!
//! A registry layers three tables: operators registered on the engine
//! instance, operators installed by plugins, and the built-ins. Lookup walks
//! them in that order, so a registration shadows a built-in without touching
//! it.

use std::{
    borrow::Cow,
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::{ast::OperatorArgument, error::OperatorError};

/// Built-in operator names whose aliases are deprecated, with their
/// replacement.
const DEPRECATED_ALIASES: &[(&str, &str)] = &[("ai_judge", "ai_gate")];

/// Compiled `matches` patterns kept before the cache is reset.
const PATTERN_CACHE_LIMIT: usize = 256;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    /// Compares the variable against an argument.
    Comparison,
    /// Tests the variable on its own.
    Unary,
    /// Resolved asynchronously, typically by an LLM call.
    Async,
}

pub type SyncHandler = Arc<
    dyn Fn(&Value, Option<&OperatorArgument>) -> Result<bool, OperatorError> + Send + Sync,
>;

/// The handler behind an [`OperatorKind::Async`] operator.
#[async_trait]
pub trait AsyncPredicate: Send + Sync {
    async fn test(
        &self,
        value: &Value,
        argument: Option<&OperatorArgument>,
    ) -> Result<bool, OperatorError>;
}

/// An external yes/no judge, usually backed by a language model. Timeouts and
/// retries are the implementation's responsibility.
#[async_trait]
pub trait AiJudge: Send + Sync {
    async fn judge(&self, value: &Value, question: &str) -> Result<bool, OperatorError>;
}

#[derive(Clone)]
enum Handler {
    Sync(SyncHandler),
    Async(Arc<dyn AsyncPredicate>),
}

#[derive(Clone)]
pub struct OperatorDefinition {
    kind: OperatorKind,
    handler: Handler,
    description: Cow<'static, str>,
}

impl std::fmt::Debug for OperatorDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorDefinition")
            .field("kind", &self.kind)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl OperatorDefinition {
    pub fn comparison<D, F>(description: D, handler: F) -> Self
    where
        D: Into<Cow<'static, str>>,
        F: Fn(&Value, Option<&OperatorArgument>) -> Result<bool, OperatorError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            kind: OperatorKind::Comparison,
            handler: Handler::Sync(Arc::new(handler)),
            description: description.into(),
        }
    }

    pub fn unary<D, F>(description: D, handler: F) -> Self
    where
        D: Into<Cow<'static, str>>,
        F: Fn(&Value) -> Result<bool, OperatorError> + Send + Sync + 'static,
    {
        Self {
            kind: OperatorKind::Unary,
            handler: Handler::Sync(Arc::new(
                move |value: &Value, _: Option<&OperatorArgument>| handler(value),
            )),
            description: description.into(),
        }
    }

    pub fn asynchronous<D, P>(description: D, predicate: P) -> Self
    where
        D: Into<Cow<'static, str>>,
        P: AsyncPredicate + 'static,
    {
        Self {
            kind: OperatorKind::Async,
            handler: Handler::Async(Arc::new(predicate)),
            description: description.into(),
        }
    }

    pub const fn kind(&self) -> OperatorKind {
        self.kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Evaluates the operator, awaiting the handler for asynchronous kinds.
    pub async fn evaluate(
        &self,
        value: &Value,
        argument: Option<&OperatorArgument>,
    ) -> Result<bool, OperatorError> {
        match &self.handler {
            Handler::Sync(handler) => handler(value, argument),
            Handler::Async(predicate) => predicate.test(value, argument).await,
        }
    }

    /// Evaluates a synchronous operator in place. Returns `None` for
    /// asynchronous kinds.
    pub fn evaluate_sync(
        &self,
        value: &Value,
        argument: Option<&OperatorArgument>,
    ) -> Option<Result<bool, OperatorError>> {
        match &self.handler {
            Handler::Sync(handler) => Some(handler(value, argument)),
            Handler::Async(_) => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct OperatorRegistry {
    instance: HashMap<String, OperatorDefinition>,
    plugins: HashMap<String, OperatorDefinition>,
    builtins: HashMap<&'static str, OperatorDefinition>,
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OperatorRegistry {
    /// A registry holding only the built-ins. The AI operators fail with
    /// [`OperatorError::NotConfigured`] until a judge is supplied.
    pub fn new() -> Self {
        Self {
            instance: HashMap::new(),
            plugins: HashMap::new(),
            builtins: builtin_operators(None),
        }
    }

    /// A registry whose `ai_gate` (and `ai_judge`) built-ins delegate to
    /// `judge`.
    pub fn with_ai_judge(judge: Arc<dyn AiJudge>) -> Self {
        Self {
            instance: HashMap::new(),
            plugins: HashMap::new(),
            builtins: builtin_operators(Some(judge)),
        }
    }

    /// Registers an instance-level operator, returning the one it replaced.
    pub fn register<N: Into<String>>(
        &mut self,
        name: N,
        definition: OperatorDefinition,
    ) -> Option<OperatorDefinition> {
        self.instance.insert(name.into(), definition)
    }

    pub(crate) fn register_plugin<N: Into<String>>(
        &mut self,
        name: N,
        definition: OperatorDefinition,
    ) {
        self.plugins.insert(name.into(), definition);
    }

    pub(crate) fn set_ai_judge(&mut self, judge: Arc<dyn AiJudge>) {
        self.builtins = builtin_operators(Some(judge));
    }

    pub fn lookup(&self, name: &str) -> Option<&OperatorDefinition> {
        self.instance
            .get(name)
            .or_else(|| self.plugins.get(name))
            .or_else(|| self.builtins.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Every resolvable operator name, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .instance
            .keys()
            .map(String::as_str)
            .chain(self.plugins.keys().map(String::as_str))
            .chain(self.builtins.keys().copied())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

/// Whether `name` is a built-in AI operator. The parser uses this to flag
/// conditions for pre-evaluation.
pub(crate) fn is_builtin_async(name: &str) -> bool {
    matches!(name, "ai_gate" | "ai_judge")
}

/// The replacement for a deprecated built-in alias.
pub fn deprecated_replacement(name: &str) -> Option<&'static str> {
    DEPRECATED_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, replacement)| *replacement)
}

struct AiGate {
    judge: Option<Arc<dyn AiJudge>>,
}

#[async_trait]
impl AsyncPredicate for AiGate {
    async fn test(
        &self,
        value: &Value,
        argument: Option<&OperatorArgument>,
    ) -> Result<bool, OperatorError> {
        let Some(judge) = &self.judge else {
            return Err(OperatorError::NotConfigured {
                operator: "ai_gate".to_owned(),
                hint: "supply an AiJudge with Echo::with_ai_judge".to_owned(),
            });
        };
        let question = argument
            .map(ToString::to_string)
            .ok_or(OperatorError::MissingArgument)?;
        judge.judge(value, &question).await
    }
}

/// Compiled regular expressions by source pattern. Invalid patterns are
/// remembered as `None` so they are not recompiled either.
#[derive(Debug, Default)]
struct PatternCache {
    compiled: Mutex<HashMap<String, Option<Regex>>>,
}

impl PatternCache {
    fn is_match(&self, pattern: &str, text: &str) -> bool {
        let mut compiled = self
            .compiled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(regex) = compiled.get(pattern) {
            return regex.as_ref().is_some_and(|re| re.is_match(text));
        }
        if compiled.len() >= PATTERN_CACHE_LIMIT {
            log::debug!("Clearing {} cached patterns", compiled.len());
            compiled.clear();
        }
        let regex = Regex::new(pattern).ok();
        let matched = regex.as_ref().is_some_and(|re| re.is_match(text));
        compiled.insert(pattern.to_owned(), regex);
        matched
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.compiled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn builtin_operators(judge: Option<Arc<dyn AiJudge>>) -> HashMap<&'static str, OperatorDefinition> {
    let patterns = PatternCache::default();
    let mut operators = HashMap::new();
    operators.insert(
        "equals",
        OperatorDefinition::comparison(
            "Equal to the argument (case-insensitive for strings)",
            |value, argument| Ok(loosely_equal(value, required(argument)?)),
        ),
    );
    operators.insert(
        "contains",
        OperatorDefinition::comparison(
            "String contains the argument, or array has it as an element",
            |value, argument| {
                let argument = required(argument)?;
                Ok(match value {
                    Value::String(s) => s
                        .to_lowercase()
                        .contains(&argument.to_string().to_lowercase()),
                    Value::Array(items) => items.iter().any(|item| loosely_equal(item, argument)),
                    Value::Null | Value::Bool(_) | Value::Number(_) | Value::Object(_) => false,
                })
            },
        ),
    );
    operators.insert(
        "matches",
        OperatorDefinition::comparison(
            "Matches the argument as a regular expression",
            move |value, argument| {
                let pattern = required(argument)?.to_string();
                let Some(text) = scalar_text(value) else {
                    return Ok(false);
                };
                Ok(patterns.is_match(&pattern, &text))
            },
        ),
    );
    operators.insert(
        "greater_than",
        numeric("Numerically greater than the argument", |a, b| a > b),
    );
    operators.insert(
        "greater_than_or_equal",
        numeric("Numerically greater than or equal to the argument", |a, b| {
            a >= b
        }),
    );
    operators.insert(
        "less_than",
        numeric("Numerically less than the argument", |a, b| a < b),
    );
    operators.insert(
        "less_than_or_equal",
        numeric("Numerically less than or equal to the argument", |a, b| {
            a <= b
        }),
    );
    operators.insert(
        "one_of",
        OperatorDefinition::comparison(
            "One of a comma-separated list (case-insensitive)",
            |value, argument| {
                let options = match required(argument)? {
                    OperatorArgument::List(items) => items.clone(),
                    OperatorArgument::Text(text) => {
                        text.split(',').map(|item| item.trim().to_owned()).collect()
                    }
                    number @ OperatorArgument::Number(_) => vec![number.to_string()],
                };
                let Some(text) = scalar_text(value) else {
                    return Ok(false);
                };
                let text = text.to_lowercase();
                Ok(options.iter().any(|option| option.to_lowercase() == text))
            },
        ),
    );
    operators.insert(
        "exists",
        OperatorDefinition::unary(
            "Present and not empty (0 and false count as present)",
            |value| Ok(exists(value)),
        ),
    );
    operators.insert(
        "ai_gate",
        OperatorDefinition::asynchronous(
            "Asks an AI judge whether the value satisfies the argument",
            AiGate {
                judge: judge.clone(),
            },
        ),
    );
    operators.insert(
        "ai_judge",
        OperatorDefinition::asynchronous(
            "Deprecated alias of ai_gate",
            AiGate { judge },
        ),
    );
    operators
}

fn required(argument: Option<&OperatorArgument>) -> Result<&OperatorArgument, OperatorError> {
    argument.ok_or(OperatorError::MissingArgument)
}

fn numeric(description: &'static str, compare: fn(f64, f64) -> bool) -> OperatorDefinition {
    OperatorDefinition::comparison(description, move |value, argument| {
        let argument = match required(argument)? {
            OperatorArgument::Number(n) => Some(*n),
            OperatorArgument::Text(text) => parse_number(text),
            OperatorArgument::List(_) => None,
        };
        Ok(match (as_number(value), argument) {
            (Some(a), Some(b)) => compare(a, b),
            (Some(_) | None, None) | (None, Some(_)) => false,
        })
    })
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    }
}

/// The textual form of a scalar value.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Case-insensitive for strings, type-strict otherwise.
fn loosely_equal(value: &Value, argument: &OperatorArgument) -> bool {
    match (value, argument) {
        (Value::String(s), OperatorArgument::Text(_) | OperatorArgument::Number(_)) => {
            s.to_lowercase() == argument.to_string().to_lowercase()
        }
        (Value::Number(n), OperatorArgument::Number(m)) => n.as_f64() == Some(*m),
        (Value::String(_), OperatorArgument::List(_))
        | (Value::Number(_), OperatorArgument::Text(_) | OperatorArgument::List(_))
        | (
            Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_),
            OperatorArgument::Number(_) | OperatorArgument::Text(_) | OperatorArgument::List(_),
        ) => false,
    }
}

/// `false` for null, the empty string, and empty arrays and objects.
pub(crate) fn exists(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}
