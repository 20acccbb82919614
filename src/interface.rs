use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{
    EchoResult, ParseResult, ValidationResult,
    renderer::ContentBlock,
};

/// The variable bindings a template is rendered against.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Context {
    values: Map<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context from a JSON object. Returns `None` for any other kind
    /// of value.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(values) => Some(Self { values }),
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) | Value::Array(_) => {
                None
            }
        }
    }

    pub fn insert<N: Into<String>, V: Into<Value>>(&mut self, name: N, value: V) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get<N: AsRef<str>>(&self, name: N) -> Option<&Value> {
        self.values.get(name.as_ref())
    }

    pub fn contains<N: AsRef<str>>(&self, name: N) -> bool {
        self.values.contains_key(name.as_ref())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Map<String, Value>> for Context {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}

impl<N: Into<String>, V: Into<Value>> FromIterator<(N, V)> for Context {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

/// `EchoInterface` is the surface of the Echo prompt templating engine: parse
/// and check templates, then render them against a [`Context`] into a string
/// or into multimodal content blocks.
#[async_trait]
pub trait EchoInterface {
    /// `parse` tokenizes and parses `source`, collecting every diagnostic
    /// instead of stopping at the first.
    fn parse(&self, source: &str) -> ParseResult;

    /// `validate` parses `source` and reports problems that would only show
    /// up at render time, such as unknown operators and includes of
    /// undeclared sections.
    fn validate(&self, source: &str) -> ValidationResult;

    /// `render` evaluates `source` against `context` and stringifies the
    /// result.
    ///
    /// # Errors
    /// - If the template does not parse.
    /// - In strict mode, on the first evaluation or render failure: an
    ///   undefined variable, a malformed path, an unknown or failing
    ///   operator, a missing include target, or an unresolved asset.
    async fn render(&self, source: &str, context: &Context) -> EchoResult<String>;

    /// `render_multimodal` is `render`, but image assets referenced with
    /// `#context(..)` become image blocks between coalesced text blocks.
    ///
    /// # Errors
    /// The same as [`EchoInterface::render`].
    async fn render_multimodal(
        &self,
        source: &str,
        context: &Context,
    ) -> EchoResult<Vec<ContentBlock>>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_context_builders() {
        let mut context = Context::new();
        context.insert("name", "Ada").insert("age", 36);
        assert!(context.contains("name"));
        assert_eq!(context.get("age"), Some(&json!(36)));
        assert_eq!(context.len(), 2);

        let collected: Context = [("name", "Ada"), ("role", "admin")].into_iter().collect();
        assert_eq!(collected.get("role"), Some(&json!("admin")));

        assert!(Context::from_value(json!([1, 2])).is_none());
        assert!(Context::from_value(json!({})).unwrap().is_empty());
    }
}
