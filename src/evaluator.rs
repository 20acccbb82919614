//! Branch selection.
//!
//! Evaluation runs in three passes over a parsed template:
//!
//! 1. every `[#SECTION]` body is collected by name, wherever it is declared;
//! 2. every distinct asynchronous condition is evaluated, all at once;
//! 3. the tree is walked, picking one branch per conditional and splicing in
//!    included sections.
//!
//! The result is a flat list of references into the original tree holding
//! only text, variables, context references and imports.

use std::collections::{HashMap, HashSet};

use futures::future::join_all;
use serde_json::Value;

use crate::{
    EchoConfig,
    ast::{Alternate, AstNode, ConditionExpr, Conditional, conditions, walk},
    error::{EchoError, EchoResult, OperatorError},
    interface::Context,
    operators::{OperatorKind, OperatorRegistry, deprecated_replacement},
    resolver::resolve_variable,
};

static UNDEFINED: Value = Value::Null;

/// `(operator, variable, value, argument)`. Conditions sharing a key share
/// one asynchronous evaluation.
type AsyncKey = (String, String, String, String);

fn async_key(condition: &ConditionExpr, value: &Value) -> AsyncKey {
    (
        condition.operator.clone(),
        condition.variable.clone(),
        value.to_string(),
        condition
            .argument
            .as_ref()
            .map(|argument| argument.cache_key())
            .unwrap_or_default(),
    )
}

struct Evaluation<'a, 'c> {
    context: &'c Context,
    config: &'c EchoConfig,
    operators: &'c OperatorRegistry,
    sections: HashMap<&'a str, &'a [AstNode]>,
    async_results: HashMap<AsyncKey, Result<bool, OperatorError>>,
    /// Sections currently being included, innermost last.
    including: Vec<&'a str>,
}

/// Resolves every conditional and include in `ast` against `context`.
///
/// # Errors
/// Only in strict mode: on a malformed variable path, an unknown or failing
/// operator, a missing include target or a recursive include.
pub async fn evaluate<'a>(
    ast: &'a [AstNode],
    context: &Context,
    config: &EchoConfig,
    operators: &OperatorRegistry,
) -> EchoResult<Vec<&'a AstNode>> {
    let mut evaluation = Evaluation {
        context,
        config,
        operators,
        sections: collect_sections(ast),
        async_results: HashMap::new(),
        including: Vec::new(),
    };
    evaluation.pre_evaluate(ast).await?;

    let mut output = Vec::new();
    evaluation.evaluate_nodes(ast, &mut output)?;
    log::debug!("Evaluated template down to {} nodes", output.len());
    Ok(output)
}

fn collect_sections(ast: &[AstNode]) -> HashMap<&str, &[AstNode]> {
    let mut sections = HashMap::new();
    walk(ast, &mut |node| {
        if let AstNode::Section { name, body, .. } = node {
            if sections.insert(name.as_str(), body.as_slice()).is_some() {
                log::warn!("Section '{}' is declared more than once; the last one wins", name);
            }
        }
    });
    log::debug!("Collected {} sections", sections.len());
    sections
}

impl<'a, 'c> Evaluation<'a, 'c> {
    async fn pre_evaluate(&mut self, ast: &'a [AstNode]) -> EchoResult<()> {
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for condition in conditions(ast) {
            let Some(definition) = self.operators.lookup(&condition.operator) else {
                continue;
            };
            if definition.kind() != OperatorKind::Async {
                if condition.is_async {
                    log::debug!(
                        "'{}' is overridden by a synchronous operator",
                        condition.operator
                    );
                }
                continue;
            }
            // Branches not yet chosen may never run, so path errors wait for
            // the tree walk.
            let value = self.resolve_lenient(&condition.variable);
            let key = async_key(condition, value);
            if seen.insert(key.clone()) {
                pending.push((key, definition, value, condition.argument.as_ref()));
            }
        }
        if pending.is_empty() {
            return Ok(());
        }

        log::debug!(
            "Pre-evaluating {} distinct asynchronous conditions",
            pending.len()
        );
        let outcomes = join_all(
            pending
                .iter()
                .map(|(_, definition, value, argument)| definition.evaluate(value, *argument)),
        )
        .await;
        for ((key, ..), outcome) in pending.into_iter().zip(outcomes) {
            self.async_results.insert(key, outcome);
        }
        Ok(())
    }

    fn resolve(&self, path: &str) -> EchoResult<&'c Value> {
        Ok(resolve_variable(path, self.context, self.config.strict)?.unwrap_or(&UNDEFINED))
    }

    fn resolve_lenient(&self, path: &str) -> &'c Value {
        resolve_variable(path, self.context, false)
            .ok()
            .flatten()
            .unwrap_or(&UNDEFINED)
    }

    fn evaluate_nodes(
        &mut self,
        nodes: &'a [AstNode],
        output: &mut Vec<&'a AstNode>,
    ) -> EchoResult<()> {
        for node in nodes {
            match node {
                AstNode::Text { .. }
                | AstNode::Variable { .. }
                | AstNode::Context { .. }
                | AstNode::Import { .. } => output.push(node),
                AstNode::Conditional(conditional) => {
                    if let Some(branch) = self.select_branch(conditional)? {
                        self.evaluate_nodes(branch, output)?;
                    }
                }
                AstNode::Section { .. } => {}
                AstNode::Include { name, .. } => self.include(name, output)?,
            }
        }
        Ok(())
    }

    fn select_branch(&self, conditional: &'a Conditional) -> EchoResult<Option<&'a [AstNode]>> {
        let mut link = conditional;
        loop {
            if self.test(&link.condition)? {
                return Ok(Some(link.consequent.as_slice()));
            }
            match &link.alternate {
                Alternate::None => return Ok(None),
                Alternate::Else(body) => return Ok(Some(body.as_slice())),
                Alternate::ElseIf(next) => link = next.as_ref(),
            }
        }
    }

    fn test(&self, condition: &ConditionExpr) -> EchoResult<bool> {
        let strict = self.config.strict;
        let Some(definition) = self.operators.lookup(&condition.operator) else {
            if strict {
                return Err(EchoError::UnknownOperator {
                    operator: condition.operator.clone(),
                });
            }
            log::warn!(
                "Unknown operator '{}' on '{}'; treating the condition as false",
                condition.operator,
                condition.variable
            );
            return Ok(false);
        };
        if let Some(replacement) = deprecated_replacement(&condition.operator) {
            log::warn!(
                "Operator '{}' is deprecated, use '{}'",
                condition.operator,
                replacement
            );
        }

        let value = self.resolve(&condition.variable)?;
        let argument = condition.argument.as_ref();
        let outcome = definition.evaluate_sync(value, argument).unwrap_or_else(|| {
            self.async_results
                .get(&async_key(condition, value))
                .cloned()
                .unwrap_or_else(|| {
                    Err(OperatorError::Handler(
                        "asynchronous condition was not pre-evaluated".to_owned(),
                    ))
                })
        });

        match outcome {
            Ok(result) => {
                log::trace!(
                    "{{{{{}}}}} #{} evaluated to {}",
                    condition.variable,
                    condition.operator,
                    result
                );
                Ok(result)
            }
            Err(source) if strict => Err(EchoError::Operator {
                operator: condition.operator.clone(),
                variable: condition.variable.clone(),
                source,
            }),
            Err(source) => {
                log::warn!(
                    "Operator '{}' failed on '{}'; treating the condition as false: {}",
                    condition.operator,
                    condition.variable,
                    source
                );
                Ok(false)
            }
        }
    }

    fn include(&mut self, name: &'a str, output: &mut Vec<&'a AstNode>) -> EchoResult<()> {
        let strict = self.config.strict;
        let Some(body) = self.sections.get(name).copied() else {
            if strict {
                return Err(EchoError::MissingSection {
                    name: name.to_owned(),
                });
            }
            log::warn!("Dropping include of undeclared section '{}'", name);
            return Ok(());
        };
        if self.including.contains(&name) {
            if strict {
                return Err(EchoError::RecursiveInclude {
                    name: name.to_owned(),
                });
            }
            log::warn!("Dropping recursive include of section '{}'", name);
            return Ok(());
        }

        self.including.push(name);
        let result = self.evaluate_nodes(body, output);
        self.including.pop();
        result
    }
}
