use std::collections::HashSet;

use crate::{
    ast::{Alternate, AstNode, Conditional, SourceLocation, walk},
    error::{ParseError, ParseErrors, ValidationWarning},
    operators::{OperatorRegistry, deprecated_replacement},
    parser::parse,
};

/// A parsed template, kept together with its source so it can be rendered
/// many times without parsing again.
///
/// # Example
///
/// ```
/// use echo_prompt::Template;
///
/// let template = Template::parse(
///     "[#IF {{user.plan}} #equals(pro)]Hi {{user.name}}[END IF] [#INCLUDE footer]",
/// )
/// .unwrap();
/// assert_eq!(template.variables(), vec!["user.plan", "user.name"]);
/// assert_eq!(template.includes(), vec!["footer"]);
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    #[cfg_attr(feature = "serde", serde(skip))]
    ast: Vec<AstNode>,
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Template {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        struct TemplateHelper {
            source: String,
        }

        let helper = TemplateHelper::deserialize(deserializer)?;
        Self::parse(helper.source)
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse template: {}", e)))
    }
}

impl Template {
    /// Parses `source`.
    ///
    /// # Errors
    /// Every lex or parse error found, in source order.
    pub fn parse<S: Into<String>>(source: S) -> Result<Self, ParseErrors> {
        let source = source.into();
        let ast = parse(&source).into_result()?;
        Ok(Self { source, ast })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &[AstNode] {
        &self.ast
    }

    /// Every variable path the template reads, from variable references and
    /// conditions alike, deduplicated in source order.
    pub fn variables(&self) -> Vec<&str> {
        let mut found = Vec::new();
        collect_variables(&self.ast, &mut found);
        found
    }

    /// Declared section names, in source order.
    pub fn sections(&self) -> Vec<&str> {
        self.collect(|node| match node {
            AstNode::Section { name, .. } => Some(name.as_str()),
            AstNode::Text { .. }
            | AstNode::Variable { .. }
            | AstNode::Context { .. }
            | AstNode::Conditional(_)
            | AstNode::Import { .. }
            | AstNode::Include { .. } => None,
        })
    }

    /// Included section names, in source order.
    pub fn includes(&self) -> Vec<&str> {
        self.collect(|node| match node {
            AstNode::Include { name, .. } => Some(name.as_str()),
            AstNode::Text { .. }
            | AstNode::Variable { .. }
            | AstNode::Context { .. }
            | AstNode::Conditional(_)
            | AstNode::Section { .. }
            | AstNode::Import { .. } => None,
        })
    }

    pub fn imports(&self) -> Vec<&str> {
        self.collect(|node| match node {
            AstNode::Import { path, .. } => Some(path.as_str()),
            AstNode::Text { .. }
            | AstNode::Variable { .. }
            | AstNode::Context { .. }
            | AstNode::Conditional(_)
            | AstNode::Section { .. }
            | AstNode::Include { .. } => None,
        })
    }

    /// Paths of `#context(..)` references, deduplicated.
    pub fn context_paths(&self) -> Vec<&str> {
        let mut paths = self.collect(|node| match node {
            AstNode::Context { path, .. } => Some(path.as_str()),
            AstNode::Text { .. }
            | AstNode::Variable { .. }
            | AstNode::Conditional(_)
            | AstNode::Section { .. }
            | AstNode::Import { .. }
            | AstNode::Include { .. } => None,
        });
        let mut seen = HashSet::new();
        paths.retain(|path| seen.insert(*path));
        paths
    }

    fn collect<'t, F>(&'t self, mut pick: F) -> Vec<&'t str>
    where
        F: FnMut(&'t AstNode) -> Option<&'t str>,
    {
        let mut found = Vec::new();
        walk(&self.ast, &mut |node| {
            if let Some(item) = pick(node) {
                found.push(item);
            }
        });
        found
    }

    /// Problems that would only surface at render time.
    pub(crate) fn warnings(&self, operators: &OperatorRegistry) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();

        walk(&self.ast, &mut |node| {
            if let AstNode::Conditional(conditional) = node {
                check_operators(conditional, operators, &mut warnings);
            }
        });

        let mut declared = HashSet::new();
        walk(&self.ast, &mut |node| {
            if let AstNode::Section { name, location, .. } = node {
                if !declared.insert(name.as_str()) {
                    warnings.push(ValidationWarning {
                        message: format!(
                            "Section '{}' is declared more than once; the last declaration wins",
                            name
                        ),
                        location: Some(location.clone()),
                    });
                }
            }
        });

        walk(&self.ast, &mut |node| {
            if let AstNode::Include { name, location } = node {
                if !declared.contains(name.as_str()) {
                    warnings.push(ValidationWarning {
                        message: format!("Include of undeclared section '{}'", name),
                        location: Some(location.clone()),
                    });
                }
            }
        });

        warnings.sort_by_key(|warning| {
            warning
                .location
                .as_ref()
                .map(|location| (location.start_line, location.start_column))
        });
        warnings
    }
}

fn push_unique<'t>(found: &mut Vec<&'t str>, item: &'t str) {
    if !found.contains(&item) {
        found.push(item);
    }
}

fn collect_variables<'t>(nodes: &'t [AstNode], found: &mut Vec<&'t str>) {
    for node in nodes {
        match node {
            AstNode::Variable { path, .. } => push_unique(found, path),
            AstNode::Conditional(conditional) => collect_conditional_variables(conditional, found),
            AstNode::Section { body, .. } => collect_variables(body, found),
            AstNode::Text { .. }
            | AstNode::Context { .. }
            | AstNode::Import { .. }
            | AstNode::Include { .. } => {}
        }
    }
}

fn collect_conditional_variables<'t>(conditional: &'t Conditional, found: &mut Vec<&'t str>) {
    push_unique(found, &conditional.condition.variable);
    collect_variables(&conditional.consequent, found);
    match &conditional.alternate {
        Alternate::None => {}
        Alternate::Else(body) => collect_variables(body, found),
        Alternate::ElseIf(next) => collect_conditional_variables(next, found),
    }
}

/// Checks the operator of each link in an `[#IF]`/`[ELSE IF]` chain.
fn check_operators(
    conditional: &Conditional,
    operators: &OperatorRegistry,
    warnings: &mut Vec<ValidationWarning>,
) {
    let mut link = Some(conditional);
    while let Some(current) = link {
        let operator = &current.condition.operator;
        let location = Some(condition_location(current));
        if !operators.contains(operator) {
            warnings.push(ValidationWarning {
                message: format!("Unknown operator '#{}'", operator),
                location,
            });
        } else if let Some(replacement) = deprecated_replacement(operator) {
            warnings.push(ValidationWarning {
                message: format!(
                    "Operator '#{}' is deprecated; use '#{}' instead",
                    operator, replacement
                ),
                location,
            });
        }
        link = match &current.alternate {
            Alternate::ElseIf(next) => Some(next.as_ref()),
            Alternate::None | Alternate::Else(_) => None,
        };
    }
}

/// Where a link's directive starts. The full span would cover the rest of
/// the chain.
fn condition_location(conditional: &Conditional) -> SourceLocation {
    SourceLocation {
        source_text: None,
        ..conditional.location.clone()
    }
}

/// The outcome of [`validate`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationResult {
    /// `true` when the template parses. Warnings do not affect validity.
    pub valid: bool,
    pub errors: Vec<ParseError>,
    pub warnings: Vec<ValidationWarning>,
}

/// Parses `source` and checks it against `operators` without rendering.
pub fn validate(source: &str, operators: &OperatorRegistry) -> ValidationResult {
    match Template::parse(source) {
        Ok(template) => ValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: template.warnings(operators),
        },
        Err(errors) => ValidationResult {
            valid: false,
            errors: errors.0,
            warnings: Vec::new(),
        },
    }
}
