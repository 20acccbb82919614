/// A point in the template source. `line` and `column` are 1-indexed, `offset`
/// is the byte offset into the source.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub const fn start() -> Self {
        Self {
            offset: 0,
            line: 1,
            column: 1,
        }
    }
}

/// The span of source a node or diagnostic refers to.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SourceLocation {
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
    pub source_text: Option<String>,
}

impl SourceLocation {
    pub(crate) fn span(source: &str, start: Position, end: Position) -> Self {
        Self {
            start_line: start.line,
            start_column: start.column,
            end_line: end.line,
            end_column: end.column,
            source_text: source.get(start.offset..end.offset).map(str::to_owned),
        }
    }
}

/// The classified argument of an operator call, e.g. the `a,b` in `#one_of(a,b)`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorArgument {
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl OperatorArgument {
    /// Classify free-form argument text. Empty (or whitespace-only) text means
    /// the operator was called without an argument.
    pub fn classify(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if is_numeric_literal(trimmed) {
            if let Ok(number) = trimmed.parse::<f64>() {
                return Some(Self::Number(number));
            }
        }
        if trimmed.contains(',') {
            let items = trimmed
                .split(',')
                .map(|item| strip_quotes(item.trim()).to_owned())
                .collect();
            return Some(Self::List(items));
        }
        Some(Self::Text(strip_quotes(trimmed).to_owned()))
    }

    /// A stable textual key, used to de-duplicate asynchronous evaluations.
    pub(crate) fn cache_key(&self) -> String {
        match self {
            Self::Number(n) => format!("n:{}", n),
            Self::Text(text) => format!("s:{}", text),
            Self::List(items) => format!("l:{}", items.join("\u{1f}")),
        }
    }
}

impl std::fmt::Display for OperatorArgument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(text) => f.write_str(text),
            Self::List(items) => f.write_str(&items.join(", ")),
        }
    }
}

fn is_numeric_literal(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    let mut parts = digits.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next();
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    all_digits(whole) && fraction.is_none_or(all_digits)
}

pub(crate) fn strip_quotes(text: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = text
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    text
}

/// The condition of an `[#IF]` or `[ELSE IF]` directive.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionExpr {
    pub variable: String,
    pub operator: String,
    pub argument: Option<OperatorArgument>,
    /// Set when `operator` names a built-in AI judge.
    pub is_async: bool,
}

/// What a conditional falls through to when its condition is false.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Alternate {
    #[default]
    None,
    Else(Vec<AstNode>),
    ElseIf(Box<Conditional>),
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Conditional {
    pub condition: ConditionExpr,
    pub consequent: Vec<AstNode>,
    pub alternate: Alternate,
    pub location: SourceLocation,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    /// Literal output, whitespace preserved.
    Text {
        value: String,
        location: SourceLocation,
    },
    /// A variable reference such as `{{user.items[0].name ?? "none"}}`.
    Variable {
        path: String,
        default_value: Option<String>,
        location: SourceLocation,
    },
    /// A `#context(path)` asset reference. `slot` numbers context references
    /// in source order and keys the resolved content side table.
    Context {
        path: String,
        slot: usize,
        location: SourceLocation,
    },
    Conditional(Conditional),
    /// A named fragment; never rendered in place.
    Section {
        name: String,
        body: Vec<AstNode>,
        location: SourceLocation,
    },
    Import {
        path: String,
        location: SourceLocation,
    },
    Include {
        name: String,
        location: SourceLocation,
    },
}

impl AstNode {
    pub const fn location(&self) -> &SourceLocation {
        match self {
            Self::Text { location, .. }
            | Self::Variable { location, .. }
            | Self::Context { location, .. }
            | Self::Section { location, .. }
            | Self::Import { location, .. }
            | Self::Include { location, .. } => location,
            Self::Conditional(conditional) => &conditional.location,
        }
    }
}

/// Calls `visit` for every node in `nodes`, depth first, descending into
/// conditional branches and section bodies.
pub(crate) fn walk<'a, F>(nodes: &'a [AstNode], visit: &mut F)
where
    F: FnMut(&'a AstNode),
{
    for node in nodes {
        visit(node);
        match node {
            AstNode::Conditional(conditional) => walk_conditional(conditional, visit),
            AstNode::Section { body, .. } => walk(body, visit),
            AstNode::Text { .. }
            | AstNode::Variable { .. }
            | AstNode::Context { .. }
            | AstNode::Import { .. }
            | AstNode::Include { .. } => {}
        }
    }
}

fn walk_conditional<'a, F>(conditional: &'a Conditional, visit: &mut F)
where
    F: FnMut(&'a AstNode),
{
    walk(&conditional.consequent, visit);
    match &conditional.alternate {
        Alternate::None => {}
        Alternate::Else(body) => walk(body, visit),
        Alternate::ElseIf(next) => walk_conditional(next, visit),
    }
}

/// Every condition in `nodes`, including those of `[ELSE IF]` links, which are
/// not nodes of their own.
pub(crate) fn conditions(nodes: &[AstNode]) -> Vec<&ConditionExpr> {
    let mut found = Vec::new();
    walk(nodes, &mut |node| {
        if let AstNode::Conditional(conditional) = node {
            let mut link = Some(conditional);
            while let Some(current) = link {
                found.push(&current.condition);
                link = match &current.alternate {
                    Alternate::ElseIf(next) => Some(next.as_ref()),
                    Alternate::None | Alternate::Else(_) => None,
                };
            }
        }
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_classify_number() {
        assert_eq!(
            OperatorArgument::classify(" 42 "),
            Some(OperatorArgument::Number(42.0))
        );
        assert_eq!(
            OperatorArgument::classify("-3.5"),
            Some(OperatorArgument::Number(-3.5))
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_classify_list() {
        assert_eq!(
            OperatorArgument::classify("active, 'pending' ,\"completed\""),
            Some(OperatorArgument::List(vec![
                "active".to_owned(),
                "pending".to_owned(),
                "completed".to_owned()
            ]))
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_classify_text() {
        assert_eq!(
            OperatorArgument::classify("My Girlfriend"),
            Some(OperatorArgument::Text("My Girlfriend".to_owned()))
        );
        assert_eq!(
            OperatorArgument::classify("\"quoted\""),
            Some(OperatorArgument::Text("quoted".to_owned()))
        );
        // Not a pure numeric literal.
        assert_eq!(
            OperatorArgument::classify("1e5"),
            Some(OperatorArgument::Text("1e5".to_owned()))
        );
        assert_eq!(
            OperatorArgument::classify("1.2.3"),
            Some(OperatorArgument::Text("1.2.3".to_owned()))
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_classify_empty() {
        assert_eq!(OperatorArgument::classify("   "), None);
    }
}
