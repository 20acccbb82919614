use serde_json::Value;

use crate::{
    error::{EchoError, EchoResult},
    interface::Context,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Key(String),
    Index(usize),
}

/// Splits `user.items[0].name` into keys and array indices, or reports why
/// the path is malformed.
fn parse_path(path: &str) -> Result<Vec<Step>, String> {
    if path.trim().is_empty() {
        return Err("path is empty".to_owned());
    }
    let mut steps = Vec::new();
    for segment in path.split('.') {
        let (name, mut rest) = match segment.find(['[', ']']) {
            Some(at) => segment.split_at(at),
            None => (segment, ""),
        };
        if name.is_empty() {
            return Err("path has an empty segment".to_owned());
        }
        steps.push(Step::Key(name.to_owned()));

        while !rest.is_empty() {
            let Some((index, after)) = rest
                .strip_prefix('[')
                .and_then(|inner| inner.split_once(']'))
                .filter(|(index, _)| !index.contains('['))
            else {
                return Err("unbalanced brackets".to_owned());
            };
            steps.push(Step::Index(parse_index(index)?));
            rest = after;
        }
    }
    Ok(steps)
}

fn parse_index(raw: &str) -> Result<usize, String> {
    let index = raw.trim();
    if index.is_empty() {
        return Err("empty brackets".to_owned());
    }
    if index
        .strip_prefix('-')
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
    {
        return Err(format!("negative index [{}]", index));
    }
    if !index.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("non-numeric index [{}]", index));
    }
    index
        .parse()
        .map_err(|_| format!("index [{}] is out of range", index))
}

fn malformed<'c>(path: &str, reason: String, strict: bool) -> EchoResult<Option<&'c Value>> {
    if strict {
        return Err(EchoError::InvalidPath {
            path: path.to_owned(),
            reason,
        });
    }
    log::warn!("Treating malformed variable path '{}' as undefined: {}", path, reason);
    Ok(None)
}

/// Walks `path` through `context`.
///
/// `Ok(None)` means undefined: a missing key, an out-of-range index, or a
/// `null` met part way along the path. Malformed bracket syntax and indexing
/// into something that is not an array are errors when `strict` is set and
/// undefined otherwise.
///
/// # Errors
/// [`EchoError::InvalidPath`], only in strict mode.
pub fn resolve_variable<'c>(
    path: &str,
    context: &'c Context,
    strict: bool,
) -> EchoResult<Option<&'c Value>> {
    let steps = match parse_path(path) {
        Ok(steps) => steps,
        Err(reason) => return malformed(path, reason, strict),
    };

    let mut current: Option<&'c Value> = None;
    for step in &steps {
        let next = match (current, step) {
            (None, Step::Key(key)) => context.get(key),
            (None, Step::Index(_)) => None,
            (Some(Value::Null), Step::Key(_) | Step::Index(_)) => return Ok(None),
            (Some(value), Step::Key(key)) => match value {
                Value::Object(map) => map.get(key),
                // `items.0` reads the same element as `items[0]`.
                Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
                Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => None,
            },
            (Some(value), Step::Index(index)) => match value.as_array() {
                Some(items) => items.get(*index),
                None => {
                    return malformed(path, "indexed value is not an array".to_owned(), strict);
                }
            },
        };
        match next {
            Some(value) => current = Some(value),
            None => return Ok(None),
        }
    }
    Ok(current)
}
