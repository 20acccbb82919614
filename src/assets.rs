//! Assets referenced with `#context(..)`.
//!
//! Resolution happens between evaluation and rendering. Results are kept in a
//! [`ResolvedContexts`] table keyed by the node's slot, so the parsed template
//! stays untouched and can be rendered again with other assets.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::future::join_all;

use crate::{
    ast::AstNode,
    error::{ContextError, EchoError, EchoResult},
};

/// The content behind a context reference.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedContent {
    pub mime_type: String,
    /// A `data:` URL, set for binary assets such as images.
    pub data_url: Option<String>,
    /// The asset's text, set for textual assets.
    pub text: Option<String>,
}

impl ResolvedContent {
    pub fn text<M: Into<String>, T: Into<String>>(mime_type: M, text: T) -> Self {
        Self {
            mime_type: mime_type.into(),
            data_url: None,
            text: Some(text.into()),
        }
    }

    pub fn image<M: Into<String>, U: Into<String>>(mime_type: M, data_url: U) -> Self {
        Self {
            mime_type: mime_type.into(),
            data_url: Some(data_url.into()),
            text: None,
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Looks up assets for `#context(..)` references. Implementations own path
/// validation: rejecting traversal, foreign URLs and percent-encoding.
#[async_trait]
pub trait ContextResolver: Send + Sync {
    async fn resolve(&self, path: &str) -> Result<ResolvedContent, ContextError>;

    /// Resolves several paths at once. Results line up with `paths`.
    async fn resolve_batch(&self, paths: &[&str]) -> Vec<Result<ResolvedContent, ContextError>> {
        join_all(paths.iter().map(|path| self.resolve(path))).await
    }
}

/// Resolved content by context slot.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedContexts {
    slots: HashMap<usize, ResolvedContent>,
}

impl ResolvedContexts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, slot: usize, content: ResolvedContent) {
        self.slots.insert(slot, content);
    }

    pub fn get(&self, slot: usize) -> Option<&ResolvedContent> {
        self.slots.get(&slot)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Resolves every context reference among `nodes`, asking `resolver` once per
/// distinct path.
///
/// # Errors
/// In strict mode, when there is no resolver or a path fails to resolve.
pub(crate) async fn resolve_contexts(
    nodes: &[&AstNode],
    resolver: Option<&dyn ContextResolver>,
    strict: bool,
) -> EchoResult<ResolvedContexts> {
    let references: Vec<(usize, &str)> = nodes
        .iter()
        .filter_map(|node| match node {
            AstNode::Context { path, slot, .. } => Some((*slot, path.as_str())),
            AstNode::Text { .. }
            | AstNode::Variable { .. }
            | AstNode::Conditional(_)
            | AstNode::Section { .. }
            | AstNode::Import { .. }
            | AstNode::Include { .. } => None,
        })
        .collect();

    let mut resolved = ResolvedContexts::new();
    let Some((_, first)) = references.first() else {
        return Ok(resolved);
    };
    let Some(resolver) = resolver else {
        if strict {
            return Err(EchoError::UnresolvedContext {
                path: (*first).to_owned(),
            });
        }
        log::warn!(
            "No context resolver configured; skipping {} context reference(s)",
            references.len()
        );
        return Ok(resolved);
    };

    let mut paths: Vec<&str> = Vec::new();
    for &(_, path) in &references {
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    log::debug!("Resolving {} distinct context asset(s)", paths.len());
    let outcomes: HashMap<&str, Result<ResolvedContent, ContextError>> = paths
        .iter()
        .copied()
        .zip(resolver.resolve_batch(&paths).await)
        .collect();

    for (slot, path) in references {
        match outcomes.get(path) {
            Some(Ok(content)) => resolved.insert(slot, content.clone()),
            Some(Err(source)) if strict => {
                return Err(EchoError::Context {
                    path: path.to_owned(),
                    source: source.clone(),
                });
            }
            Some(Err(source)) => {
                log::warn!("Skipping context '{}': {}", path, source);
            }
            None if strict => {
                return Err(EchoError::UnresolvedContext {
                    path: path.to_owned(),
                });
            }
            None => log::warn!("Resolver returned nothing for context '{}'", path),
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::executor::block_on;

    use super::*;
    use crate::parser::parse;

    struct Library {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ContextResolver for Library {
        async fn resolve(&self, path: &str) -> Result<ResolvedContent, ContextError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match path {
                "plp://logo" => Ok(ResolvedContent::image(
                    "image/png",
                    "data:image/png;base64,AAAA",
                )),
                "notes" => Ok(ResolvedContent::text("text/plain", "Be brief.")),
                other => Err(ContextError::NotFound(other.to_owned())),
            }
        }
    }

    fn library() -> Library {
        Library {
            calls: AtomicUsize::new(0),
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_resolves_each_path_once() {
        let ast = parse("#context(plp://logo) #context(notes) #context(plp://logo)")
            .into_result()
            .unwrap();
        let nodes: Vec<&AstNode> = ast.iter().collect();
        let resolver = library();
        let resolved = block_on(resolve_contexts(&nodes, Some(&resolver), true)).unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
        assert_eq!(resolved.len(), 3);
        assert!(resolved.get(0).unwrap().is_image());
        assert_eq!(resolved.get(1).unwrap().text.as_deref(), Some("Be brief."));
        assert!(resolved.get(2).unwrap().is_image());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_failures_follow_policy() {
        let ast = parse("#context(missing) #context(notes)").into_result().unwrap();
        let nodes: Vec<&AstNode> = ast.iter().collect();
        let resolver = library();

        let error = block_on(resolve_contexts(&nodes, Some(&resolver), true)).unwrap_err();
        assert!(matches!(error, EchoError::Context { path, .. } if path == "missing"));

        let resolved = block_on(resolve_contexts(&nodes, Some(&resolver), false)).unwrap();
        assert!(resolved.get(0).is_none());
        assert!(resolved.get(1).is_some());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_missing_resolver() {
        let ast = parse("#context(notes)").into_result().unwrap();
        let nodes: Vec<&AstNode> = ast.iter().collect();
        assert!(matches!(
            block_on(resolve_contexts(&nodes, None, true)),
            Err(EchoError::UnresolvedContext { .. })
        ));
        assert!(block_on(resolve_contexts(&nodes, None, false)).unwrap().is_empty());
    }
}
