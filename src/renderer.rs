//! Stringification of evaluated templates.
//!
//! By the time nodes reach the renderer every conditional has been resolved,
//! so rendering never branches: it stringifies variables, inlines resolved
//! assets and applies the configured post-processing.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::{
    EchoConfig,
    assets::ResolvedContexts,
    ast::AstNode,
    error::{EchoError, EchoResult},
    interface::Context,
    resolver::resolve_variable,
};

static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("BUG: invalid EXCESS_NEWLINES regex literal"));

/// One block of multimodal output, shaped like the content blocks chat
/// completion APIs accept.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentBlock {
    Text { text: String },
    Image { url: String },
}

/// Where rendered output goes.
trait Sink {
    fn text(&mut self, text: &str);
    fn image(&mut self, path: &str, url: &str);
}

impl Sink for String {
    fn text(&mut self, text: &str) {
        self.push_str(text);
    }

    fn image(&mut self, path: &str, _url: &str) {
        log::warn!(
            "Image context '{}' cannot be rendered as text; use multimodal rendering",
            path
        );
    }
}

impl Sink for Vec<ContentBlock> {
    fn text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(ContentBlock::Text { text: last }) = self.last_mut() {
            last.push_str(text);
        } else {
            self.push(ContentBlock::Text {
                text: text.to_owned(),
            });
        }
    }

    fn image(&mut self, _path: &str, url: &str) {
        self.push(ContentBlock::Image {
            url: url.to_owned(),
        });
    }
}

struct Renderer<'r> {
    context: &'r Context,
    config: &'r EchoConfig,
    assets: &'r ResolvedContexts,
}

impl Renderer<'_> {
    fn render_nodes<'n, I, S>(&self, nodes: I, sink: &mut S) -> EchoResult<()>
    where
        I: IntoIterator<Item = &'n AstNode>,
        S: Sink,
    {
        for node in nodes {
            self.render_node(node, sink)?;
        }
        Ok(())
    }

    fn render_node<S: Sink>(&self, node: &AstNode, sink: &mut S) -> EchoResult<()> {
        let strict = self.config.strict;
        match node {
            AstNode::Text { value, .. } => sink.text(value),
            AstNode::Variable {
                path,
                default_value,
                ..
            } => match resolve_variable(path, self.context, strict)? {
                Some(value) if !value.is_null() => sink.text(&stringify(value)),
                Some(_) | None => match default_value {
                    Some(default) => sink.text(default),
                    None if strict => {
                        return Err(EchoError::UndefinedVariable { path: path.clone() });
                    }
                    None => log::debug!("Undefined variable '{}' renders empty", path),
                },
            },
            AstNode::Context { path, slot, .. } => match self.assets.get(*slot) {
                Some(content) => match (&content.data_url, &content.text) {
                    (Some(url), _) if content.is_image() => sink.image(path, url),
                    (_, Some(text)) => sink.text(text),
                    (Some(_) | None, None) => {
                        log::warn!("Context '{}' resolved to no renderable content", path);
                    }
                },
                None if strict => {
                    return Err(EchoError::UnresolvedContext { path: path.clone() });
                }
                None => log::warn!("Skipping unresolved context '{}'", path),
            },
            AstNode::Import { path, .. } => {
                if strict {
                    return Err(EchoError::UnresolvedImport { path: path.clone() });
                }
                log::warn!("Skipping unresolved import '{}'", path);
            }
            AstNode::Include { name, .. } => {
                if strict {
                    return Err(EchoError::UnresolvedInclude { name: name.clone() });
                }
                log::warn!("Skipping unresolved include '{}'", name);
            }
            AstNode::Section { .. } => {}
            // Only reachable when evaluation was skipped.
            AstNode::Conditional(conditional) => {
                log::debug!("Rendering an unevaluated conditional's consequent");
                self.render_nodes(&conditional.consequent, sink)?;
            }
        }
        Ok(())
    }
}

/// The textual form of a variable's value: strings as is, arrays joined with
/// `, `, objects as JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(stringify).collect::<Vec<_>>().join(", "),
        Value::Object(_) => value.to_string(),
    }
}

fn collapse_newlines(text: &str) -> String {
    EXCESS_NEWLINES.replace_all(text, "\n\n").into_owned()
}

/// Renders evaluated `nodes` to a string. Image assets are left out.
///
/// # Errors
/// In strict mode: an undefined variable without a default, a malformed
/// path, or an import, include or context reference that was not resolved.
pub fn render(
    nodes: &[&AstNode],
    context: &Context,
    config: &EchoConfig,
    assets: &ResolvedContexts,
) -> EchoResult<String> {
    let renderer = Renderer {
        context,
        config,
        assets,
    };
    let mut output = String::new();
    renderer.render_nodes(nodes.iter().copied(), &mut output)?;

    if config.collapse_newlines {
        output = collapse_newlines(&output);
    }
    if config.trim {
        output = output.trim().to_owned();
    }
    Ok(output)
}

/// Renders evaluated `nodes` to content blocks: image assets become image
/// blocks and the text between them is coalesced into text blocks.
///
/// # Errors
/// The same as [`render`].
pub fn render_blocks(
    nodes: &[&AstNode],
    context: &Context,
    config: &EchoConfig,
    assets: &ResolvedContexts,
) -> EchoResult<Vec<ContentBlock>> {
    let renderer = Renderer {
        context,
        config,
        assets,
    };
    let mut blocks: Vec<ContentBlock> = Vec::new();
    renderer.render_nodes(nodes.iter().copied(), &mut blocks)?;

    if config.collapse_newlines {
        for block in &mut blocks {
            if let ContentBlock::Text { text } = block {
                *text = collapse_newlines(text);
            }
        }
    }
    if config.trim {
        if let Some(ContentBlock::Text { text }) = blocks.first_mut() {
            *text = text.trim_start().to_owned();
        }
        if let Some(ContentBlock::Text { text }) = blocks.last_mut() {
            *text = text.trim_end().to_owned();
        }
        blocks.retain(|block| match block {
            ContentBlock::Text { text } => !text.is_empty(),
            ContentBlock::Image { .. } => true,
        });
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use serde_json::json;

    use super::*;
    use crate::{
        assets::ResolvedContent, evaluator::evaluate, operators::OperatorRegistry, parser::parse,
    };

    fn render_source(
        source: &str,
        context: serde_json::Value,
        config: EchoConfig,
    ) -> EchoResult<String> {
        let ast = parse(source).into_result()?;
        let context = Context::from_value(context).unwrap();
        let nodes = block_on(evaluate(&ast, &context, &config, &OperatorRegistry::new()))?;
        render(&nodes, &context, &config, &ResolvedContexts::new())
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_stringify() {
        assert_eq!(stringify(&json!("text")), "text");
        assert_eq!(stringify(&json!(42)), "42");
        assert_eq!(stringify(&json!(1.5)), "1.5");
        assert_eq!(stringify(&json!(false)), "false");
        assert_eq!(stringify(&json!(["a", 1, ["b", true]])), "a, 1, b, true");
        assert_eq!(stringify(&json!({"k": "v"})), r#"{"k":"v"}"#);
        assert_eq!(stringify(&Value::Null), "");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_undefined_variables() {
        let lenient = EchoConfig::default();
        let strict = EchoConfig::default().strict(true);
        assert_eq!(
            render_source("Hello {{name}}!", json!({}), lenient).unwrap(),
            "Hello !"
        );
        assert!(matches!(
            render_source("Hello {{name}}!", json!({}), strict),
            Err(EchoError::UndefinedVariable { path }) if path == "name"
        ));
        assert_eq!(
            render_source("Hello {{name ?? \"friend\"}}!", json!({"name": null}), strict).unwrap(),
            "Hello friend!"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_post_processing() {
        let source = "\n  Intro\n[#IF {{skip}} #exists]\nhidden\n[END IF]\n\n\nOutro  \n";
        let raw = render_source(source, json!({}), EchoConfig::default()).unwrap();
        assert_eq!(raw, "\n  Intro\n\n\n\nOutro  \n");

        let config = EchoConfig::default().collapse_newlines(true).trim(true);
        let cleaned = render_source(source, json!({}), config).unwrap();
        assert_eq!(cleaned, "Intro\n\nOutro");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_five_newlines_collapse_to_two() {
        let config = EchoConfig::default().collapse_newlines(true);
        let output = render_source("a\n\n\n\n\nb", json!({}), config).unwrap();
        assert_eq!(output, "a\n\nb");
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_collapse_newlines_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|n| std::thread::spawn(move || collapse_newlines(&format!("{n}\n\n\n\n{n}"))))
            .collect();
        for (n, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap(), format!("{n}\n\n{n}"));
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unresolved_structure() {
        let lenient = EchoConfig::default();
        let strict = EchoConfig::default().strict(true);
        assert_eq!(
            render_source("a[#IMPORT \"x.echo\"]b", json!({}), lenient).unwrap(),
            "ab"
        );
        assert!(matches!(
            render_source("a[#IMPORT \"x.echo\"]b", json!({}), strict),
            Err(EchoError::UnresolvedImport { .. })
        ));

        // Includes never survive evaluation; hand one straight to the renderer.
        let ast = parse("a[#INCLUDE s]b").into_result().unwrap();
        let nodes: Vec<&AstNode> = ast.iter().collect();
        let context = Context::new();
        let assets = ResolvedContexts::new();
        assert_eq!(render(&nodes, &context, &lenient, &assets).unwrap(), "ab");
        assert!(matches!(
            render(&nodes, &context, &strict, &assets),
            Err(EchoError::UnresolvedInclude { .. })
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unevaluated_conditional_renders_consequent() {
        let ast = parse("[#IF {{x}} #exists]yes[ELSE]no[END IF]")
            .into_result()
            .unwrap();
        let nodes: Vec<&AstNode> = ast.iter().collect();
        let output = render(
            &nodes,
            &Context::new(),
            &EchoConfig::default(),
            &ResolvedContexts::new(),
        )
        .unwrap();
        assert_eq!(output, "yes");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_content_blocks() {
        let ast = parse("  Look: #context(plp://chart) and #context(notes)  ")
            .into_result()
            .unwrap();
        let nodes: Vec<&AstNode> = ast.iter().collect();
        let mut assets = ResolvedContexts::new();
        assets.insert(
            0,
            ResolvedContent::image("image/png", "data:image/png;base64,AAAA"),
        );
        assets.insert(1, ResolvedContent::text("text/plain", "see notes"));
        let config = EchoConfig::default().trim(true);

        let blocks = render_blocks(&nodes, &Context::new(), &config, &assets).unwrap();
        assert_eq!(
            blocks,
            vec![
                ContentBlock::Text {
                    text: "Look: ".to_owned()
                },
                ContentBlock::Image {
                    url: "data:image/png;base64,AAAA".to_owned()
                },
                ContentBlock::Text {
                    text: " and see notes".to_owned()
                },
            ]
        );

        let text = render(&nodes, &Context::new(), &config, &assets).unwrap();
        assert_eq!(text, "Look:  and see notes");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unresolved_context() {
        let ast = parse("a#context(logo)b").into_result().unwrap();
        let nodes: Vec<&AstNode> = ast.iter().collect();
        let context = Context::new();
        let assets = ResolvedContexts::new();
        assert_eq!(
            render(&nodes, &context, &EchoConfig::default(), &assets).unwrap(),
            "ab"
        );
        assert!(matches!(
            render(&nodes, &context, &EchoConfig::default().strict(true), &assets),
            Err(EchoError::UnresolvedContext { path }) if path == "logo"
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_rendering_is_repeatable() {
        let ast = parse("{{user.name}} has {{user.tags}}").into_result().unwrap();
        let context = Context::from_value(json!({"user": {"name": "Ada", "tags": ["x", "y"]}}))
            .unwrap();
        let config = EchoConfig::default();
        let nodes = block_on(evaluate(&ast, &context, &config, &OperatorRegistry::new())).unwrap();
        let first = render(&nodes, &context, &config, &ResolvedContexts::new()).unwrap();
        let second = render(&nodes, &context, &config, &ResolvedContexts::new()).unwrap();
        assert_eq!(first, "Ada has x, y");
        assert_eq!(first, second);
    }
}
