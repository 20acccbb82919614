use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    EchoConfig, EchoPlugin,
    assets::{ContextResolver, ResolvedContexts, resolve_contexts},
    ast::AstNode,
    error::{EchoError, EchoResult},
    evaluator::evaluate,
    interface::{Context, EchoInterface},
    operators::{AiJudge, OperatorDefinition, OperatorRegistry},
    parser::{ParseResult, parse},
    renderer::{ContentBlock, render, render_blocks},
    template::{Template, ValidationResult, validate},
};

/// `Echo` is the primary implementation of the `EchoInterface` trait.
///
/// An engine holds configuration and operators, never per-render state, so
/// one instance can serve any number of concurrent renders.
///
/// # Examples
///
/// ```
/// use echo_prompt::{Context, Echo, EchoInterface};
///
/// let engine = Echo::new();
///
/// let mut context = Context::new();
/// context.insert("name", "World").insert("tier", "pro");
///
/// let source = "Hello, {{ name }}![#IF {{tier}} #one_of(pro, team)] Thanks for upgrading.[END IF]";
/// let output = futures::executor::block_on(engine.render(source, &context)).unwrap();
/// assert_eq!(output, "Hello, World! Thanks for upgrading.");
/// ```
#[derive(Clone, Default)]
pub struct Echo {
    config: EchoConfig,
    operators: OperatorRegistry,
    resolver: Option<Arc<dyn ContextResolver>>,
    /// Loaded plugins as `(name, version)`.
    plugins: Vec<(String, String)>,
}

impl std::fmt::Debug for Echo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Echo")
            .field("config", &self.config)
            .field("operators", &self.operators.names())
            .field("resolver", &self.resolver.is_some())
            .field("plugins", &self.plugins)
            .finish()
    }
}

impl Echo {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(mut self, config: EchoConfig) -> Self {
        self.config = config;
        self
    }

    /// Backs the `ai_gate` operator (and its `ai_judge` alias) with `judge`.
    #[must_use]
    pub fn with_ai_judge(mut self, judge: Arc<dyn AiJudge>) -> Self {
        self.operators.set_ai_judge(judge);
        self
    }

    /// Resolves `#context(..)` references through `resolver`.
    #[must_use]
    pub fn with_context_resolver(mut self, resolver: Arc<dyn ContextResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub const fn config(&self) -> &EchoConfig {
        &self.config
    }

    pub const fn operators(&self) -> &OperatorRegistry {
        &self.operators
    }

    /// Registers an operator on this engine, shadowing any plugin or built-in
    /// operator of the same name.
    pub fn register_operator<N: Into<String>>(
        &mut self,
        name: N,
        definition: OperatorDefinition,
    ) -> &mut Self {
        let name = name.into();
        if self.operators.register(name.clone(), definition).is_some() {
            log::debug!("Replaced operator '{}'", name);
        }
        self
    }

    /// Runs the plugin's `on_load` hook, then installs its operators.
    ///
    /// # Errors
    /// - If a plugin with the same name is already loaded.
    /// - If the `on_load` hook fails; nothing is installed.
    pub fn load_plugin(&mut self, plugin: EchoPlugin) -> EchoResult<()> {
        let EchoPlugin {
            name,
            version,
            operators,
            on_load,
        } = plugin;
        if self.plugins.iter().any(|(loaded, _)| *loaded == name) {
            return Err(EchoError::PluginExists { name });
        }
        if let Some(hook) = on_load {
            hook().map_err(|message| EchoError::Plugin {
                name: name.clone(),
                message,
            })?;
        }

        log::debug!(
            "Loaded plugin {} v{} with {} operators",
            name,
            version,
            operators.len()
        );
        for (operator, definition) in operators {
            self.operators.register_plugin(operator, definition);
        }
        self.plugins.push((name, version));
        Ok(())
    }

    /// Loaded plugins as `(name, version)` pairs, in load order.
    pub fn plugins(&self) -> impl Iterator<Item = (&str, &str)> {
        self.plugins
            .iter()
            .map(|(name, version)| (name.as_str(), version.as_str()))
    }

    async fn prepare<'a>(
        &self,
        ast: &'a [AstNode],
        context: &Context,
    ) -> EchoResult<(Vec<&'a AstNode>, ResolvedContexts)> {
        let nodes = evaluate(ast, context, &self.config, &self.operators).await?;
        let assets = resolve_contexts(&nodes, self.resolver.as_deref(), self.config.strict).await?;
        Ok((nodes, assets))
    }

    /// Renders an already parsed template.
    ///
    /// # Errors
    /// See [`EchoInterface::render`].
    pub async fn render_template(
        &self,
        template: &Template,
        context: &Context,
    ) -> EchoResult<String> {
        let (nodes, assets) = self.prepare(template.ast(), context).await?;
        render(&nodes, context, &self.config, &assets)
    }

    /// Renders an already parsed template to content blocks.
    ///
    /// # Errors
    /// See [`EchoInterface::render`].
    pub async fn render_template_multimodal(
        &self,
        template: &Template,
        context: &Context,
    ) -> EchoResult<Vec<ContentBlock>> {
        let (nodes, assets) = self.prepare(template.ast(), context).await?;
        render_blocks(&nodes, context, &self.config, &assets)
    }
}

#[async_trait]
impl EchoInterface for Echo {
    fn parse(&self, source: &str) -> ParseResult {
        parse(source)
    }

    fn validate(&self, source: &str) -> ValidationResult {
        validate(source, &self.operators)
    }

    async fn render(&self, source: &str, context: &Context) -> EchoResult<String> {
        let template = Template::parse(source)?;
        self.render_template(&template, context).await
    }

    async fn render_multimodal(
        &self,
        source: &str,
        context: &Context,
    ) -> EchoResult<Vec<ContentBlock>> {
        let template = Template::parse(source)?;
        self.render_template_multimodal(&template, context).await
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use serde_json::json;

    use super::*;

    fn context(value: serde_json::Value) -> Context {
        Context::from_value(value).unwrap()
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_render_end_to_end() {
        let engine = Echo::new().with_config(EchoConfig::default().trim(true));
        let output = block_on(engine.render(
            "  Dear {{user.name ?? \"customer\"}},\n[#IF {{user.orders}} #greater_than(10)]Thanks for being loyal.[END IF]  ",
            &context(json!({"user": {"orders": 12}})),
        ))
        .unwrap();
        assert_eq!(output, "Dear customer,\nThanks for being loyal.");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_parse_errors_surface() {
        let engine = Echo::new();
        let error = block_on(engine.render("[#IF {{x}}", &Context::new())).unwrap_err();
        assert!(matches!(error, EchoError::Parse(errors) if !errors.is_empty()));
        assert!(!engine.parse("[#IF {{x}}").success);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_register_operator() {
        let mut engine = Echo::new();
        engine.register_operator(
            "is_even",
            OperatorDefinition::unary("even integers", |value| {
                Ok(value.as_i64().is_some_and(|n| n.rem_euclid(2) == 0))
            }),
        );
        let source = "[#IF {{n}} #is_even]even[ELSE]odd[END IF]";
        assert_eq!(
            block_on(engine.render(source, &context(json!({"n": 4})))).unwrap(),
            "even"
        );
        assert_eq!(
            block_on(engine.render(source, &context(json!({"n": 3})))).unwrap(),
            "odd"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_plugins() {
        let mut engine = Echo::new();
        let plugin = EchoPlugin::new("shouting", "1.0.0").operator(
            "is_shouting",
            OperatorDefinition::unary("all caps", |value| {
                Ok(value
                    .as_str()
                    .is_some_and(|s| !s.is_empty() && s == s.to_uppercase()))
            }),
        );
        engine.load_plugin(plugin).unwrap();
        assert_eq!(engine.plugins().collect::<Vec<_>>(), vec![("shouting", "1.0.0")]);

        let source = "[#IF {{msg}} #is_shouting]calm down[END IF]";
        assert_eq!(
            block_on(engine.render(source, &context(json!({"msg": "HEY"})))).unwrap(),
            "calm down"
        );

        let again = engine.load_plugin(EchoPlugin::new("shouting", "2.0.0"));
        assert!(matches!(again, Err(EchoError::PluginExists { name }) if name == "shouting"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_failing_plugin_hook_installs_nothing() {
        let mut engine = Echo::new();
        let plugin = EchoPlugin::new("broken", "0.1.0")
            .operator("never", OperatorDefinition::unary("", |_| Ok(true)))
            .on_load(|| Err("missing credentials".to_owned()));
        let error = engine.load_plugin(plugin).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Plugin 'broken' failed to load: missing credentials"
        );
        assert!(!engine.operators().contains("never"));
        assert_eq!(engine.plugins().count(), 0);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_instance_operator_shadows_plugin() {
        let mut engine = Echo::new();
        engine
            .load_plugin(
                EchoPlugin::new("p", "1").operator("flag", OperatorDefinition::unary("", |_| Ok(false))),
            )
            .unwrap();
        engine.register_operator("flag", OperatorDefinition::unary("", |_| Ok(true)));
        let output = block_on(engine.render("[#IF {{x}} #flag]on[END IF]", &Context::new())).unwrap();
        assert_eq!(output, "on");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_validate_uses_registered_operators() {
        let mut engine = Echo::new();
        let source = "[#IF {{x}} #custom]y[END IF]";
        assert_eq!(engine.validate(source).warnings.len(), 1);
        engine.register_operator("custom", OperatorDefinition::unary("", |_| Ok(true)));
        assert!(engine.validate(source).warnings.is_empty());
    }
}
