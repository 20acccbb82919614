use crate::operators::OperatorDefinition;

/// Render-time switches shared by the evaluator and the renderer.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct EchoConfig {
    /// Raise on undefined variables, malformed paths, unknown or failing
    /// operators, missing includes and unresolved assets, instead of
    /// degrading to empty output or `false`.
    pub strict: bool,
    /// Trim leading and trailing whitespace from the rendered string.
    pub trim: bool,
    /// Collapse runs of three or more newlines down to two.
    pub collapse_newlines: bool,
}

impl EchoConfig {
    pub const fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub const fn trim(mut self, trim: bool) -> Self {
        self.trim = trim;
        self
    }

    pub const fn collapse_newlines(mut self, collapse_newlines: bool) -> Self {
        self.collapse_newlines = collapse_newlines;
        self
    }
}

pub type PluginHook = Box<dyn FnOnce() -> Result<(), String> + Send>;

/// A named, versioned bundle of operators. Its `on_load` hook runs once, when
/// the plugin is loaded, before its operators are installed.
pub struct EchoPlugin {
    pub name: String,
    pub version: String,
    pub operators: Vec<(String, OperatorDefinition)>,
    pub(crate) on_load: Option<PluginHook>,
}

impl std::fmt::Debug for EchoPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EchoPlugin")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("operators", &self.operators)
            .field("on_load", &self.on_load.is_some())
            .finish()
    }
}

impl EchoPlugin {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, version: V) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            operators: Vec::new(),
            on_load: None,
        }
    }

    #[must_use]
    pub fn operator<N: Into<String>>(mut self, name: N, definition: OperatorDefinition) -> Self {
        self.operators.push((name.into(), definition));
        self
    }

    /// Sets the hook run on load. An `Err` aborts loading and nothing from
    /// the plugin is installed.
    #[must_use]
    pub fn on_load<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() -> Result<(), String> + Send + 'static,
    {
        self.on_load = Some(Box::new(hook));
        self
    }
}
