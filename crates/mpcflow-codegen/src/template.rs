//! Template expansion.
//!
//! Emitters only compute placeholder values; turning a named template and a
//! dictionary into text is delegated to a [`TemplateExpander`]. The default
//! expander is backed by minijinja with strict undefined handling, so a
//! placeholder the emitter forgot to set is an error rather than an empty
//! string.

use std::collections::BTreeMap;
use std::path::Path;

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use tracing::debug;

use mpcflow_core::error::{Error, Result};

/// Placeholder name to substituted value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TemplateDict(BTreeMap<&'static str, String>);

impl TemplateDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &'static str, value: impl Into<String>) -> &mut Self {
        self.0.insert(key, value.into());
        self
    }

    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub trait TemplateExpander {
    /// Expand template `name` with `dict`, returning the substituted text.
    fn expand(&self, name: &str, dict: &TemplateDict) -> Result<String>;
}

/// Templates compiled into the binary, keyed by file name.
pub const BUILTIN: &[(&str, &str)] = &[
    (
        "ImportAndUtilsTemplate.py",
        include_str!("../templates/viff/ImportAndUtilsTemplate.py"),
    ),
    (
        "InputTemplate.py",
        include_str!("../templates/viff/InputTemplate.py"),
    ),
    (
        "SelectTemplate.py",
        include_str!("../templates/viff/SelectTemplate.py"),
    ),
    (
        "AggMPCTemplate.py",
        include_str!("../templates/viff/AggMPCTemplate.py"),
    ),
    (
        "JoinMPCTemplate.py",
        include_str!("../templates/viff/JoinMPCTemplate.py"),
    ),
    (
        "MathMPCTemplate.py",
        include_str!("../templates/viff/MathMPCTemplate.py"),
    ),
    (
        "OutputTemplate.py",
        include_str!("../templates/viff/OutputTemplate.py"),
    ),
    (
        "CloseProtocolTemplate.py",
        include_str!("../templates/viff/CloseProtocolTemplate.py"),
    ),
    (
        "MainTemplate.py",
        include_str!("../templates/viff/MainTemplate.py"),
    ),
    (
        "JobTemplate.cc",
        include_str!("../templates/graphchi/JobTemplate.cc"),
    ),
];

pub struct JinjaTemplates {
    env: Environment<'static>,
}

impl JinjaTemplates {
    fn environment() -> Environment<'static> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        env
    }

    /// The compiled-in template set.
    pub fn builtin() -> Result<Self> {
        let mut env = Self::environment();
        for (name, source) in BUILTIN {
            env.add_template(*name, *source)
                .map_err(|e| Error::Template(format!("parse {name}: {e}")))?;
        }
        Ok(Self { env })
    }

    /// Templates from `dir`; names missing there fall back to the built-in set.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::Config(format!(
                "templates dir {} does not exist",
                dir.display()
            )));
        }
        let mut env = Self::environment();
        for (name, builtin) in BUILTIN {
            let path = dir.join(name);
            let source = if path.is_file() {
                debug!(template = *name, path = %path.display(), "loading template override");
                std::fs::read_to_string(&path)?
            } else {
                builtin.to_string()
            };
            env.add_template_owned(*name, source)
                .map_err(|e| Error::Template(format!("parse {}: {e}", path.display())))?;
        }
        Ok(Self { env })
    }

    /// `from_dir` when a directory is configured, `builtin` otherwise.
    pub fn load(dir: Option<&str>) -> Result<Self> {
        match dir {
            Some(dir) => Self::from_dir(dir),
            None => Self::builtin(),
        }
    }
}

impl TemplateExpander for JinjaTemplates {
    fn expand(&self, name: &str, dict: &TemplateDict) -> Result<String> {
        let tmpl = self
            .env
            .get_template(name)
            .map_err(|e| Error::Template(format!("template not found: {e}")))?;
        tmpl.render(dict)
            .map_err(|e| Error::Template(format!("render {name}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_input_template_substitutes_values() {
        let t = JinjaTemplates::builtin().unwrap();
        let dict = TemplateDict::new()
            .with("REL", "sales")
            .with("INPUT_PATH", "/in/sales/")
            .with("INPUT_FLAG", "True");
        let out = t.expand("InputTemplate.py", &dict).unwrap();
        assert_eq!(
            out,
            "        self.rels[\"sales\"] = self.input(\"sales\", \"/in/sales/\", True)\n"
        );
    }

    #[test]
    fn missing_placeholder_is_an_error() {
        let t = JinjaTemplates::builtin().unwrap();
        let dict = TemplateDict::new().with("REL", "sales");
        let err = t.expand("InputTemplate.py", &dict).unwrap_err();
        assert!(matches!(err, Error::Template(_)));
        assert!(t.expand("NoSuchTemplate.py", &dict).is_err());
    }

    #[test]
    fn directory_overrides_single_templates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("MainTemplate.py"), "main({{VIFF_CONFIG_LOC}})").unwrap();
        let t = JinjaTemplates::from_dir(dir.path()).unwrap();
        let main = t
            .expand("MainTemplate.py", &TemplateDict::new().with("VIFF_CONFIG_LOC", "p.ini"))
            .unwrap();
        assert_eq!(main, "main(p.ini)");
        let close = t.expand("CloseProtocolTemplate.py", &TemplateDict::new()).unwrap();
        assert!(close.contains("shutdown"));
    }

    #[test]
    fn missing_directory_is_a_config_error() {
        assert!(matches!(
            JinjaTemplates::from_dir("/nonexistent/mpcflow/templates"),
            Err(Error::Config(_))
        ));
    }
}
