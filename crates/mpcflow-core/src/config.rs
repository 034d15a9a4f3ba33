//! Compiler configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::PartyId;
use crate::operator::IoPaths;

/// Target execution backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Secret-sharing MPC program (Python/VIFF).
    Viff,
    /// Vertex-centric GraphChi job (C++).
    GraphChi,
}

impl Backend {
    pub fn name(self) -> &'static str {
        match self {
            Backend::Viff => "viff",
            Backend::GraphChi => "graphchi",
        }
    }

    /// Extension of the generated source file.
    pub fn source_extension(self) -> &'static str {
        match self {
            Backend::Viff => "py",
            Backend::GraphChi => "cc",
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "viff" | "mpc" => Ok(Backend::Viff),
            "graphchi" => Ok(Backend::GraphChi),
            other => Err(Error::Config(format!("unknown backend '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    pub backend: Backend,

    /// Name of the generated job; also names the output directory and file.
    pub class_name: String,

    /// Directory holding `<Name>Template.<ext>` files. Built-in templates are
    /// used when unset.
    pub templates_dir: Option<String>,

    /// Party this program is compiled for. Inputs it owns are flagged.
    pub data_owner_id: PartyId,

    /// Connection/config file the generated MPC program loads at startup.
    pub viff_config_loc: String,

    /// Defaults applied to operators whose front end left paths unset.
    pub paths: IoPaths,

    /// Report stranded operators and unresolved relations instead of
    /// silently dropping them.
    pub strict: bool,

    /// Try to push aggregations past downstream operators (MPC only).
    pub defer_aggregations: bool,

    /// Iteration count for loops that carry none.
    pub default_iterations: u32,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Viff,
            class_name: "mpcflow_job".to_string(),
            templates_dir: None,
            data_owner_id: 1,
            viff_config_loc: "/tmp/mpcflow/viff/player-1.ini".to_string(),
            paths: IoPaths::default(),
            strict: false,
            defer_aggregations: false,
            default_iterations: 5,
        }
    }
}

impl CompilerConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `MPCFLOW_BACKEND`: `viff` or `graphchi`
    /// - `MPCFLOW_CLASS_NAME`: job name
    /// - `MPCFLOW_TEMPLATES_DIR`: template directory
    /// - `MPCFLOW_DATA_OWNER_ID`: party id
    /// - `MPCFLOW_VIFF_CONFIG`: MPC connection config location
    /// - `MPCFLOW_INPUT_DIR` / `MPCFLOW_OUTPUT_DIR` / `MPCFLOW_CODE_DIR`
    /// - `MPCFLOW_STRICT`, `MPCFLOW_DEFER_AGGREGATIONS`: `1`/`true`
    /// - `MPCFLOW_DEFAULT_ITERATIONS`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("MPCFLOW_BACKEND") {
            if let Ok(b) = s.parse() {
                cfg.backend = b;
            }
        }

        if let Ok(s) = std::env::var("MPCFLOW_CLASS_NAME") {
            cfg.class_name = s;
        }

        if let Ok(s) = std::env::var("MPCFLOW_TEMPLATES_DIR") {
            cfg.templates_dir = Some(s);
        }

        if let Ok(s) = std::env::var("MPCFLOW_DATA_OWNER_ID") {
            if let Ok(v) = s.parse::<PartyId>() {
                cfg.data_owner_id = v;
            }
        }

        if let Ok(s) = std::env::var("MPCFLOW_VIFF_CONFIG") {
            cfg.viff_config_loc = s;
        }

        if let Ok(s) = std::env::var("MPCFLOW_INPUT_DIR") {
            cfg.paths.input_dir = with_trailing_slash(s);
        }

        if let Ok(s) = std::env::var("MPCFLOW_OUTPUT_DIR") {
            cfg.paths.output_dir = with_trailing_slash(s);
        }

        if let Ok(s) = std::env::var("MPCFLOW_CODE_DIR") {
            cfg.paths.code_dir = with_trailing_slash(s);
        }

        if let Ok(s) = std::env::var("MPCFLOW_STRICT") {
            cfg.strict = parse_flag(&s);
        }

        if let Ok(s) = std::env::var("MPCFLOW_DEFER_AGGREGATIONS") {
            cfg.defer_aggregations = parse_flag(&s);
        }

        if let Ok(s) = std::env::var("MPCFLOW_DEFAULT_ITERATIONS") {
            if let Ok(v) = s.parse::<u32>() {
                cfg.default_iterations = v;
            }
        }

        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.class_name.is_empty() {
            return Err(Error::Config("class name must not be empty".into()));
        }
        if self
            .class_name
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '_'))
        {
            return Err(Error::Config(format!(
                "class name '{}' must be alphanumeric/underscore",
                self.class_name
            )));
        }
        Ok(())
    }
}

/// Directory strings are concatenated with relation names; keep them `/`-terminated.
pub fn with_trailing_slash(dir: String) -> String {
    if dir.ends_with('/') {
        dir
    } else {
        format!("{dir}/")
    }
}

fn parse_flag(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_aliases() {
        assert_eq!("MPC".parse::<Backend>().unwrap(), Backend::Viff);
        assert_eq!("graphchi".parse::<Backend>().unwrap(), Backend::GraphChi);
        assert!("spark".parse::<Backend>().is_err());
    }

    #[test]
    fn class_name_is_validated() {
        let mut cfg = CompilerConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.class_name = "bad/name".into();
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn trailing_slash_is_added_once() {
        assert_eq!(with_trailing_slash("/a".into()), "/a/");
        assert_eq!(with_trailing_slash("/a/".into()), "/a/");
    }
}
