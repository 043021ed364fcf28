//! Script security types.

use serde::{Deserialize, Serialize};

/// Default maximum script size (1 MiB).
pub const DEFAULT_MAX_SCRIPT_SIZE: usize = 1_048_576;

/// Inputs to script validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContext {
    /// Config-authored scripts are trusted; model-generated ones are not.
    pub is_trusted_source: bool,
    /// Extra commands that are always rejected.
    #[serde(default)]
    pub blocked_commands: Vec<String>,
    /// Maximum script size in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
}

fn default_max_file_size() -> usize {
    DEFAULT_MAX_SCRIPT_SIZE
}

impl Default for SecurityContext {
    fn default() -> Self {
        Self {
            is_trusted_source: false,
            blocked_commands: Vec::new(),
            max_file_size: DEFAULT_MAX_SCRIPT_SIZE,
        }
    }
}

/// A rule match that blocks execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityViolation {
    /// 1-based line number.
    pub line: usize,
    /// The rule that matched.
    pub pattern: String,
    pub message: String,
}

impl std::fmt::Display for SecurityViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Outcome of validating a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptValidation {
    pub is_secure: bool,
    pub violations: Vec<SecurityViolation>,
    pub warnings: Vec<String>,
    /// Normalized script body, safe to write to disk.
    pub sanitized_script: String,
}

impl ScriptValidation {
    /// All violations joined into one message.
    pub fn violation_summary(&self) -> String {
        self.violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}
