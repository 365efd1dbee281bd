use serde::{Deserialize, Serialize};

use crate::vm::DEFAULT_CALL_DEPTH;

/// Compiler switches. Every field has a default, so a partial JSON object is
/// a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Options {
    /// Run the rewrite passes. Finalization always runs.
    pub optimize: bool,
    pub inline: bool,
    /// Largest callee body, in instructions, the inliner will splice.
    pub inline_max_body: usize,
    /// Total instructions the inliner may add to one unit.
    pub inline_budget: usize,
    /// Statically verify each unit before optimizing it.
    pub verify: bool,
    /// Non-tail calls that may be live at once while running a form.
    pub max_call_depth: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            optimize: true,
            inline: true,
            inline_max_body: 24,
            inline_budget: 256,
            verify: true,
            max_call_depth: DEFAULT_CALL_DEPTH,
        }
    }
}

impl Options {
    pub fn from_json(src: &str) -> Result<Options, serde_json::Error> {
        serde_json::from_str(src)
    }

    pub fn unoptimized() -> Options {
        Options { optimize: false, inline: false, ..Options::default() }
    }

    pub(crate) fn inlining(&self) -> bool {
        self.optimize && self.inline && self.inline_budget > 0
    }
}
