//! Model → tool-support decision table.
//!
//! Rules are checked in order; the first regex that matches the model name
//! decides. Configured rules are placed ahead of the built-in ones.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// One configurable rule, as it appears under `[[tool_support]]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSupportRule {
    pub pattern: String,
    pub supported: bool,
}

/// Built-in rules. Negative entries must precede broader positive ones.
const BUILTIN_RULES: &[(&str, bool)] = &[
    (r"^deepseek-reasoner", false),
    (r"^o1-(mini|preview)", false),
    (r"^gpt-4", true),
    (r"^gpt-3\.5-turbo", true),
    (r"^o[134](-|$)", true),
    (r"^claude-3", true),
    (r"^claude-(opus|sonnet|haiku)", true),
    (r"^mistral-(large|medium|small)", true),
    (r"^(open-)?mixtral", true),
    (r"^qwen", true),
    (r"^deepseek-(chat|v3)", true),
    (r"^(meta-)?llama-?3\.[1-3]", true),
    (r"^command-r", true),
];

#[derive(Debug, Clone)]
pub struct ToolSupportTable {
    rules: Vec<(Regex, bool)>,
}

impl ToolSupportTable {
    /// Built-in rules only.
    pub fn builtin() -> Self {
        // The built-in patterns are constants; a bad one is skipped rather than fatal.
        let rules = BUILTIN_RULES
            .iter()
            .filter_map(|(pattern, supported)| compile(pattern).ok().map(|re| (re, *supported)))
            .collect();
        Self { rules }
    }

    /// Configured rules first, then the built-in ones.
    pub fn with_overrides(overrides: &[ToolSupportRule]) -> Result<Self, regex::Error> {
        let mut rules = Vec::with_capacity(overrides.len() + BUILTIN_RULES.len());
        for rule in overrides {
            rules.push((compile(&rule.pattern)?, rule.supported));
        }
        rules.extend(Self::builtin().rules);
        Ok(Self { rules })
    }

    /// Decision for a model, or `None` when no rule matches.
    ///
    /// Vendor-prefixed names (`meta-llama/Llama-3.3-70B`) are also matched on
    /// the part after the last `/`.
    pub fn lookup(&self, model: &str) -> Option<bool> {
        let short = model.rsplit('/').next().unwrap_or(model);
        self.rules
            .iter()
            .find(|(re, _)| re.is_match(model) || re.is_match(short))
            .map(|(_, supported)| *supported)
    }

    pub fn supports(&self, model: &str) -> bool {
        self.lookup(model).unwrap_or(false)
    }
}

impl Default for ToolSupportTable {
    fn default() -> Self {
        Self::builtin()
    }
}

fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}
