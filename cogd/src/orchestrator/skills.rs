//! Skill registry
//!
//! A skill is a named prompt body invocable as `/name args` or through the
//! `use_skill` tool. `fork` skills spawn a subagent task carrying the body;
//! `inline` skills inject the body into the session and keep thinking.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How a skill joins the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillMode {
    Fork,
    Inline,
}

/// A named skill
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub body: String,
    pub mode: SkillMode,
}

impl Skill {
    pub fn new(name: impl Into<String>, body: impl Into<String>, mode: SkillMode) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            body: body.into(),
            mode,
        }
    }

    /// The prompt text for one invocation
    pub fn render(&self, args: &str) -> String {
        if args.is_empty() {
            self.body.clone()
        } else {
            format!("{}\n\nArguments: {}", self.body, args)
        }
    }
}

/// Skills keyed by name
#[derive(Default)]
pub struct SkillRegistry {
    skills: HashMap<String, Skill>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, skill: Skill) {
        self.skills.insert(skill.name.clone(), skill);
    }

    pub fn get(&self, name: &str) -> Option<&Skill> {
        self.skills.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.skills.keys().cloned().collect();
        names.sort();
        names
    }

    /// Parse `/name args` invocations; anything else returns None
    pub fn parse_invocation(text: &str) -> Option<(&str, &str)> {
        let rest = text.strip_prefix('/')?;
        if rest.is_empty() {
            return None;
        }
        match rest.split_once(char::is_whitespace) {
            Some((name, args)) => Some((name, args.trim())),
            None => Some((rest, "")),
        }
    }
}
