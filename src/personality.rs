use serde::{Deserialize, Serialize};

/// A selectable system prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Personality {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub emoji: String,
    #[serde(default)]
    pub description: String,
    pub instruction: String,
}

impl Personality {
    fn builtin(id: &str, name: &str, emoji: &str, description: &str, instruction: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            emoji: emoji.to_string(),
            description: description.to_string(),
            instruction: instruction.to_string(),
        }
    }

    pub fn label(&self) -> String {
        if self.emoji.is_empty() {
            self.name.clone()
        } else {
            format!("{} {}", self.emoji, self.name)
        }
    }
}

pub fn builtins() -> Vec<Personality> {
    vec![
        Personality::builtin(
            "ds-gen",
            "DeepSeek V3",
            "⚡",
            "General-purpose assistant.",
            "You are DeepSeek-V3, a helpful and efficient AI assistant. Provide concise and accurate answers.",
        ),
        Personality::builtin(
            "ds-r1",
            "R1 Reasoning",
            "🧩",
            "Deep step-by-step reasoning.",
            "You are DeepSeek-R1. Focus on deep reasoning, step-by-step logic, and detailed problem solving. Always show your complex thought process.",
        ),
        Personality::builtin(
            "ds-coder",
            "Code Master",
            "💻",
            "Programming expert.",
            "You are a Senior Software Engineer. Provide optimized code, explain architecture, and debug with precision.",
        ),
    ]
}

/// Built-ins followed by configured extras. An extra with a built-in id
/// replaces that built-in in place.
pub fn catalog(extra: &[Personality]) -> Vec<Personality> {
    let mut all = builtins();
    for p in extra {
        match all.iter_mut().find(|b| b.id == p.id) {
            Some(slot) => *slot = p.clone(),
            None => all.push(p.clone()),
        }
    }
    all
}

pub fn find<'a>(all: &'a [Personality], id: &str) -> Option<&'a Personality> {
    all.iter().find(|p| p.id == id)
}
