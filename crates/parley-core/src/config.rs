//! Agent configuration passed through to the voice agent process.
//!
//! The supervisor does not interpret these values. They reach the child as
//! environment variables so the agent can pick its prompt, voice, and model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Environment variable carrying the system prompt.
pub const ENV_SYSTEM_PROMPT: &str = "AGENT_SYSTEM_PROMPT";

/// Environment variable carrying the voice name.
pub const ENV_VOICE: &str = "AGENT_VOICE";

/// Environment variable carrying the model identifier.
pub const ENV_MODEL: &str = "AGENT_MODEL";

/// Model used when a start request does not name one.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

/// Prompt used when a start request leaves it blank.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful and friendly AI voice assistant. \
     Listen carefully to what the user says and respond naturally.";

/// Prebuilt synthesis voices offered by the realtime model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Voice {
    #[default]
    Puck,
    Charon,
    Kore,
    Fenrir,
    Aoede,
}

impl Voice {
    pub const ALL: [Voice; 5] = [
        Voice::Puck,
        Voice::Charon,
        Voice::Kore,
        Voice::Fenrir,
        Voice::Aoede,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Puck => "Puck",
            Voice::Charon => "Charon",
            Voice::Kore => "Kore",
            Voice::Fenrir => "Fenrir",
            Voice::Aoede => "Aoede",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Voice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Voice::ALL
            .into_iter()
            .find(|voice| voice.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown voice: {}", s))
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

/// Body of a start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Free-text instructions for the conversational model.
    #[serde(default, alias = "instructions")]
    pub system_prompt: String,

    #[serde(default)]
    pub voice: Voice,

    #[serde(default = "default_model")]
    pub model: String,
}

impl AgentConfig {
    pub fn new(system_prompt: impl Into<String>, voice: Voice, model: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            voice,
            model: model.into(),
        }
    }

    /// The prompt handed to the agent, falling back to [`DEFAULT_SYSTEM_PROMPT`].
    pub fn effective_system_prompt(&self) -> &str {
        if self.system_prompt.trim().is_empty() {
            DEFAULT_SYSTEM_PROMPT
        } else {
            &self.system_prompt
        }
    }

    /// Environment the agent process receives.
    pub fn env_vars(&self) -> [(&'static str, String); 3] {
        [
            (ENV_SYSTEM_PROMPT, self.effective_system_prompt().to_string()),
            (ENV_VOICE, self.voice.to_string()),
            (ENV_MODEL, self.model.clone()),
        ]
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new(String::new(), Voice::default(), DEFAULT_MODEL)
    }
}
