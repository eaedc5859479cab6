use serde::{Deserialize, Serialize};

/// One executable UI-automation instruction from the model.
///
/// `parameters` keeps insertion order (serde_json `preserve_order`) because
/// `hotkey` treats its parameter values as positional keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub function: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(
        default,
        rename = "human_readable_justification",
        skip_serializing_if = "Option::is_none"
    )]
    pub justification: Option<String>,
}

impl Action {
    pub fn is_malformed(&self) -> bool {
        self.function.is_empty()
    }
}

/// The model's full response for one turn: ordered actions plus an optional
/// completion message. `done == None` means the run continues.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstructionSet {
    #[serde(default)]
    pub steps: Vec<Action>,
    #[serde(default)]
    pub done: Option<String>,
}

impl InstructionSet {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && !self.has_done()
    }

    pub fn has_done(&self) -> bool {
        matches!(&self.done, Some(msg) if !msg.is_empty())
    }

    /// Merges another per-screenshot response into this one, key by key:
    /// the first non-empty value seen for each key wins, a later response
    /// only fills keys still empty here.
    pub fn merge(&mut self, other: InstructionSet) {
        if self.steps.is_empty() {
            self.steps = other.steps;
        }
        if !self.has_done() {
            if let Some(done) = other.done.filter(|d| !d.is_empty()) {
                self.done = Some(done);
            }
        }
    }
}

// ── Chat-completions wire types ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}
