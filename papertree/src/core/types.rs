//! Shared types for dialogs, sampling parameters, and paper sections.
//!
//! These types are plain data: no I/O, stable serialization, safe to build in
//! tests without any collaborators.

use serde::{Deserialize, Deserializer, Serialize};

/// Speaker of a dialog message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One role-tagged message sent to or returned by the text generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// Ordered messages forming one request to the text generator.
pub type Dialog = Vec<Message>;

/// Sampling parameters forwarded verbatim to the generator backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub temperature: f64,
    pub top_p: f64,
    pub max_seq_len: u32,
    pub max_batch_size: u32,
    /// Falls back to the model's max sequence length when unset.
    pub max_gen_len: Option<u32>,
    pub seed: u64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.6,
            top_p: 0.9,
            max_seq_len: 512,
            max_batch_size: 8,
            max_gen_len: None,
            seed: 1,
        }
    }
}

/// The six fixed top-level divisions of a paper, in document order.
///
/// Serialized by label; deserialization accepts labels in any case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Section {
    Introduction,
    #[serde(rename = "Related work")]
    RelatedWork,
    Methodology,
    Results,
    #[serde(rename = "Future work")]
    FutureWork,
    Conclusion,
}

impl Section {
    pub const ALL: [Section; 6] = [
        Section::Introduction,
        Section::RelatedWork,
        Section::Methodology,
        Section::Results,
        Section::FutureWork,
        Section::Conclusion,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Section::Introduction => "Introduction",
            Section::RelatedWork => "Related work",
            Section::Methodology => "Methodology",
            Section::Results => "Results",
            Section::FutureWork => "Future work",
            Section::Conclusion => "Conclusion",
        }
    }

    /// Case-insensitive lookup by label (`"related work"` -> `RelatedWork`).
    pub fn from_label(label: &str) -> Option<Section> {
        let wanted = label.trim();
        Section::ALL
            .iter()
            .copied()
            .find(|section| section.label().eq_ignore_ascii_case(wanted))
    }
}

impl<'de> Deserialize<'de> for Section {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Section::from_label(&label)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown section {label:?}")))
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
