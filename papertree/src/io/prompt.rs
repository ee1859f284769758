//! Dialog builder for every model request the pipeline makes.
//!
//! Each template renders one dialog. Messages are separated by
//! `<!-- message:ROLE -->` markers. Templates are split on the markers before
//! rendering, so interpolated text can never start a new message; each
//! message body is rendered on its own and trimmed.

use std::collections::HashMap;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow, bail};
use minijinja::{Environment, context};
use regex::Regex;

use crate::core::types::{Dialog, Message, Role, Section};

const DECOMPOSE_TASK_TEMPLATE: &str = include_str!("prompts/decompose_task.md");
const DECOMPOSE_SECTION_TEMPLATE: &str = include_str!("prompts/decompose_section.md");
const WRITE_LEAF_TEMPLATE: &str = include_str!("prompts/write_leaf.md");
const COMPRESS_TEMPLATE: &str = include_str!("prompts/compress.md");

/// Word ceiling requested from section summaries.
pub const SUMMARY_MAX_WORDS: usize = 100;

static MESSAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*message:(system|user|assistant)\s*-->")
        .expect("message marker pattern should be valid")
});

/// The user request that opens every dialog's context.
pub fn main_task_request(title: &str) -> String {
    format!("Please help me write an academic paper, titled \"{title}\".")
}

/// Inputs for a level-2 (leaf prose) dialog.
#[derive(Debug, Clone)]
pub struct LeafPrompt<'a> {
    pub main_task: &'a str,
    pub subtask: &'a str,
    pub sub_subtask: &'a str,
    /// Heading the model should start with (e.g. `Results 3`).
    pub label: &'a str,
    pub min_words: u32,
}

/// One message of a template, still unrendered.
type MessageTemplate = (Role, &'static str);

/// Template engine wrapper around minijinja.
pub struct PromptBuilder {
    env: Environment<'static>,
    templates: HashMap<&'static str, Vec<MessageTemplate>>,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        let env = Environment::new();
        let mut templates = HashMap::new();
        for (name, source) in [
            ("decompose_task", DECOMPOSE_TASK_TEMPLATE),
            ("decompose_section", DECOMPOSE_SECTION_TEMPLATE),
            ("write_leaf", WRITE_LEAF_TEMPLATE),
            ("compress", COMPRESS_TEMPLATE),
        ] {
            let messages = split_messages(source).expect("prompt template should have markers");
            for &(_, body) in &messages {
                env.template_from_str(body)
                    .expect("prompt template should be valid");
            }
            templates.insert(name, messages);
        }
        Self { env, templates }
    }

    /// Level 0: split the paper into the fixed sections.
    pub fn task_decomposition(&self, main_task: &str) -> Result<Dialog> {
        let sections: Vec<&str> = Section::ALL.iter().map(Section::label).collect();
        self.render(
            "decompose_task",
            context! {
                sections => sections,
                main_task => main_task,
            },
        )
    }

    /// Level 1: split one section into `count` labelled sub-subtasks.
    pub fn section_decomposition(
        &self,
        main_task: &str,
        section: Section,
        subtask: &str,
        count: usize,
    ) -> Result<Dialog> {
        self.render(
            "decompose_section",
            context! {
                main_task => main_task,
                label => section.label(),
                subtask => subtask,
                count => count,
            },
        )
    }

    /// Level 2: final prose for one sub-subtask.
    pub fn leaf(&self, prompt: &LeafPrompt<'_>) -> Result<Dialog> {
        self.render(
            "write_leaf",
            context! {
                main_task => prompt.main_task,
                subtask => prompt.subtask,
                sub_subtask => prompt.sub_subtask,
                label => prompt.label,
                min_words => prompt.min_words,
            },
        )
    }

    /// Condense a merged section into a short braced summary.
    pub fn compression(&self, text: &str) -> Result<Dialog> {
        self.render(
            "compress",
            context! {
                text => text,
                max_words => SUMMARY_MAX_WORDS,
            },
        )
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<Dialog> {
        let messages = self
            .templates
            .get(name)
            .ok_or_else(|| anyhow!("unknown prompt template {name}"))?;
        messages
            .iter()
            .map(|(role, body)| -> Result<Message> {
                let rendered = self
                    .env
                    .render_str(body, ctx.clone())
                    .with_context(|| format!("render template {name}"))?;
                Ok(Message::new(*role, rendered.trim()))
            })
            .collect()
    }
}

/// Split a template source into role-tagged, unrendered message bodies.
fn split_messages(source: &'static str) -> Result<Vec<MessageTemplate>> {
    let markers: Vec<_> = MESSAGE_RE.captures_iter(source).collect();
    if markers.is_empty() {
        bail!("no message markers in prompt template");
    }

    let mut messages = Vec::with_capacity(markers.len());
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(role)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let role = match role.as_str() {
            "system" => Role::System,
            "user" => Role::User,
            _ => Role::Assistant,
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(source.len());
        messages.push((role, &source[whole.end()..end]));
    }
    Ok(messages)
}
