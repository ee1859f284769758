//! Decomposition tree: one paper task, six sections, six leaves per section.

use anyhow::{Result, bail};
use serde::Serialize;

use crate::core::types::Section;

/// Depth of a node in the decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Task,
    Subtask,
    Leaf,
}

impl Level {
    pub fn child(&self) -> Option<Level> {
        match self {
            Level::Task => Some(Level::Subtask),
            Level::Subtask => Some(Level::Leaf),
            Level::Leaf => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskNode {
    pub level: Level,
    /// Position among siblings (zero-based).
    pub index: usize,
    pub label: String,
    /// Model-provided description (the paper title for the root).
    pub description: String,
    /// Owning section; `None` only for the root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<Section>,
    pub children: Vec<TaskNode>,
}

impl TaskNode {
    pub fn root(title: &str) -> Self {
        Self {
            level: Level::Task,
            index: 0,
            label: "Paper".to_string(),
            description: title.to_string(),
            section: None,
            children: Vec::new(),
        }
    }

    /// Replace children with one node per fragment at the next level.
    ///
    /// Root children are labelled by [`Section`] in document order, so the
    /// fragment count must not exceed the section count.
    pub fn attach_children(&mut self, fragments: Vec<String>) -> Result<()> {
        let Some(level) = self.level.child() else {
            bail!("leaf {} cannot be decomposed further", self.label);
        };
        if self.level == Level::Task && fragments.len() > Section::ALL.len() {
            bail!(
                "{} subtasks exceed the {} fixed sections",
                fragments.len(),
                Section::ALL.len()
            );
        }

        let parent_section = self.section;
        self.children = fragments
            .into_iter()
            .enumerate()
            .map(|(index, description)| {
                let (section, label) = match parent_section {
                    Some(section) => (section, format!("{} {}", section.label(), index + 1)),
                    None => {
                        let section = Section::ALL[index];
                        (section, section.label().to_string())
                    }
                };
                TaskNode {
                    level,
                    index,
                    label,
                    description,
                    section: Some(section),
                    children: Vec::new(),
                }
            })
            .collect();
        Ok(())
    }

    pub fn is_leaf(&self) -> bool {
        self.level == Level::Leaf
    }

    pub fn leaf_count(&self) -> usize {
        if self.is_leaf() {
            return 1;
        }
        self.children.iter().map(TaskNode::leaf_count).sum()
    }

    /// Numbered one-line-per-child listing, used in progress logs.
    pub fn outline(&self) -> String {
        self.children
            .iter()
            .map(|child| format!("{}. {}\n", child.index + 1, child.description))
            .collect()
    }
}
