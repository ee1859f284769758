//! Orchestration for one paper run.
//!
//! Level 0 splits the paper into sections, level 1 splits each section into
//! sub-subtasks, level 2 writes prose for every sub-subtask. Leaves are merged
//! per section, designated sections are summarized and illustrated, and the
//! sections are merged into the final document.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::budget::leaf_min_words;
use crate::core::extract::{extract_exact, extract_summary};
use crate::core::types::{Dialog, GenerationParams, Section};
use crate::io::config::PipelineConfig;
use crate::io::generator::Generator;
use crate::io::image::{Illustrator, generate_picture};
use crate::io::merge::{MergeReport, MergeSources, merge_files};
use crate::io::prompt::{LeafPrompt, PromptBuilder, SUMMARY_MAX_WORDS, main_task_request};
use crate::io::timing::TimingLog;
use crate::io::tree_store::write_tree;
use crate::tree::TaskNode;

/// Sub-subtasks requested per section.
pub const SECTION_FANOUT: usize = 6;

pub const TIME_LOG_FILE: &str = "time.csv";
pub const SUMMARY_TIME_LOG_FILE: &str = "summary_time.csv";
pub const DOCUMENT_FILE: &str = "result.txt";
pub const TREE_FILE: &str = "tree.json";

/// Output directory for one (word count, seed) run.
pub fn run_dir(results_root: &Path, word_count: u32, seed: u64) -> PathBuf {
    results_root.join(format!("results_word_{word_count}_seed_{seed}"))
}

pub fn leaf_file(section: usize, leaf: usize) -> String {
    format!("result{section}_{leaf}.txt")
}

pub fn section_file(section: usize) -> String {
    format!("result{section}.txt")
}

/// Inputs that identify a run.
#[derive(Debug, Clone)]
pub struct RunRequest<'a> {
    pub results_root: &'a Path,
    /// Target length of the whole paper, before halving.
    pub word_count: u32,
    pub params: &'a GenerationParams,
    pub config: &'a PipelineConfig,
}

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_dir: PathBuf,
    pub document: PathBuf,
    pub tree: TaskNode,
    pub leaves_written: usize,
    pub section_merges: usize,
    /// Merge inputs that were missing (and skipped) across all merges.
    pub missing_files: usize,
    pub summaries: Vec<Section>,
    pub illustrations: Vec<PathBuf>,
}

pub struct Pipeline<'a, G: Generator + ?Sized> {
    generator: &'a G,
    illustrator: Option<&'a dyn Illustrator>,
    prompts: PromptBuilder,
    params: &'a GenerationParams,
    config: &'a PipelineConfig,
    run_dir: PathBuf,
    min_words: u32,
    time_log: TimingLog,
    summary_log: TimingLog,
}

impl<'a, G: Generator + ?Sized> Pipeline<'a, G> {
    /// Create the run directory and bind collaborators.
    ///
    /// With `illustrator = None` summaries are still written but no images are requested.
    pub fn new(
        request: &RunRequest<'a>,
        generator: &'a G,
        illustrator: Option<&'a dyn Illustrator>,
    ) -> Result<Self> {
        let dir = run_dir(request.results_root, request.word_count, request.params.seed);
        fs::create_dir_all(&dir)
            .with_context(|| format!("create run dir {}", dir.display()))?;
        Ok(Self {
            generator,
            illustrator,
            prompts: PromptBuilder::new(),
            params: request.params,
            config: request.config,
            min_words: leaf_min_words(request.word_count, SECTION_FANOUT),
            time_log: TimingLog::new(dir.join(TIME_LOG_FILE)),
            summary_log: TimingLog::new(dir.join(SUMMARY_TIME_LOG_FILE)),
            run_dir: dir,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Minimum words requested from every leaf.
    pub fn min_words(&self) -> u32 {
        self.min_words
    }

    #[instrument(skip_all, fields(run_dir = %self.run_dir.display()))]
    pub fn run(&self) -> Result<RunOutcome> {
        let main_task = main_task_request(&self.config.title);
        let mut root = TaskNode::root(&self.config.title);
        self.decompose_task(&main_task, &mut root)?;

        let mut leaves_written = 0;
        let mut section_merges = 0;
        let mut missing_files = 0;
        let mut summaries = Vec::new();
        let mut illustrations = Vec::new();

        for idx in 0..root.children.len() {
            let node = &mut root.children[idx];
            self.decompose_section(&main_task, node)?;
            for leaf in &node.children {
                self.write_leaf(&main_task, node, leaf)?;
                leaves_written += 1;
            }

            let report = self.merge_section(node)?;
            section_merges += 1;
            missing_files += report.missing.len();

            let section = section_of(node)?;
            if self.config.illustrate_sections.contains(&section) {
                self.summarize_section(node)?;
                summaries.push(section);
                if let Some(illustrator) = self.illustrator {
                    let name = section.label();
                    let image = generate_picture(&self.run_dir, name, node.index, illustrator)?;
                    illustrations.push(image);
                }
            }

            write_tree(&self.run_dir.join(TREE_FILE), &root)?;
        }

        let section_files = (0..Section::ALL.len()).map(section_file).collect();
        let report = merge_files(
            &self.run_dir,
            DOCUMENT_FILE,
            &MergeSources::List(section_files),
        )?;
        missing_files += report.missing.len();
        info!(
            leaves_written,
            section_merges,
            missing_files,
            document = %report.output_path.display(),
            "paper assembled"
        );

        Ok(RunOutcome {
            run_dir: self.run_dir.clone(),
            document: report.output_path,
            tree: root,
            leaves_written,
            section_merges,
            missing_files,
            summaries,
            illustrations,
        })
    }

    /// Level 0: split the paper into one subtask per [`Section`].
    pub fn decompose_task(&self, main_task: &str, root: &mut TaskNode) -> Result<()> {
        let dialog = self.prompts.task_decomposition(main_task)?;
        let reply = self.chat(&self.time_log, "main_task", &dialog)?;
        let fragments = extract_exact(&reply, Section::ALL.len(), "subtasks")?;
        root.attach_children(fragments)?;
        info!(outline = %root.outline(), "paper decomposed");
        Ok(())
    }

    /// Level 1: split one section into [`SECTION_FANOUT`] sub-subtasks.
    pub fn decompose_section(&self, main_task: &str, node: &mut TaskNode) -> Result<()> {
        let section = section_of(node)?;
        let dialog = self.prompts.section_decomposition(
            main_task,
            section,
            &node.description,
            SECTION_FANOUT,
        )?;
        let reply = self.chat(&self.time_log, &format!("task{}", node.index), &dialog)?;
        let what = format!("{} sub-subtasks", section.label());
        let fragments = extract_exact(&reply, SECTION_FANOUT, &what)?;
        node.attach_children(fragments)?;
        info!(section = %section, outline = %node.outline(), "section decomposed");
        Ok(())
    }

    /// Level 2: generate prose for one leaf and write it verbatim.
    pub fn write_leaf(
        &self,
        main_task: &str,
        section: &TaskNode,
        leaf: &TaskNode,
    ) -> Result<PathBuf> {
        let dialog = self.prompts.leaf(&LeafPrompt {
            main_task,
            subtask: &section.description,
            sub_subtask: &leaf.description,
            label: &leaf.label,
            min_words: self.min_words,
        })?;
        let task_id = format!("task{}_{}", section.index, leaf.index);
        let text = self.chat(&self.time_log, &task_id, &dialog)?;

        let path = self.run_dir.join(leaf_file(section.index, leaf.index));
        fs::write(&path, &text).with_context(|| format!("write {}", path.display()))?;
        let words = text.split_whitespace().count();
        info!(leaf = %leaf.label, words, "leaf written");
        Ok(path)
    }

    fn merge_section(&self, node: &TaskNode) -> Result<MergeReport> {
        let prefix = format!("result{}_", node.index);
        let sources = MergeSources::prefixed(prefix, node.children.len());
        merge_files(&self.run_dir, &section_file(node.index), &sources)
    }

    /// Compress a merged section into `{label}.txt`.
    pub fn summarize_section(&self, node: &TaskNode) -> Result<PathBuf> {
        let section = section_of(node)?;
        let source = self.run_dir.join(section_file(node.index));
        let text =
            fs::read_to_string(&source).with_context(|| format!("read {}", source.display()))?;
        let dialog = self.prompts.compression(&text)?;
        let task_id = format!("summary{}", node.index);
        let reply = self.chat(&self.summary_log, &task_id, &dialog)?;
        let summary =
            extract_summary(&reply).with_context(|| format!("summarize {}", section.label()))?;

        let words = summary.split_whitespace().count();
        if words > SUMMARY_MAX_WORDS {
            warn!(section = %section, words, "summary exceeds requested word limit");
        }
        let path = self.run_dir.join(format!("{}.txt", section.label()));
        fs::write(&path, &summary).with_context(|| format!("write {}", path.display()))?;
        info!(section = %section, words, bytes = summary.len(), "section summarized");
        Ok(path)
    }

    fn chat(&self, log: &TimingLog, task_id: &str, dialog: &Dialog) -> Result<String> {
        for message in dialog {
            let role = message.role.as_str();
            debug!(task_id, role, content = %message.content, "prompt");
        }
        let reply = log
            .time(task_id, || self.generator.chat(dialog, self.params))
            .with_context(|| format!("generate {task_id}"))?;
        debug!(task_id, content = %reply.content, "reply");
        Ok(reply.content)
    }
}

fn section_of(node: &TaskNode) -> Result<Section> {
    node.section
        .ok_or_else(|| anyhow!("{} does not belong to a section", node.label))
}
