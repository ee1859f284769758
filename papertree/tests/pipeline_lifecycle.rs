//! End-to-end pipeline runs against scripted model and image fakes.
//!
//! Each test drives `Pipeline::run` in a temp results root and inspects the
//! files a real run leaves behind: leaf texts, section merges, summaries,
//! illustrations, timing logs and the final document.

use std::fs;
use std::path::Path;

use papertree::core::types::{GenerationParams, Section};
use papertree::io::config::PipelineConfig;
use papertree::io::image::{IMAGE_TIMING_FILE, ILLUSTRATION_INSTRUCTION, Illustrator};
use papertree::pipeline::{
    DOCUMENT_FILE, Pipeline, RunRequest, SUMMARY_TIME_LOG_FILE, TIME_LOG_FILE, TREE_FILE,
};
use papertree::test_support::{PaperResponder, RecordingIllustrator, ScriptedGenerator};

fn request<'a>(
    root: &'a Path,
    params: &'a GenerationParams,
    config: &'a PipelineConfig,
) -> RunRequest<'a> {
    RunRequest {
        results_root: root,
        word_count: 5000,
        params,
        config,
    }
}

fn first_column(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .expect("read timing log")
        .lines()
        .map(|line| line.split(", ").next().unwrap_or_default().to_string())
        .collect()
}

#[test]
fn full_run_writes_every_artifact() {
    let temp = tempfile::tempdir().expect("tempdir");
    let params = GenerationParams::default();
    let config = PipelineConfig::default();
    let generator = ScriptedGenerator::responding(PaperResponder::default());
    let illustrator = RecordingIllustrator::new();

    let pipeline = Pipeline::new(
        &request(temp.path(), &params, &config),
        &generator,
        Some(&illustrator as &dyn Illustrator),
    )
    .expect("pipeline");
    let outcome = pipeline.run().expect("run");

    let dir = temp.path().join("results_word_5000_seed_1");
    assert_eq!(outcome.run_dir, dir);
    assert_eq!(outcome.document, dir.join(DOCUMENT_FILE));
    assert_eq!(outcome.leaves_written, 36);
    assert_eq!(outcome.section_merges, 6);
    assert_eq!(outcome.missing_files, 0);
    assert_eq!(outcome.tree.leaf_count(), 36);

    // 1 task decomposition, 6 section decompositions, 36 leaves, 2 summaries.
    assert_eq!(generator.request_count(), 45);

    for i in 0..6 {
        for j in 0..6 {
            assert!(dir.join(format!("result{i}_{j}.txt")).is_file());
        }
        let section = fs::read_to_string(dir.join(format!("result{i}.txt"))).expect("section");
        let expected: String = (0..6)
            .map(|j| {
                let leaf = fs::read_to_string(dir.join(format!("result{i}_{j}.txt")))
                    .expect("leaf");
                format!("{leaf}\n")
            })
            .collect();
        assert_eq!(section, expected);
    }

    let document = fs::read_to_string(dir.join(DOCUMENT_FILE)).expect("document");
    let expected: String = (0..6)
        .map(|i| {
            let section = fs::read_to_string(dir.join(format!("result{i}.txt"))).expect("section");
            format!("{section}\n")
        })
        .collect();
    assert_eq!(document, expected);

    assert_eq!(
        fs::read_to_string(dir.join("Methodology.txt")).expect("summary"),
        "A compact account of the section."
    );
    assert!(dir.join("Results.txt").is_file());
    assert!(!dir.join("Introduction.txt").exists());
    assert_eq!(
        outcome.illustrations,
        vec![dir.join("Methodology.png"), dir.join("Results.png")]
    );
    let prompts = illustrator.prompts.borrow();
    assert_eq!(prompts.len(), 2);
    assert!(prompts.iter().all(|p| p.starts_with(ILLUSTRATION_INSTRUCTION)));

    let tasks = first_column(&dir.join(TIME_LOG_FILE));
    assert_eq!(tasks.len(), 43);
    assert_eq!(tasks[0], "main_task");
    assert_eq!(tasks[1], "task0");
    assert_eq!(tasks[2], "task0_0");
    assert_eq!(tasks[42], "task5_5");
    assert_eq!(
        first_column(&dir.join(SUMMARY_TIME_LOG_FILE)),
        vec!["summary2", "summary3"]
    );
    assert_eq!(
        first_column(&dir.join(IMAGE_TIMING_FILE)),
        vec!["image2", "image3"]
    );

    let tree: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.join(TREE_FILE)).expect("tree"))
            .expect("tree json");
    assert_eq!(tree["children"].as_array().map(Vec::len), Some(6));
    assert_eq!(tree["children"][5]["label"], "Conclusion");
    assert_eq!(tree["children"][5]["children"][0]["label"], "Conclusion 1");
}

#[test]
fn leaf_prompts_carry_the_word_budget_and_labels() {
    let temp = tempfile::tempdir().expect("tempdir");
    let params = GenerationParams::default();
    let config = PipelineConfig::default();
    let generator = ScriptedGenerator::responding(PaperResponder::default());

    let pipeline = Pipeline::new(&request(temp.path(), &params, &config), &generator, None)
        .expect("pipeline");
    pipeline.run().expect("run");

    let leaf_requests: Vec<_> = generator
        .requests()
        .into_iter()
        .filter(|dialog| dialog[0].content.contains("must be at least"))
        .collect();
    assert_eq!(leaf_requests.len(), 36);
    assert!(
        leaf_requests
            .iter()
            .all(|dialog| dialog[0].content.contains("at least 69 words"))
    );
    assert!(leaf_requests[0][1].content.contains("Introduction 1:..."));
    assert!(leaf_requests[35][1].content.contains("Conclusion 6:..."));
}

#[test]
fn brace_count_mismatch_stops_before_any_leaf() {
    let temp = tempfile::tempdir().expect("tempdir");
    let params = GenerationParams::default();
    let config = PipelineConfig::default();
    let generator = ScriptedGenerator::responding(PaperResponder {
        fanout: 5,
        ..PaperResponder::default()
    });

    let pipeline = Pipeline::new(&request(temp.path(), &params, &config), &generator, None)
        .expect("pipeline");
    let err = pipeline.run().unwrap_err();

    assert!(err.to_string().contains("expected 6 braced subtasks, model produced 5"));
    assert_eq!(generator.request_count(), 1);
    let dir = pipeline.run_dir();
    assert!(!dir.join("result0_0.txt").exists());
    assert!(!dir.join(DOCUMENT_FILE).exists());
}

#[test]
fn generator_failure_keeps_completed_sections() {
    let temp = tempfile::tempdir().expect("tempdir");
    let params = GenerationParams::default();
    let config = PipelineConfig::default();
    // Request 8 is the decomposition of the second section.
    let generator = ScriptedGenerator::responding(PaperResponder::default()).failing_on(8);

    let pipeline = Pipeline::new(&request(temp.path(), &params, &config), &generator, None)
        .expect("pipeline");
    let err = pipeline.run().unwrap_err();

    assert!(format!("{err:#}").contains("generate task1"));
    let dir = pipeline.run_dir();
    assert!(dir.join("result0.txt").is_file());
    assert!(dir.join("result0_5.txt").is_file());
    assert!(!dir.join("result1_0.txt").exists());
    assert!(!dir.join(DOCUMENT_FILE).exists());
}

#[test]
fn configured_sections_are_summarized_without_images() {
    let temp = tempfile::tempdir().expect("tempdir");
    let params = GenerationParams {
        seed: 42,
        ..GenerationParams::default()
    };
    let config = PipelineConfig {
        illustrate_sections: vec![Section::Introduction, Section::FutureWork],
        ..PipelineConfig::default()
    };
    let generator = ScriptedGenerator::responding(PaperResponder::default());

    let pipeline = Pipeline::new(&request(temp.path(), &params, &config), &generator, None)
        .expect("pipeline");
    let outcome = pipeline.run().expect("run");

    let dir = temp.path().join("results_word_5000_seed_42");
    assert_eq!(outcome.summaries, vec![Section::Introduction, Section::FutureWork]);
    assert!(outcome.illustrations.is_empty());
    assert!(dir.join("Introduction.txt").is_file());
    assert!(dir.join("Future work.txt").is_file());
    assert!(!dir.join("Methodology.txt").exists());
    assert!(!dir.join(IMAGE_TIMING_FILE).exists());
    assert_eq!(
        first_column(&dir.join(SUMMARY_TIME_LOG_FILE)),
        vec!["summary0", "summary4"]
    );
}

#[test]
fn rerun_overwrites_outputs_and_appends_timings() {
    let temp = tempfile::tempdir().expect("tempdir");
    let params = GenerationParams::default();
    let config = PipelineConfig::default();

    for _ in 0..2 {
        let generator = ScriptedGenerator::responding(PaperResponder::default());
        Pipeline::new(&request(temp.path(), &params, &config), &generator, None)
            .expect("pipeline")
            .run()
            .expect("run");
    }

    let dir = temp.path().join("results_word_5000_seed_1");
    assert_eq!(first_column(&dir.join(TIME_LOG_FILE)).len(), 86);
    let document = fs::read_to_string(dir.join(DOCUMENT_FILE)).expect("document");
    let first_section = fs::read_to_string(dir.join("result0.txt")).expect("section");
    assert!(document.starts_with(&first_section));
    assert_eq!(document.matches("Prose written for:").count(), 36);
}
