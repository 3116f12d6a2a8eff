//! The `run` command: apply a lookup pipeline to documents.

use std::path::{Path, PathBuf};

use anyhow::Context;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use spanlookup::config::PipelineConfig;
use spanlookup::{LookupError, ResourceRegistry};
use spanlookup_annotate::{BatchSummary, Cancellation, Pipeline};

use super::helpers::{output_path, read_document, write_document};

/// Run the pipeline over `documents` with `duplicates` parallel workers.
pub async fn cmd_run(
    pipeline_path: &Path,
    documents: Vec<PathBuf>,
    out_dir: Option<PathBuf>,
    duplicates: usize,
) -> anyhow::Result<()> {
    let config = PipelineConfig::load(pipeline_path)
        .with_context(|| format!("Failed to load pipeline {}", pipeline_path.display()))?;
    if config.lookups.is_empty() {
        println!(
            "{} No lookups configured in {}",
            style("!").yellow(),
            pipeline_path.display()
        );
        return Ok(());
    }
    if let Some(dir) = &out_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let cancel = Cancellation::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let total_docs = documents.len();
    let workers = duplicates.clamp(1, total_docs.max(1));
    let mut shares: Vec<Vec<PathBuf>> = vec![Vec::new(); workers];
    for (i, path) in documents.into_iter().enumerate() {
        shares[i % workers].push(path);
    }

    let progress = ProgressBar::new(total_docs as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")
            .unwrap()
            .progress_chars("█▓░"),
    );

    let registry = ResourceRegistry::new();
    let mut handles = Vec::with_capacity(workers);
    for (duplicate, share) in shares.into_iter().enumerate() {
        let config = config.clone();
        let registry = registry.clone();
        let cancel = cancel.clone();
        let progress = progress.clone();
        let out_dir = out_dir.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let result = run_worker(
                &config,
                duplicate,
                &registry,
                &cancel,
                &share,
                out_dir.as_deref(),
                &progress,
            );
            if result.is_err() {
                // stop the other duplicates too
                cancel.cancel();
            }
            result
        }));
    }

    let mut total = BatchSummary::default();
    let mut errors = Vec::new();
    for handle in handles {
        match handle.await? {
            Ok(summary) => total.add(&summary),
            Err(e) => errors.push(e),
        }
    }
    progress.finish_and_clear();

    // a real failure explains the interruptions it caused in other workers
    errors.sort_by_key(is_interrupted);
    if let Some(e) = errors.into_iter().next() {
        if is_interrupted(&e) {
            println!("{} Interrupted", style("!").yellow());
        }
        return Err(e);
    }

    println!(
        "{} Processed {} document(s): {} looked up, {} skipped, {} annotation(s) created",
        style("✓").green(),
        total_docs,
        total.looked_up,
        total.skipped,
        total.created
    );
    Ok(())
}

fn is_interrupted(e: &anyhow::Error) -> bool {
    e.downcast_ref::<LookupError>()
        .is_some_and(LookupError::is_interrupted)
}

/// One duplicate: its own processors over its share of the documents.
fn run_worker(
    config: &PipelineConfig,
    duplicate: usize,
    registry: &ResourceRegistry,
    cancel: &Cancellation,
    paths: &[PathBuf],
    out_dir: Option<&Path>,
    progress: &ProgressBar,
) -> anyhow::Result<BatchSummary> {
    let mut pipeline = Pipeline::from_config(config, duplicate, registry);
    pipeline.start()?;

    let mut total = BatchSummary::default();
    for path in paths {
        progress.set_message(path.display().to_string());
        match process_file(&mut pipeline, path, out_dir, cancel) {
            Ok(summary) => {
                total.add(&summary);
                progress.inc(1);
            }
            Err(e) => {
                if let Err(finish_err) = pipeline.finish() {
                    tracing::warn!("Duplicate {}: {}", duplicate, finish_err);
                }
                return Err(e);
            }
        }
    }
    pipeline.finish()?;
    Ok(total)
}

fn process_file(
    pipeline: &mut Pipeline,
    path: &Path,
    out_dir: Option<&Path>,
    cancel: &Cancellation,
) -> anyhow::Result<BatchSummary> {
    let mut doc = read_document(path)?;
    let summary = pipeline
        .process(&mut doc, cancel)
        .with_context(|| format!("Lookup failed for {}", path.display()))?;
    write_document(&doc, &output_path(path, out_dir))?;
    Ok(summary)
}
