use crate::genome;
use crate::launch::{Executor, Status};
use crate::merge::{self, MergeReport};
use crate::partition::{self, SplitMode};
use crate::summary::RunSummary;
use crate::workspace::Workspace;

use anyhow::{Context, Result};
use std::path::PathBuf;

/// The stages of the pipeline, in the order they run.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Read the genome and report on it
    Parse,
    /// Write the chunk files
    Split,
    /// Run Augustus on every chunk
    Predict,
    /// Merge the Augustus outputs
    Merge,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub genome: PathBuf,
    pub output: PathBuf,
    pub mode: SplitMode,
    pub chunks: usize,
    pub processes: usize,
    pub augustus: String,
    pub params: Vec<String>,
    pub until: Stage,
    pub keep_partial: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    /// Every stage which was asked for ran, but at least one chunk failed or one output
    /// was malformed
    Failed,
}

/// Runs the pipeline up to and including `config.until`.
///
/// The genome is parsed in full before anything is written to disk, and the workspace is
/// created before any chunk is written.
///
/// If a chunk fails, the merge is skipped unless `keep_partial` is set, in which case only
/// the outputs of successful chunks are merged. Either way the run is `Failed`.
///
/// # Errors
///
/// Returns an error for fatal conditions: an unreadable or malformed genome, a workspace
/// which cannot be created, a chunk which cannot be written, or an output which cannot be
/// merged.
pub fn run(config: &PipelineConfig) -> Result<RunStatus> {
    let now = std::time::Instant::now();
    let start_date = format!("{:?}", chrono::offset::Local::now());

    info!("Reading genome {}", config.genome.display());
    let stats = genome::scan(&config.genome)?;
    info!(
        "Found {} records, {} bases in total",
        stats.records(),
        stats.total_bases
    );
    if let Some((id, len)) = &stats.longest {
        info!("Longest record is {id} with {len} bases");
    }

    if config.until == Stage::Parse {
        return Ok(RunStatus::Completed);
    }

    let workspace = Workspace::create(&config.output, config.mode)?;
    info!("Created output directory {}", workspace.root.display());

    let split = partition::split_genome(
        &config.genome,
        &stats.lengths,
        &workspace.inputs,
        config.mode,
        config.chunks,
    )?;
    info!(
        "Created {} {} files in '{}' holding {} bases, median size {:.1} bases",
        split.actual(),
        config.mode.file_prefix(),
        config.mode.dir_name(),
        split.total_bases(),
        split.median_size()
    );
    if split.actual() < split.requested {
        warn!(
            "Only {} of the {} requested chunks contain records",
            split.actual(),
            split.requested
        );
    }

    let mut summary = RunSummary {
        version: crate::cli::VERSION.to_string(),
        start_date,
        genome: config.genome.display().to_string(),
        mode: Some(config.mode),
        record_count: stats.records(),
        total_bases: stats.total_bases,
        requested_chunks: split.requested,
        actual_chunks: split.actual(),
        median_chunk_size: split.median_size(),
        split: Some(&split),
        ..RunSummary::default()
    };

    if config.until == Stage::Split {
        summary.succeeded = true;
        summary.elapsed = now.elapsed().as_secs_f64();
        summary.write(&workspace.run_summary())?;
        return Ok(RunStatus::Completed);
    }

    let executor = Executor::new(
        config.augustus.as_str(),
        config.params.clone(),
        config.processes,
        &workspace,
    );
    let execution = executor.execute(&split.chunks)?;
    summary.execution = Some(&execution);

    let failed = execution.status() == Status::Failed;
    if failed {
        let count = execution.failures().count();
        error!(
            "{} of {} Augustus runs failed:",
            count,
            execution.results.len()
        );
        for result in execution.failures() {
            error!("  {} ({})", result.item.command_line(), result.outcome);
        }
    } else {
        info!("Augustus finished successfully");
    }

    let mut merged: Option<MergeReport> = None;
    if config.until == Stage::Merge {
        if !failed {
            merged = Some(merge::merge(&workspace.outputs, &workspace.merged)?);
        } else if config.keep_partial {
            let outputs: Vec<PathBuf> = execution
                .successes()
                .map(|r| r.item.output.clone())
                .collect();
            warn!("Merging the {} successful outputs only", outputs.len());
            merged = Some(merge::merge_files(&outputs, &workspace.merged)?);
        } else {
            error!(
                "Skipping the merge because of failed chunks. \
                 Pass --keep-partial to merge the successful ones"
            );
        }
    }

    let anomalies = merged.as_ref().map_or(0, |m| m.anomalies.len());
    if let Some(report) = &merged {
        if anomalies > 0 {
            error!("{} Augustus outputs could not be merged", anomalies);
        }
        info!(
            "Done. Merged {} files ({} lines), results can be found in {}",
            report.files,
            report.body_lines,
            workspace.merged.display()
        );
    }

    let succeeded = !failed && anomalies == 0;
    summary.merge = merged.as_ref();
    summary.succeeded = succeeded;
    summary.elapsed = now.elapsed().as_secs_f64();
    summary
        .write(&workspace.run_summary())
        .context("Could not write the run summary")?;

    Ok(if succeeded {
        RunStatus::Completed
    } else {
        RunStatus::Failed
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use indoc::indoc;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    const FAKE_AUGUSTUS: &str = indoc! {r##"
        #!/bin/sh
        case "$1" in
          *_2.fasta) ON_SECOND_CHUNK ;;
        esac
        echo "# This output was generated with AUGUSTUS (version 3.5.0)."
        echo "# input: $1"
        echo "#"
        grep '^>' "$1" | sed 's/^>//' | while read -r id rest; do
          printf '%s\tAUGUSTUS\tgene\t1\t100\n' "$id"
        done
    "##};

    struct Setup {
        _dir: tempfile::TempDir,
        config: PipelineConfig,
    }

    fn setup(fail_second: bool) -> Setup {
        let dir = tempfile::tempdir().unwrap();

        let genome = dir.path().join("genome.fa");
        let mut fasta = String::new();
        for i in 1..=10 {
            fasta.push_str(&format!(">seq{i}\n{}\n", "ACGT".repeat(25)));
        }
        std::fs::write(&genome, fasta).unwrap();

        let body = FAKE_AUGUSTUS.replace(
            "ON_SECOND_CHUNK",
            if fail_second { "exit 3" } else { ":" },
        );
        let tool = dir.path().join("augustus.sh");
        std::fs::write(&tool, body).unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = PipelineConfig {
            genome,
            output: dir.path().join("out"),
            mode: SplitMode::Chunks,
            chunks: 4,
            processes: 2,
            augustus: tool.display().to_string(),
            params: vec![],
            until: Stage::Merge,
            keep_partial: false,
        };

        Setup { _dir: dir, config }
    }

    fn merged_ids(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| l.split('\t').next().unwrap().to_string())
            .collect()
    }

    #[test]
    fn end_to_end() {
        let s = setup(false);
        let status = run(&s.config).unwrap();
        assert_eq!(status, RunStatus::Completed);

        let out = &s.config.output;
        for i in 1..=4 {
            assert!(out.join(format!("chunks/chunk_{i}.fasta")).is_file());
            assert!(out.join(format!("augustus/chunk_{i}.gff")).is_file());
            assert!(out.join(format!("logs/augustus_{i}.e")).is_file());
        }
        assert_eq!(
            std::fs::read_to_string(out.join("logs/augustus.cmds"))
                .unwrap()
                .lines()
                .count(),
            4
        );

        let expected: Vec<String> = (1..=10).map(|i| format!("seq{i}")).collect();
        assert_eq!(merged_ids(&out.join("augustus.gff")), expected);
        assert!(out.join("logs/run_summary.json").is_file());
    }

    #[test]
    fn failed_chunk_skips_merge() {
        let s = setup(true);
        let status = run(&s.config).unwrap();

        assert_eq!(status, RunStatus::Failed);
        assert!(!s.config.output.join("augustus.gff").exists());

        // every chunk was still attempted
        for i in 1..=4 {
            assert!(s.config.output.join(format!("augustus/chunk_{i}.gff")).is_file());
        }
    }

    #[test]
    fn failed_chunk_with_keep_partial_merges_the_rest() {
        let mut s = setup(true);
        s.config.keep_partial = true;
        let status = run(&s.config).unwrap();

        assert_eq!(status, RunStatus::Failed);

        // chunk 2 holds seq4 to seq6
        let ids = merged_ids(&s.config.output.join("augustus.gff"));
        assert_eq!(ids, vec!["seq1", "seq2", "seq3", "seq7", "seq8", "seq9", "seq10"]);
    }

    #[test]
    fn parse_only_creates_nothing() {
        let mut s = setup(false);
        s.config.until = Stage::Parse;
        assert_eq!(run(&s.config).unwrap(), RunStatus::Completed);
        assert!(!s.config.output.exists());
    }

    #[test]
    fn split_only_runs_nothing() {
        let mut s = setup(false);
        s.config.until = Stage::Split;
        assert_eq!(run(&s.config).unwrap(), RunStatus::Completed);

        let out = &s.config.output;
        assert!(out.join("chunks/chunk_4.fasta").is_file());
        assert!(!out.join("logs/augustus.cmds").exists());
        assert!(!out.join("augustus.gff").exists());
    }

    #[test]
    fn entries_mode() {
        let mut s = setup(false);
        s.config.mode = SplitMode::Entries;
        assert_eq!(run(&s.config).unwrap(), RunStatus::Completed);

        let out = &s.config.output;
        for i in 1..=10 {
            assert!(out.join(format!("entries/entry_{i}.fasta")).is_file());
            assert!(out.join(format!("augustus/entry_{i}.gff")).is_file());
            assert!(out.join(format!("logs/augustus_entry_{i}.e")).is_file());
        }
        let expected: Vec<String> = (1..=10).map(|i| format!("seq{i}")).collect();
        assert_eq!(merged_ids(&out.join("augustus.gff")), expected);
    }

    #[test]
    fn existing_output_is_fatal() {
        let s = setup(false);
        std::fs::create_dir(&s.config.output).unwrap();

        let err = run(&s.config).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert!(!s.config.output.join("chunks").exists());
    }

    #[test]
    fn malformed_genome_is_fatal_before_creating_anything() {
        let s = setup(false);
        std::fs::write(&s.config.genome, "not a genome\n").unwrap();

        assert!(run(&s.config).is_err());
        assert!(!s.config.output.exists());
    }
}
