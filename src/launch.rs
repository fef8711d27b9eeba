use crate::partition::Chunk;
use crate::workspace::Workspace;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use crossbeam::channel;
use itertools::Itertools;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};

/// One invocation of the external tool.
#[derive(Debug, Clone, Serialize)]
pub struct WorkItem {
    pub index: usize,
    pub input: PathBuf,
    /// Receives the standard output of the tool
    pub output: PathBuf,
    /// Receives the standard error of the tool
    pub log: PathBuf,
    /// The program followed by its arguments
    pub command: Vec<String>,
}

impl WorkItem {
    pub fn command_line(&self) -> String {
        self.command.iter().join(" ")
    }
}

/// How a single invocation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    /// The process ran to completion with this exit code
    Exited(i32),
    /// The process was killed by a signal
    Signalled,
    /// The process could not be started
    LaunchFailed(String),
}

impl Outcome {
    pub fn success(&self) -> bool {
        matches!(self, Outcome::Exited(0))
    }
}

impl From<ExitStatus> for Outcome {
    fn from(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => Outcome::Exited(code),
            None => Outcome::Signalled,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Exited(code) => write!(f, "exit code: {code}"),
            Outcome::Signalled => f.write_str("killed by a signal"),
            Outcome::LaunchFailed(reason) => write!(f, "could not be launched: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub item: WorkItem,
    pub outcome: Outcome,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    Succeeded,
    Failed,
}

/// The results of every work item, ordered by chunk index.
#[derive(Debug, Serialize)]
pub struct ExecutionSummary {
    pub results: Vec<ExecutionResult>,
}

impl ExecutionSummary {
    pub fn status(&self) -> Status {
        if self.results.iter().all(|r| r.outcome.success()) {
            Status::Succeeded
        } else {
            Status::Failed
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results.iter().filter(|r| !r.outcome.success())
    }

    pub fn successes(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results.iter().filter(|r| r.outcome.success())
    }
}

/// Runs the external tool once per chunk, with at most `max_concurrency` processes alive at
/// any time.
///
/// Processes are launched from a single thread in chunk order. Each launched child is handed
/// to a waiter thread which reports back over a channel when the child exits; the launching
/// thread blocks on that channel whenever the ceiling is reached. A failing chunk never stops
/// the others.
pub struct Executor {
    tool: String,
    extra_args: Vec<String>,
    max_concurrency: usize,
    workspace: Workspace,
}

impl Executor {
    pub fn new(
        tool: impl Into<String>,
        extra_args: Vec<String>,
        max_concurrency: usize,
        workspace: &Workspace,
    ) -> Self {
        Self {
            tool: tool.into(),
            extra_args,
            max_concurrency: max_concurrency.max(1),
            workspace: workspace.clone(),
        }
    }

    /// Builds the work item of a chunk: `<tool> <chunk file> [extra args...]`.
    pub fn work_item(&self, chunk: &Chunk) -> WorkItem {
        let stem = chunk.stem();

        let mut command = Vec::with_capacity(self.extra_args.len() + 2);
        command.push(self.tool.clone());
        command.push(chunk.path.display().to_string());
        command.extend(self.extra_args.iter().cloned());

        WorkItem {
            index: chunk.index,
            input: chunk.path.clone(),
            output: self.workspace.output_for(&stem),
            log: self.workspace.log_for(&stem),
            command,
        }
    }

    /// Launches every chunk and waits for all of them to finish.
    ///
    /// # Errors
    ///
    /// Only fails if the command log cannot be written. Chunks which fail to launch or exit
    /// with a non-zero code are reported in the returned summary instead.
    pub fn execute(&self, chunks: &[Chunk]) -> Result<ExecutionSummary> {
        let items: Vec<WorkItem> = chunks.iter().map(|c| self.work_item(c)).collect();
        let total = items.len();

        info!(
            "Launching {} on {} files, at most {} at a time",
            self.tool, total, self.max_concurrency
        );

        let command_log_path = self.workspace.command_log();
        let mut command_log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&command_log_path)
            .with_context(|| format!("Unable to open {}", command_log_path.display()))?;

        let (tx, rx) = channel::unbounded::<ExecutionResult>();
        let mut results = Vec::with_capacity(total);

        let result = crossbeam::thread::scope(|scope| -> Result<()> {
            let mut running = 0usize;

            for item in items {
                // wait for a free slot
                while running >= self.max_concurrency {
                    let finished = rx.recv().context("Waiter thread disconnected")?;
                    running -= 1;
                    report(&finished, total);
                    results.push(finished);
                }

                writeln!(command_log, "{}", item.command_line())
                    .and_then(|_| command_log.flush())
                    .with_context(|| format!("Unable to write to {}", command_log_path.display()))?;

                debug!("Launching {}", item.command_line());
                let started_at = Local::now();

                match spawn(&item) {
                    Ok(mut child) => {
                        running += 1;
                        let tx = tx.clone();
                        scope.spawn(move |_| {
                            let outcome = match child.wait() {
                                Ok(status) => Outcome::from(status),
                                Err(e) => Outcome::LaunchFailed(format!("could not wait: {e}")),
                            };
                            // the receiver outlives every waiter
                            let _ = tx.send(ExecutionResult {
                                item,
                                outcome,
                                started_at,
                                finished_at: Local::now(),
                            });
                        });
                    }
                    Err(e) => {
                        let finished = ExecutionResult {
                            item,
                            outcome: Outcome::LaunchFailed(format!("{e:#}")),
                            started_at,
                            finished_at: Local::now(),
                        };
                        report(&finished, total);
                        results.push(finished);
                    }
                }
            }

            while running > 0 {
                let finished = rx.recv().context("Waiter thread disconnected")?;
                running -= 1;
                report(&finished, total);
                results.push(finished);
            }

            Ok(())
        });

        // the waiter threads only wait on children, so a panic here is a bug
        result.unwrap_or_else(|e| {
            error!("Caught a panic which is unrecoverable");
            std::panic::resume_unwind(e)
        })?;

        results.sort_by_key(|r| r.item.index);
        Ok(ExecutionSummary { results })
    }
}

/// Starts the tool for `item`, redirecting its output and error streams to their files.
fn spawn(item: &WorkItem) -> Result<Child> {
    let (program, args) = item
        .command
        .split_first()
        .context("Empty command line")?;

    let stdout = File::create(&item.output)
        .with_context(|| format!("Unable to create {}", item.output.display()))?;
    let stderr = File::create(&item.log)
        .with_context(|| format!("Unable to create {}", item.log.display()))?;

    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .spawn()
        .with_context(|| format!("Unable to launch `{}`", item.command_line()))
}

fn report(result: &ExecutionResult, total: usize) {
    if result.outcome.success() {
        debug!("Chunk {}/{} finished", result.item.index, total);
    } else {
        error!(
            "ERROR: Augustus didn't finish successfully, {}",
            result.outcome
        );
        error!("Faulty command: {}", result.item.command_line());
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::partition::SplitMode;
    use indoc::formatdoc;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    struct Fixture {
        _dir: tempfile::TempDir,
        workspace: Workspace,
        chunks: Vec<Chunk>,
    }

    fn fixture(n: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(dir.path().join("run"), SplitMode::Chunks).unwrap();

        let chunks = (1..=n)
            .map(|index| {
                let path = workspace.inputs.join(format!("chunk_{index}.fasta"));
                std::fs::write(&path, format!(">seq{index}\nACGT\n")).unwrap();
                Chunk {
                    index,
                    records: vec![format!("seq{index}")],
                    total_bases: 4,
                    path,
                }
            })
            .collect();

        Fixture {
            _dir: dir,
            workspace,
            chunks,
        }
    }

    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[test]
    fn never_exceeds_the_ceiling() {
        let f = fixture(6);
        let running = f.workspace.root.join("running");
        std::fs::create_dir(&running).unwrap();

        let tool = script(
            &f.workspace.root,
            "tool.sh",
            &formatdoc! {r#"
                touch "{dir}/$$"
                sleep 0.5
                ls "{dir}" | wc -l
                rm "{dir}/$$"
                "#,
                dir = running.display()
            },
        );

        for max in [1, 2, 4] {
            let executor = Executor::new(&tool, vec![], max, &f.workspace);
            let summary = executor.execute(&f.chunks).unwrap();
            assert_eq!(summary.status(), Status::Succeeded);

            let seen: Vec<usize> = summary
                .results
                .iter()
                .map(|r| {
                    std::fs::read_to_string(&r.item.output)
                        .unwrap()
                        .trim()
                        .parse()
                        .unwrap()
                })
                .collect();
            for &n in &seen {
                assert!(n >= 1 && n <= max, "{n} running with a ceiling of {max}");
            }
            // the ceiling is also reached, not only respected
            assert_eq!(seen.iter().max(), Some(&max), "peak with a ceiling of {max}");
        }
    }

    #[test]
    fn failure_does_not_stop_other_chunks() {
        let f = fixture(5);
        let tool = script(
            &f.workspace.root,
            "tool.sh",
            indoc::indoc! {r#"
                case "$1" in
                  *chunk_3.fasta) echo "something went wrong" >&2; exit 3 ;;
                esac
                echo "done $1"
                "#},
        );

        let args = vec![String::from("--species=human")];
        let executor = Executor::new(&tool, args, 2, &f.workspace);
        let summary = executor.execute(&f.chunks).unwrap();

        assert_eq!(summary.results.len(), 5);
        assert_eq!(summary.status(), Status::Failed);

        let failed: Vec<&ExecutionResult> = summary.failures().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].item.index, 3);
        assert_eq!(failed[0].outcome, Outcome::Exited(3));
        assert!(failed[0].item.command_line().ends_with("chunk_3.fasta --species=human"));

        let log = std::fs::read_to_string(&failed[0].item.log).unwrap();
        assert_eq!(log.trim(), "something went wrong");

        // results come back in chunk order, each with its own output
        for (i, result) in summary.results.iter().enumerate() {
            assert_eq!(result.item.index, i + 1);
            assert!(result.finished_at >= result.started_at);
            if result.item.index != 3 {
                let out = std::fs::read_to_string(&result.item.output).unwrap();
                assert!(out.contains(&format!("chunk_{}.fasta", i + 1)));
            }
        }
    }

    #[test]
    fn commands_are_logged_in_order() {
        let f = fixture(3);
        let tool = script(&f.workspace.root, "tool.sh", "exit 0\n");

        let executor = Executor::new(&tool, vec![String::from("--gff3=on")], 1, &f.workspace);
        executor.execute(&f.chunks).unwrap();

        let log = std::fs::read_to_string(f.workspace.command_log()).unwrap();
        let expected: Vec<String> = f
            .chunks
            .iter()
            .map(|c| format!("{} {} --gff3=on", tool, c.path.display()))
            .collect();
        assert_eq!(log.lines().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn missing_tool_is_a_launch_failure() {
        let f = fixture(2);
        let executor = Executor::new("/nonexistent/augustus", vec![], 2, &f.workspace);
        let summary = executor.execute(&f.chunks).unwrap();

        assert_eq!(summary.status(), Status::Failed);
        assert_eq!(summary.failures().count(), 2);
        assert!(summary
            .results
            .iter()
            .all(|r| matches!(r.outcome, Outcome::LaunchFailed(_))));
    }

    #[test]
    fn nothing_to_run() {
        let f = fixture(0);
        let executor = Executor::new("augustus", vec![], 2, &f.workspace);
        let summary = executor.execute(&f.chunks).unwrap();

        assert!(summary.results.is_empty());
        assert_eq!(summary.status(), Status::Succeeded);
    }
}
