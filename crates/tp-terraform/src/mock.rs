//! Mock runner and parser for testing: no process spawning, no filesystem.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tp_protocol::{
    OutputDetail, ProjectSnapshot, ProviderDetail, ResourceDetail, ResourceSection, Section,
    VariableDetail,
};

use crate::error::{TerraformError, TerraformResult};
use crate::parser::ProjectParser;
use crate::runner::{CommandResult, CommandRunner};

/// A recorded call to `MockRunner::run`.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub args: Vec<String>,
    pub timeout: Duration,
    pub stdin: Option<String>,
}

/// Command runner that records invocations and replays scripted results.
///
/// Results are consumed in FIFO order; once the queue is empty every call
/// succeeds with empty output.
pub struct MockRunner {
    working_dir: PathBuf,
    scripted: Mutex<VecDeque<(i32, String, String)>>,
    calls: Mutex<Vec<Invocation>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::in_dir(".")
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: dir.into(),
            scripted: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a result with the given exit code and output.
    pub fn push_result(&self, exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) {
        self.scripted
            .lock()
            .unwrap()
            .push_back((exit_code, stdout.into(), stderr.into()));
    }

    pub fn push_success(&self, stdout: impl Into<String>) {
        self.push_result(0, stdout, "");
    }

    /// Argument lists of every call so far.
    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().iter().map(|c| c.args.clone()).collect()
    }

    /// Full records, including timeout and stdin.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    async fn run(&self, args: &[String], timeout: Duration, stdin: Option<&str>) -> CommandResult {
        self.calls.lock().unwrap().push(Invocation {
            args: args.to_vec(),
            timeout,
            stdin: stdin.map(str::to_string),
        });
        let (code, stdout, stderr) = self
            .scripted
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((0, String::new(), String::new()));
        let command_line = std::iter::once("terraform".to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        CommandResult::new(code, stdout, stderr, command_line, Duration::from_millis(5))
    }
}

/// Parser returning a fixed snapshot and counting how often it was asked.
pub struct StaticParser {
    snapshot: ProjectSnapshot,
    parses: AtomicUsize,
    failing: AtomicBool,
}

impl StaticParser {
    pub fn new(snapshot: ProjectSnapshot) -> Self {
        Self {
            snapshot,
            parses: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Three resources (two `aws_instance`, one `aws_s3_bucket`), one
    /// variable, one output, one provider.
    pub fn with_sample_project() -> Self {
        let res = |ty: &str, name: &str, line| ResourceDetail {
            resource_type: ty.into(),
            name: name.into(),
            file_path: "main.tf".into(),
            line_number: line,
        };
        Self::new(ProjectSnapshot {
            resources: ResourceSection::new(vec![
                res("aws_instance", "web", 5),
                res("aws_instance", "worker", 12),
                res("aws_s3_bucket", "assets", 20),
            ]),
            variables: Section::new(vec![VariableDetail {
                name: "region".into(),
                var_type: Some("string".into()),
                description: Some("AWS region".into()),
                default: Some("us-east-1".into()),
                file_path: "variables.tf".into(),
                line_number: 1,
            }]),
            outputs: Section::new(vec![OutputDetail {
                name: "bucket_arn".into(),
                value: Some("aws_s3_bucket.assets.arn".into()),
                description: None,
                file_path: "outputs.tf".into(),
                line_number: 1,
            }]),
            providers: Section::new(vec![ProviderDetail {
                name: "aws".into(),
                alias: None,
                file_path: "main.tf".into(),
                line_number: 1,
            }]),
            ..Default::default()
        })
    }

    pub fn parse_count(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }

    /// Make subsequent parses fail with `ProjectNotFound`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl ProjectParser for StaticParser {
    fn parse(&self) -> TerraformResult<ProjectSnapshot> {
        self.parses.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(TerraformError::ProjectNotFound("mock".into()));
        }
        Ok(self.snapshot.clone())
    }
}
