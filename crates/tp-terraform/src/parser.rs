//! Project parser interface and a regex-based `.tf` block scanner.
//!
//! The scanner is deliberately shallow: it finds top-level `resource`,
//! `data`, `variable`, `output`, `provider` and `module` blocks, records
//! their labels and header line, and picks up a handful of single-line
//! attributes (`type`, `description`, `default`, `value`, `alias`,
//! `source`). It does not evaluate HCL.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tp_protocol::{
    ModuleDetail, OutputDetail, ProjectSnapshot, ProviderDetail, ResourceDetail, ResourceSection,
    Section, VariableDetail,
};
use walkdir::WalkDir;

use crate::error::{TerraformError, TerraformResult};

/// Produces a snapshot of a project's configuration.
pub trait ProjectParser: Send + Sync {
    fn parse(&self) -> TerraformResult<ProjectSnapshot>;
}

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(resource|data|variable|output|provider|module)((?:\s+"[^"]*")+)\s*\{"#).unwrap()
});
static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""([^"]*)""#).unwrap());
static ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_-]*)\s*=\s*(.*?)\s*$").unwrap());
static STRING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""(?:[^"\\]|\\.)*""#).unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Resource,
    Data,
    Variable,
    Output,
    Provider,
    Module,
}

impl BlockKind {
    fn from_keyword(keyword: &str) -> Option<Self> {
        Some(match keyword {
            "resource" => Self::Resource,
            "data" => Self::Data,
            "variable" => Self::Variable,
            "output" => Self::Output,
            "provider" => Self::Provider,
            "module" => Self::Module,
            _ => return None,
        })
    }
}

#[derive(Debug)]
struct Block {
    kind: BlockKind,
    labels: Vec<String>,
    line: usize,
    attrs: HashMap<String, String>,
}

impl Block {
    fn label(&self, i: usize) -> String {
        self.labels.get(i).cloned().unwrap_or_default()
    }

    fn attr(&self, key: &str) -> Option<String> {
        self.attrs.get(key).cloned()
    }
}

/// Net `{`/`}` balance of a line, ignoring quoted strings and comments.
fn brace_delta(line: &str) -> i32 {
    let stripped = STRING_RE.replace_all(line, "\"\"");
    let code = match stripped.find('#').into_iter().chain(stripped.find("//")).min() {
        Some(i) => &stripped[..i],
        None => &stripped[..],
    };
    code.chars().fold(0, |acc, c| match c {
        '{' => acc + 1,
        '}' => acc - 1,
        _ => acc,
    })
}

fn clean_value(raw: &str) -> String {
    let raw = raw.trim().trim_end_matches(',');
    match raw {
        "{" => "{...}".to_string(),
        "[" => "[...]".to_string(),
        _ if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') => {
            raw[1..raw.len() - 1].to_string()
        }
        _ => raw.to_string(),
    }
}

fn scan_blocks(content: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut current: Option<Block> = None;
    let mut depth = 0i32;

    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') || trimmed.starts_with("//") {
            continue;
        }

        if depth == 0 {
            if let Some(caps) = HEADER_RE.captures(line) {
                if let Some(kind) = BlockKind::from_keyword(&caps[1]) {
                    let labels = LABEL_RE
                        .captures_iter(&caps[2])
                        .map(|c| c[1].to_string())
                        .collect();
                    current = Some(Block {
                        kind,
                        labels,
                        line: idx + 1,
                        attrs: HashMap::new(),
                    });
                }
            }
        } else if depth == 1 {
            if let (Some(block), Some(caps)) = (current.as_mut(), ATTR_RE.captures(line)) {
                block
                    .attrs
                    .entry(caps[1].to_string())
                    .or_insert_with(|| clean_value(&caps[2]));
            }
        }

        depth = (depth + brace_delta(line)).max(0);
        if depth == 0 {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
        }
    }

    // Unterminated block at EOF: keep what we saw.
    if let Some(block) = current {
        blocks.push(block);
    }
    blocks
}

/// Scans `*.tf` files under a directory (skipping `.terraform/`).
#[derive(Debug, Clone)]
pub struct HclScanner {
    root: PathBuf,
}

impl HclScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tf_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".terraform")
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable path");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tf"))
            .map(|e| e.into_path())
            .collect();
        files.sort();
        files
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

impl ProjectParser for HclScanner {
    fn parse(&self) -> TerraformResult<ProjectSnapshot> {
        if !self.root.is_dir() {
            return Err(TerraformError::ProjectNotFound(self.root.display().to_string()));
        }

        let mut resources = Vec::new();
        let mut data_sources = Vec::new();
        let mut variables = Vec::new();
        let mut outputs = Vec::new();
        let mut providers = Vec::new();
        let mut modules = Vec::new();

        let files = self.tf_files();
        for path in &files {
            let content = match std::fs::read_to_string(path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "failed to read .tf file");
                    continue;
                }
            };
            let file_path = self.relative(path);

            for block in scan_blocks(&content) {
                let line_number = block.line;
                let file_path = file_path.clone();
                match block.kind {
                    BlockKind::Resource | BlockKind::Data => {
                        let detail = ResourceDetail {
                            resource_type: block.label(0),
                            name: block.label(1),
                            file_path,
                            line_number,
                        };
                        if block.kind == BlockKind::Resource {
                            resources.push(detail);
                        } else {
                            data_sources.push(detail);
                        }
                    }
                    BlockKind::Variable => variables.push(VariableDetail {
                        name: block.label(0),
                        var_type: block.attr("type"),
                        description: block.attr("description"),
                        default: block.attr("default"),
                        file_path,
                        line_number,
                    }),
                    BlockKind::Output => outputs.push(OutputDetail {
                        name: block.label(0),
                        value: block.attr("value"),
                        description: block.attr("description"),
                        file_path,
                        line_number,
                    }),
                    BlockKind::Provider => providers.push(ProviderDetail {
                        name: block.label(0),
                        alias: block.attr("alias"),
                        file_path,
                        line_number,
                    }),
                    BlockKind::Module => modules.push(ModuleDetail {
                        name: block.label(0),
                        source: block.attr("source"),
                        file_path,
                        line_number,
                    }),
                }
            }
        }

        tracing::debug!(
            files = files.len(),
            resources = resources.len(),
            root = %self.root.display(),
            "project scanned"
        );

        Ok(ProjectSnapshot {
            resources: ResourceSection::new(resources),
            data_sources: ResourceSection::new(data_sources),
            variables: Section::new(variables),
            outputs: Section::new(outputs),
            providers: Section::new(providers),
            modules: Section::new(modules),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAIN_TF: &str = r#"
provider "aws" {
  region = "us-east-1"
}

provider "aws" {
  alias  = "west"
  region = "us-west-2"
}

# resource "aws_instance" "commented_out" {}

resource "aws_vpc" "main" {
  cidr_block = "10.0.0.0/16"
  tags = {
    Name = "main"
  }
}

resource "aws_instance" "web" {
  ami           = data.aws_ami.ubuntu.id
  instance_type = var.instance_type
  user_data     = "echo {not a brace}"
}

data "aws_ami" "ubuntu" {
  most_recent = true
}

module "network" {
  source = "./modules/network"
}
"#;

    const VARIABLES_TF: &str = r#"
variable "instance_type" {
  type        = string
  description = "EC2 instance size"
  default     = "t3.micro"
}

variable "empty" {}

output "vpc_id" {
  value       = aws_vpc.main.id
  description = "The VPC id"
}
"#;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.tf"), MAIN_TF).unwrap();
        std::fs::write(dir.path().join("variables.tf"), VARIABLES_TF).unwrap();
        std::fs::write(dir.path().join("README.md"), "resource \"x\" \"y\" {}").unwrap();
        let cached = dir.path().join(".terraform/modules");
        std::fs::create_dir_all(&cached).unwrap();
        std::fs::write(cached.join("vendored.tf"), "resource \"null_resource\" \"x\" {}").unwrap();
        dir
    }

    #[test]
    fn scans_resources_with_lines() {
        let dir = project();
        let snapshot = HclScanner::new(dir.path()).parse().unwrap();
        assert_eq!(snapshot.resources.count, 2);
        assert_eq!(snapshot.resources.by_type["aws_vpc"], 1);
        let web = &snapshot.resources.details[1];
        assert_eq!(web.resource_type, "aws_instance");
        assert_eq!(web.name, "web");
        assert_eq!(web.file_path, "main.tf");
        assert_eq!(web.line_number, 20);
    }

    #[test]
    fn scans_other_block_kinds() {
        let dir = project();
        let snapshot = HclScanner::new(dir.path()).parse().unwrap();
        assert_eq!(snapshot.data_sources.count, 1);
        assert_eq!(snapshot.modules.details[0].source.as_deref(), Some("./modules/network"));
        assert_eq!(snapshot.providers.count, 2);
        assert_eq!(snapshot.providers.details[1].alias.as_deref(), Some("west"));
        assert_eq!(snapshot.outputs.details[0].value.as_deref(), Some("aws_vpc.main.id"));
    }

    #[test]
    fn variable_attributes() {
        let dir = project();
        let snapshot = HclScanner::new(dir.path()).parse().unwrap();
        assert_eq!(snapshot.variables.count, 2);
        let it = &snapshot.variables.details[0];
        assert_eq!(it.var_type.as_deref(), Some("string"));
        assert_eq!(it.description.as_deref(), Some("EC2 instance size"));
        assert_eq!(it.default.as_deref(), Some("t3.micro"));
        assert_eq!(snapshot.variables.details[1].name, "empty");
    }

    #[test]
    fn nested_attributes_are_not_hoisted() {
        let blocks = scan_blocks(MAIN_TF);
        let vpc = blocks.iter().find(|b| b.label(1) == "main").unwrap();
        assert_eq!(vpc.attr("tags").as_deref(), Some("{...}"));
        assert!(vpc.attr("Name").is_none());
    }

    #[test]
    fn missing_directory_is_error() {
        let err = HclScanner::new("/nonexistent/terrapilot/project").parse().unwrap_err();
        assert!(matches!(err, TerraformError::ProjectNotFound(_)));
    }

    #[test]
    fn brace_delta_ignores_strings_and_comments() {
        assert_eq!(brace_delta(r#"resource "a" "b" {"#), 1);
        assert_eq!(brace_delta(r#"  x = "{{}" # }"#), 0);
        assert_eq!(brace_delta("}"), -1);
    }
}
