//! Agent configuration, loadable from TOML and overridden by environment.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::orchestrator::LoopSettings;
use crate::provider::openai::{
    LOCAL_GATEWAY_BASE_URL, LOCAL_GATEWAY_MODEL, OPENAI_BASE_URL, OPENAI_MODEL,
};
use crate::provider::{AnthropicConfig, OpenAiConfig};

/// Which model service backend to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Anthropic,
    Openai,
    /// Any endpoint speaking the OpenAI chat protocol (local gateways).
    OpenaiCompatible,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Openai => "openai",
            Self::OpenaiCompatible => "openai_compatible",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" => Ok(Self::Openai),
            "openai_compatible" | "local" | "ollama" => Ok(Self::OpenaiCompatible),
            other => Err(ConfigError::Invalid {
                key: "provider".into(),
                message: format!("unknown provider '{other}'"),
            }),
        }
    }
}

/// Terraform binary and project location.
#[derive(Debug, Clone, Deserialize)]
pub struct TerraformSettings {
    /// Binary name or path.
    #[serde(default = "default_terraform_path")]
    pub path: String,
    /// Project directory.
    #[serde(default = "default_terraform_dir")]
    pub dir: PathBuf,
    /// Workspace to select on startup.
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_snapshot_ttl")]
    pub snapshot_ttl_secs: u64,
}

fn default_terraform_path() -> String {
    "terraform".to_string()
}

fn default_terraform_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_command_timeout() -> u64 {
    300
}

fn default_snapshot_ttl() -> u64 {
    60
}

impl TerraformSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }
}

impl Default for TerraformSettings {
    fn default() -> Self {
        Self {
            path: default_terraform_path(),
            dir: default_terraform_dir(),
            workspace: None,
            command_timeout_secs: default_command_timeout(),
            snapshot_ttl_secs: default_snapshot_ttl(),
        }
    }
}

/// Loop tunables. `max_tokens` comes from the selected provider section.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestrationSettings {
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    #[serde(default = "default_true")]
    pub extended_thinking: bool,
    #[serde(default = "default_thinking_budget")]
    pub thinking_budget: u32,
    #[serde(default = "default_sample_resources")]
    pub sample_resources: usize,
}

fn default_max_tool_rounds() -> usize {
    8
}

fn default_thinking_budget() -> u32 {
    10_000
}

fn default_sample_resources() -> usize {
    10
}

fn default_true() -> bool {
    true
}

impl Default for OrchestrationSettings {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            extended_thinking: true,
            thinking_budget: default_thinking_budget(),
            sample_resources: default_sample_resources(),
        }
    }
}

/// Top-level configuration for the agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    /// Route high-risk tool calls through the approval gate.
    #[serde(default = "default_true")]
    pub human_in_the_loop: bool,
    #[serde(default = "default_true")]
    pub streaming: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default)]
    pub anthropic: AnthropicConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub openai_compatible: OpenAiConfig,
    #[serde(default)]
    pub terraform: TerraformSettings,
    #[serde(default)]
    pub orchestration: OrchestrationSettings,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            human_in_the_loop: true,
            streaming: true,
            log_level: default_log_level(),
            log_json: false,
            anthropic: AnthropicConfig::default(),
            openai: OpenAiConfig::default(),
            openai_compatible: OpenAiConfig::default(),
            terraform: TerraformSettings::default(),
            orchestration: OrchestrationSettings::default(),
        }
    }
}

impl AgentConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config.resolved())
    }

    /// File (when given) plus process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default().resolved(),
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay environment variables; `lookup` returns a variable's value.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("AI_PROVIDER") {
            self.provider = v.parse()?;
        }
        if let Some(v) = get("HUMAN_IN_THE_LOOP") {
            self.human_in_the_loop = parse_bool("HUMAN_IN_THE_LOOP", &v)?;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.log_level = v.to_lowercase();
        }
        if let Some(v) = get("MAX_TOOL_ROUNDS") {
            self.orchestration.max_tool_rounds = parse_num("MAX_TOOL_ROUNDS", &v)?;
        }

        if let Some(v) = get("ANTHROPIC_API_KEY") {
            self.anthropic.api_key = Some(v);
        }
        if let Some(v) = get("ANTHROPIC_MODEL") {
            self.anthropic.model = v;
        }
        if let Some(v) = get("ANTHROPIC_BASE_URL") {
            self.anthropic.base_url = v;
        }
        if let Some(v) = get("ANTHROPIC_MAX_TOKENS") {
            self.anthropic.max_tokens = parse_num("ANTHROPIC_MAX_TOKENS", &v)?;
        }

        if let Some(v) = get("OPENAI_API_KEY") {
            self.openai.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_COMPATIBLE_API_KEY") {
            self.openai_compatible.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_COMPATIBLE_MODEL") {
            self.openai_compatible.model = v;
        }
        if let Some(v) = get("OPENAI_COMPATIBLE_BASE_URL") {
            self.openai_compatible.base_url = v;
        }
        if let Some(v) = get("OPENAI_COMPATIBLE_MAX_TOKENS") {
            self.openai_compatible.max_tokens = parse_num("OPENAI_COMPATIBLE_MAX_TOKENS", &v)?;
        }

        if let Some(v) = get("TERRAFORM_PATH") {
            self.terraform.path = v;
        }
        if let Some(v) = get("TERRAFORM_DIR") {
            self.terraform.dir = PathBuf::from(v);
        }
        Ok(())
    }

    /// Fatal startup checks: binary on PATH, project directory present,
    /// credentials for the selected provider.
    pub fn validate(&self) -> Result<(), ConfigError> {
        which::which(&self.terraform.path)
            .map_err(|e| ConfigError::BinaryNotFound(format!("{}: {e}", self.terraform.path)))?;
        if !self.terraform.dir.is_dir() {
            return Err(ConfigError::Invalid {
                key: "terraform.dir".into(),
                message: format!("{} is not a directory", self.terraform.dir.display()),
            });
        }
        if self.orchestration.max_tool_rounds == 0 {
            return Err(ConfigError::Invalid {
                key: "orchestration.max_tool_rounds".into(),
                message: "must be at least 1".into(),
            });
        }
        self.validate_credentials()
    }

    fn validate_credentials(&self) -> Result<(), ConfigError> {
        let missing = |key: &Option<String>| key.as_deref().is_none_or(|k| k.trim().is_empty());
        match self.provider {
            ProviderKind::Anthropic if missing(&self.anthropic.api_key) => {
                Err(ConfigError::MissingCredential {
                    provider: "anthropic",
                    variable: "ANTHROPIC_API_KEY",
                })
            }
            ProviderKind::Openai if missing(&self.openai.api_key) => {
                Err(ConfigError::MissingCredential {
                    provider: "openai",
                    variable: "OPENAI_API_KEY",
                })
            }
            _ => Ok(()),
        }
    }

    /// Loop settings with the token limit of the selected provider.
    pub fn loop_settings(&self) -> LoopSettings {
        let max_tokens = match self.provider {
            ProviderKind::Anthropic => self.anthropic.max_tokens,
            ProviderKind::Openai => self.openai.max_tokens,
            ProviderKind::OpenaiCompatible => self.openai_compatible.max_tokens,
        };
        LoopSettings {
            max_tool_rounds: self.orchestration.max_tool_rounds,
            max_tokens,
            extended_thinking: self.orchestration.extended_thinking,
            thinking_budget: self.orchestration.thinking_budget,
            sample_resources: self.orchestration.sample_resources,
        }
    }

    fn resolved(mut self) -> Self {
        self.openai = self.openai.or_defaults(OPENAI_MODEL, OPENAI_BASE_URL);
        self.openai_compatible = self
            .openai_compatible
            .or_defaults(LOCAL_GATEWAY_MODEL, LOCAL_GATEWAY_BASE_URL);
        self
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        message: format!("expected a number, got '{value}'"),
    })
}
