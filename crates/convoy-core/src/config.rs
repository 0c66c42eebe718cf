//! The `convoy.json` configuration file: names the repository set and the
//! external command lines the orchestrator shells out to.

use anyhow::{Context, Result};
use serde::Deserialize;

/// Configuration file name at the collection root.
pub const CONFIG_FILE: &str = "convoy.json";

/// Branch publishing is restricted to unless configured otherwise.
pub const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvoyConfig {
    /// Glob patterns (relative to the config file) selecting repository
    /// directories, e.g. `["repos/*"]`.
    pub repos: Vec<String>,

    /// Branch each repository must be on before publishing.
    #[serde(default = "default_branch")]
    pub required_branch: String,

    /// External command lines.
    #[serde(default)]
    pub commands: CommandsConfig,
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

/// External command lines as argv vectors (first element = program).
///
/// The publish and deploy defaults carry the argument that disables the
/// tool's internal build/rebuild; convoy runs builds itself during
/// pre-flight.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandsConfig {
    #[serde(default = "default_publish_command")]
    pub publish: Vec<String>,

    #[serde(default = "default_build_command")]
    pub build: Vec<String>,

    #[serde(default = "default_deploy_command")]
    pub deploy: Vec<String>,

    #[serde(default = "default_install_command")]
    pub install: Vec<String>,
}

fn default_publish_command() -> Vec<String> {
    vec!["changeset".into(), "publish".into(), "--no-build".into()]
}

fn default_build_command() -> Vec<String> {
    vec!["npm".into(), "run".into(), "build".into()]
}

fn default_deploy_command() -> Vec<String> {
    vec!["npm".into(), "run".into(), "deploy".into(), "--".into(), "--no-build".into()]
}

fn default_install_command() -> Vec<String> {
    vec!["npm".into(), "install".into()]
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            publish: default_publish_command(),
            build: default_build_command(),
            deploy: default_deploy_command(),
            install: default_install_command(),
        }
    }
}

/// Parse a config file's content.
pub fn parse_config(content: &str) -> Result<ConvoyConfig> {
    serde_json::from_str(content).context("Failed to parse convoy.json")
}
