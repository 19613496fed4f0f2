use crate::option::{Level, OptionSet, OrderError, PrecisionOrder, Tag};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "monocheck.toml";

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CampaignSettings {
    #[serde(default = "default_campaign_dir")]
    pub directory: PathBuf,
    #[serde(default = "default_benchmarks_dir")]
    pub benchmarks_dir: PathBuf,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

pub fn default_campaign_dir() -> PathBuf {
    PathBuf::from("./campaign")
}

pub fn default_benchmarks_dir() -> PathBuf {
    PathBuf::from("./benchmarks")
}

/// One worker per side of a comparison.
pub fn default_workers() -> usize {
    2
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            directory: default_campaign_dir(),
            benchmarks_dir: default_benchmarks_dir(),
            workers: default_workers(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct DeltaDebugSettings {
    #[serde(default = "default_shrinker_command")]
    pub shrinker_command: Vec<String>,
    #[serde(default = "default_shrinker_flags")]
    pub shrinker_flags: Vec<String>,
    #[serde(default = "default_shrinker_timeout_secs")]
    pub shrinker_timeout_secs: u64,
    #[serde(default = "default_probe_program")]
    pub probe_program: String,
    #[serde(default = "default_build_command")]
    pub build_command: String,
}

fn default_shrinker_command() -> Vec<String> {
    vec![
        "java".to_string(),
        "-jar".to_string(),
        "/SADeltaDebugger/ViolationDeltaDebugger/target/ViolationDeltaDebugger-1.0-SNAPSHOT-jar-with-dependencies.jar"
            .to_string(),
    ]
}

fn default_shrinker_flags() -> Vec<String> {
    vec!["--hdd".to_string(), "--class-reduction".to_string()]
}

fn default_shrinker_timeout_secs() -> u64 {
    120
}

fn default_probe_program() -> String {
    "deltadebugger".to_string()
}

fn default_build_command() -> String {
    "mvn compile package".to_string()
}

impl Default for DeltaDebugSettings {
    fn default() -> Self {
        Self {
            shrinker_command: default_shrinker_command(),
            shrinker_flags: default_shrinker_flags(),
            shrinker_timeout_secs: default_shrinker_timeout_secs(),
            probe_program: default_probe_program(),
            build_command: default_build_command(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct PrecisionEdge {
    pub more: Level,
    pub less: Level,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct OptionSettings {
    pub levels: Vec<Level>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Declared in order; each entry reads "`more` is at least as precise as `less`".
    #[serde(default)]
    pub precision: Vec<PrecisionEdge>,
}

impl OptionSettings {
    pub fn build(&self, name: &str) -> Result<PrecisionOrder, OrderError> {
        let mut order = PrecisionOrder::new(name);
        for level in &self.levels {
            order.add_level(level);
        }
        for tag in &self.tags {
            order.add_tag(*tag);
        }
        for edge in &self.precision {
            order.declare_at_least_as_precise(&edge.more, &edge.less)?;
        }
        Ok(order)
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReaderKind {
    #[default]
    Lines,
    DoopCallgraph,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TaskSettings {
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub reader: ReaderKind,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ToolSettings {
    pub command: Vec<String>,
    pub input_flag: Option<String>,
    /// Without an output flag the tool's stdout becomes the results file.
    pub output_flag: Option<String>,
    #[serde(default = "default_option_format")]
    pub option_format: String,
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
    pub whole_program_flag: Option<String>,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskSettings>,
}

pub fn default_option_format() -> String {
    "--{option}={value}".to_string()
}

pub fn default_tool_timeout_secs() -> u64 {
    3600
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct MonocheckConfig {
    #[serde(default)]
    pub campaign: CampaignSettings,
    #[serde(default)]
    pub delta_debug: DeltaDebugSettings,
    #[serde(default)]
    pub options: BTreeMap<String, OptionSettings>,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolSettings>,
}

impl MonocheckConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: MonocheckConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }

    /// Loads `explicit` if given, else `monocheck.toml` in the working
    /// directory if present, else the built-in defaults. Also returns the path
    /// that was loaded.
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), anyhow::Error> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default_path.exists() {
                    debug!("no {DEFAULT_CONFIG_FILE} found, using built-in defaults");
                    return Ok((Self::default(), None));
                }
                default_path
            }
        };
        debug!(?path, "loading configuration");
        Ok((Self::load_from_file(&path)?, Some(path)))
    }

    /// Builds every configured option's precision order.
    /// A contradictory declaration in any option fails the whole load.
    pub fn option_set(&self) -> Result<OptionSet, OrderError> {
        self.options
            .iter()
            .map(|(name, settings)| Ok((name.clone(), settings.build(name)?)))
            .collect()
    }
}
