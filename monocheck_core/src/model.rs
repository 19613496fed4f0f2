use crate::option::Level;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// An immutable assignment of levels to options.
///
/// Backed by a `BTreeMap` so iteration, equality, hashing and the serialized
/// form are all independent of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration(BTreeMap<String, Level>);

impl Configuration {
    pub fn new(entries: BTreeMap<String, Level>) -> Self {
        Self(entries)
    }

    pub fn get(&self, option: &str) -> Option<&Level> {
        self.0.get(option)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Level)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A copy of this configuration with `option` set to `level`.
    pub fn with(&self, option: &str, level: Level) -> Self {
        let mut entries = self.0.clone();
        entries.insert(option.to_string(), level);
        Self(entries)
    }

    /// Names of options whose levels differ between the two configurations.
    /// An option set on only one side counts as differing.
    pub fn differing_options(&self, other: &Configuration) -> Vec<String> {
        let mut names: Vec<String> = self
            .0
            .iter()
            .filter(|(k, v)| other.0.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect();
        names.extend(
            other
                .0
                .keys()
                .filter(|k| !self.0.contains_key(*k))
                .cloned(),
        );
        names
    }

    /// Stable hex digest of the configuration.
    pub fn digest(&self) -> String {
        json_digest(&self.0)
    }
}

/// md5 of the JSON rendering. Every map on the way down is a `BTreeMap`, so
/// the text is canonical.
fn json_digest<T: Serialize>(value: &T) -> String {
    let canonical = serde_json::to_string(value).unwrap_or_default();
    format!("{:x}", md5::compute(canonical.as_bytes()))
}

impl FromIterator<(String, Level)> for Configuration {
    fn from_iter<T: IntoIterator<Item = (String, Level)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A benchmark program under analysis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Path of the artifact handed to the analysis tool.
    pub name: PathBuf,
    pub sources: Vec<PathBuf>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub build_script: Option<PathBuf>,
}

impl Target {
    pub fn new(name: impl Into<PathBuf>, sources: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            sources,
            depends_on: Vec::new(),
            build_script: None,
        }
    }

    pub fn basename(&self) -> String {
        self.name
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.to_string_lossy().into_owned())
    }

    /// Rewrites every path under `from` to live under `to` instead.
    /// Paths outside `from` are left as they are.
    pub fn relocated(&self, from: &Path, to: &Path) -> Self {
        let move_path = |p: &Path| match p.strip_prefix(from) {
            Ok(rest) => to.join(rest),
            Err(_) => p.to_path_buf(),
        };
        Self {
            name: move_path(self.name.as_path()),
            sources: self.sources.iter().map(|s| move_path(s.as_path())).collect(),
            depends_on: self.depends_on.clone(),
            build_script: self.build_script.as_deref().map(|p| move_path(p)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FuzzingJob {
    pub target: Target,
    pub configuration: Configuration,
    pub tool: String,
}

impl FuzzingJob {
    pub fn new(target: Target, configuration: Configuration, tool: impl Into<String>) -> Self {
        Self {
            target,
            configuration,
            tool: tool.into(),
        }
    }

    /// Stable hex digest over the target, configuration and tool.
    pub fn digest(&self) -> String {
        json_digest(self)
    }

    /// File name the job's raw results are written to. Distinct for any two
    /// jobs, including targets that share a basename.
    pub fn result_file_name(&self) -> String {
        format!("{}_{}.result", self.digest(), self.target.basename())
    }
}

/// How a job's run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobOutcome {
    Succeeded,
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishedJob {
    pub job: FuzzingJob,
    /// Wall-clock seconds.
    pub execution_time: f64,
    /// `None` when the tool failed or timed out.
    pub results_location: Option<PathBuf>,
    pub outcome: JobOutcome,
}

impl FinishedJob {
    pub fn succeeded(job: FuzzingJob, execution_time: f64, results: PathBuf) -> Self {
        Self {
            job,
            execution_time,
            results_location: Some(results),
            outcome: JobOutcome::Succeeded,
        }
    }

    pub fn failed(job: FuzzingJob, execution_time: f64, outcome: JobOutcome) -> Self {
        Self {
            job,
            execution_time,
            results_location: None,
            outcome,
        }
    }

    pub fn has_results(&self) -> bool {
        self.results_location.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, Level)]) -> Configuration {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn digest_ignores_insertion_order() {
        let a = config(&[("x", "1".into()), ("y", Level::Number(2))]);
        let b = config(&[("y", Level::Number(2)), ("x", "1".into())]);
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), a.with("x", "2".into()).digest());
    }

    #[test]
    fn differing_options_reports_both_sides() {
        let a = config(&[("x", "lo".into()), ("y", "same".into())]);
        let b = config(&[("x", "hi".into()), ("y", "same".into()), ("z", "extra".into())]);
        let mut diff = a.differing_options(&b);
        diff.sort();
        assert_eq!(diff, vec!["x".to_string(), "z".to_string()]);
        assert!(a.differing_options(&a).is_empty());
    }

    #[test]
    fn relocated_moves_only_paths_under_prefix() {
        let mut target = Target::new(
            "/benchmarks/app/app.jar",
            vec![PathBuf::from("/benchmarks/app/src"), PathBuf::from("/elsewhere/lib")],
        );
        target.build_script = Some(PathBuf::from("/benchmarks/app/build.sh"));
        let moved = target.relocated(Path::new("/benchmarks"), Path::new("/tmp/dd/benchmarks"));
        assert_eq!(moved.name, PathBuf::from("/tmp/dd/benchmarks/app/app.jar"));
        assert_eq!(moved.sources[0], PathBuf::from("/tmp/dd/benchmarks/app/src"));
        assert_eq!(moved.sources[1], PathBuf::from("/elsewhere/lib"));
        assert_eq!(
            moved.build_script,
            Some(PathBuf::from("/tmp/dd/benchmarks/app/build.sh"))
        );
        assert_eq!(target.name, PathBuf::from("/benchmarks/app/app.jar"));
    }

    #[test]
    fn target_requires_sources_field() {
        let missing = serde_json::from_str::<Target>(r#"{"name": "a.jar"}"#);
        assert!(missing.is_err(), "sources must be given explicitly");
        let ok: Target = serde_json::from_str(r#"{"name": "a.jar", "sources": []}"#).unwrap();
        assert!(ok.depends_on.is_empty());
        assert_eq!(ok.build_script, None);
    }

    #[test]
    fn result_file_name_uses_digest_and_basename() {
        let job = FuzzingJob::new(
            Target::new("/b/app.jar", vec![]),
            config(&[("x", "1".into())]),
            "doop",
        );
        let name = job.result_file_name();
        assert!(name.ends_with("_app.jar.result"), "{name}");
        assert!(name.starts_with(&job.digest()));
        assert_eq!(name, job.clone().result_file_name(), "stable across calls");
    }

    #[test]
    fn same_basename_targets_get_distinct_result_files() {
        let configuration = config(&[("x", "1".into())]);
        let a = FuzzingJob::new(Target::new("/bench/a/app.jar", vec![]), configuration.clone(), "doop");
        let b = FuzzingJob::new(Target::new("/bench/b/app.jar", vec![]), configuration.clone(), "doop");
        assert_eq!(a.target.basename(), b.target.basename());
        assert_ne!(a.result_file_name(), b.result_file_name());

        let other_tool = FuzzingJob::new(a.target.clone(), configuration, "wala");
        assert_ne!(a.result_file_name(), other_tool.result_file_name());
    }
}
