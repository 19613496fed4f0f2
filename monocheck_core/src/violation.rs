use crate::model::FinishedJob;
use crate::option::Level;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Version written into every persisted [`Violation`]. Bumped whenever a field
/// changes meaning, so a probe never misreads a snapshot from another build.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum ViolationError {
    #[error("Violation I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Violation serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported violation snapshot version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    /// The more precise configuration reported units the less precise one did not.
    Precision,
    /// Like `Precision`, but the units are known to be true: the less precise
    /// configuration missed them.
    Soundness,
}

/// Identity of one expected difference inside an option comparison.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiffEdge {
    pub option: String,
    pub more_precise: Level,
    pub less_precise: Level,
    pub unit: String,
}

impl DiffEdge {
    pub fn save(&self, path: &Path) -> Result<(), ViolationError> {
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ViolationError> {
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }
}

/// Two finished runs whose results contradict the declared precision order.
///
/// `job1` always holds the side expected to be more precise, whatever order the
/// runs were produced in.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PotentialViolation {
    pub job1: FinishedJob,
    pub job2: FinishedJob,
    pub option: String,
    pub more_precise: Level,
    pub less_precise: Level,
    pub kind: ViolationKind,
    /// Units expected to be absent from `job1`'s results but present there.
    pub expected_diffs: BTreeSet<String>,
}

impl PotentialViolation {
    /// Stable, filesystem-safe name for this violation. The job digests cover
    /// target and tool, so violations of different targets never share a key.
    pub fn key(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            sanitize(&self.option),
            match self.kind {
                ViolationKind::Precision => "precision",
                ViolationKind::Soundness => "soundness",
            },
            sanitize(&self.job1.job.target.basename()),
            self.job1.job.digest(),
            self.job2.job.digest()
        )
    }

    pub fn expected_relation(&self) -> String {
        format!(
            "{}: {} is at least as precise as {}",
            self.option, self.more_precise, self.less_precise
        )
    }

    /// Every expected difference with its index in the ordered difference set.
    pub fn edges(&self) -> impl Iterator<Item = (usize, DiffEdge)> + '_ {
        self.expected_diffs.iter().enumerate().map(|(ix, unit)| {
            (ix, DiffEdge {
                option: self.option.clone(),
                more_precise: self.more_precise.clone(),
                less_precise: self.less_precise.clone(),
                unit: unit.clone(),
            })
        })
    }

    /// Same option, same two levels, same orientation.
    pub fn same_comparison(&self, other: &PotentialViolation) -> bool {
        self.option == other.option
            && self.more_precise == other.more_precise
            && self.less_precise == other.less_precise
    }

    /// Whether this violation still exhibits `edge`.
    pub fn contains_edge(&self, edge: &DiffEdge) -> bool {
        self.option == edge.option
            && self.more_precise == edge.more_precise
            && self.less_precise == edge.less_precise
            && self.expected_diffs.contains(&edge.unit)
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// A confirmed violation in its persisted form.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Violation {
    pub version: u32,
    #[serde(flatten)]
    pub violation: PotentialViolation,
}

impl Violation {
    pub fn confirm(violation: PotentialViolation) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            violation,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ViolationError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ViolationError> {
        let snapshot: Violation = serde_json::from_slice(&fs::read(path)?)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(ViolationError::UnsupportedVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{Configuration, FuzzingJob, Target};
    use std::path::PathBuf;

    pub(crate) fn finished(level: &str) -> FinishedJob {
        let configuration: Configuration =
            [("precision".to_string(), Level::from(level))].into_iter().collect();
        let job = FuzzingJob::new(
            Target::new("/benchmarks/app.jar", vec![PathBuf::from("/benchmarks/src")]),
            configuration,
            "fake",
        );
        FinishedJob::succeeded(job, 1.5, PathBuf::from(format!("/out/{level}.result")))
    }

    pub(crate) fn sample() -> PotentialViolation {
        PotentialViolation {
            job1: finished("high"),
            job2: finished("low"),
            option: "precision".to_string(),
            more_precise: "high".into(),
            less_precise: "low".into(),
            kind: ViolationKind::Precision,
            expected_diffs: ["extra:a", "extra:b"].into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn snapshot_survives_a_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/v.json");
        let violation = Violation::confirm(sample());
        violation.save(&path).unwrap();
        assert_eq!(Violation::load(&path).unwrap(), violation);

        let raw: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["option"], "precision");
        assert!(raw["job1"]["job"]["configuration"].is_object());
    }

    #[test]
    fn other_snapshot_versions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.json");
        let mut violation = Violation::confirm(sample());
        violation.version = 99;
        violation.save(&path).unwrap();
        assert!(matches!(
            Violation::load(&path),
            Err(ViolationError::UnsupportedVersion { found: 99, .. })
        ));
    }

    #[test]
    fn edges_are_indexed_in_order() {
        let edges: Vec<(usize, DiffEdge)> = sample().edges().collect();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].0, 0);
        assert_eq!(edges[1].1.unit, "extra:b");
        assert!(sample().contains_edge(&edges[1].1));
    }

    #[test]
    fn edge_identity_includes_the_comparison() {
        let v = sample();
        let (_, mut edge) = v.edges().next().unwrap();
        edge.less_precise = "medium".into();
        assert!(!v.contains_edge(&edge), "same unit in another comparison is a different edge");
    }

    #[test]
    fn key_is_filesystem_safe() {
        let mut v = sample();
        v.option = "heap/abstraction level".to_string();
        let key = v.key();
        assert!(key.starts_with("heap_abstraction_level_precision_app.jar_"), "{key}");
        assert!(!key.contains('/'));
    }

    #[test]
    fn key_separates_targets_with_one_basename() {
        let a = sample();
        let mut b = sample();
        for job in [&mut b.job1, &mut b.job2] {
            job.job.target = Target::new("/other/app.jar", vec![]);
        }
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key(), sample().key());
    }
}
