use crate::model::FinishedJob;
use crate::option::{OptionSet, Relation};
use crate::tool::{LineReader, Reader, ReaderError};
use crate::violation::{PotentialViolation, Violation, ViolationError, ViolationKind};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Turns finished runs into verdicts against the declared precision orders.
///
/// Two runs are comparable when they analyzed the same target with the same
/// tool under configurations that differ in exactly one option, and that
/// option's order ranks one level strictly above the other. The more precise
/// run is expected to report a subset of the other run's units; every unit it
/// reports beyond that subset is an expected difference that did not hold.
pub struct ViolationChecker {
    options: OptionSet,
    reader: Arc<dyn Reader>,
    ground_truths: Option<BTreeSet<String>>,
}

impl ViolationChecker {
    pub fn new(options: OptionSet, reader: Arc<dyn Reader>) -> Self {
        Self {
            options,
            reader,
            ground_truths: None,
        }
    }

    /// Known-true units. Differences found among them are reported as
    /// [`ViolationKind::Soundness`], the rest as [`ViolationKind::Precision`].
    pub fn with_ground_truths(mut self, truths: BTreeSet<String>) -> Self {
        self.ground_truths = Some(truths);
        self
    }

    /// Reads a ground-truth file, one unit per line.
    pub fn load_ground_truths(path: &Path) -> Result<BTreeSet<String>, ReaderError> {
        LineReader.read(path)
    }

    /// Checks every comparable pair among `finished`.
    ///
    /// Runs without results are ignored, and a pair whose results cannot be
    /// read is skipped; neither stops the rest of the pass.
    pub fn check_violations(&self, finished: &[FinishedJob]) -> Vec<PotentialViolation> {
        let usable: Vec<&FinishedJob> = finished.iter().filter(|f| f.has_results()).collect();
        if usable.len() < finished.len() {
            debug!(
                skipped = finished.len() - usable.len(),
                "ignoring runs without results"
            );
        }

        let mut units: HashMap<usize, Option<BTreeSet<String>>> = HashMap::new();
        let mut violations = Vec::new();
        for i in 0..usable.len() {
            for j in (i + 1)..usable.len() {
                let Some((more, less, option)) = self.orient(usable[i], usable[j]) else {
                    continue;
                };
                let (more_ix, less_ix) = if std::ptr::eq(more, usable[i]) { (i, j) } else { (j, i) };
                let more_units = self.units(&mut units, more_ix, more);
                let less_units = self.units(&mut units, less_ix, less);
                let (Some(more_units), Some(less_units)) = (more_units, less_units) else {
                    continue;
                };
                violations.extend(self.compare_units(more, less, &option, &more_units, &less_units));
            }
        }
        info!(runs = usable.len(), violations = violations.len(), "checked runs");
        violations
    }

    /// Persists each violation as `<campaign_dir>/violations/<key>.json`.
    pub fn persist(
        violations: &[PotentialViolation],
        campaign_dir: &Path,
    ) -> Result<Vec<PathBuf>, ViolationError> {
        let dir = campaign_dir.join("violations");
        violations
            .iter()
            .map(|v| {
                let path = dir.join(format!("{}.json", v.key()));
                Violation::confirm(v.clone()).save(&path)?;
                Ok(path)
            })
            .collect()
    }

    /// Returns `(more precise, less precise, option)` for a comparable pair.
    fn orient<'a>(
        &self,
        a: &'a FinishedJob,
        b: &'a FinishedJob,
    ) -> Option<(&'a FinishedJob, &'a FinishedJob, String)> {
        if a.job.tool != b.job.tool || a.job.target != b.job.target {
            return None;
        }
        let differing = a.job.configuration.differing_options(&b.job.configuration);
        let [option] = differing.as_slice() else {
            return None;
        };
        let Some(order) = self.options.get(option) else {
            debug!(%option, "no precision order declared, pair not applicable");
            return None;
        };
        let (la, lb) = (a.job.configuration.get(option)?, b.job.configuration.get(option)?);
        match order.relation(la, lb) {
            Ok(Relation::MorePrecise) => Some((a, b, option.clone())),
            Ok(Relation::LessPrecise) => Some((b, a, option.clone())),
            Ok(Relation::Equal | Relation::Unrelated) => None,
            Err(e) => {
                warn!(error = %e, "cannot compare levels, skipping pair");
                None
            }
        }
    }

    fn units(
        &self,
        cache: &mut HashMap<usize, Option<BTreeSet<String>>>,
        ix: usize,
        job: &FinishedJob,
    ) -> Option<BTreeSet<String>> {
        cache
            .entry(ix)
            .or_insert_with(|| {
                let path = job.results_location.as_deref()?;
                match self.reader.read(path) {
                    Ok(units) => Some(units),
                    Err(e) => {
                        warn!(error = %e, "unreadable results, skipping pairs that use them");
                        None
                    }
                }
            })
            .clone()
    }

    fn compare_units(
        &self,
        more: &FinishedJob,
        less: &FinishedJob,
        option: &str,
        more_units: &BTreeSet<String>,
        less_units: &BTreeSet<String>,
    ) -> Vec<PotentialViolation> {
        let diffs: BTreeSet<String> = more_units.difference(less_units).cloned().collect();
        if diffs.is_empty() {
            return Vec::new();
        }
        let groups = match &self.ground_truths {
            Some(truths) => {
                let (sound, precise): (BTreeSet<String>, BTreeSet<String>) =
                    diffs.into_iter().partition(|u| truths.contains(u));
                vec![(ViolationKind::Soundness, sound), (ViolationKind::Precision, precise)]
            }
            None => vec![(ViolationKind::Precision, diffs)],
        };
        let (Some(more_level), Some(less_level)) = (
            more.job.configuration.get(option),
            less.job.configuration.get(option),
        ) else {
            return Vec::new();
        };
        groups
            .into_iter()
            .filter(|(_, units)| !units.is_empty())
            .map(|(kind, expected_diffs)| {
                info!(
                    %option, more = %more_level, less = %less_level, ?kind,
                    count = expected_diffs.len(), target = %more.job.target.basename(),
                    "violation found"
                );
                PotentialViolation {
                    job1: more.clone(),
                    job2: less.clone(),
                    option: option.to_string(),
                    more_precise: more_level.clone(),
                    less_precise: less_level.clone(),
                    kind,
                    expected_diffs,
                }
            })
            .collect()
    }
}
