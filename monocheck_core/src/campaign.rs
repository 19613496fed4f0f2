use crate::model::{Configuration, FinishedJob, FuzzingJob, Target};
use crate::option::OptionSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Failed to access campaign file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed campaign file {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A batch of jobs to run together.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Campaign {
    pub jobs: Vec<FuzzingJob>,
}

impl Campaign {
    pub fn new(jobs: Vec<FuzzingJob>) -> Self {
        Self { jobs }
    }

    /// For every option and each of its registered levels, the configuration
    /// equal to `base` except for that option. Any two configurations of the
    /// same option therefore differ in exactly that option.
    ///
    /// Duplicates (a level equal to the base's) are generated only once.
    pub fn one_option_sweep(
        targets: &[Target],
        options: &OptionSet,
        base: &Configuration,
        tool: &str,
    ) -> Self {
        let mut seen = BTreeSet::new();
        let mut configurations = Vec::new();
        for (name, order) in options {
            for level in order.levels() {
                let configuration = base.with(name, level.clone());
                if seen.insert(configuration.digest()) {
                    configurations.push(configuration);
                }
            }
        }
        let jobs = targets
            .iter()
            .flat_map(|target| {
                configurations
                    .iter()
                    .map(move |c| FuzzingJob::new(target.clone(), c.clone(), tool))
            })
            .collect::<Vec<_>>();
        info!(
            targets = targets.len(),
            configurations = configurations.len(),
            jobs = jobs.len(),
            "generated campaign"
        );
        Self { jobs }
    }

    pub fn load(path: &Path) -> Result<Self, CampaignError> {
        load_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), CampaignError> {
        save_json(path, self)
    }
}

/// Finished jobs of a run, as stored next to the raw results.
pub fn load_finished(path: &Path) -> Result<Vec<FinishedJob>, CampaignError> {
    load_json(path)
}

pub fn save_finished(path: &Path, finished: &[FinishedJob]) -> Result<(), CampaignError> {
    save_json(path, &finished)
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CampaignError> {
    let bytes = fs::read(path).map_err(|source| CampaignError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| CampaignError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CampaignError> {
    let io_err = |source| CampaignError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| CampaignError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, bytes).map_err(io_err)
}
