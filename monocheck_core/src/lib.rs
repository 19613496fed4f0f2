pub mod archive;
pub mod campaign;
pub mod checker;
pub mod config;
pub mod deltadebug;
pub mod executor;
pub mod model;
pub mod option;
pub mod scheduler;
pub mod tool;
pub mod violation;

pub use archive::{ArchiveError, ArchiveRecord};
pub use campaign::{Campaign, CampaignError};
pub use checker::ViolationChecker;
pub use config::MonocheckConfig;
pub use deltadebug::{DeltaDebugError, DeltaDebugger, Probe, ProbeSettings, ReductionOutcome};
pub use executor::{CommandExecutor, CommandExecutorConfig, ExecutionStatus};
pub use model::{Configuration, FinishedJob, FuzzingJob, JobOutcome, Target};
pub use option::{Level, OptionSet, OrderError, PrecisionOrder, Rank, Relation, Tag};
pub use scheduler::{JobScheduler, JobState};
pub use tool::{Reader, ReaderError, RegistryError, Runner, ToolAdapter, ToolRegistry};
pub use violation::{DiffEdge, PotentialViolation, Violation, ViolationError, ViolationKind};
