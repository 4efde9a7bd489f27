pub mod archive;
pub mod config;
pub mod db;
pub mod deploy;
pub mod detect;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod project;
pub mod reaper;
pub mod runtime;
pub mod sandbox;
pub mod sanitize;
pub mod secrets;
pub mod storage;
pub mod viewer;

pub use archive::{ArchiveFormat, ExtractError, ExtractSummary};
pub use config::{load_config, RuntimeConfig};
pub use db::{Database, DatabaseError};
pub use deploy::{DeployOutcome, DeploymentEngine, ProjectLocks};
pub use detect::{detect, Detection, Runtime};
pub use engine::{ComposeEngine, ContainerEngine, EngineOutput, EngineScope};
pub use error::{ConfigError, LabdockError, Result, RuntimeError, StorageError};
pub use manifest::{Manifest, ProjectNames};
pub use project::{DeploymentState, Lab, Project, ProjectStatus, ProjectStore, WorkloadType};
pub use reaper::{DeploymentSweepReport, IdleReaper, ReaperScheduler};
pub use runtime::RuntimeCore;
pub use sandbox::SandboxError;
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use storage::{FsObjectStore, HttpObjectStore, ObjectStore};
pub use viewer::{CacheSweepReport, FileContent, ProjectTree, ViewerCache};
