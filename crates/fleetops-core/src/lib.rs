//! Fleetops core library
//!
//! Orchestrates configuration rollouts, manifest comparisons and CI runs
//! across a fleet of repositories hosted on a VCS+CI platform. The platform
//! is reached only through the [`RepoGateway`] trait.

pub mod branches;
pub mod comparator;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fakes;
pub mod gateway;
pub mod manifest;
pub mod pipeline;
pub mod registry;
pub mod replacer;
pub mod run_log;
pub mod telemetry;
pub mod templates;
pub mod workflow;

pub use branches::{BranchManager, BranchOutcome};
pub use comparator::{Comparison, FleetComparison, ManifestComparator, ServiceComparison};
pub use config::{FleetConfig, DEFAULT_CONFIG_PATH};
pub use coordinator::{FanOut, FanOutReport, OperationResult, Pacer};
pub use error::{FleetError, GatewayError, Result};
pub use gateway::{
    FileWrite, GatewayResult, Job, RemoteFile, RepoGateway, RunConclusion, RunHandle, RunStatus,
    Step, WorkflowRun,
};
pub use manifest::{Dependency, ManifestDiff, ManifestSnapshot};
pub use pipeline::{AutomationPipeline, AutomationReport, AutomationRequest, Stage};
pub use registry::{FleetRegistry, Service, ServiceGroup};
pub use replacer::ConfigReplacer;
pub use telemetry::init_tracing;
pub use templates::{TemplateKey, TemplateStore};
pub use workflow::{DispatchSession, ExtractedLog, RunPhase, WorkflowOrchestrator};
