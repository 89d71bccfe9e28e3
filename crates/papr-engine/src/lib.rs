//! Ties suite parsing, test environments, forges and publishers together:
//! the per-suite executor and the per-revision driver that fans out over
//! it.

mod driver;
mod error;
mod forge;
mod git;
mod github;
mod publisher;
mod revision;
mod site;
mod suite_run;

pub use driver::{DriverOutcome, RequiredSummary, RevisionDriver, RunRequest};
pub use error::{PaprError, Result};
pub use forge::{post_status_resilient, FakeForgeClient, ForgeClient, ForgeError, PostedStatus, StatusState};
pub use github::GithubForgeClient;
pub use publisher::{LocalPublisher, PublishError, Publisher};
pub use revision::{RefKind, Revision};
pub use site::{ExtraRepoConfig, GithubConfig, PublisherConfig, Site, SiteConfig};
pub use suite_run::{run_suite, SuiteRunInput, SuiteRunResult};
