//! The build pipeline.
//!
//! Stages run strictly in order: source sync, kernel, userland, release,
//! site provisioning. Everything is synchronous and single-threaded; the
//! only shared state is the [`ActionLog`] and the memoized
//! [`EnvironmentFacts`] threaded through each stage. The first fatal
//! failure halts the pipeline; whatever external side effects already
//! happened stay in place.

pub mod kernel;
pub mod release;
pub mod site;
pub mod source;
pub mod userland;

use std::path::PathBuf;

use anyhow::Result;

use crate::config::HostTools;
use crate::log::ActionLog;
use crate::probe::EnvironmentFacts;
use crate::process::{self, FailurePolicy};

/// One named phase of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Sync,
    Kernel,
    Userland,
    Release,
    Site,
}

/// The validated, immutable parameters of one run.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Requested targets, already in pipeline order.
    pub targets: Vec<Target>,
    /// Kernel configuration name; `None` means the running kernel.
    pub kernel: Option<String>,
    /// Machine architecture override; `None` means the probed arch.
    pub arch: Option<String>,
    /// CVS tag; `None` or `HEAD` means no tag filter.
    pub cvs_tag: Option<String>,
    /// Make job count override; `None` means the probed CPU count.
    pub cpus: Option<usize>,
    pub force: bool,
    pub interactive: bool,
    pub cvs_server: String,
    pub mirror: String,
    pub release_base: PathBuf,
    pub site_base: Option<PathBuf>,
    pub source_root: PathBuf,
    pub obj_root: PathBuf,
    pub tools: HostTools,
}

impl BuildRequest {
    pub fn wants(&self, target: Target) -> bool {
        self.targets.contains(&target)
    }

    /// The failure policy build-step commands run under. `--force` wins
    /// over `--interactive` when both are given.
    pub fn policy(&self) -> FailurePolicy {
        if self.force {
            FailurePolicy::ForceContinue
        } else if self.interactive {
            FailurePolicy::Interactive
        } else {
            FailurePolicy::FailFast
        }
    }

    /// Tag filter for cvs invocations. A requested `HEAD` means latest,
    /// i.e. no filter.
    pub fn tag_filter(&self) -> Option<&str> {
        self.cvs_tag.as_deref().filter(|tag| *tag != "HEAD")
    }

    pub fn jobs(&self, facts: &EnvironmentFacts) -> usize {
        self.cpus.unwrap_or(facts.cpu_count)
    }

    pub fn kernel_name<'a>(&'a self, facts: &'a EnvironmentFacts) -> &'a str {
        self.kernel.as_deref().unwrap_or(&facts.kernel_name)
    }

    pub fn machine_arch<'a>(&'a self, facts: &'a EnvironmentFacts) -> &'a str {
        self.arch.as_deref().unwrap_or(&facts.arch)
    }
}

/// Run every requested stage in pipeline order. An operator interrupt
/// is re-checked between stages so it ends the run even when it lands
/// during in-process work like tarball assembly.
pub fn run(request: &BuildRequest, facts: &EnvironmentFacts, log: &mut ActionLog) -> Result<()> {
    log.record("Build started.");

    if request.wants(Target::Sync) {
        process::abort_if_interrupted(log)?;
        source::sync(request, log)?;
    }
    if request.wants(Target::Kernel) {
        process::abort_if_interrupted(log)?;
        kernel::build(request, facts, log)?;
    }
    if request.wants(Target::Userland) {
        process::abort_if_interrupted(log)?;
        userland::build(request, facts, log)?;
    }
    if request.wants(Target::Release) {
        process::abort_if_interrupted(log)?;
        release::build(request, facts, log)?;
    }
    if request.wants(Target::Site) {
        process::abort_if_interrupted(log)?;
        site::provision(request, facts, log)?;
    }

    log.record("Build completed.");
    Ok(())
}
