//! Host environment probes.
//!
//! Derives the facts later stages template into commands: CPU count,
//! running kernel name, running OS branch, and hardware architecture.
//! Each probe is one external query run through [`Cmd`] with output
//! capture and fail-fast policy; all four run once at startup and the
//! results are immutable for the rest of the run.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::HostTools;
use crate::error::BuildError;
use crate::log::ActionLog;
use crate::process::Cmd;

static BRANCH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+$").expect("branch pattern is valid"));

/// Dotted major.minor release identifier of the running OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    dotted: String,
}

impl Branch {
    /// Parse `uname -r` output. Anything that is not `\d+.\d+` fails.
    pub fn parse(raw: &str) -> Result<Self, BuildError> {
        let trimmed = raw.trim();
        if !BRANCH_RE.is_match(trimmed) {
            return Err(BuildError::UnrecognizedBranchFormat {
                output: raw.to_string(),
            });
        }
        Ok(Self {
            dotted: trimmed.to_string(),
        })
    }

    /// Dotted form, e.g. `6.1`.
    pub fn dotted(&self) -> &str {
        &self.dotted
    }

    /// Digits-only form for filenames, e.g. `61`.
    pub fn digits(&self) -> String {
        self.dotted.replace('.', "")
    }
}

/// Facts about the running host, memoized for the whole run.
#[derive(Debug, Clone)]
pub struct EnvironmentFacts {
    pub cpu_count: usize,
    pub kernel_name: String,
    pub branch: Branch,
    pub arch: String,
}

/// Run all probes once and collect the results.
pub fn probe(tools: &HostTools, log: &mut ActionLog) -> Result<EnvironmentFacts, BuildError> {
    let raw_cpus = Cmd::new(&tools.sysctl)
        .args(["-n", "hw.ncpu"])
        .run_capture(log)?;
    let cpu_count = parse_cpu_count(&raw_cpus)?;

    let raw_version = Cmd::new(&tools.uname).arg("-v").run_capture(log)?;
    let kernel_name = kernel_name_from_version(&raw_version);

    let raw_release = Cmd::new(&tools.uname).arg("-r").run_capture(log)?;
    let branch = Branch::parse(&raw_release)?;
    log.record(format!("Branch found to be {}.", branch.dotted()));

    let arch = Cmd::new(&tools.uname).arg("-m").run_capture(log)?;

    Ok(EnvironmentFacts {
        cpu_count,
        kernel_name,
        branch,
        arch,
    })
}

/// Parse `sysctl -n hw.ncpu` output.
pub fn parse_cpu_count(raw: &str) -> Result<usize, BuildError> {
    let count: usize = raw
        .trim()
        .parse()
        .map_err(|_| BuildError::InvalidEnvironmentData {
            what: "cpu count",
            output: raw.to_string(),
        })?;
    if count == 0 {
        return Err(BuildError::InvalidEnvironmentData {
            what: "cpu count",
            output: raw.to_string(),
        });
    }
    Ok(count)
}

/// Extract the kernel name from `uname -v` output; the build number
/// after `#` is discarded.
pub fn kernel_name_from_version(raw: &str) -> String {
    raw.split('#').next().unwrap_or(raw).trim().to_string()
}
