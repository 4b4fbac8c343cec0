//! Preflight checks for host tool availability.
//!
//! Validates that the external tools the selected targets will invoke
//! actually exist before any stage runs. This prevents a long build
//! dying halfway through on a missing binary.

use anyhow::{bail, Result};
use std::path::PathBuf;

use crate::pipeline::{BuildRequest, Target};

/// Check that every tool the request will invoke resolves to an
/// executable. Reports all missing tools at once.
pub fn check_request_tools(request: &BuildRequest) -> Result<()> {
    let mut missing = Vec::new();
    for tool in tools_for_request(request) {
        if which::which(&tool).is_err() {
            missing.push(tool);
        }
    }

    if !missing.is_empty() {
        let listing = missing
            .iter()
            .map(|tool| format!("  {}", tool.display()))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{listing}");
    }

    Ok(())
}

/// The tools a request will invoke, in stable order, deduplicated.
/// The probe tools are always needed.
fn tools_for_request(request: &BuildRequest) -> Vec<PathBuf> {
    let tools = &request.tools;
    let mut needed = vec![tools.sysctl.clone(), tools.uname.clone()];

    if request.wants(Target::Sync) {
        needed.push(tools.cvs.clone());
    }
    if request.wants(Target::Kernel) {
        needed.push(tools.kernel_config.clone());
        needed.push(tools.make.clone());
    }
    if request.wants(Target::Userland) {
        needed.push(tools.rm.clone());
        needed.push(tools.make.clone());
    }
    if request.wants(Target::Release) {
        needed.push(tools.rm.clone());
        needed.push(tools.mkdir.clone());
        needed.push(tools.make.clone());
        needed.push(tools.sh.clone());
        needed.push(tools.ls.clone());
    }

    let mut unique = Vec::new();
    for tool in needed {
        if !unique.contains(&tool) {
            unique.push(tool);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostTools;

    fn request_with_targets(targets: Vec<Target>) -> BuildRequest {
        BuildRequest {
            targets,
            kernel: None,
            arch: None,
            cvs_tag: None,
            cpus: None,
            force: false,
            interactive: false,
            cvs_server: "cvs.example.org".to_string(),
            mirror: "mirror.example.org".to_string(),
            release_base: PathBuf::from("/usr/release"),
            site_base: None,
            source_root: PathBuf::from("/usr/src"),
            obj_root: PathBuf::from("/usr/obj"),
            tools: HostTools::default(),
        }
    }

    #[test]
    fn kernel_target_needs_config_and_make() {
        let request = request_with_targets(vec![Target::Kernel]);
        let tools = tools_for_request(&request);
        assert!(tools.contains(&PathBuf::from("/usr/sbin/config")));
        assert!(tools.contains(&PathBuf::from("/usr/bin/make")));
        assert!(!tools.contains(&PathBuf::from("/usr/bin/cvs")));
    }

    #[test]
    fn missing_tool_is_reported_by_path() {
        let mut request = request_with_targets(vec![Target::Sync]);
        request.tools.cvs = PathBuf::from("/nonexistent/cvs");
        request.tools.sysctl = PathBuf::from("/bin/sh");
        request.tools.uname = PathBuf::from("/bin/sh");
        let err = check_request_tools(&request).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/cvs"));
    }
}
