//! Kernel build and install.
//!
//! Four fixed steps against the arch/kernel-config compile directory:
//! regenerate the build configuration, clean, compile, install. Each
//! step runs under the request's failure policy; the first fatal
//! failure aborts the stage.

use anyhow::Result;

use crate::log::ActionLog;
use crate::pipeline::BuildRequest;
use crate::probe::EnvironmentFacts;
use crate::process::Cmd;

pub fn build(request: &BuildRequest, facts: &EnvironmentFacts, log: &mut ActionLog) -> Result<()> {
    let kernel = request.kernel_name(facts);
    let arch = request.machine_arch(facts);
    let jobs = format!("-j{}", request.jobs(facts));
    let policy = request.policy();

    log.record(format!("Building kernel {kernel} for {arch}"));

    let conf_dir = request
        .source_root
        .join("sys/arch")
        .join(arch)
        .join("conf");
    Cmd::new(&request.tools.kernel_config)
        .arg(kernel)
        .current_dir(&conf_dir)
        .policy(policy)
        .run(log)?;

    let compile_dir = request
        .source_root
        .join("sys/arch")
        .join(arch)
        .join("compile")
        .join(kernel);

    Cmd::new(&request.tools.make)
        .arg(&jobs)
        .arg("clean")
        .current_dir(&compile_dir)
        .policy(policy)
        .run(log)?;

    Cmd::new(&request.tools.make)
        .arg(&jobs)
        .current_dir(&compile_dir)
        .policy(policy)
        .run(log)?;

    Cmd::new(&request.tools.make)
        .arg(&jobs)
        .arg("install")
        .current_dir(&compile_dir)
        .policy(policy)
        .run(log)?;

    log.record("Kernel build complete.");
    Ok(())
}
