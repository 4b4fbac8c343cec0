use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};

use obsd_builder::config::{self, Config};
use obsd_builder::lock::BuildLock;
use obsd_builder::{pipeline, preflight, probe, process};
use obsd_builder::{ActionLog, BuildError, BuildRequest, Target};

fn usage() -> &'static str {
    "Usage: obsd-builder [options]\n\
     \n\
     Targets:\n\
     \x20 --build <kernel|userland|release|site>  Part of OpenBSD to build (repeatable).\n\
     \x20 --update-cvs                            Checkout/update the local CVS checkout.\n\
     \n\
     Options:\n\
     \x20 --cvs-tag <TAG>        Tag to checkout/update, e.g. OPENBSD_6_1. Default: HEAD.\n\
     \x20 --cvs-server <HOST>    FQDN/IP of the anoncvs server.\n\
     \x20 --kernel <NAME>        Kernel configuration to build. Default: running kernel.\n\
     \x20 --arch <ARCH>          Machine architecture. Default: probed via uname -m.\n\
     \x20 --cpus <N>             Make job count. Default: probed CPU count.\n\
     \x20 --release-base <DIR>   Base directory where the release is staged.\n\
     \x20 --site-base <DIR>      Directory holding branch-versioned site trees.\n\
     \x20 --force                Continue past failing steps (notably checkflist).\n\
     \x20 -i, --interactive      Ask on each failing step whether to continue.\n\
     \x20 --config <FILE>        Explicit config file path.\n\
     \x20 -h, --help             Show this message."
}

#[derive(Debug, Default)]
struct CliArgs {
    help: bool,
    config: Option<PathBuf>,
    build: Vec<String>,
    update_cvs: bool,
    cvs_tag: Option<String>,
    cvs_server: Option<String>,
    kernel: Option<String>,
    arch: Option<String>,
    cpus: Option<usize>,
    force: bool,
    interactive: bool,
    release_base: Option<PathBuf>,
    site_base: Option<PathBuf>,
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> Result<CliArgs> {
    let mut args = CliArgs::default();
    let mut raw = raw.into_iter();

    while let Some(flag) = raw.next() {
        let mut value = |flag: &str| {
            raw.next()
                .with_context(|| format!("{flag} requires a value\n{}", usage()))
        };
        match flag.as_str() {
            "-h" | "--help" => args.help = true,
            "--build" => args.build.push(value("--build")?),
            "--update-cvs" => args.update_cvs = true,
            "--cvs-tag" => args.cvs_tag = Some(value("--cvs-tag")?),
            "--cvs-server" => args.cvs_server = Some(value("--cvs-server")?),
            "--kernel" => args.kernel = Some(value("--kernel")?),
            "--arch" => args.arch = Some(value("--arch")?),
            "--cpus" => {
                let raw_cpus = value("--cpus")?;
                let cpus: usize = raw_cpus
                    .parse()
                    .with_context(|| format!("invalid --cpus value '{raw_cpus}'"))?;
                if cpus == 0 {
                    bail!("--cpus must be at least 1");
                }
                args.cpus = Some(cpus);
            }
            "--force" => args.force = true,
            "-i" | "--interactive" => args.interactive = true,
            "--release-base" => args.release_base = Some(PathBuf::from(value("--release-base")?)),
            "--site-base" => args.site_base = Some(PathBuf::from(value("--site-base")?)),
            "--config" => args.config = Some(PathBuf::from(value("--config")?)),
            other => bail!("unknown option '{other}'\n{}", usage()),
        }
    }
    Ok(args)
}

fn into_request(args: CliArgs, config: Config) -> Result<BuildRequest> {
    let mut targets = Vec::new();
    if args.update_cvs {
        targets.push(Target::Sync);
    }
    for target in [
        ("kernel", Target::Kernel),
        ("userland", Target::Userland),
        ("release", Target::Release),
        ("site", Target::Site),
    ] {
        if args.build.iter().any(|requested| requested == target.0) {
            targets.push(target.1);
        }
    }
    for requested in &args.build {
        if !["kernel", "userland", "release", "site"].contains(&requested.as_str()) {
            bail!(
                "unknown build target '{requested}'; expected kernel, userland, release, or site"
            );
        }
    }

    Ok(BuildRequest {
        targets,
        kernel: args.kernel,
        arch: args.arch,
        cvs_tag: args.cvs_tag,
        cpus: args.cpus,
        force: args.force,
        interactive: args.interactive,
        cvs_server: args.cvs_server.unwrap_or(config.build.cvs_server),
        mirror: config.build.mirror,
        release_base: args.release_base.unwrap_or(config.build.release_base),
        site_base: args.site_base.or(config.build.site_base),
        source_root: config.build.source_root,
        obj_root: config.build.obj_root,
        tools: config.tools,
    })
}

fn run(log: &mut ActionLog) -> Result<()> {
    let args = parse_args(std::env::args().skip(1))?;
    if args.help {
        println!("{}", usage());
        return Ok(());
    }

    let config = config::load(args.config.as_deref())?;
    let request = into_request(args, config)?;
    log.record(format!("Requested targets: {:?}", request.targets));

    preflight::check_request_tools(&request)?;
    let _lock = BuildLock::acquire(&request.release_base)?;

    let facts = probe::probe(&request.tools, log)?;
    pipeline::run(&request, &facts, log)
}

fn main() -> ExitCode {
    process::install_interrupt_handler();

    let mut log = ActionLog::new();
    let code = match run(&mut log) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if matches!(
                err.downcast_ref::<BuildError>(),
                Some(BuildError::Interrupted)
            ) {
                ExitCode::SUCCESS
            } else {
                eprintln!("obsd-builder: {err:#}");
                eprintln!("Environment at time of failure:");
                for (key, value) in std::env::vars() {
                    eprintln!("  {key}={value}");
                }
                ExitCode::FAILURE
            }
        }
    };

    log.dump();
    code
}
