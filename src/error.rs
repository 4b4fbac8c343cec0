//! Build error taxonomy.
//!
//! Every fatal condition the pipeline can hit is a [`BuildError`] variant.
//! Stages return `anyhow::Result` for context chaining, but the typed
//! variants stay downcastable so the binary can decide the exit status
//! (an interrupted run is not a failure) and tests can assert on the
//! exact failure class.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    /// The external command could not be launched at all (missing binary,
    /// permission denied). Never suppressed by any failure policy.
    #[error("failed to launch '{command}': {source}")]
    ExecutionStart {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The external command launched but exited non-zero.
    #[error("command '{command}' failed with {status}")]
    CommandFailure { command: String, status: ExitStatus },

    /// Neither the checkout directory nor its parent is writable.
    #[error("not enough write permissions to checkout/update sources under '{}'", .path.display())]
    InsufficientPermissions { path: PathBuf },

    /// The requested CVS tag conflicts with what is already checked out.
    /// Upgrading across versions via source is not supported.
    #[error("requested tag '{requested}' does not match local checkout tag '{checked_out}'")]
    TagMismatch {
        requested: String,
        checked_out: String,
    },

    /// A host probe returned output that does not parse.
    #[error("unable to parse {what} from probe output: '{output}'")]
    InvalidEnvironmentData {
        what: &'static str,
        output: String,
    },

    /// `uname -r` did not look like a dotted major.minor release.
    #[error("unable to determine running branch, expected format \\d+.\\d+: '{output}'")]
    UnrecognizedBranchFormat { output: String },

    /// The package mirror listing could not be fetched or parsed.
    #[error("package listing unavailable from '{url}': {reason}")]
    PackageListUnavailable { url: String, reason: String },

    /// Site provisioning was requested without a configured site base.
    #[error("site provisioning requested but no site base is configured")]
    MissingSiteBase,

    /// The operator interrupted the run. Not a failure; the binary exits
    /// cleanly after dumping the action log.
    #[error("build interrupted by user")]
    Interrupted,
}
