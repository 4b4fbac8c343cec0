//! Wrapper for updating, building, and packaging OpenBSD releases.
//!
//! Keeps a local `/usr/src` checkout in sync over anoncvs, builds the
//! kernel and userland, stages installable release sets, and optionally
//! provisions a branch-versioned "site" package set from a mirror.
//!
//! # Architecture
//!
//! ```text
//! obsd-builder <flags>
//!     │
//!     ├── config    - defaults + TOML overrides, external tool paths
//!     ├── probe     - CPU count, kernel name, branch, arch (run once)
//!     ├── preflight - host tool validation before anything runs
//!     ├── lock      - one build at a time per release base
//!     └── pipeline  - sync → kernel → userland → release → site
//!             └── process::Cmd - every external command, with a
//!                 fail-fast / force-continue / interactive policy
//! ```
//!
//! Every attempted action lands in the [`ActionLog`], which is dumped in
//! full when the run ends, successfully or not.

pub mod config;
pub mod error;
pub mod lock;
pub mod log;
pub mod pipeline;
pub mod preflight;
pub mod probe;
pub mod process;

pub use error::BuildError;
pub use log::ActionLog;
pub use pipeline::{BuildRequest, Target};
pub use probe::{Branch, EnvironmentFacts};
pub use process::{Cmd, CmdOutcome, FailurePolicy};
