//! External compressor/decompressor subprocess plumbing.
//!
//! The container stream is piped through a separate OS process; the pipe
//! buffer provides the backpressure between the core and the process. The
//! process specification is configuration, not correctness: any filter that
//! reads stdin and writes stdout works.

use crate::error::{DumpError, Result};
use serde::Deserialize;
use std::fs::File;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use tracing::debug;

/// External streaming compressor specification.
///
/// Overridable from host configuration; unknown keys are rejected. The
/// default is `xz` with multi-thread support.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Compressor {
    /// Executable spawned for both directions.
    pub program: String,
    /// Arguments for the compress direction (stdin → stdout).
    #[serde(default)]
    pub compress_args: Vec<String>,
    /// Arguments for the decompress direction; the archive path is appended.
    #[serde(default)]
    pub decompress_args: Vec<String>,
    /// Archive file suffix, e.g. `tar.xz`.
    pub suffix: String,
    /// Flag the thread count is appended to when one is requested,
    /// e.g. `-T` producing `-T4`.
    #[serde(default)]
    pub threads_flag: Option<String>,
}

impl Default for Compressor {
    fn default() -> Self {
        Self::xz()
    }
}

impl Compressor {
    /// `xz` streaming compression, the production default.
    pub fn xz() -> Self {
        Self {
            program: "xz".to_string(),
            compress_args: vec!["--compress".to_string(), "--stdout".to_string()],
            decompress_args: vec!["--decompress".to_string(), "--stdout".to_string()],
            suffix: "tar.xz".to_string(),
            threads_flag: Some("-T".to_string()),
        }
    }

    /// Passthrough pseudo-compressor producing a plain tar. Used by the
    /// test suite and for inspecting archive contents.
    pub fn identity() -> Self {
        Self {
            program: "cat".to_string(),
            compress_args: Vec::new(),
            decompress_args: Vec::new(),
            suffix: "tar".to_string(),
            threads_flag: None,
        }
    }

    fn compress_command(&self, threads: Option<u32>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.compress_args);
        if let (Some(flag), Some(n)) = (&self.threads_flag, threads) {
            cmd.arg(format!("{flag}{n}"));
        }
        cmd
    }

    fn decompress_command(&self, archive: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.decompress_args);
        cmd.arg(archive);
        cmd
    }

    /// Spawn the compress direction: stdin piped, stdout writing into the
    /// archive file.
    pub(crate) fn spawn_compress(&self, archive_file: File, threads: Option<u32>) -> Result<Child> {
        let mut cmd = self.compress_command(threads);
        debug!(program = %self.program, "spawning compressor");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::from(archive_file))
            .spawn()
            .map_err(|e| DumpError::process(&self.program, format!("failed to spawn: {e}")))
    }

    /// Spawn the decompress direction: reads the archive file, stdout piped.
    pub(crate) fn spawn_decompress(&self, archive: &Path) -> Result<Child> {
        let mut cmd = self.decompress_command(archive);
        debug!(program = %self.program, archive = %archive.display(), "spawning decompressor");
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| DumpError::process(&self.program, format!("failed to spawn: {e}")))
    }
}

/// Reap the subprocess and require a clean exit.
pub(crate) fn wait_child(program: &str, mut child: Child) -> Result<()> {
    let status = child
        .wait()
        .map_err(|e| DumpError::process(program, format!("failed to wait: {e}")))?;
    if !status.success() {
        return Err(DumpError::process(program, format!("exited with {status}")));
    }
    Ok(())
}
