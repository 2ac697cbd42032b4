//! Decryption oracle
//!
//! The crate never touches key material. Ciphertext goes to a
//! [`Decrypt`] implementation and comes back as a [`DecryptOutcome`];
//! [`GpgCommand`] drives the `gpg` binary.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::env;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// What the oracle reported for one decryption attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecryptOutcome {
    /// Unqualified success.
    pub succeeded: bool,
    /// Short status such as `decryption ok` or `signature valid`.
    pub status: String,
    pub plaintext: Vec<u8>,
    /// Free-form diagnostics (gpg's stderr).
    pub diagnostics: String,
    pub signature_valid: bool,
}

#[async_trait]
pub trait Decrypt: Send + Sync {
    /// Decrypt `ciphertext`. With `legacy_tolerant`, messages with a
    /// missing or broken integrity code are accepted.
    ///
    /// An `Err` means the oracle could not be run at all; a refused
    /// decryption is an `Ok` outcome with `succeeded == false`.
    async fn decrypt(&self, ciphertext: &[u8], legacy_tolerant: bool) -> Result<DecryptOutcome>;
}

/// Runs `gpg --decrypt` as a child process.
#[derive(Debug, Clone)]
pub struct GpgCommand {
    pub program: PathBuf,
    pub homedir: Option<PathBuf>,
}

impl Default for GpgCommand {
    fn default() -> Self {
        Self {
            program: PathBuf::from("gpg"),
            homedir: None,
        }
    }
}

impl GpgCommand {
    /// Reads `GPG_PROGRAM` (default `gpg`) and `GNUPGHOME`.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            program: env::var_os("GPG_PROGRAM").map_or_else(|| PathBuf::from("gpg"), PathBuf::from),
            homedir: env::var_os("GNUPGHOME").map(PathBuf::from),
        }
    }

    fn command(&self, legacy_tolerant: bool) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["--batch", "--no-tty", "--status-fd", "2"]);
        if let Some(homedir) = &self.homedir {
            cmd.arg("--homedir").arg(homedir);
        }
        if legacy_tolerant {
            cmd.arg("--ignore-mdc-error");
        }
        cmd.arg("--decrypt")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Decrypt for GpgCommand {
    async fn decrypt(&self, ciphertext: &[u8], legacy_tolerant: bool) -> Result<DecryptOutcome> {
        let mut child = self.command(legacy_tolerant).spawn().map_err(|e| {
            Error::Gpg(format!("Cannot run {}: {e}", self.program.display()))
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Gpg("gpg stdin unavailable".to_string()))?;
        let input = ciphertext.to_vec();
        // Fed from a task so a large plaintext can't fill stdout while
        // gpg is still waiting for input.
        let writer = tokio::spawn(async move {
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::Gpg(format!("Waiting for gpg failed: {e}")))?;
        if let Ok(Err(e)) = writer.await {
            // gpg may exit before reading everything (e.g. no key); the
            // status lines tell the real story.
            debug!("Writing ciphertext to gpg failed: {}", e);
        }

        let diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();
        let mut outcome = parse_status(&diagnostics);
        outcome.plaintext = output.stdout;
        outcome.diagnostics = diagnostics;

        debug!(
            "gpg exited with {} (status: {})",
            output.status, outcome.status
        );
        Ok(outcome)
    }
}

/// Fold `[GNUPG:]` status lines into an outcome. The last status line
/// that carries a meaning sets `status`.
fn parse_status(output: &str) -> DecryptOutcome {
    let mut outcome = DecryptOutcome::default();

    for line in output.lines() {
        let Some(rest) = line.strip_prefix("[GNUPG:] ") else {
            continue;
        };
        let keyword = rest.split_whitespace().next().unwrap_or_default();

        let status = match keyword {
            "DECRYPTION_OKAY" => {
                outcome.succeeded = true;
                "decryption ok"
            }
            "DECRYPTION_FAILED" => {
                outcome.succeeded = false;
                "decryption failed"
            }
            "NO_SECKEY" => "no secret key",
            "NODATA" => "no data",
            "GOODSIG" => {
                outcome.signature_valid = true;
                "signature good"
            }
            "VALIDSIG" => {
                outcome.signature_valid = true;
                "signature valid"
            }
            "BADSIG" => {
                outcome.signature_valid = false;
                "signature bad"
            }
            "ERRSIG" => {
                outcome.signature_valid = false;
                "signature error"
            }
            "EXPKEYSIG" | "REVKEYSIG" => {
                outcome.signature_valid = false;
                "signature from unusable key"
            }
            _ => continue,
        };
        outcome.status = status.to_string();
    }

    outcome
}
