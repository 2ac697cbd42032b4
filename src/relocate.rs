//! Fetch, decrypt, store, then delete or move
//!
//! The server copy is only touched after the plaintext is safely stored.
//! Deletion is two-phase: messages are flagged `\Deleted` per UID and
//! expunged once per folder.

use crate::error::{Error, Result};
use crate::flag::{self, Flag};
use crate::folder;
use crate::message::Message;
use crate::oracle::Decrypt;
use crate::session::Session;
use crate::store::LocalStore;
use crate::translate::translate;
use crate::walker::MatchSet;
use serde::Serialize;
use tracing::{debug, info, warn};

/// IMAP APPEND date-time, without the surrounding quotes.
const INTERNALDATE_FORMAT: &str = "%d-%b-%Y %H:%M:%S %z";

/// What happens to the encrypted original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Delete,
    /// Copy to this folder, then delete.
    Move(String),
}

/// Where the plaintext goes.
#[derive(Clone, Copy)]
pub enum Sink<'a> {
    /// A local store, under a path mirroring the server folder.
    Local(&'a dyn LocalStore),
    /// Back into the same server folder, keeping flags and date.
    Server,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelocationFailure {
    pub folder: String,
    /// `None` when the failure concerns the whole folder, such as an
    /// expunge the server refused.
    pub uid: Option<u32>,
    pub error: String,
}

/// Outcome of a bulk run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelocationReport {
    pub relocated: usize,
    pub failures: Vec<RelocationFailure>,
}

impl RelocationReport {
    fn fail(&mut self, folder: &str, uid: Option<u32>, error: &Error) {
        match uid {
            Some(uid) => warn!("{} UID {}: {}", folder, uid, error),
            None => warn!("{}: {}", folder, error),
        }
        self.failures.push(RelocationFailure {
            folder: folder.to_string(),
            uid,
            error: error.to_string(),
        });
    }
}

/// One relocation policy: which oracle decrypts, where plaintext goes,
/// what happens to the original.
pub struct Relocation<'a> {
    pub oracle: &'a dyn Decrypt,
    pub sink: Sink<'a>,
    pub disposition: Disposition,
}

impl<'a> Relocation<'a> {
    #[must_use]
    pub const fn new(oracle: &'a dyn Decrypt, sink: Sink<'a>, disposition: Disposition) -> Self {
        Self {
            oracle,
            sink,
            disposition,
        }
    }

    /// Relocate message `uid` of the selected folder.
    ///
    /// On success the original is flagged `\Deleted` (after being copied
    /// for [`Disposition::Move`]); it disappears at the next expunge.
    pub async fn relocate(&self, session: &mut Session, uid: u32) -> Result<()> {
        let source = session
            .current_folder()
            .ok_or(Error::NoFolderSelected)?
            .to_string();

        let flags = session.fetch_flags(uid).await?;
        let raw = session.fetch_message(uid).await?;
        let plaintext = translate(self.oracle, Message::parse(&raw)).await?;

        match self.sink {
            Sink::Local(store) => {
                let path = folder::local_path(&source, session.delimiter().await?);
                store.write(&path, &plaintext, &flags)?;
            }
            Sink::Server => {
                let kept: Vec<Flag> = flags.into_iter().filter(|f| *f != Flag::Deleted).collect();
                let date = plaintext
                    .date()
                    .map(|d| d.format(INTERNALDATE_FORMAT).to_string());
                session
                    .append(
                        &source,
                        flag::imap_flag_list(&kept).as_deref(),
                        date.as_deref(),
                        &plaintext.to_crlf_bytes(),
                    )
                    .await?;
            }
        }

        match &self.disposition {
            Disposition::Delete => session.flag_deleted(uid).await?,
            Disposition::Move(dest) => session.move_message(uid, dest).await?,
        }

        info!("Relocated {} UID {}", source, uid);
        Ok(())
    }

    /// Relocate every message in `matches`, folder by folder.
    ///
    /// Per-message failures are logged and collected; errors that leave
    /// the session unusable abort the run.
    pub async fn relocate_all(
        &self,
        session: &mut Session,
        matches: &[MatchSet],
    ) -> Result<RelocationReport> {
        if let Disposition::Move(dest) = &self.disposition {
            ensure_folder(session, dest).await?;
        }

        let mut report = RelocationReport::default();
        for set in matches {
            if let Err(e) = session.select(&set.folder).await {
                if e.is_session_fatal() {
                    return Err(e);
                }
                for uid in set.uids() {
                    report.fail(&set.folder, Some(uid), &e);
                }
                continue;
            }

            let mut flagged = 0;
            for uid in set.uids() {
                match self.relocate(session, uid).await {
                    Ok(()) => flagged += 1,
                    Err(e) if e.is_session_fatal() => return Err(e),
                    Err(e) => report.fail(&set.folder, Some(uid), &e),
                }
            }

            // The plaintext is stored either way; a refused expunge only
            // leaves the flagged originals behind.
            if flagged > 0
                && let Err(e) = session.expunge().await
            {
                if e.is_session_fatal() {
                    return Err(e);
                }
                report.fail(&set.folder, None, &e);
            }
            report.relocated += flagged;
        }

        Ok(report)
    }
}

/// Create `path` unless the server says it can't (normally because it
/// already exists).
async fn ensure_folder(session: &mut Session, path: &str) -> Result<()> {
    match session.create(path).await {
        Err(Error::InvalidPath(text)) => {
            debug!("Not creating {}: {}", path, text);
            Ok(())
        }
        other => other,
    }
}
