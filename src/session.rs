//! Stateful IMAP session
//!
//! A [`Session`] owns one connection and remembers the single folder that
//! is currently selected. Every folder-scoped primitive checks that a
//! folder is selected before it talks to the server.

use crate::config::ImapConfig;
use crate::connection::{self, ImapSession};
use crate::error::{Error, Result};
use crate::flag::Flag;
use crate::folder;
use futures::{StreamExt, TryStreamExt};
use std::fmt;
use tracing::{debug, info, warn};

/// One connection to the mail server.
///
/// Created closed; [`open`](Self::open) connects and logs in,
/// [`close`](Self::close) expunges the selected folder and logs out.
pub struct Session {
    config: ImapConfig,
    imap: Option<ImapSession>,
    folder: Option<String>,
    /// Outer `None`: not asked yet. Inner `None`: flat namespace.
    delimiter: Option<Option<char>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.config.host)
            .field("open", &self.is_open())
            .field("folder", &self.folder)
            .finish_non_exhaustive()
    }
}

/// Translate an async-imap error, handing server rejections (and their
/// diagnostic text) to `rejected`.
fn server_error(err: async_imap::error::Error, rejected: impl FnOnce(String) -> Error) -> Error {
    use async_imap::error::Error as Imap;
    match err {
        Imap::Io(e) => Error::Io(e),
        Imap::ConnectionLost => Error::NoConnection("Connection lost".to_string()),
        Imap::No(text) | Imap::Bad(text) => rejected(text),
        other => rejected(other.to_string()),
    }
}

async fn expunge_selected(imap: &mut ImapSession) -> Result<usize> {
    let removed: Vec<_> = imap
        .expunge()
        .await
        .map_err(|e| server_error(e, Error::OperationFailed))?
        .try_collect()
        .await
        .map_err(|e| server_error(e, Error::OperationFailed))?;
    Ok(removed.len())
}

impl Session {
    #[must_use]
    pub const fn new(config: ImapConfig) -> Self {
        Self {
            config,
            imap: None,
            folder: None,
            delimiter: None,
        }
    }

    /// Create a session and open it.
    pub async fn connect(config: ImapConfig) -> Result<Self> {
        let mut session = Self::new(config);
        session.open().await?;
        Ok(session)
    }

    /// Connect and authenticate. Opening an open session is a no-op.
    pub async fn open(&mut self) -> Result<()> {
        if self.imap.is_none() {
            self.imap = Some(connection::connect(&self.config).await?);
        }
        Ok(())
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.imap.is_some()
    }

    /// The folder selected by the last successful [`select`](Self::select).
    #[must_use]
    pub fn current_folder(&self) -> Option<&str> {
        self.folder.as_deref()
    }

    fn imap(&mut self) -> Result<&mut ImapSession> {
        self.imap
            .as_mut()
            .ok_or_else(|| Error::NoConnection("Session is not open".to_string()))
    }

    /// Guard for folder-scoped operations.
    fn selected(&mut self) -> Result<&mut ImapSession> {
        if self.imap.is_some() && self.folder.is_none() {
            return Err(Error::NoFolderSelected);
        }
        self.imap()
    }

    /// SELECT `path` and make it the current folder.
    ///
    /// A rejected SELECT leaves no folder selected, as on the server.
    pub async fn select(&mut self, path: &str) -> Result<()> {
        let imap = self.imap()?;
        match imap.select(path).await {
            Ok(mailbox) => {
                debug!("Selected {} ({} messages)", path, mailbox.exists);
                self.folder = Some(path.to_string());
                Ok(())
            }
            Err(e) => {
                self.folder = None;
                Err(server_error(e, |text| {
                    Error::InvalidPath(format!("Cannot select {path}: {text}"))
                }))
            }
        }
    }

    /// The server's hierarchy delimiter, asked once per session with
    /// `LIST "" ""`.
    pub async fn delimiter(&mut self) -> Result<Option<char>> {
        if let Some(delimiter) = self.delimiter {
            return Ok(delimiter);
        }

        let imap = self.imap()?;
        let names: Vec<_> = imap
            .list(Some(""), None)
            .await
            .map_err(|e| server_error(e, Error::InvalidPath))?
            .try_collect()
            .await
            .map_err(|e| server_error(e, Error::InvalidPath))?;

        let delimiter = names
            .iter()
            .find_map(|name| name.delimiter().and_then(|d| d.chars().next()));
        debug!("Hierarchy delimiter: {:?}", delimiter);

        self.delimiter = Some(delimiter);
        Ok(delimiter)
    }

    /// Direct children of `path` (or the top-level folders), in server
    /// order. The folder itself is never part of the result.
    pub async fn list(&mut self, path: Option<&str>) -> Result<Vec<String>> {
        let delimiter = self.delimiter().await?;
        let pattern = match (path, delimiter) {
            (None, delimiter) => folder::child_pattern(None, delimiter.unwrap_or('/')),
            (Some(parent), Some(delimiter)) => folder::child_pattern(Some(parent), delimiter),
            // Flat namespace: nothing nests below a folder.
            (Some(_), None) => return Ok(Vec::new()),
        };

        let imap = self.imap()?;
        let mut stream = imap
            .list(Some(""), Some(&pattern))
            .await
            .map_err(|e| server_error(e, Error::InvalidPath))?;

        let mut children = Vec::new();
        while let Some(item) = stream.next().await {
            let name = item.map_err(|e| server_error(e, Error::InvalidPath))?;
            let wanted = match (path, delimiter) {
                (Some(parent), Some(delimiter)) => folder::is_child(parent, delimiter, name.name()),
                _ => true,
            };
            if wanted {
                children.push(name.name().to_string());
            }
        }
        drop(stream);

        Ok(children)
    }

    /// CREATE a folder.
    pub async fn create(&mut self, path: &str) -> Result<()> {
        let imap = self.imap()?;
        imap.create(path).await.map_err(|e| {
            server_error(e, |text| {
                Error::InvalidPath(format!("Cannot create {path}: {text}"))
            })
        })?;
        info!("Created folder {}", path);
        Ok(())
    }

    /// UID SEARCH in the selected folder with a raw IMAP query.
    ///
    /// Returns UIDs in ascending order. A NO/BAD answer is reported as
    /// [`Error::SearchRejected`].
    pub async fn search(&mut self, criteria: &str) -> Result<Vec<u32>> {
        let imap = self.selected()?;
        let uids = imap
            .uid_search(criteria)
            .await
            .map_err(|e| server_error(e, Error::SearchRejected))?;

        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    /// Flags of message `uid`.
    pub async fn fetch_flags(&mut self, uid: u32) -> Result<Vec<Flag>> {
        let imap = self.selected()?;
        let fetches: Vec<_> = imap
            .uid_fetch(uid.to_string(), "(FLAGS)")
            .await
            .map_err(|e| server_error(e, Error::InvalidMsgId))?
            .try_collect()
            .await
            .map_err(|e| server_error(e, Error::InvalidMsgId))?;

        let fetch = fetches
            .iter()
            .find(|f| f.uid == Some(uid))
            .ok_or_else(|| Error::InvalidMsgId(format!("Could not fetch flags for message {uid}")))?;

        Ok(fetch.flags().map(Flag::from).collect())
    }

    /// Full RFC 5322 source of message `uid`, without setting `\Seen`.
    pub async fn fetch_message(&mut self, uid: u32) -> Result<Vec<u8>> {
        let imap = self.selected()?;
        let fetches: Vec<_> = imap
            .uid_fetch(uid.to_string(), "(BODY.PEEK[])")
            .await
            .map_err(|e| server_error(e, Error::InvalidMsgId))?
            .try_collect()
            .await
            .map_err(|e| server_error(e, Error::InvalidMsgId))?;

        fetches
            .iter()
            .filter(|f| f.uid == Some(uid))
            .find_map(|f| f.body().map(<[u8]>::to_vec))
            .ok_or_else(|| Error::InvalidMsgId(format!("Could not fetch message {uid}")))
    }

    /// APPEND a message to `folder`.
    ///
    /// `flags` is a parenthesized flag list and `date` an IMAP date-time
    /// without quotes, e.g. `17-Oct-2026 09:30:00 +0200`.
    pub async fn append(
        &mut self,
        folder: &str,
        flags: Option<&str>,
        date: Option<&str>,
        content: &[u8],
    ) -> Result<()> {
        let imap = self.selected()?;
        let date = date.map(|d| format!("\"{d}\""));
        imap.append(folder, flags, date.as_deref(), content)
            .await
            .map_err(|e| {
                server_error(e, |text| {
                    Error::OperationFailed(format!("Could not add message to {folder}: {text}"))
                })
            })?;
        debug!("Appended {} bytes to {}", content.len(), folder);
        Ok(())
    }

    /// Mark message `uid` `\Deleted`. Removal happens at the next
    /// [`expunge`](Self::expunge) or at [`close`](Self::close).
    pub async fn flag_deleted(&mut self, uid: u32) -> Result<()> {
        let imap = self.selected()?;
        let _updates: Vec<_> = imap
            .uid_store(uid.to_string(), "+FLAGS (\\Deleted)")
            .await
            .map_err(|e| server_error(e, |text| {
                Error::OperationFailed(format!("Could not delete message {uid}: {text}"))
            }))?
            .try_collect()
            .await
            .map_err(|e| server_error(e, Error::OperationFailed))?;
        Ok(())
    }

    /// Permanently remove flagged messages from the selected folder.
    /// Returns how many were removed.
    pub async fn expunge(&mut self) -> Result<usize> {
        let imap = self.selected()?;
        let removed = expunge_selected(imap).await?;
        if removed > 0 {
            info!("Expunged {} message(s)", removed);
        }
        Ok(removed)
    }

    /// UID COPY message `uid` to `dest`.
    pub async fn copy(&mut self, uid: u32, dest: &str) -> Result<()> {
        let imap = self.selected()?;
        imap.uid_copy(uid.to_string(), dest).await.map_err(|e| {
            server_error(e, |text| {
                Error::OperationFailed(format!("Could not copy message {uid} to {dest}: {text}"))
            })
        })
    }

    /// Copy to `dest`, then flag the original deleted.
    pub async fn move_message(&mut self, uid: u32, dest: &str) -> Result<()> {
        self.copy(uid, dest).await?;
        self.flag_deleted(uid).await
    }

    /// Expunge and CLOSE the selected folder, then LOGOUT.
    ///
    /// Every step is attempted even if an earlier one failed; the first
    /// failure is returned. Closing a closed session is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        let Some(mut imap) = self.imap.take() else {
            return Ok(());
        };
        self.delimiter = None;
        let mut first_error = None;

        if let Some(folder) = self.folder.take() {
            match expunge_selected(&mut imap).await {
                Ok(0) => {}
                Ok(n) => info!("Expunged {} message(s) from {}", n, folder),
                Err(e) => {
                    warn!("Expunge of {} failed: {}", folder, e);
                    first_error.get_or_insert(e);
                }
            }
            if let Err(e) = imap.close().await {
                let e = server_error(e, Error::OperationFailed);
                warn!("CLOSE failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = imap.logout().await {
            let e = server_error(e, Error::NoConnection);
            warn!("LOGOUT failed: {}", e);
            first_error.get_or_insert(e);
        }

        first_error.map_or(Ok(()), Err)
    }
}

/// Run `f` on a freshly opened session and always close it afterwards.
///
/// An error from `f` wins over an error from closing; a close error is
/// returned only when `f` succeeded.
pub async fn with_session<T>(
    config: ImapConfig,
    f: impl AsyncFnOnce(&mut Session) -> Result<T>,
) -> Result<T> {
    let mut session = Session::connect(config).await?;
    let outcome = f(&mut session).await;
    let closed = session.close().await;

    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            warn!("Ignoring close failure after earlier error: {}", close_err);
            Err(e)
        }
    }
}
