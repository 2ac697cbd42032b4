//! Local message storage

use crate::error::{Error, Result};
use crate::flag::{self, Flag};
use crate::message::Message;
use maildir::Maildir;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Durable hierarchical storage for decrypted messages.
pub trait LocalStore {
    /// Store `message` under the `/`-separated folder `path`, creating
    /// missing folders. Must not return before the message is durable.
    fn write(&self, path: &str, message: &Message, flags: &[Flag]) -> Result<()>;
}

/// A Maildir tree with one nested `.name` Maildir per folder segment,
/// so `INBOX/Sent` lives in `<root>/.INBOX/.Sent`.
#[derive(Debug, Clone)]
pub struct MaildirStore {
    root: PathBuf,
}

impl MaildirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of the Maildir for `path`, without touching the disk.
    pub fn folder_dir(&self, path: &str) -> Result<PathBuf> {
        let mut dir = self.root.clone();
        for segment in path.split('/').map(|s| s.trim_matches('"')) {
            if segment.is_empty() {
                continue;
            }
            if segment == "." || segment == ".." || segment.contains(std::path::MAIN_SEPARATOR) {
                return Err(Error::Store(format!("Invalid folder segment {segment:?} in {path}")));
            }
            dir.push(format!(".{segment}"));
        }
        Ok(dir)
    }

    /// Create the Maildir for `path` and every parent.
    fn open_folder(&self, path: &str) -> Result<Maildir> {
        let target = self.folder_dir(path)?;
        let mut dir = self.root.clone();
        Maildir::from(dir.clone())
            .create_dirs()
            .map_err(|e| local_error(&dir, &e))?;

        for component in target.strip_prefix(&self.root).unwrap_or(&target).components() {
            dir.push(component);
            Maildir::from(dir.clone())
                .create_dirs()
                .map_err(|e| local_error(&dir, &e))?;
            let marker = dir.join("maildirfolder");
            if !marker.exists() {
                File::create(&marker).map_err(|e| local_error(&marker, &e))?;
            }
        }
        Ok(Maildir::from(target))
    }
}

/// Local I/O failures concern one message, never the IMAP session.
fn local_error(path: &Path, err: &std::io::Error) -> Error {
    Error::Store(format!("{}: {err}", path.display()))
}

fn sync(path: &Path) -> Result<()> {
    File::open(path)
        .and_then(|file| file.sync_all())
        .map_err(|e| local_error(path, &e))
}

impl LocalStore for MaildirStore {
    fn write(&self, path: &str, message: &Message, flags: &[Flag]) -> Result<()> {
        let maildir = self.open_folder(path)?;
        let info = flag::maildir_info(flags);

        let id = maildir
            .store_cur_with_flags(&message.to_bytes(), &info)
            .map_err(|e| Error::Store(format!("Cannot store message in {path}: {e}")))?;

        let entry = maildir
            .find(&id)
            .ok_or_else(|| Error::Store(format!("Stored message {id} not found in {path}")))?;
        sync(entry.path())?;
        sync(&maildir.path().join("cur"))?;

        debug!("Stored {} in {} with flags {:?}", id, maildir.path().display(), info);
        Ok(())
    }
}
