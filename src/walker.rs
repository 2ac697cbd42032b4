//! Recursive search for encrypted messages
//!
//! Every visited folder gets two UID searches, one per encryption
//! layout. Folders with hits become [`MatchSet`]s.

use crate::error::{Error, Result};
use crate::session::Session;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Messages whose `Content-Type` names PGP/MIME.
pub const MIME_CRITERIA: &str = "HEADER Content-Type \"pgp-encrypted\"";
/// Messages whose body holds an armored PGP block.
pub const INLINE_CRITERIA: &str = "BODY \"-----BEGIN PGP MESSAGE-----\"";

/// Search hits in one folder. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchSet {
    pub folder: String,
    pub mime: Vec<u32>,
    pub inline: Vec<u32>,
}

impl MatchSet {
    /// All matched UIDs, ascending and without duplicates.
    #[must_use]
    pub fn uids(&self) -> Vec<u32> {
        let mut uids: Vec<u32> = self.mime.iter().chain(&self.inline).copied().collect();
        uids.sort_unstable();
        uids.dedup();
        uids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.uids().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mime.is_empty() && self.inline.is_empty()
    }
}

async fn search_or_empty(session: &mut Session, criteria: &str) -> Result<Vec<u32>> {
    match session.search(criteria).await {
        Err(Error::SearchRejected(text)) => {
            warn!("Server rejected search {}: {}", criteria, text);
            Ok(Vec::new())
        }
        other => other,
    }
}

/// Run both searches in the selected folder.
pub async fn search_folder(session: &mut Session) -> Result<Option<MatchSet>> {
    let folder = session
        .current_folder()
        .ok_or(Error::NoFolderSelected)?
        .to_string();

    let mime = search_or_empty(session, MIME_CRITERIA).await?;
    let inline = search_or_empty(session, INLINE_CRITERIA).await?;

    let matches = MatchSet { folder, mime, inline };
    if matches.is_empty() {
        debug!("No encrypted messages in {}", matches.folder);
        return Ok(None);
    }
    info!(
        "{}: {} PGP/MIME, {} inline",
        matches.folder,
        matches.mime.len(),
        matches.inline.len()
    );
    Ok(Some(matches))
}

fn record(results: &mut Vec<MatchSet>, matches: MatchSet) {
    match results.iter_mut().find(|m| m.folder == matches.folder) {
        Some(existing) => *existing = matches,
        None => results.push(matches),
    }
}

/// Search `folder` (if `selectable`, in which case it is the selected
/// folder) and, when `recursive`, all folders below it. Returns with
/// `folder` selected again.
async fn visit(
    session: &mut Session,
    folder: &str,
    selectable: bool,
    recursive: bool,
    results: &mut Vec<MatchSet>,
) -> Result<()> {
    if selectable && let Some(matches) = search_folder(session).await? {
        record(results, matches);
    }
    if !recursive {
        return Ok(());
    }

    for child in session.list(Some(folder)).await? {
        let child_selectable = select_for_search(session, &child).await?;
        Box::pin(visit(session, &child, child_selectable, recursive, results)).await?;
        if selectable {
            session.select(folder).await?;
        }
    }
    Ok(())
}

/// Select `folder`; a folder the server won't select (`\Noselect`) is
/// reported and skipped, not fatal.
async fn select_for_search(session: &mut Session, folder: &str) -> Result<bool> {
    match session.select(folder).await {
        Ok(()) => Ok(true),
        Err(Error::InvalidPath(text)) => {
            info!("Not searching {}: {}", folder, text);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Search the selected folder, and its subfolders when `recursive`.
/// The selection is unchanged afterwards.
pub async fn search(session: &mut Session, recursive: bool) -> Result<Vec<MatchSet>> {
    let root = session
        .current_folder()
        .ok_or(Error::NoFolderSelected)?
        .to_string();

    let mut results = Vec::new();
    visit(session, &root, true, recursive, &mut results).await?;
    Ok(results)
}

/// Select `root` and [`search`] from there.
pub async fn search_from(
    session: &mut Session,
    root: &str,
    recursive: bool,
) -> Result<Vec<MatchSet>> {
    session.select(root).await?;
    search(session, recursive).await
}

/// Search every top-level folder (and everything below when
/// `recursive`).
pub async fn search_all(session: &mut Session, recursive: bool) -> Result<Vec<MatchSet>> {
    let mut results = Vec::new();
    for folder in session.list(None).await? {
        let selectable = select_for_search(session, &folder).await?;
        visit(session, &folder, selectable, recursive, &mut results).await?;
    }
    Ok(results)
}
