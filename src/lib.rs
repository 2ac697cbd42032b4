//! Bulk decryption of PGP-encrypted mail on an IMAP server
//!
//! Finds PGP/MIME and inline-PGP messages across a folder tree, decrypts
//! them with GnuPG, stores the plaintext in a local Maildir (or appends
//! it back to the server) and removes or moves the encrypted originals.
//!
//! ```no_run
//! use imap_bulk_decrypt::relocate::{Disposition, Relocation, Sink};
//! use imap_bulk_decrypt::store::MaildirStore;
//! use imap_bulk_decrypt::{GpgCommand, ImapConfig, walker, with_session};
//!
//! # async fn run() -> imap_bulk_decrypt::Result<()> {
//! let gpg = GpgCommand::from_env();
//! let store = MaildirStore::new("/home/me/Maildir");
//! let relocation = Relocation::new(&gpg, Sink::Local(&store), Disposition::Delete);
//!
//! let report = with_session(ImapConfig::from_env()?, async |session| {
//!     let matches = walker::search_from(session, "INBOX", true).await?;
//!     relocation.relocate_all(session, &matches).await
//! })
//! .await?;
//! println!("{} message(s) decrypted", report.relocated);
//! # Ok(())
//! # }
//! ```

mod config;
mod connection;
mod error;
mod flag;
pub mod folder;
pub mod message;
pub mod oracle;
pub mod relocate;
mod session;
pub mod store;
pub mod translate;
pub mod walker;

pub use config::{ImapConfig, TlsMode};
pub use error::{Error, Result};
pub use flag::Flag;
pub use oracle::{Decrypt, DecryptOutcome, GpgCommand};
pub use session::{Session, with_session};
