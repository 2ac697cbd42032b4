#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Decrypt PGP-encrypted messages found on an IMAP server

use std::path::PathBuf;

use clap::Parser;
use imap_bulk_decrypt::relocate::{Disposition, Relocation, RelocationReport, Sink};
use imap_bulk_decrypt::store::MaildirStore;
use imap_bulk_decrypt::walker::{self, MatchSet};
use imap_bulk_decrypt::{GpgCommand, ImapConfig, with_session};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "imap-bulk-decrypt")]
#[command(about = "Decrypt PGP-encrypted messages on an IMAP server")]
struct Args {
    /// Folder to start from (default: every top-level folder)
    #[arg(long)]
    folder: Option<String>,

    /// Only search the start folder, not its subfolders
    #[arg(long)]
    no_recursive: bool,

    /// Store decrypted messages in this Maildir
    #[arg(long, conflicts_with = "in_place")]
    maildir: Option<PathBuf>,

    /// Append decrypted messages back to their server folder
    #[arg(long)]
    in_place: bool,

    /// Move encrypted originals to this folder instead of deleting them
    #[arg(long)]
    move_to: Option<String>,

    /// Only report what would be decrypted
    #[arg(long, required_unless_present_any = ["maildir", "in_place"])]
    dry_run: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = ImapConfig::from_env()?;

    let gpg = GpgCommand::from_env();
    let store = args.maildir.as_ref().map(MaildirStore::new);
    let sink = store.as_ref().map_or(Sink::Server, |s| Sink::Local(s));
    let disposition = args
        .move_to
        .clone()
        .map_or(Disposition::Delete, Disposition::Move);
    let relocation = Relocation::new(&gpg, sink, disposition);
    let recursive = !args.no_recursive;

    let (matches, report) = with_session(config, async |session| {
        let matches = match &args.folder {
            Some(folder) => walker::search_from(session, folder, recursive).await?,
            None => walker::search_all(session, recursive).await?,
        };
        if args.dry_run {
            return Ok((matches, None));
        }
        let report = relocation.relocate_all(session, &matches).await?;
        Ok((matches, Some(report)))
    })
    .await?;

    if args.json {
        let output = serde_json::json!({ "matches": matches, "report": report });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_matches(&matches);
        if let Some(report) = &report {
            print_report(report);
        }
    }

    if let Some(report) = report
        && !report.failures.is_empty()
    {
        anyhow::bail!("{} relocation failure(s)", report.failures.len());
    }
    Ok(())
}

fn print_matches(matches: &[MatchSet]) {
    if matches.is_empty() {
        println!("No encrypted messages found.");
        return;
    }
    for set in matches {
        println!(
            "{:<40} {:>5} PGP/MIME {:>5} inline",
            set.folder,
            set.mime.len(),
            set.inline.len()
        );
    }
}

fn print_report(report: &RelocationReport) {
    println!("\n{} message(s) decrypted", report.relocated);
    for failure in &report.failures {
        match failure.uid {
            Some(uid) => println!("  {} UID {}: {}", failure.folder, uid, failure.error),
            None => println!("  {}: {}", failure.folder, failure.error),
        }
    }
}
