//! APPEND command handler.
//!
//! The message arrives as a synchronizing literal. The command loop
//! answers the `{N}` with a continuation request, reads the N bytes and
//! hands them here together with the arguments before the literal:
//!
//! ```text
//! C: A0007 APPEND "INBOX" (\Seen) "01-Jul-2003 10:52:37 +0200" {310}
//! S: + Ready for literal data
//! C: <310 bytes>
//! S: A0007 OK APPEND completed
//! ```
//!
//! Flags and date are optional. A missing folder gets
//! `NO [TRYCREATE]`.

use crate::fake_imap::io::{parse_args, write_line};
use crate::fake_imap::mailbox::{Mailbox, TestEmail};
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Arguments of an APPEND, literal excluded.
#[derive(Debug, PartialEq, Eq)]
struct AppendArgs {
    folder: String,
    flags: Vec<String>,
    date: Option<String>,
}

fn parse_append_args(args: &str) -> Option<AppendArgs> {
    let mut tokens = parse_args(args).into_iter().peekable();
    let folder = tokens.next()?;
    let flags = match tokens.next_if(|t| t.starts_with('(')) {
        Some(list) => list
            .trim_start_matches('(')
            .trim_end_matches(')')
            .split_whitespace()
            .map(ToString::to_string)
            .collect(),
        None => Vec::new(),
    };
    let date = tokens.next();
    Some(AppendArgs { folder, flags, date })
}

/// Handle the APPEND command. `args` is everything between `APPEND`
/// and the literal marker.
pub async fn handle_append<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    args: &str,
    message: Vec<u8>,
    mailbox: &Mutex<Mailbox>,
    stream: &mut BufReader<S>,
) {
    let Some(args) = parse_append_args(args) else {
        let resp = format!("{tag} BAD Missing mailbox name\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    let appended = {
        let mut mb = mailbox.lock().unwrap();
        mb.get_folder_mut(&args.folder).map(|folder| {
            let uid = folder.next_uid();
            folder.emails.push(TestEmail {
                uid,
                flags: args.flags,
                raw: message,
                date: args.date,
            });
        })
    };

    let resp = if appended.is_some() {
        format!("{tag} OK APPEND completed\r\n")
    } else {
        format!("{tag} NO [TRYCREATE] Folder not found\r\n")
    };
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use tokio::io::BufReader;

    async fn run_append(args: &str, message: &[u8], mailbox: &Mutex<Mailbox>) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        handle_append("A1", args, message.to_vec(), mailbox, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn optional_flags_and_date() {
        assert_eq!(
            parse_append_args(r#""INBOX""#),
            Some(AppendArgs {
                folder: "INBOX".into(),
                flags: Vec::new(),
                date: None,
            })
        );
        assert_eq!(
            parse_append_args(r#""INBOX" "01-Jul-2003 10:52:37 +0200""#).unwrap().date,
            Some("01-Jul-2003 10:52:37 +0200".into())
        );
        assert_eq!(
            parse_append_args(r#""INBOX" (\Seen \Answered)"#).unwrap().flags,
            vec!["\\Seen", "\\Answered"]
        );
    }

    #[tokio::test]
    #[allow(clippy::significant_drop_tightening)]
    async fn appends_with_next_uid() {
        let mb = Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(4, &[], b"Subject: old\r\n\r\n")
                .build(),
        );

        let output = run_append(
            r#""INBOX" (\Seen) "01-Jul-2003 10:52:37 +0200""#,
            b"Subject: new\r\n\r\nhi",
            &mb,
        )
        .await;
        assert_eq!(output, "A1 OK APPEND completed\r\n");

        let locked = mb.lock().unwrap();
        let added = &locked.get_folder("INBOX").unwrap().emails[1];
        assert_eq!(added.uid, 5);
        assert_eq!(added.flags, vec!["\\Seen"]);
        assert_eq!(added.raw, b"Subject: new\r\n\r\nhi");
        assert_eq!(added.date.as_deref(), Some("01-Jul-2003 10:52:37 +0200"));
    }

    #[tokio::test]
    async fn missing_folder_returns_trycreate() {
        let mb = Mutex::new(MailboxBuilder::new().folder("INBOX").build());

        let output = run_append(r#""Nope""#, b"x", &mb).await;

        assert!(output.contains("NO [TRYCREATE]"));
    }
}
