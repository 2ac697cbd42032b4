//! In-process fake IMAP server for integration testing
//!
//! # How IMAP works (educational overview)
//!
//! IMAP (Internet Message Access Protocol, RFC 3501) is a text-based
//! protocol for accessing email on a remote server. Unlike POP3, IMAP
//! keeps messages on the server and supports folders, flags, and
//! server-side search.
//!
//! ## Connection lifecycle
//!
//! ```text
//!   Client connects via TCP
//!       |
//!   TLS handshake right away (implicit TLS, port 993)
//!       |
//!   Server sends greeting: "* OK IMAP4rev1 ready\r\n"
//!       |
//!   Client sends LOGIN with username and password
//!       |
//!   Client issues commands: LIST, SELECT, SEARCH, FETCH, ...
//!       |
//!   Client sends LOGOUT
//! ```
//!
//! ## Command format
//!
//! Every client command starts with a **tag** -- an arbitrary string
//! the client chooses (async-imap uses `A0001`, `A0002`, etc.). The
//! server echoes this tag in its completion response so the client can
//! match responses to commands:
//!
//! ```text
//!   Client:  A0001 LOGIN user pass
//!   Server:  A0001 OK LOGIN completed
//! ```
//!
//! Lines prefixed with `*` are **untagged** responses -- data the
//! server sends before the final tagged OK/NO/BAD:
//!
//! ```text
//!   Client:  A0002 LIST "" "*"
//!   Server:  * LIST (\HasNoChildren) "/" "INBOX"
//!   Server:  * LIST (\HasNoChildren) "/" "Sent"
//!   Server:  A0002 OK LIST completed
//! ```
//!
//! ## FETCH and literals
//!
//! The most interesting part of IMAP is how it transfers message
//! bodies. Since emails can contain arbitrary binary data, IMAP uses
//! **counted literals**: `{bytecount}\r\n` followed by exactly that
//! many raw bytes:
//!
//! ```text
//!   * 1 FETCH (UID 42 BODY[] {1234}
//!   <exactly 1234 bytes of raw RFC 2822 message>
//!   )
//! ```
//!
//! This is how async-imap knows when the message body ends -- it reads
//! exactly `bytecount` bytes, then expects the closing `)`.
//!
//! Clients send literals too. APPEND ends its command line with
//! `{bytecount}` and waits for a `+` continuation before sending the
//! message.
//!
//! ## STARTTLS
//!
//! Servers on port 143 greet in plain text first. The client sends
//! STARTTLS, both sides run the TLS handshake on the same socket and
//! the session continues encrypted, without a second greeting.

use super::handlers::{
    StoreArgs, handle_append, handle_close, handle_create, handle_expunge, handle_list,
    handle_login, handle_logout, handle_select, handle_uid_copy, handle_uid_fetch,
    handle_uid_search, handle_uid_store,
};
use super::io::{read_literal, write_line};
use super::mailbox::Mailbox;
use imap_codec::CommandCodec;
use imap_codec::decode::Decoder;
use imap_codec::imap_types::command::CommandBody;
use imap_codec::imap_types::mailbox::Mailbox as ImapMailbox;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

const GREETING: &str = "* OK IMAP4rev1 Fake server ready\r\n";

/// How a connection gets encrypted.
#[derive(Debug, Clone, Copy)]
enum Security {
    Implicit,
    StartTls,
}

/// A fake IMAP server that runs on localhost with an OS-assigned port.
///
/// The server generates a self-signed TLS certificate at startup using
/// `rcgen`, so no cert files are needed. It speaks enough of the IMAP
/// protocol to exercise a full decrypt run: LOGIN, LIST, SELECT,
/// searching, fetching, APPEND, flag changes, COPY, EXPUNGE, CLOSE and
/// LOGOUT.
pub struct FakeImapServer {
    port: u16,
    mailbox: Arc<Mutex<Mailbox>>,
    /// Handle to the background task so it lives as long as the server.
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    /// Start a fake IMAPS server (TLS from the first byte).
    ///
    /// 1. Binds to `127.0.0.1:0` -- the OS picks a free port.
    /// 2. Generates a self-signed TLS certificate via `rcgen`.
    /// 3. Spawns a tokio task that accepts connections and speaks
    ///    IMAP.
    ///
    /// The server runs until the `FakeImapServer` is dropped (the
    /// tokio task is aborted).
    pub async fn start(mailbox: Mailbox) -> Self {
        Self::spawn(mailbox, Security::Implicit).await
    }

    /// Start a fake server that expects STARTTLS before anything else.
    pub async fn start_starttls(mailbox: Mailbox) -> Self {
        Self::spawn(mailbox, Security::StartTls).await
    }

    async fn spawn(mailbox: Mailbox, security: Security) -> Self {
        // Ensure the ring crypto provider is installed
        // process-wide. Multiple tests may race to install it, so
        // we ignore the error if it's already set.
        let _ = rustls::crypto::ring::default_provider().install_default();

        // Bind to any available port on localhost.
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        // Generate a self-signed certificate. We use "127.0.0.1"
        // as the subject alt name since that's what the client
        // connects to.
        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("generate self-signed cert");

        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der.into())
            .expect("build server TLS config");

        let acceptor = TlsAcceptor::from(Arc::new(tls_config));
        let mailbox = Arc::new(Mutex::new(mailbox));

        // Spawn the accept loop. Each incoming connection gets its
        // own task that runs the IMAP state machine.
        let shared = mailbox.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let mailbox = shared.clone();
                tokio::spawn(async move {
                    match security {
                        Security::Implicit => handle_implicit(stream, acceptor, &mailbox).await,
                        Security::StartTls => handle_starttls(stream, acceptor, &mailbox).await,
                    }
                });
            }
        });

        Self {
            port,
            mailbox,
            _handle: handle,
        }
    }

    /// The port the server is listening on.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// A copy of the current mailbox state, for assertions after the
    /// client is done.
    pub fn snapshot(&self) -> Mailbox {
        self.mailbox.lock().unwrap().clone()
    }
}

/// Handle an implicit-TLS connection: handshake, greeting, session.
async fn handle_implicit(
    stream: tokio::net::TcpStream,
    acceptor: TlsAcceptor,
    mailbox: &Mutex<Mailbox>,
) {
    let Ok(tls_stream) = acceptor.accept(stream).await else {
        return;
    };
    let mut reader = BufReader::new(tls_stream);

    // RFC 3501 Section 7.1.1: Server greeting
    if write_line(&mut reader, GREETING).await.is_err() {
        return;
    }
    handle_imap_session(reader, mailbox).await;
}

/// Handle a STARTTLS connection.
///
/// 1. Send the server greeting (pre-TLS, on the raw TCP stream)
/// 2. Wait for the STARTTLS command and upgrade to TLS
/// 3. Process commands over the encrypted stream
async fn handle_starttls(
    stream: tokio::net::TcpStream,
    acceptor: TlsAcceptor,
    mailbox: &Mutex<Mailbox>,
) {
    // Phase 1: Pre-TLS communication
    let mut reader = BufReader::new(stream);

    if write_line(&mut reader, GREETING).await.is_err() {
        return;
    }

    // Read the STARTTLS command.
    let mut line = String::new();
    if reader.read_line(&mut line).await.is_err() {
        return;
    }

    let parts: Vec<&str> = line.trim().splitn(2, ' ').collect();
    if parts.len() < 2 {
        return;
    }
    let tag = parts[0];
    let command = parts[1].to_uppercase();

    if command != "STARTTLS" {
        let resp = format!("{tag} BAD Expected STARTTLS\r\n");
        let _ = write_line(&mut reader, &resp).await;
        return;
    }

    let resp = format!("{tag} OK Begin TLS negotiation now\r\n");
    if write_line(&mut reader, &resp).await.is_err() {
        return;
    }

    // Phase 2: TLS upgrade
    let tcp = reader.into_inner();
    let Ok(tls_stream) = acceptor.accept(tcp).await else {
        return;
    };

    // Phase 3: IMAP session
    handle_imap_session(BufReader::new(tls_stream), mailbox).await;
}

/// Extract the folder name from a parsed `imap_types::Mailbox`.
fn mailbox_name(mb: &ImapMailbox<'_>) -> String {
    match mb {
        ImapMailbox::Inbox => "INBOX".to_string(),
        ImapMailbox::Other(other) => {
            let bytes: &[u8] = other.as_ref();
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Byte count of a synchronizing literal closing `line`, if any.
fn literal_len(line: &str) -> Option<usize> {
    let open = line.trim_end().strip_suffix('}')?;
    let start = open.rfind('{')?;
    open[start + 1..].parse().ok()
}

/// Split `A0001 UID SEARCH ALL` into tag, upper-cased command and the
/// rest. `UID` commands keep their sub-command in the name.
fn split_command(line: &str) -> (&str, String, &str) {
    let line = line.trim_end_matches(['\r', '\n']);
    let (tag, rest) = line.split_once(' ').unwrap_or((line, ""));
    let (mut name, mut args) = rest.split_once(' ').unwrap_or((rest, ""));
    let mut command = name.to_ascii_uppercase();
    if command == "UID" {
        (name, args) = args.split_once(' ').unwrap_or((args, ""));
        command = format!("UID {}", name.to_ascii_uppercase());
    }
    (tag, command, args)
}

/// Run the IMAP command loop over an established stream.
///
/// Commands whose arguments the fake parses itself (LOGIN, LIST,
/// UID SEARCH, APPEND) are dispatched from the raw line. Everything
/// else goes through `imap-codec`'s `CommandCodec`, which parses the
/// line into a strongly-typed `Command`.
///
/// Commands named in `Mailbox::refused` get a tagged `NO` instead.
///
/// Read handlers receive a snapshot (`Mailbox` clone) taken under
/// lock. Write handlers receive `&Mutex<Mailbox>` and lock briefly
/// to mutate state.
#[allow(clippy::too_many_lines)]
async fn handle_imap_session<S: AsyncRead + AsyncWrite + Unpin>(
    mut reader: BufReader<S>,
    mailbox: &Mutex<Mailbox>,
) {
    let mut selected_folder: Option<String> = None;
    let mut authenticated = false;
    let codec = CommandCodec::default();

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        if line.trim().is_empty() {
            continue;
        }

        let (tag, command, args) = split_command(&line);

        // Take a snapshot for read-only handlers.
        let snap = mailbox.lock().unwrap().clone();

        if !authenticated && !matches!(command.as_str(), "LOGIN" | "LOGOUT") {
            let resp = format!("{tag} BAD Log in first\r\n");
            if write_line(&mut reader, &resp).await.is_err() {
                break;
            }
            continue;
        }

        if snap.refused.contains(&command) {
            let resp = format!("{tag} NO {command} refused\r\n");
            if write_line(&mut reader, &resp).await.is_err() {
                break;
            }
            continue;
        }

        match command.as_str() {
            "LOGIN" => {
                authenticated = handle_login(tag, args, &snap, &mut reader).await;
                continue;
            }
            "LIST" => {
                handle_list(tag, args, &snap, &mut reader).await;
                continue;
            }
            "UID SEARCH" => {
                handle_uid_search(
                    tag,
                    args,
                    &snap,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
                continue;
            }
            "APPEND" => {
                let Some(len) = literal_len(args) else {
                    let resp = format!("{tag} BAD APPEND expects a literal\r\n");
                    if write_line(&mut reader, &resp).await.is_err() {
                        break;
                    }
                    continue;
                };
                if write_line(&mut reader, "+ Ready for literal data\r\n")
                    .await
                    .is_err()
                {
                    break;
                }
                let Ok(message) = read_literal(&mut reader, len).await else {
                    break;
                };
                // The command line ends after the literal.
                let mut rest = String::new();
                if reader.read_line(&mut rest).await.is_err() {
                    break;
                }
                let before_literal = &args[..args.rfind('{').unwrap_or(args.len())];
                handle_append(tag, before_literal, message, mailbox, &mut reader).await;
                continue;
            }
            _ => {}
        }

        // Parse the command line using imap-codec.
        let Ok((_, parsed)) = codec.decode(line.as_bytes()) else {
            let resp = format!("{tag} BAD Parse error\r\n");
            if write_line(&mut reader, &resp).await.is_err() {
                break;
            }
            continue;
        };

        match parsed.body {
            CommandBody::Select { mailbox: mb, .. } => {
                let name = mailbox_name(&mb);
                selected_folder = handle_select(tag, &name, &snap, &mut reader).await;
            }
            CommandBody::Create { mailbox: mb } => {
                let name = mailbox_name(&mb);
                handle_create(tag, &name, mailbox, &mut reader).await;
            }
            CommandBody::Fetch {
                sequence_set,
                uid: true,
                ..
            } => {
                let want_body = line.to_ascii_uppercase().contains("BODY");
                handle_uid_fetch(
                    tag,
                    &sequence_set,
                    want_body,
                    &snap,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Store {
                ref sequence_set,
                uid: true,
                ref kind,
                ref response,
                ref flags,
                ..
            } => {
                let args = StoreArgs {
                    sequence_set,
                    kind,
                    response,
                    flags,
                };
                handle_uid_store(tag, &args, mailbox, selected_folder.as_deref(), &mut reader)
                    .await;
            }
            CommandBody::Copy {
                ref sequence_set,
                mailbox: ref dest_mb,
                uid: true,
                ..
            } => {
                let dest_name = mailbox_name(dest_mb);
                handle_uid_copy(
                    tag,
                    sequence_set,
                    &dest_name,
                    mailbox,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Expunge => {
                handle_expunge(tag, mailbox, selected_folder.as_deref(), &mut reader).await;
            }
            CommandBody::Close => {
                handle_close(tag, mailbox, selected_folder.as_deref(), &mut reader).await;
                selected_folder = None;
            }
            CommandBody::Logout => {
                handle_logout(tag, &mut reader).await;
                break;
            }
            _ => {
                let resp = format!("{tag} BAD Unknown command\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_marker() {
        assert_eq!(literal_len(r#""INBOX" (\Seen) {310}"#), Some(310));
        assert_eq!(literal_len(r#""INBOX" {0}\r\n"#), Some(0));
        assert_eq!(literal_len(r#""INBOX""#), None);
    }

    #[test]
    fn command_names() {
        assert_eq!(
            split_command("A1 uid search ALL\r\n"),
            ("A1", "UID SEARCH".to_string(), "ALL")
        );
        assert_eq!(
            split_command(r#"A2 LIST "" "*""#),
            ("A2", "LIST".to_string(), r#""" "*""#)
        );
        assert_eq!(split_command("A3 LOGOUT\r\n"), ("A3", "LOGOUT".to_string(), ""));
    }
}
