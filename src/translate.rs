//! Classify encrypted messages and rebuild them in plaintext
//!
//! Two layouts are understood: PGP/MIME (`multipart/encrypted`, control
//! part then ciphertext part) and inline PGP (an armored block in a
//! single-part text body).

use crate::error::{Error, Result};
use crate::message::Message;
use crate::oracle::Decrypt;
use encoding_rs::Encoding;
use tracing::debug;

/// First line of an ASCII-armored PGP message.
pub const ARMOR_BEGIN: &str = "-----BEGIN PGP MESSAGE-----";

/// gpg's diagnostic when none of the recipient keys is available.
const NO_SECKEY: &str = "decryption failed: No secret key";
const NO_SECKEY_STATUS: &str = "[GNUPG:] NO_SECKEY";

/// How a message is encrypted, decided without decrypting anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// PGP/MIME.
    Mime,
    /// Armored block at the start of a line in the text body.
    Inline,
    /// Multipart, but not `multipart/encrypted`.
    Unsupported(String),
    NotEncrypted,
}

/// Decide how `message` is encrypted. Checks run in a fixed order:
/// PGP/MIME, other multipart, inline, plain.
#[must_use]
pub fn classify(message: &Message) -> Classification {
    if message.is_multipart() {
        let content_type = message.headers.get("Content-Type").unwrap_or_default();
        if content_type.to_ascii_lowercase().contains("encrypted") {
            return Classification::Mime;
        }
        return Classification::Unsupported(format!(
            "{content_type} is not PGP/MIME"
        ));
    }

    match message.decoded_body() {
        Ok(body) if has_armor_line(&body) => Classification::Inline,
        _ => Classification::NotEncrypted,
    }
}

fn has_armor_line(body: &[u8]) -> bool {
    body.split(|&b| b == b'\n')
        .any(|line| line.starts_with(ARMOR_BEGIN.as_bytes()))
}

/// Run the oracle with legacy tolerance and apply the acceptance rule:
/// unqualified success, or a valid signature, with non-empty plaintext.
pub async fn decrypt(oracle: &dyn Decrypt, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let outcome = oracle.decrypt(ciphertext, true).await?;

    let accepted =
        outcome.succeeded || (outcome.status == "signature valid" && outcome.signature_valid);
    if accepted && !outcome.plaintext.is_empty() {
        return Ok(outcome.plaintext);
    }

    if outcome.diagnostics.contains(NO_SECKEY) || outcome.diagnostics.contains(NO_SECKEY_STATUS) {
        return Err(Error::NoSecretKey);
    }
    Err(Error::Gpg(format!(
        "Could not decrypt message, gpg reported \"{}\"",
        outcome.status
    )))
}

/// Decrypt `message` and return its plaintext form.
///
/// PGP/MIME messages are replaced by the decrypted MIME entity, with
/// every envelope header it does not define carried over. Inline
/// messages keep their headers and get a decoded UTF-8 body.
pub async fn translate(oracle: &dyn Decrypt, message: Message) -> Result<Message> {
    match classify(&message) {
        Classification::Mime => translate_mime(oracle, &message).await,
        Classification::Inline => translate_inline(oracle, message).await,
        Classification::Unsupported(reason) => Err(Error::MultipartEncrypted(reason)),
        Classification::NotEncrypted => Err(Error::NotEncrypted),
    }
}

async fn translate_mime(oracle: &dyn Decrypt, message: &Message) -> Result<Message> {
    let parts = message.parts()?;
    let encrypted = parts.get(1).ok_or_else(|| {
        Error::MultipartEncrypted(format!(
            "PGP/MIME message has {} part(s), expected 2",
            parts.len()
        ))
    })?;

    let plaintext = decrypt(oracle, &encrypted.decoded_body()?).await?;

    let mut decrypted = Message::parse(&plaintext);
    // An entity without Content-Type is text/plain; the envelope's
    // multipart/encrypted must not stand in for it.
    if !decrypted.headers.contains("Content-Type") {
        decrypted.headers.add("Content-Type", "text/plain");
    }
    decrypted.headers.merge_missing(&message.headers);
    debug!("Rebuilt PGP/MIME message with {} headers", decrypted.headers.len());
    Ok(decrypted)
}

async fn translate_inline(oracle: &dyn Decrypt, mut message: Message) -> Result<Message> {
    let ciphertext = message.decoded_body()?;
    let plaintext = decrypt(oracle, &ciphertext).await?;

    let label = armor_charset(&ciphertext).unwrap_or_else(|| "utf-8".to_string());
    let text = decode_text(&label, &plaintext)?;

    message.set_text_body(&text);
    Ok(message)
}

/// Decode `bytes` in the charset named by `label`, strictly.
///
/// WHATWG labels map Latin-1 and ASCII to windows-1252; those two keep
/// their own meaning here.
fn decode_text(label: &str, bytes: &[u8]) -> Result<String> {
    let invalid = || Error::Encoding(format!("Decrypted text is not valid {label}"));

    match label.to_ascii_lowercase().replace('_', "-").as_str() {
        "iso-8859-1" | "iso8859-1" | "latin-1" | "latin1" | "l1" | "cp819" => {
            Ok(bytes.iter().copied().map(char::from).collect())
        }
        "us-ascii" | "ascii" | "us" => {
            if !bytes.is_ascii() {
                return Err(invalid());
            }
            String::from_utf8(bytes.to_vec()).map_err(|_| invalid())
        }
        _ => {
            let encoding = Encoding::for_label(label.as_bytes())
                .ok_or_else(|| Error::Gpg(format!("Unknown encoding: {label}")))?;
            encoding
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(std::borrow::Cow::into_owned)
                .ok_or_else(invalid)
        }
    }
}

/// Value of a `Charset: <name>` armor header, if any.
fn armor_charset(ciphertext: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(ciphertext);
    let (_, rest) = text.split_once("Charset: ")?;
    let name: String = rest.chars().take_while(|c| !c.is_whitespace()).collect();
    Some(name)
}
