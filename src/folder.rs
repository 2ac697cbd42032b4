//! IMAP folder paths
//!
//! Folders are plain path strings whose hierarchy delimiter is chosen by
//! the server (`/`, `.`, or none at all). Nothing here talks to the
//! server; these helpers build LIST arguments and map remote paths onto
//! local store paths.

/// Quote a string for use as an IMAP quoted-string argument.
#[must_use]
pub fn quote(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// LIST pattern matching the direct children of `path`.
///
/// `%` does not cross hierarchy levels, so `INBOX/%` lists `INBOX/A` but
/// not `INBOX/A/B`.
#[must_use]
pub fn child_pattern(path: Option<&str>, delimiter: char) -> String {
    match path {
        Some(path) => quote(&format!("{path}{delimiter}%")),
        None => quote("%"),
    }
}

/// Whether `name` sits directly below `parent`.
///
/// LIST results are checked with this because a `%` or `*` inside
/// `parent` is a wildcard to the server too.
#[must_use]
pub fn is_child(parent: &str, delimiter: char, name: &str) -> bool {
    name.strip_prefix(parent)
        .and_then(|rest| rest.strip_prefix(delimiter))
        .is_some_and(|leaf| !leaf.is_empty() && !leaf.contains(delimiter))
}

/// Local store path for a remote folder: the server delimiter becomes
/// `/` and surrounding quotes are dropped.
///
/// ```
/// use imap_bulk_decrypt::folder::local_path;
///
/// assert_eq!(local_path("INBOX.Sent.2024", Some('.')), "INBOX/Sent/2024");
/// assert_eq!(local_path("\"Archive\"", Some('/')), "Archive");
/// ```
#[must_use]
pub fn local_path(path: &str, delimiter: Option<char>) -> String {
    let unquoted = path.replace('"', "");
    match delimiter {
        Some('/') | None => unquoted,
        Some(d) => unquoted.replace(d, "/"),
    }
}

/// Last path segment, for log output.
#[must_use]
pub fn leaf(path: &str, delimiter: Option<char>) -> &str {
    delimiter
        .and_then(|d| path.rsplit(d).next())
        .unwrap_or(path)
}
