//! IMAP message flags
//!
//! Flags fetched from the server travel with a message into the local
//! store, so they need both an IMAP and a Maildir spelling.

use std::fmt;

/// An IMAP message flag.
///
/// System flags (prefixed with `\` in the IMAP protocol) have
/// dedicated variants. User-defined keyword flags use [`Flag::Keyword`].
///
/// # Examples
///
/// ```
/// use imap_bulk_decrypt::Flag;
///
/// assert_eq!(Flag::parse("\\seen"), Flag::Seen);
/// assert_eq!(Flag::Seen.maildir_char(), Some('S'));
/// assert_eq!(Flag::Keyword("$Junk".into()).maildir_char(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    Seen,
    Answered,
    Flagged,
    Deleted,
    Draft,
    /// `\Recent` is session-scoped and never stored.
    Recent,
    Keyword(String),
}

impl Flag {
    /// Parse the IMAP wire representation. System flag names are
    /// case-insensitive.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "\\seen" => Self::Seen,
            "\\answered" => Self::Answered,
            "\\flagged" => Self::Flagged,
            "\\deleted" => Self::Deleted,
            "\\draft" => Self::Draft,
            "\\recent" => Self::Recent,
            _ => Self::Keyword(s.to_string()),
        }
    }

    /// The IMAP wire representation of this flag.
    #[must_use]
    pub fn as_imap_str(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Recent => "\\Recent",
            Self::Keyword(kw) => kw,
        }
    }

    /// The Maildir info letter, if the flag has one.
    #[must_use]
    pub const fn maildir_char(&self) -> Option<char> {
        match self {
            Self::Draft => Some('D'),
            Self::Flagged => Some('F'),
            Self::Answered => Some('R'),
            Self::Seen => Some('S'),
            Self::Deleted => Some('T'),
            Self::Recent | Self::Keyword(_) => None,
        }
    }

    /// Whether the flag may be sent back in an APPEND.
    #[must_use]
    pub const fn is_storable(&self) -> bool {
        !matches!(self, Self::Recent)
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_imap_str())
    }
}

impl From<async_imap::types::Flag<'_>> for Flag {
    fn from(flag: async_imap::types::Flag<'_>) -> Self {
        use async_imap::types::Flag as Wire;
        match flag {
            Wire::Seen => Self::Seen,
            Wire::Answered => Self::Answered,
            Wire::Flagged => Self::Flagged,
            Wire::Deleted => Self::Deleted,
            Wire::Draft => Self::Draft,
            Wire::Recent => Self::Recent,
            Wire::MayCreate => Self::Keyword("\\*".to_string()),
            Wire::Custom(name) => Self::parse(&name),
        }
    }
}

/// Maildir info string for a flag set: letters sorted, deduplicated.
#[must_use]
pub fn maildir_info(flags: &[Flag]) -> String {
    let mut chars: Vec<char> = flags.iter().filter_map(Flag::maildir_char).collect();
    chars.sort_unstable();
    chars.dedup();
    chars.into_iter().collect()
}

/// Parenthesized IMAP flag list for APPEND, `None` when empty.
#[must_use]
pub fn imap_flag_list(flags: &[Flag]) -> Option<String> {
    let names: Vec<&str> = flags
        .iter()
        .filter(|f| f.is_storable())
        .map(Flag::as_imap_str)
        .collect();
    if names.is_empty() {
        None
    } else {
        Some(format!("({})", names.join(" ")))
    }
}
