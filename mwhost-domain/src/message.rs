use std::fmt;

// ---------------------------------------------------------------------------
// ImMessage
// ---------------------------------------------------------------------------

/// One per-peer send operation together with its payload.
///
/// Used both for outbound sends (forwarded or queued by the delivery gate)
/// and for inbound messages the engine reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImMessage {
    // ---
    /// Plain text.
    Text(String),

    /// HTML formatted text.
    Html(String),

    /// Conversation subject line.
    Subject(String),

    /// Typing indicator; `false` means stopped typing.
    Typing(bool),

    /// Multipart MIME document (inline images etc.).
    Mime(String),
}

// ---

impl ImMessage {
    // ---
    pub fn kind(&self) -> ImKind {
        // ---
        match self {
            Self::Text(_) => ImKind::Text,
            Self::Html(_) => ImKind::Html,
            Self::Subject(_) => ImKind::Subject,
            Self::Typing(_) => ImKind::Typing,
            Self::Mime(_) => ImKind::Mime,
        }
    }
}

// ---------------------------------------------------------------------------
// ImKind
// ---------------------------------------------------------------------------

/// Operation tag of an [`ImMessage`], without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImKind {
    // ---
    Text,
    Html,
    Subject,
    Typing,
    Mime,
}

// ---

impl fmt::Display for ImKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Html => "html",
            Self::Subject => "subject",
            Self::Typing => "typing",
            Self::Mime => "mime",
        };
        f.write_str(name)
    }
}
