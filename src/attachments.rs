use serde::{Deserialize, Serialize};

/// Inline-encoded message attachment. The database keeps two legacy parallel
/// text arrays (payloads and kind tags); this type is the only place they are
/// assembled or split, which keeps the arrays from drifting apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    /// Base64-encoded file body.
    pub payload: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
    Voice,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::Image => "image",
            AttachmentKind::File => "file",
            AttachmentKind::Voice => "voice",
        }
    }

    fn from_tag(tag: &str) -> Self {
        match tag {
            "image" => AttachmentKind::Image,
            "voice" => AttachmentKind::Voice,
            _ => AttachmentKind::File,
        }
    }
}

/// Splits attachments into the two column arrays stored on a message row.
pub fn to_columns(attachments: &[Attachment]) -> (Vec<String>, Vec<String>) {
    let payloads = attachments.iter().map(|a| a.payload.clone()).collect();
    let kinds = attachments
        .iter()
        .map(|a| a.kind.as_str().to_string())
        .collect();
    (payloads, kinds)
}

/// Reassembles attachments from the stored arrays. Legacy rows may have
/// desynchronized arrays; payloads missing a kind tag default to `file`.
pub fn from_columns(
    payloads: Option<&Vec<String>>,
    kinds: Option<&Vec<String>>,
) -> Vec<Attachment> {
    let payloads = match payloads {
        Some(payloads) => payloads,
        None => return Vec::new(),
    };
    let empty = Vec::new();
    let kinds = kinds.unwrap_or(&empty);

    payloads
        .iter()
        .enumerate()
        .map(|(idx, payload)| Attachment {
            kind: kinds
                .get(idx)
                .map(|tag| AttachmentKind::from_tag(tag))
                .unwrap_or(AttachmentKind::File),
            payload: payload.clone(),
        })
        .collect()
}
