//! Core types for Omnipost

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// One publishing backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// Graph API page feed
    Facebook,
    /// Graph API business media (image mandatory)
    Instagram,
    /// AT Protocol personal data server
    Bluesky,
    /// Browser compose intent
    Twitter,
}

impl ProviderId {
    pub const ALL: [ProviderId; 4] = [
        ProviderId::Facebook,
        ProviderId::Instagram,
        ProviderId::Bluesky,
        ProviderId::Twitter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Facebook => "facebook",
            ProviderId::Instagram => "instagram",
            ProviderId::Bluesky => "bluesky",
            ProviderId::Twitter => "twitter",
        }
    }

    /// Human-facing name used in messages
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderId::Facebook => "Facebook",
            ProviderId::Instagram => "Instagram",
            ProviderId::Bluesky => "Bluesky",
            ProviderId::Twitter => "Twitter/X",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "facebook" | "fb" => Ok(ProviderId::Facebook),
            "instagram" | "ig" => Ok(ProviderId::Instagram),
            "bluesky" | "bsky" => Ok(ProviderId::Bluesky),
            "twitter" | "x" => Ok(ProviderId::Twitter),
            other => Err(format!(
                "Unknown platform '{}'. Valid options: facebook, instagram, bluesky, twitter",
                other
            )),
        }
    }
}

/// Supported image MIME types for attachments
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImageMimeType {
    Jpeg,
    Png,
    Gif,
    WebP,
}

impl ImageMimeType {
    /// Detect MIME type from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::WebP),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::WebP => "webp",
        }
    }
}

impl fmt::Display for ImageMimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// In-memory image attached to a post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub bytes: Vec<u8>,
    pub mime_type: ImageMimeType,
    /// File name shown to upstream APIs that want one
    pub name: String,
    /// Publicly reachable copy of the same image, if the user has one
    pub public_url: Option<String>,
}

impl ImageAttachment {
    pub fn new(bytes: Vec<u8>, mime_type: ImageMimeType) -> Self {
        let name = format!("image.{}", mime_type.extension());
        Self {
            bytes,
            mime_type,
            name,
            public_url: None,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// A compose request fanned out by the publisher
#[derive(Debug, Clone)]
pub struct PostRequest {
    pub text: String,
    pub targets: BTreeSet<ProviderId>,
    pub image: Option<ImageAttachment>,
}

impl PostRequest {
    pub fn new(text: impl Into<String>, targets: impl IntoIterator<Item = ProviderId>) -> Self {
        Self {
            text: text.into(),
            targets: targets.into_iter().collect(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }
}

/// What a provider adapter receives: the text plus the image as adapted for it
#[derive(Debug, Clone)]
pub struct PostContent {
    pub text: String,
    pub image: Option<ImageAttachment>,
}

/// Successful provider publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// Post id, record URI, or opened intent URL depending on the provider
    pub id: String,
    /// Advisory the user should act on
    pub note: Option<String>,
}

impl Published {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Per-provider result of one publish call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success { id: String, note: Option<String> },
    Failure { message: String },
}

impl Outcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Outcome::Failure {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

impl From<Published> for Outcome {
    fn from(published: Published) -> Self {
        Outcome::Success {
            id: published.id,
            note: published.note,
        }
    }
}

// Wire envelope: `{"success": true, "id": ..., "note"?: ...}` or `{"error": ...}`
impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Outcome::Success { id, note } => {
                let len = if note.is_some() { 3 } else { 2 };
                let mut map = serializer.serialize_map(Some(len))?;
                map.serialize_entry("success", &true)?;
                map.serialize_entry("id", id)?;
                if let Some(note) = note {
                    map.serialize_entry("note", note)?;
                }
                map.end()
            }
            Outcome::Failure { message } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", message)?;
                map.end()
            }
        }
    }
}
