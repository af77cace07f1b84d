//! Content descriptors and the binary payloads that move through a capture.

use crate::{Error, Result};
use base64::Engine as Base64Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// What the sandbox should render before a frame is captured.
///
/// Exactly one of `source_url` / `inline_markup` is present. Both
/// [`ContentSpec::url`] / [`ContentSpec::markup`] and deserialization enforce
/// this, so a `ContentSpec` value in hand is always well formed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_markup: Option<String>,
    render_wait_ms: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContentSpec {
    #[serde(default)]
    source_url: Option<String>,
    #[serde(default)]
    inline_markup: Option<String>,
    #[serde(default)]
    render_wait_ms: u64,
}

impl<'de> Deserialize<'de> for ContentSpec {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawContentSpec::deserialize(deserializer)?;
        ContentSpec::new(raw.source_url, raw.inline_markup, raw.render_wait_ms)
            .map_err(serde::de::Error::custom)
    }
}

impl ContentSpec {
    /// Build a spec, rejecting anything but exactly one content source.
    pub fn new(
        source_url: Option<String>,
        inline_markup: Option<String>,
        render_wait_ms: u64,
    ) -> Result<Self> {
        match (&source_url, &inline_markup) {
            (Some(_), Some(_)) => Err(Error::InvalidContent(
                "both sourceUrl and inlineMarkup are set".into(),
            )),
            (None, None) => Err(Error::InvalidContent("No content source provided".into())),
            _ => Ok(Self {
                source_url,
                inline_markup,
                render_wait_ms,
            }),
        }
    }

    /// Content loaded by navigating to `url`.
    pub fn url(url: impl Into<String>, render_wait_ms: u64) -> Self {
        Self {
            source_url: Some(url.into()),
            inline_markup: None,
            render_wait_ms,
        }
    }

    /// Content injected directly as markup.
    pub fn markup(markup: impl Into<String>, render_wait_ms: u64) -> Self {
        Self {
            source_url: None,
            inline_markup: Some(markup.into()),
            render_wait_ms,
        }
    }

    pub fn source_url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }

    pub fn inline_markup(&self) -> Option<&str> {
        self.inline_markup.as_deref()
    }

    pub fn render_wait_ms(&self) -> u64 {
        self.render_wait_ms
    }
}

/// A captured frame: opaque bytes plus their MIME type.
#[derive(Clone, PartialEq, Eq)]
pub struct RawImage {
    pub mime: String,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for RawImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawImage")
            .field("mime", &self.mime)
            .field("len", &self.data.len())
            .finish()
    }
}

impl RawImage {
    pub fn new(mime: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            data,
        }
    }

    pub fn png(data: Vec<u8>) -> Self {
        Self::new("image/png", data)
    }

    /// Encode as a `data:<mime>;base64,<payload>` URL for the wire.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime,
            base64::engine::general_purpose::STANDARD.encode(&self.data)
        )
    }

    /// Parse a base64 data URL produced by [`RawImage::to_data_url`].
    pub fn from_data_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| Error::Other("frame is not a data URL".into()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| Error::Other("data URL has no payload".into()))?;
        let mime = header
            .strip_suffix(";base64")
            .ok_or_else(|| Error::Other("data URL is not base64-encoded".into()))?;
        let data = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| Error::Other(format!("invalid base64 in data URL: {}", e)))?;
        let mime = if mime.is_empty() { "application/octet-stream" } else { mime };
        Ok(Self::new(mime, data))
    }

    /// Hex SHA-256 of the frame bytes, used to identify frames in logs.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.data))
    }
}

/// The single artifact produced by an [`Assembler`](crate::assembly::Assembler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryDocument {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl BinaryDocument {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
