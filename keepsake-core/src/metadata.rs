/*!
Save header and sidecar metadata schema.

The header is the plaintext first line of every save file. It describes how
the body was transformed and carries the integrity checksum of the final body
bytes. When the body is encrypted, the header (with `Checksum` and `TagB64`
cleared) is also the associated data bound into the authentication tag.
*/

use crate::serializer::{Serializer, SerializerExt};
use crate::stream::MAX_HEADER_LEN;
use crate::{KeepsakeError, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Format identifier written into every header.
pub const FORMAT_ID: &str = "KEEPSAKE.SAVE_v1";

/// Content type of the body before any transform.
pub const DEFAULT_CONTENT_TYPE: &str = "application/keepsake+json";

/// Current on-disk format version.
pub const FORMAT_VERSION: SemVer = SemVer {
    major: 1,
    minor: 0,
    patch: 0,
};

/// Semantic version of the on-disk format
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct SemVer {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl std::fmt::Display for SemVer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Plaintext metadata stored as the first line of a save file
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct SaveHeader {
    pub format_id: String,
    pub version: SemVer,

    /// ISO 8601 UTC timestamps
    pub created_utc: String,
    pub modified_utc: String,

    pub app_version: String,
    pub content_type: String,

    /// Compression algorithm applied to the body, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compress: Option<String>,

    /// AEAD algorithm applied to the body, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypt: Option<String>,

    #[serde(default, rename = "NonceB64", skip_serializing_if = "Option::is_none")]
    pub nonce_b64: Option<String>,

    #[serde(default, rename = "TagB64", skip_serializing_if = "Option::is_none")]
    pub tag_b64: Option<String>,

    /// Lowercase hex SHA-256 of the final on-disk body bytes
    #[serde(default)]
    pub checksum: String,

    pub profile: String,

    pub playtime_seconds: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl SaveHeader {
    /// Create a fresh header for a new save.
    ///
    /// Both timestamps are set to now, no transforms are recorded and the
    /// checksum is empty until the body has been produced.
    pub fn new<P, A>(profile: P, app_version: A) -> Self
    where
        P: Into<String>,
        A: Into<String>,
    {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        Self {
            format_id: FORMAT_ID.to_string(),
            version: FORMAT_VERSION,
            created_utc: now.clone(),
            modified_utc: now,
            app_version: app_version.into(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            compress: None,
            encrypt: None,
            nonce_b64: None,
            tag_b64: None,
            checksum: String::new(),
            profile: profile.into(),
            playtime_seconds: 0,
            summary: None,
        }
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_summary(mut self, summary: Option<String>) -> Self {
        self.summary = summary;
        self
    }

    pub fn with_playtime(mut self, seconds: i64) -> Self {
        self.playtime_seconds = seconds;
        self
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypt.as_deref().is_some_and(|e| !e.is_empty())
    }

    pub fn is_compressed(&self) -> bool {
        self.compress.as_deref().is_some_and(|c| !c.is_empty())
    }

    /// Associated data bound into the AEAD tag when saving.
    ///
    /// This is the serialized header with `Checksum` emptied and `TagB64`
    /// absent, which is exactly the header state at encryption time.
    pub fn associated_data(&self, serializer: &dyn Serializer) -> Result<Vec<u8>> {
        let mut unsealed = self.clone();
        unsealed.checksum.clear();
        unsealed.tag_b64 = None;
        Ok(serializer.serialize(&unsealed)?.into_bytes())
    }

    /// Associated data rebuilt from a header line as stored on disk.
    ///
    /// Every key and value of the stored line is kept, so any edit to it
    /// (including added, removed or nulled keys) changes these bytes. For an
    /// untouched line the result equals [`SaveHeader::associated_data`].
    pub fn associated_data_from_line(line: &[u8], serializer: &dyn Serializer) -> Result<Vec<u8>> {
        let text = std::str::from_utf8(line)
            .map_err(|e| KeepsakeError::invalid_format(format!("header is not UTF-8: {e}")))?;
        let mut document = serializer
            .read_value(text)
            .map_err(|e| KeepsakeError::invalid_format(format!("malformed header: {e}")))?;
        let fields = document
            .as_object_mut()
            .ok_or_else(|| KeepsakeError::invalid_format("header is not an object"))?;
        fields.insert("Checksum".to_string(), serde_json::Value::String(String::new()));
        fields.remove("TagB64");
        Ok(serializer.write_value(&document)?.into_bytes())
    }

    /// Serialize the header as a single line of text.
    ///
    /// Lines longer than [`MAX_HEADER_LEN`] are refused, since no loader
    /// would accept them.
    pub fn to_line(&self, serializer: &dyn Serializer) -> Result<String> {
        let line = serializer.serialize(self)?;
        if line.contains('\n') {
            return Err(KeepsakeError::invalid_format(
                "serializer produced a multi-line header",
            ));
        }
        if line.len() > MAX_HEADER_LEN {
            return Err(KeepsakeError::validation(format!(
                "save header is {} bytes, over the {MAX_HEADER_LEN} byte limit",
                line.len()
            )));
        }
        Ok(line)
    }

    /// Parse a header line as read from disk.
    pub fn from_line(line: &[u8], serializer: &dyn Serializer) -> Result<Self> {
        let text = std::str::from_utf8(line)
            .map_err(|e| KeepsakeError::invalid_format(format!("header is not UTF-8: {e}")))?;
        let header: SaveHeader = serializer
            .deserialize(text)
            .map_err(|e| KeepsakeError::invalid_format(format!("malformed header: {e}")))?;
        header.validate()?;
        Ok(header)
    }

    /// Validate identity and version compatibility
    pub fn validate(&self) -> Result<()> {
        if self.format_id != FORMAT_ID {
            return Err(KeepsakeError::invalid_format(format!(
                "unknown format id '{}'",
                self.format_id
            )));
        }
        if !self.is_compatible() {
            return Err(KeepsakeError::invalid_format(format!(
                "incompatible format version {} (current: {})",
                self.version, FORMAT_VERSION
            )));
        }
        if self.is_encrypted() && (self.nonce_b64.is_none() || self.tag_b64.is_none()) {
            return Err(KeepsakeError::invalid_format(
                "encrypted save is missing its nonce or tag",
            ));
        }
        Ok(())
    }

    /// Major versions must match; there is no migration between them.
    pub fn is_compatible(&self) -> bool {
        self.version.major == FORMAT_VERSION.major
    }

    /// Compare a computed checksum against the stored one, ignoring hex case.
    pub fn verify_checksum(&self, actual: &str) -> Result<()> {
        if actual.eq_ignore_ascii_case(&self.checksum) {
            Ok(())
        } else {
            Err(KeepsakeError::IntegrityCheckFailed {
                expected: self.checksum.clone(),
                actual: actual.to_string(),
            })
        }
    }
}

/// Compute the lowercase hex SHA-256 of the provided data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Informational sidecar written next to each save. Not integrity checked.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SlotMetadata {
    /// Manual slot index, or -1 for autosaves
    pub slot: i64,
    pub profile: String,
    pub created_utc: String,
    pub modified_utc: String,
    pub duration_ms: u64,
    pub scene: String,
    #[serde(default)]
    pub summary: Option<String>,
    pub approx_bytes: u64,
    pub is_autosave: bool,
    /// Rolling autosave index, or -1 for manual saves
    pub autosave_index: i64,
}

impl SlotMetadata {
    fn base(profile: &str, duration_ms: u64, summary: Option<String>, approx_bytes: u64) -> Self {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        Self {
            slot: -1,
            profile: profile.to_string(),
            created_utc: now.clone(),
            modified_utc: now,
            duration_ms,
            scene: String::new(),
            summary,
            approx_bytes,
            is_autosave: false,
            autosave_index: -1,
        }
    }

    pub fn for_manual(
        slot: u32,
        profile: &str,
        duration_ms: u64,
        summary: Option<String>,
        approx_bytes: u64,
    ) -> Self {
        Self {
            slot: i64::from(slot),
            ..Self::base(profile, duration_ms, summary, approx_bytes)
        }
    }

    pub fn for_autosave(
        index: u32,
        profile: &str,
        duration_ms: u64,
        summary: Option<String>,
        approx_bytes: u64,
    ) -> Self {
        Self {
            is_autosave: true,
            autosave_index: i64::from(index),
            ..Self::base(profile, duration_ms, summary, approx_bytes)
        }
    }

    pub fn with_scene<S: Into<String>>(mut self, scene: S) -> Self {
        self.scene = scene.into();
        self
    }
}
