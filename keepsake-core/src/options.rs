/*!
Per-call options and the operation context.
*/

use crate::metadata::DEFAULT_CONTENT_TYPE;
use crate::{KeepsakeError, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Profile used when none is given.
pub const DEFAULT_PROFILE: &str = "Default";

/// Options for a single save
#[derive(Debug, Clone, PartialEq)]
pub struct SaveOptions {
    pub use_compression: bool,
    pub use_encryption: bool,
    pub profile: String,
    /// Free-text description stored in the header and the sidecar
    pub summary: Option<String>,
    pub content_type: String,
    pub app_version: String,
    pub playtime_seconds: i64,
    /// Scene or context tag recorded in the sidecar
    pub scene: Option<String>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            use_compression: false,
            use_encryption: false,
            profile: DEFAULT_PROFILE.to_string(),
            summary: None,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            app_version: "Unknown".to_string(),
            playtime_seconds: 0,
            scene: None,
        }
    }
}

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile<S: Into<String>>(mut self, profile: S) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.use_compression = enabled;
        self
    }

    pub fn with_encryption(mut self, enabled: bool) -> Self {
        self.use_encryption = enabled;
        self
    }

    pub fn with_summary<S: Into<String>>(mut self, summary: S) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_app_version<S: Into<String>>(mut self, version: S) -> Self {
        self.app_version = version.into();
        self
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_playtime(mut self, seconds: i64) -> Self {
        self.playtime_seconds = seconds;
        self
    }

    pub fn with_scene<S: Into<String>>(mut self, scene: S) -> Self {
        self.scene = Some(scene.into());
        self
    }
}

/// Options for a single load.
///
/// The transform flags are hints only; the stored header decides how the body
/// is decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    pub use_compression: bool,
    pub use_encryption: bool,
    pub profile: String,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            use_compression: false,
            use_encryption: false,
            profile: DEFAULT_PROFILE.to_string(),
        }
    }
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile<S: Into<String>>(mut self, profile: S) -> Self {
        self.profile = profile.into();
        self
    }
}

impl From<&SaveOptions> for LoadOptions {
    fn from(options: &SaveOptions) -> Self {
        Self {
            use_compression: options.use_compression,
            use_encryption: options.use_encryption,
            profile: options.profile.clone(),
        }
    }
}

/// Receives fractional progress in `[0, 1]`
pub trait ProgressSink: Send + Sync {
    fn report(&self, fraction: f32);
}

impl<F> ProgressSink for F
where
    F: Fn(f32) + Send + Sync,
{
    fn report(&self, fraction: f32) {
        self(fraction)
    }
}

/// Progress and cancellation for one operation
#[derive(Clone)]
pub struct OperationContext {
    progress: Option<Arc<dyn ProgressSink>>,
    cancel: CancellationToken,
}

impl Default for OperationContext {
    fn default() -> Self {
        Self {
            progress: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress<P: ProgressSink + 'static>(mut self, progress: P) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with [`KeepsakeError::Cancelled`] once cancellation was requested
    pub fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(KeepsakeError::Cancelled);
        }
        Ok(())
    }

    pub fn report(&self, fraction: f32) {
        if let Some(progress) = &self.progress {
            progress.report(fraction.clamp(0.0, 1.0));
        }
    }
}

impl std::fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationContext")
            .field("has_progress", &self.progress.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
