use crate::{bundle::Resources, extension::HookError};

/// The outcome of translating a snapshot.
///
/// Resources and an error may both be present: translation continues past
/// objects it cannot render, and callers must check both fields.
#[derive(Debug, Default)]
pub struct Translation {
    pub resources: Option<Resources>,
    pub error: Option<TranslateError>,
}

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    /// A fail-closed hook failed; nothing may be published for this cycle.
    #[error("extension hook failed: {0}")]
    Hook(#[from] HookError),

    /// Some objects could not be translated and were omitted.
    #[error("failed to translate {} objects: {}", .0.len(), .0.join("; "))]
    Objects(Vec<String>),
}

/// Translates a snapshot into encoded resources.
#[async_trait::async_trait]
pub trait Translate<S: ?Sized + Sync>: Send + Sync {
    async fn translate(&self, snapshot: &S) -> Translation;
}

// === impl Translation ===

impl Translation {
    pub fn ok(resources: Resources) -> Self {
        Self {
            resources: Some(resources),
            error: None,
        }
    }

    pub fn failed(error: impl Into<TranslateError>) -> Self {
        Self {
            resources: None,
            error: Some(error.into()),
        }
    }
}
