//! Collaborator interfaces the crawl core consumes.
//!
//! Implementations live in the surrounding application; the core only depends
//! on these traits and works without either collaborator being present.

use async_trait::async_trait;

/// Optical recognition of a challenge image.
///
/// Used only as a fallback inside the challenge solver; when no recognizer is
/// configured that escalation step is simply skipped.
#[async_trait]
pub trait OcrRecognizer: Send + Sync {
    /// Recognize text in a PNG image, returning the extracted string.
    async fn recognize(&self, image: &[u8]) -> Result<String, String>;
}

/// Login check against the secondary verification service.
///
/// A `false` result is a hard precondition failure: the search does not start.
#[async_trait]
pub trait LoginGate: Send + Sync {
    async fn ensure_logged_in(&self) -> bool;
}
