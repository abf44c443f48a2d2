use async_trait::async_trait;

use updraft_feed::ReleaseCandidate;

/// What the user decided about an offered update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptResponse {
    /// Proceed to download and install.
    Install,
    /// Suppress future prompts for this exact version.
    Skip,
    /// Do nothing now; offer again on the next check.
    RemindLater,
}

/// Consent seam between the state machine and whatever UI the host has.
/// The machine calls this from its background worker; a GUI host marshals
/// onto its own event loop inside the implementation.
#[async_trait]
pub trait UpdatePrompt: Send + Sync {
    async fn prompt(&self, candidate: &ReleaseCandidate) -> PromptResponse;
}

/// Default prompt for hosts without a UI layer: logs the offer and declines
/// quietly. Headless operation is a supported configuration.
#[derive(Default)]
pub struct HeadlessPrompt;

#[async_trait]
impl UpdatePrompt for HeadlessPrompt {
    async fn prompt(&self, candidate: &ReleaseCandidate) -> PromptResponse {
        tracing::info!(
            version = %candidate.version,
            url = %candidate.download_url,
            "update available but no prompt is registered"
        );
        PromptResponse::RemindLater
    }
}
