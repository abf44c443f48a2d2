//! Facade over the updraft workspace. Most hosts only need [`Updater`],
//! [`AppIdentity`] and [`UpdateConfig`]; the member crates are re-exported
//! for anything deeper.

use std::sync::Arc;
use tokio::runtime::Runtime;

pub use updraft_core::{
    AppIdentity, CallbackRegistry, CheckResult, HeadlessPrompt, InstallerLauncher, LaunchError,
    PromptResponse, UpdateConfig, UpdateError, UpdatePrompt, Updater, UpdaterState,
};
pub use updraft_feed::{parse_appcast, FeedError, FeedFetcher, HttpFeedFetcher, ReleaseCandidate};
pub use updraft_settings::{keys, JsonFileStore, MemoryStore, SettingsError, SettingsStore};
pub use updraft_utils::{compare_versions, extract_version};

/// One-shot blocking availability check for hosts that do not run their
/// own async runtime. Never prompts or installs; returns the best newer
/// release, if any.
pub fn check_now(
    identity: AppIdentity,
    appcast_url: &str,
) -> Result<Option<ReleaseCandidate>, Box<dyn std::error::Error + Send + Sync>> {
    let rt = Runtime::new()?;
    rt.block_on(async move {
        let updater = Updater::new(Arc::new(MemoryStore::new()));
        let mut results = updater.subscribe();

        updater.configure(identity, UpdateConfig::new(appcast_url))?;
        updater.start()?;
        updater.check_for_update(false, false)?;
        results.changed().await?;

        let result = results.borrow().clone();
        updater.cleanup();
        match result {
            Some(CheckResult::UpdateAvailable(candidate)) => Ok(Some(candidate)),
            Some(CheckResult::Error(message)) => Err(message.into()),
            _ => Ok(None),
        }
    })
}
