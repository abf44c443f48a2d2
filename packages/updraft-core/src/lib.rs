pub mod callbacks;
pub mod config;
pub mod error;
pub mod installer;
pub mod prompt;
pub mod updater;

// Re-export common types
pub use callbacks::CallbackRegistry;
pub use config::{AppIdentity, UpdateConfig, DEFAULT_CHECK_INTERVAL_SECS, MIN_CHECK_INTERVAL_SECS};
pub use error::UpdateError;
pub use installer::{InstallerLauncher, LaunchError, ProcessInstallerLauncher};
pub use prompt::{HeadlessPrompt, PromptResponse, UpdatePrompt};
pub use updater::{CheckResult, Updater, UpdaterState};
