use thiserror::Error;

/// Errors surfaced synchronously by the public entry points. Failures that
/// happen inside a background check cycle are never thrown at the host;
/// they travel through the error callback instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    /// `start()` or `check_for_update()` before `configure()`, or required
    /// fields (appcast URL, app name, version) were never supplied.
    #[error("updater is not configured")]
    NotConfigured,
    /// Configuration or callback registration after `start()`.
    #[error("updater configuration is frozen once started")]
    AlreadyStarted,
    /// A check cycle is already in flight; try again later.
    #[error("an update check is already in progress")]
    Busy,
    /// `cleanup()` has been called; the updater is finished.
    #[error("updater has been cleaned up")]
    Terminated,
    /// Each callback slot can only be filled once.
    #[error("callback slot '{0}' is already registered")]
    HandlerAlreadySet(&'static str),
}
