use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use updraft_feed::{FeedFetcher, HttpFeedFetcher, ReleaseCandidate};
use updraft_settings::{keys, SettingsStore};
use updraft_utils::{compare_versions, unix_now};

use crate::callbacks::CallbackRegistry;
use crate::config::{AppIdentity, UpdateConfig, DEFAULT_CHECK_INTERVAL_SECS};
use crate::error::UpdateError;
use crate::installer::{InstallerLauncher, ProcessInstallerLauncher};
use crate::prompt::{HeadlessPrompt, PromptResponse, UpdatePrompt};

/// Where the machine currently is. The `Checking` through
/// `LaunchingInstaller` states belong to one in-flight cycle; a second
/// check is rejected with `Busy` while any of them is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdaterState {
    Unconfigured,
    Configured,
    Idle,
    Checking,
    PromptingUser,
    Downloading,
    AwaitingShutdownConsent,
    LaunchingInstaller,
    Terminated,
}

impl UpdaterState {
    pub fn is_cycle_active(&self) -> bool {
        matches!(
            self,
            UpdaterState::Checking
                | UpdaterState::PromptingUser
                | UpdaterState::Downloading
                | UpdaterState::AwaitingShutdownConsent
                | UpdaterState::LaunchingInstaller
        )
    }
}

/// Outcome of one check cycle, published through [`Updater::subscribe`]
/// after the cycle's callbacks have fired.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckResult {
    NoUpdate,
    UpdateAvailable(ReleaseCandidate),
    Error(String),
    Cancelled,
}

struct Inner {
    state: Mutex<UpdaterState>,
    identity: Mutex<Option<AppIdentity>>,
    config: Mutex<Option<UpdateConfig>>,
    callbacks: CallbackRegistry,
    settings: Arc<dyn SettingsStore>,
    fetcher: Mutex<Arc<dyn FeedFetcher>>,
    prompt: Mutex<Arc<dyn UpdatePrompt>>,
    launcher: Mutex<Arc<dyn InstallerLauncher>>,
    started: AtomicBool,
    cancelled: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
    result_tx: watch::Sender<Option<CheckResult>>,
}

/// The update-check-and-install state machine. All entry points are
/// non-blocking and safe to call from the host's own thread; the actual
/// work runs on spawned tokio tasks, which is also where every host
/// callback is delivered. Hosts marshal back onto their UI context
/// themselves.
pub struct Updater {
    inner: Arc<Inner>,
}

impl Updater {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        let (result_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(UpdaterState::Unconfigured),
                identity: Mutex::new(None),
                config: Mutex::new(None),
                callbacks: CallbackRegistry::new(),
                settings,
                fetcher: Mutex::new(Arc::new(HttpFeedFetcher::new())),
                prompt: Mutex::new(Arc::new(HeadlessPrompt)),
                launcher: Mutex::new(Arc::new(ProcessInstallerLauncher::new())),
                started: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                timer: Mutex::new(None),
                result_tx,
            }),
        }
    }

    /// Swaps the feed fetcher; rejected once started.
    pub fn set_feed_fetcher(&self, fetcher: Arc<dyn FeedFetcher>) -> Result<(), UpdateError> {
        self.set_component(&self.inner.fetcher, fetcher)
    }

    /// Swaps the consent prompt; rejected once started.
    pub fn set_prompt(&self, prompt: Arc<dyn UpdatePrompt>) -> Result<(), UpdateError> {
        self.set_component(&self.inner.prompt, prompt)
    }

    /// Swaps the installer launcher; rejected once started.
    pub fn set_installer_launcher(
        &self,
        launcher: Arc<dyn InstallerLauncher>,
    ) -> Result<(), UpdateError> {
        self.set_component(&self.inner.launcher, launcher)
    }

    fn set_component<T: ?Sized>(
        &self,
        slot: &Mutex<Arc<T>>,
        value: Arc<T>,
    ) -> Result<(), UpdateError> {
        if self.inner.started.load(AtomicOrdering::SeqCst) {
            return Err(UpdateError::AlreadyStarted);
        }
        *lock(slot) = value;
        Ok(())
    }

    /// Host callback slots; register handlers here before `start()`.
    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.inner.callbacks
    }

    /// Snapshot stream of check outcomes, most recent cycle only.
    pub fn subscribe(&self) -> watch::Receiver<Option<CheckResult>> {
        self.inner.result_tx.subscribe()
    }

    pub fn state(&self) -> UpdaterState {
        *lock(&self.inner.state)
    }

    /// Supplies identity and configuration. Fails with `AlreadyStarted`
    /// after `start()`, and with `NotConfigured` when required fields
    /// (appcast URL, app name, version) are missing.
    pub fn configure(
        &self,
        identity: AppIdentity,
        config: UpdateConfig,
    ) -> Result<(), UpdateError> {
        if self.inner.started.load(AtomicOrdering::SeqCst) {
            return Err(UpdateError::AlreadyStarted);
        }
        if self.inner.cancelled.load(AtomicOrdering::SeqCst) {
            return Err(UpdateError::Terminated);
        }
        if !identity.is_valid() || !config.is_valid() {
            return Err(UpdateError::NotConfigured);
        }

        self.persist_config(&config);
        *lock(&self.inner.identity) = Some(identity);
        *lock(&self.inner.config) = Some(config);

        let mut state = lock(&self.inner.state);
        if *state == UpdaterState::Unconfigured {
            *state = UpdaterState::Configured;
        }
        Ok(())
    }

    // Mirrors the configuration into the settings store so it survives
    // restarts alongside lastCheckTime/skippedVersion. Store failures are
    // logged, not fatal.
    fn persist_config(&self, config: &UpdateConfig) {
        let settings = &self.inner.settings;
        let entries = [
            (keys::APPCAST_URL, config.appcast_url.clone()),
            (
                keys::CHECK_INTERVAL_SECONDS,
                config.check_interval_secs.to_string(),
            ),
            (keys::AUTOMATIC_CHECKS, config.automatic_checks.to_string()),
        ];
        for (key, value) in entries {
            if let Err(e) = settings.set(key, &value) {
                tracing::warn!(key, error = %e, "failed to persist setting");
            }
        }
        if !config.settings_path.is_empty() {
            if let Err(e) = settings.set(keys::REGISTRY_PATH, &config.settings_path) {
                tracing::warn!(error = %e, "failed to persist settings path");
            }
        }
        if let Some(language) = &config.language {
            if let Err(e) = settings.set(keys::LANGUAGE, language) {
                tracing::warn!(error = %e, "failed to persist language");
            }
        }
    }

    /// Moves to `Running/Idle` and, when automatic checks are enabled,
    /// spawns the recurring timer plus one immediate startup check.
    /// Idempotent: a second call does nothing and never spawns a second
    /// timer. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), UpdateError> {
        if self.inner.cancelled.load(AtomicOrdering::SeqCst) {
            return Err(UpdateError::Terminated);
        }
        let config = lock(&self.inner.config)
            .clone()
            .ok_or(UpdateError::NotConfigured)?;
        if self.inner.started.swap(true, AtomicOrdering::SeqCst) {
            return Ok(());
        }

        self.inner.callbacks.seal();
        *lock(&self.inner.state) = UpdaterState::Idle;
        tracing::info!(
            url = %config.appcast_url,
            automatic = config.automatic_checks,
            "updater started"
        );

        if config.automatic_checks {
            let interval = Duration::from_secs(config.effective_interval_secs());
            let inner = self.inner.clone();
            let handle = tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    if inner.cancelled.load(AtomicOrdering::SeqCst) {
                        break;
                    }
                    match Inner::begin_check(&inner, true, false) {
                        Ok(()) => {}
                        Err(UpdateError::Busy) => {
                            tracing::debug!("scheduled check skipped, cycle in flight")
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "scheduled check not started");
                            break;
                        }
                    }
                }
            });
            *lock(&self.inner.timer) = Some(handle);

            if let Err(e) = Inner::begin_check(&self.inner, true, false) {
                tracing::warn!(error = %e, "startup check not started");
            }
        }
        Ok(())
    }

    /// Triggers one check cycle and returns immediately; outcomes surface
    /// through callbacks and [`Updater::subscribe`]. `show_ui` routes a
    /// found update through the consent prompt (and ignores any skipped
    /// version); `auto_install` proceeds straight to install when no UI is
    /// requested.
    pub fn check_for_update(&self, show_ui: bool, auto_install: bool) -> Result<(), UpdateError> {
        Inner::begin_check(&self.inner, show_ui, auto_install)
    }

    /// Stops the timer and cooperatively cancels any in-flight cycle.
    /// Valid from every state, idempotent, never blocks. An install whose
    /// launcher has already been invoked is not retractable.
    pub fn cleanup(&self) {
        if self.inner.cancelled.swap(true, AtomicOrdering::SeqCst) {
            return;
        }
        if let Some(handle) = lock(&self.inner.timer).take() {
            handle.abort();
        }
        *lock(&self.inner.state) = UpdaterState::Terminated;
        tracing::info!("updater cleaned up");
    }

    pub fn last_check_time(&self) -> Option<u64> {
        self.inner
            .settings
            .get(keys::LAST_CHECK_TIME)
            .ok()
            .flatten()
            .and_then(|v| v.parse().ok())
    }

    /// The interval the scheduler uses, minimum already applied.
    pub fn update_interval(&self) -> u64 {
        lock(&self.inner.config)
            .as_ref()
            .map(|c| c.effective_interval_secs())
            .unwrap_or(DEFAULT_CHECK_INTERVAL_SECS)
    }

    pub fn automatic_checks_enabled(&self) -> bool {
        lock(&self.inner.config)
            .as_ref()
            .map(|c| c.automatic_checks)
            .unwrap_or(false)
    }
}

impl Drop for Updater {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl Inner {
    // Single-flight gate: flips Idle to Checking under the state lock, so
    // two racing calls can never both spawn a cycle.
    fn begin_check(
        inner: &Arc<Inner>,
        show_ui: bool,
        auto_install: bool,
    ) -> Result<(), UpdateError> {
        if inner.cancelled.load(AtomicOrdering::SeqCst) {
            return Err(UpdateError::Terminated);
        }
        let identity = lock(&inner.identity)
            .clone()
            .ok_or(UpdateError::NotConfigured)?;
        let config = lock(&inner.config)
            .clone()
            .ok_or(UpdateError::NotConfigured)?;
        if !inner.started.load(AtomicOrdering::SeqCst) {
            return Err(UpdateError::NotConfigured);
        }

        {
            let mut state = lock(&inner.state);
            match *state {
                UpdaterState::Idle => *state = UpdaterState::Checking,
                UpdaterState::Terminated => return Err(UpdateError::Terminated),
                s if s.is_cycle_active() => return Err(UpdateError::Busy),
                _ => return Err(UpdateError::NotConfigured),
            }
        }

        let inner = inner.clone();
        tokio::spawn(async move {
            let result = inner.run_cycle(identity, config, show_ui, auto_install).await;
            inner.set_state(UpdaterState::Idle);
            tracing::debug!(?result, "check cycle finished");
            inner.result_tx.send_replace(Some(result));
        });
        Ok(())
    }

    fn set_state(&self, next: UpdaterState) {
        let mut state = lock(&self.state);
        if *state != UpdaterState::Terminated {
            *state = next;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::SeqCst)
    }

    fn record_last_check_time(&self) {
        let now = unix_now().to_string();
        if let Err(e) = self.settings.set(keys::LAST_CHECK_TIME, &now) {
            tracing::warn!(error = %e, "failed to persist last check time");
        }
    }

    async fn run_cycle(
        &self,
        identity: AppIdentity,
        config: UpdateConfig,
        show_ui: bool,
        auto_install: bool,
    ) -> CheckResult {
        if self.is_cancelled() {
            return CheckResult::Cancelled;
        }

        // Manual checks bypass intermediary caches so they can see releases
        // that have not propagated yet.
        let fetcher = lock(&self.fetcher).clone();
        let fetched = fetcher.fetch(&config.appcast_url, show_ui).await;

        if self.is_cancelled() {
            return CheckResult::Cancelled;
        }

        // Written on success and on fetch failure alike; a failed attempt
        // still counts as a check.
        self.record_last_check_time();

        let candidates = match fetched {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, "update check failed");
                self.callbacks.fire_error();
                return CheckResult::Error(e.to_string());
            }
        };

        // Manual checks deliberately ignore the skip marker: explicitly
        // asking for updates should surface a version skipped earlier.
        let skipped = if show_ui {
            None
        } else {
            self.settings.get(keys::SKIPPED_VERSION).ok().flatten()
        };

        let Some(best) = select_candidate(&identity, candidates, skipped.as_deref()) else {
            tracing::info!("no newer version available");
            self.callbacks.fire_did_not_find_update();
            return CheckResult::NoUpdate;
        };

        tracing::info!(version = %best.version, critical = best.is_critical, "update available");
        self.callbacks.fire_did_find_update();

        let install = if show_ui {
            self.set_state(UpdaterState::PromptingUser);
            let prompt = lock(&self.prompt).clone();
            match prompt.prompt(&best).await {
                PromptResponse::Install => true,
                PromptResponse::Skip => {
                    if let Err(e) = self.settings.set(keys::SKIPPED_VERSION, &best.version) {
                        tracing::warn!(error = %e, "failed to persist skipped version");
                    }
                    self.callbacks.fire_update_cancelled();
                    return CheckResult::Cancelled;
                }
                PromptResponse::RemindLater => {
                    self.callbacks.fire_update_cancelled();
                    return CheckResult::Cancelled;
                }
            }
        } else {
            auto_install
        };

        if !install {
            return CheckResult::UpdateAvailable(best);
        }
        if self.is_cancelled() {
            self.callbacks.fire_update_cancelled();
            return CheckResult::Cancelled;
        }

        self.install_candidate(best).await
    }

    async fn install_candidate(&self, candidate: ReleaseCandidate) -> CheckResult {
        self.set_state(UpdaterState::Downloading);
        let launcher = lock(&self.launcher).clone();

        let progress: &updraft_utils::http::ProgressFn<'_> =
            &|received, total| self.callbacks.fire_download_progress(received, total);
        let installer = match launcher.download(&candidate, progress).await {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(error = %e, "installer download failed");
                self.callbacks.fire_error();
                return CheckResult::Error(e.to_string());
            }
        };

        if self.is_cancelled() {
            self.callbacks.fire_update_cancelled();
            return CheckResult::Cancelled;
        }

        self.set_state(UpdaterState::AwaitingShutdownConsent);
        if !self.callbacks.ask_can_shutdown() {
            tracing::info!("host declined shutdown, install aborted");
            self.callbacks.fire_update_cancelled();
            return CheckResult::Cancelled;
        }

        self.set_state(UpdaterState::LaunchingInstaller);
        if let Err(e) = launcher.launch(&installer) {
            tracing::warn!(error = %e, "installer launch failed");
            self.callbacks.fire_error();
            return CheckResult::Error(e.to_string());
        }

        // From here the install is not retractable. The host terminates
        // itself inside this callback; the machine never exits the process.
        self.callbacks.fire_shutdown_request();
        CheckResult::UpdateAvailable(candidate)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn is_newer_than_app(identity: &AppIdentity, candidate: &ReleaseCandidate) -> bool {
    match (identity.build_version.as_deref(), candidate.comparable_build()) {
        (Some(app_build), Some(candidate_build)) => {
            compare_versions(candidate_build, app_build) == Ordering::Greater
        }
        _ => compare_versions(&candidate.version, &identity.display_version) == Ordering::Greater,
    }
}

fn candidate_order(a: &ReleaseCandidate, b: &ReleaseCandidate) -> Ordering {
    match (a.comparable_build(), b.comparable_build()) {
        (Some(build_a), Some(build_b)) => compare_versions(build_a, build_b),
        _ => compare_versions(&a.version, &b.version),
    }
}

fn select_candidate(
    identity: &AppIdentity,
    candidates: Vec<ReleaseCandidate>,
    skipped: Option<&str>,
) -> Option<ReleaseCandidate> {
    candidates
        .into_iter()
        .filter(|c| skipped != Some(c.version.as_str()))
        .filter(|c| is_newer_than_app(identity, c))
        .max_by(candidate_order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicUsize;
    use updraft_feed::FeedError;
    use updraft_settings::MemoryStore;
    use updraft_utils::http::ProgressFn;

    fn release(version: &str) -> ReleaseCandidate {
        ReleaseCandidate {
            version: version.to_string(),
            build_version: None,
            download_url: format!("https://example.com/dl/app-{version}.exe"),
            release_notes_url: None,
            is_critical: false,
            sha256: None,
            title: None,
        }
    }

    enum FakeFeed {
        Candidates(Vec<ReleaseCandidate>),
        Transport,
    }

    struct FakeFetcher {
        outcomes: Mutex<VecDeque<FakeFeed>>,
        delay: Option<Duration>,
    }

    impl FakeFetcher {
        fn with(outcome: FakeFeed) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(VecDeque::from([outcome])),
                delay: None,
            })
        }

        fn slow(outcome: FakeFeed, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(VecDeque::from([outcome])),
                delay: Some(delay),
            })
        }
    }

    #[async_trait]
    impl FeedFetcher for FakeFetcher {
        async fn fetch(
            &self,
            _url: &str,
            _bypass_cache: bool,
        ) -> Result<Vec<ReleaseCandidate>, FeedError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match lock(&self.outcomes).pop_front() {
                Some(FakeFeed::Candidates(c)) => Ok(c),
                Some(FakeFeed::Transport) => {
                    Err(FeedError::Transport("connection refused".to_string()))
                }
                None => Ok(Vec::new()),
            }
        }
    }

    struct FakePrompt {
        response: PromptResponse,
        calls: AtomicUsize,
    }

    impl FakePrompt {
        fn with(response: PromptResponse) -> Arc<Self> {
            Arc::new(Self {
                response,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl UpdatePrompt for FakePrompt {
        async fn prompt(&self, _candidate: &ReleaseCandidate) -> PromptResponse {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            self.response
        }
    }

    struct FakeLauncher {
        launched: Mutex<Vec<PathBuf>>,
        fail_launch: bool,
    }

    impl FakeLauncher {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                launched: Mutex::new(Vec::new()),
                fail_launch: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                launched: Mutex::new(Vec::new()),
                fail_launch: true,
            })
        }

        fn launch_count(&self) -> usize {
            lock(&self.launched).len()
        }
    }

    #[async_trait]
    impl InstallerLauncher for FakeLauncher {
        async fn download(
            &self,
            candidate: &ReleaseCandidate,
            progress: &ProgressFn<'_>,
        ) -> Result<PathBuf, crate::installer::LaunchError> {
            progress(512, Some(1024));
            progress(1024, Some(1024));
            Ok(PathBuf::from(format!("/tmp/fake/{}", candidate.version)))
        }

        fn launch(&self, installer: &Path) -> Result<(), crate::installer::LaunchError> {
            if self.fail_launch {
                return Err(crate::installer::LaunchError::Spawn(
                    "no such installer".to_string(),
                ));
            }
            lock(&self.launched).push(installer.to_path_buf());
            Ok(())
        }
    }

    struct Harness {
        updater: Updater,
        settings: Arc<MemoryStore>,
        events: Arc<Mutex<Vec<&'static str>>>,
        launcher: Arc<FakeLauncher>,
        prompt: Arc<FakePrompt>,
    }

    impl Harness {
        fn events(&self) -> Vec<&'static str> {
            lock(&self.events).clone()
        }

        async fn wait_result(
            &self,
            rx: &mut watch::Receiver<Option<CheckResult>>,
        ) -> CheckResult {
            tokio::time::timeout(Duration::from_secs(5), rx.changed())
                .await
                .expect("check cycle timed out")
                .expect("result channel closed");
            rx.borrow().clone().expect("no result published")
        }
    }

    fn harness(
        fetcher: Arc<FakeFetcher>,
        prompt_response: PromptResponse,
        can_shutdown: bool,
        launcher: Arc<FakeLauncher>,
    ) -> Harness {
        let settings = Arc::new(MemoryStore::new());
        let updater = Updater::new(settings.clone());
        let prompt = FakePrompt::with(prompt_response);
        updater.set_feed_fetcher(fetcher).unwrap();
        updater.set_prompt(prompt.clone()).unwrap();
        updater.set_installer_launcher(launcher.clone()).unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let push = |events: &Arc<Mutex<Vec<&'static str>>>, label: &'static str| {
            let events = events.clone();
            move || lock(&events).push(label)
        };
        let callbacks = updater.callbacks();
        callbacks.set_error(push(&events, "error")).unwrap();
        callbacks
            .set_did_find_update(push(&events, "found"))
            .unwrap();
        callbacks
            .set_did_not_find_update(push(&events, "not_found"))
            .unwrap();
        callbacks
            .set_update_cancelled(push(&events, "cancelled"))
            .unwrap();
        callbacks
            .set_shutdown_request(push(&events, "shutdown_request"))
            .unwrap();
        let consent_events = events.clone();
        callbacks
            .set_can_shutdown(move || {
                lock(&consent_events).push("can_shutdown");
                can_shutdown
            })
            .unwrap();

        Harness {
            updater,
            settings,
            events,
            launcher,
            prompt,
        }
    }

    fn configure_and_start(h: &Harness) {
        h.updater
            .configure(
                AppIdentity::new("Acme", "Example", "1.5.0"),
                UpdateConfig::new("https://example.com/appcast.xml"),
            )
            .unwrap();
        h.updater.start().unwrap();
    }

    #[tokio::test]
    async fn test_consented_update_runs_full_sequence() {
        let h = harness(
            FakeFetcher::with(FakeFeed::Candidates(vec![release("2.0.0")])),
            PromptResponse::Install,
            true,
            FakeLauncher::ok(),
        );
        configure_and_start(&h);

        let mut rx = h.updater.subscribe();
        h.updater.check_for_update(true, false).unwrap();
        let result = h.wait_result(&mut rx).await;

        assert_eq!(result, CheckResult::UpdateAvailable(release("2.0.0")));
        assert_eq!(h.events(), vec!["found", "can_shutdown", "shutdown_request"]);
        assert_eq!(h.launcher.launch_count(), 1);
        assert_eq!(h.updater.state(), UpdaterState::Idle);
        assert!(h.updater.last_check_time().is_some());
    }

    #[tokio::test]
    async fn test_empty_feed_is_no_update() {
        let h = harness(
            FakeFetcher::with(FakeFeed::Candidates(vec![])),
            PromptResponse::Install,
            true,
            FakeLauncher::ok(),
        );
        configure_and_start(&h);
        assert!(h.updater.last_check_time().is_none());

        let before = unix_now();
        let mut rx = h.updater.subscribe();
        h.updater.check_for_update(true, false).unwrap();
        let result = h.wait_result(&mut rx).await;

        assert_eq!(result, CheckResult::NoUpdate);
        assert_eq!(h.events(), vec!["not_found"]);
        assert!(h.updater.last_check_time().unwrap() >= before);
    }

    #[tokio::test]
    async fn test_fetch_failure_fires_error_once_and_records_check() {
        let h = harness(
            FakeFetcher::with(FakeFeed::Transport),
            PromptResponse::Install,
            true,
            FakeLauncher::ok(),
        );
        configure_and_start(&h);

        let mut rx = h.updater.subscribe();
        h.updater.check_for_update(true, false).unwrap();
        let result = h.wait_result(&mut rx).await;

        assert!(matches!(result, CheckResult::Error(_)));
        assert_eq!(h.events(), vec!["error"]);
        assert_eq!(h.updater.state(), UpdaterState::Idle);
        assert!(h.updater.last_check_time().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_check_is_rejected_busy() {
        let h = harness(
            FakeFetcher::slow(
                FakeFeed::Candidates(vec![]),
                Duration::from_millis(200),
            ),
            PromptResponse::Install,
            true,
            FakeLauncher::ok(),
        );
        configure_and_start(&h);

        let mut rx = h.updater.subscribe();
        h.updater.check_for_update(true, false).unwrap();
        assert_eq!(
            h.updater.check_for_update(true, false),
            Err(UpdateError::Busy)
        );

        // The rejected call must not disturb the in-flight cycle.
        let result = h.wait_result(&mut rx).await;
        assert_eq!(result, CheckResult::NoUpdate);
        assert_eq!(h.events(), vec!["not_found"]);

        // Once idle again, a new check is accepted.
        h.updater.check_for_update(true, false).unwrap();
    }

    #[tokio::test]
    async fn test_declined_prompt_is_cancelled() {
        let h = harness(
            FakeFetcher::with(FakeFeed::Candidates(vec![release("2.0.0")])),
            PromptResponse::RemindLater,
            true,
            FakeLauncher::ok(),
        );
        configure_and_start(&h);

        let mut rx = h.updater.subscribe();
        h.updater.check_for_update(true, false).unwrap();
        let result = h.wait_result(&mut rx).await;

        assert_eq!(result, CheckResult::Cancelled);
        assert_eq!(h.events(), vec!["found", "cancelled"]);
        assert_eq!(h.launcher.launch_count(), 0);
        assert!(h
            .settings
            .get(keys::SKIPPED_VERSION)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_skip_response_persists_skip_marker() {
        let h = harness(
            FakeFetcher::with(FakeFeed::Candidates(vec![release("2.0.0")])),
            PromptResponse::Skip,
            true,
            FakeLauncher::ok(),
        );
        configure_and_start(&h);

        let mut rx = h.updater.subscribe();
        h.updater.check_for_update(true, false).unwrap();
        let result = h.wait_result(&mut rx).await;

        assert_eq!(result, CheckResult::Cancelled);
        assert_eq!(
            h.settings.get(keys::SKIPPED_VERSION).unwrap().as_deref(),
            Some("2.0.0")
        );
    }

    #[tokio::test]
    async fn test_skipped_version_silences_background_checks_only() {
        // Background check: the skipped version reads as NoUpdate.
        let h = harness(
            FakeFetcher::with(FakeFeed::Candidates(vec![release("2.0.0")])),
            PromptResponse::RemindLater,
            true,
            FakeLauncher::ok(),
        );
        h.settings.set(keys::SKIPPED_VERSION, "2.0.0").unwrap();
        configure_and_start(&h);

        let mut rx = h.updater.subscribe();
        h.updater.check_for_update(false, false).unwrap();
        let result = h.wait_result(&mut rx).await;
        assert_eq!(result, CheckResult::NoUpdate);
        assert_eq!(h.events(), vec!["not_found"]);

        // Manual check: explicitly asking shows the skipped version again.
        let h = harness(
            FakeFetcher::with(FakeFeed::Candidates(vec![release("2.0.0")])),
            PromptResponse::RemindLater,
            true,
            FakeLauncher::ok(),
        );
        h.settings.set(keys::SKIPPED_VERSION, "2.0.0").unwrap();
        configure_and_start(&h);

        let mut rx = h.updater.subscribe();
        h.updater.check_for_update(true, false).unwrap();
        h.wait_result(&mut rx).await;
        assert_eq!(h.prompt.calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_consent_denied_halts_before_launch() {
        let h = harness(
            FakeFetcher::with(FakeFeed::Candidates(vec![release("2.0.0")])),
            PromptResponse::Install,
            false,
            FakeLauncher::ok(),
        );
        configure_and_start(&h);

        let mut rx = h.updater.subscribe();
        h.updater.check_for_update(true, false).unwrap();
        let result = h.wait_result(&mut rx).await;

        assert_eq!(result, CheckResult::Cancelled);
        assert_eq!(h.events(), vec!["found", "can_shutdown", "cancelled"]);
        assert_eq!(h.launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn test_silent_check_with_auto_install_skips_prompt() {
        let h = harness(
            FakeFetcher::with(FakeFeed::Candidates(vec![release("2.0.0")])),
            PromptResponse::RemindLater,
            true,
            FakeLauncher::ok(),
        );
        configure_and_start(&h);

        let mut rx = h.updater.subscribe();
        h.updater.check_for_update(false, true).unwrap();
        let result = h.wait_result(&mut rx).await;

        assert_eq!(result, CheckResult::UpdateAvailable(release("2.0.0")));
        assert_eq!(h.prompt.calls.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(h.launcher.launch_count(), 1);
    }

    #[tokio::test]
    async fn test_silent_check_without_install_reports_only() {
        let h = harness(
            FakeFetcher::with(FakeFeed::Candidates(vec![release("2.0.0")])),
            PromptResponse::Install,
            true,
            FakeLauncher::ok(),
        );
        configure_and_start(&h);

        let mut rx = h.updater.subscribe();
        h.updater.check_for_update(false, false).unwrap();
        let result = h.wait_result(&mut rx).await;

        assert_eq!(result, CheckResult::UpdateAvailable(release("2.0.0")));
        assert_eq!(h.events(), vec!["found"]);
        assert_eq!(h.launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_launch_reports_error() {
        let h = harness(
            FakeFetcher::with(FakeFeed::Candidates(vec![release("2.0.0")])),
            PromptResponse::Install,
            true,
            FakeLauncher::failing(),
        );
        configure_and_start(&h);

        let mut rx = h.updater.subscribe();
        h.updater.check_for_update(true, false).unwrap();
        let result = h.wait_result(&mut rx).await;

        assert!(matches!(result, CheckResult::Error(_)));
        assert_eq!(h.events(), vec!["found", "can_shutdown", "error"]);
        assert_eq!(h.updater.state(), UpdaterState::Idle);
    }

    #[tokio::test]
    async fn test_highest_candidate_wins() {
        let h = harness(
            FakeFetcher::with(FakeFeed::Candidates(vec![
                release("1.8.0"),
                release("2.1.0"),
                release("2.0.5"),
                release("1.0.0"),
            ])),
            PromptResponse::Install,
            true,
            FakeLauncher::ok(),
        );
        configure_and_start(&h);

        let mut rx = h.updater.subscribe();
        h.updater.check_for_update(false, false).unwrap();
        let result = h.wait_result(&mut rx).await;
        assert_eq!(result, CheckResult::UpdateAvailable(release("2.1.0")));
    }

    #[tokio::test]
    async fn test_build_version_override() {
        let identity = AppIdentity::new("Acme", "Example", "2.0.0").with_build_version("4400");
        let mut newer_build = release("2.0.0");
        newer_build.build_version = Some("4501".to_string());

        // Same display version, newer build: an update.
        assert!(is_newer_than_app(&identity, &newer_build));

        // Candidate without a build version falls back to display versions.
        let same_display = release("2.0.0");
        assert!(!is_newer_than_app(&identity, &same_display));

        let mut older_build = release("3.0.0");
        older_build.build_version = Some("4000".to_string());
        assert!(!is_newer_than_app(&identity, &older_build));
    }

    #[tokio::test]
    async fn test_configure_rules() {
        let updater = Updater::new(Arc::new(MemoryStore::new()));
        assert_eq!(
            updater.check_for_update(true, false),
            Err(UpdateError::NotConfigured)
        );
        assert_eq!(updater.start(), Err(UpdateError::NotConfigured));
        assert_eq!(
            updater.configure(
                AppIdentity::new("Acme", "", "1.0"),
                UpdateConfig::new("https://example.com/a.xml"),
            ),
            Err(UpdateError::NotConfigured)
        );

        updater
            .configure(
                AppIdentity::new("Acme", "Example", "1.0"),
                UpdateConfig::new("https://example.com/a.xml"),
            )
            .unwrap();
        assert_eq!(updater.state(), UpdaterState::Configured);
        assert_eq!(
            updater.check_for_update(true, false),
            Err(UpdateError::NotConfigured)
        );

        updater.start().unwrap();
        assert_eq!(
            updater.configure(
                AppIdentity::new("Acme", "Example", "1.1"),
                UpdateConfig::new("https://example.com/b.xml"),
            ),
            Err(UpdateError::AlreadyStarted)
        );
        assert_eq!(
            updater.callbacks().set_error(|| {}),
            Err(UpdateError::AlreadyStarted)
        );
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let h = harness(
            FakeFetcher::with(FakeFeed::Candidates(vec![])),
            PromptResponse::Install,
            true,
            FakeLauncher::ok(),
        );
        h.updater
            .configure(
                AppIdentity::new("Acme", "Example", "1.5.0"),
                UpdateConfig::new("https://example.com/appcast.xml").automatic_checks(true),
            )
            .unwrap();

        let mut rx = h.updater.subscribe();
        h.updater.start().unwrap();
        h.updater.start().unwrap();

        // Exactly one startup check fires.
        let result = h.wait_result(&mut rx).await;
        assert_eq!(result, CheckResult::NoUpdate);
        assert_eq!(h.events(), vec!["not_found"]);
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent_and_terminal() {
        let h = harness(
            FakeFetcher::with(FakeFeed::Candidates(vec![])),
            PromptResponse::Install,
            true,
            FakeLauncher::ok(),
        );
        configure_and_start(&h);

        h.updater.cleanup();
        h.updater.cleanup();
        assert_eq!(h.updater.state(), UpdaterState::Terminated);
        assert_eq!(
            h.updater.check_for_update(true, false),
            Err(UpdateError::Terminated)
        );
        assert_eq!(h.updater.start(), Err(UpdateError::Terminated));
        assert!(h.events().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_cancels_in_flight_check() {
        let h = harness(
            FakeFetcher::slow(
                FakeFeed::Candidates(vec![release("2.0.0")]),
                Duration::from_millis(100),
            ),
            PromptResponse::Install,
            true,
            FakeLauncher::ok(),
        );
        configure_and_start(&h);

        let mut rx = h.updater.subscribe();
        h.updater.check_for_update(true, false).unwrap();
        h.updater.cleanup();

        let result = h.wait_result(&mut rx).await;
        assert_eq!(result, CheckResult::Cancelled);
        assert_eq!(h.launcher.launch_count(), 0);
        assert_eq!(h.updater.state(), UpdaterState::Terminated);
    }

    #[tokio::test]
    async fn test_interval_accessor_is_clamped() {
        let h = harness(
            FakeFetcher::with(FakeFeed::Candidates(vec![])),
            PromptResponse::Install,
            true,
            FakeLauncher::ok(),
        );
        h.updater
            .configure(
                AppIdentity::new("Acme", "Example", "1.5.0"),
                UpdateConfig::new("https://example.com/appcast.xml").check_interval_secs(10),
            )
            .unwrap();
        assert_eq!(h.updater.update_interval(), 3600);
        assert!(!h.updater.automatic_checks_enabled());
    }
}
