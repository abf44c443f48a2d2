use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::UpdateError;

type Handler = Box<dyn Fn() + Send + Sync>;
type CanShutdownHandler = Box<dyn Fn() -> bool + Send + Sync>;
type ProgressHandler = Box<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Host-supplied event handlers. Every slot is optional and can be filled
/// at most once, only before `start()` seals the registry. Handlers run on
/// a background worker context, never the host's primary thread, and any
/// panic they raise is caught here and logged instead of unwinding into the
/// state machine.
#[derive(Default)]
pub struct CallbackRegistry {
    sealed: AtomicBool,
    error: Mutex<Option<Handler>>,
    can_shutdown: Mutex<Option<CanShutdownHandler>>,
    shutdown_request: Mutex<Option<Handler>>,
    did_find_update: Mutex<Option<Handler>>,
    did_not_find_update: Mutex<Option<Handler>>,
    update_cancelled: Mutex<Option<Handler>>,
    download_progress: Mutex<Option<ProgressHandler>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    fn set<T>(
        &self,
        slot: &Mutex<Option<T>>,
        name: &'static str,
        handler: T,
    ) -> Result<(), UpdateError> {
        if self.sealed.load(Ordering::SeqCst) {
            return Err(UpdateError::AlreadyStarted);
        }
        let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            return Err(UpdateError::HandlerAlreadySet(name));
        }
        *guard = Some(handler);
        Ok(())
    }

    pub fn set_error<F>(&self, handler: F) -> Result<(), UpdateError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.set(&self.error, "error", Box::new(handler))
    }

    pub fn set_can_shutdown<F>(&self, handler: F) -> Result<(), UpdateError>
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.set(&self.can_shutdown, "can_shutdown", Box::new(handler))
    }

    pub fn set_shutdown_request<F>(&self, handler: F) -> Result<(), UpdateError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.set(&self.shutdown_request, "shutdown_request", Box::new(handler))
    }

    pub fn set_did_find_update<F>(&self, handler: F) -> Result<(), UpdateError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.set(&self.did_find_update, "did_find_update", Box::new(handler))
    }

    pub fn set_did_not_find_update<F>(&self, handler: F) -> Result<(), UpdateError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.set(
            &self.did_not_find_update,
            "did_not_find_update",
            Box::new(handler),
        )
    }

    pub fn set_update_cancelled<F>(&self, handler: F) -> Result<(), UpdateError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.set(&self.update_cancelled, "update_cancelled", Box::new(handler))
    }

    pub fn set_download_progress<F>(&self, handler: F) -> Result<(), UpdateError>
    where
        F: Fn(u64, Option<u64>) + Send + Sync + 'static,
    {
        self.set(
            &self.download_progress,
            "download_progress",
            Box::new(handler),
        )
    }

    fn fire(&self, slot: &Mutex<Option<Handler>>, name: &'static str) {
        let guard = slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handler) = guard.as_ref() {
            if catch_unwind(AssertUnwindSafe(handler)).is_err() {
                tracing::error!(callback = name, "host callback panicked");
            }
        }
    }

    pub(crate) fn fire_error(&self) {
        self.fire(&self.error, "error");
    }

    pub(crate) fn fire_shutdown_request(&self) {
        self.fire(&self.shutdown_request, "shutdown_request");
    }

    pub(crate) fn fire_did_find_update(&self) {
        self.fire(&self.did_find_update, "did_find_update");
    }

    pub(crate) fn fire_did_not_find_update(&self) {
        self.fire(&self.did_not_find_update, "did_not_find_update");
    }

    pub(crate) fn fire_update_cancelled(&self) {
        self.fire(&self.update_cancelled, "update_cancelled");
    }

    pub(crate) fn fire_download_progress(&self, received: u64, total: Option<u64>) {
        let guard = self
            .download_progress
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(handler) = guard.as_ref() {
            if catch_unwind(AssertUnwindSafe(|| handler(received, total))).is_err() {
                tracing::error!(callback = "download_progress", "host callback panicked");
            }
        }
    }

    /// Asks the host whether it can terminate. Unset means yes; a panicking
    /// handler means no, which cancels the install rather than shutting
    /// down a host in an unknown state.
    pub(crate) fn ask_can_shutdown(&self) -> bool {
        let guard = self.can_shutdown.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(handler) => catch_unwind(AssertUnwindSafe(handler)).unwrap_or_else(|_| {
                tracing::error!(callback = "can_shutdown", "host callback panicked");
                false
            }),
            None => true,
        }
    }
}
