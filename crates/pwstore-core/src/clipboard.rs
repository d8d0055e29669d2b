//! Clipboard access with a timed clear.
//!
//! [`ClipboardTimer`] keeps at most one pending clear alive. Starting a new
//! timer cancels the previous one first, and a cancel that lands before the
//! deadline always wins over the firing task.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::ClipboardError;

/// A plain-text clipboard.
pub trait Clipboard: Send + Sync {
    fn set_text(&self, text: &str) -> Result<(), ClipboardError>;
    fn clear(&self) -> Result<(), ClipboardError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Pending,
    Fired,
    Cancelled,
}

/// Shared between the spawned task and whoever cancels it. The state mutex
/// decides which of the two gets to act.
struct TimerTask {
    state: Mutex<TimerState>,
    done: Notify,
}

impl TimerTask {
    fn new() -> Self {
        Self {
            state: Mutex::new(TimerState::Pending),
            done: Notify::new(),
        }
    }

    fn is_pending(&self) -> bool {
        *lock(&self.state) == TimerState::Pending
    }
}

struct ActiveTimer {
    task: Arc<TimerTask>,
    handle: JoinHandle<()>,
}

impl ActiveTimer {
    fn cancel(self, clipboard: &dyn Clipboard, skip_clear: bool) -> Result<(), ClipboardError> {
        let mut state = lock(&self.task.state);
        if *state != TimerState::Pending {
            return Ok(());
        }
        *state = TimerState::Cancelled;
        self.handle.abort();

        let result = if skip_clear {
            Ok(())
        } else {
            clipboard.clear()
        };
        drop(state);

        self.task.done.notify_waiters();
        tracing::debug!("Clipboard timer cancelled (skip_clear: {})", skip_clear);
        result
    }
}

/// Cancellable, restartable delayed clear of a [`Clipboard`].
pub struct ClipboardTimer {
    clipboard: Arc<dyn Clipboard>,
    active: Mutex<Option<ActiveTimer>>,
}

impl ClipboardTimer {
    pub fn new(clipboard: Arc<dyn Clipboard>) -> Self {
        Self {
            clipboard,
            active: Mutex::new(None),
        }
    }

    pub fn clipboard(&self) -> &dyn Clipboard {
        self.clipboard.as_ref()
    }

    /// Write `text` and schedule its removal after `clear_after`.
    ///
    /// With `None` the text stays until something else replaces it, and any
    /// pending clear is dropped so it cannot wipe the new content.
    ///
    /// A timed copy needs a Tokio runtime; without one nothing is written and
    /// [`ClipboardError::NoRuntime`] is returned.
    pub fn copy(&self, text: &str, clear_after: Option<Duration>) -> Result<(), ClipboardError> {
        if clear_after.is_some() {
            current_runtime()?;
        }
        self.clipboard.set_text(text)?;
        match clear_after {
            Some(timeout) => self.start(timeout)?,
            None => self.cancel(true)?,
        }
        Ok(())
    }

    /// Arm a clear after `timeout`, replacing any running timer.
    ///
    /// The previous timer is cancelled without clearing. Fails with
    /// [`ClipboardError::NoRuntime`] outside a Tokio runtime.
    pub fn start(&self, timeout: Duration) -> Result<(), ClipboardError> {
        let runtime = current_runtime()?;
        let mut active = lock(&self.active);
        if let Some(previous) = active.take() {
            // skip_clear never touches the clipboard, so this cannot fail
            let _ = previous.cancel(self.clipboard.as_ref(), true);
        }

        let task = Arc::new(TimerTask::new());
        let handle = runtime.spawn(run_timer(
            Arc::clone(&task),
            Arc::clone(&self.clipboard),
            timeout,
        ));
        *active = Some(ActiveTimer { task, handle });

        tracing::debug!("Clipboard will be cleared in {}s", timeout.as_secs());
        Ok(())
    }

    /// Stop the running timer.
    ///
    /// Unless `skip_clear` is set the clipboard is cleared before returning.
    /// Cancelling when nothing is pending does nothing.
    pub fn cancel(&self, skip_clear: bool) -> Result<(), ClipboardError> {
        let active = lock(&self.active).take();
        match active {
            Some(timer) => timer.cancel(self.clipboard.as_ref(), skip_clear),
            None => Ok(()),
        }
    }

    /// Whether a clear is still pending.
    pub fn is_active(&self) -> bool {
        self.current_task().is_some_and(|task| task.is_pending())
    }

    /// Resolve once the current timer has fired or been cancelled.
    pub async fn wait(&self) {
        let Some(task) = self.current_task() else {
            return;
        };
        loop {
            let notified = task.done.notified();
            if !task.is_pending() {
                return;
            }
            notified.await;
        }
    }

    fn current_task(&self) -> Option<Arc<TimerTask>> {
        lock(&self.active)
            .as_ref()
            .map(|timer| Arc::clone(&timer.task))
    }
}

async fn run_timer(task: Arc<TimerTask>, clipboard: Arc<dyn Clipboard>, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    fire(&task, clipboard.as_ref(), timeout);
    task.done.notify_waiters();
}

fn fire(task: &TimerTask, clipboard: &dyn Clipboard, timeout: Duration) {
    let mut state = lock(&task.state);
    if *state != TimerState::Pending {
        return;
    }
    *state = TimerState::Fired;

    match clipboard.clear() {
        Ok(()) => tracing::info!("Clipboard cleared after {}s", timeout.as_secs()),
        Err(e) => tracing::warn!("Failed to clear clipboard: {}", e),
    }
}

fn current_runtime() -> Result<Handle, ClipboardError> {
    Handle::try_current().map_err(|_| ClipboardError::NoRuntime)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
