//! System clipboard backed by `arboard`.

use pwstore_core::{Clipboard, ClipboardError};
use std::sync::{Mutex, PoisonError};

/// The OS clipboard.
///
/// The handle is opened on first use and then kept: on X11 and Wayland the
/// copied text is only served while a handle is alive. Opening lazily means a
/// missing display only fails the copy, not the whole session.
#[derive(Default)]
pub struct SystemClipboard {
    handle: Mutex<Option<arboard::Clipboard>>,
}

impl SystemClipboard {
    fn with_handle(
        &self,
        op: impl FnOnce(&mut arboard::Clipboard) -> Result<(), arboard::Error>,
    ) -> Result<(), ClipboardError> {
        let mut slot = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        let mut handle = match slot.take() {
            Some(handle) => handle,
            None => arboard::Clipboard::new()
                .map_err(|e| ClipboardError::Unavailable(e.to_string()))?,
        };
        let result = op(&mut handle).map_err(|e| ClipboardError::Backend(e.to_string()));
        *slot = Some(handle);
        result
    }

    #[cfg(test)]
    fn is_open(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Clipboard for SystemClipboard {
    fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
        self.with_handle(|handle| handle.set_text(text))
    }

    fn clear(&self) -> Result<(), ClipboardError> {
        self.with_handle(|handle| handle.clear())
    }
}
