//! One round trip against the crypto service, interaction retries included.
//!
//! ```text
//! Idle ──submit──▶ AwaitingResponse ──Success──────────────▶ Completed
//!                    │    ▲          ──Error────────────────▶ Failed
//!                    │    └─resume(Resumed)─┐
//!                    └─NeedsUserInteraction─▶ AwaitingUserAction ──resume(Cancelled)──▶ Cancelled
//! ```
//!
//! `cancel` moves any state to `Cancelled`. Only one request may be
//! outstanding at a time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use super::{
    Continuation, CryptoRequest, CryptoService, InteractionHandler, InteractionOutcome, KeyId,
    Operation, Payload, ServiceResponse,
};
use crate::clipboard::{Clipboard, ClipboardTimer};
use crate::config::Preferences;
use crate::entry::PasswordEntry;
use crate::error::SessionError;

/// Lifecycle state of a [`CryptoSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingResponse,
    AwaitingUserAction,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    /// Whether a request is outstanding.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::AwaitingResponse | Self::AwaitingUserAction)
    }
}

/// Result of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Decrypted(PasswordEntry),
    KeyIds(Vec<KeyId>),
}

/// What a single `submit` or `resume` call ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Completed(Completion),
    /// The caller must run the interaction and call `resume`.
    NeedsUserInteraction(Continuation),
    Cancelled,
}

/// Terminal result of [`CryptoSession::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed(Completion),
    Cancelled,
}

/// Clipboard behaviour after a successful decrypt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub copy_on_decrypt: bool,
    /// `None` keeps the copied password until something replaces it.
    pub clear_after: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&Preferences::default())
    }
}

impl From<&Preferences> for SessionSettings {
    fn from(preferences: &Preferences) -> Self {
        Self {
            copy_on_decrypt: preferences.copy_on_decrypt,
            clear_after: preferences.clear_clipboard_after.duration(),
        }
    }
}

struct Inner {
    state: SessionState,
    /// Bumped for every request sent, so late answers can be recognized.
    generation: u64,
    pending: Option<CryptoRequest>,
    cancel: Option<Arc<Notify>>,
}

impl Inner {
    fn dispatch(&mut self, request: CryptoRequest) -> (u64, Arc<Notify>) {
        let cancel = Arc::new(Notify::new());
        self.generation += 1;
        self.state = SessionState::AwaitingResponse;
        self.pending = Some(request);
        self.cancel = Some(Arc::clone(&cancel));
        (self.generation, cancel)
    }

    fn finish(&mut self, state: SessionState) {
        self.state = state;
        self.pending = None;
        self.cancel = None;
    }
}

/// Drives requests against a [`CryptoService`] and owns the clipboard timer.
pub struct CryptoSession {
    service: Arc<dyn CryptoService>,
    clipboard: ClipboardTimer,
    settings: SessionSettings,
    inner: Mutex<Inner>,
}

impl CryptoSession {
    pub fn new(
        service: Arc<dyn CryptoService>,
        clipboard: Arc<dyn Clipboard>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            service,
            clipboard: ClipboardTimer::new(clipboard),
            settings,
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                generation: 0,
                pending: None,
                cancel: None,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    pub fn clipboard(&self) -> &ClipboardTimer {
        &self.clipboard
    }

    /// Send `request` and wait for the service's answer.
    ///
    /// Fails with [`SessionError::InvalidState`] while another request is
    /// outstanding; that request is left untouched. Dropping the returned
    /// future before it resolves cancels the request.
    pub async fn submit(&self, request: CryptoRequest) -> Result<Step, SessionError> {
        let (generation, cancel) = {
            let mut inner = self.lock();
            if inner.state.is_busy() {
                return Err(SessionError::InvalidState { state: inner.state });
            }
            inner.dispatch(request.clone())
        };
        self.send(generation, request, cancel).await
    }

    /// Continue after the interaction requested by the service.
    pub async fn resume(&self, outcome: InteractionOutcome) -> Result<Step, SessionError> {
        let (generation, request, cancel) = {
            let mut inner = self.lock();
            if inner.state != SessionState::AwaitingUserAction {
                return Err(SessionError::InvalidState { state: inner.state });
            }
            let Some(pending) = inner.pending.clone() else {
                return Err(SessionError::InvalidState { state: inner.state });
            };
            match outcome {
                InteractionOutcome::Cancelled => {
                    tracing::info!("User cancelled the {:?} interaction", pending.operation());
                    inner.finish(SessionState::Cancelled);
                    return Ok(Step::Cancelled);
                }
                InteractionOutcome::Resumed(continuation) => {
                    let request = pending.with_continuation(continuation);
                    let (generation, cancel) = inner.dispatch(request.clone());
                    (generation, request, cancel)
                }
            }
        };
        self.send(generation, request, cancel).await
    }

    /// Abandon whatever is in progress. The service is not told; a late
    /// answer is discarded.
    pub fn cancel(&self) {
        let mut inner = self.lock();
        if let Some(cancel) = inner.cancel.take() {
            cancel.notify_one();
        }
        if inner.state != SessionState::Cancelled {
            tracing::debug!("Session cancelled while {:?}", inner.state);
        }
        inner.finish(SessionState::Cancelled);
    }

    /// Drive `request` to a terminal outcome, running interactions through
    /// `handler` as often as the service asks for them.
    pub async fn run(
        &self,
        request: CryptoRequest,
        handler: &dyn InteractionHandler,
    ) -> Result<SessionOutcome, SessionError> {
        let mut step = self.submit(request).await?;
        loop {
            match step {
                Step::Completed(completion) => return Ok(SessionOutcome::Completed(completion)),
                Step::Cancelled => return Ok(SessionOutcome::Cancelled),
                Step::NeedsUserInteraction(continuation) => {
                    tracing::info!("Crypto service needs user interaction");
                    let outcome = handler.interact(continuation).await;
                    if self.state() == SessionState::Cancelled {
                        return Ok(SessionOutcome::Cancelled);
                    }
                    step = self.resume(outcome).await?;
                }
            }
        }
    }

    /// Decrypt an entry. `Ok(None)` means the user cancelled.
    pub async fn decrypt(
        &self,
        ciphertext: Vec<u8>,
        handler: &dyn InteractionHandler,
    ) -> Result<Option<PasswordEntry>, SessionError> {
        match self
            .run(CryptoRequest::decrypt_verify(ciphertext), handler)
            .await?
        {
            SessionOutcome::Completed(Completion::Decrypted(entry)) => Ok(Some(entry)),
            SessionOutcome::Completed(Completion::KeyIds(_)) => Err(SessionError::UnexpectedPayload {
                operation: Operation::DecryptVerify,
            }),
            SessionOutcome::Cancelled => Ok(None),
        }
    }

    /// Let the user pick encryption keys. `Ok(None)` means the user cancelled.
    pub async fn select_key_ids(
        &self,
        handler: &dyn InteractionHandler,
    ) -> Result<Option<Vec<KeyId>>, SessionError> {
        match self.run(CryptoRequest::get_key_ids(), handler).await? {
            SessionOutcome::Completed(Completion::KeyIds(ids)) => Ok(Some(ids)),
            SessionOutcome::Completed(Completion::Decrypted(_)) => Err(SessionError::UnexpectedPayload {
                operation: Operation::GetKeyIds,
            }),
            SessionOutcome::Cancelled => Ok(None),
        }
    }

    /// Copy the password and arm the clear timer.
    ///
    /// With a clear timeout configured this needs a Tokio runtime, otherwise
    /// it fails with [`ClipboardError::NoRuntime`] and nothing is copied.
    ///
    /// [`ClipboardError::NoRuntime`]: crate::error::ClipboardError::NoRuntime
    pub fn copy_password(&self, entry: &PasswordEntry) -> Result<(), SessionError> {
        self.clipboard
            .copy(entry.password(), self.settings.clear_after)?;
        match self.settings.clear_after {
            Some(timeout) => tracing::info!("Password copied, clearing in {}s", timeout.as_secs()),
            None => tracing::info!("Password copied, automatic clearing disabled"),
        }
        Ok(())
    }

    /// Copy the username. No timer is started for it.
    pub fn copy_username(&self, username: &str) -> Result<(), SessionError> {
        self.clipboard.clipboard().set_text(username)?;
        tracing::info!("Username copied");
        Ok(())
    }

    async fn send(
        &self,
        generation: u64,
        request: CryptoRequest,
        cancel: Arc<Notify>,
    ) -> Result<Step, SessionError> {
        let operation = request.operation();
        tracing::debug!("Sending {:?} request (attempt {})", operation, generation);
        let _in_flight = InFlight {
            session: self,
            generation,
        };

        let response = tokio::select! {
            response = self.service.execute(request) => response,
            _ = cancel.notified() => {
                tracing::debug!("Abandoned {:?} request", operation);
                return Ok(Step::Cancelled);
            }
        };
        self.handle_response(generation, operation, response)
    }

    fn handle_response(
        &self,
        generation: u64,
        operation: Operation,
        response: ServiceResponse,
    ) -> Result<Step, SessionError> {
        let mut inner = self.lock();
        if inner.generation != generation || inner.state != SessionState::AwaitingResponse {
            tracing::debug!("Discarding late {:?} response", operation);
            return Ok(Step::Cancelled);
        }

        match response {
            ServiceResponse::Success(payload) => {
                let completion = match (operation, payload) {
                    (Operation::DecryptVerify, Payload::Plaintext(bytes)) => {
                        Completion::Decrypted(PasswordEntry::parse(&bytes))
                    }
                    (Operation::GetKeyIds, Payload::KeyIds(ids)) => Completion::KeyIds(ids),
                    _ => {
                        inner.finish(SessionState::Failed);
                        return Err(SessionError::UnexpectedPayload { operation });
                    }
                };
                inner.finish(SessionState::Completed);
                drop(inner);

                tracing::info!("{:?} request completed", operation);
                self.after_completion(&completion);
                Ok(Step::Completed(completion))
            }
            ServiceResponse::NeedsUserInteraction(continuation) => {
                inner.state = SessionState::AwaitingUserAction;
                inner.cancel = None;
                Ok(Step::NeedsUserInteraction(continuation))
            }
            ServiceResponse::Error { code, message } => {
                inner.finish(SessionState::Failed);
                tracing::error!("Crypto service error {}: {}", code, message);
                Err(SessionError::Service { code, message })
            }
        }
    }

    fn after_completion(&self, completion: &Completion) {
        let Completion::Decrypted(entry) = completion else {
            return;
        };
        if !self.settings.copy_on_decrypt || entry.password().is_empty() {
            return;
        }
        if let Err(e) = self.copy_password(entry) {
            tracing::warn!("Could not copy password after decrypt: {}", e);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cancels the request it guards if the `send` future is dropped before
/// the answer arrives.
struct InFlight<'a> {
    session: &'a CryptoSession,
    generation: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut inner = self.session.lock();
        if inner.generation == self.generation && inner.state == SessionState::AwaitingResponse {
            tracing::debug!("Request dropped while awaiting a response");
            inner.finish(SessionState::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::tests::MemoryClipboard;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Answers requests from a script and records what it was sent.
    #[derive(Default)]
    struct ScriptedService {
        responses: Mutex<VecDeque<ServiceResponse>>,
        requests: Mutex<Vec<CryptoRequest>>,
    }

    impl ScriptedService {
        fn new(responses: Vec<ServiceResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::default(),
            })
        }

        fn requests(&self) -> Vec<CryptoRequest> {
            self.requests.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl CryptoService for ScriptedService {
        async fn execute(&self, request: CryptoRequest) -> ServiceResponse {
            self.requests.lock().expect("lock").push(request);
            self.responses
                .lock()
                .expect("lock")
                .pop_front()
                .expect("unexpected request")
        }
    }

    /// Blocks every request until released.
    struct GatedService {
        gate: Notify,
        response: ServiceResponse,
    }

    #[async_trait]
    impl CryptoService for GatedService {
        async fn execute(&self, _request: CryptoRequest) -> ServiceResponse {
            self.gate.notified().await;
            self.response.clone()
        }
    }

    fn plaintext(text: &str) -> ServiceResponse {
        ServiceResponse::Success(Payload::Plaintext(text.as_bytes().to_vec()))
    }

    fn session(service: Arc<dyn CryptoService>) -> (CryptoSession, Arc<MemoryClipboard>) {
        let clipboard = Arc::new(MemoryClipboard::default());
        let settings = SessionSettings {
            copy_on_decrypt: false,
            clear_after: None,
        };
        (CryptoSession::new(service, clipboard.clone(), settings), clipboard)
    }

    async fn wait_for(session: &CryptoSession, state: SessionState) {
        while session.state() != state {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn success_parses_entry() {
        let service = ScriptedService::new(vec![plaintext("hunter2\nlogin: alice")]);
        let (session, _) = session(service);

        let step = session
            .submit(CryptoRequest::decrypt_verify(b"blob".to_vec()))
            .await
            .expect("submit");
        let Step::Completed(Completion::Decrypted(entry)) = step else {
            panic!("expected decrypted entry, got {step:?}");
        };
        assert_eq!(entry.password(), "hunter2");
        assert_eq!(entry.username(), Some("alice"));
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn service_error_is_surfaced_verbatim() {
        let service = ScriptedService::new(vec![ServiceResponse::Error {
            code: 2,
            message: "No suitable key found".into(),
        }]);
        let (session, _) = session(service.clone());

        let err = session
            .submit(CryptoRequest::decrypt_verify(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Service { code: 2, ref message } if message == "No suitable key found"
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(service.requests().len(), 1);
    }

    #[tokio::test]
    async fn interaction_is_resumed_with_continuation() {
        let service = ScriptedService::new(vec![
            ServiceResponse::NeedsUserInteraction(Continuation::new(b"ask".to_vec())),
            plaintext("pw"),
        ]);
        let (session, _) = session(service.clone());

        let step = session
            .submit(CryptoRequest::decrypt_verify(b"blob".to_vec()))
            .await
            .expect("submit");
        assert_eq!(step, Step::NeedsUserInteraction(Continuation::new(b"ask".to_vec())));
        assert_eq!(session.state(), SessionState::AwaitingUserAction);

        let err = session
            .submit(CryptoRequest::get_key_ids())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState { state: SessionState::AwaitingUserAction }
        ));

        let step = session
            .resume(InteractionOutcome::Resumed(Continuation::new(b"answer".to_vec())))
            .await
            .expect("resume");
        assert!(matches!(step, Step::Completed(Completion::Decrypted(_))));

        let requests = service.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].operation(), Operation::DecryptVerify);
        assert_eq!(requests[1].payload(), Some(&b"blob"[..]));
        assert_eq!(
            requests[1].continuation(),
            Some(&Continuation::new(b"answer".to_vec()))
        );
    }

    #[tokio::test]
    async fn cancelled_interaction_is_terminal() {
        let service = ScriptedService::new(vec![ServiceResponse::NeedsUserInteraction(
            Continuation::new(Vec::new()),
        )]);
        let (session, _) = session(service.clone());

        session
            .submit(CryptoRequest::get_key_ids())
            .await
            .expect("submit");
        let step = session
            .resume(InteractionOutcome::Cancelled)
            .await
            .expect("resume");
        assert_eq!(step, Step::Cancelled);
        assert_eq!(session.state(), SessionState::Cancelled);
        assert_eq!(service.requests().len(), 1);
    }

    #[tokio::test]
    async fn resume_without_pending_interaction_is_rejected() {
        let (session, _) = session(ScriptedService::new(Vec::new()));
        let err = session
            .resume(InteractionOutcome::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState { state: SessionState::Idle }
        ));
    }

    #[tokio::test]
    async fn second_submit_while_awaiting_response_is_rejected() {
        let service = Arc::new(GatedService {
            gate: Notify::new(),
            response: plaintext("pw"),
        });
        let (session, _) = session(service.clone());
        let session = Arc::new(session);

        let first = tokio::spawn({
            let session = Arc::clone(&session);
            async move {
                session
                    .submit(CryptoRequest::decrypt_verify(b"one".to_vec()))
                    .await
            }
        });
        wait_for(&session, SessionState::AwaitingResponse).await;

        let err = session
            .submit(CryptoRequest::decrypt_verify(b"two".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState { state: SessionState::AwaitingResponse }
        ));

        service.gate.notify_one();
        let step = first.await.expect("join").expect("first submit");
        let Step::Completed(Completion::Decrypted(entry)) = step else {
            panic!("expected decrypted entry, got {step:?}");
        };
        assert_eq!(entry.password(), "pw");
    }

    #[tokio::test]
    async fn cancel_abandons_in_flight_request() {
        let service = Arc::new(GatedService {
            gate: Notify::new(),
            response: plaintext("pw"),
        });
        let (session, _) = session(service.clone());
        let session = Arc::new(session);

        let first = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.submit(CryptoRequest::get_key_ids()).await }
        });
        wait_for(&session, SessionState::AwaitingResponse).await;

        session.cancel();
        let step = first.await.expect("join").expect("submit");
        assert_eq!(step, Step::Cancelled);
        assert_eq!(session.state(), SessionState::Cancelled);

        // cancelling again is harmless, and a new request may start
        session.cancel();
        service.gate.notify_one();
        let step = session
            .submit(CryptoRequest::decrypt_verify(Vec::new()))
            .await
            .expect("submit after cancel");
        assert!(matches!(step, Step::Completed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_submit_does_not_wedge_session() {
        let service = Arc::new(GatedService {
            gate: Notify::new(),
            response: plaintext("pw"),
        });
        let (session, _) = session(service.clone());

        let timed_out = tokio::time::timeout(
            Duration::from_secs(1),
            session.submit(CryptoRequest::get_key_ids()),
        )
        .await;
        assert!(timed_out.is_err());
        assert_eq!(session.state(), SessionState::Cancelled);

        service.gate.notify_one();
        let step = session
            .submit(CryptoRequest::decrypt_verify(Vec::new()))
            .await
            .expect("submit after drop");
        assert!(matches!(step, Step::Completed(Completion::Decrypted(_))));
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn mismatched_payload_fails() {
        let service = ScriptedService::new(vec![ServiceResponse::Success(Payload::KeyIds(vec![
            KeyId(1),
        ]))]);
        let (session, _) = session(service);

        let err = session
            .submit(CryptoRequest::decrypt_verify(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::UnexpectedPayload { operation: Operation::DecryptVerify }
        ));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn decrypt_copies_password_and_arms_timer() {
        let service = ScriptedService::new(vec![plaintext("hunter2\nlogin: alice")]);
        let clipboard = Arc::new(MemoryClipboard::default());
        let settings = SessionSettings {
            copy_on_decrypt: true,
            clear_after: Some(Duration::from_secs(45)),
        };
        let session = CryptoSession::new(service, clipboard.clone(), settings);

        session
            .submit(CryptoRequest::decrypt_verify(Vec::new()))
            .await
            .expect("submit");
        assert_eq!(clipboard.contents().as_deref(), Some("hunter2"));
        assert!(session.clipboard().is_active());

        session.clipboard().wait().await;
        assert_eq!(clipboard.contents(), None);
        assert_eq!(clipboard.clear_count(), 1);
    }

    #[tokio::test]
    async fn copy_username_does_not_arm_timer() {
        let (session, clipboard) = session(ScriptedService::new(Vec::new()));
        session.copy_username("alice").expect("copy");
        assert_eq!(clipboard.contents().as_deref(), Some("alice"));
        assert!(!session.clipboard().is_active());
    }

    #[test]
    fn settings_follow_preferences() {
        let mut prefs = Preferences::default();
        prefs.clear_clipboard_after = crate::config::ClipboardTimeout::Text("0".into());
        prefs.copy_on_decrypt = false;
        let settings = SessionSettings::from(&prefs);
        assert_eq!(settings.clear_after, None);
        assert!(!settings.copy_on_decrypt);

        assert_eq!(
            SessionSettings::default().clear_after,
            Some(Duration::from_secs(45))
        );
    }
}
