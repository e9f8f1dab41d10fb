use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use common::{SubmitError, SubmitterConfig};
use contracts::{Form, FormResponse, SubmissionId};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cookies::CookieJar;
use crate::executor::Executor;
use crate::transport::{ReqwestTransport, Transport};

// Direct submissions bypass the queue and are not numbered
const DIRECT_SUBMISSION_ID: SubmissionId = 0;

struct Submission {
    id: SubmissionId,
    form: Form,
    ignore_reply: bool,
    cancel: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    // The front entry is the one being executed; it is popped once reported
    pending: VecDeque<Arc<Submission>>,
    running: bool,
    worker: Option<JoinHandle<()>>,
}

struct Shared<T> {
    executor: Executor<T>,
    queue: Mutex<QueueState>,
    events: UnboundedSender<FormResponse>,
    stopping: AtomicBool,
    next_id: AtomicU64,
    runtime: Handle,
}

impl<T: Transport> Shared<T> {
    fn lock_queue(&self) -> MutexGuard<'_, QueueState> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn cancel_front(&self) -> bool {
        let queue = self.lock_queue();
        if !queue.running {
            return false;
        }
        match queue.pending.front() {
            Some(current) => {
                info!(id = current.id, url = %current.form.url, "stopping form submission");
                current.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn publish(&self, response: FormResponse) {
        if response.canceled || response.ignore_reply || self.is_stopping() {
            debug!(id = response.id, canceled = response.canceled, "not reporting submission");
            return;
        }
        if self.events.send(response).is_err() {
            debug!("form response dropped, event receiver is gone");
        }
    }
}

/// What the manager is doing right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerStatus {
    Idle,
    Submitting { url: String, queued: usize },
}

impl fmt::Display for ManagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerStatus::Idle => write!(f, "FormManager: Idle"),
            ManagerStatus::Submitting { url, queued } => {
                write!(f, "FormManager: Submitting\n{url}\nQueue Size: {queued}")
            }
        }
    }
}

/// Serial background submission queue.
///
/// Forms are executed one at a time, in submission order, by a worker task
/// that starts on the first submission and exits when the queue drains.
/// Results are delivered on the channel returned by [`take_event_receiver`].
///
/// [`take_event_receiver`]: FormManager::take_event_receiver
pub struct FormManager<T: Transport = ReqwestTransport> {
    shared: Arc<Shared<T>>,
    event_rx: Option<UnboundedReceiver<FormResponse>>,
}

impl FormManager<ReqwestTransport> {
    pub fn new(config: SubmitterConfig) -> Result<Self, SubmitError> {
        Self::with_transport(config, ReqwestTransport::new()?)
    }
}

impl<T: Transport> FormManager<T> {
    /// Must be called from within a Tokio runtime; the worker is spawned on it.
    pub fn with_transport(config: SubmitterConfig, transport: T) -> Result<Self, SubmitError> {
        let runtime = Handle::try_current().map_err(|_| SubmitError::NoRuntime)?;
        let (events, event_rx) = unbounded_channel();

        Ok(Self {
            shared: Arc::new(Shared {
                executor: Executor::new(transport, config),
                queue: Mutex::new(QueueState::default()),
                events,
                stopping: AtomicBool::new(false),
                next_id: AtomicU64::new(DIRECT_SUBMISSION_ID + 1),
                runtime,
            }),
            event_rx: Some(event_rx),
        })
    }

    /// Hands out the result channel. Only the first call returns `Some`.
    pub fn take_event_receiver(&mut self) -> Option<UnboundedReceiver<FormResponse>> {
        self.event_rx.take()
    }

    /// Queues `form` and starts the worker if it is not running.
    ///
    /// With `ignore_reply` the submission is still performed but its result
    /// is never published.
    pub fn submit_form(&self, form: Form, ignore_reply: bool) -> Result<SubmissionId, SubmitError> {
        // Checked under the queue lock so shutdown cannot clear the queue in between
        let mut queue = self.shared.lock_queue();
        if self.shared.is_stopping() {
            return Err(SubmitError::ShuttingDown);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        queue.pending.push_back(Arc::new(Submission {
            id,
            form,
            ignore_reply,
            cancel: CancellationToken::new(),
        }));
        debug!(id, queued = queue.pending.len(), "form queued");

        if !queue.running {
            queue.running = true;
            let shared = Arc::clone(&self.shared);
            queue.worker = Some(self.shared.runtime.spawn(run_worker(shared)));
            debug!("submission worker started");
        }

        Ok(id)
    }

    /// Performs `form` right away on the calling task, outside the queue.
    /// The result is returned and never published.
    pub async fn submit_form_now(&self, form: Form) -> FormResponse {
        let cancel = CancellationToken::new();
        let response = self
            .shared
            .executor
            .execute(DIRECT_SUBMISSION_ID, form, false, &cancel)
            .await;
        if !response.ok {
            warn!(url = %response.url(), error = ?response.error, "direct form submission failed");
        }
        response
    }

    /// Cancels the in-flight submission, aborting its request.
    /// Returns false when nothing was being submitted.
    pub fn cancel_current_submission(&self) -> bool {
        self.shared.cancel_front()
    }

    /// Number of submissions not yet reported, including the one in flight.
    pub fn queue_len(&self) -> usize {
        self.shared.lock_queue().pending.len()
    }

    pub fn status(&self) -> ManagerStatus {
        let queue = self.shared.lock_queue();
        match queue.pending.front() {
            Some(current) if queue.running => ManagerStatus::Submitting {
                url: current.form.url.clone(),
                queued: queue.pending.len(),
            },
            _ => ManagerStatus::Idle,
        }
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.shared.executor.update_settings(|s| s.timeout = timeout);
    }

    pub fn set_verbose(&self, verbose: bool) {
        self.shared.executor.update_settings(|s| s.verbose = verbose);
    }

    pub fn set_user_agent(&self, user_agent: impl Into<String>) {
        let user_agent = user_agent.into();
        self.shared.executor.update_settings(|s| s.user_agent = user_agent);
    }

    /// An empty string stops sending the Accept header.
    pub fn set_accept(&self, accept: impl Into<String>) {
        let accept = accept.into();
        self.shared.executor.update_settings(|s| s.accept = accept);
    }

    /// An empty string stops sending the X-CSRF-Token header.
    pub fn set_csrf_token(&self, token: impl Into<String>) {
        let token = token.into();
        self.shared.executor.update_settings(|s| s.csrf_token = token);
    }

    pub fn settings(&self) -> SubmitterConfig {
        self.shared.executor.settings()
    }

    pub fn cookies(&self) -> CookieJar {
        self.shared.executor.cookies()
    }

    /// Stops the manager: cancels the in-flight submission, waits for the
    /// worker to exit and discards whatever is still queued. Later
    /// submissions fail with [`SubmitError::ShuttingDown`].
    pub async fn shutdown(&self) {
        {
            let _queue = self.shared.lock_queue();
            self.shared.stopping.store(true, Ordering::SeqCst);
        }
        self.shared.cancel_front();

        let worker = self.shared.lock_queue().worker.take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "submission worker ended abnormally");
            }
        }

        let discarded = {
            let mut queue = self.shared.lock_queue();
            let discarded = queue.pending.len();
            queue.pending.clear();
            queue.running = false;
            discarded
        };
        info!(discarded, "form manager stopped");
    }
}

impl<T: Transport> Drop for FormManager<T> {
    fn drop(&mut self) {
        // The worker holds its own reference; it exits once the current submission unwinds
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shared.cancel_front();
    }
}

async fn run_worker<T: Transport>(shared: Arc<Shared<T>>) {
    loop {
        let next = {
            let mut queue = shared.lock_queue();
            match queue.pending.front() {
                Some(next) if !shared.is_stopping() => Arc::clone(next),
                _ => {
                    queue.running = false;
                    break;
                }
            }
        };

        let response = shared
            .executor
            .execute(next.id, next.form.clone(), next.ignore_reply, &next.cancel)
            .await;
        shared.publish(response);

        {
            let mut queue = shared.lock_queue();
            if queue.pending.front().is_some_and(|front| front.id == next.id) {
                queue.pending.pop_front();
            }
            debug!(id = next.id, remaining = queue.pending.len(), "submission finished");
        }
    }
    debug!("submission worker exiting, queue drained");
}
