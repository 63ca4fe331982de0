//! Background query worker.
//!
//! A [`Dispatcher`] runs a [`Session`] on its own OS thread so that heavy
//! aggregation never blocks the async caller. Requests travel over a bounded
//! tokio channel and are answered strictly one at a time in arrival order;
//! responses come back on an unbounded channel tagged with the request key.
//!
//! [`WorkerClient`] layers request/response pairing on top: each submitted
//! request registers a waiter under its key and the router task hands every
//! response to the oldest waiter for that key.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tokio::sync::{mpsc, oneshot};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::ops::Session;
use crate::protocol::{Request, Response};

const THREAD_NAME: &str = "dtm-worker";

// ── Dispatcher ───────────────────────────────────────────────────────────────

/// Owning handle to the worker thread. Dropping it stops the worker; requests
/// still queued at that point are discarded without a response.
pub struct Dispatcher {
    requests: mpsc::Sender<Request>,
    cancelled: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn spawn(
        config: EngineConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Response>), EngineError> {
        config.validate()?;
        let (req_tx, req_rx) = mpsc::channel(config.queue_capacity);
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        let cancelled = Arc::new(AtomicBool::new(false));

        let session = Session::new(config);
        let flag = Arc::clone(&cancelled);
        thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || run(session, req_rx, resp_tx, flag))?;
        tracing::debug!(thread = THREAD_NAME, "worker started");

        Ok((
            Self {
                requests: req_tx,
                cancelled,
            },
            resp_rx,
        ))
    }

    /// Queue a request, waiting for room if the queue is full.
    pub async fn post(&self, request: Request) -> Result<(), EngineError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| EngineError::WorkerClosed)
    }

    /// Synchronous [`post`](Self::post) for callers outside a runtime.
    pub fn blocking_post(&self, request: Request) -> Result<(), EngineError> {
        self.requests
            .blocking_send(request)
            .map_err(|_| EngineError::WorkerClosed)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

fn run(
    mut session: Session,
    mut requests: mpsc::Receiver<Request>,
    responses: mpsc::UnboundedSender<Response>,
    cancelled: Arc<AtomicBool>,
) {
    while let Some(request) = requests.blocking_recv() {
        if cancelled.load(Ordering::Acquire) {
            break;
        }
        let response = session.dispatch(request);
        if responses.send(response).is_err() {
            break;
        }
    }
    tracing::debug!(thread = THREAD_NAME, "worker stopped");
}

// ── Client ───────────────────────────────────────────────────────────────────

type Waiters = Arc<Mutex<HashMap<String, VecDeque<oneshot::Sender<Response>>>>>;

/// Async request/response facade over a [`Dispatcher`].
///
/// Must be created inside a tokio runtime (the response router is a task).
pub struct WorkerClient {
    dispatcher: Dispatcher,
    waiters: Waiters,
}

impl WorkerClient {
    pub fn spawn(config: EngineConfig) -> Result<Self, EngineError> {
        let (dispatcher, responses) = Dispatcher::spawn(config)?;
        let waiters = Waiters::default();
        tokio::spawn(route(responses, Arc::clone(&waiters)));
        Ok(Self {
            dispatcher,
            waiters,
        })
    }

    /// Send `request` and wait for its response.
    pub async fn request(&self, request: Request) -> Result<Response, EngineError> {
        self.submit(request).await?.wait().await
    }

    /// Enqueue `request` and return a [`Ticket`] for its response.
    ///
    /// The request is in the worker queue once this resolves, so successive
    /// `submit` calls from one task are processed in call order even when
    /// their responses are awaited concurrently.
    pub async fn submit(&self, request: Request) -> Result<Ticket, EngineError> {
        let permit = self
            .dispatcher
            .requests
            .reserve()
            .await
            .map_err(|_| EngineError::WorkerClosed)?;

        let (tx, rx) = oneshot::channel();
        {
            // Registration and enqueue happen under one lock so per-key
            // waiter order always matches queue order.
            let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
            waiters.entry(request.key()).or_default().push_back(tx);
            permit.send(request);
        }

        Ok(Ticket(rx))
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

/// Claim on the response to one submitted request.
pub struct Ticket(oneshot::Receiver<Response>);

impl Ticket {
    pub async fn wait(self) -> Result<Response, EngineError> {
        self.0.await.map_err(|_| EngineError::WorkerClosed)
    }
}

async fn route(mut responses: mpsc::UnboundedReceiver<Response>, waiters: Waiters) {
    while let Some(response) = responses.recv().await {
        let waiter = {
            let mut waiters = waiters.lock().unwrap_or_else(PoisonError::into_inner);
            let waiter = waiters
                .get_mut(&response.key)
                .and_then(VecDeque::pop_front);
            if waiters.get(&response.key).is_some_and(VecDeque::is_empty) {
                waiters.remove(&response.key);
            }
            waiter
        };
        match waiter {
            // A dropped receiver means the caller stopped waiting.
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => tracing::warn!(key = %response.key, "response with no waiting caller"),
        }
    }
    // Worker is gone: release everyone still waiting.
    waiters
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Status;

    #[test]
    fn blocking_post_round_trip() {
        let (dispatcher, mut responses) = Dispatcher::spawn(EngineConfig::default()).unwrap();
        dispatcher.blocking_post(Request::TotalTokens).unwrap();
        let response = responses.blocking_recv().unwrap();
        assert_eq!(response.key, "total_tokens");
        assert_eq!(response.status, Status::NotReady);
    }

    #[test]
    fn invalid_config_refuses_to_start() {
        let config = EngineConfig {
            queue_capacity: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            Dispatcher::spawn(config),
            Err(EngineError::Config(_))
        ));
    }
}
