//! Server runtime
//!
//! Owns the read loop: envelopes are read one at a time by a single reader and
//! each is dispatched on its own task. Replies share the transport's write
//! path. Shutdown stops reading, drains in-flight handlers, then closes the
//! transport exactly once.

use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use crate::mcp::dispatch::{Dispatcher, Providers};
use crate::mcp::protocol::Implementation;
use crate::mcp::rpc::{
    json_rpc_error, Envelope, EnvelopeError, ErrorObject, RequestId, Response, INTERNAL_ERROR,
};
use crate::providers::{PromptProvider, ResourceProvider, ToolProvider};
use crate::transport::{Transport, TransportError};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server name must not be empty")]
    EmptyName,
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),
    #[error("server cancelled: {reason}")]
    Cancelled { reason: String },
    #[error("server task failed: {0}")]
    Task(#[from] JoinError),
}

/// Cancellation reason used by [`Server::run_until`].
pub const INTERRUPTED: &str = "interrupted";

/// Limit on concurrently running handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AdmissionPolicy {
    #[default]
    Unbounded,
    /// At most `n` handlers run at once; the reader waits for a free slot
    /// before dispatching the next envelope.
    Bounded(NonZeroUsize),
}

/// Construction-time configuration of a [`Server`].
#[derive(Clone)]
pub struct ServerOptions {
    pub name: String,
    pub version: String,
    pub providers: Providers,
    pub admission: AdmissionPolicy,
}

impl ServerOptions {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            providers: Providers::default(),
            admission: AdmissionPolicy::default(),
        }
    }

    pub fn with_tools(mut self, provider: Arc<dyn ToolProvider>) -> Self {
        self.providers.tools = Some(provider);
        self
    }

    pub fn with_resources(mut self, provider: Arc<dyn ResourceProvider>) -> Self {
        self.providers.resources = Some(provider);
        self
    }

    pub fn with_prompts(mut self, provider: Arc<dyn PromptProvider>) -> Self {
        self.providers.prompts = Some(provider);
        self
    }

    pub fn with_admission(mut self, admission: AdmissionPolicy) -> Self {
        self.admission = admission;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Running,
    CloseRequested,
    Cancelled(String),
    Closed,
}

/// Control handle for a running [`Server`].
///
/// Close and cancel requests are observed before the next read; they do not
/// interrupt a read that is already blocked. Repeated requests are no-ops.
#[derive(Clone)]
pub struct ServerHandle {
    phase: Arc<watch::Sender<Phase>>,
}

impl ServerHandle {
    fn new() -> Self {
        let (phase, _) = watch::channel(Phase::Running);
        Self {
            phase: Arc::new(phase),
        }
    }

    pub fn request_close(&self) {
        self.transition(Phase::CloseRequested);
    }

    pub fn cancel(&self, reason: impl Into<String>) {
        self.transition(Phase::Cancelled(reason.into()));
    }

    pub fn is_closed(&self) -> bool {
        *self.phase.borrow() == Phase::Closed
    }

    /// Resolves once the server has drained and closed its transport.
    pub async fn wait_closed(&self) {
        let mut phase = self.phase.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = phase.wait_for(|phase| *phase == Phase::Closed).await;
    }

    fn transition(&self, next: Phase) {
        let changed = self.phase.send_if_modified(|phase| {
            if *phase == Phase::Running {
                *phase = next;
                true
            } else {
                false
            }
        });
        if changed {
            info!("shutdown requested");
        }
    }

    fn stop_requested(&self) -> Option<Result<(), ServerError>> {
        match &*self.phase.borrow() {
            Phase::Running => None,
            Phase::CloseRequested | Phase::Closed => Some(Ok(())),
            Phase::Cancelled(reason) => Some(Err(ServerError::Cancelled {
                reason: reason.clone(),
            })),
        }
    }

    fn mark_closed(&self) {
        self.phase.send_replace(Phase::Closed);
    }
}

/// Counts running handlers and wakes waiters when the count drops to zero.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

struct InFlightGuard(Arc<InFlight>);

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(Arc::clone(self))
    }

    fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        loop {
            let mut notified = pin!(self.idle.notified());
            notified.as_mut().enable();
            if self.len() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

enum Admission {
    Unbounded,
    Bounded(Arc<Semaphore>),
}

impl Admission {
    fn new(policy: AdmissionPolicy) -> Self {
        match policy {
            AdmissionPolicy::Unbounded => Self::Unbounded,
            AdmissionPolicy::Bounded(limit) => {
                Self::Bounded(Arc::new(Semaphore::new(limit.get())))
            }
        }
    }

    async fn admit(&self) -> Option<OwnedSemaphorePermit> {
        match self {
            Self::Unbounded => None,
            // The semaphore is never closed, so acquisition only waits.
            Self::Bounded(slots) => Arc::clone(slots).acquire_owned().await.ok(),
        }
    }
}

pub struct Server {
    name: String,
    dispatcher: Arc<Dispatcher>,
    admission: Admission,
    in_flight: Arc<InFlight>,
    handle: ServerHandle,
}

impl Server {
    pub fn new(options: ServerOptions) -> Result<Self, ServerError> {
        let ServerOptions {
            name,
            version,
            providers,
            admission,
        } = options;

        if name.trim().is_empty() {
            return Err(ServerError::EmptyName);
        }

        let server_info = Implementation {
            name: name.clone(),
            version,
        };

        Ok(Self {
            name,
            dispatcher: Arc::new(Dispatcher::new(server_info, providers)),
            admission: Admission::new(admission),
            in_flight: Arc::new(InFlight::default()),
            handle: ServerHandle::new(),
        })
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Serves one peer until end of stream, an explicit close, cancellation,
    /// or a fatal transport error.
    ///
    /// Returns `Ok(())` for end of stream and explicit close,
    /// [`ServerError::Cancelled`] for cancellation and
    /// [`ServerError::Transport`] for a fatal read failure. In every case the
    /// in-flight handlers are drained and the transport is closed first.
    pub async fn run(self, transport: Arc<dyn Transport>) -> Result<(), ServerError> {
        let capabilities = self.dispatcher.capabilities();
        info!(
            server = %self.name,
            tools = capabilities.tools,
            resources = capabilities.resources,
            prompts = capabilities.prompts,
            "mcp server started"
        );

        let outcome = self.read_loop(&transport).await;
        self.shut_down(transport.as_ref()).await;
        outcome
    }

    /// Runs like [`Server::run`] until `interrupt` resolves, then cancels
    /// with [`INTERRUPTED`].
    ///
    /// A read blocked on the peer is not preempted, so the cancellation takes
    /// effect once the next frame or end of stream arrives. If that does not
    /// happen within `grace`, the runtime is aborted without draining and the
    /// transport is left open.
    pub async fn run_until<F>(
        self,
        transport: Arc<dyn Transport>,
        interrupt: F,
        grace: Duration,
    ) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let handle = self.handle();
        let mut running = tokio::spawn(self.run(transport));

        tokio::select! {
            joined = &mut running => return joined?,
            () = interrupt => {}
        }

        info!("interrupt received, cancelling");
        handle.cancel(INTERRUPTED);

        match tokio::time::timeout(grace, &mut running).await {
            Ok(joined) => joined?,
            Err(_) => {
                warn!(?grace, "server did not stop within the grace period");
                running.abort();
                Err(ServerError::Cancelled {
                    reason: INTERRUPTED.to_string(),
                })
            }
        }
    }

    async fn read_loop(&self, transport: &Arc<dyn Transport>) -> Result<(), ServerError> {
        loop {
            if let Some(outcome) = self.handle.stop_requested() {
                return outcome;
            }

            let envelope = match transport.read().await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => {
                    info!("peer closed the stream");
                    return Ok(());
                }
                Err(TransportError::Malformed(err)) => {
                    self.reject_frame(transport.as_ref(), err).await;
                    continue;
                }
                Err(err) => {
                    error!(error = %err, "transport read failed");
                    return Err(err.into());
                }
            };

            let permit = self.admission.admit().await;
            let guard = self.in_flight.enter();
            let dispatcher = Arc::clone(&self.dispatcher);
            let transport = Arc::clone(transport);

            tokio::spawn(async move {
                let _permit = permit;
                let _guard = guard;
                handle_envelope(dispatcher, transport, envelope).await;
            });
        }
    }

    async fn reject_frame(&self, transport: &dyn Transport, err: EnvelopeError) {
        let Some(id) = err.recovered_id().cloned() else {
            warn!(error = %err, "dropping malformed frame");
            return;
        };

        warn!(id = %id, error = %err, "rejecting invalid request");
        let reply = Envelope::Response(Response::failure(
            id,
            ErrorObject::invalid_request("invalid request"),
        ));
        if let Err(write_err) = transport.write(&reply).await {
            warn!(error = %write_err, "failed to write reply");
        }
    }

    async fn shut_down(&self, transport: &dyn Transport) {
        debug!(in_flight = self.in_flight.len(), "draining in-flight handlers");
        self.in_flight.wait_idle().await;

        if let Err(err) = transport.close().await {
            warn!(error = %err, "failed to close transport");
        }

        self.handle.mark_closed();
        info!(server = %self.name, "mcp server shut down");
    }
}

async fn handle_envelope(
    dispatcher: Arc<Dispatcher>,
    transport: Arc<dyn Transport>,
    envelope: Envelope,
) {
    let request_id = match &envelope {
        Envelope::Request(request) => Some(request.id.clone()),
        Envelope::Notification(_) | Envelope::Response(_) => None,
    };

    // A nested task turns a panicking handler into a join error.
    let dispatched = tokio::spawn(async move { dispatcher.dispatch(envelope).await }).await;
    let reply = match dispatched {
        Ok(Ok(reply)) => reply,
        Ok(Err(err)) => {
            error!(error = %err, "dispatch failed");
            request_id.map(internal_error)
        }
        Err(join_err) => {
            error!(panicked = join_err.is_panic(), "handler task failed");
            request_id.map(internal_error)
        }
    };

    let Some(reply) = reply else {
        return;
    };

    if let Envelope::Response(response) = &reply {
        if let Err(err) = response.validate() {
            error!(error = %err, "refusing to write ill-formed response");
            return;
        }
    }

    if let Err(err) = transport.write(&reply).await {
        warn!(error = %err, "failed to write reply");
    }
}

fn internal_error(id: RequestId) -> Envelope {
    json_rpc_error(id, INTERNAL_ERROR, "internal error")
}
