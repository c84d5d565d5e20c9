//! Durable Execution Engine
//!
//! The engine that accepts steps and executes them in the background:
//! - Assigns identifiers and records steps in their workflow
//! - Feeds a bounded FIFO queue drained by a single worker
//! - Records each step's result or failure exactly once
//! - Delivers aggregated workflow results to callback URLs
//! - Issues and verifies read tokens for workflow lookups
//!
//! All state lives in expiring in-memory stores owned by the engine; there
//! are no process-wide singletons.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::callback::{deliver, PendingCallback};
use super::step::dispatch;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::store::ExpiringStore;
use crate::token::TokenManager;
use crate::workflow::{
    SharedStep, SharedWorkflow, Step, StepId, StepRequest, StepResult, Workflow, WorkflowId,
};

/// A step submitted for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueRequest {
    /// Workflow to append to; a new one is generated when absent or empty
    pub workflow_id: Option<WorkflowId>,
    pub step_name: String,
    pub callback_url: Option<String>,
    pub request: StepRequest,
}

impl EnqueueRequest {
    pub fn new(step_name: impl Into<String>, request: StepRequest) -> Self {
        Self {
            workflow_id: None,
            step_name: step_name.into(),
            callback_url: None,
            request,
        }
    }

    pub fn in_workflow(mut self, workflow_id: impl Into<WorkflowId>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_callback(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }
}

/// Identifiers of an accepted step and a token to read its workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueResponse {
    pub workflow_id: WorkflowId,
    pub step_id: StepId,
    pub read_workflow_token: String,
}

/// Counters describing the engine's work so far.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    pub enqueued: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub callbacks_delivered: u64,
    pub callbacks_failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    callbacks_delivered: AtomicU64,
    callbacks_failed: AtomicU64,
}

/// Durable execution engine.
///
/// Shared between request handlers and the worker behind an `Arc`.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use durable::config::EngineConfig;
/// use durable::execution::{Engine, EnqueueRequest};
/// use durable::workflow::StepRequest;
///
/// # async fn example() -> durable::Result<()> {
/// let engine = Arc::new(Engine::new(EngineConfig::default())?);
/// let worker = Arc::clone(&engine);
/// tokio::spawn(async move { worker.run().await });
///
/// let accepted = engine
///     .enqueue(EnqueueRequest::new("fetch", StepRequest::new("GET", "https://example.com")))
///     .await?;
/// let step = engine.get_step(&accepted.step_id)?;
/// println!("{} is {}", step.id, step.state);
///
/// engine.close();
/// # Ok(())
/// # }
/// ```
pub struct Engine {
    config: EngineConfig,
    tokens: TokenManager,
    workflows: ExpiringStore<SharedWorkflow>,
    steps: ExpiringStore<SharedStep>,
    queue: mpsc::Sender<SharedStep>,
    receiver: Mutex<Option<mpsc::Receiver<SharedStep>>>,
    client: Client,
    shutdown: CancellationToken,
    counters: Counters,
}

impl Engine {
    /// Creates an engine with a fresh signing key and empty stores.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let tokens = TokenManager::bootstrap(config.token_validity())?;
        let (queue, receiver) = mpsc::channel(config.queue_capacity);
        let client = Client::builder().build()?;

        Ok(Self {
            workflows: ExpiringStore::new("workflow", config.store_ttl()),
            steps: ExpiringStore::new("step", config.store_ttl()),
            tokens,
            queue,
            receiver: Mutex::new(Some(receiver)),
            client,
            shutdown: CancellationToken::new(),
            counters: Counters::default(),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The token manager used to sign read tokens.
    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Accepts a step for execution.
    ///
    /// Waits for queue space up to the configured enqueue timeout. Dropping
    /// the returned future while it waits cancels the call; nothing is
    /// recorded unless a queue slot was obtained.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<EnqueueResponse> {
        self.enqueue_inner(request, self.config.enqueue_timeout())
            .await
    }

    /// Like [`Engine::enqueue`], waiting at most `timeout` for queue space.
    pub async fn enqueue_within(
        &self,
        request: EnqueueRequest,
        timeout: Duration,
    ) -> Result<EnqueueResponse> {
        self.enqueue_inner(request, Some(timeout)).await
    }

    async fn enqueue_inner(
        &self,
        request: EnqueueRequest,
        timeout: Option<Duration>,
    ) -> Result<EnqueueResponse> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }
        let permit = self.reserve_slot(timeout).await?;

        let workflow_id = request
            .workflow_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(WorkflowId::generate);
        let step_id = StepId::generate();
        let read_workflow_token = self.tokens.create_workflow_token(&workflow_id)?;

        let mut step = Step::new(
            workflow_id.clone(),
            step_id.clone(),
            request.step_name,
            request.request,
        );
        if let Some(url) = request.callback_url {
            step = step.with_callback(url);
        }
        let step: SharedStep = Arc::new(RwLock::new(step));

        let workflow = self.workflows.get_or_insert_with(workflow_id.as_str(), || {
            debug!("Creating workflow {}", workflow_id);
            Arc::new(RwLock::new(Workflow::new(workflow_id.clone())))
        });

        // The step is stored before its id becomes visible in the workflow.
        self.steps.set(step_id.as_str(), Arc::clone(&step));
        workflow.write().push_step(step_id.clone());
        self.workflows.set(workflow_id.as_str(), workflow);

        permit.send(step);
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        info!("Enqueued step {} in workflow {}", step_id, workflow_id);

        Ok(EnqueueResponse {
            workflow_id,
            step_id,
            read_workflow_token,
        })
    }

    async fn reserve_slot(&self, timeout: Option<Duration>) -> Result<mpsc::Permit<'_, SharedStep>> {
        let reserve = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, self.queue.reserve()).await {
                    Ok(permit) => permit.map_err(|_| Error::QueueClosed),
                    Err(_) => {
                        warn!("Execution queue still full after {:?}", limit);
                        Err(Error::QueueFull)
                    }
                },
                None => self.queue.reserve().await.map_err(|_| Error::QueueClosed),
            }
        };

        tokio::select! {
            _ = self.shutdown.cancelled() => Err(Error::ShuttingDown),
            permit = reserve => permit,
        }
    }

    /// Returns a snapshot of a workflow.
    pub fn get_workflow(&self, workflow_id: &WorkflowId) -> Result<Workflow> {
        let workflow = self.workflows.get(workflow_id.as_str())?;
        let snapshot = workflow.read().clone();
        Ok(snapshot)
    }

    /// Verifies a read token and returns a snapshot of its workflow.
    pub fn get_workflow_from_token(&self, token: &str) -> Result<Workflow> {
        let workflow_id = self.tokens.parse_workflow_token(token)?;
        self.get_workflow(&workflow_id)
    }

    /// Returns a snapshot of a step.
    pub fn get_step(&self, step_id: &StepId) -> Result<Step> {
        let step = self.steps.get(step_id.as_str())?;
        let snapshot = step.read().clone();
        Ok(snapshot)
    }

    /// Returns snapshots of the workflow's stored steps, in enqueue order.
    ///
    /// Steps expire on their own TTL and may be gone while the workflow is
    /// still live; those are skipped.
    pub fn workflow_steps(&self, workflow: &Workflow) -> Vec<Step> {
        workflow
            .step_ids
            .iter()
            .filter_map(|id| match self.get_step(id) {
                Ok(step) => Some(step),
                Err(e) => {
                    warn!("Skipping step of workflow {}: {}", workflow.id, e);
                    None
                }
            })
            .collect()
    }

    /// Current counters.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            callbacks_delivered: self.counters.callbacks_delivered.load(Ordering::Relaxed),
            callbacks_failed: self.counters.callbacks_failed.load(Ordering::Relaxed),
        }
    }

    /// Drops expired workflows and steps from memory.
    pub fn purge_expired(&self) -> usize {
        let purged = self.workflows.purge_expired() + self.steps.purge_expired();
        if purged > 0 {
            debug!("Purged {} expired entries", purged);
        }
        purged
    }

    /// Requests shutdown. The worker stops after the step it is handling.
    ///
    /// Calling this more than once has no further effect.
    pub fn close(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Shutting down execution engine");
        }
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Runs the worker until [`Engine::close`] is called.
    ///
    /// Steps are handled one at a time in submission order. A failing step
    /// is recorded as failed; it never stops the loop.
    pub async fn run(&self) -> Result<()> {
        let mut receiver = self
            .receiver
            .lock()
            .take()
            .ok_or(Error::WorkerAlreadyRunning)?;

        let mut pending: Vec<PendingCallback> = Vec::new();
        let mut next_sweep = Instant::now() + self.config.store_ttl();
        info!(
            "Worker started (queue capacity: {})",
            self.config.queue_capacity
        );

        loop {
            let step = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = receiver.recv() => match next {
                    Some(step) => step,
                    None => break,
                },
                _ = tokio::time::sleep_until(next_sweep) => {
                    self.sweep_if_due(&mut next_sweep);
                    continue;
                }
            };

            if let Some(callback) = self.process(&step).await {
                pending.push(callback);
            }
            self.flush_callbacks(&mut pending).await;
            // A busy queue always wins the select, so the deadline is checked here too.
            self.sweep_if_due(&mut next_sweep);
        }

        receiver.close();
        if !pending.is_empty() {
            warn!("Dropping {} callbacks still waiting on unfinished steps", pending.len());
        }
        info!("Worker stopped");
        Ok(())
    }

    /// Purges expired entries once `next_sweep` has passed and moves the
    /// deadline one TTL ahead.
    fn sweep_if_due(&self, next_sweep: &mut Instant) {
        let now = Instant::now();
        if now >= *next_sweep {
            self.purge_expired();
            *next_sweep = now + self.config.store_ttl();
        }
    }

    /// Executes one step and records its outcome.
    ///
    /// Returns the callback to schedule, if the step carries one.
    async fn process(&self, step: &SharedStep) -> Option<PendingCallback> {
        let (workflow_id, step_id, request) = {
            let mut step = step.write();
            step.mark_dispatched();
            (step.workflow_id.clone(), step.id.clone(), step.request.clone())
        };
        info!("Handling step {} of workflow {}", step_id, workflow_id);

        let outcome = self.execute(request).await;

        let callback_url = {
            let mut step = step.write();
            match outcome {
                Ok(result) => {
                    debug!(
                        "Step {} answered with status {:?}",
                        step_id, result.status
                    );
                    step.complete(result);
                    self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    error!("Step {} of workflow {} failed: {}", step_id, workflow_id, e);
                    step.fail(e.to_string());
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
            step.callback_url.clone()
        };
        self.steps.set(step_id.as_str(), Arc::clone(step));

        let url = callback_url?;
        info!("Preparing callback for workflow {}", workflow_id);
        let members = match self.workflows.get(workflow_id.as_str()) {
            Ok(workflow) => {
                let members = workflow.read().steps_through(&step_id).map(|ids| ids.to_vec());
                members.unwrap_or_else(|| vec![step_id.clone()])
            }
            Err(e) => {
                warn!("Skipping callback for step {}: {}", step_id, e);
                return None;
            }
        };

        Some(PendingCallback {
            workflow_id,
            trigger: step_id,
            url,
            members,
        })
    }

    /// Runs the outbound call as its own task so that a panic inside it is
    /// contained to this step.
    async fn execute(&self, request: StepRequest) -> Result<StepResult> {
        let client = self.client.clone();
        let timeout = self.config.step_timeout();

        match tokio::spawn(async move { dispatch(&client, &request, timeout).await }).await {
            Ok(outcome) => outcome,
            Err(e) => Err(Error::Transport(format!("step dispatch aborted: {}", e))),
        }
    }

    /// Delivers every pending callback whose steps are all terminal.
    async fn flush_callbacks(&self, pending: &mut Vec<PendingCallback>) {
        let (ready, waiting): (Vec<_>, Vec<_>) = pending
            .drain(..)
            .partition(|callback| callback.is_ready(&self.steps));
        *pending = waiting;

        for callback in ready {
            self.send_callback(&callback).await;
        }
    }

    async fn send_callback(&self, callback: &PendingCallback) {
        let payload = callback.payload(&self.steps);
        let result = deliver(
            &self.client,
            callback,
            &payload,
            &self.config.user_agent,
            self.config.callback_timeout(),
        )
        .await;

        match result {
            Ok(status) if status.is_client_error() || status.is_server_error() => {
                warn!(
                    "Callback to {} for workflow {} failed with status {}",
                    callback.url, callback.workflow_id, status
                );
                self.counters.callbacks_failed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {
                self.counters
                    .callbacks_delivered
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(
                    "Callback to {} for workflow {} failed: {}",
                    callback.url, callback.workflow_id, e
                );
                self.counters.callbacks_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
