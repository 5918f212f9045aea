//! Line controller - admission control and runner orchestration
//!
//! Queue and gate live in one [`LineState`] behind a single mutex. The three
//! entry points (`received_order`, `release`, `finished_task`) and the
//! internal `try_admit_next` only touch that state inside the lock, and the
//! lock is never held across an await or while a runner is dropped.
//!
//! ```text
//! received_order ──▶ queue ──▶ [gate OPEN?] ──▶ runner task
//!                                   ▲                 │ LB3
//!                                   └──── release ◀───┘
//!                                                     │ LB4
//!                                     finished_task ◀─┘──▶ ReportSink
//! ```

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::gate::{AdmissionGate, GateState};
use super::queue::OrderQueue;
use super::runner::{PipelineRunner, RunOutcome, RunTicket, RunnerHooks};
use super::stages::StageSchedule;
use crate::config::LineConfig;
use crate::transport::ReportSink;
use crate::types::{MachineOrder, OrderId, Report};

// ============================================================================
// Shared State
// ============================================================================

/// Everything guarded by the line lock.
struct LineState {
    queue: OrderQueue,
    gate: AdmissionGate,
    /// Live runners by admission sequence number
    running: HashMap<u64, (OrderId, CancellationToken)>,
}

impl LineState {
    /// No runner alive and nothing left that will ever be admitted.
    fn is_idle(&self, shut_down: bool) -> bool {
        self.running.is_empty() && (shut_down || self.queue.is_empty())
    }
}

#[derive(Default)]
struct LineMetrics {
    received: AtomicU64,
    admitted: AtomicU64,
    completed: AtomicU64,
    abandoned: AtomicU64,
    published: AtomicU64,
    publish_failures: AtomicU64,
    /// Runners admitted but not yet released
    pre_release: AtomicUsize,
    max_pre_release: AtomicUsize,
}

/// Point-in-time view of the line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineStats {
    pub orders_received: u64,
    pub orders_admitted: u64,
    pub orders_completed: u64,
    pub orders_abandoned: u64,
    pub reports_published: u64,
    pub publish_failures: u64,
    pub queue_depth: usize,
    pub running: usize,
    /// Runners currently in the gated section (0 or 1)
    pub pre_release: usize,
    /// Highest `pre_release` ever observed
    pub max_pre_release: usize,
    pub gate: GateState,
}

struct LineInner {
    me: Weak<LineInner>,
    state: Mutex<LineState>,
    schedule: Arc<StageSchedule>,
    sink: Arc<dyn ReportSink>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    /// Runtime that runs every runner, whichever thread admitted it
    runtime: Option<Handle>,
    idle_tx: watch::Sender<bool>,
    next_seq: AtomicU64,
    metrics: LineMetrics,
}

impl LineInner {
    fn lock_state(&self) -> MutexGuard<'_, LineState> {
        self.state.lock().unwrap_or_else(|e| {
            warn!("Line state mutex poisoned, recovering");
            e.into_inner()
        })
    }

    fn refresh_idle(&self, state: &LineState) {
        let idle = state.is_idle(self.cancel.is_cancelled());
        self.idle_tx.send_if_modified(|current| {
            let changed = *current != idle;
            *current = idle;
            changed
        });
    }

    /// Admission step. Must be called with the line lock held.
    ///
    /// Closes the gate, dequeues the head and builds its runner, or does
    /// nothing. The returned runner must be launched after the lock is
    /// released.
    fn admit_locked(&self, state: &mut LineState) -> Option<PipelineRunner<LineInner>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        if !state.gate.is_open() || state.queue.is_empty() {
            return None;
        }
        if self.runtime.is_none() {
            warn!("Line was built outside an async runtime, leaving order queued");
            return None;
        }
        let hooks = self.me.upgrade()?;
        let order = state.queue.try_dequeue()?;
        state.gate.try_close();

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let ticket = RunTicket {
            seq,
            order_id: order.id.clone(),
        };
        let token = self.cancel.child_token();
        state
            .running
            .insert(seq, (order.id.clone(), token.clone()));

        self.metrics.admitted.fetch_add(1, Ordering::SeqCst);
        let gated = self.metrics.pre_release.fetch_add(1, Ordering::SeqCst) + 1;
        self.metrics.max_pre_release.fetch_max(gated, Ordering::SeqCst);

        debug!(run = %ticket, queue_depth = state.queue.len(), "Admitted order, gate closed");
        Some(PipelineRunner::new(
            ticket,
            order,
            Arc::clone(&self.schedule),
            hooks,
            token,
        ))
    }

    fn launch(&self, runner: Option<PipelineRunner<LineInner>>) -> Option<RunTicket> {
        let runner = runner?;
        let handle = self.runtime.as_ref()?;
        let ticket = runner.ticket().clone();
        self.tracker.spawn_on(runner.run(), handle);
        Some(ticket)
    }

    fn enqueue(&self, order: MachineOrder) -> Option<RunTicket> {
        self.metrics.received.fetch_add(1, Ordering::SeqCst);
        if self.cancel.is_cancelled() {
            warn!(order_id = %order.id, "Line is shut down, order will stay queued");
        }
        let runner = {
            let mut state = self.lock_state();
            debug!(order_id = %order.id, queue_depth = state.queue.len() + 1, gate = %state.gate.state(), "Order queued");
            state.queue.enqueue(order);
            let runner = self.admit_locked(&mut state);
            self.refresh_idle(&state);
            runner
        };
        self.launch(runner)
    }

    fn open_gate(&self) -> Option<RunTicket> {
        let runner = {
            let mut state = self.lock_state();
            if !state.gate.open() {
                debug!("Release on an open gate ignored");
            }
            let runner = self.admit_locked(&mut state);
            self.refresh_idle(&state);
            runner
        };
        self.launch(runner)
    }

    fn try_admit_next(&self) -> Option<RunTicket> {
        let runner = {
            let mut state = self.lock_state();
            let runner = self.admit_locked(&mut state);
            self.refresh_idle(&state);
            runner
        };
        self.launch(runner)
    }

    fn leave_gated_section(&self, ticket: &RunTicket) {
        if self
            .metrics
            .pre_release
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
        {
            warn!(run = %ticket, "Release without a matching admission");
        }
    }

    async fn publish(&self, report: Report) {
        if !report.is_complete() {
            warn!(
                order_id = %report.order_id(),
                barriers = report.passed_light_barriers().len(),
                "Refusing to publish incomplete report"
            );
            return;
        }
        match self.sink.publish(&report).await {
            Ok(()) => {
                self.metrics.published.fetch_add(1, Ordering::SeqCst);
                info!(order_id = %report.order_id(), sink = self.sink.sink_name(), "Report published");
            }
            Err(e) => {
                self.metrics.publish_failures.fetch_add(1, Ordering::SeqCst);
                warn!(
                    order_id = %report.order_id(),
                    sink = self.sink.sink_name(),
                    error = %e,
                    "Failed to publish report, dropping it"
                );
            }
        }
    }
}

#[async_trait]
impl RunnerHooks for LineInner {
    fn release(&self, ticket: &RunTicket) {
        self.leave_gated_section(ticket);
        debug!(run = %ticket, "Order left the gated section");
        self.open_gate();
    }

    /// The runtime refused or tore down the runner's task. Put the order
    /// back at the head and reopen the gate without admitting, since a new
    /// runner would meet the same fate.
    fn returned_unstarted(&self, ticket: &RunTicket, order: MachineOrder) {
        self.leave_gated_section(ticket);
        warn!(run = %ticket, "Runner never started, order returned to the queue");
        let mut state = self.lock_state();
        state.queue.requeue_front(order);
        state.gate.open();
        self.refresh_idle(&state);
    }

    async fn finished_task(&self, report: Report) {
        self.publish(report).await;
    }

    fn runner_exited(&self, ticket: &RunTicket, outcome: RunOutcome) {
        match outcome {
            RunOutcome::Completed => {
                self.metrics.completed.fetch_add(1, Ordering::SeqCst);
            }
            RunOutcome::Abandoned { barriers_passed } => {
                self.metrics.abandoned.fetch_add(1, Ordering::SeqCst);
                info!(run = %ticket, barriers_passed, "Runner abandoned, no report");
            }
        }
        let mut state = self.lock_state();
        state.running.remove(&ticket.seq);
        self.refresh_idle(&state);
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Handle to one assembly line. Cheap to clone; all clones drive the same line.
#[derive(Clone)]
pub struct LineController {
    inner: Arc<LineInner>,
}

impl LineController {
    pub fn new(config: &LineConfig, sink: Arc<dyn ReportSink>) -> Self {
        Self::with_schedule(StageSchedule::from_config(config), sink)
    }

    /// Runners are spawned on the runtime this is called from, so orders
    /// may later be handed in from any thread. Built outside a runtime, the
    /// line queues orders but never starts them.
    pub fn with_schedule(schedule: StageSchedule, sink: Arc<dyn ReportSink>) -> Self {
        let (idle_tx, _) = watch::channel(true);
        let inner = Arc::new_cyclic(|me| LineInner {
            me: me.clone(),
            state: Mutex::new(LineState {
                queue: OrderQueue::new(),
                gate: AdmissionGate::new(),
                running: HashMap::new(),
            }),
            schedule: Arc::new(schedule),
            sink,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            runtime: Handle::try_current().ok(),
            idle_tx,
            next_seq: AtomicU64::new(1),
            metrics: LineMetrics::default(),
        });
        Self { inner }
    }

    /// A new order arrived: queue it and start it if the gate is open.
    ///
    /// Safe to call from any thread, inside the runtime or not. Returns the
    /// admission ticket if this call started a runner.
    pub fn received_order(&self, order: MachineOrder) -> Option<RunTicket> {
        self.inner.enqueue(order)
    }

    /// Open the gate and admit the next queued order, if any.
    ///
    /// Runners call this through their hooks at the release point. Calling
    /// it on an open gate with an empty queue does nothing.
    pub fn release(&self) -> Option<RunTicket> {
        self.inner.open_gate()
    }

    /// Start the head of the queue if the gate is open. Otherwise a no-op.
    pub fn try_admit_next(&self) -> Option<RunTicket> {
        self.inner.try_admit_next()
    }

    /// Hand a finished report to the sink. Never touches queue or gate.
    pub async fn finished_task(&self, report: Report) {
        self.inner.publish(report).await;
    }

    /// Cancel every queued or running admission of `order_id`.
    ///
    /// Queued copies are removed, running ones abandon their remaining
    /// stages (releasing the gate if they still hold it). Returns how many
    /// were affected.
    pub fn cancel_order(&self, order_id: &OrderId) -> usize {
        let mut state = self.inner.lock_state();
        let removed = state.queue.remove(order_id);
        let mut cancelled = 0;
        for (id, token) in state.running.values() {
            if id == order_id {
                token.cancel();
                cancelled += 1;
            }
        }
        self.inner.refresh_idle(&state);
        if removed + cancelled > 0 {
            info!(order_id = %order_id, removed, cancelled, "Order cancelled");
        }
        removed + cancelled
    }

    pub fn gate_state(&self) -> GateState {
        self.inner.lock_state().gate.state()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock_state().queue.len()
    }

    pub fn stats(&self) -> LineStats {
        let m = &self.inner.metrics;
        let (queue_depth, running, gate) = {
            let state = self.inner.lock_state();
            (state.queue.len(), state.running.len(), state.gate.state())
        };
        LineStats {
            orders_received: m.received.load(Ordering::SeqCst),
            orders_admitted: m.admitted.load(Ordering::SeqCst),
            orders_completed: m.completed.load(Ordering::SeqCst),
            orders_abandoned: m.abandoned.load(Ordering::SeqCst),
            reports_published: m.published.load(Ordering::SeqCst),
            publish_failures: m.publish_failures.load(Ordering::SeqCst),
            queue_depth,
            running,
            pre_release: m.pre_release.load(Ordering::SeqCst),
            max_pre_release: m.max_pre_release.load(Ordering::SeqCst),
            gate,
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolve once no runner is alive and the queue is empty.
    ///
    /// After `shutdown` nothing is admitted any more, so this only waits for
    /// runners; orders queued late stay queued.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.idle_tx.subscribe();
        // The sender lives in `inner`, which outlives `self`
        rx.wait_for(|idle| *idle).await.ok();
    }

    /// Stop admitting, cancel all runners and wait for their tasks to exit.
    /// A runner blocked in its publish is cancelled too and its report dropped.
    ///
    /// Returns the orders that were still queued.
    pub async fn shutdown(&self) -> Vec<MachineOrder> {
        info!("Shutting down assembly line");
        self.inner.cancel.cancel();
        {
            let state = self.inner.lock_state();
            self.inner.refresh_idle(&state);
        }
        self.inner.tracker.close();
        self.inner.tracker.wait().await;

        let leftover = {
            let mut state = self.inner.lock_state();
            let leftover = state.queue.drain();
            self.inner.refresh_idle(&state);
            leftover
        };
        if !leftover.is_empty() {
            warn!(count = leftover.len(), "Orders never started before shutdown");
        }
        leftover
    }
}
