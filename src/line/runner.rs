//! Pipeline runner - drives one order through the four light barriers
//!
//! Each admitted order gets its own runner task. The runner owns its
//! [`Report`] exclusively until it hands it to [`RunnerHooks::finished_task`].
//!
//! Gate release is tied to a guard that lives as long as the runner: the
//! regular path releases at the third barrier, and any early exit
//! (cancellation, task dropped, panic) releases on drop. Either way the hook
//! fires exactly once per admitted order. A runner dropped before its first
//! poll hands the order back through [`RunnerHooks::returned_unstarted`]
//! instead, so no further runner is admitted from that drop.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::stages::{sample_driller_rpm, sample_shaper_rpm, Stage, StageSchedule};
use crate::types::{MachineOrder, OrderId, Report};

// ============================================================================
// Run Identity
// ============================================================================

/// Identifies one admission of an order. `seq` is unique per controller even
/// when the same order id is delivered twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunTicket {
    pub seq: u64,
    pub order_id: OrderId,
}

impl std::fmt::Display for RunTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.order_id, self.seq)
    }
}

/// How a runner ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// All barriers crossed and the report handed over.
    Completed,
    /// Stopped early; no report was produced.
    Abandoned { barriers_passed: usize },
}

// ============================================================================
// Hooks
// ============================================================================

/// Callbacks from a runner into whoever owns the line.
#[async_trait]
pub trait RunnerHooks: Send + Sync + 'static {
    /// The order left the gated front section. Called exactly once per runner.
    fn release(&self, ticket: &RunTicket);

    /// All barriers crossed; publish the report.
    ///
    /// Raced against the runner's cancellation token. A cancelled runner
    /// drops this future mid-publish.
    async fn finished_task(&self, report: Report);

    /// The runner was dropped before it ever ran (its task was refused or
    /// torn down by the runtime). Stands in for `release`.
    fn returned_unstarted(&self, ticket: &RunTicket, _order: MachineOrder) {
        self.release(ticket);
    }

    /// The runner is gone. Called exactly once, after any `release`.
    fn runner_exited(&self, _ticket: &RunTicket, _outcome: RunOutcome) {}
}

// ============================================================================
// Exit Guard
// ============================================================================

struct RunGuard<H: RunnerHooks> {
    hooks: Arc<H>,
    ticket: RunTicket,
    /// Taken on the first poll
    order: Option<MachineOrder>,
    released: bool,
    completed: bool,
    barriers_passed: usize,
}

impl<H: RunnerHooks> RunGuard<H> {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.hooks.release(&self.ticket);
        }
    }

    fn outcome(&self) -> RunOutcome {
        if self.completed {
            RunOutcome::Completed
        } else {
            RunOutcome::Abandoned {
                barriers_passed: self.barriers_passed,
            }
        }
    }
}

impl<H: RunnerHooks> Drop for RunGuard<H> {
    fn drop(&mut self) {
        if let Some(order) = self.order.take() {
            debug!(run = %self.ticket, "Runner dropped before it started");
            self.released = true;
            self.hooks.returned_unstarted(&self.ticket, order);
        }
        if !self.released {
            debug!(run = %self.ticket, barriers_passed = self.barriers_passed, "Releasing gate on early exit");
            self.release();
        }
        let outcome = self.outcome();
        self.hooks.runner_exited(&self.ticket, outcome);
    }
}

// ============================================================================
// Runner
// ============================================================================

pub struct PipelineRunner<H: RunnerHooks> {
    schedule: Arc<StageSchedule>,
    cancel: CancellationToken,
    rng: StdRng,
    guard: RunGuard<H>,
}

impl<H: RunnerHooks> PipelineRunner<H> {
    /// Build a runner for an admitted order.
    ///
    /// From this point on the hooks are guaranteed one `release` (or
    /// `returned_unstarted`, if dropped without being run) and one
    /// `runner_exited`.
    pub fn new(
        ticket: RunTicket,
        order: MachineOrder,
        schedule: Arc<StageSchedule>,
        hooks: Arc<H>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            schedule,
            cancel,
            rng: StdRng::from_entropy(),
            guard: RunGuard {
                hooks,
                ticket,
                order: Some(order),
                released: false,
                completed: false,
                barriers_passed: 0,
            },
        }
    }

    /// Use a fixed random source (reproducible waits and readings).
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn ticket(&self) -> &RunTicket {
        &self.guard.ticket
    }

    /// Run all stages in order. Returns once the report was handed over or
    /// the runner was cancelled.
    pub async fn run(mut self) -> RunOutcome {
        let order_id = match self.guard.order.take() {
            Some(order) => order.id,
            None => self.guard.ticket.order_id.clone(),
        };
        info!(order_id = %order_id, run = self.guard.ticket.seq, "Started manufacturing");

        let mut report = Report::new(order_id.clone());

        for stage in Stage::ALL {
            let wait = self.schedule.sample_wait(stage, &mut self.rng);

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!(
                        order_id = %order_id,
                        barriers_passed = self.guard.barriers_passed,
                        "Manufacturing abandoned"
                    );
                    return self.guard.outcome();
                }
                _ = tokio::time::sleep(wait) => {}
            }

            match report.pass_light_barrier() {
                Ok(n) => self.guard.barriers_passed = n,
                Err(e) => warn!(order_id = %order_id, error = %e, "Barrier crossing not recorded"),
            }
            info!(order_id = %order_id, barrier = stage.number(), "Passed {}", stage);

            match stage {
                Stage::SecondBarrier => {
                    let rpm = sample_driller_rpm(&mut self.rng);
                    if let Err(e) = report.set_speed_driller_rpm(rpm) {
                        warn!(order_id = %order_id, error = %e, "Driller reading not recorded");
                    }
                }
                Stage::ThirdBarrier => {
                    let rpm = sample_shaper_rpm(&mut self.rng);
                    if let Err(e) = report.set_speed_shaper_rpm(rpm) {
                        warn!(order_id = %order_id, error = %e, "Shaper reading not recorded");
                    }
                }
                Stage::FirstBarrier | Stage::FourthBarrier => {}
            }

            if stage == Stage::RELEASE_POINT {
                self.guard.release();
            }
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!(order_id = %order_id, "Report publish interrupted, report dropped");
                return self.guard.outcome();
            }
            _ = self.guard.hooks.finished_task(report) => {}
        }
        self.guard.completed = true;
        info!(order_id = %order_id, "Finished manufacturing");
        RunOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageTiming;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Release(u64),
        Finished(OrderId, usize),
        Exited(u64, RunOutcome),
    }

    #[derive(Default)]
    struct RecordingHooks {
        events: Mutex<Vec<Event>>,
        reports: Mutex<Vec<Report>>,
        cancel_on_release: Mutex<Option<CancellationToken>>,
        stall_publish: bool,
        returned: Mutex<Vec<OrderId>>,
    }

    impl RecordingHooks {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn releases(&self) -> usize {
            self.events()
                .iter()
                .filter(|e| matches!(e, Event::Release(_)))
                .count()
        }
    }

    #[async_trait]
    impl RunnerHooks for RecordingHooks {
        fn release(&self, ticket: &RunTicket) {
            self.events.lock().unwrap().push(Event::Release(ticket.seq));
            if let Some(token) = self.cancel_on_release.lock().unwrap().as_ref() {
                token.cancel();
            }
        }

        async fn finished_task(&self, report: Report) {
            if self.stall_publish {
                std::future::pending::<()>().await;
            }
            self.events.lock().unwrap().push(Event::Finished(
                report.order_id().clone(),
                report.passed_light_barriers().len(),
            ));
            self.reports.lock().unwrap().push(report);
        }

        fn runner_exited(&self, ticket: &RunTicket, outcome: RunOutcome) {
            self.events
                .lock()
                .unwrap()
                .push(Event::Exited(ticket.seq, outcome));
        }
    }

    /// Hooks that take unstarted orders back instead of releasing.
    #[derive(Default)]
    struct RequeueHooks(RecordingHooks);

    #[async_trait]
    impl RunnerHooks for RequeueHooks {
        fn release(&self, ticket: &RunTicket) {
            self.0.release(ticket);
        }

        async fn finished_task(&self, report: Report) {
            self.0.finished_task(report).await;
        }

        fn returned_unstarted(&self, _ticket: &RunTicket, order: MachineOrder) {
            self.0.returned.lock().unwrap().push(order.id);
        }

        fn runner_exited(&self, ticket: &RunTicket, outcome: RunOutcome) {
            self.0.runner_exited(ticket, outcome);
        }
    }

    fn runner<H: RunnerHooks>(hooks: &Arc<H>, cancel: CancellationToken) -> PipelineRunner<H> {
        let schedule = Arc::new(StageSchedule::new([StageTiming::new(40.0, 10.0); 4], 1.0));
        PipelineRunner::new(
            RunTicket {
                seq: 7,
                order_id: OrderId::from("MO-7"),
            },
            MachineOrder::new("MO-7"),
            schedule,
            Arc::clone(hooks),
            cancel,
        )
        .with_rng(StdRng::seed_from_u64(42))
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_run_releases_once_before_publishing() {
        let hooks = Arc::new(RecordingHooks::default());
        let outcome = runner(&hooks, CancellationToken::new()).run().await;

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(
            hooks.events(),
            vec![
                Event::Release(7),
                Event::Finished(OrderId::from("MO-7"), 4),
                Event::Exited(7, RunOutcome::Completed),
            ]
        );

        let reports = hooks.reports.lock().unwrap();
        let report = &reports[0];
        assert!(report.is_complete());
        assert!((9_200.0..11_200.0).contains(&report.speed_driller_rpm()));
        assert!((15_000.0..16_000.0).contains(&report.speed_shaper_rpm()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_release_still_releases() {
        let hooks = Arc::new(RecordingHooks::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = runner(&hooks, cancel).run().await;

        assert_eq!(outcome, RunOutcome::Abandoned { barriers_passed: 0 });
        assert_eq!(
            hooks.events(),
            vec![
                Event::Release(7),
                Event::Exited(7, RunOutcome::Abandoned { barriers_passed: 0 }),
            ]
        );
        assert!(hooks.reports.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_release_does_not_release_again() {
        let hooks = Arc::new(RecordingHooks::default());
        let cancel = CancellationToken::new();
        *hooks.cancel_on_release.lock().unwrap() = Some(cancel.clone());

        let outcome = runner(&hooks, cancel).run().await;

        assert_eq!(outcome, RunOutcome::Abandoned { barriers_passed: 3 });
        assert_eq!(hooks.releases(), 1);
        assert!(hooks.reports.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_runner_releases_gate() {
        let hooks = Arc::new(RecordingHooks::default());
        let runner = runner(&hooks, CancellationToken::new());
        assert_eq!(runner.ticket().order_id.as_str(), "MO-7");
        drop(runner);

        assert_eq!(
            hooks.events(),
            vec![
                Event::Release(7),
                Event::Exited(7, RunOutcome::Abandoned { barriers_passed: 0 }),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_task_releases_gate() {
        let hooks = Arc::new(RecordingHooks::default());
        let handle = tokio::spawn(runner(&hooks, CancellationToken::new()).run());
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        assert_eq!(hooks.releases(), 1);
        assert!(matches!(
            hooks.events().last(),
            Some(Event::Exited(7, RunOutcome::Abandoned { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_stalled_publish() {
        let hooks = Arc::new(RecordingHooks {
            stall_publish: true,
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(runner(&hooks, cancel.clone()).run());

        // Four stages of at most 50 ms each, then the publish hangs
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        assert!(!handle.is_finished());
        assert_eq!(hooks.releases(), 1);

        cancel.cancel();
        let outcome = handle.await.unwrap();
        assert_eq!(outcome, RunOutcome::Abandoned { barriers_passed: 4 });
        assert_eq!(
            hooks.events().last(),
            Some(&Event::Exited(7, RunOutcome::Abandoned { barriers_passed: 4 }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unstarted_runner_hands_order_back() {
        let hooks = Arc::new(RequeueHooks::default());
        drop(runner(&hooks, CancellationToken::new()));

        assert_eq!(*hooks.0.returned.lock().unwrap(), vec![OrderId::from("MO-7")]);
        assert_eq!(hooks.0.releases(), 0);
        assert_eq!(
            hooks.0.events(),
            vec![Event::Exited(7, RunOutcome::Abandoned { barriers_passed: 0 })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_started_runner_never_hands_order_back() {
        let hooks = Arc::new(RequeueHooks::default());
        let handle = tokio::spawn(runner(&hooks, CancellationToken::new()).run());
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        assert!(hooks.0.returned.lock().unwrap().is_empty());
        assert_eq!(hooks.0.releases(), 1);
    }
}
