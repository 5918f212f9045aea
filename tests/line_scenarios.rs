//! End-to-end behaviour of the assembly line on real time
//!
//! Reports carry wall-clock timestamps, so these tests run the line at a high
//! speed-up factor instead of pausing the clock.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use assembly_line_sim::line::{Stage, StageSchedule};
use assembly_line_sim::{
    GateState, LineConfig, LineController, MachineOrder, OrderId, Report, ReportSink,
    TransportError, LIGHT_BARRIER_COUNT,
};

#[derive(Default)]
struct CollectingSink {
    reports: Mutex<Vec<Report>>,
}

impl CollectingSink {
    fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap().clone()
    }

    fn report_for(&self, id: &str) -> Report {
        self.reports()
            .into_iter()
            .find(|r| r.order_id().as_str() == id)
            .unwrap_or_else(|| panic!("no report for {id}"))
    }
}

#[async_trait]
impl ReportSink for CollectingSink {
    async fn publish(&self, report: &Report) -> Result<(), TransportError> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "collect"
    }
}

fn config(speed: f64) -> LineConfig {
    LineConfig {
        speed_up_factor: speed,
        ..LineConfig::default()
    }
}

fn line(speed: f64) -> (LineController, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::default());
    let line = LineController::new(&config(speed), sink.clone());
    (line, sink)
}

async fn wait_idle(line: &LineController, limit: Duration) {
    tokio::time::timeout(limit, line.wait_idle())
        .await
        .expect("line did not drain in time");
}

#[tokio::test]
async fn scenario_a_second_order_starts_at_release() {
    let (line, sink) = line(100.0);

    let first = line.received_order(MachineOrder::new("O1"));
    assert!(first.is_some(), "O1 must start immediately");
    assert_eq!(line.gate_state(), GateState::Closed);

    assert!(line.received_order(MachineOrder::new("O2")).is_none());
    assert_eq!(line.queue_len(), 1);
    assert_eq!(line.gate_state(), GateState::Closed);

    wait_idle(&line, Duration::from_secs(5)).await;

    let o1 = sink.report_for("O1");
    let o2 = sink.report_for("O2");
    let o1_release = o1.passed_light_barriers()[Stage::RELEASE_POINT.number() - 1];
    assert!(
        o2.start_time() >= o1_release,
        "O2 started at {} before O1 released at {}",
        o2.start_time(),
        o1_release
    );
    assert!(o2.start_time() < o1.passed_light_barriers()[3]);
}

#[tokio::test]
async fn scenario_b_speed_factor_scales_whole_cycle() {
    let (line, sink) = line(1000.0);

    let started = Instant::now();
    line.received_order(MachineOrder::new("fast"));
    wait_idle(&line, Duration::from_secs(1)).await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(sink.report_for("fast").is_complete());
}

#[tokio::test]
async fn scenario_c_release_on_idle_line_is_noop() {
    let (line, _sink) = line(1000.0);

    assert!(line.release().is_none());
    assert!(line.release().is_none());

    let stats = line.stats();
    assert_eq!(stats.gate, GateState::Open);
    assert_eq!(stats.orders_admitted, 0);
    assert_eq!(stats.queue_depth, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_order_runs_exactly_once_under_concurrent_intake() {
    let (line, sink) = line(1000.0);

    let mut producers = Vec::new();
    for p in 0..4 {
        let line = line.clone();
        producers.push(tokio::spawn(async move {
            for i in 0..5 {
                line.received_order(MachineOrder::new(format!("P{p}-{i}")));
                // Interleave with runners reaching their release point
                tokio::time::sleep(Duration::from_millis(3)).await;
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }
    wait_idle(&line, Duration::from_secs(10)).await;

    let mut ids: Vec<String> = sink
        .reports()
        .iter()
        .map(|r| r.order_id().to_string())
        .collect();
    ids.sort();
    let mut expected: Vec<String> = (0..4)
        .flat_map(|p| (0..5).map(move |i| format!("P{p}-{i}")))
        .collect();
    expected.sort();
    assert_eq!(ids, expected);

    let stats = line.stats();
    assert_eq!(stats.orders_received, 20);
    assert_eq!(stats.orders_admitted, 20);
    assert_eq!(stats.orders_completed, 20);
    assert_eq!(stats.reports_published, 20);
    assert_eq!(stats.pre_release, 0);
    assert!(stats.max_pre_release <= 1, "gated section held {} orders", stats.max_pre_release);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn orders_handed_in_from_a_plain_thread_are_started() {
    let (line, sink) = line(1000.0);

    let producer = line.clone();
    std::thread::spawn(move || {
        assert!(tokio::runtime::Handle::try_current().is_err());
        assert!(producer.received_order(MachineOrder::new("T1")).is_some());
        producer.received_order(MachineOrder::new("T2"));
    })
    .join()
    .unwrap();

    wait_idle(&line, Duration::from_secs(5)).await;

    let mut ids: Vec<String> = sink
        .reports()
        .iter()
        .map(|r| r.order_id().to_string())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["T1", "T2"]);
    assert_eq!(line.gate_state(), GateState::Open);
}

#[tokio::test]
async fn stage_intervals_and_readings_stay_in_bounds() {
    let speed = 100.0;
    let (line, sink) = line(speed);
    let schedule = StageSchedule::from_config(&config(speed));

    for id in ["T1", "T2", "T3"] {
        line.received_order(MachineOrder::new(id));
    }
    wait_idle(&line, Duration::from_secs(5)).await;

    // Timers never fire early; allow for scheduling lag on the late side
    let early = chrono::Duration::milliseconds(1);
    let late = chrono::Duration::milliseconds(25);

    let reports = sink.reports();
    assert_eq!(reports.len(), 3);
    for report in &reports {
        let barriers = report.passed_light_barriers();
        assert_eq!(barriers.len(), LIGHT_BARRIER_COUNT);

        let mut previous = report.start_time();
        for (stage, at) in Stage::ALL.iter().zip(barriers) {
            assert!(*at > previous, "{stage} not after previous crossing");
            let (min, max) = schedule.bounds(*stage);
            let min = chrono::Duration::from_std(min).unwrap();
            let max = chrono::Duration::from_std(max).unwrap();
            let interval = *at - previous;
            assert!(
                interval >= min - early && interval <= max + late,
                "{}: {stage} took {interval} outside {min}..{max}",
                report.order_id()
            );
            previous = *at;
        }

        assert!((9_200.0..11_200.0).contains(&report.speed_driller_rpm()));
        assert!((15_000.0..16_000.0).contains(&report.speed_shaper_rpm()));
    }
}

#[tokio::test]
async fn cancelling_running_order_reopens_gate() {
    let (line, sink) = line(20.0);

    line.received_order(MachineOrder::new("doomed"));
    line.received_order(MachineOrder::new("next"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(line.queue_len(), 1);

    assert_eq!(line.cancel_order(&OrderId::from("doomed")), 1);
    wait_idle(&line, Duration::from_secs(5)).await;

    let ids: Vec<String> = sink.reports().iter().map(|r| r.order_id().to_string()).collect();
    assert_eq!(ids, vec!["next"]);
    let stats = line.stats();
    assert_eq!(stats.orders_abandoned, 1);
    assert_eq!(stats.gate, GateState::Open);
    assert!(stats.max_pre_release <= 1);
}

#[tokio::test]
async fn shutdown_stops_runners_and_returns_queue() {
    let (line, sink) = line(1.0);

    for id in ["S1", "S2", "S3"] {
        line.received_order(MachineOrder::new(id));
    }

    let leftover = tokio::time::timeout(Duration::from_secs(1), line.shutdown())
        .await
        .expect("shutdown must not wait for stage timers");
    let ids: Vec<&str> = leftover.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, vec!["S2", "S3"]);

    let stats = line.stats();
    assert_eq!(stats.orders_abandoned, 1);
    assert_eq!(stats.running, 0);
    assert_eq!(stats.queue_depth, 0);
    assert!(sink.reports().is_empty());

    // Already drained
    tokio::time::timeout(Duration::from_millis(100), line.wait_idle())
        .await
        .unwrap();
}
