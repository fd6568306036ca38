//! Integration tests for the run lifecycle

use parking_lot::Mutex;
use prometheus_spillway::config::EngineConfig;
use prometheus_spillway::core::EngineEventType;
use prometheus_spillway::runtime::{RunController, RunState};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn config(dir: &std::path::Path) -> EngineConfig {
    EngineConfig::new()
        .with_worker_threads(1)
        .with_queue_capacity(0)
        .with_processing_delay_ms(20)
        .with_drain_poll_interval_ms(20)
        .with_queue_path(dir.join("tasks.queue"))
}

#[test]
fn test_start_stop_reset() {
    let dir = tempfile::tempdir().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let controller = {
        let seen = Arc::clone(&seen);
        RunController::new().with_listener(move |e| seen.lock().push(e.event_type))
    };
    assert_eq!(controller.status().state, RunState::Idle);
    assert!(controller.current_engine().is_none());

    let engine = controller.start(config(dir.path())).expect("Failed to start run");
    let status = controller.status();
    assert_eq!(status.state, RunState::Running);
    assert!(status.run_id.as_deref().is_some_and(|id| id.starts_with("run-")));

    for i in 0..3 {
        engine.submit(format!("job-{i}")).unwrap();
    }
    controller.stop().expect("Failed to stop run");
    assert_eq!(controller.status().state, RunState::Stopped);
    assert!(controller.current_engine().is_none());
    assert_eq!(status.run_id, controller.status().run_id);

    let completed = seen
        .lock()
        .iter()
        .filter(|t| **t == EngineEventType::Completed)
        .count();
    assert_eq!(completed, 3);

    controller.reset();
    let status = controller.status();
    assert_eq!(status.state, RunState::Idle);
    assert!(status.run_id.is_none());
}

#[test]
fn test_second_start_refused_while_running() {
    let dir = tempfile::tempdir().unwrap();
    let controller = RunController::new();
    controller.start(config(dir.path())).unwrap();

    let err = controller.start(config(dir.path())).unwrap_err();
    assert!(err.to_string().contains("already active"), "unexpected error: {err}");

    controller.stop().unwrap();
    // Stop is a no-op once stopped.
    controller.stop().unwrap();
    assert_eq!(controller.status().state, RunState::Stopped);
}

#[test]
fn test_restart_after_stop_gets_new_run_id() {
    let dir = tempfile::tempdir().unwrap();
    let controller = RunController::new();
    controller.start(config(dir.path())).unwrap();
    let first = controller.status().run_id;
    controller.stop().unwrap();

    let engine = controller.start(config(dir.path())).unwrap();
    let second = controller.status().run_id;
    assert_ne!(first, second);

    engine.submit("again-1").unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while engine.stats().completed < 1 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(engine.stats().completed, 1);
    controller.reset();
    assert_eq!(controller.status().state, RunState::Idle);
}

#[test]
fn test_status_reports_stopping_while_draining() {
    let dir = tempfile::tempdir().unwrap();
    let controller = RunController::new();
    let engine = controller
        .start(config(dir.path()).with_processing_delay_ms(300))
        .unwrap();
    for i in 0..4 {
        engine.submit(format!("slow-{i}")).unwrap();
    }

    thread::scope(|scope| {
        let stopper = scope.spawn(|| controller.stop());
        thread::sleep(Duration::from_millis(100));

        let asked = Instant::now();
        let status = controller.status();
        assert!(asked.elapsed() < Duration::from_millis(100), "status blocked on the drain");
        assert_eq!(status.state, RunState::Stopping);
        assert!(controller.current_engine().is_some());

        // Neither a second stop, a reset nor a start may cut the drain short.
        controller.stop().unwrap();
        controller.reset();
        assert!(controller.start(config(dir.path())).is_err());
        assert_eq!(controller.status().state, RunState::Stopping);

        stopper.join().unwrap().unwrap();
    });

    assert_eq!(controller.status().state, RunState::Stopped);
    assert!(controller.current_engine().is_none());
    assert_eq!(engine.stats().completed, 4);
}
