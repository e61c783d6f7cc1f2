//! End-to-end scheduler runs against shell-command transports.
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use replica_engine::{
    AutoscaleConfig, BenchmarkSample, CommandTransport, CommandTransportConfig, ControlFlag,
    DownloadController, FailureKind, SchedulerConfig, SupervisorConfig, TransportRegistry,
};
use tempfile::TempDir;

fn fast_config(min: usize, max: usize) -> SchedulerConfig {
    SchedulerConfig {
        autoscale: AutoscaleConfig {
            tick_interval_ms: 50,
            ..Default::default()
        },
        supervisor: SupervisorConfig {
            warmup_ms: 10,
            poll_interval_ms: 50,
            max_kill_wait: 2,
            kill_poll_interval_ms: 50,
            slow_sources: Vec::new(),
            ..Default::default()
        },
        ..SchedulerConfig::default().with_workers(min, max)
    }
}

/// Registry with the defaults plus a `sh -c <script> sh <target>` transport for `scheme`.
fn registry_with_script(scheme: &str, script: &str) -> Arc<TransportRegistry> {
    let registry = TransportRegistry::with_defaults();
    let config = CommandTransportConfig::new("sh")
        .with_args(&["-c", script, "sh", "{target}"])
        .with_trailing_args(&[]);
    registry.register(scheme, Arc::new(CommandTransport::new(scheme, config)));
    Arc::new(registry)
}

async fn manage(controller: &DownloadController) {
    tokio::time::timeout(Duration::from_secs(20), controller.manage(false, None))
        .await
        .expect("manage did not return");
}

#[tokio::test]
async fn test_local_copies_complete() {
    let dir = TempDir::new().unwrap();
    let controller = DownloadController::new(fast_config(2, 4)).unwrap();

    for i in 0..5 {
        let source = dir.path().join("source").join(format!("{i}.nc"));
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(&source, b"").unwrap();
        controller.submit_transfer(
            dir.path().join("replica").join(format!("{i}.nc")),
            format!("file://{}", source.display()),
            Some(0),
            ControlFlag::Normal,
        );
    }

    manage(&controller).await;
    let results = controller.results();
    assert_eq!(results.succeeded_count, 5);
    assert_eq!(results.failed_count, 0);
    assert_eq!(results.succeeded_download_count, 0);
    for i in 0..5 {
        assert!(dir.path().join("replica").join(format!("{i}.nc")).is_file());
    }
    controller.shutdown(false).await;
}

#[tokio::test]
async fn test_unsupported_scheme_is_recorded() {
    let dir = TempDir::new().unwrap();
    let controller = DownloadController::new(fast_config(1, 2)).unwrap();
    controller.submit_transfer(
        dir.path().join("a.nc"),
        "srm://storage.example.org/a.nc",
        Some(10),
        ControlFlag::Normal,
    );

    manage(&controller).await;
    let results = controller.results();
    assert_eq!(results.failed_count, 1);
    assert!(results.failed_details[0].reason.contains("srm"));
    assert_eq!(results.failed_details[0].kind, FailureKind::Transfer);
    controller.shutdown(false).await;
}

#[tokio::test]
async fn test_bounded_retry_gives_up() {
    let dir = TempDir::new().unwrap();
    let config = fast_config(1, 1).with_retry(Some(2));
    let controller =
        DownloadController::with_transports(config, registry_with_script("flaky", "exit 1"))
            .unwrap();
    controller.submit_transfer(
        dir.path().join("a.nc"),
        "flaky://h/a.nc",
        Some(10),
        ControlFlag::Normal,
    );

    manage(&controller).await;
    let results = controller.results();
    assert_eq!(results.retried_count, 2);
    assert_eq!(results.failed_count, 1);
    assert!(results.failed_details[0].reason.contains("code 1"));
    controller.shutdown(false).await;
}

#[tokio::test]
async fn test_benchmark_samples_and_download_bytes() {
    let dir = TempDir::new().unwrap();
    let controller = DownloadController::with_transports(
        fast_config(2, 3),
        registry_with_script("slowish", "sleep 0.3; printf abcd > \"$1\""),
    )
    .unwrap();
    for i in 0..3 {
        controller.submit_transfer(
            dir.path().join(format!("{i}.nc")),
            format!("slowish://h/{i}.nc"),
            None,
            ControlFlag::Normal,
        );
    }

    let samples: Arc<Mutex<Vec<BenchmarkSample>>> = Arc::default();
    let sink = samples.clone();
    tokio::time::timeout(
        Duration::from_secs(20),
        controller.manage(
            true,
            Some(Box::new(move |sample: &BenchmarkSample| {
                sink.lock().push(sample.clone())
            })),
        ),
    )
    .await
    .unwrap();

    let results = controller.results();
    assert_eq!(results.succeeded_count, 3);
    assert_eq!(results.succeeded_download_count, 3);
    assert_eq!(results.succeeded_bytes, 12);
    let samples = samples.lock();
    assert!(!samples.is_empty());
    assert!(samples.iter().all(|s| s.worker_count <= 3));
    controller.shutdown(false).await;
}

#[tokio::test]
async fn test_force_stop_kills_transfers() {
    let dir = TempDir::new().unwrap();
    let controller = DownloadController::with_transports(
        fast_config(2, 2),
        registry_with_script("hung", "sleep 30"),
    )
    .unwrap();
    for i in 0..2 {
        controller.submit_transfer(
            dir.path().join(format!("{i}.nc")),
            format!("hung://h/{i}.nc"),
            None,
            ControlFlag::Normal,
        );
    }

    controller.start();
    for _ in 0..200 {
        if controller.active_workers() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(controller.active_workers(), 2);

    tokio::time::timeout(Duration::from_secs(5), controller.shutdown(true))
        .await
        .expect("force stop did not finish");

    let results = controller.results();
    assert_eq!(results.failed_count, 2);
    assert!(
        results
            .failed_details
            .iter()
            .all(|f| f.reason.contains("cancelled"))
    );
    assert_eq!(controller.worker_count(), 0);
}
