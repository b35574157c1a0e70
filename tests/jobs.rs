use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use album_cluster::cluster::DistanceMetric;
use album_cluster::{
    ClusterParams, ClusteringParams, EngineConfig, Error, JobId, JobOrchestrator, JobStatus,
    SubmitRequest, VectorBatch,
};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

const POLL: Duration = Duration::from_millis(5);

type Received = Arc<Mutex<Vec<Value>>>;

fn two_groups() -> VectorBatch {
    let vectors = (0..10)
        .map(|i| if i < 5 { vec![0.0, 0.0] } else { vec![10.0, 10.0] })
        .collect();
    VectorBatch::new(vectors, (100..110).collect()).unwrap()
}

fn params() -> ClusterParams {
    ClusterParams {
        clustering: ClusteringParams {
            min_cluster_size: 2,
            distance_metric: DistanceMetric::Euclidean,
            ..ClusteringParams::default()
        },
        ..ClusterParams::default()
    }
}

async fn receive(State(received): State<Received>, Json(body): Json<Value>) -> StatusCode {
    received.lock().unwrap().push(body);
    StatusCode::OK
}

async fn reject(Json(_): Json<Value>) -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

/// Answers long after any reasonable callback timeout.
async fn stall(State(received): State<Received>, Json(body): Json<Value>) -> StatusCode {
    tokio::time::sleep(Duration::from_secs(5)).await;
    received.lock().unwrap().push(body);
    StatusCode::OK
}

/// Callback receiver on an ephemeral port.
async fn callback_server() -> (SocketAddr, Received) {
    let received = Received::default();
    let app = Router::new()
        .route("/callback", post(receive))
        .route("/broken", post(reject))
        .route("/slow", post(stall))
        .with_state(Arc::clone(&received));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, received)
}

async fn wait_for_terminal_callback(received: &Received) -> Vec<Value> {
    for _ in 0..400 {
        {
            let events = received.lock().unwrap();
            if events
                .iter()
                .any(|e| e["status"] == "completed" || e["status"] == "failed")
            {
                return events.clone();
            }
        }
        tokio::time::sleep(POLL).await;
    }
    panic!("no terminal callback received");
}

#[tokio::test]
async fn polling_a_finished_job_is_idempotent() {
    let orchestrator = JobOrchestrator::new(EngineConfig::default()).unwrap();
    let job_id = orchestrator
        .submit(SubmitRequest::new(two_groups(), "album-42").with_params(params()))
        .unwrap()
        .job_id;

    let done = orchestrator.wait_for_terminal(&job_id, POLL).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);

    let first = orchestrator.get_status(&job_id).unwrap();
    let second = orchestrator.get_status(&job_id).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, done);

    let result = first.result.unwrap();
    assert_eq!(result.cluster_count, 2);
    assert!(result.noise_ids.is_empty());
    for cluster in &result.clusters {
        assert!((cluster.avg_probability - 1.0).abs() < 1e-6);
    }
}

#[tokio::test]
async fn submit_returns_before_work_is_done() {
    let config = EngineConfig {
        max_concurrent_jobs: 1,
        ..EngineConfig::default()
    };
    let orchestrator = JobOrchestrator::new(config).unwrap();
    // On a current-thread runtime nothing runs until this test yields.
    let job_id = orchestrator
        .submit(SubmitRequest::new(two_groups(), "x").with_params(params()))
        .unwrap()
        .job_id;
    let job = orchestrator.get_status(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.progress, 0);
    assert!(job.finished_at.is_none());
}

#[tokio::test]
async fn invalid_parameters_are_rejected_at_submission() {
    let orchestrator = JobOrchestrator::new(EngineConfig::default()).unwrap();
    let mut bad = params();
    bad.reduction.min_dist = 2.0;
    let err = orchestrator
        .submit(SubmitRequest::new(two_groups(), "x").with_params(bad))
        .unwrap_err();
    assert!(err.is_invalid_input());
    assert_eq!(orchestrator.job_count(), 0);
}

#[tokio::test]
async fn unknown_job_id_is_not_found() {
    let orchestrator = JobOrchestrator::new(EngineConfig::default()).unwrap();
    let id: JobId = "6f1c0b8e-3b7a-4c55-9a56-1f0e7c2d9a10".parse().unwrap();
    assert!(matches!(orchestrator.get_status(&id), Err(Error::JobNotFound(_))));
}

#[tokio::test]
async fn non_finite_input_fails_the_job() {
    let orchestrator = JobOrchestrator::new(EngineConfig::default()).unwrap();
    let batch = VectorBatch::new(
        vec![vec![0.0, 0.0], vec![f32::NAN, 1.0], vec![1.0, 1.0], vec![2.0, 2.0]],
        vec![1, 2, 3, 4],
    )
    .unwrap();
    let job_id = orchestrator
        .submit(SubmitRequest::new(batch, "broken").with_params(params()))
        .unwrap()
        .job_id;

    let job = orchestrator.wait_for_terminal(&job_id, POLL).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.progress, 60);
    assert!(job.result.is_none());
    assert!(job.error.unwrap().contains("non-finite"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn callbacks_mirror_progress_in_order() {
    let (addr, received) = callback_server().await;
    let orchestrator = JobOrchestrator::new(EngineConfig::default()).unwrap();
    let job_id = orchestrator
        .submit(
            SubmitRequest::new(two_groups(), "album-7")
                .with_params(params())
                .with_callback(format!("http://{addr}/callback")),
        )
        .unwrap()
        .job_id;

    let job = orchestrator.wait_for_terminal(&job_id, POLL).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let events = wait_for_terminal_callback(&received).await;
    let progress: Vec<u64> = events.iter().map(|e| e["progress"].as_u64().unwrap()).collect();
    assert_eq!(progress, vec![60, 90, 100]);
    for event in &events {
        assert_eq!(event["job_id"], job_id.to_string());
        assert_eq!(event["external_ref"], "album-7");
    }
    let last = events.last().unwrap();
    assert_eq!(last["status"], "completed");
    assert_eq!(last["result"]["cluster_count"], 2);
    assert_eq!(
        events.iter().filter(|e| e["status"] == "completed").count(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_callback_endpoint_does_not_affect_the_job() {
    let (addr, received) = callback_server().await;
    let orchestrator = JobOrchestrator::new(EngineConfig::default()).unwrap();
    let job_id = orchestrator
        .submit(
            SubmitRequest::new(two_groups(), "x")
                .with_params(params())
                .with_callback(format!("http://{addr}/broken")),
        )
        .unwrap()
        .job_id;

    let job = orchestrator.wait_for_terminal(&job_id, POLL).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(received.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_callback_does_not_affect_the_job() {
    // Bind and drop a listener to get a port that refuses connections.
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let config = EngineConfig {
        callback_timeout_secs: 1,
        ..EngineConfig::default()
    };
    let orchestrator = JobOrchestrator::new(config).unwrap();
    let job_id = orchestrator
        .submit(
            SubmitRequest::new(two_groups(), "x")
                .with_params(params())
                .with_callback(format!("http://{addr}/callback")),
        )
        .unwrap()
        .job_id;

    let job = orchestrator.wait_for_terminal(&job_id, POLL).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_callback_endpoint_does_not_hold_up_the_job() {
    let (addr, _received) = callback_server().await;
    let config = EngineConfig {
        callback_timeout_secs: 1,
        ..EngineConfig::default()
    };
    let orchestrator = JobOrchestrator::new(config).unwrap();
    let job_id = orchestrator
        .submit(
            SubmitRequest::new(two_groups(), "x")
                .with_params(params())
                .with_callback(format!("http://{addr}/slow")),
        )
        .unwrap()
        .job_id;

    // Every callback stalls past the timeout; the job reaches its terminal state regardless.
    let job = tokio::time::timeout(
        Duration::from_millis(900),
        orchestrator.wait_for_terminal(&job_id, POLL),
    )
    .await
    .expect("job held up by callback delivery")
    .unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn jobs_beyond_the_concurrency_limit_still_finish() {
    let config = EngineConfig {
        max_concurrent_jobs: 1,
        ..EngineConfig::default()
    };
    let orchestrator = JobOrchestrator::new(config).unwrap();
    let ids: Vec<JobId> = (0..4)
        .map(|i| {
            orchestrator
                .submit(SubmitRequest::new(two_groups(), format!("album-{i}")).with_params(params()))
                .unwrap()
                .job_id
        })
        .collect();
    assert_eq!(orchestrator.job_count(), 4);

    for (i, id) in ids.iter().enumerate() {
        let job = orchestrator.wait_for_terminal(id, POLL).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.external_ref, format!("album-{i}"));
    }
}

#[tokio::test]
async fn finished_jobs_are_evicted_past_capacity() {
    let mut config = EngineConfig::default();
    config.retention.max_finished_jobs = 1;
    let orchestrator = JobOrchestrator::new(config).unwrap();

    let first = orchestrator
        .submit(SubmitRequest::new(two_groups(), "first").with_params(params()))
        .unwrap()
        .job_id;
    orchestrator.wait_for_terminal(&first, POLL).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    let second = orchestrator
        .submit(SubmitRequest::new(two_groups(), "second").with_params(params()))
        .unwrap()
        .job_id;
    orchestrator.wait_for_terminal(&second, POLL).await.unwrap();

    // Finishing the second job pushed the first out; only the newest finished job survives.
    assert!(matches!(orchestrator.get_status(&first), Err(Error::JobNotFound(_))));
    let third = orchestrator
        .submit(SubmitRequest::new(two_groups(), "third").with_params(params()))
        .unwrap()
        .job_id;
    assert!(orchestrator.get_status(&second).is_ok());
    assert!(orchestrator.get_status(&third).is_ok());
}
