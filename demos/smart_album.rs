//! Cluster synthetic "photo embeddings" three ways: blocking, streaming, and as a job.
//!
//! Run with `RUST_LOG=album_cluster=debug cargo run --example smart_album` to see
//! the pipeline's tracing output.

use std::time::Duration;

use album_cluster::{
    ClusterParams, ClusteringEngine, EngineConfig, JobOrchestrator, ReductionParams, SubmitRequest,
    VectorBatch,
};
use rand::prelude::*;
use tracing_subscriber::EnvFilter;

/// Three "events" of 20 photos each, plus a few unrelated shots, as 64-d unit vectors.
fn photo_embeddings() -> VectorBatch {
    let mut rng = StdRng::seed_from_u64(2024);
    let dim = 64;
    let topics: Vec<Vec<f32>> = (0..3)
        .map(|_| (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect())
        .collect();

    let mut vectors = Vec::new();
    for topic in &topics {
        for _ in 0..20 {
            vectors.push(normalized(topic.iter().map(|x| x + rng.random_range(-0.15..0.15)).collect()));
        }
    }
    for _ in 0..4 {
        vectors.push(normalized((0..dim).map(|_| rng.random_range(-1.0..1.0)).collect()));
    }
    let ids = (1000..1000 + vectors.len() as i64).collect();
    VectorBatch::new(vectors, ids).expect("synthetic batch is well-formed")
}

fn normalized(v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.into_iter().map(|x| x / norm).collect()
}

#[tokio::main]
async fn main() -> album_cluster::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut params = ClusterParams::default();
    params.clustering.min_cluster_size = 5;

    // --- Blocking ---
    let engine = ClusteringEngine::new();
    let result = engine.cluster(photo_embeddings(), &params)?;
    println!("=== Blocking (cosine, no reduction) ===");
    for cluster in &result.clusters {
        println!(
            "  album {:2}: {:2} photos, avg probability {:.4}",
            cluster.id,
            cluster.member_ids.len(),
            cluster.avg_probability
        );
    }
    println!("  unsorted: {:?}", result.noise_ids);

    // --- Streaming, with reduction ---
    let reduced = ClusterParams {
        reduction: ReductionParams {
            enabled: true,
            target_dims: 8,
            neighbors: 10,
            min_dist: 0.0,
        },
        ..params
    };
    println!("\n=== Streaming (reduced to 8 dims) ===");
    for event in engine.cluster_stream(photo_embeddings(), &reduced)? {
        println!("  [{:3}%] {:<10} {}", event.progress, event.status, event.message);
        if let Some(result) = &event.result {
            println!("  params used: {}", serde_json::to_string(&result.params_used).unwrap_or_default());
        }
    }

    // --- Background job ---
    let orchestrator = JobOrchestrator::new(EngineConfig::default())?;
    let response = orchestrator.submit(SubmitRequest::new(photo_embeddings(), "user-17/holidays").with_params(params))?;
    let job_id = response.job_id;
    println!("\n=== Job {job_id} ({}) ===", response.status);
    let job = orchestrator.wait_for_terminal(&job_id, Duration::from_millis(10)).await?;
    println!(
        "  status {} at {}%, {} clusters",
        job.status,
        job.progress,
        job.result.map_or(0, |r| r.cluster_count)
    );

    Ok(())
}
