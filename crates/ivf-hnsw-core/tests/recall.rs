//! Recall quality validation for the standalone HNSW graph and the full
//! IVF-ADC index, against brute-force ground truth over synthetic data.
//!
//! # Recall Definition
//!
//! Recall@k = |retrieved ∩ ground_truth| / k
//!
//! # Running
//!
//! ```bash
//! cargo test --test recall -- --nocapture
//! ```

use std::collections::HashSet;
use std::io::Write;

use ivf_hnsw_core::config::{HnswConfig, IvfHnswConfig};
use ivf_hnsw_core::distance::FloatL2Space;
use ivf_hnsw_core::hnsw::Hnsw;
use ivf_hnsw_core::IvfAdcIndex;

/// Deterministic pseudo-random synthetic vectors, reproducible without a
/// `rand` dependency in the test harness.
fn generate_vectors(count: usize, dim: usize) -> Vec<Vec<f32>> {
    (0..count)
        .map(|i| {
            (0..dim)
                .map(|d| (((i * 2_654_435_761 + d * 40_503) % 10_000) as f32 / 10_000.0))
                .collect()
        })
        .collect()
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn brute_force_top_k(vectors: &[Vec<f32>], query: &[f32], k: usize) -> Vec<u32> {
    let mut distances: Vec<(u32, f32)> = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| (i as u32, squared_l2(query, v)))
        .collect();
    distances.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
    distances.truncate(k);
    distances.into_iter().map(|(id, _)| id).collect()
}

fn recall_at_k(retrieved: &[u32], ground_truth: &[u32]) -> f64 {
    let k = retrieved.len().min(ground_truth.len());
    if k == 0 {
        return 0.0;
    }
    let retrieved_set: HashSet<_> = retrieved.iter().take(k).collect();
    let truth_set: HashSet<_> = ground_truth.iter().take(k).collect();
    retrieved_set.intersection(&truth_set).count() as f64 / k as f64
}

fn write_fvecs(path: &std::path::Path, vectors: &[Vec<f32>]) {
    let mut f = std::fs::File::create(path).unwrap();
    for v in vectors {
        f.write_all(&(v.len() as i32).to_le_bytes()).unwrap();
        for x in v {
            f.write_all(&x.to_le_bytes()).unwrap();
        }
    }
}

#[test]
fn hnsw_standalone_recall_floor() {
    let dim = 32;
    let n = 2_000;
    let k = 10;
    let config = HnswConfig {
        m: 16,
        ef_construction: 200,
    };

    let vectors = generate_vectors(n, dim);
    let graph = Hnsw::new(FloatL2Space, &config);
    for v in &vectors {
        graph.add_point(v.clone());
    }

    let queries = generate_vectors(30, dim)
        .into_iter()
        .map(|mut q| {
            for x in &mut q {
                *x += 0.5;
            }
            q
        })
        .collect::<Vec<_>>();

    let mut total_recall = 0.0;
    for query in &queries {
        let truth = brute_force_top_k(&vectors, query, k);
        let retrieved: Vec<u32> = graph
            .search_knn(query, k, 128)
            .into_iter()
            .map(|r| r.id)
            .collect();
        total_recall += recall_at_k(&retrieved, &truth);
    }
    let mean_recall = total_recall / queries.len() as f64;

    assert!(
        mean_recall >= 0.9,
        "HNSW standalone recall@{k} fell to {mean_recall:.3}, expected >= 0.9"
    );
}

#[test]
fn ivf_adc_recall_floor() {
    let dim = 16;
    let nc = 32;
    let nprobe = 8;
    let n_train = 2_000;
    let k = 10;

    let dir = tempfile::tempdir().unwrap();
    let path_clusters = dir.path().join("centroids.fvecs");
    let path_info = dir.path().join("quantizer.info");
    let path_edges = dir.path().join("quantizer.edges");

    let centroids = generate_vectors(nc, dim);
    write_fvecs(&path_clusters, &centroids);

    let config = IvfHnswConfig {
        hnsw: HnswConfig {
            m: 16,
            ef_construction: 128,
        },
        ivf: ivf_hnsw_core::config::IvfConfig {
            nc,
            nprobe,
            max_codes: usize::MAX,
            pq_m: 8,
            pq_nbits: 8,
        },
        ..IvfHnswConfig::default()
    };

    let mut index = IvfAdcIndex::new(&config, dim).unwrap();
    index
        .build_coarse_quantizer(&path_clusters, &path_info, &path_edges, &config.hnsw)
        .unwrap();

    let training = generate_vectors(n_train, dim);
    let flat: Vec<f32> = training.iter().flatten().copied().collect();
    index.train_pq(&flat, n_train).unwrap();

    let assignments: Vec<u32> = index
        .assign(&flat, n_train, 1)
        .unwrap()
        .into_iter()
        .map(|v| v[0])
        .collect();
    let ids: Vec<u32> = (0..n_train as u32).collect();
    index.add_batch(&flat, n_train, &ids, &assignments).unwrap();

    let queries = generate_vectors(30, dim)
        .into_iter()
        .map(|mut q| {
            for x in &mut q {
                *x += 0.3;
            }
            q
        })
        .collect::<Vec<_>>();

    let mut total_recall = 0.0;
    for query in &queries {
        let truth = brute_force_top_k(&training, query, k);
        let retrieved: Vec<u32> = index
            .search(query, k)
            .unwrap()
            .into_iter()
            .filter(|r| r.label >= 0)
            .map(|r| r.label as u32)
            .collect();
        total_recall += recall_at_k(&retrieved, &truth);
    }
    let mean_recall = total_recall / queries.len() as f64;

    assert!(
        mean_recall >= 0.6,
        "IVF-ADC recall@{k} fell to {mean_recall:.3}, expected >= 0.6 (nprobe={nprobe}/{nc})"
    );
}
