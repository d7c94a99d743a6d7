//! A small, dependency-free Lloyd's-algorithm k-means, used to train each
//! sub-quantizer's codebook.
//!
//! Initialization and iteration use the same xorshift64 PRNG idiom the
//! HNSW graph uses for level sampling, so training stays deterministic
//! given a seed without pulling in a random-number crate for production
//! code paths.

use crate::distance::float_l2::squared_l2;

/// Runs Lloyd's algorithm on `n` vectors of dimension `dsub` (stored
/// contiguously in `data`), producing `k` centroids.
///
/// Returns the flattened centroid buffer, `k * dsub` floats.
pub(super) fn train_kmeans(
    data: &[f32],
    n: usize,
    dsub: usize,
    k: usize,
    iterations: usize,
    seed: u64,
) -> Vec<f32> {
    debug_assert_eq!(data.len(), n * dsub);

    if n == 0 || k == 0 || dsub == 0 {
        return vec![0.0; k * dsub];
    }

    let mut rng = XorShift64::new(seed);
    let mut centroids = init_centroids(data, n, dsub, k, &mut rng);

    if n <= k {
        // Not enough training points to iterate meaningfully; the random
        // (possibly repeated) initial picks are the final codebook.
        return centroids;
    }

    let mut assignment = vec![0usize; n];

    for _ in 0..iterations {
        // Assignment step.
        let mut changed = false;
        for i in 0..n {
            let point = &data[i * dsub..(i + 1) * dsub];
            let mut best = 0usize;
            let mut best_dist = f32::MAX;
            for c in 0..k {
                let centroid = &centroids[c * dsub..(c + 1) * dsub];
                let dist = squared_l2(point, centroid);
                if dist < best_dist {
                    best_dist = dist;
                    best = c;
                }
            }
            if assignment[i] != best {
                changed = true;
            }
            assignment[i] = best;
        }

        // Update step.
        let mut sums = vec![0.0f32; k * dsub];
        let mut counts = vec![0u32; k];
        for i in 0..n {
            let c = assignment[i];
            counts[c] += 1;
            let point = &data[i * dsub..(i + 1) * dsub];
            let sum = &mut sums[c * dsub..(c + 1) * dsub];
            for (s, &v) in sum.iter_mut().zip(point) {
                *s += v;
            }
        }

        for c in 0..k {
            if counts[c] == 0 {
                // Empty cluster: reseed from a random training point so the
                // codebook never keeps a dead entry.
                let idx = (rng.next() as usize) % n;
                let src = &data[idx * dsub..(idx + 1) * dsub];
                centroids[c * dsub..(c + 1) * dsub].copy_from_slice(src);
                continue;
            }
            let inv = 1.0 / counts[c] as f32;
            for d in 0..dsub {
                centroids[c * dsub + d] = sums[c * dsub + d] * inv;
            }
        }

        if !changed {
            break;
        }
    }

    centroids
}

fn init_centroids(data: &[f32], n: usize, dsub: usize, k: usize, rng: &mut XorShift64) -> Vec<f32> {
    let mut centroids = vec![0.0f32; k * dsub];
    for c in 0..k {
        let idx = (rng.next() as usize) % n;
        let src = &data[idx * dsub..(idx + 1) * dsub];
        centroids[c * dsub..(c + 1) * dsub].copy_from_slice(src);
    }
    centroids
}

/// Minimal xorshift64 PRNG, matching the idiom used by the HNSW graph's
/// layer sampler: fast, seedable, no external dependency.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_on_two_well_separated_clusters() {
        // 8 points around (0,0) and 8 points around (10,10).
        let mut data = Vec::new();
        for i in 0..8 {
            data.push((i % 3) as f32 * 0.1);
            data.push((i % 2) as f32 * 0.1);
        }
        for i in 0..8 {
            data.push(10.0 + (i % 3) as f32 * 0.1);
            data.push(10.0 + (i % 2) as f32 * 0.1);
        }

        let centroids = train_kmeans(&data, 16, 2, 2, 25, 42);
        assert_eq!(centroids.len(), 4);

        // The two centroids should land near (0,0) and (10,10), in either order.
        let c0 = (centroids[0], centroids[1]);
        let c1 = (centroids[2], centroids[3]);
        let near_origin = |p: (f32, f32)| p.0 < 2.0 && p.1 < 2.0;
        let near_far = |p: (f32, f32)| p.0 > 8.0 && p.1 > 8.0;
        assert!(
            (near_origin(c0) && near_far(c1)) || (near_origin(c1) && near_far(c0)),
            "centroids did not separate: {c0:?} {c1:?}"
        );
    }

    #[test]
    fn handles_fewer_points_than_clusters() {
        let data = vec![1.0, 2.0, 3.0, 4.0];
        let centroids = train_kmeans(&data, 2, 2, 4, 10, 7);
        assert_eq!(centroids.len(), 8);
    }
}
