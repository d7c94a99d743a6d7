//! Float32 squared L2 distance space.

use super::DistanceSpace;

/// `fstdistfunc(q, v) = Σᵢ (qᵢ − vᵢ)²` over float32 vectors.
///
/// This is the distance space used by the IVF-ADC index's coarse
/// quantizer: centroids are stored as raw float32 vectors inside HNSW,
/// so the inner search loop never touches a PQ table.
#[derive(Debug, Clone, Copy, Default)]
pub struct FloatL2Space;

impl DistanceSpace for FloatL2Space {
    type Elem = Vec<f32>;

    #[inline]
    fn distance(&self, a: &Vec<f32>, b: &Vec<f32>) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        squared_l2(a, b)
    }

    fn encoded_len(&self, elem: &Vec<f32>) -> usize {
        elem.len() * 4
    }

    fn encode_element(&self, elem: &Vec<f32>, out: &mut Vec<u8>) {
        for &x in elem {
            out.extend_from_slice(&x.to_le_bytes());
        }
    }

    fn decode_element(&self, bytes: &[u8]) -> Vec<f32> {
        debug_assert_eq!(bytes.len() % 4, 0);
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().expect("chunk is exactly 4 bytes")))
            .collect()
    }
}

/// Squared L2 distance over two equal-length float32 slices.
///
/// Unrolled by 4 to match the access pattern the rest of the crate uses
/// for PQ code scans, giving the compiler the same auto-vectorization
/// opportunity.
#[inline]
#[must_use]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let chunks = a.len() / 4;
    let mut sum0 = 0.0f32;
    let mut sum1 = 0.0f32;
    let mut sum2 = 0.0f32;
    let mut sum3 = 0.0f32;

    for i in 0..chunks {
        let base = i * 4;
        let d0 = a[base] - b[base];
        let d1 = a[base + 1] - b[base + 1];
        let d2 = a[base + 2] - b[base + 2];
        let d3 = a[base + 3] - b[base + 3];
        sum0 += d0 * d0;
        sum1 += d1 * d1;
        sum2 += d2 * d2;
        sum3 += d3 * d3;
    }

    let mut total = sum0 + sum1 + sum2 + sum3;
    for i in (chunks * 4)..a.len() {
        let d = a[i] - b[i];
        total += d * d;
    }
    total
}

/// Squared L2 norm of a single vector (`||v||²`).
#[inline]
#[must_use]
pub fn squared_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum()
}
