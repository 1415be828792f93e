//! uint8 embedding quantization and cosine scoring.

use ndarray::{Array1, ArrayView1};

/// Quantize a float32 embedding to uint8 bytes with scale and offset.
///
/// Maps [min, max] → [0, 255] linearly, so `original ≈ bytes * scale + offset`.
pub fn quantize_uint8(embedding: &[f32]) -> (Vec<u8>, f32, f32) {
    let min_val = embedding.iter().copied().fold(f32::INFINITY, f32::min);
    let max_val = embedding.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    let range = max_val - min_val;
    if !range.is_finite() || range < 1e-9 {
        let offset = if min_val.is_finite() { min_val } else { 0.0 };
        return (vec![0u8; embedding.len()], 0.0, offset);
    }

    let scale = range / 255.0;
    let bytes = embedding
        .iter()
        .map(|&v| ((v - min_val) / scale).round().clamp(0.0, 255.0) as u8)
        .collect();

    (bytes, scale, min_val)
}

pub fn dequantize_uint8(bytes: &[u8], scale: f32, offset: f32) -> Array1<f32> {
    Array1::from_iter(bytes.iter().map(|&b| b as f32 * scale + offset))
}

/// L2-normalize; `None` for a zero vector.
pub fn normalized(v: ArrayView1<'_, f32>) -> Option<Array1<f32>> {
    let norm = v.dot(&v).sqrt();
    if norm > 1e-9 {
        Some(&v / norm)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_is_close() {
        let original = [0.1, 0.5, -0.3, 0.8, -0.1];
        let (bytes, scale, offset) = quantize_uint8(&original);
        let restored = dequantize_uint8(&bytes, scale, offset);

        for (a, b) in original.iter().zip(restored.iter()) {
            assert!((a - b).abs() < 0.01, "Values differ: {} vs {}", a, b);
        }
    }

    #[test]
    fn test_constant_vector() {
        let (bytes, scale, offset) = quantize_uint8(&[0.5, 0.5, 0.5]);
        assert_eq!(scale, 0.0);
        assert_eq!(offset, 0.5);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zero_vector_has_no_direction() {
        let zeros = Array1::<f32>::zeros(4);
        assert!(normalized(zeros.view()).is_none());
        let unit = normalized(Array1::from(vec![3.0f32, 4.0]).view()).unwrap();
        assert!((unit[0] - 0.6).abs() < 1e-6);
    }
}
