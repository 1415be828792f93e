//! Offline embedder: signed feature hashing of word unigrams and bigrams.
//!
//! Texts sharing vocabulary land close in cosine space, which is enough for
//! tests and air-gapped demos. Output is L2-normalized and fully deterministic.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::embedder::Embedder;
use kbase_core::Result;

pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();

        for w in &words {
            self.add_feature(&mut v, w, 1.0);
        }
        for pair in words.windows(2) {
            self.add_feature(&mut v, &format!("{} {}", pair[0], pair[1]), 0.5);
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }

    fn add_feature(&self, v: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut idx = [0u8; 8];
        idx.copy_from_slice(&digest[..8]);
        let slot = (u64::from_le_bytes(idx) % self.dim as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        v[slot] += sign * weight;
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        "feature-hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_deterministic_and_normalized() {
        let e = HashingEmbedder::new(64);
        let a = e.embed_sync("Annual leave policy");
        let b = e.embed_sync("annual LEAVE policy!");
        assert_eq!(a, b);
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_words_score_higher() {
        let e = HashingEmbedder::new(256);
        let q = e.embed_sync("how many days of annual leave");
        let close = e.embed_sync("employees get 20 days of annual leave");
        let far = e.embed_sync("the VPN certificate expires in march");
        assert!(cosine(&q, &close) > cosine(&q, &far));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let e = HashingEmbedder::new(16);
        assert!(e.embed_sync("  ...  ").iter().all(|&x| x == 0.0));
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let e = HashingEmbedder::new(32);
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let out = e.embed_batch(&texts).await.unwrap();
        assert_eq!(out[0], e.embed_sync("alpha"));
        assert_eq!(out[1], e.embed_sync("beta"));
        assert_eq!(e.dimension(), 32);
    }
}
