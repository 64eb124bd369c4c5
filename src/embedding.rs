use crate::error::{Error, Result};

/// Default dimension of [`HashingEmbedder`] vectors.
pub const DEFAULT_HASHING_DIMENSION: usize = 384;

/// A text embedding provider.
///
/// Implementations must be deterministic for a given model: embedding a
/// batch yields exactly the vectors that embedding each text on its own
/// would, and every vector has the same dimension.
pub trait Embedder {
    /// Identifier of the underlying model, for logs and status output.
    fn name(&self) -> &str;

    /// Embed a batch of texts, one vector per text in input order.
    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    fn embed(&mut self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| {
                Error::Embedding("provider returned no vector".to_string())
            })
    }
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_batch(texts)
    }
}

/// Offline embedder based on signed feature hashing of word tokens.
///
/// Lower-cased alphanumeric tokens are hashed (FNV-1a) into a fixed number
/// of buckets; the count vector is L2-normalised. Identical texts produce
/// identical vectors and texts sharing vocabulary land close together,
/// which is enough for lexical screening without a neural model.
///
/// # Examples
///
/// ```
/// use cvscreen::embedding::{Embedder, HashingEmbedder};
///
/// let mut embedder = HashingEmbedder::new(64);
/// let a = embedder.embed("Senior Rust engineer").unwrap();
/// let b = embedder.embed("senior rust ENGINEER").unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 64);
/// ```
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSION)
    }
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = fnv1a(&token.to_lowercase());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn fnv1a(token: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    token.bytes().fold(OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(PRIME)
    })
}

/// Scale a vector to unit length. Zero vectors are left unchanged.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distance(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
    }

    #[test]
    fn vectors_are_unit_length() {
        let mut e = HashingEmbedder::default();
        let v = e.embed("rust tokio axum postgres").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let mut e = HashingEmbedder::new(8);
        assert_eq!(e.embed("  ,, ").unwrap(), vec![0.0; 8]);
    }

    #[test]
    fn batch_equals_single() {
        let mut e = HashingEmbedder::default();
        let texts = vec!["rust developer".to_string(), "chef".to_string()];
        let batch = e.embed_batch(&texts).unwrap();
        assert_eq!(batch[0], e.embed("rust developer").unwrap());
        assert_eq!(batch[1], e.embed("chef").unwrap());
    }

    #[test]
    fn shared_vocabulary_is_closer() {
        let mut e = HashingEmbedder::default();
        let job = e.embed("rust systems programming engineer").unwrap();
        let close = e.embed("experienced rust systems engineer").unwrap();
        let far = e.embed("pastry chef with bakery experience").unwrap();
        assert!(distance(&job, &close) < distance(&job, &far));
    }

    #[test]
    fn boxed_embedder_delegates() {
        let mut boxed: Box<dyn Embedder> = Box::new(HashingEmbedder::new(16));
        assert_eq!(boxed.name(), "hashing");
        assert_eq!(boxed.embed("rust").unwrap().len(), 16);
    }

    #[test]
    fn fnv1a_reference_values() {
        assert_eq!(fnv1a(""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a("a"), 0xaf63_dc4c_8601_ec8c);
    }
}
