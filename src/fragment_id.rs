use sha2::{Digest, Sha256};

/// Separator hashed between the candidate id and the fragment text so that
/// `("ab", "c")` and `("a", "bc")` never collide.
const FIELD_SEPARATOR: &[u8] = b"||";

/// A content-derived fragment identifier.
///
/// The identifier is the SHA-256 of `(candidate_id, fragment_text)`, so the
/// same pair always maps to the same id. This is the idempotence key of the
/// fragment store: upserting an unchanged document twice rewrites the same
/// entries instead of adding new ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FragmentId {
    /// Full lowercase hex digest, used as the store key.
    pub hex: String,
}

impl FragmentId {
    /// Derive the identifier for a fragment of a candidate's document.
    ///
    /// # Examples
    ///
    /// ```
    /// use cvscreen::FragmentId;
    ///
    /// let a = FragmentId::new("alice", "Rust, SQL");
    /// let b = FragmentId::new("alice", "Rust, SQL");
    /// assert_eq!(a, b);
    /// assert_eq!(a.hex.len(), 64);
    /// ```
    pub fn new(candidate: &str, text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(candidate.as_bytes());
        hasher.update(FIELD_SEPARATOR);
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();

        Self {
            hex: digest.iter().map(|b| format!("{b:02x}")).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let a = FragmentId::new("alice", "Rust developer");
        let b = FragmentId::new("alice", "Rust developer");
        assert_eq!(a, b);
    }

    #[test]
    fn different_text_differs() {
        let a = FragmentId::new("alice", "Rust developer");
        let b = FragmentId::new("alice", "Go developer");
        assert_ne!(a, b);
    }

    #[test]
    fn same_text_different_candidate_differs() {
        let a = FragmentId::new("alice", "Rust developer");
        let b = FragmentId::new("bob", "Rust developer");
        assert_ne!(a, b);
    }

    #[test]
    fn separator_prevents_boundary_collisions() {
        assert_ne!(FragmentId::new("ab", "c"), FragmentId::new("a", "bc"));
    }

    #[test]
    fn known_digest() {
        let id = FragmentId::new("alice", "Rust developer");
        assert_eq!(
            id.hex,
            "66bfc9a745986b09d724579061ea88e86fe94eff98cc909b2ba7cb2974831652"
        );
        assert_eq!(id.hex.len(), 64);
    }
}
