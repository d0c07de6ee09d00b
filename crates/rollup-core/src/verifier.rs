//! Proof verification interface.
//!
//! The validity circuit is out of scope: the engine only asks an opaque
//! verifier whether a proof attests to a block commitment. One instance checks
//! block proofs, another checks evacuation claims.

use serde::{Deserialize, Serialize};

use crate::canonical::Hash32;

/// Opaque proof verifier.
///
/// Implementations must be deterministic: the same commitment and proof
/// always produce the same answer.
pub trait ProofVerifier: Send + Sync {
    /// Short identifier used in logs and the status endpoint.
    fn name(&self) -> &'static str;

    fn verify(&self, commitment: &Hash32, proof: &[u8]) -> bool;
}

/// Verifier with a fixed answer. Used in tests and local development.
#[derive(Debug, Clone, Copy)]
pub struct StaticVerifier {
    accept: bool,
}

impl StaticVerifier {
    pub fn accept_all() -> Self {
        Self { accept: true }
    }

    pub fn reject_all() -> Self {
        Self { accept: false }
    }
}

impl ProofVerifier for StaticVerifier {
    fn name(&self) -> &'static str {
        if self.accept {
            "accept_all"
        } else {
            "reject_all"
        }
    }

    fn verify(&self, _commitment: &Hash32, _proof: &[u8]) -> bool {
        self.accept
    }
}

/// Accepts a proof equal to the raw commitment bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitmentEchoVerifier;

impl ProofVerifier for CommitmentEchoVerifier {
    fn name(&self) -> &'static str {
        "commitment_echo"
    }

    fn verify(&self, commitment: &Hash32, proof: &[u8]) -> bool {
        proof == commitment.0.as_slice()
    }
}

/// Accepts `BLAKE3-keyed(key, commitment)`, a stand-in for an attesting prover
/// that holds a shared key.
#[derive(Clone)]
pub struct KeyedHashVerifier {
    key: [u8; 32],
}

impl KeyedHashVerifier {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Produce the proof this verifier accepts for `commitment`.
    pub fn prove(&self, commitment: &Hash32) -> Vec<u8> {
        blake3::keyed_hash(&self.key, &commitment.0).as_bytes().to_vec()
    }
}

impl std::fmt::Debug for KeyedHashVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedHashVerifier").finish_non_exhaustive()
    }
}

impl ProofVerifier for KeyedHashVerifier {
    fn name(&self) -> &'static str {
        "keyed_hash"
    }

    fn verify(&self, commitment: &Hash32, proof: &[u8]) -> bool {
        let expected = blake3::keyed_hash(&self.key, &commitment.0);
        // blake3::Hash equality is constant-time.
        match <[u8; 32]>::try_from(proof) {
            Ok(bytes) => expected == blake3::Hash::from(bytes),
            Err(_) => false,
        }
    }
}

/// Verifier selection as it appears in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifierKind {
    AcceptAll,
    RejectAll,
    #[default]
    CommitmentEcho,
    KeyedHash,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_verifier_answers() {
        let c = Hash32([1; 32]);
        assert!(StaticVerifier::accept_all().verify(&c, b""));
        assert!(!StaticVerifier::reject_all().verify(&c, &c.0));
    }

    #[test]
    fn echo_verifier_requires_commitment_bytes() {
        let c = Hash32([7; 32]);
        assert!(CommitmentEchoVerifier.verify(&c, &c.0));
        assert!(!CommitmentEchoVerifier.verify(&c, &[7; 31]));
        assert!(!CommitmentEchoVerifier.verify(&Hash32([8; 32]), &c.0));
    }

    #[test]
    fn keyed_verifier_accepts_own_proofs_only() {
        let verifier = KeyedHashVerifier::new([9; 32]);
        let other = KeyedHashVerifier::new([10; 32]);
        let c = Hash32([3; 32]);

        let proof = verifier.prove(&c);
        assert!(verifier.verify(&c, &proof));
        assert!(!other.verify(&c, &proof));
        assert!(!verifier.verify(&Hash32([4; 32]), &proof));
        assert!(!verifier.verify(&c, &proof[..16]));
    }
}
