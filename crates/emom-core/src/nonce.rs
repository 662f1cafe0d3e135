//! Domain-separated nonce construction.
//!
//! ```text
//! [12 bytes: format tag "emom-nonce-1"] [4 bytes BE: direction] [8 bytes BE: seqno]
//! ```
//!
//! Within one session every (direction, seqno) pair is used at most once, so
//! no nonce repeats under a session key. CALL and REPLY for the same seqno
//! differ in the direction word.

use crate::types::Seqno;

/// Nonce size for XChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 24;

/// Fixed format tag occupying the first 12 bytes of every nonce.
pub const NONCE_TAG: [u8; 12] = *b"emom-nonce-1";

/// Message direction discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Direction {
    /// Client to server.
    Call = 1,
    /// Server to client.
    Reply = 2,
}

/// A 24-byte AEAD nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// Build the nonce for one message.
pub fn make_nonce(direction: Direction, seqno: Seqno) -> Nonce {
    let mut out = [0u8; NONCE_SIZE];
    out[..12].copy_from_slice(&NONCE_TAG);
    out[12..16].copy_from_slice(&(direction as u32).to_be_bytes());
    out[16..24].copy_from_slice(&seqno.to_be_bytes());
    Nonce(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_layout() {
        let nonce = make_nonce(Direction::Reply, 0x0102_0304_0506_0708);
        let bytes = nonce.as_bytes();

        assert_eq!(&bytes[..12], b"emom-nonce-1");
        assert_eq!(&bytes[12..16], &[0, 0, 0, 2]);
        assert_eq!(&bytes[16..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_directions_never_collide() {
        for seqno in [0, 1, 42, u64::MAX] {
            assert_ne!(
                make_nonce(Direction::Call, seqno),
                make_nonce(Direction::Reply, seqno)
            );
        }
    }

    #[test]
    fn test_unique_per_pair() {
        let mut seen = HashSet::new();
        for seqno in 0..500 {
            assert!(seen.insert(make_nonce(Direction::Call, seqno)));
            assert!(seen.insert(make_nonce(Direction::Reply, seqno)));
        }
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(
            make_nonce(Direction::Call, 17),
            make_nonce(Direction::Call, 17)
        );
    }
}
