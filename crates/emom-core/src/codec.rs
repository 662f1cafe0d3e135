//! Canonical encoding for every emom struct.
//!
//! bincode with fixed-width integers: the same value always encodes to the
//! same bytes, which is what lets a signature over an encoded `AuthToken`
//! verify on the other side.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{EmomError, Result};

/// Upper bound on any decoded message (16 MiB).
pub const MAX_MESSAGE_SIZE: u64 = 16 * 1024 * 1024;

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_MESSAGE_SIZE)
}

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    options().serialize(value).map_err(EmomError::encode)
}

/// Decode a value. Trailing bytes are rejected.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    options().deserialize(bytes).map_err(EmomError::decode)
}
