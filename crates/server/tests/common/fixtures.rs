//! Test fixtures for generating test data.

use bytes::Bytes;
use dropit_core::{FileId, FileRecord, PasswordHasher, storage_key};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use time::{Duration, OffsetDateTime};

/// Generate deterministic test data based on a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Split data into a body stream of `chunk_size` pieces.
#[allow(dead_code)]
pub fn body_stream(
    data: &[u8],
    chunk_size: usize,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let chunks: Vec<Result<Bytes, Infallible>> = data
        .chunks(chunk_size.max(1))
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    stream::iter(chunks)
}

/// Hasher with the cheapest work factor.
#[allow(dead_code)]
pub fn fast_hasher() -> PasswordHasher {
    PasswordHasher::new(PasswordHasher::MIN_COST).expect("valid cost")
}

/// A current-format record with no password, one day of life and no limit.
#[allow(dead_code)]
pub fn sample_record(filename: &str) -> FileRecord {
    let id = FileId::new();
    let now = OffsetDateTime::now_utc();
    FileRecord {
        id,
        original_filename: filename.to_string(),
        display_filename: None,
        storage_key: storage_key(id, filename),
        size_bytes: 0,
        content_type: "application/octet-stream".to_string(),
        description: None,
        password_hash: None,
        expires_at: Some(now + Duration::days(1)),
        download_limit: 0,
        download_count: 0,
        marked_for_deletion: false,
        marked_at: None,
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_bytes_deterministic() {
        let a = seeded_bytes(42, 100);
        let b = seeded_bytes(42, 100);
        assert_eq!(a, b);

        let c = seeded_bytes(43, 100);
        assert_ne!(a, c);
    }
}
