use bytes::Bytes;
use dropit_storage::FilesystemBackend;
use tempfile::TempDir;

/// Container name used by storage tests.
#[allow(dead_code)]
pub const CONTAINER: &str = "test-drops";

/// Generate deterministic test data using a seeded pseudo-random generator.
/// Same seed produces same output.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    // Simple LCG
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Filesystem backend in a fresh temp dir. Keep the `TempDir` alive for the
/// duration of the test.
#[allow(dead_code)]
pub async fn filesystem_store() -> (TempDir, FilesystemBackend) {
    let dir = TempDir::new().unwrap();
    let backend = FilesystemBackend::new(dir.path().join("objects"))
        .await
        .unwrap();
    (dir, backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_bytes_deterministic() {
        assert_eq!(seeded_bytes(42, 1000), seeded_bytes(42, 1000));
        assert_ne!(seeded_bytes(42, 1000), seeded_bytes(43, 1000));
    }
}
