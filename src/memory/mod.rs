pub mod cache;
pub mod lexical;
pub mod prune;
pub mod registry;
pub mod search;
pub mod stats;
pub mod store;
pub mod types;
pub mod vector;

use chrono::{DateTime, SecondsFormat, Utc};

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}

/// Decode a little-endian f32 blob as stored by sqlite-vec.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity from the L2 distance between two unit vectors.
pub fn l2_to_cosine(distance: f64) -> f64 {
    1.0 - (distance * distance) / 2.0
}

/// Timestamps are stored fixed-width so lexical order matches time order.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_bytes_round_trip() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(bytes_to_embedding(embedding_to_bytes(&v)), v);
    }

    #[test]
    fn l2_to_cosine_matches_known_points() {
        assert!((l2_to_cosine(0.0) - 1.0).abs() < 1e-12);
        assert!((l2_to_cosine(2f64.sqrt()) - 0.0).abs() < 1e-12);
        assert!((l2_to_cosine(2.0) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn timestamps_sort_lexically() {
        let a = Utc::now();
        let b = a + chrono::Duration::milliseconds(5);
        assert!(format_timestamp(a) < format_timestamp(b));
        assert_eq!(parse_timestamp(&format_timestamp(a)).timestamp_micros(), a.timestamp_micros());
    }
}
