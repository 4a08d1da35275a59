use serde::Serialize;
use sha2::{Sha256, Digest};
use shared::types::{Dock, DockLocation, DockStatus};

#[derive(Serialize)]
struct HashView<'a> {
    id: i64,
    location: DockLocation,
    number: u32,
    name: Option<&'a str>,
    status: DockStatus,
}

/// Computes a SHA-256 digest of the dock set.
/// Docks are sorted by id so the digest does not depend on input order.
pub fn compute_hash(docks: &[Dock]) -> String {
    let mut indices: Vec<usize> = (0..docks.len()).collect();
    indices.sort_by_key(|&i| docks[i].id);

    let views: Vec<HashView<'_>> = indices
        .iter()
        .map(|&i| {
            let d = &docks[i];
            HashView {
                id: d.id,
                location: d.location,
                number: d.number,
                name: d.name.as_deref(),
                status: d.status,
            }
        })
        .collect();

    let json = serde_json::to_string(&views)
        .expect("Failed to serialize docks for hashing");

    let hash = Sha256::digest(json.as_bytes());
    hex::encode(hash)
}
