//! Benchmark utilities.

use patchsync_protocol::{JsonPath, Operation};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Map, Value};

const STATUSES: &[&str] = &["running", "stopped", "starting", "stopping", "restarting"];

/// Package ids `pkg-0000` .. `pkg-{count - 1}`.
pub fn package_ids(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("pkg-{:04}", i)).collect()
}

/// A host-shaped tree with `packages` entries under `package-data`.
pub fn host_tree(packages: usize) -> Value {
    let data: Map<String, Value> = package_ids(packages)
        .into_iter()
        .map(|id| {
            let entry = json!({
                "title": id.to_uppercase(),
                "status": "stopped",
                "config": {"port": 8000, "enabled": true, "tags": ["a", "b", "c"]},
            });
            (id, entry)
        })
        .collect();

    json!({
        "server-info": {"name": "bench", "status": "running"},
        "package-data": data,
    })
}

/// Path to a package's status.
pub fn status_path(id: &str) -> JsonPath {
    JsonPath::new(["package-data", id, "status"])
}

/// `count` status replacements on random packages of [`host_tree`].
pub fn random_status_ops(packages: usize, count: usize) -> Vec<Operation> {
    let mut rng = rand::thread_rng();
    let ids = package_ids(packages);
    (0..count)
        .map(|_| {
            let id = &ids[rng.gen_range(0..ids.len())];
            let status = STATUSES.choose(&mut rng).copied().unwrap_or("running");
            Operation::replace(status_path(id), status)
        })
        .collect()
}
