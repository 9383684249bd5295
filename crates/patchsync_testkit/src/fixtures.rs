//! Test fixtures.
//!
//! Provides a host-shaped sample document and a [`ReferenceServer`] with
//! the handlers tests commonly need.

use crate::server::{HandlerOutcome, ReferenceServer, INVALID_PARAMS};
use patchsync_client::{ClientConfig, RetryConfig};
use patchsync_protocol::{Dump, JsonPath, Operation, RpcErrorBody, Sequence};
use serde_json::{json, Value};
use std::time::Duration;

/// Sequence of [`sample_dump`].
pub const SAMPLE_SEQUENCE: Sequence = 5;

/// A host-shaped document: server info plus two installed packages.
pub fn sample_tree() -> Value {
    json!({
        "server-info": {
            "id": "embassy-test",
            "name": "test node",
            "version": "0.3.4",
            "status": "running",
            "unread-notification-count": 0
        },
        "package-data": {
            "bitcoind": {
                "title": "Bitcoin Core",
                "version": "24.0.1",
                "status": "stopped",
                "config": {"rpc-port": 8332, "pruning": false},
                "interfaces": ["rpc", "p2p"]
            },
            "lnd": {
                "title": "LND",
                "version": "0.16.0",
                "status": "running",
                "config": {"alias": "node"},
                "interfaces": ["grpc"]
            }
        },
        "ui": {
            "name": null,
            "ack-welcome": "0.3.0"
        }
    })
}

/// [`sample_tree`] at [`SAMPLE_SEQUENCE`].
pub fn sample_dump() -> Dump {
    Dump::new(sample_tree(), SAMPLE_SEQUENCE)
}

/// Path to a package's status.
pub fn package_status(id: &str) -> JsonPath {
    JsonPath::new(["package-data", id, "status"])
}

/// Path to the server name.
pub fn server_name() -> JsonPath {
    JsonPath::new(["server-info", "name"])
}

/// Client configuration for tests: fast polling, quick retries, no jitter.
pub fn test_config() -> ClientConfig {
    ClientConfig::new()
        .with_poll_interval(Duration::from_millis(10))
        .with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        )
}

fn param_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, RpcErrorBody> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcErrorBody::new(INVALID_PARAMS, format!("missing param: {key}")))
}

fn set_status(status: &'static str) -> impl Fn(&Value, &Value) -> Result<HandlerOutcome, RpcErrorBody> {
    move |tree: &Value, params: &Value| {
        let id = param_str(params, "id")?;
        if tree.pointer(&format!("/package-data/{id}")).is_none() {
            return Err(RpcErrorBody::new(INVALID_PARAMS, format!("unknown package: {id}")));
        }
        Ok(HandlerOutcome::patch(
            Value::Null,
            vec![Operation::replace(package_status(id), status)],
        ))
    }
}

/// A server loaded with [`sample_dump`] and these methods:
///
/// - `package.start` / `package.stop` `{id}`: set the package status
/// - `package.install` `{id, title}`: add a package entry
/// - `package.uninstall` `{id}`: remove a package entry
/// - `server.set-name` `{name}`: replace the server name
/// - `server.echo`: return the params, change nothing
pub fn sample_server() -> ReferenceServer {
    let server = ReferenceServer::with_sequence(sample_tree(), SAMPLE_SEQUENCE);

    server.register("package.start", set_status("running"));
    server.register("package.stop", set_status("stopped"));
    server.register("package.install", |_, params| {
        let id = param_str(params, "id")?;
        let title = param_str(params, "title")?;
        Ok(HandlerOutcome::patch(
            json!(id),
            vec![Operation::add(
                JsonPath::new(["package-data", id]),
                json!({"title": title, "status": "installing", "config": {}}),
            )],
        ))
    });
    server.register("package.uninstall", |_, params| {
        let id = param_str(params, "id")?;
        Ok(HandlerOutcome::patch(
            Value::Null,
            vec![Operation::remove(JsonPath::new(["package-data", id]))],
        ))
    });
    server.register("server.set-name", |_, params| {
        let name = param_str(params, "name")?;
        Ok(HandlerOutcome::patch(
            json!(name),
            vec![Operation::replace(server_name(), name)],
        ))
    });
    server.register("server.echo", |_, params| {
        Ok(HandlerOutcome::result(params.clone()))
    });

    server
}
