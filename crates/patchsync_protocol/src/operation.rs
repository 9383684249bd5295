//! Patch operations and the tree primitives that apply them.

use crate::error::PathError;
use crate::path::{pointer_of, JsonPath, PathSegment};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a patch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Overwrite an existing value.
    Replace,
    /// Create (or overwrite) a key, or insert into an array.
    Add,
    /// Delete an existing value.
    Remove,
}

impl OpKind {
    /// Returns the JSON-Patch name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Replace => "replace",
            OpKind::Add => "add",
            OpKind::Remove => "remove",
        }
    }

    /// Parses a JSON-Patch name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "replace" => Some(OpKind::Replace),
            "add" => Some(OpKind::Add),
            "remove" => Some(OpKind::Remove),
            _ => None,
        }
    }
}

/// A single patch operation.
///
/// Encoded as a JSON-Patch object: `{"op":"replace","path":"/a","value":1}`.
///
/// # Path rules
///
/// - `Replace` and `Remove` need an existing parent container and an
///   existing target.
/// - `Add` needs an existing parent container; it may create a new key or
///   insert at an array index in `0..=len` (`-` appends).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
    /// Overwrite the value at `path`.
    Replace {
        /// Target location.
        path: JsonPath,
        /// New value.
        value: Value,
    },
    /// Insert `value` at `path`.
    Add {
        /// Target location.
        path: JsonPath,
        /// Inserted value.
        value: Value,
    },
    /// Delete the value at `path`.
    Remove {
        /// Target location.
        path: JsonPath,
    },
}

impl Operation {
    /// Creates a replace operation.
    pub fn replace(path: JsonPath, value: impl Into<Value>) -> Self {
        Operation::Replace {
            path,
            value: value.into(),
        }
    }

    /// Creates an add operation.
    pub fn add(path: JsonPath, value: impl Into<Value>) -> Self {
        Operation::Add {
            path,
            value: value.into(),
        }
    }

    /// Creates a remove operation.
    pub fn remove(path: JsonPath) -> Self {
        Operation::Remove { path }
    }

    /// Returns the operation kind.
    pub fn kind(&self) -> OpKind {
        match self {
            Operation::Replace { .. } => OpKind::Replace,
            Operation::Add { .. } => OpKind::Add,
            Operation::Remove { .. } => OpKind::Remove,
        }
    }

    /// Returns the target path.
    pub fn path(&self) -> &JsonPath {
        match self {
            Operation::Replace { path, .. }
            | Operation::Add { path, .. }
            | Operation::Remove { path } => path,
        }
    }

    /// Returns the carried value, if any.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Operation::Replace { value, .. } | Operation::Add { value, .. } => Some(value),
            Operation::Remove { .. } => None,
        }
    }
}

/// Returns the value at `path`, or `None` if it does not resolve.
pub fn get<'a>(doc: &'a Value, path: &JsonPath) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.segments() {
        current = match current {
            Value::Object(map) => map.get(&segment.to_key())?,
            Value::Array(items) => match segment {
                PathSegment::Index(index) => items.get(*index)?,
                PathSegment::Key(_) => return None,
            },
            _ => return None,
        };
    }
    Some(current)
}

/// Walks to the container addressed by `segments`.
fn container_mut<'a>(doc: &'a mut Value, segments: &[PathSegment]) -> Result<&'a mut Value, PathError> {
    let mut current = doc;
    for (depth, segment) in segments.iter().enumerate() {
        let here = &segments[..=depth];
        current = match current {
            Value::Object(map) => map
                .get_mut(&segment.to_key())
                .ok_or_else(|| PathError::NotFound {
                    path: pointer_of(here),
                })?,
            Value::Array(items) => match segment {
                PathSegment::Index(index) => {
                    items.get_mut(*index).ok_or_else(|| PathError::NotFound {
                        path: pointer_of(here),
                    })?
                }
                PathSegment::Key(key) => {
                    return Err(PathError::InvalidIndex {
                        path: pointer_of(&segments[..depth]),
                        index: key.clone(),
                    })
                }
            },
            _ => {
                return Err(PathError::NotAContainer {
                    path: pointer_of(&segments[..depth]),
                })
            }
        };
    }
    Ok(current)
}

/// Applies one operation in place.
///
/// Returns the value that was overwritten or removed, if any. On error the
/// document is untouched.
pub fn apply_operation(doc: &mut Value, op: &Operation) -> Result<Option<Value>, PathError> {
    let path = op.path();
    let Some((parent_segments, last)) = path.split_last() else {
        return match op {
            Operation::Replace { value, .. } | Operation::Add { value, .. } => {
                Ok(Some(std::mem::replace(doc, value.clone())))
            }
            Operation::Remove { .. } => Err(PathError::RootRemoval),
        };
    };

    let parent = container_mut(doc, parent_segments)?;
    let not_found = || PathError::NotFound {
        path: path.to_string(),
    };

    match parent {
        Value::Object(map) => {
            let key = last.to_key();
            match op {
                Operation::Replace { value, .. } => {
                    let slot = map.get_mut(&key).ok_or_else(not_found)?;
                    Ok(Some(std::mem::replace(slot, value.clone())))
                }
                Operation::Add { value, .. } => Ok(map.insert(key, value.clone())),
                Operation::Remove { .. } => map.remove(&key).map(Some).ok_or_else(not_found),
            }
        }
        Value::Array(items) => {
            let invalid_index = || PathError::InvalidIndex {
                path: pointer_of(parent_segments),
                index: last.to_key(),
            };
            match (op, last) {
                (Operation::Add { value, .. }, segment) if segment.is_append() => {
                    items.push(value.clone());
                    Ok(None)
                }
                (Operation::Add { value, .. }, PathSegment::Index(index)) => {
                    if *index > items.len() {
                        return Err(invalid_index());
                    }
                    items.insert(*index, value.clone());
                    Ok(None)
                }
                (Operation::Replace { value, .. }, PathSegment::Index(index)) => {
                    let slot = items.get_mut(*index).ok_or_else(not_found)?;
                    Ok(Some(std::mem::replace(slot, value.clone())))
                }
                (Operation::Remove { .. }, PathSegment::Index(index)) => {
                    if *index >= items.len() {
                        return Err(not_found());
                    }
                    Ok(Some(items.remove(*index)))
                }
                (_, PathSegment::Key(_)) => Err(invalid_index()),
            }
        }
        _ => Err(PathError::NotAContainer {
            path: pointer_of(parent_segments),
        }),
    }
}

/// Applies operations in order, all or nothing.
///
/// On the first failure `doc` is left exactly as it was before the call.
pub fn apply_operations(doc: &mut Value, ops: &[Operation]) -> Result<(), PathError> {
    if ops.is_empty() {
        return Ok(());
    }
    let mut working = doc.clone();
    for op in ops {
        apply_operation(&mut working, op)?;
    }
    *doc = working;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(pointer: &str) -> JsonPath {
        JsonPath::parse(pointer).unwrap()
    }

    fn sample() -> Value {
        json!({
            "server-info": {"status": "running", "unread": 3},
            "package-data": {
                "bitcoind": {"status": "stopped", "tags": ["a", "b"]}
            }
        })
    }

    #[test]
    fn op_kind_names() {
        for kind in [OpKind::Replace, OpKind::Add, OpKind::Remove] {
            assert_eq!(OpKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(OpKind::from_name("move"), None);
    }

    #[test]
    fn get_values() {
        let doc = sample();
        assert_eq!(
            get(&doc, &path("/package-data/bitcoind/status")),
            Some(&json!("stopped"))
        );
        assert_eq!(
            get(&doc, &path("/package-data/bitcoind/tags/1")),
            Some(&json!("b"))
        );
        assert_eq!(get(&doc, &path("/package-data/lnd")), None);
        assert_eq!(get(&doc, &path("/server-info/status/deeper")), None);
        assert_eq!(get(&doc, &JsonPath::root()), Some(&doc));
    }

    #[test]
    fn replace_existing() {
        let mut doc = sample();
        let old = apply_operation(
            &mut doc,
            &Operation::replace(path("/package-data/bitcoind/status"), "running"),
        )
        .unwrap();
        assert_eq!(old, Some(json!("stopped")));
        assert_eq!(doc["package-data"]["bitcoind"]["status"], json!("running"));
    }

    #[test]
    fn replace_missing_target_fails() {
        let mut doc = sample();
        let err = apply_operation(
            &mut doc,
            &Operation::replace(path("/package-data/bitcoind/version"), "1.0"),
        )
        .unwrap_err();
        assert_eq!(
            err,
            PathError::NotFound {
                path: "/package-data/bitcoind/version".into()
            }
        );
        assert_eq!(doc, sample());
    }

    #[test]
    fn add_creates_key_but_needs_parent() {
        let mut doc = sample();
        apply_operation(
            &mut doc,
            &Operation::add(path("/package-data/lnd"), json!({"status": "installing"})),
        )
        .unwrap();
        assert_eq!(doc["package-data"]["lnd"]["status"], json!("installing"));

        let err = apply_operation(&mut doc, &Operation::add(path("/missing/child"), 1)).unwrap_err();
        assert_eq!(
            err,
            PathError::NotFound {
                path: "/missing".into()
            }
        );
    }

    #[test]
    fn array_insert_append_and_remove() {
        let mut doc = sample();
        let tags = "/package-data/bitcoind/tags";

        apply_operation(&mut doc, &Operation::add(path(&format!("{tags}/0")), "z")).unwrap();
        apply_operation(&mut doc, &Operation::add(path(&format!("{tags}/-")), "end")).unwrap();
        assert_eq!(
            doc["package-data"]["bitcoind"]["tags"],
            json!(["z", "a", "b", "end"])
        );

        let removed =
            apply_operation(&mut doc, &Operation::remove(path(&format!("{tags}/1")))).unwrap();
        assert_eq!(removed, Some(json!("a")));

        let err =
            apply_operation(&mut doc, &Operation::add(path(&format!("{tags}/9")), "x")).unwrap_err();
        assert!(matches!(err, PathError::InvalidIndex { .. }));

        let err = apply_operation(&mut doc, &Operation::remove(path(&format!("{tags}/name"))))
            .unwrap_err();
        assert!(matches!(err, PathError::InvalidIndex { .. }));
    }

    #[test]
    fn scalar_parent_is_not_a_container() {
        let mut doc = sample();
        let err = apply_operation(
            &mut doc,
            &Operation::add(path("/server-info/status/sub"), 1),
        )
        .unwrap_err();
        assert_eq!(
            err,
            PathError::NotAContainer {
                path: "/server-info/status".into()
            }
        );
    }

    #[test]
    fn root_operations() {
        let mut doc = sample();
        apply_operation(&mut doc, &Operation::replace(JsonPath::root(), json!({}))).unwrap();
        assert_eq!(doc, json!({}));
        assert_eq!(
            apply_operation(&mut doc, &Operation::remove(JsonPath::root())),
            Err(PathError::RootRemoval)
        );
    }

    #[test]
    fn numeric_key_on_object() {
        let mut doc = json!({"ports": {"8080": "http"}});
        let p = JsonPath::new(["ports", "8080"]);
        assert_eq!(get(&doc, &p), Some(&json!("http")));
        apply_operation(&mut doc, &Operation::replace(p, "proxy")).unwrap();
        assert_eq!(doc["ports"]["8080"], json!("proxy"));
    }

    #[test]
    fn apply_operations_is_atomic() {
        let mut doc = sample();
        let ops = vec![
            Operation::replace(path("/server-info/status"), "updating"),
            Operation::remove(path("/package-data/nope")),
        ];
        assert!(apply_operations(&mut doc, &ops).is_err());
        assert_eq!(doc, sample());
    }

    #[test]
    fn wire_format() {
        let op = Operation::replace(path("/server-info/status"), "running");
        let encoded = serde_json::to_value(&op).unwrap();
        assert_eq!(
            encoded,
            json!({"op": "replace", "path": "/server-info/status", "value": "running"})
        );

        let removed: Operation =
            serde_json::from_value(json!({"op": "remove", "path": "/a/0"})).unwrap();
        assert_eq!(removed.kind(), OpKind::Remove);
        assert_eq!(removed.value(), None);
        assert_eq!(removed.path().segments()[1], PathSegment::Index(0));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn pointer_round_trips(keys in prop::collection::vec("[a-z~/]{1,4}", 0..4)) {
                let path = JsonPath::new(keys);
                let reparsed = JsonPath::parse(&path.to_string()).unwrap();
                prop_assert_eq!(reparsed, path);
            }

            #[test]
            fn failed_batch_leaves_doc_untouched(values in prop::collection::vec(any::<i32>(), 1..4)) {
                let mut doc = json!({"a": {}});
                let mut ops: Vec<Operation> = values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| Operation::add(JsonPath::new(["a".to_string(), format!("k{i}")]), *v))
                    .collect();
                ops.push(Operation::remove(JsonPath::new(["missing"])));

                let before = doc.clone();
                prop_assert!(apply_operations(&mut doc, &ops).is_err());
                prop_assert_eq!(doc, before);
            }
        }
    }
}
