//! Hierarchical key-path storage.
//!
//! Every database in this crate is layered on [`Store`]: a rooted JSON
//! document addressed by an ordered path of string segments. Concrete
//! drivers (browser local-storage, indexed-db, extension storage areas)
//! live with the embedding platform; the in-memory driver below is the
//! reference implementation and the one used in tests.

use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// An ordered path into the stored document, e.g.
/// `["baseline", "boolean", "ui.first_open"]`.
pub type StorageIndex = Vec<String>;

/// Errors signalled by a [`Store`].
///
/// Callers are expected to log these and carry on; storage trouble must
/// never propagate out of a recording path.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A path prefix collided with a stored value that is not an object.
    #[error("cannot index into non-object value at segment `{segment}` of `{path}`")]
    InvalidPath {
        /// The full path of the failed access.
        path: String,
        /// The segment at which traversal stopped.
        segment: String,
    },

    /// The transform for the document root produced a non-object value.
    #[error("the root of a store must be an object")]
    RootNotAnObject,
}

/// Hierarchical key-path CRUD over a rooted JSON document.
pub trait Store: Send {
    /// The root key this store is bound to, for diagnostics.
    fn name(&self) -> &str;

    /// Returns the value at `index`, or `None` if the path does not exist
    /// or an intermediate value cannot be traversed.
    fn get(&self, index: &[&str]) -> Option<JsonValue>;

    /// Computes a new value for `index` from the current one and persists
    /// it, creating intermediate objects as needed.
    ///
    /// Fails if a prefix of `index` collides with a non-object value;
    /// nothing is written in that case.
    fn update(
        &mut self,
        index: &[&str],
        transform: &mut dyn FnMut(Option<&JsonValue>) -> JsonValue,
    ) -> Result<(), StorageError>;

    /// Removes the value at `index`. Deleting the empty path erases the
    /// whole document. Deleting a missing path is not an error.
    fn delete(&mut self, index: &[&str]) -> Result<(), StorageError>;
}

fn path_display(index: &[&str]) -> String {
    index.join(".")
}

/// The in-memory reference driver. One instance per root key.
pub struct MemoryStore {
    name: String,
    root: Map<String, JsonValue>,
}

impl MemoryStore {
    /// Creates an empty store for the given root key.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: Map::new(),
        }
    }
}

impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, index: &[&str]) -> Option<JsonValue> {
        if self.root.is_empty() {
            return None;
        }
        let (first, rest) = match index.split_first() {
            Some(split) => split,
            None => return Some(JsonValue::Object(self.root.clone())),
        };
        let mut current = self.root.get(*first)?;
        for segment in rest {
            match current {
                JsonValue::Object(map) => current = map.get(*segment)?,
                _ => return None,
            }
        }
        Some(current.clone())
    }

    fn update(
        &mut self,
        index: &[&str],
        transform: &mut dyn FnMut(Option<&JsonValue>) -> JsonValue,
    ) -> Result<(), StorageError> {
        if index.is_empty() {
            return match transform(Some(&JsonValue::Object(self.root.clone()))) {
                JsonValue::Object(map) => {
                    self.root = map;
                    Ok(())
                }
                _ => Err(StorageError::RootNotAnObject),
            };
        }

        let (leaf, intermediate) = index.split_last().unwrap();
        let mut current = &mut self.root;
        for segment in intermediate {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| JsonValue::Object(Map::new()));
            match entry {
                JsonValue::Object(map) => current = map,
                _ => {
                    return Err(StorageError::InvalidPath {
                        path: path_display(index),
                        segment: segment.to_string(),
                    })
                }
            }
        }
        let new_value = transform(current.get(*leaf));
        current.insert(leaf.to_string(), new_value);
        Ok(())
    }

    fn delete(&mut self, index: &[&str]) -> Result<(), StorageError> {
        if index.is_empty() {
            self.root = Map::new();
            return Ok(());
        }

        let (leaf, intermediate) = index.split_last().unwrap();
        let mut current = &mut self.root;
        for segment in intermediate {
            match current.get_mut(*segment) {
                Some(JsonValue::Object(map)) => current = map,
                Some(_) => {
                    return Err(StorageError::InvalidPath {
                        path: path_display(index),
                        segment: segment.to_string(),
                    })
                }
                None => {
                    log::debug!(
                        "Attempted to delete missing entry {} from store {}",
                        path_display(index),
                        self.name
                    );
                    return Ok(());
                }
            }
        }
        if current.remove(*leaf).is_none() {
            log::debug!(
                "Attempted to delete missing entry {} from store {}",
                path_display(index),
                self.name
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::new("test")
    }

    #[test]
    fn get_on_an_empty_store_is_none() {
        let store = store();
        assert_eq!(None, store.get(&[]));
        assert_eq!(None, store.get(&["a", "b"]));
    }

    #[test]
    fn update_creates_intermediate_objects() {
        let mut store = store();
        store
            .update(&["baseline", "boolean", "ui.first_open"], &mut |_| json!(true))
            .unwrap();
        assert_eq!(Some(json!(true)), store.get(&["baseline", "boolean", "ui.first_open"]));
        assert_eq!(
            Some(json!({"boolean": {"ui.first_open": true}})),
            store.get(&["baseline"])
        );
    }

    #[test]
    fn update_sees_the_previous_value() {
        let mut store = store();
        let mut bump = |current: Option<&JsonValue>| {
            json!(current.and_then(JsonValue::as_i64).unwrap_or(0) + 1)
        };
        store.update(&["metrics", "counter", "clicks"], &mut bump).unwrap();
        store.update(&["metrics", "counter", "clicks"], &mut bump).unwrap();
        assert_eq!(Some(json!(2)), store.get(&["metrics", "counter", "clicks"]));
    }

    #[test]
    fn non_object_prefixes_are_never_traversed() {
        let mut store = store();
        store.update(&["a"], &mut |_| json!(42)).unwrap();

        assert_eq!(None, store.get(&["a", "b"]));
        assert!(matches!(
            store.update(&["a", "b"], &mut |_| json!(1)),
            Err(StorageError::InvalidPath { .. })
        ));
        // The collision left the stored value untouched.
        assert_eq!(Some(json!(42)), store.get(&["a"]));
    }

    #[test]
    fn delete_removes_subtrees_and_tolerates_missing_paths() {
        let mut store = store();
        store.update(&["a", "b", "c"], &mut |_| json!(1)).unwrap();
        store.update(&["a", "b", "d"], &mut |_| json!(2)).unwrap();

        store.delete(&["a", "b", "c"]).unwrap();
        assert_eq!(None, store.get(&["a", "b", "c"]));
        assert_eq!(Some(json!(2)), store.get(&["a", "b", "d"]));

        store.delete(&["a", "missing"]).unwrap();
        store.delete(&["x", "y"]).unwrap();
    }

    #[test]
    fn delete_of_the_empty_path_erases_the_root() {
        let mut store = store();
        store.update(&["a", "b"], &mut |_| json!(1)).unwrap();
        store.delete(&[]).unwrap();
        assert_eq!(None, store.get(&[]));
    }

    #[test]
    fn root_update_must_stay_an_object() {
        let mut store = store();
        assert!(matches!(
            store.update(&[], &mut |_| json!(7)),
            Err(StorageError::RootNotAnObject)
        ));
        store.update(&[], &mut |_| json!({"k": 1})).unwrap();
        assert_eq!(Some(json!(1)), store.get(&["k"]));
    }
}
