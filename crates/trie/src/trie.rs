//! The Merkle-Patricia trie proper: insert, delete, hash, checkpoint.

use crate::nibbles::{common_prefix_len, Nibbles};
use crate::node::{hash_branch, hash_extension, hash_leaf, Node, StoredNode};
use crate::store::{TrieStore, TrieStoreError};
use vellum_types::Hash;

/// Error type for trie operations.
///
/// `NodeNotFound` and `Codec` while mutating or hashing indicate divergence
/// between the in-memory trie and its store; the committer treats them as
/// state corruption.
#[derive(Debug, thiserror::Error)]
pub enum TrieError {
    /// The trie references a node the store does not hold.
    #[error("trie node {0} is missing from the trie store")]
    NodeNotFound(Hash),
    /// No root was checkpointed at the requested height.
    #[error("no trie root checkpointed at height {0}")]
    RootNotFound(u64),
    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] TrieStoreError),
    /// A persisted node failed to decode, or a node failed to encode.
    #[error("node codec error: {0}")]
    Codec(String),
}

/// Merkle-Patricia trie over composite keys, backed by a [`TrieStore`].
///
/// Single-writer: the committer owns the trie and mutates it between
/// checkpoints. Loading at a height yields a trie whose root is a lazy hash
/// node; traversal faults subtrees in from the store as needed.
#[derive(Debug)]
pub struct StateTrie<S> {
    root: Node,
    store: S,
}

impl<S: TrieStore> StateTrie<S> {
    /// Create an empty trie over a store.
    pub fn new(store: S) -> Self {
        Self {
            root: Node::Empty,
            store,
        }
    }

    /// Reconstruct the trie as checkpointed at `height`.
    ///
    /// Height `0` yields an empty trie. Fails with [`TrieError::RootNotFound`]
    /// if no checkpoint exists at the requested height.
    pub fn load(store: S, height: u64) -> Result<Self, TrieError> {
        if height == 0 {
            return Ok(Self::new(store));
        }
        let root = store
            .root_at(height)?
            .ok_or(TrieError::RootNotFound(height))?;
        let root = if root.is_zero() {
            Node::Empty
        } else {
            Node::Hash(root)
        };
        Ok(Self { root, store })
    }

    /// Access the backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Insert or replace the value under `key`.
    pub fn update(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), TrieError> {
        let path = Nibbles::from_bytes(key);
        let root = std::mem::take(&mut self.root);
        self.root = insert_node(&self.store, root, path.as_slice(), value)?;
        Ok(())
    }

    /// Remove the value under `key`, returning it if present.
    pub fn delete(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        let path = Nibbles::from_bytes(key);
        let root = std::mem::take(&mut self.root);
        let (root, removed) = delete_node(&self.store, root, path.as_slice())?;
        self.root = root;
        Ok(removed)
    }

    /// Look up the value under `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        let path = Nibbles::from_bytes(key);
        get_node(&self.store, &self.root, path.as_slice())
    }

    /// Root hash over the current in-memory state. The empty trie hashes to
    /// [`Hash::ZERO`].
    pub fn hash(&self) -> Hash {
        self.root.merkle_hash()
    }

    /// Checkpoint the trie at `height`: persist every node not yet in the
    /// store and record the root hash. Returns the root.
    pub fn commit(&mut self, height: u64) -> Result<Hash, TrieError> {
        let mut nodes = Vec::new();
        let root_hash = collect_new_nodes(&self.store, &self.root, &mut nodes)?;
        self.store.commit(height, root_hash, &nodes)?;
        vellum_metrics::record_trie_nodes_persisted(nodes.len());
        tracing::debug!(height, root = %root_hash, new_nodes = nodes.len(), "state trie committed");
        Ok(root_hash)
    }
}

fn resolve<S: TrieStore>(store: &S, hash: &Hash) -> Result<Node, TrieError> {
    let bytes = store.get_node(hash)?.ok_or(TrieError::NodeNotFound(*hash))?;
    let stored: StoredNode =
        sbor::basic_decode(&bytes).map_err(|e| TrieError::Codec(format!("{e:?}")))?;
    Ok(stored.into_node())
}

fn insert_node<S: TrieStore>(
    store: &S,
    node: Node,
    path: &[u8],
    value: Vec<u8>,
) -> Result<Node, TrieError> {
    match node {
        Node::Empty => Ok(Node::Leaf {
            path: Nibbles::from_nibbles(path),
            value,
        }),

        Node::Hash(hash) => {
            let resolved = resolve(store, &hash)?;
            insert_node(store, resolved, path, value)
        }

        Node::Leaf {
            path: leaf_path,
            value: leaf_value,
        } => {
            let common = common_prefix_len(leaf_path.as_slice(), path);
            if common == leaf_path.len() && common == path.len() {
                // Same key: replace.
                return Ok(Node::Leaf {
                    path: leaf_path,
                    value,
                });
            }

            // Split into a branch at the divergence point.
            let mut children = Node::empty_children();
            let mut branch_value = None;
            if common == leaf_path.len() {
                branch_value = Some(leaf_value);
            } else {
                let idx = leaf_path.as_slice()[common] as usize;
                children[idx] = Node::Leaf {
                    path: Nibbles::from_nibbles(&leaf_path.as_slice()[common + 1..]),
                    value: leaf_value,
                };
            }
            let branch = Node::Branch {
                children,
                value: branch_value,
            };
            let branch = insert_node(store, branch, &path[common..], value)?;
            Ok(wrap_prefix(&path[..common], branch))
        }

        Node::Extension {
            path: ext_path,
            child,
        } => {
            let common = common_prefix_len(ext_path.as_slice(), path);
            if common == ext_path.len() {
                let new_child = insert_node(store, *child, &path[common..], value)?;
                return Ok(Node::Extension {
                    path: ext_path,
                    child: Box::new(new_child),
                });
            }

            // Split the extension at the divergence point.
            let mut children = Node::empty_children();
            let idx = ext_path.as_slice()[common] as usize;
            let rest = &ext_path.as_slice()[common + 1..];
            children[idx] = if rest.is_empty() {
                *child
            } else {
                Node::Extension {
                    path: Nibbles::from_nibbles(rest),
                    child,
                }
            };
            let branch = Node::Branch {
                children,
                value: None,
            };
            let branch = insert_node(store, branch, &path[common..], value)?;
            Ok(wrap_prefix(&path[..common], branch))
        }

        Node::Branch {
            mut children,
            value: branch_value,
        } => {
            if path.is_empty() {
                return Ok(Node::Branch {
                    children,
                    value: Some(value),
                });
            }
            let idx = path[0] as usize;
            let child = std::mem::take(&mut children[idx]);
            children[idx] = insert_node(store, child, &path[1..], value)?;
            Ok(Node::Branch {
                children,
                value: branch_value,
            })
        }
    }
}

/// Wrap `node` in an extension carrying `prefix`, unless the prefix is empty.
fn wrap_prefix(prefix: &[u8], node: Node) -> Node {
    if prefix.is_empty() {
        node
    } else {
        Node::Extension {
            path: Nibbles::from_nibbles(prefix),
            child: Box::new(node),
        }
    }
}

fn delete_node<S: TrieStore>(
    store: &S,
    node: Node,
    path: &[u8],
) -> Result<(Node, Option<Vec<u8>>), TrieError> {
    match node {
        Node::Empty => Ok((Node::Empty, None)),

        Node::Hash(hash) => {
            let resolved = resolve(store, &hash)?;
            delete_node(store, resolved, path)
        }

        Node::Leaf {
            path: leaf_path,
            value,
        } => {
            if leaf_path.as_slice() == path {
                Ok((Node::Empty, Some(value)))
            } else {
                Ok((
                    Node::Leaf {
                        path: leaf_path,
                        value,
                    },
                    None,
                ))
            }
        }

        Node::Extension {
            path: ext_path,
            child,
        } => {
            if path.len() < ext_path.len() || &path[..ext_path.len()] != ext_path.as_slice() {
                return Ok((
                    Node::Extension {
                        path: ext_path,
                        child,
                    },
                    None,
                ));
            }
            let (new_child, removed) = delete_node(store, *child, &path[ext_path.len()..])?;
            if removed.is_none() {
                return Ok((
                    Node::Extension {
                        path: ext_path,
                        child: Box::new(new_child),
                    },
                    None,
                ));
            }
            let merged = merge_extension(store, ext_path, new_child)?;
            Ok((merged, removed))
        }

        Node::Branch {
            mut children,
            value: branch_value,
        } => {
            if path.is_empty() {
                return match branch_value {
                    Some(value) => {
                        let collapsed = collapse_branch(store, children, None)?;
                        Ok((collapsed, Some(value)))
                    }
                    None => Ok((
                        Node::Branch {
                            children,
                            value: None,
                        },
                        None,
                    )),
                };
            }

            let idx = path[0] as usize;
            let child = std::mem::take(&mut children[idx]);
            let (new_child, removed) = delete_node(store, child, &path[1..])?;
            children[idx] = new_child;
            if removed.is_none() {
                return Ok((
                    Node::Branch {
                        children,
                        value: branch_value,
                    },
                    None,
                ));
            }
            let collapsed = collapse_branch(store, children, branch_value)?;
            Ok((collapsed, removed))
        }
    }
}

/// Re-attach an extension prefix after its child changed shape.
///
/// Deleting below an extension can turn its branch child into a leaf,
/// another extension, or nothing; the prefix is folded into the result so
/// the trie stays canonical (equal content, equal structure, equal root).
fn merge_extension<S: TrieStore>(
    store: &S,
    prefix: Nibbles,
    child: Node,
) -> Result<Node, TrieError> {
    match child {
        Node::Empty => Ok(Node::Empty),
        Node::Hash(hash) => {
            let resolved = resolve(store, &hash)?;
            merge_extension(store, prefix, resolved)
        }
        Node::Leaf { path, value } => Ok(Node::Leaf {
            path: Nibbles::join(prefix.as_slice(), path.as_slice()),
            value,
        }),
        Node::Extension { path, child } => Ok(Node::Extension {
            path: Nibbles::join(prefix.as_slice(), path.as_slice()),
            child,
        }),
        branch @ Node::Branch { .. } => Ok(Node::Extension {
            path: prefix,
            child: Box::new(branch),
        }),
    }
}

/// Collapse a branch that may have dropped below two occupants.
fn collapse_branch<S: TrieStore>(
    store: &S,
    mut children: Box<[Node; 16]>,
    value: Option<Vec<u8>>,
) -> Result<Node, TrieError> {
    let occupied: Vec<usize> = children
        .iter()
        .enumerate()
        .filter(|(_, c)| !matches!(c, Node::Empty))
        .map(|(i, _)| i)
        .collect();

    match (value, occupied.as_slice()) {
        (None, []) => Ok(Node::Empty),
        (Some(value), []) => Ok(Node::Leaf {
            path: Nibbles::default(),
            value,
        }),
        (None, [idx]) => {
            let idx = *idx;
            let child = std::mem::take(&mut children[idx]);
            merge_extension(store, Nibbles::from_nibbles(&[idx as u8]), child)
        }
        (value, _) => Ok(Node::Branch { children, value }),
    }
}

fn get_node<S: TrieStore>(
    store: &S,
    node: &Node,
    path: &[u8],
) -> Result<Option<Vec<u8>>, TrieError> {
    match node {
        Node::Empty => Ok(None),
        Node::Hash(hash) => {
            let resolved = resolve(store, hash)?;
            get_node(store, &resolved, path)
        }
        Node::Leaf {
            path: leaf_path,
            value,
        } => {
            if leaf_path.as_slice() == path {
                Ok(Some(value.clone()))
            } else {
                Ok(None)
            }
        }
        Node::Extension {
            path: ext_path,
            child,
        } => {
            if path.len() < ext_path.len() || &path[..ext_path.len()] != ext_path.as_slice() {
                Ok(None)
            } else {
                get_node(store, child, &path[ext_path.len()..])
            }
        }
        Node::Branch { children, value } => {
            if path.is_empty() {
                Ok(value.clone())
            } else {
                get_node(store, &children[path[0] as usize], &path[1..])
            }
        }
    }
}

/// Persist every node below `node` that the store does not already hold,
/// bottom-up, returning the node's hash.
///
/// Nodes are content-addressed, so an already-present hash means the whole
/// subtree is present too.
fn collect_new_nodes<S: TrieStore>(
    store: &S,
    node: &Node,
    out: &mut Vec<(Hash, Vec<u8>)>,
) -> Result<Hash, TrieError> {
    match node {
        Node::Empty => Ok(Hash::ZERO),
        Node::Hash(hash) => Ok(*hash),

        Node::Leaf { path, value } => {
            let hash = hash_leaf(path, value);
            if !store.contains_node(&hash)? {
                out.push((hash, encode_stored(&StoredNode::from_node(node))?));
            }
            Ok(hash)
        }

        Node::Extension { path, child } => {
            let child_hash = collect_new_nodes(store, child, out)?;
            let hash = hash_extension(path, child_hash);
            if !store.contains_node(&hash)? {
                let stored = StoredNode::Extension {
                    path: path.as_slice().to_vec(),
                    child: child_hash,
                };
                out.push((hash, encode_stored(&stored)?));
            }
            Ok(hash)
        }

        Node::Branch { children, value } => {
            let mut child_hashes = [Hash::ZERO; 16];
            for (slot, child) in child_hashes.iter_mut().zip(children.iter()) {
                *slot = collect_new_nodes(store, child, out)?;
            }
            let hash = hash_branch(&child_hashes, value.as_deref());
            if !store.contains_node(&hash)? {
                let stored = StoredNode::Branch {
                    children: child_hashes
                        .iter()
                        .map(|h| if h.is_zero() { None } else { Some(*h) })
                        .collect(),
                    value: value.clone(),
                };
                out.push((hash, encode_stored(&stored)?));
            }
            Ok(hash)
        }
    }
}

fn encode_stored(stored: &StoredNode) -> Result<Vec<u8>, TrieError> {
    sbor::basic_encode(stored).map_err(|e| TrieError::Codec(format!("{e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite_key;
    use crate::store::MemTrieStore;

    fn trie() -> StateTrie<MemTrieStore> {
        StateTrie::new(MemTrieStore::new())
    }

    #[test]
    fn test_empty_trie_hashes_to_zero() {
        assert_eq!(trie().hash(), Hash::ZERO);
    }

    #[test]
    fn test_update_and_get() {
        let mut t = trie();
        t.update(&composite_key("db1", "key1"), b"value-1".to_vec())
            .unwrap();
        t.update(&composite_key("db1", "key2"), b"value-2".to_vec())
            .unwrap();
        t.update(&composite_key("db2", "key1"), b"value-3".to_vec())
            .unwrap();

        assert_eq!(
            t.get(&composite_key("db1", "key1")).unwrap(),
            Some(b"value-1".to_vec())
        );
        assert_eq!(
            t.get(&composite_key("db2", "key1")).unwrap(),
            Some(b"value-3".to_vec())
        );
        assert_eq!(t.get(&composite_key("db2", "key2")).unwrap(), None);
    }

    #[test]
    fn test_update_replaces_value_and_changes_root() {
        let mut t = trie();
        let key = composite_key("db1", "key1");
        t.update(&key, b"v1".to_vec()).unwrap();
        let root1 = t.hash();
        t.update(&key, b"v2".to_vec()).unwrap();
        let root2 = t.hash();

        assert_ne!(root1, root2);
        assert_eq!(t.get(&key).unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_root_is_content_deterministic() {
        // Same content, different operation history.
        let mut a = trie();
        a.update(&composite_key("db1", "k1"), b"1".to_vec()).unwrap();
        a.update(&composite_key("db1", "k2"), b"2".to_vec()).unwrap();
        a.update(&composite_key("db1", "k3"), b"3".to_vec()).unwrap();

        let mut b = trie();
        b.update(&composite_key("db1", "k3"), b"3".to_vec()).unwrap();
        b.update(&composite_key("db1", "k1"), b"old".to_vec())
            .unwrap();
        b.update(&composite_key("db1", "k2"), b"2".to_vec()).unwrap();
        b.update(&composite_key("db1", "k1"), b"1".to_vec()).unwrap();

        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_delete_restores_prior_root() {
        let mut t = trie();
        t.update(&composite_key("db1", "k1"), b"1".to_vec()).unwrap();
        let root_before = t.hash();

        t.update(&composite_key("db1", "k2"), b"2".to_vec()).unwrap();
        assert_ne!(t.hash(), root_before);

        let removed = t.delete(&composite_key("db1", "k2")).unwrap();
        assert_eq!(removed, Some(b"2".to_vec()));
        assert_eq!(t.hash(), root_before);
        assert_eq!(t.get(&composite_key("db1", "k2")).unwrap(), None);
    }

    #[test]
    fn test_delete_missing_key_is_noop() {
        let mut t = trie();
        t.update(&composite_key("db1", "k1"), b"1".to_vec()).unwrap();
        let root = t.hash();
        assert_eq!(t.delete(&composite_key("db1", "absent")).unwrap(), None);
        assert_eq!(t.hash(), root);
    }

    #[test]
    fn test_delete_everything_returns_to_empty() {
        let mut t = trie();
        let keys: Vec<Vec<u8>> = (0..8)
            .map(|i| composite_key("db1", &format!("key{i}")))
            .collect();
        for (i, key) in keys.iter().enumerate() {
            t.update(key, format!("value{i}").into_bytes()).unwrap();
        }
        for key in &keys {
            assert!(t.delete(key).unwrap().is_some());
        }
        assert_eq!(t.hash(), Hash::ZERO);
    }

    #[test]
    fn test_commit_and_reload_at_height() {
        let mut t = StateTrie::new(MemTrieStore::new());
        t.update(&composite_key("db1", "k1"), b"1".to_vec()).unwrap();
        t.update(&composite_key("db1", "k2"), b"2".to_vec()).unwrap();
        let root = t.commit(1).unwrap();
        assert_eq!(root, t.hash());

        let reloaded = StateTrie::load(t.store, 1).unwrap();
        assert_eq!(reloaded.hash(), root);
        assert_eq!(
            reloaded.get(&composite_key("db1", "k1")).unwrap(),
            Some(b"1".to_vec())
        );
        assert_eq!(
            reloaded.get(&composite_key("db1", "k2")).unwrap(),
            Some(b"2".to_vec())
        );
    }

    #[test]
    fn test_updates_after_reload_match_unbroken_trie() {
        // One trie mutated continuously; another checkpointed and reloaded
        // in between. Roots must stay identical.
        let mut continuous = trie();
        continuous
            .update(&composite_key("db1", "k1"), b"1".to_vec())
            .unwrap();
        continuous
            .update(&composite_key("db1", "k2"), b"2".to_vec())
            .unwrap();

        let mut checkpointed = StateTrie::new(MemTrieStore::new());
        checkpointed
            .update(&composite_key("db1", "k1"), b"1".to_vec())
            .unwrap();
        checkpointed
            .update(&composite_key("db1", "k2"), b"2".to_vec())
            .unwrap();
        checkpointed.commit(1).unwrap();
        let mut checkpointed = StateTrie::load(checkpointed.store, 1).unwrap();

        continuous
            .update(&composite_key("db1", "k3"), b"3".to_vec())
            .unwrap();
        continuous.delete(&composite_key("db1", "k1")).unwrap();
        checkpointed
            .update(&composite_key("db1", "k3"), b"3".to_vec())
            .unwrap();
        checkpointed.delete(&composite_key("db1", "k1")).unwrap();

        assert_eq!(continuous.hash(), checkpointed.hash());
    }

    #[test]
    fn test_load_requires_checkpoint() {
        let store = MemTrieStore::new();
        match StateTrie::load(store, 5) {
            Err(TrieError::RootNotFound(5)) => {}
            other => panic!("expected RootNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_second_commit_persists_only_new_nodes() {
        let mut t = trie();
        t.update(&composite_key("db1", "k1"), b"1".to_vec()).unwrap();
        t.commit(1).unwrap();

        // No changes: checkpoint at the next height adds nothing new.
        let mut nodes = Vec::new();
        let root = collect_new_nodes(&t.store, &t.root, &mut nodes).unwrap();
        assert_eq!(root, t.hash());
        assert!(nodes.is_empty());
    }
}
