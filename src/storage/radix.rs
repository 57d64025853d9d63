//! Compressed radix tree keyed by byte strings, with a wildcard suffix
//! matcher for `*.domain` rules.
//!
//! Wildcard rules are stored under their base domain (the part after `*.`).
//! [`RadixTree::matches_wildcard`] probes every proper suffix of the queried
//! domain starting at label index 1, so a rule stored as `example.com`
//! matches `sub.example.com` but never `example.com` itself — exact matches
//! belong to the domain map, not the tree.

use std::collections::hash_map::Entry;

use rustc_hash::FxHashMap;

#[derive(Debug)]
struct RadixNode<V> {
    /// Edge label leading into this node.
    key: String,
    /// Children keyed by the first byte of their edge label.
    children: FxHashMap<u8, Box<RadixNode<V>>>,
    /// `Some` iff a key terminates at this node.
    value: Option<V>,
}

impl<V> RadixNode<V> {
    fn new(key: String) -> Self {
        Self {
            key,
            children: FxHashMap::default(),
            value: None,
        }
    }
}

/// Compressed trie over byte strings.
#[derive(Debug)]
pub struct RadixTree<V> {
    root: RadixNode<V>,
    size: usize,
}

impl<V> RadixTree<V> {
    pub fn new() -> Self {
        Self {
            root: RadixNode::new(String::new()),
            size: 0,
        }
    }

    /// Number of terminal nodes (stored keys).
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn clear(&mut self) {
        self.root = RadixNode::new(String::new());
        self.size = 0;
    }

    /// Inserts `key`, replacing any existing value. Empty keys are ignored.
    pub fn insert(&mut self, key: &str, value: V) {
        if key.is_empty() {
            return;
        }
        Self::insert_at(&mut self.root, key, value, &mut self.size);
    }

    fn insert_at(node: &mut RadixNode<V>, key: &str, value: V, size: &mut usize) {
        if key.is_empty() {
            if node.value.is_none() {
                *size += 1;
            }
            node.value = Some(value);
            return;
        }

        let first = key.as_bytes()[0];
        let child = match node.children.entry(first) {
            Entry::Vacant(slot) => {
                let mut leaf = RadixNode::new(key.to_string());
                leaf.value = Some(value);
                slot.insert(Box::new(leaf));
                *size += 1;
                return;
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };

        let common = longest_common_prefix(&child.key, key);

        if common == child.key.len() {
            // The child's whole label is consumed; descend with the rest.
            Self::insert_at(child, &key[common..], value, size);
        } else if common == key.len() {
            // The inserted key is a proper prefix of the child's label: the
            // child's suffix moves into a new descendant and the child itself
            // becomes the terminal for the inserted key.
            let suffix = child.key.split_off(common);
            let mut moved = RadixNode::new(suffix);
            moved.children = std::mem::take(&mut child.children);
            moved.value = child.value.take();

            child.children.insert(moved.key.as_bytes()[0], Box::new(moved));
            child.value = Some(value);
            *size += 1;
        } else {
            // Partial overlap: the child keeps the common prefix and gains
            // two children, one preserving the old subtree and one new leaf.
            let old_suffix = child.key.split_off(common);
            let mut old_node = RadixNode::new(old_suffix);
            old_node.children = std::mem::take(&mut child.children);
            old_node.value = child.value.take();

            let mut new_node = RadixNode::new(key[common..].to_string());
            new_node.value = Some(value);

            child.children.insert(old_node.key.as_bytes()[0], Box::new(old_node));
            child.children.insert(new_node.key.as_bytes()[0], Box::new(new_node));
            *size += 1;
        }
    }

    /// Exact lookup.
    pub fn get(&self, key: &str) -> Option<&V> {
        if key.is_empty() {
            return None;
        }

        let mut node = &self.root;
        let mut rest = key;
        loop {
            if rest.is_empty() {
                return node.value.as_ref();
            }
            let child = node.children.get(&rest.as_bytes()[0])?;
            rest = rest.strip_prefix(child.key.as_str())?;
            node = &**child;
        }
    }

    /// Whether any stored key starts with `prefix`.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        if prefix.is_empty() {
            return true;
        }

        let mut node = &self.root;
        let mut rest = prefix;
        loop {
            let Some(child) = node.children.get(&rest.as_bytes()[0]) else {
                return false;
            };
            if rest.len() <= child.key.len() {
                return child.key.as_bytes().starts_with(rest.as_bytes());
            }
            match rest.strip_prefix(child.key.as_str()) {
                Some(r) => {
                    rest = r;
                    node = &**child;
                }
                None => return false,
            }
        }
    }

    /// Resolves `*.X` rules: probes every proper suffix of `domain` obtained
    /// by dropping leading labels, and returns the first hit.
    ///
    /// `sub.example.com` probes `example.com`, then `com`. The full domain is
    /// deliberately not probed.
    pub fn matches_wildcard(&self, domain: &str) -> Option<&V> {
        for (idx, _) in domain.match_indices('.') {
            if let Some(value) = self.get(&domain[idx + 1..]) {
                return Some(value);
            }
        }
        None
    }
}

impl<V> Default for RadixTree<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Length in bytes of the longest common prefix of `a` and `b`, clamped back
/// to a character boundary of both.
fn longest_common_prefix(a: &str, b: &str) -> usize {
    let mut len = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .take_while(|(x, y)| x == y)
        .count();
    while !a.is_char_boundary(len) || !b.is_char_boundary(len) {
        len -= 1;
    }
    len
}
