//! Defines the persistent operations on a storage trie root.
//!
//! Every operation takes a root by reference and returns a new root. Nodes
//! that are not on the modified path are shared with the old root, so old
//! roots remain valid and can keep being queried.

use log::{debug, trace};
use thiserror::Error;

use crate::{
    nibbles::{Nibble, Nibbles},
    node::{new_branch_child_arr, MaybeNode, Node, WrappedNode},
    utils::TrieNodeType,
};

/// Stores the result of trie operations. Returns a [TrieOpError] upon
/// failure.
pub type TrieOpResult<T> = Result<T, TrieOpError>;

/// An error type for trie operation.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum TrieOpError {
    /// A leaf value was not in its minimal big-endian form.
    #[error("Attempted to create a leaf with a leading zero byte in its value! (value: 0x{0})")]
    NonCanonicalValue(String),

    /// A path ran out before reaching a leaf, or one path is a strict prefix
    /// of another. All paths in a storage trie have the same length, so this
    /// is a usage error.
    #[error("Path ran out at a {node} node! Paths in a storage trie must all have the same length (remaining: {remaining})")]
    PathExhausted {
        /// The node the path ran out at.
        node: TrieNodeType,
        /// What was left of the path when the error was found.
        remaining: Nibbles,
    },
}

/// Inserts `value` at `path`, returning the new root.
///
/// An existing leaf at the exact same path has its value replaced.
pub fn insert(root: &MaybeNode, path: Nibbles, value: &[u8]) -> TrieOpResult<WrappedNode> {
    trace!("Inserting new leaf (k: {}, v: 0x{})...", path, hex::encode(value));
    insert_into_trie_rec(root.as_ref(), path, value)
}

fn insert_into_trie_rec(
    node: Option<&WrappedNode>,
    mut path: Nibbles,
    value: &[u8],
) -> TrieOpResult<WrappedNode> {
    let Some(node) = node else {
        trace!("Insert traversed Empty");
        return Ok(Node::leaf(path, value)?.into());
    };

    match node.as_ref() {
        Node::Branch { children, .. } => {
            if path.is_empty() {
                return Err(path_exhausted(node, path));
            }

            let nibble = path.pop_next_nibble_front();
            trace!("Insert traversed Branch (nibble: {:x})", nibble);

            let updated_child = insert_into_trie_rec(children[nibble as usize].as_ref(), path, value)?;
            let mut updated_children = (**children).clone();
            updated_children[nibble as usize] = Some(updated_child);

            Ok(Node::branch(updated_children).into())
        }
        Node::Extension { nibbles, child } => {
            trace!("Insert traversed Extension (nibbles: {})", nibbles);

            let common = nibbles.common_prefix_len(&path);
            if common == nibbles.count() {
                let updated_child = insert_into_trie_rec(
                    Some(child),
                    path.truncate_n_nibbles_front(common),
                    value,
                )?;

                return Ok(Node::extension(*nibbles, updated_child).into());
            }

            if common == path.count() {
                return Err(path_exhausted(node, path));
            }

            // The branch covers the diverging nibble, so whatever is left of the
            // extension may be empty.
            let existing_postfix = nibbles.truncate_n_nibbles_front(common + 1);
            let existing_node = match existing_postfix.is_empty() {
                true => child.clone(),
                false => Node::extension(existing_postfix, child.clone()).into(),
            };

            place_branch_and_potentially_ext_prefix(
                path.split_at_idx_prefix(common),
                (nibbles.get_nibble(common), existing_node),
                new_leaf_and_nibble(&path, common, value)?,
            )
        }
        Node::Leaf {
            nibbles,
            value: existing_value,
        } => insert_into_leaf(node, *nibbles, existing_value, path, value),
        Node::EmptyLeaf => insert_into_leaf(node, Nibbles::default(), &[], path, value),
    }
}

fn insert_into_leaf(
    node: &Node,
    nibbles: Nibbles,
    existing_value: &[u8],
    path: Nibbles,
    value: &[u8],
) -> TrieOpResult<WrappedNode> {
    trace!("Insert traversed Leaf (nibbles: {})", nibbles);

    let common = nibbles.common_prefix_len(&path);
    if common == nibbles.count() && common == path.count() {
        trace!("Replacing value of existing leaf");
        return Ok(Node::leaf(path, value)?.into());
    }

    if common == nibbles.count() || common == path.count() {
        return Err(path_exhausted(node, path));
    }

    // The existing leaf goes under the branch, which covers its first
    // diverging nibble.
    let existing_leaf = Node::leaf(nibbles.truncate_n_nibbles_front(common + 1), existing_value)?;

    place_branch_and_potentially_ext_prefix(
        path.split_at_idx_prefix(common),
        (nibbles.get_nibble(common), existing_leaf.into()),
        new_leaf_and_nibble(&path, common, value)?,
    )
}

fn new_leaf_and_nibble(
    path: &Nibbles,
    common: usize,
    value: &[u8],
) -> TrieOpResult<(Nibble, WrappedNode)> {
    let leaf = Node::leaf(path.truncate_n_nibbles_front(common + 1), value)?;
    Ok((path.get_nibble(common), leaf.into()))
}

fn place_branch_and_potentially_ext_prefix(
    common_prefix: Nibbles,
    (existing_nibble, existing_node): (Nibble, WrappedNode),
    (new_nibble, new_node): (Nibble, WrappedNode),
) -> TrieOpResult<WrappedNode> {
    let mut children = new_branch_child_arr();
    children[existing_nibble as usize] = Some(existing_node);
    children[new_nibble as usize] = Some(new_node);

    let branch: WrappedNode = Node::branch(children).into();

    Ok(match common_prefix.is_empty() {
        true => branch,
        false => Node::extension(common_prefix, branch).into(),
    })
}

fn path_exhausted(node: &Node, remaining: Nibbles) -> TrieOpError {
    TrieOpError::PathExhausted {
        node: node.into(),
        remaining,
    }
}

/// Removes the leaf at exactly `path`, collapsing any branch or extension
/// left with a single descendant.
///
/// Deleting a path with no leaf returns the same root (pointer-equal).
pub fn delete(root: &MaybeNode, path: Nibbles) -> MaybeNode {
    trace!("Deleting a leaf node with key {} if it exists", path);
    delete_rec(root, path, PathMatch::Exact)
}

/// Removes every leaf whose path starts with `prefix`, collapsing the
/// remaining structure the same way [`delete`] does.
pub fn delete_prefix(root: &MaybeNode, prefix: Nibbles) -> MaybeNode {
    trace!("Deleting every leaf under prefix {}", prefix);
    delete_rec(root, prefix, PathMatch::Prefix)
}

fn delete_rec(root: &MaybeNode, path: Nibbles, path_match: PathMatch) -> MaybeNode {
    match root {
        Some(node) => match delete_intern(node, path, path_match) {
            Some(updated) => updated,
            None => root.clone(),
        },
        None => None,
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum PathMatch {
    Exact,
    Prefix,
}

impl PathMatch {
    /// Whether a node whose full remaining path is `nibbles` falls under
    /// `path`.
    fn covers(self, path: &Nibbles, nibbles: &Nibbles) -> bool {
        match self {
            PathMatch::Exact => nibbles == path,
            PathMatch::Prefix => nibbles.starts_with(path),
        }
    }
}

/// Returns `None` if nothing was deleted, otherwise the updated subtree.
fn delete_intern(node: &WrappedNode, mut path: Nibbles, path_match: PathMatch) -> Option<MaybeNode> {
    match node.as_ref() {
        Node::Branch { children, .. } => {
            if path.is_empty() {
                // Only a prefix delete can remove a whole branch. An exact delete
                // can never find a leaf here.
                return (path_match == PathMatch::Prefix).then_some(None);
            }

            let nibble = path.pop_next_nibble_front();
            trace!("Delete traversed Branch nibble {:x}", nibble);

            let updated_child = delete_intern(children[nibble as usize].as_ref()?, path, path_match)?;
            let mut updated_children = (**children).clone();
            updated_children[nibble as usize] = updated_child;

            Some(collapse_branch_if_needed(updated_children))
        }
        Node::Extension { nibbles, child } => {
            trace!("Delete traversed Extension (nibbles: {})", nibbles);

            if path_match == PathMatch::Prefix && nibbles.starts_with(&path) {
                trace!("Deleting extension ({}) under prefix", nibbles);
                return Some(None);
            }

            if !path.starts_with(nibbles) {
                return None;
            }

            let updated_child =
                delete_intern(child, path.truncate_n_nibbles_front(nibbles.count()), path_match)?;

            Some(updated_child.map(|c| prepend_path(nibbles, &c)))
        }
        Node::Leaf { .. } | Node::EmptyLeaf => {
            let (nibbles, _) = node.leaf_parts()?;
            trace!("Delete traversed Leaf (nibbles: {})", nibbles);

            path_match.covers(&path, &nibbles).then(|| {
                trace!("Deleting leaf ({})", nibbles);
                None
            })
        }
    }
}

/// A branch that is left with a single child is replaced by that child with
/// the child's nibble prepended to its path.
fn collapse_branch_if_needed(children: [MaybeNode; 16]) -> MaybeNode {
    match get_num_non_empty_children(&children) {
        0 => None,
        1 => children
            .iter()
            .enumerate()
            .find_map(|(i, c)| c.as_ref().map(|c| (i as Nibble, c)))
            .map(|(nibble, only_child)| {
                debug!(
                    "Collapsing branch with a single {} child in slot {:x}",
                    TrieNodeType::from(only_child.as_ref()),
                    nibble
                );

                prepend_path(&Nibbles::from_nibble(nibble), only_child)
            }),
        _ => Some(Node::branch(children).into()),
    }
}

fn get_num_non_empty_children(children: &[MaybeNode; 16]) -> usize {
    children.iter().filter(|c| c.is_some()).count()
}

/// Pushes `prefix` in front of the path of `node`. Leaves and extensions absorb
/// it into their own path, while a branch gets wrapped in a new extension.
fn prepend_path(prefix: &Nibbles, node: &WrappedNode) -> WrappedNode {
    match node.as_ref() {
        Node::Branch { .. } => Node::extension(*prefix, node.clone()),
        Node::Extension { nibbles, child } => {
            debug!("Merging extensions {} and {}", prefix, nibbles);
            Node::extension(prefix.merge_nibbles(nibbles), child.clone())
        }
        Node::Leaf { nibbles, value } => {
            debug!("Collapsing extension ({}) into leaf ({})", prefix, nibbles);
            Node::Leaf {
                nibbles: prefix.merge_nibbles(nibbles),
                value: value.clone(),
            }
        }
        Node::EmptyLeaf => Node::Leaf {
            nibbles: *prefix,
            value: Vec::new(),
        },
    }
    .into()
}

/// Walks `path` down from `root`, returning the leaf stored at exactly that
/// path (a [`Node::Leaf`] or [`Node::EmptyLeaf`]).
pub fn find_leaf<'a>(root: &'a MaybeNode, path: &Nibbles) -> Option<&'a Node> {
    let mut curr_node = root.as_deref()?;
    let mut path = *path;

    loop {
        match curr_node {
            Node::Branch { children, .. } => {
                if path.is_empty() {
                    return None;
                }

                let nibble = path.pop_next_nibble_front();
                trace!("Get traversed Branch (nibble: {:x})", nibble);
                curr_node = children[nibble as usize].as_deref()?;
            }
            Node::Extension { nibbles, child } => {
                trace!("Get traversed Extension (nibbles: {})", nibbles);
                if !path.starts_with(nibbles) {
                    return None;
                }

                path.truncate_n_nibbles_front_mut(nibbles.count());
                curr_node = child.as_ref();
            }
            Node::Leaf { nibbles, .. } => {
                trace!("Get traversed Leaf (nibbles: {})", nibbles);
                return (*nibbles == path).then_some(curr_node);
            }
            Node::EmptyLeaf => return path.is_empty().then_some(curr_node),
        }
    }
}

/// Returns the value of the leaf at `path`.
pub fn get<'a>(root: &'a MaybeNode, path: &Nibbles) -> Option<&'a [u8]> {
    find_leaf(root, path).and_then(Node::leaf_value)
}

/// Every `(path, value)` pair in the trie, in lexicographic path order.
pub fn items(root: &MaybeNode) -> Vec<(Nibbles, Vec<u8>)> {
    let mut out = Vec::new();
    if let Some(node) = root {
        collect_items(node, Nibbles::default(), &mut out);
    }

    out
}

fn collect_items(node: &Node, curr_key: Nibbles, out: &mut Vec<(Nibbles, Vec<u8>)>) {
    match node {
        Node::Branch { children, .. } => {
            for (nibble, child) in children.iter().enumerate() {
                if let Some(child) = child {
                    let mut key = curr_key;
                    key.push_nibble_back(nibble as Nibble);
                    collect_items(child, key, out);
                }
            }
        }
        Node::Extension { nibbles, child } => {
            collect_items(child, curr_key.merge_nibbles(nibbles), out)
        }
        Node::Leaf { nibbles, value } => out.push((curr_key.merge_nibbles(nibbles), value.clone())),
        Node::EmptyLeaf => out.push((curr_key, Vec::new())),
    }
}
