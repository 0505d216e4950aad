//! Ground-truth path resolution: leaf → root-first ancestor chain.

use crate::error::{Error, Result};
use crate::node::NodeIndex;
use crate::storage::tree::Tree;
use std::collections::HashMap;

/// Returns the indices from a root down to `leaf`, root first.
///
/// Walks up one layer at a time, looking in each layer for the node whose
/// `children` contain the current frontier. Fails with
/// [`Error::NotFound`] when `leaf` is not in the store and with
/// [`Error::DisconnectedNode`] when it is not a leaf or some layer holds no
/// parent for the frontier.
pub fn path_to_leaf(tree: &Tree, leaf: NodeIndex) -> Result<Vec<NodeIndex>> {
    let node = tree.get(leaf)?;
    if !node.is_leaf() {
        return Err(Error::DisconnectedNode {
            index: leaf,
            reason: format!("node has {} children, not a leaf", node.children.len()),
        });
    }
    let leaf_layer = tree.layer_of(leaf)?;

    let mut path = Vec::with_capacity(leaf_layer + 1);
    path.push(leaf);
    let mut frontier = leaf;
    for layer in (0..leaf_layer).rev() {
        let parent = tree
            .layer_nodes(layer)
            .into_iter()
            .find(|candidate| candidate.has_child(frontier))
            .ok_or_else(|| Error::DisconnectedNode {
                index: leaf,
                reason: format!("no parent of node {} in layer {}", frontier, layer),
            })?;
        frontier = parent.index;
        path.push(frontier);
    }

    path.reverse();
    Ok(path)
}

/// Ground-truth paths for every leaf, computed once per run.
///
/// Leaves whose chain cannot be resolved keep their error so each example
/// that targets them can report it.
pub fn correct_paths(tree: &Tree) -> HashMap<NodeIndex, Result<Vec<NodeIndex>>> {
    tree.leaf_nodes()
        .into_iter()
        .map(|leaf| (leaf.index, path_to_leaf(tree, leaf.index)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::storage::tree::tests::three_layer_tree;

    #[test]
    fn test_path_for_every_leaf() {
        let tree = three_layer_tree();
        let depth = tree.deepest_layer().unwrap();
        for leaf in tree.leaf_nodes() {
            let path = path_to_leaf(&tree, leaf.index).unwrap();
            assert_eq!(path.len(), depth + 1);
            assert_eq!(*path.last().unwrap(), leaf.index);
            assert_eq!(path[0], 0);
        }
        assert_eq!(path_to_leaf(&tree, 5).unwrap(), vec![0, 2, 5]);
        assert_eq!(path_to_leaf(&tree, 4).unwrap(), vec![0, 1, 4]);
    }

    #[test]
    fn test_non_leaf_is_disconnected() {
        let tree = three_layer_tree();
        assert!(matches!(
            path_to_leaf(&tree, 1),
            Err(Error::DisconnectedNode { index: 1, .. })
        ));
    }

    #[test]
    fn test_unknown_leaf_not_found() {
        let tree = three_layer_tree();
        assert!(matches!(path_to_leaf(&tree, 77), Err(Error::NotFound(77))));
    }

    #[test]
    fn test_missing_parent_is_disconnected() {
        // Leaf 3 sits in layer 2 but nobody in layer 1 lists it.
        let nodes = vec![
            Node::internal(0, "root", vec![1]),
            Node::internal(1, "mid", vec![2]),
            Node::leaf(2, "a"),
            Node::leaf(3, "stray"),
        ];
        let tree = Tree::from_layers(nodes, vec![vec![0], vec![1], vec![2, 3]]).unwrap();
        assert_eq!(path_to_leaf(&tree, 2).unwrap(), vec![0, 1, 2]);
        let err = path_to_leaf(&tree, 3).unwrap_err();
        assert!(err.to_string().contains("no parent of node 3 in layer 1"), "{err}");
    }

    #[test]
    fn test_correct_paths_table() {
        let tree = three_layer_tree();
        let table = correct_paths(&tree);
        assert_eq!(table.len(), 4);
        assert_eq!(table[&6].as_ref().unwrap(), &vec![0, 2, 6]);
    }
}
