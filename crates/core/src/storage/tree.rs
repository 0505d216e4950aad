//! Tree store: a single-owner arena of nodes with layer, root and leaf views.
//!
//! [`Tree`] owns every [`Node`] exactly once in `nodes`. The layer layout and
//! the index → layer map hold keys only, and [`Tree::root_nodes`],
//! [`Tree::leaf_nodes`] and [`Tree::layer_nodes`] are projections over the
//! arena, so an embedding written through [`Tree::set_embedding`] is what every
//! view returns afterwards.

use crate::config;
use crate::error::{Error, Result};
use crate::node::{Node, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Serialized layout of a tree: the node population plus layer membership.
///
/// `layers` may be omitted, in which case it is derived from the `children`
/// links by [`Tree::from_nodes`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreeLayout {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub layers: Vec<Vec<NodeIndex>>,
}

/// Hierarchical retrieval tree. Layer 0 holds the roots, the deepest layer the leaves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "TreeLayout", into = "TreeLayout")]
pub struct Tree {
    /// Canonical store. The only place a `Node` value lives.
    nodes: HashMap<NodeIndex, Node>,
    /// Node indices per layer, in layer order.
    layers: Vec<Vec<NodeIndex>>,
    /// Reverse map: node index → layer number.
    layer_of: HashMap<NodeIndex, usize>,
}

impl Tree {
    /// Builds a tree from a node population and its layer layout.
    ///
    /// Fails when an index is duplicated, when a layer names an unknown node,
    /// when a node sits in two layers, or when a node is in no layer. Deeper
    /// structural problems (children outside the next layer, orphans) are left
    /// to [`Tree::validate`] so that a damaged tree can still be loaded and fail
    /// per query.
    pub fn from_layers(nodes: Vec<Node>, layers: Vec<Vec<NodeIndex>>) -> Result<Self> {
        let mut arena = HashMap::with_capacity(nodes.len());
        for node in nodes {
            let index = node.index;
            if let Some((model, vector)) = node
                .embeddings
                .iter()
                .find(|(_, v)| v.len() > config::MAX_DIMENSION)
            {
                return Err(Error::InvalidTree(format!(
                    "node {} embedding for model '{}' has {} dimensions, limit is {}",
                    index,
                    model,
                    vector.len(),
                    config::MAX_DIMENSION
                )));
            }
            if arena.insert(index, node).is_some() {
                return Err(Error::DuplicateIndex(index));
            }
        }

        let mut layer_of = HashMap::with_capacity(arena.len());
        for (layer, indices) in layers.iter().enumerate() {
            for &index in indices {
                if !arena.contains_key(&index) {
                    return Err(Error::InvalidTree(format!(
                        "layer {} references unknown node {}",
                        layer, index
                    )));
                }
                if let Some(previous) = layer_of.insert(index, layer) {
                    return Err(Error::InvalidTree(format!(
                        "node {} appears in layers {} and {}",
                        index, previous, layer
                    )));
                }
            }
        }

        if layer_of.len() != arena.len() {
            let mut unplaced: Vec<NodeIndex> = arena
                .keys()
                .filter(|index| !layer_of.contains_key(index))
                .copied()
                .collect();
            unplaced.sort_unstable();
            return Err(Error::InvalidTree(format!(
                "nodes {:?} are not assigned to any layer",
                unplaced
            )));
        }

        Ok(Self {
            nodes: arena,
            layers,
            layer_of,
        })
    }

    /// Builds a tree by deriving layers from the `children` links.
    ///
    /// Roots are the nodes no other node lists as a child; each following
    /// layer is the children of the previous one in first-seen order. Every
    /// node must be reachable from a root.
    pub fn from_nodes(nodes: Vec<Node>) -> Result<Self> {
        let mut referenced = HashSet::new();
        let mut known = HashSet::with_capacity(nodes.len());
        for node in &nodes {
            if !known.insert(node.index) {
                return Err(Error::DuplicateIndex(node.index));
            }
            referenced.extend(node.children.iter().copied());
        }

        let mut roots: Vec<NodeIndex> = nodes
            .iter()
            .map(|n| n.index)
            .filter(|index| !referenced.contains(index))
            .collect();
        roots.sort_unstable();

        let children_of: HashMap<NodeIndex, &[NodeIndex]> = nodes
            .iter()
            .map(|n| (n.index, n.children.as_slice()))
            .collect();

        let mut layers = Vec::new();
        let mut seen: HashSet<NodeIndex> = roots.iter().copied().collect();
        let mut current = roots;
        while !current.is_empty() {
            let mut next = Vec::new();
            for index in &current {
                for &child in children_of.get(index).copied().unwrap_or_default() {
                    if known.contains(&child) && seen.insert(child) {
                        next.push(child);
                    }
                }
            }
            layers.push(current);
            current = next;
        }

        Self::from_layers(nodes, layers)
    }

    /// Returns the node at `index`.
    pub fn get(&self, index: NodeIndex) -> Result<&Node> {
        self.nodes.get(&index).ok_or(Error::NotFound(index))
    }

    /// Embedding of node `index` under `model`.
    pub fn embedding(&self, index: NodeIndex, model: &str) -> Result<&[f32]> {
        self.get(index)?
            .embedding(model)
            .ok_or_else(|| Error::MissingEmbedding {
                index,
                model: model.to_string(),
            })
    }

    /// Replaces the embedding of node `index` under `model`.
    ///
    /// The arena holds the only copy of the node, so the new vector is what
    /// every view returns from now on. A vector of a different dimension than
    /// the one it replaces is rejected. Loading already bounds stored vectors
    /// by [`config::MAX_DIMENSION`]; the bound is checked again only for new models.
    pub fn set_embedding(&mut self, index: NodeIndex, model: &str, vector: Vec<f32>) -> Result<()> {
        let node = self.nodes.get_mut(&index).ok_or(Error::NotFound(index))?;
        match node.embeddings.get_mut(model) {
            Some(existing) => {
                if existing.len() != vector.len() {
                    return Err(Error::DimensionMismatch {
                        expected: existing.len(),
                        found: vector.len(),
                    });
                }
                *existing = vector;
            }
            None => {
                if vector.len() > config::MAX_DIMENSION {
                    return Err(Error::InvalidTree(format!(
                        "embedding for model '{}' has {} dimensions, limit is {}",
                        model,
                        vector.len(),
                        config::MAX_DIMENSION
                    )));
                }
                node.embeddings.insert(model.to_string(), vector);
            }
        }
        Ok(())
    }

    /// Layer number of node `index` (0 = roots).
    pub fn layer_of(&self, index: NodeIndex) -> Result<usize> {
        self.layer_of
            .get(&index)
            .copied()
            .ok_or(Error::NotFound(index))
    }

    /// Number of layers, roots through leaves.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Index of the deepest layer, `None` for an empty tree.
    pub fn deepest_layer(&self) -> Option<usize> {
        self.layers.len().checked_sub(1)
    }

    /// Node indices of `layer` in layer order; empty when the layer does not exist.
    pub fn layer_indices(&self, layer: usize) -> &[NodeIndex] {
        self.layers.get(layer).map(Vec::as_slice).unwrap_or_default()
    }

    /// Nodes of `layer` in layer order.
    pub fn layer_nodes(&self, layer: usize) -> Vec<&Node> {
        self.layer_indices(layer)
            .iter()
            .filter_map(|index| self.nodes.get(index))
            .collect()
    }

    /// Nodes of layer 0.
    pub fn root_nodes(&self) -> Vec<&Node> {
        self.layer_nodes(0)
    }

    /// Nodes without children, in layer order.
    pub fn leaf_nodes(&self) -> Vec<&Node> {
        self.iter().filter(|node| node.is_leaf()).collect()
    }

    /// True when `index` names a node without children.
    pub fn is_leaf(&self, index: NodeIndex) -> Result<bool> {
        Ok(self.get(index)?.is_leaf())
    }

    /// Children of `parent` that resolve to nodes of `layer`, in `children` order.
    ///
    /// Child indices missing from the store or placed in another layer are skipped.
    pub fn children_in_layer(&self, parent: &Node, layer: usize) -> Vec<&Node> {
        parent
            .children
            .iter()
            .filter(|child| self.layer_of.get(child) == Some(&layer))
            .filter_map(|child| self.nodes.get(child))
            .collect()
    }

    /// All nodes in layer order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.layers
            .iter()
            .flatten()
            .filter_map(move |index| self.nodes.get(index))
    }

    /// Total number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the tree holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Dimension of `model` embeddings, taken from the first node (in layer order) that has one.
    pub fn model_dimension(&self, model: &str) -> Option<usize> {
        self.iter()
            .find_map(|node| node.embedding(model))
            .map(<[f32]>::len)
    }

    /// Copies every node's embedding under `model`, keyed by index.
    pub fn embeddings_for(&self, model: &str) -> HashMap<NodeIndex, Vec<f32>> {
        self.nodes
            .iter()
            .filter_map(|(&index, node)| node.embedding(model).map(|v| (index, v.to_vec())))
            .collect()
    }

    /// Estimated heap usage of nodes and their vectors, in bytes.
    pub fn estimate_memory_bytes(&self) -> usize {
        self.nodes
            .values()
            .map(|node| {
                std::mem::size_of::<Node>()
                    + node.text.len()
                    + node.children.len() * std::mem::size_of::<NodeIndex>()
                    + node
                        .embeddings
                        .iter()
                        .map(|(k, v)| k.len() + v.len() * std::mem::size_of::<f32>())
                        .sum::<usize>()
            })
            .sum()
    }
}

impl TryFrom<TreeLayout> for Tree {
    type Error = Error;

    fn try_from(layout: TreeLayout) -> Result<Self> {
        if layout.layers.is_empty() && !layout.nodes.is_empty() {
            Tree::from_nodes(layout.nodes)
        } else {
            Tree::from_layers(layout.nodes, layout.layers)
        }
    }
}

impl From<Tree> for TreeLayout {
    fn from(mut tree: Tree) -> Self {
        let nodes = tree
            .layers
            .iter()
            .flatten()
            .filter_map(|index| tree.nodes.remove(index))
            .collect();
        TreeLayout {
            nodes,
            layers: tree.layers,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const MODEL: &str = "test-model";

    fn node(index: NodeIndex, children: Vec<NodeIndex>, v: &[f32]) -> Node {
        Node::internal(index, format!("node {index}"), children).with_embedding(MODEL, v.to_vec())
    }

    /// Root 0 over {1, 2}; 1 over leaves {3, 4}; 2 over leaves {5, 6}.
    pub(crate) fn three_layer_tree() -> Tree {
        let nodes = vec![
            node(0, vec![1, 2], &[1.0, 1.0]),
            node(1, vec![3, 4], &[1.0, 0.2]),
            node(2, vec![5, 6], &[0.2, 1.0]),
            node(3, vec![], &[1.0, 0.0]),
            node(4, vec![], &[0.8, 0.6]),
            node(5, vec![], &[0.6, 0.8]),
            node(6, vec![], &[0.0, 1.0]),
        ];
        Tree::from_layers(nodes, vec![vec![0], vec![1, 2], vec![3, 4, 5, 6]]).unwrap()
    }

    #[test]
    fn test_views_are_consistent() {
        let tree = three_layer_tree();
        assert_eq!(tree.len(), 7);
        assert_eq!(tree.num_layers(), 3);
        assert_eq!(tree.deepest_layer(), Some(2));
        let roots: Vec<_> = tree.root_nodes().iter().map(|n| n.index).collect();
        assert_eq!(roots, vec![0]);
        let leaves: Vec<_> = tree.leaf_nodes().iter().map(|n| n.index).collect();
        assert_eq!(leaves, vec![3, 4, 5, 6]);
        assert_eq!(tree.layer_of(5).unwrap(), 2);
        assert_eq!(tree.layer_of(2).unwrap(), 1);
    }

    #[test]
    fn test_get_missing_node() {
        let tree = three_layer_tree();
        assert!(matches!(tree.get(42), Err(Error::NotFound(42))));
        assert!(matches!(tree.layer_of(-1), Err(Error::NotFound(-1))));
    }

    #[test]
    fn test_set_embedding_visible_through_every_view() {
        let mut tree = three_layer_tree();
        tree.set_embedding(0, MODEL, vec![0.5, 0.5]).unwrap();
        tree.set_embedding(6, MODEL, vec![-1.0, 2.0]).unwrap();

        assert_eq!(tree.get(0).unwrap().embedding(MODEL), Some(&[0.5, 0.5][..]));
        assert_eq!(tree.root_nodes()[0].embedding(MODEL), Some(&[0.5, 0.5][..]));
        assert_eq!(tree.layer_nodes(0)[0].embedding(MODEL), Some(&[0.5, 0.5][..]));

        let leaf = tree.leaf_nodes().into_iter().find(|n| n.index == 6).unwrap();
        assert_eq!(leaf.embedding(MODEL), Some(&[-1.0, 2.0][..]));
        let in_layer = tree.layer_nodes(2).into_iter().find(|n| n.index == 6).unwrap();
        assert_eq!(in_layer.embedding(MODEL), Some(&[-1.0, 2.0][..]));
        assert_eq!(tree.embedding(6, MODEL).unwrap(), &[-1.0, 2.0]);
    }

    #[test]
    fn test_set_embedding_rejects_dimension_change() {
        let mut tree = three_layer_tree();
        let err = tree.set_embedding(3, MODEL, vec![1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 2,
                found: 3
            }
        ));
        assert!(matches!(
            tree.set_embedding(99, MODEL, vec![1.0, 0.0]),
            Err(Error::NotFound(99))
        ));
    }

    #[test]
    fn test_set_embedding_adds_new_model() {
        let mut tree = three_layer_tree();
        tree.set_embedding(3, "other", vec![0.1; 4]).unwrap();
        assert_eq!(tree.embedding(3, "other").unwrap().len(), 4);
        assert!(matches!(
            tree.embedding(4, "other"),
            Err(Error::MissingEmbedding { index: 4, .. })
        ));
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let nodes = vec![node(1, vec![], &[1.0]), node(1, vec![], &[0.0])];
        assert!(matches!(
            Tree::from_layers(nodes, vec![vec![1]]),
            Err(Error::DuplicateIndex(1))
        ));
    }

    #[test]
    fn test_layer_with_unknown_node_rejected() {
        let nodes = vec![node(1, vec![], &[1.0])];
        let err = Tree::from_layers(nodes, vec![vec![1, 2]]).unwrap_err();
        assert!(matches!(err, Error::InvalidTree(_)));
    }

    #[test]
    fn test_node_in_two_layers_rejected() {
        let nodes = vec![node(1, vec![2], &[1.0]), node(2, vec![], &[1.0])];
        let err = Tree::from_layers(nodes, vec![vec![1, 2], vec![2]]).unwrap_err();
        assert!(matches!(err, Error::InvalidTree(_)));
    }

    #[test]
    fn test_unplaced_node_rejected() {
        let nodes = vec![node(1, vec![], &[1.0]), node(2, vec![], &[1.0])];
        let err = Tree::from_layers(nodes, vec![vec![1]]).unwrap_err();
        assert!(err.to_string().contains("[2]"));
    }

    #[test]
    fn test_from_nodes_derives_layers() {
        let nodes = vec![
            node(6, vec![], &[0.0, 1.0]),
            node(0, vec![1, 2], &[1.0, 1.0]),
            node(3, vec![], &[1.0, 0.0]),
            node(2, vec![5, 6], &[0.2, 1.0]),
            node(1, vec![3, 4], &[1.0, 0.2]),
            node(5, vec![], &[0.6, 0.8]),
            node(4, vec![], &[0.8, 0.6]),
        ];
        let tree = Tree::from_nodes(nodes).unwrap();
        assert_eq!(tree.layer_indices(0), &[0]);
        assert_eq!(tree.layer_indices(1), &[1, 2]);
        assert_eq!(tree.layer_indices(2), &[3, 4, 5, 6]);
    }

    #[test]
    fn test_children_in_layer_skips_unresolved() {
        let nodes = vec![
            node(0, vec![1, 9, 2], &[1.0]),
            node(1, vec![], &[1.0]),
            node(2, vec![], &[1.0]),
        ];
        let tree = Tree::from_layers(nodes, vec![vec![0, 2], vec![1]]).unwrap();
        let root = tree.get(0).unwrap();
        let children: Vec<_> = tree.children_in_layer(root, 1).iter().map(|n| n.index).collect();
        assert_eq!(children, vec![1]);
    }

    #[test]
    fn test_json_layout_roundtrip_preserves_layers() {
        let tree = three_layer_tree();
        let json = serde_json::to_string(&tree).unwrap();
        let back: Tree = serde_json::from_str(&json).unwrap();
        assert_eq!(back.layer_indices(1), &[1, 2]);
        assert_eq!(back.embedding(4, MODEL).unwrap(), &[0.8, 0.6]);
    }

    #[test]
    fn test_oversized_embedding_rejected_at_load() {
        let wide = vec![0.5; config::MAX_DIMENSION + 1];
        let nodes = vec![Node::leaf(1, "").with_embedding("wide", wide.clone())];
        let err = Tree::from_layers(nodes, vec![vec![1]]).unwrap_err();
        assert!(matches!(err, Error::InvalidTree(ref m) if m.contains("node 1")), "{err}");

        let mut tree = three_layer_tree();
        assert!(matches!(
            tree.set_embedding(3, "wide", wide),
            Err(Error::InvalidTree(_))
        ));
    }

    #[test]
    fn test_refining_at_limit_keeps_working() {
        let at_limit = vec![0.5; config::MAX_DIMENSION];
        let nodes = vec![Node::leaf(1, "").with_embedding("wide", at_limit.clone())];
        let mut tree = Tree::from_layers(nodes, vec![vec![1]]).unwrap();
        tree.set_embedding(1, "wide", vec![0.25; config::MAX_DIMENSION]).unwrap();
        assert_eq!(tree.model_dimension("wide"), Some(config::MAX_DIMENSION));
    }

    #[test]
    fn test_empty_tree() {
        let tree = Tree::default();
        assert!(tree.is_empty());
        assert_eq!(tree.deepest_layer(), None);
        assert!(tree.root_nodes().is_empty());
        assert_eq!(tree.model_dimension(MODEL), None);
    }
}
