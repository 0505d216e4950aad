//! Greedy hierarchical descent.
//!
//! Starting from the roots, each layer picks the single best-matching node
//! and the next layer only considers that node's children. Nothing is ever
//! revisited: a wrong choice high up cannot be recovered further down, which
//! is exactly the error refinement corrects.

use crate::embedding::{embed_query, Embedder};
use crate::error::{Error, Result};
use crate::metrics;
use crate::node::{Node, NodeIndex};
use crate::search::{best_match, ScoredNode};
use crate::storage::tree::Tree;

/// Outcome of one retrieval: the realized path and the query vector it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    /// Chosen node per layer, root first.
    pub path: Vec<ScoredNode>,
    /// Embedding of the query text.
    pub query_vector: Vec<f32>,
}

impl Retrieval {
    /// The last node of the path (a leaf unless the tree is malformed).
    pub fn leaf(&self) -> Option<NodeIndex> {
        self.path.last().map(|s| s.index)
    }

    /// Indices of the path, root first.
    pub fn indices(&self) -> Vec<NodeIndex> {
        self.path.iter().map(|s| s.index).collect()
    }

    /// Resolves the path against `tree`.
    pub fn nodes<'t>(&self, tree: &'t Tree) -> Result<Vec<&'t Node>> {
        self.path.iter().map(|s| tree.get(s.index)).collect()
    }
}

/// Walks from the roots to a leaf, choosing the best match at every layer.
///
/// Returns one [`ScoredNode`] per layer visited. Fails with
/// [`Error::EmptyCandidateSet`] when the tree has no roots or a chosen
/// non-leaf node has no children in the next layer.
pub fn descend(tree: &Tree, query: &[f32], model: &str) -> Result<Vec<ScoredNode>> {
    let mut path = Vec::with_capacity(tree.num_layers());
    let mut candidates = tree.root_nodes();
    let mut parent: Option<NodeIndex> = None;
    let mut layer = 0;

    loop {
        if candidates.is_empty() {
            return Err(Error::EmptyCandidateSet { parent, layer });
        }
        let chosen = best_match(query, candidates.iter().copied(), model)?;
        path.push(chosen);

        let node = tree.get(chosen.index)?;
        if node.is_leaf() {
            metrics::record_retrieval(path.len(), chosen.score);
            return Ok(path);
        }
        layer += 1;
        candidates = tree.children_in_layer(node, layer);
        parent = Some(node.index);
    }
}

/// Embeds `query_text` and descends `tree` with the result.
///
/// The embedding call is the only await point; the descent itself is synchronous.
pub async fn retrieve<E>(query_text: &str, tree: &Tree, embedder: &E, model: &str) -> Result<Retrieval>
where
    E: Embedder + ?Sized,
{
    let query_vector = embed_query(embedder, query_text).await?;
    let path = descend(tree, &query_vector, model)?;
    Ok(Retrieval { path, query_vector })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::PrecomputedEmbedder;
    use crate::storage::tree::tests::{three_layer_tree, MODEL};

    fn two_layer(root: &[f32], leaves: &[(NodeIndex, &[f32])]) -> Tree {
        let mut nodes = vec![Node::internal(0, "R", leaves.iter().map(|(i, _)| *i).collect())
            .with_embedding(MODEL, root.to_vec())];
        for (index, v) in leaves {
            nodes.push(Node::leaf(*index, "").with_embedding(MODEL, v.to_vec()));
        }
        let layers = vec![vec![0], leaves.iter().map(|(i, _)| *i).collect()];
        Tree::from_layers(nodes, layers).unwrap()
    }

    #[test]
    fn test_single_root_single_leaf() {
        let tree = two_layer(&[1.0, 0.0], &[(1, &[0.0, 1.0])]);
        for query in [[1.0, 0.0], [0.0, 1.0], [-3.0, 0.5]] {
            let path = descend(&tree, &query, MODEL).unwrap();
            let indices: Vec<_> = path.iter().map(|s| s.index).collect();
            assert_eq!(indices, vec![0, 1]);
        }
    }

    #[test]
    fn test_picks_closest_leaf() {
        let tree = two_layer(&[1.0, 0.0], &[(1, &[1.0, 0.0]), (2, &[0.0, 1.0])]);
        let path = descend(&tree, &[0.0, 1.0], MODEL).unwrap();
        assert_eq!(path.last().unwrap().index, 2);
        assert_eq!(path.last().unwrap().score, 1.0);
    }

    #[test]
    fn test_greedy_never_backtracks() {
        // Leaf 5 matches the query exactly, but its parent 2 loses to parent 1 at layer 1.
        let nodes = vec![
            Node::internal(0, "", vec![1, 2]).with_embedding(MODEL, vec![1.0, 1.0]),
            Node::internal(1, "", vec![3]).with_embedding(MODEL, vec![1.0, 0.1]),
            Node::internal(2, "", vec![5]).with_embedding(MODEL, vec![-1.0, 1.0]),
            Node::leaf(3, "").with_embedding(MODEL, vec![0.0, -1.0]),
            Node::leaf(5, "").with_embedding(MODEL, vec![0.9, 0.0]),
        ];
        let tree = Tree::from_layers(nodes, vec![vec![0], vec![1, 2], vec![3, 5]]).unwrap();
        let path = descend(&tree, &[0.9, 0.0], MODEL).unwrap();
        let indices: Vec<_> = path.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 3]);
    }

    #[test]
    fn test_three_layer_descent() {
        let tree = three_layer_tree();
        let path = descend(&tree, &[0.7, 0.75], MODEL).unwrap();
        let indices: Vec<_> = path.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 2, 5]);
    }

    #[test]
    fn test_empty_tree_has_no_candidates() {
        let err = descend(&Tree::default(), &[1.0], MODEL).unwrap_err();
        assert!(matches!(
            err,
            Error::EmptyCandidateSet {
                parent: None,
                layer: 0
            }
        ));
    }

    #[test]
    fn test_children_outside_next_layer() {
        // Root 0 points at 9, which does not exist, and at 2, which lives in layer 0.
        let nodes = vec![
            Node::internal(0, "", vec![9, 2]).with_embedding(MODEL, vec![1.0, 0.0]),
            Node::leaf(2, "").with_embedding(MODEL, vec![0.0, 1.0]),
            Node::leaf(3, "").with_embedding(MODEL, vec![0.0, 1.0]),
        ];
        let tree = Tree::from_layers(nodes, vec![vec![0, 2], vec![3]]).unwrap();
        let err = descend(&tree, &[1.0, 0.0], MODEL).unwrap_err();
        assert!(matches!(
            err,
            Error::EmptyCandidateSet {
                parent: Some(0),
                layer: 1
            }
        ));
        assert!(err.is_structural());
    }

    #[test]
    fn test_internal_node_in_deepest_layer() {
        let nodes = vec![
            Node::internal(0, "", vec![1]).with_embedding(MODEL, vec![1.0]),
            Node::internal(1, "", vec![0]).with_embedding(MODEL, vec![1.0]),
        ];
        let tree = Tree::from_layers(nodes, vec![vec![0], vec![1]]).unwrap();
        assert!(matches!(
            descend(&tree, &[1.0], MODEL),
            Err(Error::EmptyCandidateSet {
                parent: Some(1),
                layer: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_retrieve_embeds_then_descends() {
        let tree = two_layer(&[1.0, 0.0], &[(1, &[1.0, 0.0]), (2, &[0.0, 1.0])]);
        let embedder = PrecomputedEmbedder::new("t").with("which is B?", vec![0.0, 1.0]);

        let retrieval = retrieve("which is B?", &tree, &embedder, MODEL).await.unwrap();
        assert_eq!(retrieval.indices(), vec![0, 2]);
        assert_eq!(retrieval.leaf(), Some(2));
        assert_eq!(retrieval.query_vector, vec![0.0, 1.0]);
        let nodes = retrieval.nodes(&tree).unwrap();
        assert!(nodes[1].is_leaf());

        let err = retrieve("unknown", &tree, &embedder, MODEL).await.unwrap_err();
        assert!(matches!(err, Error::EmbeddingService(_)));
    }
}
