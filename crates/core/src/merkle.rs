//! Merkle tree implementation for transaction roots.
//!
//! Parents hash their two children in sorted order (smaller digest first), so
//! an inclusion proof is only the list of sibling digests: verification never
//! needs to know whether a sibling sat on the left or on the right.

use crate::hash::{hash, hash_concat, Hash};
use thiserror::Error;

/// Errors raised while building or querying a merkle tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleError {
    #[error("cannot build a merkle tree from zero leaves")]
    EmptyInput,

    #[error("leaf {0} is not part of this tree")]
    LeafNotFound(Hash),

    #[error("merkle tree construction exceeded {limit} levels")]
    Overflow { limit: usize },
}

pub type Result<T> = std::result::Result<T, MerkleError>;

/// One proof element: the sibling digest, or `None` when the node was not paired.
pub type ProofStep = Option<Hash>;

/// A node of the tree. Children are owned exclusively by their parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleNode {
    /// Digest held by this node.
    pub value: Hash,
    pub left: Option<Box<MerkleNode>>,
    pub right: Option<Box<MerkleNode>>,
    /// True for nodes duplicated to even out an odd level.
    pub is_padding: bool,
}

impl MerkleNode {
    fn leaf(value: Hash) -> Self {
        Self {
            value,
            left: None,
            right: None,
            is_padding: false,
        }
    }

    fn parent(left: MerkleNode, right: MerkleNode) -> Self {
        Self {
            value: hash_pair(&left.value, &right.value),
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
            is_padding: false,
        }
    }

    fn padding_copy(&self) -> Self {
        let mut copy = self.clone();
        copy.is_padding = true;
        copy
    }

    /// Check if node is a leaf.
    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }
}

/// Hash two digests, smaller one first.
pub fn hash_pair(a: &Hash, b: &Hash) -> Hash {
    if a <= b {
        hash_concat(&[a.as_ref(), b.as_ref()])
    } else {
        hash_concat(&[b.as_ref(), a.as_ref()])
    }
}

/// Digest stored in the leaf node for a leaf value.
pub fn leaf_hash(value: &Hash) -> Hash {
    hash(value.as_ref())
}

/// Upper bound on pairing rounds for `leaf_count` leaves: `ceil(log2(n)) + 1`.
fn max_rounds(leaf_count: usize) -> usize {
    leaf_count.next_power_of_two().trailing_zeros() as usize + 1
}

/// A binary merkle tree with sorted-pair hashing and last-node padding.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    root: MerkleNode,
    leaf_count: usize,
    depth: usize,
}

impl MerkleTree {
    /// Build a tree over `leaf_values`, level by level.
    pub fn build(leaf_values: &[Hash]) -> Result<Self> {
        if leaf_values.is_empty() {
            return Err(MerkleError::EmptyInput);
        }

        let limit = max_rounds(leaf_values.len());
        let mut level: Vec<MerkleNode> = leaf_values
            .iter()
            .map(|value| MerkleNode::leaf(leaf_hash(value)))
            .collect();
        let mut depth = 0;

        loop {
            if level.len() % 2 == 1 {
                if let Some(last) = level.last() {
                    let padding = last.padding_copy();
                    level.push(padding);
                }
            }

            let mut next = Vec::with_capacity(level.len() / 2);
            let mut nodes = level.into_iter();
            while let (Some(left), Some(right)) = (nodes.next(), nodes.next()) {
                next.push(MerkleNode::parent(left, right));
            }
            level = next;

            depth += 1;
            if depth > limit {
                return Err(MerkleError::Overflow { limit });
            }
            if level.len() == 1 {
                break;
            }
        }

        let root = level.pop().ok_or(MerkleError::EmptyInput)?;
        Ok(Self {
            root,
            leaf_count: leaf_values.len(),
            depth,
        })
    }

    /// Get the root digest.
    pub fn root_hash(&self) -> Hash {
        self.root.value
    }

    /// Get the root node.
    pub fn root(&self) -> &MerkleNode {
        &self.root
    }

    /// Number of leaves the tree was built from (padding excluded).
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Number of levels above the leaves.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Build the inclusion proof for `leaf_value`, ordered from leaf to root.
    pub fn proof(&self, leaf_value: &Hash) -> Result<Vec<ProofStep>> {
        let target = leaf_hash(leaf_value);

        // Depth-first, left before right, so an original leaf wins over its padding copy.
        let mut stack: Vec<(&MerkleNode, Vec<ProofStep>)> = vec![(&self.root, Vec::new())];
        while let Some((node, mut path)) = stack.pop() {
            match (node.left.as_deref(), node.right.as_deref()) {
                (None, None) => {
                    if node.value == target {
                        path.reverse();
                        return Ok(path);
                    }
                }
                (Some(left), Some(right)) => {
                    let mut right_path = path.clone();
                    right_path.push(Some(left.value));
                    stack.push((right, right_path));

                    path.push(Some(right.value));
                    stack.push((left, path));
                }
                (Some(only), None) | (None, Some(only)) => {
                    path.push(None);
                    stack.push((only, path));
                }
            }
        }

        Err(MerkleError::LeafNotFound(*leaf_value))
    }

    /// Verify a proof against this tree's root.
    pub fn verify(&self, leaf_value: &Hash, proof: &[ProofStep]) -> bool {
        verify_proof(leaf_value, proof, &self.root_hash())
    }
}

/// Verify that `leaf` is included under `root`.
pub fn verify_proof(leaf: &Hash, proof: &[ProofStep], root: &Hash) -> bool {
    let mut current = leaf_hash(leaf);
    for sibling in proof.iter().flatten() {
        current = hash_pair(&current, sibling);
    }
    current == *root
}

/// Compute the merkle root of a list of hashes.
///
/// Returns the zero hash if the list is empty.
pub fn merkle_root(hashes: &[Hash]) -> Result<Hash> {
    if hashes.is_empty() {
        return Ok(Hash::ZERO);
    }
    Ok(MerkleTree::build(hashes)?.root_hash())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_hashes(n: usize) -> Vec<Hash> {
        (0..n).map(|i| hash(&[i as u8])).collect()
    }

    #[test]
    fn test_merkle_root_empty() {
        assert_eq!(merkle_root(&[]).unwrap(), Hash::ZERO);
        assert_eq!(MerkleTree::build(&[]).unwrap_err(), MerkleError::EmptyInput);
    }

    #[test]
    fn test_single_leaf_is_padded() {
        let hashes = make_hashes(1);
        let tree = MerkleTree::build(&hashes).unwrap();
        let leaf = leaf_hash(&hashes[0]);

        assert_eq!(tree.root_hash(), hash_pair(&leaf, &leaf));
        assert!(tree.root().right.as_ref().unwrap().is_padding);
        assert!(!tree.root().left.as_ref().unwrap().is_padding);
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn test_two_leaves() {
        let hashes = make_hashes(2);
        let tree = MerkleTree::build(&hashes).unwrap();
        let expected = hash_pair(&leaf_hash(&hashes[0]), &leaf_hash(&hashes[1]));
        assert_eq!(tree.root_hash(), expected);
    }

    #[test]
    fn test_pair_hash_is_order_independent() {
        let a = hash(b"a");
        let b = hash(b"b");
        assert_eq!(hash_pair(&a, &b), hash_pair(&b, &a));
    }

    #[test]
    fn test_odd_padding_equivalence() {
        let hashes = make_hashes(3);
        let padded = vec![hashes[0], hashes[1], hashes[2], hashes[2]];

        let three = MerkleTree::build(&hashes).unwrap();
        let four = MerkleTree::build(&padded).unwrap();
        assert_eq!(three.root_hash(), four.root_hash());
    }

    #[test]
    fn test_proofs_for_small_trees() {
        for n in 1..=5 {
            let hashes = make_hashes(n);
            let tree = MerkleTree::build(&hashes).unwrap();
            let root = tree.root_hash();

            for leaf in &hashes {
                let proof = tree.proof(leaf).unwrap();
                assert!(verify_proof(leaf, &proof, &root), "n={n}");
                assert!(tree.verify(leaf, &proof));
            }
        }
    }

    #[test]
    fn test_proof_length_matches_depth() {
        let hashes = make_hashes(5);
        let tree = MerkleTree::build(&hashes).unwrap();
        assert_eq!(tree.depth(), 3);
        for leaf in &hashes {
            assert_eq!(tree.proof(leaf).unwrap().len(), 3);
        }
    }

    #[test]
    fn test_depth_bound() {
        for n in [1usize, 2, 3, 4, 5, 8, 9, 100, 256] {
            let tree = MerkleTree::build(&make_hashes(n)).unwrap();
            assert!(tree.depth() <= max_rounds(tree.leaf_count()));
        }
    }

    #[test]
    fn test_leaf_not_found() {
        let tree = MerkleTree::build(&make_hashes(4)).unwrap();
        let missing = hash(b"missing");
        assert_eq!(
            tree.proof(&missing).unwrap_err(),
            MerkleError::LeafNotFound(missing)
        );
    }

    #[test]
    fn test_wrong_root_rejected() {
        let hashes = make_hashes(4);
        let tree = MerkleTree::build(&hashes).unwrap();
        let proof = tree.proof(&hashes[0]).unwrap();

        assert!(!verify_proof(&hashes[0], &proof, &hash(b"wrong")));
    }

    #[test]
    fn test_tampered_proof_rejected() {
        let hashes = make_hashes(4);
        let tree = MerkleTree::build(&hashes).unwrap();
        let mut proof = tree.proof(&hashes[1]).unwrap();
        proof[0] = Some(hash(b"forged sibling"));

        assert!(!tree.verify(&hashes[1], &proof));
    }

    #[test]
    fn test_proof_for_other_leaf_rejected() {
        let hashes = make_hashes(4);
        let tree = MerkleTree::build(&hashes).unwrap();
        let proof = tree.proof(&hashes[0]).unwrap();

        assert!(!tree.verify(&hashes[3], &proof));
    }

    #[test]
    fn test_unpaired_step_is_skipped() {
        let leaf = hash(b"leaf");
        let sibling = hash(b"sibling");
        let root = hash_pair(&leaf_hash(&leaf), &sibling);

        assert!(verify_proof(&leaf, &[None, Some(sibling), None], &root));
    }

    #[test]
    fn test_order_matters_for_root() {
        let hashes = make_hashes(4);
        let mut swapped = hashes.clone();
        swapped.swap(1, 2);

        assert_ne!(
            merkle_root(&hashes).unwrap(),
            merkle_root(&swapped).unwrap()
        );
    }
}
