//! Tag trees for packet-header coding (ISO/IEC 15444-1 B.10.2).
//!
//! A tag tree codes a 2D array of non-negative integers (first-inclusion
//! layers, missing bit-plane counts) as a quad-tree of running minima. Only
//! the decode direction is needed here.

use crate::error::J2kError;
use crate::reader::PacketBitReader;

pub struct TagTree {
    nodes: Vec<TagTreeNode>,
    leaf_width: usize,
    leaf_height: usize,
}

#[derive(Clone, Default, Debug)]
struct TagTreeNode {
    /// Decoded value once `known`, otherwise the running lower bound.
    value: u32,
    /// Lower bound already established by previous decode calls.
    low: u32,
    known: bool,
    parent: Option<usize>,
}

impl TagTree {
    /// Create a tree for a grid of `w` x `h` leaves. Levels halve in each
    /// dimension up to a single root.
    pub fn new(w: usize, h: usize) -> Self {
        let mut nodes: Vec<TagTreeNode> = Vec::new();
        let mut level_start = 0;
        let mut level_w = w.max(1);
        let mut level_h = h.max(1);

        nodes.resize_with(level_w * level_h, TagTreeNode::default);

        while level_w > 1 || level_h > 1 {
            let next_w = level_w.div_ceil(2);
            let next_h = level_h.div_ceil(2);
            let next_start = nodes.len();
            nodes.resize_with(next_start + next_w * next_h, TagTreeNode::default);

            for y in 0..level_h {
                for x in 0..level_w {
                    let child = level_start + y * level_w + x;
                    let parent = next_start + (y / 2) * next_w + x / 2;
                    nodes[child].parent = Some(parent);
                }
            }

            level_start = next_start;
            level_w = next_w;
            level_h = next_h;
        }

        Self {
            nodes,
            leaf_width: w.max(1),
            leaf_height: h.max(1),
        }
    }

    /// Forget all decoded state (new tile).
    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.value = 0;
            node.low = 0;
            node.known = false;
        }
    }

    /// Decode the leaf at (x, y) up to `threshold`.
    ///
    /// Returns the exact leaf value if it resolved below the threshold,
    /// otherwise the established lower bound (>= threshold). Callers test
    /// `result < threshold` for the inclusion decision and pass `u32::MAX`
    /// to force full resolution.
    pub fn decode(
        &mut self,
        reader: &mut PacketBitReader,
        x: usize,
        y: usize,
        threshold: u32,
    ) -> Result<u32, J2kError> {
        debug_assert!(x < self.leaf_width && y < self.leaf_height);
        let leaf = y * self.leaf_width + x;

        // Collect the root-to-leaf path.
        let mut path = Vec::new();
        let mut index = leaf;
        loop {
            path.push(index);
            match self.nodes[index].parent {
                Some(parent) => index = parent,
                None => break,
            }
        }

        // Walk down, carrying the bound established by each ancestor: a
        // child's value can never be smaller than its parent's.
        let mut low = 0u32;
        for &index in path.iter().rev() {
            let node = &mut self.nodes[index];
            if low > node.low {
                node.low = low;
                if !node.known {
                    node.value = node.value.max(low);
                }
            } else {
                low = node.low;
            }

            while !node.known && low < threshold {
                // Bit 0: the value exceeds the current bound. Bit 1: the
                // value equals it.
                if reader.read_bit()? == 1 {
                    node.value = low;
                    node.known = true;
                } else {
                    low += 1;
                    node.value = low;
                }
            }
            node.low = low;
            if node.known {
                low = node.value;
            }
        }

        let leaf_node = &self.nodes[leaf];
        Ok(if leaf_node.known {
            leaf_node.value
        } else {
            leaf_node.low
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::PacketBitReader;

    #[test]
    fn tree_shape() {
        let tree = TagTree::new(3, 3);
        // 9 leaves + 4 mid + 1 root.
        assert_eq!(tree.nodes.len(), 14);
        assert_eq!(tree.nodes[0].parent, Some(9));
        assert_eq!(tree.nodes[8].parent, Some(12));
        assert_eq!(tree.nodes[13].parent, None);
    }

    #[test]
    fn decode_two_leaf_tree() {
        // Leaves (1, 2) in a 2x1 grid; root minimum is 1.
        //
        // Coding leaf 0 against threshold 2:
        //   root:  0 (value > 0), 1 (value == 1)
        //   leaf0: 1 (value == 1)
        // Coding leaf 1 against threshold 2:
        //   leaf1: 0 (value > 1, bound reaches threshold)
        // Bit sequence: 0 1 1 0 -> 0b0110_0000.
        let data = [0b0110_0000];
        let mut reader = PacketBitReader::new(&data);
        let mut tree = TagTree::new(2, 1);

        let v0 = tree.decode(&mut reader, 0, 0, 2).unwrap();
        assert_eq!(v0, 1);

        let v1 = tree.decode(&mut reader, 1, 0, 2).unwrap();
        assert!(v1 >= 2);
    }

    #[test]
    fn decode_resumes_from_established_bound() {
        // Same tree as above; after the threshold-2 pass, resolving leaf 1
        // fully only needs its remaining bits: 1 (value == 2).
        let data = [0b0110_1000];
        let mut reader = PacketBitReader::new(&data);
        let mut tree = TagTree::new(2, 1);

        assert_eq!(tree.decode(&mut reader, 0, 0, 2).unwrap(), 1);
        assert!(tree.decode(&mut reader, 1, 0, 2).unwrap() >= 2);
        assert_eq!(tree.decode(&mut reader, 1, 0, u32::MAX).unwrap(), 2);
    }

    #[test]
    fn single_leaf_tree() {
        // One leaf, value 3: bits 0 0 0 1.
        let data = [0b0001_0000];
        let mut reader = PacketBitReader::new(&data);
        let mut tree = TagTree::new(1, 1);
        assert_eq!(tree.decode(&mut reader, 0, 0, u32::MAX).unwrap(), 3);
    }
}
