use crate::error::Result;
use crate::jpeg2000::bit_io::{J2kBitReader, J2kBitWriter};

/// Tag Tree for JPEG 2000 Packet Header coding (B.10.2).
/// Represents a quad-tree over a grid of code-blocks, used for the inclusion
/// layer and the number of missing bit-planes. Unknown values are `i32::MAX`.
#[derive(Debug, Clone)]
pub struct TagTree {
    nodes: Vec<TagTreeNode>,
    leaf_width: usize,
    leaf_height: usize,
}

#[derive(Clone, Debug)]
struct TagTreeNode {
    value: i32,
    low: i32,
    known: bool,
    parent_index: Option<usize>,
}

impl Default for TagTreeNode {
    fn default() -> Self {
        Self {
            value: i32::MAX,
            low: 0,
            known: false,
            parent_index: None,
        }
    }
}

impl TagTree {
    /// Create a new TagTree for a grid of `w` x `h` leaves.
    pub fn new(w: usize, h: usize) -> Self {
        let mut nodes = vec![TagTreeNode::default(); w * h];
        let mut level_start = 0;
        let (mut level_w, mut level_h) = (w, h);

        while level_w > 1 || level_h > 1 {
            let next_w = level_w.div_ceil(2);
            let next_h = level_h.div_ceil(2);
            let next_start = nodes.len();
            nodes.resize(next_start + next_w * next_h, TagTreeNode::default());
            for y in 0..level_h {
                for x in 0..level_w {
                    nodes[level_start + y * level_w + x].parent_index =
                        Some(next_start + (y / 2) * next_w + x / 2);
                }
            }
            level_w = next_w;
            level_h = next_h;
            level_start = next_start;
        }

        Self {
            nodes,
            leaf_width: w,
            leaf_height: h,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_width == 0 || self.leaf_height == 0
    }

    fn leaf(&self, x: usize, y: usize) -> usize {
        debug_assert!(x < self.leaf_width && y < self.leaf_height);
        y * self.leaf_width + x
    }

    fn path(&self, leaf: usize) -> Vec<usize> {
        let mut path = vec![leaf];
        let mut idx = leaf;
        while let Some(parent) = self.nodes[idx].parent_index {
            path.push(parent);
            idx = parent;
        }
        path
    }

    /// Lowers the value of leaf (x, y). Ancestors keep the minimum of their
    /// children, so values may be set as they become known.
    pub fn set_value(&mut self, x: usize, y: usize, value: i32) {
        let mut idx = Some(self.leaf(x, y));
        while let Some(i) = idx {
            if self.nodes[i].value <= value {
                break;
            }
            self.nodes[i].value = value;
            idx = self.nodes[i].parent_index;
        }
    }

    pub fn value(&self, x: usize, y: usize) -> i32 {
        self.nodes[self.leaf(x, y)].value
    }

    /// Encodes whether the value of leaf (x, y) is below `threshold`.
    pub fn encode(&mut self, writer: &mut J2kBitWriter, x: usize, y: usize, threshold: i32) {
        let path = self.path(self.leaf(x, y));
        let mut low = 0;
        for &i in path.iter().rev() {
            let node = &mut self.nodes[i];
            if low > node.low {
                node.low = low;
            } else {
                low = node.low;
            }
            while low < threshold {
                if low >= node.value {
                    if !node.known {
                        writer.write_bit(1);
                        node.known = true;
                    }
                    break;
                }
                writer.write_bit(0);
                low += 1;
            }
            node.low = low;
        }
    }

    /// Decodes up to `threshold` for leaf (x, y). Returns whether its value is
    /// below `threshold`.
    pub fn decode(&mut self, reader: &mut J2kBitReader, x: usize, y: usize, threshold: i32) -> Result<bool> {
        let leaf = self.leaf(x, y);
        let path = self.path(leaf);
        let mut low = 0;
        for &i in path.iter().rev() {
            let node = &mut self.nodes[i];
            if low > node.low {
                node.low = low;
            } else {
                low = node.low;
            }
            while low < threshold && low < node.value {
                if reader.read_bit()? == 1 {
                    node.value = low;
                } else {
                    low += 1;
                }
            }
            node.low = low;
        }
        Ok(self.nodes[leaf].value < threshold)
    }

    /// Decodes the complete value of leaf (x, y).
    pub fn decode_value(&mut self, reader: &mut J2kBitReader, x: usize, y: usize) -> Result<i32> {
        self.decode(reader, x, y, i32::MAX)?;
        Ok(self.value(x, y))
    }
}
