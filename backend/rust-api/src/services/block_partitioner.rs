use std::ops::Range;
use thiserror::Error;

/// Block sizes of the standard simulado: 8 + 6 + 6 + 4 = 24 questions.
pub const STANDARD_BLOCKS: [usize; 4] = [8, 6, 6, 4];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockStructureError {
    #[error("block structure must contain at least one block")]
    Empty,
    #[error("block {block} has size zero")]
    ZeroSizedBlock { block: usize },
}

/// Fixed partition of the question sequence into 1-based blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStructure {
    sizes: Vec<usize>,
    // bounds[i] = exclusive end of block i + 1
    bounds: Vec<usize>,
}

impl BlockStructure {
    pub fn new(sizes: Vec<usize>) -> Result<Self, BlockStructureError> {
        if sizes.is_empty() {
            return Err(BlockStructureError::Empty);
        }
        if let Some(position) = sizes.iter().position(|size| *size == 0) {
            return Err(BlockStructureError::ZeroSizedBlock {
                block: position + 1,
            });
        }

        let bounds = sizes
            .iter()
            .scan(0usize, |acc, size| {
                *acc += size;
                Some(*acc)
            })
            .collect();

        Ok(Self { sizes, bounds })
    }

    pub fn standard() -> Self {
        Self::new(STANDARD_BLOCKS.to_vec()).expect("standard block structure is valid")
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn block_count(&self) -> usize {
        self.sizes.len()
    }

    pub fn total_questions(&self) -> usize {
        self.bounds.last().copied().unwrap_or(0)
    }

    /// Size of `block`, zero for a block number that does not exist.
    pub fn block_size(&self, block: usize) -> usize {
        if self.is_valid_block(block) {
            self.sizes[block - 1]
        } else {
            0
        }
    }

    /// First index of `block`. Block 0 maps to 0, blocks past the end to the total.
    pub fn block_start(&self, block: usize) -> usize {
        if block <= 1 {
            0
        } else if block > self.block_count() {
            self.total_questions()
        } else {
            self.bounds[block - 2]
        }
    }

    /// Exclusive end of `block`.
    pub fn block_end(&self, block: usize) -> usize {
        self.block_start(block) + self.block_size(block)
    }

    pub fn block_range(&self, block: usize) -> Range<usize> {
        self.block_start(block)..self.block_end(block)
    }

    /// Block containing `index`. Out-of-range indices are clamped to block 1.
    pub fn block_of(&self, index: usize) -> usize {
        match self.bounds.iter().position(|end| index < *end) {
            Some(position) => position + 1,
            None => {
                tracing::warn!(
                    "Question index {} is outside the block structure ({} questions), using block 1",
                    index,
                    self.total_questions()
                );
                1
            }
        }
    }

    pub fn is_valid_block(&self, block: usize) -> bool {
        block >= 1 && block <= self.block_count()
    }

    pub fn is_last_block(&self, block: usize) -> bool {
        block == self.block_count()
    }

    /// True when `index` is the final question of the block that contains it.
    pub fn is_last_in_block(&self, index: usize) -> bool {
        index + 1 == self.block_end(self.block_of(index))
    }
}

impl Default for BlockStructure {
    fn default() -> Self {
        Self::standard()
    }
}
