use crate::{
    cell::CellId,
    quadtree::TerrainBlock,
    result::{TerrainError, TerrainResult},
};
use slab::Slab;

/// Pool of the [`TerrainBlock`]s of one cell.
///
/// Blocks are addressed by their slab index. Emptying the pool bumps its epoch, which
/// invalidates every [`BlockRef`](crate::quadtree::BlockRef) handed out before.
pub struct BlockAllocator {
    blocks: Slab<TerrainBlock>,
    capacity: Option<usize>,
    epoch: u32,
}

impl BlockAllocator {
    pub fn new(capacity: Option<usize>, epoch: u32) -> Self {
        Self {
            blocks: Slab::with_capacity(capacity.unwrap_or(0).min(1024)),
            capacity,
            epoch,
        }
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of blocks that can still be allocated, `None` if the pool is unbounded.
    pub fn remaining(&self) -> Option<usize> {
        self.capacity
            .map(|capacity| capacity.saturating_sub(self.blocks.len()))
    }

    /// Fails if fewer than `count` blocks can still be allocated.
    pub fn reserve(&self, cell: CellId, count: usize) -> TerrainResult<()> {
        match (self.capacity, self.remaining()) {
            (Some(capacity), Some(remaining)) if remaining < count => {
                Err(TerrainError::OutOfBlocks { cell, capacity })
            }
            _ => Ok(()),
        }
    }

    pub fn alloc(&mut self, cell: CellId, block: TerrainBlock) -> TerrainResult<usize> {
        self.reserve(cell, 1)?;
        Ok(self.blocks.insert(block))
    }

    pub fn free(&mut self, index: usize) -> Option<TerrainBlock> {
        self.blocks.try_remove(index)
    }

    /// Releases all blocks at once and starts a new epoch.
    pub fn empty(&mut self, epoch: u32) {
        self.blocks.clear();
        self.epoch = epoch;
    }

    pub fn get(&self, index: usize) -> Option<&TerrainBlock> {
        self.blocks.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut TerrainBlock> {
        self.blocks.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &TerrainBlock)> {
        self.blocks.iter()
    }
}
