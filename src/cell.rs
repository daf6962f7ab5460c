//! Render data of the terrain cells and the forest of their block quadtrees.

use crate::{
    config::{floor_power_of_two, TerrainRenderProperties},
    math::Side,
    quadtree::{BlockAllocator, BlockRef, TerrainBlock},
    render::splatting::SplatLayers,
    result::{TerrainError, TerrainResult},
    terrain_data::TerrainCellData,
};
use bevy::prelude::*;
use derive_more::derive::Display;
use slab::Slab;
use std::sync::Arc;

/// Identifies a loaded cell inside a [`TerrainCells`] forest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("#{_0}")]
pub struct CellId(pub(crate) usize);

/// Everything the renderer keeps per loaded cell.
pub struct TerrainCellRData {
    pub(crate) data: Arc<dyn TerrainCellData>,
    pub(crate) properties: TerrainRenderProperties,
    pub(crate) block_resolution: usize,
    pub(crate) root: Option<BlockRef>,
    pub(crate) neighbours: [Option<CellId>; 4],
    pub(crate) allocator: BlockAllocator,
    pub(crate) splat: SplatLayers,
}

impl TerrainCellRData {
    pub fn data(&self) -> &Arc<dyn TerrainCellData> {
        &self.data
    }

    pub fn properties(&self) -> &TerrainRenderProperties {
        &self.properties
    }

    /// Number of quads along each side of a leaf block, after clamping to the grid.
    pub fn block_resolution(&self) -> usize {
        self.block_resolution
    }

    pub fn root(&self) -> Option<BlockRef> {
        self.root
    }

    pub fn neighbour(&self, side: Side) -> Option<CellId> {
        self.neighbours[side.index()]
    }

    pub fn block_count(&self) -> usize {
        self.allocator.len()
    }

    pub fn splat_layers(&self) -> &SplatLayers {
        &self.splat
    }
}

/// The largest power of two block resolution not above `requested` that still fits the grid.
pub(crate) fn clamp_block_resolution(requested: u32, grid_width: usize, grid_height: usize) -> usize {
    let max_resolution = floor_power_of_two((grid_width - 1).min(grid_height - 1));
    let requested = floor_power_of_two(requested as usize).max(2);

    if requested > max_resolution {
        warn!(
            "Block resolution {requested} exceeds the {grid_width}x{grid_height} grid, using {max_resolution}."
        );
    }

    requested.min(max_resolution)
}

/// Finds the side of `cell` at which `other` lies, if the two cells share an edge.
///
/// Positions and sizes are compared exactly, cells are expected to be laid out on a regular grid.
#[allow(clippy::float_cmp)]
pub fn match_cell(cell: &dyn TerrainCellData, other: &dyn TerrainCellData) -> Option<Side> {
    let (position, size) = (cell.position(), cell.size());
    let (other_position, other_size) = (other.position(), other.size());
    let size_sum = (size + other_size) / 2.0;

    if position.x == other_position.x && size.z == other_size.z {
        if position.y == other_position.y - size_sum.z {
            return Some(Side::Top);
        }
        if position.y == other_position.y + size_sum.z {
            return Some(Side::Bottom);
        }
    } else if position.y == other_position.y && size.x == other_size.x {
        if position.x == other_position.x + size_sum.x {
            return Some(Side::Left);
        }
        if position.x == other_position.x - size_sum.x {
            return Some(Side::Right);
        }
    }

    None
}

/// All loaded cells and the block forest spanning them.
#[derive(Default)]
pub struct TerrainCells {
    cells: Slab<TerrainCellRData>,
    next_epoch: u32,
}

impl TerrainCells {
    fn next_epoch(&mut self) -> u32 {
        self.next_epoch = self.next_epoch.wrapping_add(1);
        self.next_epoch
    }

    /// Registers a cell without building or connecting its quadtree.
    ///
    /// The grid must be square with a power of two number of quads per side, so that every
    /// level of the quadtree halves it evenly.
    pub fn insert(
        &mut self,
        data: Arc<dyn TerrainCellData>,
        properties: TerrainRenderProperties,
    ) -> TerrainResult<CellId> {
        let (width, height) = (data.grid_width(), data.grid_height());
        if width < 3 || width != height || !(width - 1).is_power_of_two() {
            return Err(TerrainError::InvalidGrid { width, height });
        }

        let properties = properties.normalized();
        let block_resolution = clamp_block_resolution(properties.block_resolution, width, height);
        let allocator = BlockAllocator::new(properties.max_blocks_per_cell, self.next_epoch());

        let index = self.cells.insert(TerrainCellRData {
            data,
            properties,
            block_resolution,
            root: None,
            neighbours: [None; 4],
            allocator,
            splat: SplatLayers::default(),
        });

        Ok(CellId(index))
    }

    /// Disconnects the cell from its neighbours and drops its render data.
    pub fn remove(&mut self, cell: CellId) -> Option<TerrainCellRData> {
        if !self.cells.contains(cell.0) {
            return None;
        }

        self.disconnect_cell(cell);
        self.cells.try_remove(cell.0)
    }

    pub fn get(&self, cell: CellId) -> Option<&TerrainCellRData> {
        self.cells.get(cell.0)
    }

    pub fn get_mut(&mut self, cell: CellId) -> Option<&mut TerrainCellRData> {
        self.cells.get_mut(cell.0)
    }

    pub(crate) fn cell(&self, cell: CellId) -> TerrainResult<&TerrainCellRData> {
        self.get(cell).ok_or(TerrainError::UnknownCell(cell))
    }

    pub(crate) fn cell_mut(&mut self, cell: CellId) -> TerrainResult<&mut TerrainCellRData> {
        self.get_mut(cell).ok_or(TerrainError::UnknownCell(cell))
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellId, &TerrainCellRData)> {
        self.cells.iter().map(|(index, cell)| (CellId(index), cell))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Resolves a block reference, `None` if the block has been freed since.
    pub fn block(&self, block: BlockRef) -> Option<&TerrainBlock> {
        let cell = self.cells.get(block.cell.0)?;
        if cell.allocator.epoch() != block.epoch {
            return None;
        }
        cell.allocator.get(block.index)
    }

    pub(crate) fn block_mut(&mut self, block: BlockRef) -> Option<&mut TerrainBlock> {
        let cell = self.cells.get_mut(block.cell.0)?;
        if cell.allocator.epoch() != block.epoch {
            return None;
        }
        cell.allocator.get_mut(block.index)
    }

    pub(crate) fn alloc_block(
        &mut self,
        cell: CellId,
        block: TerrainBlock,
    ) -> TerrainResult<BlockRef> {
        let allocator = &mut self.cell_mut(cell)?.allocator;
        let index = allocator.alloc(cell, block)?;

        Ok(BlockRef {
            cell,
            index,
            epoch: allocator.epoch(),
        })
    }

    pub(crate) fn free_block(&mut self, block: BlockRef) {
        if self.block(block).is_some() {
            if let Some(cell) = self.cells.get_mut(block.cell.0) {
                cell.allocator.free(block.index);
            }
        }
    }

    pub fn root(&self, cell: CellId) -> Option<BlockRef> {
        self.get(cell)?
            .root
            .filter(|&root| self.block(root).is_some())
    }

    /// The neighbour of `block` on `side`, ignoring pointers to freed blocks.
    pub fn neighbour(&self, block: BlockRef, side: Side) -> Option<BlockRef> {
        self.block(block)?
            .neighbour(side)
            .filter(|&neighbour| self.block(neighbour).is_some())
    }

    pub(crate) fn set_neighbour(&mut self, block: BlockRef, side: Side, neighbour: Option<BlockRef>) {
        if let Some(block) = self.block_mut(block) {
            block.neighbours[side.index()] = neighbour;
        }
    }

    pub fn children(&self, block: BlockRef) -> Option<[BlockRef; 4]> {
        self.block(block)?.children
    }

    /// Blocks that no longer exist count as leaves.
    pub fn is_leaf(&self, block: BlockRef) -> bool {
        self.block(block).map_or(true, TerrainBlock::is_leaf)
    }

    /// All leaves of the quadtree of `cell`, depth first.
    pub fn leaves(&self, cell: CellId) -> Vec<BlockRef> {
        let mut leaves = Vec::new();
        let mut stack: Vec<BlockRef> = self.root(cell).into_iter().collect();

        while let Some(block) = stack.pop() {
            match self.children(block) {
                Some(children) => stack.extend(children.into_iter().rev()),
                None => leaves.push(block),
            }
        }

        leaves
    }

    /// Creates the root block of `cell` if it does not exist yet.
    pub fn setup_root(&mut self, cell: CellId) -> TerrainResult<BlockRef> {
        if let Some(root) = self.root(cell) {
            return Ok(root);
        }

        let cell_data = self.cell(cell)?;
        let data = &cell_data.data;
        let (position, size) = (data.position(), data.size());
        let grid_right = data.grid_width() - 1;
        let grid_bottom = data.grid_height() - 1;
        let step_size = grid_right / cell_data.block_resolution;

        let root = TerrainBlock::root(
            position + Vec2::new(size.x, size.z) / 2.0,
            Vec2::new(size.x, size.z),
            grid_right,
            grid_bottom,
            step_size,
        );

        let root = self.alloc_block(cell, root)?;
        self.cell_mut(cell)?.root = Some(root);

        Ok(root)
    }

    /// Links `cell` to `other`, which lies on the given `side` of it.
    pub fn connect_cell(&mut self, cell: CellId, other: CellId, side: Side) -> TerrainResult<()> {
        for id in [cell, other] {
            if let Some(root) = self.root(id) {
                self.merge(root);
            }
        }

        self.cell_mut(cell)?.neighbours[side.index()] = Some(other);
        self.cell_mut(other)?.neighbours[side.opposite().index()] = Some(cell);

        let root = self.setup_root(cell)?;
        let other_root = self.setup_root(other)?;
        self.set_neighbour(root, side, Some(other_root));
        self.set_neighbour(other_root, side.opposite(), Some(root));

        info!("Connected terrain cell {cell} to {other} on its {side:?} side.");

        Ok(())
    }

    /// Unlinks `cell` from all neighbouring cells and releases its quadtree.
    pub fn disconnect_cell(&mut self, cell: CellId) {
        if let Some(root) = self.root(cell) {
            self.disconnect(root);
        }

        let epoch = self.next_epoch();
        let Some(cell_data) = self.cells.get_mut(cell.0) else {
            return;
        };
        let neighbours = std::mem::take(&mut cell_data.neighbours);
        cell_data.root = None;
        cell_data.allocator.empty(epoch);

        for side in Side::ALL {
            let Some(neighbour) = neighbours[side.index()] else {
                continue;
            };
            if let Some(neighbour) = self.cells.get_mut(neighbour.0) {
                let back = &mut neighbour.neighbours[side.opposite().index()];
                if *back == Some(cell) {
                    *back = None;
                }
            }
        }
    }

    /// Applies new render properties to `cell`.
    ///
    /// A changed block resolution rebuilds the quadtree and reconnects the cell.
    pub fn set_properties(
        &mut self,
        cell: CellId,
        properties: TerrainRenderProperties,
    ) -> TerrainResult<()> {
        let cell_data = self.cell_mut(cell)?;
        let properties = properties.normalized();
        let (width, height) = (cell_data.data.grid_width(), cell_data.data.grid_height());
        let block_resolution = clamp_block_resolution(properties.block_resolution, width, height);

        let rebuild = block_resolution != cell_data.block_resolution
            || properties.max_blocks_per_cell != cell_data.properties.max_blocks_per_cell;
        cell_data.properties = properties;

        if !rebuild {
            return Ok(());
        }

        let neighbours = cell_data.neighbours;
        self.disconnect_cell(cell);

        let epoch = self.next_epoch();
        let cell_data = self.cell_mut(cell)?;
        cell_data.block_resolution = block_resolution;
        cell_data.allocator = BlockAllocator::new(cell_data.properties.max_blocks_per_cell, epoch);

        self.setup_root(cell)?;
        for side in Side::ALL {
            if let Some(neighbour) = neighbours[side.index()] {
                self.connect_cell(cell, neighbour, side)?;
            }
        }

        Ok(())
    }
}
