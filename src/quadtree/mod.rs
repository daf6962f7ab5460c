//! The block quadtree of the terrain.
//!
//! Every cell of the terrain owns a quadtree of [`TerrainBlock`]s. The root block covers the
//! whole cell, each split divides a block into four children of half the size and half the
//! grid step. Leaves are the blocks that get rendered.
//!
//! Neighbouring leaves may differ by at most one level (their step sizes by a factor of two),
//! which allows each leaf to hide the T-junctions along a coarser neighbour by skipping every
//! other vertex on that side. To keep this invariant blocks store a pointer to their neighbour
//! on each [`Side`]. The pointer targets a block of the same level if one exists, otherwise the
//! coarser leaf covering that side. Neighbour pointers cross cell boundaries, so all quadtrees
//! of the terrain form a single forest that is stored in [`TerrainCells`](crate::cell::TerrainCells).

mod allocator;
mod block;
mod lod;

pub use allocator::BlockAllocator;

use crate::{
    cell::CellId,
    math::{BoundingBox, Side},
    render::geometry::BlockGeometry,
};
use bevy::math::Vec2;
use std::sync::Arc;

/// Reference to a block in the forest.
///
/// Stays valid until the block is freed or the pool of its cell is emptied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockRef {
    pub cell: CellId,
    pub(crate) index: usize,
    pub(crate) epoch: u32,
}

/// The children of a block touching each side, ordered along the side.
pub(crate) const SIDE_CHILDREN: [[usize; 2]; 4] = [[0, 1], [1, 3], [0, 2], [2, 3]];

/// The sides of each child that lie on the border of its parent.
pub(crate) const CHILD_EXTERIOR_SIDES: [[Side; 2]; 4] = [
    [Side::Top, Side::Left],
    [Side::Top, Side::Right],
    [Side::Left, Side::Bottom],
    [Side::Bottom, Side::Right],
];

/// The neighbour of each child inside its parent, per side.
pub(crate) const CHILD_INTERIOR_NEIGHBOURS: [[Option<usize>; 4]; 4] = [
    [None, Some(1), None, Some(2)],
    [None, None, Some(0), Some(3)],
    [Some(0), Some(3), None, None],
    [Some(1), None, Some(2), None],
];

/// A node of the block quadtree.
///
/// Covers the grid samples `grid_left..=grid_right` and `grid_top..=grid_bottom` of its cell,
/// of which every `step_size`-th one becomes a vertex. Grid rows grow towards -Z.
pub struct TerrainBlock {
    /// Center of the block in the XZ plane of the terrain object.
    pub center_pos: Vec2,
    /// Extent of the block along X and Z.
    pub size: Vec2,
    pub grid_left: usize,
    pub grid_right: usize,
    pub grid_top: usize,
    pub grid_bottom: usize,
    pub step_size: usize,
    /// Position among the children of the parent, 0 for roots.
    pub child_index: usize,
    pub parent: Option<BlockRef>,
    pub(crate) children: Option<[BlockRef; 4]>,
    pub(crate) neighbours: [Option<BlockRef>; 4],
    pub(crate) bounding_box: BoundingBox,
    pub(crate) geometry: Option<Arc<BlockGeometry>>,
}

impl TerrainBlock {
    pub(crate) fn root(
        center_pos: Vec2,
        size: Vec2,
        grid_right: usize,
        grid_bottom: usize,
        step_size: usize,
    ) -> Self {
        Self {
            center_pos,
            size,
            grid_left: 0,
            grid_right,
            grid_top: 0,
            grid_bottom,
            step_size,
            child_index: 0,
            parent: None,
            children: None,
            neighbours: [None; 4],
            bounding_box: BoundingBox::EMPTY,
            geometry: None,
        }
    }

    /// Creates child `index` of this block, without any links.
    pub(crate) fn child(&self, parent: BlockRef, index: usize) -> Self {
        let half_right = self.grid_left + (self.grid_right - self.grid_left) / 2;
        let half_bottom = self.grid_top + (self.grid_bottom - self.grid_top) / 2;

        let (grid_left, grid_right) = match index {
            0 | 2 => (self.grid_left, half_right),
            _ => (half_right, self.grid_right),
        };
        let (grid_top, grid_bottom) = match index {
            0 | 1 => (self.grid_top, half_bottom),
            _ => (half_bottom, self.grid_bottom),
        };

        let quarter = self.size / 4.0;
        let offset = match index {
            0 => Vec2::new(-quarter.x, quarter.y),
            1 => Vec2::new(quarter.x, quarter.y),
            2 => Vec2::new(-quarter.x, -quarter.y),
            _ => Vec2::new(quarter.x, -quarter.y),
        };

        Self {
            center_pos: self.center_pos + offset,
            size: self.size / 2.0,
            grid_left,
            grid_right,
            grid_top,
            grid_bottom,
            step_size: self.step_size / 2,
            child_index: index,
            parent: Some(parent),
            children: None,
            neighbours: [None; 4],
            bounding_box: BoundingBox::EMPTY,
            geometry: None,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    pub fn children(&self) -> Option<[BlockRef; 4]> {
        self.children
    }

    /// The raw neighbour pointer on `side`, it may be stale.
    pub fn neighbour(&self, side: Side) -> Option<BlockRef> {
        self.neighbours[side.index()]
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bounding_box
    }

    /// Whether the vertex buffers of this leaf are built.
    pub fn data_valid(&self) -> bool {
        self.geometry.is_some()
    }

    /// Whether the tangent and bitangent buffers of this leaf are built.
    pub fn tangents_bitangents_valid(&self) -> bool {
        self.geometry
            .as_ref()
            .is_some_and(|geometry| geometry.tangents_valid())
    }

    pub fn geometry(&self) -> Option<&Arc<BlockGeometry>> {
        self.geometry.as_ref()
    }

    pub(crate) fn invalidate(&mut self) {
        self.geometry = None;
        self.bounding_box = BoundingBox::EMPTY;
    }
}
