//! This module turns the leaves of the block quadtree into render meshes.
//!
//! Each visible leaf yields one [`RenderMesh`] per material layer. The meshes share the vertex
//! buffers of their leaf ([`BlockGeometry`]) and one of the sixteen index buffers of their block
//! resolution ([`IndexBuffer`]). Which index buffer is picked depends on the [`BorderMask`]:
//! sides that border a coarser leaf drop every other vertex, so that the edges of both leaves
//! line up without cracks.
//!
//! Issuing draw calls is left to the graphics layer.

use crate::{
    cell::CellId,
    config::RenderPriority,
    math::BoundingBox,
    quadtree::BlockRef,
    terrain_data::{MaterialId, TerrainCellData},
};
use bevy::prelude::*;
use std::{fmt, sync::Arc};

mod cull;
pub mod geometry;
pub mod index_buffer;
pub mod splatting;

pub(crate) use cull::CullContext;

use geometry::{BlockGeometry, TangentFrames};
use index_buffer::{BorderMask, IndexBuffer};

/// The per mesh shader parameters a material is drawn with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderContext {
    /// Parameters shared by all leaves of the cell.
    Common,
    /// The mask of palette entry `i`.
    MaterialMask(usize),
    /// The alpha map layer `i` of the cell.
    AlphaMap(usize),
}

/// Everything needed to draw one material layer of a leaf.
#[derive(Clone)]
pub struct RenderMesh {
    pub cell: CellId,
    pub block: BlockRef,
    pub geometry: Arc<BlockGeometry>,
    pub indices: Arc<IndexBuffer>,
    pub border_mask: BorderMask,
    pub material: MaterialId,
    pub context: ShaderContext,
    pub priority: RenderPriority,
    /// World position of the leaf center at height zero.
    pub world_origin: Vec3,
    /// World space bounds of the leaf.
    pub bounding_box: BoundingBox,
    cell_data: Arc<dyn TerrainCellData>,
}

impl RenderMesh {
    /// Tangents and bitangents of the leaf, built the first time any mesh asks for them.
    pub fn tangent_frames(&self) -> &TangentFrames {
        self.geometry.tangent_frames(&*self.cell_data)
    }
}

impl fmt::Debug for RenderMesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderMesh")
            .field("cell", &self.cell)
            .field("block", &self.block)
            .field("border_mask", &self.border_mask)
            .field("material", &self.material)
            .field("context", &self.context)
            .field("priority", &self.priority)
            .field("world_origin", &self.world_origin)
            .finish_non_exhaustive()
    }
}
