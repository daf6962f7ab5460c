//! This crate renders height-field terrain cells as adaptive quadtrees of fixed resolution
//! blocks.
//!
//! # Background
//! A terrain is made of cells, each a regular grid of height samples. Rendering every sample
//! of every cell each frame does not scale, so each cell is covered by a quadtree of blocks.
//! Every block is drawn with the same number of vertices, but covers twice the area of its
//! children by sampling every other grid point of them.
//!
//! ## How is the tessellation chosen?
//! Each frame the quadtrees are refined around the camera: blocks closer than a distance
//! proportional to their size are split, farther ones are merged.
//! Neighbouring leaves never differ by more than one level, even across cell borders, which
//! lets the renderer stitch them with one of sixteen precomputed index buffers.
//! See the [`quadtree`] module for more information.
//!
//! ## What does the renderer produce?
//! Visible leaves are turned into [`RenderMesh`](render::RenderMesh)es holding shared vertex
//! buffers, the matching index buffer and the material to draw them with.
//! Close to the camera a leaf is drawn once per splatting layer on top of its base layer.
//! See the [`render`] module for more information.

pub mod cell;
pub mod config;
pub mod debug;
pub mod math;
pub mod plugin;
pub mod quadtree;
pub mod render;
pub mod renderer;
pub mod result;
pub mod terrain_data;

#[allow(missing_docs)]
pub mod prelude {
    #[doc(hidden)]
    pub use crate::{
        cell::CellId,
        config::{RenderPriority, TerrainRenderProperties},
        debug::{DebugTerrain, TerrainDebugPlugin},
        math::{BoundingBox, ClipPlanes, Side},
        plugin::{TerrainBlockPlugin, TerrainCell, TerrainCellId, TerrainRenderMeshes, TerrainView},
        quadtree::BlockRef,
        render::{RenderMesh, ShaderContext},
        renderer::{BruteBlockRenderer, TerrainViewParams},
        result::{TerrainError, TerrainResult},
        terrain_data::{HeightfieldCell, MaterialId, TerrainCellData},
    };
}
