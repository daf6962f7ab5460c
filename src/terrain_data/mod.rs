//! This module contains the interface through which the renderer reads the terrain cells.
//!
//! # Explanation
//! A terrain is made of rectangular cells laid out on a regular grid in the XZ plane.
//! Each cell is a height field of `grid_width` x `grid_height` samples together with
//! per-sample normals, tangents and bitangents, and the materials used to shade it.
//! The renderer never modifies this data, it only samples it while building the vertex
//! buffers of the leaf blocks.
//!
//! [`HeightfieldCell`] is an in-memory implementation backed by [`ndarray`] grids.

use bevy::prelude::*;
use derive_more::derive::{Display, From};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

mod heightfield;

pub use heightfield::HeightfieldCell;

/// Identifies a material of the graphics layer.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, From, Display, Serialize, Deserialize,
)]
#[display("material {_0}")]
pub struct MaterialId(pub u32);

/// Read access to the data of a terrain cell.
///
/// Grids are indexed as `[[row, column]]`. Row 0 lies at the maximum Z of the cell and column 0
/// at its minimum X.
pub trait TerrainCellData: Send + Sync {
    /// The corner of the cell with the minimum X and Z coordinate.
    fn position(&self) -> Vec2;

    /// The extent of the cell, `y` is the height range.
    fn size(&self) -> Vec3;

    fn heights(&self) -> ArrayView2<'_, f32>;

    fn normals(&self) -> ArrayView2<'_, Vec3>;

    fn tangents(&self) -> ArrayView2<'_, Vec3>;

    fn bitangents(&self) -> ArrayView2<'_, Vec3>;

    fn grid_width(&self) -> usize {
        self.heights().ncols()
    }

    fn grid_height(&self) -> usize {
        self.heights().nrows()
    }

    /// Resolution of the material mask and alpha maps of this cell.
    fn material_map_size(&self) -> UVec2 {
        UVec2::new(self.grid_width() as u32, self.grid_height() as u32)
    }

    /// Material used when the cell is rendered without splatting.
    fn base_material(&self) -> Option<MaterialId> {
        None
    }

    /// Material drawn below the splatting layers.
    fn splat_base_material(&self) -> Option<MaterialId> {
        None
    }

    /// Material that blends the splatting layers with a single alpha pass.
    fn alpha_splat_material(&self) -> Option<MaterialId> {
        None
    }
}
