use crate::{math::BoundingBox, quadtree::TerrainBlock, terrain_data::TerrainCellData};
use bevy::prelude::*;
use itertools::iproduct;
use ndarray::ArrayView2;
use std::sync::OnceLock;

/// The vertices of a block sampled from the cell grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct GridWindow {
    pub(crate) left: usize,
    pub(crate) top: usize,
    pub(crate) step: usize,
    /// Vertices along each side.
    pub(crate) count: usize,
}

impl GridWindow {
    pub(crate) fn new(block: &TerrainBlock, resolution: usize) -> Self {
        Self {
            left: block.grid_left,
            top: block.grid_top,
            step: block.step_size,
            count: resolution + 1,
        }
    }
}

/// Samples `grid` row by row at the vertices of `window`.
pub(crate) fn sample_grid<T: Copy>(grid: ArrayView2<T>, window: GridWindow) -> Vec<T> {
    iproduct!(0..window.count, 0..window.count)
        .map(|(y, x)| grid[[window.top + y * window.step, window.left + x * window.step]])
        .collect()
}

/// The bounding box of a block, computed from the heights at its vertices.
pub(crate) fn block_bounds(
    data: &dyn TerrainCellData,
    block: &TerrainBlock,
    resolution: usize,
) -> BoundingBox {
    let heights = sample_grid(data.heights(), GridWindow::new(block, resolution));
    let (min_height, max_height) = heights
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), &height| {
            (min.min(height), max.max(height))
        });

    let half_size = block.size / 2.0;
    let min = block.center_pos - half_size;
    let max = block.center_pos + half_size;

    BoundingBox::from_min_max(
        Vec3::new(min.x, min_height, min.y),
        Vec3::new(max.x, max_height, max.y),
    )
}

/// Tangent and bitangent buffers of a leaf.
#[derive(Clone, Debug)]
pub struct TangentFrames {
    pub tangents: Vec<Vec3>,
    pub bitangents: Vec<Vec3>,
}

/// The vertex buffers of a leaf block.
///
/// Vertices are stored row by row, starting at the maximum Z of the block, with
/// `resolution + 1` vertices per row.
#[derive(Debug)]
pub struct BlockGeometry {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub texcoords: Vec<Vec2>,
    pub vertices_per_side: usize,
    window: GridWindow,
    tangent_frames: OnceLock<TangentFrames>,
}

impl BlockGeometry {
    pub(crate) fn build(
        data: &dyn TerrainCellData,
        block: &TerrainBlock,
        resolution: usize,
    ) -> (Self, BoundingBox) {
        let window = GridWindow::new(block, resolution);
        let heights = sample_grid(data.heights(), window);
        let normals = sample_grid(data.normals(), window);

        let half_size = block.size / 2.0;
        let min = block.center_pos - half_size;
        let max = block.center_pos + half_size;
        let step = block.size / resolution as f32;

        let mut bounding_box = BoundingBox::EMPTY;
        let positions = iproduct!(0..window.count, 0..window.count)
            .zip(&heights)
            .map(|((y, x), &height)| {
                let position = Vec3::new(min.x + x as f32 * step.x, height, max.y - y as f32 * step.y);
                bounding_box.extend(position);
                position
            })
            .collect();

        // the block covers its share of the [0, 1] texture space of the cell, v grows towards -Z
        let cell_size = data.size();
        let offset = 2.0 * (block.center_pos - data.position());
        let min_uv = Vec2::new(
            (offset.x - block.size.x) / (2.0 * cell_size.x),
            (2.0 * cell_size.z - offset.y - block.size.y) / (2.0 * cell_size.z),
        );
        let max_uv = Vec2::new(
            (offset.x + block.size.x) / (2.0 * cell_size.x),
            (2.0 * cell_size.z - offset.y + block.size.y) / (2.0 * cell_size.z),
        );
        let uv_step = (max_uv - min_uv) / resolution as f32;

        let texcoords = iproduct!(0..window.count, 0..window.count)
            .map(|(y, x)| min_uv + Vec2::new(x as f32, y as f32) * uv_step)
            .collect();

        let geometry = Self {
            positions,
            normals,
            texcoords,
            vertices_per_side: window.count,
            window,
            tangent_frames: OnceLock::new(),
        };

        (geometry, bounding_box)
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// The tangents and bitangents, sampled from `data` the first time they are requested.
    pub fn tangent_frames(&self, data: &dyn TerrainCellData) -> &TangentFrames {
        self.tangent_frames.get_or_init(|| TangentFrames {
            tangents: sample_grid(data.tangents(), self.window),
            bitangents: sample_grid(data.bitangents(), self.window),
        })
    }

    pub fn tangents_valid(&self) -> bool {
        self.tangent_frames.get().is_some()
    }

    pub fn position_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.positions)
    }

    pub fn normal_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.normals)
    }

    pub fn texcoord_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.texcoords)
    }
}
