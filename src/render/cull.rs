use crate::{
    cell::TerrainCells,
    math::{BoundingBox, ClipPlanes, Side},
    quadtree::BlockRef,
    render::{
        geometry::{block_bounds, BlockGeometry},
        index_buffer::{BorderMask, IndexBufferCache},
        splatting::use_splatting,
        RenderMesh,
    },
    result::{TerrainError, TerrainResult},
    terrain_data::MaterialId,
};
use bevy::{math::Affine3A, prelude::*};
use std::sync::Arc;

/// The per view state of the culling pass.
pub(crate) struct CullContext<'a> {
    pub(crate) clip_planes: &'a ClipPlanes,
    /// Camera position in object space.
    pub(crate) camera_position: Vec3,
    pub(crate) world_from_object: Affine3A,
    pub(crate) palette: &'a [MaterialId],
    pub(crate) index_buffers: &'a mut IndexBufferCache,
}

impl TerrainCells {
    /// The bounding box of `block`, computed from the cell heights if it is not known yet.
    pub(crate) fn ensure_bounds(&mut self, block: BlockRef) -> Option<BoundingBox> {
        let cell = self.get(block.cell)?;
        let (data, resolution) = (cell.data.clone(), cell.block_resolution);

        let node = self.block(block)?;
        if !node.bounding_box.is_empty() {
            return Some(node.bounding_box);
        }

        let bounding_box = block_bounds(&*data, node, resolution);
        self.block_mut(block)?.bounding_box = bounding_box;
        Some(bounding_box)
    }

    /// Builds the vertex buffers of `block` unless they are still valid.
    pub fn setup_geometry(&mut self, block: BlockRef) -> TerrainResult<Arc<BlockGeometry>> {
        let cell = self.cell(block.cell)?;
        let (data, resolution) = (cell.data.clone(), cell.block_resolution);

        let node = self.block(block).ok_or(TerrainError::UnknownBlock(block))?;
        if let Some(geometry) = &node.geometry {
            return Ok(geometry.clone());
        }

        let (geometry, bounding_box) = BlockGeometry::build(&*data, node, resolution);
        let geometry = Arc::new(geometry);

        let node = self.block_mut(block).ok_or(TerrainError::UnknownBlock(block))?;
        node.geometry = Some(geometry.clone());
        node.bounding_box = bounding_box;

        Ok(geometry)
    }

    /// The sides of `block` that face a coarser leaf.
    pub fn border_mask(&self, block: BlockRef) -> BorderMask {
        let Some(step_size) = self.block(block).map(|node| node.step_size) else {
            return BorderMask::empty();
        };

        Side::ALL
            .into_iter()
            .filter(|&side| {
                self.neighbour(block, side)
                    .and_then(|neighbour| self.block(neighbour))
                    .is_some_and(|neighbour| neighbour.step_size > step_size)
            })
            .fold(BorderMask::empty(), |mask, side| mask | BorderMask::from_side(side))
    }

    /// Collects the render meshes of the visible leaves below `block`.
    ///
    /// `mask` selects the clip planes that still intersect the parent.
    pub(crate) fn cull_render_meshes(
        &mut self,
        block: BlockRef,
        context: &mut CullContext,
        mask: u32,
        meshes: &mut Vec<RenderMesh>,
    ) {
        let Some(bounding_box) = self.ensure_bounds(block) else {
            return;
        };
        let Some(mask) = context.clip_planes.cull(&bounding_box, mask) else {
            return;
        };

        if let Some(children) = self.children(block) {
            for child in children {
                self.cull_render_meshes(child, context, mask, meshes);
            }
            return;
        }

        let geometry = match self.setup_geometry(block) {
            Ok(geometry) => geometry,
            Err(error) => {
                warn!("Failed to build the geometry of a terrain block: {error}");
                return;
            }
        };
        let border_mask = self.border_mask(block);

        let (Some(cell), Some(node)) = (self.get(block.cell), self.block(block)) else {
            return;
        };
        let indices = context
            .index_buffers
            .get(cell.block_resolution, border_mask);

        let distance = bounding_box
            .squared_distance_to(context.camera_position)
            .sqrt();
        let splatting = use_splatting(
            distance,
            cell.properties.splat_distance,
            context.palette,
            &*cell.data,
        );
        let layers = cell.splat.mesh_layers(
            &*cell.data,
            context.palette,
            splatting,
            cell.properties.splat_render_priority,
        );

        let world_origin = context
            .world_from_object
            .transform_point3(Vec3::new(node.center_pos.x, 0.0, node.center_pos.y));
        let world_bounds = bounding_box.transformed(&context.world_from_object);

        meshes.extend(layers.into_iter().map(|layer| RenderMesh {
            cell: block.cell,
            block,
            geometry: geometry.clone(),
            indices: indices.clone(),
            border_mask,
            material: layer.material,
            context: layer.context,
            priority: layer.priority,
            world_origin,
            bounding_box: world_bounds,
            cell_data: cell.data.clone(),
        }));
    }
}
