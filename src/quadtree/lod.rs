use crate::{cell::TerrainCells, quadtree::BlockRef, result::TerrainResult};
use bevy::prelude::*;

impl TerrainCells {
    /// Refines the subtree of `block` for a camera at `camera_position` (object space).
    ///
    /// Blocks closer than `size.x * lod_split_coeff / block_resolution` are split, until their
    /// step reaches `min_steps`, farther ones are merged. Children are visited in `order`.
    pub fn compute_lod(
        &mut self,
        block: BlockRef,
        camera_position: Vec3,
        order: &[usize; 4],
    ) -> TerrainResult<()> {
        let Some(bounding_box) = self.ensure_bounds(block) else {
            return Ok(());
        };
        let cell = self.cell(block.cell)?;
        let properties = &cell.properties;
        let resolution = cell.block_resolution as f32;
        let (split_coeff, min_steps) = (properties.lod_split_coeff, properties.min_steps as usize);

        let Some(node) = self.block(block) else {
            return Ok(());
        };
        let split_distance = node.size.x * split_coeff / resolution;
        let near = bounding_box.squared_distance_to(camera_position) < split_distance * split_distance;

        if near && node.step_size > min_steps {
            if node.is_leaf() {
                self.split(block)?;
            }
        } else if !node.is_leaf() {
            self.merge(block);
        }

        if let Some(children) = self.children(block) {
            for &index in order {
                self.compute_lod(children[index], camera_position, order)?;
            }
        }

        Ok(())
    }
}
