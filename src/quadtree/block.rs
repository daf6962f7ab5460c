use crate::{
    cell::TerrainCells,
    math::Side,
    quadtree::{BlockRef, CHILD_EXTERIOR_SIDES, CHILD_INTERIOR_NEIGHBOURS, SIDE_CHILDREN},
    result::{TerrainError, TerrainResult},
};

impl TerrainCells {
    /// Splits `block` only if that needs no other block to be split first.
    ///
    /// This is the case if every neighbour is either an inner block or a leaf that is at least
    /// as fine as `block`. Returns whether the block was split.
    pub fn try_split(&mut self, block: BlockRef) -> TerrainResult<bool> {
        let Some(data) = self.block(block) else {
            return Err(TerrainError::UnknownBlock(block));
        };
        if !data.is_leaf() || data.step_size < 2 {
            return Ok(false);
        }

        let step_size = data.step_size;
        for side in Side::ALL {
            let Some(neighbour) = self.neighbour(block, side).and_then(|n| self.block(n)) else {
                continue;
            };
            if neighbour.is_leaf() && neighbour.step_size > step_size {
                return Ok(false);
            }
        }

        self.split(block)?;
        Ok(true)
    }

    /// Splits the leaf `block` into four children.
    ///
    /// Coarser leaf neighbours are split first, so that no two adjacent leaves ever differ by
    /// more than one level. Inner blocks and blocks at full grid resolution are left alone.
    pub fn split(&mut self, block: BlockRef) -> TerrainResult<()> {
        let Some(data) = self.block(block) else {
            return Err(TerrainError::UnknownBlock(block));
        };
        if !data.is_leaf() || data.step_size < 2 {
            return Ok(());
        }

        let step_size = data.step_size;
        for side in Side::ALL {
            let Some(neighbour) = self.neighbour(block, side) else {
                continue;
            };
            let coarser = self
                .block(neighbour)
                .is_some_and(|n| n.is_leaf() && n.step_size > step_size);
            if coarser {
                self.split(neighbour)?;
            }
        }

        let cell = self.cell_mut(block.cell)?;
        cell.allocator.reserve(block.cell, 4)?;

        let Some(data) = self.block(block) else {
            return Err(TerrainError::UnknownBlock(block));
        };
        let blocks = [0, 1, 2, 3].map(|index| data.child(block, index));

        let mut children = Vec::with_capacity(4);
        for child in blocks {
            children.push(self.alloc_block(block.cell, child)?);
        }
        let children: [BlockRef; 4] = [children[0], children[1], children[2], children[3]];

        for (child, neighbours) in children.iter().zip(CHILD_INTERIOR_NEIGHBOURS) {
            for side in Side::ALL {
                if let Some(sibling) = neighbours[side.index()] {
                    self.set_neighbour(*child, side, Some(children[sibling]));
                }
            }
        }

        for side in Side::ALL {
            let Some(neighbour) = self.neighbour(block, side) else {
                continue;
            };
            let back = side.opposite();

            match self.children(neighbour) {
                None => {
                    self.set_neighbour(neighbour, back, Some(block));
                    for child in SIDE_CHILDREN[side.index()] {
                        self.set_neighbour(children[child], side, Some(neighbour));
                    }
                }
                Some(neighbour_children) => {
                    let pairs = SIDE_CHILDREN[side.index()]
                        .into_iter()
                        .zip(SIDE_CHILDREN[back.index()]);
                    for (child, other) in pairs {
                        let (child, other) = (children[child], neighbour_children[other]);
                        self.set_neighbour(child, side, Some(other));
                        self.set_neighbour(other, back, Some(child));
                    }
                }
            }
        }

        if let Some(data) = self.block_mut(block) {
            data.children = Some(children);
        }

        Ok(())
    }

    /// Collapses the subtree of `block` back into a single leaf.
    ///
    /// Exterior neighbours of the children are redirected to `block`, finer inner neighbours
    /// are merged as well.
    pub fn merge(&mut self, block: BlockRef) {
        let Some(children) = self.children(block) else {
            return;
        };

        for child in children {
            self.merge(child);
        }

        for (child, sides) in children.into_iter().zip(CHILD_EXTERIOR_SIDES) {
            for side in sides {
                let Some(neighbour) = self.neighbour(child, side) else {
                    continue;
                };
                if !self.is_leaf(neighbour) {
                    self.merge(neighbour);
                }
                self.set_neighbour(neighbour, side.opposite(), Some(block));
            }
        }

        for child in children {
            self.free_block(child);
        }

        if let Some(data) = self.block_mut(block) {
            data.children = None;
        }
    }

    /// Clears every neighbour pointer that targets a block in the subtree of `block`.
    pub fn disconnect(&mut self, block: BlockRef) {
        if let Some(children) = self.children(block) {
            for child in children {
                self.disconnect(child);
            }
        }

        for side in Side::ALL {
            let Some(neighbour) = self.neighbour(block, side) else {
                continue;
            };
            let back = side.opposite();

            self.clear_back_pointer(neighbour, back, block);
            if let Some(neighbour_children) = self.children(neighbour) {
                for child in neighbour_children {
                    self.clear_back_pointer(child, back, block);
                }
            }
        }
    }

    fn clear_back_pointer(&mut self, block: BlockRef, side: Side, target: BlockRef) {
        if let Some(data) = self.block_mut(block) {
            if data.neighbours[side.index()] == Some(target) {
                data.neighbours[side.index()] = None;
            }
        }
    }

    /// Drops the vertex buffers and bounds of `block`, and of all its descendants if
    /// `recursive` is set.
    pub fn invalidate_geometry(&mut self, block: BlockRef, recursive: bool) {
        if let Some(data) = self.block_mut(block) {
            data.invalidate();
        }

        if recursive {
            if let Some(children) = self.children(block) {
                for child in children {
                    self.invalidate_geometry(child, true);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        cell::{CellId, TerrainCells},
        config::TerrainRenderProperties,
        math::Side,
        quadtree::BlockRef,
        result::TerrainError,
        terrain_data::HeightfieldCell,
    };
    use bevy::prelude::*;
    use std::sync::Arc;

    fn properties() -> TerrainRenderProperties {
        TerrainRenderProperties {
            block_resolution: 2,
            ..default()
        }
    }

    /// A single 16x16 quad cell with a root step of 8.
    fn single_cell(properties: TerrainRenderProperties) -> (TerrainCells, CellId, BlockRef) {
        let mut cells = TerrainCells::default();
        let data = HeightfieldCell::flat(Vec2::ZERO, Vec3::new(16.0, 1.0, 16.0), 17, 17);
        let cell = cells.insert(Arc::new(data), properties).unwrap();
        let root = cells.setup_root(cell).unwrap();
        (cells, cell, root)
    }

    fn child(cells: &TerrainCells, block: BlockRef, index: usize) -> BlockRef {
        cells.children(block).unwrap()[index]
    }

    fn step(cells: &TerrainCells, block: BlockRef) -> usize {
        cells.block(block).unwrap().step_size
    }

    #[test]
    fn split_links_the_children() {
        let (mut cells, _, root) = single_cell(properties());

        cells.split(root).unwrap();
        let c = cells.children(root).unwrap();

        assert_eq!(cells.neighbour(c[0], Side::Right), Some(c[1]));
        assert_eq!(cells.neighbour(c[0], Side::Bottom), Some(c[2]));
        assert_eq!(cells.neighbour(c[1], Side::Left), Some(c[0]));
        assert_eq!(cells.neighbour(c[1], Side::Bottom), Some(c[3]));
        assert_eq!(cells.neighbour(c[2], Side::Top), Some(c[0]));
        assert_eq!(cells.neighbour(c[2], Side::Right), Some(c[3]));
        assert_eq!(cells.neighbour(c[3], Side::Top), Some(c[1]));
        assert_eq!(cells.neighbour(c[3], Side::Left), Some(c[2]));
        assert_eq!(cells.neighbour(c[0], Side::Top), None);
        assert_eq!(cells.neighbour(c[3], Side::Right), None);

        for child in c {
            assert_eq!(step(&cells, child), 4);
            assert_eq!(cells.block(child).unwrap().parent, Some(root));
        }
        assert_eq!(cells.get(root.cell).unwrap().block_count(), 5);
    }

    #[test]
    fn split_cascades_into_coarser_neighbours() {
        let (mut cells, cell, root) = single_cell(properties());

        cells.split(root).unwrap();
        let top_left = child(&cells, root, 0);
        cells.split(top_left).unwrap();

        // splitting the bottom right grandchild of the top left block requires the
        // top right and bottom left blocks to be split first
        let inner = child(&cells, top_left, 3);
        cells.split(inner).unwrap();

        let top_right = child(&cells, root, 1);
        let bottom_left = child(&cells, root, 2);
        assert!(!cells.is_leaf(top_right));
        assert!(!cells.is_leaf(bottom_left));
        assert!(cells.is_leaf(child(&cells, root, 3)));

        assert_eq!(
            cells.neighbour(child(&cells, inner, 1), Side::Right),
            Some(child(&cells, top_right, 2))
        );
        assert_eq!(
            cells.neighbour(child(&cells, top_right, 2), Side::Left),
            Some(inner)
        );
        assert_eq!(
            cells.neighbour(child(&cells, inner, 2), Side::Bottom),
            Some(child(&cells, bottom_left, 1))
        );

        assert_eq!(cells.leaves(cell).len(), 16);
    }

    #[test]
    fn try_split_refuses_next_to_coarser_leaves() {
        let (mut cells, _, root) = single_cell(properties());

        cells.split(root).unwrap();
        let top_left = child(&cells, root, 0);
        assert!(cells.try_split(top_left).unwrap());

        let inner = child(&cells, top_left, 3);
        assert!(!cells.try_split(inner).unwrap());
        assert!(cells.is_leaf(inner));
        assert!(cells.is_leaf(child(&cells, root, 1)));

        assert!(!cells.try_split(root).unwrap());
    }

    #[test]
    fn merge_restores_the_neighbours() {
        let (mut cells, cell, root) = single_cell(properties());

        cells.split(root).unwrap();
        let top_left = child(&cells, root, 0);
        let top_right = child(&cells, root, 1);
        cells.split(top_left).unwrap();
        cells.split(top_right).unwrap();

        cells.merge(top_left);

        assert!(cells.is_leaf(top_left));
        assert_eq!(cells.neighbour(top_left, Side::Right), Some(top_right));
        assert_eq!(
            cells.neighbour(child(&cells, top_right, 0), Side::Left),
            Some(top_left)
        );
        assert_eq!(
            cells.neighbour(child(&cells, top_right, 2), Side::Left),
            Some(top_left)
        );
        assert_eq!(cells.leaves(cell).len(), 7);

        cells.merge(root);
        assert!(cells.is_leaf(root));
        assert_eq!(cells.get(cell).unwrap().block_count(), 1);
    }

    #[test]
    fn merge_collapses_finer_inner_neighbours() {
        let (mut cells, cell, root) = single_cell(properties());

        cells.split(root).unwrap();
        let top_left = child(&cells, root, 0);
        let top_right = child(&cells, root, 1);
        cells.split(top_left).unwrap();
        cells.split(top_right).unwrap();
        cells.split(child(&cells, top_right, 0)).unwrap();

        // the top right block touches the top left one through an inner child
        cells.merge(top_left);

        assert!(cells.is_leaf(child(&cells, top_right, 0)));
        assert_eq!(cells.leaves(cell).len(), 7);
    }

    #[test]
    fn capped_pool_reports_exhaustion() {
        let (mut cells, _, root) = single_cell(TerrainRenderProperties {
            max_blocks_per_cell: Some(6),
            ..properties()
        });

        cells.split(root).unwrap();
        let top_left = child(&cells, root, 0);

        assert!(matches!(
            cells.split(top_left),
            Err(TerrainError::OutOfBlocks { capacity: 6, .. })
        ));
        assert!(cells.is_leaf(top_left));
        assert_eq!(cells.get(root.cell).unwrap().block_count(), 5);
    }

    #[test]
    fn disconnect_clears_back_pointers() {
        let mut cells = TerrainCells::default();
        let mut load = |x: f32| {
            let data = HeightfieldCell::flat(Vec2::new(x, 0.0), Vec3::new(16.0, 1.0, 16.0), 17, 17);
            cells.insert(Arc::new(data), properties()).unwrap()
        };
        let (a, b) = (load(0.0), load(16.0));

        cells.connect_cell(a, b, Side::Right).unwrap();
        let (root_a, root_b) = (cells.root(a).unwrap(), cells.root(b).unwrap());
        cells.split(root_b).unwrap();
        cells.split(child(&cells, root_b, 0)).unwrap();

        // root a was split by the cascade, its right children face the children of b
        let right_of_a = child(&cells, root_a, 1);
        assert_eq!(
            cells.neighbour(child(&cells, root_b, 0), Side::Left),
            Some(right_of_a)
        );

        cells.disconnect(root_a);

        for block in cells.leaves(b) {
            let neighbour = cells.block(block).unwrap().neighbour(Side::Left);
            assert!(neighbour.map_or(true, |n| n.cell != a));
        }
        assert_eq!(cells.block(root_b).unwrap().neighbour(Side::Left), None);
    }

    #[test]
    fn invalidation_reaches_all_descendants() {
        let (mut cells, cell, root) = single_cell(properties());
        cells.split(root).unwrap();
        cells.split(child(&cells, root, 0)).unwrap();

        for block in cells.leaves(cell) {
            cells.setup_geometry(block).unwrap();
            assert!(cells.block(block).unwrap().data_valid());
        }

        cells.invalidate_geometry(root, false);
        assert!(cells.leaves(cell).iter().all(|&b| cells.block(b).unwrap().data_valid()));

        cells.invalidate_geometry(root, true);
        for block in cells.leaves(cell) {
            let data = cells.block(block).unwrap();
            assert!(!data.data_valid());
            assert!(!data.tangents_bitangents_valid());
            assert!(data.bounding_box().is_empty());
        }
    }
}
