use bevy::{prelude::*, render::primitives::HalfSpace};
use bevy_terrain_blocks::{
    cell::{match_cell, TerrainCells},
    prelude::*,
    render::index_buffer::BorderMask,
};
use image::DynamicImage;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;

const CELL_SIZE: f32 = 16.0;

fn heightfield(x: f32, z: f32) -> HeightfieldCell {
    HeightfieldCell::from_fn(
        Vec2::new(x, z),
        Vec3::new(CELL_SIZE, 4.0, CELL_SIZE),
        17,
        17,
        |column, row| ((column * 7 + row * 3) % 5) as f32 / 4.0,
    )
    .with_base_material(MaterialId(1))
}

fn properties(block_resolution: u32, lod_split_coeff: f32) -> TerrainRenderProperties {
    TerrainRenderProperties {
        block_resolution,
        lod_split_coeff,
        ..default()
    }
}

/// Checks the neighbour links of every leaf of `cells`.
fn assert_balanced(cells: &TerrainCells) {
    for (cell, _) in cells.iter() {
        for leaf in cells.leaves(cell) {
            let Some(block) = cells.block(leaf) else {
                panic!("leaf {leaf:?} does not resolve");
            };

            for side in Side::ALL {
                if let Some(raw) = block.neighbour(side) {
                    assert!(cells.block(raw).is_some(), "stale link on {side:?} of {leaf:?}");
                }
                let Some(neighbour) = cells.neighbour(leaf, side) else {
                    continue;
                };
                let Some(other) = cells.block(neighbour) else {
                    continue;
                };
                let back = cells.neighbour(neighbour, side.opposite());

                assert!(other.step_size >= block.step_size, "link to a finer block");
                if other.step_size == block.step_size {
                    assert_eq!(back, Some(leaf));
                    if let Some(children) = cells.children(neighbour) {
                        let facing: Vec<_> = children
                            .into_iter()
                            .filter(|&child| cells.neighbour(child, side.opposite()) == Some(leaf))
                            .collect();
                        assert_eq!(facing.len(), 2);
                        assert!(facing.iter().all(|&child| cells.is_leaf(child)));
                    }
                } else {
                    assert!(other.is_leaf());
                    assert_eq!(other.step_size, block.step_size * 2);
                    assert_eq!(back, block.parent);
                }
            }
        }
    }
}

#[test]
fn lod_keeps_neighbours_balanced_along_camera_paths() {
    let mut renderer = BruteBlockRenderer::new(properties(4, 16.0));
    for (x, z) in [(0.0, 0.0), (16.0, 0.0), (0.0, 16.0), (16.0, 16.0)] {
        renderer.on_cell_load(Arc::new(heightfield(x, z)), None).unwrap();
    }

    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..200 {
        let camera = Vec3::new(
            rng.random_range(-8.0..40.0),
            rng.random_range(0.5..24.0),
            rng.random_range(-8.0..40.0),
        );
        let direction = Vec3::new(rng.random_range(-1.0..1.0), -0.5, rng.random_range(-1.0..1.0));
        let view = TerrainViewParams::looking_from(camera, direction);

        let meshes = renderer.render(&view).len();
        let leaves: usize = renderer
            .active_cells()
            .iter()
            .map(|&cell| renderer.leaf_count(cell))
            .sum();
        assert_eq!(meshes, leaves);
        assert_balanced(renderer.cells());
    }
}

#[test]
fn random_splits_and_merges_keep_neighbours_balanced() {
    let mut cells = TerrainCells::default();
    let a = cells.insert(Arc::new(heightfield(0.0, 0.0)), properties(4, 16.0)).unwrap();
    let b = cells.insert(Arc::new(heightfield(16.0, 0.0)), properties(4, 16.0)).unwrap();
    cells.setup_root(a).unwrap();
    cells.setup_root(b).unwrap();
    cells.connect_cell(a, b, Side::Right).unwrap();

    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..500 {
        let cell = if rng.random_bool(0.5) { a } else { b };
        let leaves = cells.leaves(cell);
        let leaf = leaves[rng.random_range(0..leaves.len())];

        if rng.random_bool(0.6) {
            cells.split(leaf).unwrap();
        } else if let Some(parent) = cells.block(leaf).and_then(|block| block.parent) {
            cells.merge(parent);
        }

        assert_balanced(&cells);
    }
}

#[test]
fn try_split_refuses_coarser_neighbours() {
    let mut cells = TerrainCells::default();
    let a = cells.insert(Arc::new(heightfield(0.0, 0.0)), properties(4, 16.0)).unwrap();
    let b = cells.insert(Arc::new(heightfield(16.0, 0.0)), properties(4, 16.0)).unwrap();
    cells.setup_root(a).unwrap();
    cells.setup_root(b).unwrap();
    cells.connect_cell(a, b, Side::Right).unwrap();

    let root_a = cells.root(a).unwrap();
    cells.split(root_a).unwrap();
    let child = cells.children(root_a).unwrap()[1];

    // the right neighbour of child 1 is the root of cell b, which is still a leaf
    assert!(!cells.try_split(child).unwrap());
    assert!(cells.is_leaf(child));

    cells.split(child).unwrap();
    assert!(!cells.is_leaf(cells.root(b).unwrap()));
    assert_balanced(&cells);
}

#[test]
fn single_cell_refines_into_four_leaves() {
    let mut renderer = BruteBlockRenderer::new(properties(8, 16.0));
    let cell = renderer.on_cell_load(Arc::new(heightfield(0.0, 0.0)), None).unwrap();
    let root = renderer.cells().root(cell).unwrap();
    let root_step = renderer.cells().block(root).unwrap().step_size;
    assert_eq!(root_step, 2);

    let far = TerrainViewParams::looking_from(Vec3::new(8.0, 200.0, 8.0), Vec3::NEG_Y);
    assert_eq!(renderer.render(&far).len(), 1);
    assert_eq!(renderer.leaf_count(cell), 1);

    // split distance of the root is 16 * 16 / 8 = 32
    let near = TerrainViewParams::looking_from(Vec3::new(8.0, 10.0, 8.0), Vec3::NEG_Y);
    let meshes = renderer.render(&near);
    assert_eq!(meshes.len(), 4);
    assert!(meshes.iter().all(|mesh| mesh.border_mask == BorderMask::empty()));
    assert!(meshes.iter().all(|mesh| mesh.material == MaterialId(1)));

    let cells = renderer.cells();
    let children = cells.children(root).unwrap();
    for child in children {
        assert_eq!(cells.block(child).unwrap().step_size, root_step / 2);
    }
    assert_eq!(renderer.block_count(cell), 5);
}

#[test]
fn coarser_neighbours_select_stitched_index_buffers() {
    let mut renderer = BruteBlockRenderer::new(properties(8, 16.0));
    let a = renderer.on_cell_load(Arc::new(heightfield(0.0, 0.0)), None).unwrap();
    let b = renderer.on_cell_load(Arc::new(heightfield(16.0, 0.0)), None).unwrap();

    // close to the far left edge of cell a, cell b stays coarse
    let view = TerrainViewParams::looking_from(Vec3::new(-20.0, 1.0, 8.0), Vec3::X);
    let meshes = renderer.render(&view).to_vec();

    assert_eq!(renderer.leaf_count(a), 4);
    assert_eq!(renderer.leaf_count(b), 1);
    for mesh in &meshes {
        let expected = if mesh.cell != a {
            BorderMask::empty()
        } else if matches!(renderer.cells().block(mesh.block), Some(block) if block.child_index % 2 == 1) {
            BorderMask::from_side(Side::Right)
        } else {
            BorderMask::empty()
        };
        assert_eq!(mesh.border_mask, expected);
        assert_eq!(mesh.border_mask, renderer.cells().border_mask(mesh.block));
    }
}

#[test]
fn match_cell_finds_all_adjacent_sides() {
    let center = heightfield(0.0, 0.0);
    let cases = [
        (Vec2::new(0.0, CELL_SIZE), Side::Top),
        (Vec2::new(0.0, -CELL_SIZE), Side::Bottom),
        (Vec2::new(-CELL_SIZE, 0.0), Side::Left),
        (Vec2::new(CELL_SIZE, 0.0), Side::Right),
    ];

    for (offset, side) in cases {
        let other = heightfield(offset.x, offset.y);
        assert_eq!(match_cell(&center, &other), Some(side));
        assert_eq!(match_cell(&other, &center), Some(side.opposite()));
    }

    assert_eq!(match_cell(&center, &heightfield(CELL_SIZE, CELL_SIZE)), None);
    assert_eq!(match_cell(&center, &heightfield(2.0 * CELL_SIZE, 0.0)), None);
}

#[test]
fn loading_cells_links_their_roots() {
    let mut renderer = BruteBlockRenderer::new(properties(8, 16.0));
    let a = renderer.on_cell_load(Arc::new(heightfield(0.0, 0.0)), None).unwrap();
    let b = renderer.on_cell_load(Arc::new(heightfield(0.0, 16.0)), None).unwrap();

    let cells = renderer.cells();
    let (root_a, root_b) = (cells.root(a).unwrap(), cells.root(b).unwrap());
    assert_eq!(cells.neighbour(root_a, Side::Top), Some(root_b));
    assert_eq!(cells.neighbour(root_b, Side::Bottom), Some(root_a));
    assert_eq!(cells.get(a).unwrap().neighbour(Side::Top), Some(b));
    assert_eq!(cells.get(b).unwrap().neighbour(Side::Bottom), Some(a));
}

#[test]
fn culled_cells_emit_nothing() {
    let mut renderer = BruteBlockRenderer::new(properties(8, 16.0));
    let cell = renderer.on_cell_load(Arc::new(heightfield(0.0, 0.0)), None).unwrap();

    let near = TerrainViewParams::looking_from(Vec3::new(8.0, 2.0, 8.0), Vec3::NEG_Y);
    assert_eq!(renderer.render(&near).len(), 4);
    renderer.on_height_update(cell).unwrap();

    // only points above y = 1000 are inside
    let clip_planes = ClipPlanes::new([HalfSpace::new(Vec4::new(0.0, 1.0, 0.0, -1000.0))]);
    let view = near.with_clip_planes(clip_planes);
    assert!(renderer.render(&view).is_empty());

    // the root is rejected before any of its leaves is visited
    let cells = renderer.cells();
    let leaves = cells.leaves(cell);
    assert_eq!(leaves.len(), 4);
    assert!(leaves
        .iter()
        .all(|&leaf| cells.block(leaf).is_some_and(|block| !block.data_valid())));
}

#[test]
fn rectangular_grids_are_rejected_on_load() {
    let mut renderer = BruteBlockRenderer::new(properties(8, 16.0));
    let data = HeightfieldCell::flat(Vec2::ZERO, Vec3::new(32.0, 1.0, 16.0), 33, 17);
    assert!(matches!(
        renderer.on_cell_load(Arc::new(data), None),
        Err(TerrainError::InvalidGrid { width: 33, height: 17 })
    ));
    assert!(renderer.active_cells().is_empty());

    let view = TerrainViewParams::looking_from(Vec3::new(16.0, 2.0, 8.0), Vec3::NEG_Y);
    assert!(renderer.render(&view).is_empty());
}

#[test]
fn unloading_a_cell_clears_links_into_it() {
    let mut renderer = BruteBlockRenderer::new(properties(4, 16.0));
    let a = renderer.on_cell_load(Arc::new(heightfield(0.0, 0.0)), None).unwrap();
    let b = renderer.on_cell_load(Arc::new(heightfield(16.0, 0.0)), None).unwrap();

    let view = TerrainViewParams::looking_from(Vec3::new(16.0, 1.0, 8.0), Vec3::NEG_Y);
    renderer.render(&view);
    assert!(renderer.leaf_count(b) > 1);

    renderer.on_cell_unload(b).unwrap();
    assert_eq!(renderer.active_cells(), [a]);
    assert!(renderer.render_meshes().iter().all(|mesh| mesh.cell == a));

    let cells = renderer.cells();
    assert!(cells.get(b).is_none());
    assert_eq!(cells.get(a).unwrap().neighbour(Side::Right), None);
    for leaf in cells.leaves(a) {
        for side in Side::ALL {
            if let Some(neighbour) = cells.block(leaf).and_then(|block| block.neighbour(side)) {
                assert_eq!(neighbour.cell, a);
            }
        }
    }

    let meshes = renderer.render(&view);
    assert!(meshes.iter().all(|mesh| mesh.cell == a));
    assert_balanced(renderer.cells());
}

#[test]
fn close_leaves_are_drawn_with_splat_layers() {
    let mut renderer = BruteBlockRenderer::new(TerrainRenderProperties {
        splat_distance: 50.0,
        ..properties(8, 1.0)
    });
    renderer.set_material_palette(vec![MaterialId(10), MaterialId(11)]);

    let data = heightfield(0.0, 0.0)
        .with_material_map_size(UVec2::splat(4))
        .with_splat_base_material(MaterialId(2));
    let cell = renderer.on_cell_load(Arc::new(data), None).unwrap();

    // every texel of the material map selects palette entry 1
    let rect = URect::new(0, 0, 4, 4);
    renderer.on_material_mask_update(cell, rect, &[1; 16], 4).unwrap();

    let near = TerrainViewParams::looking_from(Vec3::new(8.0, 10.0, 8.0), Vec3::NEG_Y);
    let layers: Vec<_> = renderer
        .render(&near)
        .iter()
        .map(|mesh| (mesh.material, mesh.context, mesh.priority))
        .collect();
    assert_eq!(
        layers,
        [
            (MaterialId(2), ShaderContext::Common, RenderPriority::default()),
            (MaterialId(11), ShaderContext::MaterialMask(1), RenderPriority::SPLAT),
        ]
    );

    let far = TerrainViewParams::looking_from(Vec3::new(8.0, 100.0, 8.0), Vec3::NEG_Y);
    let layers: Vec<_> = renderer.render(&far).iter().map(|mesh| mesh.material).collect();
    assert_eq!(layers, [MaterialId(1)]);
}

#[test]
fn alpha_map_layers_are_drawn_far_away() {
    let mut renderer = BruteBlockRenderer::new(TerrainRenderProperties {
        splat_distance: 50.0,
        ..properties(8, 1.0)
    });
    let cell = renderer.on_cell_load(Arc::new(heightfield(0.0, 0.0)), None).unwrap();
    renderer
        .on_alpha_map_update(cell, MaterialId(20), &DynamicImage::new_rgba8(4, 4))
        .unwrap();

    let far = TerrainViewParams::looking_from(Vec3::new(8.0, 100.0, 8.0), Vec3::NEG_Y);
    let layers: Vec<_> = renderer
        .render(&far)
        .iter()
        .map(|mesh| (mesh.material, mesh.context, mesh.priority))
        .collect();
    assert_eq!(
        layers,
        [
            (MaterialId(1), ShaderContext::Common, RenderPriority::default()),
            (MaterialId(20), ShaderContext::AlphaMap(0), RenderPriority::SPLAT),
        ]
    );

    renderer.remove_alpha_map(cell, MaterialId(20)).unwrap();
    let layers: Vec<_> = renderer.render(&far).iter().map(|mesh| mesh.material).collect();
    assert_eq!(layers, [MaterialId(1)]);
}

#[test]
fn height_updates_rebuild_leaf_geometry() {
    let mut renderer = BruteBlockRenderer::new(properties(8, 16.0));
    let cell = renderer.on_cell_load(Arc::new(heightfield(0.0, 0.0)), None).unwrap();

    let view = TerrainViewParams::looking_from(Vec3::new(8.0, 200.0, 8.0), Vec3::NEG_Y);
    let before = renderer.render(&view)[0].bounding_box;

    let mut raised = heightfield(0.0, 0.0);
    raised.set_heights(UVec2::ZERO, ndarray::Array2::from_elem((17, 17), 5.0).view());
    renderer.update_cell_data(cell, Arc::new(raised)).unwrap();

    let after = renderer.render(&view)[0].bounding_box;
    assert!(after.max.y > before.max.y);
    assert_eq!(after.min.y, after.max.y);
}
