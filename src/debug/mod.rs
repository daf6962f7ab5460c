//! Contains a debug resource and systems controlling it to inspect the block tessellation.
use crate::{plugin::TerrainRenderMeshes, renderer::BruteBlockRenderer};
use bevy::{color::palettes::basic, prelude::*};

/// Adds a terrain debug config and debug control systems.
pub struct TerrainDebugPlugin;

impl Plugin for TerrainDebugPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<DebugTerrain>().add_systems(
            Update,
            (
                toggle_debug,
                change_config,
                draw_block_bounds.run_if(|debug: Res<DebugTerrain>| debug.show_blocks),
            ),
        );
    }
}

#[derive(Clone, Default, Resource)]
pub struct DebugTerrain {
    /// Keeps the current tessellation while the camera moves.
    pub freeze: bool,
    /// Draws the bounds of every rendered leaf.
    pub show_blocks: bool,
}

pub fn toggle_debug(
    input: Res<ButtonInput<KeyCode>>,
    mut debug: ResMut<DebugTerrain>,
    mut renderer: ResMut<BruteBlockRenderer>,
) {
    if input.just_pressed(KeyCode::KeyF) {
        debug.freeze = !debug.freeze;
        renderer.freeze_lod = debug.freeze;
        println!(
            "{} the lod.",
            if debug.freeze { "Froze" } else { "Unfroze" }
        )
    }
    if input.just_pressed(KeyCode::KeyB) {
        debug.show_blocks = !debug.show_blocks;
        println!(
            "Toggled the block view {}.",
            if debug.show_blocks { "on" } else { "off" }
        )
    }
}

pub fn change_config(
    input: Res<ButtonInput<KeyCode>>,
    mut renderer: ResMut<BruteBlockRenderer>,
) {
    let delta = if input.just_pressed(KeyCode::KeyN) {
        -16.0
    } else if input.just_pressed(KeyCode::KeyE) {
        16.0
    } else {
        return;
    };

    renderer.update_properties(|properties| {
        properties.lod_split_coeff = (properties.lod_split_coeff + delta).max(1.0);
    });
    println!(
        "Lod split coefficient: {}",
        renderer.default_properties().lod_split_coeff
    );
}

fn draw_block_bounds(meshes: Res<TerrainRenderMeshes>, mut gizmos: Gizmos) {
    for mesh in meshes.iter() {
        let bounds = &mesh.bounding_box;
        let transform = Transform::from_translation(bounds.center())
            .with_scale(bounds.size().max(Vec3::splat(0.01)));
        gizmos.cuboid(transform, basic::LIME);
    }
}
