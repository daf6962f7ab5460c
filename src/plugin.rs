use crate::{
    cell::CellId,
    config::TerrainRenderProperties,
    render::RenderMesh,
    renderer::{BruteBlockRenderer, TerrainViewParams},
    terrain_data::TerrainCellData,
};
use bevy::{
    prelude::*,
    render::{primitives::Frustum, view::VisibilitySystems},
    utils::HashMap,
};
use bevy_common_assets::ron::RonAssetPlugin;
use std::sync::Arc;

/// A terrain cell. The transform of the entity places the object space of the cell.
#[derive(Component, Clone)]
pub struct TerrainCell {
    pub data: Arc<dyn TerrainCellData>,
    /// Overrides the default render properties for this cell.
    pub properties: Option<TerrainRenderProperties>,
}

impl TerrainCell {
    pub fn new(data: impl TerrainCellData + 'static) -> Self {
        Self {
            data: Arc::new(data),
            properties: None,
        }
    }

    pub fn with_properties(mut self, properties: TerrainRenderProperties) -> Self {
        self.properties = Some(properties);
        self
    }
}

/// Inserted on [`TerrainCell`] entities once the renderer has loaded them.
#[derive(Component, Clone, Copy, Debug, PartialEq, Eq)]
pub struct TerrainCellId(pub CellId);

/// Marks the camera the terrain is refined and culled for.
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct TerrainView;

/// The render meshes produced for the current frame.
#[derive(Resource, Default, Deref)]
pub struct TerrainRenderMeshes(pub Vec<RenderMesh>);

/// The default render properties loaded from a `*.terrain.ron` file.
#[derive(Resource, Clone)]
pub struct TerrainPropertiesHandle(pub Handle<TerrainRenderProperties>);

#[derive(Resource, Default)]
struct LoadedCells(HashMap<Entity, CellId>);

/// The plugin for the block terrain renderer.
#[derive(Default)]
pub struct TerrainBlockPlugin {
    /// Asset path of the default render properties.
    pub properties_path: Option<String>,
}

impl Plugin for TerrainBlockPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(RonAssetPlugin::<TerrainRenderProperties>::new(&["terrain.ron"]))
            .init_resource::<BruteBlockRenderer>()
            .init_resource::<TerrainRenderMeshes>()
            .init_resource::<LoadedCells>()
            .add_systems(
                PostUpdate,
                (
                    apply_render_properties,
                    load_terrain_cells,
                    unload_terrain_cells,
                    update_terrain_meshes,
                )
                    .chain()
                    .after(VisibilitySystems::UpdateFrusta)
                    .after(TransformSystem::TransformPropagate),
            );

        if let Some(path) = &self.properties_path {
            let handle = app.world().resource::<AssetServer>().load(path.clone());
            app.insert_resource(TerrainPropertiesHandle(handle));
        }
    }
}

fn load_terrain_cells(
    mut commands: Commands,
    mut renderer: ResMut<BruteBlockRenderer>,
    mut loaded: ResMut<LoadedCells>,
    cells: Query<(Entity, &TerrainCell), Added<TerrainCell>>,
) {
    for (entity, cell) in &cells {
        match renderer.on_cell_load(cell.data.clone(), cell.properties.clone()) {
            Ok(id) => {
                loaded.0.insert(entity, id);
                commands.entity(entity).insert(TerrainCellId(id));
            }
            Err(error) => error!("Failed to load the terrain cell of {entity}: {error}"),
        }
    }
}

fn unload_terrain_cells(
    mut renderer: ResMut<BruteBlockRenderer>,
    mut loaded: ResMut<LoadedCells>,
    mut removed: RemovedComponents<TerrainCell>,
) {
    for entity in removed.read() {
        let Some(id) = loaded.0.remove(&entity) else {
            continue;
        };
        if let Err(error) = renderer.on_cell_unload(id) {
            error!("Failed to unload the terrain cell of {entity}: {error}");
        }
    }
}

fn apply_render_properties(
    mut renderer: ResMut<BruteBlockRenderer>,
    mut events: EventReader<AssetEvent<TerrainRenderProperties>>,
    assets: Res<Assets<TerrainRenderProperties>>,
    handle: Option<Res<TerrainPropertiesHandle>>,
) {
    let Some(handle) = handle else {
        events.clear();
        return;
    };

    for event in events.read() {
        let id = match event {
            AssetEvent::LoadedWithDependencies { id } | AssetEvent::Modified { id } => *id,
            _ => continue,
        };
        if id != handle.0.id() {
            continue;
        }
        if let Some(properties) = assets.get(id) {
            renderer.set_default_properties(properties.clone());
        }
    }
}

fn update_terrain_meshes(
    mut renderer: ResMut<BruteBlockRenderer>,
    mut meshes: ResMut<TerrainRenderMeshes>,
    views: Query<(&GlobalTransform, Option<&Frustum>), With<TerrainView>>,
    cells: Query<(&TerrainCellId, Option<&GlobalTransform>)>,
) {
    meshes.0.clear();

    let Some((camera, frustum)) = views.iter().next() else {
        return;
    };

    let cell_views: Vec<_> = cells
        .iter()
        .map(|(&TerrainCellId(id), transform)| {
            let world_from_object = transform.map_or_else(default, GlobalTransform::affine);
            (id, TerrainViewParams::new(world_from_object, camera, frustum))
        })
        .collect();

    // all cells are refined before any is culled, refinement may reach across cell borders
    for (id, view) in &cell_views {
        renderer.update_lod(view, &[*id]);
    }
    for (id, view) in &cell_views {
        renderer.cull(view, &[*id], &mut meshes.0);
    }
}
