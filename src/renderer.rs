//! The block renderer: keeps the render data of the loaded cells and produces the render
//! meshes of a view each frame.

use crate::{
    cell::{match_cell, CellId, TerrainCells},
    config::TerrainRenderProperties,
    math::{child_visit_order, ClipPlanes},
    render::{index_buffer::IndexBufferCache, CullContext, RenderMesh},
    result::{TerrainError, TerrainResult},
    terrain_data::{MaterialId, TerrainCellData},
};
use bevy::{math::Affine3A, prelude::*};
use image::DynamicImage;
use std::sync::Arc;

/// Describes the camera a frame is rendered for, relative to one terrain object.
#[derive(Clone, Debug)]
pub struct TerrainViewParams {
    /// Camera position in object space.
    pub camera_position: Vec3,
    /// View direction in object space.
    pub view_direction: Vec3,
    /// Clip planes in object space.
    pub clip_planes: ClipPlanes,
    pub world_from_object: Affine3A,
}

impl TerrainViewParams {
    /// Derives the view from the camera transform, culling against `frustum` if given.
    pub fn new(
        world_from_object: Affine3A,
        camera: &GlobalTransform,
        frustum: Option<&bevy::render::primitives::Frustum>,
    ) -> Self {
        let object_from_world = world_from_object.inverse();

        Self {
            camera_position: object_from_world.transform_point3(camera.translation()),
            view_direction: object_from_world.transform_vector3(*camera.forward()),
            clip_planes: frustum
                .map(|frustum| ClipPlanes::from_frustum(frustum, &world_from_object))
                .unwrap_or_default(),
            world_from_object,
        }
    }

    /// A view without clip planes, with the terrain at the world origin.
    pub fn looking_from(camera_position: Vec3, view_direction: Vec3) -> Self {
        Self {
            camera_position,
            view_direction,
            clip_planes: ClipPlanes::default(),
            world_from_object: Affine3A::IDENTITY,
        }
    }

    pub fn with_clip_planes(mut self, clip_planes: ClipPlanes) -> Self {
        self.clip_planes = clip_planes;
        self
    }
}

/// Renders terrain cells as quadtrees of blocks with a fixed vertex resolution.
///
/// Every frame the quadtree of each visible cell is refined around the camera, then the leaves
/// inside the view are turned into [`RenderMesh`]es.
#[derive(Resource, Default)]
pub struct BruteBlockRenderer {
    cells: TerrainCells,
    index_buffers: IndexBufferCache,
    palette: Vec<MaterialId>,
    active_cells: Vec<CellId>,
    render_meshes: Vec<RenderMesh>,
    default_properties: TerrainRenderProperties,
    /// Skips refinement and only culls, for inspecting a tessellation.
    pub freeze_lod: bool,
}

impl BruteBlockRenderer {
    pub fn new(default_properties: TerrainRenderProperties) -> Self {
        Self {
            default_properties: default_properties.normalized(),
            ..default()
        }
    }

    pub fn cells(&self) -> &TerrainCells {
        &self.cells
    }

    pub fn active_cells(&self) -> &[CellId] {
        &self.active_cells
    }

    pub fn default_properties(&self) -> &TerrainRenderProperties {
        &self.default_properties
    }

    pub fn render_meshes(&self) -> &[RenderMesh] {
        &self.render_meshes
    }

    /// Sets up the render data of a cell and connects it to the adjacent loaded cells.
    pub fn on_cell_load(
        &mut self,
        data: Arc<dyn TerrainCellData>,
        properties: Option<TerrainRenderProperties>,
    ) -> TerrainResult<CellId> {
        let properties = properties.unwrap_or_else(|| self.default_properties.clone());
        let cell = self.cells.insert(data.clone(), properties)?;

        let size = data.material_map_size();
        self.cells
            .cell_mut(cell)?
            .splat
            .set_palette_size(self.palette.len(), size);
        self.cells.setup_root(cell)?;

        for &other in &self.active_cells {
            let Some(other_data) = self.cells.get(other).map(|other| other.data.clone()) else {
                continue;
            };
            if let Some(side) = match_cell(&*data, &*other_data) {
                self.cells.connect_cell(cell, other, side)?;
            }
        }

        self.active_cells.push(cell);
        info!(
            "Loaded terrain cell {cell} at {} ({}x{} samples).",
            data.position(),
            data.grid_width(),
            data.grid_height()
        );

        Ok(cell)
    }

    pub fn on_cell_unload(&mut self, cell: CellId) -> TerrainResult<()> {
        self.active_cells.retain(|&active| active != cell);
        self.render_meshes.retain(|mesh| mesh.cell != cell);
        self.cells
            .remove(cell)
            .ok_or(TerrainError::UnknownCell(cell))?;

        info!("Unloaded terrain cell {cell}.");
        Ok(())
    }

    /// Drops all cached vertex data of `cell` after its heights changed.
    pub fn on_height_update(&mut self, cell: CellId) -> TerrainResult<()> {
        if let Some(root) = self.cells.root(cell) {
            self.cells.invalidate_geometry(root, true);
        } else {
            self.cells.cell(cell)?;
        }
        Ok(())
    }

    /// Replaces the data of `cell`, for example with an edited copy of its heights.
    ///
    /// The new data must have the same grid size.
    pub fn update_cell_data(
        &mut self,
        cell: CellId,
        data: Arc<dyn TerrainCellData>,
    ) -> TerrainResult<()> {
        let cell_data = self.cells.cell_mut(cell)?;
        let (width, height) = (data.grid_width(), data.grid_height());
        if (width, height) != (cell_data.data.grid_width(), cell_data.data.grid_height()) {
            return Err(TerrainError::InvalidGrid { width, height });
        }
        cell_data.data = data;
        self.on_height_update(cell)
    }

    pub fn set_material_palette(&mut self, palette: Vec<MaterialId>) {
        let cells: Vec<_> = self.cells.iter().map(|(id, _)| id).collect();
        for cell in cells {
            if let Some(cell) = self.cells.get_mut(cell) {
                let size = cell.data.material_map_size();
                cell.splat.set_palette_size(palette.len(), size);
            }
        }
        self.palette = palette;
    }

    pub fn material_palette(&self) -> &[MaterialId] {
        &self.palette
    }

    /// Writes an index mask (one palette index per texel) into the mask layers of `cell`.
    ///
    /// `mask` holds only the texels inside `rect`: row `r` of the rectangle starts at
    /// `r * pitch`. A mask covering the whole material map must be offset to `rect.min` first.
    pub fn on_material_mask_update(
        &mut self,
        cell: CellId,
        rect: URect,
        mask: &[u8],
        pitch: usize,
    ) -> TerrainResult<()> {
        self.cells
            .cell_mut(cell)?
            .splat
            .update_from_index_mask(rect, mask, pitch);
        Ok(())
    }

    /// Writes the weights of the mask layer of palette entry `layer`, laid out inside `rect`
    /// like the mask of [`Self::on_material_mask_update`].
    pub fn on_material_mask_layer_update(
        &mut self,
        cell: CellId,
        layer: usize,
        rect: URect,
        weights: &[u8],
        pitch: usize,
    ) -> TerrainResult<()> {
        let splat = &mut self.cells.cell_mut(cell)?.splat;
        if !splat.update_layer_weights(layer, rect, weights, pitch) {
            return Err(TerrainError::InvalidParameter {
                name: "material mask layer".to_string(),
                value: layer.to_string(),
            });
        }
        Ok(())
    }

    pub fn on_alpha_map_update(
        &mut self,
        cell: CellId,
        material: MaterialId,
        alpha_map: &DynamicImage,
    ) -> TerrainResult<()> {
        self.cells
            .cell_mut(cell)?
            .splat
            .update_alpha_map(material, alpha_map);
        Ok(())
    }

    pub fn remove_alpha_map(&mut self, cell: CellId, material: MaterialId) -> TerrainResult<()> {
        self.cells.cell_mut(cell)?.splat.remove_alpha_map(material);
        Ok(())
    }

    pub fn set_properties(
        &mut self,
        cell: CellId,
        properties: TerrainRenderProperties,
    ) -> TerrainResult<()> {
        self.cells.set_properties(cell, properties)?;
        info!("Updated the render properties of terrain cell {cell}.");
        Ok(())
    }

    /// Sets the properties used for cells loaded without their own and applies them to all
    /// loaded cells.
    pub fn set_default_properties(&mut self, properties: TerrainRenderProperties) {
        self.default_properties = properties.normalized();

        for cell in self.active_cells.clone() {
            if let Err(error) = self
                .cells
                .set_properties(cell, self.default_properties.clone())
            {
                warn!("Failed to update terrain cell {cell}: {error}");
            }
        }
        info!("Updated the default terrain render properties.");
    }

    /// Applies `change` to the properties of every loaded cell.
    pub fn update_properties(&mut self, mut change: impl FnMut(&mut TerrainRenderProperties)) {
        change(&mut self.default_properties);

        for cell in self.active_cells.clone() {
            let Some(mut properties) = self.cells.get(cell).map(|cell| cell.properties.clone())
            else {
                continue;
            };
            change(&mut properties);
            if let Err(error) = self.cells.set_properties(cell, properties) {
                warn!("Failed to update terrain cell {cell}: {error}");
            }
        }
    }

    /// Refines the quadtrees of the visible `cells` for the view.
    ///
    /// Running out of blocks is not fatal, the cell keeps its current tessellation.
    pub fn update_lod(&mut self, view: &TerrainViewParams, cells: &[CellId]) {
        if self.freeze_lod {
            return;
        }

        let order = child_visit_order(view.view_direction);

        for &cell in cells {
            if !self.is_visible(cell) {
                continue;
            }

            let result = self
                .cells
                .setup_root(cell)
                .and_then(|root| self.cells.compute_lod(root, view.camera_position, &order));

            if let Err(error) = result {
                warn!("Terrain cell {cell} could not be refined: {error}");
            }
        }
    }

    /// Appends the render meshes of the visible leaves of `cells` to `meshes`.
    pub fn cull(&mut self, view: &TerrainViewParams, cells: &[CellId], meshes: &mut Vec<RenderMesh>) {
        let mut context = CullContext {
            clip_planes: &view.clip_planes,
            camera_position: view.camera_position,
            world_from_object: view.world_from_object,
            palette: &self.palette,
            index_buffers: &mut self.index_buffers,
        };

        for &cell in cells {
            let visible = self
                .cells
                .get(cell)
                .is_some_and(|cell| cell.properties.visible);
            if !visible {
                continue;
            }

            if let Some(root) = self.cells.root(cell) {
                let mask = view.clip_planes.full_mask();
                self.cells
                    .cull_render_meshes(root, &mut context, mask, meshes);
            }
        }
    }

    /// Refines and culls all loaded cells for `view`.
    pub fn render(&mut self, view: &TerrainViewParams) -> &[RenderMesh] {
        let cells = self.active_cells.clone();
        self.render_cells(view, &cells)
    }

    /// Refines and culls `cells` for `view`.
    ///
    /// All cells are refined before any is culled, since splitting a block may split blocks of
    /// neighbouring cells as well.
    pub fn render_cells(&mut self, view: &TerrainViewParams, cells: &[CellId]) -> &[RenderMesh] {
        self.update_lod(view, cells);

        let mut meshes = std::mem::take(&mut self.render_meshes);
        meshes.clear();
        self.cull(view, cells, &mut meshes);
        self.render_meshes = meshes;

        &self.render_meshes
    }

    fn is_visible(&self, cell: CellId) -> bool {
        self.cells
            .get(cell)
            .is_some_and(|cell| cell.properties.visible)
    }

    pub fn block_count(&self, cell: CellId) -> usize {
        self.cells.get(cell).map_or(0, |cell| cell.block_count())
    }

    pub fn leaf_count(&self, cell: CellId) -> usize {
        self.cells.leaves(cell).len()
    }
}
