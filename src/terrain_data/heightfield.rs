use crate::terrain_data::{MaterialId, TerrainCellData};
use bevy::prelude::*;
use image::DynamicImage;
use itertools::iproduct;
use ndarray::{s, Array2, ArrayView2};
use std::{ops::Range, path::Path};

/// A terrain cell stored in memory.
///
/// Normals, tangents and bitangents are derived from the heights with central differences
/// (one sided along the border) and kept up to date by [`HeightfieldCell::set_heights`].
#[derive(Clone, Debug)]
pub struct HeightfieldCell {
    position: Vec2,
    size: Vec3,
    heights: Array2<f32>,
    normals: Array2<Vec3>,
    tangents: Array2<Vec3>,
    bitangents: Array2<Vec3>,
    material_map_size: Option<UVec2>,
    base_material: Option<MaterialId>,
    splat_base_material: Option<MaterialId>,
    alpha_splat_material: Option<MaterialId>,
}

impl HeightfieldCell {
    /// Creates a cell from a `[[row, column]]` grid of heights.
    pub fn new(position: Vec2, size: Vec3, heights: Array2<f32>) -> Self {
        let shape = heights.dim();

        let mut cell = Self {
            position,
            size,
            heights,
            normals: Array2::from_elem(shape, Vec3::Y),
            tangents: Array2::from_elem(shape, Vec3::X),
            bitangents: Array2::from_elem(shape, Vec3::NEG_Z),
            material_map_size: None,
            base_material: None,
            splat_base_material: None,
            alpha_splat_material: None,
        };
        cell.update_frames(0..shape.0, 0..shape.1);
        cell
    }

    /// Creates a cell whose height at `(column, row)` is given by `height`.
    pub fn from_fn(
        position: Vec2,
        size: Vec3,
        width: usize,
        height: usize,
        sample: impl Fn(usize, usize) -> f32,
    ) -> Self {
        let heights = Array2::from_shape_fn((height, width), |(row, column)| sample(column, row));
        Self::new(position, size, heights)
    }

    pub fn flat(position: Vec2, size: Vec3, width: usize, height: usize) -> Self {
        Self::new(position, size, Array2::zeros((height, width)))
    }

    /// Creates a cell from a grey scale height map, black is zero and white is `size.y`.
    pub fn from_image(position: Vec2, size: Vec3, image: &DynamicImage) -> Self {
        let image = image.to_luma16();
        let (width, height) = image.dimensions();

        Self::from_fn(position, size, width as usize, height as usize, |column, row| {
            let value = image.get_pixel(column as u32, row as u32).0[0];
            value as f32 / u16::MAX as f32 * size.y
        })
    }

    pub fn load_image<P: AsRef<Path>>(position: Vec2, size: Vec3, path: P) -> anyhow::Result<Self> {
        let image = image::open(path)?;
        Ok(Self::from_image(position, size, &image))
    }

    pub fn with_material_map_size(mut self, size: UVec2) -> Self {
        self.material_map_size = Some(size);
        self
    }

    pub fn with_base_material(mut self, material: MaterialId) -> Self {
        self.base_material = Some(material);
        self
    }

    pub fn with_splat_base_material(mut self, material: MaterialId) -> Self {
        self.splat_base_material = Some(material);
        self
    }

    pub fn with_alpha_splat_material(mut self, material: MaterialId) -> Self {
        self.alpha_splat_material = Some(material);
        self
    }

    pub fn height(&self, column: usize, row: usize) -> f32 {
        self.heights[[row, column]]
    }

    /// Overwrites the heights starting at `origin` (column, row) with `patch`.
    ///
    /// Samples outside of the grid are ignored.
    pub fn set_heights(&mut self, origin: UVec2, patch: ArrayView2<f32>) {
        let (rows, columns) = self.heights.dim();
        let (top, left) = (origin.y as usize, origin.x as usize);
        if top >= rows || left >= columns {
            return;
        }

        let bottom = (top + patch.nrows()).min(rows);
        let right = (left + patch.ncols()).min(columns);

        self.heights
            .slice_mut(s![top..bottom, left..right])
            .assign(&patch.slice(s![..bottom - top, ..right - left]));

        // the derivatives of the samples around the patch change as well
        self.update_frames(
            top.saturating_sub(1)..(bottom + 1).min(rows),
            left.saturating_sub(1)..(right + 1).min(columns),
        );
    }

    fn update_frames(&mut self, rows: Range<usize>, columns: Range<usize>) {
        let (height, width) = self.heights.dim();
        let step = Vec2::new(
            self.size.x / width.saturating_sub(1).max(1) as f32,
            self.size.z / height.saturating_sub(1).max(1) as f32,
        );

        for (row, column) in iproduct!(rows, columns) {
            let (left, right) = (column.saturating_sub(1), (column + 1).min(width - 1));
            let (up, down) = (row.saturating_sub(1), (row + 1).min(height - 1));

            let dfdx = match right - left {
                0 => 0.0,
                span => {
                    (self.heights[[row, right]] - self.heights[[row, left]]) / (span as f32 * step.x)
                }
            };
            let dfdy = match down - up {
                0 => 0.0,
                span => (self.heights[[down, column]] - self.heights[[up, column]]) / (span as f32 * step.y),
            };

            self.normals[[row, column]] = Vec3::new(-dfdx, 1.0, dfdy).normalize();
            self.tangents[[row, column]] = Vec3::new(1.0, dfdx, 0.0).normalize();
            self.bitangents[[row, column]] = Vec3::new(0.0, dfdy, -1.0).normalize();
        }
    }
}

impl TerrainCellData for HeightfieldCell {
    fn position(&self) -> Vec2 {
        self.position
    }

    fn size(&self) -> Vec3 {
        self.size
    }

    fn heights(&self) -> ArrayView2<'_, f32> {
        self.heights.view()
    }

    fn normals(&self) -> ArrayView2<'_, Vec3> {
        self.normals.view()
    }

    fn tangents(&self) -> ArrayView2<'_, Vec3> {
        self.tangents.view()
    }

    fn bitangents(&self) -> ArrayView2<'_, Vec3> {
        self.bitangents.view()
    }

    fn material_map_size(&self) -> UVec2 {
        self.material_map_size
            .unwrap_or(UVec2::new(self.grid_width() as u32, self.grid_height() as u32))
    }

    fn base_material(&self) -> Option<MaterialId> {
        self.base_material
    }

    fn splat_base_material(&self) -> Option<MaterialId> {
        self.splat_base_material
    }

    fn alpha_splat_material(&self) -> Option<MaterialId> {
        self.alpha_splat_material
    }
}
