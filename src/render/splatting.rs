//! Material layers drawn on top of each other to texture a cell up close.
//!
//! Every entry of the material palette gets a mask layer per cell, whose alpha map stores the
//! weight of that material. Additional alpha map layers can be attached to a cell for single
//! materials. Layers whose mask is empty are skipped while rendering.

use crate::{
    config::RenderPriority,
    render::ShaderContext,
    terrain_data::{MaterialId, TerrainCellData},
};
use bevy::prelude::*;
use image::{DynamicImage, Rgba, RgbaImage};

fn alpha_map_scale(image: &RgbaImage) -> Vec4 {
    let (width, height) = (image.width().max(1) as f32, image.height().max(1) as f32);
    Vec4::new((width - 1.0) / width, (height - 1.0) / height, 0.5 / width, 0.5 / height)
}

/// A mask texel carrying `weight` in its alpha channel.
fn mask_pixel(weight: u8) -> Rgba<u8> {
    Rgba([255, 255, 255, weight])
}

/// The weights of one palette material on a cell.
#[derive(Clone, Debug)]
pub struct MaterialMaskLayer {
    alpha_map: RgbaImage,
    used: bool,
}

impl MaterialMaskLayer {
    fn new(size: UVec2) -> Self {
        Self {
            alpha_map: RgbaImage::from_pixel(size.x, size.y, mask_pixel(0)),
            used: false,
        }
    }

    pub fn alpha_map(&self) -> &RgbaImage {
        &self.alpha_map
    }

    /// Whether any texel of the mask has a non zero weight.
    pub fn is_used(&self) -> bool {
        self.used
    }

    /// Scale and offset that map texture coordinates onto the texel centers of the alpha map.
    pub fn alpha_map_scale(&self) -> Vec4 {
        alpha_map_scale(&self.alpha_map)
    }

    fn update_used(&mut self) {
        self.used = self.alpha_map.pixels().any(|pixel| pixel.0[3] > 0);
    }
}

/// A material blended over a cell with its own alpha map.
#[derive(Clone, Debug)]
pub struct AlphaMapLayer {
    pub material: MaterialId,
    alpha_map: RgbaImage,
}

impl AlphaMapLayer {
    pub fn alpha_map(&self) -> &RgbaImage {
        &self.alpha_map
    }

    pub fn alpha_map_scale(&self) -> Vec4 {
        alpha_map_scale(&self.alpha_map)
    }
}

/// A material to draw a leaf with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshLayer {
    pub material: MaterialId,
    pub context: ShaderContext,
    pub priority: RenderPriority,
}

/// The splatting layers of one cell.
#[derive(Clone, Debug, Default)]
pub struct SplatLayers {
    mask_layers: Vec<MaterialMaskLayer>,
    alpha_layers: Vec<AlphaMapLayer>,
}

impl SplatLayers {
    pub fn mask_layers(&self) -> &[MaterialMaskLayer] {
        &self.mask_layers
    }

    pub fn alpha_layers(&self) -> &[AlphaMapLayer] {
        &self.alpha_layers
    }

    /// Keeps one mask layer per palette entry, new layers start out empty.
    pub(crate) fn set_palette_size(&mut self, count: usize, size: UVec2) {
        self.mask_layers
            .resize_with(count, || MaterialMaskLayer::new(size));
    }

    /// Writes an index mask into all layers: inside `rect` a layer is opaque where the mask
    /// holds its index and transparent elsewhere.
    ///
    /// `mask` holds the rows of `rect`, `pitch` bytes apart.
    pub(crate) fn update_from_index_mask(&mut self, rect: URect, mask: &[u8], pitch: usize) {
        for (index, layer) in self.mask_layers.iter_mut().enumerate() {
            write_rect(&mut layer.alpha_map, rect, mask, pitch, |value| {
                if value as usize == index {
                    255
                } else {
                    0
                }
            });
            layer.update_used();
        }
    }

    /// Writes the weights of a single layer inside `rect`. Returns false for unknown layers.
    pub(crate) fn update_layer_weights(
        &mut self,
        layer: usize,
        rect: URect,
        weights: &[u8],
        pitch: usize,
    ) -> bool {
        let Some(layer) = self.mask_layers.get_mut(layer) else {
            return false;
        };

        write_rect(&mut layer.alpha_map, rect, weights, pitch, |value| value);
        layer.update_used();
        true
    }

    /// Sets the alpha map of `material`, images without alpha use their intensity instead.
    pub(crate) fn update_alpha_map(&mut self, material: MaterialId, image: &DynamicImage) {
        let alpha_map = if image.color().has_alpha() {
            image.to_rgba8()
        } else {
            let rgb = image.to_rgb8();
            RgbaImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                let [r, g, b] = rgb.get_pixel(x, y).0;
                let intensity = ((r as u16 + g as u16 + b as u16) / 3) as u8;
                Rgba([r, g, b, intensity])
            })
        };

        match self
            .alpha_layers
            .iter_mut()
            .find(|layer| layer.material == material)
        {
            Some(layer) => layer.alpha_map = alpha_map,
            None => self.alpha_layers.push(AlphaMapLayer {
                material,
                alpha_map,
            }),
        }
    }

    pub(crate) fn remove_alpha_map(&mut self, material: MaterialId) {
        self.alpha_layers.retain(|layer| layer.material != material);
    }

    /// The materials a leaf of this cell is drawn with, in drawing order.
    pub(crate) fn mesh_layers(
        &self,
        data: &dyn TerrainCellData,
        palette: &[MaterialId],
        splatting: bool,
        splat_priority: RenderPriority,
    ) -> Vec<MeshLayer> {
        let common = |material| MeshLayer {
            material,
            context: ShaderContext::Common,
            priority: RenderPriority::default(),
        };

        let mut layers: Vec<_> = if splatting {
            [data.splat_base_material(), data.alpha_splat_material()]
                .into_iter()
                .flatten()
                .map(common)
                .collect()
        } else {
            data.base_material().map(common).into_iter().collect()
        };

        if splatting {
            for (index, &material) in palette.iter().enumerate() {
                if self.mask_layers.get(index).is_some_and(MaterialMaskLayer::is_used) {
                    layers.push(MeshLayer {
                        material,
                        context: ShaderContext::MaterialMask(index),
                        priority: splat_priority,
                    });
                }
            }
        }

        // alpha map layers are drawn at any distance
        for (index, layer) in self.alpha_layers.iter().enumerate() {
            layers.push(MeshLayer {
                material: layer.material,
                context: ShaderContext::AlphaMap(index),
                priority: splat_priority,
            });
        }

        layers
    }
}

/// Whether a leaf at `distance` from the camera is drawn with its splatting layers.
pub(crate) fn use_splatting(
    distance: f32,
    splat_distance: f32,
    palette: &[MaterialId],
    data: &dyn TerrainCellData,
) -> bool {
    distance < splat_distance && (!palette.is_empty() || data.alpha_splat_material().is_some())
}

fn write_rect(
    image: &mut RgbaImage,
    rect: URect,
    source: &[u8],
    pitch: usize,
    weight: impl Fn(u8) -> u8,
) {
    let right = rect.max.x.min(image.width());
    let bottom = rect.max.y.min(image.height());

    for y in rect.min.y..bottom {
        for x in rect.min.x..right {
            let offset = (y - rect.min.y) as usize * pitch + (x - rect.min.x) as usize;
            if let Some(&value) = source.get(offset) {
                image.put_pixel(x, y, mask_pixel(weight(value)));
            }
        }
    }
}
