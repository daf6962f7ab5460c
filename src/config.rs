//! Render properties of terrain cells.

use crate::result::{TerrainError, TerrainResult};
use anyhow::Result;
use bevy::{asset::Asset, reflect::TypePath};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Ordering hint for the graphics layer, larger priorities are drawn later.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RenderPriority(pub i32);

impl RenderPriority {
    /// Priority of the splatting layers, drawn on top of the base layer.
    pub const SPLAT: Self = Self(1);
}

/// Rounds `value` down to a power of two, zero stays zero.
pub(crate) fn floor_power_of_two(value: usize) -> usize {
    match value {
        0 => 0,
        value => 1 << (usize::BITS - 1 - value.leading_zeros()),
    }
}

/// Properties controlling how the blocks of a cell are tessellated and shaded.
///
/// Can be loaded as a `*.terrain.ron` asset.
#[derive(Asset, TypePath, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainRenderProperties {
    pub visible: bool,
    /// Quads along each side of a leaf block, rounded down to a power of two.
    pub block_resolution: u32,
    /// Blocks are never split below this grid step.
    pub min_steps: u32,
    /// Scales the distance at which blocks are split.
    pub lod_split_coeff: f32,
    /// Blocks closer than this distance are rendered with the splatting layers.
    pub splat_distance: f32,
    pub splat_render_priority: RenderPriority,
    /// Upper bound on the number of blocks of one cell, unbounded if `None`.
    pub max_blocks_per_cell: Option<usize>,
}

impl Default for TerrainRenderProperties {
    fn default() -> Self {
        Self {
            visible: true,
            block_resolution: 32,
            min_steps: 1,
            lod_split_coeff: 128.0,
            splat_distance: 100.0,
            splat_render_priority: RenderPriority::SPLAT,
            max_blocks_per_cell: None,
        }
    }
}

impl TerrainRenderProperties {
    pub const PARAMETER_NAMES: [&'static str; 6] = [
        "visible",
        "block resolution",
        "min steps",
        "lod splitcoeff",
        "splat distance",
        "splat render priority",
    ];

    pub fn set_block_resolution(&mut self, resolution: u32) {
        self.block_resolution = floor_power_of_two(resolution as usize).max(2) as u32;
    }

    pub fn set_min_steps(&mut self, min_steps: u32) {
        self.min_steps = min_steps.max(1);
    }

    /// Brings deserialized or hand written values into their valid ranges.
    pub fn normalized(mut self) -> Self {
        self.set_block_resolution(self.block_resolution);
        self.set_min_steps(self.min_steps);
        self
    }

    /// Sets a property by its name, parsing the value from text.
    pub fn set_parameter(&mut self, name: &str, value: &str) -> TerrainResult<()> {
        fn parse<T: std::str::FromStr>(name: &str, value: &str) -> TerrainResult<T> {
            value
                .trim()
                .parse()
                .map_err(|_| TerrainError::InvalidParameter {
                    name: name.to_string(),
                    value: value.to_string(),
                })
        }

        match name {
            "visible" => self.visible = parse(name, value)?,
            "block resolution" => self.set_block_resolution(parse(name, value)?),
            "min steps" => self.set_min_steps(parse(name, value)?),
            "lod splitcoeff" => self.lod_split_coeff = parse(name, value)?,
            "splat distance" => self.splat_distance = parse(name, value)?,
            "splat render priority" => self.splat_render_priority = RenderPriority(parse(name, value)?),
            _ => return Err(TerrainError::UnknownParameter(name.to_string())),
        }

        Ok(())
    }

    /// Reads a property by its name, formatted as text.
    pub fn parameter(&self, name: &str) -> Option<String> {
        let value = match name {
            "visible" => self.visible.to_string(),
            "block resolution" => self.block_resolution.to_string(),
            "min steps" => self.min_steps.to_string(),
            "lod splitcoeff" => self.lod_split_coeff.to_string(),
            "splat distance" => self.splat_distance.to_string(),
            "splat render priority" => self.splat_render_priority.0.to_string(),
            _ => return None,
        };

        Some(value)
    }

    pub fn from_ron_str(text: &str) -> TerrainResult<Self> {
        let properties: Self = ron::from_str(text)?;
        Ok(properties.normalized())
    }

    pub fn to_ron_string(&self) -> Result<String> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        Ok(text)
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::from_ron_str(&text)?)
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_ron_string()?)?;
        Ok(())
    }
}
