use crate::math::Side;
use bevy::prelude::*;
use bitflags::bitflags;
use std::sync::Arc;

bitflags! {
    /// Sides of a leaf that border a coarser leaf and are therefore meshed at half resolution.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BorderMask: u8 {
        const TOP = 1 << 0;
        const RIGHT = 1 << 1;
        const LEFT = 1 << 2;
        const BOTTOM = 1 << 3;
    }
}

impl BorderMask {
    pub fn from_side(side: Side) -> Self {
        Self::from_bits_truncate(1 << side.index())
    }

    pub fn index(self) -> usize {
        self.bits() as usize
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexData {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

/// A triangle strip over the vertex grid of a leaf, degenerate triangles join the rows.
#[derive(Clone, Debug)]
pub struct IndexBuffer {
    data: IndexData,
    max_index: u32,
}

impl IndexBuffer {
    fn new(indices: Vec<u32>, max_index: u32) -> Self {
        let data = if max_index > u16::MAX as u32 {
            IndexData::U32(indices)
        } else {
            IndexData::U16(indices.into_iter().map(|index| index as u16).collect())
        };

        Self { data, max_index }
    }

    pub fn data(&self) -> &IndexData {
        &self.data
    }

    pub fn count(&self) -> usize {
        match &self.data {
            IndexData::U16(indices) => indices.len(),
            IndexData::U32(indices) => indices.len(),
        }
    }

    /// The largest vertex index the buffer may reference.
    pub fn max_index(&self) -> u32 {
        self.max_index
    }

    pub fn is_32_bit(&self) -> bool {
        matches!(self.data, IndexData::U32(_))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.data {
            IndexData::U16(indices) => bytemuck::cast_slice(indices),
            IndexData::U32(indices) => bytemuck::cast_slice(indices),
        }
    }

    pub fn indices(&self) -> Vec<u32> {
        match &self.data {
            IndexData::U16(indices) => indices.iter().map(|&index| index as u32).collect(),
            IndexData::U32(indices) => indices.clone(),
        }
    }

    /// The non degenerate triangles of the strip.
    pub fn triangles(&self) -> impl Iterator<Item = [u32; 3]> {
        let indices = self.indices();

        (2..indices.len())
            .map(move |i| [indices[i - 2], indices[i - 1], indices[i]])
            .filter(|[a, b, c]| a != b && b != c && a != c)
    }
}

/// Appends one border strip, two quads per step.
///
/// `offset` is the corner vertex the strip starts at, `x_add` steps along the border and
/// `z_add` steps one row inwards. At half resolution the odd vertices along the border are
/// skipped.
fn fill_edge(
    indices: &mut Vec<u32>,
    resolution: i64,
    half_resolution: bool,
    offset: i64,
    x_add: i64,
    z_add: i64,
) {
    let mut push = |index: i64| indices.push(index as u32);

    for x in (0..resolution).step_by(2) {
        if x > 0 {
            push(offset + x * x_add);
            push(offset + x * x_add + z_add);
        } else {
            push(offset);
            push(offset);
            push(offset);
        }

        if half_resolution {
            push(offset + x * x_add);
        } else {
            push(offset + (x + 1) * x_add);
        }
        push(offset + (x + 1) * x_add + z_add);

        if x < resolution - 2 {
            push(offset + (x + 2) * x_add);
            push(offset + (x + 2) * x_add + z_add);
        } else {
            push(offset + (x + 2) * x_add);
            push(offset + (x + 2) * x_add);
            push(offset + (x + 2) * x_add);
        }
    }
}

/// Builds the strip of a leaf with `resolution` quads per side.
fn fill_block(resolution: usize, mask: BorderMask) -> Vec<u32> {
    let res = resolution as i64;
    let vertices = res + 1;
    let mut indices = Vec::with_capacity(resolution * resolution * 6);

    for z in 1..res - 1 {
        indices.push((1 + z * vertices) as u32);
        indices.push((1 + z * vertices) as u32);

        for x in 1..res {
            indices.push((x + (z + 1) * vertices) as u32);
            indices.push((x + z * vertices) as u32);
        }

        indices.push((res - 1 + (z + 1) * vertices) as u32);
        indices.push((res - 1 + (z + 1) * vertices) as u32);
    }

    let edges = [
        (BorderMask::TOP, 0, 1, vertices),
        (BorderMask::RIGHT, res, vertices, -1),
        (BorderMask::LEFT, res * vertices, -vertices, 1),
        (BorderMask::BOTTOM, res * vertices + res, -1, -vertices),
    ];

    for (side, offset, x_add, z_add) in edges {
        fill_edge(&mut indices, res, mask.contains(side), offset, x_add, z_add);
    }

    indices
}

/// The 16 border variants of one resolution.
struct IndexBufferSet {
    buffers: Vec<Arc<IndexBuffer>>,
}

impl IndexBufferSet {
    fn new(resolution: usize) -> Self {
        let max_index = ((resolution + 1) * (resolution + 1) - 1) as u32;

        let buffers = (0..16)
            .map(|bits| {
                let mask = BorderMask::from_bits_truncate(bits);
                Arc::new(IndexBuffer::new(fill_block(resolution, mask), max_index))
            })
            .collect();

        Self { buffers }
    }
}

/// Shared index buffers, keyed by block resolution and border mask.
///
/// All variants of a resolution are built the first time it is requested.
#[derive(Default)]
pub struct IndexBufferCache {
    sets: Vec<Option<IndexBufferSet>>,
}

impl IndexBufferCache {
    /// The index buffer for leaves with `resolution` quads per side, a power of two of at
    /// least two.
    pub fn get(&mut self, resolution: usize, mask: BorderMask) -> Arc<IndexBuffer> {
        let level = resolution.trailing_zeros() as usize;
        if self.sets.len() <= level {
            self.sets.resize_with(level + 1, || None);
        }

        let set = self.sets[level].get_or_insert_with(|| {
            debug!("Building the index buffers for a block resolution of {resolution}.");
            IndexBufferSet::new(resolution)
        });

        set.buffers[mask.index()].clone()
    }

    pub fn contains(&self, resolution: usize) -> bool {
        let level = resolution.trailing_zeros() as usize;
        self.sets.get(level).is_some_and(Option::is_some)
    }
}
