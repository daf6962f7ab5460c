use crate::math::BoundingBox;
use bevy::{
    math::{Affine3A, Vec3A},
    prelude::*,
    render::primitives::{Frustum, HalfSpace},
};

/// A set of clip planes in object space, used to cull the block quadtree.
///
/// Points on the positive side of a [`HalfSpace`] are inside.
/// Bit `i` of a plane mask marks plane `i` as still active.
#[derive(Clone, Debug, Default)]
pub struct ClipPlanes {
    planes: Vec<HalfSpace>,
}

impl ClipPlanes {
    pub const MAX_PLANES: usize = 32;

    pub fn new(planes: impl IntoIterator<Item = HalfSpace>) -> Self {
        Self {
            planes: planes.into_iter().take(Self::MAX_PLANES).collect(),
        }
    }

    /// Transforms the world space `frustum` into the object space of a terrain.
    pub fn from_frustum(frustum: &Frustum, world_from_object: &Affine3A) -> Self {
        let matrix = world_from_object.matrix3;
        let translation = world_from_object.translation;

        Self::new(frustum.half_spaces.iter().map(|half_space| {
            let normal = half_space.normal();
            let object_normal: Vec3A = matrix.transpose() * normal;
            let d = normal.dot(translation) + half_space.d();

            HalfSpace::new(object_normal.extend(d))
        }))
    }

    pub fn planes(&self) -> &[HalfSpace] {
        &self.planes
    }

    pub fn full_mask(&self) -> u32 {
        match self.planes.len() {
            Self::MAX_PLANES => u32::MAX,
            count => (1 << count) - 1,
        }
    }

    /// Tests `bbox` against the planes active in `mask`.
    ///
    /// Returns `None` if the box lies completely outside of one of them, otherwise the mask
    /// without the planes that contain the box entirely.
    pub fn cull(&self, bbox: &BoundingBox, mut mask: u32) -> Option<u32> {
        for (i, plane) in self.planes.iter().enumerate() {
            let bit = 1 << i;
            if mask & bit == 0 {
                continue;
            }

            let normal = Vec3::from(plane.normal());
            let positive = normal.cmpge(Vec3::ZERO);

            let farthest = Vec3::select(positive, bbox.max, bbox.min);
            if normal.dot(farthest) + plane.d() < 0.0 {
                return None;
            }

            let nearest = Vec3::select(positive, bbox.min, bbox.max);
            if normal.dot(nearest) + plane.d() >= 0.0 {
                mask &= !bit;
            }
        }

        Some(mask)
    }
}
