//! Geometric helpers shared by the quadtree and the culling pass.

mod clip;

pub use clip::ClipPlanes;

use bevy::{
    math::Affine3A,
    prelude::*,
    render::primitives::Aabb,
};
use serde::{Deserialize, Serialize};

/// One of the four sides of a block or cell.
///
/// Top faces +Z and right faces +X, so the opposite of side `i` is `3 - i`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Top = 0,
    Right = 1,
    Left = 2,
    Bottom = 3,
}

impl Side {
    pub const ALL: [Side; 4] = [Side::Top, Side::Right, Side::Left, Side::Bottom];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn opposite(self) -> Self {
        Self::ALL[3 - self.index()]
    }
}

/// Axis aligned bounding box in the object space of a terrain.
///
/// A freshly created box is empty, which is the marker for "not yet computed".
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl BoundingBox {
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn extend(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) / 2.0
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Squared distance from `point` to the closest point of the box, zero inside.
    pub fn squared_distance_to(&self, point: Vec3) -> f32 {
        point.clamp(self.min, self.max).distance_squared(point)
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (min, max) = (self.min, self.max);

        [
            Vec3::new(min.x, min.y, min.z),
            Vec3::new(max.x, min.y, min.z),
            Vec3::new(min.x, max.y, min.z),
            Vec3::new(max.x, max.y, min.z),
            Vec3::new(min.x, min.y, max.z),
            Vec3::new(max.x, min.y, max.z),
            Vec3::new(min.x, max.y, max.z),
            Vec3::new(max.x, max.y, max.z),
        ]
    }

    /// The box enclosing this box after applying `transform`.
    pub fn transformed(&self, transform: &Affine3A) -> Self {
        if self.is_empty() {
            return *self;
        }

        let mut result = Self::EMPTY;
        for corner in self.corners() {
            result.extend(transform.transform_point3(corner));
        }
        result
    }

    pub fn to_aabb(&self) -> Option<Aabb> {
        (!self.is_empty()).then(|| Aabb::from_min_max(self.min, self.max))
    }
}

const CHILD_VISIT_ORDERS: [[usize; 4]; 4] = [[2, 3, 0, 1], [3, 2, 1, 0], [0, 1, 2, 3], [1, 0, 3, 2]];

/// Front to back order in which the children of a block are visited,
/// picked from the view direction in object space.
pub fn child_visit_order(direction: Vec3) -> [usize; 4] {
    let index = (direction.x > 0.0) as usize | ((direction.z > 0.0) as usize) << 1;
    CHILD_VISIT_ORDERS[index]
}
