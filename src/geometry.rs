//! Read-only scene data model (spec §3): textures, materials, shapes,
//! instances, cameras, environments, plus the `Aabb`/`Ray`/`Frame` primitives
//! they're built from.
//!
//! Collections are addressed by newtype index rather than shared pointers,
//! per spec §9 "Object graphs" — grounded on the entity-id-by-index
//! convention used throughout `astraweave-ecs`.

use glam::{Mat3, Vec2, Vec3};
use serde::{Deserialize, Serialize};

macro_rules! newtype_id {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u32);
    };
}

newtype_id!(TextureId);
newtype_id!(MaterialId);
newtype_id!(ShapeId);
newtype_id!(InstanceId);

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn from_point(p: Vec3) -> Self {
        Self { min: p, max: p }
    }

    #[inline]
    pub fn grow_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[inline]
    pub fn grow(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    #[inline]
    pub fn union(a: &Aabb, b: &Aabb) -> Aabb {
        let mut r = *a;
        r.grow(b);
        r
    }

    #[inline]
    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    #[inline]
    pub fn centroid(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn surface_area(&self) -> f32 {
        let d = self.extent();
        if d.x < 0.0 || d.y < 0.0 || d.z < 0.0 {
            return 0.0;
        }
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    #[inline]
    pub fn longest_axis(&self) -> usize {
        let d = self.extent();
        if d.x >= d.y && d.x >= d.z {
            0
        } else if d.y >= d.z {
            1
        } else {
            2
        }
    }

    #[inline]
    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    #[inline]
    pub fn contains_aabb(&self, other: &Aabb) -> bool {
        self.contains(other.min) && self.contains(other.max)
    }

    /// Squared distance from `p` to the closest point on the box (0 if inside).
    #[inline]
    pub fn distance_squared(&self, p: Vec3) -> f32 {
        let clamped = p.clamp(self.min, self.max);
        (clamped - p).length_squared()
    }

    /// Transform an AABB by a rigid frame using Ericson's method: the new
    /// extent along each world axis is the sum of `|R_ij| * half_extent_j`.
    pub fn transform(&self, frame: &Frame) -> Aabb {
        let center = frame.point_to_world(self.centroid());
        let half = self.extent() * 0.5;
        let r = frame.rotation.to_cols_array_2d();
        let mut new_half = Vec3::ZERO;
        for i in 0..3 {
            let mut e = 0.0f32;
            for j in 0..3 {
                e += r[j][i].abs() * half[j];
            }
            new_half[i] = e;
        }
        Aabb {
            min: center - new_half,
            max: center + new_half,
        }
    }
}

/// A ray with a valid parameter range `[tmin, tmax]`. `tmax` shrinks as
/// closer hits are found; it must only be written *after* a successful
/// intersection (spec §7) so partial hits can't leak state.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub o: Vec3,
    pub d: Vec3,
    pub tmin: f32,
    pub tmax: f32,
}

impl Ray {
    pub fn new(o: Vec3, d: Vec3) -> Self {
        Self {
            o,
            d,
            tmin: 1e-4,
            tmax: f32::INFINITY,
        }
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.o + self.d * t
    }

    pub fn inv_dir(&self) -> Vec3 {
        Vec3::new(1.0 / self.d.x, 1.0 / self.d.y, 1.0 / self.d.z)
    }
}

/// A rigid transform: rotation + translation, no scale — exactly what spec
/// §3 specifies for instance frames.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Frame {
    pub rotation: Mat3,
    pub translation: Vec3,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            rotation: Mat3::IDENTITY,
            translation: Vec3::ZERO,
        }
    }
}

impl Frame {
    pub fn new(rotation: Mat3, translation: Vec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn point_to_world(&self, p: Vec3) -> Vec3 {
        self.rotation * p + self.translation
    }

    pub fn point_to_local(&self, p: Vec3) -> Vec3 {
        self.rotation.transpose() * (p - self.translation)
    }

    pub fn vector_to_world(&self, v: Vec3) -> Vec3 {
        self.rotation * v
    }

    pub fn vector_to_local(&self, v: Vec3) -> Vec3 {
        self.rotation.transpose() * v
    }

    /// Normals transform by the inverse-transpose; for a pure rotation this
    /// is the rotation itself.
    pub fn normal_to_world(&self, n: Vec3) -> Vec3 {
        self.rotation * n
    }

    pub fn ray_to_local(&self, ray: &Ray) -> Ray {
        Ray {
            o: self.point_to_local(ray.o),
            d: self.vector_to_local(ray.d),
            tmin: ray.tmin,
            tmax: ray.tmax,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WrapMode {
    Repeat,
    Clamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Texture {
    /// 8-bit-per-channel LDR, optionally sRGB-decoded on sample.
    Ldr {
        width: u32,
        height: u32,
        pixels: Vec<[u8; 4]>,
    },
    /// Float HDR, stored linear.
    Hdr {
        width: u32,
        height: u32,
        pixels: Vec<[f32; 4]>,
    },
}

impl Texture {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Texture::Ldr { width, height, .. } => (*width, *height),
            Texture::Hdr { width, height, .. } => (*width, *height),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextureRef {
    pub texture: TextureId,
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
    pub linear: bool,
    pub mipmap: bool,
    pub scale: f32,
}

impl TextureRef {
    pub fn new(texture: TextureId) -> Self {
        Self {
            texture,
            wrap_s: WrapMode::Repeat,
            wrap_t: WrapMode::Repeat,
            linear: true,
            mipmap: false,
            scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterialKind {
    SpecularRoughness,
    MetallicRoughness,
    SpecularGlossiness,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Material {
    pub kind: MaterialKind,
    pub ke: Vec3,
    pub kd: Vec3,
    pub ks: Vec3,
    pub kt: Vec3,
    pub rs: f32,
    pub op: f32,
    pub ke_tex: Option<TextureRef>,
    pub kd_tex: Option<TextureRef>,
    pub ks_tex: Option<TextureRef>,
    pub kt_tex: Option<TextureRef>,
    pub normal_tex: Option<TextureRef>,
    pub occlusion_tex: Option<TextureRef>,
    pub bump_tex: Option<TextureRef>,
    pub displacement_tex: Option<TextureRef>,
    pub double_sided: bool,
    pub alpha_cutout: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            kind: MaterialKind::SpecularRoughness,
            ke: Vec3::ZERO,
            kd: Vec3::splat(0.7),
            ks: Vec3::ZERO,
            kt: Vec3::ZERO,
            rs: 1.0,
            op: 1.0,
            ke_tex: None,
            kd_tex: None,
            ks_tex: None,
            kt_tex: None,
            normal_tex: None,
            occlusion_tex: None,
            bump_tex: None,
            displacement_tex: None,
            double_sided: false,
            alpha_cutout: false,
        }
    }
}

/// Per-vertex attributes shared by every element kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VertexData {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub texcoords: Vec<Vec2>,
    pub colors: Vec<Vec3>,
    pub radius: Vec<f32>,
    /// Tangent + sign (w = +-1 for bitangent handedness).
    pub tangents: Vec<[f32; 4]>,
}

/// Exactly one element kind is populated per shape (spec §3 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Elements {
    Points(Vec<[u32; 1]>),
    Lines(Vec<[u32; 2]>),
    Triangles(Vec<[u32; 3]>),
    /// Degenerate quads with `w == z` represent triangles.
    Quads(Vec<[u32; 4]>),
}

impl Elements {
    pub fn len(&self) -> usize {
        match self {
            Elements::Points(v) => v.len(),
            Elements::Lines(v) => v.len(),
            Elements::Triangles(v) => v.len(),
            Elements::Quads(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shape {
    pub vertices: VertexData,
    pub elements: Elements,
    pub material: MaterialId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub frame: Frame,
    pub shape: ShapeId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Camera {
    pub frame: Frame,
    pub yfov: f32,
    pub aspect: f32,
    pub focus: f32,
    pub aperture: f32,
    pub ortho: bool,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            frame: Frame::default(),
            yfov: 0.7,
            aspect: 1.0,
            focus: 1.0,
            aperture: 0.0,
            ortho: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub frame: Frame,
    pub ke: Vec3,
    pub ke_tex: Option<TextureRef>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            frame: Frame::default(),
            ke: Vec3::ZERO,
            ke_tex: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aabb_transform_by_identity_is_noop() {
        let b = Aabb {
            min: Vec3::new(-1.0, -2.0, -3.0),
            max: Vec3::new(1.0, 2.0, 3.0),
        };
        let f = Frame::default();
        let t = b.transform(&f);
        assert!((t.min - b.min).length() < 1e-5);
        assert!((t.max - b.max).length() < 1e-5);
    }

    #[test]
    fn aabb_transform_by_translation_shifts_bounds() {
        let b = Aabb {
            min: Vec3::splat(-1.0),
            max: Vec3::splat(1.0),
        };
        let f = Frame::new(Mat3::IDENTITY, Vec3::new(5.0, 0.0, 0.0));
        let t = b.transform(&f);
        assert!((t.min - Vec3::new(4.0, -1.0, -1.0)).length() < 1e-5);
        assert!((t.max - Vec3::new(6.0, 1.0, 1.0)).length() < 1e-5);
    }

    #[test]
    fn frame_roundtrip_point() {
        let f = Frame::new(Mat3::from_rotation_y(0.6), Vec3::new(1.0, 2.0, 3.0));
        let p = Vec3::new(0.3, -0.7, 1.1);
        let world = f.point_to_world(p);
        let back = f.point_to_local(world);
        assert!((back - p).length() < 1e-5);
    }
}
