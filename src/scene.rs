//! The read-only scene container: owns geometry/materials/textures, builds
//! the per-shape and top-level BVHs, the light list, and the `elem_cdf`
//! tables used for light sampling (spec §3, §6).

use crate::bvh::{intersect_quad, intersect_triangle, BvhTree, SplitHeuristic};
use crate::error::{PathtraceError, Result};
use crate::geometry::{
    Aabb, Camera, Elements, Environment, Instance, InstanceId, Material, MaterialId, Ray, Shape,
    ShapeId, Texture, TextureId,
};
use glam::Vec3;

/// Per-shape derived data: a local BVH over its elements and the
/// monotonically non-decreasing area/length CDF used for light sampling.
#[derive(Debug, Clone)]
pub struct ShapeRuntime {
    pub bvh: BvhTree,
    pub elem_cdf: Vec<f32>,
}

impl ShapeRuntime {
    pub fn total_measure(&self) -> f32 {
        self.elem_cdf.last().copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum LightKind {
    Instance(InstanceId),
    Environment(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct Light {
    pub kind: LightKind,
}

/// A ray-cast hit against the scene: which instance/element was struck, its
/// barycentric weights, and the hit distance.
#[derive(Debug, Clone, Copy)]
pub struct SceneHit {
    pub instance: InstanceId,
    pub element: u32,
    pub bary: Vec3,
    pub t: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct ScenePointHit {
    pub instance: InstanceId,
    pub element: u32,
    pub point: Vec3,
    pub dist: f32,
}

pub struct Scene {
    pub textures: Vec<Texture>,
    pub materials: Vec<Material>,
    pub shapes: Vec<Shape>,
    pub shape_runtime: Vec<Option<ShapeRuntime>>,
    pub instances: Vec<Instance>,
    pub cameras: Vec<Camera>,
    pub environments: Vec<Environment>,
    pub instance_bvh: Option<BvhTree>,
    pub lights: Vec<Light>,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            textures: Vec::new(),
            materials: Vec::new(),
            shapes: Vec::new(),
            shape_runtime: Vec::new(),
            instances: Vec::new(),
            cameras: Vec::new(),
            environments: Vec::new(),
            instance_bvh: None,
            lights: Vec::new(),
        }
    }
}

/// Per-element area/length used both for the shape AABB set and `elem_cdf`.
pub fn element_aabb(shape: &Shape, elem: usize) -> Aabb {
    let p = &shape.vertices.positions;
    let mut b = Aabb::EMPTY;
    match &shape.elements {
        Elements::Points(idx) => {
            let i = idx[elem][0] as usize;
            let r = shape.vertices.radius.get(i).copied().unwrap_or(0.0);
            b.grow_point(p[i] - Vec3::splat(r));
            b.grow_point(p[i] + Vec3::splat(r));
        }
        Elements::Lines(idx) => {
            let [i, j] = idx[elem].map(|x| x as usize);
            let r0 = shape.vertices.radius.get(i).copied().unwrap_or(0.0);
            let r1 = shape.vertices.radius.get(j).copied().unwrap_or(0.0);
            b.grow_point(p[i] - Vec3::splat(r0));
            b.grow_point(p[i] + Vec3::splat(r0));
            b.grow_point(p[j] - Vec3::splat(r1));
            b.grow_point(p[j] + Vec3::splat(r1));
        }
        Elements::Triangles(idx) => {
            for &i in &idx[elem] {
                b.grow_point(p[i as usize]);
            }
        }
        Elements::Quads(idx) => {
            for &i in &idx[elem] {
                b.grow_point(p[i as usize]);
            }
        }
    }
    b
}

fn element_measure(shape: &Shape, elem: usize) -> f32 {
    let p = &shape.vertices.positions;
    match &shape.elements {
        Elements::Points(_) => 1.0,
        Elements::Lines(idx) => {
            let [i, j] = idx[elem].map(|x| x as usize);
            (p[j] - p[i]).length()
        }
        Elements::Triangles(idx) => {
            let [i, j, k] = idx[elem].map(|x| x as usize);
            0.5 * (p[j] - p[i]).cross(p[k] - p[i]).length()
        }
        Elements::Quads(idx) => {
            let [i, j, k, l] = idx[elem].map(|x| x as usize);
            if l == k {
                // Degenerate quad is a triangle.
                0.5 * (p[j] - p[i]).cross(p[k] - p[i]).length()
            } else {
                0.5 * (p[j] - p[i]).cross(p[l] - p[i]).length()
                    + 0.5 * (p[k] - p[l]).cross(p[j] - p[l]).length()
            }
        }
    }
}

pub fn build_shape_bvh(shape: &Shape, equal_size: bool) -> Result<ShapeRuntime> {
    let n = shape.elements.len();
    if n == 0 {
        return Err(PathtraceError::EmptyBvhInput);
    }
    let aabbs: Vec<Aabb> = (0..n).map(|i| element_aabb(shape, i)).collect();
    let heuristic = if equal_size {
        SplitHeuristic::Balanced
    } else {
        SplitHeuristic::Middle
    };
    let bvh = BvhTree::build(&aabbs, heuristic)?;

    let mut elem_cdf = Vec::with_capacity(n);
    let mut acc = 0.0f32;
    for i in 0..n {
        acc += element_measure(shape, i);
        elem_cdf.push(acc);
    }
    Ok(ShapeRuntime { bvh, elem_cdf })
}

pub fn refit_shape_bvh(shape: &Shape, runtime: &mut ShapeRuntime) -> Result<()> {
    let n = shape.elements.len();
    let aabbs: Vec<Aabb> = (0..n).map(|i| element_aabb(shape, i)).collect();
    runtime.bvh.refit(&aabbs)
}

impl Scene {
    pub fn validate(&self) -> Result<()> {
        for (i, shape) in self.shapes.iter().enumerate() {
            if shape.elements.is_empty() {
                return Err(PathtraceError::EmptyShape(ShapeId(i as u32)));
            }
            let expected = shape.vertices.positions.len();
            if !shape.vertices.normals.is_empty() && shape.vertices.normals.len() != expected {
                return Err(PathtraceError::VertexBufferMismatch {
                    shape: ShapeId(i as u32),
                    positions: expected,
                    field: "normals",
                    other: shape.vertices.normals.len(),
                });
            }
        }
        for (i, inst) in self.instances.iter().enumerate() {
            if inst.shape.0 as usize >= self.shapes.len() {
                return Err(PathtraceError::DanglingShapeRef(InstanceId(i as u32), inst.shape));
            }
        }
        for (i, mat) in self.materials.iter().enumerate() {
            for tref in [
                &mat.ke_tex,
                &mat.kd_tex,
                &mat.ks_tex,
                &mat.kt_tex,
                &mat.normal_tex,
                &mat.occlusion_tex,
            ] {
                if let Some(t) = tref {
                    if t.texture.0 as usize >= self.textures.len() {
                        return Err(PathtraceError::DanglingTextureRef(
                            MaterialId(i as u32),
                            t.texture,
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Build every shape's local BVH/CDF and the top-level instance BVH,
    /// then populate the light list (spec §6 `build_scene_bvh`).
    pub fn build_scene_bvh(&mut self, equal_size: bool) -> Result<()> {
        self.validate()?;
        self.shape_runtime = Vec::with_capacity(self.shapes.len());
        for shape in &self.shapes {
            self.shape_runtime.push(Some(build_shape_bvh(shape, equal_size)?));
        }
        self.rebuild_instance_bvh(equal_size)?;
        self.update_lights(false);
        Ok(())
    }

    fn rebuild_instance_bvh(&mut self, equal_size: bool) -> Result<()> {
        if self.instances.is_empty() {
            self.instance_bvh = None;
            return Ok(());
        }
        let aabbs: Vec<Aabb> = self
            .instances
            .iter()
            .map(|inst| {
                let shape_root = self.shape_runtime[inst.shape.0 as usize]
                    .as_ref()
                    .expect("shape bvh built")
                    .bvh
                    .root_aabb();
                shape_root.transform(&inst.frame)
            })
            .collect();
        let heuristic = if equal_size {
            SplitHeuristic::Balanced
        } else {
            SplitHeuristic::Middle
        };
        self.instance_bvh = Some(BvhTree::build(&aabbs, heuristic)?);
        Ok(())
    }

    /// Refit all BVHs after pure transform or vertex-position changes,
    /// preserving tree topology (spec §6 `refit_scene_bvh`).
    pub fn refit_scene_bvh(&mut self) -> Result<()> {
        for (shape, runtime) in self.shapes.iter().zip(self.shape_runtime.iter_mut()) {
            if let Some(rt) = runtime {
                refit_shape_bvh(shape, rt)?;
            }
        }
        if let Some(bvh) = &mut self.instance_bvh {
            let aabbs: Vec<Aabb> = self
                .instances
                .iter()
                .map(|inst| {
                    let shape_root = self.shape_runtime[inst.shape.0 as usize]
                        .as_ref()
                        .expect("shape bvh built")
                        .bvh
                        .root_aabb();
                    shape_root.transform(&inst.frame)
                })
                .collect();
            bvh.refit(&aabbs)?;
        }
        Ok(())
    }

    /// Populate `self.lights` from emissive instances (`ke != 0`) and
    /// emissive environments. `points_only` restricts area lights to shapes
    /// whose elements are points (used by callers that only want point-light
    /// sampling, e.g. a cheap preview pass).
    pub fn update_lights(&mut self, points_only: bool) {
        self.lights.clear();
        for (i, inst) in self.instances.iter().enumerate() {
            let shape = &self.shapes[inst.shape.0 as usize];
            let mat = &self.materials[shape.material.0 as usize];
            if mat.ke == Vec3::ZERO {
                continue;
            }
            if points_only && !matches!(shape.elements, Elements::Points(_)) {
                continue;
            }
            self.lights.push(Light {
                kind: LightKind::Instance(InstanceId(i as u32)),
            });
        }
        for (i, env) in self.environments.iter().enumerate() {
            if env.ke != Vec3::ZERO || env.ke_tex.is_some() {
                self.lights.push(Light {
                    kind: LightKind::Environment(i),
                });
            }
        }
    }

    /// Ray intersection against the whole scene (spec §6 `intersect_ray`).
    /// Transforms into each candidate instance's local frame and delegates
    /// to that shape's BVH; since instance frames are rigid, the hit
    /// parameter `t` is identical in local and world space.
    pub fn intersect_ray(&self, ray: &Ray, early_exit: bool) -> Option<SceneHit> {
        let bvh = self.instance_bvh.as_ref()?;
        let result = bvh.intersect::<(u32, Vec3)>(ray, early_exit, |inst_id, world_ray| {
            let inst = &self.instances[inst_id as usize];
            let local_ray = inst.frame.ray_to_local(world_ray);
            let shape = &self.shapes[inst.shape.0 as usize];
            let rt = self.shape_runtime[inst.shape.0 as usize].as_ref()?;
            rt.bvh
                .intersect::<(u32, Vec3)>(&local_ray, early_exit, |elem, r| {
                    intersect_shape_element(shape, elem, r)
                })
                .map(|(_, t, h)| (t, h))
        });
        result.map(|(inst_id, t, (elem, bary))| SceneHit {
            instance: InstanceId(inst_id),
            element: elem,
            bary,
            t,
        })
    }

    /// Closest-point query against the whole scene (spec §6 `overlap_point`).
    pub fn overlap_point(&self, p: Vec3, max_dist: f32, early_exit: bool) -> Option<ScenePointHit> {
        let bvh = self.instance_bvh.as_ref()?;
        let result = bvh.overlap_point::<(u32, Vec3)>(p, max_dist, early_exit, |inst_id, world_p| {
            let inst = &self.instances[inst_id as usize];
            let local_p = inst.frame.point_to_local(world_p);
            let shape = &self.shapes[inst.shape.0 as usize];
            let rt = self.shape_runtime[inst.shape.0 as usize].as_ref()?;
            rt.bvh
                .overlap_point::<(u32, Vec3)>(local_p, max_dist, early_exit, |elem, lp| {
                    closest_point_on_element(shape, elem, lp)
                })
                .map(|(_, d, (elem, local_point))| {
                    (d, (elem, inst.frame.point_to_world(local_point)))
                })
        });
        result.map(|(inst_id, dist, (elem, point))| ScenePointHit {
            instance: InstanceId(inst_id),
            element: elem,
            point,
            dist,
        })
    }
}

fn intersect_shape_element(shape: &Shape, elem: u32, ray: &Ray) -> Option<(f32, (u32, Vec3))> {
    let p = &shape.vertices.positions;
    let e = elem as usize;
    match &shape.elements {
        Elements::Points(idx) => {
            let i = idx[e][0] as usize;
            let r = shape.vertices.radius.get(i).copied().unwrap_or(0.01);
            crate::bvh::intersect_point(ray, p[i], r).map(|(t, _)| (t, (elem, Vec3::ZERO)))
        }
        Elements::Lines(idx) => {
            let [i, j] = idx[e].map(|x| x as usize);
            let r0 = shape.vertices.radius.get(i).copied().unwrap_or(0.01);
            let r1 = shape.vertices.radius.get(j).copied().unwrap_or(0.01);
            crate::bvh::intersect_line(ray, p[i], p[j], r0, r1)
                .map(|(t, u)| (t, (elem, Vec3::new(0.0, u, 0.0))))
        }
        Elements::Triangles(idx) => {
            let [i, j, k] = idx[e].map(|x| x as usize);
            intersect_triangle(ray, p[i as usize], p[j as usize], p[k as usize])
                .map(|(t, b)| (t, (elem, b.uvw)))
        }
        Elements::Quads(idx) => {
            let [i, j, k, l] = idx[e].map(|x| x as usize);
            if l == k {
                intersect_triangle(ray, p[i], p[j], p[k]).map(|(t, b)| (t, (elem, b.uvw)))
            } else {
                intersect_quad(ray, p[i], p[j], p[k], p[l])
                    .map(|(t, uv)| (t, (elem, Vec3::new(0.0, uv.u, uv.v))))
            }
        }
    }
}

fn closest_point_on_element(shape: &Shape, elem: u32, p: Vec3) -> Option<(f32, (u32, Vec3))> {
    let pos = &shape.vertices.positions;
    let e = elem as usize;
    match &shape.elements {
        Elements::Points(idx) => {
            let i = idx[e][0] as usize;
            Some(((p - pos[i]).length(), (elem, pos[i])))
        }
        Elements::Lines(idx) => {
            let [i, j] = idx[e].map(|x| x as usize);
            let (cp, _) = crate::bvh::closest_point_on_segment(p, pos[i], pos[j]);
            Some(((p - cp).length(), (elem, cp)))
        }
        Elements::Triangles(idx) => {
            let [i, j, k] = idx[e].map(|x| x as usize);
            let (cp, _) = crate::bvh::closest_point_on_triangle(p, pos[i], pos[j], pos[k]);
            Some(((p - cp).length(), (elem, cp)))
        }
        Elements::Quads(idx) => {
            let [i, j, k, l] = idx[e].map(|x| x as usize);
            let (cp1, _) = crate::bvh::closest_point_on_triangle(p, pos[i], pos[j], pos[l]);
            if l == k {
                return Some(((p - cp1).length(), (elem, cp1)));
            }
            let (cp2, _) = crate::bvh::closest_point_on_triangle(p, pos[k], pos[l], pos[j]);
            let d1 = (p - cp1).length();
            let d2 = (p - cp2).length();
            if d1 <= d2 {
                Some((d1, (elem, cp1)))
            } else {
                Some((d2, (elem, cp2)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Frame, MaterialKind, VertexData};
    use glam::Mat3;

    fn single_triangle_scene() -> Scene {
        let mut scene = Scene::default();
        scene.materials.push(Material {
            kind: MaterialKind::SpecularRoughness,
            ..Default::default()
        });
        scene.shapes.push(Shape {
            vertices: VertexData {
                positions: vec![
                    Vec3::new(-1.0, -1.0, 0.0),
                    Vec3::new(1.0, -1.0, 0.0),
                    Vec3::new(0.0, 1.0, 0.0),
                ],
                normals: vec![Vec3::Z; 3],
                ..Default::default()
            },
            elements: Elements::Triangles(vec![[0, 1, 2]]),
            material: MaterialId(0),
        });
        scene.instances.push(Instance {
            frame: Frame::new(Mat3::IDENTITY, Vec3::ZERO),
            shape: ShapeId(0),
        });
        scene.build_scene_bvh(true).unwrap();
        scene
    }

    #[test]
    fn ray_hits_single_triangle() {
        let scene = single_triangle_scene();
        let ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);
        let hit = scene.intersect_ray(&ray, false).unwrap();
        assert_eq!(hit.instance.0, 0);
        assert!((hit.bary.x + hit.bary.y + hit.bary.z - 1.0).abs() < 1e-4);
    }

    #[test]
    fn ray_misses_empty_scene() {
        let scene = Scene::default();
        let ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);
        assert!(scene.intersect_ray(&ray, false).is_none());
    }

    #[test]
    fn refit_after_translation_matches_rebuild() {
        let mut scene = single_triangle_scene();
        scene.instances[0].frame.translation = Vec3::new(1.0, 0.0, 0.0);
        scene.refit_scene_bvh().unwrap();

        let mut rebuilt = single_triangle_scene();
        rebuilt.instances[0].frame.translation = Vec3::new(1.0, 0.0, 0.0);
        rebuilt.build_scene_bvh(true).unwrap();

        let ray = Ray::new(Vec3::new(1.0, 0.0, -5.0), Vec3::Z);
        let a = scene.intersect_ray(&ray, false).unwrap();
        let b = rebuilt.intersect_ray(&ray, false).unwrap();
        assert!((a.t - b.t).abs() < 1e-5);
    }
}
