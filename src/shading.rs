//! Scene point evaluation (spec §4.4): turns a raw BVH hit into a shading
//! point with an interpolated surface frame and a resolved runtime BRDF.

use crate::geometry::{Elements, Environment, Instance, Material, MaterialKind, Shape};
use crate::scene::Scene;
use crate::texture::eval_texture;
use glam::{Mat3, Vec2, Vec3, Vec4};
use std::f32::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmissionKind {
    /// Contributes only on the side the normal faces (triangles/quads).
    AreaDiffuse,
    Point,
    Line,
    Env,
}

#[derive(Debug, Clone, Copy)]
pub struct EmissionTerm {
    pub ke: Vec3,
    pub kind: EmissionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrdfKind {
    Microfacet,
    KajiyaKay,
    Point,
}

#[derive(Debug, Clone, Copy)]
pub struct BrdfTerm {
    pub kd: Vec3,
    pub ks: Vec3,
    pub kt: Vec3,
    pub alpha: f32,
    pub kind: BrdfKind,
}

/// A fully resolved surface (or curve/point) shading point.
#[derive(Debug, Clone, Copy)]
pub struct ShadingPoint {
    pub position: Vec3,
    pub normal: Vec3,
    pub texcoord: Vec2,
    pub outgoing: Vec3,
    pub emission: EmissionTerm,
    pub brdf: BrdfTerm,
}

fn interpolate_triangle(shape: &Shape, idx: [u32; 3], bary: Vec3) -> (Vec3, Vec3, Vec2, Vec3) {
    let v = &shape.vertices;
    let [i, j, k] = idx.map(|x| x as usize);
    let w = bary;
    let position = v.positions[i] * w.x + v.positions[j] * w.y + v.positions[k] * w.z;
    let normal = if v.normals.is_empty() {
        (v.positions[j] - v.positions[i])
            .cross(v.positions[k] - v.positions[i])
            .normalize_or_zero()
    } else {
        (v.normals[i] * w.x + v.normals[j] * w.y + v.normals[k] * w.z).normalize_or_zero()
    };
    let texcoord = if v.texcoords.is_empty() {
        Vec2::ZERO
    } else {
        v.texcoords[i] * w.x + v.texcoords[j] * w.y + v.texcoords[k] * w.z
    };
    let color = if v.colors.is_empty() {
        Vec3::ONE
    } else {
        v.colors[i] * w.x + v.colors[j] * w.y + v.colors[k] * w.z
    };
    (position, normal, texcoord, color)
}

fn interpolate_quad(shape: &Shape, idx: [u32; 4], u: f32, v: f32) -> (Vec3, Vec3, Vec2, Vec3) {
    let vd = &shape.vertices;
    let [i, j, k, l] = idx.map(|x| x as usize);
    let w00 = (1.0 - u) * (1.0 - v);
    let w10 = u * (1.0 - v);
    let w11 = u * v;
    let w01 = (1.0 - u) * v;
    let position =
        vd.positions[i] * w00 + vd.positions[j] * w10 + vd.positions[k] * w11 + vd.positions[l] * w01;
    let normal = if vd.normals.is_empty() {
        (vd.positions[j] - vd.positions[i])
            .cross(vd.positions[l] - vd.positions[i])
            .normalize_or_zero()
    } else {
        (vd.normals[i] * w00 + vd.normals[j] * w10 + vd.normals[k] * w11 + vd.normals[l] * w01)
            .normalize_or_zero()
    };
    let texcoord = Vec2::new(u, v);
    let color = if vd.colors.is_empty() {
        Vec3::ONE
    } else {
        vd.colors[i] * w00 + vd.colors[j] * w10 + vd.colors[k] * w11 + vd.colors[l] * w01
    };
    (position, normal, texcoord, color)
}

/// Resolve `material`'s raw coefficients into the three BRDF channels plus
/// roughness, dispatching on `MaterialKind` (spec §4.4 "Material resolution").
fn resolve_material(
    scene: &Scene,
    material: &Material,
    texcoord: Vec2,
    vertex_color: Vec3,
) -> (Vec3, Vec3, Vec3, f32) {
    let kd_tex = eval_texture(
        &scene.textures,
        material.kd_tex.as_ref(),
        texcoord,
        true,
        Vec4::ONE,
    );
    let ks_tex = eval_texture(
        &scene.textures,
        material.ks_tex.as_ref(),
        texcoord,
        false,
        Vec4::ONE,
    );
    let kt_tex = eval_texture(
        &scene.textures,
        material.kt_tex.as_ref(),
        texcoord,
        true,
        Vec4::ONE,
    );
    let occlusion = eval_texture(
        &scene.textures,
        material.occlusion_tex.as_ref(),
        texcoord,
        false,
        Vec4::ONE,
    )
    .x;

    let (mut kd, mut ks, alpha) = match material.kind {
        MaterialKind::SpecularRoughness => {
            let kd = material.kd * kd_tex.truncate();
            let ks = material.ks * ks_tex.truncate();
            (kd, ks, material.rs * material.rs)
        }
        MaterialKind::MetallicRoughness => {
            let kb = material.kd * kd_tex.truncate();
            let metal = material.ks.y * ks_tex.y;
            let rough = (material.rs * ks_tex.z).clamp(0.0, 1.0);
            let kd_out = kb * (1.0 - metal);
            let ks_out = kb * metal + Vec3::splat(0.04 * (1.0 - metal));
            (kd_out, ks_out, rough * rough)
        }
        MaterialKind::SpecularGlossiness => {
            let ks = material.ks * ks_tex.truncate();
            let glossiness = material.rs.clamp(0.0, 1.0);
            let rough = 1.0 - glossiness;
            (material.kd * kd_tex.truncate(), ks, rough * rough)
        }
    };
    kd *= vertex_color * occlusion;
    ks *= vertex_color;

    let mut kt = material.kt * kt_tex.truncate();
    let op = material.op.clamp(0.0, 1.0);
    kd *= op;
    ks *= op;
    kt = kt * op + Vec3::splat(1.0 - op);

    (kd, ks, kt, alpha)
}

fn brdf_kind_for(shape: &Shape) -> BrdfKind {
    match shape.elements {
        Elements::Triangles(_) | Elements::Quads(_) => BrdfKind::Microfacet,
        Elements::Lines(_) => BrdfKind::KajiyaKay,
        Elements::Points(_) => BrdfKind::Point,
    }
}

fn emission_kind_for(shape: &Shape) -> EmissionKind {
    match shape.elements {
        Elements::Triangles(_) | Elements::Quads(_) => EmissionKind::AreaDiffuse,
        Elements::Lines(_) => EmissionKind::Line,
        Elements::Points(_) => EmissionKind::Point,
    }
}

/// Tangent-frame normal mapping: sample (non-sRGB), remap `[0,1]->[-1,1]`
/// with the OpenGL-convention green-channel flip, rotate into world space.
fn apply_normal_map(
    scene: &Scene,
    material: &Material,
    texcoord: Vec2,
    geometric_normal: Vec3,
    tangent: Option<[f32; 4]>,
) -> Vec3 {
    let Some(nref) = material.normal_tex.as_ref() else {
        return geometric_normal;
    };
    let Some(tangent) = tangent else {
        return geometric_normal;
    };
    let sample = eval_texture(&scene.textures, Some(nref), texcoord, false, Vec4::new(0.5, 0.5, 1.0, 1.0));
    let tn = Vec3::new(
        sample.x * 2.0 - 1.0,
        -(sample.y * 2.0 - 1.0),
        sample.z * 2.0 - 1.0,
    );
    let t = Vec3::new(tangent[0], tangent[1], tangent[2]).normalize_or_zero();
    let sign = tangent[3];
    let n = geometric_normal;
    let t_ortho = (t - n * n.dot(t)).normalize_or_zero();
    let b = n.cross(t_ortho) * sign;
    let frame = Mat3::from_cols(t_ortho, b, n);
    (frame * tn).normalize_or_zero()
}

/// Interpolate element data, transform into world space, resolve the
/// material, and produce a complete `ShadingPoint`.
pub fn eval_shape_point(
    scene: &Scene,
    instance: &Instance,
    element: u32,
    bary: Vec3,
    outgoing: Vec3,
) -> ShadingPoint {
    let shape = &scene.shapes[instance.shape.0 as usize];
    let material = &scene.materials[shape.material.0 as usize];
    let e = element as usize;

    let (local_pos, mut local_n, texcoord, color, tangent) = match &shape.elements {
        Elements::Triangles(idx) => {
            let (p, n, uv, c) = interpolate_triangle(shape, idx[e], bary);
            (p, n, uv, c, None)
        }
        Elements::Quads(idx) => {
            let quad = idx[e];
            if quad[3] == quad[2] {
                // Degenerate quad: a triangle over [i,j,k], true barycentric
                // weights (spec's "quad with w=z is a triangle" data model).
                let (p, n, uv, c) = interpolate_triangle(shape, [quad[0], quad[1], quad[2]], bary);
                (p, n, uv, c, None)
            } else {
                let (p, n, uv, c) = interpolate_quad(shape, quad, bary.y, bary.z);
                (p, n, uv, c, None)
            }
        }
        Elements::Lines(idx) => {
            let [i, j] = idx[e].map(|x| x as usize);
            let u = bary.y;
            let v = &shape.vertices;
            let p = v.positions[i].lerp(v.positions[j], u);
            let n = (v.positions[j] - v.positions[i]).normalize_or_zero();
            let uv = if v.texcoords.is_empty() {
                Vec2::ZERO
            } else {
                v.texcoords[i].lerp(v.texcoords[j], u)
            };
            let c = if v.colors.is_empty() {
                Vec3::ONE
            } else {
                v.colors[i].lerp(v.colors[j], u)
            };
            (p, n, uv, c, None)
        }
        Elements::Points(idx) => {
            let i = idx[e][0] as usize;
            let v = &shape.vertices;
            let p = v.positions[i];
            let uv = v.texcoords.get(i).copied().unwrap_or(Vec2::ZERO);
            let c = v.colors.get(i).copied().unwrap_or(Vec3::ONE);
            (p, Vec3::Z, uv, c, None)
        }
    };

    let world_pos = instance.frame.point_to_world(local_pos);
    let mut world_n = instance.frame.normal_to_world(local_n).normalize_or_zero();
    if material.double_sided && world_n.dot(outgoing) < 0.0 {
        world_n = -world_n;
        local_n = -local_n;
    }
    let _ = local_n;
    world_n = apply_normal_map(scene, material, texcoord, world_n, tangent);

    let (kd, ks, kt, alpha) = resolve_material(scene, material, texcoord, color);
    let ke_tex = eval_texture(
        &scene.textures,
        material.ke_tex.as_ref(),
        texcoord,
        true,
        Vec4::ONE,
    );
    let ke = material.ke * ke_tex.truncate();

    ShadingPoint {
        position: world_pos,
        normal: world_n,
        texcoord,
        outgoing,
        emission: EmissionTerm {
            ke,
            kind: emission_kind_for(shape),
        },
        brdf: BrdfTerm {
            kd,
            ks,
            kt,
            alpha,
            kind: brdf_kind_for(shape),
        },
    }
}

/// Barycentric/parametric encoding used by both the BVH hit path and light
/// sampling: triangles store full `(w0,w1,w2)` weights, quads store
/// continuous `(u,v)` in `y,z`, lines store their segment parameter in `y`,
/// points ignore it entirely.
pub fn bary_for_element(shape: &Shape, element: u32, uv: Vec2) -> Vec3 {
    match &shape.elements {
        Elements::Triangles(_) => crate::sampling::sample_triangle_uniform(uv),
        Elements::Quads(idx) => {
            let quad = idx[element as usize];
            if quad[3] == quad[2] {
                crate::sampling::sample_triangle_uniform(uv)
            } else {
                Vec3::new(0.0, uv.x, uv.y)
            }
        }
        Elements::Lines(_) => Vec3::new(0.0, uv.x, 0.0),
        Elements::Points(_) => {
            let _ = element;
            Vec3::ZERO
        }
    }
}

/// Environment evaluation: equirectangular `(theta, phi)` lookup from `-wo`
/// in the environment's local frame (spec §4.4 `eval_env_point`).
pub fn eval_env_point(scene: &Scene, env: &Environment, outgoing: Vec3) -> ShadingPoint {
    let local_dir = env.frame.vector_to_local(-outgoing).normalize_or_zero();
    let theta = local_dir.y.clamp(-1.0, 1.0).acos();
    let phi = local_dir.z.atan2(local_dir.x);
    let u = phi / (2.0 * PI) + 0.5;
    let v = theta / PI;
    let ke_tex = eval_texture(
        &scene.textures,
        env.ke_tex.as_ref(),
        Vec2::new(u, v),
        true,
        Vec4::ONE,
    );
    let ke = env.ke * ke_tex.truncate();
    ShadingPoint {
        position: Vec3::ZERO,
        normal: -outgoing,
        texcoord: Vec2::new(u, v),
        outgoing,
        emission: EmissionTerm {
            ke,
            kind: EmissionKind::Env,
        },
        brdf: BrdfTerm {
            kd: Vec3::ZERO,
            ks: Vec3::ZERO,
            kt: Vec3::ZERO,
            alpha: 1.0,
            kind: BrdfKind::Point,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Frame, Instance, MaterialId, Shape, ShapeId, VertexData};
    use glam::Mat3;

    fn flat_triangle_scene() -> (Scene, Instance) {
        let mut scene = Scene::default();
        scene.materials.push(Material {
            kind: MaterialKind::SpecularRoughness,
            kd: Vec3::new(0.8, 0.2, 0.1),
            rs: 0.5,
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
        let instance = Instance {
            frame: Frame::new(Mat3::IDENTITY, Vec3::ZERO),
            shape: ShapeId(0),
        };
        (scene, instance)
    }

    #[test]
    fn triangle_point_resolves_specular_roughness_material() {
        let (scene, instance) = flat_triangle_scene();
        let sp = eval_shape_point(&scene, &instance, 0, Vec3::new(0.34, 0.33, 0.33), Vec3::NEG_Z);
        assert!((sp.brdf.alpha - 0.25).abs() < 1e-5);
        assert_eq!(sp.brdf.kind, BrdfKind::Microfacet);
        assert_eq!(sp.emission.kind, EmissionKind::AreaDiffuse);
        assert!((sp.normal - Vec3::Z).length() < 1e-4);
    }

    #[test]
    fn degenerate_quad_interpolates_as_a_true_barycentric_triangle() {
        let mut scene = Scene::default();
        scene.materials.push(Material {
            kind: MaterialKind::SpecularRoughness,
            ..Default::default()
        });
        scene.shapes.push(Shape {
            vertices: VertexData {
                positions: vec![Vec3::new(0.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, 2.0, 0.0)],
                normals: vec![Vec3::Z; 3],
                ..Default::default()
            },
            // w == z: a degenerate quad standing in for the triangle [0, 1, 2].
            elements: Elements::Quads(vec![[0, 1, 2, 2]]),
            material: MaterialId(0),
        });
        let instance = Instance {
            frame: Frame::new(Mat3::IDENTITY, Vec3::ZERO),
            shape: ShapeId(0),
        };

        let bary = Vec3::new(0.2, 0.3, 0.5);
        let sp = eval_shape_point(&scene, &instance, 0, bary, Vec3::NEG_Z);
        let expected = Vec3::new(0.0, 0.0, 0.0) * bary.x + Vec3::new(2.0, 0.0, 0.0) * bary.y
            + Vec3::new(0.0, 2.0, 0.0) * bary.z;
        assert!(
            (sp.position - expected).length() < 1e-5,
            "degenerate quad used bilinear (u,v) instead of true barycentric weights: got {:?}, want {expected:?}",
            sp.position
        );
    }

    #[test]
    fn double_sided_flips_normal_away_from_incoming() {
        let (mut scene, instance) = flat_triangle_scene();
        scene.materials[0].double_sided = true;
        let wo = Vec3::NEG_Z;
        let sp = eval_shape_point(&scene, &instance, 0, Vec3::new(0.34, 0.33, 0.33), wo);
        assert!(sp.normal.dot(wo) > 0.0);
    }
}
