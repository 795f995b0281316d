//! Path integrator (spec §4.6): `shade()` dispatches on `ShaderKind` to one
//! of a full MIS path tracer, an MIS-less variant, a single-bounce direct
//! estimator, an eyelight preview, or one of the debug visualizations.
//!
//! Bounce-loop shape (throughput accumulation, camera-ray-to-radiance flow)
//! is grounded on `other_examples/4792e0f2_phoekz-raydiance__...raytracing.rs`'s
//! per-sample loop; the logging calls at the end of a render follow that same
//! file's `debug!`/`info!` stats pattern, adapted to `tracing`.

use crate::brdf::{eval_brdf_cos, eval_emission, pdf as brdf_pdf, sample_direction};
use crate::geometry::{Elements, Ray};
use crate::rng::Sampler;
use crate::sampling::{sample_discrete, sample_sphere_uniform, sample_sphere_uniform_pdf};
use crate::scene::{LightKind, Scene};
use crate::shading::{bary_for_element, eval_env_point, eval_shape_point, EmissionKind, ShadingPoint};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShaderKind {
    Pathtrace,
    PathtraceNomis,
    Direct,
    Eyelight,
    DebugNormal,
    DebugAlbedo,
    DebugTexcoord,
}

/// Fields of `TraceParams` the integrator itself consumes. Kept separate
/// from the render-loop fields (`width`, `block_size`, ...) so this module
/// has no dependency on `render.rs`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IntegratorParams {
    pub shader: ShaderKind,
    pub shadow_notransmission: bool,
    pub amb: Vec3,
    pub envmap_invisible: bool,
    pub min_depth: u32,
    pub max_depth: u32,
    pub pixel_clamp: f32,
    pub ray_eps: f32,
}

impl Default for IntegratorParams {
    fn default() -> Self {
        Self {
            shader: ShaderKind::Pathtrace,
            shadow_notransmission: false,
            amb: Vec3::splat(0.05),
            envmap_invisible: false,
            min_depth: 2,
            max_depth: 8,
            pixel_clamp: 10.0,
            ray_eps: 1e-3,
        }
    }
}

/// Per-render numerical-safeguard telemetry (spec §4.8), grounded on
/// `astraweave-physics::PhysicsStepProfile`'s accumulating-counters style.
#[derive(Debug, Default)]
pub struct RenderStats {
    pub dropped_nonfinite: AtomicU64,
}

impl RenderStats {
    fn record_drop(&self) {
        self.dropped_nonfinite.fetch_add(1, Ordering::Relaxed);
    }
}

#[inline]
fn offset_point(p: Vec3, n: Vec3, dir: Vec3, eps: f32) -> Vec3 {
    let sign = if n.dot(dir) > 0.0 { 1.0 } else { -1.0 };
    p + n * (sign * eps)
}

fn shadow_ray(origin: Vec3, n: Vec3, dir: Vec3, dist: f32, eps: f32) -> Ray {
    let o = offset_point(origin, n, dir, eps);
    let mut r = Ray::new(o, dir);
    r.tmax = (dist - 2.0 * eps).max(0.0);
    r
}

/// Attenuate a shadow ray through any transparent hits along its length
/// (spec §4.6 "Transmission estimator").
fn transmission(scene: &Scene, ray: &Ray, params: &IntegratorParams) -> Vec3 {
    if params.shadow_notransmission {
        return if scene.intersect_ray(ray, true).is_none() {
            Vec3::ONE
        } else {
            Vec3::ZERO
        };
    }
    let mut current = *ray;
    let mut atten = Vec3::ONE;
    for _ in 0..params.max_depth {
        let Some(hit) = scene.intersect_ray(&current, false) else {
            return atten;
        };
        let inst = &scene.instances[hit.instance.0 as usize];
        let sp = eval_shape_point(scene, inst, hit.element, hit.bary, -current.d);
        if sp.brdf.kt.max_element() <= 0.0 {
            return Vec3::ZERO;
        }
        atten *= sp.brdf.kt;
        let remaining = current.tmax - hit.t;
        let o = offset_point(sp.position, sp.normal, current.d, params.ray_eps);
        current = Ray::new(o, current.d);
        current.tmax = (remaining - 2.0 * params.ray_eps).max(0.0);
    }
    Vec3::ZERO
}

#[inline]
fn balance_heuristic(pdf_a: f32, pdf_b: f32) -> f32 {
    if pdf_a <= 0.0 {
        0.0
    } else {
        pdf_a / (pdf_a + pdf_b)
    }
}

fn is_finite_radiance(c: Vec3) -> bool {
    c.x.is_finite() && c.y.is_finite() && c.z.is_finite()
}

/// Next-event estimation: pick a light uniformly, sample a point/direction on
/// it, and return its MIS-weighted, shadow-attenuated contribution.
fn sample_lights(
    scene: &Scene,
    sp: &ShadingPoint,
    sampler: &mut Sampler,
    params: &IntegratorParams,
    use_mis: bool,
) -> Vec3 {
    if scene.lights.is_empty() {
        return Vec3::ZERO;
    }
    let n_lights = scene.lights.len() as f32;
    let light_idx = sampler.next1i(scene.lights.len() as u32) as usize;
    let light = &scene.lights[light_idx];

    match light.kind {
        LightKind::Environment(env_idx) => {
            let uv = sampler.next2f();
            let wi = sample_sphere_uniform(uv);
            let f_cos = eval_brdf_cos(sp, wi);
            if f_cos == Vec3::ZERO {
                return Vec3::ZERO;
            }
            let env = &scene.environments[env_idx];
            let env_point = eval_env_point(scene, env, -wi);
            let le = eval_emission(&env_point);
            if le == Vec3::ZERO {
                return Vec3::ZERO;
            }
            let ray = shadow_ray(sp.position, sp.normal, wi, f32::INFINITY, params.ray_eps);
            let atten = transmission(scene, &ray, params);
            let pdf_light = sample_sphere_uniform_pdf() / n_lights;
            let mis_w = if use_mis {
                balance_heuristic(pdf_light, brdf_pdf(sp, wi))
            } else {
                1.0
            };
            le * f_cos * atten * (mis_w / pdf_light)
        }
        LightKind::Instance(inst_id) => {
            let inst = &scene.instances[inst_id.0 as usize];
            let shape = &scene.shapes[inst.shape.0 as usize];
            let Some(rt) = scene.shape_runtime[inst.shape.0 as usize].as_ref() else {
                return Vec3::ZERO;
            };
            if rt.elem_cdf.is_empty() {
                return Vec3::ZERO;
            }
            let (elem, _) = sample_discrete(&rt.elem_cdf, sampler.next1f());
            let uv = sampler.next2f();
            let bary = bary_for_element(shape, elem as u32, uv);

            // First pass just to locate the light point; second pass with the
            // real outgoing direction resolves double-sided flip/emission.
            let probe = eval_shape_point(scene, inst, elem as u32, bary, Vec3::Z);
            let to_light = probe.position - sp.position;
            let dist = to_light.length();
            if dist <= 1e-8 {
                return Vec3::ZERO;
            }
            let wi = to_light / dist;
            let light_point = eval_shape_point(scene, inst, elem as u32, bary, -wi);
            let le = eval_emission(&light_point);
            if le == Vec3::ZERO {
                return Vec3::ZERO;
            }
            let f_cos = eval_brdf_cos(sp, wi);
            if f_cos == Vec3::ZERO {
                return Vec3::ZERO;
            }

            let total_measure = rt.total_measure();
            let is_area = matches!(shape.elements, Elements::Triangles(_) | Elements::Quads(_));
            let weight = if is_area {
                let cos_on_light = light_point.normal.dot(-wi).max(0.0);
                if cos_on_light <= 0.0 {
                    return Vec3::ZERO;
                }
                n_lights * total_measure * cos_on_light / (dist * dist)
            } else {
                n_lights * total_measure / (dist * dist)
            };
            let pdf_light = 1.0 / weight.max(1e-12);

            let ray = shadow_ray(sp.position, sp.normal, wi, dist, params.ray_eps);
            let atten = transmission(scene, &ray, params);
            let mis_w = if use_mis {
                balance_heuristic(pdf_light, brdf_pdf(sp, wi))
            } else {
                1.0
            };
            le * f_cos * atten * (mis_w * weight)
        }
    }
}

fn environment_radiance(scene: &Scene, ray: &Ray) -> Vec3 {
    let mut total = Vec3::ZERO;
    for env in &scene.environments {
        let sp = eval_env_point(scene, env, -ray.d);
        total += eval_emission(&sp);
    }
    total
}

/// `shade`: trace one camera ray through the scene under `params.shader`,
/// returning `(radiance, hit_flag)` — `hit_flag` is `false` only when the
/// primary ray misses everything (used by callers to composite backgrounds).
pub fn shade(
    scene: &Scene,
    ray: Ray,
    sampler: &mut Sampler,
    params: &IntegratorParams,
    stats: &RenderStats,
) -> (Vec3, bool) {
    let (radiance, hit) = match params.shader {
        ShaderKind::Pathtrace => pathtrace(scene, ray, sampler, params, true),
        ShaderKind::PathtraceNomis => pathtrace(scene, ray, sampler, params, false),
        ShaderKind::Direct => direct(scene, ray, sampler, params),
        ShaderKind::Eyelight => eyelight(scene, ray, sampler, params),
        ShaderKind::DebugNormal | ShaderKind::DebugAlbedo | ShaderKind::DebugTexcoord => {
            return debug_shade(scene, ray, params);
        }
    };

    if !is_finite_radiance(radiance) {
        stats.record_drop();
        tracing::warn!("dropped non-finite radiance sample");
        return (Vec3::ZERO, hit);
    }
    let clamped = if params.pixel_clamp > 0.0 {
        let len = radiance.length();
        if len > params.pixel_clamp {
            radiance * (params.pixel_clamp / len)
        } else {
            radiance
        }
    } else {
        radiance
    };
    (clamped, hit)
}

fn debug_shade(scene: &Scene, ray: Ray, params: &IntegratorParams) -> (Vec3, bool) {
    let Some(hit) = scene.intersect_ray(&ray, false) else {
        return (Vec3::ZERO, false);
    };
    let inst = &scene.instances[hit.instance.0 as usize];
    let sp = eval_shape_point(scene, inst, hit.element, hit.bary, -ray.d);
    let out = match params.shader {
        ShaderKind::DebugNormal => sp.normal * 0.5 + Vec3::splat(0.5),
        ShaderKind::DebugAlbedo => sp.brdf.kd + sp.brdf.ks,
        ShaderKind::DebugTexcoord => Vec3::new(sp.texcoord.x, sp.texcoord.y, 0.0),
        _ => unreachable!(),
    };
    (out, true)
}

/// Top-level eyelight entry point. `envmap_invisible` only gates the literal
/// primary-ray miss; transmission-continuation misses below still show the
/// environment.
fn eyelight(scene: &Scene, ray: Ray, sampler: &mut Sampler, params: &IntegratorParams) -> (Vec3, bool) {
    match scene.intersect_ray(&ray, false) {
        None => {
            let radiance = if params.envmap_invisible {
                Vec3::ZERO
            } else {
                environment_radiance(scene, &ray)
            };
            (radiance, false)
        }
        Some(hit) => (eyelight_from_hit(scene, &ray, hit, sampler, params, 0), true),
    }
}

fn eyelight_depth(scene: &Scene, ray: Ray, sampler: &mut Sampler, params: &IntegratorParams, depth: u32) -> Vec3 {
    let Some(hit) = scene.intersect_ray(&ray, false) else {
        return environment_radiance(scene, &ray);
    };
    eyelight_from_hit(scene, &ray, hit, sampler, params, depth)
}

fn eyelight_from_hit(
    scene: &Scene,
    ray: &Ray,
    hit: crate::scene::SceneHit,
    sampler: &mut Sampler,
    params: &IntegratorParams,
    depth: u32,
) -> Vec3 {
    let inst = &scene.instances[hit.instance.0 as usize];
    let sp = eval_shape_point(scene, inst, hit.element, hit.bary, -ray.d);
    let mut radiance = eval_emission(&sp) + eval_brdf_cos(&sp, sp.outgoing) * std::f32::consts::PI;
    if sp.brdf.kt.max_element() > 0.0 && depth < params.max_depth {
        let wi = -sp.outgoing;
        let origin = offset_point(sp.position, sp.normal, wi, params.ray_eps);
        let next_ray = Ray::new(origin, wi);
        radiance += sp.brdf.kt * eyelight_depth(scene, next_ray, sampler, params, depth + 1);
    }
    radiance
}

/// Top-level direct-lighting entry point; `envmap_invisible` gates only the
/// primary-ray miss, matching `eyelight`.
fn direct(scene: &Scene, ray: Ray, sampler: &mut Sampler, params: &IntegratorParams) -> (Vec3, bool) {
    if scene.intersect_ray(&ray, false).is_none() {
        let radiance = if params.envmap_invisible {
            Vec3::ZERO
        } else {
            environment_radiance(scene, &ray)
        };
        return (radiance, false);
    }
    (direct_depth(scene, ray, sampler, params, 0), true)
}

fn direct_depth(scene: &Scene, ray: Ray, sampler: &mut Sampler, params: &IntegratorParams, depth: u32) -> Vec3 {
    let Some(hit) = scene.intersect_ray(&ray, false) else {
        return environment_radiance(scene, &ray);
    };
    let inst = &scene.instances[hit.instance.0 as usize];
    let sp = eval_shape_point(scene, inst, hit.element, hit.bary, -ray.d);
    let mut radiance = eval_emission(&sp);
    radiance += sample_lights(scene, &sp, sampler, params, false);
    radiance += sp.brdf.kd * params.amb;
    if sp.brdf.kt.max_element() > 0.0 && depth < params.max_depth {
        let wi = -sp.outgoing;
        let origin = offset_point(sp.position, sp.normal, wi, params.ray_eps);
        let next_ray = Ray::new(origin, wi);
        radiance += sp.brdf.kt * direct_depth(scene, next_ray, sampler, params, depth + 1);
    }
    radiance
}

/// Full MIS path tracer (`use_mis=true`) or its MIS-less twin
/// (`use_mis=false`), per spec §4.6.
fn pathtrace(
    scene: &Scene,
    ray: Ray,
    sampler: &mut Sampler,
    params: &IntegratorParams,
    use_mis: bool,
) -> (Vec3, bool) {
    let mut radiance = Vec3::ZERO;
    let mut throughput = Vec3::ONE;
    let mut current_ray = ray;
    let mut specular_bounce = true;
    let mut bsdf_pdf_prev = 0.0f32;
    let mut primary_hit = true;

    for depth in 0..params.max_depth {
        let Some(hit) = scene.intersect_ray(&current_ray, false) else {
            if depth == 0 {
                primary_hit = false;
            }
            if depth == 0 && params.envmap_invisible {
                // drop the sample instead of returning an env color
            } else if depth == 0 || specular_bounce || !use_mis {
                radiance += throughput * environment_radiance(scene, &current_ray);
            } else {
                for env in &scene.environments {
                    let sp = eval_env_point(scene, env, -current_ray.d);
                    let le = eval_emission(&sp);
                    if le == Vec3::ZERO {
                        continue;
                    }
                    let pdf_light = sample_sphere_uniform_pdf() / scene.lights.len().max(1) as f32;
                    let mis_w = balance_heuristic(bsdf_pdf_prev, pdf_light);
                    radiance += throughput * le * mis_w;
                }
            }
            break;
        };

        let inst = &scene.instances[hit.instance.0 as usize];
        let sp = eval_shape_point(scene, inst, hit.element, hit.bary, -current_ray.d);

        let emitted = eval_emission(&sp);
        if emitted != Vec3::ZERO {
            if depth == 0 || specular_bounce || !use_mis {
                radiance += throughput * emitted;
            } else {
                let to_light_dist2 = (sp.position - current_ray.o).length_squared().max(1e-8);
                let cos_on_light = if sp.emission.kind == EmissionKind::AreaDiffuse {
                    sp.normal.dot(current_ray.d).abs().max(1e-4)
                } else {
                    1.0
                };
                let total_measure = scene.shape_runtime[inst.shape.0 as usize]
                    .as_ref()
                    .map(|rt| rt.total_measure())
                    .unwrap_or(1.0);
                let pdf_light =
                    to_light_dist2 / (scene.lights.len().max(1) as f32 * total_measure * cos_on_light);
                let mis_w = balance_heuristic(bsdf_pdf_prev, pdf_light);
                radiance += throughput * emitted * mis_w;
            }
        }

        // 1. Next-event estimation.
        radiance += throughput * sample_lights(scene, &sp, sampler, params, use_mis);

        // 2. BRDF sampling.
        let Some((wi, is_delta)) = sample_direction(&sp, sampler) else {
            break;
        };
        specular_bounce = is_delta;

        let weight = if is_delta {
            sp.brdf.kt
        } else {
            let f_cos = eval_brdf_cos(&sp, wi);
            let p = brdf_pdf(&sp, wi);
            if p > 0.0 {
                bsdf_pdf_prev = p;
                f_cos / p
            } else {
                break;
            }
        };
        throughput *= weight;

        if throughput.max_element() <= 0.0 {
            break;
        }

        // 3. Russian roulette after bounce 3.
        if depth >= params.min_depth.max(3) {
            let survival = throughput.max_element().min(0.95);
            if sampler.next1f() > survival {
                break;
            }
            throughput /= survival;
        }

        let origin = offset_point(sp.position, sp.normal, wi, params.ray_eps);
        current_ray = Ray::new(origin, wi);
    }

    (radiance, primary_hit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Frame, Instance, Material, MaterialId, MaterialKind, Shape, ShapeId, VertexData};
    use crate::rng::RngKind;
    use glam::Mat3;

    fn lit_scene() -> Scene {
        let mut scene = Scene::default();
        scene.materials.push(Material {
            kind: MaterialKind::SpecularRoughness,
            kd: Vec3::splat(0.8),
            ke: Vec3::ZERO,
            ..Default::default()
        });
        scene.materials.push(Material {
            kind: MaterialKind::SpecularRoughness,
            ke: Vec3::splat(5.0),
            ..Default::default()
        });
        // Floor.
        scene.shapes.push(Shape {
            vertices: VertexData {
                positions: vec![
                    Vec3::new(-5.0, 0.0, -5.0),
                    Vec3::new(5.0, 0.0, -5.0),
                    Vec3::new(5.0, 0.0, 5.0),
                    Vec3::new(-5.0, 0.0, 5.0),
                ],
                normals: vec![Vec3::Y; 4],
                ..Default::default()
            },
            elements: Elements::Quads(vec![[0, 1, 2, 3]]),
            material: MaterialId(0),
        });
        // Emissive light quad above.
        scene.shapes.push(Shape {
            vertices: VertexData {
                positions: vec![
                    Vec3::new(-1.0, 3.0, -1.0),
                    Vec3::new(1.0, 3.0, -1.0),
                    Vec3::new(1.0, 3.0, 1.0),
                    Vec3::new(-1.0, 3.0, 1.0),
                ],
                normals: vec![Vec3::NEG_Y; 4],
                ..Default::default()
            },
            elements: Elements::Quads(vec![[0, 1, 2, 3]]),
            material: MaterialId(1),
        });
        scene.instances.push(Instance {
            frame: Frame::new(Mat3::IDENTITY, Vec3::ZERO),
            shape: ShapeId(0),
        });
        scene.instances.push(Instance {
            frame: Frame::new(Mat3::IDENTITY, Vec3::ZERO),
            shape: ShapeId(1),
        });
        scene.build_scene_bvh(true).unwrap();
        scene
    }

    #[test]
    fn direct_lighting_on_floor_is_nonzero_and_finite() {
        let scene = lit_scene();
        let ray = Ray::new(Vec3::new(0.0, 5.0, 0.0), Vec3::NEG_Y);
        let mut sampler = Sampler::new(1, 0, RngKind::Uniform, 16);
        sampler.start_sample(0);
        let params = IntegratorParams::default();
        let (radiance, hit) = direct(&scene, ray, &mut sampler, &params);
        assert!(hit);
        assert!(is_finite_radiance(radiance));
        assert!(radiance.max_element() > 0.0);
    }

    #[test]
    fn pathtrace_on_empty_scene_returns_zero() {
        let scene = Scene::default();
        let ray = Ray::new(Vec3::ZERO, Vec3::Z);
        let mut sampler = Sampler::new(1, 0, RngKind::Uniform, 16);
        sampler.start_sample(0);
        let params = IntegratorParams::default();
        let (radiance, hit) = pathtrace(&scene, ray, &mut sampler, &params, true);
        assert_eq!(radiance, Vec3::ZERO);
        assert!(!hit);
    }

    #[test]
    fn envmap_invisible_drops_primary_miss() {
        let scene = Scene::default();
        let ray = Ray::new(Vec3::ZERO, Vec3::Z);
        let mut sampler = Sampler::new(1, 0, RngKind::Uniform, 16);
        sampler.start_sample(0);
        let mut params = IntegratorParams::default();
        params.envmap_invisible = true;
        let (radiance, hit) = pathtrace(&scene, ray, &mut sampler, &params, true);
        assert_eq!(radiance, Vec3::ZERO);
        assert!(!hit);
    }

    #[test]
    fn shadow_early_exit_is_independent_of_original_tmax() {
        let scene = lit_scene();
        let mut long_ray = Ray::new(Vec3::new(0.0, 0.5, 0.0), Vec3::Y);
        long_ray.tmax = 1000.0;
        let mut short_ray = Ray::new(Vec3::new(0.0, 0.5, 0.0), Vec3::Y);
        short_ray.tmax = 2.4;
        let a = scene.intersect_ray(&long_ray, true);
        let b = scene.intersect_ray(&short_ray, true);
        assert!(a.is_some());
        assert!(b.is_some());
    }
}
