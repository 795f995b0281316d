//! Tile-parallel progressive render loop (spec §4.7): `TraceParams`
//! configuration, block decomposition, camera-ray generation, and the
//! `trace_*` family of entry points.
//!
//! `TraceParams` carries the render-loop fields and embeds
//! [`IntegratorParams`] rather than flattening its fields in, matching that
//! module's own note that it was kept independent of `render.rs`.

use crate::error::{PathtraceError, Result};
use crate::executor::Executor;
use crate::filter::FilterType;
use crate::geometry::{Camera, Ray};
use crate::integrator::{shade, IntegratorParams, RenderStats};
use crate::rng::{RngKind, Sampler};
use crate::sampling::sample_disk_uniform;
use crate::scene::Scene;
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Render configuration (spec §6 `trace_params`). Derives `serde` so callers
/// can load it from TOML, matching
/// `astraweave-render::material`'s `toml::from_str` + `Deserialize` pattern.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TraceParams {
    pub camera_id: usize,
    pub width: u32,
    pub height: u32,
    pub nsamples: u32,
    pub integrator: IntegratorParams,
    pub rng_type: RngKind,
    pub filter_type: FilterType,
    pub parallel: bool,
    pub seed: u32,
    pub block_size: u32,
}

impl Default for TraceParams {
    fn default() -> Self {
        Self {
            camera_id: 0,
            width: 640,
            height: 480,
            nsamples: 256,
            integrator: IntegratorParams::default(),
            rng_type: RngKind::Uniform,
            filter_type: FilterType::Box,
            parallel: true,
            seed: 1,
            block_size: 32,
        }
    }
}

impl TraceParams {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

/// Generic row-major pixel grid, grounded on
/// `astraweave-render::texture`'s CPU-side buffer indexing.
#[derive(Debug, Clone)]
pub struct Image<T> {
    pub width: u32,
    pub height: u32,
    data: Vec<T>,
}

impl<T: Clone> Image<T> {
    pub fn new(width: u32, height: u32, fill: T) -> Self {
        Self {
            width,
            height,
            data: vec![fill; (width * height) as usize],
        }
    }
}

impl<T> Image<T> {
    pub fn pixels(&self) -> &[T] {
        &self.data
    }
}

impl<T> Index<(u32, u32)> for Image<T> {
    type Output = T;
    fn index(&self, (i, j): (u32, u32)) -> &T {
        &self.data[(j * self.width + i) as usize]
    }
}

impl<T> IndexMut<(u32, u32)> for Image<T> {
    fn index_mut(&mut self, (i, j): (u32, u32)) -> &mut T {
        &mut self.data[(j * self.width + i) as usize]
    }
}

/// An axis-aligned, half-open `[x0,x1) x [y0,y1)` tile of the image.
#[derive(Debug, Clone, Copy)]
pub struct Block {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Block {
    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }
}

/// Partition `[0,W) x [0,H)` into `block_size x block_size` tiles; boundary
/// tiles clip (spec §4.7 "Tile decomposition").
pub fn trace_blocks(params: &TraceParams) -> Vec<Block> {
    let bs = params.block_size.max(1);
    let mut blocks = Vec::new();
    let mut y0 = 0;
    while y0 < params.height {
        let y1 = (y0 + bs).min(params.height);
        let mut x0 = 0;
        while x0 < params.width {
            let x1 = (x0 + bs).min(params.width);
            blocks.push(Block { x0, y0, x1, y1 });
            x0 = x1;
        }
        y0 = y1;
    }
    blocks
}

/// One RNG per pixel, seeded from `(params.seed, pixel_index)`. `Sampler`'s
/// own seeding already folds `pixel_index` through `(pixel_index << 1) | 1`
/// internally, matching spec's `(j*W+i)*2+1` formula exactly.
pub fn trace_rngs(params: &TraceParams) -> Vec<Mutex<Sampler>> {
    (0..(params.width as u64 * params.height as u64))
        .map(|pixel_index| Mutex::new(Sampler::new(params.seed, pixel_index, params.rng_type, params.nsamples)))
        .collect()
}

/// Generate a camera ray for normalized image coordinates `(u,v)` and a 2D
/// lens sample, per spec §4.7 "Camera ray". Camera space follows the
/// OpenGL convention used throughout this crate: looking down `-z`.
fn camera_ray(camera: &Camera, u: f32, v: f32, lens: Vec2) -> Ray {
    let tan_half_y = (camera.yfov * 0.5).tan();
    let tan_half_x = tan_half_y * camera.aspect;
    let px = (u - 0.5) * 2.0 * tan_half_x * camera.focus;
    let py = (v - 0.5) * 2.0 * tan_half_y * camera.focus;
    let q_local = Vec3::new(px, py, -camera.focus);

    let disk = sample_disk_uniform(lens) * (camera.aperture * 0.5);
    let o_local = Vec3::new(disk.x, disk.y, 0.0);

    let dir_local = (q_local - o_local).normalize_or_zero();
    let o_world = camera.frame.point_to_world(o_local);
    let d_world = camera.frame.vector_to_world(dir_local).normalize_or_zero();
    Ray::new(o_world, d_world)
}

fn trace_pixel_samples(
    scene: &Scene,
    camera: &Camera,
    width: u32,
    height: u32,
    i: u32,
    j: u32,
    rng_cell: &Mutex<Sampler>,
    s_min: u32,
    s_max: u32,
    params: &TraceParams,
    stats: &RenderStats,
) -> Vec3 {
    let mut sampler = rng_cell.lock().unwrap();
    let mut sum = Vec3::ZERO;
    for s in s_min..s_max {
        sampler.start_sample(s);
        let jitter = sampler.next2f();
        let u = (i as f32 + jitter.x) / width as f32;
        let v = 1.0 - (j as f32 + jitter.y) / height as f32;
        let lens = sampler.next2f();
        let ray = camera_ray(camera, u, v, lens);
        let (radiance, _hit) = shade(scene, ray, &mut sampler, &params.integrator, stats);
        sum += radiance;
    }
    sum
}

/// Render samples `[s_min, s_max)` of one tile and fold them into `img`
/// using the progressive-average update `(img*s_min + sum) / s_max` (spec
/// §4.7 "Per-pixel state"). Tiles own disjoint pixel rectangles so no lock
/// is needed around `img` itself; `rngs` cells are locked per-pixel since
/// disjointness across tiles can't be proven to the borrow checker.
pub fn trace_block(
    scene: &Scene,
    img: &mut Image<Vec3>,
    block: Block,
    s_min: u32,
    s_max: u32,
    rngs: &[Mutex<Sampler>],
    params: &TraceParams,
    stats: &RenderStats,
) -> Result<()> {
    let camera = params.camera_id_camera(scene)?;
    for j in block.y0..block.y1 {
        for i in block.x0..block.x1 {
            let pixel_index = (j * params.width + i) as usize;
            let sum = trace_pixel_samples(
                scene,
                camera,
                params.width,
                params.height,
                i,
                j,
                &rngs[pixel_index],
                s_min,
                s_max,
                params,
                stats,
            );
            let prev = img[(i, j)];
            img[(i, j)] = (prev * s_min as f32 + sum) / s_max as f32;
        }
    }
    Ok(())
}

/// Padded `(acc, weight)` buffer for non-box reconstruction filters (spec
/// §4.7 "Filtered variant"); padding of 2 pixels on each side covers the
/// largest filter footprint (cubic/catmull-rom/mitchell, radius 2).
pub struct FilterAccumulator {
    width: u32,
    height: u32,
    acc: Vec<Vec3>,
    weight: Vec<f32>,
}

const FILTER_PAD: i64 = 2;

impl FilterAccumulator {
    fn new(width: u32, height: u32) -> Self {
        let pw = width + 2 * FILTER_PAD as u32;
        let ph = height + 2 * FILTER_PAD as u32;
        Self {
            width: pw,
            height: ph,
            acc: vec![Vec3::ZERO; (pw * ph) as usize],
            weight: vec![0.0; (pw * ph) as usize],
        }
    }

    fn add(&mut self, fi: i64, fj: i64, l: Vec3, w: f32) {
        let px = fi + FILTER_PAD;
        let py = fj + FILTER_PAD;
        if px < 0 || py < 0 || px >= self.width as i64 || py >= self.height as i64 {
            return;
        }
        let idx = (py as u32 * self.width + px as u32) as usize;
        self.acc[idx] += l * w;
        self.weight[idx] += w;
    }

    fn resolve(&self, width: u32, height: u32) -> Image<Vec3> {
        let mut out = Image::new(width, height, Vec3::ZERO);
        for j in 0..height {
            for i in 0..width {
                let px = i as i64 + FILTER_PAD;
                let py = j as i64 + FILTER_PAD;
                let idx = (py as u32 * self.width + px as u32) as usize;
                let w = self.weight[idx];
                out[(i, j)] = if w > 0.0 { self.acc[idx] / w } else { Vec3::ZERO };
            }
        }
        out
    }
}

/// Render samples `[s_min, s_max)` of one tile through a non-box filter,
/// accumulating into a private scratch buffer and committing it to the
/// shared accumulator under a single lock (spec §5 "non-box filters").
pub fn trace_block_filtered(
    scene: &Scene,
    acc: &Mutex<FilterAccumulator>,
    block: Block,
    s_min: u32,
    s_max: u32,
    rngs: &[Mutex<Sampler>],
    params: &TraceParams,
    stats: &RenderStats,
) -> Result<()> {
    let camera = params.camera_id_camera(scene)?;
    let radius = params.filter_type.radius() as i64;
    let mut scratch = FilterAccumulator::new(block.width(), block.height());

    for j in block.y0..block.y1 {
        for i in block.x0..block.x1 {
            let pixel_index = (j * params.width + i) as usize;
            let mut sampler = rngs[pixel_index].lock().unwrap();
            for s in s_min..s_max {
                sampler.start_sample(s);
                let jitter = sampler.next2f();
                let px = i as f32 + jitter.x;
                let py = j as f32 + jitter.y;
                let u = px / params.width as f32;
                let v = 1.0 - py / params.height as f32;
                let lens = sampler.next2f();
                let ray = camera_ray(camera, u, v, lens);
                let (radiance, _hit) = shade(scene, ray, &mut sampler, &params.integrator, stats);

                let fi_min = (px - 0.5 - radius as f32).floor() as i64;
                let fi_max = (px + 0.5 + radius as f32).ceil() as i64;
                let fj_min = (py - 0.5 - radius as f32).floor() as i64;
                let fj_max = (py + 0.5 + radius as f32).ceil() as i64;
                for fj in fj_min..=fj_max {
                    let wy = params.filter_type.eval(fj as f32 - py + 0.5);
                    if wy == 0.0 {
                        continue;
                    }
                    for fi in fi_min..=fi_max {
                        let wx = params.filter_type.eval(fi as f32 - px + 0.5);
                        if wx == 0.0 {
                            continue;
                        }
                        scratch.add(fi - block.x0 as i64, fj - block.y0 as i64, radiance, wx * wy);
                    }
                }
            }
        }
    }

    let mut shared = acc.lock().unwrap();
    for fj in -FILTER_PAD..(block.height() as i64 + FILTER_PAD) {
        for fi in -FILTER_PAD..(block.width() as i64 + FILTER_PAD) {
            let spx = fi + FILTER_PAD;
            let spy = fj + FILTER_PAD;
            if spx < 0 || spy < 0 || spx >= scratch.width as i64 || spy >= scratch.height as i64 {
                continue;
            }
            let sidx = (spy as u32 * scratch.width + spx as u32) as usize;
            let w = scratch.weight[sidx];
            if w == 0.0 {
                continue;
            }
            shared.add(fi + block.x0 as i64, fj + block.y0 as i64, scratch.acc[sidx] / w, w);
        }
    }
    Ok(())
}

/// Fan all tiles out over `[s_min, s_max)` and await them (spec §4.7
/// "Parallel vs serial").
pub fn trace_samples(
    scene: &Scene,
    img: &mut Image<Vec3>,
    s_min: u32,
    s_max: u32,
    rngs: &[Mutex<Sampler>],
    params: &TraceParams,
    stats: &RenderStats,
) -> Result<()> {
    let blocks = trace_blocks(params);
    if params.filter_type == FilterType::Box {
        if params.parallel {
            use rayon::prelude::*;
            let results: Vec<Result<Vec<((u32, u32), Vec3)>>> = blocks
                .par_iter()
                .map(|&block| trace_block_local(scene, block, s_min, s_max, rngs, params, stats))
                .collect();
            for r in results {
                for ((i, j), v) in r? {
                    img[(i, j)] = v;
                }
            }
        } else {
            for block in blocks {
                trace_block(scene, img, block, s_min, s_max, rngs, params, stats)?;
            }
        }
        return Ok(());
    }

    let acc = Mutex::new(FilterAccumulator::new(params.width, params.height));
    if params.parallel {
        use rayon::prelude::*;
        blocks
            .par_iter()
            .map(|&block| trace_block_filtered(scene, &acc, block, s_min, s_max, rngs, params, stats))
            .collect::<Result<Vec<()>>>()?;
    } else {
        for block in blocks {
            trace_block_filtered(scene, &acc, block, s_min, s_max, rngs, params, stats)?;
        }
    }
    let resolved = acc.into_inner().unwrap().resolve(params.width, params.height);
    *img = resolved;
    Ok(())
}

/// Box-filter variant of `trace_block` that writes into a private scratch
/// vector instead of `img`, so parallel tile tasks never alias the shared
/// image buffer. Used by `trace_samples`'s parallel box-filter path.
fn trace_block_local(
    scene: &Scene,
    block: Block,
    s_min: u32,
    s_max: u32,
    rngs: &[Mutex<Sampler>],
    params: &TraceParams,
    stats: &RenderStats,
) -> Result<Vec<((u32, u32), Vec3)>> {
    let camera = params.camera_id_camera(scene)?;
    let mut out = Vec::with_capacity((block.width() * block.height()) as usize);
    for j in block.y0..block.y1 {
        for i in block.x0..block.x1 {
            let pixel_index = (j * params.width + i) as usize;
            let sum = trace_pixel_samples(
                scene,
                camera,
                params.width,
                params.height,
                i,
                j,
                &rngs[pixel_index],
                s_min,
                s_max,
                params,
                stats,
            );
            out.push(((i, j), sum / s_max as f32));
        }
    }
    Ok(out)
}

impl TraceParams {
    fn camera_id_camera<'a>(&self, scene: &'a Scene) -> Result<&'a Camera> {
        scene
            .cameras
            .get(self.camera_id)
            .ok_or(PathtraceError::InvalidCamera(self.camera_id, scene.cameras.len()))
    }
}

/// Render the full `[0, nsamples)` range of samples in one call.
pub fn trace_image(scene: &Scene, params: &TraceParams) -> Result<Image<Vec3>> {
    let _ = params.camera_id_camera(scene)?;
    let span = tracing::info_span!("trace_image", width = params.width, height = params.height, nsamples = params.nsamples);
    let _enter = span.enter();

    let rngs = trace_rngs(params);
    let stats = RenderStats::default();
    let mut img = Image::new(params.width, params.height, Vec3::ZERO);
    trace_samples(scene, &mut img, 0, params.nsamples, &rngs, params, &stats)?;

    tracing::info!(
        dropped_nonfinite = stats.dropped_nonfinite.load(std::sync::atomic::Ordering::Relaxed),
        "trace_image complete"
    );
    Ok(img)
}

/// Schedule sample `s`'s tiles onto `executor`, then recurse into `s + 1`
/// once every tile of `s` has committed. This keeps blocks within a sample
/// running in parallel while still committing samples strictly in order, so
/// `on_sample(s)` always sees a fully up-to-date image for that sample (spec
/// §4.7 "Async start/stop").
fn schedule_sample(
    scene: Arc<Scene>,
    img: Arc<Mutex<Image<Vec3>>>,
    acc: Option<Arc<Mutex<FilterAccumulator>>>,
    rngs: Arc<Vec<Mutex<Sampler>>>,
    params: Arc<TraceParams>,
    stats: Arc<RenderStats>,
    executor: Arc<dyn Executor>,
    on_sample: Arc<dyn Fn(u32) + Send + Sync>,
    s: u32,
) {
    if s >= params.nsamples {
        return;
    }
    let blocks = trace_blocks(&params);
    let remaining = Arc::new(AtomicUsize::new(blocks.len()));

    for block in blocks {
        let scene = Arc::clone(&scene);
        let img = Arc::clone(&img);
        let acc = acc.clone();
        let rngs = Arc::clone(&rngs);
        let params = Arc::clone(&params);
        let stats = Arc::clone(&stats);
        let executor_for_next = Arc::clone(&executor);
        let on_sample = Arc::clone(&on_sample);
        let remaining = Arc::clone(&remaining);

        executor.spawn(Box::new(move || {
            let result = match &acc {
                Some(acc) => trace_block_filtered(&scene, acc, block, s, s + 1, &rngs, &params, &stats),
                None => {
                    let mut guard = img.lock().unwrap();
                    trace_block(&scene, &mut guard, block, s, s + 1, &rngs, &params, &stats)
                }
            };
            if let Err(err) = result {
                tracing::error!(?err, "trace_async tile failed");
            }

            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                if let Some(acc) = &acc {
                    let resolved = acc.lock().unwrap().resolve(params.width, params.height);
                    *img.lock().unwrap() = resolved;
                }
                on_sample(s);
                schedule_sample(scene, img, acc.clone(), rngs, params, stats, executor_for_next, on_sample, s + 1);
            }
        }));
    }
}

/// Begin progressive rendering on `executor`, invoking `on_sample(s)` after
/// every pixel has accumulated sample `s` (spec §4.7 "Async start"). Returns
/// immediately; call [`trace_async_stop`] to cancel outstanding work.
pub fn trace_async_start(
    scene: Arc<Scene>,
    img: Arc<Mutex<Image<Vec3>>>,
    rngs: Arc<Vec<Mutex<Sampler>>>,
    params: Arc<TraceParams>,
    executor: Arc<dyn Executor>,
    on_sample: Arc<dyn Fn(u32) + Send + Sync>,
) -> Result<()> {
    let _ = params.camera_id_camera(&scene)?;
    let stats = Arc::new(RenderStats::default());
    let acc = if params.filter_type == FilterType::Box {
        None
    } else {
        Some(Arc::new(Mutex::new(FilterAccumulator::new(params.width, params.height))))
    };
    schedule_sample(scene, img, acc, rngs, params, stats, executor, on_sample, 0);
    Ok(())
}

/// Cancel all outstanding tiles queued by [`trace_async_start`] (spec §4.7
/// "Async stop"); in-flight callbacks still run to completion, but no further
/// samples are scheduled afterward.
pub fn trace_async_stop(executor: &dyn Executor) {
    executor.clear_queue();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Environment;

    fn flat_env_scene() -> Scene {
        let mut scene = Scene::default();
        scene.cameras.push(Camera::default());
        scene.environments.push(Environment {
            ke: Vec3::splat(2.0),
            ..Default::default()
        });
        scene
    }

    #[test]
    fn trace_blocks_covers_image_exactly_once() {
        let params = TraceParams {
            width: 70,
            height: 33,
            block_size: 32,
            ..Default::default()
        };
        let blocks = trace_blocks(&params);
        let mut covered = vec![false; (params.width * params.height) as usize];
        for b in blocks {
            for j in b.y0..b.y1 {
                for i in b.x0..b.x1 {
                    let idx = (j * params.width + i) as usize;
                    assert!(!covered[idx], "pixel ({i},{j}) covered twice");
                    covered[idx] = true;
                }
            }
        }
        assert!(covered.into_iter().all(|c| c));
    }

    #[test]
    fn pinhole_camera_ignores_lens_jitter() {
        let camera = Camera {
            aperture: 0.0,
            ..Default::default()
        };
        let a = camera_ray(&camera, 0.5, 0.5, Vec2::new(0.1, 0.9));
        let b = camera_ray(&camera, 0.5, 0.5, Vec2::new(0.9, 0.1));
        assert!((a.o - b.o).length() < 1e-6);
        assert!((a.d - b.d).length() < 1e-6);
    }

    #[test]
    fn trace_image_on_env_only_scene_is_uniform_env_color() -> Result<()> {
        let scene = flat_env_scene();
        let params = TraceParams {
            width: 8,
            height: 8,
            nsamples: 1,
            block_size: 4,
            integrator: IntegratorParams {
                shader: crate::integrator::ShaderKind::Pathtrace,
                ..Default::default()
            },
            ..Default::default()
        };
        let img = trace_image(&scene, &params)?;
        for j in 0..params.height {
            for i in 0..params.width {
                assert!((img[(i, j)] - Vec3::splat(2.0)).length() < 1e-3);
            }
        }
        Ok(())
    }

    #[test]
    fn split_sample_range_matches_single_call() -> Result<()> {
        let scene = flat_env_scene();
        let params = TraceParams {
            width: 4,
            height: 4,
            nsamples: 8,
            block_size: 4,
            parallel: false,
            ..Default::default()
        };
        let rngs_a = trace_rngs(&params);
        let stats_a = RenderStats::default();
        let mut img_a = Image::new(params.width, params.height, Vec3::ZERO);
        trace_samples(&scene, &mut img_a, 0, 8, &rngs_a, &params, &stats_a)?;

        let rngs_b = trace_rngs(&params);
        let stats_b = RenderStats::default();
        let mut img_b = Image::new(params.width, params.height, Vec3::ZERO);
        trace_samples(&scene, &mut img_b, 0, 4, &rngs_b, &params, &stats_b)?;
        trace_samples(&scene, &mut img_b, 4, 8, &rngs_b, &params, &stats_b)?;

        for j in 0..params.height {
            for i in 0..params.width {
                assert!((img_a[(i, j)] - img_b[(i, j)]).length() < 1e-4);
            }
        }
        Ok(())
    }

    #[test]
    fn toml_roundtrip_parses_defaults() -> Result<()> {
        let toml_str = toml::to_string(&TraceParams::default()).unwrap();
        let parsed = TraceParams::from_toml_str(&toml_str)?;
        assert_eq!(parsed.width, TraceParams::default().width);
        Ok(())
    }

    #[test]
    fn trace_async_start_runs_all_samples_and_calls_on_sample_in_order() -> Result<()> {
        use crate::executor::RayonExecutor;

        let scene = Arc::new(flat_env_scene());
        let params = Arc::new(TraceParams {
            width: 4,
            height: 4,
            nsamples: 4,
            block_size: 2,
            ..Default::default()
        });
        let img = Arc::new(Mutex::new(Image::new(params.width, params.height, Vec3::ZERO)));
        let rngs = Arc::new(trace_rngs(&params));
        let executor: Arc<dyn Executor> = Arc::new(RayonExecutor::new(2));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_for_cb = Arc::clone(&seen);
        let on_sample: Arc<dyn Fn(u32) + Send + Sync> = Arc::new(move |s| {
            seen_for_cb.lock().unwrap().push(s);
        });

        trace_async_start(
            Arc::clone(&scene),
            Arc::clone(&img),
            rngs,
            Arc::clone(&params),
            Arc::clone(&executor),
            on_sample,
        )?;
        executor.join_all();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), params.nsamples as usize);
        assert_eq!(*seen, vec![0, 1, 2, 3]);

        let final_img = img.lock().unwrap();
        for j in 0..params.height {
            for i in 0..params.width {
                assert!((final_img[(i, j)] - Vec3::splat(2.0)).length() < 1e-3);
            }
        }
        Ok(())
    }

    #[test]
    fn trace_async_stop_does_not_panic_with_no_outstanding_work() {
        use crate::executor::RayonExecutor;

        let executor = RayonExecutor::new(1);
        trace_async_stop(&executor);
    }
}
