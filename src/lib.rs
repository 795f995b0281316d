//! Physically-based Monte Carlo path tracer: two-level BVH, MIS path
//! integrator, progressive tile-parallel render loop.

pub mod error; // programmer-error conditions
pub mod rng; // PCG32 streams + layered Sampler
pub mod sampling; // hemisphere/sphere/triangle/quad/disk/cylinder samplers
pub mod geometry; // Aabb, Ray, Frame, scene data model
pub mod bvh; // two-level BVH build/refit/traverse
pub mod texture; // eval_texture: bilinear/nearest, wrap/clamp, sRGB
pub mod scene; // Scene container, elem_cdf, lights
pub mod shading; // eval_shape_point / eval_env_point, material resolution
pub mod brdf; // BRDF/emission eval, pdf, direction sampling
pub mod filter; // reconstruction filters
pub mod integrator; // shade(): shader dispatch, NEE+MIS, Russian roulette
pub mod render; // TraceParams, tile decomposition, trace_image/_samples/_block
pub mod executor; // Executor trait + RayonExecutor

pub use error::{PathtraceError, Result};
pub use geometry::{
    Aabb, Camera, Elements, Environment, Frame, Instance, InstanceId, Material, MaterialId,
    MaterialKind, Ray, Shape, ShapeId, Texture, TextureId, VertexData,
};
pub use bvh::BvhTree;
pub use scene::{build_shape_bvh, refit_shape_bvh, Light, LightKind, Scene, SceneHit, ScenePointHit};
pub use texture::eval_texture;
pub use rng::{Pcg32, RngKind, Sampler};
pub use filter::FilterType;
pub use integrator::{IntegratorParams, RenderStats, ShaderKind};
pub use render::{
    trace_async_start, trace_async_stop, trace_block, trace_block_filtered, trace_blocks,
    trace_image, trace_rngs, trace_samples, Block, FilterAccumulator, Image, TraceParams,
};
pub use executor::{Executor, RayonExecutor};
