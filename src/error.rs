//! Error types for programmer-error conditions (spec §7, first bullet).
//!
//! Degenerate geometry and numerical blow-ups are *not* represented here —
//! those are handled by returning `None`/dropping the sample, per spec.

/// Errors that indicate a caller misused the API (malformed input, mismatched
/// buffers, building a BVH over an empty shape that is then asked to render).
/// These are invariant violations, not recoverable runtime conditions.
#[derive(thiserror::Error, Debug)]
pub enum PathtraceError {
    #[error("shape {0:?} has no elements of any kind (points/lines/triangles/quads)")]
    EmptyShape(crate::geometry::ShapeId),

    #[error("shape {0:?} mixes element kinds; a shape must have exactly one non-empty element array")]
    MixedElementKinds(crate::geometry::ShapeId),

    #[error("instance {0:?} references shape {1:?} which does not exist")]
    DanglingShapeRef(crate::geometry::InstanceId, crate::geometry::ShapeId),

    #[error("material {0:?} references texture {1:?} which does not exist")]
    DanglingTextureRef(crate::geometry::MaterialId, crate::geometry::TextureId),

    #[error("vertex buffer length mismatch in shape {shape:?}: positions={positions} {field}={other}")]
    VertexBufferMismatch {
        shape: crate::geometry::ShapeId,
        positions: usize,
        field: &'static str,
        other: usize,
    },

    #[error("camera id {0} is out of range (scene has {1} cameras)")]
    InvalidCamera(usize, usize),

    #[error("cannot build a BVH over zero primitives")]
    EmptyBvhInput,

    #[error("refit_bvh called on a BVH with a different primitive count than it was built with (had {built}, got {given})")]
    RefitPrimitiveCountMismatch { built: usize, given: usize },

    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, PathtraceError>;
