//! Sampling primitives and their densities (spec §4.2).
//!
//! All direction samplers work in a local frame where `+z` is the pole
//! (hemisphere normal, sphere center direction, etc); callers rotate the
//! result into world space via the shading frame.

use glam::{Vec2, Vec3};
use std::f32::consts::PI;

#[inline]
pub fn sample_hemisphere_uniform(u: Vec2) -> Vec3 {
    let z = u.x;
    let r = (1.0 - z * z).max(0.0).sqrt();
    let phi = 2.0 * PI * u.y;
    Vec3::new(r * phi.cos(), r * phi.sin(), z)
}

#[inline]
pub fn sample_hemisphere_uniform_pdf(_w: Vec3) -> f32 {
    1.0 / (2.0 * PI)
}

#[inline]
pub fn sample_hemisphere_cosine(u: Vec2) -> Vec3 {
    let r = u.x.sqrt();
    let phi = 2.0 * PI * u.y;
    let x = r * phi.cos();
    let y = r * phi.sin();
    let z = (1.0 - u.x).max(0.0).sqrt();
    Vec3::new(x, y, z)
}

#[inline]
pub fn sample_hemisphere_cosine_pdf(w: Vec3) -> f32 {
    w.z.max(0.0) / PI
}

/// Cosine-power (Phong-lobe) hemisphere sampling with exponent `n`.
#[inline]
pub fn sample_hemisphere_cospower(u: Vec2, n: f32) -> Vec3 {
    let z = u.x.powf(1.0 / (n + 1.0));
    let r = (1.0 - z * z).max(0.0).sqrt();
    let phi = 2.0 * PI * u.y;
    Vec3::new(r * phi.cos(), r * phi.sin(), z)
}

#[inline]
pub fn sample_hemisphere_cospower_pdf(w: Vec3, n: f32) -> f32 {
    w.z.max(0.0).powf(n) * (n + 1.0) / (2.0 * PI)
}

#[inline]
pub fn sample_sphere_uniform(u: Vec2) -> Vec3 {
    let z = 1.0 - 2.0 * u.x;
    let r = (1.0 - z * z).max(0.0).sqrt();
    let phi = 2.0 * PI * u.y;
    Vec3::new(r * phi.cos(), r * phi.sin(), z)
}

#[inline]
pub fn sample_sphere_uniform_pdf() -> f32 {
    1.0 / (4.0 * PI)
}

#[inline]
pub fn sample_disk_uniform(u: Vec2) -> Vec2 {
    let r = u.x.sqrt();
    let phi = 2.0 * PI * u.y;
    Vec2::new(r * phi.cos(), r * phi.sin())
}

#[inline]
pub fn sample_disk_uniform_pdf() -> f32 {
    1.0 / PI
}

/// Uniform point on a unit cylinder's lateral surface: `z in [-1,1]`, angle
/// uniform. Used for line/hair cross-section sampling.
#[inline]
pub fn sample_cylinder_uniform(u: Vec2) -> Vec3 {
    let z = 2.0 * u.x - 1.0;
    let phi = 2.0 * PI * u.y;
    Vec3::new(phi.cos(), phi.sin(), z)
}

#[inline]
pub fn sample_cylinder_uniform_pdf() -> f32 {
    1.0 / (4.0 * PI)
}

/// Uniform barycentric point on a triangle, via the standard
/// `(1-sqrt(u), sqrt(u)*(1-v), sqrt(u)*v)` construction.
#[inline]
pub fn sample_triangle_uniform(u: Vec2) -> Vec3 {
    let su = u.x.sqrt();
    let b0 = 1.0 - su;
    let b1 = su * (1.0 - u.y);
    let b2 = su * u.y;
    Vec3::new(b0, b1, b2)
}

/// Uniform barycentric point on a quad (two triangles, selected by `u.x <
/// 0.5` and remapped), returning `(b0,b1,b2,b3)`-style weights as
/// `(tri_index, barycentric)` where `tri_index` is 0 for `(v0,v1,v3)` or 1
/// for `(v2,v3,v1)`.
#[inline]
pub fn sample_quad_uniform(u: Vec2) -> (u32, Vec3) {
    if u.x < 0.5 {
        let u2 = Vec2::new(u.x * 2.0, u.y);
        (0, sample_triangle_uniform(u2))
    } else {
        let u2 = Vec2::new((u.x - 0.5) * 2.0, u.y);
        (1, sample_triangle_uniform(u2))
    }
}

/// Discrete-index inverse-CDF sampling. `cdf` must be monotonically
/// non-decreasing; the last entry is the total measure. Returns the sampled
/// index and the density `pdf_i = (cdf[i]-cdf[i-1]) / cdf.last()`.
pub fn sample_discrete(cdf: &[f32], u: f32) -> (usize, f32) {
    debug_assert!(!cdf.is_empty());
    let total = *cdf.last().unwrap();
    let target = u * total;
    let idx = match cdf.binary_search_by(|probe| probe.partial_cmp(&target).unwrap()) {
        Ok(i) => i,
        Err(i) => i.min(cdf.len() - 1),
    };
    let prev = if idx == 0 { 0.0 } else { cdf[idx - 1] };
    let weight = cdf[idx] - prev;
    let pdf = if total > 0.0 { weight / total } else { 0.0 };
    (idx, pdf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cosine_hemisphere_pdf_matches_formula() {
        let w = Vec3::new(0.3, 0.1, 0.9486833).normalize();
        assert_relative_eq!(
            sample_hemisphere_cosine_pdf(w),
            w.z.max(0.0) / PI,
            epsilon = 1e-6
        );
    }

    #[test]
    fn hemisphere_samples_stay_on_unit_sphere_upper_half() {
        for i in 0..64u32 {
            let u = Vec2::new((i as f32 + 0.5) / 64.0, 0.37);
            let w = sample_hemisphere_cosine(u);
            assert!(w.z >= 0.0);
            assert_relative_eq!(w.length(), 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn triangle_barycentrics_sum_to_one() {
        for i in 0..16u32 {
            for j in 0..16u32 {
                let u = Vec2::new((i as f32 + 0.5) / 16.0, (j as f32 + 0.5) / 16.0);
                let b = sample_triangle_uniform(u);
                assert_relative_eq!(b.x + b.y + b.z, 1.0, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn discrete_cdf_picks_last_bucket_for_u_near_one() {
        let cdf = [1.0f32, 3.0, 6.0, 10.0];
        let (idx, _pdf) = sample_discrete(&cdf, 0.999999);
        assert_eq!(idx, 3);
    }

    #[test]
    fn discrete_cdf_is_monotonic_inverse() {
        let cdf = [2.0f32, 2.0, 5.0, 10.0];
        // u landing exactly at a flat (zero-width) region should not pick it.
        let (idx, _) = sample_discrete(&cdf, 0.15); // 1.5 / 10 -> falls in [2,2) degenerate bucket 1
        assert!(idx <= 2);
    }
}
