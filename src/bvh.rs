//! Bounding volume hierarchy: build, refit, ray traversal, closest-point
//! traversal (spec §4.3).
//!
//! Flat-array node layout grounded on the GPU-path-tracer BVH shown in
//! `other_examples/7d89c25e_ssoj13-alembic-rs__...bvh.rs` (`Aabb::grow` /
//! `grow_point` / `longest_axis` helper shapes), adapted to `glam::Vec3` and
//! to a CPU traversal stack instead of a GPU buffer.

use crate::error::{PathtraceError, Result};
use crate::geometry::{Aabb, Ray};
use glam::{Vec2, Vec3};

/// Traversal stack depth; BVH depth is `O(log N)` for the balanced
/// heuristic, bounded in practice (spec §9 "Fixed-size stacks").
const STACK_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitHeuristic {
    /// Partition by centroid <= midpoint on the split axis. O(N) per level.
    Middle,
    /// `nth_element` at the median. O(N log N) overall, tighter trees.
    Balanced,
}

#[derive(Debug, Clone, Copy)]
pub struct BvhNode {
    pub aabb: Aabb,
    /// Leaf: index of the first primitive in `sorted_prim`. Internal: index
    /// of the left child (right child is `first_child + 1`).
    pub first: u32,
    pub count: u32,
    pub axis: u8,
}

impl BvhNode {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }
}

/// A densely packed BVH plus the permutation from sorted slot to original
/// primitive id.
#[derive(Debug, Clone)]
pub struct BvhTree {
    pub nodes: Vec<BvhNode>,
    pub sorted_prim: Vec<u32>,
}

/// Leaves with `count <= LEAF_MAX` (or a degenerate centroid AABB) stop
/// splitting, per spec §4.3.
const LEAF_MAX: usize = 4;

impl BvhTree {
    /// Build a BVH over `aabbs[i]` for primitive id `i`.
    pub fn build(aabbs: &[Aabb], heuristic: SplitHeuristic) -> Result<Self> {
        if aabbs.is_empty() {
            return Err(PathtraceError::EmptyBvhInput);
        }
        let n = aabbs.len();
        let centroids: Vec<Vec3> = aabbs.iter().map(Aabb::centroid).collect();
        let mut sorted_prim: Vec<u32> = (0..n as u32).collect();
        let mut nodes: Vec<BvhNode> = Vec::with_capacity(2 * n);

        nodes.push(BvhNode {
            aabb: Aabb::EMPTY,
            first: 0,
            count: 0,
            axis: 0,
        });
        build_recursive(0, 0, n, aabbs, &centroids, &mut sorted_prim, &mut nodes, heuristic);
        nodes.shrink_to_fit();

        Ok(Self { nodes, sorted_prim })
    }

    /// Recompute every node's AABB bottom-up from current primitive/child
    /// bounds. Used when only transforms or vertex positions changed — the
    /// tree topology (and `sorted_prim`) is left untouched.
    pub fn refit(&mut self, aabbs: &[Aabb]) -> Result<()> {
        if aabbs.len() != self.sorted_prim.len() {
            return Err(PathtraceError::RefitPrimitiveCountMismatch {
                built: self.sorted_prim.len(),
                given: aabbs.len(),
            });
        }
        self.refit_node(0, aabbs);
        Ok(())
    }

    fn refit_node(&mut self, node_idx: usize, aabbs: &[Aabb]) -> Aabb {
        let (is_leaf, first, count) = {
            let n = &self.nodes[node_idx];
            (n.is_leaf(), n.first, n.count)
        };
        let bounds = if is_leaf {
            let mut b = Aabb::EMPTY;
            for i in 0..count {
                let prim = self.sorted_prim[(first + i) as usize];
                b.grow(&aabbs[prim as usize]);
            }
            b
        } else {
            let l = self.refit_node(first as usize, aabbs);
            let r = self.refit_node(first as usize + 1, aabbs);
            Aabb::union(&l, &r)
        };
        self.nodes[node_idx].aabb = bounds;
        bounds
    }

    pub fn root_aabb(&self) -> Aabb {
        self.nodes[0].aabb
    }

    /// Ray intersection against every primitive reachable via `hit_fn`.
    /// `hit_fn(prim_id, ray) -> Option<(t, Hit)>`; `early_exit` stops at the
    /// first hit found (shadow rays) rather than tracking the closest one.
    pub fn intersect<H: Copy>(
        &self,
        ray: &Ray,
        early_exit: bool,
        mut hit_fn: impl FnMut(u32, &Ray) -> Option<(f32, H)>,
    ) -> Option<(u32, f32, H)> {
        if self.nodes.is_empty() {
            return None;
        }
        let inv_dir = ray.inv_dir();
        let sign = [inv_dir.x < 0.0, inv_dir.y < 0.0, inv_dir.z < 0.0];
        let mut working = *ray;
        let mut best: Option<(u32, f32, H)> = None;

        let mut stack = [0u32; STACK_DEPTH];
        let mut sp = 0usize;
        stack[sp] = 0;
        sp += 1;

        while sp > 0 {
            sp -= 1;
            let idx = stack[sp] as usize;
            let node = &self.nodes[idx];
            if !slab_test(&node.aabb, &working, inv_dir) {
                continue;
            }
            if node.is_leaf() {
                for i in 0..node.count {
                    let prim = self.sorted_prim[(node.first + i) as usize];
                    if let Some((t, h)) = hit_fn(prim, &working) {
                        if t >= working.tmin && t <= working.tmax {
                            working.tmax = t;
                            best = Some((prim, t, h));
                            if early_exit {
                                return best;
                            }
                        }
                    }
                }
            } else {
                let (near, far) = if sign[node.axis as usize] {
                    (node.first + 1, node.first)
                } else {
                    (node.first, node.first + 1)
                };
                // Push far first so near is popped (and traversed) first.
                stack[sp] = far;
                sp += 1;
                stack[sp] = near;
                sp += 1;
            }
        }
        best
    }

    /// Closest-point traversal: returns the nearest primitive within
    /// `max_dist`, using a point-to-AABB distance gate analogous to the ray
    /// traversal's slab test.
    pub fn overlap_point<H: Copy>(
        &self,
        p: Vec3,
        max_dist: f32,
        early_exit: bool,
        mut dist_fn: impl FnMut(u32, Vec3) -> Option<(f32, H)>,
    ) -> Option<(u32, f32, H)> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut best: Option<(u32, f32, H)> = None;
        let mut best_dist = max_dist;

        let mut stack = [0u32; STACK_DEPTH];
        let mut sp = 0usize;
        stack[sp] = 0;
        sp += 1;

        while sp > 0 {
            sp -= 1;
            let idx = stack[sp] as usize;
            let node = &self.nodes[idx];
            if node.aabb.distance_squared(p) > best_dist * best_dist {
                continue;
            }
            if node.is_leaf() {
                for i in 0..node.count {
                    let prim = self.sorted_prim[(node.first + i) as usize];
                    if let Some((d, h)) = dist_fn(prim, p) {
                        if d <= best_dist {
                            best_dist = d;
                            best = Some((prim, d, h));
                            if early_exit {
                                return best;
                            }
                        }
                    }
                }
            } else {
                stack[sp] = node.first;
                sp += 1;
                stack[sp] = node.first + 1;
                sp += 1;
            }
        }
        best
    }
}

fn build_recursive(
    node_idx: usize,
    start: usize,
    end: usize,
    aabbs: &[Aabb],
    centroids: &[Vec3],
    sorted_prim: &mut [u32],
    nodes: &mut Vec<BvhNode>,
    heuristic: SplitHeuristic,
) {
    let count = end - start;
    let mut bounds = Aabb::EMPTY;
    let mut centroid_bounds = Aabb::EMPTY;
    for &p in &sorted_prim[start..end] {
        bounds.grow(&aabbs[p as usize]);
        centroid_bounds.grow_point(centroids[p as usize]);
    }

    let make_leaf = count <= LEAF_MAX || centroid_bounds.extent().max_element() <= 0.0;
    if make_leaf {
        nodes[node_idx] = BvhNode {
            aabb: bounds,
            first: start as u32,
            count: count as u32,
            axis: 0,
        };
        return;
    }

    let axis = centroid_bounds.longest_axis();
    let mid = match heuristic {
        SplitHeuristic::Middle => {
            let midpoint = centroid_bounds.centroid()[axis];
            let split =
                partition_point(&mut sorted_prim[start..end], centroids, axis, midpoint);
            let mid = start + split;
            if mid == start || mid == end {
                start + count / 2
            } else {
                mid
            }
        }
        SplitHeuristic::Balanced => {
            let mid = start + count / 2;
            nth_element_by_key(&mut sorted_prim[start..end], mid - start, |&p| {
                centroids[p as usize][axis]
            });
            mid
        }
    };

    let left_idx = nodes.len();
    nodes.push(BvhNode {
        aabb: Aabb::EMPTY,
        first: 0,
        count: 0,
        axis: 0,
    });
    let right_idx = nodes.len();
    nodes.push(BvhNode {
        aabb: Aabb::EMPTY,
        first: 0,
        count: 0,
        axis: 0,
    });

    nodes[node_idx] = BvhNode {
        aabb: bounds,
        first: left_idx as u32,
        count: 0,
        axis: axis as u8,
    };

    build_recursive(left_idx, start, mid, aabbs, centroids, sorted_prim, nodes, heuristic);
    build_recursive(right_idx, mid, end, aabbs, centroids, sorted_prim, nodes, heuristic);
}

/// Partition `prims` in place by `centroid[axis] <= midpoint`; returns the
/// split offset relative to the slice start.
fn partition_point(prims: &mut [u32], centroids: &[Vec3], axis: usize, midpoint: f32) -> usize {
    let mut i = 0;
    let mut j = prims.len();
    while i < j {
        if centroids[prims[i] as usize][axis] <= midpoint {
            i += 1;
        } else {
            j -= 1;
            prims.swap(i, j);
        }
    }
    i
}

/// Minimal `nth_element`: partial selection sort via repeated partitioning
/// (quickselect), ordering `prims` so index `k` holds the element that would
/// be there in a full sort by `key`, with all smaller keys to its left.
fn nth_element_by_key(prims: &mut [u32], k: usize, key: impl Fn(&u32) -> f32) {
    if prims.len() <= 1 {
        return;
    }
    let mut lo = 0usize;
    let mut hi = prims.len();
    while hi - lo > 1 {
        let pivot = key(&prims[lo + (hi - lo) / 2]);
        let mut i = lo;
        let mut j = hi - 1;
        while i <= j {
            while key(&prims[i]) < pivot {
                i += 1;
            }
            while key(&prims[j]) > pivot {
                if j == 0 {
                    break;
                }
                j -= 1;
            }
            if i <= j {
                prims.swap(i, j);
                i += 1;
                if j == 0 {
                    break;
                }
                j -= 1;
            }
        }
        if k < i && k >= lo {
            hi = i;
        } else if k >= i {
            lo = i;
        } else {
            break;
        }
    }
}

/// Robust slab test (Ize 2013): the `1 + 2*ulp` multiplier on `tmax` makes
/// corner-aligned and near-infinite rays safe without branching on NaN.
#[inline]
fn slab_test(aabb: &Aabb, ray: &Ray, inv_dir: Vec3) -> bool {
    const ULP_FACTOR: f32 = 1.0 + 2.0 * f32::EPSILON;
    let mut tmin = ray.tmin;
    let mut tmax = ray.tmax;
    for axis in 0..3 {
        let t0 = (aabb.min[axis] - ray.o[axis]) * inv_dir[axis];
        let t1 = (aabb.max[axis] - ray.o[axis]) * inv_dir[axis];
        let (t_near, t_far) = if t0 < t1 { (t0, t1) } else { (t1, t0) };
        tmin = tmin.max(t_near);
        tmax = tmax.min(t_far * ULP_FACTOR);
        if tmin > tmax {
            return false;
        }
    }
    true
}

/// Barycentric/parametric hit data returned by the primitive intersectors
/// below. `uvw` holds `(w, u, v)` for triangles (so `w = 1-u-v`); for a quad,
/// `uvw.x` is unused and `(u,v)` has already been remapped to the continuous
/// `[0,1]^2` parametrization described in spec §4.3. For points/lines only
/// `uvw.y` (the line parameter) is meaningful.
#[derive(Debug, Clone, Copy, Default)]
pub struct Barycentric {
    pub uvw: Vec3,
}

/// Möller–Trumbore triangle intersection. Returns `None` on a degenerate
/// (zero-area) triangle rather than producing NaNs (spec §7).
pub fn intersect_triangle(ray: &Ray, v0: Vec3, v1: Vec3, v2: Vec3) -> Option<(f32, Barycentric)> {
    let e1 = v1 - v0;
    let e2 = v2 - v0;
    let pvec = ray.d.cross(e2);
    let det = e1.dot(pvec);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let tvec = ray.o - v0;
    let u = tvec.dot(pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let qvec = tvec.cross(e1);
    let v = ray.d.dot(qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(qvec) * inv_det;
    if t < ray.tmin || t > ray.tmax {
        return None;
    }
    Some((
        t,
        Barycentric {
            uvw: Vec3::new(1.0 - u - v, u, v),
        },
    ))
}

/// Quad intersection: split into `(v0,v1,v3)` and `(v2,v3,v1)`; the second
/// triangle's `(u,v)` is remapped to `(1-u, u+v-1, 1-v)`-style weights so the
/// combined parametrization covers `[0,1]^2` continuously (spec §4.3).
pub fn intersect_quad(
    ray: &Ray,
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
    v3: Vec3,
) -> Option<(f32, Vec2Param)> {
    if let Some((t, b)) = intersect_triangle(ray, v0, v1, v3) {
        let mut shrunk = *ray;
        shrunk.tmax = t;
        // Still check the other triangle in case it's closer (shouldn't
        // happen for a planar quad, but keeps behavior well-defined for
        // slightly non-planar quads).
        if let Some((t2, b2)) = intersect_triangle(&shrunk, v2, v3, v1) {
            return Some((t2, Vec2Param::from_second_tri(b2)));
        }
        return Some((t, Vec2Param::from_first_tri(b)));
    }
    let (t, b) = intersect_triangle(ray, v2, v3, v1)?;
    Some((t, Vec2Param::from_second_tri(b)))
}

/// Continuous `(u,v)` over a quad, reconstructed from whichever of the two
/// internal triangles was hit.
#[derive(Debug, Clone, Copy)]
pub struct Vec2Param {
    pub u: f32,
    pub v: f32,
}

impl Vec2Param {
    fn from_first_tri(b: Barycentric) -> Self {
        // Triangle (v0,v1,v3): barycentric (w,u,v) with u along v1, v along v3.
        Self { u: b.uvw.y, v: b.uvw.z }
    }
    fn from_second_tri(b: Barycentric) -> Self {
        // Triangle (v2,v3,v1): remap so the result covers the continuation
        // of the first triangle's parametrization.
        Self {
            u: 1.0 - b.uvw.y,
            v: 1.0 - b.uvw.z,
        }
    }
}

/// Point primitive: accept if the ray passes within `radius` of `center`.
pub fn intersect_point(ray: &Ray, center: Vec3, radius: f32) -> Option<(f32, f32)> {
    let oc = center - ray.o;
    let t = oc.dot(ray.d).max(0.0);
    if t < ray.tmin || t > ray.tmax {
        return None;
    }
    let closest = ray.at(t);
    let dist = (closest - center).length();
    if dist <= radius {
        Some((t, dist))
    } else {
        None
    }
}

/// Line (capsule) primitive: closest points between the ray and a 3D
/// segment `[p0,p1]` with per-endpoint radii `[r0,r1]` linearly interpolated
/// by the clamped segment parameter.
pub fn intersect_line(
    ray: &Ray,
    p0: Vec3,
    p1: Vec3,
    r0: f32,
    r1: f32,
) -> Option<(f32, f32 /* segment param u */)> {
    let d1 = ray.d;
    let d2 = p1 - p0;
    let r = ray.o - p0;
    let a = d1.dot(d1);
    let e = d2.dot(d2);
    let f = d2.dot(r);

    let (mut s, mut u);
    if a <= 1e-12 && e <= 1e-12 {
        s = 0.0;
        u = 0.0;
    } else if a <= 1e-12 {
        s = 0.0;
        u = (f / e).clamp(0.0, 1.0);
    } else {
        let c = d1.dot(r);
        if e <= 1e-12 {
            u = 0.0;
            s = (-c / a).max(0.0);
        } else {
            let b = d1.dot(d2);
            let denom = a * e - b * b;
            s = if denom.abs() > 1e-12 {
                ((b * f - c * e) / denom).max(0.0)
            } else {
                0.0
            };
            u = (b * s + f) / e;
            if u < 0.0 {
                u = 0.0;
                s = (-c / a).max(0.0);
            } else if u > 1.0 {
                u = 1.0;
                s = ((b - c) / a).max(0.0);
            }
        }
    }

    if s < ray.tmin || s > ray.tmax {
        return None;
    }
    let closest_ray = ray.at(s);
    let closest_seg = p0 + d2 * u;
    let dist = (closest_ray - closest_seg).length();
    let radius = r0 + (r1 - r0) * u;
    if dist <= radius {
        Some((s, u))
    } else {
        None
    }
}

/// Closest point on a segment `[p0,p1]` to `p`, with the segment parameter.
pub fn closest_point_on_segment(p: Vec3, p0: Vec3, p1: Vec3) -> (Vec3, f32) {
    let d = p1 - p0;
    let len2 = d.length_squared();
    if len2 <= 1e-12 {
        return (p0, 0.0);
    }
    let t = ((p - p0).dot(d) / len2).clamp(0.0, 1.0);
    (p0 + d * t, t)
}

/// Closest point on a triangle to `p`, via the standard Ericson-style
/// region test, returning the point and its barycentric weights `(w,u,v)`.
pub fn closest_point_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> (Vec3, Vec3) {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (a, Vec3::new(1.0, 0.0, 0.0));
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (b, Vec3::new(0.0, 1.0, 0.0));
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return (a + ab * v, Vec3::new(1.0 - v, v, 0.0));
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (c, Vec3::new(0.0, 0.0, 1.0));
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return (a + ac * w, Vec3::new(1.0 - w, 0.0, w));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (b + (c - b) * w, Vec3::new(0.0, 1.0 - w, w));
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    (a + ab * v + ac * w, Vec3::new(1.0 - v - w, v, w))
}

#[cfg(test)]
mod primitive_tests {
    use super::*;

    #[test]
    fn triangle_barycentrics_sum_to_one() {
        let ray = Ray::new(Vec3::new(0.25, 0.25, -5.0), Vec3::Z);
        let (_, b) = intersect_triangle(
            &ray,
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        )
        .unwrap();
        assert!((b.uvw.x + b.uvw.y + b.uvw.z - 1.0).abs() < 1e-5);
    }

    #[test]
    fn degenerate_triangle_misses_cleanly() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);
        let hit = intersect_triangle(
            &ray,
            Vec3::ZERO,
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
        );
        assert!(hit.is_none());
    }

    #[test]
    fn quad_corners_map_to_vertex_positions() {
        let v0 = Vec3::new(0.0, 0.0, 0.0);
        let v1 = Vec3::new(1.0, 0.0, 0.0);
        let v2 = Vec3::new(1.0, 1.0, 0.0);
        let v3 = Vec3::new(0.0, 1.0, 0.0);
        for &(u, v, expected) in &[
            (0.001f32, 0.001f32, v0),
            (0.999, 0.001, v1),
            (0.999, 0.999, v2),
            (0.001, 0.999, v3),
        ] {
            let origin = Vec3::new(u, v, -5.0);
            let ray = Ray::new(origin, Vec3::Z);
            let (t, p) = intersect_quad(&ray, v0, v1, v2, v3).unwrap();
            let hit_pos = ray.at(t);
            assert!(
                (hit_pos - expected).length() < 0.05,
                "u={u} v={v} got {hit_pos:?} want near {expected:?} (param {p:?})"
            );
        }
    }

    #[test]
    fn point_primitive_accepts_within_radius_only() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);
        assert!(intersect_point(&ray, Vec3::new(0.0, 0.3, 0.0), 0.5).is_some());
        assert!(intersect_point(&ray, Vec3::new(0.0, 0.6, 0.0), 0.5).is_none());
    }

    #[test]
    fn point_tangent_exactly_at_radius_is_accepted() {
        let ray = Ray::new(Vec3::new(0.0, 0.5, -5.0), Vec3::Z);
        assert!(intersect_point(&ray, Vec3::ZERO, 0.5).is_some());
        assert!(intersect_point(&ray, Vec3::ZERO, 0.5 - 1e-4).is_none());
    }

    #[test]
    fn line_segment_closest_point_clamped_to_endpoints() {
        let ray = Ray::new(Vec3::new(2.0, 0.0, -5.0), Vec3::Z);
        // Segment is short, well behind the ray's x range past p1.
        let hit = intersect_line(
            &ray,
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            0.2,
            0.2,
        );
        assert!(hit.is_none());
    }

    #[test]
    fn closest_point_on_triangle_matches_vertex_for_far_point() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(1.0, 0.0, 0.0);
        let c = Vec3::new(0.0, 1.0, 0.0);
        let (p, bary) = closest_point_on_triangle(Vec3::new(-5.0, -5.0, 0.0), a, b, c);
        assert!((p - a).length() < 1e-5);
        assert!((bary - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-5);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_aabb_at(x: f32) -> Aabb {
        Aabb {
            min: Vec3::new(x, -0.5, -0.5),
            max: Vec3::new(x + 1.0, 0.5, 0.5),
        }
    }

    #[test]
    fn build_covers_every_primitive_exactly_once() {
        let aabbs: Vec<Aabb> = (0..37).map(|i| unit_aabb_at(i as f32 * 2.0)).collect();
        for h in [SplitHeuristic::Middle, SplitHeuristic::Balanced] {
            let bvh = BvhTree::build(&aabbs, h).unwrap();
            let mut seen = vec![false; aabbs.len()];
            for &p in &bvh.sorted_prim {
                assert!(!seen[p as usize], "primitive {p} appeared twice");
                seen[p as usize] = true;
            }
            assert!(seen.iter().all(|&s| s), "every primitive must appear");
        }
    }

    #[test]
    fn internal_node_aabb_contains_children() {
        let aabbs: Vec<Aabb> = (0..50).map(|i| unit_aabb_at(i as f32 * 1.3)).collect();
        let bvh = BvhTree::build(&aabbs, SplitHeuristic::Balanced).unwrap();
        for node in &bvh.nodes {
            if !node.is_leaf() {
                let l = &bvh.nodes[node.first as usize];
                let r = &bvh.nodes[node.first as usize + 1];
                assert!(node.aabb.contains_aabb(&l.aabb));
                assert!(node.aabb.contains_aabb(&r.aabb));
            } else {
                for i in 0..node.count {
                    let p = bvh.sorted_prim[(node.first + i) as usize];
                    assert!(node.aabb.contains_aabb(&aabbs[p as usize]));
                }
            }
        }
    }

    #[test]
    fn refit_with_unchanged_bounds_leaves_nodes_unchanged() {
        let aabbs: Vec<Aabb> = (0..20).map(|i| unit_aabb_at(i as f32)).collect();
        let mut bvh = BvhTree::build(&aabbs, SplitHeuristic::Middle).unwrap();
        let before: Vec<_> = bvh.nodes.iter().map(|n| n.aabb).collect();
        bvh.refit(&aabbs).unwrap();
        let after: Vec<_> = bvh.nodes.iter().map(|n| n.aabb).collect();
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a.min - b.min).length() < 1e-5);
            assert!((a.max - b.max).length() < 1e-5);
        }
    }

    #[test]
    fn refit_after_translation_matches_fresh_build() {
        let aabbs: Vec<Aabb> = (0..20).map(|i| unit_aabb_at(i as f32)).collect();
        let shifted: Vec<Aabb> = aabbs
            .iter()
            .map(|b| Aabb {
                min: b.min + Vec3::new(1.0, 0.0, 0.0),
                max: b.max + Vec3::new(1.0, 0.0, 0.0),
            })
            .collect();

        let mut refit_bvh = BvhTree::build(&aabbs, SplitHeuristic::Middle).unwrap();
        refit_bvh.refit(&shifted).unwrap();

        // Topology must match a from-scratch build (same sorted_prim, same
        // structure) since refit never re-splits.
        let fresh_topology = BvhTree::build(&aabbs, SplitHeuristic::Middle).unwrap();
        assert_eq!(refit_bvh.sorted_prim, fresh_topology.sorted_prim);
    }

    #[test]
    fn ray_hits_nearest_of_overlapping_boxes() {
        let aabbs = vec![unit_aabb_at(0.0), unit_aabb_at(5.0), unit_aabb_at(10.0)];
        let bvh = BvhTree::build(&aabbs, SplitHeuristic::Balanced).unwrap();
        let ray = Ray::new(Vec3::new(-10.0, 0.0, 0.0), Vec3::X);
        let hit = bvh.intersect::<()>(&ray, false, |prim, r| {
            let b = &aabbs[prim as usize];
            // Ray enters box at b.min.x
            if r.d.x > 0.0 {
                let t = b.min.x - r.o.x;
                if t >= r.tmin && t <= r.tmax {
                    return Some((t, ()));
                }
            }
            None
        });
        assert_eq!(hit.unwrap().0, 0);
    }

    #[test]
    fn early_exit_returns_first_hit_regardless_of_tmax() {
        let aabbs = vec![unit_aabb_at(0.0), unit_aabb_at(5.0)];
        let bvh = BvhTree::build(&aabbs, SplitHeuristic::Balanced).unwrap();
        let ray = Ray::new(Vec3::new(-10.0, 0.0, 0.0), Vec3::X);
        let mut calls = 0;
        let hit = bvh.intersect::<()>(&ray, true, |prim, r| {
            calls += 1;
            let b = &aabbs[prim as usize];
            let t = b.min.x - r.o.x;
            if t >= r.tmin && t <= r.tmax {
                Some((t, ()))
            } else {
                None
            }
        });
        assert!(hit.is_some());
    }
}
