//! PCG32 random streams and the layered [`Sampler`] used by the integrator.
//!
//! The generator itself has no grounding in the teacher workspace (nothing in
//! the kept crates hand-rolls an RNG); it follows the classic O'Neill PCG32
//! construction as described in spec §4.1.

use glam::Vec2;
use serde::{Deserialize, Serialize};

const PCG32_MULT: u64 = 6364136223846793005;

/// A single PCG32 stream: 64-bit state, 64-bit odd increment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pcg32 {
    state: u64,
    inc: u64,
}

impl Default for Pcg32 {
    fn default() -> Self {
        Self {
            state: 0x853c49e6748fea9b,
            inc: 0xda3e39cb94b95bdb,
        }
    }
}

impl Pcg32 {
    pub fn new(seed_state: u64, seed_seq: u64) -> Self {
        let mut rng = Self { state: 0, inc: 0 };
        rng.seed(seed_state, seed_seq);
        rng
    }

    /// Knuth-style double-step seeding: set the stream, step once, fold in
    /// the seed, step again.
    pub fn seed(&mut self, state: u64, seq: u64) {
        self.state = 0;
        self.inc = (seq << 1) | 1;
        self.next_u32();
        self.state = self.state.wrapping_add(state);
        self.next_u32();
    }

    /// Standard PCG32 XSH-RR advance + permutation step.
    pub fn next_u32(&mut self) -> u32 {
        let old_state = self.state;
        self.state = old_state.wrapping_mul(PCG32_MULT).wrapping_add(self.inc);
        let xorshifted = (((old_state >> 18) ^ old_state) >> 27) as u32;
        let rot = (old_state >> 59) as u32;
        xorshifted.rotate_right(rot)
    }

    /// Logarithmic jump-ahead (or back, for negative deltas cast to `u64`)
    /// through the LCG underlying PCG32, after Brown 1994.
    pub fn advance(&mut self, delta: u64) {
        let mut cur_mult = PCG32_MULT;
        let mut cur_plus = self.inc;
        let mut acc_mult: u64 = 1;
        let mut acc_plus: u64 = 0;
        let mut d = delta;
        while d > 0 {
            if d & 1 == 1 {
                acc_mult = acc_mult.wrapping_mul(cur_mult);
                acc_plus = acc_plus.wrapping_mul(cur_mult).wrapping_add(cur_plus);
            }
            cur_plus = cur_mult.wrapping_add(1).wrapping_mul(cur_plus);
            cur_mult = cur_mult.wrapping_mul(cur_mult);
            d >>= 1;
        }
        self.state = acc_mult.wrapping_mul(self.state).wrapping_add(acc_plus);
    }

    /// Uniform float in `[0, 1)`. Sets the IEEE-754 exponent bits for `[1,2)`
    /// and subtracts 1, which avoids the bias a naive `/ u32::MAX` has.
    pub fn next_f32(&mut self) -> f32 {
        let bits = (self.next_u32() >> 9) | 0x3f80_0000;
        f32::from_bits(bits) - 1.0
    }

    /// Uniform integer in `[0, bound)` via rejection sampling (no modulo bias).
    pub fn bounded_u32(&mut self, bound: u32) -> u32 {
        if bound == 0 {
            return 0;
        }
        let threshold = bound.wrapping_neg() % bound;
        loop {
            let r = self.next_u32();
            if r >= threshold {
                return r % bound;
            }
        }
    }
}

/// Dispatch tag for the two sampling modes spec §4.1 describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RngKind {
    Uniform,
    Stratified,
}

/// Per-pixel sampler layered on top of a [`Pcg32`] stream.
///
/// Each pixel owns one `Sampler`, seeded deterministically from
/// `(seed, pixel_index)` so re-rendering sample `s` at a pixel reproduces the
/// same noise bitwise. In stratified mode the dimension counter `d`
/// increments on every `next1f`/`next2f` call; the stratum cell within a
/// `ceil(sqrt(spp)) x ceil(sqrt(spp))` grid is chosen by hash-permuting the
/// sample index keyed on `(pixel_hash, d)`, then jittered within the cell.
pub struct Sampler {
    rng: Pcg32,
    kind: RngKind,
    pixel_hash: u64,
    strata_side: u32,
    sample_index: u32,
    dim: u32,
}

impl Sampler {
    pub fn new(seed: u32, pixel_index: u64, kind: RngKind, spp: u32) -> Self {
        let state = splitmix64(pixel_index ^ ((seed as u64) << 32));
        let seq = (pixel_index << 1) | 1;
        let strata_side = (spp as f64).sqrt().ceil() as u32;
        Self {
            rng: Pcg32::new(state, seq),
            kind,
            pixel_hash: hash_combine(seed as u64, pixel_index),
            strata_side: strata_side.max(1),
            sample_index: 0,
            dim: 0,
        }
    }

    /// Must be called once before drawing the dimensions for sample `s`.
    pub fn start_sample(&mut self, sample_index: u32) {
        self.sample_index = sample_index;
        self.dim = 0;
    }

    fn stratum_jitter_1d(&mut self, d: u32) -> f32 {
        let n = self.strata_side * self.strata_side;
        let h = hash_combine(self.pixel_hash, hash_combine(d as u64, 0x9e3779b97f4a7c15));
        let stratum = permute(self.sample_index, n, h) as f32;
        let jitter = self.rng.next_f32();
        ((stratum + jitter) / n as f32).min(1.0 - f32::EPSILON)
    }

    fn stratum_jitter_2d(&mut self, d: u32) -> (f32, f32) {
        let side = self.strata_side;
        let n = side * side;
        let h = hash_combine(self.pixel_hash, hash_combine(d as u64, 0x9e3779b97f4a7c15));
        let stratum = permute(self.sample_index, n, h);
        let sx = stratum % side;
        let sy = stratum / side;
        let jx = self.rng.next_f32();
        let jy = self.rng.next_f32();
        (
            ((sx as f32 + jx) / side as f32).min(1.0 - f32::EPSILON),
            ((sy as f32 + jy) / side as f32).min(1.0 - f32::EPSILON),
        )
    }

    pub fn next1f(&mut self) -> f32 {
        let d = self.dim;
        self.dim += 1;
        match self.kind {
            RngKind::Uniform => self.rng.next_f32(),
            RngKind::Stratified => self.stratum_jitter_1d(d),
        }
    }

    pub fn next2f(&mut self) -> Vec2 {
        let d = self.dim;
        self.dim += 1;
        match self.kind {
            RngKind::Uniform => Vec2::new(self.rng.next_f32(), self.rng.next_f32()),
            RngKind::Stratified => {
                let (x, y) = self.stratum_jitter_2d(d);
                Vec2::new(x, y)
            }
        }
    }

    pub fn next1i(&mut self, n: u32) -> u32 {
        self.rng.bounded_u32(n)
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

fn hash_combine(a: u64, b: u64) -> u64 {
    splitmix64(a ^ splitmix64(b))
}

/// Bijective permutation of `[0, n)`, keyed by `seed` (Kensler 2013,
/// "Correlated Multi-Jittered Sampling"). A hash-mod would let multiple
/// sample indices collide on the same stratum while leaving others empty;
/// this cycle-walks a reversible bit scramble until the result lands back
/// inside `[0, n)`, so every stratum is visited exactly once per full sweep
/// of `i` over `[0, n)`, which is what stratification's variance-reduction
/// guarantee depends on.
fn permute(i: u32, n: u32, seed: u64) -> u32 {
    if n <= 1 {
        return 0;
    }
    let p = (seed ^ (seed >> 32)) as u32;
    let mut w = n - 1;
    w |= w >> 1;
    w |= w >> 2;
    w |= w >> 4;
    w |= w >> 8;
    w |= w >> 16;
    let mut x = i;
    loop {
        x ^= p;
        x = x.wrapping_mul(0xe170893d);
        x ^= p >> 16;
        x ^= (x & w) >> 4;
        x ^= p >> 8;
        x = x.wrapping_mul(0x0929eb3f);
        x ^= p >> 23;
        x ^= (x & w) >> 1;
        x = x.wrapping_mul(1 | (p >> 27));
        x = x.wrapping_mul(0x6935fa69);
        x ^= (x & w) >> 11;
        x = x.wrapping_mul(0x74dcb303);
        x ^= (x & w) >> 2;
        x = x.wrapping_mul(0x9e501cc3);
        x ^= (x & w) >> 2;
        x = x.wrapping_mul(0xc860a3df);
        x &= w;
        x ^= x >> 5;
        if x < n {
            break;
        }
    }
    (x.wrapping_add(p)) % n
}
