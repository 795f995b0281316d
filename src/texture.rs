//! Texture sampling (spec §6 `eval_texture`): bilinear/nearest, wrap-or-clamp
//! per axis, optional sRGB decode. Pure and stateless so it is trivially
//! `Send + Sync` across tile tasks.
//!
//! Grounded on the CPU-side sampling role `astraweave-render/src/texture.rs`
//! plays for the GPU renderer (bilinear fetch + wrap modes), reimplemented
//! here without any `wgpu` dependency since this crate never touches the GPU.

use crate::geometry::{Texture, TextureRef, WrapMode};
use glam::{Vec2, Vec4};

#[inline]
fn wrap_coord(x: f32, mode: WrapMode) -> f32 {
    match mode {
        WrapMode::Repeat => x - x.floor(),
        WrapMode::Clamp => x.clamp(0.0, 1.0 - f32::EPSILON),
    }
}

#[inline]
fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

#[inline]
fn wrap_index(x: i64, n: u32, mode: WrapMode) -> usize {
    match mode {
        WrapMode::Repeat => x.rem_euclid(n as i64) as usize,
        WrapMode::Clamp => x.clamp(0, n as i64 - 1) as usize,
    }
}

fn fetch_texel(tex: &Texture, x: i64, y: i64, as_linear: bool, wrap_s: WrapMode, wrap_t: WrapMode) -> Vec4 {
    let (w, h) = tex.dimensions();
    let xi = wrap_index(x, w, wrap_s);
    let yi = wrap_index(y, h, wrap_t);
    let idx = yi * w as usize + xi;
    match tex {
        Texture::Ldr { pixels, .. } => {
            let p = pixels[idx];
            let mut c = Vec4::new(
                p[0] as f32 / 255.0,
                p[1] as f32 / 255.0,
                p[2] as f32 / 255.0,
                p[3] as f32 / 255.0,
            );
            if as_linear {
                c.x = srgb_to_linear(c.x);
                c.y = srgb_to_linear(c.y);
                c.z = srgb_to_linear(c.z);
            }
            c
        }
        Texture::Hdr { pixels, .. } => {
            let p = pixels[idx];
            Vec4::new(p[0], p[1], p[2], p[3])
        }
    }
}

/// Sample `texture` at `uv`, returning `default` if `info` is `None`.
/// `as_linear` requests sRGB decode for LDR textures (ignored for HDR, which
/// is always stored linear).
pub fn eval_texture(
    textures: &[Texture],
    info: Option<&TextureRef>,
    uv: Vec2,
    as_linear: bool,
    default: Vec4,
) -> Vec4 {
    let Some(tref) = info else {
        return default;
    };
    let tex = &textures[tref.texture.0 as usize];
    let (w, h) = tex.dimensions();
    let u = wrap_coord(uv.x * tref.scale, tref.wrap_s);
    let v = wrap_coord(uv.y * tref.scale, tref.wrap_t);

    if !tref.linear {
        // Nearest-neighbor.
        let x = (u * w as f32) as i64;
        let y = (v * h as f32) as i64;
        return fetch_texel(tex, x, y, as_linear, tref.wrap_s, tref.wrap_t);
    }

    // Bilinear.
    let fx = u * w as f32 - 0.5;
    let fy = v * h as f32 - 0.5;
    let x0 = fx.floor();
    let y0 = fy.floor();
    let tx = fx - x0;
    let ty = fy - y0;
    let x0 = x0 as i64;
    let y0 = y0 as i64;

    let c00 = fetch_texel(tex, x0, y0, as_linear, tref.wrap_s, tref.wrap_t);
    let c10 = fetch_texel(tex, x0 + 1, y0, as_linear, tref.wrap_s, tref.wrap_t);
    let c01 = fetch_texel(tex, x0, y0 + 1, as_linear, tref.wrap_s, tref.wrap_t);
    let c11 = fetch_texel(tex, x0 + 1, y0 + 1, as_linear, tref.wrap_s, tref.wrap_t);

    let c0 = c00.lerp(c10, tx);
    let c1 = c01.lerp(c11, tx);
    c0.lerp(c1, ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::TextureId;

    #[test]
    fn missing_texture_returns_default() {
        let textures: Vec<Texture> = vec![];
        let d = Vec4::new(0.1, 0.2, 0.3, 1.0);
        assert_eq!(eval_texture(&textures, None, Vec2::ZERO, true, d), d);
    }

    #[test]
    fn flat_texture_returns_constant_color() {
        let textures = vec![Texture::Hdr {
            width: 2,
            height: 2,
            pixels: vec![[0.5, 0.5, 0.5, 1.0]; 4],
        }];
        let tref = TextureRef::new(TextureId(0));
        let c = eval_texture(&textures, Some(&tref), Vec2::new(0.3, 0.7), true, Vec4::ZERO);
        assert!((c.x - 0.5).abs() < 1e-5);
        assert!((c.w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn clamp_mode_does_not_bleed_opposite_edge_under_bilinear_filtering() {
        use crate::geometry::WrapMode;

        let textures = vec![Texture::Hdr {
            width: 2,
            height: 1,
            pixels: vec![[1.0, 0.0, 0.0, 1.0], [0.0, 0.0, 0.0, 1.0]],
        }];
        let mut tref = TextureRef::new(TextureId(0));
        tref.linear = true;
        tref.wrap_s = WrapMode::Clamp;
        tref.wrap_t = WrapMode::Clamp;

        // Right at the texture's right edge: the bilinear tap at x0+1 must
        // clamp to the last column, not wrap around and pick up column 0.
        let c = eval_texture(&textures, Some(&tref), Vec2::new(0.999, 0.5), true, Vec4::ZERO);
        assert!((c.x - 0.0).abs() < 1e-5, "clamp sample bled in the opposite edge: {c:?}");
    }

    #[test]
    fn repeat_wraps_coordinates() {
        let textures = vec![Texture::Hdr {
            width: 1,
            height: 1,
            pixels: vec![[1.0, 0.0, 0.0, 1.0]],
        }];
        let tref = TextureRef::new(TextureId(0));
        let c = eval_texture(&textures, Some(&tref), Vec2::new(1.5, -0.5), true, Vec4::ZERO);
        assert!((c.x - 1.0).abs() < 1e-5);
    }
}
