//! Pixel reconstruction filters used by the non-box render path (spec §4.7
//! "Filtered variant"). Each filter is a separable 1D kernel evaluated once
//! per axis and multiplied together.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterType {
    Box,
    Triangle,
    Cubic,
    CatmullRom,
    Mitchell,
}

impl FilterType {
    /// Filter footprint radius in pixels; `0` means box (no neighbor writes,
    /// no locking needed).
    pub fn radius(self) -> i32 {
        match self {
            FilterType::Box => 0,
            FilterType::Triangle => 1,
            FilterType::Cubic | FilterType::CatmullRom | FilterType::Mitchell => 2,
        }
    }

    pub fn eval(self, x: f32) -> f32 {
        match self {
            FilterType::Box => {
                if x.abs() <= 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
            FilterType::Triangle => (1.0 - x.abs()).max(0.0),
            FilterType::Cubic => mitchell_netravali(x, 1.0, 0.0),
            FilterType::CatmullRom => mitchell_netravali(x, 0.0, 0.5),
            FilterType::Mitchell => mitchell_netravali(x, 1.0 / 3.0, 1.0 / 3.0),
        }
    }
}

/// Mitchell-Netravali cubic filter family, parameterized by `(B, C)`.
fn mitchell_netravali(x: f32, b: f32, c: f32) -> f32 {
    let ax = x.abs();
    if ax < 1.0 {
        ((12.0 - 9.0 * b - 6.0 * c) * ax.powi(3)
            + (-18.0 + 12.0 * b + 6.0 * c) * ax.powi(2)
            + (6.0 - 2.0 * b))
            / 6.0
    } else if ax < 2.0 {
        ((-b - 6.0 * c) * ax.powi(3)
            + (6.0 * b + 30.0 * c) * ax.powi(2)
            + (-12.0 * b - 48.0 * c) * ax
            + (8.0 * b + 24.0 * c))
            / 6.0
    } else {
        0.0
    }
}
