//! Viewport in fractal space with string-backed center coordinates.
//!
//! At deep zoom the center carries more digits than f64 can hold, so the
//! authoritative representation is always the decimal string; the f64
//! projection is derived on demand for tier selection and screen math.

use crate::EngineError;
use serde::{Deserialize, Serialize};

/// A requested view: center (decimal strings), scale (complex units
/// spanning the short screen axis), output size and iteration budget.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub center_re: String,
    pub center_im: String,
    pub scale: f64,
    pub width: u32,
    pub height: u32,
    pub max_iter: u32,
}

impl Viewport {
    /// Validated constructor. High-precision coordinates arrive as
    /// decimal strings so no precision is lost at the boundary.
    pub fn new(
        center_re: &str,
        center_im: &str,
        scale: f64,
        max_iter: u32,
        width: u32,
        height: u32,
    ) -> Result<Self, EngineError> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(EngineError::config(format!("scale must be > 0, got {scale}")));
        }
        if max_iter < 64 {
            return Err(EngineError::config(format!(
                "max_iter must be at least 64, got {max_iter}"
            )));
        }
        if width == 0 || height == 0 {
            return Err(EngineError::config(format!(
                "viewport must be non-empty, got {width}x{height}"
            )));
        }
        for (name, s) in [("center_re", center_re), ("center_im", center_im)] {
            let v: f64 = s
                .trim()
                .parse()
                .map_err(|_| EngineError::config(format!("{name} `{s}` is not a number")))?;
            if !v.is_finite() || v.abs() >= 8.0 {
                return Err(EngineError::config(format!(
                    "{name} `{s}` outside the Mandelbrot range"
                )));
            }
        }
        Ok(Self {
            center_re: center_re.trim().to_string(),
            center_im: center_im.trim().to_string(),
            scale,
            width,
            height,
            max_iter,
        })
    }

    /// f64 projection of the center. Lossy past ~16 digits; use the
    /// strings wherever the loss matters.
    pub fn center_f64(&self) -> (f64, f64) {
        (
            self.center_re.parse().unwrap_or(0.0),
            self.center_im.parse().unwrap_or(0.0),
        )
    }

    /// Complex units per screen pixel.
    pub fn pixel_scale(&self) -> f64 {
        self.scale / self.width.min(self.height) as f64
    }

    pub fn complex_width(&self) -> f64 {
        self.width as f64 * self.pixel_scale()
    }

    pub fn complex_height(&self) -> f64 {
        self.height as f64 * self.pixel_scale()
    }

    /// Complex coordinate of a (possibly fractional) screen pixel.
    /// Screen y grows downward, imaginary axis grows upward.
    pub fn pixel_to_complex(&self, px: f64, py: f64) -> (f64, f64) {
        let (cx, cy) = self.center_f64();
        let cpp = self.pixel_scale();
        (
            cx + (px - self.width as f64 / 2.0) * cpp,
            cy - (py - self.height as f64 / 2.0) * cpp,
        )
    }

    /// Screen pixel of a complex coordinate (inverse of
    /// [`Self::pixel_to_complex`]; may land outside the viewport).
    pub fn complex_to_pixel(&self, re: f64, im: f64) -> (f64, f64) {
        let (cx, cy) = self.center_f64();
        let cpp = self.pixel_scale();
        (
            (re - cx) / cpp + self.width as f64 / 2.0,
            (cy - im) / cpp + self.height as f64 / 2.0,
        )
    }
}
