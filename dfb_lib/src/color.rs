use nalgebra::{vector, Vector4};

/// Premultiplied color, alpha in `w`
pub type RGBA = Vector4<f32>;

pub fn new(r: f32, g: f32, b: f32, a: f32) -> RGBA {
    vector![r, g, b, a]
}

pub fn zero() -> RGBA {
    vector![0.0, 0.0, 0.0, 0.0]
}

/// Premultiply a straight color by `alpha`
pub fn premultiplied(r: f32, g: f32, b: f32, alpha: f32) -> RGBA {
    vector![r * alpha, g * alpha, b * alpha, alpha]
}
