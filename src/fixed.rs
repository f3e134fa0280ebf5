//! Fixed-point and color conversions shared by both front-ends.

use cgmath::prelude::*;
use cgmath::{Matrix4, Vector3, Vector4};
use num_traits::Float;

/// Converts a 10.5 texture coordinate to a normalized UV for a texture
/// `size` texels wide.
pub fn convert_f3d_uv(value: i16, size: f32) -> f32 {
    let size = if size > 0.0 { size } else { 1.0 };
    ((value as f32 / 32.0) + 0.5) / size
}

/// Decodes an F3DEX3 packed normal (constant L1 norm of 127) to its
/// signed integer components.
pub fn unpack_normal_s8(packed: u16) -> [i32; 3] {
    let xo = (packed >> 8) as i32;
    let yo = (packed & 0xFF) as i32;
    let (mut x, mut y) = (xo & 0x7F, yo & 0x7F);
    let mut z = x + y;
    let z_neg = (z & 0x80) != 0;
    let (x2, y2) = (x ^ 0x7F, y ^ 0x7F);
    z ^= 0x7F;
    if z_neg {
        x = x2;
        y = y2;
    }
    if (xo & 0x80) != 0 { x = -x; }
    if (yo & 0x80) != 0 { y = -y; }
    if (z & 0x80) != 0 { z -= 0x100; }
    [x, y, z]
}

pub fn unpack_normal(packed: u16) -> Vector3<f32> {
    let [x, y, z] = unpack_normal_s8(packed);
    normalize_or_zero(Vector3::new(x as f32, y as f32, z as f32))
}

/// Vertex color bytes reinterpreted as a signed normal.
pub fn signed_byte_normal(bytes: [u8; 3]) -> Vector3<f32> {
    let [x, y, z] = bytes.map(|v| v as i8 as f32);
    normalize_or_zero(Vector3::new(x, y, z))
}

/// Light direction component. Positive values are reinterpreted as a
/// signed byte.
pub fn bytes_to_normal(value: i64) -> f32 {
    if value > 0 {
        (value as u8 as i8) as f32 / 128.0
    } else {
        value as f32 / 128.0
    }
}

pub fn normalize_or_zero(v: Vector3<f32>) -> Vector3<f32> {
    let m = v.magnitude();
    if m > 0.0 { v / m } else { Vector3::zero() }
}

/// sRGB transfer function inverse.
pub fn srgb_to_linear<F: Float>(v: F) -> F {
    let threshold = F::from(0.04045).unwrap_or_else(F::zero);
    let scale = F::from(12.92).unwrap_or_else(F::one);
    let offset = F::from(0.055).unwrap_or_else(F::zero);
    let gamma = F::from(2.4).unwrap_or_else(F::one);
    if v <= threshold {
        v / scale
    } else {
        ((v + offset) / (F::one() + offset)).powf(gamma)
    }
}

/// Byte color to linear float RGB with raw alpha.
pub fn gamma_inverse_rgba(rgba: [i64; 4]) -> [f32; 4] {
    let c = |v: i64| srgb_to_linear(v as f32 / 255.0);
    [c(rgba[0]), c(rgba[1]), c(rgba[2]), rgba[3] as f32 / 255.0]
}

/// Unsigned 0.16 fraction.
pub fn float_from_u16(value: i64) -> f32 {
    value as f32 / 65536.0
}

/// Decodes an N64 `Mtx` (integer halves in words 0..8, fractions in 8..16).
///
/// The N64 layout is row-major with row vectors, so each N64 row becomes a
/// cgmath column.
pub fn decode_mtx(words: &[u32; 16]) -> Matrix4<f32> {
    let elem = |i: usize, s: u32| (((words[i] >> s) as i16) as f32) + (((words[i + 8] >> s) as u16) as f32) / 65536.0;
    let col = |r: usize| Vector4::new(elem(2 * r, 16), elem(2 * r, 0), elem(2 * r + 1, 16), elem(2 * r + 1, 0));
    Matrix4::from_cols(col(0), col(1), col(2), col(3))
}

/// Inverse-transpose used to carry normals through `m`. Singular matrices
/// fall back to `m` itself.
pub fn normal_matrix(m: &Matrix4<f32>) -> Matrix4<f32> {
    m.invert().map(|inv| inv.transpose()).unwrap_or(*m)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn uv_conversion() {
        assert!(approx(convert_f3d_uv(0, 32.0), 0.5 / 32.0));
        assert!(approx(convert_f3d_uv(32 * 31, 32.0), 31.5 / 32.0));
        assert!(approx(convert_f3d_uv(-32, 0.0), -0.5));
    }

    #[test]
    fn packed_normals_have_unit_l1_norm() {
        for packed in [0x0000u16, 0x7F00, 0x007F, 0x8080, 0x1234, 0xFFFF, 0x4000] {
            let [x, y, z] = unpack_normal_s8(packed);
            assert_eq!(x.abs() + y.abs() + z.abs(), 127, "packed {:04X}", packed);
        }
        let up = unpack_normal(0x0000);
        assert!(approx(up.z, 1.0));
    }

    #[test]
    fn light_direction_bytes() {
        assert!(approx(bytes_to_normal(0x49), 0x49 as f32 / 128.0));
        assert!(approx(bytes_to_normal(0xFF), -1.0 / 128.0));
        assert!(approx(bytes_to_normal(-64), -0.5));
    }

    #[test]
    fn srgb() {
        assert!(approx(srgb_to_linear(0.0f32), 0.0));
        assert!(approx(srgb_to_linear(1.0f32), 1.0));
        assert!((srgb_to_linear(0.5f64) - 0.214041).abs() < 1e-5);
    }

    #[test]
    fn matrix_decode() {
        // identity with a translation of (1.5, -2, 0)
        let mut words = [0u32; 16];
        words[0] = 0x0001_0000;
        words[2] = 0x0000_0001;
        words[5] = 0x0001_0000;
        words[6] = 0x0001_FFFE;
        words[7] = 0x0000_0001;
        words[14] = 0x8000_0000;
        let m = decode_mtx(&words);
        let p = m * Vector4::new(1.0, 1.0, 1.0, 1.0);
        assert!(approx(p.x, 2.5));
        assert!(approx(p.y, -1.0));
        assert!(approx(p.z, 1.0));
        assert!(approx(p.w, 1.0));
    }
}
