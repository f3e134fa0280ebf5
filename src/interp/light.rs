//! Light registers.

use crate::error::{F3dError, Result};
use crate::fixed::{bytes_to_normal, srgb_to_linear};
use crate::interp::material::Floats;

pub const MAX_LIGHTS: usize = 7;

/// Direction bytes of an unused light slot.
const UNUSED_DIRECTION: i64 = 0x49;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Light {
    pub color: Floats<3>,
    pub direction: Floats<3>,
}

impl Default for Light {
    fn default() -> Self {
        let d = bytes_to_normal(UNUSED_DIRECTION);
        Light { color: Floats([0.0; 3]), direction: Floats([d, d, d]) }
    }
}

/// Seven directional slots plus ambient, as declared by `gdSPDefLights*`.
#[derive(Debug, Clone, PartialEq)]
pub struct LightSet {
    pub name: String,
    pub ambient: Floats<3>,
    pub lights: [Light; MAX_LIGHTS],
    /// Directional lights the declaration actually defines.
    pub count: usize,
}

impl Default for LightSet {
    fn default() -> Self {
        LightSet { name: String::new(), ambient: Floats([0.0; 3]), lights: [Light::default(); MAX_LIGHTS], count: 0 }
    }
}

fn linear_color(rgb: &[i64]) -> Floats<3> {
    Floats([0, 1, 2].map(|i| srgb_to_linear(rgb[i] as f32 / 255.0)))
}

impl LightSet {
    /// Builds a set from `gdSPDefLights*` arguments: ambient RGB, then
    /// RGB and direction XYZ per light.
    pub fn from_values(name: &str, values: &[i64]) -> Result<LightSet> {
        if values.len() < 3 || (values.len() - 3) % 6 != 0 {
            return Err(F3dError::malformed(name, format!("{} light values", values.len())));
        }
        let count = (values.len() - 3) / 6;
        if count > MAX_LIGHTS {
            return Err(F3dError::malformed(name, format!("{} lights", count)));
        }

        let mut set = LightSet { name: name.to_string(), ambient: linear_color(&values[0..3]), count, ..Default::default() };
        for (i, chunk) in values[3..].chunks_exact(6).enumerate() {
            set.lights[i] = Light {
                color: linear_color(&chunk[0..3]),
                direction: Floats([bytes_to_normal(chunk[3]), bytes_to_normal(chunk[4]), bytes_to_normal(chunk[5])]),
            };
        }
        Ok(set)
    }

    /// A single `Light` struct in memory (color, copy, direction). The color
    /// doubles as ambient for when the slot is loaded as the ambient light.
    pub fn from_light_bytes(name: &str, bytes: &[u8; 16]) -> LightSet {
        let rgb = [bytes[0] as i64, bytes[1] as i64, bytes[2] as i64];
        let dir = [bytes[8] as i8 as i64, bytes[9] as i8 as i64, bytes[10] as i8 as i64];
        let light = Light {
            color: linear_color(&rgb),
            direction: Floats(dir.map(bytes_to_normal)),
        };
        let mut set = LightSet { name: name.to_string(), ambient: light.color, count: 1, ..Default::default() };
        set.lights[0] = light;
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_lights() {
        let values = [
            0x20, 0x20, 0x20,
            0xFF, 0xFF, 0xFF, 0x49, 0x49, 0x49,
            0x00, 0x00, 0x00, -64, 0, 0,
        ];
        let set = LightSet::from_values("lights", &values).unwrap();
        assert_eq!(set.count, 2);
        assert_eq!(set.lights[0].color, Floats([1.0, 1.0, 1.0]));
        assert_eq!(set.lights[1].direction.0[0], -0.5);
        assert_eq!(set.lights[6], Light::default());
    }

    #[test]
    fn bad_value_count() {
        assert!(LightSet::from_values("lights", &[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn light_struct_bytes() {
        let mut bytes = [0u8; 16];
        bytes[0] = 0xFF;
        bytes[8] = 0xC0;
        let set = LightSet::from_light_bytes("light_00000010", &bytes);
        assert_eq!(set.lights[0].color.0[0], 1.0);
        assert_eq!(set.lights[0].direction.0[0], -0.5);
        assert_eq!(set.ambient, set.lights[0].color);
    }
}
