//! Colour spaces for the `CS cs SC SCN sc scn` operators and for images.
//!
//! Everything is reduced to DeviceGray, DeviceRGB or DeviceCMYK output.
//! ICC profiles are replaced by the device space with the same number of
//! components; Separation and DeviceN tints are approximated as gray.

use super::graphics_state::Color;
use crate::core::error::PDFResult;
use crate::core::parser::{Dict, PDFObject};
use crate::core::xref::XRef;
use std::sync::Arc;
use tracing::debug;

/// Nesting limit for base spaces (`Indexed`, `Pattern`).
const MAX_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum ColorSpace {
    DeviceGray,
    DeviceRGB,
    DeviceCMYK,
    /// CIE L*a*b* with its white point
    Lab { white_point: [f64; 3] },
    Indexed {
        base: Box<ColorSpace>,
        hival: u8,
        lookup: Arc<Vec<u8>>,
    },
    /// Separation (one component) or DeviceN; tints map to gray
    Tint { components: usize },
    /// Pattern fills are painted with the underlying colour when one is
    /// given, otherwise with a neutral gray.
    Pattern { base: Option<Box<ColorSpace>> },
}

impl ColorSpace {
    /// Maps a device space name or its inline image abbreviation.
    pub fn from_name(name: &str) -> Option<ColorSpace> {
        match name {
            "DeviceGray" | "G" | "CalGray" => Some(ColorSpace::DeviceGray),
            "DeviceRGB" | "RGB" | "CalRGB" => Some(ColorSpace::DeviceRGB),
            "DeviceCMYK" | "CMYK" => Some(ColorSpace::DeviceCMYK),
            "Pattern" => Some(ColorSpace::Pattern { base: None }),
            _ => None,
        }
    }

    /// Resolves a colour space operand or `/ColorSpace` entry. Names that
    /// are not device spaces are looked up in the resources' `/ColorSpace`
    /// dictionary.
    pub fn parse(obj: &PDFObject, resources: Option<&Dict>, xref: &mut XRef) -> PDFResult<ColorSpace> {
        Self::parse_nested(obj, resources, xref, 0)
    }

    fn parse_nested(obj: &PDFObject, resources: Option<&Dict>, xref: &mut XRef, depth: usize) -> PDFResult<ColorSpace> {
        if depth > MAX_DEPTH {
            debug!("colour space nesting too deep, using DeviceGray");
            return Ok(ColorSpace::DeviceGray);
        }
        let obj = xref.fetch_if_ref(obj)?;
        match &obj {
            PDFObject::Name(name) => {
                if let Some(space) = ColorSpace::from_name(name) {
                    return Ok(space);
                }
                let named = match resources.and_then(|r| r.get("ColorSpace")) {
                    Some(dict) => match xref.fetch_if_ref(dict)? {
                        PDFObject::Dictionary(dict) => dict.get(name.as_str()).cloned(),
                        _ => None,
                    },
                    None => None,
                };
                match named {
                    Some(PDFObject::Name(inner)) if inner == *name => Ok(ColorSpace::DeviceGray),
                    Some(inner) => Self::parse_nested(&inner, None, xref, depth + 1),
                    None => {
                        debug!(name = %name, "unknown colour space, using DeviceGray");
                        Ok(ColorSpace::DeviceGray)
                    }
                }
            }
            PDFObject::Array(items) => Self::parse_array(items, resources, xref, depth),
            other => {
                debug!(kind = other.type_name(), "colour space is not a name or array");
                Ok(ColorSpace::DeviceGray)
            }
        }
    }

    fn parse_array(items: &[PDFObject], resources: Option<&Dict>, xref: &mut XRef, depth: usize) -> PDFResult<ColorSpace> {
        let family = items.first().and_then(PDFObject::as_name).unwrap_or("");
        let space = match family {
            "ICCBased" => {
                let stream = match items.get(1) {
                    Some(obj) => xref.fetch_if_ref(obj)?,
                    None => PDFObject::Null,
                };
                let dict = stream.as_stream().map(|s| s.dict.clone()).unwrap_or_default();
                match dict.get("N").and_then(PDFObject::as_i64) {
                    Some(1) => ColorSpace::DeviceGray,
                    Some(3) => ColorSpace::DeviceRGB,
                    Some(4) => ColorSpace::DeviceCMYK,
                    _ => match dict.get("Alternate") {
                        Some(alt) => Self::parse_nested(alt, resources, xref, depth + 1)?,
                        None => ColorSpace::DeviceRGB,
                    },
                }
            }
            "Indexed" | "I" => {
                let base = match items.get(1) {
                    Some(base) => Self::parse_nested(base, resources, xref, depth + 1)?,
                    None => ColorSpace::DeviceRGB,
                };
                let hival = items
                    .get(2)
                    .and_then(PDFObject::as_i64)
                    .unwrap_or(0)
                    .clamp(0, 255) as u8;
                let lookup = match items.get(3) {
                    Some(obj) => match xref.fetch_if_ref(obj)? {
                        PDFObject::String(bytes) | PDFObject::HexString(bytes) => bytes,
                        stream @ PDFObject::Stream(_) => xref.decoded_stream(&stream)?.data.to_vec(),
                        _ => Vec::new(),
                    },
                    None => Vec::new(),
                };
                ColorSpace::Indexed {
                    base: Box::new(base),
                    hival,
                    lookup: Arc::new(lookup),
                }
            }
            "Separation" => ColorSpace::Tint { components: 1 },
            "DeviceN" => {
                let components = match items.get(1) {
                    Some(names) => xref.fetch_if_ref(names)?.as_array().map_or(1, |n| n.len().max(1)),
                    None => 1,
                };
                ColorSpace::Tint { components }
            }
            "Lab" => {
                let params = match items.get(1) {
                    Some(obj) => xref.fetch_if_ref(obj)?,
                    None => PDFObject::Null,
                };
                let white_point = params
                    .as_dict()
                    .and_then(|d| d.get("WhitePoint"))
                    .and_then(PDFObject::as_number_array)
                    .filter(|w| w.len() >= 3 && w[1] > 0.0)
                    .map_or([0.9642, 1.0, 0.8249], |w| [w[0], w[1], w[2]]);
                ColorSpace::Lab { white_point }
            }
            "Pattern" => {
                let base = match items.get(1) {
                    Some(base) => Some(Box::new(Self::parse_nested(base, resources, xref, depth + 1)?)),
                    None => None,
                };
                ColorSpace::Pattern { base }
            }
            other => ColorSpace::from_name(other).unwrap_or_else(|| {
                debug!(family = other, "unsupported colour space family, using DeviceGray");
                ColorSpace::DeviceGray
            }),
        };
        Ok(space)
    }

    /// Number of colour components an operand list carries.
    pub fn components(&self) -> usize {
        match self {
            ColorSpace::DeviceGray | ColorSpace::Indexed { .. } => 1,
            ColorSpace::DeviceRGB | ColorSpace::Lab { .. } => 3,
            ColorSpace::DeviceCMYK => 4,
            ColorSpace::Tint { components } => *components,
            ColorSpace::Pattern { base } => base.as_ref().map_or(0, |b| b.components()),
        }
    }

    /// Colour installed when the space is selected with `CS`/`cs`.
    pub fn initial_color(&self) -> Color {
        match self {
            ColorSpace::DeviceCMYK => Color::Cmyk(0.0, 0.0, 0.0, 1.0),
            ColorSpace::DeviceRGB => Color::Rgb(0.0, 0.0, 0.0),
            ColorSpace::Lab { .. } => Color::Gray(0.0),
            ColorSpace::Indexed { .. } => self.to_color(&[0.0]),
            // Separation and DeviceN start at full tint.
            ColorSpace::Tint { components } => self.to_color(&vec![1.0; *components]),
            _ => Color::black(),
        }
    }

    /// Converts operand components to a device colour. Missing components
    /// are taken as zero.
    pub fn to_color(&self, values: &[f64]) -> Color {
        let at = |i: usize| values.get(i).copied().unwrap_or(0.0);
        match self {
            ColorSpace::DeviceGray => Color::Gray(at(0)),
            ColorSpace::DeviceRGB => Color::Rgb(at(0), at(1), at(2)),
            ColorSpace::DeviceCMYK => Color::Cmyk(at(0), at(1), at(2), at(3)),
            ColorSpace::Lab { white_point } => lab_to_rgb(at(0), at(1), at(2), white_point),
            ColorSpace::Indexed { base, hival, lookup } => {
                let index = at(0).round().clamp(0.0, f64::from(*hival)) as usize;
                let n = base.components();
                let start = index * n;
                match lookup.get(start..start + n) {
                    Some(entry) => {
                        let comps: Vec<f64> = entry.iter().map(|b| f64::from(*b) / 255.0).collect();
                        base.to_color(&comps)
                    }
                    None => Color::black(),
                }
            }
            ColorSpace::Tint { components } => {
                let sum: f64 = (0..*components).map(at).sum();
                Color::Gray(1.0 - (sum / *components as f64).clamp(0.0, 1.0))
            }
            ColorSpace::Pattern { base } => match base {
                Some(base) if !values.is_empty() => base.to_color(values),
                _ => Color::Gray(0.5),
            },
        }
    }
}

/// L*a*b* to sRGB through XYZ, without chromatic adaptation.
fn lab_to_rgb(l: f64, a: f64, b: f64, white: &[f64; 3]) -> Color {
    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;
    let inverse = |t: f64| {
        if t > 6.0 / 29.0 {
            t * t * t
        } else {
            3.0 * (6.0 / 29.0) * (6.0 / 29.0) * (t - 4.0 / 29.0)
        }
    };
    let x = white[0] * inverse(fx);
    let y = white[1] * inverse(fy);
    let z = white[2] * inverse(fz);

    let linear = [
        3.2406 * x - 1.5372 * y - 0.4986 * z,
        -0.9689 * x + 1.8758 * y + 0.0415 * z,
        0.0557 * x - 0.2040 * y + 1.0570 * z,
    ];
    let gamma = |c: f64| {
        let c = c.clamp(0.0, 1.0);
        if c <= 0.003_130_8 {
            12.92 * c
        } else {
            1.055 * c.powf(1.0 / 2.4) - 0.055
        }
    };
    Color::Rgb(gamma(linear[0]), gamma(linear[1]), gamma(linear[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_names_and_abbreviations() {
        assert_eq!(ColorSpace::from_name("G"), Some(ColorSpace::DeviceGray));
        assert_eq!(ColorSpace::from_name("DeviceRGB"), Some(ColorSpace::DeviceRGB));
        assert_eq!(ColorSpace::from_name("CMYK"), Some(ColorSpace::DeviceCMYK));
        assert_eq!(ColorSpace::from_name("Spot"), None);
    }

    #[test]
    fn test_indexed_lookup() {
        let space = ColorSpace::Indexed {
            base: Box::new(ColorSpace::DeviceRGB),
            hival: 1,
            lookup: Arc::new(vec![255, 0, 0, 0, 0, 255]),
        };
        assert_eq!(space.components(), 1);
        assert_eq!(space.to_color(&[1.0]).to_rgb8(), [0, 0, 255]);
        // Out-of-range indices clamp to hival.
        assert_eq!(space.to_color(&[7.0]).to_rgb8(), [0, 0, 255]);
        assert_eq!(space.initial_color().to_rgb8(), [255, 0, 0]);
    }

    #[test]
    fn test_separation_tint_is_gray() {
        let space = ColorSpace::Tint { components: 1 };
        assert_eq!(space.to_color(&[1.0]), Color::Gray(0.0));
        assert_eq!(space.to_color(&[0.0]), Color::Gray(1.0));
        assert_eq!(space.initial_color(), Color::Gray(0.0));
    }

    #[test]
    fn test_lab_white() {
        let white = lab_to_rgb(100.0, 0.0, 0.0, &[0.9505, 1.0, 1.089]);
        assert_eq!(white.to_rgb8(), [255, 255, 255]);
    }

    #[test]
    fn test_cmyk_initial_color_is_black() {
        assert_eq!(ColorSpace::DeviceCMYK.initial_color().to_rgb8(), [0, 0, 0]);
    }
}
