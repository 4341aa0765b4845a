//! Image XObjects and inline images.
//!
//! Samples come either from the filter chain (raw, 1 to 16 bits per
//! component) or from the JPEG decoder, and leave here as RGBA ready for
//! the device. Soft masks, stencil masks and colour-key masks become the
//! alpha channel.

use super::color_space::ColorSpace;
use super::device::ImageData;
use super::graphics_state::Color;
use crate::core::decode::{DecodedStream, Filter};
use crate::core::error::{PDFError, PDFResult};
use crate::core::parser::{Dict, PDFObject, PdfStream};
use crate::core::xref::XRef;
use tracing::debug;

/// Largest accepted image, in pixels.
const MAX_PIXELS: usize = 1 << 26;

/// Reads `key` or its inline image abbreviation.
fn entry<'a>(dict: &'a Dict, key: &str, abbreviation: &str) -> Option<&'a PDFObject> {
    dict.get(key).or_else(|| dict.get(abbreviation))
}

/// Image parameters from the image dictionary.
#[derive(Debug, Clone, PartialEq)]
struct ImageHeader {
    width: usize,
    height: usize,
    bits_per_component: u8,
    is_mask: bool,
    decode: Option<Vec<f64>>,
}

impl ImageHeader {
    fn read(dict: &Dict) -> PDFResult<ImageHeader> {
        let dimension = |key, abbreviation| {
            entry(dict, key, abbreviation)
                .and_then(PDFObject::as_i64)
                .filter(|v| *v > 0)
                .map(|v| v as usize)
                .ok_or_else(|| PDFError::malformed(format!("image has no valid /{}", key), None))
        };
        let width = dimension("Width", "W")?;
        let height = dimension("Height", "H")?;
        if width.checked_mul(height).is_none_or(|pixels| pixels > MAX_PIXELS) {
            return Err(PDFError::unsupported(format!("image of {}x{} pixels", width, height)));
        }
        let is_mask = entry(dict, "ImageMask", "IM").and_then(PDFObject::as_bool).unwrap_or(false);
        let bits_per_component = if is_mask {
            1
        } else {
            entry(dict, "BitsPerComponent", "BPC")
                .and_then(PDFObject::as_i64)
                .unwrap_or(8) as u8
        };
        if !matches!(bits_per_component, 1 | 2 | 4 | 8 | 16) {
            return Err(PDFError::malformed(
                format!("invalid image bits per component {}", bits_per_component),
                None,
            ));
        }
        let decode = entry(dict, "Decode", "D").and_then(PDFObject::as_number_array);
        Ok(ImageHeader {
            width,
            height,
            bits_per_component,
            is_mask,
            decode,
        })
    }

    fn max_sample(&self) -> f64 {
        f64::from((1u32 << self.bits_per_component) - 1)
    }
}

/// Reads packed samples row by row; rows start on byte boundaries.
struct Samples<'a> {
    data: &'a [u8],
    bits: u8,
    per_row: usize,
    row_bytes: usize,
}

impl<'a> Samples<'a> {
    fn new(data: &'a [u8], bits: u8, per_row: usize) -> Self {
        Samples {
            data,
            bits,
            per_row,
            row_bytes: (per_row * bits as usize).div_ceil(8),
        }
    }

    /// Sample `index` of `row`; reads past the end of short data give 0.
    fn get(&self, row: usize, index: usize) -> u16 {
        let base = row * self.row_bytes;
        let byte = |i: usize| self.data.get(base + i).copied().unwrap_or(0);
        match self.bits {
            8 => u16::from(byte(index)),
            16 => u16::from_be_bytes([byte(index * 2), byte(index * 2 + 1)]),
            bits => {
                let bit = index * bits as usize;
                let shift = 8 - bits as usize - bit % 8;
                u16::from((byte(bit / 8) >> shift) & ((1u8 << bits) - 1))
            }
        }
    }

    fn is_short(&self, rows: usize) -> bool {
        self.per_row > 0 && self.data.len() < rows * self.row_bytes
    }
}

/// Decodes an image XObject or inline image into RGBA. Stencil masks are
/// painted with `fill`.
pub fn decode_image(
    stream: &PdfStream,
    decoded: &DecodedStream,
    resources: Option<&Dict>,
    xref: &mut XRef,
    fill: Color,
) -> PDFResult<ImageData> {
    let dict = &stream.dict;
    if let Some(filter) = &decoded.skipped {
        return Err(PDFError::unsupported(format!("image filter {}", filter)));
    }
    let header = ImageHeader::read(dict)?;

    let mut rgba = if header.is_mask {
        stencil_to_rgba(&header, &decoded.data, fill)
    } else {
        let space = match entry(dict, "ColorSpace", "CS") {
            Some(obj) => ColorSpace::parse(obj, resources, xref)?,
            None if decoded.image_codec == Some(Filter::Dct) => ColorSpace::DeviceRGB,
            None => ColorSpace::DeviceGray,
        };
        match decoded.image_codec {
            Some(Filter::Dct) => jpeg_to_rgba(&header, &decoded.data, &space)?,
            _ => samples_to_rgba(&header, &decoded.data, &space),
        }
    };

    if !header.is_mask {
        apply_masks(dict, &header, &decoded.data, &mut rgba, xref)?;
    }

    ImageData::new(header.width as u32, header.height as u32, rgba)
        .ok_or_else(|| PDFError::Rendering("image buffer size mismatch".to_string()))
}

fn stencil_to_rgba(header: &ImageHeader, data: &[u8], fill: Color) -> Vec<u8> {
    let [r, g, b] = fill.to_rgb8();
    // Decode [1 0] swaps which sample value paints.
    let paint_value = match header.decode.as_deref() {
        Some([d0, ..]) if *d0 >= 0.5 => 1,
        _ => 0,
    };
    let samples = Samples::new(data, 1, header.width);
    let mut out = Vec::with_capacity(header.width * header.height * 4);
    for row in 0..header.height {
        for x in 0..header.width {
            let alpha = if samples.get(row, x) == paint_value { 255 } else { 0 };
            out.extend_from_slice(&[r, g, b, alpha]);
        }
    }
    out
}

fn samples_to_rgba(header: &ImageHeader, data: &[u8], space: &ColorSpace) -> Vec<u8> {
    let n = space.components().max(1);
    let samples = Samples::new(data, header.bits_per_component, header.width * n);
    if samples.is_short(header.height) {
        debug!(
            expected = header.height * samples.row_bytes,
            actual = data.len(),
            "image data is short, padding with zeros"
        );
    }

    let max = header.max_sample();
    let indexed = matches!(space, ColorSpace::Indexed { .. });
    let ranges: Vec<(f64, f64)> = (0..n)
        .map(|i| match header.decode.as_deref() {
            Some(d) if d.len() >= 2 * (i + 1) => (d[2 * i], d[2 * i + 1]),
            _ if indexed => (0.0, max),
            _ => (0.0, 1.0),
        })
        .collect();

    let mut out = Vec::with_capacity(header.width * header.height * 4);
    let mut components = vec![0.0; n];
    for row in 0..header.height {
        for x in 0..header.width {
            for (i, component) in components.iter_mut().enumerate() {
                let sample = f64::from(samples.get(row, x * n + i));
                let (lo, hi) = ranges[i];
                *component = lo + sample * (hi - lo) / max;
            }
            let [r, g, b] = space.to_color(&components).to_rgb8();
            out.extend_from_slice(&[r, g, b, 255]);
        }
    }
    out
}

#[cfg(feature = "jpeg-decoding")]
fn jpeg_to_rgba(header: &ImageHeader, data: &[u8], space: &ColorSpace) -> PDFResult<Vec<u8>> {
    use std::io::Cursor;
    use zune_jpeg::zune_core::options::DecoderOptions;

    let options = DecoderOptions::default()
        .set_max_width(u16::MAX as usize)
        .set_max_height(u16::MAX as usize);
    let mut decoder = zune_jpeg::JpegDecoder::new_with_options(Cursor::new(data), options);
    decoder
        .decode_headers()
        .map_err(|e| PDFError::Rendering(format!("JPEG header decode error: {:?}", e)))?;
    let info = decoder
        .info()
        .ok_or_else(|| PDFError::Rendering("JPEG has no frame header".to_string()))?;
    let (width, height) = (info.width as usize, info.height as usize);
    let pixels = decoder
        .decode()
        .map_err(|e| PDFError::Rendering(format!("JPEG decode error: {:?}", e)))?;

    if width == 0 || height == 0 {
        return Err(PDFError::Rendering("JPEG has no pixels".to_string()));
    }
    let channels = pixels.len() / (width * height);
    let inverted = matches!(header.decode.as_deref(), Some([d0, ..]) if *d0 >= 0.5);

    // The dictionary size wins; the decoded frame is sampled to fit it.
    let mut out = Vec::with_capacity(header.width * header.height * 4);
    for row in 0..header.height {
        let sy = row * height / header.height;
        for x in 0..header.width {
            let sx = x * width / header.width;
            let at = (sy * width + sx) * channels;
            let px = |i: usize| {
                let v = pixels.get(at + i).copied().unwrap_or(0);
                if inverted { 255 - v } else { v }
            };
            let color = match (channels, space) {
                (1, _) => [px(0); 3],
                (4, ColorSpace::DeviceCMYK) => Color::Cmyk(
                    f64::from(px(0)) / 255.0,
                    f64::from(px(1)) / 255.0,
                    f64::from(px(2)) / 255.0,
                    f64::from(px(3)) / 255.0,
                )
                .to_rgb8(),
                _ => [px(0), px(1), px(2)],
            };
            out.extend_from_slice(&[color[0], color[1], color[2], 255]);
        }
    }
    Ok(out)
}

#[cfg(not(feature = "jpeg-decoding"))]
fn jpeg_to_rgba(_header: &ImageHeader, _data: &[u8], _space: &ColorSpace) -> PDFResult<Vec<u8>> {
    Err(PDFError::unsupported("JPEG decoding not enabled (feature jpeg-decoding)"))
}

/// Applies `/SMask` or `/Mask` to the alpha channel.
fn apply_masks(
    dict: &Dict,
    header: &ImageHeader,
    data: &[u8],
    rgba: &mut [u8],
    xref: &mut XRef,
) -> PDFResult<()> {
    if let Some(smask) = dict.get("SMask") {
        let smask = xref.fetch_if_ref(smask)?;
        if let Some(stream) = smask.as_stream() {
            let decoded = xref.decode_stream(stream)?;
            let mask_header = ImageHeader::read(&stream.dict)?;
            let alpha = match decoded.image_codec {
                Some(Filter::Dct) => jpeg_to_rgba(&mask_header, &decoded.data, &ColorSpace::DeviceGray)?,
                _ => samples_to_rgba(&mask_header, &decoded.data, &ColorSpace::DeviceGray),
            };
            copy_alpha(header, &mask_header, &alpha, rgba, |px| px[0]);
            return Ok(());
        }
    }

    match dict.get("Mask").map(|m| xref.fetch_if_ref(m)).transpose()? {
        Some(PDFObject::Stream(stream)) => {
            let decoded = xref.decode_stream(&stream)?;
            let mask_header = ImageHeader::read(&stream.dict)?;
            // Sample 0 is painted, as for a stencil mask.
            let stencil = stencil_to_rgba(&mask_header, &decoded.data, Color::black());
            copy_alpha(header, &mask_header, &stencil, rgba, |px| px[3]);
        }
        Some(PDFObject::Array(ranges)) => {
            let ranges: Vec<f64> = ranges.iter().filter_map(PDFObject::as_number).collect();
            apply_color_key(header, data, &ranges, rgba);
        }
        _ => {}
    }
    Ok(())
}

/// Copies one channel of a mask image into the image alpha, scaling the
/// mask with nearest-neighbour sampling when the sizes differ.
fn copy_alpha(
    header: &ImageHeader,
    mask_header: &ImageHeader,
    mask: &[u8],
    rgba: &mut [u8],
    channel: impl Fn(&[u8]) -> u8,
) {
    for row in 0..header.height {
        let my = row * mask_header.height / header.height;
        for x in 0..header.width {
            let mx = x * mask_header.width / header.width;
            let src = (my * mask_header.width + mx) * 4;
            if let Some(px) = mask.get(src..src + 4) {
                rgba[(row * header.width + x) * 4 + 3] = channel(px);
            }
        }
    }
}

/// Colour-key masking: pixels whose raw samples all fall in the ranges
/// become transparent.
fn apply_color_key(header: &ImageHeader, data: &[u8], ranges: &[f64], rgba: &mut [u8]) {
    let n = ranges.len() / 2;
    if n == 0 {
        return;
    }
    let samples = Samples::new(data, header.bits_per_component, header.width * n);
    for row in 0..header.height {
        for x in 0..header.width {
            let masked = (0..n).all(|i| {
                let v = f64::from(samples.get(row, x * n + i));
                v >= ranges[2 * i] && v <= ranges[2 * i + 1]
            });
            if masked {
                rgba[(row * header.width + x) * 4 + 3] = 0;
            }
        }
    }
}
