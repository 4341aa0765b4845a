//! Stream filters.
//!
//! A stream's `/Filter` entry names one filter or an array of filters,
//! applied in array order when decoding. Each filter may carry a
//! `/DecodeParms` dictionary (predictors, LZW early change).
//!
//! Filters the engine cannot decode do not fail the stream: the result is
//! marked as skipped and its data is empty. Image codecs (DCT) stop the
//! chain and hand the encoded bytes to the image decoder.

use super::error::{PDFError, PDFResult};
use super::parser::{Dict, PDFObject};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use std::io::Read;
use std::sync::Arc;

/// A single stream filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Flate,
    Lzw,
    AsciiHex,
    Ascii85,
    RunLength,
    /// JPEG baseline/progressive, decoded by the image module
    Dct,
    /// `/Crypt` with the identity crypt filter
    IdentityCrypt,
    Unsupported(String),
}

impl Filter {
    /// Maps a filter name, including the inline image abbreviations.
    pub fn from_name(name: &str) -> Self {
        match name {
            "FlateDecode" | "Fl" => Filter::Flate,
            "LZWDecode" | "LZW" => Filter::Lzw,
            "ASCIIHexDecode" | "AHx" => Filter::AsciiHex,
            "ASCII85Decode" | "A85" => Filter::Ascii85,
            "RunLengthDecode" | "RL" => Filter::RunLength,
            "DCTDecode" | "DCT" => Filter::Dct,
            other => Filter::Unsupported(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Filter::Flate => "FlateDecode",
            Filter::Lzw => "LZWDecode",
            Filter::AsciiHex => "ASCIIHexDecode",
            Filter::Ascii85 => "ASCII85Decode",
            Filter::RunLength => "RunLengthDecode",
            Filter::Dct => "DCTDecode",
            Filter::IdentityCrypt => "Crypt",
            Filter::Unsupported(name) => name,
        }
    }
}

/// `/DecodeParms` values the decoders use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeParams {
    pub predictor: u32,
    pub colors: usize,
    pub bits_per_component: usize,
    pub columns: usize,
    pub early_change: bool,
}

impl Default for DecodeParams {
    fn default() -> Self {
        DecodeParams {
            predictor: 1,
            colors: 1,
            bits_per_component: 8,
            columns: 1,
            early_change: true,
        }
    }
}

impl DecodeParams {
    /// Reads parameters from a (resolved) `/DecodeParms` dictionary.
    pub fn from_dict(dict: Option<&Dict>) -> Self {
        let mut params = DecodeParams::default();
        let Some(dict) = dict else {
            return params;
        };
        let get = |key: &str| dict.get(key).and_then(PDFObject::as_usize);

        if let Some(predictor) = get("Predictor") {
            params.predictor = predictor as u32;
        }
        if let Some(colors) = get("Colors") {
            params.colors = colors.clamp(1, 32);
        }
        if let Some(bpc) = get("BitsPerComponent") {
            params.bits_per_component = bpc.clamp(1, 16);
        }
        if let Some(columns) = get("Columns") {
            params.columns = columns.max(1);
        }
        if let Some(early) = dict.get("EarlyChange").and_then(PDFObject::as_i64) {
            params.early_change = early != 0;
        }
        params
    }
}

/// One step of a filter chain with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterStep {
    pub filter: Filter,
    pub params: DecodeParams,
}

/// Builds the filter chain from resolved `/Filter` and `/DecodeParms`
/// values (also accepts the `/F` and `/DP` inline image abbreviations
/// through the caller).
pub fn filter_chain(filter: Option<&PDFObject>, params: Option<&PDFObject>) -> Vec<FilterStep> {
    let names: Vec<&str> = match filter {
        Some(PDFObject::Name(name)) => vec![name.as_str()],
        Some(PDFObject::Array(items)) => items.iter().filter_map(PDFObject::as_name).collect(),
        _ => Vec::new(),
    };
    let param_at = |i: usize| -> Option<&Dict> {
        match params {
            Some(PDFObject::Dictionary(d)) if i == 0 => Some(d),
            Some(PDFObject::Array(items)) => items.get(i).and_then(|p| match p {
                PDFObject::Dictionary(d) => Some(d),
                _ => None,
            }),
            _ => None,
        }
    };

    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let mut filter = Filter::from_name(name);
            if filter == Filter::Unsupported("Crypt".to_string()) {
                let identity = param_at(i)
                    .and_then(|d| d.get("Name"))
                    .is_none_or(|n| n.is_name("Identity"));
                if identity {
                    filter = Filter::IdentityCrypt;
                }
            }
            FilterStep {
                filter,
                params: DecodeParams::from_dict(param_at(i)),
            }
        })
        .collect()
}

/// Result of running a filter chain.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedStream {
    /// Shared so content and font readers can hold it without copying
    pub data: Arc<Vec<u8>>,
    /// Name of the unsupported filter that stopped decoding
    pub skipped: Option<String>,
    /// Image codec still to be applied to `data`
    pub image_codec: Option<Filter>,
}

impl DecodedStream {
    pub fn new(data: Vec<u8>) -> Self {
        DecodedStream {
            data: Arc::new(data),
            ..Default::default()
        }
    }

    /// The "decode skipped" marker: empty data plus the offending filter.
    pub fn skipped(filter: &str) -> Self {
        DecodedStream {
            data: Arc::default(),
            skipped: Some(filter.to_string()),
            image_codec: None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }
}

/// Runs `data` through `chain`.
///
/// Unsupported filters produce [`DecodedStream::skipped`]; a DCT filter
/// stops the chain with the bytes still encoded. Corrupt data in a
/// supported filter is an error.
pub fn decode(data: &[u8], chain: &[FilterStep]) -> PDFResult<DecodedStream> {
    let mut current = data.to_vec();

    for (i, step) in chain.iter().enumerate() {
        current = match &step.filter {
            Filter::Flate => apply_predictor(decode_flate(&current)?, &step.params)?,
            Filter::Lzw => apply_predictor(decode_lzw(&current, step.params.early_change)?, &step.params)?,
            Filter::AsciiHex => decode_ascii_hex(&current)?,
            Filter::Ascii85 => decode_ascii85(&current)?,
            Filter::RunLength => decode_run_length(&current),
            Filter::IdentityCrypt => current,
            Filter::Unsupported(name) => {
                tracing::warn!("decode skipped: unsupported filter /{name}");
                return Ok(DecodedStream::skipped(name));
            }
            Filter::Dct => {
                if i + 1 < chain.len() {
                    tracing::warn!("filters after {} are ignored", step.filter.name());
                }
                return Ok(DecodedStream {
                    data: Arc::new(current),
                    skipped: None,
                    image_codec: Some(step.filter.clone()),
                });
            }
        };
    }

    Ok(DecodedStream::new(current))
}

/// Decodes FlateDecode data.
///
/// Tries zlib first and raw deflate second. Truncated data keeps whatever
/// decompressed before the damage.
pub fn decode_flate(compressed: &[u8]) -> PDFResult<Vec<u8>> {
    let mut out = Vec::new();
    let zlib_err = match ZlibDecoder::new(compressed).read_to_end(&mut out) {
        Ok(_) => return Ok(out),
        Err(e) => e,
    };
    if !out.is_empty() {
        tracing::warn!("flate data damaged after {} bytes: {zlib_err}", out.len());
        return Ok(out);
    }

    out.clear();
    match DeflateDecoder::new(compressed).read_to_end(&mut out) {
        Ok(_) => Ok(out),
        Err(_) if !out.is_empty() => Ok(out),
        Err(deflate_err) => Err(PDFError::malformed(
            format!("FlateDecode failed: zlib ({zlib_err}), deflate ({deflate_err})"),
            None,
        )),
    }
}

/// Decodes LZWDecode data (MSB-first codes, 8-bit literals).
pub fn decode_lzw(data: &[u8], early_change: bool) -> PDFResult<Vec<u8>> {
    use weezl::{decode::Decoder, BitOrder};

    let mut decoder = if early_change {
        Decoder::with_tiff_size_switch(BitOrder::Msb, 8)
    } else {
        Decoder::new(BitOrder::Msb, 8)
    };
    let mut out = Vec::new();
    let result = decoder.into_vec(&mut out).decode_all(data);
    match result.status {
        Ok(_) => Ok(out),
        Err(e) if !out.is_empty() => {
            tracing::warn!("LZW data damaged after {} bytes: {e}", out.len());
            Ok(out)
        }
        Err(e) => Err(PDFError::malformed(format!("LZWDecode failed: {e}"), None)),
    }
}

/// Reverses PNG (10..=15) or TIFF (2) prediction.
pub fn apply_predictor(data: Vec<u8>, params: &DecodeParams) -> PDFResult<Vec<u8>> {
    match params.predictor {
        0 | 1 => Ok(data),
        2 => Ok(decode_tiff_predictor(data, params)),
        10..=15 => Ok(decode_png_predictor(&data, params)),
        other => Err(PDFError::unsupported(format!("predictor {other}"))),
    }
}

/// Undoes PNG row filters. Each row starts with its own filter type byte;
/// an incomplete final row is decoded as far as it goes.
pub fn decode_png_predictor(data: &[u8], params: &DecodeParams) -> Vec<u8> {
    let bits_per_pixel = params.colors * params.bits_per_component;
    let pixel_bytes = bits_per_pixel.div_ceil(8);
    let row_bytes = (params.columns * bits_per_pixel).div_ceil(8);
    let stride = row_bytes + 1;

    let mut output = Vec::with_capacity(data.len() / stride * row_bytes + row_bytes);
    let mut prev = vec![0u8; row_bytes];
    let mut row = vec![0u8; row_bytes];

    for chunk in data.chunks(stride) {
        let (kind, raw) = (chunk[0], &chunk[1..]);
        row[..raw.len()].copy_from_slice(raw);
        row[raw.len()..].fill(0);

        for i in 0..row_bytes {
            let left = if i >= pixel_bytes { row[i - pixel_bytes] } else { 0 };
            let up = prev[i];
            let up_left = if i >= pixel_bytes { prev[i - pixel_bytes] } else { 0 };
            row[i] = match kind {
                1 => row[i].wrapping_add(left),
                2 => row[i].wrapping_add(up),
                3 => row[i].wrapping_add(((left as u16 + up as u16) / 2) as u8),
                4 => row[i].wrapping_add(paeth(left, up, up_left)),
                _ => row[i],
            };
        }

        output.extend_from_slice(&row[..raw.len()]);
        std::mem::swap(&mut prev, &mut row);
    }

    output
}

fn paeth(left: u8, up: u8, up_left: u8) -> u8 {
    let p = left as i16 + up as i16 - up_left as i16;
    let pa = (p - left as i16).abs();
    let pb = (p - up as i16).abs();
    let pc = (p - up_left as i16).abs();
    if pa <= pb && pa <= pc {
        left
    } else if pb <= pc {
        up
    } else {
        up_left
    }
}

/// Undoes TIFF predictor 2 (horizontal differencing).
fn decode_tiff_predictor(mut data: Vec<u8>, params: &DecodeParams) -> Vec<u8> {
    let colors = params.colors;
    let bpc = params.bits_per_component;
    let row_bytes = (params.columns * colors * bpc).div_ceil(8);
    if row_bytes == 0 {
        return data;
    }

    for row in data.chunks_mut(row_bytes) {
        match bpc {
            8 => {
                for i in colors..row.len() {
                    row[i] = row[i].wrapping_add(row[i - colors]);
                }
            }
            16 => {
                let step = colors * 2;
                let mut i = step;
                while i + 1 < row.len() {
                    let prev = u16::from_be_bytes([row[i - step], row[i - step + 1]]);
                    let cur = u16::from_be_bytes([row[i], row[i + 1]]);
                    let [hi, lo] = cur.wrapping_add(prev).to_be_bytes();
                    row[i] = hi;
                    row[i + 1] = lo;
                    i += 2;
                }
            }
            _ => {
                // Sub-byte samples: unpack, accumulate per component, repack
                let mask = (1u32 << bpc) - 1;
                let samples = row.len() * 8 / bpc;
                let mut values: Vec<u32> = (0..samples).map(|s| read_bits(row, s * bpc, bpc)).collect();
                for s in colors..values.len() {
                    values[s] = (values[s] + values[s - colors]) & mask;
                }
                row.fill(0);
                for (s, v) in values.into_iter().enumerate() {
                    write_bits(row, s * bpc, bpc, v);
                }
            }
        }
    }
    data
}

fn read_bits(data: &[u8], bit_offset: usize, bits: usize) -> u32 {
    let mut value = 0u32;
    for b in bit_offset..bit_offset + bits {
        let bit = (data[b / 8] >> (7 - (b % 8))) & 1;
        value = (value << 1) | bit as u32;
    }
    value
}

fn write_bits(data: &mut [u8], bit_offset: usize, bits: usize, value: u32) {
    for (k, b) in (bit_offset..bit_offset + bits).enumerate() {
        let bit = (value >> (bits - 1 - k)) & 1;
        data[b / 8] |= (bit as u8) << (7 - (b % 8));
    }
}

/// Decodes ASCIIHexDecode data. Whitespace is ignored, `>` ends the data
/// and an odd final digit is padded with zero.
pub fn decode_ascii_hex(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut result = Vec::with_capacity(data.len() / 2);
    let mut high: Option<u8> = None;

    for &byte in data {
        let nibble = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte - b'a' + 10,
            b'A'..=b'F' => byte - b'A' + 10,
            b'>' => break,
            _ if super::lexer::is_whitespace(byte) => continue,
            _ => {
                return Err(PDFError::malformed(
                    format!("invalid ASCIIHex character 0x{byte:02x}"),
                    None,
                ));
            }
        };
        match high.take() {
            Some(h) => result.push((h << 4) | nibble),
            None => high = Some(nibble),
        }
    }
    if let Some(h) = high {
        result.push(h << 4);
    }

    Ok(result)
}

/// Decodes ASCII85Decode data, including the `z` shortcut and a partial
/// final group.
pub fn decode_ascii85(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut result = Vec::with_capacity(data.len() * 4 / 5);
    let mut tuple = 0u64;
    let mut count = 0usize;

    for &byte in data {
        match byte {
            b'~' => break,
            b'z' if count == 0 => result.extend_from_slice(&[0u8; 4]),
            b'!'..=b'u' => {
                tuple = tuple * 85 + (byte - b'!') as u64;
                count += 1;
                if count == 5 {
                    result.extend_from_slice(&(tuple as u32).to_be_bytes());
                    tuple = 0;
                    count = 0;
                }
            }
            _ if super::lexer::is_whitespace(byte) => {}
            _ => {
                return Err(PDFError::malformed(
                    format!("invalid ASCII85 character 0x{byte:02x}"),
                    None,
                ));
            }
        }
    }

    if count > 1 {
        for _ in count..5 {
            tuple = tuple * 85 + 84;
        }
        let bytes = (tuple as u32).to_be_bytes();
        result.extend_from_slice(&bytes[..count - 1]);
    }

    Ok(result)
}

/// Decodes RunLengthDecode data.
pub fn decode_run_length(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2);
    let mut i = 0;
    while i < data.len() {
        let length = data[i];
        i += 1;
        match length {
            128 => break,
            0..=127 => {
                let n = length as usize + 1;
                let end = (i + n).min(data.len());
                out.extend_from_slice(&data[i..end]);
                i = end;
            }
            _ => {
                let Some(&byte) = data.get(i) else { break };
                out.extend(std::iter::repeat_n(byte, 257 - length as usize));
                i += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn step(filter: Filter) -> FilterStep {
        FilterStep {
            filter,
            params: DecodeParams::default(),
        }
    }

    #[test]
    fn test_decode_flate_simple() {
        let original = b"Hello, PDF world! This is test data.";
        assert_eq!(decode_flate(&zlib(original)).unwrap(), original);
    }

    #[test]
    fn test_decode_flate_raw_deflate_fallback() {
        use flate2::write::DeflateEncoder;
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"raw deflate body").unwrap();
        let raw = encoder.finish().unwrap();

        assert_eq!(decode_flate(&raw).unwrap(), b"raw deflate body");
    }

    #[test]
    fn test_decode_flate_truncated_keeps_prefix() {
        let original: Vec<u8> = (0..4000u32).map(|i| (i % 251) as u8).collect();
        let compressed = zlib(&original);
        let truncated = &compressed[..compressed.len() - 8];

        let decoded = decode_flate(truncated).unwrap();
        assert!(!decoded.is_empty());
        assert_eq!(&decoded[..], &original[..decoded.len()]);
    }

    #[test]
    fn test_decode_ascii_hex() {
        assert_eq!(decode_ascii_hex(b"48 65\n6c6C6f>").unwrap(), b"Hello");
        assert_eq!(decode_ascii_hex(b"414").unwrap(), vec![0x41, 0x40]);
        assert!(decode_ascii_hex(b"4G").is_err());
    }

    #[test]
    fn test_decode_ascii85() {
        assert_eq!(decode_ascii85(b"87cURD]i,\"Ebo80~>").unwrap(), b"Hello World!");
        assert_eq!(decode_ascii85(b"z~>").unwrap(), vec![0, 0, 0, 0]);
        // Partial final group
        assert_eq!(decode_ascii85(b"87cURD]i,\"Ebo8~>").unwrap(), b"Hello World");
    }

    #[test]
    fn test_decode_run_length() {
        // 2 literal bytes, then 'z' repeated 3 times, then EOD
        assert_eq!(decode_run_length(&[1, b'a', b'b', 254, b'z', 128, b'x']), b"abzzz");
    }

    #[test]
    fn test_decode_lzw() {
        // "-----A---B" from the PDF reference, early change on
        let encoded = [0x80, 0x0B, 0x60, 0x50, 0x22, 0x0C, 0x0C, 0x85, 0x01];
        assert_eq!(decode_lzw(&encoded, true).unwrap(), b"-----A---B");
    }

    #[test]
    fn test_png_up_predictor() {
        let params = DecodeParams {
            predictor: 12,
            columns: 3,
            ..DecodeParams::default()
        };
        let data = [2, 1, 2, 3, 2, 1, 1, 1];
        assert_eq!(apply_predictor(data.to_vec(), &params).unwrap(), vec![1, 2, 3, 2, 3, 4]);
    }

    #[test]
    fn test_png_sub_and_paeth_predictors() {
        let params = DecodeParams {
            predictor: 15,
            columns: 3,
            ..DecodeParams::default()
        };
        let data = [1, 5, 1, 1, 4, 1, 1, 1];
        // Row 1: sub gives 5 6 7; row 2: paeth on (6,7,8) deltas
        assert_eq!(decode_png_predictor(&data, &params), vec![5, 6, 7, 6, 7, 8]);
    }

    #[test]
    fn test_tiff_predictor() {
        let params = DecodeParams {
            predictor: 2,
            colors: 1,
            columns: 4,
            ..DecodeParams::default()
        };
        assert_eq!(apply_predictor(vec![10, 1, 1, 1], &params).unwrap(), vec![10, 11, 12, 13]);
    }

    #[test]
    fn test_filter_chain_order() {
        // ASCIIHex first, then Flate
        let compressed = zlib(b"chained");
        let hex: String = compressed.iter().map(|b| format!("{b:02x}")).collect();
        let chain = filter_chain(
            Some(&PDFObject::Array(vec![
                PDFObject::Name("AHx".to_string()),
                PDFObject::Name("FlateDecode".to_string()),
            ])),
            None,
        );

        let decoded = decode(hex.as_bytes(), &chain).unwrap();
        assert_eq!(*decoded.data, b"chained");
        assert!(!decoded.is_skipped());
    }

    #[test]
    fn test_unsupported_filter_is_skipped() {
        let decoded = decode(b"data", &[step(Filter::from_name("JBIG2Decode"))]).unwrap();
        assert!(decoded.is_skipped());
        assert_eq!(decoded.skipped.as_deref(), Some("JBIG2Decode"));
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn test_dct_stops_chain() {
        let decoded = decode(b"\xff\xd8jpeg", &[step(Filter::Dct)]).unwrap();
        assert_eq!(decoded.image_codec, Some(Filter::Dct));
        assert_eq!(*decoded.data, b"\xff\xd8jpeg");
    }

    #[test]
    fn test_decode_params_from_dict() {
        let mut dict = Dict::default();
        dict.insert("Predictor".to_string(), PDFObject::Number(12.0));
        dict.insert("Columns".to_string(), PDFObject::Number(5.0));
        dict.insert("EarlyChange".to_string(), PDFObject::Number(0.0));

        let params = DecodeParams::from_dict(Some(&dict));
        assert_eq!(params.predictor, 12);
        assert_eq!(params.columns, 5);
        assert!(!params.early_change);
        assert_eq!(params.colors, 1);
    }
}
