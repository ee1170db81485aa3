//! Working pixel types and raw-buffer access.
//!
//! All in-memory pixel data is held in band-major byte planes of
//! `word_size * width * height` bytes. The helpers here read and write
//! individual pixels as `(real, imaginary)` pairs with the conversion
//! semantics shared by the whole engine: round-to-nearest with saturation
//! for integer types, straight casts for float types, and the imaginary
//! component discarded for real types.

use crate::error::{Result, WarpError};

/// Pixel data types supported as working types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    Byte,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Float64,
    CFloat32,
    CFloat64,
}

impl PixelType {
    /// Size of one pixel in bits.
    pub fn bits(self) -> usize {
        match self {
            Self::Byte => 8,
            Self::UInt16 | Self::Int16 => 16,
            Self::UInt32 | Self::Int32 | Self::Float32 => 32,
            Self::Float64 | Self::CFloat32 => 64,
            Self::CFloat64 => 128,
        }
    }

    /// Size of one pixel in bytes.
    pub fn word_size(self) -> usize {
        self.bits() / 8
    }

    /// Whether the type carries an imaginary component.
    pub fn is_complex(self) -> bool {
        matches!(self, Self::CFloat32 | Self::CFloat64)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Byte => "Byte",
            Self::UInt16 => "UInt16",
            Self::Int16 => "Int16",
            Self::UInt32 => "UInt32",
            Self::Int32 => "Int32",
            Self::Float32 => "Float32",
            Self::Float64 => "Float64",
            Self::CFloat32 => "CFloat32",
            Self::CFloat64 => "CFloat64",
        }
    }
}

impl std::fmt::Display for PixelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Allocate a zeroed byte buffer, surfacing allocation failure instead of
/// aborting the process.
pub fn try_alloc(what: &'static str, bytes: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(bytes)
        .map_err(|_| WarpError::OutOfMemory { what, bytes })?;
    buf.resize(bytes, 0);
    Ok(buf)
}

fn round_to<T>(v: f64) -> T
where
    T: num_traits::Bounded + num_traits::NumCast,
{
    // `as`-style saturating conversion after rounding; NaN maps to zero.
    let r = v.round();
    match num_traits::cast::<f64, T>(r) {
        Some(x) => x,
        None => {
            if r.is_nan() {
                num_traits::cast::<f64, T>(0.0).unwrap_or_else(T::min_value)
            } else if r < 0.0 {
                T::min_value()
            } else {
                T::max_value()
            }
        }
    }
}

/// Read pixel `idx` of `buf` as a `(real, imaginary)` pair.
///
/// The imaginary part is 0 for real types.
pub fn get(buf: &[u8], ty: PixelType, idx: usize) -> (f64, f64) {
    let w = ty.word_size();
    let off = idx * w;
    let word = &buf[off..off + w];
    match ty {
        PixelType::Byte => (word[0] as f64, 0.0),
        PixelType::UInt16 => (bytemuck::pod_read_unaligned::<u16>(word) as f64, 0.0),
        PixelType::Int16 => (bytemuck::pod_read_unaligned::<i16>(word) as f64, 0.0),
        PixelType::UInt32 => (bytemuck::pod_read_unaligned::<u32>(word) as f64, 0.0),
        PixelType::Int32 => (bytemuck::pod_read_unaligned::<i32>(word) as f64, 0.0),
        PixelType::Float32 => (bytemuck::pod_read_unaligned::<f32>(word) as f64, 0.0),
        PixelType::Float64 => (bytemuck::pod_read_unaligned::<f64>(word), 0.0),
        PixelType::CFloat32 => {
            let re = bytemuck::pod_read_unaligned::<f32>(&word[..4]);
            let im = bytemuck::pod_read_unaligned::<f32>(&word[4..]);
            (re as f64, im as f64)
        }
        PixelType::CFloat64 => {
            let re = bytemuck::pod_read_unaligned::<f64>(&word[..8]);
            let im = bytemuck::pod_read_unaligned::<f64>(&word[8..]);
            (re, im)
        }
    }
}

/// Write `(re, im)` at pixel `idx` of `buf`.
///
/// Integer types round to nearest and saturate; real types discard `im`.
pub fn put(buf: &mut [u8], ty: PixelType, idx: usize, re: f64, im: f64) {
    let w = ty.word_size();
    let off = idx * w;
    let word = &mut buf[off..off + w];
    match ty {
        PixelType::Byte => word[0] = round_to::<u8>(re),
        PixelType::UInt16 => word.copy_from_slice(bytemuck::bytes_of(&round_to::<u16>(re))),
        PixelType::Int16 => word.copy_from_slice(bytemuck::bytes_of(&round_to::<i16>(re))),
        PixelType::UInt32 => word.copy_from_slice(bytemuck::bytes_of(&round_to::<u32>(re))),
        PixelType::Int32 => word.copy_from_slice(bytemuck::bytes_of(&round_to::<i32>(re))),
        PixelType::Float32 => word.copy_from_slice(bytemuck::bytes_of(&(re as f32))),
        PixelType::Float64 => word.copy_from_slice(bytemuck::bytes_of(&re)),
        PixelType::CFloat32 => {
            word[..4].copy_from_slice(bytemuck::bytes_of(&(re as f32)));
            word[4..].copy_from_slice(bytemuck::bytes_of(&(im as f32)));
        }
        PixelType::CFloat64 => {
            word[..8].copy_from_slice(bytemuck::bytes_of(&re));
            word[8..].copy_from_slice(bytemuck::bytes_of(&im));
        }
    }
}

/// Broadcast `(re, im)` over every pixel of `buf`.
pub fn fill(buf: &mut [u8], ty: PixelType, re: f64, im: f64) {
    let w = ty.word_size();
    let mut word = [0u8; 16];
    put(&mut word[..w], ty, 0, re, im);
    for chunk in buf.chunks_exact_mut(w) {
        chunk.copy_from_slice(&word[..w]);
    }
}

/// Round-trip `(re, im)` through `ty`, yielding the value a pixel of that
/// type would actually hold.
pub fn adjust(ty: PixelType, re: f64, im: f64) -> (f64, f64) {
    let mut word = [0u8; 16];
    let w = ty.word_size();
    put(&mut word[..w], ty, 0, re, im);
    get(&word[..w], ty, 0)
}

/// Parse the longest numeric prefix of `s`, like C `atof`: anything that is
/// not a number yields 0.
fn parse_lenient(s: &str) -> f64 {
    let s = s.trim();
    let bytes = s.as_bytes();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut seen_exp = false;
    while end < bytes.len() {
        let c = bytes[end] as char;
        match c {
            '0'..='9' => seen_digit = true,
            '+' | '-' => {
                // Sign is only valid at the start or right after the exponent.
                let after_exp = end > 0 && matches!(bytes[end - 1], b'e' | b'E') && seen_exp;
                if end != 0 && !after_exp {
                    break;
                }
            }
            '.' => {
                if seen_dot || seen_exp {
                    break;
                }
                seen_dot = true;
            }
            'e' | 'E' => {
                if seen_exp || !seen_digit {
                    break;
                }
                seen_exp = true;
            }
            _ => break,
        }
        end += 1;
    }
    // Trim a trailing exponent marker or sign that never got digits.
    let mut prefix = &s[..end];
    while prefix
        .chars()
        .last()
        .is_some_and(|c| matches!(c, 'e' | 'E' | '+' | '-' | '.'))
    {
        prefix = &prefix[..prefix.len() - 1];
    }
    prefix.parse::<f64>().unwrap_or(0.0)
}

/// Parse a complex literal: `"a"`, `"a,b"` or `"a+bi"` / `"a-bi"`.
///
/// Parsing is lenient in the `atof` tradition: unparseable components
/// yield 0.
pub fn parse_complex(s: &str) -> (f64, f64) {
    let s = s.trim();
    if let Some((re, im)) = s.split_once(',') {
        return (parse_lenient(re), parse_lenient(im));
    }
    if let Some(body) = s.strip_suffix('i') {
        // Find the sign separating real and imaginary parts, skipping a
        // leading sign and exponent signs.
        let bytes = body.as_bytes();
        let mut split = None;
        for pos in (1..bytes.len()).rev() {
            if matches!(bytes[pos], b'+' | b'-') && !matches!(bytes[pos - 1], b'e' | b'E') {
                split = Some(pos);
                break;
            }
        }
        if let Some(pos) = split {
            let re = parse_lenient(&body[..pos]);
            let im_str = &body[pos..];
            let im = if im_str == "+" {
                1.0
            } else if im_str == "-" {
                -1.0
            } else {
                parse_lenient(im_str)
            };
            return (re, im);
        }
        return (0.0, parse_lenient(body));
    }
    (parse_lenient(s), 0.0)
}
