//! Word and header framing for the serial link.
//!
//! Data words carry one binary32 value by bit-exact reinterpretation. Header
//! words pack `(tag:8)(rows:12)(cols:12)` most-significant first.

use crate::{OffloadError, Result};
use mxu_common::wire::{DIM_MAX, ROWS_SHIFT, TAG_OPERAND_A, TAG_OPERAND_B, TAG_SHIFT};

/// Returns the IEEE binary32 bit pattern of `f`. NaN payloads are preserved.
#[inline(always)]
pub fn float_to_word(f: f32) -> u32 {
    f.to_bits()
}

/// Inverse of [`float_to_word`], exact for every bit pattern.
#[inline(always)]
pub fn word_to_float(w: u32) -> f32 {
    f32::from_bits(w)
}

/// Operand tag carried in the top byte of a header word.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    OperandA = TAG_OPERAND_A,
    OperandB = TAG_OPERAND_B,
}

impl TryFrom<u8> for Tag {
    type Error = u8;

    fn try_from(raw: u8) -> core::result::Result<Self, u8> {
        match raw {
            TAG_OPERAND_A => Ok(Tag::OperandA),
            TAG_OPERAND_B => Ok(Tag::OperandB),
            other => Err(other),
        }
    }
}

/// A decoded header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub tag: Tag,
    pub rows: u16,
    pub cols: u16,
}

/// A header word whose tag byte is not a known operand tag.
///
/// The dimension fields are still extracted so the caller can log or
/// inspect the whole word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownTag {
    pub tag: u8,
    pub rows: u16,
    pub cols: u16,
}

/// Packs a header word, rejecting dimensions that do not fit in 12 bits.
pub fn encode_header(tag: Tag, rows: usize, cols: usize) -> Result<u32> {
    if rows > DIM_MAX as usize || cols > DIM_MAX as usize {
        return Err(OffloadError::ShapeOutOfRange { rows, cols });
    }
    Ok(((tag as u32) << TAG_SHIFT) | ((rows as u32) << ROWS_SHIFT) | cols as u32)
}

/// Splits a header word into its fields. Never fails internally: an
/// unrecognized tag is handed back to the caller as [`UnknownTag`].
pub fn decode_header(word: u32) -> core::result::Result<Header, UnknownTag> {
    let raw_tag = (word >> TAG_SHIFT) as u8;
    let rows = ((word >> ROWS_SHIFT) & DIM_MAX) as u16;
    let cols = (word & DIM_MAX) as u16;

    match Tag::try_from(raw_tag) {
        Ok(tag) => Ok(Header { tag, rows, cols }),
        Err(tag) => Err(UnknownTag { tag, rows, cols }),
    }
}
