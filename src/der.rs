//! Minimal DER tree codec.
//!
//! Image4 objects mix universal SEQUENCE/SET/IA5String values with private
//! class tags whose numbers are fourccs (`[PRIVATE 0x4D414E42]` for `MANB`).
//! Those need the high-tag-number form with up to 32-bit tag numbers, so the
//! tree is walked here directly: every element becomes a [`TaggedValue`],
//! constructed elements are decoded recursively, and [`encode`] is the exact
//! inverse for definite-length DER.

use crate::error::{Error, Result};

pub const BOOLEAN: u32 = 1;
pub const INTEGER: u32 = 2;
pub const OCTET_STRING: u32 = 4;
pub const NULL: u32 = 5;
pub const SEQUENCE: u32 = 16;
pub const SET: u32 = 17;
pub const IA5_STRING: u32 = 22;

/// Nesting deeper than this is rejected rather than recursed into.
const MAX_DEPTH: usize = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TagClass {
    Universal,
    Application,
    Context,
    Private,
}

impl TagClass {
    fn from_bits(b: u8) -> Self {
        match b & 0b11 {
            0 => TagClass::Universal,
            1 => TagClass::Application,
            2 => TagClass::Context,
            _ => TagClass::Private,
        }
    }

    fn bits(self) -> u8 {
        match self {
            TagClass::Universal => 0,
            TagClass::Application => 1,
            TagClass::Context => 2,
            TagClass::Private => 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Content {
    Primitive(Vec<u8>),
    Constructed(Vec<TaggedValue>),
}

/// One decoded DER element with its children fully materialized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaggedValue {
    pub class: TagClass,
    pub tag: u32,
    pub content: Content,
}

impl TaggedValue {
    pub fn primitive(class: TagClass, tag: u32, bytes: Vec<u8>) -> Self {
        TaggedValue { class, tag, content: Content::Primitive(bytes) }
    }

    pub fn constructed(class: TagClass, tag: u32, children: Vec<TaggedValue>) -> Self {
        TaggedValue { class, tag, content: Content::Constructed(children) }
    }

    pub fn ia5(s: &str) -> Self {
        Self::primitive(TagClass::Universal, IA5_STRING, s.as_bytes().to_vec())
    }

    pub fn octets(bytes: impl Into<Vec<u8>>) -> Self {
        Self::primitive(TagClass::Universal, OCTET_STRING, bytes.into())
    }

    pub fn boolean(v: bool) -> Self {
        Self::primitive(TagClass::Universal, BOOLEAN, vec![if v { 0xFF } else { 0x00 }])
    }

    pub fn integer(v: u64) -> Self {
        Self::primitive(TagClass::Universal, INTEGER, encode_unsigned(v))
    }

    pub fn sequence(children: Vec<TaggedValue>) -> Self {
        Self::constructed(TagClass::Universal, SEQUENCE, children)
    }

    pub fn set(children: Vec<TaggedValue>) -> Self {
        Self::constructed(TagClass::Universal, SET, children)
    }

    pub fn is_constructed(&self) -> bool {
        matches!(self.content, Content::Constructed(_))
    }

    pub fn is_universal(&self, tag: u32) -> bool {
        self.class == TagClass::Universal && self.tag == tag
    }

    /// Human-readable tag name for error messages.
    pub fn describe(&self) -> String {
        match (self.class, self.tag) {
            (TagClass::Universal, BOOLEAN) => "BOOLEAN".into(),
            (TagClass::Universal, INTEGER) => "INTEGER".into(),
            (TagClass::Universal, OCTET_STRING) => "OCTET STRING".into(),
            (TagClass::Universal, NULL) => "NULL".into(),
            (TagClass::Universal, SEQUENCE) => "SEQUENCE".into(),
            (TagClass::Universal, SET) => "SET".into(),
            (TagClass::Universal, IA5_STRING) => "IA5String".into(),
            (TagClass::Universal, n) => format!("UNIVERSAL {n}"),
            (TagClass::Application, n) => format!("[APPLICATION {n}]"),
            (TagClass::Context, n) => format!("[{n}]"),
            (TagClass::Private, n) => format!("[PRIVATE {n:#x}]"),
        }
    }

    pub fn children(&self) -> Option<&[TaggedValue]> {
        match &self.content {
            Content::Constructed(c) => Some(c),
            Content::Primitive(_) => None,
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.content {
            Content::Primitive(b) => Some(b),
            Content::Constructed(_) => None,
        }
    }

    pub fn expect_sequence(&self, ctx: &str) -> Result<&[TaggedValue]> {
        self.expect_constructed(SEQUENCE, "SEQUENCE", ctx)
    }

    pub fn expect_set(&self, ctx: &str) -> Result<&[TaggedValue]> {
        self.expect_constructed(SET, "SET", ctx)
    }

    fn expect_constructed(&self, tag: u32, name: &str, ctx: &str) -> Result<&[TaggedValue]> {
        match (&self.content, self.is_universal(tag)) {
            (Content::Constructed(c), true) => Ok(c),
            _ => Err(Error::unexpected(ctx, name, self.describe())),
        }
    }

    /// Children of a constructed element of any class (used for the
    /// context and private wrappers).
    pub fn expect_wrapper(&self, class: TagClass, ctx: &str) -> Result<&[TaggedValue]> {
        match &self.content {
            Content::Constructed(c) if self.class == class => Ok(c),
            _ => Err(Error::unexpected(ctx, format!("constructed {class:?} tag"), self.describe())),
        }
    }

    pub fn as_ia5(&self, ctx: &str) -> Result<&str> {
        let bytes = self.expect_primitive(IA5_STRING, "IA5String", ctx)?;
        if !bytes.is_ascii() {
            return Err(Error::malformed(ctx, "IA5String contains non-ASCII bytes"));
        }
        std::str::from_utf8(bytes).map_err(|e| Error::malformed(ctx, e.to_string()))
    }

    pub fn as_octets(&self, ctx: &str) -> Result<&[u8]> {
        self.expect_primitive(OCTET_STRING, "OCTET STRING", ctx)
    }

    pub fn as_bool(&self, ctx: &str) -> Result<bool> {
        match self.expect_primitive(BOOLEAN, "BOOLEAN", ctx)? {
            [0x00] => Ok(false),
            [0xFF] => Ok(true),
            other => Err(Error::malformed(ctx, format!("BOOLEAN content {}", hex::encode(other)))),
        }
    }

    /// Non-negative INTEGER that fits in 64 bits.
    pub fn as_u64(&self, ctx: &str) -> Result<u64> {
        let bytes = self.expect_primitive(INTEGER, "INTEGER", ctx)?;
        decode_unsigned(bytes).ok_or_else(|| {
            Error::malformed(ctx, format!("INTEGER {} is negative or wider than 64 bits", hex::encode(bytes)))
        })
    }

    fn expect_primitive(&self, tag: u32, name: &str, ctx: &str) -> Result<&[u8]> {
        match (&self.content, self.is_universal(tag)) {
            (Content::Primitive(b), true) => Ok(b),
            _ => Err(Error::unexpected(ctx, name, self.describe())),
        }
    }

    pub fn to_der(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_value(&mut out, self);
        out
    }
}

/// Decode a buffer that must consist of complete DER elements only.
pub fn decode(input: &[u8]) -> Result<Vec<TaggedValue>> {
    decode_all(input, 0)
}

/// Decode the first element of `input`, returning it with the unconsumed tail.
pub fn decode_first(input: &[u8]) -> Result<(TaggedValue, &[u8])> {
    let (value, used) = decode_element(input, 0)?;
    Ok((value, &input[used..]))
}

pub fn encode(values: &[TaggedValue]) -> Vec<u8> {
    let mut out = Vec::new();
    for v in values {
        write_value(&mut out, v);
    }
    out
}

fn decode_all(input: &[u8], depth: usize) -> Result<Vec<TaggedValue>> {
    let mut out = Vec::new();
    let mut off = 0usize;
    while off < input.len() {
        let (value, used) = decode_element(&input[off..], depth)?;
        out.push(value);
        off += used;
    }
    Ok(out)
}

fn decode_element(input: &[u8], depth: usize) -> Result<(TaggedValue, usize)> {
    if depth > MAX_DEPTH {
        return Err(Error::malformed("DER", "nesting too deep"));
    }
    let (tag_len, class, constructed, tag) = der_read_tag(input)?;
    let (len_len, content_len) = der_read_len(&input[tag_len..])?;
    let start = tag_len + len_len;
    let end = start
        .checked_add(content_len)
        .ok_or_else(|| Error::malformed("DER", "length overflow"))?;
    if end > input.len() {
        return Err(Error::malformed(
            "DER",
            format!("element needs {} bytes, {} available", end, input.len()),
        ));
    }
    let body = &input[start..end];
    let content = if constructed {
        Content::Constructed(decode_all(body, depth + 1)?)
    } else {
        if class == TagClass::Universal && matches!(tag, SEQUENCE | SET) {
            return Err(Error::malformed("DER", "primitive encoding of SEQUENCE/SET"));
        }
        Content::Primitive(body.to_vec())
    };
    Ok((TaggedValue { class, tag, content }, end))
}

/// Parse DER tag header: returns (bytes_consumed, class, constructed, tag_number)
fn der_read_tag(i: &[u8]) -> Result<(usize, TagClass, bool, u32)> {
    let b0 = *i.first().ok_or_else(|| Error::malformed("DER", "short tag"))?;
    let class = TagClass::from_bits(b0 >> 6);
    let constructed = (b0 & 0b0010_0000) != 0;
    let mut tag_no = (b0 & 0b0001_1111) as u32;
    let mut idx = 1usize;

    if tag_no == 0b1_1111 {
        // High-tag-number form: base-128 big-endian, MSB=1 continuation, last MSB=0
        tag_no = 0;
        loop {
            let b = *i.get(idx).ok_or_else(|| Error::malformed("DER", "short high-tag-number"))?;
            idx += 1;
            if tag_no > (u32::MAX >> 7) {
                return Err(Error::malformed("DER", "tag number exceeds 32 bits"));
            }
            tag_no = (tag_no << 7) | (b & 0x7F) as u32;
            if (b & 0x80) == 0 {
                break;
            }
        }
    }

    Ok((idx, class, constructed, tag_no))
}

/// Parse DER definite length: returns (bytes_consumed, content_length)
fn der_read_len(i: &[u8]) -> Result<(usize, usize)> {
    let b0 = *i.first().ok_or_else(|| Error::malformed("DER", "short length"))?;
    if (b0 & 0x80) == 0 {
        return Ok((1, b0 as usize));
    }
    let n = (b0 & 0x7F) as usize;
    if n == 0 {
        return Err(Error::malformed("DER", "indefinite length not allowed in DER"));
    }
    if n > std::mem::size_of::<usize>() {
        return Err(Error::malformed("DER", format!("{n}-byte length field")));
    }
    if i.len() < 1 + n {
        return Err(Error::malformed("DER", "short long-form length"));
    }
    let len = i[1..=n].iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
    Ok((1 + n, len))
}

fn write_value(out: &mut Vec<u8>, v: &TaggedValue) {
    write_tag(out, v.class, v.is_constructed(), v.tag);
    match &v.content {
        Content::Primitive(bytes) => {
            write_der_len(out, bytes.len());
            out.extend_from_slice(bytes);
        }
        Content::Constructed(children) => {
            let body = encode(children);
            write_der_len(out, body.len());
            out.extend_from_slice(&body);
        }
    }
}

fn write_tag(out: &mut Vec<u8>, class: TagClass, constructed: bool, tag: u32) {
    let mut b0 = class.bits() << 6;
    if constructed {
        b0 |= 0b0010_0000;
    }
    if tag < 0x1F {
        out.push(b0 | tag as u8);
        return;
    }
    out.push(b0 | 0x1F);
    let mut groups = [0u8; 5];
    let mut n = 0usize;
    let mut t = tag;
    loop {
        groups[n] = (t & 0x7F) as u8;
        n += 1;
        t >>= 7;
        if t == 0 {
            break;
        }
    }
    for k in (0..n).rev() {
        let cont = if k > 0 { 0x80 } else { 0x00 };
        out.push(groups[k] | cont);
    }
}

fn write_der_len(buf: &mut Vec<u8>, len: usize) {
    if len < 128 {
        buf.push(len as u8);
    } else {
        // Long-form definite length per DER
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        buf.push(0x80 | (bytes.len() - skip) as u8);
        buf.extend_from_slice(&bytes[skip..]);
    }
}

/// Minimal two's-complement encoding of a non-negative value.
pub(crate) fn encode_unsigned(v: u64) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
    let mut out = Vec::with_capacity(9);
    if bytes[skip] & 0x80 != 0 {
        out.push(0);
    }
    out.extend_from_slice(&bytes[skip..]);
    out
}

pub(crate) fn decode_unsigned(bytes: &[u8]) -> Option<u64> {
    match bytes.first() {
        None => None,
        Some(b) if b & 0x80 != 0 => None,
        Some(_) => {
            let trimmed = match bytes {
                [0, rest @ ..] if !rest.is_empty() => rest,
                _ => bytes,
            };
            if trimmed.len() > 8 {
                return None;
            }
            Some(trimmed.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
        }
    }
}
