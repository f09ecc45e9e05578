//! Incidental state for container-like voxels
//!
//! Some voxel kinds carry attributes beyond their basic type: signage text,
//! banner colors, arbitrary tagged key/value extras. Each kind owns its own
//! wire codec and registers it with [`IncidentalRegistry`]; the snapshot
//! read/write loop iterates the registry and never branches on concrete
//! kinds, so new kinds plug in without touching it.

use std::io::{self, Read, Write};

use crate::snapshot::wire;

/// A generic typed value attached to an incidental record
#[derive(Debug, Clone, PartialEq)]
pub enum TaggedValue {
    Byte(i8),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Str(String),
}

impl TaggedValue {
    fn tag(&self) -> u8 {
        match self {
            TaggedValue::Byte(_) => 1,
            TaggedValue::Int(_) => 2,
            TaggedValue::Long(_) => 3,
            TaggedValue::Float(_) => 4,
            TaggedValue::Double(_) => 5,
            TaggedValue::Bool(_) => 6,
            TaggedValue::Str(_) => 7,
        }
    }

    fn write(&self, w: &mut dyn Write) -> io::Result<()> {
        wire::write_u8(w, self.tag())?;
        match self {
            TaggedValue::Byte(v) => wire::write_u8(w, *v as u8),
            TaggedValue::Int(v) => wire::write_i32(w, *v),
            TaggedValue::Long(v) => wire::write_i64(w, *v),
            TaggedValue::Float(v) => wire::write_f32(w, *v),
            TaggedValue::Double(v) => wire::write_f64(w, *v),
            TaggedValue::Bool(v) => wire::write_bool(w, *v),
            TaggedValue::Str(v) => wire::write_str(w, v),
        }
    }

    fn read(r: &mut dyn Read) -> io::Result<Self> {
        let tag = wire::read_u8(r)?;
        Ok(match tag {
            1 => TaggedValue::Byte(wire::read_u8(r)? as i8),
            2 => TaggedValue::Int(wire::read_i32(r)?),
            3 => TaggedValue::Long(wire::read_i64(r)?),
            4 => TaggedValue::Float(wire::read_f32(r)?),
            5 => TaggedValue::Double(wire::read_f64(r)?),
            6 => TaggedValue::Bool(wire::read_bool(r)?),
            7 => TaggedValue::Str(wire::read_str(r)?),
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown tagged value type {}", other),
                ))
            }
        })
    }
}

/// Decorative banner attributes
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BannerState {
    pub base_color: String,
    /// (pattern id, color) layers, bottom-up
    pub patterns: Vec<(String, String)>,
}

/// Signage attributes
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignState {
    pub lines: Vec<String>,
    pub color: String,
    pub glowing: bool,
}

/// Kind-specific portion of an incidental record
#[derive(Debug, Clone, PartialEq)]
pub enum IncidentalPayload {
    Banner(BannerState),
    Sign(SignState),
}

/// Full incidental overlay for one voxel
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentalState {
    pub payload: IncidentalPayload,
    /// Generic key/typed-value attributes beyond the kind's own fields
    pub extras: Vec<(String, TaggedValue)>,
}

impl IncidentalState {
    pub fn banner(state: BannerState) -> Self {
        Self {
            payload: IncidentalPayload::Banner(state),
            extras: Vec::new(),
        }
    }

    pub fn sign(state: SignState) -> Self {
        Self {
            payload: IncidentalPayload::Sign(state),
            extras: Vec::new(),
        }
    }

    /// Kind discriminator, matching the owning codec's kind tag
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            IncidentalPayload::Banner(_) => BannerCodec::KIND,
            IncidentalPayload::Sign(_) => SignCodec::KIND,
        }
    }

    /// Write the extras list (shared across all kinds)
    pub(crate) fn write_extras(&self, w: &mut dyn Write) -> io::Result<()> {
        wire::write_u16(w, self.extras.len() as u16)?;
        for (key, value) in &self.extras {
            wire::write_str(w, key)?;
            value.write(w)?;
        }
        Ok(())
    }

    pub(crate) fn read_extras(r: &mut dyn Read) -> io::Result<Vec<(String, TaggedValue)>> {
        let count = wire::read_u16(r)? as usize;
        let mut extras = Vec::with_capacity(count);
        for _ in 0..count {
            let key = wire::read_str(r)?;
            let value = TaggedValue::read(r)?;
            extras.push((key, value));
        }
        Ok(extras)
    }
}

/// Wire codec for one incidental kind
///
/// `encode` returns the payload bytes; the store length-prefixes them so a
/// reader that does not know the kind can skip its records.
pub trait IncidentalCodec: Send + Sync {
    /// Kind tag written into the table header
    fn kind(&self) -> &'static str;

    fn encode(&self, payload: &IncidentalPayload) -> io::Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> io::Result<IncidentalPayload>;
}

fn wrong_variant(expected: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("payload is not a {} record", expected),
    )
}

/// Codec for [`BannerState`]
pub struct BannerCodec;

impl BannerCodec {
    pub const KIND: &'static str = "banner";
}

impl IncidentalCodec for BannerCodec {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn encode(&self, payload: &IncidentalPayload) -> io::Result<Vec<u8>> {
        let IncidentalPayload::Banner(banner) = payload else {
            return Err(wrong_variant(Self::KIND));
        };
        let mut buf = Vec::new();
        wire::write_str(&mut buf, &banner.base_color)?;
        wire::write_u16(&mut buf, banner.patterns.len() as u16)?;
        for (pattern, color) in &banner.patterns {
            wire::write_str(&mut buf, pattern)?;
            wire::write_str(&mut buf, color)?;
        }
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> io::Result<IncidentalPayload> {
        let r = &mut io::Cursor::new(bytes);
        let base_color = wire::read_str(r)?;
        let count = wire::read_u16(r)? as usize;
        let mut patterns = Vec::with_capacity(count);
        for _ in 0..count {
            let pattern = wire::read_str(r)?;
            let color = wire::read_str(r)?;
            patterns.push((pattern, color));
        }
        Ok(IncidentalPayload::Banner(BannerState { base_color, patterns }))
    }
}

/// Codec for [`SignState`]
pub struct SignCodec;

impl SignCodec {
    pub const KIND: &'static str = "sign";
}

impl IncidentalCodec for SignCodec {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn encode(&self, payload: &IncidentalPayload) -> io::Result<Vec<u8>> {
        let IncidentalPayload::Sign(sign) = payload else {
            return Err(wrong_variant(Self::KIND));
        };
        let mut buf = Vec::new();
        wire::write_u16(&mut buf, sign.lines.len() as u16)?;
        for line in &sign.lines {
            wire::write_str(&mut buf, line)?;
        }
        wire::write_str(&mut buf, &sign.color)?;
        wire::write_bool(&mut buf, sign.glowing)?;
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> io::Result<IncidentalPayload> {
        let r = &mut io::Cursor::new(bytes);
        let count = wire::read_u16(r)? as usize;
        let mut lines = Vec::with_capacity(count);
        for _ in 0..count {
            lines.push(wire::read_str(r)?);
        }
        let color = wire::read_str(r)?;
        let glowing = wire::read_bool(r)?;
        Ok(IncidentalPayload::Sign(SignState { lines, color, glowing }))
    }
}

/// Open registry of incidental kind codecs
///
/// Table order in the snapshot body is registration order, so the standard
/// kinds always come first and new kinds append.
pub struct IncidentalRegistry {
    codecs: Vec<Box<dyn IncidentalCodec>>,
}

impl IncidentalRegistry {
    /// Registry with the built-in kinds (banner, sign)
    pub fn standard() -> Self {
        let mut registry = Self { codecs: Vec::new() };
        registry.register(Box::new(BannerCodec));
        registry.register(Box::new(SignCodec));
        registry
    }

    /// Register a codec for a new kind
    ///
    /// # Panics
    /// Panics if the kind tag is already registered.
    pub fn register(&mut self, codec: Box<dyn IncidentalCodec>) {
        assert!(
            self.codec_for(codec.kind()).is_none(),
            "duplicate incidental kind '{}'",
            codec.kind()
        );
        self.codecs.push(codec);
    }

    /// Codecs in table order
    pub fn codecs(&self) -> impl Iterator<Item = &dyn IncidentalCodec> {
        self.codecs.iter().map(|c| c.as_ref())
    }

    pub fn codec_for(&self, kind: &str) -> Option<&dyn IncidentalCodec> {
        self.codecs.iter().find(|c| c.kind() == kind).map(|c| c.as_ref())
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

impl Default for IncidentalRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
