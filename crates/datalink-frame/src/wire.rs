//! Primitive wire encodings: length-prefixed strings and packed transforms.
//!
//! All integers and floats are big-endian.

use bytes::{BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Translation scale between the peer's units (centimetres) and ours (metres).
pub const UNIT_SCALE: f32 = 100.0;

/// Packed transform size: ten `f32`.
pub const TRANSFORM_SIZE: usize = 40;

/// A 3-component vector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);
    pub const ONE: Vec3 = Vec3::new(1.0, 1.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn scale(self, factor: f32) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

/// A rotation quaternion, stored `x, y, z, w`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Quat = Quat::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.x, self.y, self.z, self.w]
    }

    pub fn dot(self, other: Quat) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z + self.w * other.w
    }
}

/// Translation, rotation and scale of one bone, mesh or rig root.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn new(translation: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            translation,
            rotation,
            scale,
        }
    }
}

/// Append a 4-byte length prefix followed by the UTF-8 bytes of `s`.
pub fn put_string(dst: &mut BytesMut, s: &str) {
    dst.reserve(4 + s.len());
    dst.put_u32(s.len() as u32);
    dst.put_slice(s.as_bytes());
}

/// Encode a length-prefixed string.
pub fn encode_string(s: &str) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(4 + s.len());
    put_string(&mut buf, s);
    buf.to_vec()
}

/// Decode a length-prefixed string starting at `offset`.
///
/// Returns the offset just past the string and the string itself.
pub fn decode_string(buf: &[u8], offset: usize) -> Result<(usize, String)> {
    let mut reader = PayloadReader::at(buf, offset);
    let s = reader.string()?;
    Ok((reader.offset(), s))
}

/// Append a packed transform. Translation is scaled into peer units.
pub fn put_transform(dst: &mut BytesMut, t: &Transform) {
    dst.reserve(TRANSFORM_SIZE);
    let loc = t.translation.scale(UNIT_SCALE);
    for v in loc.to_array() {
        dst.put_f32(v);
    }
    for v in t.rotation.to_array() {
        dst.put_f32(v);
    }
    for v in t.scale.to_array() {
        dst.put_f32(v);
    }
}

/// Encode a transform into its fixed 40-byte form.
pub fn encode_transform(translation: Vec3, rotation: Quat, scale: Vec3) -> [u8; TRANSFORM_SIZE] {
    let mut buf = BytesMut::with_capacity(TRANSFORM_SIZE);
    put_transform(&mut buf, &Transform::new(translation, rotation, scale));
    let mut out = [0u8; TRANSFORM_SIZE];
    out.copy_from_slice(&buf);
    out
}

/// Decode a 40-byte packed transform (exact inverse of [`encode_transform`]).
pub fn decode_transform(buf: &[u8]) -> Result<Transform> {
    PayloadReader::new(buf).transform()
}

/// Bounds-checked cursor over a binary payload.
///
/// Every read checks the remaining length first and reports
/// [`FrameError::TruncatedPayload`] instead of indexing out of bounds.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self::at(buf, 0)
    }

    pub fn at(buf: &'a [u8], offset: usize) -> Self {
        Self { buf, pos: offset }
    }

    /// Current read offset.
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(FrameError::TruncatedPayload {
                offset: self.pos,
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.array()?))
    }

    /// Read a `u32` element count and check that `count * element_size`
    /// bytes remain, so a corrupt count cannot trigger a huge allocation.
    pub fn count(&mut self, element_size: usize) -> Result<usize> {
        let start = self.pos;
        let count = self.u32()? as usize;
        let needed = count.saturating_mul(element_size);
        if needed > self.remaining() {
            return Err(FrameError::TruncatedPayload {
                offset: start,
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(count)
    }

    pub fn string(&mut self) -> Result<String> {
        let start = self.pos;
        let declared = self.u32()? as usize;
        if declared > self.remaining() {
            return Err(FrameError::TruncatedString {
                offset: start,
                declared,
                remaining: self.remaining(),
            });
        }
        let bytes = self.take(declared)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FrameError::InvalidUtf8 { offset: start })
    }

    pub fn vec3(&mut self) -> Result<Vec3> {
        Ok(Vec3::new(self.f32()?, self.f32()?, self.f32()?))
    }

    pub fn quat(&mut self) -> Result<Quat> {
        Ok(Quat::new(self.f32()?, self.f32()?, self.f32()?, self.f32()?))
    }

    /// Read a packed transform. Translation is scaled back from peer units.
    pub fn transform(&mut self) -> Result<Transform> {
        let translation = self.vec3()?.scale(1.0 / UNIT_SCALE);
        let rotation = self.quat()?;
        let scale = self.vec3()?;
        Ok(Transform::new(translation, rotation, scale))
    }

    pub fn f32_list(&mut self) -> Result<Vec<f32>> {
        let count = self.count(4)?;
        (0..count).map(|_| self.f32()).collect()
    }
}
