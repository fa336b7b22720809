//! Explicit little-endian serialisation helpers for GPU records.
//!
//! GPU records are written field by field rather than by casting host
//! structs, so layouts do not depend on host endianness or padding.

use crate::error::{Error, Result};
use glam::{IVec3, Mat4, Vec3, Vec4};

/// Growable little-endian byte sink.
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    #[inline]
    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    #[inline]
    pub fn f32(&mut self, v: f32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Three floats followed by `w`.
    pub fn vec3(&mut self, v: Vec3, w: f32) -> &mut Self {
        self.f32(v.x).f32(v.y).f32(v.z).f32(w)
    }

    pub fn vec4(&mut self, v: Vec4) -> &mut Self {
        self.f32(v.x).f32(v.y).f32(v.z).f32(v.w)
    }

    pub fn ivec3(&mut self, v: IVec3) -> &mut Self {
        self.i32(v.x).i32(v.y).i32(v.z)
    }

    /// Column-major 4x4 matrix.
    pub fn mat4(&mut self, m: &Mat4) -> &mut Self {
        for v in m.to_cols_array() {
            self.f32(v);
        }
        self
    }

    /// Zero padding.
    pub fn pad(&mut self, bytes: usize) -> &mut Self {
        self.buf.resize(self.buf.len() + bytes, 0);
        self
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over little-endian bytes, used to decode readbacks.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let bytes = self.buf.get(self.pos..end).ok_or(Error::ShortRecord {
            wanted: N,
            offset: self.pos,
            len: self.buf.len(),
        })?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    pub fn i32(&mut self) -> Result<i32> {
        self.take::<4>().map(i32::from_le_bytes)
    }

    pub fn f32(&mut self) -> Result<f32> {
        self.take::<4>().map(f32::from_le_bytes)
    }

    pub fn ivec3(&mut self) -> Result<IVec3> {
        Ok(IVec3::new(self.i32()?, self.i32()?, self.i32()?))
    }

    pub fn vec4(&mut self) -> Result<Vec4> {
        Ok(Vec4::new(self.f32()?, self.f32()?, self.f32()?, self.f32()?))
    }

    pub fn mat4(&mut self) -> Result<Mat4> {
        let mut cols = [0.0f32; 16];
        for v in &mut cols {
            *v = self.f32()?;
        }
        Ok(Mat4::from_cols_array(&cols))
    }

    pub fn skip(&mut self, bytes: usize) -> Result<()> {
        if self.pos + bytes > self.buf.len() {
            return Err(Error::ShortRecord {
                wanted: bytes,
                offset: self.pos,
                len: self.buf.len(),
            });
        }
        self.pos += bytes;
        Ok(())
    }

    pub const fn position(&self) -> usize {
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_little_endian() {
        let mut w = ByteWriter::new();
        w.u32(0x0102_0304).i32(-1);
        assert_eq!(w.as_slice(), &[4, 3, 2, 1, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn matrix_is_column_major() {
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let mut w = ByteWriter::new();
        w.mat4(&m);
        let bytes = w.into_vec();
        assert_eq!(bytes.len(), 64);
        // Translation lives in the fourth column (floats 12..15).
        assert_eq!(f32::from_le_bytes([bytes[48], bytes[49], bytes[50], bytes[51]]), 1.0);
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.mat4().unwrap(), m);
    }

    #[test]
    fn reader_reports_truncation() {
        let mut r = ByteReader::new(&[1, 2, 3]);
        assert!(r.u32().is_err());
        assert!(r.skip(4).is_err());
    }
}
