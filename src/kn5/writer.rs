use std::io::{self, Write};

use glam::{Mat4, Vec2, Vec3, Vec4};

/// Appends little-endian KN5 primitives to an output sink.
#[derive(Debug)]
pub struct Kn5Writer<W: Write> {
    sink: W,
    written: u64,
}

impl<W: Write> Kn5Writer<W> {
    pub fn new(sink: W) -> Self {
        Self { sink, written: 0 }
    }

    /// Number of bytes appended so far.
    pub fn position(&self) -> u64 {
        self.written
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.sink.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> io::Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_i32(&mut self, value: i32) -> io::Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u16(&mut self, value: u16) -> io::Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u8(&mut self, value: u8) -> io::Result<()> {
        self.write_bytes(&[value])
    }

    pub fn write_bool(&mut self, value: bool) -> io::Result<()> {
        self.write_u8(u8::from(value))
    }

    pub fn write_f32(&mut self, value: f32) -> io::Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_vec2(&mut self, value: Vec2) -> io::Result<()> {
        self.write_f32(value.x)?;
        self.write_f32(value.y)
    }

    pub fn write_vec3(&mut self, value: Vec3) -> io::Result<()> {
        self.write_f32(value.x)?;
        self.write_f32(value.y)?;
        self.write_f32(value.z)
    }

    pub fn write_vec4(&mut self, value: Vec4) -> io::Result<()> {
        self.write_f32(value.x)?;
        self.write_f32(value.y)?;
        self.write_f32(value.z)?;
        self.write_f32(value.w)
    }

    /// Collection length as `u32`.
    pub fn write_len(&mut self, len: usize) -> io::Result<()> {
        let len = u32::try_from(len).map_err(|_| too_long(len))?;
        self.write_u32(len)
    }

    /// Collection length as `i32`, used by the texture and material sections.
    pub fn write_len_i32(&mut self, len: usize) -> io::Result<()> {
        let len = i32::try_from(len).map_err(|_| too_long(len))?;
        self.write_i32(len)
    }

    /// Length-prefixed UTF-8, no terminator.
    pub fn write_string(&mut self, value: &str) -> io::Result<()> {
        self.write_blob(value.as_bytes())
    }

    /// Length-prefixed raw bytes.
    pub fn write_blob(&mut self, data: &[u8]) -> io::Result<()> {
        self.write_len(data.len())?;
        self.write_bytes(data)
    }

    /// Sixteen floats, column by column.
    pub fn write_matrix(&mut self, matrix: &Mat4) -> io::Result<()> {
        for value in matrix.to_cols_array() {
            self.write_f32(value)?;
        }
        Ok(())
    }
}

fn too_long(len: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("length {len} does not fit a 32-bit prefix"),
    )
}
