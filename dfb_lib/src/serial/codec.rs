use byteorder::{ByteOrder, LittleEndian};
use nalgebra::{vector, Scalar, Vector2, Vector3, Vector4};

use super::{SerialBuffer, SerialError};

/// Typed stream layer over [`SerialBuffer`].
///
/// Scalars are written as their raw little-endian bytes, sequences get a `u64`
/// length prefix.
pub trait Serial: Sized {
    fn write_to(&self, buf: &mut SerialBuffer);
    fn read_from(buf: &mut SerialBuffer) -> Result<Self, SerialError>;
}

macro_rules! serial_scalar {
    ($t:ty, $size:expr, $write:path, $read:path) => {
        impl Serial for $t {
            fn write_to(&self, buf: &mut SerialBuffer) {
                let mut bytes = [0; $size];
                $write(&mut bytes, *self);
                buf.write(&bytes);
            }

            fn read_from(buf: &mut SerialBuffer) -> Result<Self, SerialError> {
                let bytes = buf.take($size)?;
                Ok($read(bytes))
            }
        }
    };
}

serial_scalar!(u16, 2, LittleEndian::write_u16, LittleEndian::read_u16);
serial_scalar!(u32, 4, LittleEndian::write_u32, LittleEndian::read_u32);
serial_scalar!(u64, 8, LittleEndian::write_u64, LittleEndian::read_u64);
serial_scalar!(i32, 4, LittleEndian::write_i32, LittleEndian::read_i32);
serial_scalar!(i64, 8, LittleEndian::write_i64, LittleEndian::read_i64);
serial_scalar!(f32, 4, LittleEndian::write_f32, LittleEndian::read_f32);
serial_scalar!(f64, 8, LittleEndian::write_f64, LittleEndian::read_f64);

impl Serial for u8 {
    fn write_to(&self, buf: &mut SerialBuffer) {
        buf.write(&[*self]);
    }

    fn read_from(buf: &mut SerialBuffer) -> Result<Self, SerialError> {
        Ok(buf.take(1)?[0])
    }
}

impl Serial for bool {
    fn write_to(&self, buf: &mut SerialBuffer) {
        (*self as u8).write_to(buf);
    }

    fn read_from(buf: &mut SerialBuffer) -> Result<Self, SerialError> {
        Ok(u8::read_from(buf)? != 0)
    }
}

// Sizes travel as 64 bit values
impl Serial for usize {
    fn write_to(&self, buf: &mut SerialBuffer) {
        (*self as u64).write_to(buf);
    }

    fn read_from(buf: &mut SerialBuffer) -> Result<Self, SerialError> {
        Ok(u64::read_from(buf)? as usize)
    }
}

impl<T: Serial + Scalar + Copy> Serial for Vector2<T> {
    fn write_to(&self, buf: &mut SerialBuffer) {
        self.x.write_to(buf);
        self.y.write_to(buf);
    }

    fn read_from(buf: &mut SerialBuffer) -> Result<Self, SerialError> {
        let x = T::read_from(buf)?;
        let y = T::read_from(buf)?;
        Ok(vector![x, y])
    }
}

impl Serial for Vector3<f32> {
    fn write_to(&self, buf: &mut SerialBuffer) {
        let mut bytes = [0; 12];
        LittleEndian::write_f32_into(self.as_slice(), &mut bytes);
        buf.write(&bytes);
    }

    fn read_from(buf: &mut SerialBuffer) -> Result<Self, SerialError> {
        let bytes = buf.take(12)?;
        let mut v = [0.0; 3];
        LittleEndian::read_f32_into(bytes, &mut v);
        Ok(Vector3::from(v))
    }
}

impl Serial for Vector4<f32> {
    fn write_to(&self, buf: &mut SerialBuffer) {
        let mut bytes = [0; 16];
        LittleEndian::write_f32_into(self.as_slice(), &mut bytes);
        buf.write(&bytes);
    }

    fn read_from(buf: &mut SerialBuffer) -> Result<Self, SerialError> {
        let bytes = buf.take(16)?;
        let mut v = [0.0; 4];
        LittleEndian::read_f32_into(bytes, &mut v);
        Ok(Vector4::from(v))
    }
}

impl<T: Serial> Serial for Vec<T> {
    fn write_to(&self, buf: &mut SerialBuffer) {
        self.len().write_to(buf);
        for item in self {
            item.write_to(buf);
        }
    }

    fn read_from(buf: &mut SerialBuffer) -> Result<Self, SerialError> {
        let len = usize::read_from(buf)?;
        // Do not trust the prefix for the allocation, every element takes at least one byte
        let mut v = Vec::with_capacity(len.min(buf.remaining()));
        for _ in 0..len {
            v.push(T::read_from(buf)?);
        }
        Ok(v)
    }
}

impl Serial for String {
    fn write_to(&self, buf: &mut SerialBuffer) {
        self.len().write_to(buf);
        buf.write(self.as_bytes());
    }

    fn read_from(buf: &mut SerialBuffer) -> Result<Self, SerialError> {
        let len = usize::read_from(buf)?;
        let bytes = buf.take(len)?.to_vec();
        String::from_utf8(bytes).map_err(|_| SerialError::InvalidString)
    }
}
