//! Image output

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use nalgebra::Vector2;

/// Write binary PPM, `rgb` holds row-major RGB triplets
pub fn write_ppm<P: AsRef<Path>>(path: P, size: Vector2<usize>, rgb: &[u8]) -> io::Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    write_ppm_to(&mut w, size, rgb)?;
    w.flush()
}

pub fn write_ppm_to<W: Write>(w: &mut W, size: Vector2<usize>, rgb: &[u8]) -> io::Result<()> {
    if rgb.len() != size.x * size.y * 3 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "pixel data does not match image size",
        ));
    }
    write!(w, "P6\n{} {}\n255\n", size.x, size.y)?;
    w.write_all(rgb)
}
