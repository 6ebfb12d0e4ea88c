use nalgebra::{Vector2, Vector3};

use crate::{
    color::RGBA,
    common::PixelBox,
    serial::{Serial, SerialBuffer, SerialError},
    tile::{Tile, TileColor, TILE_PIXELS},
};

use super::WorkError;

/// Worker to owner: one partial contribution for a tile owned by another rank.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteTileMessage {
    pub tile: Tile,
}

impl WriteTileMessage {
    pub fn new(tile: Tile) -> Self {
        Self { tile }
    }

    pub fn serialize(&self, buf: &mut SerialBuffer) {
        let t = &self.tile;
        buf.put(&t.region);
        buf.put(&t.fb_size);
        buf.put(&t.generation);
        buf.put(&t.children);
        buf.put(&t.accum_id);
        buf.put(&t.r);
        buf.put(&t.g);
        buf.put(&t.b);
        buf.put(&t.a);
        buf.put(&t.z);
        buf.put(&t.normal);
        buf.put(&t.albedo);
    }

    pub fn deserialize(buf: &mut SerialBuffer) -> Result<Self, WorkError> {
        let region: PixelBox = buf.get()?;
        let fb_size: Vector2<usize> = buf.get()?;
        let generation = buf.get()?;
        let children = buf.get()?;
        let accum_id = buf.get()?;
        let r = pixel_channel(buf)?;
        let g = pixel_channel(buf)?;
        let b = pixel_channel(buf)?;
        let a = pixel_channel(buf)?;
        let z = pixel_channel(buf)?;
        let normal = pixel_channel::<Vector3<f32>>(buf)?;
        let albedo = pixel_channel::<Vector3<f32>>(buf)?;
        let tile = Tile {
            region,
            fb_size,
            r,
            g,
            b,
            a,
            z,
            normal,
            albedo,
            generation,
            children,
            accum_id,
        };
        if !tile.is_well_formed() {
            return Err(WorkError::InvalidPayload(format!(
                "tile region {:?} is not a grid cell of a {}x{} framebuffer",
                tile.region, fb_size.x, fb_size.y
            )));
        }
        Ok(Self { tile })
    }
}

/// Owner to master: finished tile with its converted colors and error estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterTileMessage {
    /// Lower corner of the tile in pixels
    pub coords: Vector2<usize>,
    pub error: f32,
    pub color: TileColor,
}

impl MasterTileMessage {
    pub fn new(coords: Vector2<usize>, error: f32, color: TileColor) -> Self {
        Self {
            coords,
            error,
            color,
        }
    }

    pub fn serialize(&self, buf: &mut SerialBuffer) {
        buf.put(&self.coords);
        buf.put(&self.error);
        match &self.color {
            TileColor::None => (),
            TileColor::Rgba8(pixels) => buf.put(pixels),
            TileColor::Rgba32F(pixels) => buf.put(pixels),
        }
    }

    /// Payload shape depends on the tag the message arrived with
    pub fn deserialize(buf: &mut SerialBuffer, format: MasterPayload) -> Result<Self, WorkError> {
        let coords = buf.get()?;
        let error = buf.get()?;
        let color = match format {
            MasterPayload::None => TileColor::None,
            MasterPayload::Rgba8 => TileColor::Rgba8(pixel_channel::<u32>(buf)?),
            MasterPayload::Rgba32F => TileColor::Rgba32F(pixel_channel::<RGBA>(buf)?),
        };
        Ok(Self {
            coords,
            error,
            color,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterPayload {
    None,
    Rgba8,
    Rgba32F,
}

fn pixel_channel<T: Serial>(buf: &mut SerialBuffer) -> Result<Vec<T>, WorkError> {
    let channel: Vec<T> = buf.get()?;
    if channel.len() != TILE_PIXELS {
        return Err(WorkError::InvalidPayload(format!(
            "pixel channel holds {} values, expected {TILE_PIXELS}",
            channel.len()
        )));
    }
    Ok(channel)
}

impl Serial for PixelBox {
    fn write_to(&self, buf: &mut SerialBuffer) {
        self.lower().write_to(buf);
        self.upper().write_to(buf);
    }

    fn read_from(buf: &mut SerialBuffer) -> Result<Self, SerialError> {
        let lower: Vector2<usize> = buf.get()?;
        let upper: Vector2<usize> = buf.get()?;
        Ok(PixelBox::new(lower.x..upper.x, lower.y..upper.y))
    }
}
