mod pixel_box;

pub use pixel_box::PixelBox;
