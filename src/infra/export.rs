//! PNG export of rendered equation bitmaps.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use crate::domain::vector::Bitmap;

use super::error::InfraError;

/// Write `bitmap` as an 8-bit RGBA PNG. Degenerate bitmaps are refused.
pub fn write_png(path: &Path, bitmap: &Bitmap) -> Result<(), InfraError> {
    if bitmap.is_degenerate() {
        return Err(InfraError::encode(format!(
            "refusing to encode {}x{} bitmap with {} bytes",
            bitmap.width(),
            bitmap.height(),
            bitmap.byte_len()
        )));
    }

    let mut writer = BufWriter::new(File::create(path)?);
    {
        let mut encoder = png::Encoder::new(&mut writer, bitmap.width(), bitmap.height());
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_compression(png::Compression::Fast);

        let mut png_writer = encoder
            .write_header()
            .map_err(|err| InfraError::encode(err.to_string()))?;
        png_writer
            .write_image_data(&bitmap.to_straight_rgba())
            .map_err(|err| InfraError::encode(err.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}
