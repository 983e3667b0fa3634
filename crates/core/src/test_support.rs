//! Shared fixtures for unit tests.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Write a 1x1 RGB PNG carrying the given `tEXt` chunks.
pub fn write_png(path: &Path, chunks: &[(&str, &str)]) {
    let file = File::create(path).unwrap();
    let mut encoder = png::Encoder::new(BufWriter::new(file), 1, 1);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    for (keyword, text) in chunks {
        encoder
            .add_text_chunk(keyword.to_string(), text.to_string())
            .unwrap();
    }
    let mut writer = encoder.write_header().unwrap();
    writer.write_image_data(&[0, 0, 0]).unwrap();
    writer.finish().unwrap();
}
