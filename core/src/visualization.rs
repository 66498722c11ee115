use anyhow::{Context, Result};
use base64::Engine;
use image::{codecs::png::PngEncoder, ColorType, ImageEncoder};

/// Encode a planar RGB image (three `width * height` planes, values in [0, 1]) as a PNG data URL.
///
/// Planar is the layout convolution inputs use; the planes are interleaved for the encoder.
pub fn encode_planar_rgb_png_data_url(width: u32, height: u32, planes: &[f32]) -> Result<String> {
    let plane_len = (width * height) as usize;
    if planes.len() != plane_len * 3 {
        anyhow::bail!(
            "pixel buffer length {} does not match RGB image size {}x{}",
            planes.len(),
            width,
            height
        );
    }

    let mut encoded = Vec::with_capacity(plane_len * 3);
    for pixel in 0..plane_len {
        for channel in 0..3 {
            let value = planes[channel * plane_len + pixel].clamp(0.0, 1.0);
            encoded.push((value * 255.0).round() as u8);
        }
    }

    let mut buffer = Vec::new();
    let encoder = PngEncoder::new(&mut buffer);
    encoder
        .write_image(&encoded, width, height, ColorType::Rgb8)
        .context("failed to encode RGB PNG data")?;

    let base64 = base64::engine::general_purpose::STANDARD.encode(&buffer);
    Ok(format!("data:image/png;base64,{base64}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_png_data_url() {
        let planes = vec![0.5f32; 2 * 2 * 3];
        let url = encode_planar_rgb_png_data_url(2, 2, &planes).unwrap();
        assert!(url.starts_with("data:image/png;base64,"));

        let payload = url.trim_start_matches("data:image/png;base64,");
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn rejects_wrong_buffer_length() {
        assert!(encode_planar_rgb_png_data_url(2, 2, &[0.0; 4]).is_err());
    }
}
