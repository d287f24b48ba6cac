use image::imageops::{self, FilterType};
use ndarray::{Array, Ix4};
use thiserror::Error;

pub const INPUT_SIZE: u32 = 32;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Error reading image: {0}")]
    Read(#[from] std::io::Error),
    #[error("Error decoding image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Decodes `image_data` and lays it out as a `(1, 32, 32, 3)` NHWC tensor in `[0, 1]`.
///
/// The image is stretched to the input size, aspect ratio is not kept.
pub fn preprocess(image_data: &[u8]) -> Result<Array<f32, Ix4>, PreprocessError> {
    let image_reader =
        image::ImageReader::new(std::io::Cursor::new(image_data)).with_guessed_format()?;
    let original_img = image_reader.decode()?;

    let rgb = original_img.to_rgb8();
    let img = imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom);

    let size = INPUT_SIZE as usize;
    let mut input = Array::zeros((1, size, size, 3));
    for (x, y, pixel) in img.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = pixel.0;
        input[[0, y, x, 0]] = (r as f32) / 255.;
        input[[0, y, x, 1]] = (g as f32) / 255.;
        input[[0, y, x, 2]] = (b as f32) / 255.;
    }

    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, Rgb, Rgba};
    use std::io::Cursor;

    fn encode_png(img: DynamicImage) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();
        cursor.into_inner()
    }

    #[test]
    fn test_black_image_is_all_zeros() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(32, 32, Rgb([0, 0, 0]));
        let input = preprocess(&encode_png(img.into())).unwrap();

        assert_eq!(input.shape(), &[1, 32, 32, 3]);
        assert!(input.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_resizes_and_normalizes() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(100, 60, Rgb([255, 0, 0]));
        let input = preprocess(&encode_png(img.into())).unwrap();

        assert_eq!(input.shape(), &[1, 32, 32, 3]);
        assert!((input[[0, 10, 10, 0]] - 1.0).abs() < 1e-6);
        assert!(input[[0, 10, 10, 1]].abs() < 1e-6);
        assert!(input.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_alpha_channel_is_dropped() {
        let img = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_pixel(16, 16, Rgba([0, 0, 255, 128]));
        let input = preprocess(&encode_png(img.into())).unwrap();

        assert_eq!(input.shape(), &[1, 32, 32, 3]);
        assert!((input[[0, 0, 0, 2]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        let result = preprocess(b"definitely not an image");
        assert!(matches!(result, Err(PreprocessError::Decode(_))));
    }
}
