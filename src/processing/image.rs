use crate::processing::geometry::Rect;
use crate::utils::PassportError;
use image::{DynamicImage, GenericImageView};

/// Frame helpers shared by the alignment engine and the frame pipeline.
pub struct ImageProcessor;

impl ImageProcessor {
    /// Whole-frame rectangle in pixel coordinates.
    pub fn bounds(img: &DynamicImage) -> Rect {
        let (width, height) = img.dimensions();
        Rect::new(0.0, 0.0, width as f32, height as f32)
    }

    /// Crop to a rectangle given in the image's own pixel space. The rect
    /// is clamped to the image; an empty result is an error.
    pub fn crop(img: &DynamicImage, rect: &Rect) -> Result<DynamicImage, PassportError> {
        let clamped = rect
            .intersection(&Self::bounds(img))
            .ok_or_else(|| PassportError::ImageProcessingError(format!("Crop region {:?} outside image", rect)))?;
        let x = clamped.x.floor() as u32;
        let y = clamped.y.floor() as u32;
        let width = (clamped.right().ceil() as u32).saturating_sub(x);
        let height = (clamped.bottom().ceil() as u32).saturating_sub(y);
        if width == 0 || height == 0 {
            return Err(PassportError::ImageProcessingError(format!("Empty crop region {:?}", rect)));
        }
        Ok(img.crop_imm(x, y, width, height))
    }
}
