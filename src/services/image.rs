use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, ImageReader};
use std::io::Cursor;
use std::path::Path;

use crate::core::error::{Result, StoryError};

/// An image checked to be decodable, ready to be sent inline to a model.
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload {
    bytes: Vec<u8>,
    mime_type: &'static str,
    width: u32,
    height: u32,
}

impl std::fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePayload")
            .field("mime_type", &self.mime_type)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl ImagePayload {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(StoryError::Precondition("image payload is empty".to_string()));
        }

        let format = image::guess_format(bytes).map_err(|e| {
            StoryError::Precondition(format!("image payload has an unknown format: {}", e))
        })?;
        let mime_type = mime_for_format(format).ok_or_else(|| {
            StoryError::Precondition(format!("unsupported image format: {:?}", format))
        })?;

        let (width, height) = ImageReader::with_format(Cursor::new(bytes), format)
            .into_dimensions()
            .map_err(|e| StoryError::Precondition(format!("image payload is not decodable: {}", e)))?;
        if width == 0 || height == 0 {
            return Err(StoryError::Precondition("image has no pixels".to_string()));
        }

        Ok(Self {
            bytes: bytes.to_vec(),
            mime_type,
            width,
            height,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            StoryError::Precondition(format!("failed to read image {}: {}", path.display(), e))
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

fn mime_for_format(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Gif => Some("image/gif"),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) fn sample_png() -> Vec<u8> {
    use image::{DynamicImage, Rgb, RgbImage};

    let mut img = RgbImage::new(4, 3);
    for pixel in img.pixels_mut() {
        *pixel = Rgb([240, 248, 255]);
    }
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_payload() {
        let payload = ImagePayload::from_bytes(&sample_png()).unwrap();
        assert_eq!(payload.mime_type(), "image/png");
        assert_eq!(payload.dimensions(), (4, 3));
        assert!(payload.to_data_url().starts_with("data:image/png;base64,iVBORw0KGgo"));
    }

    #[test]
    fn test_rejects_empty_and_garbage() {
        assert!(matches!(
            ImagePayload::from_bytes(&[]),
            Err(StoryError::Precondition(_))
        ));
        assert!(matches!(
            ImagePayload::from_bytes(b"definitely not an image"),
            Err(StoryError::Precondition(_))
        ));
    }

    #[test]
    fn test_rejects_truncated_png() {
        let png = sample_png();
        assert!(ImagePayload::from_bytes(&png[..12]).is_err());
    }

    #[test]
    fn test_from_missing_path() {
        let err = ImagePayload::from_path(Path::new("/nonexistent/story.png")).unwrap_err();
        assert!(matches!(err, StoryError::Precondition(_)));
    }
}
