use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageFormat, ImageReader};

use crate::error::{ValidationError, ValidationErrors};
use crate::validation::check_file_name;

pub const MAX_IMAGE_BYTES: u64 = 50 * 1024 * 1024;
pub const MAX_IMAGE_DIMENSION: u32 = 10_000;

/// Image types accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Bmp,
}

impl ImageKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            "png" => Some(ImageKind::Png),
            "bmp" => Some(ImageKind::Bmp),
            _ => None,
        }
    }

    pub fn format(self) -> ImageFormat {
        match self {
            ImageKind::Jpeg => ImageFormat::Jpeg,
            ImageKind::Png => ImageFormat::Png,
            ImageKind::Bmp => ImageFormat::Bmp,
        }
    }

    pub fn is_supported_path(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
            .is_some()
    }
}

/// An upload that passed every image check, decoded once.
#[derive(Debug, Clone)]
pub struct ValidatedImage {
    pub file_name: String,
    pub kind: ImageKind,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub image: DynamicImage,
}

fn extension_of(file_name: &str) -> &str {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .unwrap_or("")
}

fn undecodable(reason: impl Into<String>) -> ValidationErrors {
    ValidationError::UndecodableImage {
        reason: reason.into(),
    }
    .into()
}

/// What an upload claims to be, checked from its name, size and header
/// without decoding any pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    pub file_name: String,
    pub kind: ImageKind,
    pub size: u64,
    pub width: u32,
    pub height: u32,
}

impl ImageHeader {
    /// Decode the pixels. This is the expensive step; the workbench runs it
    /// on the worker pool.
    pub fn decode(self, bytes: &[u8]) -> Result<ValidatedImage, ValidationErrors> {
        let image = image::load_from_memory_with_format(bytes, self.kind.format())
            .map_err(|e| undecodable(e.to_string()))?;
        Ok(ValidatedImage {
            file_name: self.file_name,
            kind: self.kind,
            size: self.size,
            width: self.width,
            height: self.height,
            image,
        })
    }
}

/// Every image check short of decoding the pixels.
///
/// Name, type and size problems are reported together; the content is only
/// inspected once those pass.
pub fn inspect_image(file_name: &str, bytes: &[u8]) -> Result<ImageHeader, ValidationErrors> {
    let mut errors = Vec::new();

    if let Err(err) = check_file_name(file_name) {
        errors.push(err);
    }

    let extension = extension_of(file_name);
    let kind = ImageKind::from_extension(extension);
    if kind.is_none() {
        errors.push(ValidationError::InvalidImageType {
            extension: extension.to_string(),
        });
    }

    let size = bytes.len() as u64;
    if size > MAX_IMAGE_BYTES {
        errors.push(ValidationError::ImageTooLarge {
            size,
            max: MAX_IMAGE_BYTES,
        });
    }

    let kind = match kind {
        Some(kind) if errors.is_empty() => kind,
        _ => return Err(ValidationErrors(errors)),
    };

    if bytes.is_empty() {
        return Err(undecodable("file is empty"));
    }

    let sniffed = image::guess_format(bytes)
        .map_err(|_| undecodable("content is not a recognised image format"))?;
    if sniffed != kind.format() {
        return Err(undecodable(format!(
            "content is {:?} but the file is named as {}",
            sniffed,
            extension.to_ascii_lowercase()
        )));
    }

    let (width, height) = ImageReader::with_format(Cursor::new(bytes), kind.format())
        .into_dimensions()
        .map_err(|e| undecodable(e.to_string()))?;
    if width == 0 || height == 0 {
        return Err(undecodable("image has no pixels"));
    }
    if width > MAX_IMAGE_DIMENSION || height > MAX_IMAGE_DIMENSION {
        return Err(ValidationError::ImageDimensionsExceeded {
            width,
            height,
            max: MAX_IMAGE_DIMENSION,
        }
        .into());
    }

    Ok(ImageHeader {
        file_name: file_name.to_string(),
        kind,
        size,
        width,
        height,
    })
}

/// Validate an uploaded image by name and content, decoding it once.
pub fn validate_image(file_name: &str, bytes: &[u8]) -> Result<ValidatedImage, ValidationErrors> {
    inspect_image(file_name, bytes)?.decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use image::{ImageBuffer, Rgb};

    fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, _| Rgb([x as u8, 0u8, 0u8]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, format)
            .expect("encode test image");
        out.into_inner()
    }

    #[test]
    fn accepts_each_supported_type() {
        for (name, format) in [
            ("a.png", ImageFormat::Png),
            ("b.JPG", ImageFormat::Jpeg),
            ("c.jpeg", ImageFormat::Jpeg),
            ("d.bmp", ImageFormat::Bmp),
        ] {
            let validated = validate_image(name, &encode(32, 16, format)).expect(name);
            assert_eq!((validated.width, validated.height), (32, 16));
            assert_eq!(validated.image.width(), 32);
        }
    }

    #[test]
    fn traversal_name_is_rejected_even_with_valid_content() {
        let err = validate_image("../../etc/passwd.jpg", &encode(8, 8, ImageFormat::Jpeg))
            .unwrap_err();
        assert_eq!(err.kinds(), vec![ErrorKind::UnsafeFileName]);
    }

    #[test]
    fn unsupported_extension() {
        let err = validate_image("anim.gif", &encode(8, 8, ImageFormat::Png)).unwrap_err();
        assert_eq!(err.kinds(), vec![ErrorKind::InvalidImageType]);

        let err = validate_image("noext", &encode(8, 8, ImageFormat::Png)).unwrap_err();
        assert_eq!(err.kinds(), vec![ErrorKind::InvalidImageType]);
    }

    #[test]
    fn name_and_type_errors_are_collected() {
        let err = validate_image("x|y.tiff", &[1, 2, 3]).unwrap_err();
        assert_eq!(
            err.kinds(),
            vec![ErrorKind::UnsafeFileName, ErrorKind::InvalidImageType]
        );
    }

    #[test]
    fn magic_bytes_must_match_extension() {
        let err = validate_image("photo.jpg", &encode(8, 8, ImageFormat::Png)).unwrap_err();
        assert_eq!(err.kinds(), vec![ErrorKind::UndecodableImage]);
    }

    #[test]
    fn garbage_and_empty_content_are_undecodable() {
        let err = validate_image("photo.png", b"definitely not an image").unwrap_err();
        assert_eq!(err.kinds(), vec![ErrorKind::UndecodableImage]);

        let err = validate_image("photo.png", &[]).unwrap_err();
        assert_eq!(err.kinds(), vec![ErrorKind::UndecodableImage]);
    }

    #[test]
    fn truncated_png_is_undecodable() {
        let mut bytes = encode(64, 64, ImageFormat::Png);
        bytes.truncate(bytes.len() / 2);
        let err = validate_image("cut.png", &bytes).unwrap_err();
        assert_eq!(err.kinds(), vec![ErrorKind::UndecodableImage]);
    }

    #[test]
    fn inspection_reads_the_header_only() {
        // Cut into the pixel data, leaving the header chunks whole
        let mut bytes = encode(64, 48, ImageFormat::Png);
        bytes.truncate(bytes.len() - 20);

        let header = inspect_image("cut.png", &bytes).expect("header is intact");
        assert_eq!((header.kind, header.width, header.height), (ImageKind::Png, 64, 48));

        let err = header.decode(&bytes).unwrap_err();
        assert_eq!(err.kinds(), vec![ErrorKind::UndecodableImage]);
    }

    #[test]
    fn oversized_dimensions_are_rejected_from_header() {
        let bytes = encode(10_001, 1, ImageFormat::Png);
        let err = validate_image("wide.png", &bytes).unwrap_err();
        assert_eq!(err.kinds(), vec![ErrorKind::ImageDimensionsExceeded]);
    }

    #[test]
    fn oversized_payload_is_rejected_before_decoding() {
        let bytes = vec![0u8; (MAX_IMAGE_BYTES + 1) as usize];
        let err = validate_image("huge.png", &bytes).unwrap_err();
        assert_eq!(err.kinds(), vec![ErrorKind::ImageTooLarge]);
    }
}
