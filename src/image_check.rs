//! Poster image format sniffing.
//!
//! Only the header bytes are inspected; nothing is decoded. Anything that is
//! not a recognized BMP, GIF, JPEG or PNG header is [`ImageFormat::Unknown`].

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Bmp,
    Gif,
    Jpeg,
    Png,
    Unknown,
}

impl ImageFormat {
    pub fn name(&self) -> &'static str {
        match self {
            ImageFormat::Bmp => "BMP",
            ImageFormat::Gif => "GIF",
            ImageFormat::Jpeg => "JPEG",
            ImageFormat::Png => "PNG",
            ImageFormat::Unknown => "Unknown",
        }
    }

    /// Case-insensitive lookup of a configured format name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "BMP" => Some(ImageFormat::Bmp),
            "GIF" => Some(ImageFormat::Gif),
            "JPEG" | "JPG" => Some(ImageFormat::Jpeg),
            "PNG" => Some(ImageFormat::Png),
            _ => None,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identify the encoded image format of `bytes`. Never fails.
pub fn identify(bytes: &[u8]) -> ImageFormat {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Bmp) => ImageFormat::Bmp,
        Ok(image::ImageFormat::Gif) => ImageFormat::Gif,
        Ok(image::ImageFormat::Jpeg) => ImageFormat::Jpeg,
        Ok(image::ImageFormat::Png) => ImageFormat::Png,
        _ => ImageFormat::Unknown,
    }
}
