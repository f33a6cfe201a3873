//! # Elevation Stream Communications Module
//!
//! Elevation images are published as 16 bit greyscale frames, where the intensity of a pixel maps
//! linearly onto a height between a configured minimum and maximum.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::convert::TryFrom;

use base64::DecodeError;
use byteorder::{BigEndian, ByteOrder};
use chrono::{serde::ts_milliseconds, DateTime, Utc};
use image::{ImageBuffer, Luma};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A serialisable elevation image frame
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ElevationFrame {
    /// UTC timestamp at which the frame was acquired
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Width of the image in pixels
    pub width: u32,

    /// Height of the image in pixels
    pub height: u32,

    /// The formatted image data, encoded in base64, by first flattening the 16 bit image, then
    /// converting to a bigendian Vec<u8>, then encoding in base64.
    pub b64_data: String,
}

/// A decoded elevation image.
#[derive(Debug, Clone)]
pub struct ElevationImage {
    /// UTC timestamp at which the frame was acquired
    pub timestamp: DateTime<Utc>,

    /// The 16 bit greyscale image, full scale intensity is the maximum height.
    pub image: ImageBuffer<Luma<u16>, Vec<u16>>,
}

// -----------------------------------------------------------------------------------------------
// ENUMS
// -----------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, Clone)]
pub enum ElevationFrameError {
    #[error("Failed to decode elevation image from base64: {0}")]
    DecodeError(DecodeError),

    #[error("The encoded frame data was the wrong size")]
    FrameWrongSize,
}

// -----------------------------------------------------------------------------------------------
// IMPLS
// -----------------------------------------------------------------------------------------------

impl TryFrom<ElevationFrame> for ElevationImage {
    type Error = ElevationFrameError;

    fn try_from(frame: ElevationFrame) -> Result<Self, Self::Error> {
        let bytes = base64::decode(frame.b64_data).map_err(ElevationFrameError::DecodeError)?;

        if bytes.len() % 2 != 0 {
            return Err(ElevationFrameError::FrameWrongSize);
        }

        // Put those bytes (which are bigendian) into a buffer
        let mut buff = vec![0u16; bytes.len() / 2];
        BigEndian::read_u16_into(&bytes, &mut buff);

        let image = ImageBuffer::from_raw(frame.width, frame.height, buff)
            .ok_or(ElevationFrameError::FrameWrongSize)?;

        Ok(Self {
            timestamp: frame.timestamp,
            image,
        })
    }
}

impl From<&ElevationImage> for ElevationFrame {
    fn from(img: &ElevationImage) -> Self {
        let raw = img.image.as_raw();
        let mut bytes = vec![0u8; raw.len() * 2];
        BigEndian::write_u16_into(raw, &mut bytes);

        Self {
            timestamp: img.timestamp,
            width: img.image.width(),
            height: img.image.height(),
            b64_data: base64::encode(bytes),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_frame_decoding() {
        let image = ImageBuffer::from_fn(3, 2, |x, y| Luma([(x * 1000 + y) as u16]));
        let elev = ElevationImage {
            timestamp: Utc::now(),
            image,
        };

        let frame = ElevationFrame::from(&elev);
        assert_eq!(frame.width, 3);
        assert_eq!(frame.height, 2);

        let decoded = ElevationImage::try_from(frame).unwrap();
        assert_eq!(decoded.image.get_pixel(2, 1).0[0], 2001);
        assert_eq!(decoded.image.get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn test_frame_wrong_size() {
        let frame = ElevationFrame {
            timestamp: Utc::now(),
            width: 4,
            height: 4,
            b64_data: base64::encode(vec![0u8; 6]),
        };

        assert!(matches!(
            ElevationImage::try_from(frame),
            Err(ElevationFrameError::FrameWrongSize)
        ));
    }
}
