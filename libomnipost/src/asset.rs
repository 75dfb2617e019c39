//! Binary-size fitting for image attachments
//!
//! Providers with a hard payload ceiling pass the attachment through [`fit`]
//! before upload. Oversized images are re-encoded at decreasing quality until
//! one fits or the quality floor is reached.

use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;

use crate::error::AssetError;
use crate::types::{ImageAttachment, ImageMimeType};

/// Largest blob the decentralized-network provider accepts
pub const BLUESKY_CEILING: u64 = 976 * 1024;

/// First quality tried when recompressing
pub const START_QUALITY: u8 = 85;

/// Quality drop between attempts
pub const QUALITY_STEP: u8 = 10;

/// Recompression stops once quality would fall below this
pub const QUALITY_FLOOR: u8 = 30;

/// Lossy re-encoder used to shrink oversized images
pub trait Reencoder: Send + Sync {
    /// Encode `bytes` at `quality` (0-100). Must be deterministic.
    fn reencode(&self, bytes: &[u8], quality: u8) -> Result<Vec<u8>, AssetError>;

    /// MIME type of everything `reencode` produces
    fn output_mime(&self) -> ImageMimeType;
}

/// Decodes any supported format and re-encodes as baseline JPEG
#[derive(Debug, Default, Clone, Copy)]
pub struct JpegReencoder;

impl Reencoder for JpegReencoder {
    fn reencode(&self, bytes: &[u8], quality: u8) -> Result<Vec<u8>, AssetError> {
        let decoded =
            image::load_from_memory(bytes).map_err(|e| AssetError::Reencode(e.to_string()))?;
        // JPEG has no alpha channel
        let rgb = image::DynamicImage::ImageRgb8(decoded.to_rgb8());

        let mut out = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut out, quality);
        rgb.write_with_encoder(encoder)
            .map_err(|e| AssetError::Reencode(e.to_string()))?;
        Ok(out)
    }

    fn output_mime(&self) -> ImageMimeType {
        ImageMimeType::Jpeg
    }
}

/// Qualities tried in order: 85, 75, ... down to the floor
pub fn quality_ladder() -> impl Iterator<Item = u8> {
    (QUALITY_FLOOR..=START_QUALITY)
        .rev()
        .step_by(QUALITY_STEP as usize)
}

/// Return `bytes` unchanged if they fit within `ceiling`, otherwise the first
/// re-encoding that does.
///
/// Each attempt starts from the original bytes, so the result depends only on
/// the input and the re-encoder.
///
/// # Errors
///
/// `AssetError::TooLarge` when there is no re-encoder or no quality on the
/// ladder brings the image under the ceiling.
pub fn fit(
    bytes: &[u8],
    ceiling: u64,
    reencoder: Option<&dyn Reencoder>,
) -> Result<Vec<u8>, AssetError> {
    let actual = bytes.len() as u64;
    if actual <= ceiling {
        return Ok(bytes.to_vec());
    }

    let too_large = AssetError::TooLarge { actual, ceiling };
    let Some(reencoder) = reencoder else {
        return Err(too_large);
    };

    for quality in quality_ladder() {
        let candidate = reencoder.reencode(bytes, quality)?;
        tracing::debug!(
            quality,
            size = candidate.len(),
            ceiling,
            "Re-encoded oversized image"
        );
        if candidate.len() as u64 <= ceiling {
            return Ok(candidate);
        }
    }

    Err(too_large)
}

/// [`fit`] applied to an attachment; a re-encoded result takes the encoder's MIME type
pub fn fit_attachment(
    attachment: &ImageAttachment,
    ceiling: u64,
    reencoder: Option<&dyn Reencoder>,
) -> Result<ImageAttachment, AssetError> {
    if attachment.size_bytes() <= ceiling {
        return Ok(attachment.clone());
    }

    let bytes = fit(&attachment.bytes, ceiling, reencoder)?;
    // fit only returns early for fitting input, so a re-encoder produced these
    let mime_type = reencoder
        .map(|r| r.output_mime())
        .unwrap_or(attachment.mime_type);

    let fitted = ImageAttachment::new(bytes, mime_type);
    tracing::info!(
        from = attachment.size_bytes(),
        to = fitted.size_bytes(),
        "Image compressed to fit provider limit"
    );
    Ok(fitted)
}

/// Run [`fit_attachment`] on the blocking pool
pub async fn fit_attachment_blocking(
    attachment: ImageAttachment,
    ceiling: u64,
    reencoder: Option<Arc<dyn Reencoder>>,
) -> Result<ImageAttachment, AssetError> {
    if attachment.size_bytes() <= ceiling {
        return Ok(attachment);
    }

    tokio::task::spawn_blocking(move || fit_attachment(&attachment, ceiling, reencoder.as_deref()))
        .await
        .map_err(|e| AssetError::Reencode(format!("Image processing task join error: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Output length is `quality * scale`, recording each quality asked for
    struct ScalingReencoder {
        scale: usize,
        calls: Mutex<Vec<u8>>,
    }

    impl ScalingReencoder {
        fn new(scale: usize) -> Self {
            Self {
                scale,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<u8> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Reencoder for ScalingReencoder {
        fn reencode(&self, _bytes: &[u8], quality: u8) -> Result<Vec<u8>, AssetError> {
            self.calls.lock().unwrap().push(quality);
            Ok(vec![quality; quality as usize * self.scale])
        }

        fn output_mime(&self) -> ImageMimeType {
            ImageMimeType::Jpeg
        }
    }

    /// Never gets any smaller than its input
    struct StubbornReencoder;

    impl Reencoder for StubbornReencoder {
        fn reencode(&self, bytes: &[u8], _quality: u8) -> Result<Vec<u8>, AssetError> {
            Ok(bytes.to_vec())
        }

        fn output_mime(&self) -> ImageMimeType {
            ImageMimeType::Jpeg
        }
    }

    fn noisy_png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_fn(width, height, |x, y| {
            let v = (x.wrapping_mul(2654435761) ^ y.wrapping_mul(40503)) as u8;
            image::Rgba([v, v.wrapping_mul(3), v.wrapping_add(y as u8), 255])
        });
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_quality_ladder() {
        assert_eq!(quality_ladder().collect::<Vec<_>>(), vec![85, 75, 65, 55, 45, 35]);
    }

    #[test]
    fn test_fit_returns_small_input_unchanged() {
        let reencoder = ScalingReencoder::new(1);
        let bytes = vec![1u8; 100];
        let fitted = fit(&bytes, 100, Some(&reencoder)).unwrap();
        assert_eq!(fitted, bytes);
        assert!(reencoder.calls().is_empty());
    }

    #[test]
    fn test_fit_stops_at_first_fitting_quality() {
        let reencoder = ScalingReencoder::new(10);
        let bytes = vec![0u8; 5000];

        let fitted = fit(&bytes, 600, Some(&reencoder)).unwrap();

        assert_eq!(fitted.len(), 550);
        assert_eq!(reencoder.calls(), vec![85, 75, 65, 55]);
    }

    #[test]
    fn test_fit_without_reencoder_is_too_large() {
        let err = fit(&[0u8; 2048], 1024, None).unwrap_err();
        assert_eq!(
            err,
            AssetError::TooLarge {
                actual: 2048,
                ceiling: 1024
            }
        );
    }

    #[test]
    fn test_fit_with_never_shrinking_reencoder_exhausts_floor() {
        let bytes = vec![7u8; 4096];
        let err = fit(&bytes, 1024, Some(&StubbornReencoder)).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("4096 bytes"));
        assert!(message.contains("1024 bytes"));
        assert!(message.contains("resize the image manually"));
    }

    #[test]
    fn test_fit_tries_every_quality_down_to_floor() {
        let reencoder = ScalingReencoder::new(100);
        let err = fit(&[0u8; 10_000], 100, Some(&reencoder)).unwrap_err();
        assert!(matches!(err, AssetError::TooLarge { actual: 10_000, .. }));
        assert_eq!(reencoder.calls(), vec![85, 75, 65, 55, 45, 35]);
    }

    #[test]
    fn test_fit_is_idempotent() {
        let reencoder = ScalingReencoder::new(10);
        let bytes = vec![0u8; 5000];

        let once = fit(&bytes, 700, Some(&reencoder)).unwrap();
        let twice = fit(&once, 700, Some(&reencoder)).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let png = noisy_png(64, 64);
        let ceiling = png.len() as u64 - 1;
        let first = fit(&png, ceiling, Some(&JpegReencoder));
        let second = fit(&png, ceiling, Some(&JpegReencoder));
        assert_eq!(first, second);
    }

    #[test]
    fn test_jpeg_reencoder_emits_jpeg() {
        let png = noisy_png(32, 32);
        let jpeg = JpegReencoder.reencode(&png, 85).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.width(), 32);
    }

    #[test]
    fn test_jpeg_reencoder_rejects_garbage() {
        let err = JpegReencoder.reencode(b"definitely not an image", 85).unwrap_err();
        assert!(matches!(err, AssetError::Reencode(_)));
    }

    #[test]
    fn test_fit_attachment_switches_mime_after_reencode() {
        let mut attachment = ImageAttachment::new(vec![0u8; 5000], ImageMimeType::Png);
        attachment.public_url = Some("https://cdn.example/a.png".to_string());
        let reencoder = ScalingReencoder::new(10);

        let fitted = fit_attachment(&attachment, 900, Some(&reencoder)).unwrap();

        assert_eq!(fitted.mime_type, ImageMimeType::Jpeg);
        assert_eq!(fitted.name, "image.jpg");
        assert_eq!(fitted.size_bytes(), 850);
        assert!(fitted.public_url.is_none());
    }

    #[test]
    fn test_fit_attachment_keeps_fitting_attachment() {
        let attachment = ImageAttachment::new(vec![0u8; 10], ImageMimeType::Gif);
        let fitted = fit_attachment(&attachment, BLUESKY_CEILING, None).unwrap();
        assert_eq!(fitted, attachment);
    }

    #[tokio::test]
    async fn test_fit_attachment_blocking_runs_reencoder() {
        let attachment = ImageAttachment::new(vec![0u8; 5000], ImageMimeType::Png);
        let reencoder: Arc<dyn Reencoder> = Arc::new(ScalingReencoder::new(10));

        let fitted = fit_attachment_blocking(attachment, 800, Some(reencoder))
            .await
            .unwrap();

        assert_eq!(fitted.size_bytes(), 750);
    }
}
