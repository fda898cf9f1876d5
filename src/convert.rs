//! RAW → JPEG conversion and thumbnail rendering.

use anyhow::{Context, Result, bail};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// JPEG quality used for converted renditions.
pub const MAX_QUALITY: u8 = 100;

/// Decode image bytes, picking the largest picture the file holds.
///
/// TIFF-based RAWs (DNG, NEF, ARW, PEF) decode directly to their small IFD0
/// thumbnail, and most other RAWs do not decode at all, so every embedded JPEG
/// preview is considered too. Plain JPEGs decode as-is.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    let direct = image::load_from_memory(bytes);
    if matches!(image::guess_format(bytes), Ok(ImageFormat::Jpeg)) {
        return direct.context("Failed to decode JPEG");
    }

    match (direct, largest_embedded_preview(bytes)) {
        (Ok(img), Some(preview)) if pixels(&preview) > pixels(&img) => {
            log::debug!(
                "Using embedded {}x{} preview over {}x{} direct decode",
                preview.width(),
                preview.height(),
                img.width(),
                img.height()
            );
            Ok(preview)
        }
        (Ok(img), _) => Ok(img),
        (Err(_), Some(preview)) => Ok(preview),
        (Err(e), None) => bail!("Unsupported image data and no embedded JPEG preview: {e}"),
    }
}

fn pixels(img: &DynamicImage) -> u64 {
    u64::from(img.width()) * u64::from(img.height())
}

/// Encode `img` as a JPEG at maximum quality.
pub fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut out), MAX_QUALITY);
    img.to_rgb8()
        .write_with_encoder(encoder)
        .context("Failed to encode JPEG")?;
    Ok(out)
}

/// Convert the RAW file at `raw_path` into a JPEG at `jpeg_path`.
///
/// CPU-bound; runs on the blocking pool.
pub async fn convert_raw_to_jpeg(raw_path: PathBuf, jpeg_path: PathBuf) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || convert_raw_to_jpeg_blocking(&raw_path, &jpeg_path))
        .await
        .context("Conversion task failed")?
}

fn convert_raw_to_jpeg_blocking(raw_path: &Path, jpeg_path: &Path) -> Result<PathBuf> {
    let bytes = std::fs::read(raw_path)
        .with_context(|| format!("Failed to read {}", raw_path.display()))?;
    let img = decode_image(&bytes)?;
    let jpeg = encode_jpeg(&img)?;
    std::fs::write(jpeg_path, jpeg)
        .with_context(|| format!("Failed to write {}", jpeg_path.display()))?;
    log::debug!(
        "Converted {} to {} ({}x{})",
        raw_path.display(),
        jpeg_path.display(),
        img.width(),
        img.height()
    );
    Ok(jpeg_path.to_path_buf())
}

/// Render a JPEG thumbnail fitting in `size`×`size`.
pub fn thumbnail_jpeg(bytes: &[u8], size: u32) -> Result<Vec<u8>> {
    let img = decode_image(bytes)?;
    encode_jpeg(&img.thumbnail(size, size))
}

/// Decode embedded JPEGs largest-first and return the first that decodes.
fn largest_embedded_preview(buffer: &[u8]) -> Option<DynamicImage> {
    embedded_jpegs(buffer).into_iter().find_map(|jpeg| {
        match image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg) {
            Ok(img) => Some(img),
            Err(e) => {
                log::debug!("Skipping undecodable {} byte preview: {e}", jpeg.len());
                None
            }
        }
    })
}

/// Every well-formed JPEG stream in `buffer`, largest first.
fn embedded_jpegs(buffer: &[u8]) -> Vec<&[u8]> {
    const SOI: &[u8] = b"\xff\xd8\xff";

    let mut found = Vec::new();
    let mut pos = 0;
    while pos + SOI.len() <= buffer.len() {
        if buffer[pos..].starts_with(SOI) {
            if let Some(end) = jpeg_extent(buffer, pos) {
                found.push(&buffer[pos..end]);
            }
        }
        pos += 1;
    }
    found.sort_by_key(|jpeg| std::cmp::Reverse(jpeg.len()));
    found
}

/// End offset (exclusive) of the JPEG starting at `start`, found by walking
/// its marker segments. Segment payloads are skipped by length, so an EXIF
/// thumbnail inside APP1 does not end the stream early.
fn jpeg_extent(buf: &[u8], start: usize) -> Option<usize> {
    let mut pos = start + 2;
    loop {
        if *buf.get(pos)? != 0xFF {
            return None;
        }
        while *buf.get(pos + 1)? == 0xFF {
            pos += 1;
        }
        let marker = buf[pos + 1];
        pos += 2;
        match marker {
            0xD9 => return Some(pos),
            0x01 | 0xD0..=0xD7 => {}
            0xD8 => return None,
            _ => {
                let len = usize::from(u16::from_be_bytes([*buf.get(pos)?, *buf.get(pos + 1)?]));
                if len < 2 {
                    return None;
                }
                pos += len;
                if marker == 0xDA {
                    pos = skip_entropy_coded(buf, pos)?;
                }
            }
        }
    }
}

/// Offset of the first marker after entropy-coded scan data.
fn skip_entropy_coded(buf: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        if *buf.get(pos)? != 0xFF {
            pos += 1;
            continue;
        }
        match *buf.get(pos + 1)? {
            // Stuffed byte or restart marker
            0x00 | 0xD0..=0xD7 => pos += 2,
            0xFF => pos += 1,
            _ => return Some(pos),
        }
    }
}
