//! Metadata extraction for media files.
//!
//! Reads only what is needed: the filesystem stat, the image header for
//! dimensions, the EXIF block for timestamps, and the first few hundred
//! kilobytes of video containers.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use exif::{In, Reader, Tag, Value};
use image::ImageReader;
use tracing::{debug, trace};

use crate::error::ExtractionError;
use crate::models::MediaKind;

/// Dimension value for media whose size could not be determined.
pub const UNKNOWN_DIMENSION: u32 = 0;

/// How much of a video container is inspected for dimension boxes.
const VIDEO_PROBE_BYTES: u64 = 128 * 1024;

/// EXIF values longer than this are left out of the metadata map.
const MAX_EXIF_VALUE_LEN: usize = 256;

/// Timestamp tags consulted for the effective creation time, in order.
const EXIF_TIME_TAGS: [Tag; 3] = [Tag::DateTime, Tag::DateTimeOriginal, Tag::DateTimeDigitized];

/// Result of metadata extraction for one file.
#[derive(Debug, Clone)]
pub struct MediaMetadata {
    pub size: u64,
    pub modified: NaiveDateTime,
    pub width: u32,
    pub height: u32,
    pub exif: Option<ExifSummary>,
}

impl MediaMetadata {
    /// Embedded capture time if present, else the modification time.
    pub fn effective_created(&self) -> NaiveDateTime {
        self.exif
            .as_ref()
            .and_then(|e| e.taken)
            .unwrap_or(self.modified)
    }
}

/// The parts of an EXIF block the rest of the system cares about.
#[derive(Debug, Clone, Default)]
pub struct ExifSummary {
    pub taken: Option<NaiveDateTime>,
    pub tags: BTreeMap<String, String>,
}

pub struct MetadataExtractor;

impl MetadataExtractor {
    /// Extracts metadata for a file already classified as `kind`.
    ///
    /// Only a failed stat is an error. Unreadable headers leave the
    /// dimensions at [`UNKNOWN_DIMENSION`] and missing or malformed EXIF
    /// data is ignored.
    pub fn extract(path: &Path, kind: MediaKind) -> Result<MediaMetadata, ExtractionError> {
        let stat = fs::metadata(path).map_err(|source| ExtractionError::Stat {
            path: path.to_path_buf(),
            source,
        })?;
        let modified = stat
            .modified()
            .map(local_naive)
            .map_err(|source| ExtractionError::Stat {
                path: path.to_path_buf(),
                source,
            })?;

        let (width, height, exif) = match kind {
            MediaKind::Image => {
                let (w, h) = Self::image_dimensions(path);
                (w, h, read_exif(path))
            }
            MediaKind::Video => {
                let (w, h) = Self::video_dimensions(path);
                (w, h, None)
            }
        };

        Ok(MediaMetadata {
            size: stat.len(),
            modified,
            width,
            height,
            exif,
        })
    }

    /// Reads image dimensions from the header without decoding pixels.
    pub fn image_dimensions(path: &Path) -> (u32, u32) {
        let dims = ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(image::ImageError::IoError)
            .and_then(|reader| reader.into_dimensions());

        match dims {
            Ok((w, h)) => {
                trace!(?path, w, h, "Read image dimensions");
                (w, h)
            }
            Err(e) => {
                debug!(?path, error = %e, "Could not read image dimensions");
                (UNKNOWN_DIMENSION, UNKNOWN_DIMENSION)
            }
        }
    }

    /// Reads video dimensions from common container headers.
    pub fn video_dimensions(path: &Path) -> (u32, u32) {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        let head = match read_head(path, VIDEO_PROBE_BYTES) {
            Ok(head) => head,
            Err(e) => {
                debug!(?path, error = %e, "Could not read video header");
                return (UNKNOWN_DIMENSION, UNKNOWN_DIMENSION);
            }
        };

        let dims = match ext.as_str() {
            "mp4" | "mov" | "m4v" | "3gp" => mp4_dimensions(&head),
            "mkv" | "webm" => matroska_dimensions(&head),
            "avi" => avi_dimensions(&head),
            _ => None,
        };

        dims.unwrap_or_else(|| {
            trace!(?path, "No container dimensions found");
            (UNKNOWN_DIMENSION, UNKNOWN_DIMENSION)
        })
    }
}

fn local_naive(time: SystemTime) -> NaiveDateTime {
    DateTime::<Local>::from(time).naive_local()
}

fn read_head(path: &Path, limit: u64) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    BufReader::new(File::open(path)?)
        .take(limit)
        .read_to_end(&mut buf)?;
    Ok(buf)
}

/// Reads the EXIF block of an image, if it has one.
pub fn read_exif(path: &Path) -> Option<ExifSummary> {
    let file = File::open(path).ok()?;
    let exif = Reader::new()
        .read_from_container(&mut BufReader::new(file))
        .ok()?;

    let taken = EXIF_TIME_TAGS.iter().find_map(|tag| {
        let field = exif.get_field(*tag, In::PRIMARY)?;
        match &field.value {
            Value::Ascii(parts) => parts
                .first()
                .and_then(|raw| std::str::from_utf8(raw).ok())
                .and_then(parse_exif_datetime),
            _ => None,
        }
    });

    let tags = exif
        .fields()
        .filter(|field| field.ifd_num == In::PRIMARY)
        .filter_map(|field| {
            let value = field.display_value().with_unit(&exif).to_string();
            (value.len() <= MAX_EXIF_VALUE_LEN).then(|| (field.tag.to_string(), value))
        })
        .collect();

    Some(ExifSummary { taken, tags })
}

/// Parses an EXIF date-time (`YYYY:MM:DD HH:MM:SS`), tolerating the common
/// `-`, `/` and `.` separator variants. Returns `None` for anything else,
/// including the all-zero placeholder some cameras write.
pub fn parse_exif_datetime(raw: &str) -> Option<NaiveDateTime> {
    let cleaned: String = raw
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .chars()
        .map(|c| if matches!(c, '-' | '/' | '.') { ':' } else { c })
        .collect();

    if let Ok(dt) = NaiveDateTime::parse_from_str(&cleaned, "%Y:%m:%d %H:%M:%S") {
        return Some(dt);
    }

    NaiveDate::parse_from_str(cleaned.split(' ').next()?, "%Y:%m:%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
}

/// MP4/MOV: the first video `tkhd` box with non-zero 16.16 width/height,
/// falling back to a visual sample entry (`avc1`, `hvc1`, ...).
pub fn mp4_dimensions(buf: &[u8]) -> Option<(u32, u32)> {
    // tkhd payload follows the 4-byte type; width/height sit after the
    // fixed fields and the 3x3 matrix.
    let tkhd = find_all(buf, b"tkhd").find_map(|i| {
        let version = *buf.get(i + 4)?;
        let offset = if version == 0 { i + 80 } else { i + 92 };
        let width = read_u32_be(buf, offset)? >> 16;
        let height = read_u32_be(buf, offset + 4)? >> 16;
        plausible(width, height)
    });
    if tkhd.is_some() {
        return tkhd;
    }

    [b"avc1", b"hvc1", b"hev1", b"mp4v", b"vp09", b"av01"]
        .iter()
        .flat_map(|tag| find_all(buf, *tag))
        .find_map(|i| {
            let width = u32::from(read_u16_be(buf, i + 28)?);
            let height = u32::from(read_u16_be(buf, i + 30)?);
            plausible(width, height)
        })
}

/// Matroska/WebM: `PixelWidth` (0xB0) and `PixelHeight` (0xBA) elements.
pub fn matroska_dimensions(buf: &[u8]) -> Option<(u32, u32)> {
    let mut width = None;
    let mut height = None;

    for i in 0..buf.len() {
        match buf[i] {
            0xB0 if width.is_none() => width = ebml_uint(&buf[i + 1..]),
            0xBA if height.is_none() => height = ebml_uint(&buf[i + 1..]),
            _ => {}
        }
        if let (Some(w), Some(h)) = (width, height) {
            return plausible(w, h);
        }
    }
    None
}

/// Reads an EBML size vint followed by a small big-endian unsigned value.
fn ebml_uint(data: &[u8]) -> Option<u32> {
    let first = *data.first()?;
    if first == 0 {
        return None;
    }
    let len = first.leading_zeros() as usize + 1;
    let mask = (0xFFu16 >> len) as u8;
    let mut size = u64::from(first & mask);
    for &b in data.get(1..len)? {
        size = (size << 8) | u64::from(b);
    }
    if size == 0 || size > 4 {
        return None;
    }
    let value = data
        .get(len..len + size as usize)?
        .iter()
        .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
    (value > 0 && value < 65536).then_some(value)
}

/// AVI: the BITMAPINFOHEADER inside the first `strf` chunk.
pub fn avi_dimensions(buf: &[u8]) -> Option<(u32, u32)> {
    find_all(buf, b"strf").find_map(|i| {
        let header = i + 8;
        let width = read_i32_le(buf, header + 4)?.unsigned_abs();
        // Negative height marks a top-down bitmap.
        let height = read_i32_le(buf, header + 8)?.unsigned_abs();
        plausible(width, height)
    })
}

fn plausible(width: u32, height: u32) -> Option<(u32, u32)> {
    (width > 0 && height > 0 && width < 65536 && height < 65536).then_some((width, height))
}

fn find_all<'a>(haystack: &'a [u8], needle: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(move |(_, w)| *w == needle)
        .map(|(i, _)| i)
}

fn read_u16_be(buf: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes(buf.get(at..at + 2)?.try_into().ok()?))
}

fn read_u32_be(buf: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_be_bytes(buf.get(at..at + 4)?.try_into().ok()?))
}

fn read_i32_le(buf: &[u8], at: usize) -> Option<i32> {
    Some(i32::from_le_bytes(buf.get(at..at + 4)?.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    fn tkhd_box(width: u32, height: u32) -> Vec<u8> {
        let mut b = vec![0u8; 4];
        b.extend_from_slice(b"tkhd");
        let mut payload = vec![0u8; 84];
        payload[76..80].copy_from_slice(&(width << 16).to_be_bytes());
        payload[80..84].copy_from_slice(&(height << 16).to_be_bytes());
        b.extend_from_slice(&payload);
        b
    }

    #[test]
    fn test_parse_exif_datetime_variants() {
        let expected = NaiveDate::from_ymd_opt(2021, 7, 4)
            .unwrap()
            .and_hms_opt(9, 30, 15)
            .unwrap();
        assert_eq!(parse_exif_datetime("2021:07:04 09:30:15"), Some(expected));
        assert_eq!(parse_exif_datetime("2021-07-04 09:30:15\0"), Some(expected));
        assert_eq!(
            parse_exif_datetime("2021:07:04"),
            Some(expected.date().and_hms_opt(0, 0, 0).unwrap())
        );
        assert_eq!(parse_exif_datetime("0000:00:00 00:00:00"), None);
        assert_eq!(parse_exif_datetime("garbage"), None);
    }

    #[test]
    fn test_mp4_tkhd_skips_audio_track() {
        let mut buf = tkhd_box(0, 0);
        buf.extend(tkhd_box(1920, 1080));
        assert_eq!(mp4_dimensions(&buf), Some((1920, 1080)));
    }

    #[test]
    fn test_mp4_sample_entry_fallback() {
        let mut buf = vec![0u8; 4];
        buf.extend_from_slice(b"avc1");
        let mut entry = vec![0u8; 40];
        entry[24..26].copy_from_slice(&1280u16.to_be_bytes());
        entry[26..28].copy_from_slice(&720u16.to_be_bytes());
        buf.extend(entry);
        assert_eq!(mp4_dimensions(&buf), Some((1280, 720)));
    }

    #[test]
    fn test_matroska_pixel_elements() {
        // PixelWidth 640 and PixelHeight 480, each with a 2-byte payload.
        let buf = [0x00, 0xB0, 0x82, 0x02, 0x80, 0xBA, 0x82, 0x01, 0xE0, 0x00];
        assert_eq!(matroska_dimensions(&buf), Some((640, 480)));
    }

    #[test]
    fn test_avi_bitmap_header() {
        let mut buf = b"strf".to_vec();
        buf.extend_from_slice(&40u32.to_le_bytes());
        buf.extend_from_slice(&40u32.to_le_bytes());
        buf.extend_from_slice(&320i32.to_le_bytes());
        buf.extend_from_slice(&(-240i32).to_le_bytes());
        assert_eq!(avi_dimensions(&buf), Some((320, 240)));
    }

    #[test]
    fn test_extract_image_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pic.png");
        image::RgbImage::new(7, 5).save(&path).unwrap();

        let meta = MetadataExtractor::extract(&path, MediaKind::Image).unwrap();
        assert_eq!((meta.width, meta.height), (7, 5));
        assert!(meta.size > 0);
        assert!(meta.exif.is_none());
        assert_eq!(meta.effective_created(), meta.modified);
    }

    /// Writes a small JPEG carrying an EXIF block with `DateTimeOriginal`.
    fn jpeg_with_exif(path: &Path, datetime: &str) {
        use exif::experimental::Writer;
        use exif::Field;
        use std::io::Cursor;

        let mut jpeg = Vec::new();
        image::RgbImage::new(4, 4)
            .write_to(&mut Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .unwrap();

        let field = Field {
            tag: Tag::DateTimeOriginal,
            ifd_num: In::PRIMARY,
            value: Value::Ascii(vec![datetime.as_bytes().to_vec()]),
        };
        let mut writer = Writer::new();
        writer.push_field(&field);
        let mut tiff = Cursor::new(Vec::new());
        writer.write(&mut tiff, false).unwrap();
        let tiff = tiff.into_inner();

        // APP1 segment right after SOI.
        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&((tiff.len() + 8) as u16).to_be_bytes());
        out.extend_from_slice(b"Exif\0\0");
        out.extend_from_slice(&tiff);
        out.extend_from_slice(&jpeg[2..]);
        fs::write(path, out).unwrap();
    }

    #[test]
    fn test_exif_timestamp_overrides_mtime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("camera.jpg");
        jpeg_with_exif(&path, "2019:05:06 07:08:09");

        let meta = MetadataExtractor::extract(&path, MediaKind::Image).unwrap();
        let expected = NaiveDate::from_ymd_opt(2019, 5, 6)
            .unwrap()
            .and_hms_opt(7, 8, 9)
            .unwrap();
        assert_eq!(meta.effective_created(), expected);
        assert_eq!((meta.width, meta.height), (4, 4));
        let exif = meta.exif.unwrap();
        assert!(exif.tags.contains_key("DateTimeOriginal"));
    }

    #[test]
    fn test_malformed_exif_timestamp_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        jpeg_with_exif(&path, "not a date at all");

        let meta = MetadataExtractor::extract(&path, MediaKind::Image).unwrap();
        assert_eq!(meta.effective_created(), meta.modified);
    }

    #[test]
    fn test_corrupt_image_has_unknown_dimensions() {
        let mut temp = NamedTempFile::with_suffix(".jpg").unwrap();
        temp.write_all(b"not a real jpeg file").unwrap();

        let meta = MetadataExtractor::extract(temp.path(), MediaKind::Image).unwrap();
        assert_eq!(meta.width, UNKNOWN_DIMENSION);
        assert_eq!(meta.height, UNKNOWN_DIMENSION);
    }

    #[test]
    fn test_missing_file_is_extraction_error() {
        let result = MetadataExtractor::extract(Path::new("/nonexistent/v.mp4"), MediaKind::Video);
        assert!(matches!(result, Err(ExtractionError::Stat { .. })));
    }
}
