//! Content-sniffing media classification.
//!
//! Admission control never trusts the filename or a declared `Content-Type`; it looks at the
//! staged file's content. Audio streams are identified by symphonia. The declared type is only
//! used to pick a staging extension, and that lookup reads the same table as the allow-list so the two cannot drift apart.

use std::io;
use std::path::Path;

use symphonia::core::codecs::{
    CODEC_TYPE_AAC, CODEC_TYPE_FLAC, CODEC_TYPE_MP1, CODEC_TYPE_MP2, CODEC_TYPE_MP3,
    CODEC_TYPE_NULL, CODEC_TYPE_OPUS, CODEC_TYPE_VORBIS, CodecType,
};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// How many leading bytes we read from a staged file for signature matching.
pub const PREFIX_BYTES: usize = 8 * 1024;

/// Staging extension used when a declared content type is not in the table.
pub const UNKNOWN_EXTENSION: &str = ".audio";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    /// Accepted because the transcoder extracts the audio track.
    Video,
}

/// One supported media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaTypeSpec {
    /// The MIME string the classifier reports for this type.
    pub mime: &'static str,

    pub kind: MediaKind,

    /// Extension (with leading dot) used when staging a raw upload declared as this type.
    pub extension: &'static str,

    /// Other declared content types that mean the same thing.
    pub aliases: &'static [&'static str],
}

// -----------------------------------------------------------------------------
// Supported media types (allowlist)
// -----------------------------------------------------------------------------
static MEDIA_TYPES: &[MediaTypeSpec] = &[
    // audio
    MediaTypeSpec {
        mime: "audio/mpeg",
        kind: MediaKind::Audio,
        extension: ".mp3",
        aliases: &["audio/mp3", "audio/mpeg3", "audio/x-mpeg", "audio/x-mp3"],
    },
    MediaTypeSpec {
        mime: "audio/wav",
        kind: MediaKind::Audio,
        extension: ".wav",
        aliases: &["audio/x-wav", "audio/wave", "audio/vnd.wave"],
    },
    MediaTypeSpec {
        mime: "audio/flac",
        kind: MediaKind::Audio,
        extension: ".flac",
        aliases: &["audio/x-flac"],
    },
    MediaTypeSpec {
        mime: "audio/ogg",
        kind: MediaKind::Audio,
        extension: ".ogg",
        aliases: &["audio/vorbis", "audio/opus", "application/ogg"],
    },
    MediaTypeSpec {
        mime: "audio/aac",
        kind: MediaKind::Audio,
        extension: ".aac",
        aliases: &["audio/x-aac", "audio/aacp", "audio/x-hx-aac-adts"],
    },
    MediaTypeSpec {
        mime: "audio/mp4",
        kind: MediaKind::Audio,
        extension: ".m4a",
        aliases: &["audio/x-m4a", "audio/m4a", "audio/mp4a-latm"],
    },
    MediaTypeSpec {
        mime: "audio/x-ms-wma",
        kind: MediaKind::Audio,
        extension: ".wma",
        aliases: &[],
    },
    // video
    MediaTypeSpec {
        mime: "video/mp4",
        kind: MediaKind::Video,
        extension: ".mp4",
        aliases: &[],
    },
    MediaTypeSpec {
        mime: "video/x-msvideo",
        kind: MediaKind::Video,
        extension: ".avi",
        aliases: &["video/avi", "video/msvideo"],
    },
    MediaTypeSpec {
        mime: "video/quicktime",
        kind: MediaKind::Video,
        extension: ".mov",
        aliases: &[],
    },
    MediaTypeSpec {
        mime: "video/x-matroska",
        kind: MediaKind::Video,
        extension: ".mkv",
        aliases: &["video/mkv"],
    },
];

/// Result of classifying a staged file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub mime: &'static str,
    pub supported: bool,
}

/// All supported media types.
pub fn supported_types() -> &'static [MediaTypeSpec] {
    MEDIA_TYPES
}

/// Find the table entry for a MIME string or one of its aliases (case-insensitive).
pub fn lookup(mime: &str) -> Option<&'static MediaTypeSpec> {
    let mime = mime.trim();
    MEDIA_TYPES.iter().find(|spec| {
        spec.mime.eq_ignore_ascii_case(mime)
            || spec.aliases.iter().any(|a| a.eq_ignore_ascii_case(mime))
    })
}

/// Map a declared `Content-Type` header to a staging extension.
///
/// Parameters such as `; charset=...` are ignored. Unknown types map to [`UNKNOWN_EXTENSION`].
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    let essence = content_type.split(';').next().unwrap_or_default();
    lookup(essence).map_or(UNKNOWN_EXTENSION, |spec| spec.extension)
}

/// Detect the media type of the file at `path` from its content.
///
/// Container signatures in the leading bytes are checked first. Anything else is handed to
/// symphonia, which opens the audio formats it knows and reports their codec.
pub async fn detect_type(path: &Path) -> io::Result<&'static str> {
    let file = tokio::fs::File::open(path).await?;
    let mut prefix = Vec::with_capacity(PREFIX_BYTES);
    file.take(PREFIX_BYTES as u64)
        .read_to_end(&mut prefix)
        .await?;

    if let Some(mime) = sniff(&prefix) {
        return Ok(mime);
    }
    if looks_like_text(&prefix) {
        return Ok("text/plain");
    }
    Ok(identify_audio(path)
        .await?
        .unwrap_or("application/octet-stream"))
}

/// Classify the file at `path`.
pub async fn classify(path: &Path) -> io::Result<Classification> {
    let mime = detect_type(path).await?;
    Ok(Classification {
        mime,
        supported: lookup(mime).is_some(),
    })
}

/// `true` iff the file's sniffed type is in the allow-list.
pub async fn is_supported(path: &Path) -> io::Result<bool> {
    Ok(classify(path).await?.supported)
}

const ASF_HEADER: [u8; 16] = [
    0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE, 0x6C,
];
const ASF_VIDEO_MEDIA: [u8; 16] = [
    0xC0, 0xEF, 0x19, 0xBC, 0x4D, 0x5B, 0xCF, 0x11, 0xA8, 0xFD, 0x00, 0x80, 0x5F, 0x5C, 0x44, 0x2B,
];
const EBML_HEADER: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// Name a container from its leading bytes, for the formats symphonia cannot tell apart.
///
/// RIFF carries both WAVE and AVI; ASF carries both WMA and WMV; EBML carries both Matroska and
/// WebM; ISO-BMFF brands separate M4A from MP4, QuickTime and 3GPP. `None` means no signature
/// matched and symphonia decides.
pub fn sniff(bytes: &[u8]) -> Option<&'static str> {
    if bytes.is_empty() {
        return Some("application/x-empty");
    }

    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") {
        match &bytes[8..12] {
            b"WAVE" => return Some("audio/wav"),
            b"AVI " => return Some("video/x-msvideo"),
            _ => {}
        }
    }

    if bytes.starts_with(&ASF_HEADER) {
        let has_video = bytes.windows(ASF_VIDEO_MEDIA.len()).any(|w| w == ASF_VIDEO_MEDIA);
        return Some(if has_video {
            "video/x-ms-wmv"
        } else {
            "audio/x-ms-wma"
        });
    }

    if bytes.starts_with(&EBML_HEADER) {
        let head = &bytes[..bytes.len().min(64)];
        return Some(if head.windows(4).any(|w| w == b"webm") {
            "video/webm"
        } else {
            "video/x-matroska"
        });
    }

    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        return Some(iso_bmff_type(&bytes[8..12]));
    }
    if bytes.len() >= 8 && matches!(&bytes[4..8], b"moov" | b"mdat" | b"wide" | b"free" | b"skip")
    {
        return Some("video/quicktime");
    }

    None
}

fn iso_bmff_type(major_brand: &[u8]) -> &'static str {
    match major_brand {
        b"M4A " | b"M4B " | b"M4P " | b"F4A " => "audio/mp4",
        b"qt  " => "video/quicktime",
        [b'3', b'g', ..] => "video/3gpp",
        _ => "video/mp4",
    }
}

async fn identify_audio(path: &Path) -> io::Result<Option<&'static str>> {
    let path = path.to_path_buf();
    let codec = tokio::task::spawn_blocking(move || read_codec(&path))
        .await
        .map_err(io::Error::other)??;
    Ok(codec.and_then(codec_mime))
}

/// Open the file with symphonia and report the codec of its first audio track.
///
/// `Ok(None)` means symphonia found no container it can read.
fn read_codec(path: &Path) -> io::Result<Option<CodecType>> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let opened = match symphonia::default::get_probe().format(
        &Hint::new(),
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) {
        Ok(opened) => opened,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "no readable audio container");
            return Ok(None);
        }
    };

    Ok(opened
        .format
        .tracks()
        .iter()
        .map(|track| track.codec_params.codec)
        .find(|codec| *codec != CODEC_TYPE_NULL))
}

/// The MIME string for an audio stream symphonia opened, if it is one we name.
fn codec_mime(codec: CodecType) -> Option<&'static str> {
    if codec == CODEC_TYPE_FLAC {
        Some("audio/flac")
    } else if codec == CODEC_TYPE_VORBIS || codec == CODEC_TYPE_OPUS {
        Some("audio/ogg")
    } else if [CODEC_TYPE_MP1, CODEC_TYPE_MP2, CODEC_TYPE_MP3].contains(&codec) {
        Some("audio/mpeg")
    } else if codec == CODEC_TYPE_AAC {
        Some("audio/aac")
    } else {
        None
    }
}

fn looks_like_text(bytes: &[u8]) -> bool {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        // The prefix may cut a multi-byte character in half.
        Err(err) if err.error_len().is_none() => {
            match std::str::from_utf8(&bytes[..err.valid_up_to()]) {
                Ok(text) => text,
                Err(_) => return false,
            }
        }
        Err(_) => return false,
    };

    !text.is_empty()
        && text
            .chars()
            .all(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t' | '\x0c'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn riff(form: &[u8; 4]) -> Vec<u8> {
        let mut bytes = b"RIFF\x24\x00\x00\x00".to_vec();
        bytes.extend_from_slice(form);
        bytes.extend_from_slice(b"fmt \x10\x00\x00\x00");
        bytes
    }

    fn ftyp(brand: &[u8; 4]) -> Vec<u8> {
        let mut bytes = vec![0x00, 0x00, 0x00, 0x18];
        bytes.extend_from_slice(b"ftyp");
        bytes.extend_from_slice(brand);
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes
    }

    fn write_wav(path: &Path, samples: u32) -> anyhow::Result<()> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for i in 0..samples {
            writer.write_sample((i % 128) as i16)?;
        }
        writer.finalize()?;
        Ok(())
    }

    #[test]
    fn sniff_names_riff_forms() {
        assert_eq!(sniff(&riff(b"WAVE")), Some("audio/wav"));
        assert_eq!(sniff(&riff(b"AVI ")), Some("video/x-msvideo"));
        assert_eq!(sniff(b"RIFF\x24\x00\x00\x00WEBP"), None);
    }

    #[test]
    fn sniff_recognizes_iso_bmff_brands() {
        assert_eq!(sniff(&ftyp(b"M4A ")), Some("audio/mp4"));
        assert_eq!(sniff(&ftyp(b"isom")), Some("video/mp4"));
        assert_eq!(sniff(&ftyp(b"qt  ")), Some("video/quicktime"));
        assert_eq!(sniff(&ftyp(b"3gp4")), Some("video/3gpp"));
        assert_eq!(sniff(b"\x00\x00\x00\x08wide\x00\x00"), Some("video/quicktime"));
    }

    #[test]
    fn sniff_separates_matroska_from_webm() {
        let mut mkv = EBML_HEADER.to_vec();
        mkv.extend_from_slice(b"\x9F\x42\x86\x81\x01\x42\x82\x88matroska");
        assert_eq!(sniff(&mkv), Some("video/x-matroska"));

        let mut webm = EBML_HEADER.to_vec();
        webm.extend_from_slice(b"\x9F\x42\x86\x81\x01\x42\x82\x84webm");
        assert_eq!(sniff(&webm), Some("video/webm"));
    }

    #[test]
    fn sniff_distinguishes_wma_from_wmv() {
        let mut wma = ASF_HEADER.to_vec();
        wma.extend_from_slice(&[0u8; 32]);
        assert_eq!(sniff(&wma), Some("audio/x-ms-wma"));

        let mut wmv = wma.clone();
        wmv.extend_from_slice(&ASF_VIDEO_MEDIA);
        assert_eq!(sniff(&wmv), Some("video/x-ms-wmv"));
    }

    #[test]
    fn sniff_leaves_stream_formats_to_symphonia() {
        assert_eq!(sniff(b""), Some("application/x-empty"));
        assert_eq!(sniff(b"fLaC\x00\x00\x00\x22"), None);
        assert_eq!(sniff(b"OggS\x00\x02\x00\x00"), None);
        assert_eq!(sniff(b"ID3\x04\x00\x00\x00\x00\x00\x00"), None);
        assert_eq!(sniff(&[0xFF, 0xFB, 0x90, 0x64, 0x00]), None);
    }

    #[test]
    fn codec_mime_names_opened_audio() {
        assert_eq!(codec_mime(CODEC_TYPE_MP3), Some("audio/mpeg"));
        assert_eq!(codec_mime(CODEC_TYPE_MP2), Some("audio/mpeg"));
        assert_eq!(codec_mime(CODEC_TYPE_FLAC), Some("audio/flac"));
        assert_eq!(codec_mime(CODEC_TYPE_VORBIS), Some("audio/ogg"));
        assert_eq!(codec_mime(CODEC_TYPE_OPUS), Some("audio/ogg"));
        assert_eq!(codec_mime(CODEC_TYPE_AAC), Some("audio/aac"));
        assert_eq!(codec_mime(CODEC_TYPE_NULL), None);
    }

    #[test]
    fn read_codec_opens_real_audio_and_rejects_noise() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;

        let wav = dir.path().join("clip.wav");
        write_wav(&wav, 1600)?;
        assert_eq!(
            read_codec(&wav)?,
            Some(symphonia::core::codecs::CODEC_TYPE_PCM_S16LE)
        );

        let noise = dir.path().join("noise.bin");
        std::fs::write(&noise, [0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07])?;
        assert_eq!(read_codec(&noise)?, None);
        Ok(())
    }

    #[tokio::test]
    async fn detect_type_falls_back_to_text_and_binary() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cases: [(&str, &[u8], &str); 4] = [
            ("empty", b"", "application/x-empty"),
            ("text", b"this is not audio\n", "text/plain"),
            ("accented", "h\u{e9}llo".as_bytes(), "text/plain"),
            ("binary", &[0x00, 0x01, 0x02, 0x03], "application/octet-stream"),
        ];
        for (name, bytes, expected) in cases {
            let path = dir.path().join(name);
            std::fs::write(&path, bytes)?;
            assert_eq!(detect_type(&path).await?, expected, "{name}");
        }
        Ok(())
    }

    #[test]
    fn text_check_tolerates_truncated_utf8() {
        let mut bytes = b"caf".to_vec();
        bytes.push(0xC3); // first half of 'é'
        assert!(looks_like_text(&bytes));
        assert!(!looks_like_text(&[0x00, 0x01]));
    }

    #[test]
    fn every_sniffed_supported_type_is_in_the_table() {
        for mime in [
            "audio/wav",
            "audio/flac",
            "audio/ogg",
            "audio/mpeg",
            "audio/aac",
            "audio/mp4",
            "audio/x-ms-wma",
            "video/mp4",
            "video/x-msvideo",
            "video/quicktime",
            "video/x-matroska",
        ] {
            assert!(lookup(mime).is_some(), "{mime} should be supported");
        }
        for mime in ["video/webm", "video/3gpp", "video/x-ms-wmv", "text/plain"] {
            assert!(lookup(mime).is_none(), "{mime} should be rejected");
        }
    }

    #[test]
    fn extension_for_content_type_uses_canonical_table() {
        assert_eq!(extension_for_content_type("audio/mpeg"), ".mp3");
        assert_eq!(extension_for_content_type("audio/mp3"), ".mp3");
        assert_eq!(extension_for_content_type("audio/wav"), ".wav");
        assert_eq!(extension_for_content_type("audio/x-wav"), ".wav");
        assert_eq!(extension_for_content_type("audio/flac"), ".flac");
        assert_eq!(extension_for_content_type("audio/ogg"), ".ogg");
        assert_eq!(extension_for_content_type("audio/aac"), ".aac");
        assert_eq!(extension_for_content_type("audio/mp4"), ".m4a");
        assert_eq!(extension_for_content_type("audio/x-m4a"), ".m4a");
        assert_eq!(extension_for_content_type("video/mp4"), ".mp4");
        assert_eq!(extension_for_content_type("video/quicktime"), ".mov");
    }

    #[test]
    fn extension_for_content_type_ignores_params_and_case() {
        assert_eq!(extension_for_content_type("Audio/WAV; charset=binary"), ".wav");
        assert_eq!(extension_for_content_type("application/octet-stream"), ".audio");
        assert_eq!(extension_for_content_type(""), ".audio");
    }

    #[tokio::test]
    async fn classify_reads_file_content_not_extension() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;

        let spoofed = dir.path().join("song.mp3");
        std::fs::write(&spoofed, b"definitely just text")?;
        let c = classify(&spoofed).await?;
        assert_eq!(c.mime, "text/plain");
        assert!(!c.supported);

        let wav = dir.path().join("upload.bin");
        write_wav(&wav, 800)?;
        assert!(is_supported(&wav).await?);
        Ok(())
    }
}
