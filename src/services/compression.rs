use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::io::{self, BufReader, Read, Write};

/// Zstd effort used for the balanced tier.
const ZSTD_LEVEL: i32 = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    None,
    Gzip,
    Zstd,
    Lz4,
}

impl CompressionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionKind::None => "none",
            CompressionKind::Gzip => "gzip",
            CompressionKind::Zstd => "zstd",
            CompressionKind::Lz4 => "lz4",
        }
    }

    /// Unknown labels read back as `none` rather than failing retrieval.
    pub fn parse(value: &str) -> Self {
        match value {
            "gzip" => CompressionKind::Gzip,
            "zstd" => CompressionKind::Zstd,
            "lz4" => CompressionKind::Lz4,
            _ => CompressionKind::None,
        }
    }
}

/// Extensions whose content is already entropy-coded; recompressing them
/// burns CPU for nothing.
const COMPRESSED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "mp3", "aac", "ogg", "flac", "mp4", "mkv", "avi", "mov",
    "zip", "rar", "7z", "tar", "gz", "pdf",
];

/// Algorithm selection plus codecs. Pure: the only state is the reusable
/// codec configuration.
#[derive(Debug, Default, Clone)]
pub struct CompressionEngine;

impl CompressionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Deterministic selection policy, by filename extension and size.
    pub fn select(&self, filename: &str, size: i64) -> CompressionKind {
        let extension = filename
            .rsplit('.')
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        if COMPRESSED_EXTENSIONS.contains(&extension.as_str()) {
            return CompressionKind::None;
        }

        if size > 500 * 1024 * 1024 {
            tracing::debug!("skipping compression for very large file: {}", filename);
            return CompressionKind::None;
        }
        if size > 100 * 1024 * 1024 {
            return CompressionKind::Lz4;
        }
        if size < 10 * 1024 {
            return CompressionKind::Lz4;
        }
        if size < 10 * 1024 * 1024 {
            return CompressionKind::Zstd;
        }
        CompressionKind::Lz4
    }

    pub fn compress(&self, data: &[u8], kind: CompressionKind) -> io::Result<Vec<u8>> {
        match kind {
            CompressionKind::None => Ok(data.to_vec()),
            CompressionKind::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
            CompressionKind::Zstd => zstd::stream::encode_all(data, ZSTD_LEVEL),
            CompressionKind::Lz4 => {
                let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
                encoder.write_all(data)?;
                encoder
                    .finish()
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            }
        }
    }

    pub fn decompress(&self, data: &[u8], kind: CompressionKind) -> io::Result<Vec<u8>> {
        match kind {
            CompressionKind::None => Ok(data.to_vec()),
            CompressionKind::Gzip => {
                let mut out = Vec::new();
                GzDecoder::new(data).read_to_end(&mut out)?;
                Ok(out)
            }
            CompressionKind::Zstd => zstd::stream::decode_all(data),
            CompressionKind::Lz4 => {
                let mut out = Vec::new();
                lz4_flex::frame::FrameDecoder::new(data).read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }

    /// Wrap a reader so that reads yield decompressed bytes.
    pub fn wrap_reader<R: Read + Send + 'static>(
        &self,
        reader: R,
        kind: CompressionKind,
    ) -> io::Result<CodecReader<R>> {
        Ok(match kind {
            CompressionKind::None => CodecReader::Plain(reader),
            CompressionKind::Gzip => CodecReader::Gzip(GzDecoder::new(reader)),
            CompressionKind::Zstd => {
                CodecReader::Zstd(zstd::stream::read::Decoder::new(reader)?)
            }
            CompressionKind::Lz4 => CodecReader::Lz4(lz4_flex::frame::FrameDecoder::new(reader)),
        })
    }

    /// Wrap a writer so that writes are compressed. Call `finish()` to flush
    /// codec trailers and recover the inner writer.
    pub fn wrap_writer<W: Write + Send + 'static>(
        &self,
        writer: W,
        kind: CompressionKind,
    ) -> io::Result<CodecWriter<W>> {
        Ok(match kind {
            CompressionKind::None => CodecWriter::Plain(writer),
            CompressionKind::Gzip => {
                CodecWriter::Gzip(GzEncoder::new(writer, flate2::Compression::default()))
            }
            CompressionKind::Zstd => {
                CodecWriter::Zstd(zstd::stream::write::Encoder::new(writer, ZSTD_LEVEL)?)
            }
            CompressionKind::Lz4 => CodecWriter::Lz4(lz4_flex::frame::FrameEncoder::new(writer)),
        })
    }
}

pub enum CodecReader<R: Read> {
    Plain(R),
    Gzip(GzDecoder<R>),
    Zstd(zstd::stream::read::Decoder<'static, BufReader<R>>),
    Lz4(lz4_flex::frame::FrameDecoder<R>),
}

impl<R: Read> Read for CodecReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            CodecReader::Plain(r) => r.read(buf),
            CodecReader::Gzip(r) => r.read(buf),
            CodecReader::Zstd(r) => r.read(buf),
            CodecReader::Lz4(r) => r.read(buf),
        }
    }
}

pub enum CodecWriter<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
    Lz4(lz4_flex::frame::FrameEncoder<W>),
}

impl<W: Write> Write for CodecWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            CodecWriter::Plain(w) => w.write(buf),
            CodecWriter::Gzip(w) => w.write(buf),
            CodecWriter::Zstd(w) => w.write(buf),
            CodecWriter::Lz4(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CodecWriter::Plain(w) => w.flush(),
            CodecWriter::Gzip(w) => w.flush(),
            CodecWriter::Zstd(w) => w.flush(),
            CodecWriter::Lz4(w) => w.flush(),
        }
    }
}

impl<W: Write> CodecWriter<W> {
    pub fn finish(self) -> io::Result<W> {
        match self {
            CodecWriter::Plain(w) => Ok(w),
            CodecWriter::Gzip(w) => w.finish(),
            CodecWriter::Zstd(w) => w.finish(),
            CodecWriter::Lz4(w) => w
                .finish()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: i64 = 1024 * 1024;

    #[test]
    fn test_selection_policy() {
        let engine = CompressionEngine::new();

        // Already-compressed extensions always pass through
        assert_eq!(engine.select("photo.jpg", 5 * MIB), CompressionKind::None);
        assert_eq!(engine.select("movie.mp4", 300 * MIB), CompressionKind::None);
        assert_eq!(engine.select("bundle.zip", 2 * 1024), CompressionKind::None);

        // Size tiers
        assert_eq!(engine.select("huge.bin", 600 * MIB), CompressionKind::None);
        assert_eq!(engine.select("big.bin", 150 * MIB), CompressionKind::Lz4);
        assert_eq!(engine.select("tiny.txt", 512), CompressionKind::Lz4);
        assert_eq!(engine.select("data.log", 5 * MIB), CompressionKind::Zstd);
        assert_eq!(engine.select("medium.bin", 50 * MIB), CompressionKind::Lz4);
    }

    #[test]
    fn test_roundtrips() {
        let engine = CompressionEngine::new();
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();

        for kind in [
            CompressionKind::None,
            CompressionKind::Gzip,
            CompressionKind::Zstd,
            CompressionKind::Lz4,
        ] {
            let compressed = engine.compress(&data, kind).unwrap();
            let restored = engine.decompress(&compressed, kind).unwrap();
            assert_eq!(restored, data, "round-trip failed for {:?}", kind);
        }
    }

    #[test]
    fn test_streaming_roundtrip() {
        let engine = CompressionEngine::new();
        let data = b"streaming payload, repeated: ".repeat(4096);

        for kind in [
            CompressionKind::Gzip,
            CompressionKind::Zstd,
            CompressionKind::Lz4,
        ] {
            let mut writer = engine.wrap_writer(Vec::new(), kind).unwrap();
            writer.write_all(&data).unwrap();
            let compressed = writer.finish().unwrap();
            assert!(compressed.len() < data.len());

            let mut reader = engine
                .wrap_reader(std::io::Cursor::new(compressed), kind)
                .unwrap();
            let mut restored = Vec::new();
            reader.read_to_end(&mut restored).unwrap();
            assert_eq!(restored, data, "stream round-trip failed for {:?}", kind);
        }
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(CompressionKind::Lz4.as_str(), "lz4");
        assert_eq!(CompressionKind::parse("zstd"), CompressionKind::Zstd);
        assert_eq!(CompressionKind::parse("bogus"), CompressionKind::None);
    }
}
