//! Stream compression selected by file extension.

use std::io::{Read, Write};

/// Compression codec of a record file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Bzip2,
    Gzip,
    Zstd,
}

impl Compression {
    /// Selects the codec from the last extension of a file name or key
    /// (`.bz2`, `.gz`, `.zst`), defaulting to uncompressed.
    pub fn from_name(name: &str) -> Compression {
        let file_name = name.rsplit('/').next().unwrap_or(name);
        match file_name.rsplit_once('.').map(|(_, ext)| ext) {
            Some("bz2") => Compression::Bzip2,
            Some("gz") => Compression::Gzip,
            Some("zst") | Some("zstd") => Compression::Zstd,
            _ => Compression::None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Bzip2 => ".bz2",
            Compression::Gzip => ".gz",
            Compression::Zstd => ".zst",
        }
    }

    /// Wraps a reader with the matching decompressor. Concatenated members
    /// (multi-stream bzip2 and gzip files) are read to the end.
    pub fn reader<'a, R: Read + 'a>(&self, reader: R) -> std::io::Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Compression::None => Box::new(reader),
            Compression::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(reader)),
            Compression::Gzip => Box::new(flate2::read::MultiGzDecoder::new(reader)),
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(reader)?),
        })
    }

    /// Wraps a writer with the matching compressor.
    pub fn writer<W: Write>(&self, writer: W) -> std::io::Result<CompressedWriter<W>> {
        Ok(match self {
            Compression::None => CompressedWriter::Plain(writer),
            Compression::Bzip2 => CompressedWriter::Bzip2(bzip2::write::BzEncoder::new(
                writer,
                bzip2::Compression::default(),
            )),
            Compression::Gzip => CompressedWriter::Gzip(flate2::write::GzEncoder::new(
                writer,
                flate2::Compression::default(),
            )),
            Compression::Zstd => CompressedWriter::Zstd(zstd::stream::write::Encoder::new(
                writer,
                zstd::DEFAULT_COMPRESSION_LEVEL,
            )?),
        })
    }
}

/// A compressing writer that must be [`finish`](CompressedWriter::finish)ed
/// to flush the trailing frame.
pub enum CompressedWriter<W: Write> {
    Plain(W),
    Bzip2(bzip2::write::BzEncoder<W>),
    Gzip(flate2::write::GzEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> CompressedWriter<W> {
    /// Completes the compressed stream and returns the inner writer.
    pub fn finish(self) -> std::io::Result<W> {
        let mut inner = match self {
            CompressedWriter::Plain(w) => w,
            CompressedWriter::Bzip2(e) => e.finish()?,
            CompressedWriter::Gzip(e) => e.finish()?,
            CompressedWriter::Zstd(e) => e.finish()?,
        };
        inner.flush()?;
        Ok(inner)
    }
}

impl<W: Write> Write for CompressedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            CompressedWriter::Plain(w) => w.write(buf),
            CompressedWriter::Bzip2(e) => e.write(buf),
            CompressedWriter::Gzip(e) => e.write(buf),
            CompressedWriter::Zstd(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            CompressedWriter::Plain(w) => w.flush(),
            CompressedWriter::Bzip2(e) => e.flush(),
            CompressedWriter::Gzip(e) => e.flush(),
            CompressedWriter::Zstd(e) => e.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(Compression::from_name("GDL-1900.jsonl.bz2"), Compression::Bzip2);
        assert_eq!(Compression::from_name("s3://b/x/out.txt.gz"), Compression::Gzip);
        assert_eq!(Compression::from_name("dir.v2/out.jsonl.zst"), Compression::Zstd);
        assert_eq!(Compression::from_name("dir.bz2/out.jsonl"), Compression::None);
        assert_eq!(Compression::from_name("noext"), Compression::None);
    }

    #[test]
    fn test_compressed_streams_decode() {
        for codec in [
            Compression::None,
            Compression::Bzip2,
            Compression::Gzip,
            Compression::Zstd,
        ] {
            let mut writer = codec.writer(Vec::new()).unwrap();
            writer.write_all(b"{\"id\":\"GDL-1900-01-01-a-i0001\"}\n").unwrap();
            let bytes = writer.finish().unwrap();

            let mut text = String::new();
            codec
                .reader(bytes.as_slice())
                .unwrap()
                .read_to_string(&mut text)
                .unwrap();
            assert_eq!(text, "{\"id\":\"GDL-1900-01-01-a-i0001\"}\n", "{codec:?}");
        }
    }

    #[test]
    fn test_truncated_bzip2_fails() {
        let mut writer = Compression::Bzip2.writer(Vec::new()).unwrap();
        writer.write_all(&[b'x'; 4096]).unwrap();
        let mut bytes = writer.finish().unwrap();
        bytes.truncate(bytes.len() / 2);

        let mut sink = Vec::new();
        let result = Compression::Bzip2
            .reader(bytes.as_slice())
            .unwrap()
            .read_to_end(&mut sink);
        assert!(result.is_err());
    }
}
