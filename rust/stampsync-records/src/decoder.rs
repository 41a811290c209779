use std::io::{BufReader, Read};

use stampsync_common::error::Error;

use crate::{
    compression::Compression,
    jsonl::{JsonLines, Line},
};

/// Statistics of a fully decoded object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeSummary {
    pub records: u64,
}

/// Decodes a whole record file, proving it is readable end to end.
///
/// `on_record` receives the raw text of every record line. Any structural
/// failure (bad compression stream, invalid UTF-8, unparsable line) is
/// reported as `ErrorKind::CorruptedObject` naming `name`.
pub trait RecordDecoder: Send + Sync {
    fn decode(
        &self,
        name: &str,
        reader: &mut dyn Read,
        on_record: &mut dyn FnMut(&str),
    ) -> stampsync_common::Result<DecodeSummary>;
}

/// The built-in decoder: compression chosen by the extension of `name`,
/// one JSON value per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesDecoder;

impl RecordDecoder for JsonLinesDecoder {
    fn decode(
        &self,
        name: &str,
        reader: &mut dyn Read,
        on_record: &mut dyn FnMut(&str),
    ) -> stampsync_common::Result<DecodeSummary> {
        let codec = Compression::from_name(name);
        let decompressed = codec
            .reader(reader)
            .map_err(|e| Error::corrupted(name, e.to_string()))?;

        let mut summary = DecodeSummary::default();
        for line in JsonLines::new(BufReader::new(decompressed)) {
            match line.map_err(|e| Error::corrupted(name, e.to_string()))? {
                Line::Record { text, .. } => {
                    on_record(&text);
                    summary.records += 1;
                }
                Line::Malformed(malformed) => {
                    return Err(Error::corrupted(
                        name,
                        format!("line {}: {}", malformed.line, malformed.error),
                    ));
                }
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use stampsync_common::error::ErrorKind;

    use super::*;

    fn bz2(text: &str) -> Vec<u8> {
        let mut writer = Compression::Bzip2.writer(Vec::new()).unwrap();
        writer.write_all(text.as_bytes()).unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn test_decode_counts_records() {
        let data = bz2("{\"id\":1}\n{\"id\":2}\n");
        let mut seen = Vec::new();
        let summary = JsonLinesDecoder
            .decode("a.jsonl.bz2", &mut data.as_slice(), &mut |line| {
                seen.push(line.to_string())
            })
            .unwrap();
        assert_eq!(summary.records, 2);
        assert_eq!(seen, vec!["{\"id\":1}", "{\"id\":2}"]);
    }

    #[test]
    fn test_decode_rejects_bad_line() {
        let data = bz2("{\"id\":1}\n{\"id\":\n");
        let err = JsonLinesDecoder
            .decode("s3://b/a.jsonl.bz2", &mut data.as_slice(), &mut |_| {})
            .unwrap_err();
        match err.kind() {
            ErrorKind::CorruptedObject { uri, reason } => {
                assert_eq!(uri, "s3://b/a.jsonl.bz2");
                assert!(reason.starts_with("line 2"), "{reason}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_wrong_codec() {
        let data = b"{\"id\":1}\n".to_vec();
        assert!(
            JsonLinesDecoder
                .decode("a.jsonl.bz2", &mut data.as_slice(), &mut |_| {})
                .is_err()
        );
    }
}
