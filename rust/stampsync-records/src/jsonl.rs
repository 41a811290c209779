//! JSON-lines reading and writing.

use std::io::{BufRead, Write};

use serde_json::Value;

/// A line that could not be parsed as JSON.
#[derive(Debug)]
pub struct MalformedLine {
    /// 1-based line number.
    pub line: u64,
    pub error: serde_json::Error,
}

/// One item produced by [`JsonLines`].
#[derive(Debug)]
pub enum Line {
    Record { line: u64, text: String, value: Value },
    Malformed(MalformedLine),
}

/// Iterator over the JSON records of a line-oriented stream. Blank lines are
/// skipped; malformed lines are yielded as [`Line::Malformed`] and reading
/// continues. Read (or decompression) failures end the iteration with an error.
pub struct JsonLines<R> {
    reader: R,
    line: u64,
    buf: String,
}

impl<R: BufRead> JsonLines<R> {
    pub fn new(reader: R) -> JsonLines<R> {
        JsonLines {
            reader,
            line: 0,
            buf: String::new(),
        }
    }
}

impl<R: BufRead> Iterator for JsonLines<R> {
    type Item = std::io::Result<Line>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            if stampsync_common::try_or_ret_some_err!(self.reader.read_line(&mut self.buf)) == 0 {
                return None;
            }
            self.line += 1;
            let text = self.buf.trim_end_matches(['\n', '\r']);
            if text.trim().is_empty() {
                continue;
            }
            let line = self.line;
            return Some(Ok(match serde_json::from_str::<Value>(text) {
                Ok(value) => Line::Record {
                    line,
                    text: text.to_string(),
                    value,
                },
                Err(error) => Line::Malformed(MalformedLine { line, error }),
            }));
        }
    }
}

/// Writes one output value per line: strings verbatim, every other value as
/// compact JSON.
pub struct JsonLinesWriter<W> {
    writer: W,
    written: u64,
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(writer: W) -> JsonLinesWriter<W> {
        JsonLinesWriter { writer, written: 0 }
    }

    pub fn write_value(&mut self, value: &Value) -> std::io::Result<()> {
        match value {
            Value::String(s) => self.writer.write_all(s.as_bytes())?,
            other => serde_json::to_writer(&mut self.writer, other)?,
        }
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_malformed_lines_do_not_stop_reading() {
        let input = "{\"a\":1}\n\nnot json\n{\"a\":2}\r\n";
        let lines: Vec<Line> = JsonLines::new(input.as_bytes())
            .collect::<std::io::Result<_>>()
            .unwrap();
        assert_eq!(lines.len(), 3);
        assert!(matches!(&lines[0], Line::Record { line: 1, value, .. } if value["a"] == 1));
        assert!(matches!(&lines[1], Line::Malformed(MalformedLine { line: 3, .. })));
        assert!(matches!(&lines[2], Line::Record { line: 4, text, .. } if text == "{\"a\":2}"));
    }

    #[test]
    fn test_writer_output_forms() {
        let mut writer = JsonLinesWriter::new(Vec::new());
        writer.write_value(&json!("plain token line")).unwrap();
        writer.write_value(&json!({"id": "x", "n": 1})).unwrap();
        writer.write_value(&json!(["é", 2])).unwrap();
        assert_eq!(writer.written(), 3);
        assert_eq!(
            String::from_utf8(writer.into_inner()).unwrap(),
            "plain token line\n{\"id\":\"x\",\"n\":1}\n[\"é\",2]\n"
        );
    }
}
