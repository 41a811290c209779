//! Synthetic newspaper corpora.
//!
//! Records mimic the content-item files of a digitized newspaper archive:
//! one JSON object per line with an item id (`<paper>-<yyyy>-<mm>-<dd>-a-i<nnnn>`),
//! a language, an item type and some text.

use chrono::NaiveDate;
use serde_json::{Value, json};
use stampsync_records::Compression;

const LANGUAGES: &[&str] = &["fr", "de", "lb", "en"];
const ITEM_TYPES: &[&str] = &["ar", "ad", "img", "ob"];
const WORDS: &[&str] = &[
    "gazette", "conseil", "commune", "journal", "marché", "séance", "Bericht", "Zeitung",
    "weather", "assembly", "cantonal", "railway",
];

/// Seeded generator of newspaper content items.
pub struct NewspaperGen {
    rng: fastrand::Rng,
}

impl NewspaperGen {
    pub fn new(seed: u64) -> NewspaperGen {
        NewspaperGen {
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    /// Generates `count` content items of one issue.
    pub fn issue(&mut self, newspaper: &str, date: NaiveDate, count: usize) -> Vec<Value> {
        (1..=count)
            .map(|i| {
                let words = self.rng.usize(3..12);
                let text: Vec<&str> = (0..words)
                    .map(|_| WORDS[self.rng.usize(..WORDS.len())])
                    .collect();
                json!({
                    "id": format!("{newspaper}-{}-a-i{i:04}", date.format("%Y-%m-%d")),
                    "lg": LANGUAGES[self.rng.usize(..LANGUAGES.len())],
                    "tp": ITEM_TYPES[self.rng.usize(..ITEM_TYPES.len())],
                    "ft": text.join(" "),
                })
            })
            .collect()
    }
}

/// Serializes records as JSON lines compressed with `compression`.
pub fn encode_jsonl(records: &[Value], compression: Compression) -> anyhow::Result<Vec<u8>> {
    let lines: Vec<String> = records
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<_, _>>()?;
    let mut text = lines.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    encode_text(&text, compression)
}

/// Compresses raw text; used for deliberately malformed inputs.
pub fn encode_text(text: &str, compression: Compression) -> anyhow::Result<Vec<u8>> {
    use std::io::Write;

    let mut writer = compression.writer(Vec::new())?;
    writer.write_all(text.as_bytes())?;
    Ok(writer.finish()?)
}
