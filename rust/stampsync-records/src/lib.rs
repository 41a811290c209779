//! Record codecs for compressed JSON-lines corpora: compression selected by
//! extension, line-oriented JSON reading/writing, whole-object decoding used by
//! verification, record transforms used by aggregation, and publish validators.

pub mod compression;
pub mod decoder;
pub mod jsonl;
pub mod transform;
pub mod validator;

pub use compression::Compression;
pub use decoder::{DecodeSummary, JsonLinesDecoder, RecordDecoder};
pub use transform::{FieldPath, RecordTransform};
pub use validator::Validator;
