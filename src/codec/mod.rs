//! Thread file codec: record framing and the trailing index/CC blocks.

pub mod record;
pub mod tail;

pub use record::{read_record_header, write_record, RecordStats};
pub use tail::{read_cc, read_tail, write_tail, ThreadTail};
