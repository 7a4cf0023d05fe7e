pub mod eep;
pub mod manager;
pub mod td3;

pub use eep::EepParser;
pub use manager::MrzParserManager;
pub use td3::Td3Parser;

use crate::models::{DocumentFamily, ParsedMrzRecord};

/// A parser for one MRZ family. The manager asks every registered parser
/// whether it recognizes a line before handing it over.
pub trait MrzParser: Send + Sync {
    fn can_parse(&self, line: &str) -> bool;

    fn parse(&self, line: &str) -> Option<ParsedMrzRecord>;

    fn document_family(&self) -> DocumentFamily;

    /// Fill in fields that live on the other lines of the same MRZ
    /// (names, document code). `lines` holds every line of the OCR text.
    fn enrich(&self, _record: &mut ParsedMrzRecord, _lines: &[&str]) {}
}

/// Uppercase and drop whitespace; parsers work on the raw MRZ alphabet.
/// Non-ASCII characters become fillers so byte offsets stay char offsets.
pub(crate) fn compact(line: &str) -> String {
    line.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c.is_ascii() { c.to_ascii_uppercase() } else { '<' })
        .collect()
}

/// Split an MRZ name field (`SURNAME<<GIVEN<NAMES`) into its two parts.
pub(crate) fn split_name(field: &str) -> (Option<String>, Option<String>) {
    let clean = |s: &str| {
        let joined = s.split('<').filter(|p| !p.is_empty()).collect::<Vec<&str>>().join(" ");
        if joined.is_empty() {
            None
        } else {
            Some(joined)
        }
    };
    match field.find("<<") {
        Some(index) => (clean(&field[..index]), clean(&field[index + 2..])),
        None => (clean(field), None),
    }
}

/// Pad with fillers or cut to exactly `length` characters.
pub(crate) fn fit(line: &str, length: usize) -> String {
    let mut fitted: String = line.chars().take(length).collect();
    while fitted.chars().count() < length {
        fitted.push('<');
    }
    fitted
}
