use log::{debug, info};

use super::{EepParser, MrzParser, Td3Parser};
use crate::models::ParsedMrzRecord;
use crate::utils::PassportError;

/// Holds the registered MRZ parsers and picks the first one that yields a
/// record for the given OCR text.
pub struct MrzParserManager {
    parsers: Vec<Box<dyn MrzParser>>,
}

impl Default for MrzParserManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MrzParserManager {
    /// Manager with the TD3 and EEP parsers registered.
    pub fn new() -> Self {
        MrzParserManager {
            parsers: vec![Box::new(Td3Parser), Box::new(EepParser)],
        }
    }

    pub fn with_parsers(parsers: Vec<Box<dyn MrzParser>>) -> Self {
        MrzParserManager { parsers }
    }

    pub fn register(&mut self, parser: Box<dyn MrzParser>) {
        self.parsers.push(parser);
    }

    /// Try every parser on every line, then on the whole text with the
    /// line breaks removed (single MRZ lines that OCR split in two).
    pub fn parse(&self, text: &str) -> Option<ParsedMrzRecord> {
        let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

        for line in &lines {
            if let Some(record) = self.parse_line(line, &lines) {
                return Some(record);
            }
        }

        let joined: String = lines.concat();
        if lines.len() > 1 {
            debug!("No single line parsed, retrying on joined text ({} chars)", joined.len());
            if let Some(record) = self.parse_line(&joined, &lines) {
                return Some(record);
            }
        }
        None
    }

    /// Like `parse`, but reports the failure as an error.
    pub fn parse_required(&self, text: &str) -> Result<ParsedMrzRecord, PassportError> {
        self.parse(text)
            .ok_or_else(|| PassportError::MrzParsingError("No registered parser accepted the MRZ text".to_string()))
    }

    fn parse_line(&self, line: &str, lines: &[&str]) -> Option<ParsedMrzRecord> {
        for parser in self.parsers.iter().filter(|p| p.can_parse(line)) {
            if let Some(mut record) = parser.parse(line) {
                parser.enrich(&mut record, lines);
                info!(
                    "Parsed {:?} MRZ for document {}",
                    parser.document_family(),
                    record.document_number
                );
                return Some(record);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentFamily;

    #[test]
    fn test_parses_two_line_passport() {
        let text = "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<\nL898902C36UTO7408122F1204159ZE184226B<<<<<10";
        let record = MrzParserManager::new().parse(text).unwrap();
        assert_eq!(record.document_family, DocumentFamily::TD3);
        assert_eq!(record.document_number, "L898902C3");
        assert_eq!(record.primary_identifier.as_deref(), Some("ERIKSSON"));
    }

    #[test]
    fn test_joins_split_line() {
        let text = "CSC123456788<25010\n17<9501016<0";
        let record = MrzParserManager::new().parse(text).unwrap();
        assert_eq!(record.document_family, DocumentFamily::EEP);
        assert_eq!(record.date_of_expiry, "250101");
    }

    #[test]
    fn test_unparseable_text() {
        let manager = MrzParserManager::new();
        assert!(manager.parse("hello world").is_none());
        assert!(matches!(manager.parse_required(""), Err(PassportError::MrzParsingError(_))));
    }

    #[test]
    fn test_custom_parser_list() {
        let manager = MrzParserManager::with_parsers(vec![Box::new(EepParser)]);
        assert!(manager
            .parse("L898902C36UTO7408122F1204159ZE184226B<<<<<10")
            .is_none());
    }
}
