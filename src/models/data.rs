use serde::{Deserialize, Serialize};
use std::fmt;

/// MRZ layouts the classifier can recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentFormat {
    TD1,  // ID Card (85.6mm × 54.0mm)
    TD2,  // ID Card (105.0mm × 74.0mm)
    TD3,  // Passport (125.0mm × 88.0mm)
    MRVA, // Visa Format-A (80.0mm × 120.0mm)
    MRVB, // Visa Format-B (74.0mm × 105.0mm)
    EEP,  // Exit-Entry Permit card (85.6mm × 54.0mm)
}

impl DocumentFormat {
    pub fn dimensions(&self) -> (f32, f32) {
        match self {
            DocumentFormat::TD1 => (85.6, 54.0),   // mm
            DocumentFormat::TD2 => (105.0, 74.0),  // mm
            DocumentFormat::TD3 => (125.0, 88.0),  // mm
            DocumentFormat::MRVA => (80.0, 120.0), // mm
            DocumentFormat::MRVB => (74.0, 105.0), // mm
            DocumentFormat::EEP => (85.6, 54.0),   // mm
        }
    }

    pub fn mrz_lines(&self) -> usize {
        match self {
            DocumentFormat::TD1 => 3,
            DocumentFormat::TD2 => 2,
            DocumentFormat::TD3 => 2,
            DocumentFormat::MRVA => 2,
            DocumentFormat::MRVB => 2,
            DocumentFormat::EEP => 1,
        }
    }

    pub fn mrz_chars_per_line(&self) -> usize {
        match self {
            DocumentFormat::TD1 => 30,
            DocumentFormat::TD2 => 36,
            DocumentFormat::TD3 => 44,
            DocumentFormat::MRVA => 44,
            DocumentFormat::MRVB => 36,
            DocumentFormat::EEP => 30,
        }
    }

    /// Width over height of the physical document.
    pub fn aspect_ratio(&self) -> f32 {
        let (w, h) = self.dimensions();
        w / h
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            DocumentFormat::TD1 => "TD1",
            DocumentFormat::TD2 => "TD2",
            DocumentFormat::TD3 => "TD3",
            DocumentFormat::MRVA => "MRV-A",
            DocumentFormat::MRVB => "MRV-B",
            DocumentFormat::EEP => "EEP",
        };
        f.write_str(name)
    }
}

/// Document families the parsers and the record assembler distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentFamily {
    TD3,
    EEP,
}

/// One line handed back by the external text recognizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedLine {
    pub text: String,
    pub confidence: f32,
    /// Top edge of the line, normalized to [0, 1] over the recognized region
    pub vertical_position: f32,
}

impl RecognizedLine {
    pub fn new(text: &str, confidence: f32, vertical_position: f32) -> Self {
        RecognizedLine {
            text: text.to_string(),
            confidence,
            vertical_position,
        }
    }
}

/// A recognized line that survived MRZ filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct MrzCandidate {
    pub text: String,
    pub vertical_position: f32,
    pub confidence: f32,
}

/// Outcome of each check digit found in the MRZ. Only TD3 treats failures
/// as fatal; the permit parser reports them here instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckDigitReport {
    pub document_number: bool,
    pub date_of_birth: bool,
    pub date_of_expiry: bool,
    pub composite: Option<bool>,
}

impl CheckDigitReport {
    pub fn all_valid(&self) -> bool {
        self.document_number && self.date_of_birth && self.date_of_expiry && self.composite.unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedMrzRecord {
    pub document_code: String,
    pub document_number: String,
    /// YYMMDD
    pub date_of_birth: String,
    /// YYMMDD
    pub date_of_expiry: String,
    pub nationality: Option<String>,
    pub sex: Option<String>,
    pub chinese_name: Option<String>,
    pub document_family: DocumentFamily,
    pub issuing_state: Option<String>,
    pub primary_identifier: Option<String>,
    pub secondary_identifier: Option<String>,
    pub personal_number: Option<String>,
    pub check_digits: CheckDigitReport,
}

impl ParsedMrzRecord {
    pub fn new(
        family: DocumentFamily,
        document_code: &str,
        document_number: &str,
        date_of_birth: &str,
        date_of_expiry: &str,
    ) -> Self {
        ParsedMrzRecord {
            document_code: document_code.to_string(),
            document_number: document_number.to_string(),
            date_of_birth: date_of_birth.to_string(),
            date_of_expiry: date_of_expiry.to_string(),
            nationality: None,
            sex: None,
            chinese_name: None,
            document_family: family,
            issuing_state: None,
            primary_identifier: None,
            secondary_identifier: None,
            personal_number: None,
            check_digits: CheckDigitReport::default(),
        }
    }

    /// Romanized name as "SURNAME GIVEN NAMES".
    pub fn full_name(&self) -> Option<String> {
        let parts: Vec<&str> = [&self.primary_identifier, &self.secondary_identifier]
            .iter()
            .filter_map(|p| p.as_deref())
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}
