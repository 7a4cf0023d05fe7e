use crate::models::DocumentFormat;
use crate::validation::FormatClassifier;

/// Character-level OCR repairs for MRZ text.
pub struct FieldCorrection;

impl FieldCorrection {
    /// Map a character that OCR commonly confuses with a digit onto that digit.
    pub fn repair_char(c: char) -> char {
        match c {
            'O' | 'Q' | 'D' => '0',
            'I' | 'l' => '1',
            'Z' => '2',
            'S' => '5',
            'B' => '8',
            _ => c,
        }
    }

    /// Single-pass substitution of digit look-alikes. Every substitution
    /// produces a digit, so running it twice changes nothing.
    pub fn repair_common_ocr_errors(text: &str) -> String {
        text.chars().map(Self::repair_char).collect()
    }

    /// Repair a numeric field and report whether it is now all digits.
    pub fn repair_numeric(field: &str) -> Option<String> {
        let repaired = Self::repair_common_ocr_errors(field);
        if !repaired.is_empty() && repaired.chars().all(|c| c.is_ascii_digit()) {
            Some(repaired)
        } else {
            None
        }
    }

    /// Restore the `CS` permit prefix from its usual misreads.
    pub fn correct_eep_prefix(line: &str) -> String {
        if FormatClassifier::has_eep_prefix(line) && !line.starts_with("CS") {
            format!("CS{}", &line[2..])
        } else {
            line.to_string()
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum FieldKind {
    Numeric,
    Alpha,
}

/// Brings raw MRZ candidates to a canonical shape before they are compared
/// frame to frame: MRZ alphabet only, canonical line length, `O`/`0`
/// swapped according to the field each position belongs to.
pub struct MrzCleaner;

impl MrzCleaner {
    pub fn normalize(text: &str, format: DocumentFormat) -> String {
        let lines: Vec<String> = text
            .lines()
            .map(Self::to_mrz_alphabet)
            .filter(|l| !l.is_empty())
            .collect();
        let line_count = lines.len();

        lines
            .iter()
            .enumerate()
            .map(|(index, line)| Self::normalize_line(line, format, index, line_count))
            .collect::<Vec<String>>()
            .join("\n")
    }

    pub fn normalize_line(line: &str, format: DocumentFormat, index: usize, line_count: usize) -> String {
        let mut line = Self::to_mrz_alphabet(line);
        if format == DocumentFormat::EEP && index == 0 {
            line = FieldCorrection::correct_eep_prefix(&line);
        }
        let line = line.replace('$', "S");

        let length = format.mrz_chars_per_line();
        let mut chars: Vec<char> = line.chars().take(length).collect();
        while chars.len() < length {
            chars.push('<');
        }

        let role = Self::line_role(&chars, format, index, line_count);
        for (position, c) in chars.iter_mut().enumerate() {
            match Self::field_kind(format, role, position) {
                Some(FieldKind::Numeric) if *c == 'O' => *c = '0',
                Some(FieldKind::Alpha) if *c == '0' => *c = 'O',
                _ => {}
            }
        }
        chars.into_iter().collect()
    }

    /// Uppercase, drop whitespace and turn stray punctuation into fillers.
    fn to_mrz_alphabet(line: &str) -> String {
        line.chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| {
                let c = c.to_ascii_uppercase();
                if c.is_ascii_uppercase() || c.is_ascii_digit() || c == '<' {
                    c
                } else if c == '$' {
                    // kept so the permit prefix can still be recognized
                    '$'
                } else {
                    '<'
                }
            })
            .collect()
    }

    /// Which physical MRZ line this is (0-based), using the digit density to
    /// tell data lines from name lines when a line arrives on its own.
    fn line_role(chars: &[char], format: DocumentFormat, index: usize, line_count: usize) -> usize {
        let digits = chars.iter().filter(|c| c.is_ascii_digit()).count();
        match format {
            DocumentFormat::TD3 | DocumentFormat::MRVA | DocumentFormat::TD2 | DocumentFormat::MRVB => {
                if line_count >= 2 {
                    index.min(1)
                } else if digits >= 8 {
                    1
                } else {
                    0
                }
            }
            DocumentFormat::TD1 => index.min(2),
            DocumentFormat::EEP => index,
        }
    }

    fn field_kind(format: DocumentFormat, role: usize, position: usize) -> Option<FieldKind> {
        use FieldKind::*;
        match (format, role) {
            (DocumentFormat::TD3 | DocumentFormat::MRVA, 1) => match position {
                9 | 13..=19 | 21..=27 | 42 | 43 => Some(Numeric),
                10..=12 => Some(Alpha),
                _ => None,
            },
            (DocumentFormat::TD2 | DocumentFormat::MRVB, 1) => match position {
                9 | 13..=19 | 21..=27 | 35 => Some(Numeric),
                10..=12 => Some(Alpha),
                _ => None,
            },
            (DocumentFormat::TD3 | DocumentFormat::MRVA | DocumentFormat::TD2 | DocumentFormat::MRVB, 0) => {
                if position >= 2 {
                    Some(Alpha)
                } else {
                    None
                }
            }
            (DocumentFormat::TD1, 0) => match position {
                2..=4 => Some(Alpha),
                14 => Some(Numeric),
                _ => None,
            },
            (DocumentFormat::TD1, 1) => match position {
                0..=6 | 8..=14 | 29 => Some(Numeric),
                15..=17 => Some(Alpha),
                _ => None,
            },
            (DocumentFormat::TD1, 2) => Some(Alpha),
            (DocumentFormat::EEP, 0) => match position {
                0 | 1 => Some(Alpha),
                3..=11 | 13..=19 | 21..=27 | 29 => Some(Numeric),
                _ => None,
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repair_table() {
        assert_eq!(FieldCorrection::repair_common_ocr_errors("OQDIlZSB"), "00011258");
        assert_eq!(FieldCorrection::repair_common_ocr_errors("9501O1"), "950101");
        assert_eq!(FieldCorrection::repair_numeric("95O1O1").as_deref(), Some("950101"));
        assert_eq!(FieldCorrection::repair_numeric("95<101"), None);
    }

    #[test]
    fn test_repair_is_idempotent() {
        let samples = ["P<UTOERIKSSON<<ANNA", "L898902C36UTO7408122F", "OQDIlZSBxyz<<", "", "CS12345678"];
        for sample in samples {
            let once = FieldCorrection::repair_common_ocr_errors(sample);
            assert_eq!(FieldCorrection::repair_common_ocr_errors(&once), once);
        }
    }

    #[test]
    fn test_eep_prefix() {
        assert_eq!(FieldCorrection::correct_eep_prefix("C$C12345678"), "CSC12345678");
        assert_eq!(FieldCorrection::correct_eep_prefix("C5C12345678"), "CSC12345678");
        assert_eq!(FieldCorrection::correct_eep_prefix("CSC12345678"), "CSC12345678");
        assert_eq!(FieldCorrection::correct_eep_prefix("P<UTO"), "P<UTO");
    }

    #[test]
    fn test_normalize_pads_and_fixes_context() {
        let cleaned = MrzCleaner::normalize_line("L898902C36UT07408122F12O4159ZE184226B", DocumentFormat::TD3, 0, 1);
        assert_eq!(cleaned.len(), 44);
        // nationality keeps letters, expiry keeps digits
        assert_eq!(&cleaned[10..13], "UTO");
        assert_eq!(&cleaned[21..27], "120415");
        assert!(cleaned.ends_with("<<<<<<<"));
    }

    #[test]
    fn test_normalize_eep_line() {
        let cleaned = MrzCleaner::normalize("c$C12345678 4<25O1012<9501013<6<<<<", DocumentFormat::EEP);
        assert_eq!(cleaned, "CSC123456784<2501012<9501013<6");
    }
}
