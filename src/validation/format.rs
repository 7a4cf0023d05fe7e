use crate::models::DocumentFormat;

const EEP_PREFIXES: [&str; 4] = ["CS", "C5", "C$", "C8"];

pub struct FormatClassifier;

impl FormatClassifier {
    /// Guess the MRZ layout from the first line. Rules are evaluated in a
    /// fixed order; EEP comes before TD1 because both start with `C` at 30
    /// characters.
    pub fn classify(first_line: &str, line_count: usize) -> DocumentFormat {
        let line = first_line.trim();
        let length = line.chars().count();
        let first = line.chars().next().unwrap_or(' ');

        if (28..=32).contains(&length)
            && (Self::has_eep_prefix(line) || (first == 'C' && line.contains('<')))
        {
            return DocumentFormat::EEP;
        }
        if line.starts_with("P<") || ((42..=46).contains(&length) && first != 'V') {
            return DocumentFormat::TD3;
        }
        if matches!(first, 'I' | 'A' | 'C') && (28..=32).contains(&length) {
            return DocumentFormat::TD1;
        }
        if (34..=38).contains(&length) && first != 'V' {
            return DocumentFormat::TD2;
        }
        if first == 'V' && (42..=46).contains(&length) {
            return DocumentFormat::MRVA;
        }
        if first == 'V' && (34..=38).contains(&length) {
            return DocumentFormat::MRVB;
        }
        Self::classify_by_length(length, line_count)
    }

    /// Classify multi-line OCR text by its first non-empty line.
    pub fn classify_text(text: &str) -> DocumentFormat {
        let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        Self::classify(lines.first().copied().unwrap_or(""), lines.len())
    }

    pub fn has_eep_prefix(line: &str) -> bool {
        EEP_PREFIXES.iter().any(|p| line.starts_with(p))
    }

    fn classify_by_length(length: usize, line_count: usize) -> DocumentFormat {
        if line_count >= 3 {
            DocumentFormat::TD1
        } else if length <= 32 {
            DocumentFormat::EEP
        } else if length <= 40 {
            DocumentFormat::TD2
        } else {
            DocumentFormat::TD3
        }
    }
}
