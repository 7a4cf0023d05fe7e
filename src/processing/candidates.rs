use lazy_static::lazy_static;
use regex::Regex;

use crate::models::{MrzCandidate, RecognizedLine};
use crate::validation::FormatClassifier;

const MIN_RAW_LENGTH: usize = 20;
const MIN_COMPACT_LENGTH: usize = 30;
const MAX_CANDIDATES: usize = 3;

lazy_static! {
    // nationality, birth date, optional check digit, sex, expiry
    static ref DATA_LINE_PATTERN: Regex = Regex::new(r"[A-Z]{3}\d{6}\d?[MF<]\d{6}").unwrap();
}

/// Picks MRZ-looking lines out of the text recognizer's output.
pub struct CandidateExtractor {
    max_candidates: usize,
}

impl Default for CandidateExtractor {
    fn default() -> Self {
        CandidateExtractor {
            max_candidates: MAX_CANDIDATES,
        }
    }
}

impl CandidateExtractor {
    pub fn new(max_candidates: usize) -> Self {
        CandidateExtractor {
            max_candidates: max_candidates.max(1),
        }
    }

    /// Filter, keep the most confident lines and return them in reading
    /// order (top to bottom).
    pub fn extract(&self, lines: &[RecognizedLine]) -> Vec<MrzCandidate> {
        let mut candidates: Vec<MrzCandidate> = lines
            .iter()
            .filter(|line| Self::looks_like_mrz(&line.text))
            .map(|line| MrzCandidate {
                text: line.text.trim().to_string(),
                vertical_position: line.vertical_position,
                confidence: line.confidence,
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(a.vertical_position.total_cmp(&b.vertical_position))
        });
        candidates.truncate(self.max_candidates);
        candidates.sort_by(|a, b| a.vertical_position.total_cmp(&b.vertical_position));
        candidates
    }

    pub fn looks_like_mrz(text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.chars().count() < MIN_RAW_LENGTH {
            return false;
        }
        let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.chars().count() < MIN_COMPACT_LENGTH {
            return false;
        }
        let upper = compact.to_uppercase();
        upper.contains('<') || DATA_LINE_PATTERN.is_match(&upper) || Self::has_family_prefix(&upper)
    }

    /// Cheap prefix check for the document families we read.
    fn has_family_prefix(line: &str) -> bool {
        FormatClassifier::has_eep_prefix(line)
            || line.starts_with("P<")
            || line.starts_with("I<")
            || line.starts_with("V<")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str, confidence: f32, y: f32) -> RecognizedLine {
        RecognizedLine::new(text, confidence, y)
    }

    #[test]
    fn test_filters_non_mrz_lines() {
        let extractor = CandidateExtractor::default();
        let lines = vec![
            line("PASSPORT", 0.99, 0.1),
            line("Surname / Nom: ERIKSSON and more words here", 0.9, 0.2),
            line("P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<", 0.8, 0.8),
            line("L898902C36UTO7408122F1204159ZE184226B<<<<<10", 0.7, 0.9),
        ];
        let candidates = extractor.extract(&lines);
        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].text.starts_with("P<UTO"));
    }

    #[test]
    fn test_pattern_without_fillers() {
        assert!(CandidateExtractor::looks_like_mrz("L898902C36UTO7408122F1204159ZE184226B"));
        assert!(!CandidateExtractor::looks_like_mrz("short<<"));
    }

    #[test]
    fn test_keeps_top_three_in_reading_order() {
        let extractor = CandidateExtractor::default();
        let lines = vec![
            line("AAAAAAAAAA<<<<<<<<<<AAAAAAAAAA1", 0.2, 0.1),
            line("BBBBBBBBBB<<<<<<<<<<BBBBBBBBBB2", 0.9, 0.7),
            line("CCCCCCCCCC<<<<<<<<<<CCCCCCCCCC3", 0.8, 0.3),
            line("DDDDDDDDDD<<<<<<<<<<DDDDDDDDDD4", 0.85, 0.5),
        ];
        let candidates = extractor.extract(&lines);
        let firsts: Vec<char> = candidates.iter().map(|c| c.text.chars().next().unwrap()).collect();
        assert_eq!(firsts, vec!['C', 'D', 'B']);
    }
}
