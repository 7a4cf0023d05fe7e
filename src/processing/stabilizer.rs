use log::{debug, info};

use crate::models::{DocumentFormat, RecognizedLine};
use crate::processing::candidates::CandidateExtractor;
use crate::processing::field_correction::MrzCleaner;
use crate::utils::StabilizerConfig;
use crate::validation::FormatClassifier;

/// Debounce state carried from frame to frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionState {
    pub last_stable_text: String,
    pub consecutive_count: u32,
    pub has_accepted: bool,
    pub last_format: Option<DocumentFormat>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StabilizerVerdict {
    /// No MRZ-like line in this frame; the debounce state is untouched
    NoCandidates,
    Pending {
        format: DocumentFormat,
        consecutive_count: u32,
    },
    Accepted {
        format: DocumentFormat,
        text: String,
        consecutive_count: u32,
    },
    /// A previous frame was accepted; nothing was extracted
    AlreadyAccepted,
}

/// Requires the same MRZ across several frames (or one very confident
/// read) before handing it over. Acceptance latches until `reset`.
pub struct MrzStabilizer {
    config: StabilizerConfig,
    extractor: CandidateExtractor,
    state: DetectionState,
}

impl MrzStabilizer {
    pub fn new(config: StabilizerConfig) -> Self {
        let extractor = CandidateExtractor::new(config.max_candidates);
        MrzStabilizer {
            config,
            extractor,
            state: DetectionState::default(),
        }
    }

    pub fn state(&self) -> &DetectionState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = DetectionState::default();
    }

    /// Feed one frame worth of recognized lines.
    pub fn process_frame(&mut self, lines: &[RecognizedLine]) -> StabilizerVerdict {
        if self.state.has_accepted {
            return StabilizerVerdict::AlreadyAccepted;
        }

        let candidates = self.extractor.extract(lines);
        if candidates.is_empty() {
            return StabilizerVerdict::NoCandidates;
        }

        let raw_text = candidates.iter().map(|c| c.text.as_str()).collect::<Vec<&str>>().join("\n");
        let format = FormatClassifier::classify_text(&raw_text);
        let normalized = MrzCleaner::normalize(&raw_text, format);
        let average_confidence =
            candidates.iter().map(|c| c.confidence).sum::<f32>() / candidates.len() as f32;

        self.observe(&normalized, format, average_confidence)
    }

    /// Debounce step on already normalized text.
    pub fn observe(&mut self, normalized: &str, format: DocumentFormat, average_confidence: f32) -> StabilizerVerdict {
        if self.state.has_accepted {
            return StabilizerVerdict::AlreadyAccepted;
        }

        // the baseline only moves when similarity breaks
        if !self.state.last_stable_text.is_empty() && self.is_similar(&self.state.last_stable_text, normalized) {
            self.state.consecutive_count += 1;
        } else {
            if self.state.consecutive_count > 0 {
                debug!("MRZ changed, restarting count ({:?})", format);
            }
            self.state.consecutive_count = 1;
            self.state.last_stable_text = normalized.to_string();
        }
        self.state.last_format = Some(format);

        let count = self.state.consecutive_count;
        let accepted = count >= self.config.required_consecutive
            || (count >= 1 && average_confidence >= self.config.high_confidence);
        if accepted {
            self.state.has_accepted = true;
            info!(
                "MRZ accepted after {} frame(s) (format {}, confidence {:.2})",
                count, format, average_confidence
            );
            StabilizerVerdict::Accepted {
                format,
                text: normalized.to_string(),
                consecutive_count: count,
            }
        } else {
            StabilizerVerdict::Pending {
                format,
                consecutive_count: count,
            }
        }
    }

    /// Positional similarity with a length tolerance.
    pub fn is_similar(&self, previous: &str, current: &str) -> bool {
        let ratio = similarity_ratio(previous, current, self.config.max_length_difference);
        let longest = previous.chars().count().max(current.chars().count());
        let threshold = if longest > self.config.long_line_threshold {
            self.config.long_line_similarity
        } else {
            self.config.short_line_similarity
        };
        ratio >= threshold
    }
}

/// Share of positions holding the same character, over the longer length.
/// Strings whose lengths differ by more than `max_length_difference` score 0.
pub fn similarity_ratio(a: &str, b: &str, max_length_difference: usize) -> f32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.len().abs_diff(b.len()) > max_length_difference {
        return 0.0;
    }
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    let matches = a.iter().zip(b.iter()).filter(|(x, y)| x == y).count();
    matches as f32 / longest as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATA_LINE: &str = "L898902C36UTO7408122F1204159ZE184226B<<<<<10";

    fn frame(text: &str, confidence: f32) -> Vec<RecognizedLine> {
        vec![RecognizedLine::new(text, confidence, 0.8)]
    }

    #[test]
    fn test_low_confidence_accepts_on_third_frame() {
        let mut stabilizer = MrzStabilizer::new(StabilizerConfig::default());
        let first = stabilizer.process_frame(&frame(DATA_LINE, 0.5));
        assert!(matches!(first, StabilizerVerdict::Pending { consecutive_count: 1, .. }));
        let second = stabilizer.process_frame(&frame(DATA_LINE, 0.5));
        assert!(matches!(second, StabilizerVerdict::Pending { consecutive_count: 2, .. }));
        let third = stabilizer.process_frame(&frame(DATA_LINE, 0.5));
        match third {
            StabilizerVerdict::Accepted { text, format, consecutive_count } => {
                assert_eq!(consecutive_count, 3);
                assert_eq!(format, DocumentFormat::TD3);
                assert_eq!(text, DATA_LINE);
            }
            other => panic!("expected acceptance, got {:?}", other),
        }
        assert!(stabilizer.state().has_accepted);
        assert_eq!(stabilizer.process_frame(&frame(DATA_LINE, 0.5)), StabilizerVerdict::AlreadyAccepted);
    }

    #[test]
    fn test_high_confidence_accepts_immediately() {
        let mut stabilizer = MrzStabilizer::new(StabilizerConfig::default());
        let verdict = stabilizer.process_frame(&frame(DATA_LINE, 0.9));
        assert!(matches!(verdict, StabilizerVerdict::Accepted { consecutive_count: 1, .. }));
    }

    #[test]
    fn test_change_resets_count() {
        let mut stabilizer = MrzStabilizer::new(StabilizerConfig::default());
        stabilizer.process_frame(&frame(DATA_LINE, 0.5));
        stabilizer.process_frame(&frame(DATA_LINE, 0.5));
        let verdict = stabilizer.process_frame(&frame("CSC123456788<2501017<9501016<0", 0.5));
        assert!(matches!(verdict, StabilizerVerdict::Pending { consecutive_count: 1, format: DocumentFormat::EEP }));
        assert_eq!(stabilizer.state().last_stable_text, "CSC123456788<2501017<9501016<0");
    }

    #[test]
    fn test_small_ocr_jitter_counts_as_same() {
        let mut stabilizer = MrzStabilizer::new(StabilizerConfig::default());
        stabilizer.process_frame(&frame(DATA_LINE, 0.5));
        stabilizer.process_frame(&frame("L898902C36UTO7408122F1204159ZE184228B<<<<<10", 0.5));
        let verdict = stabilizer.process_frame(&frame("L898902C36UTO7408122F1204159ZE1842Z6B<<<<<10", 0.5));
        assert!(matches!(verdict, StabilizerVerdict::Accepted { .. }));
    }

    #[test]
    fn test_gradual_drift_does_not_accept() {
        let mut stabilizer = MrzStabilizer::new(StabilizerConfig::default());
        let drifted = format!("XXXXXXXX{}", &DATA_LINE[8..]);
        let further = format!("XXXXXXXXYYYYYYYY{}", &DATA_LINE[16..]);
        assert!(stabilizer.is_similar(&drifted, &further));
        assert!(!stabilizer.is_similar(DATA_LINE, &further));

        stabilizer.observe(DATA_LINE, DocumentFormat::TD3, 0.5);
        let second = stabilizer.observe(&drifted, DocumentFormat::TD3, 0.5);
        assert!(matches!(second, StabilizerVerdict::Pending { consecutive_count: 2, .. }));
        assert_eq!(stabilizer.state().last_stable_text, DATA_LINE);
        let third = stabilizer.observe(&further, DocumentFormat::TD3, 0.5);
        assert!(matches!(third, StabilizerVerdict::Pending { consecutive_count: 1, .. }));
        assert_eq!(stabilizer.state().last_stable_text, further);
    }

    #[test]
    fn test_frames_without_mrz_leave_state_alone() {
        let mut stabilizer = MrzStabilizer::new(StabilizerConfig::default());
        stabilizer.process_frame(&frame(DATA_LINE, 0.5));
        assert_eq!(stabilizer.process_frame(&frame("nothing here", 0.9)), StabilizerVerdict::NoCandidates);
        assert_eq!(stabilizer.state().consecutive_count, 1);
    }

    #[test]
    fn test_reset_clears_latch() {
        let mut stabilizer = MrzStabilizer::new(StabilizerConfig::default());
        stabilizer.process_frame(&frame(DATA_LINE, 0.95));
        stabilizer.reset();
        assert!(!stabilizer.state().has_accepted);
        assert_eq!(stabilizer.state().consecutive_count, 0);
    }

    #[test]
    fn test_similarity_ratio() {
        assert_eq!(similarity_ratio("ABCD", "ABCD", 6), 1.0);
        assert_eq!(similarity_ratio("ABCD", "ABXD", 6), 0.75);
        assert_eq!(similarity_ratio("A", "ABCDEFGHIJ", 6), 0.0);
    }
}
