use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::utils::PassportError;

/// Tunables for the whole scan-and-read flow. Every field has a default, so a
/// config file only needs to name the values it overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub stabilizer: StabilizerConfig,
    pub alignment: AlignmentConfig,
    pub pipeline: PipelineConfig,
    pub reader: ReaderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
    /// Consecutive similar detections needed before a low-confidence MRZ is accepted
    pub required_consecutive: u32,
    /// Average confidence that allows acceptance on the first detection
    pub high_confidence: f32,
    /// Maximum length difference for two detections to be compared at all
    pub max_length_difference: usize,
    pub long_line_similarity: f32,
    pub short_line_similarity: f32,
    /// Lines longer than this use `long_line_similarity`
    pub long_line_threshold: usize,
    pub max_candidates: usize,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        StabilizerConfig {
            required_consecutive: 3,
            high_confidence: 0.75,
            max_length_difference: 6,
            long_line_similarity: 0.75,
            short_line_similarity: 0.80,
            long_line_threshold: 40,
            max_candidates: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    pub cooldown_ms: u64,
    pub iou_threshold: f32,
    /// Relaxed IoU threshold used while the previous frame was aligned
    pub iou_hysteresis_threshold: f32,
    pub position_tolerance: f32,
    pub min_area_ratio: f32,
    pub max_area_ratio: f32,
    pub roi_padding: f32,
    pub required_aligned_frames: u32,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        AlignmentConfig {
            cooldown_ms: 50,
            iou_threshold: 0.70,
            iou_hysteresis_threshold: 0.65,
            position_tolerance: 0.15,
            min_area_ratio: 0.75,
            max_area_ratio: 1.30,
            roi_padding: 0.10,
            required_aligned_frames: 3,
        }
    }
}

impl AlignmentConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub min_frame_interval_ms: u64,
    /// Only run text recognition on frames the alignment engine reports aligned
    pub require_alignment_for_ocr: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            min_frame_interval_ms: 250,
            require_alignment_for_ocr: true,
        }
    }
}

impl PipelineConfig {
    pub fn min_frame_interval(&self) -> Duration {
        Duration::from_millis(self.min_frame_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub transceive_timeout_ms: u64,
    /// Le used for READ BINARY chunks; 0xDF keeps protected responses under 256 bytes
    pub read_chunk_size: u8,
    pub try_pace: bool,
    /// Read DG3/DG4 when EF.COM advertises them (they usually need EAC and fail)
    pub read_eac_protected_groups: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            transceive_timeout_ms: 20_000,
            read_chunk_size: 0xDF,
            try_pace: true,
            read_eac_protected_groups: true,
        }
    }
}

impl ReaderConfig {
    pub fn transceive_timeout(&self) -> Duration {
        Duration::from_millis(self.transceive_timeout_ms)
    }
}

impl ScanConfig {
    pub fn from_json_str(json: &str) -> Result<Self, PassportError> {
        let config: ScanConfig = serde_json::from_str(json)
            .map_err(|e| PassportError::ConfigError(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, PassportError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<(), PassportError> {
        let a = &self.alignment;
        if a.iou_hysteresis_threshold > a.iou_threshold {
            return Err(PassportError::ConfigError(
                "alignment.iou_hysteresis_threshold must not exceed alignment.iou_threshold".to_string(),
            ));
        }
        if a.min_area_ratio >= a.max_area_ratio {
            return Err(PassportError::ConfigError(
                "alignment.min_area_ratio must be below alignment.max_area_ratio".to_string(),
            ));
        }
        if self.stabilizer.required_consecutive == 0 {
            return Err(PassportError::ConfigError(
                "stabilizer.required_consecutive must be at least 1".to_string(),
            ));
        }
        if self.reader.read_chunk_size == 0 {
            return Err(PassportError::ConfigError("reader.read_chunk_size must be non-zero".to_string()));
        }
        Ok(())
    }
}
