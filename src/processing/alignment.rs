use std::fmt;
use std::time::Instant;

use image::{DynamicImage, GenericImageView};
use log::{debug, trace};
use serde::Serialize;

use crate::processing::geometry::{order_corners, preview_map, AffineMap, Point, Rect};
use crate::processing::image::ImageProcessor;
use crate::utils::{AlignmentConfig, PassportError};

/// External detector returning candidate document boxes in the pixel space
/// of the region it was given.
pub trait RoughDetector: Send + Sync {
    fn detect(&self, region: &DynamicImage) -> Vec<Rect>;
}

/// External contour refiner returning four document corners, in any order,
/// in the pixel space of the region of interest.
pub trait QuadRefiner: Send + Sync {
    fn refine(&self, roi: &DynamicImage) -> Option<[Point; 4]>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlignmentState {
    NotReady,
    NoDocument,
    Detected,
    Aligned { consecutive: u32 },
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Guidance {
    NoDocument,
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    MoveCloser,
    MoveFarther,
    Align,
    HoldSteady,
}

impl fmt::Display for Guidance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Guidance::NoDocument => "Place the document inside the frame",
            Guidance::MoveUp => "Move the document up",
            Guidance::MoveDown => "Move the document down",
            Guidance::MoveLeft => "Move the document left",
            Guidance::MoveRight => "Move the document right",
            Guidance::MoveCloser => "Move closer",
            Guidance::MoveFarther => "Move farther away",
            Guidance::Align => "Align the document with the frame",
            Guidance::HoldSteady => "Hold steady",
        };
        f.write_str(text)
    }
}

/// Raw measurements of a detected document against the guide box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AlignmentMetrics {
    pub iou: f32,
    /// Center offset divided by the guide width; positive when the document
    /// sits right of the guide
    pub offset_x: f32,
    /// Center offset divided by the guide height; positive when below
    pub offset_y: f32,
    pub area_ratio: f32,
}

impl AlignmentMetrics {
    pub fn measure(document: &Rect, guide: &Rect) -> Self {
        let doc_center = document.center();
        let guide_center = guide.center();
        let safe = |v: f32| if v.abs() < f32::EPSILON { 1.0 } else { v };
        AlignmentMetrics {
            iou: document.iou(guide),
            offset_x: (doc_center.x - guide_center.x) / safe(guide.width),
            offset_y: (doc_center.y - guide_center.y) / safe(guide.height),
            area_ratio: document.area() / safe(guide.area()),
        }
    }

    pub fn position_ok(&self, config: &AlignmentConfig) -> bool {
        self.offset_x.abs() <= config.position_tolerance && self.offset_y.abs() <= config.position_tolerance
    }

    pub fn size_ok(&self, config: &AlignmentConfig) -> bool {
        self.area_ratio >= config.min_area_ratio && self.area_ratio <= config.max_area_ratio
    }
}

/// Alignment decision with hysteresis: the IoU bar drops and the size
/// check is waived while the previous frame was aligned.
pub fn evaluate_alignment(metrics: &AlignmentMetrics, was_aligned: bool, config: &AlignmentConfig) -> bool {
    let threshold = if was_aligned {
        config.iou_hysteresis_threshold
    } else {
        config.iou_threshold
    };
    metrics.iou >= threshold && metrics.position_ok(config) && (was_aligned || metrics.size_ok(config))
}

/// Guidance in fixed priority order: vertical, horizontal, distance, then
/// the generic prompts.
pub fn guidance(metrics: &AlignmentMetrics, aligned: bool, config: &AlignmentConfig) -> Guidance {
    let tolerance = config.position_tolerance;
    if metrics.offset_y > tolerance {
        Guidance::MoveUp
    } else if metrics.offset_y < -tolerance {
        Guidance::MoveDown
    } else if metrics.offset_x > tolerance {
        Guidance::MoveLeft
    } else if metrics.offset_x < -tolerance {
        Guidance::MoveRight
    } else if metrics.area_ratio < config.min_area_ratio {
        Guidance::MoveCloser
    } else if metrics.area_ratio > config.max_area_ratio {
        Guidance::MoveFarther
    } else if !aligned {
        Guidance::Align
    } else {
        Guidance::HoldSteady
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignmentFrame {
    pub detected: bool,
    pub aligned: bool,
    pub score: f32,
    /// Document corners in preview space, [TL, TR, BR, BL]
    pub corners: Option<[Point; 4]>,
    pub message: Guidance,
    pub state: AlignmentState,
}

impl AlignmentFrame {
    fn empty(state: AlignmentState) -> Self {
        AlignmentFrame {
            detected: false,
            aligned: false,
            score: 0.0,
            corners: None,
            message: Guidance::NoDocument,
            state,
        }
    }

    /// Enough consecutive aligned frames to run OCR or capture.
    pub fn is_confirmed(&self) -> bool {
        self.state == AlignmentState::Confirmed
    }
}

/// Per-session alignment state machine. Fuses the rough detector and the
/// refiner into preview-space corners and a debounced aligned signal.
pub struct AlignmentEngine {
    config: AlignmentConfig,
    detector: Box<dyn RoughDetector>,
    refiner: Box<dyn QuadRefiner>,
    /// Guide box in preview coordinates
    guide: Rect,
    preview_width: f32,
    preview_height: f32,
    was_aligned_last_frame: bool,
    consecutive_alignment_count: u32,
    last_check: Option<Instant>,
    last_frame: Option<AlignmentFrame>,
}

impl AlignmentEngine {
    pub fn new(
        config: AlignmentConfig,
        detector: Box<dyn RoughDetector>,
        refiner: Box<dyn QuadRefiner>,
        guide: Rect,
        preview_width: f32,
        preview_height: f32,
    ) -> Self {
        AlignmentEngine {
            config,
            detector,
            refiner,
            guide,
            preview_width,
            preview_height,
            was_aligned_last_frame: false,
            consecutive_alignment_count: 0,
            last_check: None,
            last_frame: None,
        }
    }

    /// Start a new scanning session.
    pub fn reset(&mut self) {
        self.was_aligned_last_frame = false;
        self.consecutive_alignment_count = 0;
        self.last_check = None;
        self.last_frame = None;
    }

    pub fn consecutive_alignment_count(&self) -> u32 {
        self.consecutive_alignment_count
    }

    pub fn process_frame(&mut self, frame: &DynamicImage) -> Result<AlignmentFrame, PassportError> {
        self.process_frame_at(frame, Instant::now())
    }

    pub fn process_frame_at(&mut self, frame: &DynamicImage, now: Instant) -> Result<AlignmentFrame, PassportError> {
        if let (Some(last), Some(previous)) = (self.last_check, &self.last_frame) {
            if now.saturating_duration_since(last) < self.config.cooldown() {
                trace!("Alignment cooldown, reusing previous frame");
                return Ok(previous.clone());
            }
        }
        self.last_check = Some(now);

        let result = self.check_frame(frame);
        match &result {
            Ok(aligned_frame) => self.last_frame = Some(aligned_frame.clone()),
            Err(_) => self.last_frame = None,
        }
        result
    }

    fn check_frame(&mut self, frame: &DynamicImage) -> Result<AlignmentFrame, PassportError> {
        let (frame_width, frame_height) = frame.dimensions();
        if frame_width == 0 || frame_height == 0 {
            self.break_streak();
            return Ok(AlignmentFrame::empty(AlignmentState::NotReady));
        }

        let frame_to_preview = preview_map(
            frame_width as f32,
            frame_height as f32,
            self.preview_width,
            self.preview_height,
        );
        let preview_to_frame = frame_to_preview
            .inverse()
            .ok_or_else(|| PassportError::AlignmentError("Preview mapping is not invertible".to_string()))?;
        let guide_in_frame = match self
            .guide
            .transformed(&preview_to_frame)
            .intersection(&ImageProcessor::bounds(frame))
        {
            Some(rect) => rect,
            None => {
                self.break_streak();
                return Ok(AlignmentFrame::empty(AlignmentState::NotReady));
            }
        };

        let guide_region = ImageProcessor::crop(frame, &guide_in_frame)?;
        let boxes = self.detector.detect(&guide_region);
        let Some(rough) = boxes.into_iter().max_by(|a, b| a.area().total_cmp(&b.area())) else {
            debug!("No document in guide region");
            self.break_streak();
            return Ok(AlignmentFrame::empty(AlignmentState::NoDocument));
        };

        let region_bounds = ImageProcessor::bounds(&guide_region);
        let roi = rough.padded(self.config.roi_padding, &region_bounds);
        let refined = ImageProcessor::crop(&guide_region, &roi)
            .ok()
            .and_then(|roi_image| self.refiner.refine(&roi_image));
        let roi_corners = match refined {
            Some(points) => order_corners(points),
            None => {
                debug!("Refiner failed, using rough box");
                AffineMap::translation(-roi.x, -roi.y).apply_all(&rough.corners())
            }
        };

        let roi_to_frame = AffineMap::translation(roi.x, roi.y).then(&AffineMap::translation(guide_in_frame.x, guide_in_frame.y));
        let roi_to_preview = roi_to_frame.then(&frame_to_preview);
        let frame_corners = roi_to_frame.apply_all(&roi_corners);
        let preview_corners = roi_to_preview.apply_all(&roi_corners);

        let document = Rect::bounding(&frame_corners).unwrap_or_default();
        let metrics = AlignmentMetrics::measure(&document, &guide_in_frame);
        let aligned = evaluate_alignment(&metrics, self.was_aligned_last_frame, &self.config);
        let message = guidance(&metrics, aligned, &self.config);

        let state = if aligned {
            self.was_aligned_last_frame = true;
            self.consecutive_alignment_count += 1;
            if self.consecutive_alignment_count >= self.config.required_aligned_frames {
                AlignmentState::Confirmed
            } else {
                AlignmentState::Aligned {
                    consecutive: self.consecutive_alignment_count,
                }
            }
        } else {
            self.break_streak();
            AlignmentState::Detected
        };
        trace!("Alignment {:?} iou {:.3} state {:?}", metrics, metrics.iou, state);

        Ok(AlignmentFrame {
            detected: true,
            aligned,
            score: metrics.iou.clamp(0.0, 1.0),
            corners: Some(preview_corners),
            message,
            state,
        })
    }

    fn break_streak(&mut self) {
        self.was_aligned_last_frame = false;
        self.consecutive_alignment_count = 0;
    }
}
