//! Attentiveness classification from facial geometry and expressions.
//!
//! Works on the 68-point landmark convention: left eye 36–41, right eye
//! 42–47, mouth 48–67. Ratios fall back to [`NEUTRAL_RATIO`] whenever the
//! landmark set is too short or a denominator collapses, so classification
//! always completes.

use crate::types::{AttentivenessStatus, Detection, Expressions, Point};

// --- Decision table ---
pub const SLEEPY_EAR: f32 = 0.2;
pub const TALKING_SURPRISE: f32 = 0.5;
pub const TALKING_MAR: f32 = 0.6;
pub const INATTENTIVE_NEUTRAL: f32 = 0.8;
pub const INATTENTIVE_EAR: f32 = 0.25;

/// Ratio substituted for degenerate geometry.
pub const NEUTRAL_RATIO: f32 = 0.3;

const LEFT_EYE: std::ops::Range<usize> = 36..42;
const RIGHT_EYE: std::ops::Range<usize> = 42..48;
const MOUTH: std::ops::Range<usize> = 48..68;

/// Mouth-relative indices: outer corners (48, 54) and inner lips (62, 66).
const MOUTH_LEFT: usize = 0;
const MOUTH_RIGHT: usize = 6;
const MOUTH_INNER_TOP: usize = 14;
const MOUTH_INNER_BOTTOM: usize = 18;

/// Eye aspect ratio over a six-point eye: (|p1−p5| + |p2−p4|) / (2·|p0−p3|).
pub fn eye_aspect_ratio(eye: &[Point]) -> f32 {
    if eye.len() < 6 {
        return NEUTRAL_RATIO;
    }
    let horizontal = eye[0].distance(&eye[3]);
    if horizontal <= f32::EPSILON {
        return NEUTRAL_RATIO;
    }
    let vertical = eye[1].distance(&eye[5]) + eye[2].distance(&eye[4]);
    vertical / (2.0 * horizontal)
}

/// Mouth aspect ratio over the 20-point mouth: inner-lip opening / outer width.
pub fn mouth_aspect_ratio(mouth: &[Point]) -> f32 {
    if mouth.len() < MOUTH.len() {
        return NEUTRAL_RATIO;
    }
    let width = mouth[MOUTH_LEFT].distance(&mouth[MOUTH_RIGHT]);
    if width <= f32::EPSILON {
        return NEUTRAL_RATIO;
    }
    mouth[MOUTH_INNER_TOP].distance(&mouth[MOUTH_INNER_BOTTOM]) / width
}

/// Geometry derived from one detection's landmarks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceGeometry {
    pub left_ear: f32,
    pub right_ear: f32,
    pub mar: f32,
}

impl FaceGeometry {
    pub fn from_landmarks(landmarks: &[Point]) -> Self {
        Self {
            left_ear: landmarks.get(LEFT_EYE).map_or(NEUTRAL_RATIO, eye_aspect_ratio),
            right_ear: landmarks.get(RIGHT_EYE).map_or(NEUTRAL_RATIO, eye_aspect_ratio),
            mar: landmarks.get(MOUTH).map_or(NEUTRAL_RATIO, mouth_aspect_ratio),
        }
    }

    pub fn average_ear(&self) -> f32 {
        (self.left_ear + self.right_ear) / 2.0
    }
}

/// Apply the fixed decision table. First rule that fires wins.
pub fn classify(geometry: &FaceGeometry, expressions: &Expressions) -> AttentivenessStatus {
    let ear = geometry.average_ear();

    if ear < SLEEPY_EAR {
        AttentivenessStatus::Sleepy
    } else if expressions.surprised > TALKING_SURPRISE || geometry.mar > TALKING_MAR {
        AttentivenessStatus::Talking
    } else if expressions.neutral > INATTENTIVE_NEUTRAL && ear < INATTENTIVE_EAR {
        AttentivenessStatus::NotAttentive
    } else {
        AttentivenessStatus::Present
    }
}

/// Classify a matched detection.
pub fn classify_detection(detection: &Detection) -> AttentivenessStatus {
    let geometry = FaceGeometry::from_landmarks(&detection.landmarks);
    let status = classify(&geometry, &detection.expressions);
    tracing::trace!(
        ear = geometry.average_ear(),
        mar = geometry.mar,
        neutral = detection.expressions.neutral,
        surprised = detection.expressions.surprised,
        %status,
        "classified detection"
    );
    status
}


#[cfg(test)]
mod tests {
    use super::fixtures::{eye, face, mouth};
    use super::*;

    fn expressions(neutral: f32, surprised: f32) -> Expressions {
        Expressions {
            neutral,
            surprised,
            ..Default::default()
        }
    }

    #[test]
    fn test_eye_aspect_ratio_fixture() {
        assert!((eye_aspect_ratio(&eye(0.0, 0.28)) - 0.28).abs() < 1e-5);
        assert!((eye_aspect_ratio(&eye(10.0, 0.15)) - 0.15).abs() < 1e-5);
    }

    #[test]
    fn test_mouth_aspect_ratio_fixture() {
        // Inner gap of 2*mar over a width of 2.0.
        assert!((mouth_aspect_ratio(&mouth(0.7)) - 0.7).abs() < 1e-5);
    }

    #[test]
    fn test_short_eye_uses_neutral_ratio() {
        assert_eq!(eye_aspect_ratio(&eye(0.0, 0.1)[..5]), NEUTRAL_RATIO);
    }

    #[test]
    fn test_zero_width_eye_uses_neutral_ratio() {
        let collapsed = vec![Point::new(1.0, 1.0); 6];
        assert_eq!(eye_aspect_ratio(&collapsed), NEUTRAL_RATIO);
    }

    #[test]
    fn test_partial_landmarks_complete_classification() {
        let geometry = FaceGeometry::from_landmarks(&face(0.1, 0.9)[..40]);
        assert_eq!(geometry.left_ear, NEUTRAL_RATIO);
        assert_eq!(geometry.right_ear, NEUTRAL_RATIO);
        assert_eq!(geometry.mar, NEUTRAL_RATIO);
        assert_eq!(
            classify(&geometry, &Expressions::default()),
            AttentivenessStatus::Present
        );
    }

    #[test]
    fn test_no_landmarks_is_present() {
        let geometry = FaceGeometry::from_landmarks(&[]);
        assert_eq!(
            classify(&geometry, &expressions(0.5, 0.0)),
            AttentivenessStatus::Present
        );
    }

    #[test]
    fn test_low_ear_is_sleepy_regardless_of_expressions() {
        let geometry = FaceGeometry::from_landmarks(&face(0.15, 0.9));
        for e in [expressions(0.0, 0.0), expressions(0.95, 0.0), expressions(0.0, 0.99)] {
            assert_eq!(classify(&geometry, &e), AttentivenessStatus::Sleepy);
        }
    }

    #[test]
    fn test_surprise_is_talking() {
        let geometry = FaceGeometry::from_landmarks(&face(0.3, 0.1));
        assert_eq!(
            classify(&geometry, &expressions(0.0, 0.51)),
            AttentivenessStatus::Talking
        );
        assert_eq!(
            classify(&geometry, &expressions(0.0, 0.5)),
            AttentivenessStatus::Present
        );
    }

    #[test]
    fn test_open_mouth_is_talking() {
        let geometry = FaceGeometry::from_landmarks(&face(0.3, 0.65));
        assert_eq!(
            classify(&geometry, &Expressions::default()),
            AttentivenessStatus::Talking
        );
    }

    #[test]
    fn test_talking_outranks_not_attentive() {
        let geometry = FaceGeometry::from_landmarks(&face(0.22, 0.7));
        assert_eq!(
            classify(&geometry, &expressions(0.9, 0.0)),
            AttentivenessStatus::Talking
        );
    }

    #[test]
    fn test_neutral_and_heavy_eyes_is_not_attentive() {
        let geometry = FaceGeometry::from_landmarks(&face(0.22, 0.1));
        assert_eq!(
            classify(&geometry, &expressions(0.9, 0.0)),
            AttentivenessStatus::NotAttentive
        );
    }

    #[test]
    fn test_neutral_with_open_eyes_is_present() {
        let geometry = FaceGeometry::from_landmarks(&face(0.3, 0.1));
        assert_eq!(
            classify(&geometry, &expressions(0.9, 0.0)),
            AttentivenessStatus::Present
        );
    }

    #[test]
    fn test_eyes_averaged() {
        let mut landmarks = vec![Point::default(); 36];
        landmarks.extend(eye(0.0, 0.1));
        landmarks.extend(eye(3.0, 0.34));
        let geometry = FaceGeometry::from_landmarks(&landmarks);
        assert!((geometry.average_ear() - 0.22).abs() < 1e-5);
    }
}
