//! Frame classifier: detections + signatures → per-student observations.

use crate::attentiveness;
use crate::matcher::Matcher;
use crate::types::{Detection, FaceSignature, Observation};

/// Outcome of classifying one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameVerdict {
    /// One observation per matched detection, in detection order.
    pub observations: Vec<Observation>,
    /// Faces localized in the frame, matched or not.
    pub faces_detected: usize,
    pub unmatched: usize,
}

/// Matches each detection to its nearest signature and grades attentiveness.
pub struct FrameClassifier<M: Matcher> {
    matcher: M,
}

impl<M: Matcher> FrameClassifier<M> {
    pub fn new(matcher: M) -> Self {
        Self { matcher }
    }

    pub fn matcher(&self) -> &M {
        &self.matcher
    }

    pub fn classify_frame(
        &self,
        detections: &[Detection],
        signatures: &[FaceSignature],
    ) -> FrameVerdict {
        let mut verdict = FrameVerdict {
            faces_detected: detections.len(),
            ..Default::default()
        };

        for detection in detections {
            let result = self.matcher.compare(&detection.descriptor, signatures);
            let student_id = match result.student_id {
                Some(id) if result.matched => id,
                _ => {
                    verdict.unmatched += 1;
                    tracing::debug!(distance = result.distance, "face not recognized");
                    continue;
                }
            };

            let status = attentiveness::classify_detection(detection);
            tracing::debug!(student = %student_id, distance = result.distance, %status, "face recognized");
            verdict.observations.push(Observation { student_id, status });
        }

        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attentiveness::fixtures::face;
    use crate::matcher::EuclideanMatcher;
    use crate::types::{AttentivenessStatus, BoundingBox, Expressions, FeatureVector};

    fn detection(descriptor: Vec<f32>, ear: f32, neutral: f32) -> Detection {
        Detection {
            bbox: BoundingBox::default(),
            landmarks: face(ear, 0.1),
            expressions: Expressions {
                neutral,
                ..Default::default()
            },
            descriptor: FeatureVector::new(descriptor),
        }
    }

    fn signatures() -> Vec<FaceSignature> {
        vec![
            FaceSignature {
                student_id: "s1".into(),
                descriptor: FeatureVector::new(vec![1.0, 0.0]),
            },
            FaceSignature {
                student_id: "s2".into(),
                descriptor: FeatureVector::new(vec![0.0, 1.0]),
            },
        ]
    }

    #[test]
    fn test_matched_and_unmatched_faces() {
        let classifier = FrameClassifier::new(EuclideanMatcher::default());
        let detections = vec![
            detection(vec![1.0, 0.1], 0.15, 0.0),
            detection(vec![-5.0, -5.0], 0.3, 0.0),
            detection(vec![0.1, 1.0], 0.3, 0.0),
        ];

        let verdict = classifier.classify_frame(&detections, &signatures());
        assert_eq!(verdict.faces_detected, 3);
        assert_eq!(verdict.unmatched, 1);
        assert_eq!(
            verdict.observations,
            vec![
                Observation { student_id: "s1".into(), status: AttentivenessStatus::Sleepy },
                Observation { student_id: "s2".into(), status: AttentivenessStatus::Present },
            ]
        );
    }

    #[test]
    fn test_no_signatures_recognizes_nobody() {
        let classifier = FrameClassifier::new(EuclideanMatcher::default());
        let verdict = classifier.classify_frame(&[detection(vec![1.0, 0.0], 0.3, 0.0)], &[]);
        assert!(verdict.observations.is_empty());
        assert_eq!(verdict.faces_detected, 1);
        assert_eq!(verdict.unmatched, 1);
    }

    #[test]
    fn test_never_emits_absent() {
        let classifier = FrameClassifier::new(EuclideanMatcher::default());
        for (ear, neutral) in [(0.1, 0.0), (0.22, 0.9), (0.3, 0.9), (0.3, 0.0)] {
            let verdict =
                classifier.classify_frame(&[detection(vec![1.0, 0.0], ear, neutral)], &signatures());
            assert_eq!(verdict.observations.len(), 1);
            assert_ne!(verdict.observations[0].status, AttentivenessStatus::Absent);
        }
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = FrameClassifier::new(EuclideanMatcher::default());
        let detections = vec![detection(vec![1.0, 0.0], 0.22, 0.9)];
        let first = classifier.classify_frame(&detections, &signatures());
        for _ in 0..10 {
            assert_eq!(classifier.classify_frame(&detections, &signatures()), first);
        }
        assert_eq!(first.observations[0].status, AttentivenessStatus::NotAttentive);
    }
}
