//! Sample sanitiser

use crate::error::ValidationError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use traffic_model::DetectionSample;

/// Validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Largest plausible count for a single class in one frame
    pub max_count_per_class: i64,
    /// Emergency flags below this confidence are ignored (0.0 trusts the detector)
    pub min_emergency_confidence: f64,
    /// Allowed clock skew for sample timestamps (seconds)
    pub max_future_skew_secs: i64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_count_per_class: 500,
            min_emergency_confidence: 0.0,
            max_future_skew_secs: 5,
        }
    }
}

/// Result of sanitising one sample
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// The corrected sample
    pub sample: DetectionSample,
    /// Corrections applied, empty for a clean sample
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Sanitiser for detector samples
pub struct SampleValidator {
    config: ValidationConfig,
}

impl SampleValidator {
    /// Create a new validator with given config
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Clamp a value into range, recording a correction when it moved
    fn clamp_range(
        field: &str,
        value: f64,
        range: (f64, f64),
        errors: &mut Vec<ValidationError>,
    ) -> f64 {
        if value.is_nan() {
            errors.push(ValidationError::InvalidFormat(format!("{} is NaN", field)));
            return range.0;
        }
        if value < range.0 || value > range.1 {
            errors.push(ValidationError::OutOfRange {
                field: field.to_string(),
                value,
                min: range.0,
                max: range.1,
            });
            return value.clamp(range.0, range.1);
        }
        value
    }

    /// Sanitise a sample against the engine clock
    pub fn sanitize(&self, mut sample: DetectionSample, now: DateTime<Utc>) -> ValidationResult {
        let mut errors = Vec::new();

        let counts = std::mem::take(&mut sample.vehicle_counts);
        for (class, count) in counts {
            let class_name = class.trim();
            if class_name.is_empty() {
                errors.push(ValidationError::InvalidFormat(format!(
                    "blank class name with count {}",
                    count
                )));
                continue;
            }

            let count = if count < 0 {
                errors.push(ValidationError::NegativeCount {
                    class: class_name.to_string(),
                    value: count,
                });
                0
            } else if count > self.config.max_count_per_class {
                errors.push(ValidationError::OutOfRange {
                    field: format!("vehicle_counts.{}", class_name),
                    value: count as f64,
                    min: 0.0,
                    max: self.config.max_count_per_class as f64,
                });
                self.config.max_count_per_class
            } else {
                count
            };

            *sample
                .vehicle_counts
                .entry(class_name.to_ascii_lowercase())
                .or_insert(0) += count;
        }

        sample.emergency_confidence = Self::clamp_range(
            "emergency_confidence",
            sample.emergency_confidence,
            (0.0, 1.0),
            &mut errors,
        );

        if sample.emergency_detected
            && sample.emergency_confidence < self.config.min_emergency_confidence
        {
            errors.push(ValidationError::BelowConfidence {
                confidence: sample.emergency_confidence,
                threshold: self.config.min_emergency_confidence,
            });
            sample.emergency_detected = false;
        }

        let skew = sample.timestamp - now;
        if skew > Duration::seconds(self.config.max_future_skew_secs) {
            errors.push(ValidationError::FutureTimestamp {
                skew_ms: skew.num_milliseconds(),
            });
            sample.timestamp = now;
        }

        if !errors.is_empty() {
            debug!(
                "Sanitised sample for {}/{}: {} correction(s)",
                sample.location_id,
                sample.direction,
                errors.len()
            );
        }

        ValidationResult { sample, errors }
    }
}

impl Default for SampleValidator {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use traffic_model::{Direction, LocationId};

    fn sample(now: DateTime<Utc>) -> DetectionSample {
        DetectionSample::new(LocationId::new("x").unwrap(), Direction::North, now)
    }

    #[test]
    fn test_clean_sample_untouched() {
        let now = Utc::now();
        let input = sample(now).with_count("car", 10).with_count("bus", 2);
        let result = SampleValidator::default().sanitize(input.clone(), now);
        assert!(result.is_clean());
        assert_eq!(result.sample, input);
    }

    #[test]
    fn test_negative_count_clamped() {
        let now = Utc::now();
        let input = sample(now).with_count("car", -3).with_count("bus", 4);
        let result = SampleValidator::default().sanitize(input, now);
        assert_eq!(result.sample.vehicle_counts["car"], 0);
        assert_eq!(result.sample.total_vehicles(), 4);
        assert!(matches!(
            result.errors[0],
            ValidationError::NegativeCount { value: -3, .. }
        ));
    }

    #[test]
    fn test_blank_class_dropped_and_case_merged() {
        let now = Utc::now();
        let input = sample(now)
            .with_count(" ", 9)
            .with_count("Car", 2)
            .with_count("car", 3);
        let result = SampleValidator::default().sanitize(input, now);
        assert_eq!(result.sample.vehicle_counts.len(), 1);
        assert_eq!(result.sample.vehicle_counts["car"], 5);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_confidence_clamped_and_gated() {
        let now = Utc::now();
        let validator = SampleValidator::new(ValidationConfig {
            min_emergency_confidence: 0.5,
            ..Default::default()
        });

        let result = validator.sanitize(sample(now).with_emergency(1.7, None), now);
        assert_eq!(result.sample.emergency_confidence, 1.0);
        assert!(result.sample.emergency_detected);

        let result = validator.sanitize(sample(now).with_emergency(0.2, None), now);
        assert!(!result.sample.emergency_detected);

        let result = validator.sanitize(sample(now).with_emergency(f64::NAN, None), now);
        assert_eq!(result.sample.emergency_confidence, 0.0);
        assert!(!result.sample.emergency_detected);
    }

    #[test]
    fn test_future_timestamp_pulled_back() {
        let now = Utc::now();
        let input = sample(now + Duration::seconds(30));
        let result = SampleValidator::default().sanitize(input, now);
        assert_eq!(result.sample.timestamp, now);
        assert!(matches!(
            result.errors[0],
            ValidationError::FutureTimestamp { .. }
        ));
    }

    proptest! {
        #[test]
        fn prop_sanitised_counts_in_range(counts in proptest::collection::vec(-1000i64..2000, 0..6)) {
            let now = Utc::now();
            let mut input = sample(now);
            for (i, c) in counts.iter().enumerate() {
                input = input.with_count(format!("class{}", i), *c);
            }
            let result = SampleValidator::default().sanitize(input, now);
            for count in result.sample.vehicle_counts.values() {
                prop_assert!(*count >= 0 && *count <= 500);
            }
        }
    }
}
