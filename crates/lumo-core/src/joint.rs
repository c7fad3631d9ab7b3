//! Arm joint names and calibrated limits.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Joint positions keyed by joint name, in degrees (gripper in percent open).
pub type JointMap = BTreeMap<String, f64>;

/// Joints of the arm, base to tool.
pub const JOINT_NAMES: [&str; 6] = [
    "shoulder_pan",
    "shoulder_lift",
    "elbow_flex",
    "wrist_flex",
    "wrist_roll",
    "gripper",
];

/// Servo encoder resolution, ticks per full turn minus one.
pub const SERVO_MAX_TICKS: u32 = 4095;

/// Inclusive range a joint may be commanded to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointLimit {
    pub min: f64,
    pub max: f64,
}

impl JointLimit {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Symmetric limit from a calibrated tick range: half the range,
    /// converted to degrees, either side of the joint's zero.
    pub fn from_ticks(range_min: u32, range_max: u32) -> Self {
        let span = f64::from(range_max.saturating_sub(range_min));
        let half = span / 2.0 * 360.0 / f64::from(SERVO_MAX_TICKS);
        Self::new(-half, half)
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Per-joint calibrated limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointLimits(BTreeMap<String, JointLimit>);

impl JointLimits {
    pub fn new(limits: BTreeMap<String, JointLimit>) -> Self {
        Self(limits)
    }

    /// Factory calibration of the follower arm. The gripper is commanded in
    /// percent open rather than degrees.
    pub fn factory() -> Self {
        let limits = [
            ("shoulder_pan", JointLimit::from_ticks(943, 3337)),
            ("shoulder_lift", JointLimit::from_ticks(775, 3266)),
            ("elbow_flex", JointLimit::from_ticks(890, 3081)),
            ("wrist_flex", JointLimit::from_ticks(652, 3222)),
            ("wrist_roll", JointLimit::from_ticks(0, SERVO_MAX_TICKS)),
            ("gripper", JointLimit::new(0.0, 100.0)),
        ];
        Self(
            limits
                .into_iter()
                .map(|(name, limit)| (name.to_string(), limit))
                .collect(),
        )
    }

    /// Limits keyed by joint name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &JointLimit)> {
        self.0.iter().map(|(name, limit)| (name.as_str(), limit))
    }

    pub fn get(&self, name: &str) -> Option<&JointLimit> {
        self.0.get(name)
    }

    /// Clamps a single target, rejecting unknown joints and non-finite values.
    pub fn clamp(&self, name: &str, value: f64) -> DomainResult<f64> {
        let limit = self.0.get(name).ok_or_else(|| DomainError::UnknownJoint {
            name: name.to_string(),
        })?;
        if !value.is_finite() {
            return Err(DomainError::InvalidJointTarget {
                name: name.to_string(),
                value,
            });
        }
        Ok(limit.clamp(value))
    }

    /// Clamps every target in a move request. Fails as a whole if any joint is
    /// invalid so that no partial move is ever produced.
    pub fn clamp_all(&self, targets: &JointMap) -> DomainResult<JointMap> {
        targets
            .iter()
            .map(|(name, value)| self.clamp(name, *value).map(|v| (name.clone(), v)))
            .collect()
    }
}

impl Default for JointLimits {
    fn default() -> Self {
        Self::factory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_covers_all_joints() {
        let limits = JointLimits::factory();
        for name in JOINT_NAMES {
            assert!(limits.get(name).is_some(), "missing limit for {name}");
        }
    }

    #[test]
    fn test_clamp_within_range_is_identity() {
        let limits = JointLimits::factory();
        assert_eq!(limits.clamp("elbow_flex", 45.0), Ok(45.0));
    }

    #[test]
    fn test_clamp_out_of_range() {
        let limits = JointLimits::factory();
        assert_eq!(limits.clamp("gripper", 150.0), Ok(100.0));
        assert_eq!(limits.clamp("gripper", -5.0), Ok(0.0));
        assert_eq!(
            limits.clamp("shoulder_pan", -400.0),
            Ok(limits.get("shoulder_pan").unwrap().min)
        );
    }

    #[test]
    fn test_factory_limits_match_calibration() {
        let limits = JointLimits::factory();
        let expected = [
            ("shoulder_pan", -105.2, 105.2),
            ("shoulder_lift", -109.5, 109.5),
            ("elbow_flex", -96.3, 96.3),
            ("wrist_flex", -113.0, 113.0),
            ("wrist_roll", -180.0, 180.0),
            ("gripper", 0.0, 100.0),
        ];
        for (name, min, max) in expected {
            let limit = limits.get(name).unwrap();
            assert!((limit.min - min).abs() < 0.2, "{name} min {}", limit.min);
            assert!((limit.max - max).abs() < 0.2, "{name} max {}", limit.max);
        }
    }

    #[test]
    fn test_targets_past_calibration_are_clamped() {
        let limits = JointLimits::factory();
        let pan = limits.clamp("shoulder_pan", 112.0).unwrap();
        assert!(pan < 105.3, "shoulder_pan sent {pan}");
        let wrist = limits.clamp("wrist_flex", -122.7).unwrap();
        assert!(wrist > -113.1, "wrist_flex sent {wrist}");
    }

    #[test]
    fn test_boundary_passes_through() {
        let limits = JointLimits::factory();
        for (name, limit) in limits.iter() {
            assert_eq!(limits.clamp(name, limit.max), Ok(limit.max));
            assert_eq!(limits.clamp(name, limit.min), Ok(limit.min));
        }
    }

    #[test]
    fn test_clamp_unknown_joint() {
        let limits = JointLimits::factory();
        assert!(matches!(
            limits.clamp("tail", 1.0),
            Err(DomainError::UnknownJoint { .. })
        ));
    }

    #[test]
    fn test_clamp_rejects_nan() {
        let limits = JointLimits::factory();
        assert!(matches!(
            limits.clamp("gripper", f64::NAN),
            Err(DomainError::InvalidJointTarget { .. })
        ));
    }

    #[test]
    fn test_clamp_all_is_all_or_nothing() {
        let limits = JointLimits::factory();
        let mut targets = JointMap::new();
        targets.insert("gripper".to_string(), 500.0);
        targets.insert("wrist_roll".to_string(), 10.0);

        let clamped = limits.clamp_all(&targets).unwrap();
        assert_eq!(clamped.get("gripper"), Some(&100.0));
        assert_eq!(clamped.get("wrist_roll"), Some(&10.0));

        targets.insert("bogus".to_string(), 0.0);
        assert!(limits.clamp_all(&targets).is_err());
    }
}
