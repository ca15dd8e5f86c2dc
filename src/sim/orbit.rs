//! Orbiting point cloud used as the demo simulation.
//!
//! Points sit on concentric rings; outer rings move slower. Each step
//! produces a fresh [`OrbitState`] snapshot that is shared read-only by
//! every client pipeline.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::tick::Stepper;

/// Upper bound on the point count a client may request.
pub const MAX_POINTS: usize = 1 << 20;

const RINGS: usize = 8;
const GOLDEN_ANGLE: f32 = 2.399_963;
const STEP_SECONDS: f32 = 1.0 / 30.0;

/// Snapshot of the simulation at one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct OrbitState {
    pub time: f32,
    pub points: Vec<[f32; 3]>,
    pub colors: Vec<[f32; 3]>,
}

impl OrbitState {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// `graph_settings` payload understood by [`OrbitStepper`]. Absent fields
/// keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrbitSettings {
    pub speed: Option<f32>,
    pub points: Option<usize>,
    pub spread: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct OrbitStepper {
    time: f32,
    speed: f32,
    spread: f32,
    points: usize,
    steps: u64,
    max_steps: Option<u64>,
}

impl OrbitStepper {
    pub fn new(points: usize) -> Self {
        Self {
            time: 0.0,
            speed: 1.0,
            spread: 0.5,
            points: points.min(MAX_POINTS),
            steps: 0,
            max_steps: None,
        }
    }

    /// Finish after `steps` ticks instead of running forever.
    pub fn with_max_steps(mut self, steps: u64) -> Self {
        self.max_steps = Some(steps);
        self
    }

    pub fn points(&self) -> usize {
        self.points
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn spread(&self) -> f32 {
        self.spread
    }

    fn snapshot(&self) -> OrbitState {
        let mut points = Vec::with_capacity(self.points);
        let mut colors = Vec::with_capacity(self.points);

        for i in 0..self.points {
            let ring = i % RINGS;
            let radius = 1.0 + ring as f32 * self.spread;
            let angle = self.time / radius + i as f32 * GOLDEN_ANGLE;
            let (sin, cos) = angle.sin_cos();

            points.push([
                cos * radius,
                sin * radius,
                (angle * 0.5).sin() * 0.1 * radius,
            ]);

            let t = ring as f32 / (RINGS - 1) as f32;
            colors.push([1.0 - t, 0.4 + 0.6 * t * (1.0 - t), t]);
        }

        OrbitState {
            time: self.time,
            points,
            colors,
        }
    }
}

impl Stepper for OrbitStepper {
    type State = OrbitState;

    fn step(&mut self) -> Option<OrbitState> {
        if self.max_steps.is_some_and(|max| self.steps >= max) {
            return None;
        }
        self.steps += 1;
        self.time += STEP_SECONDS * self.speed;
        Some(self.snapshot())
    }

    fn apply_settings(&mut self, settings: Value) -> Result<()> {
        let settings: OrbitSettings =
            serde_json::from_value(settings).context("invalid orbit settings")?;

        if let Some(speed) = settings.speed {
            if !speed.is_finite() {
                bail!("speed must be finite");
            }
        }
        if let Some(spread) = settings.spread {
            if !spread.is_finite() || spread < 0.0 {
                bail!("spread must be a non-negative number");
            }
        }
        if let Some(points) = settings.points {
            if points > MAX_POINTS {
                bail!("points {} exceeds limit {}", points, MAX_POINTS);
            }
        }

        if let Some(speed) = settings.speed {
            self.speed = speed;
        }
        if let Some(spread) = settings.spread {
            self.spread = spread;
        }
        if let Some(points) = settings.points {
            self.points = points;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_produces_requested_points() {
        let mut stepper = OrbitStepper::new(100);
        let state = stepper.step().unwrap();

        assert_eq!(state.len(), 100);
        assert_eq!(state.colors.len(), 100);
        assert!(state.time > 0.0);
        assert!(state.points.iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn test_time_advances_with_speed() {
        let mut stepper = OrbitStepper::new(4);
        let first = stepper.step().unwrap();
        stepper.apply_settings(json!({ "speed": 2.0 })).unwrap();
        let second = stepper.step().unwrap();

        let dt1 = first.time;
        let dt2 = second.time - first.time;
        assert!((dt2 - 2.0 * dt1).abs() < 1e-6);
        assert_ne!(first.points, second.points);
    }

    #[test]
    fn test_settings_resize() {
        let mut stepper = OrbitStepper::new(10);
        stepper
            .apply_settings(json!({ "points": 3, "spread": 1.5 }))
            .unwrap();

        assert_eq!(stepper.points(), 3);
        assert_eq!(stepper.spread(), 1.5);
        assert_eq!(stepper.step().unwrap().len(), 3);
    }

    #[test]
    fn test_invalid_settings_leave_state_untouched() {
        let mut stepper = OrbitStepper::new(10);

        assert!(stepper.apply_settings(json!({ "colour": 1 })).is_err());
        assert!(stepper.apply_settings(json!({ "spread": -1.0 })).is_err());
        assert!(stepper
            .apply_settings(json!({ "speed": 3.0, "points": MAX_POINTS + 1 }))
            .is_err());
        assert!(stepper.apply_settings(json!("fast")).is_err());

        assert_eq!(stepper.points(), 10);
        assert_eq!(stepper.speed(), 1.0);
        assert_eq!(stepper.spread(), 0.5);
    }

    #[test]
    fn test_max_steps() {
        let mut stepper = OrbitStepper::new(1).with_max_steps(2);
        assert!(stepper.step().is_some());
        assert!(stepper.step().is_some());
        assert!(stepper.step().is_none());
    }

    #[test]
    fn test_zero_points() {
        let mut stepper = OrbitStepper::new(0);
        assert!(stepper.step().unwrap().is_empty());
    }
}
