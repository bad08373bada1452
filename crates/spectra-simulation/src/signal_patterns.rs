//! Pre-defined EEG rhythm mixtures

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// A single sinusoidal rhythm
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rhythm {
    pub frequency: f64,
    pub amplitude: f64,
}

impl Rhythm {
    pub const fn new(frequency: f64, amplitude: f64) -> Self {
        Self { frequency, amplitude }
    }

    fn value_at(&self, time: f64, phase: f64) -> f64 {
        self.amplitude * (2.0 * PI * self.frequency * time + phase).sin()
    }
}

/// Rhythm mixture driving the simulated signal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RhythmPattern {
    /// Eyes closed, dominant alpha
    #[default]
    Resting,
    /// Dominant beta with residual alpha
    Focused,
    /// Theta rising, alpha fading
    Drowsy,
    /// Slow delta waves
    DeepSleep,
    /// One pure tone
    Tone { frequency: f64, amplitude: f64 },
    /// Tone whose amplitude waxes and wanes like a sleep spindle
    Spindle {
        frequency: f64,
        amplitude: f64,
        modulation: f64,
    },
    /// Arbitrary mixture
    Mixture { rhythms: Vec<Rhythm> },
}

impl RhythmPattern {
    /// Rhythms making up the pattern, amplitudes in microvolts
    pub fn rhythms(&self) -> Vec<Rhythm> {
        match self {
            RhythmPattern::Resting => vec![
                Rhythm::new(10.0, 40.0),
                Rhythm::new(6.0, 8.0),
                Rhythm::new(20.0, 5.0),
            ],
            RhythmPattern::Focused => vec![
                Rhythm::new(20.0, 25.0),
                Rhythm::new(16.0, 12.0),
                Rhythm::new(10.0, 8.0),
            ],
            RhythmPattern::Drowsy => vec![Rhythm::new(6.0, 35.0), Rhythm::new(9.0, 10.0)],
            RhythmPattern::DeepSleep => vec![Rhythm::new(2.0, 60.0), Rhythm::new(1.5, 30.0)],
            RhythmPattern::Tone { frequency, amplitude }
            | RhythmPattern::Spindle { frequency, amplitude, .. } => {
                vec![Rhythm::new(*frequency, *amplitude)]
            }
            RhythmPattern::Mixture { rhythms } => rhythms.clone(),
        }
    }

    /// Noise-free value at `time` seconds; `phase` shifts every rhythm
    pub fn value_at(&self, time: f64, phase: f64) -> f64 {
        let value: f64 = self.rhythms().iter().map(|r| r.value_at(time, phase)).sum();
        match self {
            RhythmPattern::Spindle { modulation, .. } => {
                value * 0.5 * (1.0 - (2.0 * PI * modulation * time).cos())
            }
            _ => value,
        }
    }

    /// Frequency of the strongest rhythm
    pub fn dominant_frequency(&self) -> Option<f64> {
        self.rhythms()
            .into_iter()
            .max_by(|a, b| a.amplitude.total_cmp(&b.amplitude))
            .map(|r| r.frequency)
    }

    pub fn description(&self) -> &'static str {
        match self {
            RhythmPattern::Resting => "Resting, eyes closed",
            RhythmPattern::Focused => "Focused attention",
            RhythmPattern::Drowsy => "Drowsiness",
            RhythmPattern::DeepSleep => "Deep sleep",
            RhythmPattern::Tone { .. } => "Pure tone",
            RhythmPattern::Spindle { .. } => "Sleep spindle",
            RhythmPattern::Mixture { .. } => "Custom mixture",
        }
    }

    pub fn presets() -> Vec<(&'static str, RhythmPattern)> {
        vec![
            ("Resting", RhythmPattern::Resting),
            ("Focused", RhythmPattern::Focused),
            ("Drowsy", RhythmPattern::Drowsy),
            ("Deep Sleep", RhythmPattern::DeepSleep),
            ("Alpha Tone", RhythmPattern::Tone { frequency: 10.0, amplitude: 30.0 }),
            (
                "Spindle",
                RhythmPattern::Spindle {
                    frequency: 13.0,
                    amplitude: 30.0,
                    modulation: 1.0,
                },
            ),
        ]
    }
}
