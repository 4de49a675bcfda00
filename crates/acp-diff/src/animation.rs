//! Scramble animation parameters and transition plans
//!
//! [`animation_config`] is configuration, not randomness: a fixed
//! `(kind, level)` pair always yields the same timings.

use crate::diff::{diff_chars, diff_words, ChangeKind, CharDiff, WordDiff};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Kind of textual mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    /// Elaborate the passage
    Expand,
    /// Rewrite with escalating hostility
    Rewrite,
}

impl TransformKind {
    /// Wire name
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Expand => "expand",
            Self::Rewrite => "rewrite",
        }
    }
}

impl Display for TransformKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransformKind {
    type Err = AnimationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "expand" => Ok(Self::Expand),
            "rewrite" => Ok(Self::Rewrite),
            other => Err(AnimationError::UnknownKind(other.to_string())),
        }
    }
}

/// Rewrite intensity, 1 (mild) to 3 (hostile)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct IntensityLevel(u8);

impl IntensityLevel {
    pub const MILD: Self = Self(1);
    pub const HEATED: Self = Self(2);
    pub const HOSTILE: Self = Self(3);

    /// Create level, rejecting values outside 1..=3
    ///
    /// # Errors
    /// [`AnimationError::InvalidLevel`]
    pub const fn new(level: u8) -> Result<Self, AnimationError> {
        match level {
            1..=3 => Ok(Self(level)),
            other => Err(AnimationError::InvalidLevel(other)),
        }
    }

    /// Numeric value
    #[inline]
    #[must_use]
    pub const fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for IntensityLevel {
    type Error = AnimationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<IntensityLevel> for u8 {
    fn from(level: IntensityLevel) -> Self {
        level.0
    }
}

impl Display for IntensityLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timing and intensity of a scramble transition
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationConfig {
    /// Duration of one word's scramble
    pub scramble_duration_ms: u32,
    /// Intermediate frames per word
    pub scramble_steps: u32,
    /// Delay between consecutive changed slots
    pub stagger_delay_ms: u32,
    /// Whether glyph substitution may use symbols and mixed case
    pub chaotic: bool,
    /// 0.0..=1.0 visual intensity
    pub intensity: f64,
}

/// Map `(kind, level)` to animation parameters
///
/// Expansions ignore the level. A rewrite without a level animates as
/// [`IntensityLevel::MILD`].
#[must_use]
pub const fn animation_config(kind: TransformKind, level: Option<IntensityLevel>) -> AnimationConfig {
    match kind {
        TransformKind::Expand => AnimationConfig {
            scramble_duration_ms: 600,
            scramble_steps: 8,
            stagger_delay_ms: 12,
            chaotic: false,
            intensity: 0.25,
        },
        TransformKind::Rewrite => {
            let level = match level {
                Some(level) => level.value(),
                None => 1,
            };
            match level {
                1 => AnimationConfig {
                    scramble_duration_ms: 450,
                    scramble_steps: 6,
                    stagger_delay_ms: 18,
                    chaotic: false,
                    intensity: 0.4,
                },
                2 => AnimationConfig {
                    scramble_duration_ms: 700,
                    scramble_steps: 10,
                    stagger_delay_ms: 25,
                    chaotic: true,
                    intensity: 0.7,
                },
                _ => AnimationConfig {
                    scramble_duration_ms: 1_000,
                    scramble_steps: 16,
                    stagger_delay_ms: 35,
                    chaotic: true,
                    intensity: 1.0,
                },
            }
        }
    }
}

/// Animation of one non-unchanged slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrambleSlot {
    /// Slot position in the word diff
    pub position: usize,
    pub kind: ChangeKind,
    /// When this slot starts scrambling
    pub start_ms: u32,
    /// Per-character alignment inside the slot
    pub chars: Vec<CharDiff>,
}

/// Everything a client needs to animate one accepted transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionPlan {
    pub config: AnimationConfig,
    pub words: Vec<WordDiff>,
    /// Only slots that visibly change; whitespace-only slots are skipped
    pub slots: Vec<ScrambleSlot>,
    /// Time until the last slot settles
    pub total_duration_ms: u32,
}

/// Plan the animated transition from `old_text` to `new_text`
#[must_use]
pub fn plan_transition(
    old_text: &str,
    new_text: &str,
    kind: TransformKind,
    level: Option<IntensityLevel>,
) -> TransitionPlan {
    let config = animation_config(kind, level);
    let words = diff_words(old_text, new_text);

    let slots: Vec<ScrambleSlot> = words
        .iter()
        .filter(|w| w.kind != ChangeKind::Unchanged && !w.is_whitespace())
        .enumerate()
        .map(|(order, w)| ScrambleSlot {
            position: w.position,
            kind: w.kind,
            start_ms: u32::try_from(order)
                .unwrap_or(u32::MAX)
                .saturating_mul(config.stagger_delay_ms),
            chars: diff_chars(
                w.old_word.as_deref().unwrap_or_default(),
                w.new_word.as_deref().unwrap_or_default(),
            ),
        })
        .collect();

    let total_duration_ms = slots
        .last()
        .map_or(0, |s| s.start_ms.saturating_add(config.scramble_duration_ms));

    TransitionPlan {
        config,
        words,
        slots,
        total_duration_ms,
    }
}

/// Errors parsing transition parameters
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnimationError {
    /// Kind is neither expand nor rewrite
    #[error("unknown transform kind: '{0}'")]
    UnknownKind(String),

    /// Level outside 1..=3
    #[error("invalid intensity level {0} (expected 1-3)")]
    InvalidLevel(u8),
}
