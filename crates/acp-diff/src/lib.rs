//! ACP Diff Engine
//!
//! Pure functions that compute how to animate one version of a passage into
//! another. No I/O.
//!
//! - [`diff_words`]: LCS alignment over word and whitespace tokens
//! - [`diff_chars`]: positional alignment inside one changed word
//! - [`animation_config`]: deterministic timings per `(kind, level)`
//! - [`plan_transition`]: the full plan handed to a client
//!
//! # Example
//!
//! ```rust
//! use acp_diff::{diff_words, reconstruct_new, ChangeKind};
//!
//! let diff = diff_words("a calm reply", "a furious reply");
//! assert_eq!(diff[2].kind, ChangeKind::Changed);
//! assert_eq!(reconstruct_new(&diff), "a furious reply");
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod animation;
pub mod diff;

pub use animation::{
    animation_config, plan_transition, AnimationConfig, AnimationError, IntensityLevel,
    ScrambleSlot, TransformKind, TransitionPlan,
};
pub use diff::{
    diff_chars, diff_words, insertion_wins_tie, reconstruct_new, reconstruct_old, tokenize,
    ChangeKind, CharDiff, WordDiff,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
