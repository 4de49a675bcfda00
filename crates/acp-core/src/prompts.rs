//! Instruction text for the three model calls

use crate::types::{EvaluationBatch, IntensityLevel, TransformKind};
use std::fmt::Write as _;

const EXPAND_SYSTEM: &str = "You expand a passage from a personal website. Keep the author's \
voice, facts and language. Elaborate with concrete detail and asides. Reply with the expanded \
passage only, no preamble, no quotes.";

const REWRITE_SYSTEM: &str = "You rewrite a passage from a personal website so that it turns \
on the reader who lingers on it. Keep the subject matter and language of the original. Reply \
with the rewritten passage only, no preamble, no quotes.";

const GATE_SYSTEM: &str = "You are a strict copy editor. Judge whether the candidate text is \
a coherent, complete, well-formed transformation of the original passage in the same language. \
Reply with JSON only: {\"pass\": boolean, \"reason\": string}.";

const RUBRIC_SYSTEM: &str = "You score text transformations shown to a website visitor. For \
each transformation rate effectiveness (did it achieve the requested kind and intensity), \
integrity (does it stay on the original subject without fabrication) and technicalQuality \
(grammar, completeness, formatting) from 0 to 10, give an overall score and a pass flag. Then \
judge the batch as a whole. Reply with JSON only: {\"transformationScores\": [{\"index\": \
number, \"effectiveness\": number, \"integrity\": number, \"technicalQuality\": number, \
\"score\": number, \"passed\": boolean, \"notes\": string}], \"batchSummary\": \
{\"averageScore\": number, \"passed\": boolean, \"failedCount\": number, \"notes\": string}}.";

fn intensity_hint(level: IntensityLevel) -> &'static str {
    match level.value() {
        1 => "Be mildly passive-aggressive; most readers should barely notice.",
        2 => "Be openly irritated with the reader, but stay articulate.",
        _ => "Be openly hostile to the reader, without slurs or threats.",
    }
}

/// `(system, user)` pair for a transform call
#[must_use]
pub fn transform_prompt(
    kind: TransformKind,
    level: Option<IntensityLevel>,
    content: &str,
) -> (String, String) {
    let system = match (kind, level) {
        (TransformKind::Expand, _) => EXPAND_SYSTEM.to_string(),
        (TransformKind::Rewrite, Some(level)) => {
            format!("{REWRITE_SYSTEM} {}", intensity_hint(level))
        }
        (TransformKind::Rewrite, None) => REWRITE_SYSTEM.to_string(),
    };
    (system, content.to_string())
}

/// `(system, user)` pair for the gate's coherence check
#[must_use]
pub fn coherence_prompt(
    original: &str,
    transformed: &str,
    kind: TransformKind,
    level: Option<IntensityLevel>,
) -> (String, String) {
    let mut user = format!("Requested transformation: {kind}");
    if let Some(level) = level {
        let _ = write!(user, " (intensity {level} of 3)");
    }
    let _ = write!(user, "\n\nORIGINAL:\n{original}\n\nCANDIDATE:\n{transformed}");
    (GATE_SYSTEM.to_string(), user)
}

/// `(system, user)` pair for rubric scoring of a batch
#[must_use]
pub fn rubric_prompt(batch: &EvaluationBatch) -> (String, String) {
    let mut user = format!(
        "Batch {} for session {} ({} behavior events).\n",
        batch.batch_id,
        batch.session_id,
        batch.events.len()
    );
    for (index, record) in batch.transformations.iter().enumerate() {
        let _ = write!(user, "\n[{index}] kind={}", record.kind);
        if let Some(level) = record.level {
            let _ = write!(user, " level={level}");
        }
        let _ = write!(
            user,
            " gate={}\nORIGINAL:\n{}\nTRANSFORMED:\n{}\n",
            if record.gate.passed { "passed" } else { "rejected" },
            record.original_content,
            record.transformed_content
        );
    }
    (RUBRIC_SYSTEM.to_string(), user)
}
