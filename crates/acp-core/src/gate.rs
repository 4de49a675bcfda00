//! Two-tier quality gate
//!
//! Tier one is a fixed list of deterministic checks that runs in
//! microseconds. Tier two is an optional coherence judgment from a cheap
//! model, reached only when every heuristic passed. A disabled or
//! unconfigured second tier degrades to heuristics only.

use crate::config::{GateConfig, ModelConfig};
use crate::model::{elapsed_ms, extract_json, with_timeout, ModelClient, ModelRequest};
use crate::prompts::coherence_prompt;
use crate::types::{GateResult, GateTier, IntensityLevel, TransformKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;

static TRAILING_ELLIPSIS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\.\.\.|\u{2026})[\s\x22'\u{201D}]*$").unwrap());

static TRUNCATION_MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\[(?:truncated|continued|cut off|\.\.\.)[^\]]*\]|\(continued\)|<\|endoftext\|>")
        .unwrap()
});

static DANGLING_END_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,;:(\-\u{2013}]\s*$").unwrap());

static PREAMBLE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)^\s*(?:sure|certainly|of course|absolutely)[,!.]").unwrap(),
        Regex::new(r"(?i)^\s*here(?:'s| is) (?:the|an?|your) (?:rewritten|expanded|revised|new)").unwrap(),
        Regex::new(r"(?i)\bas an ai\b").unwrap(),
        Regex::new(r"(?i)\bas a language model\b").unwrap(),
        Regex::new(r"(?i)^\s*i(?:'m| am) sorry,? but\b").unwrap(),
        Regex::new(r"(?i)^\s*i can(?:'t|not) (?:help|assist|comply|do that)\b").unwrap(),
    ]
});

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}']+").unwrap());

/// What the gate inspects
#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    pub original: &'a str,
    pub transformed: &'a str,
    pub kind: TransformKind,
    pub level: Option<IntensityLevel>,
}

/// Per-call switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateOptions {
    pub skip_llm_gate: bool,
}

#[derive(Debug, Deserialize)]
struct CoherenceVerdict {
    #[serde(alias = "passed")]
    pass: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Heuristic check outcome: `Err` carries the rejection reason
type Check = Result<(), String>;

fn check_not_empty(input: &GateInput<'_>) -> Check {
    if input.transformed.trim().is_empty() {
        Err("transformation is empty".to_string())
    } else {
        Ok(())
    }
}

fn check_length_ratio(config: &GateConfig, input: &GateInput<'_>) -> Check {
    let original = input.original.trim().chars().count().max(1) as f64;
    let transformed = input.transformed.trim().chars().count() as f64;
    let ratio = transformed / original;

    let min = match input.kind {
        TransformKind::Expand => config.min_length_ratio_expand,
        TransformKind::Rewrite => config.min_length_ratio_rewrite,
    };
    if ratio < min {
        return Err(format!("length ratio {ratio:.2} below minimum {min:.2}"));
    }
    if ratio > config.max_length_ratio {
        return Err(format!(
            "length ratio {ratio:.2} above maximum {:.2}",
            config.max_length_ratio
        ));
    }
    Ok(())
}

fn check_truncation(input: &GateInput<'_>) -> Check {
    if let Some(m) = TRUNCATION_MARKER_RE.find(input.transformed) {
        return Err(format!("truncation marker '{}'", m.as_str()));
    }
    let original = input.original.trim_end();
    let transformed = input.transformed.trim_end();
    if TRAILING_ELLIPSIS_RE.is_match(transformed) && !TRAILING_ELLIPSIS_RE.is_match(original) {
        return Err("output ends in an ellipsis".to_string());
    }
    if DANGLING_END_RE.is_match(transformed) && !DANGLING_END_RE.is_match(original) {
        return Err("output ends mid-sentence".to_string());
    }
    Ok(())
}

fn check_repetition(config: &GateConfig, input: &GateInput<'_>) -> Check {
    let mut previous: Option<String> = None;
    let mut run = 0usize;
    for word in WORD_RE.find_iter(input.transformed) {
        let word = word.as_str().to_lowercase();
        if previous.as_deref() == Some(word.as_str()) {
            run += 1;
        } else {
            run = 1;
            previous = Some(word);
        }
        if run > config.max_repeat_run {
            return Err(format!(
                "token '{}' repeated more than {} times in a row",
                previous.unwrap_or_default(),
                config.max_repeat_run
            ));
        }
    }

    // Sentence-level loops: the same sentence three or more times
    let mut seen: Vec<(String, usize)> = Vec::new();
    for sentence in input
        .transformed
        .split(['.', '!', '?', '\n'])
        .map(|s| s.trim().to_lowercase())
        .filter(|s| s.split_whitespace().count() >= 3)
    {
        match seen.iter_mut().find(|(s, _)| *s == sentence) {
            Some((_, n)) => {
                *n += 1;
                if *n >= 3 {
                    return Err("sentence repeated three or more times".to_string());
                }
            }
            None => seen.push((sentence, 1)),
        }
    }
    Ok(())
}

fn check_preamble(input: &GateInput<'_>) -> Check {
    for pattern in PREAMBLE_PATTERNS.iter() {
        if let Some(m) = pattern.find(input.transformed) {
            if !pattern.is_match(input.original) {
                return Err(format!("model preamble or refusal '{}'", m.as_str().trim()));
            }
        }
    }
    Ok(())
}

/// Share of alphabetic characters that are Latin letters
fn latin_share(text: &str) -> Option<f64> {
    let (mut latin, mut alphabetic) = (0usize, 0usize);
    for c in text.chars().filter(|c| c.is_alphabetic()) {
        alphabetic += 1;
        if c.is_ascii_alphabetic() || ('\u{00C0}'..='\u{024F}').contains(&c) {
            latin += 1;
        }
    }
    (alphabetic > 0).then(|| latin as f64 / alphabetic as f64)
}

fn check_script(config: &GateConfig, input: &GateInput<'_>) -> Check {
    let (Some(before), Some(after)) = (latin_share(input.original), latin_share(input.transformed))
    else {
        return Ok(());
    };
    if (before - after).abs() > config.max_script_drift {
        return Err(format!(
            "script mismatch: {:.0}% latin letters against {:.0}% in the original",
            after * 100.0,
            before * 100.0
        ));
    }
    Ok(())
}

/// Accept/reject filter applied to every transformation
pub struct QualityGate {
    config: GateConfig,
    client: Option<Arc<dyn ModelClient>>,
    model: String,
}

impl std::fmt::Debug for QualityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityGate")
            .field("config", &self.config)
            .field("model", &self.model)
            .field("llm_tier", &self.client.is_some())
            .finish()
    }
}

impl QualityGate {
    /// Gate with an optional LLM tier
    #[must_use]
    pub fn new(config: GateConfig, client: Option<Arc<dyn ModelClient>>, model: &ModelConfig) -> Self {
        Self {
            config,
            client,
            model: model.gate_model.clone(),
        }
    }

    /// Gate that never calls a model
    #[must_use]
    pub fn heuristics_only(config: GateConfig) -> Self {
        Self::new(config, None, &ModelConfig::default())
    }

    /// Run tier one alone
    ///
    /// # Errors
    /// The first failing check's reason
    pub fn check_heuristics(&self, input: &GateInput<'_>) -> Result<(), String> {
        check_not_empty(input)?;
        check_length_ratio(&self.config, input)?;
        check_truncation(input)?;
        check_repetition(&self.config, input)?;
        check_preamble(input)?;
        check_script(&self.config, input)
    }

    fn llm_tier(&self, options: GateOptions) -> Option<&Arc<dyn ModelClient>> {
        if options.skip_llm_gate || self.config.skip_llm_gate {
            return None;
        }
        self.client.as_ref().filter(|c| c.is_configured())
    }

    /// Run both tiers
    pub async fn gate(&self, input: GateInput<'_>, options: GateOptions) -> GateResult {
        let start = Instant::now();

        if let Err(reason) = self.check_heuristics(&input) {
            return Self::record(GateResult::reject(GateTier::Heuristics, reason, elapsed_ms(start)));
        }

        let Some(client) = self.llm_tier(options) else {
            return Self::record(GateResult::pass(elapsed_ms(start)));
        };

        let (system, prompt) = coherence_prompt(input.original, input.transformed, input.kind, input.level);
        let request = ModelRequest {
            model: self.model.clone(),
            system,
            prompt,
            max_tokens: 128,
            temperature: 0.0,
        };

        let verdict = with_timeout(self.config.llm_timeout(), client.complete(request))
            .await
            .and_then(|response| extract_json::<CoherenceVerdict>(&response.text));

        let result = match verdict {
            Ok(CoherenceVerdict { pass: true, .. }) => GateResult::pass(elapsed_ms(start)),
            Ok(CoherenceVerdict { pass: false, reason }) => GateResult::reject(
                GateTier::Llm,
                reason.unwrap_or_else(|| "judged incoherent".to_string()),
                elapsed_ms(start),
            ),
            Err(err) => GateResult::reject(
                GateTier::Llm,
                format!("coherence check failed: {err}"),
                elapsed_ms(start),
            ),
        };
        Self::record(result)
    }

    fn record(result: GateResult) -> GateResult {
        let tier = result.tier.map_or("none", |t| t.as_str());
        let outcome = if result.passed { "pass" } else { "reject" };
        metrics::counter!("acp_gate_decisions_total", "tier" => tier, "outcome" => outcome).increment(1);

        if result.passed {
            tracing::debug!(latency_ms = result.latency_ms, "gate passed");
        } else {
            tracing::info!(
                tier,
                reason = result.reason.as_deref().unwrap_or_default(),
                latency_ms = result.latency_ms,
                "gate rejected transformation"
            );
        }
        result
    }
}
