//! Sampling keeps evaluation cost proportional to the configured rate

use acp_core::{BatchEvaluator, EvaluationConfig, RandomSampler, SkipReason};
use acp_test_utils::{batch, rubric_reply, test_config, ScriptedModelClient, RUBRIC_MODEL};
use std::sync::Arc;

const TRIALS: usize = 2_000;

fn evaluator(client: &Arc<ScriptedModelClient>, sample_rate: f64, seed: u64) -> BatchEvaluator {
    let config = test_config();
    let evaluation = EvaluationConfig {
        sample_rate,
        ..config.evaluation.clone()
    };
    BatchEvaluator::new(client.clone(), evaluation, &config.model)
        .with_sampler(Arc::new(RandomSampler::seeded(seed)))
}

#[tokio::test]
async fn observed_rate_tracks_configured_rate() {
    let client = Arc::new(ScriptedModelClient::new().reply(RUBRIC_MODEL, rubric_reply(1, 7.0, true)));
    let evaluator = evaluator(&client, 0.15, 0x5eed);
    let one = batch("tab", 1);

    let mut scored = 0usize;
    for _ in 0..TRIALS {
        let report = evaluator.evaluate_sampled(&one).await.unwrap();
        if report.is_sentinel() {
            assert_eq!(report.batch_summary.skip_reason, Some(SkipReason::SampledSkip));
        } else {
            scored += 1;
        }
    }

    // Five standard deviations at n = 2000
    let observed = scored as f64 / TRIALS as f64;
    assert!((observed - 0.15).abs() < 0.04, "observed {observed}");
    assert_eq!(client.calls_to(RUBRIC_MODEL), scored);
}

#[tokio::test]
async fn rate_bounds_are_absolute() {
    let client = Arc::new(ScriptedModelClient::new().reply(RUBRIC_MODEL, rubric_reply(1, 7.0, true)));
    let one = batch("tab", 1);

    let never = evaluator(&client, 0.0, 1);
    for _ in 0..200 {
        assert!(never.evaluate_sampled(&one).await.unwrap().is_sentinel());
    }
    assert_eq!(client.call_count(), 0);

    let always = evaluator(&client, 1.0, 1);
    for _ in 0..50 {
        assert!(!always.evaluate_sampled(&one).await.unwrap().is_sentinel());
    }
    assert_eq!(client.calls_to(RUBRIC_MODEL), 50);
}

#[tokio::test]
async fn disabled_wins_over_sampling() {
    let client = Arc::new(ScriptedModelClient::new().reply(RUBRIC_MODEL, rubric_reply(1, 7.0, true)));
    let config = test_config().with_evaluation_enabled(false);
    let evaluator = BatchEvaluator::new(client.clone(), config.evaluation, &config.model);

    let report = evaluator.evaluate_sampled(&batch("tab", 3)).await.unwrap();
    assert_eq!(report.batch_summary.skip_reason, Some(SkipReason::Disabled));
    assert!(report.batch_id.as_str().starts_with("disabled-"));
    assert_eq!(client.call_count(), 0);
}
