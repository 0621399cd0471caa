use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use ensemble_core::{
    AnalysisRequest, BatchEntry, Dimension, EnsembleConfig, EnsembleError, InferenceError,
    InferenceRequest, ModelInference, ModelSpec, Opinion, PartialVerdict, Recommendation, Trend,
};

use crate::{decide_from_verdicts, BatchRunner, EnsembleEngine};

const TECH: &str = "llama3.1:8b";
const RISK: &str = "mistral:7b";
const SENT: &str = "phi3:mini";
const STRAT: &str = "codellama:13b";

#[derive(Clone)]
enum Script {
    Reply(&'static str),
    Fail,
    Delay(Duration, &'static str),
}

struct MockInference {
    scripts: HashMap<String, Script>,
    calls: AtomicUsize,
    registered: Option<Vec<String>>,
}

impl MockInference {
    fn new(scripts: Vec<(&str, Script)>) -> Self {
        Self {
            scripts: scripts
                .into_iter()
                .map(|(model, script)| (model.to_string(), script))
                .collect(),
            calls: AtomicUsize::new(0),
            registered: Some(vec![
                TECH.to_string(),
                RISK.to_string(),
                SENT.to_string(),
                STRAT.to_string(),
            ]),
        }
    }

    fn with_registered(mut self, registered: Option<Vec<String>>) -> Self {
        self.registered = registered;
        self
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelInference for MockInference {
    async fn infer(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.scripts.get(&request.model) {
            Some(Script::Reply(text)) => Ok(text.to_string()),
            Some(Script::Fail) | None => {
                Err(InferenceError::Unavailable("scripted failure".to_string()))
            }
            Some(Script::Delay(delay, text)) => {
                // Honors the caller-supplied deadline the way the real
                // client does.
                if *delay >= request.timeout {
                    tokio::time::sleep(request.timeout).await;
                    Err(InferenceError::Timeout)
                } else {
                    tokio::time::sleep(*delay).await;
                    Ok(text.to_string())
                }
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, InferenceError> {
        match &self.registered {
            Some(models) => Ok(models.clone()),
            None => Err(InferenceError::Unavailable("connection refused".to_string())),
        }
    }
}

fn test_config() -> EnsembleConfig {
    let mut config = EnsembleConfig::default();
    for spec in &mut config.specs {
        spec.timeout = Duration::from_millis(100);
    }
    config.overall_timeout = Duration::from_secs(2);
    config.warmup_enabled = false;
    config
}

fn engine_with(
    scripts: Vec<(&str, Script)>,
    config: EnsembleConfig,
) -> (Arc<EnsembleEngine>, Arc<MockInference>) {
    let mock = Arc::new(MockInference::new(scripts));
    let engine = Arc::new(EnsembleEngine::with_inference(config, mock.clone()));
    (engine, mock)
}

fn all_reply() -> Vec<(&'static str, Script)> {
    vec![
        (
            TECH,
            Script::Reply(r#"{"trend":"bullish","confidence":0.8,"reason":"uptrend intact"}"#),
        ),
        (
            RISK,
            Script::Reply(r#"{"risk":"low","confidence":0.7,"reason":"stable range"}"#),
        ),
        (
            SENT,
            Script::Reply(r#"{"sentiment":"bullish","confidence":0.6,"reason":"positive flow"}"#),
        ),
        (
            STRAT,
            Script::Reply(r#"{"action":"buy","confidence":0.7,"reason":"momentum entry"}"#),
        ),
    ]
}

// AAPL at +4%: technical/risk/strategy respond, sentiment times out.
#[tokio::test]
async fn mixed_ensemble_scenario() {
    let mut config = test_config();
    for spec in &mut config.specs {
        spec.weight = match spec.dimension {
            Dimension::Technical => 0.35,
            Dimension::Risk => 0.25,
            Dimension::Sentiment => 0.20,
            Dimension::Strategy => 0.20,
        };
    }

    let (engine, _mock) = engine_with(
        vec![
            (
                TECH,
                Script::Reply(r#"{"trend":"bullish","confidence":0.8,"reason":"breakout"}"#),
            ),
            (
                RISK,
                Script::Reply(r#"{"risk":"low","confidence":0.7,"reason":"low volatility"}"#),
            ),
            (SENT, Script::Delay(Duration::from_secs(5), "unused")),
            (
                STRAT,
                Script::Reply(r#"{"action":"buy","confidence":0.7,"reason":"trend entry"}"#),
            ),
        ],
        config,
    );

    let result = engine
        .decide(AnalysisRequest::new("AAPL", 150.0, 4.0))
        .await
        .unwrap();

    assert_eq!(result.responded_count, 3);
    assert_eq!(result.total_count, 4);
    assert_eq!(result.recommendation, Recommendation::Buy);
    assert!(result.decision_score > 0.3);

    let expected = (1.0 * 0.8 * 0.35 + 0.5 * 0.7 * 0.25 + 1.0 * 0.7 * 0.20) / 0.80;
    assert!((result.decision_score - expected).abs() < 1e-9);

    let sentiment = &result.verdicts[&Dimension::Sentiment];
    assert!(!sentiment.responded);
    assert_eq!(sentiment.confidence, 0.0);
}

// P1: zero responders degrade to HOLD with confidence 0, not an error.
#[tokio::test]
async fn all_models_silent_yields_hold() {
    let (engine, _mock) = engine_with(
        vec![
            (TECH, Script::Fail),
            (RISK, Script::Fail),
            (SENT, Script::Fail),
            (STRAT, Script::Fail),
        ],
        test_config(),
    );

    let result = engine
        .decide(AnalysisRequest::new("AAPL", 150.0, 1.0))
        .await
        .unwrap();

    assert_eq!(result.recommendation, Recommendation::Hold);
    assert_eq!(result.confidence, 0.0);
    assert_eq!(result.decision_score, 0.0);
    assert_eq!(result.responded_count, 0);
    for verdict in result.verdicts.values() {
        assert!(!verdict.responded);
    }
}

// P2: normalization divides by responding weights only.
#[tokio::test]
async fn score_normalizes_over_responding_weights() {
    let (engine, _mock) = engine_with(
        vec![
            (
                TECH,
                Script::Reply(r#"{"trend":"bullish","confidence":0.8,"reason":"up"}"#),
            ),
            (RISK, Script::Fail),
            (SENT, Script::Fail),
            (STRAT, Script::Fail),
        ],
        test_config(),
    );

    let result = engine
        .decide(AnalysisRequest::new("AAPL", 150.0, 2.0))
        .await
        .unwrap();

    // (1.0 * 0.8 * w_tech) / w_tech, regardless of the other weights.
    assert!((result.decision_score - 0.8).abs() < 1e-9);
    assert_eq!(result.responded_count, 1);
    assert_eq!(result.recommendation, Recommendation::Buy);
    // One responder: no agreement boost.
    assert!((result.confidence - 0.8).abs() < 1e-9);
}

// P3: the threshold boundary itself is HOLD on both sides of zero.
#[test]
fn threshold_boundary_is_exclusive() {
    let mut config = EnsembleConfig::default();
    config.buy_threshold = 0.35;
    config.specs = vec![ModelSpec::new(
        Dimension::Technical,
        TECH,
        1.0,
        0.1,
        50,
        Duration::from_secs(1),
    )];

    let verdict_with = |trend: Trend, confidence: f64| {
        let mut verdicts = HashMap::new();
        verdicts.insert(
            Dimension::Technical,
            PartialVerdict::new(Opinion::Technical { trend }, confidence, "t"),
        );
        verdicts
    };

    let (score, rec, _) = decide_from_verdicts(&verdict_with(Trend::Bullish, 0.35), &config, 1);
    assert_eq!(score, 0.35);
    assert_eq!(rec, Recommendation::Hold);

    let (_, rec, _) = decide_from_verdicts(&verdict_with(Trend::Bullish, 0.36), &config, 1);
    assert_eq!(rec, Recommendation::Buy);

    let (_, rec, _) = decide_from_verdicts(&verdict_with(Trend::Bearish, 0.35), &config, 1);
    assert_eq!(rec, Recommendation::Hold);

    let (_, rec, _) = decide_from_verdicts(&verdict_with(Trend::Bearish, 0.36), &config, 1);
    assert_eq!(rec, Recommendation::Sell);
}

// P4: boosted confidence stays capped at 0.95.
#[tokio::test]
async fn confidence_is_capped() {
    let (engine, _mock) = engine_with(
        vec![
            (
                TECH,
                Script::Reply(r#"{"trend":"bullish","confidence":1.0,"reason":"max"}"#),
            ),
            (
                RISK,
                Script::Reply(r#"{"risk":"low","confidence":1.0,"reason":"max"}"#),
            ),
            (
                SENT,
                Script::Reply(r#"{"sentiment":"very_bullish","confidence":1.0,"reason":"max"}"#),
            ),
            (
                STRAT,
                Script::Reply(r#"{"action":"buy","confidence":1.0,"reason":"max"}"#),
            ),
        ],
        test_config(),
    );

    let result = engine
        .decide(AnalysisRequest::new("NVDA", 138.0, 6.0))
        .await
        .unwrap();

    // 0.85 raw, boosted by 1.2 would exceed the cap.
    assert!((result.confidence - 0.95).abs() < 1e-9);
    assert!(result.confidence <= 0.95);
    assert_eq!(result.recommendation, Recommendation::Buy);
}

// P5 at engine level: a repeated identical request is served from cache.
#[tokio::test]
async fn repeated_request_hits_cache() {
    let (engine, mock) = engine_with(all_reply(), test_config());

    let request = AnalysisRequest::new("AAPL", 150.0, 4.0);
    let first = engine.decide(request.clone()).await.unwrap();
    let second = engine.decide(request).await.unwrap();

    assert_eq!(mock.call_count(), 4);
    assert_eq!(first.recommendation, second.recommendation);
    assert!((first.decision_score - second.decision_score).abs() < 1e-9);
}

// P7: one invalid symbol becomes an error entry; order is preserved.
#[tokio::test]
async fn batch_isolates_invalid_entries() {
    let (engine, _mock) = engine_with(all_reply(), test_config());
    let runner = BatchRunner::new(Arc::clone(&engine));

    let symbols = ["AAPL", "MSFT", "", "NVDA", "TSLA"];
    let requests: Vec<AnalysisRequest> = symbols
        .iter()
        .map(|s| AnalysisRequest::new(*s, 100.0, 1.0))
        .collect();

    let batch = runner.run(requests).await.unwrap();

    assert_eq!(batch.entries.len(), 5);
    assert_eq!(batch.summary.successful, 4);
    for (index, entry) in batch.entries.iter().enumerate() {
        match entry {
            BatchEntry::Ok { analysis } => assert_eq!(analysis.symbol, symbols[index]),
            BatchEntry::Error { symbol, error } => {
                assert_eq!(index, 2);
                assert_eq!(symbol, "");
                assert!(error.contains("empty symbol"));
            }
        }
    }
    assert!(batch.summary.avg_confidence > 0.0);
}

#[tokio::test]
async fn oversized_batch_is_rejected() {
    let mut config = test_config();
    config.max_batch_size = 3;
    let (engine, _mock) = engine_with(all_reply(), config);
    let runner = BatchRunner::new(engine);

    let requests: Vec<AnalysisRequest> = (0..4)
        .map(|i| AnalysisRequest::new(format!("SYM{i}"), 10.0, 0.0))
        .collect();

    match runner.run(requests).await {
        Err(EnsembleError::BatchTooLarge { given, max }) => {
            assert_eq!(given, 4);
            assert_eq!(max, 3);
        }
        other => panic!("expected BatchTooLarge, got {other:?}"),
    }
}

// The outer deadline is a hard wall: a hung model cannot stall the run.
#[tokio::test]
async fn overall_deadline_aborts_pending_calls() {
    let mut config = test_config();
    for spec in &mut config.specs {
        spec.timeout = Duration::from_secs(10);
    }
    config.overall_timeout = Duration::from_millis(150);

    let mut scripts = all_reply();
    scripts.retain(|(model, _)| *model != STRAT);
    scripts.push((STRAT, Script::Delay(Duration::from_secs(5), "unused")));

    let (engine, _mock) = engine_with(scripts, config);

    let started = Instant::now();
    let result = engine
        .decide(AnalysisRequest::new("AAPL", 150.0, 4.0))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(result.responded_count, 3);
    assert!(!result.verdicts[&Dimension::Strategy].responded);
}

#[tokio::test]
async fn warmup_runs_exactly_once() {
    let (engine, mock) = engine_with(all_reply(), test_config());

    engine.warmup().await;
    engine.warmup().await;
    assert_eq!(mock.call_count(), 4);

    // Concurrent callers coalesce onto the first pass.
    let (engine, mock) = engine_with(all_reply(), test_config());
    tokio::join!(engine.warmup(), engine.warmup());
    assert_eq!(mock.call_count(), 4);
}

#[tokio::test]
async fn decide_triggers_warmup_once_when_enabled() {
    let mut config = test_config();
    config.warmup_enabled = true;
    let (engine, mock) = engine_with(all_reply(), config);

    engine
        .decide(AnalysisRequest::new("AAPL", 150.0, 4.0))
        .await
        .unwrap();
    // 4 warmup calls + 4 analysis calls.
    assert_eq!(mock.call_count(), 8);

    engine
        .decide(AnalysisRequest::new("MSFT", 442.0, 0.5))
        .await
        .unwrap();
    // Second run: analysis calls only.
    assert_eq!(mock.call_count(), 12);
    assert!(engine.stats().models_warmed);
}

#[tokio::test]
async fn invalid_request_is_rejected_before_fanout() {
    let (engine, mock) = engine_with(all_reply(), test_config());

    let result = engine.decide(AnalysisRequest::new("AAPL", f64::NAN, 1.0)).await;
    assert!(matches!(result, Err(EnsembleError::InvalidRequest(_))));
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn availability_requires_every_configured_model() {
    let (engine, _mock) = engine_with(all_reply(), test_config());
    assert!(engine.is_available().await);

    let mock = Arc::new(MockInference::new(all_reply()).with_registered(Some(vec![
        TECH.to_string(),
        RISK.to_string(),
    ])));
    let engine = EnsembleEngine::with_inference(test_config(), mock);
    assert!(!engine.is_available().await);

    let mock = Arc::new(MockInference::new(all_reply()).with_registered(None));
    let engine = EnsembleEngine::with_inference(test_config(), mock);
    assert!(!engine.is_available().await);
}

#[tokio::test]
async fn stats_track_runs_and_model_calls() {
    let (engine, _mock) = engine_with(all_reply(), test_config());

    engine
        .decide(AnalysisRequest::new("AAPL", 150.0, 4.0))
        .await
        .unwrap();

    let snapshot = engine.stats();
    assert_eq!(snapshot.total_runs, 1);
    assert_eq!(snapshot.decisions.buy, 1);
    assert_eq!(snapshot.model_performance.len(), 4);
    assert_eq!(snapshot.model_performance[TECH].success, 1);
    assert_eq!(snapshot.cache_size, 4);
}

#[test]
fn result_serializes_to_expected_json_shape() {
    let mut verdicts = HashMap::new();
    verdicts.insert(
        Dimension::Technical,
        PartialVerdict::new(
            Opinion::Technical {
                trend: Trend::Bullish,
            },
            0.8,
            "uptrend",
        ),
    );

    let config = EnsembleConfig::default();
    let (score, recommendation, confidence) = decide_from_verdicts(&verdicts, &config, 1);
    let result = ensemble_core::EnsembleResult {
        symbol: "AAPL".to_string(),
        recommendation,
        confidence,
        decision_score: score,
        verdicts,
        responded_count: 1,
        total_count: 4,
        agreement: ensemble_core::AgreementLevel::from_responders(1),
        elapsed_ms: 12,
        timestamp: chrono::Utc::now(),
    };

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["symbol"], "AAPL");
    assert_eq!(json["recommendation"], "BUY");
    assert_eq!(json["agreement"], "low");
    assert_eq!(json["verdicts"]["technical"]["trend"], "bullish");
    assert_eq!(json["verdicts"]["technical"]["responded"], true);
}
