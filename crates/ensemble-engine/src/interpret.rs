use ensemble_core::{
    Dimension, Opinion, PartialVerdict, RiskLevel, SentimentLabel, TradeAction, Trend,
};
use serde_json::Value;

/// Rationales are truncated to keep result payloads small.
const RATIONALE_MAX_CHARS: usize = 160;

/// Confidence assumed when a model states an opinion without a number.
fn default_confidence(dimension: Dimension) -> f64 {
    match dimension {
        Dimension::Technical => 0.6,
        Dimension::Risk => 0.55,
        Dimension::Sentiment => 0.5,
        Dimension::Strategy => 0.6,
    }
}

/// Normalize raw model output into a verdict. Total: malformed input falls
/// back through JSON decode, then keyword scan, then a neutral default;
/// absent input yields the zero-confidence neutral default.
pub fn interpret(dimension: Dimension, raw: Option<&str>) -> PartialVerdict {
    let Some(raw) = raw else {
        return PartialVerdict::absent(dimension, "model unavailable or timed out");
    };

    if let Some(verdict) = parse_structured(dimension, raw) {
        return verdict;
    }
    if let Some(verdict) = scan_keywords(dimension, raw) {
        return verdict;
    }

    PartialVerdict::new(Opinion::neutral(dimension), 0.5, truncate(raw))
}

/// Strict path: the prompt asks for a small JSON object, so try that first.
fn parse_structured(dimension: Dimension, raw: &str) -> Option<PartialVerdict> {
    let value = extract_json(raw)?;

    let opinion = match dimension {
        Dimension::Technical => {
            let trend = match value.get("trend")?.as_str()?.to_lowercase().as_str() {
                "bullish" => Trend::Bullish,
                "bearish" => Trend::Bearish,
                "neutral" => Trend::Neutral,
                _ => return None,
            };
            Opinion::Technical { trend }
        }
        Dimension::Risk => {
            let field = value.get("risk").or_else(|| value.get("level"))?;
            let level = match field.as_str()?.to_lowercase().as_str() {
                "low" => RiskLevel::Low,
                "medium" | "moderate" => RiskLevel::Medium,
                "high" => RiskLevel::High,
                _ => return None,
            };
            Opinion::Risk { level }
        }
        Dimension::Sentiment => {
            let sentiment = match value.get("sentiment")?.as_str()?.to_lowercase().as_str() {
                "very_bullish" | "very bullish" => SentimentLabel::VeryBullish,
                "bullish" => SentimentLabel::Bullish,
                "neutral" => SentimentLabel::Neutral,
                "bearish" => SentimentLabel::Bearish,
                "very_bearish" | "very bearish" => SentimentLabel::VeryBearish,
                _ => return None,
            };
            Opinion::Sentiment { sentiment }
        }
        Dimension::Strategy => {
            let action = match value.get("action")?.as_str()?.to_lowercase().as_str() {
                "buy" => TradeAction::Buy,
                "sell" => TradeAction::Sell,
                "hold" => TradeAction::Hold,
                _ => return None,
            };
            Opinion::Strategy { action }
        }
    };

    let confidence = value
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or_else(|| default_confidence(dimension));

    let rationale = value
        .get("reason")
        .and_then(Value::as_str)
        .filter(|r| !r.trim().is_empty())
        .map(truncate)
        .unwrap_or_else(|| truncate(raw));

    Some(PartialVerdict::new(opinion, confidence, rationale))
}

/// Models often wrap the object in prose; take the outermost braces.
fn extract_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end])
        .ok()
        .filter(Value::is_object)
}

/// Loose path: case-insensitive substring scan for dimension keywords.
/// More specific phrases are tried first so "very bullish" does not read as
/// plain "bullish".
fn scan_keywords(dimension: Dimension, raw: &str) -> Option<PartialVerdict> {
    let text = raw.to_lowercase();

    let opinion = match dimension {
        Dimension::Technical => {
            let trend = first_match(
                &text,
                &[("bullish", Trend::Bullish), ("bearish", Trend::Bearish)],
            )?;
            Opinion::Technical { trend }
        }
        Dimension::Risk => {
            let level = first_match(
                &text,
                &[
                    ("high", RiskLevel::High),
                    ("low", RiskLevel::Low),
                    ("medium", RiskLevel::Medium),
                    ("moderate", RiskLevel::Medium),
                ],
            )?;
            Opinion::Risk { level }
        }
        Dimension::Sentiment => {
            let sentiment = priority_match(
                &text,
                &[
                    ("very_bullish", SentimentLabel::VeryBullish),
                    ("very bullish", SentimentLabel::VeryBullish),
                    ("very_bearish", SentimentLabel::VeryBearish),
                    ("very bearish", SentimentLabel::VeryBearish),
                    ("bullish", SentimentLabel::Bullish),
                    ("bearish", SentimentLabel::Bearish),
                ],
            )?;
            Opinion::Sentiment { sentiment }
        }
        Dimension::Strategy => {
            let action = first_match(
                &text,
                &[
                    ("buy", TradeAction::Buy),
                    ("sell", TradeAction::Sell),
                    ("hold", TradeAction::Hold),
                ],
            )?;
            Opinion::Strategy { action }
        }
    };

    let confidence = scan_confidence(&text).unwrap_or_else(|| default_confidence(dimension));

    Some(PartialVerdict::new(opinion, confidence, truncate(raw)))
}

/// Whichever keyword occurs earliest in the text wins.
fn first_match<T: Copy>(text: &str, candidates: &[(&str, T)]) -> Option<T> {
    candidates
        .iter()
        .filter_map(|(keyword, value)| text.find(keyword).map(|pos| (pos, *value)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, value)| value)
}

/// First keyword present wins, in candidate order.
fn priority_match<T: Copy>(text: &str, candidates: &[(&str, T)]) -> Option<T> {
    candidates
        .iter()
        .find(|(keyword, _)| text.contains(keyword))
        .map(|(_, value)| *value)
}

/// Best-effort scrape of a "confidence: 0.8"-style figure from free text.
fn scan_confidence(text: &str) -> Option<f64> {
    let after = &text[text.find("confidence")? + "confidence".len()..];
    let start = after.find(|c: char| c.is_ascii_digit())?;
    let number: String = after[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    number.parse::<f64>().ok().filter(|c| c.is_finite())
}

fn truncate(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() <= RATIONALE_MAX_CHARS {
        trimmed.to_string()
    } else {
        trimmed.chars().take(RATIONALE_MAX_CHARS).collect()
    }
}
