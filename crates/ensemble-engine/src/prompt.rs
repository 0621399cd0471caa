use ensemble_core::{AnalysisRequest, Dimension};

/// Render the per-dimension analysis prompt. Prompts are deliberately short
/// and demand a one-line JSON answer to bound inference latency.
pub fn build_prompt(dimension: Dimension, request: &AnalysisRequest) -> String {
    let mut prompt = match dimension {
        Dimension::Technical => format!(
            "{} technical analysis:\nPrice: ${:.2}, Change: {:+.2}%\n",
            request.symbol, request.price, request.change_percent
        ),
        Dimension::Risk => format!(
            "{} risk assessment:\nVolatility: {:.2}%, Price: ${:.2}\n",
            request.symbol,
            request.change_percent.abs(),
            request.price
        ),
        Dimension::Sentiment => {
            let momentum = if request.change_percent > 0.0 {
                "positive"
            } else if request.change_percent < 0.0 {
                "negative"
            } else {
                "flat"
            };
            format!(
                "{} sentiment:\nPrice: ${:.2}, Change: {:+.2}% ({momentum})\n",
                request.symbol, request.price, request.change_percent
            )
        }
        Dimension::Strategy => format!(
            "{} trade strategy:\nPrice: ${:.2}, Change: {:+.2}%\n",
            request.symbol, request.price, request.change_percent
        ),
    };

    if let Some(volume) = request.volume {
        prompt.push_str(&format!("Volume: {volume:.0}\n"));
    }
    if let Some(context) = &request.extra_context {
        prompt.push_str(&format!("Context: {context}\n"));
    }

    prompt.push_str("\nReply with one JSON object only: ");
    prompt.push_str(match dimension {
        Dimension::Technical => {
            r#"{"trend":"bullish|bearish|neutral","confidence":0.0,"reason":"..."}"#
        }
        Dimension::Risk => r#"{"risk":"low|medium|high","confidence":0.0,"reason":"..."}"#,
        Dimension::Sentiment => {
            r#"{"sentiment":"very_bullish|bullish|neutral|bearish|very_bearish","confidence":0.0,"reason":"..."}"#
        }
        Dimension::Strategy => r#"{"action":"buy|sell|hold","confidence":0.0,"reason":"..."}"#,
    });

    prompt
}
