use countcheck_contracts::evaluation::ObservedCount;
use serde_json::Value;

/// Recovers a count from a vision model's free-form answer.
///
/// A JSON object with a numeric `count` field wins, and a negative one is
/// unparseable rather than rescanned; otherwise the first run of decimal
/// digits; otherwise [`ObservedCount::Unparseable`].
pub fn parse_count(text: &str) -> ObservedCount {
    if let Some(count) = json_object_count(text) {
        return count;
    }
    first_digit_run(text)
        .map(ObservedCount::Detected)
        .unwrap_or(ObservedCount::Unparseable)
}

fn json_object_count(text: &str) -> Option<ObservedCount> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let parsed: Value = serde_json::from_str(&text[start..=end]).ok()?;
    parsed.as_object()?.get("count").and_then(count_from_value)
}

/// `None` means the field carries no number and the digit scan should run.
fn count_from_value(value: &Value) -> Option<ObservedCount> {
    let raw = match value {
        Value::Number(number) => {
            if let Some(raw) = number.as_u64() {
                return Some(detected(u32::try_from(raw).ok()));
            }
            number.as_f64()?
        }
        Value::String(raw) => raw.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    if raw < 0.0 {
        return Some(ObservedCount::Unparseable);
    }
    let integral = raw.fract() == 0.0 && raw <= f64::from(u32::MAX);
    Some(detected(integral.then_some(raw as u32)))
}

fn detected(count: Option<u32>) -> ObservedCount {
    count
        .map(ObservedCount::Detected)
        .unwrap_or(ObservedCount::Unparseable)
}

fn first_digit_run(text: &str) -> Option<u32> {
    let start = text.find(|ch: char| ch.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse::<u32>().ok()
}
