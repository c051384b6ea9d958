//! Human-readable output for sync states.

use weather_sync::{Classification, Phase, SyncState, WeatherSnapshot};

/// One line, for streaming updates.
pub fn summary(state: &SyncState) -> String {
    match state.phase() {
        Phase::Idle => "idle".to_string(),
        Phase::Loading => "loading...".to_string(),
        Phase::Refreshing if state.offline => "offline, retrying...".to_string(),
        Phase::Refreshing => "refreshing...".to_string(),
        Phase::Ready => format!("updated: {}", headline(state.data.as_ref())),
        Phase::OfflineWithCache => format!(
            "offline ({}), showing cached: {}",
            state.error.as_deref().unwrap_or("unknown error"),
            headline(state.data.as_ref())
        ),
        Phase::ErrorNoData => format!(
            "error: {}",
            state.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

/// Full block, for one-shot display.
pub fn state(state: &SyncState, cache_age: Option<i64>) -> String {
    let mut out = String::new();

    match state.phase() {
        Phase::OfflineWithCache => {
            out.push_str("[offline] showing cached weather");
            if let Some(secs) = cache_age {
                out.push_str(&format!(" from {} ago", age(secs)));
            }
            out.push('\n');
        }
        Phase::Refreshing => out.push_str("[refreshing] showing cached weather\n"),
        Phase::ErrorNoData => {
            out.push_str(&format!(
                "[error] {}",
                state.error.as_deref().unwrap_or("unknown error")
            ));
            return out;
        }
        Phase::Idle | Phase::Loading | Phase::Ready => {}
    }

    if let Some(data) = &state.data {
        let body = serde_json::to_string_pretty(data.as_json())
            .unwrap_or_else(|_| data.as_json().to_string());
        out.push_str(&body);
    }
    out
}

pub fn retry_hint(failure: &Classification) -> String {
    if failure.retryable {
        "This looks temporary. Run the command again to retry.".to_string()
    } else {
        "Retrying may not help. Check your provider settings with `weather configure`.".to_string()
    }
}

pub fn age(secs: i64) -> String {
    match secs {
        s if s < 60 => format!("{}s", s.max(0)),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h {}m", s / 3600, (s % 3600) / 60),
        s => format!("{}d", s / 86_400),
    }
}

/// Best-effort one-liner from common provider shapes; falls back to the field count.
fn headline(data: Option<&WeatherSnapshot>) -> String {
    let Some(data) = data else {
        return "no data".to_string();
    };
    let json = data.as_json();

    let temperature = json
        .pointer("/main/temp")
        .or_else(|| json.pointer("/current/temp_c"))
        .and_then(|v| v.as_f64());
    let condition = json
        .pointer("/weather/0/description")
        .or_else(|| json.pointer("/current/condition/text"))
        .and_then(|v| v.as_str());

    match (temperature, condition) {
        (Some(t), Some(c)) => format!("{t:.1}°C, {c}"),
        (Some(t), None) => format!("{t:.1}°C"),
        (None, Some(c)) => c.to_string(),
        (None, None) => match json.as_object() {
            Some(map) => format!("{} fields", map.len()),
            None => json.to_string(),
        },
    }
}
