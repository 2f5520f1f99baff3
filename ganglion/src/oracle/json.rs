//! JSON extraction from free-form oracle text
//!
//! Attempts, in order: a ```json fenced block, a plain fenced block, the
//! outermost bare `{...}` span, then the whole response with whitespace
//! stripped. The first candidate that parses as a JSON object wins.

use once_cell::sync::Lazy;
use regex::Regex;

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json\s*(.*?)```").expect("valid json fence regex"));

static PLAIN_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[a-zA-Z]*\s*(.*?)```").expect("valid fence regex"));

static BARE_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("valid object regex"));

/// Extract the first JSON object embedded in `response`
pub fn extract_json_object(response: &str) -> Option<serde_json::Value> {
    let fenced_json = JSON_FENCE
        .captures(response)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    let fenced_plain = PLAIN_FENCE
        .captures(response)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    let bare = BARE_OBJECT.find(response).map(|m| m.as_str().to_string());

    let stripped: String = response.chars().filter(|c| !c.is_whitespace()).collect();

    [fenced_json, fenced_plain, bare, Some(stripped)]
        .into_iter()
        .flatten()
        .find_map(|candidate| parse_object(&candidate))
}

fn parse_object(candidate: &str) -> Option<serde_json::Value> {
    serde_json::from_str::<serde_json::Value>(candidate.trim())
        .ok()
        .filter(|v| v.is_object())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_json_fence() {
        let text = "Here you go:\n```json\n{\"action\": 2}\n```\nThanks";
        assert_eq!(extract_json_object(text).unwrap()["action"], 2);
    }

    #[test]
    fn test_plain_fence() {
        let text = "```\n{\"summary\": \"ok\"}\n```";
        assert_eq!(extract_json_object(text).unwrap()["summary"], "ok");
    }

    #[test]
    fn test_bare_object_with_prose() {
        let text = "I decided {\"next\": \"FINISH\"} based on progress.";
        assert_eq!(extract_json_object(text).unwrap()["next"], "FINISH");
    }

    #[test]
    fn test_json_fence_wins_over_earlier_braces() {
        let text = "{not json}\n```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json_object(text).unwrap()["a"], 1);
    }

    #[test]
    fn test_whitespace_padded_object() {
        let text = "  {\n  \"a\"\n:\n 1 }  ";
        assert_eq!(extract_json_object(text).unwrap()["a"], 1);
    }

    #[test]
    fn test_garbage_yields_none() {
        assert!(extract_json_object("no structure here").is_none());
        assert!(extract_json_object("[1, 2, 3]").is_none());
        assert!(extract_json_object("").is_none());
    }

    proptest! {
        #[test]
        fn fenced_objects_round_trip(key in "[a-z]{1,12}", value in 0i64..10_000) {
            let object = serde_json::json!({ key.clone(): value });
            let text = format!("prefix\n```json\n{}\n```\nsuffix", object);
            let extracted = extract_json_object(&text).unwrap();
            prop_assert_eq!(extracted, object);
        }

        #[test]
        fn never_panics_on_arbitrary_text(text in ".{0,200}") {
            let _ = extract_json_object(&text);
        }
    }
}
