//! Tool-call extraction from free-form model output.
//!
//! Not every model fills the structured `tool_calls` field. Many write the
//! call into their answer text instead, in one of several conventions:
//!
//! 1. A ```` ```tool_call ```` fenced block holding a JSON object
//! 2. A ```` ```json ```` fenced block with `"tool"` and `"arguments"` keys
//! 3. An unlabeled fenced block with a `"tool"` key
//! 4. Inline `{"tool": "...", "arguments": {...}}`
//! 5. Inline `{"name": "...", "parameters": {...}}`
//! 6. Function-call syntax: `get_planet_positions(planet="Moon")`
//!
//! Every pass is a pure function over the input text. All six run, their
//! results are unioned in pass order, and a request is dropped when the same
//! `(name, arguments)` pair was already accepted.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::LazyLock;

use astrolabe_core::tool::ToolCallRequest;
use regex_lite::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::trace;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_\-]*)[ \t]*\r?\n?(.*?)```").expect("fenced block pattern")
});

static INLINE_TOOL_OBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\{\s*"tool"\s*:\s*"[^"]*"\s*,\s*"arguments"\s*:\s*\{(?:[^{}]|\{[^{}]*\})*\}\s*\}"#,
    )
    .expect("inline tool pattern")
});

static INLINE_NAME_OBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\{\s*"name"\s*:\s*"[^"]*"\s*,\s*"parameters"\s*:\s*\{(?:[^{}]|\{[^{}]*\})*\}\s*\}"#,
    )
    .expect("inline name pattern")
});

static FUNCTION_CALL: LazyLock<Regex> = LazyLock::new(|| {
    let verbs = FUNCTION_VERBS.join("|");
    Regex::new(&format!(r"\b((?:{verbs})_[A-Za-z0-9_]+)\(([^()]*)\)"))
        .expect("function call pattern")
});

static FALLBACK_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:tool|name)"\s*:\s*"([^"]+)""#).expect("fallback name pattern")
});

static FALLBACK_ARGUMENTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:arguments|parameters)"\s*:\s*(\{(?:[^{}]|\{[^{}]*\})*\})"#)
        .expect("fallback arguments pattern")
});

static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("newline pattern"));

/// Verb prefixes that mark an identifier as a callable tool in pass 6.
pub const FUNCTION_VERBS: &[&str] = &[
    "get", "set", "update", "create", "delete", "list", "search", "find", "fetch", "calculate",
    "compute", "lookup", "add", "remove",
];

/// Fence labels that mark a block as a tool call in pass 1.
const TOOL_CALL_LABELS: &[&str] = &["tool_call", "tool-call", "tool"];

/// Object keys tried, in order, for the tool name.
const NAME_KEYS: &[&str] = &["tool", "name", "function"];

/// Object keys tried, in order, for the argument object.
const ARGUMENT_KEYS: &[&str] = &["arguments", "parameters", "args"];

/// The result of scanning one piece of model output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    /// Deduplicated requests in acceptance order
    pub calls: Vec<ToolCallRequest>,

    /// The input with every recognised tool-call span removed
    pub cleaned: String,
}

/// A matched span and the calls it decoded to.
#[derive(Debug)]
struct Candidate {
    span: Range<usize>,
    calls: Vec<(String, Value)>,
}

type Pass = fn(&str) -> Vec<Candidate>;

const PASSES: [(&str, Pass); 6] = [
    ("fenced_tool_call", fenced_tool_call_blocks),
    ("fenced_json", fenced_json_blocks),
    ("fenced_unlabeled", fenced_unlabeled_blocks),
    ("inline_tool", inline_tool_objects),
    ("inline_name", inline_name_objects),
    ("function_call", function_calls),
];

/// Find every embedded tool call in `text`.
pub fn extract_tool_calls(text: &str) -> Extraction {
    let mut seen = HashSet::new();
    let mut calls = Vec::new();
    let mut spans = Vec::new();

    for (pass_name, pass) in PASSES {
        for candidate in pass(text) {
            spans.push(candidate.span);
            for (name, arguments) in candidate.calls {
                if !seen.insert(dedup_key(&name, &arguments)) {
                    trace!(pass = pass_name, tool = %name, "Skipping duplicate tool call");
                    continue;
                }
                trace!(pass = pass_name, tool = %name, "Extracted tool call from text");
                calls.push(ToolCallRequest {
                    id: ToolCallRequest::generate_id(),
                    name,
                    arguments,
                });
            }
        }
    }

    Extraction {
        calls,
        cleaned: remove_spans(text, spans),
    }
}

/// `text` with all recognised tool-call syntax removed.
pub fn strip_tool_call_syntax(text: &str) -> String {
    extract_tool_calls(text).cleaned
}

// ─── Passes ──────────────────────────────────────────────────────────────────

struct FencedBlock<'a> {
    span: Range<usize>,
    label: &'a str,
    body: &'a str,
}

fn fenced_blocks(text: &str) -> Vec<FencedBlock<'_>> {
    FENCED_BLOCK
        .captures_iter(text)
        .filter_map(|caps| {
            Some(FencedBlock {
                span: caps.get(0)?.range(),
                label: caps.get(1).map_or("", |m| m.as_str()),
                body: caps.get(2).map_or("", |m| m.as_str()),
            })
        })
        .collect()
}

fn candidates_from_blocks(text: &str, accept: impl Fn(&FencedBlock<'_>) -> bool) -> Vec<Candidate> {
    fenced_blocks(text)
        .into_iter()
        .filter(|block| accept(block))
        .filter_map(|block| candidate(block.span, parse_call_text(block.body)))
        .collect()
}

/// Pass 1: ```` ```tool_call ```` blocks.
fn fenced_tool_call_blocks(text: &str) -> Vec<Candidate> {
    candidates_from_blocks(text, |block| {
        TOOL_CALL_LABELS
            .iter()
            .any(|label| block.label.eq_ignore_ascii_case(label))
    })
}

/// Pass 2: ```` ```json ```` blocks that look like a tool call.
fn fenced_json_blocks(text: &str) -> Vec<Candidate> {
    candidates_from_blocks(text, |block| {
        block.label.eq_ignore_ascii_case("json")
            && block.body.contains("\"tool\"")
            && block.body.contains("\"arguments\"")
    })
}

/// Pass 3: unlabeled blocks mentioning a `"tool"` key.
fn fenced_unlabeled_blocks(text: &str) -> Vec<Candidate> {
    candidates_from_blocks(text, |block| {
        block.label.is_empty() && block.body.contains("\"tool\"")
    })
}

/// Pass 4: inline `{"tool": ..., "arguments": {...}}`.
fn inline_tool_objects(text: &str) -> Vec<Candidate> {
    INLINE_TOOL_OBJECT
        .find_iter(text)
        .filter_map(|m| candidate(m.range(), parse_call_text(m.as_str())))
        .collect()
}

/// Pass 5: inline `{"name": ..., "parameters": {...}}`.
fn inline_name_objects(text: &str) -> Vec<Candidate> {
    INLINE_NAME_OBJECT
        .find_iter(text)
        .filter_map(|m| candidate(m.range(), parse_call_text(m.as_str())))
        .collect()
}

/// Pass 6: `verb_noun(key=value, ...)`.
fn function_calls(text: &str) -> Vec<Candidate> {
    FUNCTION_CALL
        .captures_iter(text)
        .filter_map(|caps| {
            let span = caps.get(0)?.range();
            let name = caps.get(1)?.as_str().to_string();
            let arguments = parse_keyword_arguments(caps.get(2).map_or("", |m| m.as_str()));
            candidate(span, vec![(name, arguments)])
        })
        .collect()
}

fn candidate(span: Range<usize>, calls: Vec<(String, Value)>) -> Option<Candidate> {
    (!calls.is_empty()).then_some(Candidate { span, calls })
}

// ─── JSON decoding ───────────────────────────────────────────────────────────

/// Decode a matched span into zero or more `(name, arguments)` pairs.
///
/// Accepts a single call object or an array of them. Text that is not valid
/// JSON goes through [`recover_partial_call`].
fn parse_call_text(body: &str) -> Vec<(String, Value)> {
    let trimmed = body.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(obj)) => resolve_call(&obj).into_iter().collect(),
        Ok(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_object)
            .filter_map(resolve_call)
            .collect(),
        Ok(_) => Vec::new(),
        Err(e) => {
            trace!(error = %e, "Tool-call JSON did not parse, attempting partial recovery");
            recover_partial_call(trimmed).into_iter().collect()
        }
    }
}

fn resolve_call(obj: &Map<String, Value>) -> Option<(String, Value)> {
    for key in NAME_KEYS {
        match obj.get(*key) {
            Some(Value::String(name)) if !name.trim().is_empty() => {
                return Some((name.trim().to_string(), resolve_arguments(obj)));
            }
            // {"function": {"name": "...", "arguments": "..."}}
            Some(Value::Object(function)) => {
                let Some(name) = function
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                else {
                    continue;
                };
                let mut arguments = resolve_arguments(function);
                if is_empty_object(&arguments) {
                    arguments = resolve_arguments(obj);
                }
                return Some((name.to_string(), arguments));
            }
            _ => {}
        }
    }
    None
}

fn resolve_arguments(obj: &Map<String, Value>) -> Value {
    for key in ARGUMENT_KEYS {
        match obj.get(*key) {
            Some(Value::Object(map)) => return Value::Object(map.clone()),
            // Some vendors double-encode the argument object as a string.
            Some(Value::String(raw)) => {
                if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
                    return Value::Object(map);
                }
            }
            _ => {}
        }
    }
    empty_object()
}

/// Best-effort recovery for malformed JSON: pull out the tool name and, if
/// it parses on its own, the argument object.
fn recover_partial_call(text: &str) -> Option<(String, Value)> {
    let name = FALLBACK_NAME.captures(text)?.get(1)?.as_str().trim().to_string();
    if name.is_empty() {
        return None;
    }

    let arguments = FALLBACK_ARGUMENTS
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| serde_json::from_str::<Value>(m.as_str()).ok())
        .filter(Value::is_object)
        .unwrap_or_else(empty_object);

    Some((name, arguments))
}

// ─── Keyword arguments ───────────────────────────────────────────────────────

/// Parse `key=value, key2="a, b"` into a JSON object.
///
/// Values may be quoted or bare; commas inside quotes do not split.
/// Bare numbers, booleans and null keep their JSON type.
fn parse_keyword_arguments(raw: &str) -> Value {
    let mut map = Map::new();

    for part in split_unquoted(raw, ',') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let key = unquote(key.trim());
        if key.is_empty() {
            continue;
        }
        map.insert(key.to_string(), parse_scalar(value.trim()));
    }

    Value::Object(map)
}

/// Split on `separator` wherever it is not inside single or double quotes.
fn split_unquoted(raw: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (idx, ch) in raw.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, ch) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (None, '"' | '\'') => quote = Some(ch),
            (None, c) if c == separator => {
                parts.push(&raw[start..idx]);
                start = idx + ch.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&raw[start..]);

    parts.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

fn unquote(s: &str) -> &str {
    let bytes = s.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'"' || bytes[0] == b'\'')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn parse_scalar(raw: &str) -> Value {
    let unquoted = unquote(raw);
    if unquoted.len() != raw.len() {
        return Value::String(unquoted.replace("\\\"", "\"").replace("\\'", "'"));
    }

    match raw.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" | "none" => return Value::Null,
        _ => {}
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(number @ Value::Number(_)) => number,
        _ => Value::String(raw.to_string()),
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn is_empty_object(value: &Value) -> bool {
    value.as_object().is_some_and(Map::is_empty)
}

/// Deduplication key: the name plus a digest of the canonical argument JSON.
///
/// `serde_json::Map` keeps keys sorted, so equal objects serialize equally.
fn dedup_key(name: &str, arguments: &Value) -> String {
    let digest = Sha256::digest(arguments.to_string().as_bytes());
    format!("{name}:{digest:x}")
}

fn remove_spans(text: &str, mut spans: Vec<Range<usize>>) -> String {
    if spans.is_empty() {
        return text.trim().to_string();
    }

    spans.sort_by_key(|span| span.start);
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for span in spans {
        if span.start > cursor {
            out.push_str(&text[cursor..span.start]);
        }
        cursor = cursor.max(span.end);
    }
    out.push_str(&text[cursor..]);

    EXCESS_NEWLINES.replace_all(&out, "\n\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn single(text: &str) -> ToolCallRequest {
        let extraction = extract_tool_calls(text);
        assert_eq!(
            extraction.calls.len(),
            1,
            "expected exactly one call in {text:?}, got {:?}",
            extraction.calls
        );
        extraction.calls.into_iter().next().unwrap()
    }

    #[test]
    fn fenced_tool_call_block() {
        let text = "Let me look that up.\n```tool_call\n{\"tool\": \"get_natal_chart\", \"arguments\": {\"profile_id\": \"p1\"}}\n```";
        let call = single(text);
        assert_eq!(call.name, "get_natal_chart");
        assert_eq!(call.arguments, json!({"profile_id": "p1"}));
        assert!(call.id.starts_with("call_"));
    }

    #[test]
    fn fenced_json_block() {
        let text = "```json\n{\"tool\": \"get_transits\", \"arguments\": {\"date\": \"2024-03-01\"}}\n```";
        let call = single(text);
        assert_eq!(call.name, "get_transits");
        assert_eq!(call.arguments, json!({"date": "2024-03-01"}));
    }

    #[test]
    fn fenced_json_without_tool_keys_is_ignored() {
        let text = "```json\n{\"sun\": \"Leo\", \"moon\": \"Pisces\"}\n```";
        assert!(extract_tool_calls(text).calls.is_empty());
    }

    #[test]
    fn fenced_unlabeled_block() {
        let text = "```\n{\"tool\": \"list_profiles\", \"args\": {\"limit\": 3}}\n```";
        let call = single(text);
        assert_eq!(call.name, "list_profiles");
        assert_eq!(call.arguments, json!({"limit": 3}));
    }

    #[test]
    fn inline_tool_object_with_nested_braces() {
        let text = r#"Checking now {"tool": "get_aspects", "arguments": {"range": {"from": 1, "to": 3}}} done"#;
        let call = single(text);
        assert_eq!(call.name, "get_aspects");
        assert_eq!(call.arguments, json!({"range": {"from": 1, "to": 3}}));
    }

    #[test]
    fn inline_name_parameters_object() {
        let text = r#"{"name": "get_house_cusps", "parameters": {"system": "placidus"}}"#;
        let call = single(text);
        assert_eq!(call.name, "get_house_cusps");
        assert_eq!(call.arguments, json!({"system": "placidus"}));
    }

    #[test]
    fn function_call_syntax() {
        let call = single(r#"I'll run get_planet_positions(planet="Moon", degrees=true) first."#);
        assert_eq!(call.name, "get_planet_positions");
        assert_eq!(call.arguments, json!({"planet": "Moon", "degrees": true}));
    }

    #[test]
    fn function_call_protects_quoted_commas() {
        let call = single(r#"update_profile(name="Doe, Jane", city='Paris, FR', age=34)"#);
        assert_eq!(
            call.arguments,
            json!({"name": "Doe, Jane", "city": "Paris, FR", "age": 34})
        );
    }

    #[test]
    fn function_call_unquoted_values() {
        let call = single("search_charts(sign=Aries, limit=5)");
        assert_eq!(call.arguments, json!({"sign": "Aries", "limit": 5}));
    }

    #[test]
    fn unknown_verb_is_not_a_tool_call() {
        assert!(extract_tool_calls("println(x=1) and describe_chart(a=2)").calls.is_empty());
    }

    #[test]
    fn planet_positions_scenario() {
        let text = r#"Sure! {"tool": "get_planet_positions", "arguments": {"planet": "Moon"}} One moment."#;
        let call = single(text);
        assert_eq!(call.name, "get_planet_positions");
        assert_eq!(call.arguments, json!({"planet": "Moon"}));
    }

    #[test]
    fn duplicate_calls_collapse_to_one() {
        let text = r#"{"tool": "get_chart", "arguments": {"id": 1}} and again {"tool": "get_chart", "arguments": {"id": 1}}"#;
        single(text);
    }

    #[test]
    fn fenced_and_inline_copies_are_deduplicated() {
        // Passes 2 and 4 both see this object.
        let text = "```json\n{\"tool\": \"get_chart\", \"arguments\": {\"id\": 1}}\n```";
        single(text);
    }

    #[test]
    fn different_arguments_are_distinct_calls() {
        let text = r#"{"tool": "get_chart", "arguments": {"id": 1}} {"tool": "get_chart", "arguments": {"id": 2}}"#;
        let calls = extract_tool_calls(text).calls;
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0].id, calls[1].id);
    }

    #[test]
    fn argument_key_order_does_not_defeat_deduplication() {
        let text = concat!(
            r#"{"tool": "get_chart", "arguments": {"a": 1, "b": 2}} "#,
            r#"{"tool": "get_chart", "arguments": {"b": 2, "a": 1}}"#
        );
        single(text);
    }

    #[test]
    fn malformed_tool_call_block_recovers_name() {
        let text = "```tool_call\n{\"tool\": \"x\", \"arguments\": {\"planet\": }\n```";
        let call = single(text);
        assert_eq!(call.name, "x");
        assert_eq!(call.arguments, json!({}));
    }

    #[test]
    fn malformed_block_keeps_parseable_arguments() {
        let text = "```tool_call\n{\"tool\": \"get_chart\", \"arguments\": {\"id\": 4},,}\n```";
        let call = single(text);
        assert_eq!(call.name, "get_chart");
        assert_eq!(call.arguments, json!({"id": 4}));
    }

    #[test]
    fn name_resolution_falls_back_through_keys() {
        let text = "```tool_call\n{\"function\": {\"name\": \"get_moon_phase\", \"arguments\": \"{\\\"date\\\": \\\"today\\\"}\"}}\n```";
        let call = single(text);
        assert_eq!(call.name, "get_moon_phase");
        assert_eq!(call.arguments, json!({"date": "today"}));
    }

    #[test]
    fn empty_tool_name_falls_through_to_name_key() {
        let text = "```tool_call\n{\"tool\": \"\", \"name\": \"list_profiles\"}\n```";
        let call = single(text);
        assert_eq!(call.name, "list_profiles");
        assert_eq!(call.arguments, json!({}));
    }

    #[test]
    fn array_of_calls_in_one_block() {
        let text = "```tool_call\n[{\"tool\": \"get_chart\", \"arguments\": {\"id\": 1}}, {\"tool\": \"get_transits\", \"arguments\": {}}]\n```";
        let names: Vec<String> = extract_tool_calls(text)
            .calls
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["get_chart", "get_transits"]);
    }

    #[test]
    fn results_follow_pass_order_not_text_order() {
        let text = "get_first(a=1)\n```tool_call\n{\"tool\": \"get_second\"}\n```";
        let names: Vec<String> = extract_tool_calls(text)
            .calls
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["get_second", "get_first"]);
    }

    #[test]
    fn cleaned_content_strips_tool_syntax() {
        let text = "Let me check your chart.\n\n```tool_call\n{\"tool\": \"get_chart\", \"arguments\": {}}\n```\n\n\n\nBack soon.";
        let extraction = extract_tool_calls(text);
        assert_eq!(extraction.calls.len(), 1);
        assert_eq!(extraction.cleaned, "Let me check your chart.\n\nBack soon.");
    }

    #[test]
    fn plain_text_is_untouched() {
        let text = "  Your Sun is in Leo and your Moon is in Pisces.  ";
        let extraction = extract_tool_calls(text);
        assert!(extraction.calls.is_empty());
        assert_eq!(extraction.cleaned, text.trim());
    }

    #[test]
    fn ordinary_code_fence_is_preserved() {
        let text = "Example:\n```rust\nfn main() {}\n```";
        assert_eq!(strip_tool_call_syntax(text), text);
    }

    #[test]
    fn split_unquoted_handles_escapes() {
        let parts = split_unquoted(r#"a="x\", y", b=2"#, ',');
        assert_eq!(parts, vec![r#"a="x\", y""#, " b=2"]);
    }
}
