//! Readiness verdict parsing.
//!
//! The review oracle replies in free text that is expected to contain
//! exactly one JSON object of the form
//! `{"production_ready": bool, "revision_instructions": "..."}`. Models
//! routinely wrap that object in prose or code fences, so extraction is a
//! best-effort structured parse with a defined fallback: any response
//! without a well-formed verdict object is treated as *not* production
//! ready, with a generic revision instruction.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Verdict returned by the production-readiness review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessVerdict {
    /// Whether the reviewer considers the plugin production-ready.
    pub production_ready: bool,
    /// Revision instructions when not ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_instructions: Option<String>,
}

/// Instruction used when the oracle response contains no parseable verdict.
pub const FALLBACK_INSTRUCTIONS: &str =
    "The review response could not be parsed. Re-check the plugin against the \
     production-readiness rubric and fix any remaining issues.";

impl ReadinessVerdict {
    /// The defined fallback verdict for unparseable responses.
    pub fn fallback() -> Self {
        Self {
            production_ready: false,
            revision_instructions: Some(FALLBACK_INSTRUCTIONS.to_owned()),
        }
    }

    /// Parse a verdict out of a free-text oracle response.
    ///
    /// Scans for the first balanced JSON object that deserializes into a
    /// verdict; surrounding prose and code fences are tolerated. Returns
    /// the fallback verdict when nothing parses.
    pub fn parse_response(response: &str) -> Self {
        for candidate in json_object_candidates(response) {
            match serde_json::from_str::<Self>(candidate) {
                Ok(verdict) => return verdict,
                Err(_) => continue,
            }
        }
        warn!("no parseable verdict object in oracle response, using fallback");
        Self::fallback()
    }
}

/// Yield each balanced top-level `{...}` slice of `text`, in order.
///
/// Brace counting is string- and escape-aware so braces inside JSON string
/// values do not unbalance the scan.
fn json_object_candidates(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut candidates = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        let start = i;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        let mut end = None;

        for (offset, &b) in bytes[start..].iter().enumerate() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(start + offset + 1);
                        break;
                    }
                }
                _ => {}
            }
        }

        match end {
            Some(end) => {
                candidates.push(&text[start..end]);
                i = end;
            }
            // Unbalanced open brace: nothing later can close it either.
            None => break,
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_object() {
        let v = ReadinessVerdict::parse_response(r#"{"production_ready": true}"#);
        assert!(v.production_ready);
        assert!(v.revision_instructions.is_none());
    }

    #[test]
    fn parses_object_with_surrounding_prose() {
        let response = r#"
            After reviewing the plugin source I found a few issues.

            ```json
            {"production_ready": false, "revision_instructions": "Handle the {rate-limit} error path in src/index.ts."}
            ```

            Let me know if you need anything else.
        "#;
        let v = ReadinessVerdict::parse_response(response);
        assert!(!v.production_ready);
        assert_eq!(
            v.revision_instructions.as_deref(),
            Some("Handle the {rate-limit} error path in src/index.ts.")
        );
    }

    #[test]
    fn skips_earlier_non_verdict_objects() {
        let response = r#"Example config: {"retries": 3}. Verdict: {"production_ready": true}"#;
        let v = ReadinessVerdict::parse_response(response);
        assert!(v.production_ready);
    }

    #[test]
    fn missing_json_maps_to_fallback() {
        let v = ReadinessVerdict::parse_response("Looks good to me overall!");
        assert_eq!(v, ReadinessVerdict::fallback());
        assert!(!v.production_ready);
        assert_eq!(v.revision_instructions.as_deref(), Some(FALLBACK_INSTRUCTIONS));
    }

    #[test]
    fn malformed_json_maps_to_fallback() {
        let v = ReadinessVerdict::parse_response(r#"{"production_ready": yes}"#);
        assert_eq!(v, ReadinessVerdict::fallback());
    }

    #[test]
    fn unbalanced_brace_maps_to_fallback() {
        let v = ReadinessVerdict::parse_response(r#"{"production_ready": true"#);
        assert_eq!(v, ReadinessVerdict::fallback());
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scan() {
        let response =
            r#"{"production_ready": false, "revision_instructions": "fix \"{{weird}}\" escaping"}"#;
        let v = ReadinessVerdict::parse_response(response);
        assert!(!v.production_ready);
        assert!(v.revision_instructions.unwrap().contains("{{weird}}"));
    }
}
