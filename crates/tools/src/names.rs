//! Tool name policy at the provider boundary.
//!
//! Provider-facing names must match `^[A-Za-z0-9_-]{1,64}$`. Strict mode
//! refuses the run on any invalid or colliding name; sanitize mode
//! rewrites names into the legal alphabet and disambiguates collisions
//! with `_2`, `_3`, ... suffixes. The resulting mapping rewrites all
//! egress events back to the original names, so callers never see the
//! sanitized forms.

use std::collections::HashMap;

use regex::Regex;

use ua_domain::{
    AgentError, AgentEvent, AgentEventKind, Result, ToolCall, ToolOutcome, ToolSpec,
};

pub const MAX_NAME_BYTES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolNamePolicy {
    #[default]
    Strict,
    Sanitize,
}

/// Bidirectional mapping between original and provider-facing names.
#[derive(Debug, Clone, Default)]
pub struct NameMapping {
    to_provider: HashMap<String, String>,
    to_original: HashMap<String, String>,
}

impl NameMapping {
    pub fn provider_name<'a>(&'a self, original: &'a str) -> &'a str {
        self.to_provider.get(original).map(String::as_str).unwrap_or(original)
    }

    pub fn original_name<'a>(&'a self, provider: &'a str) -> &'a str {
        self.to_original.get(provider).map(String::as_str).unwrap_or(provider)
    }

    pub fn is_identity(&self) -> bool {
        self.to_provider.iter().all(|(k, v)| k == v)
    }

    fn insert(&mut self, original: String, provider: String) {
        self.to_original.insert(provider.clone(), original.clone());
        self.to_provider.insert(original, provider);
    }

    // ── Egress remapping ───────────────────────────────────────────

    pub fn remap_call(&self, call: &mut ToolCall) {
        call.tool_name = self.original_name(&call.tool_name).to_owned();
    }

    pub fn remap_outcome(&self, outcome: &mut ToolOutcome) {
        outcome.tool_name = self.original_name(&outcome.tool_name).to_owned();
    }

    /// Rewrite tool names in an event to the originals. Applies to
    /// `tool_call`, `tool_result`, `tool_approval_request`, and
    /// `step_finish`; other events pass through untouched.
    pub fn remap_event(&self, event: &mut AgentEvent) {
        match &mut event.kind {
            AgentEventKind::ToolCall { call } => self.remap_call(call),
            AgentEventKind::ToolResult { result } => self.remap_outcome(result),
            AgentEventKind::ToolApprovalRequest { call, .. } => self.remap_call(call),
            AgentEventKind::StepFinish {
                tool_calls,
                tool_results,
                ..
            } => {
                for call in tool_calls {
                    self.remap_call(call);
                }
                for result in tool_results {
                    self.remap_outcome(result);
                }
            }
            _ => {}
        }
    }
}

fn name_regex() -> Regex {
    Regex::new("^[A-Za-z0-9_-]{1,64}$").unwrap_or_else(|e| {
        // The pattern is a compile-time constant; this cannot fail.
        unreachable!("invalid tool-name regex: {e}")
    })
}

fn sanitize_name(name: &str) -> String {
    let mut out: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() {
        out.push('_');
    }
    out.truncate(MAX_NAME_BYTES);
    out
}

fn disambiguate(base: &str, taken: &HashMap<String, usize>) -> String {
    let mut n = 2usize;
    loop {
        let suffix = format!("_{n}");
        let budget = MAX_NAME_BYTES.saturating_sub(suffix.len());
        let mut candidate = base.to_owned();
        candidate.truncate(budget);
        candidate.push_str(&suffix);
        if !taken.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Apply the name policy to a tool list, producing the provider-facing
/// specs and the mapping used to remap egress events.
pub fn apply_name_policy(
    policy: ToolNamePolicy,
    specs: &[ToolSpec],
) -> Result<(Vec<ToolSpec>, NameMapping)> {
    let mut mapping = NameMapping::default();
    let mut taken: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(specs.len());
    let pattern = name_regex();

    match policy {
        ToolNamePolicy::Strict => {
            let mut problems = Vec::new();
            for (idx, spec) in specs.iter().enumerate() {
                if !pattern.is_match(&spec.name) {
                    problems.push(format!("tool #{idx} has invalid name '{}'", spec.name));
                    continue;
                }
                if let Some(prev) = taken.get(&spec.name) {
                    problems.push(format!(
                        "tool #{idx} '{}' collides with tool #{prev}",
                        spec.name
                    ));
                    continue;
                }
                taken.insert(spec.name.clone(), idx);
            }
            if !problems.is_empty() {
                return Err(AgentError::Config(format!(
                    "tool name validation failed: {}",
                    problems.join("; ")
                )));
            }
            for spec in specs {
                mapping.insert(spec.name.clone(), spec.name.clone());
                out.push(spec.clone());
            }
        }
        ToolNamePolicy::Sanitize => {
            for (idx, spec) in specs.iter().enumerate() {
                let base = sanitize_name(&spec.name);
                let provider_name = if taken.contains_key(&base) {
                    disambiguate(&base, &taken)
                } else {
                    base
                };
                taken.insert(provider_name.clone(), idx);
                mapping.insert(spec.name.clone(), provider_name.clone());
                let mut renamed = spec.clone();
                renamed.name = provider_name;
                out.push(renamed);
            }
        }
    }

    Ok((out, mapping))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(name: &str) -> ToolSpec {
        ToolSpec::new(name, "t", json!({"type": "object"}), &[])
    }

    #[test]
    fn strict_accepts_legal_names() {
        let specs = vec![spec("echo"), spec("fs_read-file")];
        let (out, mapping) = apply_name_policy(ToolNamePolicy::Strict, &specs).expect("ok");
        assert_eq!(out[0].name, "echo");
        assert!(mapping.is_identity());
    }

    #[test]
    fn strict_rejects_illegal_name_with_index() {
        let specs = vec![spec("ok"), spec("bad name!")];
        let err = apply_name_policy(ToolNamePolicy::Strict, &specs).expect_err("reject");
        let msg = err.to_string();
        assert!(msg.contains("#1"));
        assert!(msg.contains("bad name!"));
    }

    #[test]
    fn strict_rejects_collisions_with_both_indices() {
        let specs = vec![spec("dup"), spec("dup")];
        let err = apply_name_policy(ToolNamePolicy::Strict, &specs).expect_err("reject");
        let msg = err.to_string();
        assert!(msg.contains("#1"));
        assert!(msg.contains("#0"));
    }

    #[test]
    fn sanitize_replaces_illegal_characters() {
        let specs = vec![spec("foo bar")];
        let (out, mapping) = apply_name_policy(ToolNamePolicy::Sanitize, &specs).expect("ok");
        assert_eq!(out[0].name, "foo_bar");
        assert_eq!(mapping.original_name("foo_bar"), "foo bar");
        assert_eq!(mapping.provider_name("foo bar"), "foo_bar");
    }

    #[test]
    fn sanitize_disambiguates_collisions() {
        let specs = vec![spec("foo bar"), spec("foo_bar")];
        let (out, mapping) = apply_name_policy(ToolNamePolicy::Sanitize, &specs).expect("ok");
        assert_eq!(out[0].name, "foo_bar");
        assert_eq!(out[1].name, "foo_bar_2");
        assert_eq!(mapping.original_name("foo_bar"), "foo bar");
        assert_eq!(mapping.original_name("foo_bar_2"), "foo_bar");
    }

    #[test]
    fn sanitize_truncates_to_budget() {
        let long = "x".repeat(100);
        let specs = vec![spec(&long), spec(&long)];
        let (out, _) = apply_name_policy(ToolNamePolicy::Sanitize, &specs).expect("ok");
        assert_eq!(out[0].name.len(), MAX_NAME_BYTES);
        assert_eq!(out[1].name.len(), MAX_NAME_BYTES);
        assert!(out[1].name.ends_with("_2"));
    }

    #[test]
    fn remap_event_rewrites_step_finish() {
        let specs = vec![spec("my tool")];
        let (_, mapping) = apply_name_policy(ToolNamePolicy::Sanitize, &specs).expect("ok");

        let call = ToolCall {
            call_id: "c1".into(),
            tool_name: "my_tool".into(),
            arguments: json!({}),
        };
        let outcome = ToolOutcome::ok(&call, json!(null));
        let mut event = AgentEvent::new(AgentEventKind::StepFinish {
            index: 0,
            finish_reason: ua_domain::FinishReason::ToolCalls,
            tool_calls: vec![call],
            tool_results: vec![outcome],
        });
        mapping.remap_event(&mut event);
        match &event.kind {
            AgentEventKind::StepFinish {
                tool_calls,
                tool_results,
                ..
            } => {
                assert_eq!(tool_calls[0].tool_name, "my tool");
                assert_eq!(tool_results[0].tool_name, "my tool");
            }
            _ => panic!("wrong kind"),
        }
    }
}
