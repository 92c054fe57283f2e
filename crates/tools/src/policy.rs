//! Tool-use policies.
//!
//! A policy inspects a tool's spec (and arguments) and returns one of
//! allow / deny / ask. `ask` routes through the controller's approval
//! rendezvous before the tool runs.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use ua_domain::ToolSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny { reason: String },
    Ask { reason: String },
}

pub trait ToolPolicy: Send + Sync {
    fn name(&self) -> &str;

    fn decide(&self, spec: &ToolSpec, args: &Value) -> PolicyDecision;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Basic policies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AllowAllPolicy;

impl ToolPolicy for AllowAllPolicy {
    fn name(&self) -> &str {
        "allow_all"
    }
    fn decide(&self, _spec: &ToolSpec, _args: &Value) -> PolicyDecision {
        PolicyDecision::Allow
    }
}

pub struct DenyAllPolicy;

impl ToolPolicy for DenyAllPolicy {
    fn name(&self) -> &str {
        "deny_all"
    }
    fn decide(&self, spec: &ToolSpec, _args: &Value) -> PolicyDecision {
        PolicyDecision::Deny {
            reason: format!("tool '{}' denied by deny-all policy", spec.name),
        }
    }
}

/// Only the listed tool names may run.
pub struct ToolAllowListPolicy {
    allowed: HashSet<String>,
}

impl ToolAllowListPolicy {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(names: I) -> Self {
        Self {
            allowed: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl ToolPolicy for ToolAllowListPolicy {
    fn name(&self) -> &str {
        "tool_allow_list"
    }
    fn decide(&self, spec: &ToolSpec, _args: &Value) -> PolicyDecision {
        if self.allowed.contains(&spec.name) {
            PolicyDecision::Allow
        } else {
            PolicyDecision::Deny {
                reason: format!("tool '{}' is not on the allow list", spec.name),
            }
        }
    }
}

/// The listed tool names may not run.
pub struct ToolDenyListPolicy {
    denied: HashSet<String>,
}

impl ToolDenyListPolicy {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(names: I) -> Self {
        Self {
            denied: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl ToolPolicy for ToolDenyListPolicy {
    fn name(&self) -> &str {
        "tool_deny_list"
    }
    fn decide(&self, spec: &ToolSpec, _args: &Value) -> PolicyDecision {
        if self.denied.contains(&spec.name) {
            PolicyDecision::Deny {
                reason: format!("tool '{}' is on the deny list", spec.name),
            }
        } else {
            PolicyDecision::Allow
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capability policies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tools carrying any of the listed capability tags may not run.
pub struct CapabilityDenyListPolicy {
    denied: Vec<String>,
}

impl CapabilityDenyListPolicy {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(capabilities: I) -> Self {
        Self {
            denied: capabilities.into_iter().map(Into::into).collect(),
        }
    }
}

impl ToolPolicy for CapabilityDenyListPolicy {
    fn name(&self) -> &str {
        "capability_deny_list"
    }
    fn decide(&self, spec: &ToolSpec, _args: &Value) -> PolicyDecision {
        for cap in &self.denied {
            if spec.has_capability(cap) {
                return PolicyDecision::Deny {
                    reason: format!("capability '{cap}' is denied"),
                };
            }
        }
        PolicyDecision::Allow
    }
}

/// Tools carrying any of the listed capability tags require approval.
pub struct CapabilityApprovalPolicy {
    gated: Vec<String>,
}

impl CapabilityApprovalPolicy {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(capabilities: I) -> Self {
        Self {
            gated: capabilities.into_iter().map(Into::into).collect(),
        }
    }
}

impl ToolPolicy for CapabilityApprovalPolicy {
    fn name(&self) -> &str {
        "capability_approval"
    }
    fn decide(&self, spec: &ToolSpec, _args: &Value) -> PolicyDecision {
        for cap in &self.gated {
            if spec.has_capability(cap) {
                return PolicyDecision::Ask {
                    reason: format!("capability '{cap}' requires approval"),
                };
            }
        }
        PolicyDecision::Allow
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Composition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Runs member policies in order and short-circuits on the first
/// non-allow decision, attributing it to the rejecting policy.
pub struct CompositePolicy {
    members: Vec<Arc<dyn ToolPolicy>>,
}

impl CompositePolicy {
    pub fn new(members: Vec<Arc<dyn ToolPolicy>>) -> Self {
        Self { members }
    }
}

impl ToolPolicy for CompositePolicy {
    fn name(&self) -> &str {
        "composite"
    }
    fn decide(&self, spec: &ToolSpec, args: &Value) -> PolicyDecision {
        for member in &self.members {
            match member.decide(spec, args) {
                PolicyDecision::Allow => continue,
                PolicyDecision::Deny { reason } => {
                    return PolicyDecision::Deny {
                        reason: format!("[{}] {}", member.name(), reason),
                    }
                }
                PolicyDecision::Ask { reason } => {
                    return PolicyDecision::Ask {
                        reason: format!("[{}] {}", member.name(), reason),
                    }
                }
            }
        }
        PolicyDecision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(name: &str, caps: &[&str]) -> ToolSpec {
        ToolSpec::new(name, "test tool", json!({"type": "object"}), caps)
    }

    #[test]
    fn allow_and_deny_all() {
        let s = spec("echo", &[]);
        assert_eq!(AllowAllPolicy.decide(&s, &json!({})), PolicyDecision::Allow);
        assert!(matches!(
            DenyAllPolicy.decide(&s, &json!({})),
            PolicyDecision::Deny { .. }
        ));
    }

    #[test]
    fn allow_list_gates_unlisted_tools() {
        let policy = ToolAllowListPolicy::new(["echo"]);
        assert_eq!(policy.decide(&spec("echo", &[]), &json!({})), PolicyDecision::Allow);
        assert!(matches!(
            policy.decide(&spec("other", &[]), &json!({})),
            PolicyDecision::Deny { .. }
        ));
    }

    #[test]
    fn deny_list_blocks_listed_tools() {
        let policy = ToolDenyListPolicy::new(["fs_delete_path"]);
        assert!(matches!(
            policy.decide(&spec("fs_delete_path", &[]), &json!({})),
            PolicyDecision::Deny { .. }
        ));
        assert_eq!(
            policy.decide(&spec("fs_read_file", &[]), &json!({})),
            PolicyDecision::Allow
        );
    }

    #[test]
    fn capability_deny_matches_tags() {
        let policy = CapabilityDenyListPolicy::new(["fs:delete"]);
        assert!(matches!(
            policy.decide(&spec("rm", &["fs:delete"]), &json!({})),
            PolicyDecision::Deny { .. }
        ));
        assert_eq!(
            policy.decide(&spec("cat", &["fs:read"]), &json!({})),
            PolicyDecision::Allow
        );
    }

    #[test]
    fn capability_approval_asks() {
        let policy = CapabilityApprovalPolicy::new(["fs:write"]);
        match policy.decide(&spec("fs_write_file", &["fs:write"]), &json!({})) {
            PolicyDecision::Ask { reason } => assert!(reason.contains("fs:write")),
            other => panic!("expected Ask, got {other:?}"),
        }
    }

    #[test]
    fn composite_short_circuits_and_attributes() {
        let policy = CompositePolicy::new(vec![
            Arc::new(ToolDenyListPolicy::new(["banned"])),
            Arc::new(CapabilityApprovalPolicy::new(["fs:write"])),
        ]);

        match policy.decide(&spec("banned", &["fs:write"]), &json!({})) {
            PolicyDecision::Deny { reason } => assert!(reason.starts_with("[tool_deny_list]")),
            other => panic!("expected Deny, got {other:?}"),
        }
        match policy.decide(&spec("writer", &["fs:write"]), &json!({})) {
            PolicyDecision::Ask { reason } => assert!(reason.starts_with("[capability_approval]")),
            other => panic!("expected Ask, got {other:?}"),
        }
        assert_eq!(
            policy.decide(&spec("reader", &["fs:read"]), &json!({})),
            PolicyDecision::Allow
        );
    }
}
