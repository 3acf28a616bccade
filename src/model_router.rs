//! Resolves an inbound client-facing model name to the upstream model name.
//!
//! Fills the gap left by the teacher repo's missing `common/model_mapping.rs`:
//! the mapping tables (`ProxyConfig::anthropic_mapping` / `openai_mapping` /
//! `custom_mapping`, see [`crate::config::ProxyConfig`]) were loaded and
//! hot-swapped by `proxy/server.rs`'s `AxumServer::update_mapping` but never
//! had a resolver behind them in the retrieval pack.

use std::collections::HashMap;
use std::sync::RwLock;

const DEFAULT_CLAUDE_TARGET: &str = "claude-sonnet-4-5-20250929";
const DEFAULT_OPENAI_TARGET: &str = "gpt-5";
const DEFAULT_GEMINI_PREVIEW: &str = "gemini-2.5-pro-preview";

struct Mapping {
    /// Insertion order preserved so wildcard specificity ties break on
    /// earliest insertion.
    entries: Vec<(String, String)>,
}

impl Mapping {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn set(&mut self, pattern: String, target: String) {
        if let Some(existing) = self.entries.iter_mut().find(|(p, _)| p == &pattern) {
            existing.1 = target;
        } else {
            self.entries.push((pattern, target));
        }
    }

    fn remove(&mut self, pattern: &str) {
        self.entries.retain(|(p, _)| p != pattern);
    }

    fn list(&self) -> Vec<(String, String)> {
        self.entries.clone()
    }
}

pub struct ModelRouter {
    custom: RwLock<Mapping>,
}

impl ModelRouter {
    pub fn new() -> Self {
        Self {
            custom: RwLock::new(Mapping::new()),
        }
    }

    pub fn from_tables(
        anthropic_mapping: HashMap<String, String>,
        openai_mapping: HashMap<String, String>,
        custom_mapping: HashMap<String, String>,
    ) -> Self {
        let router = Self::new();
        let mut mapping = router.custom.write().unwrap();
        for (k, v) in anthropic_mapping
            .into_iter()
            .chain(openai_mapping)
            .chain(custom_mapping)
        {
            mapping.set(k, v);
        }
        drop(mapping);
        router
    }

    pub fn set(&self, pattern: impl Into<String>, target: impl Into<String>) {
        self.custom.write().unwrap().set(pattern.into(), target.into());
    }

    pub fn remove(&self, pattern: &str) {
        self.custom.write().unwrap().remove(pattern);
    }

    pub fn list(&self) -> Vec<(String, String)> {
        self.custom.read().unwrap().list()
    }

    /// Resolve `name` to its upstream target following the precedence order:
    /// exact match, highest-specificity wildcard match, system default,
    /// passthrough, fallback.
    pub fn resolve(&self, name: &str) -> String {
        let mapping = self.custom.read().unwrap();

        if let Some((_, target)) = mapping.entries.iter().find(|(p, _)| p == name) {
            return target.clone();
        }

        let mut best: Option<(usize, usize, &str)> = None; // (specificity, insertion_idx, target)
        for (idx, (pattern, target)) in mapping.entries.iter().enumerate() {
            if !pattern.contains('*') {
                continue;
            }
            if wildcard_match(pattern, name) {
                let specificity = pattern.chars().filter(|&c| c != '*').count();
                let better = match best {
                    None => true,
                    Some((best_spec, best_idx, _)) => {
                        specificity > best_spec || (specificity == best_spec && idx < best_idx)
                    }
                };
                if better {
                    best = Some((specificity, idx, target.as_str()));
                }
            }
        }
        if let Some((_, _, target)) = best {
            return target.to_string();
        }
        drop(mapping);

        if let Some(target) = system_default(name) {
            return target.to_string();
        }

        if name.starts_with("gemini-") || name.contains("thinking") {
            return name.to_string();
        }

        DEFAULT_CLAUDE_TARGET.to_string()
    }
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new()
    }
}

fn system_default(name: &str) -> Option<&'static str> {
    if name.starts_with("claude-") {
        Some(DEFAULT_CLAUDE_TARGET)
    } else if name.starts_with("gpt-") || name.starts_with("o1") || name.starts_with("o3") {
        Some(DEFAULT_OPENAI_TARGET)
    } else if name.starts_with("gemini-") {
        Some(DEFAULT_GEMINI_PREVIEW)
    } else {
        None
    }
}

/// Case-sensitive glob match supporting multiple, consecutive, leading,
/// trailing, or internal `*` segments, each matching any (possibly empty)
/// substring. Greedy left-to-right with backtracking.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let (mut star_idx, mut match_idx) = (None, 0usize);

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '*' || p[pi] == t[ti]) {
            if p[pi] == '*' {
                star_idx = Some(pi);
                match_idx = ti;
                pi += 1;
            } else {
                pi += 1;
                ti += 1;
            }
        } else if let Some(si) = star_idx {
            pi = si + 1;
            match_idx += 1;
            ti = match_idx;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_wins_over_wildcard() {
        let router = ModelRouter::new();
        router.set("claude-*", "wild-target");
        router.set("claude-opus-4", "exact-target");
        assert_eq!(router.resolve("claude-opus-4"), "exact-target");
    }

    #[test]
    fn most_specific_wildcard_wins() {
        let router = ModelRouter::new();
        router.set("claude-*", "broad");
        router.set("claude-opus-*", "narrow");
        assert_eq!(router.resolve("claude-opus-4-5"), "narrow");
    }

    #[test]
    fn tie_breaks_on_earliest_insertion() {
        let router = ModelRouter::new();
        router.set("a*c", "first");
        router.set("ab*", "second");
        assert_eq!(router.resolve("abc"), "first");
    }

    #[test]
    fn passthrough_for_gemini_and_thinking() {
        let router = ModelRouter::new();
        assert_eq!(router.resolve("gemini-2.5-flash"), "gemini-2.5-flash");
        assert_eq!(router.resolve("custom-thinking-model"), "custom-thinking-model");
    }

    #[test]
    fn fallback_to_default_claude_target() {
        let router = ModelRouter::new();
        assert_eq!(router.resolve("totally-unknown-model"), DEFAULT_CLAUDE_TARGET);
    }

    #[test]
    fn consecutive_wildcards_match() {
        assert!(wildcard_match("a**b", "axxxb"));
        assert!(wildcard_match("*foo*", "xxfooxx"));
        assert!(!wildcard_match("foo*bar", "foobaz"));
    }
}
