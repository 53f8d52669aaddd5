//! Rule engine (C5): an ordered list of (condition, action) entries,
//! first match wins.

use std::sync::Arc;

use ipnet::IpNet;
use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::resolver::ResolverManager;

#[derive(Debug, Clone)]
enum Cond {
    HostMatch(String),
    HostPrefix(String),
    HostSuffix(String),
    HostRegexp(Regex),
    Geo(String),
    IpCidr(IpNet),
    MatchAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Reject,
    Direct,
    Forward,
}

struct Entry {
    cond: Cond,
    action: Action,
    upstream: String,
}

/// Immutable after construction: no locking needed to evaluate it.
pub struct RuleEngine {
    entries: Vec<Entry>,
}

impl RuleEngine {
    /// Parses `<cond>[:<param>], <action>[:<upstream>]` per line.
    /// `forward` rules must name an upstream that exists in
    /// `known_upstreams` (plus the two reserved synthetic names are
    /// always implicitly known).
    pub fn parse(rules: &[String], known_upstreams: &[String]) -> Result<Self> {
        let mut entries = Vec::with_capacity(rules.len());
        let mut saw_match_all = false;

        for (i, raw) in rules.iter().enumerate() {
            if saw_match_all {
                tracing::warn!(
                    rule = %raw,
                    "rule placed after match-all is unreachable"
                );
            }

            let (cond_part, action_part) = raw
                .split_once(',')
                .ok_or_else(|| Error::rule(format!("bad rule (missing ','): {}", raw)))?;
            let cond_part = cond_part.trim();
            let action_part = action_part.trim();

            let (cond_name, cond_param) = match cond_part.split_once(':') {
                Some((name, param)) => (name.trim(), Some(param.trim())),
                None => (cond_part, None),
            };

            let cond = match cond_name {
                "host-match" => Cond::HostMatch(require_param(cond_name, cond_param)?.to_string()),
                "host-prefix" => {
                    Cond::HostPrefix(require_param(cond_name, cond_param)?.to_string())
                }
                "host-suffix" => {
                    Cond::HostSuffix(require_param(cond_name, cond_param)?.to_string())
                }
                "host-regexp" => {
                    let pattern = require_param(cond_name, cond_param)?;
                    Cond::HostRegexp(
                        Regex::new(pattern)
                            .map_err(|e| Error::rule(format!("bad regexp {}: {}", pattern, e)))?,
                    )
                }
                "geo" => Cond::Geo(require_param(cond_name, cond_param)?.to_uppercase()),
                "ip-cidr" => {
                    let param = require_param(cond_name, cond_param)?;
                    Cond::IpCidr(
                        param
                            .parse()
                            .map_err(|e| Error::rule(format!("bad cidr {}: {}", param, e)))?,
                    )
                }
                "match-all" => Cond::MatchAll,
                other => return Err(Error::rule(format!("unknown condition: {}", other))),
            };

            if matches!(cond, Cond::MatchAll) {
                if i != rules.len() - 1 {
                    tracing::warn!("match-all rule is not the last rule; it makes subsequent rules unreachable");
                }
                saw_match_all = true;
            }

            let (action_name, upstream_part) = match action_part.split_once(':') {
                Some((name, upstream)) => (name.trim(), Some(upstream.trim())),
                None => (action_part, None),
            };

            let (action, upstream) = match action_name {
                "reject" => (Action::Reject, "reject".to_string()),
                "direct" => (Action::Direct, "direct".to_string()),
                "forward" => {
                    let upstream = upstream_part
                        .ok_or_else(|| Error::rule("forward action requires ':<upstream>'"))?;
                    if !known_upstreams.iter().any(|u| u == upstream) {
                        return Err(Error::rule(format!(
                            "forward names unknown upstream: {}",
                            upstream
                        )));
                    }
                    (Action::Forward, upstream.to_string())
                }
                other => return Err(Error::rule(format!("unknown action: {}", other))),
            };

            entries.push(Entry {
                cond,
                action,
                upstream,
            });
        }

        Ok(RuleEngine { entries })
    }

    /// Returns the upstream name of the first matching rule, or empty
    /// if none matches (the caller treats this as "no mapping").
    pub async fn get(&self, host: &str, resolver: &Arc<ResolverManager>) -> String {
        let host = strip_port(host);

        for entry in &self.entries {
            let matched = match &entry.cond {
                Cond::HostMatch(needle) => host.contains(needle.as_str()),
                Cond::HostPrefix(prefix) => host.starts_with(prefix.as_str()),
                Cond::HostSuffix(suffix) => host.ends_with(suffix.as_str()),
                Cond::HostRegexp(re) => re.is_match(host),
                Cond::IpCidr(cidr) => match resolver.lookup(host).await {
                    Some(ip) => cidr.contains(&ip),
                    None => false,
                },
                Cond::Geo(country) => resolver.country(host).await == *country,
                Cond::MatchAll => true,
            };

            if matched {
                debug!(host, upstream = %entry.upstream, "rule matched");
                return entry.upstream.clone();
            }
        }

        String::new()
    }
}

fn require_param<'a>(cond: &str, param: Option<&'a str>) -> Result<&'a str> {
    param.ok_or_else(|| Error::rule(format!("condition {} requires a parameter", cond)))
}

fn strip_port(host: &str) -> &str {
    if let Some(idx) = host.rfind(':') {
        // Guard against stripping inside a bare IPv6 literal like
        // "::1" (no brackets, multiple colons, no following port).
        if host[idx + 1..].chars().all(|c| c.is_ascii_digit()) && !host[idx + 1..].is_empty() {
            return &host[..idx];
        }
    }
    host
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(rules: &[&str], upstreams: &[&str]) -> RuleEngine {
        let rules: Vec<String> = rules.iter().map(|s| s.to_string()).collect();
        let upstreams: Vec<String> = upstreams.iter().map(|s| s.to_string()).collect();
        RuleEngine::parse(&rules, &upstreams).unwrap()
    }

    fn resolver() -> Arc<ResolverManager> {
        ResolverManager::new(&[], None).unwrap()
    }

    #[tokio::test]
    async fn reject_an_ad_host() {
        let e = engine(
            &["host-suffix:ad.com, reject", "match-all, forward:relay1"],
            &["relay1"],
        );
        assert_eq!(e.get("www.ad.com:443", &resolver()).await, "reject");
    }

    #[tokio::test]
    async fn direct_for_a_cidr() {
        let e = engine(
            &["ip-cidr:127.0.0.1/8, direct", "match-all, forward:relay1"],
            &["relay1"],
        );
        assert_eq!(e.get("127.0.0.1:443", &resolver()).await, "direct");
    }

    #[tokio::test]
    async fn match_all_always_matches() {
        let e = engine(&["match-all, forward:relay1"], &["relay1"]);
        assert_eq!(e.get("anything.example", &resolver()).await, "relay1");
    }

    #[tokio::test]
    async fn no_match_returns_empty() {
        let e = engine(&["host-match:foo, reject"], &[]);
        assert_eq!(e.get("bar.example", &resolver()).await, "");
    }

    #[test]
    fn forward_requires_known_upstream() {
        let rules = vec!["match-all, forward:ghost".to_string()];
        assert!(RuleEngine::parse(&rules, &[]).is_err());
    }

    #[test]
    fn bad_syntax_fails_with_rule_error() {
        let rules = vec!["not-a-rule".to_string()];
        let err = RuleEngine::parse(&rules, &[]).unwrap_err();
        assert!(matches!(err, Error::Rule(_)));
    }

    #[test]
    fn strip_port_keeps_ipv6_literal_intact() {
        assert_eq!(strip_port("::1"), "::1");
        assert_eq!(strip_port("example.com:443"), "example.com");
    }
}
