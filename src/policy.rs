//! Security policy: function-code whitelist/blacklist, source-address write
//! exemptions, and rate-limit admission, combined into one deterministic
//! decision per request.

use std::collections::HashSet;

use crate::rate_limiter::RateLimiter;

const WRITE_FUNCTION_CODES: [u8; 5] = [0x05, 0x06, 0x0F, 0x10, 0x16];

/// Immutable for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    pub allowed_function_codes: HashSet<u8>,
    pub blocked_function_codes: HashSet<u8>,
    pub write_allowed_ips: HashSet<String>,
    pub rate_limit_rps: u32,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            allowed_function_codes: [0x01, 0x02, 0x03, 0x04].into_iter().collect(),
            blocked_function_codes: [0x05, 0x06, 0x0F, 0x10].into_iter().collect(),
            write_allowed_ips: HashSet::new(),
            rate_limit_rps: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyCategory {
    AllowedFc,
    BlockedFc,
    UnknownFc,
    SourceDenied,
    RateLimited,
}

#[derive(Debug, Clone)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: String,
    pub category: PolicyCategory,
}

impl PolicyDecision {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            category: PolicyCategory::AllowedFc,
        }
    }

    fn block(reason: impl Into<String>, category: PolicyCategory) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            category,
        }
    }
}

/// Evaluate a request against `policy`, consulting `limiter` only on a
/// tentative ALLOW so blocked frames never consume rate budget.
///
/// Evaluation order (first rule to fire wins):
/// 1. write function from a non-exempt source -> BLOCK/SourceDenied
/// 2. function code in the blocked set -> BLOCK/BlockedFc
/// 3. function code in the allowed set -> ALLOW (subject to rate limit)
/// 4. otherwise -> BLOCK/UnknownFc
pub fn evaluate(
    function_code: u8,
    source_ip: &str,
    policy: &SecurityPolicy,
    limiter: &RateLimiter,
) -> PolicyDecision {
    if WRITE_FUNCTION_CODES.contains(&function_code) && !policy.write_allowed_ips.contains(source_ip)
    {
        return PolicyDecision::block(
            format!("write function 0x{function_code:02X} denied for source {source_ip}"),
            PolicyCategory::SourceDenied,
        );
    }

    if policy.blocked_function_codes.contains(&function_code) {
        return PolicyDecision::block(
            format!("function code 0x{function_code:02X} is blocked"),
            PolicyCategory::BlockedFc,
        );
    }

    if !policy.allowed_function_codes.contains(&function_code) {
        return PolicyDecision::block(
            format!("function code 0x{function_code:02X} is not in the allowed set"),
            PolicyCategory::UnknownFc,
        );
    }

    if !limiter.check(source_ip, policy.rate_limit_rps) {
        return PolicyDecision::block(
            format!("source {source_ip} exceeded {} req/s", policy.rate_limit_rps),
            PolicyCategory::RateLimited,
        );
    }

    PolicyDecision::allow(format!("function code 0x{function_code:02X} allowed"))
}
