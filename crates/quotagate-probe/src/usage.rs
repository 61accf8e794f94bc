//! Quota-document parsing
//!
//! The upstream `/usage` endpoint returns a nested JSON document; the
//! quota section lives at `quota_snapshots.premium_interactions`.
//! Parsing is defensive throughout: a malformed or missing shape
//! degrades to 0 remaining rather than erroring.

use quotagate_core::UNLIMITED_QUOTA;
use serde_json::Value;

/// Extract the remaining premium quota from a usage document.
///
/// Priority order:
/// 1. explicit `remaining` field → used directly
/// 2. non-null `limit` plus `usage` → `limit - usage`
/// 3. `limit` explicitly null → unlimited sentinel
/// 4. anything else → 0
pub fn extract_remaining(doc: &Value) -> i64 {
    let Some(premium) = doc
        .get("quota_snapshots")
        .and_then(|s| s.get("premium_interactions"))
    else {
        return 0;
    };

    if let Some(remaining) = premium.get("remaining") {
        return remaining.as_i64().unwrap_or(0);
    }

    match premium.get("limit") {
        Some(limit) if limit.is_null() => UNLIMITED_QUOTA,
        Some(limit) => {
            match (limit.as_i64(), premium.get("usage").and_then(Value::as_i64)) {
                (Some(limit), Some(usage)) => limit - usage,
                _ => 0,
            }
        }
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_explicit_remaining_wins() {
        let doc = json!({
            "quota_snapshots": {
                "premium_interactions": {
                    "remaining": 42,
                    "limit": 100,
                    "usage": 10
                }
            }
        });
        assert_eq!(extract_remaining(&doc), 42);
    }

    #[test]
    fn test_limit_minus_usage() {
        let doc = json!({
            "quota_snapshots": {
                "premium_interactions": { "limit": 100, "usage": 37 }
            }
        });
        assert_eq!(extract_remaining(&doc), 63);
    }

    #[test]
    fn test_null_limit_means_unlimited() {
        let doc = json!({
            "quota_snapshots": {
                "premium_interactions": { "limit": null, "usage": 5 }
            }
        });
        assert_eq!(extract_remaining(&doc), UNLIMITED_QUOTA);
    }

    #[test]
    fn test_missing_fields_degrade_to_zero() {
        assert_eq!(extract_remaining(&json!({})), 0);
        assert_eq!(extract_remaining(&json!({"quota_snapshots": {}})), 0);
        assert_eq!(
            extract_remaining(&json!({
                "quota_snapshots": { "premium_interactions": {} }
            })),
            0
        );
        // limit present but usage missing
        assert_eq!(
            extract_remaining(&json!({
                "quota_snapshots": { "premium_interactions": { "limit": 100 } }
            })),
            0
        );
    }

    #[test]
    fn test_malformed_shapes_degrade_to_zero() {
        assert_eq!(extract_remaining(&json!("not an object")), 0);
        assert_eq!(
            extract_remaining(&json!({
                "quota_snapshots": { "premium_interactions": { "remaining": "lots" } }
            })),
            0
        );
        assert_eq!(
            extract_remaining(&json!({
                "quota_snapshots": { "premium_interactions": { "limit": "big", "usage": 1 } }
            })),
            0
        );
    }

    #[test]
    fn test_overdrawn_quota_goes_negative_here() {
        // Clamping is the node record's job; extraction reports what
        // the document says.
        let doc = json!({
            "quota_snapshots": {
                "premium_interactions": { "limit": 10, "usage": 12 }
            }
        });
        assert_eq!(extract_remaining(&doc), -2);
    }
}
