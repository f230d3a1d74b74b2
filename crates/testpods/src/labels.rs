//! Wire-stable labels attached to every resource the harness creates.
//!
//! Scope-preserving cleanup relies on these to tell "ours" from "the user's":
//! anything carrying `managed-by=testpods` may be deleted by
//! [`crate::namespace::TestNamespace::delete_managed_resources`], anything
//! else is left alone.

use std::collections::BTreeMap;

use const_format::concatcp;

/// Key of the per-pod app label, `app={pod-name}`.
pub const APP_KEY: &str = "app";

/// Key of the ownership marker label.
pub const MANAGED_BY_KEY: &str = "managed-by";

/// Value of the ownership marker label.
pub const MANAGED_BY_VALUE: &str = "testpods";

/// The testpods-specific key prefix.
const TESTPODS_KEY_PREFIX: &str = "testpods.io/";

/// Key of the label marking namespaces created by the harness.
pub const NAMESPACE_KEY: &str = concatcp!(TESTPODS_KEY_PREFIX, "namespace");

/// Value of the namespace marker label.
pub const NAMESPACE_VALUE: &str = "true";

/// Label selector string matching every resource the harness manages.
pub const MANAGED_BY_SELECTOR: &str = concatcp!(MANAGED_BY_KEY, "=", MANAGED_BY_VALUE);

/// The canonical labels every created resource carries:
/// `app={app}` and `managed-by=testpods`.
pub fn canonical(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_KEY.to_string(), app.to_string()),
        (MANAGED_BY_KEY.to_string(), MANAGED_BY_VALUE.to_string()),
    ])
}

/// The selector used to match a single pod's resources and replicas.
pub fn app_selector(app: &str) -> BTreeMap<String, String> {
    canonical(app)
}

/// The selector in `k=v,k=v` string form, for list requests.
pub fn app_selector_string(app: &str) -> String {
    format!("{APP_KEY}={app},{MANAGED_BY_SELECTOR}")
}

/// Labels applied to namespaces created by the harness.
pub fn namespace_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_KEY.to_string(), MANAGED_BY_VALUE.to_string()),
        (NAMESPACE_KEY.to_string(), NAMESPACE_VALUE.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_labels() {
        let labels = canonical("db");
        assert_eq!(labels.get(APP_KEY).map(String::as_str), Some("db"));
        assert_eq!(
            labels.get(MANAGED_BY_KEY).map(String::as_str),
            Some("testpods")
        );
    }

    #[test]
    fn selector_string() {
        assert_eq!(app_selector_string("db"), "app=db,managed-by=testpods");
    }

    #[test]
    fn namespace_marker() {
        let labels = namespace_labels();
        assert_eq!(
            labels.get("testpods.io/namespace").map(String::as_str),
            Some("true")
        );
    }
}
