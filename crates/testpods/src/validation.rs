// This is adapted from Kubernetes.
// See apimachinery/pkg/util/validation/validation.go and
// pkg/apis/core/validation/validation.go in the Kubernetes source.

use std::sync::LazyLock;

use regex::Regex;

const RFC_1123_LABEL_FMT: &str = "[a-z0-9]([-a-z0-9]*[a-z0-9])?";
const RFC_1123_LABEL_ERROR_MSG: &str = "a lowercase RFC 1123 label must consist of lower case alphanumeric characters or '-', and must start and end with an alphanumeric character";

// This is a label's max length in DNS (RFC 1123). Kubernetes enforces the
// same limit for namespace and most resource names.
const RFC_1123_LABEL_MAX_LENGTH: usize = 63;

/// The longest pod name we accept. Keeps headroom within the 63-char resource
/// name limit for derived names such as `{pod}-headless` and `{pod}-init` and
/// for ordinal suffixes on ordered replicas.
pub const POD_NAME_MAX_LENGTH: usize = 52;

// Lazily initialized regular expressions
static RFC_1123_LABEL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{RFC_1123_LABEL_FMT}$")).expect("failed to compile RFC 1123 label regex")
});

/// Returns a formatted error message for maximum length violations.
fn max_len_error(length: usize) -> String {
    format!("must be no more than {length} characters")
}

/// Returns a formatted error message for regex violations.
fn regex_error(msg: &str, fmt: &str, examples: &[&str]) -> String {
    if examples.is_empty() {
        return format!("{msg} (regex used for validation is '{fmt}')");
    }

    let mut msg = msg.to_string();
    msg.push_str(" (e.g. ");
    for (i, example) in examples.iter().enumerate() {
        if i > 0 {
            msg.push_str(" or ");
        }
        msg.push('\'');
        msg.push_str(example);
        msg.push_str("', ");
    }

    msg.push_str("regex used for validation is '");
    msg.push_str(fmt);
    msg.push_str("')");
    msg
}

/// Tests for a string that conforms to the definition of a label in DNS
/// (RFC 1123), which is what Kubernetes requires of namespace names and of
/// the names of most namespaced resources.
pub fn is_rfc_1123_label(value: &str) -> Result<(), Vec<String>> {
    let mut errors = vec![];
    if value.len() > RFC_1123_LABEL_MAX_LENGTH {
        errors.push(max_len_error(RFC_1123_LABEL_MAX_LENGTH));
    }

    if !RFC_1123_LABEL_REGEX.is_match(value) {
        errors.push(regex_error(
            RFC_1123_LABEL_ERROR_MSG,
            RFC_1123_LABEL_FMT,
            &["example-label", "1-label-1"],
        ));
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Validates a namespace name.
///
/// See [`is_rfc_1123_label`] for more information.
pub fn validate_namespace_name(name: &str) -> Result<(), Vec<String>> {
    is_rfc_1123_label(name)
}

/// Validates a pod name at configuration time.
///
/// Stricter than plain resource-name validation: the pod name is reused as a
/// prefix of several derived resource names, so it gets a tighter length cap
/// ([`POD_NAME_MAX_LENGTH`]).
pub fn validate_pod_name(name: &str) -> Result<(), Vec<String>> {
    let mut errors = match is_rfc_1123_label(name) {
        Ok(()) => vec![],
        Err(errors) => errors,
    };

    if name.len() > POD_NAME_MAX_LENGTH {
        errors.push(max_len_error(POD_NAME_MAX_LENGTH));
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
