//! Environment variable expansion for configuration strings.

use crate::ConfigError;

/// Expand `${VAR}` and `${VAR:-default}` references in a string.
///
/// Returns the original string unchanged if no `${` is present. Bare `$VAR`
/// is left as-is. A `${VAR}` without default whose variable is unset is an
/// error.
pub(crate) fn expand_env(value: &str, field: &str) -> Result<String, ConfigError> {
    // Fast path: no expansion needed
    if !value.contains("${") {
        return Ok(value.to_owned());
    }

    // Unset variables resolve to `None`, which keeps the reference literal
    // unless a default is given.
    let expanded = shellexpand::env_with_context_no_errors(value, |var| std::env::var(var).ok());

    if let Some(var_name) = unresolved_reference(&expanded) {
        return Err(ConfigError::EnvVar {
            field: field.to_owned(),
            message: format!("${{{var_name}}} not set"),
        });
    }

    Ok(expanded.into_owned())
}

/// Name of the first `${VAR}` reference left in an expanded string.
fn unresolved_reference(value: &str) -> Option<&str> {
    let start = value.find("${")? + 2;
    let len = value[start..].find('}')?;
    Some(&value[start..start + len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_simple_var() {
        // SAFETY: test runs single-threaded per test function
        unsafe {
            std::env::set_var("VIMD_TEST_VAR_SIMPLE", "hello");
        }
        let result = expand_env("${VIMD_TEST_VAR_SIMPLE}", "test.field").unwrap();
        assert_eq!(result, "hello");
        unsafe {
            std::env::remove_var("VIMD_TEST_VAR_SIMPLE");
        }
    }

    #[test]
    fn test_expand_with_default_uses_default() {
        // SAFETY: test runs single-threaded per test function
        unsafe {
            std::env::remove_var("VIMD_UNSET_VAR_TEST");
        }
        let result = expand_env("${VIMD_UNSET_VAR_TEST:-localhost}", "test.field").unwrap();
        assert_eq!(result, "localhost");
    }

    #[test]
    fn test_expand_missing_var_error() {
        // SAFETY: test runs single-threaded per test function
        unsafe {
            std::env::remove_var("VIMD_MISSING_VAR_TEST");
        }
        let err = expand_env("${VIMD_MISSING_VAR_TEST}", "server.host").unwrap_err();
        assert!(matches!(err, ConfigError::EnvVar { .. }));
        assert!(err.to_string().contains("VIMD_MISSING_VAR_TEST"));
        assert!(err.to_string().contains("server.host"));
    }

    #[test]
    fn test_expand_literal_unchanged() {
        let result = expand_env("127.0.0.1", "server.host").unwrap();
        assert_eq!(result, "127.0.0.1");
    }

    #[test]
    fn test_unresolved_reference() {
        assert_eq!(unresolved_reference("a${B}c"), Some("B"));
        assert_eq!(unresolved_reference("plain"), None);
    }
}
