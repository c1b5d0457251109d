//! Key and namespace validation

use super::error::{CacheError, Result};

/// Characters that may never appear in a key or namespace
pub const RESERVED_CHARS: &[char] = &['{', '}', '(', ')', '/', '\\', '@', ':'];

/// Maximum namespace length in characters
pub const MAX_NAMESPACE_LEN: usize = 64;

/// Namespace used when none has been selected
pub const DEFAULT_NAMESPACE: &str = "DEFAULT";

/// Check that a key is non-empty and free of reserved characters
pub fn validate_key(key: &str) -> bool {
    !key.is_empty() && !key.contains(RESERVED_CHARS)
}

/// Check a namespace: same rules as keys, capped at 64 characters
pub fn validate_namespace(namespace: &str) -> bool {
    validate_key(namespace) && namespace.chars().count() <= MAX_NAMESPACE_LEN
}

/// Fail fast with an argument error for an invalid key
pub fn ensure_key(key: &str) -> Result<()> {
    if validate_key(key) {
        Ok(())
    } else {
        Err(CacheError::InvalidKey(key.to_string()))
    }
}

/// Validate a namespace and return its storage form (upper-cased)
pub fn normalize_namespace(namespace: &str) -> Result<String> {
    if validate_namespace(namespace) {
        Ok(namespace.to_uppercase())
    } else {
        Err(CacheError::InvalidNamespace(namespace.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_characters_rejected() {
        assert!(!validate_key("bar{Foo"));
        for c in RESERVED_CHARS {
            assert!(!validate_key(&format!("key{}x", c)), "{} accepted", c);
        }
    }

    #[test]
    fn test_plain_keys_accepted() {
        assert!(validate_key("bar_Foo.1"));
        assert!(validate_key("user-42"));
        assert!(!validate_key(""));
    }

    #[test]
    fn test_namespace_length_limit() {
        assert!(validate_namespace(&"a".repeat(64)));
        assert!(!validate_namespace(&"a".repeat(65)));
        // keys themselves are not length-capped
        assert!(validate_key(&"a".repeat(65)));
    }

    #[test]
    fn test_normalize_namespace() {
        assert_eq!(normalize_namespace("users").unwrap(), "USERS");
        assert!(matches!(
            normalize_namespace("a:b"),
            Err(CacheError::InvalidNamespace(_))
        ));
    }

    #[test]
    fn test_ensure_key() {
        assert!(ensure_key("ok").is_ok());
        assert!(matches!(ensure_key("a/b"), Err(CacheError::InvalidKey(_))));
    }
}
