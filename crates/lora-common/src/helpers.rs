//! Common helper functions.

/// Current Unix time in whole seconds.
pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Read a boolean flag from the environment.
pub fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_secs_is_recent() {
        // 2023-11-14, well before any machine running these tests
        assert!(now_secs() > 1_700_000_000);
    }

    #[test]
    fn test_env_bool_default_when_unset() {
        assert!(env_bool("LORA_TEST_SURELY_UNSET_FLAG", true));
        assert!(!env_bool("LORA_TEST_SURELY_UNSET_FLAG", false));
    }
}
