//! Allowlist check: deny-by-default. The principal's Telegram username or
//! numeric user id must appear in `telegram.allowed_users`.

pub fn is_allowed(allowed: &[String], username: &str, user_id: &str) -> bool {
    allowed.iter().any(|entry| {
        let entry = entry.trim().trim_start_matches('@');
        !entry.is_empty() && (entry.eq_ignore_ascii_case(username) || entry == user_id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_username_case_insensitively() {
        let allowed = vec!["@Alice".to_string()];
        assert!(is_allowed(&allowed, "alice", "123"));
        assert!(!is_allowed(&allowed, "bob", "123"));
    }

    #[test]
    fn matches_numeric_id() {
        let allowed = vec!["42".to_string()];
        assert!(is_allowed(&allowed, "", "42"));
    }

    #[test]
    fn empty_list_denies_everyone() {
        assert!(!is_allowed(&[], "alice", "42"));
    }
}
