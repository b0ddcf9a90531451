use uuid::Uuid;

/// Session-unique identifier for outbound stanzas, optionally namespaced by
/// `prefix` as `<prefix>:<uuid>`.
pub fn unique_id(prefix: Option<&str>) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}:{}", Uuid::new_v4()),
        _ => Uuid::new_v4().to_string(),
    }
}

/// Nickname used when none is configured: `user` followed by ten digits.
pub fn random_nickname() -> String {
    format!("user{:010}", rand::random::<u64>() % 10_000_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_ids_carry_prefix() {
        let id = unique_id(Some("ping"));
        let (prefix, rest) = id.split_once(':').expect("prefix separator");
        assert_eq!(prefix, "ping");
        assert!(Uuid::parse_str(rest).is_ok());
    }

    #[test]
    fn bare_ids_are_uuids() {
        assert!(Uuid::parse_str(&unique_id(None)).is_ok());
        assert!(Uuid::parse_str(&unique_id(Some(""))).is_ok());
    }

    #[test]
    fn ids_do_not_repeat() {
        assert_ne!(unique_id(None), unique_id(None));
    }

    #[test]
    fn random_nickname_has_ten_digits() {
        let nick = random_nickname();
        let digits = nick.strip_prefix("user").expect("user prefix");
        assert_eq!(digits.len(), 10);
        assert!(digits.chars().all(|c| c.is_ascii_digit()));
    }
}
