/// Kernel ceiling for nftables chain names.
pub const CHAIN_NAME_MAX: usize = 31;

/// Derives the per-container chain name for a given role tag. The name is
/// a pure function of its inputs so Delete can reconstruct it without any
/// stored state: concatenate tag and container id, strip everything
/// outside `[A-Za-z0-9]`, and when the result exceeds the kernel ceiling
/// keep the tag as a fixed prefix plus the trailing slice of the sanitized
/// id that still fits.
///
/// Two container ids whose sanitized tails coincide map to the same name
/// after truncation; container ids issued by the supported runtimes carry
/// their entropy at the tail, so the collision window is accepted.
pub fn chain_name(tag: &str, container_id: &str) -> String {
    let tag: String = tag.chars().filter(char::is_ascii_alphanumeric).collect();
    let id: String = container_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();

    if tag.len() + id.len() <= CHAIN_NAME_MAX {
        return format!("{}{}", tag, id);
    }

    let room = CHAIN_NAME_MAX.saturating_sub(tag.len());
    format!("{}{}", tag, &id[id.len() - room..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_is_kept_whole() {
        assert_eq!(chain_name("ffw", "abc123"), "ffwabc123");
    }

    #[test]
    fn test_non_alphanumerics_are_stripped() {
        assert_eq!(
            chain_name("ffw", "dummy-58840a9d(6b09):90db"),
            "ffwdummy58840a9d6b0990db"
        );
    }

    #[test]
    fn test_long_id_keeps_tag_prefix_and_id_tail() {
        let id = "dummy-58840a9d-6b09-90db-9bc8-7a8105eb81d6";
        let name = chain_name("npo", id);
        assert_eq!(name.len(), CHAIN_NAME_MAX);
        assert!(name.starts_with("npo"));
        assert!(name.ends_with("7a8105eb81d6"));
    }

    #[test]
    fn test_deterministic() {
        let id = "58840a9d-6b09-90db-9bc8-7a8105eb81d6";
        assert_eq!(chain_name("rpr", id), chain_name("rpr", id));
    }

    #[test]
    fn test_output_is_alphanumeric_and_bounded() {
        for id in [
            "short",
            "with spaces and : punctuation / everywhere",
            "ffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        ] {
            let name = chain_name("ffw", id);
            assert!(name.len() <= CHAIN_NAME_MAX);
            assert!(name.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_roles_disambiguate_same_container() {
        let id = "58840a9d-6b09-90db-9bc8-7a8105eb81d6";
        assert_ne!(chain_name("npo", id), chain_name("npr", id));
    }
}
