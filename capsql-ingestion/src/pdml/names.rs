/// Filters a node name into row-name form: alphanumerics are kept
/// lowercased, `.`, space, `_` and `-` map to `.`, everything else is
/// dropped. Idempotent.
pub fn filter_name(name: &str) -> String {
    name.chars()
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() {
                Some(c.to_ascii_lowercase())
            } else if matches!(c, '.' | ' ' | '_' | '-') {
                Some('.')
            } else {
                None
            }
        })
        .collect()
}

/// Merges a naming prefix with a row name, eliding the longest contiguous
/// dotted suffix of the prefix that equals the row name's dotted prefix:
/// `a.b.c` + `b.c.d` → `a.b.c.d`.
pub fn combine_names(prefix: &str, suffix: &str) -> String {
    if prefix.is_empty() {
        return suffix.to_string();
    }
    if suffix.is_empty() {
        return prefix.to_string();
    }
    let prefix_segments: Vec<&str> = prefix.split('.').collect();
    let suffix_segments: Vec<&str> = suffix.split('.').collect();
    let max_overlap = prefix_segments.len().min(suffix_segments.len());
    for overlap in (1..=max_overlap).rev() {
        if prefix_segments[prefix_segments.len() - overlap..] == suffix_segments[..overlap] {
            return prefix_segments
                .iter()
                .chain(&suffix_segments[overlap..])
                .copied()
                .collect::<Vec<_>>()
                .join(".");
        }
    }
    format!("{prefix}.{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_keeps_alnum_and_maps_separators() {
        assert_eq!(filter_name("ip.flags"), "ip.flags");
        assert_eq!(filter_name("Checksum Status"), "checksum.status");
        assert_eq!(filter_name("a_b-c d"), "a.b.c.d");
        assert_eq!(filter_name("we!rd#"), "werd");
    }

    #[test]
    fn filter_is_idempotent() {
        for input in ["IP.Flags", "a b_c-d", "x!y", "", "..."] {
            let once = filter_name(input);
            assert_eq!(filter_name(&once), once);
        }
    }

    #[test]
    fn combine_elides_overlapping_segments() {
        assert_eq!(combine_names("a.b.c", "b.c.d"), "a.b.c.d");
        assert_eq!(combine_names("ip", "ip.flags"), "ip.flags");
        assert_eq!(combine_names("ip.flags", "_group"), "ip.flags._group");
        assert_eq!(combine_names("", "tcp"), "tcp");
        assert_eq!(combine_names("tcp", ""), "tcp");
    }

    #[test]
    fn combine_without_overlap_joins() {
        assert_eq!(combine_names("a.b", "c.d"), "a.b.c.d");
    }

    #[test]
    fn combine_never_duplicates_boundary_segment() {
        let combined = combine_names("tcp.options", "options.mss");
        let segments: Vec<&str> = combined.split('.').collect();
        assert_eq!(combined, "tcp.options.mss");
        for pair in segments.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }
}
