//! Parsers for iproute2 output

/// Names listed by `ip netns list`
///
/// Each line is `name` or `name (id: N)`.
#[must_use]
pub fn netns_names(output: &str) -> Vec<&str> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .collect()
}

/// Whether `name` appears in `ip netns list` output
#[must_use]
pub fn netns_listed(output: &str, name: &str) -> bool {
    netns_names(output).contains(&name)
}
