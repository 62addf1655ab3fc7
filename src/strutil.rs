//! String helpers.

use std::sync::LazyLock;

use regex::Regex;

static NON_SLUG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("slug pattern is valid"));

/// URL-friendly slug: lowercase, runs of anything outside `[a-z0-9]`
/// collapsed to a single `-`, no leading or trailing `-`.
pub fn slugify(s: &str) -> String {
    let lower = s.to_lowercase();
    NON_SLUG.replace_all(&lower, "-").trim_matches('-').to_owned()
}
