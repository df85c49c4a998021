use crate::service_info::MAX_NAME_LENGTH;

/// Split "Name #N" into ("Name", N)
///
/// Only a trailing, all-digits suffix counts: "Room #4b" has none.
fn numbered(name: &str) -> Option<(&str, u64)> {
    let (base, digits) = name.rsplit_once(" #")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(|n| (base, n))
}

/// The longest prefix of `s` that fits in `max` bytes and is still UTF-8
fn truncate_utf8(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Pick a new service name after a collision
///
/// "Printer" becomes "Printer #2", "Printer #2" becomes "Printer #3",
/// and so on. A run of collisions never offers the same name twice:
/// the suffix only ever increases, and a suffix already at `u64::MAX`
/// gains a second one (" #2") rather than wrapping. The base name is
/// shortened if necessary so that the result still fits in one DNS
/// label ([`MAX_NAME_LENGTH`] bytes).
#[must_use]
pub fn alternative_service_name(name: &str) -> String {
    let (base, next) = match numbered(name)
        .and_then(|(base, n)| n.checked_add(1).map(|next| (base, next)))
    {
        Some(numbered) => numbered,
        // No counter, or one that cannot go any higher: start a new one
        None => (name, 2),
    };
    let suffix = format!(" #{next}");
    let base =
        truncate_utf8(base, MAX_NAME_LENGTH.saturating_sub(suffix.len()));
    format!("{base}{suffix}")
}

#[cfg(test)]
#[path = "tests/alternative.rs"]
mod tests;
