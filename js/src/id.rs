//! Identifier generation
//!
//! Entry and job IDs use the format: `{6-char-hex}-{kind}-{slug}`
//! Example: `019a3f-entry-email-welcome`

/// Generate an ID from a kind and a human-readable label
pub fn generate_id(kind: &str, label: &str) -> String {
    let uuid = uuid::Uuid::now_v7();
    let hex_prefix = &uuid.simple().to_string()[..6];
    format!("{}-{}-{}", hex_prefix, kind, slugify(label))
}

/// Slugify a label for use in IDs
fn slugify(label: &str) -> String {
    label
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
