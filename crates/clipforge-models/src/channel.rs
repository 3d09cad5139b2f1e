//! Canonical progress channel naming.
//!
//! Every progress stream uses exactly one channel form:
//! `progress:project:<project_id>`. All code that constructs, publishes to,
//! or subscribes on a channel goes through [`normalize_channel`]; nothing
//! else concatenates channel strings.

/// Canonical channel prefix.
pub const CHANNEL_PREFIX: &str = "progress:project:";

/// Normalise any accepted channel spelling to the canonical form.
///
/// Accepts a bare project id, `project:<id>`, `progress:project:<id>`, and
/// any accidental repetition of those prefixes. Idempotent:
/// `normalize_channel(normalize_channel(x)) == normalize_channel(x)`.
pub fn normalize_channel(input: &str) -> String {
    let mut id = input.trim();
    loop {
        if let Some(rest) = id.strip_prefix("progress:") {
            id = rest;
        } else if let Some(rest) = id.strip_prefix("project:") {
            id = rest;
        } else {
            break;
        }
    }
    format!("{CHANNEL_PREFIX}{id}")
}

/// Extract the project id from a channel in any accepted spelling.
pub fn project_id_of_channel(channel: &str) -> String {
    let canonical = normalize_channel(channel);
    canonical[CHANNEL_PREFIX.len()..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_all_spellings() {
        let want = "progress:project:p1";
        assert_eq!(normalize_channel("p1"), want);
        assert_eq!(normalize_channel("project:p1"), want);
        assert_eq!(normalize_channel("progress:project:p1"), want);
    }

    #[test]
    fn strips_accidental_repetition() {
        let want = "progress:project:p1";
        assert_eq!(normalize_channel("progress:project:progress:project:p1"), want);
        assert_eq!(normalize_channel("progress:progress:project:p1"), want);
        assert_eq!(normalize_channel("project:project:p1"), want);
    }

    #[test]
    fn idempotent() {
        for input in ["p1", "project:p1", "progress:project:p1", "progress:project:project:p1"] {
            let once = normalize_channel(input);
            assert_eq!(normalize_channel(&once), once);
        }
    }

    #[test]
    fn extracts_project_id() {
        assert_eq!(project_id_of_channel("progress:project:p1"), "p1");
        assert_eq!(project_id_of_channel("p1"), "p1");
    }
}
