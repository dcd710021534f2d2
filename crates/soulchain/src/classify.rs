//! Mapping workspace paths to document types.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use soulchain_core::DocType;

fn normalize(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches("./").to_string()
}

/// Resolve the document type for `path`.
///
/// First match wins:
/// 1. an explicit override for the path
/// 2. the file stem naming a type (`MEMORY.md`, `love-map.md`)
/// 3. the longest type name contained anywhere in the path
///
/// Anything else is [`DocType::Soul`].
pub fn resolve_doc_type(path: &str, overrides: &BTreeMap<String, DocType>) -> DocType {
    let normalized = normalize(path);
    if let Some(doc_type) = overrides.get(&normalized).or_else(|| overrides.get(path)) {
        return *doc_type;
    }

    if let Some(stem) = Path::new(&normalized).file_stem().and_then(|s| s.to_str()) {
        if let Ok(doc_type) = DocType::from_str(stem) {
            return doc_type;
        }
    }

    let haystack = normalized.to_ascii_lowercase().replace('-', "_");
    DocType::ALL
        .iter()
        .copied()
        .filter(|t| haystack.contains(t.name()))
        // Ties go to the lower identifier, so the result never depends on
        // iteration quirks.
        .max_by(|a, b| {
            a.name()
                .len()
                .cmp(&b.name().len())
                .then_with(|| b.as_u8().cmp(&a.as_u8()))
        })
        .unwrap_or(DocType::Soul)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn none() -> BTreeMap<String, DocType> {
        BTreeMap::new()
    }

    #[test]
    fn test_exact_stem() {
        assert_eq!(resolve_doc_type("SOUL.md", &none()), DocType::Soul);
        assert_eq!(resolve_doc_type("MEMORY.md", &none()), DocType::Memory);
        assert_eq!(resolve_doc_type("AGENTS.md", &none()), DocType::Agents);
        assert_eq!(resolve_doc_type("USER.md", &none()), DocType::User);
        assert_eq!(resolve_doc_type("docs/love-map.md", &none()), DocType::LoveMap);
    }

    #[test]
    fn test_longest_keyword() {
        // "memory" beats "daily" by length.
        assert_eq!(resolve_doc_type("memory/2024-01-01-daily.md", &none()), DocType::Memory);
        assert_eq!(resolve_doc_type("notes/daily-log.md", &none()), DocType::Daily);
        // "users" contains "user".
        assert_eq!(resolve_doc_type("people/users.txt", &none()), DocType::User);
    }

    #[test]
    fn test_default_and_override() {
        assert_eq!(resolve_doc_type("random.txt", &none()), DocType::Soul);

        let mut overrides = BTreeMap::new();
        overrides.insert("notes/today.md".to_string(), DocType::Daily);
        overrides.insert("MEMORY.md".to_string(), DocType::Identity);
        assert_eq!(resolve_doc_type("./notes/today.md", &overrides), DocType::Daily);
        assert_eq!(resolve_doc_type("MEMORY.md", &overrides), DocType::Identity);
    }
}
