//! Request resolution: URL decoding, id normalization and alias rewrites.
//!
//! An incoming path has the shape `/<modifiers>/<id…>`. The first segment
//! carries the transformation recipe, everything after it is the source id
//! (a root-relative path or an absolute URL).

use percent_encoding::percent_decode_str;

use crate::error::IpxError;
use crate::sanitize::safe_string;

/// Separators between modifier entries within the modifier segment.
const ENTRY_SEPARATORS: &[char] = &[',', '&'];
/// Separators between a modifier key and its argument tokens.
const VALUE_SEPARATORS: &[char] = &['_', '=', ':'];

/// Unordered in meaning, insertion-ordered in representation: handler
/// application and the cache key both need a reproducible ordering.
///
/// Keys are unique and case-sensitive. Inserting an existing key replaces
/// its value in place, keeping the original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifierMap {
    entries: Vec<(String, String)>,
}

impl ModifierMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First present key out of `names`, typically a short and a long alias.
    pub fn get_any(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| self.get(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Outcome of decoding one request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRequest {
    /// Percent-decoded source id, not yet normalized.
    pub id: String,
    pub modifiers: ModifierMap,
}

/// Splits a request path into the modifier map and the raw id.
///
/// Exactly one leading slash is stripped; the first segment is the
/// modifier segment; the remainder, rejoined, is the id, percent-decoded
/// once. The reserved segment `_` denotes the empty modifier set.
pub fn decode_path(path: &str) -> Result<DecodedRequest, IpxError> {
    let path = path.strip_prefix('/').unwrap_or(path);
    let mut segments = path.split('/');

    let modifier_segment = segments.next().unwrap_or("");
    if modifier_segment.is_empty() {
        return Err(IpxError::bad_request("Modifiers are missing"));
    }

    let raw_id = segments.collect::<Vec<_>>().join("/");
    let id = decode_fragment(&raw_id);
    if id.is_empty() || id == "/" {
        return Err(IpxError::bad_request("Resource id is missing"));
    }

    let modifiers = decode_modifiers(modifier_segment);

    Ok(DecodedRequest { id, modifiers })
}

fn decode_modifiers(segment: &str) -> ModifierMap {
    let mut modifiers = ModifierMap::new();
    if segment == "_" {
        return modifiers;
    }

    for entry in segment.split(ENTRY_SEPARATORS) {
        if entry.is_empty() {
            continue;
        }
        let mut tokens = entry.split(VALUE_SEPARATORS);
        let key = match tokens.next() {
            Some(key) if !key.is_empty() => safe_string(key),
            _ => continue,
        };
        let value = tokens
            .map(decode_fragment)
            .collect::<Vec<_>>()
            .join("_");
        modifiers.insert(key, value);
    }

    modifiers
}

fn decode_fragment(fragment: &str) -> String {
    let decoded = percent_decode_str(fragment).decode_utf8_lossy();
    safe_string(&decoded)
}

/// True when the id names a remote origin (`http://…`, `https://…`, any
/// scheme followed by `://`).
pub fn has_scheme(id: &str) -> bool {
    match id.find("://") {
        Some(pos) if pos > 0 => {
            let scheme = &id[..pos];
            let mut chars = scheme.chars();
            chars.next().is_some_and(|c| c.is_ascii_alphabetic())
                && scheme[1..]
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

/// Ensures a normalized id: either a scheme-carrying URL kept as-is, or a
/// root-relative path with exactly its leading slash guaranteed, then the
/// first matching alias rewrite applied.
pub fn normalize_id(id: &str, aliases: &[(String, String)]) -> String {
    let id = if has_scheme(id) {
        id.to_string()
    } else if id.starts_with('/') {
        id.to_string()
    } else {
        format!("/{id}")
    };

    for (base, replacement) in aliases {
        if let Some(rest) = id.strip_prefix(base.as_str()) {
            return join_alias(replacement, rest);
        }
    }

    id
}

fn join_alias(replacement: &str, rest: &str) -> String {
    if rest.is_empty() {
        return replacement.to_string();
    }
    format!(
        "{}/{}",
        replacement.trim_end_matches('/'),
        rest.trim_start_matches('/')
    )
}

/// Alias bases are root-relative; scheme-less config entries gain their
/// leading slash here, once, at startup.
pub fn normalize_aliases<I>(entries: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (String, String)>,
{
    entries
        .into_iter()
        .map(|(base, replacement)| {
            let base = if base.starts_with('/') {
                base
            } else {
                format!("/{base}")
            };
            (base, replacement)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_id_no_modifiers() {
        let decoded = decode_path("/_/logo.png").unwrap();
        assert_eq!(decoded.id, "logo.png");
        assert!(decoded.modifiers.is_empty());
    }

    #[test]
    fn test_decode_nested_id() {
        let decoded = decode_path("/_/images/2024/logo.png").unwrap();
        assert_eq!(decoded.id, "images/2024/logo.png");
    }

    #[test]
    fn test_decode_missing_modifiers() {
        let err = decode_path("//logo.png").unwrap_err();
        assert_eq!(err, IpxError::bad_request("Modifiers are missing"));
    }

    #[test]
    fn test_decode_missing_id() {
        assert_eq!(
            decode_path("/_").unwrap_err(),
            IpxError::bad_request("Resource id is missing")
        );
        assert_eq!(
            decode_path("/_/").unwrap_err(),
            IpxError::bad_request("Resource id is missing")
        );
    }

    #[test]
    fn test_decode_modifier_separators() {
        for path in ["/w_100,q_80/a.png", "/w_100&q_80/a.png", "/w=100,q:80/a.png"] {
            let decoded = decode_path(path).unwrap();
            assert_eq!(decoded.modifiers.get("w"), Some("100"));
            assert_eq!(decoded.modifiers.get("q"), Some("80"));
        }
    }

    #[test]
    fn test_decode_multi_token_value() {
        let decoded = decode_path("/extend_10_20_30_40/a.png").unwrap();
        assert_eq!(decoded.modifiers.get("extend"), Some("10_20_30_40"));
    }

    #[test]
    fn test_decode_valueless_modifier() {
        let decoded = decode_path("/enlarge,s_200x200/a.png").unwrap();
        assert_eq!(decoded.modifiers.get("enlarge"), Some(""));
        assert_eq!(decoded.modifiers.get("s"), Some("200x200"));
    }

    #[test]
    fn test_decode_duplicate_key_keeps_position_takes_last_value() {
        let decoded = decode_path("/w_10,h_20,w_30/a.png").unwrap();
        let entries: Vec<_> = decoded.modifiers.iter().collect();
        assert_eq!(entries, vec![("w", "30"), ("h", "20")]);
    }

    #[test]
    fn test_decode_percent_decoding_once() {
        let decoded = decode_path("/_/folder%20name/a%2520.png").unwrap();
        // %20 decodes to a space; %2520 decodes once to %20, not twice.
        assert_eq!(decoded.id, "folder name/a%20.png");
    }

    #[test]
    fn test_decode_is_deterministic() {
        let a = decode_path("/w_50,fit_cover/img/x.png").unwrap();
        let b = decode_path("/w_50,fit_cover/img/x.png").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_decode_remote_url_id() {
        let decoded = decode_path("/_/https://origin.example/x.png").unwrap();
        assert_eq!(decoded.id, "https://origin.example/x.png");
    }

    #[test]
    fn test_has_scheme() {
        assert!(has_scheme("http://a/b"));
        assert!(has_scheme("https://a/b"));
        assert!(has_scheme("s3+custom://a/b"));
        assert!(!has_scheme("/a/b"));
        assert!(!has_scheme("a/b"));
        assert!(!has_scheme("://b"));
    }

    #[test]
    fn test_normalize_ensures_leading_slash() {
        assert_eq!(normalize_id("logo.png", &[]), "/logo.png");
        assert_eq!(normalize_id("/logo.png", &[]), "/logo.png");
        assert_eq!(
            normalize_id("https://a/b.png", &[]),
            "https://a/b.png"
        );
    }

    #[test]
    fn test_alias_first_match_only() {
        let aliases = normalize_aliases(vec![
            ("/img".to_string(), "https://cdn.example.com".to_string()),
            ("/img/legacy".to_string(), "/old".to_string()),
        ]);
        assert_eq!(
            normalize_id("/img/legacy/a.png", &aliases),
            "https://cdn.example.com/legacy/a.png"
        );
    }

    #[test]
    fn test_alias_base_gains_leading_slash() {
        let aliases = normalize_aliases(vec![(
            "assets".to_string(),
            "/static/assets".to_string(),
        )]);
        assert_eq!(
            normalize_id("assets/a.png", &aliases),
            "/static/assets/a.png"
        );
    }

    #[test]
    fn test_alias_exact_match() {
        let aliases =
            normalize_aliases(vec![("/old.png".to_string(), "/new.png".to_string())]);
        assert_eq!(normalize_id("/old.png", &aliases), "/new.png");
    }
}
