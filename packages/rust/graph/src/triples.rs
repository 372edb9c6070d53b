//! Parsing of triple-extractor output.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::rdf::NAMESPACE;

/// `(subject, predicate, object)`.
pub type Triple = (String, String, String);

static TUPLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\(?\s*"?([^",]+)"?\s*,\s*"?([^",]+)"?\s*,\s*"?([^",]+)"?\s*\)?"#)
        .expect("valid regex")
});

/// One `(s, p, o)` tuple per line; parentheses and quotes are optional.
/// Lines that do not hold three comma-separated parts are skipped.
pub fn parse_triples(raw: &str) -> Vec<Triple> {
    raw.trim()
        .lines()
        .filter_map(|line| TUPLE_RE.captures(line))
        .map(|caps| {
            (
                caps[1].trim().to_string(),
                caps[2].trim().to_string(),
                caps[3].trim().to_string(),
            )
        })
        .collect()
}

/// Parse REBEL-style output, where parts are separated by two spaces and come
/// in `subject  object  predicate` groups. Subject and predicate are
/// percent-encoded so they can be used as IRI local names.
pub fn parse_rebel_output(raw: &str) -> Vec<Triple> {
    let parts: Vec<&str> = raw.trim().split("  ").collect();
    parts
        .chunks_exact(3)
        .map(|group| {
            (
                uri_safe(group[0].trim()),
                uri_safe(group[2].trim()),
                group[1].trim().to_string(),
            )
        })
        .collect()
}

/// Percent-encode `part` as a single IRI path segment.
pub fn uri_safe(part: &str) -> String {
    let Ok(mut url) = Url::parse(NAMESPACE) else {
        return part.to_string();
    };
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(part);
    }
    url.path()
        .rsplit('/')
        .next()
        .map(str::to_string)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tuples_with_and_without_quotes() {
        let raw = "(\"Insurer\", \"covers\", \"Floods\")\nVehicle, has deductible, 200 Euros\nnot a triple\n";
        assert_eq!(
            parse_triples(raw),
            vec![
                ("Insurer".into(), "covers".into(), "Floods".into()),
                ("Vehicle".into(), "has deductible".into(), "200 Euros".into()),
            ]
        );
    }

    #[test]
    fn rebel_groups_of_three() {
        let raw = "Allianz  Germany  country  Policy  Allianz  issued by  dangling";
        let triples = parse_rebel_output(raw);
        assert_eq!(
            triples,
            vec![
                ("Allianz".into(), "country".into(), "Germany".into()),
                ("Policy".into(), "issued%20by".into(), "Allianz".into()),
            ]
        );
    }

    #[test]
    fn encodes_reserved_characters() {
        assert_eq!(uri_safe("a/b c"), "a%2Fb%20c");
        assert_eq!(uri_safe("plain"), "plain");
    }
}
