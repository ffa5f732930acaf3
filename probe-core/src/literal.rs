//! Pipe-delimited expectation literals.
//!
//! Every structured assertion reads literals of the form
//! `subject|field|field...`. The subject is a query or a URL; what follows
//! is either a self-declared count and that many trailing fields, or a
//! fixed shape. Parsing is strict: a declared count that disagrees with
//! the number of trailing fields is a [`FormatError`], never a partial
//! comparison.
//!
//! | Literal | Shape |
//! |---|---|
//! | search result | `query\|params\|count\|r1..rN` or `params\|count\|r1..rN` |
//! | query language | `query\|params\|language` |
//! | property map | `url\|{json object}` |
//! | absent record | `url` or `url\|{}` |
//! | link record | `url\|count\|linker1..linkerN` |

use serde_json::{Map, Value};
use thiserror::Error;

/// Malformed instruction or expectation syntax.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FormatError {
    /// Wrong number of instruction arguments
    #[error("{action}: expected {} arguments, got {got}", arity_text(.min, .max))]
    Arity {
        /// Action name.
        action: String,
        /// Declared minimum.
        min: usize,
        /// Declared maximum.
        max: Option<usize>,
        /// Arguments given.
        got: usize,
    },

    /// Key/value arguments with a dangling key
    #[error("{action}: expected key/value pairs, got {got} arguments")]
    UnpairedArguments {
        /// Action name.
        action: String,
        /// Arguments given.
        got: usize,
    },

    /// A required field is missing
    #[error("{literal:?}: missing {field}")]
    MissingField {
        /// The offending literal.
        literal: String,
        /// Which field.
        field: &'static str,
    },

    /// Count field is not a number
    #[error("{literal:?}: invalid count {value:?}")]
    InvalidCount {
        /// The offending literal.
        literal: String,
        /// The count field as written.
        value: String,
    },

    /// Declared count disagrees with the trailing fields
    #[error("{literal:?}: declared {declared} results, expected {expected} trailing fields, found {found}")]
    CountMismatch {
        /// The offending literal.
        literal: String,
        /// Declared result count.
        declared: usize,
        /// Trailing fields the count implies.
        expected: usize,
        /// Trailing fields present.
        found: usize,
    },

    /// A search parameter without `=`
    #[error("{literal:?}: invalid search parameter {param:?}")]
    InvalidParam {
        /// The offending literal.
        literal: String,
        /// The parameter as written.
        param: String,
    },

    /// Property map is not a JSON object
    #[error("{literal:?}: invalid property map: {reason}")]
    InvalidPropertyMap {
        /// The offending literal.
        literal: String,
        /// Parser message.
        reason: String,
    },
}

fn arity_text(min: &usize, max: &Option<usize>) -> String {
    match *max {
        Some(max) if max == *min => min.to_string(),
        Some(max) => format!("{min}..={max}"),
        None => format!("at least {min}"),
    }
}

/// `{SCHEME}`, `{DOMAIN}` and `{PORT}` values of the fixture server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholders {
    /// URL scheme.
    pub scheme: String,
    /// Base domain.
    pub domain: String,
    /// Port.
    pub port: u16,
}

impl Placeholders {
    /// Substitute every placeholder in `text`.
    pub fn apply(&self, text: &str) -> String {
        text.replace("{SCHEME}", &self.scheme)
            .replace("{DOMAIN}", &self.domain)
            .replace("{PORT}", &self.port.to_string())
    }
}

/// Prepend `http://` to a result URL the API returned without a scheme.
///
/// This is the only normalization applied before URL comparison.
pub fn normalize_result_url(url: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

/// Values compare equal, or one is a string whose text equals the other's.
pub fn loosely_equal(expected: &Value, actual: &Value) -> bool {
    if expected == actual {
        return true;
    }
    match (expected, actual) {
        (Value::String(s), other @ (Value::Number(_) | Value::Bool(_)))
        | (other @ (Value::Number(_) | Value::Bool(_)), Value::String(s)) => *s == other.to_string(),
        (Value::Number(a), Value::Number(b)) => a.as_f64().is_some_and(|a| Some(a) == b.as_f64()),
        _ => false,
    }
}

/// Describe every declared property the record does not satisfy.
pub fn property_mismatches(expected: &Map<String, Value>, actual: &Map<String, Value>) -> Vec<String> {
    expected
        .iter()
        .filter_map(|(key, want)| match actual.get(key) {
            None => Some(format!("{key}: missing, expected {want}")),
            Some(got) if !loosely_equal(want, got) => Some(format!("{key}: expected {want}, got {got}")),
            Some(_) => None,
        })
        .collect()
}

/// Group `k1 v1 k2 v2` arguments into pairs. A trailing odd key is dropped.
pub fn key_value_pairs(args: &[String]) -> Vec<(String, String)> {
    args.chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect()
}

/// Parse `k=v&k2=v2`. An empty string yields no parameters.
pub fn parse_params(literal: &str, params: &str) -> Result<Vec<(String, String)>, FormatError> {
    params
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| FormatError::InvalidParam {
                    literal: literal.to_string(),
                    param: p.to_string(),
                })
        })
        .collect()
}

/// A search to issue: the query plus extra parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchQuery {
    /// The `q` parameter.
    pub query: String,
    /// Everything else, in literal order.
    pub params: Vec<(String, String)>,
}

/// A parsed search-result literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchLiteral {
    /// The search to issue.
    pub search: SearchQuery,
    /// Declared result count.
    pub count: usize,
    /// Trailing fields, `count * fields_per_result` of them.
    pub fields: Vec<String>,
}

/// Split the search header off a literal, returning the remaining fields.
fn split_search<'a>(literal: &'a str) -> Result<(SearchQuery, Vec<&'a str>), FormatError> {
    let fields: Vec<&str> = literal.split('|').collect();

    if fields[0].contains('=') {
        let mut params = parse_params(literal, fields[0]).unwrap_or_default();
        if let Some(pos) = params.iter().position(|(k, _)| k == "q") {
            let (_, query) = params.remove(pos);
            return Ok((SearchQuery { query, params }, fields[1..].to_vec()));
        }
    }

    if fields.len() < 2 {
        return Err(FormatError::MissingField {
            literal: literal.to_string(),
            field: "params",
        });
    }
    let search = SearchQuery {
        query: fields[0].to_string(),
        params: parse_params(literal, fields[1])?,
    };
    Ok((search, fields[2..].to_vec()))
}

/// Parse a search-result literal whose results span `fields_per_result` fields each.
pub fn parse_search_literal(literal: &str, fields_per_result: usize) -> Result<SearchLiteral, FormatError> {
    let (search, rest) = split_search(literal)?;
    let (count_field, fields) = rest.split_first().ok_or_else(|| FormatError::MissingField {
        literal: literal.to_string(),
        field: "count",
    })?;

    let count: usize = count_field.trim().parse().map_err(|_| FormatError::InvalidCount {
        literal: literal.to_string(),
        value: count_field.to_string(),
    })?;

    let expected = count
        .checked_mul(fields_per_result)
        .ok_or_else(|| FormatError::InvalidCount {
            literal: literal.to_string(),
            value: count_field.to_string(),
        })?;
    if fields.len() != expected {
        return Err(FormatError::CountMismatch {
            literal: literal.to_string(),
            declared: count,
            expected,
            found: fields.len(),
        });
    }

    Ok(SearchLiteral {
        search,
        count,
        fields: fields.iter().map(|f| f.to_string()).collect(),
    })
}

/// Parse `query|params|language`.
pub fn parse_language_literal(literal: &str) -> Result<(SearchQuery, String), FormatError> {
    let (search, rest) = split_search(literal)?;
    match rest.as_slice() {
        [language] if !language.is_empty() => Ok((search, language.to_string())),
        [] | [_] => Err(FormatError::MissingField {
            literal: literal.to_string(),
            field: "language",
        }),
        _ => Err(FormatError::CountMismatch {
            literal: literal.to_string(),
            declared: 1,
            expected: 1,
            found: rest.len(),
        }),
    }
}

/// A `url|{json}` property literal.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyLiteral {
    /// Subject URL.
    pub url: String,
    /// Declared properties.
    pub properties: Map<String, Value>,
}

fn parse_object(literal: &str, text: &str) -> Result<Map<String, Value>, FormatError> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(FormatError::InvalidPropertyMap {
            literal: literal.to_string(),
            reason: format!("expected an object, got {other}"),
        }),
        Err(e) => Err(FormatError::InvalidPropertyMap {
            literal: literal.to_string(),
            reason: e.to_string(),
        }),
    }
}

fn subject_url(literal: &str, url: &str) -> Result<String, FormatError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(FormatError::MissingField {
            literal: literal.to_string(),
            field: "url",
        });
    }
    Ok(url.to_string())
}

/// Parse `url|{json object}`.
pub fn parse_property_literal(literal: &str) -> Result<PropertyLiteral, FormatError> {
    let (url, map) = literal.split_once('|').ok_or_else(|| FormatError::MissingField {
        literal: literal.to_string(),
        field: "property map",
    })?;
    Ok(PropertyLiteral {
        url: subject_url(literal, url)?,
        properties: parse_object(literal, map.trim())?,
    })
}

/// Parse an absent-record literal: `url`, optionally followed by `|{}`.
pub fn parse_absent_literal(literal: &str) -> Result<String, FormatError> {
    let Some((url, rest)) = literal.split_once('|') else {
        return subject_url(literal, literal);
    };
    let rest = rest.trim();
    if !rest.is_empty() && !parse_object(literal, rest)?.is_empty() {
        return Err(FormatError::InvalidPropertyMap {
            literal: literal.to_string(),
            reason: "absent records take no properties".into(),
        });
    }
    subject_url(literal, url)
}

/// A `url|count|linker..` link record literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkLiteral {
    /// Linked-to URL.
    pub url: String,
    /// Linking URLs, in stored order.
    pub linkers: Vec<String>,
}

/// Parse `url|count|linker1..linkerN`.
pub fn parse_link_literal(literal: &str) -> Result<LinkLiteral, FormatError> {
    let mut fields = literal.split('|');
    let url = subject_url(literal, fields.next().unwrap_or_default())?;
    let count_field = fields.next().ok_or_else(|| FormatError::MissingField {
        literal: literal.to_string(),
        field: "count",
    })?;
    let count: usize = count_field.trim().parse().map_err(|_| FormatError::InvalidCount {
        literal: literal.to_string(),
        value: count_field.to_string(),
    })?;

    let linkers: Vec<String> = fields.map(str::to_string).collect();
    if linkers.len() != count {
        return Err(FormatError::CountMismatch {
            literal: literal.to_string(),
            declared: count,
            expected: count,
            found: linkers.len(),
        });
    }
    Ok(LinkLiteral { url, linkers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn placeholders_substitute() {
        let placeholders = Placeholders {
            scheme: "http".into(),
            domain: "privacore.test".into(),
            port: 28080,
        };
        assert_eq!(
            placeholders.apply("{SCHEME}://a.case1.{DOMAIN}:{PORT}/x"),
            "http://a.case1.privacore.test:28080/x"
        );
        assert_eq!(placeholders.apply("plain"), "plain");
    }

    #[test]
    fn scheme_normalization_only_prepends_http() {
        assert_eq!(normalize_result_url("x.example/1"), "http://x.example/1");
        assert_eq!(normalize_result_url("https://x.example/1"), "https://x.example/1");
        assert_eq!(normalize_result_url("http://x.example/1"), "http://x.example/1");
    }

    #[test]
    fn two_field_header_takes_query_from_params() {
        let literal =
            parse_search_literal("q=test&n=2|2|http://x.example/1|http://x.example/2", 1).unwrap();
        assert_eq!(literal.search.query, "test");
        assert_eq!(literal.search.params, pairs(&[("n", "2")]));
        assert_eq!(literal.count, 2);
        assert_eq!(literal.fields, vec!["http://x.example/1", "http://x.example/2"]);
    }

    #[test]
    fn three_field_header() {
        let literal = parse_search_literal("foo bar|n=10&lang=en|1|http://x/", 1).unwrap();
        assert_eq!(literal.search.query, "foo bar");
        assert_eq!(literal.search.params, pairs(&[("n", "10"), ("lang", "en")]));

        let literal = parse_search_literal("foo||0", 1).unwrap();
        assert!(literal.search.params.is_empty());
        assert_eq!(literal.count, 0);
    }

    #[test]
    fn short_result_list_is_a_format_error() {
        let err = parse_search_literal("q=test&n=2|2|http://x.example/1", 1).unwrap_err();
        assert_eq!(
            err,
            FormatError::CountMismatch {
                literal: "q=test&n=2|2|http://x.example/1".into(),
                declared: 2,
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn title_summary_needs_two_fields_per_result() {
        assert!(parse_search_literal("q=a|1|Title|Summary", 2).is_ok());
        assert!(matches!(
            parse_search_literal("q=a|1|Title", 2),
            Err(FormatError::CountMismatch { expected: 2, found: 1, .. })
        ));
    }

    #[test]
    fn bad_counts_and_params() {
        assert!(matches!(
            parse_search_literal("q=a|two|x", 1),
            Err(FormatError::InvalidCount { .. })
        ));
        assert!(matches!(
            parse_search_literal("q=a", 1),
            Err(FormatError::MissingField { field: "count", .. })
        ));
        assert!(matches!(
            parse_search_literal("query", 1),
            Err(FormatError::MissingField { field: "params", .. })
        ));
        assert!(matches!(
            parse_search_literal("query|bogus|0", 1),
            Err(FormatError::InvalidParam { .. })
        ));
    }

    #[test]
    fn oversized_count_is_invalid() {
        assert!(matches!(
            parse_search_literal("q|n=1|9223372036854775808", 2),
            Err(FormatError::InvalidCount { ref value, .. }) if value == "9223372036854775808"
        ));
        assert!(matches!(
            parse_search_literal(&format!("q|n=1|{}", usize::MAX), 2),
            Err(FormatError::InvalidCount { .. })
        ));
        // Fits when each result is a single field.
        assert!(matches!(
            parse_search_literal(&format!("q|n=1|{}", usize::MAX), 1),
            Err(FormatError::CountMismatch { found: 0, .. })
        ));
    }

    #[test]
    fn language_literal() {
        let (search, language) = parse_language_literal("hello world||en").unwrap();
        assert_eq!(search.query, "hello world");
        assert_eq!(language, "en");

        let (search, language) = parse_language_literal("q=bonjour&n=1|fr").unwrap();
        assert_eq!(search.query, "bonjour");
        assert_eq!(language, "fr");

        assert!(parse_language_literal("hello||").is_err());
        assert!(parse_language_literal("hello||en|de").is_err());
    }

    #[test]
    fn property_literal() {
        let literal =
            parse_property_literal(r#"http://a.example/|{"httpStatus": 200, "isIndexed": true}"#).unwrap();
        assert_eq!(literal.url, "http://a.example/");
        assert_eq!(literal.properties.get("httpStatus"), Some(&json!(200)));

        assert!(matches!(
            parse_property_literal("http://a.example/"),
            Err(FormatError::MissingField { .. })
        ));
        assert!(matches!(
            parse_property_literal("http://a.example/|[1]"),
            Err(FormatError::InvalidPropertyMap { .. })
        ));
        assert!(matches!(
            parse_property_literal("http://a.example/|{oops"),
            Err(FormatError::InvalidPropertyMap { .. })
        ));
    }

    #[test]
    fn absent_literal_tolerates_empty_map() {
        assert_eq!(parse_absent_literal("http://a.example/").unwrap(), "http://a.example/");
        assert_eq!(parse_absent_literal("http://a.example/|{}").unwrap(), "http://a.example/");
        assert!(parse_absent_literal(r#"http://a.example/|{"x":1}"#).is_err());
        assert!(parse_absent_literal("|{}").is_err());
    }

    #[test]
    fn link_literal() {
        let literal = parse_link_literal("http://t.example/|2|http://a.example/|http://b.example/").unwrap();
        assert_eq!(literal.url, "http://t.example/");
        assert_eq!(literal.linkers.len(), 2);

        let empty = parse_link_literal("http://t.example/|0").unwrap();
        assert!(empty.linkers.is_empty());

        assert!(matches!(
            parse_link_literal("http://t.example/|3|http://a.example/"),
            Err(FormatError::CountMismatch { declared: 3, found: 1, .. })
        ));
    }

    #[test]
    fn loose_comparison() {
        assert!(loosely_equal(&json!("200"), &json!(200)));
        assert!(loosely_equal(&json!(true), &json!("true")));
        assert!(loosely_equal(&json!(1), &json!(1.0)));
        assert!(!loosely_equal(&json!("abc"), &json!(1)));
        assert!(!loosely_equal(&json!(null), &json!("null")));
    }

    #[test]
    fn property_mismatches_report_each_key() {
        let expected = json!({"a": 1, "b": "x", "c": true});
        let actual = json!({"a": "1", "b": "y"});
        let mismatches = property_mismatches(
            expected.as_object().unwrap(),
            actual.as_object().unwrap(),
        );
        assert_eq!(mismatches.len(), 2);
        assert!(mismatches.iter().any(|m| m.starts_with("b:")));
        assert!(mismatches.iter().any(|m| m.starts_with("c: missing")));
    }

    #[test]
    fn key_value_pairs_group_args() {
        let args: Vec<String> = ["k1", "v1", "k2", "v2"].iter().map(|s| s.to_string()).collect();
        assert_eq!(key_value_pairs(&args), pairs(&[("k1", "v1"), ("k2", "v2")]));
    }

    #[test]
    fn arity_message() {
        let err = FormatError::Arity {
            action: "sleep".into(),
            min: 1,
            max: Some(1),
            got: 0,
        };
        assert_eq!(err.to_string(), "sleep: expected 1 arguments, got 0");
    }
}
