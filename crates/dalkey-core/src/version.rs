//! Version parsing and range matching.
//!
//! Versions follow SemVer 2.0 ordering (the `semver` crate is the source of
//! truth for comparison, including prerelease precedence). Ranges use the npm
//! grammar: `||`-separated OR clauses, each clause a whitespace-separated AND
//! of comparators with caret/tilde/hyphen/x-range sugar. npm syntax is
//! normalized into the `semver` crate's comma-separated form before parsing.
//!
//! A prerelease version only satisfies a clause when some comparator in that
//! clause carries a prerelease on the same (major, minor, patch) — the crate
//! implements exactly this rule.

use semver::{Version, VersionReq};

/// Parse a version string, tolerating a leading `v` and partial versions.
///
/// Partial versions are zero-filled: `1` becomes `1.0.0`, `1.2` becomes
/// `1.2.0`. Returns `None` for anything that still fails to parse.
#[must_use]
pub fn parse_version(text: &str) -> Option<Version> {
    let text = text.trim();
    let text = text.strip_prefix(['v', 'V']).unwrap_or(text);

    if let Ok(v) = Version::parse(text) {
        return Some(v);
    }

    Version::parse(&zero_fill(text)).ok()
}

/// Zero-fill a partial version core, preserving prerelease/build suffixes.
///
/// `1` -> `1.0.0`, `1.2` -> `1.2.0`, `1.2-rc.1` -> `1.2.0-rc.1`.
fn zero_fill(text: &str) -> String {
    let suffix_at = text
        .char_indices()
        .find(|(i, c)| (*c == '-' || *c == '+') && *i > 0)
        .map(|(i, _)| i);

    let (core, suffix) = match suffix_at {
        Some(i) => text.split_at(i),
        None => (text, ""),
    };

    let dots = core.matches('.').count();
    let mut filled = core.to_string();
    for _ in dots..2 {
        filled.push_str(".0");
    }
    filled.push_str(suffix);
    filled
}

/// A version range: a disjunction of comparator conjunctions.
///
/// An empty clause list matches nothing; this is how invalid range text is
/// represented (invalid ranges are not errors, they just never match).
#[derive(Debug, Clone)]
pub struct Range {
    clauses: Vec<VersionReq>,
    source: String,
}

impl Range {
    /// Parse a range string.
    ///
    /// `*`, the empty string, and `latest` match any stable version. A range
    /// containing any invalid token matches nothing.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let source = text.to_string();
        let mut clauses = Vec::new();

        for clause in text.split("||") {
            match parse_clause(clause) {
                Some(req) => clauses.push(req),
                None => {
                    // One bad token poisons the whole range.
                    return Self {
                        clauses: Vec::new(),
                        source,
                    };
                }
            }
        }

        Self { clauses, source }
    }

    /// The original range text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether this range can match anything at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Check whether a version satisfies this range.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.clauses.iter().any(|req| req.matches(version))
    }
}

/// Check whether `version` satisfies `range`.
#[must_use]
pub fn satisfies(version: &Version, range: &Range) -> bool {
    range.matches(version)
}

/// Return the greatest version in `versions` satisfying `range`.
#[must_use]
pub fn max_satisfying<'a, I>(versions: I, range: &Range) -> Option<&'a Version>
where
    I: IntoIterator<Item = &'a Version>,
{
    versions
        .into_iter()
        .filter(|v| range.matches(v))
        .max_by(|a, b| a.cmp(b))
}

/// Parse one AND-clause into a `VersionReq`, normalizing npm syntax.
fn parse_clause(clause: &str) -> Option<VersionReq> {
    let clause = clause.trim();

    // Wildcard forms and dist-tag style "latest" match any stable version.
    if clause.is_empty() || clause == "*" || clause == "latest" || clause == "x" || clause == "X" {
        return Some(VersionReq::STAR);
    }

    // Hyphen range: "A - B" means ">=A <=B".
    if let Some((start, end)) = clause.split_once(" - ") {
        let start = normalize_comparator(&format!(">={}", start.trim()))?;
        let end = normalize_comparator(&format!("<={}", end.trim()))?;
        return VersionReq::parse(&format!("{start}, {end}")).ok();
    }

    // Whitespace-separated comparators; an operator may be detached from its
    // version by a single space ("> 1.2.3").
    let mut comparators = Vec::new();
    let mut pending_op: Option<&str> = None;

    for token in clause.split_whitespace() {
        if let Some(op) = pending_op.take() {
            comparators.push(normalize_comparator(&format!("{op}{token}"))?);
            continue;
        }

        if matches!(token, ">=" | "<=" | ">" | "<" | "=" | "^" | "~") {
            pending_op = Some(token);
            continue;
        }

        comparators.push(normalize_comparator(token)?);
    }

    // A trailing bare operator is an invalid token.
    if pending_op.is_some() || comparators.is_empty() {
        return None;
    }

    VersionReq::parse(&comparators.join(", ")).ok()
}

/// Normalize a single comparator token.
///
/// Partial versions are zero-filled; a bare version gets an `=` prefix so it
/// pins exactly (the crate's default for a bare version is caret semantics).
/// Wildcard tokens (`1.x`, `1.2.*`) pass through untouched.
fn normalize_comparator(token: &str) -> Option<String> {
    let (op, version) = split_operator(token);

    if version.is_empty() {
        return None;
    }

    // x-ranges keep npm wildcard semantics; the crate understands them.
    if version
        .split(['-', '+'])
        .next()
        .is_some_and(|core| core.split('.').any(|seg| matches!(seg, "x" | "X" | "*")))
    {
        return Some(format!("{op}{version}"));
    }

    let filled = zero_fill(version);
    Version::parse(&filled).ok()?;

    if op.is_empty() {
        Some(format!("={filled}"))
    } else {
        Some(format!("{op}{filled}"))
    }
}

/// Split a comparator token into its operator prefix and version text.
fn split_operator(token: &str) -> (&str, &str) {
    for op in [">=", "<=", ">", "<", "=", "^", "~"] {
        if let Some(rest) = token.strip_prefix(op) {
            return (op, rest.trim());
        }
    }
    ("", token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn sat(version: &str, range: &str) -> bool {
        satisfies(&v(version), &Range::parse(range))
    }

    #[test]
    fn test_parse_simple() {
        let version = parse_version("1.2.3").unwrap();
        assert_eq!((version.major, version.minor, version.patch), (1, 2, 3));
    }

    #[test]
    fn test_parse_leading_v() {
        assert_eq!(parse_version("v1.2.3").unwrap(), v("1.2.3"));
    }

    #[test]
    fn test_parse_partial_zero_fills() {
        assert_eq!(parse_version("1").unwrap(), v("1.0.0"));
        assert_eq!(parse_version("1.2").unwrap(), v("1.2.0"));
    }

    #[test]
    fn test_parse_prerelease_identifiers() {
        let version = parse_version("1.2.3-beta.2").unwrap();
        assert_eq!(version.pre.as_str(), "beta.2");
    }

    #[test]
    fn test_parse_build_metadata() {
        let version = parse_version("1.2.3+build.5").unwrap();
        assert_eq!(version.build.as_str(), "build.5");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_version("not-a-version").is_none());
        assert!(parse_version("").is_none());
        assert!(parse_version("1.2.3.4").is_none());
    }

    #[test]
    fn test_compare_total_order() {
        assert_eq!(v("1.2.3").cmp(&v("1.2.4")), Ordering::Less);
        assert_eq!(v("2.0.0").cmp(&v("1.9.9")), Ordering::Greater);
        assert_eq!(v("1.2.3").cmp(&v("1.2.3")), Ordering::Equal);
    }

    #[test]
    fn test_compare_prerelease_precedence() {
        // A prerelease sorts below the same triple without one.
        assert!(v("1.0.0-alpha") < v("1.0.0"));
        // Numeric identifiers compare numerically and below alphanumeric.
        assert!(v("1.0.0-alpha.1") < v("1.0.0-alpha.beta"));
        assert!(v("1.0.0-alpha.2") < v("1.0.0-alpha.11"));
        // Shorter prerelease sequence has lower precedence on prefix match.
        assert!(v("1.0.0-alpha") < v("1.0.0-alpha.1"));
    }

    #[test]
    fn test_compare_build_ignored() {
        assert_eq!(v("1.2.3+a").cmp(&v("1.2.3+b")), Ordering::Equal);
    }

    #[test]
    fn test_caret_ranges() {
        assert!(sat("1.2.3", "^1.0.0"));
        assert!(!sat("2.0.0", "^1.0.0"));
        assert!(sat("0.2.5", "^0.2.3"));
        assert!(!sat("0.3.0", "^0.2.3"));
        // ^0.0.x pins patch
        assert!(sat("0.0.3", "^0.0.3"));
        assert!(!sat("0.0.4", "^0.0.3"));
    }

    #[test]
    fn test_tilde_ranges() {
        assert!(sat("1.2.5", "~1.2.0"));
        assert!(!sat("1.3.0", "~1.2.0"));
    }

    #[test]
    fn test_exact_pins() {
        assert!(sat("1.2.3", "1.2.3"));
        assert!(!sat("1.2.4", "1.2.3"));
        assert!(sat("1.2.3", "=1.2.3"));
        // A bare partial zero-fills to an exact version.
        assert!(sat("1.0.0", "1"));
        assert!(!sat("1.5.0", "1"));
    }

    #[test]
    fn test_comparator_pairs() {
        assert!(sat("1.5.0", ">=1.0.0 <2.0.0"));
        assert!(!sat("2.0.0", ">=1.0.0 <2.0.0"));
        // Operators may be separated from their versions by a space.
        assert!(sat("1.5.0", ">= 1.0.0 < 2.0.0"));
    }

    #[test]
    fn test_or_ranges() {
        let range = Range::parse("^1.0.0 || ^2.0.0");
        assert!(satisfies(&v("1.5.0"), &range));
        assert!(satisfies(&v("2.5.0"), &range));
        assert!(!satisfies(&v("3.0.0"), &range));
    }

    #[test]
    fn test_hyphen_ranges() {
        assert!(sat("1.5.0", "1.0.0 - 2.0.0"));
        assert!(sat("2.0.0", "1.0.0 - 2.0.0"));
        assert!(!sat("2.0.1", "1.0.0 - 2.0.0"));
    }

    #[test]
    fn test_x_ranges() {
        assert!(sat("1.5.0", "1.x"));
        assert!(!sat("2.0.0", "1.x"));
        assert!(sat("1.2.9", "1.2.x"));
        assert!(!sat("1.3.0", "1.2.x"));
    }

    #[test]
    fn test_wildcards_match_any_stable() {
        for range in ["*", "", "latest"] {
            assert!(sat("0.0.1", range), "range {range:?} should match");
            assert!(sat("99.99.99", range), "range {range:?} should match");
            assert!(!sat("1.0.0-rc.1", range), "range {range:?} matched a prerelease");
        }
    }

    #[test]
    fn test_prerelease_policy() {
        // No comparator mentions a prerelease: prereleases never match.
        assert!(!sat("1.2.3-rc.1", "^1.0.0"));
        // A comparator with a prerelease on the same triple opts in.
        assert!(sat("1.2.3-rc.1", ">=1.2.3-rc.0 <1.2.4"));
    }

    #[test]
    fn test_invalid_range_matches_nothing() {
        let range = Range::parse("not-a-range!!!");
        assert!(range.is_empty());
        assert!(!satisfies(&v("1.0.0"), &range));
        // One bad OR clause poisons the whole range.
        let range = Range::parse("^1.0.0 || garbage!!");
        assert!(!satisfies(&v("1.5.0"), &range));
    }

    #[test]
    fn test_max_satisfying() {
        let versions: Vec<Version> = ["1.0.0", "1.2.0", "1.2.5", "2.0.0"]
            .iter()
            .map(|s| v(s))
            .collect();

        let range = Range::parse("~1.2.0");
        assert_eq!(max_satisfying(&versions, &range), Some(&v("1.2.5")));

        let range = Range::parse("^3.0.0");
        assert_eq!(max_satisfying(&versions, &range), None);
    }

    #[test]
    fn test_max_satisfying_is_max_of_satisfying_set() {
        let versions: Vec<Version> = ["0.1.0", "1.0.0", "1.9.0", "1.4.2"]
            .iter()
            .map(|s| v(s))
            .collect();
        let range = Range::parse("^1.0.0");

        let expected = versions
            .iter()
            .filter(|candidate| satisfies(candidate, &range))
            .max();
        assert_eq!(max_satisfying(&versions, &range), expected);
    }
}
