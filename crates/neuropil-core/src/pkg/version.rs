//! Version resolution using semver.
//!
//! Picks the version to install for a request against the set of published
//! versions. Explicit versions must be published exactly; ranges go through
//! the stability policy:
//!
//! - stable-preferred: highest stable match, else highest prerelease match
//!   (with a warning)
//! - stable-required: highest stable match, else [`PkgError::StableNotFound`]
//!   naming the prerelease that would have matched

use super::document::PackageDocument;
use super::error::PkgError;
use semver::{Version, VersionReq};
use serde::Serialize;
use std::fmt;

/// Request token that means "any version".
pub const LATEST: &str = "latest";

/// How ranges treat prerelease versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stability {
    /// Prefer stable versions, fall back to a prerelease with a warning.
    #[default]
    Preferred,
    /// Only stable versions may satisfy a range.
    Required,
}

/// Version selection policy for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvePolicy {
    pub stability: Stability,
    /// Restrict prerelease candidates to this channel (first prerelease
    /// identifier, e.g. `beta` in `2.0.0-beta.3`).
    pub prerelease_channel: Option<String>,
}

impl ResolvePolicy {
    #[must_use]
    pub fn stable_required() -> Self {
        Self {
            stability: Stability::Required,
            prerelease_channel: None,
        }
    }

    #[must_use]
    pub fn with_channel(mut self, channel: Option<String>) -> Self {
        self.prerelease_channel = channel;
        self
    }
}

/// What kind of request produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Explicit,
    DistTag,
    Range,
}

/// A chosen version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The version string exactly as published.
    pub version: String,
    pub kind: RequestKind,
    pub warning: Option<ResolveWarning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// No stable version matched; a prerelease was installed.
    PrereleaseSelected,
    /// A stable version was installed although a newer prerelease matched.
    NewerPrerelease,
}

/// A non-fatal resolver observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolveWarning {
    pub kind: WarningKind,
    pub name: String,
    pub request: String,
    pub chosen: String,
    pub prerelease: String,
}

impl fmt::Display for ResolveWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            WarningKind::PrereleaseSelected => write!(
                f,
                "no stable version of {} matches '{}', using prerelease {}",
                self.name, self.request, self.chosen
            ),
            WarningKind::NewerPrerelease => write!(
                f,
                "{}@{} selected for '{}'; newer prerelease {} ignored",
                self.name, self.chosen, self.request, self.prerelease
            ),
        }
    }
}

/// Parse an explicit version literal. A single leading `v` or `=` is allowed.
#[must_use]
pub fn explicit_version(request: &str) -> Option<Version> {
    let s = request.trim();
    let s = s
        .strip_prefix('=')
        .or_else(|| s.strip_prefix('v'))
        .unwrap_or(s);
    Version::parse(s.trim()).ok()
}

/// Check whether a request is an explicit version rather than a range.
#[must_use]
pub fn is_explicit_version(request: &str) -> bool {
    explicit_version(request).is_some()
}

/// Resolve a request against a package document.
///
/// Handles dist-tags other than `latest` before falling back to
/// [`resolve_version`].
///
/// # Errors
/// See [`resolve_version`].
pub fn resolve_document(
    doc: &PackageDocument,
    request: &str,
    policy: &ResolvePolicy,
) -> Result<Resolution, PkgError> {
    let request_trimmed = request.trim();

    if request_trimmed != LATEST && !is_explicit_version(request_trimmed) {
        if let Some(tagged) = doc.tagged(request_trimmed) {
            if doc.record(tagged).is_none() {
                return Err(PkgError::version_not_found(&doc.name, request));
            }
            return Ok(Resolution {
                version: tagged.to_string(),
                kind: RequestKind::DistTag,
                warning: None,
            });
        }
    }

    resolve_version(&doc.name, doc.version_strings(), request, policy)
}

/// Resolve a request against a set of published version strings.
///
/// # Errors
/// - `VersionNotFound` if an explicit version is not published, or no
///   version at all matches a range
/// - `StableNotFound` under [`Stability::Required`] when only prereleases
///   match
/// - `InvalidRange` if the range cannot be parsed
pub fn resolve_version<'a>(
    name: &str,
    versions: impl IntoIterator<Item = &'a str>,
    request: &str,
    policy: &ResolvePolicy,
) -> Result<Resolution, PkgError> {
    let published: Vec<(Version, &str)> = versions
        .into_iter()
        .filter_map(|raw| Version::parse(raw.trim()).ok().map(|v| (v, raw)))
        .collect();

    if let Some(wanted) = explicit_version(request) {
        return published
            .iter()
            .find(|(v, _)| *v == wanted)
            .map(|(_, raw)| Resolution {
                version: (*raw).to_string(),
                kind: RequestKind::Explicit,
                warning: None,
            })
            .ok_or_else(|| PkgError::version_not_found(name, request));
    }

    let range = RangeSet::parse(request).ok_or_else(|| PkgError::range_invalid(name, request))?;

    let candidates = published.iter().filter(|(v, _)| range.admits(v));

    let mut stable_max: Option<&(Version, &str)> = None;
    let mut unstable_max: Option<&(Version, &str)> = None;
    for candidate in candidates {
        let slot = if candidate.0.pre.is_empty() {
            &mut stable_max
        } else if on_channel(&candidate.0, policy.prerelease_channel.as_deref()) {
            &mut unstable_max
        } else {
            continue;
        };
        if slot.map_or(true, |best| candidate.0 > best.0) {
            *slot = Some(candidate);
        }
    }

    let warn = |kind: WarningKind, chosen: &str, prerelease: &str| ResolveWarning {
        kind,
        name: name.to_string(),
        request: request.to_string(),
        chosen: chosen.to_string(),
        prerelease: prerelease.to_string(),
    };

    let (version, warning) = match (policy.stability, stable_max, unstable_max) {
        (_, Some((stable, raw)), unstable) => {
            let warning = unstable
                .filter(|(pre, _)| pre > stable)
                .map(|(_, pre_raw)| warn(WarningKind::NewerPrerelease, *raw, *pre_raw));
            ((*raw).to_string(), warning)
        }
        (Stability::Preferred, None, Some((_, raw))) => (
            (*raw).to_string(),
            Some(warn(WarningKind::PrereleaseSelected, *raw, *raw)),
        ),
        (Stability::Required, None, unstable) => {
            return Err(PkgError::stable_not_found(
                name,
                request,
                unstable.map(|(_, raw)| (*raw).to_string()),
            ));
        }
        (Stability::Preferred, None, None) => {
            return Err(PkgError::version_not_found(name, request));
        }
    };

    Ok(Resolution {
        version,
        kind: RequestKind::Range,
        warning,
    })
}

fn on_channel(version: &Version, channel: Option<&str>) -> bool {
    match channel {
        None => true,
        Some(channel) => version.pre.as_str().split('.').next() == Some(channel),
    }
}

/// A parsed npm-style range: one or more `||` alternatives.
#[derive(Debug, Clone)]
pub struct RangeSet {
    alternatives: Vec<VersionReq>,
}

impl RangeSet {
    /// Parse an npm-style range. `latest` and the empty string mean `*`.
    ///
    /// `None` if any `||` alternative fails to parse.
    #[must_use]
    pub fn parse(range: &str) -> Option<Self> {
        let alternatives = range
            .split("||")
            .map(str::trim)
            .map(|alt| normalize_range(alt).and_then(|r| VersionReq::parse(&r).ok()))
            .collect::<Option<Vec<VersionReq>>>()?;

        if alternatives.is_empty() {
            None
        } else {
            Some(Self { alternatives })
        }
    }

    /// Strict semver matching (prereleases only match comparators that name
    /// a prerelease on the same release).
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    /// Candidate test used for selection: a prerelease is also admitted when
    /// its release triple satisfies the range.
    #[must_use]
    pub fn admits(&self, version: &Version) -> bool {
        if self.matches(version) {
            return true;
        }
        if version.pre.is_empty() {
            return false;
        }
        let release = Version::new(version.major, version.minor, version.patch);
        self.matches(&release)
    }
}

/// Rewrite one npm range alternative into `semver::VersionReq` syntax.
///
/// Handles:
/// - `*`, `x`, `latest`, empty: any version
/// - hyphen ranges: `1.0.0 - 2.0.0`
/// - x-ranges and partials: `1.x`, `1.2.*`, `1`, `1.2`
/// - bare full versions inside ranges, which npm reads as exact
/// - space-separated comparators: `>= 2.1.2 < 3.0.0`
///
/// `None` when an x-range bound does not fit in a `u64`.
fn normalize_range(range: &str) -> Option<String> {
    let range = range.trim();

    if range.is_empty() || range == LATEST {
        return Some(">=0.0.0".to_string());
    }

    if let Some((start, end)) = range.split_once(" - ") {
        let (start, end) = (start.trim(), end.trim());
        if !start.is_empty() && !end.is_empty() {
            return Some(format!(">={start}, <={end}"));
        }
    }

    // Glue dangling operators (">= 2.1.2") onto their version
    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op = String::new();
    for token in range.split([' ', ',']).filter(|t| !t.is_empty()) {
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            pending_op.push_str(token);
            continue;
        }
        comparators.push(normalize_comparator(&format!("{pending_op}{token}"))?);
        pending_op.clear();
    }

    if comparators.is_empty() {
        return Some(range.to_string());
    }

    Some(comparators.join(", "))
}

fn normalize_comparator(token: &str) -> Option<String> {
    let version_start = token
        .find(|c: char| !matches!(c, '<' | '>' | '=' | '~' | '^'))
        .unwrap_or(token.len());
    let (op, version) = token.split_at(version_start);
    let version = version.strip_prefix('v').unwrap_or(version);

    if !op.is_empty() {
        return Some(format!("{op}{version}"));
    }

    if Version::parse(version).is_ok() {
        return Some(format!("={version}"));
    }

    convert_x_range(version)
}

/// Convert an x-range or partial version to bounds.
fn convert_x_range(range: &str) -> Option<String> {
    fn is_wild(p: &str) -> bool {
        matches!(p, "x" | "X" | "*")
    }

    let parts: Vec<&str> = range.split('.').collect();

    match parts.as_slice() {
        [major] | [major, _] | [major, _, _] if is_wild(major) => Some(">=0.0.0".to_string()),
        [major] | [major, _] | [major, _, _]
            if parts[1..].iter().all(|p| is_wild(p)) || parts.len() == 1 =>
        {
            match major.parse::<u64>() {
                Ok(m) => Some(format!(">={m}.0.0, <{}.0.0", m.checked_add(1)?)),
                Err(_) => Some(range.to_string()),
            }
        }
        [major, minor] | [major, minor, _] => {
            match (major.parse::<u64>(), minor.parse::<u64>()) {
                (Ok(m), Ok(n)) => Some(format!(">={m}.{n}.0, <{m}.{}.0", n.checked_add(1)?)),
                _ => Some(range.to_string()),
            }
        }
        _ => Some(range.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn preferred() -> ResolvePolicy {
        ResolvePolicy::default()
    }

    fn pick(versions: &[&str], request: &str) -> String {
        resolve_version("test-pkg", versions.iter().copied(), request, &preferred())
            .unwrap()
            .version
    }

    #[test]
    fn test_resolve_latest_is_any() {
        assert_eq!(pick(&["1.0.0", "3.0.0", "2.0.0"], "latest"), "3.0.0");
        assert_eq!(pick(&["1.0.0", "3.0.0"], "*"), "3.0.0");
    }

    #[test]
    fn test_resolve_exact_version() {
        let res =
            resolve_version("a", ["1.0.0", "2.0.0"], "2.0.0", &preferred()).unwrap();
        assert_eq!(res.version, "2.0.0");
        assert_eq!(res.kind, RequestKind::Explicit);
    }

    #[test]
    fn test_exact_version_missing_is_not_a_range() {
        let err = resolve_version("a", ["1.0.1"], "1.0.0", &preferred()).unwrap_err();
        assert_eq!(err, PkgError::version_not_found("a", "1.0.0"));
    }

    #[test]
    fn test_explicit_prerelease_ignores_stability() {
        let res = resolve_version(
            "a",
            ["1.2.2", "1.2.3-beta"],
            "1.2.3-beta",
            &ResolvePolicy::stable_required(),
        )
        .unwrap();
        assert_eq!(res.version, "1.2.3-beta");
        assert!(res.warning.is_none());
    }

    #[test]
    fn test_resolve_caret_and_tilde() {
        assert_eq!(pick(&["1.0.0", "1.5.0", "2.0.0"], "^1.0.0"), "1.5.0");
        assert_eq!(pick(&["1.0.0", "1.0.5", "1.1.0"], "~1.0.0"), "1.0.5");
    }

    #[test]
    fn test_partial_versions_follow_npm() {
        assert_eq!(pick(&["1.0.0", "1.5.0", "2.0.0"], "1"), "1.5.0");
        assert_eq!(pick(&["1.2.0", "1.2.9", "1.3.0"], "1.2"), "1.2.9");
        assert_eq!(pick(&["1.0.0", "1.5.0", "2.0.0"], "1.x"), "1.5.0");
    }

    #[test]
    fn test_or_hyphen_and_spaces() {
        assert_eq!(pick(&["1.5.0", "2.5.0"], "^1.0.0 || ^2.0.0"), "2.5.0");
        assert_eq!(pick(&["1.0.0", "2.0.0", "3.0.0"], "1.0.0 - 2.0.0"), "2.0.0");
        assert_eq!(pick(&["2.1.2", "2.5.0", "3.0.0"], ">= 2.1.2 < 3.0.0"), "2.5.0");
        assert_eq!(pick(&["1.0.0", "2.0.0", "3.0.0"], "1.0.0 || 2.0.0"), "2.0.0");
    }

    #[test]
    fn test_invalid_range() {
        let err = resolve_version("a", ["1.0.0"], "not-a-range!!!", &preferred()).unwrap_err();
        assert_eq!(err.code(), "PKG_RANGE_INVALID");
    }

    #[test]
    fn test_one_bad_alternative_invalidates_range() {
        assert!(RangeSet::parse("^1.0.0 || ???garbage").is_none());
        let err = resolve_version("a", ["1.0.0"], "^1.0.0 || ???garbage", &preferred())
            .unwrap_err();
        assert_eq!(err, PkgError::range_invalid("a", "^1.0.0 || ???garbage"));
    }

    #[test]
    fn test_x_range_at_u64_max_is_invalid() {
        assert!(RangeSet::parse("18446744073709551615.x").is_none());
        assert!(RangeSet::parse("18446744073709551615").is_none());
        assert!(RangeSet::parse("1.18446744073709551615").is_none());
        assert!(RangeSet::parse("18446744073709551614.x").is_some());

        let err = resolve_version("a", ["1.0.0"], "1.18446744073709551615.x", &preferred())
            .unwrap_err();
        assert_eq!(err.code(), "PKG_RANGE_INVALID");
    }

    #[test]
    fn test_no_match_is_version_not_found() {
        let err = resolve_version("a", ["1.0.0"], "^3.0.0", &preferred()).unwrap_err();
        assert_eq!(err, PkgError::version_not_found("a", "^3.0.0"));
    }

    #[test]
    fn test_stable_preferred_warns_about_newer_prerelease() {
        let res = resolve_version("a", ["1.0.0", "1.0.1-alpha"], "^1.0.0", &preferred()).unwrap();
        assert_eq!(res.version, "1.0.0");
        let warning = res.warning.unwrap();
        assert_eq!(warning.kind, WarningKind::NewerPrerelease);
        assert_eq!(warning.prerelease, "1.0.1-alpha");
    }

    #[test]
    fn test_stable_preferred_falls_back_to_prerelease() {
        let res = resolve_version("a", ["1.0.0-alpha", "1.0.0-beta"], "^1.0.0", &preferred())
            .unwrap();
        assert_eq!(res.version, "1.0.0-beta");
        assert_eq!(res.warning.unwrap().kind, WarningKind::PrereleaseSelected);
    }

    #[test]
    fn test_stable_required_reports_fallback() {
        let err = resolve_version(
            "a",
            ["1.0.0-alpha"],
            "^1.0.0",
            &ResolvePolicy::stable_required(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            PkgError::stable_not_found("a", "^1.0.0", Some("1.0.0-alpha".to_string()))
        );
    }

    #[test]
    fn test_stable_required_without_any_candidate() {
        let err =
            resolve_version("a", ["2.0.0"], "^1.0.0", &ResolvePolicy::stable_required())
                .unwrap_err();
        assert_eq!(err, PkgError::stable_not_found("a", "^1.0.0", None));
    }

    #[test]
    fn test_prerelease_channel_filters_unstable() {
        let policy = preferred().with_channel(Some("beta".to_string()));
        let res = resolve_version(
            "a",
            ["2.0.0-alpha.5", "2.0.0-beta.1", "2.0.0-rc.1"],
            "^2.0.0",
            &policy,
        )
        .unwrap();
        assert_eq!(res.version, "2.0.0-beta.1");
    }

    #[test]
    fn test_prerelease_ordering() {
        assert_eq!(
            pick(&["1.0.0-alpha.2", "1.0.0-alpha.10", "1.0.0-alpha.beta"], "^1.0.0"),
            "1.0.0-alpha.beta"
        );
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let versions = ["1.0.0", "1.4.0", "1.4.1-rc.1"];
        let a = resolve_version("a", versions, "~1.4.0", &preferred()).unwrap();
        let b = resolve_version("a", versions, "~1.4.0", &preferred()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unparsable_published_versions_are_skipped() {
        assert_eq!(pick(&["garbage", "1.0.0"], "*"), "1.0.0");
    }

    #[test]
    fn test_resolve_document_dist_tag() {
        let doc = PackageDocument::from_json(json!({
            "name": "a",
            "dist-tags": { "latest": "1.0.0", "next": "2.0.0-rc.1" },
            "versions": { "1.0.0": {}, "2.0.0-rc.1": {} }
        }))
        .unwrap();

        let res = resolve_document(&doc, "next", &ResolvePolicy::stable_required()).unwrap();
        assert_eq!(res.version, "2.0.0-rc.1");
        assert_eq!(res.kind, RequestKind::DistTag);

        let res = resolve_document(&doc, "latest", &preferred()).unwrap();
        assert_eq!(res.version, "1.0.0");
        assert_eq!(res.kind, RequestKind::Range);
    }

    #[test]
    fn test_explicit_version_prefixes() {
        assert!(is_explicit_version("v1.2.3"));
        assert!(is_explicit_version("=1.2.3"));
        assert!(!is_explicit_version("^1.2.3"));
        assert!(!is_explicit_version("1.2"));
    }
}
