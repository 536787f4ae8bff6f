//! Pattern Matcher
//!
//! Resolves a request URL to a strategy name. Asset extensions win over the
//! rule table; rules are tried in declared order; the default strategy is
//! the fallback. Patterns are compiled once from the configuration.

use regex::Regex;
use tracing::debug;
use url::Url;

use crate::config::{Config, StrategyName};
use crate::error::{OfflineError, Result};
use crate::http::resolve_url;

// == Strategy Matcher ==
#[derive(Debug, Clone)]
pub struct StrategyMatcher {
    base: Url,
    assets: Vec<Regex>,
    rules: Vec<(Regex, StrategyName)>,
    default: StrategyName,
}

impl StrategyMatcher {
    /// Compiles the asset patterns and the rule table.
    ///
    /// Fails with [`OfflineError::Config`] on a malformed pattern.
    pub fn new(config: &Config) -> Result<Self> {
        let base = config.origin_url()?;
        let assets = config
            .cache
            .assets
            .iter()
            .map(|p| compile_asset_pattern(p))
            .collect::<Result<Vec<_>>>()?;
        let rules = config
            .strategies
            .iter()
            .map(|rule| Ok((compile_route_pattern(&rule.pattern)?, rule.strategy)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            base,
            assets,
            rules,
            default: config.default_strategy,
        })
    }

    /// Strategy for `url`. Unparseable URLs use the default strategy.
    pub fn resolve(&self, url: &str) -> StrategyName {
        let Some(path) = self.path_of(url) else {
            debug!("Unparseable URL {:?}, using default strategy", url);
            return self.default;
        };

        if self.is_asset_path(&path) {
            return StrategyName::CacheFirst;
        }

        for (pattern, strategy) in &self.rules {
            if pattern.is_match(&path) {
                debug!("Matched pattern {} with strategy {} for {}", pattern, strategy, url);
                return *strategy;
            }
        }

        self.default
    }

    /// True when the URL path ends in a configured asset extension.
    pub fn is_asset(&self, url: &str) -> bool {
        self.path_of(url)
            .map(|path| self.is_asset_path(&path))
            .unwrap_or(false)
    }

    fn is_asset_path(&self, path: &str) -> bool {
        self.assets.iter().any(|re| re.is_match(path))
    }

    fn path_of(&self, url: &str) -> Option<String> {
        resolve_url(&self.base, url).map(|u| u.path().to_string())
    }
}

/// One-shot resolution without keeping the compiled matcher.
pub fn resolve_strategy(url: &str, config: &Config) -> Result<StrategyName> {
    Ok(StrategyMatcher::new(config)?.resolve(url))
}

// == Pattern Compilation ==
/// `/api/*` style route pattern to an anchored regex over the URL path.
///
/// `*` matches any substring; every other character is literal.
fn compile_route_pattern(pattern: &str) -> Result<Regex> {
    if pattern.is_empty() || !(pattern.starts_with('/') || pattern.starts_with('*')) {
        return Err(OfflineError::Config(format!(
            "Route pattern '{}' must start with '/' or '*'",
            pattern
        )));
    }
    if pattern.chars().any(char::is_whitespace) {
        return Err(OfflineError::Config(format!(
            "Route pattern '{}' contains whitespace",
            pattern
        )));
    }

    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body))
        .map_err(|e| OfflineError::Config(format!("Route pattern '{}': {}", pattern, e)))
}

/// `*.ext` asset pattern to a case-insensitive extension test.
fn compile_asset_pattern(pattern: &str) -> Result<Regex> {
    let ext = pattern
        .strip_prefix("*.")
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .ok_or_else(|| {
            OfflineError::Config(format!("Asset pattern '{}' must look like '*.ext'", pattern))
        })?;
    Regex::new(&format!(r"(?i)\.{}$", regex::escape(ext)))
        .map_err(|e| OfflineError::Config(format!("Asset pattern '{}': {}", pattern, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyRule;
    use proptest::prelude::*;

    fn config_with(rules: Vec<StrategyRule>) -> Config {
        Config {
            strategies: rules,
            ..Config::default()
        }
    }

    #[test]
    fn test_default_when_no_rule_matches() {
        let matcher = StrategyMatcher::new(&Config::default()).unwrap();
        assert_eq!(matcher.resolve("/dashboard"), StrategyName::NetworkFirst);
    }

    #[test]
    fn test_first_rule_wins() {
        let config = config_with(vec![
            StrategyRule::new("/api/*", StrategyName::NetworkOnly),
            StrategyRule::new("/api/users*", StrategyName::CacheOnly),
        ]);
        let matcher = StrategyMatcher::new(&config).unwrap();
        assert_eq!(matcher.resolve("/api/users/1"), StrategyName::NetworkOnly);
    }

    #[test]
    fn test_pattern_is_anchored() {
        let config = config_with(vec![StrategyRule::new("/admin", StrategyName::NetworkOnly)]);
        let matcher = StrategyMatcher::new(&config).unwrap();
        assert_eq!(matcher.resolve("/admin"), StrategyName::NetworkOnly);
        assert_eq!(matcher.resolve("/admin/users"), StrategyName::NetworkFirst);
        assert_eq!(matcher.resolve("/x/admin"), StrategyName::NetworkFirst);
    }

    #[test]
    fn test_rules_match_path_only() {
        let config = config_with(vec![StrategyRule::new(
            "/dashboard*",
            StrategyName::StaleWhileRevalidate,
        )]);
        let matcher = StrategyMatcher::new(&config).unwrap();
        assert_eq!(
            matcher.resolve("http://localhost:8000/dashboard/home?tab=2"),
            StrategyName::StaleWhileRevalidate
        );
    }

    #[test]
    fn test_dots_are_literal() {
        let config = config_with(vec![StrategyRule::new("/v1.0/*", StrategyName::CacheOnly)]);
        let matcher = StrategyMatcher::new(&config).unwrap();
        assert_eq!(matcher.resolve("/v1.0/items"), StrategyName::CacheOnly);
        assert_eq!(matcher.resolve("/v1x0/items"), StrategyName::NetworkFirst);
    }

    #[test]
    fn test_asset_overrides_rules() {
        let config = config_with(vec![StrategyRule::new("/static/*", StrategyName::NetworkOnly)]);
        let matcher = StrategyMatcher::new(&config).unwrap();
        assert_eq!(matcher.resolve("/static/app.JS"), StrategyName::CacheFirst);
        assert!(matcher.is_asset("https://cdn.example.com/font.woff2"));
        assert!(!matcher.is_asset("/static/app.json"));
    }

    #[test]
    fn test_malformed_url_uses_default() {
        let matcher = StrategyMatcher::new(&Config::default()).unwrap();
        assert_eq!(matcher.resolve("http://[::1"), StrategyName::NetworkFirst);
    }

    #[test]
    fn test_malformed_patterns_rejected() {
        let config = config_with(vec![StrategyRule::new("api/*", StrategyName::CacheFirst)]);
        assert!(matches!(StrategyMatcher::new(&config), Err(OfflineError::Config(_))));

        let mut config = Config::default();
        config.cache.assets = vec!["js".to_string()];
        assert!(matches!(StrategyMatcher::new(&config), Err(OfflineError::Config(_))));
    }

    #[test]
    fn test_resolve_strategy_helper() {
        let config = config_with(vec![StrategyRule::new("/feed", StrategyName::CacheOnly)]);
        assert_eq!(resolve_strategy("/feed", &config).unwrap(), StrategyName::CacheOnly);
    }

    fn strategy_strategy() -> impl Strategy<Value = StrategyName> {
        prop::sample::select(StrategyName::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // Asset extensions resolve to cache-first whatever the rule table says.
        #[test]
        fn prop_assets_always_cache_first(
            dir in "[a-z]{1,8}",
            stem in "[a-z0-9_-]{1,12}",
            ext in prop::sample::select(vec!["js", "css", "png", "WOFF2", "Svg"]),
            rule_strategy in strategy_strategy(),
        ) {
            let config = config_with(vec![
                StrategyRule::new("*", rule_strategy),
                StrategyRule::new(format!("/{}/*", dir), rule_strategy),
            ]);
            let matcher = StrategyMatcher::new(&config).unwrap();
            let url = format!("/{}/{}.{}", dir, stem, ext);
            prop_assert_eq!(matcher.resolve(&url), StrategyName::CacheFirst);
        }

        // With overlapping rules the first declared one decides.
        #[test]
        fn prop_first_declared_match_wins(
            segment in "[a-z]{1,10}",
            first in strategy_strategy(),
            second in strategy_strategy(),
        ) {
            let config = config_with(vec![
                StrategyRule::new(format!("/{}/*", segment), first),
                StrategyRule::new("/*", second),
            ]);
            let matcher = StrategyMatcher::new(&config).unwrap();
            let url = format!("/{}/page", segment);
            prop_assert_eq!(matcher.resolve(&url), first);
        }
    }
}
