//! CORS origin matching
//!
//! Acceptable origins are configured as `*` globs (for example
//! `http*://*.example.com`), compiled at startup; a matching `Origin`
//! request header is echoed back in `Access-Control-Allow-Origin`.

/// Comma-separated form of the accepted methods, sent in
/// `Access-Control-Allow-Methods`.
pub const ALLOWED_METHODS_HEADER: &str = "GET, POST, OPTIONS";

/// Compiled CORS policy.
#[derive(Debug, Default)]
pub struct CorsPolicy {
    matchers: Vec<OriginPattern>,
}

impl CorsPolicy {
    /// Compile the configured origin globs, skipping blank entries.
    pub fn new(origins: &[String]) -> Self {
        let matchers = origins
            .iter()
            .map(|o| o.trim())
            .filter(|o| !o.is_empty())
            .map(OriginPattern::compile)
            .collect();
        Self { matchers }
    }

    /// Whether the given `Origin` value matches any configured glob.
    pub fn is_acceptable_origin(&self, origin: &str) -> bool {
        self.matchers.iter().any(|p| p.matches(origin))
    }
}

/// One origin glob, compiled into the literal runs between `*` wildcards.
///
/// The first and last runs stay anchored to the ends of the origin unless
/// the glob opens or closes with `*`; runs in between may land anywhere,
/// in order.
#[derive(Debug)]
struct OriginPattern {
    literals: Vec<String>,
    open_start: bool,
    open_end: bool,
}

impl OriginPattern {
    fn compile(glob: &str) -> Self {
        Self {
            literals: glob
                .split('*')
                .filter(|run| !run.is_empty())
                .map(str::to_string)
                .collect(),
            open_start: glob.starts_with('*'),
            open_end: glob.ends_with('*'),
        }
    }

    fn matches(&self, origin: &str) -> bool {
        let mut rest = origin;
        let mut literals = self.literals.as_slice();

        if !self.open_start {
            let Some((first, tail)) = literals.split_first() else {
                // No wildcards and no literals: the empty glob.
                return origin.is_empty();
            };
            match rest.strip_prefix(first.as_str()) {
                Some(stripped) => rest = stripped,
                None => return false,
            }
            literals = tail;
        }

        if !self.open_end {
            let Some((last, head)) = literals.split_last() else {
                // Everything was consumed by the anchored prefix.
                return rest.is_empty();
            };
            match rest.strip_suffix(last.as_str()) {
                Some(stripped) => rest = stripped,
                None => return false,
            }
            literals = head;
        }

        for literal in literals {
            match rest.find(literal.as_str()) {
                Some(pos) => rest = &rest[pos + literal.len()..],
                None => return false,
            }
        }
        true
    }
}

#[cfg(test)]
#[path = "cors_test.rs"]
mod cors_test;
