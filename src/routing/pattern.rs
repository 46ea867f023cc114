//! Path pattern compilation.
//!
//! # Responsibilities
//! - Turn declarative paths (`/users/:id`, `/static/*`) into anchored regexes
//! - Record captured parameter names in declaration order
//! - Compile raw regular expressions and discover their named groups
//! - Compile virtual host patterns (`*.example.com`)
//!
//! # Design Decisions
//! - Every path compiles to a regex, so literal and parameterized routes
//!   share one matching code path
//! - Literal text is fully escaped; `*` is only legal as the last character
//! - Parameter groups are named positionally (`p0`, `p1`, ...) so names from
//!   the extended syntax (`$`, `-`) never reach the regex engine
//! - The parameter-name syntax is a compiler setting with one process-wide
//!   default, read when a compiler is created

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::LazyLock;

use percent_encoding::percent_decode_str;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::routing::error::RouterError;

/// Key under which the tail matched by a trailing `*` is bound.
pub const WILDCARD_PARAM: &str = "*";

/// Regex group holding the wildcard tail.
const REST_GROUP: &str = "rest";

static EXTENDED_BY_DEFAULT: AtomicBool = AtomicBool::new(false);

static STRICT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+").expect("static regex"));
static EXTENDED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$-]*").expect("static regex"));
static STRICT_GROUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\?P?<([A-Za-z0-9_]+)>").expect("static regex"));
static EXTENDED_GROUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(\?P?<([A-Za-z_$][A-Za-z0-9_$-]*)>").expect("static regex")
});

/// Characters allowed in `:name` parameter tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamSyntax {
    /// `[A-Za-z0-9_]+`
    #[default]
    Strict,
    /// `[A-Za-z_$][A-Za-z0-9_$-]*`
    Extended,
}

impl ParamSyntax {
    /// The syntax new compilers pick up when none is given explicitly.
    pub fn process_default() -> Self {
        if EXTENDED_BY_DEFAULT.load(Ordering::Relaxed) {
            ParamSyntax::Extended
        } else {
            ParamSyntax::Strict
        }
    }

    /// Install this syntax as the process-wide default.
    pub fn set_process_default(self) {
        EXTENDED_BY_DEFAULT.store(self == ParamSyntax::Extended, Ordering::Relaxed);
    }

    fn name(self) -> &'static Regex {
        match self {
            ParamSyntax::Strict => &STRICT_NAME,
            ParamSyntax::Extended => &EXTENDED_NAME,
        }
    }

    fn group(self) -> &'static Regex {
        match self {
            ParamSyntax::Strict => &STRICT_GROUP,
            ParamSyntax::Extended => &EXTENDED_GROUP,
        }
    }
}

/// Compiles path declarations into [`CompiledPath`] matchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternCompiler {
    syntax: ParamSyntax,
}

impl Default for PatternCompiler {
    fn default() -> Self {
        Self::new(ParamSyntax::process_default())
    }
}

impl PatternCompiler {
    pub fn new(syntax: ParamSyntax) -> Self {
        Self { syntax }
    }

    pub fn syntax(&self) -> ParamSyntax {
        self.syntax
    }

    /// Compile a declarative path such as `/users/:id/*`.
    pub fn compile_path(&self, spec: &str) -> Result<CompiledPath, RouterError> {
        if !spec.starts_with('/') {
            return Err(RouterError::PathNotAbsolute(spec.to_string()));
        }

        let (body, exact) = match spec.strip_suffix('*') {
            Some(prefix) => (prefix, false),
            None => (spec, true),
        };
        if body.contains('*') {
            return Err(RouterError::MisplacedWildcard(spec.to_string()));
        }

        // A slash right before the wildcard is optional together with the tail,
        // so `/api/*` also matches `/api`.
        let optional_slash = !exact && body.ends_with('/');
        let literal = if optional_slash {
            &body[..body.len() - 1]
        } else {
            body
        };

        let expected = spec.matches(':').count();
        let mut names: Vec<String> = Vec::new();
        let mut pattern = String::with_capacity(spec.len() + 24);
        pattern.push('^');

        let mut rest = literal;
        while let Some(pos) = rest.find(':') {
            pattern.push_str(&regex::escape(&rest[..pos]));
            let after = &rest[pos + 1..];
            match self.syntax.name().find(after) {
                Some(token) => {
                    let name = token.as_str();
                    if names.iter().any(|n| n == name) {
                        return Err(RouterError::DuplicateParam(name.to_string()));
                    }
                    pattern.push_str(&format!("(?P<p{}>[^/]+)", names.len()));
                    names.push(name.to_string());
                    rest = &after[token.end()..];
                }
                None => {
                    pattern.push(':');
                    rest = after;
                }
            }
        }
        pattern.push_str(&regex::escape(rest));

        if names.len() != expected {
            return Err(RouterError::ParamCountMismatch {
                expected,
                found: names.len(),
            });
        }

        if !exact {
            if optional_slash {
                pattern.push_str("(?:/(?P<rest>.*))?");
            } else {
                pattern.push_str("(?P<rest>.*)");
            }
        } else if !body.ends_with('/') {
            pattern.push_str("/?");
        }
        pattern.push('$');

        Ok(CompiledPath {
            source: spec.to_string(),
            path: Some(body.to_string()),
            regex: Regex::new(&pattern)?,
            param_names: names,
            exact,
            ends_with_slash: body.ends_with('/'),
            raw: false,
            group_names: None,
        })
    }

    /// Compile a raw regular expression. The whole request path must match.
    pub fn compile_regex(&self, pattern: &str) -> Result<CompiledPath, RouterError> {
        let regex = Regex::new(&format!("^(?:{pattern})$"))?;
        let param_names = self
            .syntax
            .group()
            .captures_iter(pattern)
            .map(|c| c[1].to_string())
            .collect();

        Ok(CompiledPath {
            source: pattern.to_string(),
            path: None,
            regex,
            param_names,
            exact: true,
            ends_with_slash: false,
            raw: true,
            group_names: None,
        })
    }

    /// Every `:name` token in a declarative path, duplicates included.
    pub fn scan_params<'a>(&self, spec: &'a str) -> Vec<&'a str> {
        let mut found = Vec::new();
        let mut rest = spec;
        while let Some(pos) = rest.find(':') {
            let after = &rest[pos + 1..];
            match self.syntax.name().find(after) {
                Some(token) => {
                    found.push(token.as_str());
                    rest = &after[token.end()..];
                }
                None => rest = after,
            }
        }
        found
    }
}

/// Compile a host pattern where `*` matches any run of characters.
/// Matching is case-insensitive.
pub fn compile_host(hostname: &str) -> Result<Regex, RouterError> {
    let body = hostname
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("(.*?)");
    Ok(RegexBuilder::new(&format!("^{body}$"))
        .case_insensitive(true)
        .build()?)
}

/// A compiled route path.
#[derive(Debug, Clone)]
pub struct CompiledPath {
    source: String,
    path: Option<String>,
    regex: Regex,
    param_names: Vec<String>,
    exact: bool,
    ends_with_slash: bool,
    raw: bool,
    group_names: Option<Vec<String>>,
}

/// Result of matching a request path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathMatch {
    /// Decoded parameter bindings in capture order.
    pub params: Vec<(String, String)>,
    /// Byte offset where the wildcard tail starts, when one was captured.
    pub rest_start: Option<usize>,
}

impl CompiledPath {
    /// The declaration this matcher was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Declared path without the trailing `*`; `None` for raw regexes.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn param_names(&self) -> &[String] {
        self.group_names.as_deref().unwrap_or(&self.param_names)
    }

    pub fn is_exact(&self) -> bool {
        self.exact
    }

    pub fn ends_with_slash(&self) -> bool {
        self.ends_with_slash
    }

    /// True when compiled from a raw regular expression.
    pub fn is_regex(&self) -> bool {
        self.raw
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Name raw-regex groups positionally.
    pub fn with_group_names(mut self, names: Vec<String>) -> Self {
        self.group_names = Some(names);
        self
    }

    /// Match a (mount-relative) request path and decode its parameters.
    pub fn matches(&self, path: &str) -> Option<PathMatch> {
        let caps = self.regex.captures(path)?;
        let mut params = Vec::new();

        if !self.raw {
            for (i, name) in self.param_names.iter().enumerate() {
                if let Some(m) = caps.name(&format!("p{i}")) {
                    params.push((name.clone(), decode(m.as_str())));
                }
            }
            let rest = caps.name(REST_GROUP);
            if let Some(m) = rest {
                params.push((WILDCARD_PARAM.to_string(), decode(m.as_str())));
            }
            return Some(PathMatch {
                params,
                rest_start: rest.map(|m| m.start()),
            });
        }

        match &self.group_names {
            Some(names) => {
                for (i, name) in names.iter().enumerate() {
                    let value = caps.name(name).or_else(|| caps.get(i + 1));
                    if let Some(m) = value {
                        params.push((name.clone(), decode(m.as_str())));
                    }
                }
            }
            None => {
                for name in &self.param_names {
                    if let Some(m) = caps.name(name) {
                        params.push((name.clone(), decode(m.as_str())));
                    }
                }
                for i in 1..caps.len() {
                    if let Some(m) = caps.get(i) {
                        params.push((format!("param{}", i - 1), decode(m.as_str())));
                    }
                }
            }
        }

        Some(PathMatch {
            params,
            rest_start: None,
        })
    }
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(spec: &str) -> CompiledPath {
        PatternCompiler::new(ParamSyntax::Strict)
            .compile_path(spec)
            .unwrap()
    }

    #[test]
    fn test_exact_path_accepts_trailing_slash() {
        let p = compile("/users");
        assert!(p.is_exact());
        assert!(p.matches("/users").is_some());
        assert!(p.matches("/users/").is_some());
        assert!(p.matches("/users/1").is_none());
        assert!(p.matches("/user").is_none());
    }

    #[test]
    fn test_literal_dots_are_escaped() {
        let p = compile("/file.json");
        assert!(p.matches("/file.json").is_some());
        assert!(p.matches("/fileXjson").is_none());
    }

    #[test]
    fn test_params_in_declaration_order() {
        let p = compile("/users/:user/posts/:post");
        assert_eq!(p.param_names(), &["user".to_string(), "post".to_string()]);

        let m = p.matches("/users/alice/posts/42").unwrap();
        assert_eq!(
            m.params,
            vec![
                ("user".to_string(), "alice".to_string()),
                ("post".to_string(), "42".to_string())
            ]
        );
        assert!(p.matches("/users/a/b/posts/42").is_none());
    }

    #[test]
    fn test_param_values_are_decoded() {
        let p = compile("/files/:name");
        let m = p.matches("/files/a%20b+c").unwrap();
        assert_eq!(m.params[0].1, "a b+c");
    }

    #[test]
    fn test_duplicate_param_rejected() {
        let err = PatternCompiler::default()
            .compile_path("/a/:id/b/:id")
            .unwrap_err();
        assert_eq!(err, RouterError::DuplicateParam("id".into()));
    }

    #[test]
    fn test_dangling_colon_rejected() {
        let err = PatternCompiler::new(ParamSyntax::Strict)
            .compile_path("/a/:/b")
            .unwrap_err();
        assert!(matches!(
            err,
            RouterError::ParamCountMismatch {
                expected: 1,
                found: 0
            }
        ));
    }

    #[test]
    fn test_path_must_be_absolute() {
        let err = PatternCompiler::default().compile_path("users").unwrap_err();
        assert!(matches!(err, RouterError::PathNotAbsolute(_)));
        assert!(PatternCompiler::default().compile_path("").is_err());
    }

    #[test]
    fn test_wildcard_only_at_end() {
        let err = PatternCompiler::default()
            .compile_path("/a/*/b")
            .unwrap_err();
        assert!(matches!(err, RouterError::MisplacedWildcard(_)));
    }

    #[test]
    fn test_wildcard_binds_tail() {
        let p = compile("/api/*");
        assert!(!p.is_exact());
        assert_eq!(p.path(), Some("/api/"));

        let m = p.matches("/api/foo/bar").unwrap();
        assert_eq!(m.params, vec![("*".to_string(), "foo/bar".to_string())]);
        assert_eq!(m.rest_start, Some(5));

        let m = p.matches("/api").unwrap();
        assert!(m.params.is_empty());
        assert_eq!(m.rest_start, None);

        assert!(p.matches("/apiary").is_none());
    }

    #[test]
    fn test_wildcard_without_slash_is_plain_prefix() {
        let p = compile("/api*");
        let m = p.matches("/apiary").unwrap();
        assert_eq!(m.params[0].1, "ary");
    }

    #[test]
    fn test_extended_syntax() {
        let extended = PatternCompiler::new(ParamSyntax::Extended);
        let p = extended.compile_path("/items/:$item-id").unwrap();
        let m = p.matches("/items/7").unwrap();
        assert_eq!(m.params, vec![("$item-id".to_string(), "7".to_string())]);

        // The strict syntax stops at `-`, leaving a literal suffix.
        let strict = PatternCompiler::new(ParamSyntax::Strict);
        assert!(strict.compile_path("/items/:$item").is_err());
    }

    #[test]
    fn test_raw_regex_named_and_positional_groups() {
        let p = PatternCompiler::default()
            .compile_regex(r"/orders/(?P<order>\d+)/(\w+)")
            .unwrap();
        assert!(p.is_regex());
        assert!(p.is_exact());
        assert_eq!(p.param_names(), &["order".to_string()]);

        let m = p.matches("/orders/12/lines").unwrap();
        assert!(m.params.contains(&("order".to_string(), "12".to_string())));
        assert!(m.params.contains(&("param0".to_string(), "12".to_string())));
        assert!(m.params.contains(&("param1".to_string(), "lines".to_string())));
        assert!(p.matches("/orders/12/lines/x").is_none());
    }

    #[test]
    fn test_raw_regex_with_group_names() {
        let p = PatternCompiler::default()
            .compile_regex(r"/(\d+)/(\d+)")
            .unwrap()
            .with_group_names(vec!["x".into(), "y".into()]);
        let m = p.matches("/3/4").unwrap();
        assert_eq!(
            m.params,
            vec![("x".to_string(), "3".to_string()), ("y".to_string(), "4".to_string())]
        );
    }

    #[test]
    fn test_host_pattern() {
        let host = compile_host("*.example.com").unwrap();
        assert!(host.is_match("api.example.com"));
        assert!(host.is_match("API.Example.COM"));
        assert!(!host.is_match("example.com"));
        assert!(!host.is_match("api.exampleXcom"));
    }

    #[test]
    fn test_scan_params() {
        let compiler = PatternCompiler::default();
        assert_eq!(compiler.scan_params("/a/:id/b/:id/:x"), vec!["id", "id", "x"]);
    }
}
