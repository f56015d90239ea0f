//! Exclude rule compilation.
//!
//! A single list of user supplied rules is rendered into two pattern
//! syntaxes: shell globs handed to the external `zip` binary, and a regex
//! alternation used by the in-process archive methods. Rules are classified
//! once and rendered per target so both syntaxes exclude the same entries.

use crate::backup::path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use derive_more::Display;
use itertools::Itertools;
use regex::Regex;
use std::fmt::Formatter;

/// Matches any run of characters, including separators, as few as possible.
pub const REGEX_WILDCARD: &str = r"([\s\S]*?)";
pub const GLOB_WILDCARD: &str = "*";

/// How a raw rule string is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum RuleKind {
    /// Does not end in a separator: matches a file or directory name.
    #[display("file")]
    File,
    /// Starts and ends with a separator: anchored at the backup root.
    #[display("absolute path")]
    AbsolutePath,
    /// Ends, but does not start, with a separator: matches anywhere.
    #[display("path fragment")]
    PathFragment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum TargetSyntax {
    #[display("shell glob")]
    ShellGlob,
    #[display("regex")]
    Regex,
}

impl TargetSyntax {
    pub fn wildcard(self) -> &'static str {
        match self {
            TargetSyntax::ShellGlob => GLOB_WILDCARD,
            TargetSyntax::Regex => REGEX_WILDCARD,
        }
    }
}

/// One classified rule with the backup root and leading separator removed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExcludeRule {
    kind: RuleKind,
    body: String,
}

impl ExcludeRule {
    /// Classifies `raw` relative to the normalised `root`.
    ///
    /// Returns `None` for blank rules.
    pub fn classify(raw: &str, root: &str) -> Option<Self> {
        let raw = raw.trim();
        let last = raw.chars().last()?;
        let first = raw.chars().next()?;

        let kind = if !is_separator(last) {
            RuleKind::File
        } else if is_separator(first) {
            RuleKind::AbsolutePath
        } else {
            RuleKind::PathFragment
        };

        let normalized = path::normalize(raw);
        let stripped = path::relative_to(&normalized, root).unwrap_or(&normalized);
        let body = stripped.strip_prefix('/').unwrap_or(stripped).to_owned();

        Some(Self { kind, body })
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    fn ends_with_wildcard(&self) -> bool {
        self.body.ends_with('*')
    }

    /// Renders the rule for one target syntax.
    pub fn render(&self, syntax: TargetSyntax) -> String {
        match syntax {
            TargetSyntax::ShellGlob => self.render_glob(),
            TargetSyntax::Regex => self.render_regex(),
        }
    }

    fn render_glob(&self) -> String {
        let wildcard = TargetSyntax::ShellGlob.wildcard();
        match self.kind {
            RuleKind::File | RuleKind::PathFragment => {
                format!("{wildcard}{}{wildcard}", self.body)
            }
            RuleKind::AbsolutePath => format!("{}{wildcard}", self.body),
        }
    }

    fn render_regex(&self) -> String {
        let wildcard = TargetSyntax::Regex.wildcard();
        let mut rendered = self.body.split('*').map(regex::escape).join(wildcard);
        if self.kind == RuleKind::File && !self.ends_with_wildcard() {
            rendered.push('$');
        }
        if self.kind == RuleKind::AbsolutePath {
            rendered.insert(0, '^');
        }
        rendered
    }
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// A compiled exclude expression ready for one matching engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExcludeExpression {
    /// One pattern per rule, each passed after `-x` to the `zip` binary.
    ShellGlob(Vec<String>),
    /// Alternatives joined with `|`, not yet wrapped in a group.
    Regex(String),
}

impl ExcludeExpression {
    /// No rules at all. This is not the same as excluding everything.
    pub fn is_empty(&self) -> bool {
        match self {
            ExcludeExpression::ShellGlob(patterns) => patterns.is_empty(),
            ExcludeExpression::Regex(alternation) => alternation.is_empty(),
        }
    }

    /// Arguments for the `zip` command line. Empty when there are no rules,
    /// so the `-x` flag is left out entirely.
    pub fn zip_args(&self) -> Vec<String> {
        match self {
            ExcludeExpression::ShellGlob(patterns) => patterns
                .iter()
                .flat_map(|p| ["-x".to_owned(), p.clone()])
                .collect(),
            ExcludeExpression::Regex(_) => Vec::new(),
        }
    }
}

impl std::fmt::Display for ExcludeExpression {
    /// Shell-escaped `-x` list, or the grouped regex.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ExcludeExpression::ShellGlob(patterns) => {
                let escaped = patterns.iter().map(|p| shell_escape(p)).join(" -x ");
                f.write_str(&escaped)
            }
            ExcludeExpression::Regex(alternation) if alternation.is_empty() => Ok(()),
            ExcludeExpression::Regex(alternation) => write!(f, "({alternation})"),
        }
    }
}

/// Single-quotes `arg` for a POSIX shell.
pub fn shell_escape(arg: &str) -> String {
    let mut escaped = String::with_capacity(arg.len() + 2);
    escaped.push('\'');
    for c in arg.chars() {
        if c == '\'' {
            escaped.push_str("'\\''");
        } else {
            escaped.push(c);
        }
    }
    escaped.push('\'');
    escaped
}

/// Trims, drops blanks and deduplicates rules, keeping first occurrences.
pub fn sanitize_rules<I, S>(rules: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    rules
        .into_iter()
        .map(|r| r.as_ref().trim().to_owned())
        .filter(|r| !r.is_empty())
        .unique()
        .collect()
}

/// Compiles `rules` into an expression for `syntax`.
pub fn compile<S: AsRef<str>>(rules: &[S], root: &str, syntax: TargetSyntax) -> ExcludeExpression {
    let root = path::normalize(root);
    let rendered = sanitize_rules(rules)
        .iter()
        .filter_map(|raw| ExcludeRule::classify(raw, &root))
        .map(|rule| rule.render(syntax))
        .collect_vec();

    tracing::debug!(
        "Compiled {} exclude rules for {} matching",
        rendered.len(),
        syntax
    );

    match syntax {
        TargetSyntax::ShellGlob => ExcludeExpression::ShellGlob(rendered),
        TargetSyntax::Regex => ExcludeExpression::Regex(rendered.join("|")),
    }
}

/// In-process evaluation of a compiled [`ExcludeExpression`] against
/// root-relative, normalised paths.
///
/// Only the regex form runs in-process. Shell globs are evaluated by the
/// `zip` binary itself.
#[derive(Clone, Debug)]
pub enum ExcludeMatcher {
    Nothing,
    Regex(Regex),
}

impl ExcludeMatcher {
    pub fn new(expression: &ExcludeExpression) -> Result<Self> {
        if expression.is_empty() {
            return Ok(ExcludeMatcher::Nothing);
        }

        match expression {
            ExcludeExpression::Regex(alternation) => {
                Ok(ExcludeMatcher::Regex(Regex::new(&format!("({alternation})"))?))
            }
            ExcludeExpression::ShellGlob(patterns) => Err(Error::config(format!(
                "{} shell glob exclusions can only be applied by the zip binary",
                patterns.len()
            ))),
        }
    }

    /// Compiles `rules` straight to a regex matcher.
    pub fn regex<S: AsRef<str>>(rules: &[S], root: &str) -> Result<Self> {
        Self::new(&compile(rules, root, TargetSyntax::Regex))
    }

    pub fn is_match(&self, relative_path: &str) -> bool {
        match self {
            ExcludeMatcher::Nothing => false,
            ExcludeMatcher::Regex(regex) => regex.is_match(relative_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

    const ROOT: &str = "/srv/site";

    /// Evaluates `-x` patterns the way `zip` does, where `*` crosses
    /// directory separators.
    fn zip_globs(expression: &ExcludeExpression) -> GlobSet {
        let ExcludeExpression::ShellGlob(patterns) = expression else {
            panic!("Expected shell glob patterns, got {expression:?}");
        };
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let collapsed = pattern.chars().fold(String::new(), |mut acc, c| {
                if !(c == '*' && acc.ends_with('*')) {
                    acc.push(c);
                }
                acc
            });
            builder.add(
                GlobBuilder::new(&collapsed)
                    .literal_separator(false)
                    .build()
                    .unwrap(),
            );
        }
        builder.build().unwrap()
    }

    fn classify(raw: &str) -> ExcludeRule {
        ExcludeRule::classify(raw, ROOT).unwrap()
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify("exclude").kind(), RuleKind::File);
        assert_eq!(classify("/exclude/exclude.exclude").kind(), RuleKind::File);
        assert_eq!(classify("/exclude/*").kind(), RuleKind::File);
        assert_eq!(classify("/exclude/").kind(), RuleKind::AbsolutePath);
        assert_eq!(classify("\\exclude\\").kind(), RuleKind::AbsolutePath);
        assert_eq!(classify("exclude/").kind(), RuleKind::PathFragment);
        assert!(ExcludeRule::classify("   ", ROOT).is_none());
    }

    #[test]
    fn test_root_prefix_is_stripped() {
        assert_eq!(classify("/srv/site/exclude/").body(), "exclude");
        assert_eq!(classify("/exclude/").body(), "exclude");
        assert_eq!(classify("/srv/site-old/").body(), "srv/site-old");
        assert_eq!(classify("exclude/").body(), "exclude");
    }

    #[test]
    fn test_glob_rendering() {
        assert_eq!(classify("exclude/").render(TargetSyntax::ShellGlob), "*exclude*");
        assert_eq!(classify("/exclude/").render(TargetSyntax::ShellGlob), "exclude*");
        assert_eq!(classify("exclude").render(TargetSyntax::ShellGlob), "*exclude*");
        assert_eq!(classify("*.exclude").render(TargetSyntax::ShellGlob), "**.exclude*");
    }

    #[test]
    fn test_regex_rendering() {
        assert_eq!(classify("exclude/").render(TargetSyntax::Regex), "exclude");
        assert_eq!(classify("/exclude/").render(TargetSyntax::Regex), "^exclude");
        assert_eq!(classify("exclude").render(TargetSyntax::Regex), "exclude$");
        assert_eq!(
            classify("*.exclude").render(TargetSyntax::Regex),
            r"([\s\S]*?)\.exclude$"
        );
        assert_eq!(
            classify("exclude.*").render(TargetSyntax::Regex),
            r"exclude\.([\s\S]*?)"
        );
        assert_eq!(
            classify("/exclude/*").render(TargetSyntax::Regex),
            r"exclude/([\s\S]*?)"
        );
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let matcher = ExcludeMatcher::regex(&["cache(1)+"], ROOT).unwrap();
        assert!(matcher.is_match("wp-content/cache(1)+"));
        assert!(!matcher.is_match("wp-content/cache1"));
    }

    #[test]
    fn test_compile_joins_and_dedups() {
        let rules = ["exclude/", " exclude/ ", "", "*.log"];
        assert_eq!(
            compile(&rules, ROOT, TargetSyntax::Regex),
            ExcludeExpression::Regex(r"exclude|([\s\S]*?)\.log$".to_owned())
        );
        let glob = compile(&rules, ROOT, TargetSyntax::ShellGlob);
        assert_eq!(
            glob,
            ExcludeExpression::ShellGlob(vec!["*exclude*".to_owned(), "**.log*".to_owned()])
        );
        assert_eq!(glob.zip_args(), ["-x", "*exclude*", "-x", "**.log*"]);
        assert_eq!(glob.to_string(), "'*exclude*' -x '**.log*'");
    }

    #[test]
    fn test_empty_rules_differ_from_lone_wildcard() {
        let none: [&str; 0] = [];
        let empty = compile(&none, ROOT, TargetSyntax::ShellGlob);
        assert!(empty.is_empty());
        assert!(empty.zip_args().is_empty());
        assert!(!ExcludeMatcher::new(&empty).unwrap().is_match("anything"));

        let everything = compile(&["*"], ROOT, TargetSyntax::ShellGlob);
        assert!(!everything.is_empty());
        assert_eq!(everything.zip_args(), ["-x", "***"]);
        let globs = zip_globs(&everything);
        let regex = ExcludeMatcher::regex(&["*"], ROOT).unwrap();
        for path in ["index.php", "wp-content/uploads/a.png"] {
            assert!(globs.is_match(path), "{path}");
            assert!(regex.is_match(path), "{path}");
        }
    }

    #[test]
    fn test_glob_expression_is_not_matched_in_process() {
        let glob = compile(&["cache/"], ROOT, TargetSyntax::ShellGlob);
        let error = ExcludeMatcher::new(&glob).unwrap_err();
        assert!(error.to_string().contains("zip binary"));
    }

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape("plain"), "'plain'");
        assert_eq!(shell_escape("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_cross_syntax_equivalence() {
        let paths = [
            "test-data.txt",
            "first.txt",
            "nested",
            "nested/second.txt",
            "exclude",
            "exclude/exclude.exclude",
        ];
        let rule_sets: [&[&str]; 10] = [
            &["exclude/"],
            &["/exclude/"],
            &["exclude"],
            &["/exclude/*"],
            &["exclude/*"],
            &["*.exclude"],
            &["exclude.*"],
            &["/exclude/exclude.exclude"],
            &["/srv/site/exclude/", "*.txt"],
            &["*"],
        ];

        for rules in rule_sets {
            let glob = zip_globs(&compile(rules, ROOT, TargetSyntax::ShellGlob));
            let regex = ExcludeMatcher::new(&compile(rules, ROOT, TargetSyntax::Regex)).unwrap();
            for path in paths {
                assert_eq!(
                    glob.is_match(path),
                    regex.is_match(path),
                    "rules {rules:?} disagree on {path}"
                );
            }
        }
    }
}
