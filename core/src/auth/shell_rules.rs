use std::path::Path;

use regex_lite::Regex;

use crate::paths::clean;
use crate::paths::is_under;

/// Context a rule needs to evaluate path predicates.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MatchContext<'a> {
    pub sandbox_dir: &'a Path,
    pub cwd: &'a Path,
}

/// Constraint on a single positional argument.
#[derive(Debug, Clone)]
pub enum ArgRule {
    /// The argument must equal this string exactly.
    Literal(String),
    /// The argument must match this regex in full.
    Pattern(Regex),
    /// The argument, resolved against the invocation's cwd, must lie inside
    /// the sandbox.
    PathInSandbox,
    Any,
}

impl ArgRule {
    /// Compiles `pattern` as a full-string match.
    pub fn pattern(pattern: &str) -> Result<Self, regex_lite::Error> {
        let anchored = format!("^(?:{pattern})$");
        Ok(ArgRule::Pattern(Regex::new(&anchored)?))
    }

    fn matches(&self, arg: &str, ctx: MatchContext<'_>) -> bool {
        match self {
            ArgRule::Literal(want) => arg == want,
            ArgRule::Pattern(re) => re.is_match(arg),
            ArgRule::PathInSandbox => {
                let path = Path::new(arg);
                let abs = if path.is_absolute() {
                    clean(path)
                } else {
                    clean(&ctx.cwd.join(path))
                };
                is_under(&abs, ctx.sandbox_dir)
            }
            ArgRule::Any => true,
        }
    }
}

/// A flag the rule tolerates, e.g. `-n` or `--max-count` (which consumes a
/// value).
#[derive(Debug, Clone)]
pub struct FlagDef {
    pub name: String,
    pub takes_value: bool,
}

impl FlagDef {
    pub fn new(name: &str, takes_value: bool) -> Self {
        Self {
            name: name.to_string(),
            takes_value,
        }
    }
}

/// Enumerates the flags an invocation may carry. Any flag not listed here
/// fails the rule.
#[derive(Debug, Clone, Default)]
pub struct FlagSpec {
    allowed: Vec<FlagDef>,
}

impl FlagSpec {
    pub fn new(allowed: Vec<FlagDef>) -> Self {
        Self { allowed }
    }

    fn find(&self, name: &str) -> Option<&FlagDef> {
        self.allowed.iter().find(|f| f.name == name)
    }
}

/// One entry of the shell allow-list: a required argv prefix, positional
/// argument rules, and an optional flag enumerator. The first matching rule
/// in the list wins.
#[derive(Debug, Clone)]
pub struct CommandRule {
    prefix: Vec<String>,
    arg_rules: Vec<ArgRule>,
    /// Applied to every positional argument beyond `arg_rules`. Without it,
    /// excess arguments fail the rule.
    trailing: Option<ArgRule>,
    flags: Option<FlagSpec>,
}

impl CommandRule {
    pub fn new<I, S>(prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefix: prefix.into_iter().map(Into::into).collect(),
            arg_rules: Vec::new(),
            trailing: None,
            flags: None,
        }
    }

    pub fn arg(mut self, rule: ArgRule) -> Self {
        self.arg_rules.push(rule);
        self
    }

    pub fn trailing(mut self, rule: ArgRule) -> Self {
        self.trailing = Some(rule);
        self
    }

    pub fn flags(mut self, spec: FlagSpec) -> Self {
        self.flags = Some(spec);
        self
    }

    /// An invocation matches iff the prefix lines up and every supplied
    /// argument satisfies its corresponding rule (or an allowed flag).
    pub(crate) fn matches(&self, argv: &[String], ctx: MatchContext<'_>) -> bool {
        if self.prefix.is_empty() || argv.len() < self.prefix.len() {
            return false;
        }
        if !argv
            .iter()
            .zip(&self.prefix)
            .all(|(a, p)| a == p)
        {
            return false;
        }

        let mut rules = self.arg_rules.iter();
        let mut args = argv[self.prefix.len()..].iter();
        while let Some(arg) = args.next() {
            if let Some(spec) = &self.flags
                && arg.starts_with('-')
            {
                // `--flag=value` carries its own value; `--flag value`
                // consumes the next argument.
                let (name, inline_value) = match arg.split_once('=') {
                    Some((name, value)) => (name, Some(value)),
                    None => (arg.as_str(), None),
                };
                let Some(def) = spec.find(name) else {
                    return false;
                };
                if def.takes_value && inline_value.is_none() && args.next().is_none() {
                    return false;
                }
                if !def.takes_value && inline_value.is_some() {
                    return false;
                }
                continue;
            }

            let rule = rules.next().or(self.trailing.as_ref());
            match rule {
                Some(rule) if rule.matches(arg, ctx) => {}
                _ => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn ctx<'a>() -> MatchContext<'a> {
        MatchContext {
            sandbox_dir: Path::new("/work"),
            cwd: Path::new("/work"),
        }
    }

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn prefix_must_line_up() {
        let rule = CommandRule::new(["git", "log"]);
        assert!(rule.matches(&argv(&["git", "log"]), ctx()));
        assert!(!rule.matches(&argv(&["git", "push"]), ctx()));
        assert!(!rule.matches(&argv(&["git"]), ctx()));
    }

    #[test]
    fn excess_args_need_a_trailing_rule() {
        let bare = CommandRule::new(["ls"]);
        assert!(!bare.matches(&argv(&["ls", "src"]), ctx()));

        let with_trailing = CommandRule::new(["ls"]).trailing(ArgRule::PathInSandbox);
        assert!(with_trailing.matches(&argv(&["ls", "src"]), ctx()));
        assert!(with_trailing.matches(&argv(&["ls", "src", "tests"]), ctx()));
    }

    #[test]
    fn path_predicate_rejects_escapes() {
        let rule = CommandRule::new(["cat"]).arg(ArgRule::PathInSandbox);
        assert!(rule.matches(&argv(&["cat", "README.md"]), ctx()));
        assert!(rule.matches(&argv(&["cat", "/work/a/b"]), ctx()));
        assert!(!rule.matches(&argv(&["cat", "/etc/passwd"]), ctx()));
        assert!(!rule.matches(&argv(&["cat", "../outside"]), ctx()));
    }

    #[test]
    fn pattern_rules_anchor_the_whole_argument() {
        let rule = CommandRule::new(["sed"])
            .arg(ArgRule::Literal("-n".to_string()))
            .arg(ArgRule::pattern(r"(\d+,)?\d+p").unwrap())
            .arg(ArgRule::PathInSandbox);
        assert!(rule.matches(&argv(&["sed", "-n", "1,5p", "file.txt"]), ctx()));
        assert!(!rule.matches(&argv(&["sed", "-n", "xp", "file.txt"]), ctx()));
        assert!(!rule.matches(&argv(&["sed", "-n", "1,5p;d", "file.txt"]), ctx()));
    }

    #[test]
    fn flag_enumerator_gates_dashed_args() {
        let rule = CommandRule::new(["git", "log"])
            .flags(FlagSpec::new(vec![
                FlagDef::new("--oneline", false),
                FlagDef::new("-n", true),
            ]))
            .trailing(ArgRule::Any);

        assert!(rule.matches(&argv(&["git", "log", "--oneline"]), ctx()));
        assert!(rule.matches(&argv(&["git", "log", "-n", "5"]), ctx()));
        assert!(rule.matches(&argv(&["git", "log", "-n=5"]), ctx()));
        assert!(!rule.matches(&argv(&["git", "log", "--graph"]), ctx()));
        assert!(!rule.matches(&argv(&["git", "log", "-n"]), ctx()), "missing value");
        assert!(
            !rule.matches(&argv(&["git", "log", "--oneline=x"]), ctx()),
            "value on a flag that takes none"
        );
    }
}
