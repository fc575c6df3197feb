//! Ignore-rule matching.
//!
//! Every rule is a regular expression anchored across the whole command line,
//! with one optional trailing `;` tolerated (zsh appends it to some
//! multi-statement lines). Rules are not auto-escaped: a rule meant to match
//! `foo.bar` literally has to be written `foo\.bar`.

use regex::Regex;

/// A compiled, ordered set of ignore rules.
#[derive(Debug, Clone, Default)]
pub struct PatternFilter {
    rules: Vec<Rule>,
}

#[derive(Debug, Clone)]
struct Rule {
    source: String,
    regex: Regex,
}

/// Compile `rule` into its anchored form, or `None` if it is malformed.
fn compile(rule: &str) -> Option<Regex> {
    match Regex::new(&format!("^(?:{rule});?$")) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!("skipping malformed ignore rule {rule:?}: {e}");
            None
        }
    }
}

impl PatternFilter {
    /// Compile `rules` in order. Malformed rules are skipped with a warning.
    pub fn new<I, S>(rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut filter = Self::default();
        for rule in rules {
            filter.push(rule.as_ref());
        }
        filter
    }

    /// Append a rule at the end of the evaluation order.
    ///
    /// Returns `false` (and keeps the set unchanged) if the rule does not compile.
    pub fn push(&mut self, rule: &str) -> bool {
        let Some(regex) = compile(rule) else {
            return false;
        };
        self.rules.push(Rule {
            source: rule.to_owned(),
            regex,
        });
        true
    }

    /// Returns `true` if any rule matches the whitespace-trimmed `command`.
    pub fn matches(&self, command: &str) -> bool {
        self.matching_rule(command).is_some()
    }

    /// The first rule (in insertion order) that matches `command`.
    pub fn matching_rule(&self, command: &str) -> Option<&str> {
        let command = command.trim();
        self.rules
            .iter()
            .find(|r| r.regex.is_match(command))
            .map(|r| r.source.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// One-shot form of [`PatternFilter::matches`] that compiles `rules` on the fly.
pub fn matches<S: AsRef<str>>(command: &str, rules: &[S]) -> bool {
    let command = command.trim();
    rules
        .iter()
        .filter_map(|r| compile(r.as_ref()))
        .any(|re| re.is_match(command))
}
