//! Pipeline selection for a commit.
//!
//! A tag pipeline wins over a branch pipeline, which wins over the default
//! pipeline. Patterns use shell glob syntax (`*`, `?`, `[...]`) and `*` never
//! crosses a `/`, not even when written as `**`.
//!
//! The tag and branch maps are unordered. When more than one pattern matches
//! the same name, whichever the map yields first is used, so configurations
//! should not rely on overlapping patterns.

use crate::pipeline::{Config, Stage};
use glob::{MatchOptions, Pattern};
use std::collections::HashMap;
use tracing::{debug, warn};

const TAG_PREFIX: &str = "refs/tags/";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Select the pipeline to run for `git_ref` and `branch`.
pub fn select<'a>(config: &'a Config, git_ref: &str, branch: &str) -> &'a Stage {
    let pipelines = &config.pipelines;
    let tag = git_ref.strip_prefix(TAG_PREFIX).unwrap_or(git_ref);

    if let Some((pattern, stage)) = find_match(&pipelines.tags, tag) {
        debug!(pattern, tag, "selected tag pipeline");
        return stage;
    }

    if let Some((pattern, stage)) = find_match(&pipelines.branches, branch) {
        debug!(pattern, branch, "selected branch pipeline");
        return stage;
    }

    debug!(git_ref, branch, "selected default pipeline");
    &pipelines.default
}

impl Config {
    /// Select the pipeline to run for `git_ref` and `branch`.
    pub fn pipeline(&self, git_ref: &str, branch: &str) -> &Stage {
        select(self, git_ref, branch)
    }
}

fn find_match<'a>(stages: &'a HashMap<String, Stage>, name: &str) -> Option<(&'a str, &'a Stage)> {
    stages
        .iter()
        .find(|(pattern, _)| glob_match(pattern, name))
        .map(|(pattern, stage)| (pattern.as_str(), stage))
}

/// Match `name` against a shell glob. Invalid patterns never match.
///
/// Besides `*`, `?` and `[...]`, this accepts `[^...]` negation and `\x`
/// escapes, and treats a run of stars like a single `*`.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let Some(translated) = translate_pattern(pattern) else {
        warn!(pattern, "ignoring invalid pipeline pattern");
        return false;
    };

    match Pattern::new(&translated) {
        Ok(p) => p.matches_with(name, MATCH_OPTIONS),
        Err(e) => {
            warn!(pattern, error = %e, "ignoring invalid pipeline pattern");
            false
        }
    }
}

// Rewrite a shell pattern into the dialect understood by `glob::Pattern`.
fn translate_pattern(pattern: &str) -> Option<String> {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next()? {
                c @ ('*' | '?' | '[' | ']') => {
                    out.push('[');
                    out.push(c);
                    out.push(']');
                }
                c => out.push(c),
            },
            '*' => {
                while chars.next_if_eq(&'*').is_some() {}
                out.push('*');
            }
            '[' => {
                out.push('[');
                if chars.next_if(|&c| c == '^' || c == '!').is_some() {
                    out.push('!');
                }
                // A leading `]` is a member of the class.
                if let Some(first) = chars.next_if_eq(&']') {
                    out.push(first);
                }
                loop {
                    match chars.next()? {
                        ']' => break,
                        '\\' => out.push(chars.next()?),
                        c => out.push(c),
                    }
                }
                out.push(']');
            }
            c => out.push(c),
        }
    }

    Some(out)
}
