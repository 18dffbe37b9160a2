//! Wildcard search patterns
//!
//! `*` matches any run of characters and `?` exactly one. Two legacy DOS rules
//! sit on top of plain globbing:
//!
//! - a pattern whose extension is exactly three literal characters (`*.gif`)
//!   also matches names whose *last* extension is longer but starts with those
//!   three characters (`a.gifx`), compared per extension rather than by
//!   rewriting the pattern;
//! - a pattern ending in a dot (`*.`) matches only names without an extension,
//!   including names that literally end in a dot.

use crate::config::{CaseSensitivity, Profile};
use crate::error::{FsError, FsResult};

const SHORT_EXTENSION_LEN: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Token {
    Char(char),
    One,
    Many,
}

#[derive(Clone, Debug)]
enum Rule {
    Everything,
    Glob(Vec<Token>),
    ShortExtension {
        full: Vec<Token>,
        stem: Vec<Token>,
        extension: Vec<char>,
    },
    NoExtension {
        stem: Vec<Token>,
    },
}

/// A compiled search pattern
#[derive(Clone, Debug)]
pub struct SearchPattern {
    raw: String,
    directory: Option<String>,
    rule: Rule,
    case: CaseSensitivity,
}

impl SearchPattern {
    /// Compile `pattern`. A leading directory part (`sub\*.txt`) is kept
    /// aside for the caller; only the final component is matched.
    pub fn compile(pattern: &str, profile: Profile, case: CaseSensitivity) -> FsResult<Self> {
        validate(pattern, profile)?;

        let (directory, file_part) = match pattern.rfind(|c| profile.is_separator(c)) {
            Some(idx) => (Some(pattern[..idx].to_string()), &pattern[idx + 1..]),
            None => (None, pattern),
        };
        let directory = directory.filter(|d| !d.is_empty());

        let folded = fold(file_part, case);
        let rule = if folded.is_empty()
            || folded == "*"
            || (profile == Profile::Windows && folded == "*.*")
        {
            Rule::Everything
        } else if let Some(stem) = folded.strip_suffix('.') {
            Rule::NoExtension {
                stem: tokenize(stem),
            }
        } else {
            match folded.rsplit_once('.') {
                Some((stem, ext))
                    if ext.chars().count() == SHORT_EXTENSION_LEN
                        && !ext.contains(['*', '?']) =>
                {
                    Rule::ShortExtension {
                        full: tokenize(&folded),
                        stem: tokenize(stem),
                        extension: ext.chars().collect(),
                    }
                }
                _ => Rule::Glob(tokenize(&folded)),
            }
        };

        Ok(Self {
            raw: pattern.to_string(),
            directory,
            rule,
            case,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Directory prefix that preceded the final pattern component, if any.
    pub fn directory(&self) -> Option<&str> {
        self.directory.as_deref()
    }

    pub fn matches(&self, file_name: &str) -> bool {
        let name: Vec<char> = fold(file_name, self.case).chars().collect();
        match &self.rule {
            Rule::Everything => true,
            Rule::Glob(tokens) => glob_match(tokens, &name),
            Rule::ShortExtension {
                full,
                stem,
                extension,
            } => {
                if glob_match(full, &name) {
                    return true;
                }
                let Some(dot) = name.iter().rposition(|c| *c == '.') else {
                    return false;
                };
                let name_ext = &name[dot + 1..];
                name_ext.len() > SHORT_EXTENSION_LEN
                    && name_ext.starts_with(extension)
                    && glob_match(stem, &name[..dot])
            }
            Rule::NoExtension { stem } => {
                let bare = name.strip_suffix(&['.']).unwrap_or(&name[..]);
                !bare.contains(&'.') && glob_match(stem, bare)
            }
        }
    }
}

fn validate(pattern: &str, profile: Profile) -> FsResult<()> {
    if pattern.chars().any(|c| profile.is_illegal_pattern_char(c)) {
        return Err(FsError::IllegalCharacters);
    }
    if pattern.ends_with("..") {
        return Err(FsError::invalid_argument(
            "Search pattern cannot end with \"..\".",
        ));
    }
    if pattern.contains("..\\") || pattern.contains("../") {
        return Err(FsError::invalid_argument(
            "Search pattern cannot contain \"..\" to move up directories and can be contained only internally in file/directory names, as in \"a..b\".",
        ));
    }
    Ok(())
}

fn fold(s: &str, case: CaseSensitivity) -> String {
    match case {
        CaseSensitivity::Sensitive => s.to_string(),
        CaseSensitivity::InsensitivePreserving => s.to_lowercase(),
    }
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let mut tokens: Vec<Token> = Vec::with_capacity(pattern.len());
    for c in pattern.chars() {
        let token = match c {
            '*' => Token::Many,
            '?' => Token::One,
            c => Token::Char(c),
        };
        // Consecutive stars are equivalent to one.
        if token == Token::Many && tokens.last() == Some(&Token::Many) {
            continue;
        }
        tokens.push(token);
    }
    tokens
}

fn glob_match(pattern: &[Token], name: &[char]) -> bool {
    let (mut p, mut n) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while n < name.len() {
        match pattern.get(p) {
            Some(Token::Many) => {
                backtrack = Some((p, n));
                p += 1;
            }
            Some(Token::One) => {
                p += 1;
                n += 1;
            }
            Some(Token::Char(c)) if *c == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match backtrack {
                Some((star_p, star_n)) => {
                    p = star_p + 1;
                    n = star_n + 1;
                    backtrack = Some((star_p, star_n + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|t| *t == Token::Many)
}
