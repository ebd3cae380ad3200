//! Selection of the suites and tests to run.

use std::{collections::BTreeSet, sync::Arc};

use glob::{MatchOptions, Pattern as Glob};
use hil_device::platform;
use regex::Regex;
use tracing::debug;

use crate::{Error, Result, suite::Suites};

/// Suffix of suite files.
pub const SUITE_FILE_SUFFIX: &str = ".spec";

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
enum Pattern {
    Regex(Regex),
    Literal(String),
}

/// Test name patterns. A test matches if any of the patterns matches its name; an empty set
/// matches everything.
///
/// Patterns are regular expressions. A pattern that fails to compile is compared literally.
#[derive(Debug, Clone, Default)]
pub struct Patterns(Vec<Pattern>);

impl Patterns {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        Self(
            patterns
                .iter()
                .map(|p| {
                    let p = p.as_ref();
                    match Regex::new(p) {
                        Ok(rx) => Pattern::Regex(rx),
                        Err(e) => {
                            debug!("Matching literally, not a regular expression: {p}: {e}");
                            Pattern::Literal(p.to_string())
                        }
                    }
                })
                .collect(),
        )
    }

    pub fn matches(&self, name: &str) -> bool {
        self.0.is_empty()
            || self.0.iter().any(|p| match p {
                Pattern::Regex(rx) => rx.is_match(name),
                Pattern::Literal(s) => s == name,
            })
    }
}

/// Parsed filter arguments.
///
/// A filter names a suite file, a directory of suite files, a suite tag or a platform tag.
/// Prefixed with `-`, it excludes what it names instead. `None` means that no filter of that kind
/// was given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters {
    pub files: Option<BTreeSet<String>>,
    pub platforms: Option<BTreeSet<u32>>,
    pub suite_tags: Option<BTreeSet<String>>,
    /// Keep suites without tags when filtering by suite tags
    pub include_untagged: bool,
}

impl Filters {
    /// Parse `filters` against the declared `suites`. `enabled` holds the ids of the platforms
    /// enabled on the station.
    pub fn parse<S: AsRef<str>>(
        filters: &[S],
        suites: &Suites,
        enabled: &BTreeSet<u32>,
    ) -> Result<Self> {
        let all_files = suites.files();
        let all_tags = suites.tags();
        let mut res = Self::default();

        for f in filters {
            let (f, exclude) = match f.as_ref().strip_prefix('-') {
                Some(x) => (x, true),
                None => (f.as_ref(), false),
            };

            if f.ends_with(SUITE_FILE_SUFFIX) {
                let files = find_files(&all_files, f)?;
                if files.is_empty() {
                    return Err(Error::Filter(format!("File not found: {f}")));
                }
                res.update_files(&all_files, files, exclude);
            } else if f.contains('/') {
                let dir = f.trim_end_matches('/');
                let files = find_files(&all_files, &dir_pattern(dir))?;
                if files.is_empty() {
                    return Err(Error::Filter(format!("Directory not found: {dir}")));
                }
                res.update_files(&all_files, files, exclude);
            } else if all_tags.contains(f) {
                res.update_suite_tags(&all_tags, f, exclude);
            } else if platform::is_known_tag(f) {
                let ids = platform::for_tag(f)?.iter().map(|p| p.id());
                let platforms = res.platforms.get_or_insert_with(|| {
                    if exclude {
                        enabled.clone()
                    } else {
                        BTreeSet::new()
                    }
                });
                if exclude {
                    ids.for_each(|id| {
                        platforms.remove(&id);
                    });
                } else {
                    platforms.extend(ids);
                }
            } else {
                let files = find_files(&all_files, &dir_pattern(f))?;
                if files.is_empty() {
                    return Err(Error::Filter(format!("Unrecognized filtering option: {f}")));
                }
                res.update_files(&all_files, files, exclude);
            }
        }

        Ok(res)
    }

    fn update_files(&mut self, all: &BTreeSet<String>, files: Vec<String>, exclude: bool) {
        let set = self.files.get_or_insert_with(|| {
            if exclude {
                all.clone()
            } else {
                BTreeSet::new()
            }
        });
        if exclude {
            for f in &files {
                set.remove(f);
            }
        } else {
            set.extend(files);
        }
    }

    fn update_suite_tags(&mut self, all: &BTreeSet<String>, tag: &str, exclude: bool) {
        if self.suite_tags.is_none() && exclude {
            self.include_untagged = true;
        }
        let set = self.suite_tags.get_or_insert_with(|| {
            if exclude {
                all.clone()
            } else {
                BTreeSet::new()
            }
        });
        if exclude {
            set.remove(tag);
        } else {
            set.insert(tag.to_string());
        }
    }

    /// Drop the suites that do not pass the filters and narrow the target platforms of the
    /// others.
    pub fn apply(&self, suites: &mut Suites) {
        if let Some(platforms) = &self.platforms {
            for suite in suites.iter_mut() {
                if suite.platforms.iter().any(|p| !platforms.contains(&p.id())) {
                    Arc::make_mut(suite)
                        .platforms
                        .retain(|p| platforms.contains(&p.id()));
                }
            }
        }

        suites.retain(|suite| {
            let file_match = self
                .files
                .as_ref()
                .is_none_or(|files| files.contains(&suite.file));
            let platform_match = !suite.platforms.is_empty();
            let tag_match = match &self.suite_tags {
                None => true,
                Some(_) if suite.tags.is_empty() => self.include_untagged,
                Some(tags) => suite.tags.iter().any(|t| tags.contains(t)),
            };

            file_match && platform_match && tag_match
        });
    }
}

fn dir_pattern(dir: &str) -> String {
    format!("{dir}/**/*{SUITE_FILE_SUFFIX}")
}

fn find_files(all: &BTreeSet<String>, pattern: &str) -> Result<Vec<String>> {
    let glob = Glob::new(pattern)?;
    Ok(all
        .iter()
        .filter(|f| *f == pattern || glob.matches_with(f, GLOB_OPTIONS))
        .cloned()
        .collect())
}
