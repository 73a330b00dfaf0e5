//! Canonical slugs and branch names for environments.
//!
//! The branch name is a pure function of the input. Truncation to the first
//! five words can make two different contexts share a slug; the reconciler
//! resolves that with [`Identifier::with_suffix`] and the recorded source key.

use crate::errors::DuxError;
use crate::types::{CONTEXT_BRANCH_PREFIX, ISSUE_BRANCH_PREFIX};

pub const MAX_SLUG_WORDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub slug: String,
    pub branch: String,
    /// Untruncated identity; stored as `dux.source` on the worktree.
    pub source_key: String,
    pub issue: Option<u64>,
}

impl Identifier {
    /// Same source, disambiguated branch: `work/<slug>-<n>`.
    pub fn with_suffix(&self, n: u32) -> Identifier {
        if n <= 1 {
            return self.clone();
        }
        let slug = format!("{}-{n}", self.slug);
        Identifier {
            branch: branch_for(self.issue, &slug),
            slug,
            source_key: self.source_key.clone(),
            issue: self.issue,
        }
    }
}

/// Lower-cases, collapses every run of non-alphanumeric characters into one
/// hyphen and strips hyphens at both ends.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_hyphen = false;
    for ch in text.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(ch);
        } else {
            pending_hyphen = true;
        }
    }
    slug
}

fn first_words(text: &str, limit: usize) -> String {
    text.split_whitespace()
        .take(limit)
        .collect::<Vec<_>>()
        .join(" ")
}

fn branch_for(issue: Option<u64>, slug: &str) -> String {
    match issue {
        Some(_) => format!("{ISSUE_BRANCH_PREFIX}/{slug}"),
        None => format!("{CONTEXT_BRANCH_PREFIX}/{slug}"),
    }
}

/// `issue` with its title, or free-text context when `issue` is `None`.
pub fn normalize(issue: Option<u64>, text: &str) -> Result<Identifier, DuxError> {
    let full = slugify(text);
    if full.is_empty() {
        return Err(DuxError::InvalidIdentifier(format!(
            "{:?} has no letters or digits to build a branch name from",
            text.trim()
        )));
    }
    // Leading words may be pure punctuation; the whole text is used then.
    let truncated = match slugify(&first_words(text, MAX_SLUG_WORDS)) {
        slug if slug.is_empty() => full.clone(),
        slug => slug,
    };

    let (slug, source_key) = match issue {
        Some(number) => (format!("{number}-{truncated}"), format!("issue:{number}")),
        None => (truncated, format!("context:{full}")),
    };

    Ok(Identifier {
        branch: branch_for(issue, &slug),
        slug,
        source_key,
        issue,
    })
}

/// Branch an older naming scheme used for issues: the whole title, untruncated.
/// `None` when it would equal the current branch.
pub fn legacy_issue_identifier(number: u64, title: &str) -> Option<Identifier> {
    let full = slugify(title);
    if full.is_empty() {
        return None;
    }
    let current = normalize(Some(number), title).ok()?;
    let slug = format!("{number}-{full}");
    if slug == current.slug {
        return None;
    }
    Some(Identifier {
        branch: branch_for(Some(number), &slug),
        slug,
        source_key: current.source_key,
        issue: Some(number),
    })
}
