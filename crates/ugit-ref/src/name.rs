use std::fmt;

use bstr::{BStr, BString, ByteSlice};

use crate::error::RefError;

/// A validated reference name, per `git-check-ref-format` rules.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefName(BString);

const FORBIDDEN_CHARS: &[u8] = b" ~^:?*[\\";

/// Pseudo-refs valid without a `/` component.
const SPECIAL_REFS: &[&str] = &[
    "HEAD",
    "ORIG_HEAD",
    "FETCH_HEAD",
    "MERGE_HEAD",
    "CHERRY_PICK_HEAD",
];

impl RefName {
    pub fn new(name: impl Into<BString>) -> Result<Self, RefError> {
        let name = name.into();
        validate(name.as_bstr())?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        // validate() rejects non-ASCII-safe bytes, so this cannot fail.
        std::str::from_utf8(&self.0).expect("validated ref name")
    }

    pub fn as_bstr(&self) -> &BStr {
        self.0.as_bstr()
    }

    /// `main` from `refs/heads/main`; unchanged for pseudo-refs.
    pub fn short_name(&self) -> &str {
        let s = self.as_str();
        for prefix in ["refs/heads/", "refs/tags/", "refs/remotes/"] {
            if let Some(rest) = s.strip_prefix(prefix) {
                return rest;
            }
        }
        s
    }

    pub fn is_branch(&self) -> bool {
        self.0.starts_with(b"refs/heads/")
    }

    pub fn is_tag(&self) -> bool {
        self.0.starts_with(b"refs/tags/")
    }

    pub fn is_remote(&self) -> bool {
        self.0.starts_with(b"refs/remotes/")
    }

    /// Pseudo-refs (`HEAD` and friends) are worktree-private.
    pub fn is_pseudo(&self) -> bool {
        !self.0.contains(&b'/')
    }

    /// The branch ref for a short branch name.
    pub fn branch(short: &str) -> Result<Self, RefError> {
        Self::new(format!("refs/heads/{short}"))
    }

    /// The tag ref for a short tag name.
    pub fn tag(short: &str) -> Result<Self, RefError> {
        Self::new(format!("refs/tags/{short}"))
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RefName {
    type Err = RefError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

fn validate(name: &BStr) -> Result<(), RefError> {
    let err = |reason: &str| {
        Err(RefError::InvalidName(format!(
            "'{}': {reason}",
            name.to_str_lossy()
        )))
    };

    if name.is_empty() {
        return err("empty name");
    }
    if name.first() == Some(&b'/') || name.last() == Some(&b'/') {
        return err("leading or trailing slash");
    }
    if name.find(b"//").is_some() {
        return err("double slash");
    }
    if name.find(b"..").is_some() {
        return err("double dot");
    }
    if name.find(b"@{").is_some() {
        return err("contains @{");
    }
    if name.as_bytes() == b"@" {
        return err("bare @");
    }
    if name.last() == Some(&b'.') {
        return err("trailing dot");
    }
    for component in name.split(|&b| b == b'/') {
        if component.starts_with(b".") {
            return err("component starts with dot");
        }
        if component.ends_with(b".lock") {
            return err("component ends with .lock");
        }
    }
    for &b in name.iter() {
        if b < 0x20 || b == 0x7f || FORBIDDEN_CHARS.contains(&b) {
            return err("forbidden character");
        }
    }
    if !name.contains(&b'/') {
        let s = name.to_str_lossy();
        if !SPECIAL_REFS.contains(&s.as_ref()) {
            return err("single-level name is not a recognized pseudo-ref");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn good_names() {
        for name in [
            "HEAD",
            "refs/heads/main",
            "refs/heads/feature/nested",
            "refs/tags/v1.0.0",
            "refs/remotes/origin/main",
            "refs/stash",
            "MERGE_HEAD",
        ] {
            assert!(RefName::new(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn bad_names() {
        for name in [
            "",
            "main",             // not a pseudo-ref, no slash
            "refs/heads/",      // trailing slash
            "/refs/heads/x",    // leading slash
            "refs//heads",      // double slash
            "refs/heads/a..b",  // double dot
            "refs/heads/a.lock",
            "refs/heads/.hidden",
            "refs/heads/a b",
            "refs/heads/a^b",
            "refs/heads/a:b",
            "refs/heads/end.",
            "refs/heads/a@{1}",
            "@",
        ] {
            assert!(RefName::new(name).is_err(), "{name}");
        }
    }

    #[test]
    fn short_names() {
        assert_eq!(RefName::new("refs/heads/main").unwrap().short_name(), "main");
        assert_eq!(RefName::new("refs/tags/v1").unwrap().short_name(), "v1");
        assert_eq!(
            RefName::new("refs/remotes/origin/dev").unwrap().short_name(),
            "origin/dev"
        );
        assert_eq!(RefName::new("HEAD").unwrap().short_name(), "HEAD");
    }

    #[test]
    fn classification() {
        assert!(RefName::new("refs/heads/main").unwrap().is_branch());
        assert!(RefName::new("refs/tags/v1").unwrap().is_tag());
        assert!(RefName::new("refs/remotes/o/m").unwrap().is_remote());
        assert!(RefName::new("HEAD").unwrap().is_pseudo());
        assert!(!RefName::new("refs/heads/main").unwrap().is_pseudo());
    }

    #[test]
    fn constructors() {
        assert_eq!(
            RefName::branch("main").unwrap().as_str(),
            "refs/heads/main"
        );
        assert_eq!(RefName::tag("v2").unwrap().as_str(), "refs/tags/v2");
    }
}
