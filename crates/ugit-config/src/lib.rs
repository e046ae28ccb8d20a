//! Git configuration: INI files layered across scopes.
//!
//! Scopes apply in precedence order system < global < local < worktree;
//! within one file, later assignments win. Lookup keys are
//! `section.key` or `section.subsection.key` (section and variable names
//! case-insensitive, subsections case-sensitive).

mod file;
mod types;

use bstr::{BStr, BString};

pub use file::ConfigFile;
pub use types::{AutoCrlf, ConflictStyle, MergeFf};

use ugit_hash::HashAlgorithm;

/// Errors from configuration parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Configuration scope, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigScope {
    System,
    Global,
    Local,
    Worktree,
}

/// Layered view over per-scope config files.
#[derive(Debug, Default)]
pub struct Config {
    /// Kept sorted by scope so iteration visits lowest precedence first.
    layers: Vec<(ConfigScope, ConfigFile)>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) one scope's file.
    pub fn set_layer(&mut self, scope: ConfigScope, file: ConfigFile) {
        self.layers.retain(|(s, _)| *s != scope);
        let pos = self
            .layers
            .iter()
            .position(|(s, _)| *s > scope)
            .unwrap_or(self.layers.len());
        self.layers.insert(pos, (scope, file));
    }

    pub fn layer(&self, scope: ConfigScope) -> Option<&ConfigFile> {
        self.layers
            .iter()
            .find(|(s, _)| *s == scope)
            .map(|(_, f)| f)
    }

    pub fn layer_mut(&mut self, scope: ConfigScope) -> &mut ConfigFile {
        if self.layer(scope).is_none() {
            self.set_layer(scope, ConfigFile::default());
        }
        self.layers
            .iter_mut()
            .find(|(s, _)| *s == scope)
            .map(|(_, f)| f)
            .expect("layer just ensured")
    }

    /// Highest-precedence value for `key`.
    pub fn get(&self, key: &str) -> Option<&BStr> {
        self.layers
            .iter()
            .rev()
            .find_map(|(_, file)| file.get(key))
    }

    /// Every value for `key`, lowest precedence first.
    pub fn get_all(&self, key: &str) -> Vec<&BStr> {
        self.layers
            .iter()
            .flat_map(|(_, file)| file.get_all(key))
            .collect()
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| String::from_utf8_lossy(v).into_owned())
    }

    /// Git boolean semantics: true/yes/on/1 and false/no/off/0/empty.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        let value = self.get(key)?;
        let lower = value.to_ascii_lowercase();
        match lower.as_slice() {
            b"true" | b"yes" | b"on" | b"1" => Some(true),
            b"false" | b"no" | b"off" | b"0" | b"" => Some(false),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        std::str::from_utf8(self.get(key)?).ok()?.trim().parse().ok()
    }

    /// Set in the given scope (creating the layer if needed).
    pub fn set(&mut self, scope: ConfigScope, key: &str, value: impl Into<BString>) {
        self.layer_mut(scope).set(key, value);
    }

    // Typed accessors for the keys the core consumes.

    pub fn repository_format_version(&self) -> i64 {
        self.get_i64("core.repositoryformatversion").unwrap_or(0)
    }

    pub fn is_bare(&self) -> bool {
        self.get_bool("core.bare").unwrap_or(false)
    }

    pub fn file_mode(&self) -> bool {
        self.get_bool("core.filemode").unwrap_or(true)
    }

    pub fn symlinks(&self) -> bool {
        self.get_bool("core.symlinks").unwrap_or(true)
    }

    pub fn log_all_ref_updates(&self) -> bool {
        // Defaults on for repositories with a worktree.
        self.get_bool("core.logallrefupdates").unwrap_or(!self.is_bare())
    }

    pub fn object_format(&self) -> HashAlgorithm {
        self.get_str("extensions.objectformat")
            .and_then(|v| HashAlgorithm::from_name(&v))
            .unwrap_or_default()
    }

    pub fn auto_crlf(&self) -> AutoCrlf {
        self.get_str("core.autocrlf")
            .and_then(|v| AutoCrlf::from_value(&v))
            .unwrap_or_default()
    }

    pub fn safe_crlf(&self) -> bool {
        self.get_bool("core.safecrlf").unwrap_or(false)
    }

    pub fn conflict_style(&self) -> ConflictStyle {
        self.get_str("merge.conflictstyle")
            .and_then(|v| ConflictStyle::from_name(&v))
            .unwrap_or_default()
    }

    pub fn merge_ff(&self) -> MergeFf {
        match self.get("merge.ff") {
            None => MergeFf::Allowed,
            Some(v) if v == "only" => MergeFf::Only,
            Some(_) => match self.get_bool("merge.ff") {
                Some(false) => MergeFf::Never,
                _ => MergeFf::Allowed,
            },
        }
    }

    pub fn user_name(&self) -> Option<String> {
        self.get_str("user.name")
    }

    pub fn user_email(&self) -> Option<String> {
        self.get_str("user.email")
    }

    pub fn remote_url(&self, remote: &str) -> Option<String> {
        self.get_str(&format!("remote.{remote}.url"))
    }

    pub fn remote_fetch_refspecs(&self, remote: &str) -> Vec<String> {
        self.get_all(&format!("remote.{remote}.fetch"))
            .into_iter()
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .collect()
    }

    pub fn branch_remote(&self, branch: &str) -> Option<String> {
        self.get_str(&format!("branch.{branch}.remote"))
    }

    pub fn branch_merge(&self, branch: &str) -> Option<String> {
        self.get_str(&format!("branch.{branch}.merge"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_local(text: &str) -> Config {
        let mut config = Config::new();
        config.set_layer(ConfigScope::Local, ConfigFile::parse(text.as_bytes()).unwrap());
        config
    }

    #[test]
    fn precedence_highest_scope_wins() {
        let mut config = Config::new();
        config.set_layer(
            ConfigScope::System,
            ConfigFile::parse(b"[user]\n\tname = System\n").unwrap(),
        );
        config.set_layer(
            ConfigScope::Local,
            ConfigFile::parse(b"[user]\n\tname = Local\n").unwrap(),
        );
        config.set_layer(
            ConfigScope::Global,
            ConfigFile::parse(b"[user]\n\tname = Global\n").unwrap(),
        );
        assert_eq!(config.user_name().as_deref(), Some("Local"));

        config.set(ConfigScope::Worktree, "user.name", "Worktree");
        assert_eq!(config.user_name().as_deref(), Some("Worktree"));
    }

    #[test]
    fn booleans() {
        let config = config_with_local(
            "[core]\n\tbare = yes\n\tfilemode = off\n[x]\n\tweird = maybe\n",
        );
        assert!(config.is_bare());
        assert!(!config.file_mode());
        assert_eq!(config.get_bool("x.weird"), None);
    }

    #[test]
    fn log_all_ref_updates_defaults_track_bareness() {
        assert!(config_with_local("[core]\n").log_all_ref_updates());
        assert!(!config_with_local("[core]\n\tbare = true\n").log_all_ref_updates());
        assert!(config_with_local("[core]\n\tbare = true\n\tlogallrefupdates = true\n")
            .log_all_ref_updates());
    }

    #[test]
    fn object_format() {
        assert_eq!(
            config_with_local("[extensions]\n\tobjectFormat = sha256\n").object_format(),
            HashAlgorithm::Sha256
        );
        assert_eq!(config_with_local("").object_format(), HashAlgorithm::Sha1);
    }

    #[test]
    fn merge_ff_values() {
        assert_eq!(config_with_local("").merge_ff(), MergeFf::Allowed);
        assert_eq!(
            config_with_local("[merge]\n\tff = false\n").merge_ff(),
            MergeFf::Never
        );
        assert_eq!(
            config_with_local("[merge]\n\tff = only\n").merge_ff(),
            MergeFf::Only
        );
    }

    #[test]
    fn remote_and_branch_lookup() {
        let config = config_with_local(
            "[remote \"origin\"]\n\
             \turl = https://example.com/repo.git\n\
             \tfetch = +refs/heads/*:refs/remotes/origin/*\n\
             [branch \"main\"]\n\
             \tremote = origin\n\
             \tmerge = refs/heads/main\n",
        );
        assert_eq!(
            config.remote_url("origin").as_deref(),
            Some("https://example.com/repo.git")
        );
        assert_eq!(
            config.remote_fetch_refspecs("origin"),
            vec!["+refs/heads/*:refs/remotes/origin/*"]
        );
        assert_eq!(config.branch_remote("main").as_deref(), Some("origin"));
        assert_eq!(config.branch_merge("main").as_deref(), Some("refs/heads/main"));
    }

    #[test]
    fn multivalued_keys_accumulate_across_scopes() {
        let mut config = Config::new();
        config.set_layer(
            ConfigScope::Global,
            ConfigFile::parse(b"[remote \"origin\"]\n\tfetch = +refs/heads/a:refs/remotes/origin/a\n")
                .unwrap(),
        );
        config.set_layer(
            ConfigScope::Local,
            ConfigFile::parse(b"[remote \"origin\"]\n\tfetch = +refs/heads/b:refs/remotes/origin/b\n")
                .unwrap(),
        );
        assert_eq!(config.remote_fetch_refspecs("origin").len(), 2);
    }
}
