//! Repository initialization.

use ugit_config::{Config, ConfigFile, ConfigScope};
use ugit_hash::HashAlgorithm;
use ugit_store::Storage;

use crate::RepoError;

/// Options for `init`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub bare: bool,
    pub object_format: HashAlgorithm,
    pub default_branch: String,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            bare: false,
            object_format: HashAlgorithm::Sha1,
            default_branch: "main".to_string(),
        }
    }
}

/// Lay down the skeleton of a fresh git directory into `storage`.
///
/// SHA-256 repositories record `extensions.objectFormat` and bump
/// `core.repositoryformatversion` to 1, matching stock git.
pub fn init_git_dir(storage: &dyn Storage, options: &InitOptions) -> Result<Config, RepoError> {
    if storage.has("HEAD") {
        return Err(RepoError::AlreadyInitialized);
    }

    let mut local = ConfigFile::default();
    let format_version = if options.object_format == HashAlgorithm::Sha256 {
        "1"
    } else {
        "0"
    };
    local.set("core.repositoryformatversion", format_version);
    local.set("core.filemode", "true");
    local.set("core.bare", if options.bare { "true" } else { "false" });
    local.set("core.logallrefupdates", if options.bare { "false" } else { "true" });
    if options.object_format == HashAlgorithm::Sha256 {
        local.set("extensions.objectformat", options.object_format.name());
    }
    storage.write("config", &local.serialize())?;

    storage.write(
        "HEAD",
        format!("ref: refs/heads/{}\n", options.default_branch).as_bytes(),
    )?;
    storage.write(
        "description",
        b"Unnamed repository; edit this file 'description' to name the repository.\n",
    )?;
    storage.write("info/exclude", b"# per-repository ignore patterns\n")?;

    let mut config = Config::new();
    config.set_layer(ConfigScope::Local, local);
    Ok(config)
}
