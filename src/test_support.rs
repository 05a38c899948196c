//! Fixtures shared by pipeline tests

use crate::config::VaultConfig;
use crate::Result;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Config rooted in `base`, with an environment key variable nobody sets
pub fn test_config(base: &Path) -> VaultConfig {
    VaultConfig {
        key_env: "SECUREVAULT_KEY_UNSET_IN_TESTS".to_string(),
        ..VaultConfig::rooted_at(base)
    }
}

/// `a.txt` = "hello", `sub/b.txt` = "world"
pub fn sample_source(source: &Path) -> Result<()> {
    fs::create_dir_all(source.join("sub"))?;
    fs::write(source.join("a.txt"), "hello")?;
    fs::write(source.join("sub/b.txt"), "world")?;
    Ok(())
}

/// Relative path → content for every regular file under `root`
pub fn tree_contents(root: &Path) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut contents = BTreeMap::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| crate::Error::Io(e.into()))?;
        if entry.file_type().is_file() {
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            contents.insert(
                relative.to_string_lossy().replace('\\', "/"),
                fs::read(entry.path())?,
            );
        }
    }
    Ok(contents)
}
