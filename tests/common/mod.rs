#![allow(dead_code)]

use sentinel_core::{EngineConfig, Sentinel};
use std::path::{Path, PathBuf};

pub fn config(root: &Path) -> EngineConfig {
    EngineConfig::with_root(root)
}

pub async fn open(root: &Path) -> Sentinel {
    Sentinel::open(config(root)).await.unwrap()
}

/// Write `contents` to `dir/name`, creating `dir`
pub fn write(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}
