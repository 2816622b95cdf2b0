// 🗂️ Filing - move processed source files into their outcome folders
//
//   1已登记    fresh serial, renamed "{serial:04}、{stem}({acquire_time}){ext}"
//   3重复账号  known entity, renamed the same way with the existing serial
//   2被跳过    unreadable or anonymous, original name kept
//
// Name collisions get "_2", "_3", ... before the extension.

use crate::error::Result;
use crate::normalizer::sanitize_filename;
use crate::retry::{retry, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bucket {
    Registered,
    Skipped,
    Duplicate,
}

/// Folder names for each bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketNames {
    pub registered: String,
    pub skipped: String,
    pub duplicate: String,
}

impl Default for BucketNames {
    fn default() -> Self {
        BucketNames {
            registered: "1已登记".to_string(),
            skipped: "2被跳过".to_string(),
            duplicate: "3重复账号".to_string(),
        }
    }
}

impl BucketNames {
    pub fn all(&self) -> [&str; 3] {
        [
            self.registered.as_str(),
            self.skipped.as_str(),
            self.duplicate.as_str(),
        ]
    }
}

/// Outcome folders under the working directory
#[derive(Debug, Clone)]
pub struct Buckets {
    root: PathBuf,
    names: BucketNames,
}

impl Buckets {
    pub fn new(root: impl Into<PathBuf>, names: BucketNames) -> Self {
        Buckets {
            root: root.into(),
            names,
        }
    }

    pub fn dir(&self, bucket: Bucket) -> PathBuf {
        let name = match bucket {
            Bucket::Registered => &self.names.registered,
            Bucket::Skipped => &self.names.skipped,
            Bucket::Duplicate => &self.names.duplicate,
        };
        self.root.join(name)
    }

    pub fn ensure(&self) -> Result<()> {
        for bucket in [Bucket::Registered, Bucket::Skipped, Bucket::Duplicate] {
            fs::create_dir_all(self.dir(bucket))?;
        }
        Ok(())
    }

    pub fn names(&self) -> &BucketNames {
        &self.names
    }
}

// ============================================================================
// NAMING
// ============================================================================

/// "{serial:04}、{stem}({acquire_time})" without extension
pub fn registered_stem(serial: u32, stem: &str, acquire_time: &str) -> String {
    format!("{:04}、{}({})", serial, stem, acquire_time)
}

/// First free sanitized name in `dir`; `extension` includes the dot.
pub fn unique_target(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let first = dir.join(sanitize_filename(&format!("{}{}", stem, extension)));
    if !first.exists() {
        return first;
    }
    (2u32..)
        .map(|k| dir.join(sanitize_filename(&format!("{}_{}{}", stem, k, extension))))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

pub fn split_name(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (stem, extension)
}

// ============================================================================
// MOVING
// ============================================================================

/// Rename, falling back to copy + delete across file systems.
fn move_file(source: &Path, target: &Path) -> io::Result<()> {
    match fs::rename(source, target) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if !source.exists() {
                return Err(rename_err);
            }
            fs::copy(source, target)?;
            fs::remove_file(source)
        }
    }
}

/// Move `source` into `bucket`, renamed with its serial when one is given.
/// Returns the final path.
pub fn file_into(
    buckets: &Buckets,
    source: &Path,
    bucket: Bucket,
    serial: Option<u32>,
    acquire_time: &str,
    policy: &RetryPolicy,
) -> std::result::Result<PathBuf, io::Error> {
    let dir = buckets.dir(bucket);
    let (stem, extension) = split_name(source);
    let stem = match serial {
        Some(serial) => registered_stem(serial, &stem, acquire_time),
        None => stem,
    };

    let label = format!("移动 {}", source.display());
    retry(policy, &label, |_| {
        let target = unique_target(&dir, &stem, &extension);
        move_file(source, &target).map(|_| target)
    })
    .map(|target| {
        debug!("{} -> {}", source.display(), target.display());
        target
    })
    .map_err(|e| e.last)
}
