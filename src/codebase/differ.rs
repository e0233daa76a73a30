use anyhow::Result;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::Path;

use super::Codebase;

/// Compares two codebases file by file.
#[derive(Debug, Default, Clone, Copy)]
pub struct CodebaseDiffer;

impl CodebaseDiffer {
    /// Relative paths that are missing on one side, or whose executability or
    /// content differs, sorted.
    pub fn differing_files(&self, a: &Codebase, b: &Codebase) -> Result<Vec<String>> {
        let files_a = a.relative_files()?;
        let files_b = b.relative_files()?;

        let mut differing: Vec<String> = files_a
            .symmetric_difference(&files_b)
            .cloned()
            .collect();

        let common: Vec<&String> = files_a.intersection(&files_b).collect();
        let changed: Result<Vec<Option<String>>> = common
            .par_iter()
            .map(|rel| {
                let (fa, fb) = (a.file(rel), b.file(rel));
                let same = is_executable(&fa)? == is_executable(&fb)?
                    && sha256_file(&fa)? == sha256_file(&fb)?;
                Ok((!same).then(|| rel.to_string()))
            })
            .collect();
        differing.extend(changed?.into_iter().flatten());
        differing.sort();
        Ok(differing)
    }

    pub fn are_different(&self, a: &Codebase, b: &Codebase) -> Result<bool> {
        Ok(!self.differing_files(a, b)?.is_empty())
    }

    /// Content comparison of two single files.
    pub fn files_differ(&self, a: &Path, b: &Path) -> Result<bool> {
        Ok(sha256_file(a)? != sha256_file(b)?)
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> Result<bool> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::metadata(path)?.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> Result<bool> {
    Ok(false)
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut f = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
