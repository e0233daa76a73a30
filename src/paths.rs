use anyhow::Result;
use std::{env, path::PathBuf};

/// Default project configuration file, looked up in the working directory.
pub const DEFAULT_CONFIG: &str = "revsync.toml";

#[derive(Clone, Debug)]
pub struct Paths {
    /// Local clones of remote repositories, one directory per repository.
    pub clones: PathBuf,
}

/// Root of revsync's cached state: `$XDG_CACHE_HOME/revsync`, falling back to
/// `~/.cache/revsync`.
pub fn revsync_home() -> Result<PathBuf> {
    let xdg = env::var_os("XDG_CACHE_HOME").filter(|v| !v.is_empty());
    let base = xdg
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(env::var_os("HOME").unwrap_or_default()).join(".cache"));
    Ok(base.join("revsync"))
}

/// Locations used by the project named `project`.
pub fn paths(project: &str) -> Result<Paths> {
    let home = revsync_home()?;
    Ok(Paths {
        clones: home.join("clones").join(project),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn honours_xdg_cache_home() {
        let prev = env::var_os("XDG_CACHE_HOME");
        // SAFETY: serialized with every other test touching the environment.
        unsafe { env::set_var("XDG_CACHE_HOME", "/tmp/xdg-test") };
        let p = paths("proj").unwrap();
        assert_eq!(p.clones, PathBuf::from("/tmp/xdg-test/revsync/clones/proj"));
        match prev {
            Some(v) => unsafe { env::set_var("XDG_CACHE_HOME", v) },
            None => unsafe { env::remove_var("XDG_CACHE_HOME") },
        }
    }

    #[test]
    #[serial]
    fn falls_back_to_home_cache() {
        let prev_xdg = env::var_os("XDG_CACHE_HOME");
        let prev_home = env::var_os("HOME");
        unsafe {
            env::remove_var("XDG_CACHE_HOME");
            env::set_var("HOME", "/home/someone");
        }
        assert_eq!(
            revsync_home().unwrap(),
            PathBuf::from("/home/someone/.cache/revsync")
        );
        unsafe {
            if let Some(v) = prev_xdg {
                env::set_var("XDG_CACHE_HOME", v);
            }
            match prev_home {
                Some(v) => env::set_var("HOME", v),
                None => env::remove_var("HOME"),
            }
        }
    }
}
