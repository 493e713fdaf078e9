#![allow(dead_code)]

use std::ffi::OsString;

/// Sets an environment variable for the life of the guard, restoring the
/// previous value (or absence) on drop. Pair with `#[serial]`.
pub struct EnvGuard {
    key: String,
    previous: Option<OsString>,
}

impl EnvGuard {
    pub fn set(key: &str, value: impl AsRef<std::ffi::OsStr>) -> Self {
        let previous = std::env::var_os(key);
        // SAFETY: tests touching the process environment run under #[serial].
        unsafe { std::env::set_var(key, value) };
        Self {
            key: key.to_string(),
            previous,
        }
    }

    pub fn unset(key: &str) -> Self {
        let previous = std::env::var_os(key);
        // SAFETY: as above.
        unsafe { std::env::remove_var(key) };
        Self {
            key: key.to_string(),
            previous,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        // SAFETY: as above.
        unsafe {
            match &self.previous {
                Some(v) => std::env::set_var(&self.key, v),
                None => std::env::remove_var(&self.key),
            }
        }
    }
}
