//! Typed environment-variable access (`spec.md` §6): small named
//! wrappers over `std::env::var`, not a general configuration-file
//! parser (that remains out of scope).

use std::marker::PhantomData;
use std::str::FromStr;

use crate::error::ConfigError;

/// A typed, named environment variable. Reading it returns `None` when
/// unset and a [`ConfigError`] when set but unparseable.
pub struct EnvVar<T> {
    name: &'static str,
    _marker: PhantomData<T>,
}

impl<T: FromStr> EnvVar<T>
where
    T::Err: std::fmt::Display,
{
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn get(&self) -> Result<Option<T>, ConfigError> {
        match std::env::var(self.name) {
            Ok(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::InvalidMetadata {
                    target: crate::target::TargetId::new("env", "", self.name),
                    reason: e.to_string(),
                }),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => Ok(None),
        }
    }

    pub fn get_or(&self, default: T) -> Result<T, ConfigError> {
        Ok(self.get()?.unwrap_or(default))
    }
}

/// Names of the environment variables the core observes, per `spec.md`
/// §6.
pub static CACHE_DIR: EnvVar<String> = EnvVar::new("BUILDER_CACHE_DIR");
pub static ACTION_CACHE_MAX_SIZE: EnvVar<u64> = EnvVar::new("BUILDER_ACTION_CACHE_MAX_SIZE");
pub static ACTION_CACHE_MAX_ENTRIES: EnvVar<u64> = EnvVar::new("BUILDER_ACTION_CACHE_MAX_ENTRIES");
pub static ACTION_CACHE_MAX_AGE_DAYS: EnvVar<u64> = EnvVar::new("BUILDER_ACTION_CACHE_MAX_AGE_DAYS");
pub static PARALLEL: EnvVar<usize> = EnvVar::new("BUILDER_PARALLEL");
pub static CACHE_SIGNING_KEY: EnvVar<String> = EnvVar::new("BUILDER_CACHE_SIGNING_KEY");

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable tests must not run concurrently with each
    // other (std::env is process-global).
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn unset_var_is_none() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("KILN_TEST_UNSET");
        let v: EnvVar<u32> = EnvVar::new("KILN_TEST_UNSET");
        assert!(v.get().unwrap().is_none());
    }

    #[test]
    fn set_var_parses() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("KILN_TEST_NUM", "42");
        let v: EnvVar<u32> = EnvVar::new("KILN_TEST_NUM");
        assert_eq!(v.get().unwrap(), Some(42));
        std::env::remove_var("KILN_TEST_NUM");
    }

    #[test]
    fn invalid_var_errors() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("KILN_TEST_BAD", "not-a-number");
        let v: EnvVar<u32> = EnvVar::new("KILN_TEST_BAD");
        assert!(v.get().is_err());
        std::env::remove_var("KILN_TEST_BAD");
    }

    #[test]
    fn get_or_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("KILN_TEST_DEFAULT");
        let v: EnvVar<u32> = EnvVar::new("KILN_TEST_DEFAULT");
        assert_eq!(v.get_or(7).unwrap(), 7);
    }
}
