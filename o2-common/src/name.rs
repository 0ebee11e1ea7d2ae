//! Ensemble and service name validation (spec §3 invariants).
use crate::error::{Error, Result};

/// Maximum length of an ensemble name, in bytes (spec §6).
pub const MAX_ENSEMBLE_NAME_LEN: usize = 1020;

/// An application scope: peers only communicate within the same ensemble.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EnsembleName(String);

impl EnsembleName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_ENSEMBLE_NAME_LEN {
            return Err(Error::BadServiceName);
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A named endpoint within an ensemble (spec §3). Contains no `/`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceName(String);

impl ServiceName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.contains('/') {
            return Err(Error::BadServiceName);
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServiceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for EnsembleName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split an O2 address (`/service/rest...`) into its service name and the
/// remainder, per spec §4.5 step 1 ("split the address after the first `/`").
pub fn split_address(address: &str) -> Result<(&str, &str)> {
    let rest = address.strip_prefix('/').ok_or(Error::BadAddress)?;
    match rest.find('/') {
        Some(i) => Ok((&rest[..i], &rest[i..])),
        None => Ok((rest, "")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_slash_in_service_name() {
        assert_eq!(ServiceName::new("a/b"), Err(Error::BadServiceName));
        assert_eq!(ServiceName::new(""), Err(Error::BadServiceName));
        assert!(ServiceName::new("synth").is_ok());
    }

    #[test]
    fn splits_address_after_first_segment() {
        let (service, rest) = split_address("/synth/note").unwrap();
        assert_eq!(service, "synth");
        assert_eq!(rest, "/note");

        let (service, rest) = split_address("/synth").unwrap();
        assert_eq!(service, "synth");
        assert_eq!(rest, "");

        assert_eq!(split_address("synth"), Err(Error::BadAddress));
    }
}
