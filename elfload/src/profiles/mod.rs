//! # Profiles
//!
//! Profiles are YAML files providing default values for the collect options.

pub(crate) mod profile;
pub(crate) use profile::*;
