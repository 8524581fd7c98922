//! Helpers to convert raw data coming from the BPF side.

use std::{any, ffi::CStr, mem};

use anyhow::{bail, Result};
use plain::Plain;

/// Check a raw payload validity and copy it into a structured type. Payloads
/// coming from perf buffers can be padded, so they only need to be at least as
/// large as the target type.
pub(crate) fn parse_raw<T: Plain + Default>(data: &[u8]) -> Result<T> {
    if data.len() < mem::size_of::<T>() {
        bail!(
            "Raw data {} is too small ({} < {})",
            any::type_name::<T>(),
            data.len(),
            mem::size_of::<T>()
        );
    }

    let mut raw = T::default();
    if let Err(e) = plain::copy_from_bytes(&mut raw, data) {
        bail!("Can't read {}: {e:?}", any::type_name::<T>());
    }
    Ok(raw)
}

/// Convert a NULL terminated C string into a String.
pub(crate) fn raw_to_string(raw: &[u8]) -> Result<String> {
    match CStr::from_bytes_until_nul(raw) {
        Ok(cstr) => Ok(cstr.to_string_lossy().into_owned()),
        Err(_) => bail!("String is not NULL terminated"),
    }
}
