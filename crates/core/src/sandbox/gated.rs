use crate::error::{Error, Result};

/// A capability that is either wired in or replaced by a failing stub.
///
/// Disabled capabilities stay present in the binding set so that source
/// touching them fails with a descriptive error instead of a missing name.
#[derive(Debug, Clone)]
pub enum Gated<T> {
    Enabled(T),
    Disabled(&'static str),
}

impl<T> Gated<T> {
    pub fn access(&self) -> Result<&T> {
        match self {
            Gated::Enabled(inner) => Ok(inner),
            Gated::Disabled(capability) => Err(Error::CapabilityDisabled { capability }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Gated::Enabled(_))
    }

    pub(crate) fn disabled_name(&self) -> Option<&'static str> {
        match self {
            Gated::Enabled(_) => None,
            Gated::Disabled(capability) => Some(capability),
        }
    }
}
