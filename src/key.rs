use crate::FetchError;
use serde::Serialize;
use std::fmt;

/// Key under which a cached value is stored.
///
/// Keys are the JSON encoding of a dependency list, so two lists produce the same key exactly when
/// they hold the same values in the same order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_dependencies<D: Serialize + ?Sized>(dependencies: &D) -> Result<Self, FetchError> {
        serde_json::to_string(dependencies)
            .map(Self)
            .map_err(|error| FetchError::Dependencies(error.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
