use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

pub type Labels = BTreeMap<String, String>;

/// Deserializes a field that the Engine API may send as `null`, yielding the
/// type's default instead.
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

