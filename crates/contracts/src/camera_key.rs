//! CameraKey - composite `<device_id>_<camera_id>` identifier
//!
//! Uses Arc<str> internally for O(1) clone operations.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

/// Identifier of one camera on one device.
///
/// Keys are built once per image submission and then cloned into the
/// session's collection map, status views and pair keys, so cloning only
/// bumps a reference count.
///
/// # Examples
/// ```
/// use contracts::CameraKey;
///
/// let key = CameraKey::new("devA", "cam0");
/// assert_eq!(key.as_str(), "devA_cam0");
/// assert_eq!(key, CameraKey::from("devA_cam0"));
/// ```
#[derive(Clone, Default)]
pub struct CameraKey(Arc<str>);

impl CameraKey {
    /// Compose the key for `camera_id` on `device_id`.
    #[inline]
    pub fn new(device_id: &str, camera_id: &str) -> Self {
        Self(Arc::from(format!("{device_id}_{camera_id}")))
    }

    /// Get the underlying string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for CameraKey {
    type Target = str;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for CameraKey {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CameraKey {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CameraKey {
    #[inline]
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for CameraKey {
    #[inline]
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for CameraKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for CameraKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CameraKey({:?})", self.0)
    }
}

impl PartialEq for CameraKey {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for CameraKey {}

impl PartialEq<str> for CameraKey {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.0.as_ref() == other
    }
}

impl PartialEq<&str> for CameraKey {
    #[inline]
    fn eq(&self, other: &&str) -> bool {
        self.0.as_ref() == *other
    }
}

impl PartialOrd for CameraKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CameraKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

// Hash - same as str hash so maps can be queried with &str
impl Hash for CameraKey {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl Serialize for CameraKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CameraKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_composition() {
        let key = CameraKey::new("devA", "cam0");
        assert_eq!(key, "devA_cam0");
    }

    #[test]
    fn test_hashmap_lookup_by_str() {
        let mut map: HashMap<CameraKey, usize> = HashMap::new();
        map.insert(CameraKey::new("devA", "cam1"), 3);
        assert_eq!(map.get("devA_cam1"), Some(&3));
    }

    #[test]
    fn test_ordering() {
        let mut keys = vec![
            CameraKey::from("b_cam0"),
            CameraKey::from("a_cam1"),
            CameraKey::from("a_cam0"),
        ];
        keys.sort();
        assert_eq!(keys[0], "a_cam0");
        assert_eq!(keys[2], "b_cam0");
    }

    #[test]
    fn test_serde() {
        let key = CameraKey::new("d", "c");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"d_c\"");
        let parsed: CameraKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);
    }
}
