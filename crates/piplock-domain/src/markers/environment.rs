use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Marker variables every environment is expected to answer.
pub const MARKER_KEYS: [&str; 11] = [
    "implementation_name",
    "implementation_version",
    "os_name",
    "platform_machine",
    "platform_python_implementation",
    "platform_release",
    "platform_system",
    "platform_version",
    "python_full_version",
    "python_version",
    "sys_platform",
];

/// Python snippet printing the marker environment of the running interpreter
/// as a JSON object keyed by [`MARKER_KEYS`].
pub const MARKER_ENV_SCRIPT: &str = r#"
import json, os, platform, sys

def _version(info):
    version = "{0.major}.{0.minor}.{0.micro}".format(info)
    if info.releaselevel != "final":
        version += info.releaselevel[0] + str(info.serial)
    return version

impl = getattr(sys, "implementation", None)
print(json.dumps({
    "implementation_name": impl.name if impl else "cpython",
    "implementation_version": _version(impl.version) if impl else "0",
    "os_name": os.name,
    "platform_machine": platform.machine(),
    "platform_python_implementation": platform.python_implementation(),
    "platform_release": platform.release(),
    "platform_system": platform.system(),
    "platform_version": platform.version(),
    "python_full_version": platform.python_version(),
    "python_version": ".".join(platform.python_version_tuple()[:2]),
    "sys_platform": sys.platform,
}))
"#;

/// Key/value view of the environment markers are evaluated against.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerEnv {
    values: BTreeMap<String, String>,
}

impl MarkerEnv {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    /// Parses the payload printed by [`MARKER_ENV_SCRIPT`].
    pub fn from_script_output(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn python_version(&self) -> Option<&str> {
        self.get("python_version")
    }

    pub fn missing_keys(&self) -> Vec<&'static str> {
        MARKER_KEYS
            .iter()
            .copied()
            .filter(|key| !self.values.contains_key(*key))
            .collect()
    }
}
