//! Target configuration
//!
//! Describes the card the code is compiled for. Loaded from JSON by the
//! surrounding tooling, or built in code with [`TargetConfig::default`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// JavaCard platform version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JavaCardVersion {
    /// 2.2.2
    #[serde(rename = "2.2.2")]
    V2_2_2,
    /// 3.0.1
    #[serde(rename = "3.0.1")]
    V3_0_1,
    /// 3.0.4 (first version with `javacardx.framework.util.intx`)
    #[serde(rename = "3.0.4")]
    V3_0_4,
    /// 3.0.5
    #[serde(rename = "3.0.5")]
    V3_0_5,
    /// 3.1
    #[serde(rename = "3.1")]
    V3_1,
    /// 3.2
    #[serde(rename = "3.2")]
    V3_2,
}

impl JavaCardVersion {
    /// `(javacard.framework, java.lang)` import versions
    pub fn import_versions(&self) -> (&'static str, &'static str) {
        match self {
            JavaCardVersion::V2_2_2 => ("1.3", "1.0"),
            JavaCardVersion::V3_0_1 => ("1.4", "1.0"),
            JavaCardVersion::V3_0_4 => ("1.5", "1.0"),
            JavaCardVersion::V3_0_5 => ("1.6", "1.0"),
            JavaCardVersion::V3_1 => ("1.8", "1.0"),
            JavaCardVersion::V3_2 => ("1.9", "1.0"),
        }
    }

    /// Whether the platform can provide native 32-bit arrays
    pub fn supports_intx(&self) -> bool {
        *self >= JavaCardVersion::V3_0_4
    }
}

impl Default for JavaCardVersion {
    fn default() -> Self {
        JavaCardVersion::V3_0_1
    }
}

impl fmt::Display for JavaCardVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JavaCardVersion::V2_2_2 => "2.2.2",
            JavaCardVersion::V3_0_1 => "3.0.1",
            JavaCardVersion::V3_0_4 => "3.0.4",
            JavaCardVersion::V3_0_5 => "3.0.5",
            JavaCardVersion::V3_1 => "3.1",
            JavaCardVersion::V3_2 => "3.2",
        };
        write!(f, "{}", s)
    }
}

/// Per-type element bound for the offload stacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffloadBounds {
    /// `STACK_B` elements
    pub byte: u16,
    /// `STACK_S` elements
    pub short: u16,
    /// `STACK_I` elements
    pub int: u16,
}

/// Target card configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Card supports native 32-bit arrays and arithmetic. When false, every
    /// INT in memory is emulated as a pair of shorts.
    pub native_int: bool,
    /// Extended-length APDU support (buffers over 255 bytes)
    pub extended_length: bool,
    /// Optional external bound on each offload stack
    pub offload_bound: Option<OffloadBounds>,
    /// Fast local slot budget per function, in 16-bit words
    pub max_local_slots: u16,
    /// Platform version
    pub javacard_version: JavaCardVersion,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            native_int: false,
            extended_length: false,
            offload_bound: None,
            max_local_slots: 64,
            javacard_version: JavaCardVersion::default(),
        }
    }
}

impl TargetConfig {
    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: TargetConfig = serde_json::from_str(text).map_err(|e| Error::Parse {
            context: "target configuration".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the settings are mutually consistent
    pub fn validate(&self) -> Result<()> {
        if self.max_local_slots == 0 || self.max_local_slots > 255 {
            return Err(Error::Config(format!(
                "max_local_slots must be between 1 and 255, got {}",
                self.max_local_slots
            )));
        }
        if self.native_int && !self.javacard_version.supports_intx() {
            return Err(Error::Config(format!(
                "native_int requires JavaCard 3.0.4 or later, target is {}",
                self.javacard_version
            )));
        }
        Ok(())
    }

    /// Whether INT values in memory are split into short pairs
    pub fn emulates_int(&self) -> bool {
        !self.native_int
    }
}
