//! Platform API registry
//!
//! Maps JavaCard API classes and methods to the tokens and descriptors the
//! emitter needs. C code reaches the API through intrinsic functions named
//! `__java_<package>_<Class>_<method>`, e.g.
//! `__java_javacard_framework_APDU_getBuffer`.
//!
//! The registry is immutable once built. [`ApiRegistry::standard`] returns a
//! process-wide table of the framework methods the compiler knows about; a
//! table loaded from JSON can replace it.

use super::ir::{CallSignature, Dispatch, LogicalType};
use crate::error::{Error, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One API method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInfo {
    /// Fully qualified class, e.g. `javacard/framework/APDU`
    pub class_name: String,
    /// Class token from the export file
    pub class_token: u8,
    /// Method name
    pub method_name: String,
    /// Method token from the export file
    pub method_token: u8,
    /// JCA descriptor, e.g. `()[B`
    pub descriptor: String,
    /// Static methods use `invokestatic`, others `invokevirtual`
    pub is_static: bool,
    /// Parsed return type
    pub return_type: LogicalType,
}

impl MethodInfo {
    /// Package part of the class name
    pub fn package(&self) -> &str {
        self.class_name
            .rsplit_once('/')
            .map(|(pkg, _)| pkg)
            .unwrap_or("")
    }

    /// Simple class name
    pub fn simple_class(&self) -> &str {
        self.class_name
            .rsplit_once('/')
            .map(|(_, cls)| cls)
            .unwrap_or(&self.class_name)
    }

    /// Call signature used for the stack effect of the invoke
    pub fn signature(&self) -> Result<CallSignature> {
        let dispatch = if self.is_static {
            Dispatch::Static
        } else {
            Dispatch::Virtual
        };
        CallSignature::from_descriptor(&self.descriptor, dispatch)
    }
}

/// One API class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    /// Fully qualified name
    pub name: String,
    /// Class token
    pub token: u8,
    /// Overloads by method name, first one wins on lookup
    pub methods: BTreeMap<String, Vec<MethodInfo>>,
}

/// One API package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    /// Package name, e.g. `javacard/framework`
    pub name: String,
    /// AID in JCA notation
    pub aid: String,
    /// Export file major version
    pub major_version: u8,
    /// Export file minor version
    pub minor_version: u8,
}

impl PackageInfo {
    /// `major.minor`
    pub fn version_string(&self) -> String {
        format!("{}.{}", self.major_version, self.minor_version)
    }
}

/// Immutable class/method token table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiRegistry {
    /// Classes by fully qualified name
    pub classes: BTreeMap<String, ClassInfo>,
    /// Packages by name
    pub packages: BTreeMap<String, PackageInfo>,
}

lazy_static! {
    static ref INTRINSIC_NAME: Regex =
        Regex::new(r"^__java_(?:([a-z0-9_]*?)_)?([A-Z][A-Za-z0-9]*)_([A-Za-z0-9_]+)$")
            .expect("intrinsic name pattern is valid");
    static ref STANDARD: ApiRegistry = ApiRegistry::build_standard();
}

impl ApiRegistry {
    /// Shared table of the standard framework methods
    pub fn standard() -> &'static ApiRegistry {
        &STANDARD
    }

    /// Load a registry from its JSON form
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Parse {
            context: "API registry".to_string(),
            message: e.to_string(),
        })
    }

    /// Method by class and name (first overload)
    pub fn lookup(&self, class_name: &str, method_name: &str) -> Option<&MethodInfo> {
        self.classes
            .get(class_name)?
            .methods
            .get(method_name)?
            .first()
    }

    /// Method by C intrinsic name.
    ///
    /// The class is the first `_`-separated segment starting with an
    /// uppercase letter; everything after it is the method name.
    pub fn lookup_intrinsic(&self, c_name: &str) -> Option<&MethodInfo> {
        let caps = INTRINSIC_NAME.captures(c_name)?;
        let class = caps.get(2)?.as_str();
        let method = caps.get(3)?.as_str();
        self.classes
            .values()
            .find(|c| c.name.rsplit('/').next() == Some(class))?
            .methods
            .get(method)?
            .first()
    }

    /// Whether a name uses the intrinsic naming scheme at all
    pub fn is_intrinsic_name(name: &str) -> bool {
        name.starts_with("__java_")
    }

    /// Class by fully qualified name
    pub fn class(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    /// Package by name
    pub fn package(&self, name: &str) -> Option<&PackageInfo> {
        self.packages.get(name)
    }

    fn add_method(
        &mut self,
        class_name: &str,
        class_token: u8,
        method_name: &str,
        method_token: u8,
        descriptor: &str,
        is_static: bool,
    ) {
        let return_type = CallSignature::from_descriptor(descriptor, Dispatch::Static)
            .map(|s| s.ret)
            .unwrap_or(LogicalType::Void);
        let class = self
            .classes
            .entry(class_name.to_string())
            .or_insert_with(|| ClassInfo {
                name: class_name.to_string(),
                token: class_token,
                methods: BTreeMap::new(),
            });
        class
            .methods
            .entry(method_name.to_string())
            .or_default()
            .push(MethodInfo {
                class_name: class_name.to_string(),
                class_token,
                method_name: method_name.to_string(),
                method_token,
                descriptor: descriptor.to_string(),
                is_static,
                return_type,
            });
    }

    fn build_standard() -> Self {
        let mut reg = ApiRegistry::default();
        for (name, aid, major, minor) in [
            ("java/lang", "0xA0:0x0:0x0:0x0:0x62:0x0:0x1", 1u8, 0u8),
            ("javacard/framework", "0xA0:0x0:0x0:0x0:0x62:0x1:0x1", 1, 4),
            ("javacardx/framework/util/intx", "0xA0:0x0:0x0:0x0:0x62:0x2:0x2:0x2", 1, 0),
        ] {
            reg.packages.insert(
                name.to_string(),
                PackageInfo {
                    name: name.to_string(),
                    aid: aid.to_string(),
                    major_version: major,
                    minor_version: minor,
                },
            );
        }

        const APDU: &str = "javacard/framework/APDU";
        const APPLET: &str = "javacard/framework/Applet";
        const ISO_EXCEPTION: &str = "javacard/framework/ISOException";
        const JCSYSTEM: &str = "javacard/framework/JCSystem";
        const UTIL: &str = "javacard/framework/Util";
        const JCINT: &str = "javacardx/framework/util/intx/JCint";

        reg.add_method(APDU, 10, "getBuffer", 1, "()[B", false);
        reg.add_method(APDU, 10, "setIncomingAndReceive", 10, "()S", false);
        reg.add_method(APDU, 10, "setOutgoing", 7, "()S", false);
        reg.add_method(APDU, 10, "setOutgoingLength", 9, "(S)V", false);
        reg.add_method(APDU, 10, "sendBytes", 4, "(SS)V", false);
        reg.add_method(APDU, 10, "setOutgoingAndSend", 8, "(SS)V", false);
        reg.add_method(APDU, 10, "getIncomingLength", 22, "()S", false);
        reg.add_method(APDU, 10, "getOffsetCdata", 23, "()S", false);

        reg.add_method(APPLET, 3, "register", 1, "()V", false);
        reg.add_method(APPLET, 3, "selectingApplet", 3, "()Z", false);

        reg.add_method(ISO_EXCEPTION, 7, "throwIt", 1, "(S)V", true);

        reg.add_method(JCSYSTEM, 8, "makeTransientByteArray", 13, "(SB)[B", true);
        reg.add_method(JCSYSTEM, 8, "makeTransientShortArray", 15, "(SB)[S", true);
        reg.add_method(JCSYSTEM, 8, "beginTransaction", 2, "()V", true);
        reg.add_method(JCSYSTEM, 8, "commitTransaction", 4, "()V", true);

        reg.add_method(UTIL, 16, "arrayCopyNonAtomic", 2, "([BS[BSS)S", true);
        reg.add_method(UTIL, 16, "arrayFillNonAtomic", 3, "([BSSB)S", true);
        reg.add_method(UTIL, 16, "getShort", 5, "([BS)S", true);
        reg.add_method(UTIL, 16, "setShort", 7, "([BSS)S", true);
        reg.add_method(UTIL, 16, "makeShort", 6, "(BB)S", true);

        reg.add_method(JCINT, 0, "makeTransientIntArray", 0, "(SB)[I", true);
        reg.add_method(JCINT, 0, "getInt", 1, "([BS)I", true);
        reg.add_method(JCINT, 0, "setInt", 2, "([BSI)S", true);
        reg.add_method(JCINT, 0, "makeInt", 3, "(SS)I", true);
        reg
    }
}
