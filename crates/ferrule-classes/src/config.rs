//! Lowering options (ferrule.toml `[lowering]`-style file)
//!
//! Every field has a default, so an empty document is a valid configuration.

use std::path::Path;

use ferrule_ir::TargetData;
use serde::{Deserialize, Serialize};

use crate::error::{LowerError, LowerResult};

/// Options controlling class lowering
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoweringOptions {
    /// Name of the module being compiled. Classes owned by this module are
    /// defined; all others are only declared.
    pub module: String,

    /// Emit field-offset tables in type descriptors
    pub emit_offset_type_info: bool,

    pub target: TargetOptions,

    pub runtime: RuntimeSymbols,
}

impl Default for LoweringOptions {
    fn default() -> Self {
        Self {
            module: "main".to_string(),
            emit_offset_type_info: true,
            target: TargetOptions::default(),
            runtime: RuntimeSymbols::default(),
        }
    }
}

/// Target description
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TargetOptions {
    /// Pointer width in bits (32 or 64)
    pub pointer_width: u32,
}

impl Default for TargetOptions {
    fn default() -> Self {
        Self { pointer_width: 64 }
    }
}

/// Symbol names of the runtime support library
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeSymbols {
    /// `allocate(descriptor) -> instance`
    pub allocate_instance: String,
    /// `cast(instance, descriptor) -> instance-or-null`
    pub dynamic_cast_object: String,
    /// `cast(interface pointer, descriptor) -> instance-or-null`
    pub dynamic_cast_interface: String,
    /// `to_object(interface pointer) -> instance`
    pub interface_to_object: String,
    /// Vtable shared by every type descriptor record
    pub descriptor_vtable: String,
}

impl Default for RuntimeSymbols {
    fn default() -> Self {
        Self {
            allocate_instance: "_ferrule_new_class".to_string(),
            dynamic_cast_object: "_ferrule_dynamic_cast".to_string(),
            dynamic_cast_interface: "_ferrule_interface_cast".to_string(),
            interface_to_object: "_ferrule_to_object".to_string(),
            descriptor_vtable: "_D7ferrule9ClassInfo6__vtblZ".to_string(),
        }
    }
}

impl LoweringOptions {
    /// Load options from a TOML file
    pub fn from_file(path: &Path) -> LowerResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse options from a TOML string
    pub fn from_toml_str(content: &str) -> LowerResult<Self> {
        let options: LoweringOptions = toml::from_str(content)?;
        options.validate()?;
        Ok(options)
    }

    /// Validate the options
    pub fn validate(&self) -> LowerResult<()> {
        if self.module.is_empty() {
            return Err(LowerError::InvalidOptions(
                "module name cannot be empty".to_string(),
            ));
        }

        if !matches!(self.target.pointer_width, 32 | 64) {
            return Err(LowerError::InvalidOptions(format!(
                "unsupported pointer width: {} (expected 32 or 64)",
                self.target.pointer_width
            )));
        }

        let symbols = [
            ("allocate_instance", &self.runtime.allocate_instance),
            ("dynamic_cast_object", &self.runtime.dynamic_cast_object),
            ("dynamic_cast_interface", &self.runtime.dynamic_cast_interface),
            ("interface_to_object", &self.runtime.interface_to_object),
            ("descriptor_vtable", &self.runtime.descriptor_vtable),
        ];
        for (key, symbol) in symbols {
            if symbol.is_empty() {
                return Err(LowerError::InvalidOptions(format!(
                    "runtime.{} cannot be empty",
                    key
                )));
            }
        }

        Ok(())
    }

    /// Target data for the configured pointer width
    pub fn target_data(&self) -> LowerResult<TargetData> {
        Ok(TargetData::new(self.target.pointer_width)?)
    }
}
