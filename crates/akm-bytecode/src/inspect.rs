//! Parses an existing AKM artifact back into a readable report.
//!
//! `inspect` reads the header; `verify` additionally checks the size
//! fields and both checksums. Both refuse anything without the exact
//! magic.

extern crate alloc;

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use akm_module::caps::capability_names;

use crate::container::{checksum, off, DEP_SLOT, FLAG_NAMES, HEADER_SIZE, MAGIC};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InspectError {
    pub message: String,
}

impl InspectError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for InspectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inspect error: {}", self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InspectError {}

/// All header fields of an artifact, decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModuleReport {
    pub format_version: u16,
    pub flags: u16,
    pub total_size: u32,
    pub name: String,
    pub version: String,
    pub author: String,
    pub api_version: u16,
    pub kernel_min: u32,
    pub kernel_max: u32,
    pub capabilities: u32,
    pub code_offset: u32,
    pub code_size: u32,
    pub data_offset: u32,
    pub data_size: u32,
    pub symtab_offset: u32,
    pub symtab_size: u32,
    pub strtab_offset: u32,
    pub strtab_size: u32,
    pub init_offset: u32,
    pub cleanup_offset: u32,
    pub dependencies: Vec<String>,
    pub security_level: u8,
    pub header_checksum: u32,
    pub content_checksum: u32,
}

impl ModuleReport {
    pub fn flag_names(&self) -> Vec<&'static str> {
        FLAG_NAMES
            .iter()
            .filter(|(_, bit)| self.flags & bit != 0)
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn capability_names(&self) -> Vec<&'static str> {
        capability_names(self.capabilities)
    }

    /// `api_version` as `major.minor` over its high/low bytes.
    pub fn api_version_string(&self) -> String {
        format!("{}.{}", self.api_version >> 8, self.api_version & 0xFF)
    }

    /// A three-byte dotted kernel version; 0 reads as "any".
    pub fn kernel_version_string(v: u32) -> String {
        if v == 0 {
            return "any".to_string();
        }
        format!("{}.{}.{}", (v >> 16) & 0xFF, (v >> 8) & 0xFF, v & 0xFF)
    }
}

impl fmt::Display for ModuleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "module:       {} {} ({})",
            self.name,
            self.version,
            if self.author.is_empty() { "unknown author" } else { self.author.as_str() }
        )?;
        let flags = self.flag_names();
        writeln!(
            f,
            "format:       AKM v{}, api {}, flags {}",
            self.format_version,
            self.api_version_string(),
            if flags.is_empty() { "none".to_string() } else { flags.join("|") }
        )?;
        writeln!(
            f,
            "kernel:       min {}, max {}",
            Self::kernel_version_string(self.kernel_min),
            Self::kernel_version_string(self.kernel_max)
        )?;
        let caps = self.capability_names();
        writeln!(
            f,
            "capabilities: 0x{:08X} {}",
            self.capabilities,
            if caps.is_empty() { "none".to_string() } else { caps.join("|") }
        )?;
        writeln!(
            f,
            "sections:     code {:#x}+{} data {:#x}+{} symtab {:#x}+{} strtab {:#x}+{}",
            self.code_offset,
            self.code_size,
            self.data_offset,
            self.data_size,
            self.symtab_offset,
            self.symtab_size,
            self.strtab_offset,
            self.strtab_size
        )?;
        writeln!(
            f,
            "entry points: init {:#x}, cleanup {:#x}",
            self.init_offset, self.cleanup_offset
        )?;
        if !self.dependencies.is_empty() {
            writeln!(f, "dependencies: {}", self.dependencies.join(", "))?;
        }
        writeln!(f, "security:     level {}", self.security_level)?;
        writeln!(
            f,
            "checksums:    header 0x{:08X}, content 0x{:08X}",
            self.header_checksum, self.content_checksum
        )?;
        write!(f, "total size:   {} bytes", self.total_size)
    }
}

fn get_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn get_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Reads a NUL-padded fixed-width string field.
fn get_str(bytes: &[u8], at: usize, width: usize) -> String {
    let field = &bytes[at..at + width];
    let end = field.iter().position(|&b| b == 0).unwrap_or(width);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Decodes the header of an artifact. Requires at least the full header
/// and the exact magic.
pub fn inspect(bytes: &[u8]) -> Result<ModuleReport, InspectError> {
    if bytes.len() < HEADER_SIZE {
        return Err(InspectError::new(format!(
            "file too short: {} bytes (header is {HEADER_SIZE})",
            bytes.len()
        )));
    }
    let magic = get_u32(bytes, off::MAGIC);
    if magic != MAGIC {
        return Err(InspectError::new(format!(
            "bad magic 0x{magic:08X} (expected 0x{MAGIC:08X})"
        )));
    }

    let dep_count = (bytes[off::DEP_COUNT] as usize).min(4);
    let dependencies = (0..dep_count)
        .map(|i| get_str(bytes, off::DEPENDENCIES + i * DEP_SLOT, DEP_SLOT))
        .collect();

    Ok(ModuleReport {
        format_version: get_u16(bytes, off::FORMAT_VERSION),
        flags: get_u16(bytes, off::FLAGS),
        total_size: get_u32(bytes, off::TOTAL_SIZE),
        name: get_str(bytes, off::NAME, 32),
        version: get_str(bytes, off::VERSION, 16),
        author: get_str(bytes, off::AUTHOR, 32),
        api_version: get_u16(bytes, off::API_VERSION),
        kernel_min: get_u32(bytes, off::KERNEL_MIN),
        kernel_max: get_u32(bytes, off::KERNEL_MAX),
        capabilities: get_u32(bytes, off::CAPABILITIES),
        code_offset: get_u32(bytes, off::CODE_OFFSET),
        code_size: get_u32(bytes, off::CODE_SIZE),
        data_offset: get_u32(bytes, off::DATA_OFFSET),
        data_size: get_u32(bytes, off::DATA_SIZE),
        symtab_offset: get_u32(bytes, off::SYMTAB_OFFSET),
        symtab_size: get_u32(bytes, off::SYMTAB_SIZE),
        strtab_offset: get_u32(bytes, off::STRTAB_OFFSET),
        strtab_size: get_u32(bytes, off::STRTAB_SIZE),
        init_offset: get_u32(bytes, off::INIT_OFFSET),
        cleanup_offset: get_u32(bytes, off::CLEANUP_OFFSET),
        dependencies,
        security_level: bytes[off::SECURITY_LEVEL],
        header_checksum: get_u32(bytes, off::HEADER_CHECKSUM),
        content_checksum: get_u32(bytes, off::CONTENT_CHECKSUM),
    })
}

/// Full structural validation: header fields, size accounting, and both
/// checksums.
pub fn verify(bytes: &[u8]) -> Result<ModuleReport, InspectError> {
    let report = inspect(bytes)?;

    let declared_header = get_u32(bytes, off::HEADER_SIZE);
    if declared_header != HEADER_SIZE as u32 {
        return Err(InspectError::new(format!(
            "header size field is {declared_header} (expected {HEADER_SIZE})"
        )));
    }
    if report.total_size as usize != bytes.len() {
        return Err(InspectError::new(format!(
            "total size field is {} but the file is {} bytes",
            report.total_size,
            bytes.len()
        )));
    }
    let section_sum = HEADER_SIZE as u32
        + report.code_size
        + report.data_size
        + report.symtab_size
        + report.strtab_size;
    if section_sum != report.total_size {
        return Err(InspectError::new(format!(
            "section sizes sum to {section_sum}, total size field is {}",
            report.total_size
        )));
    }

    let content_sum = checksum(&bytes[HEADER_SIZE..]);
    if content_sum != report.content_checksum {
        return Err(InspectError::new(format!(
            "content checksum mismatch: stored 0x{:08X}, computed 0x{content_sum:08X}",
            report.content_checksum
        )));
    }

    let mut view = Vec::with_capacity(HEADER_SIZE - 4);
    view.extend_from_slice(&bytes[..off::HEADER_CHECKSUM]);
    view.extend_from_slice(&bytes[off::CONTENT_CHECKSUM..HEADER_SIZE]);
    let header_sum = checksum(&view);
    if header_sum != report.header_checksum {
        return Err(InspectError::new(format!(
            "header checksum mismatch: stored 0x{:08X}, computed 0x{header_sum:08X}",
            report.header_checksum
        )));
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::generate;
    use crate::container::write_module;
    use crate::{Instr, IrFunction, IrModule, Value};
    use akm_module::caps::{CAP_COMMAND, CAP_LOG};
    use akm_module::ModuleInfo;
    use alloc::vec;

    fn sample_artifact() -> Vec<u8> {
        let mut module = IrModule::new(ModuleInfo {
            name: "probe".to_string(),
            version: "0.3.1".to_string(),
            author: "kern".to_string(),
            capabilities: CAP_LOG | CAP_COMMAND,
            dependencies: vec!["vfs".to_string()],
            security_level: 1,
            ..ModuleInfo::default()
        });
        let mut init = IrFunction::new("init");
        init.is_init = true;
        init.code = vec![Instr::Push { value: Value::Int(0) }, Instr::Ret];
        let mut exit = IrFunction::new("exit");
        exit.is_exit = true;
        exit.code = vec![Instr::Ret];
        module.functions.push(init);
        module.functions.push(exit);
        let gen = generate(&module).expect("generate");
        write_module(&module, &gen, 0)
    }

    #[test]
    fn report_round_trips_writer_inputs() {
        let report = inspect(&sample_artifact()).expect("inspect");
        assert_eq!(report.name, "probe");
        assert_eq!(report.version, "0.3.1");
        assert_eq!(report.author, "kern");
        assert_eq!(report.capabilities, CAP_LOG | CAP_COMMAND);
        assert_eq!(report.dependencies, ["vfs"]);
        assert_eq!(report.security_level, 1);
        assert_eq!(report.format_version, 2);
        assert_eq!(report.api_version_string(), "2.0");
        assert_eq!(
            ModuleReport::kernel_version_string(report.kernel_min),
            "8.0.0"
        );
        assert_eq!(ModuleReport::kernel_version_string(0), "any");
        assert_eq!(report.capability_names(), ["COMMAND", "LOG"]);
    }

    #[test]
    fn short_input_is_rejected() {
        let err = inspect(&[0u8; 64]).expect_err("too short");
        assert!(err.message.contains("too short"), "{err}");
    }

    #[test]
    fn corrupt_magic_is_rejected_with_observed_value() {
        let mut artifact = sample_artifact();
        artifact[0] ^= 0xFF;
        let err = inspect(&artifact).expect_err("bad magic");
        assert!(err.message.contains("bad magic 0x324D4BBE"), "{err}");
    }

    #[test]
    fn verify_accepts_a_fresh_artifact() {
        verify(&sample_artifact()).expect("verify");
    }

    #[test]
    fn verify_detects_content_corruption() {
        let mut artifact = sample_artifact();
        let last = artifact.len() - 1;
        artifact[last] ^= 0x01;
        let err = verify(&artifact).expect_err("corrupt");
        assert!(err.message.contains("content checksum"), "{err}");
    }

    #[test]
    fn verify_detects_header_tampering() {
        let mut artifact = sample_artifact();
        artifact[off::SECURITY_LEVEL] = 2;
        let err = verify(&artifact).expect_err("tampered");
        assert!(err.message.contains("header checksum"), "{err}");
    }

    #[test]
    fn verify_detects_truncation() {
        let mut artifact = sample_artifact();
        artifact.truncate(artifact.len() - 4);
        assert!(verify(&artifact).is_err());
    }

    #[test]
    fn display_report_mentions_name_and_caps() {
        let report = inspect(&sample_artifact()).expect("inspect");
        let text = alloc::format!("{report}");
        assert!(text.contains("probe"));
        assert!(text.contains("COMMAND|LOG"));
        assert!(text.contains("min 8.0.0, max any"));
    }
}
