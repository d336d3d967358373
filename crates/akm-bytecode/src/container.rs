//! The AKM v2 container: a fixed 512-byte header followed by the code,
//! data, symbol-table, and string-table sections.
//!
//! Output is canonical: no timestamps, zero-filled reserved regions, and
//! deterministic section layout, so compiling the same source twice is
//! byte-identical.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use akm_module::{truncate_utf8, AUTHOR_MAX, DEP_MAX, MAX_DEPS, NAME_MAX, VERSION_MAX};

use crate::codegen::CodegenOutput;
use crate::IrModule;

pub const MAGIC: u32 = 0x324D_4B41; // "AKM2"
pub const FORMAT_VERSION: u16 = 2;
pub const HEADER_SIZE: usize = 512;

pub const FLAG_DEBUG: u16 = 1 << 0;
pub const FLAG_NATIVE: u16 = 1 << 1;
pub const FLAG_REQUIRED: u16 = 1 << 2;
pub const FLAG_AUTOLOAD: u16 = 1 << 3;

/// Canonical flag names, in bit order.
pub const FLAG_NAMES: [(&str, u16); 4] = [
    ("DEBUG", FLAG_DEBUG),
    ("NATIVE", FLAG_NATIVE),
    ("REQUIRED", FLAG_REQUIRED),
    ("AUTOLOAD", FLAG_AUTOLOAD),
];

/// Packed `major.minor` host API version this compiler targets.
pub const DEFAULT_API_VERSION: u16 = 0x0200;
/// Minimum kernel version (three-byte dotted encoding; 8.0.0).
pub const DEFAULT_KERNEL_MIN: u32 = 0x0008_0000;

/// Header field byte offsets.
pub mod off {
    pub const MAGIC: usize = 0;
    pub const FORMAT_VERSION: usize = 4;
    pub const FLAGS: usize = 6;
    pub const HEADER_SIZE: usize = 8;
    pub const TOTAL_SIZE: usize = 12;
    pub const NAME: usize = 16;
    pub const VERSION: usize = 48;
    pub const AUTHOR: usize = 64;
    pub const API_VERSION: usize = 96;
    pub const KERNEL_MIN: usize = 100;
    pub const KERNEL_MAX: usize = 104;
    pub const CAPABILITIES: usize = 108;
    pub const CODE_OFFSET: usize = 116;
    pub const CODE_SIZE: usize = 120;
    pub const DATA_OFFSET: usize = 124;
    pub const DATA_SIZE: usize = 128;
    pub const RODATA_OFFSET: usize = 132;
    pub const RODATA_SIZE: usize = 136;
    pub const BSS_SIZE: usize = 140;
    pub const INIT_OFFSET: usize = 164;
    pub const CLEANUP_OFFSET: usize = 168;
    pub const SYMTAB_OFFSET: usize = 180;
    pub const SYMTAB_SIZE: usize = 184;
    pub const STRTAB_OFFSET: usize = 188;
    pub const STRTAB_SIZE: usize = 192;
    pub const DEP_COUNT: usize = 212;
    pub const DEPENDENCIES: usize = 216;
    pub const SECURITY_LEVEL: usize = 344;
    pub const SIGNATURE_TYPE: usize = 345;
    pub const HEADER_CHECKSUM: usize = 348;
    pub const CONTENT_CHECKSUM: usize = 352;
    pub const SIGNATURE: usize = 356;
}

/// Field width of a dependency slot (31 bytes + NUL pad).
pub const DEP_SLOT: usize = 32;

/// Size of one symbol-table record.
pub const SYM_RECORD: usize = 12;

const SYM_TYPE_FUNCTION: u8 = 1;
const SYM_BIND_GLOBAL: u8 = 1;

/// The rolling container checksum: `acc = rotl32(acc + byte, 1)` from 0.
pub fn checksum(bytes: &[u8]) -> u32 {
    let mut acc: u32 = 0;
    for &b in bytes {
        acc = acc.wrapping_add(b as u32).rotate_left(1);
    }
    acc
}

fn put_u16(buf: &mut [u8], at: usize, v: u16) {
    buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn put_str(buf: &mut [u8], at: usize, s: &str, max: usize) {
    let s = truncate_utf8(s, max);
    buf[at..at + s.len()].copy_from_slice(s.as_bytes());
}

/// The trailing string table: module name, then the final IR strings,
/// then any function names not already present, each NUL-terminated.
/// Symbol name-offsets index into this region.
struct Strtab {
    bytes: Vec<u8>,
    offsets: BTreeMap<String, u32>,
}

impl Strtab {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            offsets: BTreeMap::new(),
        }
    }

    fn push(&mut self, s: &str) {
        let off = self.bytes.len() as u32;
        self.offsets.entry(String::from(s)).or_insert(off);
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
    }

    fn ensure(&mut self, s: &str) -> u32 {
        if let Some(off) = self.offsets.get(s) {
            return *off;
        }
        let off = self.bytes.len() as u32;
        self.push(s);
        off
    }
}

/// Assembles the final artifact from the module descriptor and the
/// generated sections.
pub fn write_module(module: &IrModule, gen: &CodegenOutput, flags: u16) -> Vec<u8> {
    let info = &module.info;

    let mut strtab = Strtab::new();
    strtab.push(&info.name);
    for s in &module.strings {
        strtab.push(s);
    }

    let mut symtab = Vec::with_capacity(gen.function_offsets.len() * SYM_RECORD);
    for (name, code_off) in &gen.function_offsets {
        let name_off = strtab.ensure(name);
        symtab.extend_from_slice(&name_off.to_le_bytes());
        symtab.extend_from_slice(&(HEADER_SIZE as u32 + code_off).to_le_bytes());
        symtab.extend_from_slice(&0u16.to_le_bytes());
        symtab.push(SYM_TYPE_FUNCTION);
        symtab.push(SYM_BIND_GLOBAL);
    }

    let code_offset = HEADER_SIZE as u32;
    let data_offset = code_offset + gen.code.len() as u32;
    let symtab_offset = data_offset + gen.data.len() as u32;
    let strtab_offset = symtab_offset + symtab.len() as u32;
    let total_size = strtab_offset + strtab.bytes.len() as u32;

    let mut header = vec![0u8; HEADER_SIZE];
    put_u32(&mut header, off::MAGIC, MAGIC);
    put_u16(&mut header, off::FORMAT_VERSION, FORMAT_VERSION);
    put_u16(&mut header, off::FLAGS, flags);
    put_u32(&mut header, off::HEADER_SIZE, HEADER_SIZE as u32);
    put_u32(&mut header, off::TOTAL_SIZE, total_size);
    put_str(&mut header, off::NAME, &info.name, NAME_MAX);
    put_str(&mut header, off::VERSION, &info.version, VERSION_MAX);
    put_str(&mut header, off::AUTHOR, &info.author, AUTHOR_MAX);
    put_u16(&mut header, off::API_VERSION, DEFAULT_API_VERSION);
    put_u32(&mut header, off::KERNEL_MIN, DEFAULT_KERNEL_MIN);
    put_u32(&mut header, off::KERNEL_MAX, 0);
    put_u32(&mut header, off::CAPABILITIES, info.capabilities);
    put_u32(&mut header, off::CODE_OFFSET, code_offset);
    put_u32(&mut header, off::CODE_SIZE, gen.code.len() as u32);
    put_u32(&mut header, off::DATA_OFFSET, data_offset);
    put_u32(&mut header, off::DATA_SIZE, gen.data.len() as u32);
    put_u32(&mut header, off::INIT_OFFSET, code_offset + gen.init_offset);
    put_u32(&mut header, off::CLEANUP_OFFSET, code_offset + gen.exit_offset);
    put_u32(&mut header, off::SYMTAB_OFFSET, symtab_offset);
    put_u32(&mut header, off::SYMTAB_SIZE, symtab.len() as u32);
    put_u32(&mut header, off::STRTAB_OFFSET, strtab_offset);
    put_u32(&mut header, off::STRTAB_SIZE, strtab.bytes.len() as u32);

    let dep_count = info.dependencies.len().min(MAX_DEPS);
    header[off::DEP_COUNT] = dep_count as u8;
    for (i, dep) in info.dependencies.iter().take(MAX_DEPS).enumerate() {
        put_str(&mut header, off::DEPENDENCIES + i * DEP_SLOT, dep, DEP_MAX);
    }

    header[off::SECURITY_LEVEL] = info.security_level;
    // signature_type, signature, and all reserved regions stay zero.

    let mut content = Vec::with_capacity((total_size as usize) - HEADER_SIZE);
    content.extend_from_slice(&gen.code);
    content.extend_from_slice(&gen.data);
    content.extend_from_slice(&symtab);
    content.extend_from_slice(&strtab.bytes);
    put_u32(&mut header, off::CONTENT_CHECKSUM, checksum(&content));

    let header_sum = {
        let mut view = Vec::with_capacity(HEADER_SIZE - 4);
        view.extend_from_slice(&header[..off::HEADER_CHECKSUM]);
        view.extend_from_slice(&header[off::CONTENT_CHECKSUM..]);
        checksum(&view)
    };
    put_u32(&mut header, off::HEADER_CHECKSUM, header_sum);

    let mut artifact = header;
    artifact.extend_from_slice(&content);
    artifact
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::generate;
    use crate::{Instr, IrFunction, Value};
    use akm_module::ModuleInfo;
    use alloc::string::ToString;

    fn minimal_module() -> IrModule {
        let mut module = IrModule::new(ModuleInfo {
            name: "a".to_string(),
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
        module
    }

    fn get_u32(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn checksum_rotates_per_byte() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[1]), 2);
        // (0 + 1) rotl 1 = 2; (2 + 1) rotl 1 = 6.
        assert_eq!(checksum(&[1, 1]), 6);
        // The rotate makes the accumulator order-sensitive.
        assert_ne!(checksum(&[1, 2]), checksum(&[2, 1]));
    }

    #[test]
    fn minimal_artifact_layout_matches_header_fields() {
        let module = minimal_module();
        let gen = generate(&module).expect("generate");
        let artifact = write_module(&module, &gen, 0);

        assert_eq!(get_u32(&artifact, off::MAGIC), MAGIC);
        assert_eq!(get_u32(&artifact, off::HEADER_SIZE), 512);
        assert_eq!(get_u32(&artifact, off::TOTAL_SIZE) as usize, artifact.len());

        // code: init NOP+PUSH+RET (7) + exit NOP+RET (2).
        assert_eq!(get_u32(&artifact, off::CODE_OFFSET), 512);
        assert_eq!(get_u32(&artifact, off::CODE_SIZE), 9);
        assert_eq!(get_u32(&artifact, off::DATA_SIZE), 0);
        assert_eq!(get_u32(&artifact, off::SYMTAB_SIZE), 24);
        // strtab: "a\0init\0exit\0".
        assert_eq!(get_u32(&artifact, off::STRTAB_SIZE), 12);
        let strtab_offset = get_u32(&artifact, off::STRTAB_OFFSET) as usize;
        assert_eq!(&artifact[strtab_offset..], b"a\0init\0exit\0");
    }

    #[test]
    fn section_offsets_increase_monotonically() {
        let module = minimal_module();
        let gen = generate(&module).expect("generate");
        let artifact = write_module(&module, &gen, 0);

        let code = get_u32(&artifact, off::CODE_OFFSET);
        let data = get_u32(&artifact, off::DATA_OFFSET);
        let symtab = get_u32(&artifact, off::SYMTAB_OFFSET);
        let strtab = get_u32(&artifact, off::STRTAB_OFFSET);
        assert!(code <= data && data <= symtab && symtab <= strtab);
        assert_eq!(code, 512);
        assert_eq!(data, code + get_u32(&artifact, off::CODE_SIZE));
        assert_eq!(symtab, data + get_u32(&artifact, off::DATA_SIZE));
        assert_eq!(strtab, symtab + get_u32(&artifact, off::SYMTAB_SIZE));
    }

    #[test]
    fn symbol_values_lie_inside_the_code_section() {
        let module = minimal_module();
        let gen = generate(&module).expect("generate");
        let artifact = write_module(&module, &gen, 0);

        let code_offset = get_u32(&artifact, off::CODE_OFFSET);
        let code_size = get_u32(&artifact, off::CODE_SIZE);
        let symtab_offset = get_u32(&artifact, off::SYMTAB_OFFSET) as usize;
        let symtab_size = get_u32(&artifact, off::SYMTAB_SIZE) as usize;
        for rec in artifact[symtab_offset..symtab_offset + symtab_size].chunks(SYM_RECORD) {
            let value = u32::from_le_bytes(rec[4..8].try_into().unwrap());
            assert!(value >= code_offset && value < code_offset + code_size);
            assert_eq!(rec[10], 1); // type = function
            assert_eq!(rec[11], 1); // binding = global
        }
    }

    #[test]
    fn checksums_cover_content_and_elided_header_slot() {
        let module = minimal_module();
        let gen = generate(&module).expect("generate");
        let artifact = write_module(&module, &gen, 0);

        let content_sum = checksum(&artifact[HEADER_SIZE..]);
        assert_eq!(get_u32(&artifact, off::CONTENT_CHECKSUM), content_sum);

        let mut view = Vec::new();
        view.extend_from_slice(&artifact[..off::HEADER_CHECKSUM]);
        view.extend_from_slice(&artifact[off::CONTENT_CHECKSUM..HEADER_SIZE]);
        assert_eq!(get_u32(&artifact, off::HEADER_CHECKSUM), checksum(&view));
    }

    #[test]
    fn write_is_deterministic() {
        let module = minimal_module();
        let gen = generate(&module).expect("generate");
        let a = write_module(&module, &gen, 0);
        let b = write_module(&module, &gen, 0);
        assert_eq!(a, b);
    }

    #[test]
    fn long_names_are_truncated_to_field_limits() {
        let mut module = minimal_module();
        module.info.name = "x".repeat(40);
        module.info.dependencies = vec!["d".repeat(40), "e".to_string()];
        let gen = generate(&module).expect("generate");
        let artifact = write_module(&module, &gen, 0);

        // 31 bytes of name, then the NUL pad.
        assert_eq!(&artifact[off::NAME..off::NAME + 31], "x".repeat(31).as_bytes());
        assert_eq!(artifact[off::NAME + 31], 0);
        assert_eq!(artifact[off::DEP_COUNT], 2);
        assert_eq!(
            &artifact[off::DEPENDENCIES..off::DEPENDENCIES + 31],
            "d".repeat(31).as_bytes()
        );
        assert_eq!(artifact[off::DEPENDENCIES + DEP_SLOT], b'e');
    }
}
