mod common;

use akm_bytecode::container::{off, HEADER_SIZE, MAGIC};
use akm_bytecode::inspect;
use akm_module::caps::{CAP_COMMAND, CAP_CRYPTO, CAP_LOG, CAP_NET, CAP_TIMER};
use common::{compile_ok, get_u32};

const MINIMAL: &str = "\
AKM.module({ name: \"a\" });
function init() { return 0; }
function exit() {}
";

#[test]
fn minimal_module_has_the_documented_layout() {
    let out = compile_ok(MINIMAL, false);
    let artifact = &out.artifact;

    assert_eq!(get_u32(artifact, off::MAGIC), MAGIC);
    assert_eq!(get_u32(artifact, off::HEADER_SIZE), 512);

    // init: NOP + PUSH 0 + RET (7 bytes); exit: NOP + RET (2 bytes).
    assert_eq!(get_u32(artifact, off::CODE_SIZE), 9);
    assert_eq!(get_u32(artifact, off::DATA_SIZE), 0);
    // Two functions, 12 bytes per symbol record.
    assert_eq!(get_u32(artifact, off::SYMTAB_SIZE), 24);
    assert_eq!(get_u32(artifact, off::STRTAB_SIZE), 12);
    assert_eq!(artifact.len(), 512 + 9 + 24 + 12);
    assert_eq!(get_u32(artifact, off::TOTAL_SIZE) as usize, artifact.len());

    let strtab_offset = get_u32(artifact, off::STRTAB_OFFSET) as usize;
    assert_eq!(&artifact[strtab_offset..], b"a\0init\0exit\0");

    assert_eq!(get_u32(artifact, off::CAPABILITIES), CAP_LOG);
    assert_eq!(CAP_LOG, 0x800);
}

#[test]
fn artifact_length_equals_header_plus_sections() {
    let src = "\
AKM.module({ name: \"sections\", dependencies: [\"vfs\"] });
function helper() { return 7; }
function init() { AKM.log(\"up\"); helper(); return 0; }
function exit() { AKM.log(\"down\"); }
";
    let out = compile_ok(src, false);
    let artifact = &out.artifact;
    let sections = get_u32(artifact, off::CODE_SIZE)
        + get_u32(artifact, off::DATA_SIZE)
        + get_u32(artifact, off::SYMTAB_SIZE)
        + get_u32(artifact, off::STRTAB_SIZE);
    assert_eq!(artifact.len() as u32, HEADER_SIZE as u32 + sections);
    assert_eq!(get_u32(artifact, off::TOTAL_SIZE), artifact.len() as u32);
}

#[test]
fn entry_points_lie_inside_the_code_section() {
    let out = compile_ok(MINIMAL, false);
    let artifact = &out.artifact;
    let code_offset = get_u32(artifact, off::CODE_OFFSET);
    let code_end = code_offset + get_u32(artifact, off::CODE_SIZE);
    let init = get_u32(artifact, off::INIT_OFFSET);
    let cleanup = get_u32(artifact, off::CLEANUP_OFFSET);
    assert!(init >= code_offset && init < code_end);
    assert!(cleanup >= code_offset && cleanup < code_end);
}

#[test]
fn recompiling_is_byte_identical() {
    let src = "\
AKM.module({ name: \"stable\", version: \"1.2.3\", author: \"kern\" });
function init() { AKM.log(\"hello\"); return 0; }
function exit() {}
";
    for optimize in [false, true] {
        let a = compile_ok(src, optimize).artifact;
        let b = compile_ok(src, optimize).artifact;
        assert_eq!(a, b, "optimize={optimize}");
    }
}

#[test]
fn api_calls_imply_their_capability_bits_plus_log() {
    let src = "\
AKM.module({ name: \"caps\" });
function init() { AKM.connect(\"10.0.0.1\", 80); AKM.sleep(100); return 0; }
function exit() { AKM.randomBytes(16); }
";
    let out = compile_ok(src, false);
    let mask = out.ir.info.capabilities;
    assert_eq!(mask, CAP_NET | CAP_TIMER | CAP_CRYPTO | CAP_LOG);
    assert_eq!(mask & CAP_COMMAND, 0);
}

#[test]
fn declared_capabilities_are_unioned_with_inferred() {
    let src = "\
AKM.module({ name: \"caps\", capabilities: AKM.CAPS.NET });
function init() { return 0; }
function exit() {}
";
    let out = compile_ok(src, false);
    assert_eq!(out.ir.info.capabilities, CAP_NET | CAP_LOG);
}

#[test]
fn header_report_round_trips_descriptor_fields() {
    let src = "\
AKM.module({
  name: \"round-trip\",
  version: \"0.9.0\",
  author: \"akm authors\",
  dependencies: [\"vfs\", \"net\"],
  security_level: 2,
});
function init() { return 0; }
function exit() {}
";
    let out = compile_ok(src, false);
    let report = inspect(&out.artifact).expect("inspect");
    assert_eq!(report.name, "round-trip");
    assert_eq!(report.version, "0.9.0");
    assert_eq!(report.author, "akm authors");
    assert_eq!(report.dependencies, ["vfs", "net"]);
    assert_eq!(report.security_level, 2);
    assert_eq!(report.capabilities, out.ir.info.capabilities);
    assert_eq!(report.total_size as usize, out.artifact.len());
}
