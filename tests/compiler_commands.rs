mod common;

use akm_bytecode::container::off;
use akm_bytecode::{generate, Instr};
use akm_module::api_index;
use akm_module::caps::{CAP_COMMAND, CAP_LOG};
use common::{compile_ok, get_u32};

const SRC: &str = "\
AKM.module({ name: \"greeter\" });
function init() { return 0; }
function h(args) { return 0; }
function exit() {}
AKM.command({ name: \"hi\" }, h);
";

#[test]
fn registration_block_precedes_the_final_ret_of_init() {
    let out = compile_ok(SRC, false);
    let init = out
        .ir
        .functions
        .iter()
        .find(|f| f.is_init)
        .expect("init function");

    let ret_at = init
        .code
        .iter()
        .rposition(|i| matches!(i, Instr::Ret))
        .expect("final RET");
    assert_eq!(ret_at, init.code.len() - 1);

    let block = &init.code[ret_at - 7..ret_at];
    assert_eq!(block[0], Instr::PushStr { text: "hi".to_string() });
    assert_eq!(block[1], Instr::PushStr { text: String::new() });
    assert_eq!(block[2], Instr::PushStr { text: String::new() });
    assert_eq!(block[3], Instr::PushStr { text: String::new() });
    assert_eq!(block[4], Instr::Push { value: akm_bytecode::Value::Int(0) });
    assert_eq!(
        block[5],
        Instr::CallApi { method: "registerCommand".to_string(), argc: 5 }
    );
    assert_eq!(block[6], Instr::Pop);
}

#[test]
fn registration_bytes_sit_before_the_final_ret() {
    let out = compile_ok(SRC, false);
    let artifact = &out.artifact;
    let gen = generate(&out.ir).expect("regenerate");

    // init's code region ends right before the next function (h).
    let next_off = gen
        .function_offsets
        .iter()
        .find(|(name, _)| name == "h")
        .map(|(_, off)| *off as usize)
        .expect("h offset");
    let code_base = get_u32(artifact, off::CODE_OFFSET) as usize;
    let init_region = &artifact[code_base + gen.init_offset as usize..code_base + next_off];

    assert_eq!(*init_region.last().expect("ret"), 0x62);
    // ... PUSH 0, CALL_API registerCommand 5, POP, RET.
    let tail = &init_region[init_region.len() - 10..];
    assert_eq!(&tail[..5], &[0x10, 0, 0, 0, 0]);
    assert_eq!(tail[5], 0x61);
    assert_eq!(tail[6], api_index("registerCommand").expect("declared"));
    assert_eq!(tail[7], 5);
    assert_eq!(tail[8], 0x13);
    assert_eq!(tail[9], 0x62);
}

#[test]
fn capabilities_include_command_and_log() {
    let out = compile_ok(SRC, false);
    let mask = get_u32(&out.artifact, off::CAPABILITIES);
    assert_eq!(mask & CAP_COMMAND, CAP_COMMAND);
    assert_eq!(mask & CAP_LOG, CAP_LOG);
    assert_eq!(CAP_COMMAND, 0x1);
}

#[test]
fn data_stub_points_at_the_handler_code_offset() {
    let out = compile_ok(SRC, false);
    let artifact = &out.artifact;
    let gen = generate(&out.ir).expect("regenerate");

    let data_offset = get_u32(artifact, off::DATA_OFFSET) as usize;
    let data_size = get_u32(artifact, off::DATA_SIZE) as usize;
    assert!(data_size >= 20);
    let stub = &artifact[data_offset + data_size - 20..data_offset + data_size];

    let name_off = get_u32(stub, 0) as usize;
    // The name offset indexes the string pool at the start of data.
    let pool = &artifact[data_offset + name_off..];
    assert!(pool.starts_with(b"hi\0"));

    let handler_off = get_u32(stub, 16);
    let h_off = gen
        .function_offsets
        .iter()
        .find(|(name, _)| name == "h")
        .map(|(_, off)| *off)
        .expect("h offset");
    assert_ne!(h_off, 0, "h should not be the entry function");
    assert_eq!(handler_off, h_off);
}

#[test]
fn unresolved_handler_stub_falls_back_to_zero() {
    let src = "\
AKM.module({ name: \"greeter\" });
function init() { return 0; }
function exit() {}
AKM.command({ name: \"hi\" }, missing);
";
    let out = compile_ok(src, false);
    let artifact = &out.artifact;
    let data_offset = get_u32(artifact, off::DATA_OFFSET) as usize;
    let data_size = get_u32(artifact, off::DATA_SIZE) as usize;
    let stub = &artifact[data_offset + data_size - 20..data_offset + data_size];
    assert_eq!(get_u32(stub, 16), 0);
}

#[test]
fn two_commands_emit_two_stubs_and_two_blocks() {
    let src = "\
AKM.module({ name: \"multi\" });
function a(args) {}
function b(args) {}
function init() {}
function exit() {}
AKM.command({ name: \"one\", category: \"misc\" }, a);
AKM.command({ name: \"two\", category: \"misc\" }, b);
";
    let out = compile_ok(src, false);
    let init = out.ir.functions.iter().find(|f| f.is_init).expect("init");
    let registrations = init
        .code
        .iter()
        .filter(|i| matches!(i, Instr::CallApi { method, .. } if method == "registerCommand"))
        .count();
    assert_eq!(registrations, 2);

    let data_size = get_u32(&out.artifact, off::DATA_SIZE) as usize;
    // Pool: "one\0" + ""\0 + ""\0 + "misc\0" + "two\0" + ""\0 + ""\0 + "misc\0"
    // (observation order, duplicates kept without the dedup pass).
    let pool = 4 + 1 + 1 + 5 + 4 + 1 + 1 + 5;
    assert_eq!(data_size, pool + 2 * 20);
}
