#![allow(dead_code)]

use akmc::{compile, CompileOptions, CompileOutput};

/// Compiles a source module, failing the test on any error.
pub fn compile_ok(source: &str, optimize: bool) -> CompileOutput {
    let opts = CompileOptions {
        optimize,
        ..CompileOptions::default()
    };
    match compile(source, &opts) {
        Ok(output) => output,
        Err(failure) => panic!("compile failed: {failure}"),
    }
}

pub fn get_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes(bytes[at..at + 2].try_into().unwrap())
}

pub fn get_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}
