//! The host API table.
//!
//! Every `AKM.<method>(...)` call site the compiler recognizes is declared
//! here with the capability bit the kernel requires for it and its
//! argument count. The position of an entry is the one-byte API index
//! encoded in `CALL_API`; the table is therefore append-only.

use crate::caps::*;

/// A declared host API method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApiFn {
    pub name: &'static str,
    /// Capability bit the kernel requires for this call.
    pub cap: u32,
    /// Declared argument count.
    pub argc: u8,
}

/// API index encoded for methods not present in the table.
pub const API_INDEX_UNKNOWN: u8 = 0xFF;

macro_rules! api {
    ($name:literal, $cap:expr, $argc:literal) => {
        ApiFn {
            name: $name,
            cap: $cap,
            argc: $argc,
        }
    };
}

/// All declared host API methods, grouped by domain.
pub const API_TABLE: &[ApiFn] = &[
    // Logging.
    api!("log", CAP_LOG, 1),
    api!("info", CAP_LOG, 1),
    api!("warn", CAP_LOG, 1),
    api!("error", CAP_LOG, 1),
    api!("debug", CAP_LOG, 1),
    // Memory.
    api!("alloc", CAP_MEMORY, 1),
    api!("free", CAP_MEMORY, 1),
    api!("memStats", CAP_MEMORY, 0),
    api!("mapShared", CAP_MEMORY, 2),
    // Environment.
    api!("getEnv", CAP_ENV, 1),
    api!("setEnv", CAP_ENV, 2),
    api!("listEnv", CAP_ENV, 0),
    // Timers.
    api!("sleep", CAP_TIMER, 1),
    api!("setTimeout", CAP_TIMER, 2),
    api!("setInterval", CAP_TIMER, 2),
    api!("clearTimer", CAP_TIMER, 1),
    api!("uptime", CAP_TIMER, 0),
    // PCI.
    api!("pciScan", CAP_PCI, 0),
    api!("pciFind", CAP_PCI, 2),
    api!("pciRead", CAP_PCI, 3),
    api!("pciWrite", CAP_PCI, 4),
    // Port I/O.
    api!("inb", CAP_PORT_IO, 1),
    api!("outb", CAP_PORT_IO, 2),
    api!("inw", CAP_PORT_IO, 1),
    api!("outw", CAP_PORT_IO, 2),
    api!("inl", CAP_PORT_IO, 1),
    api!("outl", CAP_PORT_IO, 2),
    // IRQ.
    api!("requestIrq", CAP_IRQ, 2),
    api!("releaseIrq", CAP_IRQ, 1),
    api!("maskIrq", CAP_IRQ, 1),
    api!("unmaskIrq", CAP_IRQ, 1),
    // System info.
    api!("kernelVersion", CAP_SYSINFO, 0),
    api!("cpuInfo", CAP_SYSINFO, 0),
    api!("memInfo", CAP_SYSINFO, 0),
    api!("uname", CAP_SYSINFO, 0),
    api!("ticks", CAP_SYSINFO, 0),
    // Processes.
    api!("spawn", CAP_PROCESS, 2),
    api!("kill", CAP_PROCESS, 2),
    api!("listProcesses", CAP_PROCESS, 0),
    api!("getPid", CAP_PROCESS, 0),
    api!("setPriority", CAP_PROCESS, 2),
    // IPC.
    api!("ipcCreateQueue", CAP_IPC, 1),
    api!("ipcDestroyQueue", CAP_IPC, 1),
    api!("ipcSend", CAP_IPC, 2),
    api!("ipcRecv", CAP_IPC, 1),
    // Crypto.
    api!("randomBytes", CAP_CRYPTO, 1),
    api!("hash", CAP_CRYPTO, 2),
    api!("hmac", CAP_CRYPTO, 3),
    // Drivers.
    api!("registerDriver", CAP_DRIVER, 2),
    api!("unregisterDriver", CAP_DRIVER, 1),
    api!("deviceList", CAP_DRIVER, 0),
    // Filesystem.
    api!("open", CAP_FS_READ, 2),
    api!("close", CAP_FS_READ, 1),
    api!("read", CAP_FS_READ, 3),
    api!("write", CAP_FS_WRITE, 3),
    api!("stat", CAP_FS_READ, 1),
    api!("readdir", CAP_FS_READ, 1),
    api!("mkdir", CAP_FS_WRITE, 1),
    api!("unlink", CAP_FS_WRITE, 1),
    // Network.
    api!("socket", CAP_NET, 2),
    api!("bind", CAP_NET, 2),
    api!("connect", CAP_NET, 2),
    api!("send", CAP_NET, 2),
    api!("recv", CAP_NET, 2),
    api!("closeSocket", CAP_NET, 1),
    api!("resolve", CAP_NET, 1),
    // Users.
    api!("getUser", CAP_USERS, 0),
    api!("listUsers", CAP_USERS, 0),
    api!("checkPermission", CAP_USERS, 2),
    // Power.
    api!("shutdown", CAP_POWER, 0),
    api!("reboot", CAP_POWER, 0),
    // Display.
    api!("consoleWrite", CAP_DISPLAY, 1),
    api!("consoleClear", CAP_DISPLAY, 0),
    api!("setCursor", CAP_DISPLAY, 2),
    // Input.
    api!("readKey", CAP_INPUT, 0),
    api!("readLine", CAP_INPUT, 0),
    // Debug.
    api!("breakpoint", CAP_DEBUG, 0),
    api!("dumpRegisters", CAP_DEBUG, 0),
    // Command registration (synthesized into init by the compiler).
    api!("registerCommand", CAP_COMMAND, 5),
];

/// Looks up a method declaration by name.
pub fn api_by_name(name: &str) -> Option<&'static ApiFn> {
    API_TABLE.iter().find(|f| f.name == name)
}

/// Returns the one-byte API index for a method name, if declared.
pub fn api_index(name: &str) -> Option<u8> {
    API_TABLE
        .iter()
        .position(|f| f.name == name)
        .map(|i| i as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_fits_one_byte_indices() {
        assert!(API_TABLE.len() < API_INDEX_UNKNOWN as usize);
    }

    #[test]
    fn names_are_unique() {
        for (i, f) in API_TABLE.iter().enumerate() {
            assert_eq!(
                api_index(f.name),
                Some(i as u8),
                "duplicate api name `{}`",
                f.name
            );
        }
    }

    #[test]
    fn register_command_takes_five_args() {
        let f = api_by_name("registerCommand").expect("declared");
        assert_eq!(f.argc, 5);
        assert_eq!(f.cap, CAP_COMMAND);
    }

    #[test]
    fn unknown_method_has_no_index() {
        assert_eq!(api_index("frobnicate"), None);
        assert!(api_by_name("frobnicate").is_none());
    }
}
