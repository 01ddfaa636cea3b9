//! Wire bytes of the interpreter's interactive prompt.

pub const CTRL_A: u8 = 0x01;
pub const CTRL_B: u8 = 0x02;
pub const CTRL_C: u8 = 0x03;
pub const CTRL_D: u8 = 0x04;

/// Abort any running program and fall back to the prompt.
pub const INTERRUPT: &[u8] = b"\r\x03\x03";
/// Enter (or redisplay) the friendly prompt.
pub const FRIENDLY_REQUEST: &[u8] = b"\r\x02";
pub const FRIENDLY_PROMPT: &[u8] = b">>> ";

pub const ENTER_RAW: &[u8] = &[CTRL_A];
/// Echo that ends the raw-mode banner.
pub const RAW_PROMPT: &[u8] = b"\r\n>";

/// Compile and run the pasted source (raw mode) or soft-reboot (friendly mode).
pub const EXECUTE: &[u8] = &[CTRL_D];
pub const SOFT_REBOOT: &[u8] = &[CTRL_D];

pub const ACK: &[u8] = b"OK";
/// Terminates both the stdout and the stderr block.
pub const END_OF_BLOCK: &[u8] = &[CTRL_D];

/// Header printed right before the staged program's output.
pub const PROGRAM_OUTPUT_HEADER: &[u8] = b" output:\r\n";
/// "Interactive session available" marker printed after a program finishes.
pub const REPL_READY_MARKER: &[u8] =
    b"\r\nPress any key to enter the REPL. Use CTRL-D to reload.\r\n";
/// Blank-line artifact between the program output and the ready marker.
pub const TRAILING_BLANK_LINE: &[u8] = b"\r\n\r\n";

/// Banner fragments announcing that the firmware fell back to safe mode.
pub const SAFE_MODE_SIGNATURES: &[&[u8]] = &[
    b"Running in safe mode",
    b"Looks like our core CircuitPython code crashed hard. Whoops!",
    b"The microcontroller's power dipped.",
];

pub fn is_degraded_banner(banner: &[u8]) -> bool {
    SAFE_MODE_SIGNATURES
        .iter()
        .any(|signature| banner.windows(signature.len()).any(|w| w == *signature))
}
