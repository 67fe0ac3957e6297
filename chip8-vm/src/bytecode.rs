//! Helpers for extracting fields from instruction words.
//!
//! ```text
//! 0xF000  opcode family
//! 0x0F00  X   register index
//! 0x00F0  Y   register index
//! 0x000F  N   4-bit immediate
//! 0x00FF  NN  8-bit immediate
//! 0x0FFF  NNN 12-bit address
//! ```

/// Join the two instruction bytes at the cursor into a big-endian word.
///
/// Reads past the end of the buffer wrap around to the start,
/// the same way the address bus wraps in the VM.
#[inline(always)]
pub fn fetch(bytecode: &[u8], cursor: usize) -> u16 {
    let len = bytecode.len();
    u16::from_be_bytes([bytecode[cursor % len], bytecode[(cursor + 1) % len]])
}

/// Extract the opcode family from the upper nibble.
#[inline(always)]
pub fn op_code(word: u16) -> u8 {
    (word >> 12) as u8
}

/// Extract operand NNN.
#[inline(always)]
pub fn op_nnn(word: u16) -> u16 {
    word & 0x0FFF
}

/// Extract operand NN.
#[inline(always)]
pub fn op_nn(word: u16) -> u8 {
    (word & 0x00FF) as u8
}

/// Extract operand X.
#[inline(always)]
pub fn op_x(word: u16) -> u8 {
    ((word & 0x0F00) >> 8) as u8
}

/// Extract operand Y.
#[inline(always)]
pub fn op_y(word: u16) -> u8 {
    ((word & 0x00F0) >> 4) as u8
}

/// Extract operand N.
#[inline(always)]
pub fn op_n(word: u16) -> u8 {
    (word & 0x000F) as u8
}

/// Extract operands X, Y and N.
#[inline(always)]
pub fn op_xyn(word: u16) -> (u8, u8, u8) {
    (op_x(word), op_y(word), op_n(word))
}
