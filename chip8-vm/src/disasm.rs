//! Disassembler.
use std::fmt::{self, Write as FmtWrite};

use crate::{
    bytecode::fetch,
    constants::{Address, MEM_START},
    instr::{Instr, Op},
};

/// Renders ROM bytecode as a listing of instructions,
/// addressed as they would be once loaded into memory.
pub struct Disassembler<'a> {
    bytecode: &'a [u8],
}

impl<'a> Disassembler<'a> {
    pub fn new(bytecode: &'a [u8]) -> Self {
        Self { bytecode }
    }

    /// Decoded instructions, two bytes at a time.
    ///
    /// A trailing odd byte is not an instruction and is left out.
    pub fn instructions(&self) -> impl Iterator<Item = Instr> + 'a {
        let bytecode = self.bytecode;
        (0..bytecode.len() / 2).map(move |i| {
            let cursor = i * 2;
            Instr::decode((MEM_START + cursor) as Address, fetch(bytecode, cursor))
        })
    }

    /// Write the whole listing to the given writer.
    pub fn disassemble<W: FmtWrite>(&self, w: &mut W) -> fmt::Result {
        for instr in self.instructions() {
            self.dis_instr(w, &instr)?;
        }

        if self.bytecode.len() % 2 == 1 {
            let cursor = self.bytecode.len() - 1;
            let byte = self.bytecode[cursor];
            writeln!(w, "{:04X}: {byte:02X}    0b{byte:08b}", MEM_START + cursor)?;
        }

        Ok(())
    }

    /// Write a single instruction to the given writer.
    ///
    /// Words that don't decode to an instruction are most likely
    /// sprite data, so they are shown as bits.
    fn dis_instr<W: FmtWrite>(&self, w: &mut W, instr: &Instr) -> fmt::Result {
        match instr.op {
            Op::Unknown => {
                let [a, b] = instr.bytes();
                writeln!(
                    w,
                    "{:04X}: {:04X}  0b{a:08b} 0b{b:08b}",
                    instr.addr, instr.word
                )
            }
            _ => writeln!(w, "{instr}"),
        }
    }

    pub fn to_listing(&self) -> Result<String, fmt::Error> {
        let mut buf = String::new();
        self.disassemble(&mut buf)?;
        Ok(buf)
    }
}
