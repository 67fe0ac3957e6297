mod bytecode;
mod clock;
pub mod constants;
mod cpu;
mod disasm;
mod error;
mod font;
mod instr;
mod keypad;
mod vm;

pub use self::{
    clock::Clock,
    error::{Chip8Error, Chip8Result},
    keypad::{InvalidKeyCode, KeyCode},
    vm::{Hz, TraceHook},
};

pub const IMPL_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod prelude {
    pub use super::{
        cpu::{Chip8Cpu, ExecState},
        disasm::Disassembler,
        error::{Chip8Error, Chip8Result},
        instr::{Instr, Op},
        keypad::KeyCode,
        vm::{Chip8Conf, Chip8Vm, Flow, Hz, TraceLine},
    };
}
