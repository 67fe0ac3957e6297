//! CPU and memory state.
use crate::{
    bytecode::fetch,
    constants::*,
    error::{Chip8Error, Chip8Result},
    font::FONTSET,
    keypad::Keypad,
};

/// Whether the machine is executing, or stalled on `Fx0A (LD Vx, K)`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    #[default]
    Running,
    /// Waiting for any key to be pressed. The key value
    /// will be stored in the contained register.
    AwaitingKey(u8),
}

/// Core state for a chip8 interpreter.
pub struct Chip8Cpu {
    // ------------------------------------------------------------------------
    // Registers
    /// Program counter pointing to the next instruction to fetch.
    pub(crate) pc: Address,
    /// Stack pointer, the number of return addresses on the stack.
    pub(crate) sp: usize,
    /// General purpose registers for temporary values.
    ///
    /// Register 16 (VF) is used for either the carry flag or borrow switch depending on opcode.
    pub(crate) registers: [u8; REGISTER_COUNT],
    /// (I) Pointer register used for temporarily storing an address.
    /// Kept within the 12-bit address space.
    pub(crate) address: Address,
    /// (DT) Delay timer that counts down to 0.
    pub(crate) delay_timer: u8,
    /// (ST) Sound timer that counts down to 0. When it has a non-zero value, a beep is played.
    pub(crate) sound_timer: u8,
    /// Timer ticks elapsed since the timers last counted down.
    pub(crate) timer_ticks: u32,
    /// Keyboard input state.
    pub(crate) keypad: Keypad,
    pub(crate) state: ExecState,

    // ------------------------------------------------------------------------
    // Memory
    /// Main memory storage space.
    pub(crate) ram: Box<[u8; MEM_SIZE]>,
    /// Stack of return pointers used for jumping when a routine call finishes.
    pub(crate) stack: [Address; STACK_SIZE],
    /// Screen buffer that is drawn to. One byte per pixel, either 0 or 1.
    pub(crate) display: Box<[u8; DISPLAY_BUFFER_SIZE]>,
    /// Display buffer changed since the host last presented it.
    pub(crate) draw_flag: bool,
}

impl Default for Chip8Cpu {
    fn default() -> Self {
        let mut cpu = Self {
            pc: 0,
            sp: 0,
            registers: [0; REGISTER_COUNT],
            address: 0,
            delay_timer: 0,
            sound_timer: 0,
            timer_ticks: 0,
            keypad: Keypad::default(),
            state: ExecState::Running,

            ram: Box::new([0; MEM_SIZE]),
            stack: [0; STACK_SIZE],
            display: Box::new([0; DISPLAY_BUFFER_SIZE]),
            draw_flag: false,
        };
        cpu.reset();
        cpu
    }
}

impl Chip8Cpu {
    pub fn new() -> Self {
        Default::default()
    }

    /// Power-on state: memory cleared except for the font,
    /// and the program counter at the start of the program region.
    pub(crate) fn reset(&mut self) {
        self.ram.fill(0);
        self.ram[..FONTSET_DATA_LENGTH].copy_from_slice(&FONTSET);
        self.stack.fill(0);
        self.display.fill(0);
        self.registers.fill(0);
        self.keypad.clear();

        self.pc = MEM_START as Address;
        self.sp = 0;
        self.address = 0;
        self.delay_timer = 0;
        self.sound_timer = 0;
        self.timer_ticks = 0;
        self.state = ExecState::Running;
        self.draw_flag = false;
    }

    pub fn clear_display(&mut self) {
        self.display.fill(0);
        self.draw_flag = true;
    }

    /// Push the address of a call instruction onto the call stack.
    ///
    /// Nothing is modified when the stack is full.
    pub(crate) fn push(&mut self, call_site: Address) -> Chip8Result<()> {
        if self.sp >= STACK_SIZE {
            return Err(Chip8Error::StackOverflow { pc: call_site });
        }
        self.stack[self.sp] = call_site;
        self.sp += 1;
        Ok(())
    }

    /// Pop the most recent call site off the call stack, for the
    /// return instruction at `ret_addr`.
    ///
    /// Nothing is modified when the stack is empty.
    pub(crate) fn pop(&mut self, ret_addr: Address) -> Chip8Result<Address> {
        if self.sp == 0 {
            return Err(Chip8Error::StackUnderflow { pc: ret_addr });
        }
        self.sp -= 1;
        Ok(self.stack[self.sp])
    }

    /// Count down the delay timer.
    #[inline]
    pub(crate) fn tick_delay(&mut self) {
        self.delay_timer = self.delay_timer.saturating_sub(1);
    }

    #[inline]
    pub(crate) fn tick_sound(&mut self) {
        self.sound_timer = self.sound_timer.saturating_sub(1);
    }

    /// Extract the instruction word at the current program counter.
    #[inline(always)]
    pub(crate) fn instr(&self) -> u16 {
        self.instr_at(self.pc)
    }

    #[inline(always)]
    pub(crate) fn instr_at(&self, addr: Address) -> u16 {
        fetch(&*self.ram, addr as usize & ADDRESS_MASK)
    }

    /// Move the program counter, wrapped into the 12-bit address space.
    #[inline(always)]
    pub(crate) fn jump(&mut self, addr: Address) {
        self.pc = addr & ADDRESS_MASK as Address;
    }

    /// Memory address `offset` bytes past the `I` register, wrapped
    /// into the 12-bit address space.
    #[inline(always)]
    pub(crate) fn addr_offset(&self, offset: usize) -> usize {
        (self.address as usize + offset) & ADDRESS_MASK
    }
}

/// Read-only views
impl Chip8Cpu {
    pub fn pc(&self) -> Address {
        self.pc
    }

    pub fn sp(&self) -> usize {
        self.sp
    }

    pub fn registers(&self) -> &[u8; REGISTER_COUNT] {
        &self.registers
    }

    /// Index register `I`.
    pub fn index(&self) -> Address {
        self.address
    }

    pub fn delay_timer(&self) -> u8 {
        self.delay_timer
    }

    pub fn sound_timer(&self) -> u8 {
        self.sound_timer
    }

    pub fn state(&self) -> ExecState {
        self.state
    }

    pub fn ram(&self) -> &[u8; MEM_SIZE] {
        &self.ram
    }

    /// Return addresses currently on the stack, oldest first.
    pub fn stack(&self) -> &[Address] {
        &self.stack[..self.sp]
    }
}
