//! Virtual machine.
use std::{
    fmt::{self, Write},
    fs,
    path::Path,
    time::Duration,
};

use log::{debug, error, trace, warn};
use rand::prelude::*;

use crate::{
    clock::Clock,
    constants::*,
    cpu::{Chip8Cpu, ExecState},
    error::{Chip8Error, Chip8Result},
    instr::{Instr, Op},
    keypad::KeyCode,
};

/// Callback receiving a line for every executed instruction.
pub type TraceHook = Box<dyn FnMut(&TraceLine) + Send>;

pub struct Chip8Vm {
    cpu: Chip8Cpu,
    clock: Clock,
    rng: StdRng,
    trace_hook: Option<TraceHook>,
    conf: Chip8Conf,
}

impl Chip8Vm {
    pub fn new(conf: Chip8Conf) -> Self {
        Chip8Vm {
            cpu: Chip8Cpu::new(),
            clock: Clock::new(conf.clock_frequency.unwrap_or_default()),
            rng: seed_rng(conf.rng_seed),
            trace_hook: None,
            conf,
        }
    }

    /// Restore the machine to its power-on state.
    ///
    /// Any loaded program is erased.
    pub fn reset(&mut self) {
        debug!("reset");
        self.cpu.reset();
        self.clock.reset();
        if self.conf.rng_seed.is_some() {
            self.rng = seed_rng(self.conf.rng_seed);
        }
    }

    /// Reset the machine and copy the program into memory at `MEM_START`.
    ///
    /// Nothing is modified when the program is too large.
    pub fn load_bytecode(&mut self, bytecode: &[u8]) -> Chip8Result<()> {
        if !check_program_size(bytecode) {
            return Err(Chip8Error::ProgramTooLarge {
                size: bytecode.len(),
            });
        }

        // Start with clean memory to avoid leaking previous program.
        self.reset();

        // Load program into virtual RAM
        self.cpu.ram[MEM_START..MEM_START + bytecode.len()].copy_from_slice(bytecode);
        debug!("loaded program of {} bytes", bytecode.len());

        Ok(())
    }

    /// Read a ROM file and load it.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Chip8Result<()> {
        let bytecode = fs::read(path.as_ref()).map_err(Chip8Error::SourceUnavailable)?;
        self.load_bytecode(&bytecode)
    }

    pub fn cpu(&self) -> &Chip8Cpu {
        &self.cpu
    }

    pub fn pc(&self) -> Address {
        self.cpu.pc
    }

    pub fn display_buffer(&self) -> Chip8DisplayBuffer<'_> {
        &self.cpu.display
    }

    /// Whether the display buffer changed since the flag was last cleared.
    pub fn needs_redraw(&self) -> bool {
        self.cpu.draw_flag
    }

    /// Acknowledge that the display buffer has been presented.
    pub fn clear_redraw(&mut self) {
        self.cpu.draw_flag = false;
    }

    /// Checks and clears the redraw flag.
    pub fn take_redraw(&mut self) -> bool {
        std::mem::take(&mut self.cpu.draw_flag)
    }

    /// The buzzer should sound while the sound timer counts down.
    pub fn is_buzzing(&self) -> bool {
        self.cpu.sound_timer > 0
    }

    pub fn is_waiting_for_key(&self) -> bool {
        matches!(self.cpu.state, ExecState::AwaitingKey(_))
    }

    /// Install a callback that receives a line for each executed instruction.
    pub fn set_trace_hook(&mut self, hook: impl FnMut(&TraceLine) + Send + 'static) {
        self.trace_hook = Some(Box::new(hook));
    }
}

fn check_program_size(bytecode: &[u8]) -> bool {
    bytecode.len() <= PROGRAM_MAX_SIZE
}

fn seed_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Flow {
    Ok,
    /// Program counter has jumped to a new address.
    ///
    /// This is useful for the caller to avoid being
    /// blocked on infinite or long running loops.
    ///
    /// This is returned when the interpreter encounters:
    ///
    /// - 1nnn (`JP addr`)
    /// - 2nnn (`CALL addr`)
    /// - 00EE (`RET`)
    /// - Bnnn (`JP V0, addr`)
    Jump,
    /// The display buffer was modified.
    Draw,
    /// The sound timer was set.
    Sound,
    /// Wait for a keypress.
    ///
    /// This is triggered by the opcode `Fx0A` (`LD Vx, K`), which stops
    /// execution until a key is pressed, and loads the key value into `Vx`.
    KeyWait,
    /// The program jumped to its own address and can make no further progress.
    ///
    /// Only returned by [`Chip8Vm::run_steps`].
    Halt,
}

/// VM Configuration Parameters.
#[derive(Debug, Clone)]
pub struct Chip8Conf {
    /// Instruction rate of [`Chip8Vm::run_steps`]. Unthrottled when `None`.
    pub clock_frequency: Option<Hz>,
    /// Number of [`Chip8Vm::tick_timers`] calls per timer count down.
    ///
    /// Use 1 when ticking from a 60Hz source.
    pub timer_divider: u32,
    /// Log every executed instruction at trace level.
    pub trace: bool,
    /// Seed for the random number generator used by `Cxnn (RND Vx, byte)`.
    pub rng_seed: Option<u64>,
}

impl Default for Chip8Conf {
    fn default() -> Self {
        Self {
            clock_frequency: None,
            timer_divider: TIMER_DIVIDER,
            trace: false,
            rng_seed: None,
        }
    }
}

/// CPU clock frequency, in hertz (per second)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Hz(pub u64);

impl From<Hz> for Duration {
    fn from(freq: Hz) -> Self {
        if freq.0 == 0 {
            Duration::from_nanos(0)
        } else {
            Duration::from_nanos(NANOS_IN_SECOND / freq.0)
        }
    }
}

/// A single executed instruction, and where it left the program counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceLine {
    pub instr: Instr,
    pub pc: Address,
}

impl fmt::Display for TraceLine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:<32} pc={:04X}", self.instr.to_string(), self.pc)
    }
}

/// Interpreter
impl Chip8Vm {
    /// Sets the keyboard key input state.
    ///
    /// A machine waiting for input picks the key up on its next step.
    pub fn set_key(&mut self, key: KeyCode, pressed: bool) {
        self.cpu.keypad.set(key, pressed);
    }

    /// Clear the keyboard input state, setting all keys to up.
    pub fn clear_keys(&mut self) {
        self.cpu.keypad.clear()
    }

    pub fn keypad(&self) -> &[bool; KEY_COUNT] {
        self.cpu.keypad.as_array()
    }

    /// Count down the delay and sound timers once every
    /// `timer_divider` calls.
    pub fn tick_timers(&mut self) {
        self.cpu.timer_ticks += 1;
        if self.cpu.timer_ticks >= self.conf.timer_divider.max(1) {
            self.cpu.timer_ticks = 0;
            self.cpu.tick_delay();
            self.cpu.tick_sound();
        }
    }

    /// Execute up to `step_count` instructions, ticking the timers
    /// after each one.
    ///
    /// Returns early when the machine stalls waiting for input, or
    /// when the program jumps to its own address.
    pub fn run_steps(&mut self, step_count: usize) -> Chip8Result<Flow> {
        self.clock.reset();

        for _ in 0..step_count {
            if self.conf.clock_frequency.is_some() {
                self.clock.wait();
            }

            let pc = self.cpu.pc;
            let flow = self.step()?;
            self.tick_timers();

            match flow {
                Flow::KeyWait => return Ok(Flow::KeyWait),
                Flow::Jump if self.is_halted_at(pc) => return Ok(Flow::Halt),
                _ => {}
            }
        }

        Ok(Flow::Ok)
    }

    /// Whether the instruction at `pc` is a jump back onto itself.
    ///
    /// A call to its own address keeps growing the stack, so it
    /// does not count.
    fn is_halted_at(&self, pc: Address) -> bool {
        self.cpu.pc == pc
            && matches!(
                Op::decode(self.cpu.instr_at(pc)),
                Op::JumpAddress { .. } | Op::Jump_V0 { .. }
            )
    }

    /// Execute a single instruction.
    ///
    /// A stack fault leaves the machine untouched, with the program
    /// counter on the faulting instruction.
    pub fn step(&mut self) -> Chip8Result<Flow> {
        if let ExecState::AwaitingKey(vx) = self.cpu.state {
            return Ok(self.resume_key_wait(vx));
        }

        let pc = self.cpu.pc;
        let instr = Instr::decode(pc, self.cpu.instr());

        // Each instruction is two bytes.
        self.cpu.jump(pc.wrapping_add(2));

        match self.exec(&instr) {
            Ok(control_flow) => {
                self.trace(&instr);
                Ok(control_flow)
            }
            Err(err) => {
                self.cpu.pc = pc;
                error!("{err}");
                Err(err)
            }
        }
    }

    fn resume_key_wait(&mut self, vx: u8) -> Flow {
        match self.cpu.keypad.first_pressed() {
            Some(key) => {
                let pc = self.cpu.pc;
                self.cpu.registers[vx as usize] = key.as_u8();
                self.cpu.jump(pc.wrapping_add(2));
                self.cpu.state = ExecState::Running;

                let instr = Instr::decode(pc, self.cpu.instr_at(pc));
                self.trace(&instr);
                Flow::Ok
            }
            None => Flow::KeyWait,
        }
    }

    fn trace(&mut self, instr: &Instr) {
        if !self.conf.trace && self.trace_hook.is_none() {
            return;
        }

        let line = TraceLine {
            instr: *instr,
            pc: self.cpu.pc,
        };
        if self.conf.trace {
            trace!("{line}");
        }
        if let Some(hook) = self.trace_hook.as_mut() {
            hook(&line);
        }
    }

    #[inline]
    fn skip_if(&mut self, cond: bool) {
        if cond {
            self.cpu.jump(self.cpu.pc.wrapping_add(2));
        }
    }

    /// Execute a decoded instruction.
    ///
    /// The program counter already points to the following instruction.
    fn exec(&mut self, instr: &Instr) -> Chip8Result<Flow> {
        let mut control_flow = Flow::Ok;

        match instr.op {
            // 00E0 (CLS)
            //
            // Clear display
            Op::ClearScreen => {
                self.cpu.clear_display();
                control_flow = Flow::Draw;
            }
            // 00EE (RET)
            //
            // Return from a subroutine.
            // The stack holds the address of the call, so execution
            // continues after it.
            Op::Return => {
                let call_site = self.cpu.pop(instr.addr)?;
                self.cpu.jump(call_site.wrapping_add(2));
                control_flow = Flow::Jump;
            }
            // 1NNN (JP addr)
            //
            // Jump to address.
            Op::JumpAddress { address } => {
                self.cpu.jump(address);
                control_flow = Flow::Jump;
            }
            // 2NNN (CALL addr)
            //
            // Call subroutine at NNN.
            Op::Call { address } => {
                self.cpu.push(instr.addr)?;
                self.cpu.jump(address);
                control_flow = Flow::Jump;
            }
            // 3XNN (SE Vx, byte)
            //
            // Skip the next instruction if register VX equals value NN.
            Op::Skip_Eq_Byte { vx, nn } => {
                self.skip_if(self.cpu.registers[vx as usize] == nn);
            }
            // 4XNN (SNE Vx, byte)
            //
            // Skip the next instruction if register VX does not equal value NN.
            Op::Skip_NotEq_Byte { vx, nn } => {
                self.skip_if(self.cpu.registers[vx as usize] != nn);
            }
            // 5XY0 (SE Vx, Vy)
            //
            // Skip the next instruction if register VX equals value VY.
            Op::Skip_Eq { vx, vy } => {
                let x = self.cpu.registers[vx as usize];
                let y = self.cpu.registers[vy as usize];
                self.skip_if(x == y);
            }
            // 6XNN (LD Vx, byte)
            //
            // Set register VX to value NN.
            Op::Load_Byte { vx, nn } => {
                self.cpu.registers[vx as usize] = nn;
            }
            // 7xnn (ADD Vx, byte)
            //
            // Add value NN to register VX. Carry flag is not set.
            Op::Add_Byte { vx, nn } => {
                let x = self.cpu.registers[vx as usize];
                self.cpu.registers[vx as usize] = x.wrapping_add(nn);
            }
            // 9xy0 (SNE Vx, Vy)
            //
            // Skip next instruction if Vx != Vy.
            Op::Skip_NotEq { vx, vy } => {
                let x = self.cpu.registers[vx as usize];
                let y = self.cpu.registers[vy as usize];
                self.skip_if(x != y);
            }
            // Annn (LD I, addr)
            //
            // Set address register I to value NNN.
            Op::Load_Address { address } => {
                self.cpu.address = address;
            }
            // Bnnn (JP V0, addr)
            //
            // Jump to address NNN offset by register V0.
            Op::Jump_V0 { address } => {
                self.cpu.jump(address.wrapping_add(self.cpu.registers[0] as Address));
                control_flow = Flow::Jump;
            }
            // CXNN (RND Vx, byte)
            //
            // Set register VX to the result of bitwise AND between a random number and NN.
            Op::Random { vx, nn } => {
                self.cpu.registers[vx as usize] = nn & self.rng.gen::<u8>();
            }
            Op::Draw { vx, vy, n } => {
                self.exec_draw(vx, vy, n);
                control_flow = Flow::Draw;
            }
            // Ex9E (SKP Vx)
            //
            // Skip the next instruction if the key with the value of Vx is pressed.
            Op::Skip_Key { vx } => {
                let key = self.cpu.registers[vx as usize];
                self.skip_if(self.cpu.keypad.is_pressed(key));
            }
            // ExA1 (SKNP Vx)
            Op::Skip_NotKey { vx } => {
                let key = self.cpu.registers[vx as usize];
                self.skip_if(!self.cpu.keypad.is_pressed(key));
            }
            Op::Unknown => {
                warn!(
                    "{:04X}: unsupported opcode {:04X}, skipped",
                    instr.addr, instr.word
                );
            }
            // Arithmetic results are computed from the operands as they were
            // before the instruction. The flag is written last, so it wins
            // when the destination is VF.
            //
            // 8XY0 (LD Vx, Vy)
            //
            // Store the value of register VY in register VX.
            Op::Load_Vx_Vy { vx, vy } => {
                self.cpu.registers[vx as usize] = self.cpu.registers[vy as usize];
            }
            // 8XY1 (OR Vx, Vy)
            Op::Or_Vx_Vy { vx, vy } => {
                self.cpu.registers[vx as usize] |= self.cpu.registers[vy as usize];
            }
            // 8XY2 (AND Vx, Vy)
            Op::And_Vx_Vy { vx, vy } => {
                self.cpu.registers[vx as usize] &= self.cpu.registers[vy as usize];
            }
            // 8XY3 (XOR Vx, Vy)
            Op::Xor_Vx_Vy { vx, vy } => {
                self.cpu.registers[vx as usize] ^= self.cpu.registers[vy as usize];
            }
            // 8XY4 (ADD Vx, Vy)
            //
            // ADDs VY to VX, and stores the result in VX.
            // Overflow is wrapped.
            // If overflow, set VF to 1, else 0.
            Op::Add_Vx_Vy { vx, vy } => {
                let (result, carry) = self.cpu.registers[vx as usize].overflowing_add(self.cpu.registers[vy as usize]);
                self.cpu.registers[vx as usize] = result;
                self.cpu.registers[FLAG_REGISTER] = carry as u8;
            }
            // 8XY5 (SUB Vx, Vy)
            //
            // Subtracts VY from VX, and stores the result in VX.
            // VF is set to 0 when there is a borrow, set to 1 when there isn't.
            Op::Sub_Vx_Vy { vx, vy } => {
                let (x, y) = (self.cpu.registers[vx as usize], self.cpu.registers[vy as usize]);
                self.cpu.registers[vx as usize] = x.wrapping_sub(y);
                self.cpu.registers[FLAG_REGISTER] = (x >= y) as u8;
            }
            // 8XY6 (SHR Vx)
            //
            // VF is set to the least-significant bit of Vx.
            // Shift VX right by 1.
            // VY is unused.
            Op::ShiftRight { vx } => {
                let x = self.cpu.registers[vx as usize];
                self.cpu.registers[vx as usize] = x >> 1;
                self.cpu.registers[FLAG_REGISTER] = x & 1;
            }
            // 8XY7 (SUBN Vx, Vy)
            //
            // Subtracts VX from VY, and stores the result in VX.
            // VF is set to 0 when there is a borrow, set to 1 when there isn't.
            Op::SubReverse_Vx_Vy { vx, vy } => {
                let (x, y) = (self.cpu.registers[vx as usize], self.cpu.registers[vy as usize]);
                self.cpu.registers[vx as usize] = y.wrapping_sub(x);
                self.cpu.registers[FLAG_REGISTER] = (y >= x) as u8;
            }
            // 8XYE (SHL Vx)
            //
            // VF is set to the most-significant bit of Vx.
            // Shift VX left by 1.
            // VY is unused.
            Op::ShiftLeft { vx } => {
                let x = self.cpu.registers[vx as usize];
                self.cpu.registers[vx as usize] = x << 1;
                self.cpu.registers[FLAG_REGISTER] = x >> 7;
            }
            // Fx07 (LD Vx, DT)
            //
            // Set Vx = delay timer value.
            Op::Load_Vx_Delay { vx } => {
                self.cpu.registers[vx as usize] = self.cpu.delay_timer;
            }
            // Fx0A (LD Vx, K)
            //
            // Wait for a key press, store the value of the key in Vx.
            // All execution stops until a key is pressed, then the value of that key is stored in Vx.
            Op::Load_Vx_Key { vx } => {
                if let Some(key) = self.cpu.keypad.first_pressed() {
                    self.cpu.registers[vx as usize] = key.as_u8();
                } else {
                    // rewind the program counter to stall the machine
                    self.cpu.pc = instr.addr;
                    self.cpu.state = ExecState::AwaitingKey(vx);
                    control_flow = Flow::KeyWait;
                }
            }
            // Fx15 (LD DT, Vx)
            //
            // Set delay timer = Vx.
            // A partially elapsed timer tick is discarded.
            Op::Load_Delay_Vx { vx } => {
                self.cpu.delay_timer = self.cpu.registers[vx as usize];
                self.cpu.timer_ticks = 0;
            }
            // Fx18 (LD ST, Vx)
            //
            // Set sound timer = Vx.
            Op::Load_Sound_Vx { vx } => {
                self.cpu.sound_timer = self.cpu.registers[vx as usize];
                self.cpu.timer_ticks = 0;
                control_flow = Flow::Sound;
            }
            // Fx1E (ADD I, Vx)
            //
            // Add Vx to I. VF is set when the result leaves the
            // 12-bit address space, and I wraps around.
            Op::Add_Address_Vx { vx } => {
                let sum = self.cpu.address as usize + self.cpu.registers[vx as usize] as usize;
                self.cpu.address = (sum & ADDRESS_MASK) as Address;
                self.cpu.registers[FLAG_REGISTER] = (sum > ADDRESS_MASK) as u8;
            }
            // Fx29 (LD F, Vx)
            //
            // Set I = location of sprite for digit Vx.
            Op::Load_Glyph { vx } => {
                let x = self.cpu.registers[vx as usize];
                self.cpu.address = FONTSET_START + (x as Address) * FONTSET_HEIGHT as Address;
            }
            // Fx33 (LD B, Vx)
            //
            // Store the binary-coded decimal representation of Vx
            // in the memory locations I, I+1, and I+2.
            #[rustfmt::skip]
            Op::Load_Bcd { vx } => {
                let x = self.cpu.registers[vx as usize];
                let (a, b, c) = (self.cpu.addr_offset(0), self.cpu.addr_offset(1), self.cpu.addr_offset(2));
                self.cpu.ram[a] = x / 100 % 10;
                self.cpu.ram[b] = x / 10  % 10;
                self.cpu.ram[c] = x       % 10;
            }
            // Fx55 (LD [I], Vx)
            //
            // Store registers V0 through Vx in memory starting at location I.
            // I is left unchanged.
            Op::Store_Registers { vx } => {
                for v in 0..=vx as usize {
                    let addr = self.cpu.addr_offset(v);
                    self.cpu.ram[addr] = self.cpu.registers[v];
                }
            }
            // Fx65 (LD Vx, [I])
            //
            // Read registers V0 through Vx from memory starting at location I.
            Op::Load_Registers { vx } => {
                for v in 0..=vx as usize {
                    self.cpu.registers[v] = self.cpu.ram[self.cpu.addr_offset(v)];
                }
            }
        }

        Ok(control_flow)
    }

    /// Dxyn (DRW Vx, Vy, nibble)
    ///
    /// Draw sprite to the display buffer, at coordinate as per registers Vx and Vy.
    /// Sprite is encoded as 8 pixels wide, N pixels high, stored in bits located in
    /// memory pointed to by address register I.
    ///
    /// If the sprite is drawn outside of the display area, it is wrapped around to the other side.
    ///
    /// If the drawing operation erases existing pixels in the display buffer, register VF is set to
    /// 1, and set to 0 if no display bits are unset. This is used for collision detection.
    fn exec_draw(&mut self, vx: u8, vy: u8, n: u8) {
        let (x, y) = (
            self.cpu.registers[vx as usize] as usize,
            self.cpu.registers[vy as usize] as usize,
        );
        let mut is_erased = false;

        for r in 0..n as usize {
            // Each row is 8 bits representing the 8 pixels of the sprite.
            let row = self.cpu.ram[self.cpu.addr_offset(r)];

            for c in 0..SPRITE_WIDTH {
                if row & (0x80 >> c) == 0 {
                    continue;
                }

                let d = (x + c) % DISPLAY_WIDTH + ((y + r) % DISPLAY_HEIGHT) * DISPLAY_WIDTH;

                // XOR erases a pixel when both the old and new values are both 1.
                is_erased |= self.cpu.display[d] == 1;
                self.cpu.display[d] ^= 1;
            }
        }

        // If a pixel was erased, then a collision occurred.
        self.cpu.registers[FLAG_REGISTER] = is_erased as u8;
        self.cpu.draw_flag = true;
    }
}

/// Troubleshooting
impl Chip8Vm {
    /// Returns the contents of the program memory as a human readable string.
    pub fn dump_ram(&self, count: usize) -> Result<String, fmt::Error> {
        let mut buf = String::new();

        for i in (MEM_START..(MEM_START + count).min(MEM_SIZE)).step_by(2) {
            writeln!(buf, "{:04X}: {:04X}", i, self.cpu.instr_at(i as Address))?;
        }

        Ok(buf)
    }

    pub fn dump_display(&self) -> Result<String, fmt::Error> {
        let mut buf = String::new();

        for y in 0..DISPLAY_HEIGHT {
            for x in 0..DISPLAY_WIDTH {
                if self.cpu.display[x + y * DISPLAY_WIDTH] != 0 {
                    write!(buf, "#")?;
                } else {
                    write!(buf, ".")?;
                }
            }
            writeln!(buf)?;
        }

        Ok(buf)
    }

    pub fn dump_keys(&self) -> Result<String, fmt::Error> {
        let mut buf = String::new();

        if self.cpu.keypad.any() {
            write!(buf, "keys:")?;
            for key in KeyCode::ALL {
                if self.cpu.keypad.is_pressed(key.as_u8()) {
                    write!(buf, " {key}")?;
                }
            }
        }

        Ok(buf)
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn vm_with(program: &[u8]) -> Chip8Vm {
        let mut vm = Chip8Vm::new(Chip8Conf {
            rng_seed: Some(1),
            ..Chip8Conf::default()
        });
        vm.load_bytecode(program).unwrap();
        vm
    }

    #[test]
    fn test_clock_hz() {
        let interval: Duration = Hz(60).into();
        assert_eq!(interval.as_millis(), 16);
        assert_eq!(Duration::from(Hz(0)), Duration::ZERO);
    }

    /// Fx0A (LD Vx, K)
    ///
    /// Wait for a keypress, then store the key value in Vx.
    /// The VM must stall while waiting, and signal the state to the outer executer.
    #[test]
    #[rustfmt::skip]
    fn test_key_wait() {
        let mut vm = vm_with(&[
            0xF1, 0x0A, // LD v1, K
            0x62, 0x42  // LD v2, 0x42  ; sentinal
        ]);

        // machine must stall
        for _ in 0..6 {
            assert_eq!(vm.step().unwrap(), Flow::KeyWait);
            assert_eq!(vm.cpu.pc, MEM_START as Address);
            assert_eq!(vm.cpu.state, ExecState::AwaitingKey(1));
        }

        // machine has yielded, waiting for any key to be pressed.
        vm.set_key(KeyCode::Key5, true);
        assert!(vm.is_waiting_for_key());

        // machine will now advance
        assert_eq!(vm.step().unwrap(), Flow::Ok);
        assert_eq!(vm.cpu.pc, MEM_START as Address + 2);
        assert_eq!(vm.cpu.registers[1], 0x05);
        assert_eq!(vm.cpu.state, ExecState::Running);

        // Ensure the machine is continuing
        vm.step().unwrap();
        assert_eq!(vm.cpu.pc, MEM_START as Address + 4);
        assert_eq!(vm.cpu.registers[2], 0x42); // sentinal
    }

    #[test]
    fn test_key_wait_with_key_already_down() {
        let mut vm = vm_with(&[0xF3, 0x0A]);
        vm.set_key(KeyCode::KeyC, true);
        vm.set_key(KeyCode::KeyE, true);

        assert_eq!(vm.step().unwrap(), Flow::Ok);
        assert_eq!(vm.cpu.registers[3], 0xC);
        assert_eq!(vm.cpu.pc, 0x202);
    }

    /// Booleans must be cast to u8 1 or 0
    #[test]
    fn test_assert_bool_cast() {
        assert_eq!(true as u8, 1);
        assert_eq!(false as u8, 0);
    }

    #[test]
    #[rustfmt::skip]
    fn test_draw_collision() {
        // Draw two pixels next to each other.
        // The zero bits of the second draw must not erase
        // the pixels of the first draw
        //
        // draw sprite 1
        // ____####, vf == 0
        //
        // draw sprite 2
        // ####____, vf == 0
        let mut vm = vm_with(&[
            0xA2, 0x0C, // LD I, .sprite
            0x60, 0x04, // LD v0, 4
            0x61, 0x00, // LD v1, 0
            0xD0, 0x11, // DRW v0, v1, 1
            0x60, 0x00, // LD v0, 0
            0xD0, 0x11, // DRW v0, v1, 1
            // .sprite
            0b11110000,
            0b00000000,
        ]);

        vm.run_steps(6).unwrap();

        assert_eq!(vm.display_buffer()[0], 1); // sprite 2
        assert_eq!(vm.display_buffer()[4], 1); // sprite 1
        assert_eq!(vm.display_buffer()[8], 0);
        assert_eq!(vm.cpu.registers[0xF], 0);
    }

    #[test]
    #[rustfmt::skip]
    fn test_draw_sets_redraw_without_change() {
        let mut vm = vm_with(&[
            0xA2, 0x04, // LD I, .sprite
            0xD0, 0x01, // DRW v0, v0, 1
            // .sprite
            0x00, 0x00,
        ]);
        vm.run_steps(2).unwrap();
        assert!(vm.take_redraw());
        assert!(!vm.needs_redraw());
        assert!(vm.display_buffer().iter().all(|px| *px == 0));
    }

    #[test]
    #[rustfmt::skip]
    fn test_draw_wraps_horizontally() {
        let mut vm = vm_with(&[
            0xA2, 0x08, // LD I, .sprite
            0x60, 0x3C, // LD v0, 60
            0x61, 0x02, // LD v1, 2
            0xD0, 0x11, // DRW v0, v1, 1
            // .sprite
            0xFF, 0x00,
        ]);
        vm.run_steps(4).unwrap();

        let row = &vm.display_buffer()[2 * DISPLAY_WIDTH..3 * DISPLAY_WIDTH];
        assert_eq!(&row[60..64], &[1, 1, 1, 1]);
        assert_eq!(&row[0..4], &[1, 1, 1, 1]);
        assert_eq!(row[4], 0);
        assert_eq!(vm.display_buffer().iter().filter(|px| **px == 1).count(), 8);
    }

    #[test]
    #[rustfmt::skip]
    fn test_draw_wraps_vertically() {
        let mut vm = vm_with(&[
            0xA2, 0x08, // LD I, .sprite
            0x60, 0x05, // LD v0, 5
            0x61, 0x1F, // LD v1, 31
            0xD0, 0x13, // DRW v0, v1, 3
            // .sprite
            0x80, 0x80, 0x80, 0x00,
        ]);
        vm.run_steps(4).unwrap();

        let px = |x: usize, y: usize| vm.display_buffer()[x + y * DISPLAY_WIDTH];
        assert_eq!(px(5, 31), 1);
        assert_eq!(px(5, 0), 1);
        assert_eq!(px(5, 1), 1);
        assert_eq!(px(5, 2), 0);
    }

    #[test]
    #[rustfmt::skip]
    fn test_draw_start_coordinate_wraps() {
        let mut vm = vm_with(&[
            0xA2, 0x08, // LD I, .sprite
            0x60, 0x41, // LD v0, 65
            0x61, 0x21, // LD v1, 33
            0xD0, 0x11, // DRW v0, v1, 1
            // .sprite
            0x80, 0x00,
        ]);
        vm.run_steps(4).unwrap();
        assert_eq!(vm.display_buffer()[1 + DISPLAY_WIDTH], 1);
    }

    #[test]
    #[rustfmt::skip]
    fn test_arithmetic_flags() {
        let mut vm = vm_with(&[
            0x60, 0xF0, // LD v0, 0xF0
            0x61, 0x20, // LD v1, 0x20
            0x80, 0x14, // ADD v0, v1
        ]);
        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu.registers[0], 0x10);
        assert_eq!(vm.cpu.registers[0xF], 1);

        let mut vm = vm_with(&[
            0x60, 0x10, // LD v0, 0x10
            0x61, 0x20, // LD v1, 0x20
            0x80, 0x15, // SUB v0, v1
        ]);
        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu.registers[0], 0xF0);
        assert_eq!(vm.cpu.registers[0xF], 0);

        let mut vm = vm_with(&[
            0x60, 0x20, // LD v0, 0x20
            0x61, 0x20, // LD v1, 0x20
            0x80, 0x15, // SUB v0, v1
        ]);
        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu.registers[0], 0x00);
        assert_eq!(vm.cpu.registers[0xF], 1, "equal operands do not borrow");

        let mut vm = vm_with(&[
            0x60, 0x30, // LD v0, 0x30
            0x61, 0x20, // LD v1, 0x20
            0x80, 0x17, // SUBN v0, v1
        ]);
        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu.registers[0], 0xF0);
        assert_eq!(vm.cpu.registers[0xF], 0);

        let mut vm = vm_with(&[
            0x60, 0x20, // LD v0, 0x20
            0x61, 0x30, // LD v1, 0x30
            0x80, 0x17, // SUBN v0, v1
        ]);
        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu.registers[0], 0x10);
        assert_eq!(vm.cpu.registers[0xF], 1);

        let mut vm = vm_with(&[
            0x60, 0x30, // LD v0, 0x30
            0x61, 0x30, // LD v1, 0x30
            0x80, 0x17, // SUBN v0, v1
        ]);
        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu.registers[0], 0x00);
        assert_eq!(vm.cpu.registers[0xF], 1, "equal operands do not borrow");
    }

    #[test]
    #[rustfmt::skip]
    fn test_shifts() {
        let mut vm = vm_with(&[
            0x60, 0x81, // LD v0, 0b1000_0001
            0x80, 0x06, // SHR v0
        ]);
        vm.run_steps(2).unwrap();
        assert_eq!(vm.cpu.registers[0], 0x40);
        assert_eq!(vm.cpu.registers[0xF], 1);

        let mut vm = vm_with(&[
            0x60, 0x82, // LD v0, 0b1000_0010
            0x6F, 0x01, // LD vF, 1
            0x80, 0x06, // SHR v0
        ]);
        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu.registers[0], 0x41);
        assert_eq!(vm.cpu.registers[0xF], 0);

        let mut vm = vm_with(&[
            0x60, 0x81, // LD v0, 0b1000_0001
            0x80, 0x0E, // SHL v0
        ]);
        vm.run_steps(2).unwrap();
        assert_eq!(vm.cpu.registers[0], 0x02);
        assert_eq!(vm.cpu.registers[0xF], 1);
    }

    #[test]
    #[rustfmt::skip]
    fn test_flag_wins_over_result_in_vf() {
        let mut vm = vm_with(&[
            0x6F, 0xFF, // LD vF, 0xFF
            0x61, 0x01, // LD v1, 1
            0x8F, 0x14, // ADD vF, v1
        ]);
        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu.registers[0xF], 1);
    }

    #[test]
    #[rustfmt::skip]
    fn test_logic_ops() {
        let mut vm = vm_with(&[
            0x60, 0b1100, // LD v0
            0x61, 0b1010, // LD v1
            0x82, 0x00,   // LD v2, v0
            0x82, 0x11,   // OR v2, v1
            0x83, 0x00,   // LD v3, v0
            0x83, 0x12,   // AND v3, v1
            0x84, 0x00,   // LD v4, v0
            0x84, 0x13,   // XOR v4, v1
        ]);
        vm.run_steps(8).unwrap();
        assert_eq!(vm.cpu.registers[2], 0b1110);
        assert_eq!(vm.cpu.registers[3], 0b1000);
        assert_eq!(vm.cpu.registers[4], 0b0110);
        assert_eq!(vm.cpu.pc, 0x210);
    }

    #[test]
    #[rustfmt::skip]
    fn test_skips() {
        let mut vm = vm_with(&[
            0x60, 0x07, // LD v0, 7
            0x30, 0x07, // SE v0, 7     ; taken
            0x00, 0x00,
            0x40, 0x07, // SNE v0, 7    ; not taken
            0x51, 0x20, // SE v1, v2    ; taken
            0x00, 0x00,
            0x90, 0x10, // SNE v0, v1   ; taken
            0x00, 0x00,
            0x12, 0x10, // JP 0x210
        ]);
        assert_eq!(vm.run_steps(100).unwrap(), Flow::Halt);
        assert_eq!(vm.cpu.pc, 0x210);
    }

    #[test]
    #[rustfmt::skip]
    fn test_jump_offset() {
        let mut vm = vm_with(&[
            0x60, 0x04, // LD v0, 4
            0xB3, 0x00, // JP v0, 0x300
        ]);
        vm.step().unwrap();
        assert_eq!(vm.step().unwrap(), Flow::Jump);
        assert_eq!(vm.cpu.pc, 0x304);
    }

    #[test]
    #[rustfmt::skip]
    fn test_key_skips() {
        let mut vm = vm_with(&[
            0x60, 0x0A, // LD v0, 0xA
            0xE0, 0x9E, // SKP v0
            0xE0, 0xA1, // SKNP v0
            0x00, 0x00,
        ]);
        vm.set_key(KeyCode::KeyA, true);
        vm.run_steps(2).unwrap();
        assert_eq!(vm.cpu.pc, 0x206);

        vm.load_bytecode(&[
            0x60, 0x0A, // LD v0, 0xA
            0xE0, 0x9E, // SKP v0
            0xE0, 0xA1, // SKNP v0
            0x00, 0x00,
        ]).unwrap();
        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu.pc, 0x208);
    }

    #[test]
    #[rustfmt::skip]
    fn test_index_add_wraps() {
        let mut vm = vm_with(&[
            0xAF, 0xFE, // LD I, 0xFFE
            0x60, 0x01, // LD v0, 1
            0xF0, 0x1E, // ADD I, v0
            0xF0, 0x1E, // ADD I, v0
            0xF0, 0x1E, // ADD I, v0
        ]);
        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu.address, 0xFFF);
        assert_eq!(vm.cpu.registers[0xF], 0);

        vm.step().unwrap();
        assert_eq!(vm.cpu.address, 0x000);
        assert_eq!(vm.cpu.registers[0xF], 1);

        vm.step().unwrap();
        assert_eq!(vm.cpu.address, 0x001);
        assert_eq!(vm.cpu.registers[0xF], 0);
    }

    #[test]
    #[rustfmt::skip]
    fn test_glyph_address() {
        let mut vm = vm_with(&[
            0x60, 0x0B, // LD v0, 0xB
            0xF0, 0x29, // LD F, v0
        ]);
        vm.run_steps(2).unwrap();
        assert_eq!(vm.cpu.address, 0xB * 5);
        assert_eq!(vm.cpu.ram[55], 0xE0);
    }

    #[test]
    #[rustfmt::skip]
    fn test_store_and_load_registers() {
        let mut vm = vm_with(&[
            0x60, 0x11, // LD v0, 0x11
            0x61, 0x22, // LD v1, 0x22
            0x62, 0x33, // LD v2, 0x33
            0xA3, 0x00, // LD I, 0x300
            0xF1, 0x55, // LD [I], v1
            0x60, 0x00, // LD v0, 0
            0x61, 0x00, // LD v1, 0
            0xF2, 0x65, // LD v2, [I]
        ]);
        vm.run_steps(5).unwrap();
        assert_eq!(&vm.cpu.ram[0x300..0x303], &[0x11, 0x22, 0x00]);
        assert_eq!(vm.cpu.address, 0x300);

        vm.run_steps(3).unwrap();
        assert_eq!(&vm.cpu.registers[0..3], &[0x11, 0x22, 0x00]);
    }

    #[test]
    #[rustfmt::skip]
    fn test_bcd_wraps_past_end_of_memory() {
        let mut vm = vm_with(&[
            0x60, 0xFF, // LD v0, 255
            0xAF, 0xFF, // LD I, 0xFFF
            0xF0, 0x33, // LD B, v0
        ]);
        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu.ram[0xFFF], 2);
        assert_eq!(vm.cpu.ram[0x000], 5);
        assert_eq!(vm.cpu.ram[0x001], 5);
    }

    #[test]
    #[rustfmt::skip]
    fn test_random_is_masked() {
        let mut vm = vm_with(&[
            0xC0, 0x0F, // RND v0, 0x0F
            0xC1, 0x00, // RND v1, 0
        ]);
        vm.run_steps(2).unwrap();
        assert_eq!(vm.cpu.registers[0] & 0xF0, 0);
        assert_eq!(vm.cpu.registers[1], 0);
    }

    #[test]
    fn test_random_is_seeded() {
        let program = [0xC0, 0xFF, 0xC1, 0xFF, 0xC2, 0xFF];
        let mut a = vm_with(&program);
        let mut b = vm_with(&program);
        a.run_steps(3).unwrap();
        b.run_steps(3).unwrap();
        assert_eq!(a.cpu.registers, b.cpu.registers);
    }

    #[test]
    fn test_unknown_opcode_is_skipped() {
        let mut vm = vm_with(&[0x01, 0x23, 0x8A, 0xB9, 0x60, 0x01]);
        assert_eq!(vm.step().unwrap(), Flow::Ok);
        assert_eq!(vm.step().unwrap(), Flow::Ok);
        assert_eq!(vm.cpu.pc, 0x204);
        vm.step().unwrap();
        assert_eq!(vm.cpu.registers[0], 1);
    }

    #[test]
    fn test_stack_overflow_is_fatal() {
        // CALL 0x200, recursing forever
        let mut vm = vm_with(&[0x22, 0x00]);
        for _ in 0..STACK_SIZE {
            assert_eq!(vm.step().unwrap(), Flow::Jump);
        }
        assert!(matches!(
            vm.step(),
            Err(Chip8Error::StackOverflow { pc: 0x200 })
        ));
        assert_eq!(vm.cpu.pc, 0x200);
        assert_eq!(vm.cpu.sp, STACK_SIZE);
    }

    #[test]
    fn test_recursive_call_is_not_a_halt() {
        // CALL 0x200
        let mut vm = vm_with(&[0x22, 0x00]);
        assert!(matches!(
            vm.run_steps(100),
            Err(Chip8Error::StackOverflow { pc: 0x200 })
        ));
        assert_eq!(vm.cpu.sp, STACK_SIZE);
    }

    #[test]
    fn test_program_counter_wraps() {
        let mut program = vec![0; PROGRAM_MAX_SIZE];
        // JP 0xFFE
        program[0..2].copy_from_slice(&[0x1F, 0xFE]);
        // LD v0, 7
        program[0xFFE - MEM_START..].copy_from_slice(&[0x60, 0x07]);
        let mut vm = vm_with(&program);

        vm.step().unwrap();
        assert_eq!(vm.pc(), 0xFFE);
        vm.step().unwrap();
        assert_eq!(vm.cpu.registers[0], 7);
        assert_eq!(vm.pc(), 0x000);

        // CALL 0xFFE, returning past the end of memory
        vm.load_bytecode(&[0x2F, 0xFE]).unwrap();
        vm.cpu.ram[0xFFE..].copy_from_slice(&[0x00, 0xEE]);
        vm.step().unwrap();
        vm.step().unwrap();
        assert_eq!(vm.pc(), 0x202);

        vm.cpu.jump(0xFFE);
        vm.cpu.ram[0xFFE..].copy_from_slice(&[0x30, 0x00]); // SE v0, 0
        vm.step().unwrap();
        assert_eq!(vm.pc(), 0x002);
    }

    #[test]
    fn test_stack_underflow_is_fatal() {
        let mut vm = vm_with(&[0x00, 0xEE]);
        assert!(matches!(
            vm.step(),
            Err(Chip8Error::StackUnderflow { pc: 0x200 })
        ));
        assert_eq!(vm.cpu.pc, 0x200);
        assert_eq!(vm.cpu.sp, 0);
        assert!(vm.run_steps(1).is_err());
    }

    #[test]
    fn test_timer_set_discards_partial_tick() {
        // LD v0, 3 ; LD DT, v0 ; JP 0x204
        let mut vm = vm_with(&[0x60, 0x03, 0xF0, 0x15, 0x12, 0x04]);
        vm.step().unwrap();
        for _ in 0..5 {
            vm.tick_timers();
        }
        vm.step().unwrap();
        assert_eq!(vm.cpu.timer_ticks, 0);

        for _ in 0..8 {
            vm.tick_timers();
        }
        assert_eq!(vm.cpu.delay_timer, 3);
        vm.tick_timers();
        assert_eq!(vm.cpu.delay_timer, 2);
    }

    #[test]
    fn test_timer_divider_of_one() {
        let mut vm = Chip8Vm::new(Chip8Conf {
            timer_divider: 1,
            ..Chip8Conf::default()
        });
        // LD v0, 2 ; LD ST, v0
        vm.load_bytecode(&[0x60, 0x02, 0xF0, 0x18]).unwrap();
        vm.step().unwrap();
        assert_eq!(vm.step().unwrap(), Flow::Sound);
        assert!(vm.is_buzzing());
        vm.tick_timers();
        vm.tick_timers();
        assert!(!vm.is_buzzing());
        vm.tick_timers();
        assert_eq!(vm.cpu.sound_timer, 0);
    }

    #[test]
    fn test_trace_hook() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let mut vm = vm_with(&[0x60, 0x2A, 0x12, 0x00]);
        {
            let lines = lines.clone();
            vm.set_trace_hook(move |line| lines.lock().unwrap().push(*line));
        }
        vm.run_steps(2).unwrap();

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].instr.op, Op::Load_Byte { vx: 0, nn: 0x2A });
        assert_eq!(lines[0].pc, 0x202);
        assert_eq!(lines[1].instr.addr, 0x202);
        assert_eq!(lines[1].pc, 0x200);
        assert!(lines[0].to_string().starts_with("0200: 602A  LD v0, 42"));
        assert!(lines[0].to_string().ends_with("pc=0202"));
    }

    #[test]
    fn test_dumps() {
        let mut vm = vm_with(&[0x60, 0x2A]);
        assert_eq!(vm.dump_ram(2).unwrap(), "0200: 602A\n");
        assert_eq!(vm.dump_keys().unwrap(), "");
        vm.set_key(KeyCode::Key1, true);
        vm.set_key(KeyCode::KeyD, true);
        assert_eq!(vm.dump_keys().unwrap(), "keys: k1 kd");

        let display = vm.dump_display().unwrap();
        assert_eq!(display.lines().count(), DISPLAY_HEIGHT);
        assert!(display.lines().all(|line| line == ".".repeat(DISPLAY_WIDTH)));
    }
}
