//! Constant values of the Chip-8 architecture.

/// Number of general purpose registers.
pub const REGISTER_COUNT: usize = 0x10; // 16

/// Register used as the carry, borrow and collision flag.
pub const FLAG_REGISTER: usize = 0xF;

/// The lower memory space was historically used for the interpreter itself,
/// but is now used for fonts.
pub const MEM_START: usize = 0x200; // 512
pub const MEM_SIZE: usize = 0x1000; // 4096

/// Mask to wrap an address into the 12-bit address space.
pub const ADDRESS_MASK: usize = MEM_SIZE - 1;

/// Largest program that fits between `MEM_START` and the end of memory.
pub const PROGRAM_MAX_SIZE: usize = MEM_SIZE - MEM_START; // 3584

/// Levels of nesting allowed in the call stack.
pub const STACK_SIZE: usize = 0x10; // 16

pub const DISPLAY_WIDTH: usize = 64;
pub const DISPLAY_HEIGHT: usize = 32;
pub const DISPLAY_BUFFER_SIZE: usize = DISPLAY_WIDTH * DISPLAY_HEIGHT;

/// Sprites are always 8 pixels wide, one bit per pixel.
pub const SPRITE_WIDTH: usize = 8;

/// Font glyphs are located at the very start of memory.
pub const FONTSET_START: u16 = 0x0;
/// Each glyph is 5 rows high.
pub const FONTSET_HEIGHT: usize = 5;
/// Sixteen glyphs, one for each hexadecimal digit.
pub const FONTSET_DATA_LENGTH: usize = FONTSET_HEIGHT * 16; // 80

/// Number of clock cycles in a second that delay timers count down.
pub const DELAY_FREQUENCY: u64 = 60;

/// Default number of instructions executed per timer count down.
///
/// Running at 540Hz gives 9 instructions for every 60Hz timer tick.
pub const TIMER_DIVIDER: u32 = 9;

/// Default instruction rate for throttled drivers.
pub const CPU_FREQUENCY: u64 = DELAY_FREQUENCY * TIMER_DIVIDER as u64;

/// Number of nanoseconds in a second
#[doc(hidden)]
pub const NANOS_IN_SECOND: u64 = 1_000_000_000;

/// Number of keys ob the keyboard (0x0-0xF)
pub const KEY_COUNT: usize = 16;

/// Type for storing the 12-bit memory addresses.
pub type Address = u16;

/// Read-only view of the display buffer, one byte per pixel.
pub type Chip8DisplayBuffer<'a> = &'a [u8; DISPLAY_BUFFER_SIZE];
