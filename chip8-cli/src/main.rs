//! Entrypoint for CLI
use std::{env, error::Error, fs, time::Instant};

use chip8_vm::{constants::CPU_FREQUENCY, prelude::*, IMPL_VERSION};
use log::{error, info, warn};

static USAGE: &str = r#"
usage: chip8 CMD FILE [OPTIONS]

commands:
    run     Run the target ROM file headless, then print the display
    dis     Disassemble the the target ROM into readable assembly

options (run):
    --steps N   Maximum number of instructions to execute
    --hz N      Throttle the CPU to N instructions per second
    --throttle  Throttle the CPU to the default 540 instructions per second
    --seed N    Seed the random number generator
    --trace     Log every executed instruction (RUST_LOG=trace)

examples:
    chip8 run maze.ch8
    chip8 run maze.ch8 --hz 540 --steps 2000
    chip8 dis maze.ch8
"#;

/// Step limit when running unthrottled, since most programs never end.
const DEFAULT_STEPS: usize = 100_000;

fn run_bytecode(filepath: &str, opts: RunOpts) -> Chip8Result<()> {
    info!("running {filepath}");

    let conf = Chip8Conf {
        clock_frequency: opts.clock_frequency(),
        trace: opts.trace,
        rng_seed: opts.seed,
        ..Chip8Conf::default()
    };
    let steps = match (opts.steps, conf.clock_frequency) {
        (Some(steps), _) => steps,
        (None, Some(_)) => usize::MAX,
        (None, None) => DEFAULT_STEPS,
    };

    let mut vm = Chip8Vm::new(conf);
    vm.load_file(filepath)?;

    let start = Instant::now();
    let result = vm.run_steps(steps);
    let end = Instant::now();

    info!(
        "time taken: {}ms",
        end.duration_since(start).as_nanos() as f64 / 1000000.0
    ); // to millis

    match result {
        Ok(Flow::KeyWait) => warn!("program is waiting for a key press, stopping"),
        Ok(Flow::Halt) => info!("program halted at {:04X}", vm.pc()),
        Ok(_) => info!("step limit reached"),
        Err(ref err) => error!("{err}"),
    }

    println!("{}", vm.dump_display()?);

    result.map(|_| ())
}

fn run_disassembler(filepath: &str) -> Chip8Result<()> {
    info!("disassembling {filepath}");

    let bytecode = fs::read(filepath)?;
    let listing = Disassembler::new(bytecode.as_slice()).to_listing()?;
    print!("{listing}");

    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    simple_logger::SimpleLogger::new().env().init()?;

    match parse_args(env::args().skip(1)) {
        Some(Cmd::Run { filepath, opts }) => run_bytecode(&filepath, opts)?,
        Some(Cmd::Dis { filepath }) => run_disassembler(&filepath)?,
        None => {
            print_usage();
            // FreeBSD EX_USAGE (64)
            std::process::exit(64)
        }
    }

    Ok(())
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Option<Cmd> {
    match args.next()?.as_str() {
        "run" => {
            let filepath = args.next()?;
            let mut opts = RunOpts::default();

            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--steps" => opts.steps = Some(consume_number(&mut args)?),
                    "--hz" => opts.hz = Some(consume_number(&mut args)?),
                    "--seed" => opts.seed = Some(consume_number(&mut args)?),
                    "--throttle" => opts.throttle = true,
                    "--trace" => opts.trace = true,
                    _ => return None,
                }
            }

            Some(Cmd::Run { filepath, opts })
        }
        "dis" => Some(Cmd::Dis {
            filepath: args.next()?,
        }),
        _ => None,
    }
}

/// Consumes the next argument as a number.
fn consume_number<T: std::str::FromStr>(args: &mut impl Iterator<Item = String>) -> Option<T> {
    args.next()?.parse().ok()
}

fn print_usage() {
    println!("Chip8 v{IMPL_VERSION}");
    println!("{USAGE}");
}

#[derive(Debug, PartialEq, Eq)]
enum Cmd {
    /// Run file
    Run { filepath: String, opts: RunOpts },
    /// Disassemble
    Dis { filepath: String },
}

#[derive(Debug, Default, PartialEq, Eq)]
struct RunOpts {
    steps: Option<usize>,
    hz: Option<u64>,
    throttle: bool,
    seed: Option<u64>,
    trace: bool,
}

impl RunOpts {
    /// An explicit rate wins over the default throttle.
    fn clock_frequency(&self) -> Option<Hz> {
        match (self.hz, self.throttle) {
            (Some(hz), _) => Some(Hz(hz)),
            (None, true) => Some(Hz(CPU_FREQUENCY)),
            (None, false) => None,
        }
    }
}
