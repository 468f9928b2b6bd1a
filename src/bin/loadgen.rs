//! loadgen - synthetic CPU and memory load for exercising promon.

use std::hint::black_box;
use std::thread;
use std::time::Duration;

use clap::Parser;

const MIB: usize = 1024 * 1024;
const CPU_STEPS_PER_UNIT: u64 = 1_000_000_000;
const CHARSET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Synthetic load generator.
#[derive(Parser, Debug)]
#[command(name = "loadgen", about = "Synthetic CPU and memory load generator", version)]
struct Args {
    /// Run this many iterations (default: unlimited).
    #[arg(short = 'i', long, value_name = "ITERATIONS")]
    iterations: Option<u64>,

    /// Sleep this many seconds after each iteration.
    #[arg(short = 's', long, value_name = "SECONDS", default_value = "0")]
    sleep: u64,

    /// Enable the CPU test: MULTIPLIER x 10^9 loop steps per iteration.
    #[arg(short = 'c', long, value_name = "MULTIPLIER", default_value = "0")]
    cpu: u64,

    /// Enable the memory test: fill MEMORY MiB per iteration.
    #[arg(short = 'm', long, value_name = "MEMORY", default_value = "0")]
    memory: usize,

    /// Print the start and end of iterations, tests and sleeps.
    #[arg(short, long)]
    verbose: bool,

    /// Instance name used in verbose output.
    #[arg(short = 'n', long, default_value = "ru")]
    name: String,
}

/// xorshift64; the memory test only needs incompressible-looking bytes.
struct Filler(u64);

impl Filler {
    fn next_char(&mut self) -> char {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        CHARSET[(x % CHARSET.len() as u64) as usize] as char
    }

    fn string(&mut self, len: usize) -> String {
        (0..len).map(|_| self.next_char()).collect()
    }
}

fn burn_cpu(multiplier: u64) {
    let steps = CPU_STEPS_PER_UNIT.saturating_mul(multiplier);
    let mut i = 0u64;
    while black_box(i) < steps {
        i += 1;
    }
}

fn fill_memory(filler: &mut Filler, mib: usize) -> usize {
    let blocks: Vec<String> = (0..mib).map(|_| filler.string(MIB)).collect();
    black_box(&blocks);
    blocks.len()
}

fn main() {
    let args = Args::parse();
    let say = |msg: &str| {
        if args.verbose {
            println!("{}: {}", args.name, msg);
        }
    };

    let mut filler = Filler(0x9E37_79B9_7F4A_7C15);
    let mut iteration = 0u64;
    while args.iterations.is_none_or(|limit| iteration < limit) {
        say(&format!("Starting iteration {}", iteration));

        if args.cpu > 0 {
            say("Starting CPU test");
            burn_cpu(args.cpu);
            say("Done with CPU test");
        }

        if args.memory > 0 {
            say("Starting memory test");
            fill_memory(&mut filler, args.memory);
            say("Done with memory test");
        }

        say(&format!("Done with iteration {}", iteration));

        if args.sleep > 0 {
            say("Starting to sleep");
            thread::sleep(Duration::from_secs(args.sleep));
            say("Waking up from sleep");
        }
        iteration += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filler_uses_charset() {
        let mut filler = Filler(1);
        let s = filler.string(256);
        assert_eq!(s.len(), 256);
        assert!(s.bytes().all(|b| CHARSET.contains(&b)));
    }

    #[test]
    fn test_fill_memory_allocates_blocks() {
        let mut filler = Filler(7);
        assert_eq!(fill_memory(&mut filler, 2), 2);
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["loadgen"]);
        assert_eq!(args.iterations, None);
        assert_eq!(args.sleep, 0);
        assert_eq!(args.cpu, 0);
        assert_eq!(args.name, "ru");
        assert!(!args.verbose);
    }
}
