//! Hosted front end for the boot image loader.
//!
//! Loads an image into simulated RAM exactly as the loader would on a board,
//! prints where everything landed with `--dry-run`, and otherwise "boots" it
//! by leaving the process from inside the hand-off.

use bootm::banks::{self, BankCatalogue, MemoryBank};
use bootm::logger::ConsoleLogger;
use bootm::{
    ArgumentVector, BootDescriptor, HandlerRegistry, HandoffConvention, ImageLocator,
    LoadContext, LoaderConfig, PlacedImage, Platform, SimulatedRam, VerifyPolicy,
};
use clap::{Parser, ValueEnum};
use log::{debug, error, info};
use std::path::PathBuf;
use std::process::ExitCode;

const DEFAULT_BANK: &str = "0x80000000:64M";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Verify {
    Enforce,
    Warn,
    Skip,
}

impl From<Verify> for VerifyPolicy {
    fn from(value: Verify) -> Self {
        match value {
            Verify::Enforce => Self::Enforce,
            Verify::Warn => Self::Warn,
            Verify::Skip => Self::Skip,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Arch {
    Arm32,
    Arm64,
    Riscv,
}

/// Boot an operating system or boot loader image.
#[derive(Parser, Debug)]
#[command(name = "bootm", version, about, long_about = None)]
struct Args {
    /// The image to boot.
    image: PathBuf,

    /// Ramdisk to pass to the kernel.
    #[arg(short = 'r', long)]
    initrd: Option<PathBuf>,

    /// Device tree to pass to the kernel.
    #[arg(short = 'o', long)]
    oftree: Option<PathBuf>,

    /// OP-TEE image to place next to the kernel.
    #[arg(short = 't', long)]
    tee: Option<PathBuf>,

    /// Load address of the image.
    #[arg(short = 'a', long, value_parser = parse_number)]
    os_address: Option<u64>,

    /// Load address of the ramdisk.
    #[arg(long, value_parser = parse_number)]
    initrd_address: Option<u64>,

    /// Load address of the device tree.
    #[arg(long, value_parser = parse_number)]
    oftree_address: Option<u64>,

    /// Boot even if verification fails.
    #[arg(short = 'f', long, default_value_t = false)]
    force: bool,

    /// What a hash mismatch means.
    #[arg(short = 'c', long, value_enum, default_value_t = Verify::Enforce)]
    verify: Verify,

    /// Place everything, print the result and stop.
    #[arg(short = 'd', long, default_value_t = false)]
    dry_run: bool,

    /// More output; repeat for even more.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Slot the previous stage booted from, for multi-slot images.
    #[arg(long)]
    slot: Option<u8>,

    /// A RAM bank as `BASE:SIZE`; may be repeated.
    #[arg(long = "bank", value_parser = parse_bank, default_value = DEFAULT_BANK)]
    banks: Vec<(u64, u64)>,

    /// Calling convention for kernels.
    #[arg(long, value_enum, default_value_t = Arch::Arm32)]
    arch: Arch,

    /// Machine id passed to 32-bit ARM kernels booted without a device tree.
    #[arg(long, value_parser = parse_number)]
    machine_id: Option<u64>,

    /// Hart id passed to RISC-V kernels.
    #[arg(long, default_value_t = 0)]
    hart: u64,

    /// Directory for scratch files.
    #[arg(long)]
    scratch_dir: Option<PathBuf>,
}

impl Args {
    fn descriptor(&self) -> BootDescriptor {
        let mut desc = BootDescriptor::new(ImageLocator::path(&self.image))
            .with_verify(self.verify.into())
            .with_force(self.force)
            .with_dry_run(self.dry_run)
            .with_verbosity(self.verbose);
        desc.os_address = self.os_address.map(bootm::PhysicalAddress::new);
        desc.initrd = self.initrd.as_ref().map(ImageLocator::path);
        desc.initrd_address = self.initrd_address.map(bootm::PhysicalAddress::new);
        desc.oftree = self.oftree.as_ref().map(ImageLocator::path);
        desc.oftree_address = self.oftree_address.map(bootm::PhysicalAddress::new);
        desc.tee = self.tee.as_ref().map(ImageLocator::path);
        desc.boot_slot = self.slot;
        desc
    }

    fn convention(&self) -> Result<HandoffConvention, String> {
        Ok(match self.arch {
            Arch::Arm32 => {
                let machine_id = match self.machine_id {
                    Some(id) => u32::try_from(id)
                        .map_err(|_| format!("machine id {id:#x} does not fit in 32 bits"))?,
                    None => bootm::handoff::ARM_DT_MACHINE_ID,
                };
                HandoffConvention::Arm32 { machine_id }
            }
            Arch::Arm64 => HandoffConvention::Arm64,
            Arch::Riscv => HandoffConvention::RiscV { hart_id: self.hart },
        })
    }

    fn catalogue(&self) -> Result<BankCatalogue, String> {
        let mut catalogue = BankCatalogue::new();
        for (i, &(base, size)) in self.banks.iter().enumerate() {
            let bank = MemoryBank::new(format!("ram{i}"), base, size)
                .ok_or_else(|| format!("bank {base:#x}:{size:#x} wraps around"))?;
            catalogue.add(bank);
        }
        Ok(catalogue)
    }
}

/// Parses `0x`-prefixed hex or decimal, optionally suffixed with `K`, `M` or `G`.
fn parse_number(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (digits, shift) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 10),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 20),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 30),
        _ => (s, 0),
    };
    let value = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => digits.parse(),
    }
    .map_err(|e| format!("invalid number '{s}': {e}"))?;
    value
        .checked_mul(1 << shift)
        .ok_or_else(|| format!("'{s}' does not fit in 64 bits"))
}

fn parse_bank(s: &str) -> Result<(u64, u64), String> {
    let (base, size) = s
        .split_once(':')
        .ok_or_else(|| format!("expected BASE:SIZE, got '{s}'"))?;
    Ok((parse_number(base)?, parse_number(size)?))
}

/// Stands in for the board: quiescing is logged, the jump ends the process.
struct SimulatedPlatform;

impl Platform for SimulatedPlatform {
    fn flush_dcache(&mut self) {
        debug!("flushing data caches");
    }

    fn invalidate_icache(&mut self) {
        debug!("invalidating instruction caches");
    }

    fn shutdown(&mut self) {
        info!("shutting down devices");
    }

    fn disable_interrupts(&mut self) {
        debug!("interrupts off");
    }

    unsafe fn transfer(&mut self, argv: &ArgumentVector) -> ! {
        info!("starting image at {} with {:#x?}", argv.entry, argv.words);
        log::logger().flush();
        std::process::exit(0)
    }
}

fn print_placement(placed: &PlacedImage) {
    let image = placed.image();
    println!("{} ({})", image.file_type(), image.handler());
    for component in image.components() {
        println!(
            "  {:<12} {}  {:>10} bytes",
            component.kind().to_string(),
            component.range(),
            component.size()
        );
    }
    if let Some(cmdline) = image.cmdline() {
        println!("cmdline {cmdline}");
    }
    let argv = placed.argument_vector();
    println!("entry {} via {}", argv.entry, placed.convention());
    for (i, word) in argv.words.iter().enumerate() {
        println!("  arg{i} {word:#010x}");
    }
}

fn run(args: &Args) -> Result<(), String> {
    let catalogue = banks::install(args.catalogue()?)
        .map_err(|_| "memory banks already installed".to_owned())?;
    let mut config = LoaderConfig::default().with_convention(args.convention()?);
    if let Some(dir) = &args.scratch_dir {
        config = config.with_scratch_dir(dir);
    }

    let mut ram = SimulatedRam::new(catalogue.clone());
    let mut ctx = LoadContext::new(HandlerRegistry::global(), catalogue, &mut ram, config);
    let desc = args.descriptor();

    // SAFETY: the simulated platform never executes the image.
    let placed = unsafe { bootm::bootm(&mut ctx, &desc, &mut SimulatedPlatform) }
        .map_err(|e| e.to_string())?;
    print_placement(&placed);
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    if ConsoleLogger::for_verbosity(args.verbose).init().is_err() {
        eprintln!("bootm: logger already installed");
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}: {e}", args.image.display());
            ExitCode::FAILURE
        }
    }
}
