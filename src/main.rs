#[macro_use]
extern crate log;

use std::convert::TryFrom;
use std::fs::File;
use std::path::PathBuf;

use anyhow::{anyhow, Context};

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use indicatif::{ProgressBar, ProgressStyle};

use stm32_uart_flasher::{Image, Milestones, Options, Session, SupportedChips};

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Serial port to connect to, e.g. /dev/ttyUSB0
    #[structopt(short, long)]
    port: String,

    /// Serial port baud rate
    #[structopt(short, long, default_value = "9600")]
    baud: usize,

    /// Binary image to write to flash
    #[structopt(short, long, required_unless = "skip")]
    file: Option<PathBuf>,

    /// Skip flashing, only connect and show device info
    #[structopt(short, long)]
    skip: bool,

    /// Start the application once done
    #[structopt(short, long)]
    go: bool,

    /// Accept an additional chip ID (hex)
    #[structopt(long = "chip-id", parse(try_from_str = parse_hex))]
    chip_ids: Vec<u16>,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

fn parse_hex(s: &str) -> Result<u16, std::num::ParseIntError> {
    u16::from_str_radix(s.trim_start_matches("0x"), 16)
}

fn main() -> anyhow::Result<()> {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    // Load the firmware before touching the device
    let image = match (&o.file, o.skip) {
        (Some(path), false) => {
            let file = File::open(path)
                .with_context(|| format!("Unable to open file {}", path.display()))?;
            let len = file.metadata()?.len();
            let size = u32::try_from(len)
                .map_err(|_| anyhow!("Image too large: {}", bytefmt::format(len)))?;

            info!("Image: {} ({})", path.display(), bytefmt::format(len));

            Some(Image::new(file, size))
        }
        (None, false) => return Err(anyhow!("No image selected, pass --file or --skip")),
        (_, true) => None,
    };

    info!("Connecting to serial port {} at {} baud", o.port, o.baud);

    let chips = o
        .chip_ids
        .iter()
        .fold(SupportedChips::default(), |c, id| c.with(*id));

    let mut session = Session::linux(&o.port, o.baud, o.options.clone())
        .with_context(|| format!("Error connecting to serial port {}", o.port))?
        .with_chips(chips);

    let total = image.as_ref().map(|i| i.size).unwrap_or(0);
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{bar:40} {bytes}/{total_bytes} ({eta})")
            .progress_chars("=> "),
    );
    if image.is_none() {
        bar.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }

    let mut milestones = Milestones::new(total);
    let programming = image.is_some();

    let identity = session.run(image, o.go, |written| {
        bar.set_position(written as u64);
        for p in milestones.advance(written) {
            debug!("{}%", p);
        }
    })?;

    if programming {
        bar.finish_with_message("done");
    }

    info!(
        "Bootloader v{} chip ID 0x{:04X} commands: {}",
        identity.version,
        identity.chip_id,
        hex::encode(&identity.commands)
    );

    Ok(())
}
