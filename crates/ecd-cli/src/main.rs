//! `ecd` — sample driver for the ECD-Master control plane.
//!
//! ```text
//! USAGE:
//!   ecd run --bitstream master.bit --dma-base 0x100000000   Stream demo data
//!   ecd version --bitstream master.bit                      Bring-up, print bitstream revision
//! ```
//!
//! Exit code 0 on success, 1 on any failure (message printed). Needs root.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ecd_chip::regs::qsfp_status::CHANNEL_COUNT;
use ecd_driver::prelude::*;

#[derive(Parser)]
#[command(name = "ecd", about = "ECD-Master control-plane sample driver", version)]
struct Cli {
    /// PCI function of the card, vvvv:dddd hex.
    #[arg(long, default_value = "10ee:7038")]
    pci_device: String,

    /// Working directory for programmer artifacts.
    #[arg(long, default_value = "/tmp/ecd")]
    tmp_dir: PathBuf,

    /// Path to the Vivado executable used as JTAG programmer.
    #[arg(long, default_value = "vivado")]
    vivado: PathBuf,

    /// Master bitstream file programmed over JTAG.
    #[arg(long)]
    bitstream: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Load the bitstream, start streaming, and report interrupt counters.
    Run {
        /// Physical base of the reserved DMA window (hex accepted).
        #[arg(long, value_parser = parse_u64, default_value = "0x100000000")]
        dma_base: u64,

        /// Ping-pong buffer size in 2048-byte blocks.
        #[arg(long, default_value_t = 16)]
        blocks: u32,

        /// How long to stream before exiting.
        #[arg(long, default_value_t = 10)]
        seconds: u64,

        /// Fail unless every QSFP channel is up before streaming.
        #[arg(long)]
        require_qsfp: bool,
    },
    /// Bring the card up and print the bitstream version and date.
    Version,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let mut proxy = EcdProxy::new(build_config(&cli)?);
    proxy.init().context("init failed")?;

    if cli.bitstream.is_some() {
        if !proxy.load_master_bitstream()? {
            bail!(
                "master bitstream load failed: {}",
                proxy.load_error().unwrap_or("no error captured")
            );
        }
        tracing::info!("master bitstream loaded");
    }

    proxy.start_pci().context("PCI bring-up failed")?;

    match cli.command {
        Cmd::Run {
            dma_base,
            blocks,
            seconds,
            require_qsfp,
        } => cmd_run(&proxy, dma_base, blocks, seconds, require_qsfp),
        Cmd::Version => cmd_version(&proxy),
    }
}

fn cmd_version(proxy: &EcdProxy) -> Result<()> {
    println!(
        "master bitstream {} built {}",
        proxy.master_version()?,
        proxy.master_date()?
    );
    Ok(())
}

fn cmd_run(
    proxy: &EcdProxy,
    dma_base: u64,
    blocks: u32,
    seconds: u64,
    require_qsfp: bool,
) -> Result<()> {
    if require_qsfp {
        for channel in 0..CHANNEL_COUNT {
            proxy.qsfp_check(channel, true)?;
            tracing::info!("qsfp channel {channel} up");
        }
    }

    // Reserve and pre-fill both ping-pong halves before the engine starts.
    let window_bytes = 2 * blocks as usize * 2048;
    let mut region = ReservedDmaRegion::open(dma_base, window_bytes)
        .context("mapping the reserved DMA window")?;
    let (buffers, [side0, side1]) = region.ping_pong_split(blocks)?;
    fill_ramp(side0, 0);
    fill_ramp(side1, blocks * 2048 / 4);

    // The drain handler refills whichever side the card finished and
    // hands it back; it runs on the dispatcher thread.
    let control = proxy.stream_handle()?;
    proxy.set_interrupt_handler(Box::new(move |irq: u32, count: u64| {
        if irq > 1 {
            tracing::debug!(irq, "ignoring non-ping-pong interrupt source");
            return;
        }
        if let Ok((_, sides)) = region.ping_pong_split(blocks) {
            let [side0, side1] = sides;
            fill_ramp(if irq == 0 { side0 } else { side1 }, count as u32);
        }
        control.notify_buffer_full(irq);
    }));

    proxy.prepare_data_transfer(buffers.addr0, buffers.addr1, buffers.block_count)?;
    tracing::info!(
        "streaming {} blocks per side from {:#x}/{:#x}",
        buffers.block_count,
        buffers.addr0,
        buffers.addr1
    );

    let stats = proxy.irq_stats();
    for _ in 0..seconds {
        std::thread::sleep(Duration::from_secs(1));
        println!(
            "ppb0 drains: {}  ppb1 drains: {}  notifications: {}  spurious: {}",
            stats.dispatched(0),
            stats.dispatched(1),
            stats.notifications(),
            stats.spurious()
        );
    }

    Ok(())
}

fn build_config(cli: &Cli) -> Result<Config> {
    std::fs::create_dir_all(&cli.tmp_dir)
        .with_context(|| format!("creating {}", cli.tmp_dir.display()))?;

    let script = cli
        .bitstream
        .as_ref()
        .map(|bit| programming_script(bit))
        .unwrap_or_default();

    Ok(Config {
        tmp_dir: cli.tmp_dir.clone(),
        vivado: cli.vivado.clone(),
        pci_device: cli.pci_device.clone(),
        master_programming_script: script.clone(),
        ecd_programming_script: script,
        // Demo layout; a real deployment reads these from the build's
        // address-map export.
        axi_map: vec![
            ("master_revision".into(), 0x0000),
            ("irq_manager".into(), 0x0100),
            ("restart_manager".into(), 0x0200),
            ("data_control".into(), 0x0300),
            ("qsfp_status".into(), 0x0400),
        ],
        irq_count: 2,
    })
}

/// Vivado batch script that programs `bit` into the first JTAG target.
fn programming_script(bit: &std::path::Path) -> Vec<String> {
    vec![
        "open_hw_manager".to_string(),
        "connect_hw_server".to_string(),
        "open_hw_target".to_string(),
        format!(
            "set_property PROGRAM.FILE {{{}}} [current_hw_device]",
            bit.display()
        ),
        "program_hw_devices [current_hw_device]".to_string(),
        "close_hw_manager".to_string(),
    ]
}

/// Incrementing word ramp so drops are visible on the far end.
fn fill_ramp(buf: &mut [u8], seed: u32) {
    let words: &mut [u32] = bytemuck::cast_slice_mut(buf);
    for (i, word) in words.iter_mut().enumerate() {
        *word = seed.wrapping_add(i as u32);
    }
}

fn parse_u64(s: &str) -> Result<u64, String> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("invalid number {s:?}: {e}"))
}
