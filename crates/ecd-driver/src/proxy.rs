//! The top-level proxy that owns the card.
//!
//! Lifecycle, in order: [`EcdProxy::new`] → [`EcdProxy::init`] →
//! [`EcdProxy::load_master_bitstream`] / [`EcdProxy::load_ecd_bitstream`]
//! → [`EcdProxy::start_pci`] → [`EcdProxy::prepare_data_transfer`].
//! Calling an operation out of order is an `InvalidState` error.
//!
//! `start_pci` spawns the single dispatcher thread; from then on the
//! installed [`IrqHandler`] runs there, once per dispatched source.
//! Dropping the proxy cancels the dispatcher, wakes it out of its blocking
//! read, and joins it with a bounded wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ecd_chip::{AxiMap, AxiMapError, AxiModule, EcdDeviceId};

use crate::bitstream::{BitstreamKind, BitstreamLoader};
use crate::config::Config;
use crate::dispatch::{run_dispatch_loop, HandlerSlot, IrqHandler, IrqStats};
use crate::error::{EcdError, Result};
use crate::mmio::RegisterBlock;
use crate::pci::{self, PciDevice};
use crate::rtl::{
    PingPongBuffer, RtlAxiRevision, RtlDataControl, RtlIrqManager, RtlQsfpStatus,
    RtlRestartManager,
};
use crate::uio::{UioBinding, UioWaker};

/// How long `Drop` waits for the dispatcher before abandoning it.
const DISPATCHER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Lifecycle {
    Created,
    Initialized,
    Started,
}

impl Lifecycle {
    const fn name(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initialized => "initialized",
            Self::Started => "started",
        }
    }
}

struct Dispatcher {
    join: JoinHandle<()>,
    cancel: Arc<AtomicBool>,
    waker: UioWaker,
}

/// Orchestrates bring-up, interrupt dispatch, and streaming for one card.
pub struct EcdProxy {
    config: Config,
    state: Lifecycle,
    device_id: Option<EcdDeviceId>,
    axi_map: AxiMap,
    irq_count: u32,
    load_error: Option<String>,
    handler: HandlerSlot,
    stats: Arc<IrqStats>,
    pci: Option<PciDevice>,
    revision: Option<RtlAxiRevision>,
    restart: Option<RtlRestartManager>,
    data_control: Option<RtlDataControl>,
    qsfp: Option<RtlQsfpStatus>,
    dispatcher: Option<Dispatcher>,
}

impl std::fmt::Debug for EcdProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdProxy")
            .field("state", &self.state.name())
            .field("device_id", &self.device_id)
            .finish()
    }
}

impl EcdProxy {
    /// Wrap a configuration; nothing is validated until [`EcdProxy::init`].
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: Lifecycle::Created,
            device_id: None,
            axi_map: AxiMap::empty(),
            irq_count: Config::DEFAULT_IRQ_COUNT,
            load_error: None,
            handler: Arc::new(Mutex::new(None)),
            stats: Arc::new(IrqStats::new()),
            pci: None,
            revision: None,
            restart: None,
            data_control: None,
            qsfp: None,
            dispatcher: None,
        }
    }

    /// Validate the configuration and check privileges.
    ///
    /// The `axi_map` must name every module and nothing else; the PCI id
    /// must parse; and the effective user must be root, since mapping the
    /// sysfs `resource` files and `/dev/mem` requires it.
    ///
    /// # Errors
    ///
    /// `InvalidState` out of order, `InvalidConfig` for bad configuration,
    /// `Permission` when not root.
    pub fn init(&mut self) -> Result<()> {
        self.expect_state(Lifecycle::Created, "init")?;

        let axi_map = AxiMap::from_named_entries(
            self.config.axi_map.iter().map(|(name, off)| (name.as_str(), *off)),
        )
        .map_err(invalid_axi_map)?;
        axi_map.validate().map_err(invalid_axi_map)?;

        let device_id: EcdDeviceId = self
            .config
            .pci_device
            .parse()
            .map_err(|e| EcdError::invalid_config(format!("pci_device: {e}")))?;

        if self.config.irq_count == 0 || self.config.irq_count > Config::MAX_IRQ_COUNT {
            return Err(EcdError::invalid_config(format!(
                "irq_count {} out of range 1..={}",
                self.config.irq_count,
                Config::MAX_IRQ_COUNT
            )));
        }

        if !rustix::process::geteuid().is_root() {
            return Err(EcdError::permission(
                "effective uid is not root; BAR and /dev/mem mapping require it",
            ));
        }

        self.axi_map = axi_map;
        self.device_id = Some(device_id);
        self.irq_count = self.config.irq_count;
        self.state = Lifecycle::Initialized;

        tracing::info!("initialized for {device_id} with {} irq sources", self.irq_count);
        Ok(())
    }

    /// Install (or replace) the handler the dispatcher invokes. May be
    /// called before or after [`EcdProxy::start_pci`]; sources dispatched
    /// while no handler is installed only advance their counters.
    pub fn set_interrupt_handler(&self, handler: Box<dyn IrqHandler>) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Program the master FPGA over JTAG. `Ok(false)` means the load
    /// failed and [`EcdProxy::load_error`] has the first error line.
    ///
    /// # Errors
    ///
    /// `InvalidState` before [`EcdProxy::init`].
    pub fn load_master_bitstream(&mut self) -> Result<bool> {
        self.load_bitstream(BitstreamKind::Master)
    }

    /// Program the downstream ECD FPGA over JTAG; see
    /// [`EcdProxy::load_master_bitstream`].
    ///
    /// # Errors
    ///
    /// `InvalidState` before [`EcdProxy::init`].
    pub fn load_ecd_bitstream(&mut self) -> Result<bool> {
        self.load_bitstream(BitstreamKind::Ecd)
    }

    fn load_bitstream(&mut self, kind: BitstreamKind) -> Result<bool> {
        if self.state < Lifecycle::Initialized {
            return Err(self.bad_state("load_bitstream"));
        }

        let loader = BitstreamLoader::new(&self.config.tmp_dir, &self.config.vivado);
        let script = match kind {
            BitstreamKind::Master => &self.config.master_programming_script,
            BitstreamKind::Ecd => &self.config.ecd_programming_script,
        };

        self.load_error = loader.load(kind, script);
        if let Some(err) = &self.load_error {
            tracing::error!("bitstream load failed: {err}");
        }
        Ok(self.load_error.is_none())
    }

    /// The first `ERROR:` line of the most recent failed load.
    #[must_use]
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    /// Bring up the PCI subsystem: hot-reset the link, map the BARs,
    /// attach every RTL view at `bar0 + axi_map[module]`, bind UIO, and
    /// spawn the dispatcher thread.
    ///
    /// # Errors
    ///
    /// `InvalidState` out of order; otherwise the §7 bring-up kinds
    /// (`NotFound`, `Permission`, `MmapFailed`, `Link`).
    pub fn start_pci(&mut self) -> Result<()> {
        self.expect_state(Lifecycle::Initialized, "start_pci")?;
        let id = self
            .device_id
            .ok_or_else(|| self.bad_state("start_pci"))?;

        // A freshly loaded bitstream needs a link retrain before its BARs
        // answer.
        pci::hot_reset(id)?;

        let device = PciDevice::open(id)?;
        let uio = UioBinding::bind(id)?;

        let bar0 = device.bar(0)?;
        let block = |module: AxiModule| -> Result<RegisterBlock> {
            let offset = self
                .axi_map
                .get(module)
                .ok_or_else(|| EcdError::invalid_config(format!("axi_map missing {module}")))?;
            bar0.block_at(offset)
        };

        self.revision = Some(RtlAxiRevision::new(block(AxiModule::MasterRevision)?));
        self.restart = Some(RtlRestartManager::new(block(AxiModule::RestartManager)?));
        self.data_control = Some(RtlDataControl::new(block(AxiModule::DataControl)?));
        self.qsfp = Some(RtlQsfpStatus::new(block(AxiModule::QsfpStatus)?));
        let irq_mgr = RtlIrqManager::new(block(AxiModule::IrqManager)?);

        let cancel = Arc::new(AtomicBool::new(false));
        let waker = uio.waker();
        let handler = Arc::clone(&self.handler);
        let stats = Arc::clone(&self.stats);
        let irq_count = self.irq_count;
        let thread_cancel = Arc::clone(&cancel);

        let join = std::thread::Builder::new()
            .name("ecd-irq-dispatch".into())
            .spawn(move || {
                match run_dispatch_loop(
                    &uio,
                    &irq_mgr,
                    &handler,
                    &stats,
                    irq_count,
                    &thread_cancel,
                ) {
                    Ok(()) => tracing::info!("dispatcher stopped"),
                    Err(e) => tracing::error!("dispatcher exited: {e}"),
                }
            })
            .map_err(|e| EcdError::Io { source: e })?;

        self.pci = Some(device);
        self.dispatcher = Some(Dispatcher { join, cancel, waker });
        self.state = Lifecycle::Started;

        tracing::info!("PCI subsystem up, dispatcher running");
        Ok(())
    }

    /// Version of the loaded master bitstream, `"major.minor.patch"`.
    ///
    /// # Errors
    ///
    /// `InvalidState` before [`EcdProxy::start_pci`].
    pub fn master_version(&self) -> Result<String> {
        self.revision
            .as_ref()
            .map(RtlAxiRevision::version)
            .ok_or_else(|| self.bad_state("master_version"))
    }

    /// Build date of the loaded master bitstream, `"MM/DD/YYYY"`.
    ///
    /// # Errors
    ///
    /// `InvalidState` before [`EcdProxy::start_pci`].
    pub fn master_date(&self) -> Result<String> {
        self.revision
            .as_ref()
            .map(RtlAxiRevision::date)
            .ok_or_else(|| self.bad_state("master_date"))
    }

    /// Program the ping-pong layout into the card and start streaming.
    /// Both buffers must already hold valid data.
    ///
    /// # Errors
    ///
    /// `InvalidState` before [`EcdProxy::start_pci`]; `InvalidConfig` if
    /// the layout violates the ping-pong invariants.
    pub fn prepare_data_transfer(&self, addr0: u64, addr1: u64, block_count: u32) -> Result<()> {
        let control = self
            .data_control
            .as_ref()
            .ok_or_else(|| self.bad_state("prepare_data_transfer"))?;
        let buffers = PingPongBuffer {
            addr0,
            addr1,
            block_count,
        };
        buffers.validate()?;
        control.start(&buffers);
        Ok(())
    }

    /// Tell the card that `side`'s buffer has been refilled.
    ///
    /// # Errors
    ///
    /// `InvalidState` before [`EcdProxy::start_pci`].
    pub fn notify_buffer_full(&self, side: u32) -> Result<()> {
        let control = self
            .data_control
            .as_ref()
            .ok_or_else(|| self.bad_state("notify_buffer_full"))?;
        control.notify_buffer_full(side);
        Ok(())
    }

    /// A data-control view handlers can own; valid while the proxy lives.
    ///
    /// # Errors
    ///
    /// `InvalidState` before [`EcdProxy::start_pci`].
    pub fn stream_handle(&self) -> Result<RtlDataControl> {
        self.data_control
            .clone()
            .ok_or_else(|| self.bad_state("stream_handle"))
    }

    /// Reset the pipeline and wait for it to drain.
    ///
    /// # Errors
    ///
    /// `InvalidState` before [`EcdProxy::start_pci`].
    pub fn restart_pipeline(&self) -> Result<()> {
        self.restart
            .as_ref()
            .map(RtlRestartManager::restart)
            .ok_or_else(|| self.bad_state("restart_pipeline"))
    }

    /// QSFP link state for `channel`; `LinkDown` if `require_up` and the
    /// link is not up.
    ///
    /// # Errors
    ///
    /// `InvalidState` before [`EcdProxy::start_pci`]; `LinkDown` per above.
    pub fn qsfp_check(&self, channel: u32, require_up: bool) -> Result<bool> {
        self.qsfp
            .as_ref()
            .ok_or_else(|| self.bad_state("qsfp_check"))?
            .check(channel, require_up)
    }

    /// The dispatch counters, shared with the dispatcher thread.
    #[must_use]
    pub fn irq_stats(&self) -> Arc<IrqStats> {
        Arc::clone(&self.stats)
    }

    /// The opened PCI function, once [`EcdProxy::start_pci`] has run.
    #[must_use]
    pub fn pci_device(&self) -> Option<&PciDevice> {
        self.pci.as_ref()
    }

    fn expect_state(&self, expected: Lifecycle, operation: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(EcdError::InvalidState {
                operation,
                state: self.state.name(),
            })
        }
    }

    fn bad_state(&self, operation: &'static str) -> EcdError {
        EcdError::InvalidState {
            operation,
            state: self.state.name(),
        }
    }
}

impl Drop for EcdProxy {
    fn drop(&mut self) {
        let Some(dispatcher) = self.dispatcher.take() else {
            return;
        };

        dispatcher.cancel.store(true, Ordering::Release);
        dispatcher.waker.wake();

        let deadline = Instant::now() + DISPATCHER_JOIN_TIMEOUT;
        while !dispatcher.join.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        if dispatcher.join.is_finished() {
            if dispatcher.join.join().is_err() {
                tracing::error!("dispatcher thread panicked");
            }
        } else {
            tracing::warn!(
                "dispatcher did not stop within {DISPATCHER_JOIN_TIMEOUT:?}; abandoning it"
            );
        }
    }
}

fn invalid_axi_map(err: AxiMapError) -> EcdError {
    EcdError::invalid_config(err.to_string())
}
