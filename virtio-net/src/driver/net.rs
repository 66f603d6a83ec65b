//! VirtIO-net device driver.
//!
//! Owns one device: both pipelines, their workers, and the interrupt
//! bindings that wake them.
//!
//! # Start sequence
//! 1. Validate config, match device id
//! 2. Read MAC from config space
//! 3. Take rx/tx queues
//! 4. Spawn `virtio-net-rx` / `virtio-net-tx` workers
//! 5. Bind rx/tx vectors to the wake coordinators
//! 6. Initial receive fill
//! 7. Set DRIVER_OK
//!
//! Any failure unwinds the steps already taken.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use super::rx::{FillReport, RxPipeline};
use super::tx::TxPipeline;
use crate::client::{NetClient, TxFrame};
use crate::config::{self, features, DeviceStatus, DriverConfig, VIRTIO_NET_DEVICE_IDS, VIRTIO_NET_S_LINK_UP, VIRTIO_VENDOR_ID};
use crate::dma::REQUEST_SLOTS;
use crate::error::{DriverError, IrqError, Rejected, Result};
use crate::hal::Hal;
use crate::platform::{IrqRegistrar, IrqTarget, Scheduler, Worker};
use crate::ring::Virtqueue;
use crate::stats::{NetStats, StatsSnapshot};
use crate::transport::{DeviceId, DriverInit, VirtioTransport};
use crate::types::MacAddress;
use crate::wake::WakeCoordinator;

/// Receive worker name.
pub const RX_WORKER: &str = "virtio-net-rx";
/// Transmit worker name.
pub const TX_WORKER: &str = "virtio-net-tx";

/// Everything besides the device needed to bring a driver up.
pub struct NetContext {
    pub hal: Arc<dyn Hal>,
    pub scheduler: Arc<dyn Scheduler>,
    pub irqs: Box<dyn IrqRegistrar + Send>,
    pub client: Arc<dyn NetClient>,
    pub config: DriverConfig,
}

/// Parts torn down by shutdown.
struct Lifecycle {
    transport: Box<dyn VirtioTransport>,
    irqs: Box<dyn IrqRegistrar + Send>,
    workers: Vec<Box<dyn Worker>>,
    running: bool,
}

/// A running virtio-net device.
pub struct VirtioNet {
    id: DeviceId,
    mac: MacAddress,
    has_status: bool,
    config: DriverConfig,
    rx: Arc<RxPipeline>,
    tx: Arc<TxPipeline>,
    stats: Arc<NetStats>,
    lifecycle: spin::Mutex<Lifecycle>,
}

impl VirtioNet {
    /// Bring the device up and start both workers.
    pub fn start<T: VirtioTransport + 'static>(transport: T, ctx: NetContext) -> Result<Self> {
        let NetContext { hal, scheduler, mut irqs, client, config } = ctx;
        config.validate()?;
        let instance = config.instance_id;

        let id = transport.device_id();
        if !Self::supports_device(id) {
            return Err(DriverError::UnsupportedDevice { vendor: id.vendor, device: id.device });
        }
        let mut transport: Box<dyn VirtioTransport> = Box::new(transport);

        let dev_cfg = transport.read_config();
        let mac = if transport.has_feature(features::VIRTIO_NET_F_MAC) {
            dev_cfg.mac
        } else {
            log::warn!("virtio-net{}: device has no MAC feature", instance);
            MacAddress::default()
        };
        let has_status = transport.has_feature(features::VIRTIO_NET_F_STATUS);
        log::info!("virtio-net{}: device {:04x}:{:04x}, MAC {}", instance, id.vendor, id.device, mac);

        let (rx_ring, tx_ring) = match take_queues(&mut *transport, &config) {
            Ok(rings) => rings,
            Err(e) => {
                log::error!("virtio-net{}: {}", instance, e);
                transport.reset();
                return Err(e);
            }
        };
        let refill_threshold = config.refill_threshold(rx_ring.size());

        let stats = Arc::new(NetStats::new());
        let rx_wake = Arc::new(WakeCoordinator::new(RX_WORKER, scheduler.parker()));
        let tx_wake = Arc::new(WakeCoordinator::new(TX_WORKER, scheduler.parker()));

        let rx = Arc::new(RxPipeline::new(
            rx_ring,
            Arc::clone(&hal),
            Arc::clone(&client),
            Arc::clone(&stats),
            Arc::clone(&rx_wake),
            config.rx_buffer_size,
            refill_threshold,
            instance,
        ));
        let tx = Arc::new(TxPipeline::new(
            tx_ring,
            hal,
            client,
            Arc::clone(&stats),
            Arc::clone(&tx_wake),
            config.max_tx_frame,
            instance,
        ));

        let mut workers: Vec<Box<dyn Worker>> = Vec::with_capacity(2);
        let bodies: [(&'static str, Box<dyn FnOnce() + Send>); 2] = [
            (RX_WORKER, {
                let rx = Arc::clone(&rx);
                Box::new(move || rx.run())
            }),
            (TX_WORKER, {
                let tx = Arc::clone(&tx);
                Box::new(move || tx.run())
            }),
        ];
        for (name, body) in bodies {
            match scheduler.spawn(name, body) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    log::error!("virtio-net{}: {}", instance, e);
                    stop_workers(&rx_wake, &tx_wake, workers);
                    transport.reset();
                    return Err(e.into());
                }
            }
        }

        if let Err(e) = bind_vectors(&mut *irqs, &config, &rx_wake, &tx_wake) {
            log::error!("virtio-net{}: {}", instance, e);
            stop_workers(&rx_wake, &tx_wake, workers);
            transport.reset();
            return Err(e.into());
        }

        let report = rx.fill();
        log::debug!("virtio-net{}: initial fill {:?}", instance, report);

        transport.add_status(DeviceStatus::DRIVER_OK);
        log::info!("virtio-net{}: up, {} rx buffers posted", instance, report.posted);

        Ok(Self {
            id,
            mac,
            has_status,
            config,
            rx,
            tx,
            stats,
            lifecycle: spin::Mutex::new(Lifecycle {
                transport,
                irqs,
                workers,
                running: true,
            }),
        })
    }

    /// Feature bits to offer during negotiation.
    pub fn driver_features(base: u32) -> u32 {
        config::driver_features(base)
    }

    /// Queue `frame` for transmission. Never blocks on the device.
    ///
    /// With `flush = false` the doorbell is left for a later
    /// [`flush`](Self::flush) or flushing transmit.
    pub fn transmit(&self, frame: Box<dyn TxFrame>, flush: bool) -> core::result::Result<(), Rejected> {
        self.tx.submit(frame, flush)
    }

    /// Ring the transmit doorbell.
    pub fn flush(&self) {
        self.tx.flush();
    }

    /// Reclaim completed transmits now instead of waiting for the worker.
    pub fn reclaim_tx(&self) -> usize {
        self.tx.reclaim()
    }

    /// Run a receive fill pass, e.g. after an allocation failure left the
    /// ring empty. Posts nothing once shut down.
    pub fn refill_rx(&self) -> Option<FillReport> {
        if !self.lifecycle.lock().running {
            return None;
        }
        Some(self.rx.fill())
    }

    /// Cloneable transmit-only handle.
    pub fn tx_handle(&self) -> TxHandle {
        TxHandle(Arc::clone(&self.tx))
    }

    pub fn mac_address(&self) -> MacAddress {
        self.mac
    }

    /// Link state from config space. Always up when the device does not
    /// report status.
    pub fn link_up(&self) -> bool {
        if !self.has_status {
            return true;
        }
        self.lifecycle.lock().transport.read_config().status & VIRTIO_NET_S_LINK_UP != 0
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn device_id(&self) -> DeviceId {
        self.id
    }

    pub fn instance_id(&self) -> u32 {
        self.config.instance_id
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.lock().running
    }

    /// Stop and join both workers, unbind the vectors and reset the device.
    /// Idempotent.
    pub fn shutdown(&self) {
        let workers = {
            let mut lc = self.lifecycle.lock();
            if !lc.running {
                return;
            }
            lc.running = false;
            lc.irqs.unbind(self.config.rx_vector);
            lc.irqs.unbind(self.config.tx_vector);
            core::mem::take(&mut lc.workers)
        };

        // Joined without the lock: client callbacks may still query the driver.
        self.rx.wake().stop();
        self.tx.wake().stop();
        self.tx.fence();
        for worker in workers {
            worker.join();
        }

        self.lifecycle.lock().transport.reset();
        log::info!("virtio-net{}: shut down", self.config.instance_id);
    }
}

impl Drop for VirtioNet {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl DriverInit for VirtioNet {
    type Error = DriverError;
    type Context = NetContext;

    fn supported_vendors() -> &'static [u16] {
        &[VIRTIO_VENDOR_ID]
    }

    fn supported_devices() -> &'static [u16] {
        VIRTIO_NET_DEVICE_IDS
    }

    fn create<T: VirtioTransport + 'static>(transport: T, ctx: Self::Context) -> Result<Self> {
        Self::start(transport, ctx)
    }
}

/// Both vectors or neither.
fn bind_vectors(
    irqs: &mut (dyn IrqRegistrar + Send),
    config: &DriverConfig,
    rx: &Arc<WakeCoordinator>,
    tx: &Arc<WakeCoordinator>,
) -> core::result::Result<(), IrqError> {
    irqs.bind(config.rx_vector, Arc::clone(rx) as Arc<dyn IrqTarget>)?;
    if let Err(e) = irqs.bind(config.tx_vector, Arc::clone(tx) as Arc<dyn IrqTarget>) {
        irqs.unbind(config.rx_vector);
        return Err(e);
    }
    Ok(())
}

fn stop_workers(rx: &WakeCoordinator, tx: &WakeCoordinator, workers: Vec<Box<dyn Worker>>) {
    rx.stop();
    tx.stop();
    for worker in workers {
        worker.join();
    }
}

fn take_queues(
    transport: &mut dyn VirtioTransport,
    config: &DriverConfig,
) -> Result<(Box<dyn Virtqueue>, Box<dyn Virtqueue>)> {
    let rx = take_queue(transport, config.rx_queue)?;
    let tx = take_queue(transport, config.tx_queue)?;
    Ok((rx, tx))
}

fn take_queue(transport: &mut dyn VirtioTransport, index: u16) -> Result<Box<dyn Virtqueue>> {
    let ring = transport
        .take_queue(index)
        .ok_or(DriverError::QueueUnavailable(index))?;
    if ring.size() < REQUEST_SLOTS {
        return Err(DriverError::QueueTooSmall {
            index,
            size: ring.size(),
            needed: REQUEST_SLOTS,
        });
    }
    Ok(ring)
}

/// Transmit-only view of a driver, shareable with an upper layer.
#[derive(Clone)]
pub struct TxHandle(Arc<TxPipeline>);

impl TxHandle {
    pub fn new(pipeline: Arc<TxPipeline>) -> Self {
        Self(pipeline)
    }

    pub fn transmit(&self, frame: Box<dyn TxFrame>, flush: bool) -> core::result::Result<(), Rejected> {
        self.0.submit(frame, flush)
    }

    pub fn flush(&self) {
        self.0.flush();
    }

    /// Room for one more frame (after reclaiming, if anything completed).
    pub fn can_transmit(&self) -> bool {
        if self.0.has_room() {
            return true;
        }
        self.0.reclaim();
        self.0.has_room()
    }
}
