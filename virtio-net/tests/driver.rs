//! End-to-end driver tests: real worker threads, soft queues, software
//! interrupt table.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use morpheus_virtio_net::config::DeviceStatus;
use morpheus_virtio_net::dma::RequestState;
use morpheus_virtio_net::driver::{NetContext, RX_WORKER, TX_WORKER};
use morpheus_virtio_net::error::{IrqError, SpawnError};
use morpheus_virtio_net::platform::std_impl::StdScheduler;
use morpheus_virtio_net::platform::{IrqRegistrar, IrqTable, IrqTarget, Parker, Scheduler, Worker};
use morpheus_virtio_net::testing::{CountingHal, SoftDevice, SoftQueue, SoftTransport, TransportProbe};
use morpheus_virtio_net::{
    DeviceId, DriverConfig, DriverError, DriverInit, FillStop, MacAddress, NetClient, RxFrame, TxError, TxFrame,
    VirtioNet,
};

const MAC: MacAddress = MacAddress([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
const TIMEOUT: Duration = Duration::from_secs(5);

struct ChannelClient {
    frames: Mutex<Sender<RxFrame>>,
    returned: Mutex<Sender<Vec<u8>>>,
}

impl NetClient for ChannelClient {
    fn rx_frame(&self, frame: RxFrame) {
        let _ = self.frames.lock().unwrap().send(frame);
    }

    fn tx_reclaimed(&self, frame: Box<dyn TxFrame>) {
        let _ = self.returned.lock().unwrap().send(frame.bytes().to_vec());
    }
}

struct Rig {
    net: VirtioNet,
    rx: SoftDevice,
    tx: SoftDevice,
    irqs: IrqTable,
    hal: Arc<CountingHal>,
    probe: Arc<TransportProbe>,
    frames: Receiver<RxFrame>,
    returned: Receiver<Vec<u8>>,
}

fn context(hal: Arc<CountingHal>, irqs: IrqTable, client: Arc<dyn NetClient>) -> NetContext {
    NetContext {
        hal,
        scheduler: Arc::new(StdScheduler),
        irqs: Box::new(irqs),
        client,
        config: DriverConfig::default().with_instance_id(7),
    }
}

fn channel_client() -> (Arc<ChannelClient>, Receiver<RxFrame>, Receiver<Vec<u8>>) {
    let (ftx, frames) = channel();
    let (rtx, returned) = channel();
    let client = Arc::new(ChannelClient {
        frames: Mutex::new(ftx),
        returned: Mutex::new(rtx),
    });
    (client, frames, returned)
}

fn rig_with(rx_size: u16, tx_size: u16, hal: Arc<CountingHal>) -> Rig {
    let (transport, rx, tx) = SoftTransport::net(MAC, rx_size, tx_size);
    let probe = transport.probe();
    let irqs = IrqTable::new();
    let (client, frames, returned) = channel_client();
    let net = VirtioNet::start(transport, context(hal.clone(), irqs.clone(), client)).unwrap();
    Rig { net, rx, tx, irqs, hal, probe, frames, returned }
}

fn rig(rx_size: u16, tx_size: u16) -> Rig {
    rig_with(rx_size, tx_size, CountingHal::with_pages(64))
}

fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < TIMEOUT, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn eth_frame(tag: u8, len: usize) -> Vec<u8> {
    let mut frame = vec![tag; len];
    frame[..6].copy_from_slice(&MAC.0);
    frame
}

#[test]
fn start_fills_ring_and_sets_driver_ok() {
    let rig = rig(8, 8);
    assert_eq!(rig.rx.pending(), 4);
    assert_eq!(rig.rx.kicks(), 1);
    assert!(rig.probe.status().contains(DeviceStatus::DRIVER_OK));
    assert_eq!(rig.net.mac_address(), MAC);
    assert_eq!(rig.net.instance_id(), 7);
    assert!(rig.irqs.is_bound(0) && rig.irqs.is_bound(1));
    assert_eq!(rig.net.stats().rx_posted, 4);
}

#[test]
fn rx_worker_delivers_frames_in_post_order() {
    let rig = rig(8, 8);
    for tag in 1..=4u8 {
        assert!(rig.rx.receive(&eth_frame(tag, 60 + tag as usize)));
    }
    assert!(rig.irqs.raise(0));

    for tag in 1..=4u8 {
        let frame = rig.frames.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(frame.as_slice()[6], tag);
        assert_eq!(frame.len(), 60 + tag as usize);
        assert_eq!(&frame.as_slice()[..6], &MAC.0);
    }
}

#[test]
fn rx_worker_follows_device_reordering() {
    let rig = rig(8, 8);
    rig.rx.receive_at(3, &eth_frame(4, 60));
    rig.rx.receive_at(1, &eth_frame(2, 60));
    rig.irqs.raise(0);

    let a = rig.frames.recv_timeout(TIMEOUT).unwrap();
    let b = rig.frames.recv_timeout(TIMEOUT).unwrap();
    assert_eq!((a.as_slice()[6], b.as_slice()[6]), (4, 2));
}

#[test]
fn rx_worker_refills_below_half() {
    let rig = rig(8, 8);
    rig.rx.receive(&eth_frame(1, 60));
    rig.rx.receive(&eth_frame(2, 60));
    rig.irqs.raise(0);

    wait_for("refill", || rig.net.stats().rx_refills == 1);
    wait_for("ring full again", || rig.rx.pending() == 4);
    assert!(rig.rx.max_slots_used() <= 8);
    assert_eq!(rig.rx.kicks(), 2);
}

#[test]
fn delivered_pages_are_not_reposted_until_dropped() {
    let rig = rig(8, 8);
    let before = rig.rx.pending_data_addrs();
    for _ in 0..4 {
        rig.rx.receive(&eth_frame(0, 60));
    }
    rig.irqs.raise(0);

    let frames: Vec<RxFrame> = (0..4).map(|_| rig.frames.recv_timeout(TIMEOUT).unwrap()).collect();
    wait_for("refill", || rig.rx.pending() == 4);

    let held: Vec<u64> = frames.iter().map(|f| f.bus_addr()).collect();
    assert_eq!(held, before);
    for addr in rig.rx.pending_data_addrs() {
        assert!(!held.contains(&addr), "page {addr:#x} posted while a frame holds it");
    }
    assert_eq!(rig.hal.live(), 8);
    drop(frames);
    assert_eq!(rig.hal.live(), 4);
}

#[test]
fn initial_fill_stops_on_allocation_failure() {
    let hal = CountingHal::with_pages(64);
    hal.set_budget(2);
    let rig = rig_with(8, 8, hal);

    assert_eq!(rig.rx.pending(), 2);
    assert_eq!(rig.net.stats().rx_alloc_failures, 1);

    rig.hal.set_budget(usize::MAX);
    let report = rig.net.refill_rx().unwrap();
    assert_eq!((report.posted, report.stop), (2, FillStop::RingFull));
    assert_eq!(rig.rx.pending(), 4);
}

#[test]
fn transmit_with_flush_kicks_once() {
    let rig = rig(8, 2);
    rig.net.transmit(Box::new(eth_frame(9, 64)), true).unwrap();

    assert_eq!(rig.tx.kicks(), 1);
    assert_eq!(rig.tx.pending_states(), [RequestState::Posted]);
    let sent = rig.tx.transmit_next().unwrap();
    assert_eq!(sent, eth_frame(9, 64));
}

#[test]
fn transmit_on_full_ring_reclaims_pending_completion() {
    let rig = rig(8, 2);
    rig.net.transmit(Box::new(eth_frame(1, 64)), true).unwrap();
    // Completed but no interrupt: only transmit can reclaim it.
    rig.tx.transmit_next().unwrap();

    rig.net.transmit(Box::new(eth_frame(2, 64)), true).unwrap();
    assert_eq!(rig.returned.recv_timeout(TIMEOUT).unwrap(), eth_frame(1, 64));
    assert_eq!(rig.tx.pending(), 1);
}

#[test]
fn transmit_on_full_ring_without_completion_fails_fast() {
    let rig = rig(8, 2);
    rig.net.transmit(Box::new(eth_frame(1, 64)), true).unwrap();
    let err = rig.net.transmit(Box::new(eth_frame(2, 64)), true).unwrap_err();
    assert_eq!(err.error, TxError::NoCapacity);
    assert_eq!(err.into_frame().bytes(), &eth_frame(2, 64)[..]);
}

#[test]
fn tx_worker_reclaims_on_interrupt() {
    let rig = rig(8, 8);
    for tag in 0..3u8 {
        rig.net.transmit(Box::new(eth_frame(tag, 60)), false).unwrap();
    }
    rig.net.flush();
    assert_eq!(rig.tx.kicks(), 1);

    while rig.tx.transmit_next().is_some() {}
    assert!(rig.irqs.raise(1));

    for tag in 0..3u8 {
        assert_eq!(rig.returned.recv_timeout(TIMEOUT).unwrap()[6], tag);
    }
    wait_for("tx counters", || rig.net.stats().tx_reclaimed == 3);
    assert_eq!(rig.tx.free_slots(), 8);
}

#[test]
fn ring_never_over_posted() {
    let rig = rig(16, 8);
    let mut seed = 0x2545_f491_u32;
    let mut next = move || {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        seed
    };

    for _ in 0..200 {
        match next() % 4 {
            0 => {
                let _ = rig.net.transmit(Box::new(eth_frame(0, 60)), next() % 2 == 0);
            }
            1 => {
                rig.tx.transmit_next();
            }
            2 => {
                let pending = rig.rx.pending();
                if pending > 0 {
                    rig.rx.receive_at(next() as usize % pending, &eth_frame(0, 60));
                    rig.irqs.raise(0);
                }
                while rig.frames.try_recv().is_ok() {}
            }
            _ => {
                rig.net.refill_rx();
            }
        }
        let addrs = rig.rx.pending_data_addrs();
        let mut dedup = addrs.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), addrs.len(), "page posted twice");
    }

    assert!(rig.rx.max_slots_used() <= 16);
    assert!(rig.tx.max_slots_used() <= 8);
}

#[test]
fn shutdown_stops_workers_and_delivery() {
    let rig = rig(8, 8);
    rig.net.shutdown();

    assert!(!rig.net.is_running());
    assert_eq!(rig.probe.resets(), 1);
    assert!(!rig.irqs.is_bound(0));
    assert!(!rig.irqs.is_bound(1));

    rig.rx.receive(&eth_frame(1, 60));
    assert!(!rig.irqs.raise(0));
    assert!(rig.frames.recv_timeout(Duration::from_millis(50)).is_err());

    let err = rig.net.transmit(Box::new(eth_frame(1, 60)), true).unwrap_err();
    assert_eq!(err.error, TxError::Stopped);
    assert!(rig.net.refill_rx().is_none());

    // Idempotent, and Drop after shutdown is a no-op.
    rig.net.shutdown();
    assert_eq!(rig.probe.resets(), 1);
}

#[test]
fn drop_shuts_down() {
    let rig = rig(8, 8);
    let probe = Arc::clone(&rig.probe);
    let irqs = rig.irqs.clone();
    assert!(probe.status().contains(DeviceStatus::DRIVER_OK));
    drop(rig.net);
    assert_eq!(probe.resets(), 1);
    assert!(probe.status().is_empty());
    assert_eq!(irqs.bound_count(), 0);
}

#[test]
fn link_state_follows_config_space() {
    let rig = rig(8, 8);
    assert!(rig.net.link_up());
    rig.probe.set_link_up(false);
    assert!(!rig.net.link_up());
}

#[test]
fn probe_ignores_foreign_devices() {
    let (transport, _, _) = SoftTransport::net(MAC, 8, 8);
    let transport = transport.with_id(DeviceId::new(0x8086, 0x100E));
    let (client, _, _) = channel_client();
    let ctx = context(CountingHal::with_pages(8), IrqTable::new(), client);
    assert!(VirtioNet::probe(transport, ctx).unwrap().is_none());
}

#[test]
fn probe_accepts_transitional_id() {
    let (transport, rx, _) = SoftTransport::net(MAC, 8, 8);
    let transport = transport.with_id(DeviceId::new(0x1AF4, 0x1000));
    let (client, _, _) = channel_client();
    let ctx = context(CountingHal::with_pages(8), IrqTable::new(), client);
    let net = VirtioNet::probe(transport, ctx).unwrap().unwrap();
    assert_eq!(net.device_id(), DeviceId::new(0x1AF4, 0x1000));
    assert_eq!(rx.pending(), 4);
}

#[test]
fn start_rejects_foreign_device() {
    let (transport, _, _) = SoftTransport::net(MAC, 8, 8);
    let transport = transport.with_id(DeviceId::new(0x1AF4, 0x1001));
    let (client, _, _) = channel_client();
    let ctx = context(CountingHal::with_pages(8), IrqTable::new(), client);
    assert_eq!(
        VirtioNet::start(transport, ctx).err(),
        Some(DriverError::UnsupportedDevice { vendor: 0x1AF4, device: 0x1001 })
    );
}

#[test]
fn start_fails_without_tx_queue() {
    let (rxq, _) = SoftQueue::new(0, 8);
    let transport = SoftTransport::new(MAC, vec![rxq]);
    let probe = transport.probe();
    let (client, _, _) = channel_client();
    let ctx = context(CountingHal::with_pages(8), IrqTable::new(), client);
    assert_eq!(VirtioNet::start(transport, ctx).err(), Some(DriverError::QueueUnavailable(1)));
    assert_eq!(probe.resets(), 1);
}

#[test]
fn start_fails_on_tiny_queue() {
    let (transport, _, _) = SoftTransport::net(MAC, 1, 8);
    let probe = transport.probe();
    let (client, _, _) = channel_client();
    let ctx = context(CountingHal::with_pages(8), IrqTable::new(), client);
    assert_eq!(
        VirtioNet::start(transport, ctx).err(),
        Some(DriverError::QueueTooSmall { index: 0, size: 1, needed: 2 })
    );
    assert_eq!(probe.resets(), 1);
}

struct Nobody;

impl IrqTarget for Nobody {
    fn fire(&self) {}
}

#[test]
fn start_fails_when_vector_taken() {
    let (transport, _, _) = SoftTransport::net(MAC, 8, 8);
    let mut irqs = IrqTable::new();
    irqs.bind(1, Arc::new(Nobody)).unwrap();
    let (client, _, _) = channel_client();
    let ctx = context(CountingHal::with_pages(8), irqs.clone(), client);

    assert_eq!(
        VirtioNet::start(transport, ctx).err(),
        Some(DriverError::Irq(IrqError::VectorInUse(1)))
    );
    assert!(!irqs.is_bound(0));
}

/// Spawns the rx worker, refuses the tx worker.
struct NoTxScheduler;

impl Scheduler for NoTxScheduler {
    fn spawn(&self, name: &'static str, body: Box<dyn FnOnce() + Send>) -> Result<Box<dyn Worker>, SpawnError> {
        if name == TX_WORKER {
            return Err(SpawnError { name });
        }
        assert_eq!(name, RX_WORKER);
        StdScheduler.spawn(name, body)
    }

    fn parker(&self) -> Box<dyn Parker> {
        StdScheduler.parker()
    }
}

#[test]
fn spawn_failure_unwinds_start() {
    let (transport, _, _) = SoftTransport::net(MAC, 8, 8);
    let probe = transport.probe();
    let irqs = IrqTable::new();
    let hal = CountingHal::with_pages(16);
    let (client, _, _) = channel_client();
    let mut ctx = context(hal.clone(), irqs.clone(), client);
    ctx.scheduler = Arc::new(NoTxScheduler);

    assert_eq!(
        VirtioNet::start(transport, ctx).err(),
        Some(DriverError::Spawn(SpawnError { name: TX_WORKER }))
    );
    assert_eq!(irqs.bound_count(), 0);
    assert_eq!(probe.resets(), 1);
    assert!(!probe.status().contains(DeviceStatus::DRIVER_OK));
}

#[test]
fn invalid_config_is_rejected() {
    let (transport, _, _) = SoftTransport::net(MAC, 8, 8);
    let (client, _, _) = channel_client();
    let mut ctx = context(CountingHal::with_pages(8), IrqTable::new(), client);
    ctx.config.refill_divisor = 0;
    assert!(matches!(
        VirtioNet::start(transport, ctx),
        Err(DriverError::InvalidConfig(_))
    ));
}

#[test]
fn driver_features_offer_mac() {
    assert_eq!(VirtioNet::driver_features(0), 1 << 5);
}
