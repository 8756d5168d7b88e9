//! In-process implementations of every platform seam.
//!
//! These drive the engine on a host: threads stand in for cores, plain
//! memory stands in for the reserved capture region and every call into
//! the platform is recorded so tests can assert on it.

use apwdog_timer::SimulatedRegisters;
use crossbeam::channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

use crate::capture::layout::{
    CAPTURE_COMPLETE, CPU_CONTEXT_WORDS, CTX_REVISION, CTX_SIGNATURE, KERNEL_INFO_OFFSET,
    TZ_DUMP_MAGIC, TZ_DUMP_VERSION,
};
use crate::capture::{CaptureLayout, CaptureResult, MonitorContext, PerCoreRecord, RegionWriter};
use crate::error::{WatchdogError, WatchdogResult};
use crate::liveness::{CoreId, CoreMask, LivenessMask};
use crate::panic::{PanicHook, PanicNotifierChain, PanicRegistration};
use crate::platform::{
    Clock, CoreMessenger, PAGE_SIZE, Platform, PowerUpReason, RegsaveMemory, RegsaveRegion,
    SecureMonitor, SystemControl,
};

/// Wall-clock monotonic time from [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Start counting from now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ns: AtomicU64,
}

impl ManualClock {
    /// Clock at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Jump to `now_ns`.
    pub fn set(&self, now_ns: u64) {
        self.now_ns.store(now_ns, Ordering::Release);
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.now_ns.fetch_add(by, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now_ns.load(Ordering::Acquire)
    }
}

/// Cores that acknowledge on the calling thread.
#[derive(Debug)]
pub struct InlineCores {
    online: AtomicU64,
    pings: AtomicU64,
}

impl InlineCores {
    /// `count` cores, all online.
    #[must_use]
    pub fn new(count: u32) -> Self {
        Self {
            online: AtomicU64::new(CoreMask::first(count).bits()),
            pings: AtomicU64::new(0),
        }
    }

    /// Replace the online set.
    pub fn set_online(&self, online: CoreMask) {
        self.online.store(online.bits(), Ordering::Release);
    }

    /// Pings delivered so far.
    #[must_use]
    pub fn ping_count(&self) -> u64 {
        self.pings.load(Ordering::Acquire)
    }
}

impl CoreMessenger for InlineCores {
    fn online_cores(&self) -> CoreMask {
        CoreMask::from_bits(self.online.load(Ordering::Acquire))
    }

    fn ping(&self, core: CoreId, alive: &Arc<LivenessMask>) {
        if self.online_cores().contains(core) {
            self.pings.fetch_add(1, Ordering::AcqRel);
            alive.acknowledge(core);
        }
    }
}

enum CoreRequest {
    Ping {
        alive: Arc<LivenessMask>,
        done: Sender<()>,
    },
    Shutdown,
}

struct CoreWorker {
    requests: Sender<CoreRequest>,
    wedged: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CoreWorker {
    fn spawn(core: CoreId) -> WatchdogResult<Self> {
        let (requests, inbox) = unbounded();
        let wedged = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&wedged);
        let handle = thread::Builder::new()
            .name(format!("apwdog-core{}", core.get()))
            .spawn(move || core_loop(core, &inbox, &flag))
            .map_err(|e| WatchdogError::task_queue(format!("failed to spawn {core}: {e}")))?;
        Ok(Self {
            requests,
            wedged,
            handle: Some(handle),
        })
    }

    fn unpark(&self) {
        if let Some(handle) = &self.handle {
            handle.thread().unpark();
        }
    }
}

fn core_loop(core: CoreId, inbox: &Receiver<CoreRequest>, wedged: &AtomicBool) {
    for request in inbox {
        match request {
            CoreRequest::Ping { alive, done } => {
                while wedged.load(Ordering::Acquire) {
                    thread::park_timeout(Duration::from_millis(1));
                }
                alive.acknowledge(core);
                if done.send(()).is_err() {
                    debug!(%core, "Ping requester went away");
                }
            }
            CoreRequest::Shutdown => break,
        }
    }
}

/// One worker thread per core, each answering pings on its own thread.
///
/// A core can be wedged to model a CPU stuck with interrupts off: its
/// pings are not answered until it is released.
pub struct ThreadedCores {
    workers: Vec<CoreWorker>,
    online: AtomicU64,
}

impl ThreadedCores {
    /// Spawn `count` core threads.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::InvalidConfiguration`] for more than 64
    /// cores and [`WatchdogError::TaskQueue`] if a thread cannot be spawned.
    pub fn new(count: u32) -> WatchdogResult<Self> {
        if count > 64 {
            return Err(WatchdogError::invalid_configuration(format!(
                "{count} cores exceed the 64-core mask"
            )));
        }
        let workers = (0..count)
            .map(|core| CoreWorker::spawn(CoreId(core)))
            .collect::<WatchdogResult<Vec<_>>>()?;
        Ok(Self {
            workers,
            online: AtomicU64::new(CoreMask::first(count).bits()),
        })
    }

    fn worker(&self, core: CoreId) -> Option<&CoreWorker> {
        self.workers.get(core.get() as usize)
    }

    /// Stop `core` from answering pings.
    pub fn wedge(&self, core: CoreId) {
        if let Some(worker) = self.worker(core) {
            worker.wedged.store(true, Ordering::Release);
        }
    }

    /// Let `core` answer again.
    pub fn release(&self, core: CoreId) {
        if let Some(worker) = self.worker(core) {
            worker.wedged.store(false, Ordering::Release);
            worker.unpark();
        }
    }

    /// Take `core` out of the online set.
    pub fn set_offline(&self, core: CoreId) {
        let mut online = self.online_cores();
        online.remove(core);
        self.online.store(online.bits(), Ordering::Release);
    }

    /// Put `core` back into the online set.
    pub fn set_online(&self, core: CoreId) {
        if self.worker(core).is_some() {
            let mut online = self.online_cores();
            online.insert(core);
            self.online.store(online.bits(), Ordering::Release);
        }
    }
}

impl CoreMessenger for ThreadedCores {
    fn online_cores(&self) -> CoreMask {
        CoreMask::from_bits(self.online.load(Ordering::Acquire))
    }

    fn ping(&self, core: CoreId, alive: &Arc<LivenessMask>) {
        if !self.online_cores().contains(core) {
            return;
        }
        let Some(worker) = self.worker(core) else {
            return;
        };
        let (done, finished) = bounded(1);
        let request = CoreRequest::Ping {
            alive: Arc::clone(alive),
            done,
        };
        if worker.requests.send(request).is_err() {
            debug!(%core, "Core thread is gone");
            return;
        }
        if finished.recv().is_err() {
            debug!(%core, "Core thread dropped the ping");
        }
    }
}

impl Drop for ThreadedCores {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.wedged.store(false, Ordering::Release);
            worker.unpark();
            if worker.requests.send(CoreRequest::Shutdown).is_err() {
                debug!("Core thread already stopped");
            }
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take()
                && handle.join().is_err()
            {
                error!("Core thread panicked");
            }
        }
    }
}

impl fmt::Debug for ThreadedCores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let wedged: CoreMask = (0..)
            .map(CoreId)
            .zip(&self.workers)
            .filter(|(_, w)| w.wedged.load(Ordering::Relaxed))
            .map(|(core, _)| core)
            .collect();
        f.debug_struct("ThreadedCores")
            .field("cores", &self.workers.len())
            .field("online", &self.online_cores())
            .field("wedged", &wedged)
            .finish()
    }
}

/// Secure monitor that records calls and answers as configured.
#[derive(Debug, Default)]
pub struct RecordingSecureMonitor {
    disable_status: Mutex<Option<i32>>,
    regsave_status: Mutex<Option<i32>>,
    dump_table_status: Mutex<Option<i32>>,
    disable_calls: AtomicUsize,
    regsave: Mutex<Option<RegsaveRegion>>,
    dump_region: Mutex<Option<RegsaveRegion>>,
}

impl RecordingSecureMonitor {
    /// Monitor that accepts every call.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse future disable calls with `status`.
    pub fn refuse_disable(&self, status: i32) {
        *self.disable_status.lock() = Some(status);
    }

    /// Accept future disable calls.
    pub fn accept_disable(&self) {
        *self.disable_status.lock() = None;
    }

    /// Fail future register-save calls with `status`.
    pub fn refuse_regsave(&self, status: i32) {
        *self.regsave_status.lock() = Some(status);
    }

    /// Fail future dump-table registrations with `status`.
    pub fn refuse_dump_table(&self, status: i32) {
        *self.dump_table_status.lock() = Some(status);
    }

    /// Disable calls received, accepted or not.
    #[must_use]
    pub fn disable_calls(&self) -> usize {
        self.disable_calls.load(Ordering::Acquire)
    }

    /// Last accepted register-save area.
    #[must_use]
    pub fn regsave(&self) -> Option<RegsaveRegion> {
        *self.regsave.lock()
    }

    /// Last accepted dump-table region.
    #[must_use]
    pub fn dump_region(&self) -> Option<RegsaveRegion> {
        *self.dump_region.lock()
    }
}

fn answer(status: Option<i32>) -> Result<(), i32> {
    status.map_or(Ok(()), Err)
}

impl SecureMonitor for RecordingSecureMonitor {
    fn disable_secure_watchdog(&self) -> Result<(), i32> {
        self.disable_calls.fetch_add(1, Ordering::AcqRel);
        answer(*self.disable_status.lock())
    }

    fn set_regsave(&self, region: RegsaveRegion) -> Result<(), i32> {
        answer(*self.regsave_status.lock())?;
        *self.regsave.lock() = Some(region);
        Ok(())
    }

    fn register_dump_region(&self, region: RegsaveRegion) -> Result<(), i32> {
        answer(*self.dump_table_status.lock())?;
        *self.dump_region.lock() = Some(region);
        Ok(())
    }
}

type HookTable = BTreeMap<u64, Arc<dyn PanicHook>>;

/// Panic notifier chain held in process memory.
#[derive(Default)]
pub struct LocalPanicChain {
    hooks: Arc<Mutex<HookTable>>,
    next_id: AtomicU64,
}

impl LocalPanicChain {
    /// Empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every registered hook, as a kernel panic would.
    pub fn notify_panic(&self) {
        let hooks: Vec<_> = self.hooks.lock().values().cloned().collect();
        for hook in hooks {
            hook.on_panic();
        }
    }

    /// Hooks currently registered.
    #[must_use]
    pub fn hook_count(&self) -> usize {
        self.hooks.lock().len()
    }
}

impl PanicNotifierChain for LocalPanicChain {
    fn register(&self, hook: Arc<dyn PanicHook>) -> PanicRegistration {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        self.hooks.lock().insert(id, hook);
        let hooks = Arc::clone(&self.hooks);
        PanicRegistration::new(move || {
            hooks.lock().remove(&id);
        })
    }
}

impl fmt::Debug for LocalPanicChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalPanicChain")
            .field("hooks", &self.hook_count())
            .finish()
    }
}

/// First physical address handed out by [`HostMemory`].
pub const HOST_MEMORY_BASE: u64 = 0x8800_0000;

/// Register-save memory backed by heap buffers.
#[derive(Debug)]
pub struct HostMemory {
    reservation: Option<usize>,
    previous_boot: Mutex<Option<Vec<u8>>>,
    regions: Mutex<BTreeMap<u64, Vec<u8>>>,
    next_phys: AtomicU64,
    fail_contiguous: AtomicBool,
    fail_page: AtomicBool,
    fail_mapping: AtomicBool,
}

impl HostMemory {
    /// Memory with a reservation of `reservation` bytes, if any.
    #[must_use]
    pub fn new(reservation: Option<usize>) -> Self {
        Self {
            reservation,
            previous_boot: Mutex::new(None),
            regions: Mutex::new(BTreeMap::new()),
            next_phys: AtomicU64::new(HOST_MEMORY_BASE),
            fail_contiguous: AtomicBool::new(false),
            fail_page: AtomicBool::new(false),
            fail_mapping: AtomicBool::new(false),
        }
    }

    /// Memory whose reservation fits `layout` exactly.
    #[must_use]
    pub fn for_layout(layout: &CaptureLayout) -> Self {
        Self::new(Some(layout.total_size()))
    }

    /// Contents the reservation holds from the previous boot.
    pub fn preload(&self, bytes: Vec<u8>) {
        *self.previous_boot.lock() = Some(bytes);
    }

    /// Make contiguous allocations fail.
    pub fn fail_contiguous(&self, fail: bool) {
        self.fail_contiguous.store(fail, Ordering::Release);
    }

    /// Make page allocations fail.
    pub fn fail_page(&self, fail: bool) {
        self.fail_page.store(fail, Ordering::Release);
    }

    /// Make mappings fail.
    pub fn fail_mapping(&self, fail: bool) {
        self.fail_mapping.store(fail, Ordering::Release);
    }

    /// Copy of the region allocated at `phys`.
    #[must_use]
    pub fn region(&self, phys: u64) -> Option<Vec<u8>> {
        self.regions.lock().get(&phys).cloned()
    }

    fn insert(&self, mut bytes: Vec<u8>, size: usize) -> u64 {
        bytes.resize(size, 0);
        let span = u64::try_from(size.next_multiple_of(PAGE_SIZE)).unwrap_or(u64::MAX);
        let phys = self.next_phys.fetch_add(span, Ordering::AcqRel);
        self.regions.lock().insert(phys, bytes);
        phys
    }
}

impl RegsaveMemory for HostMemory {
    fn reservation_size(&self) -> Option<usize> {
        self.reservation
    }

    fn allocate_contiguous(&self, size: usize) -> Option<u64> {
        if self.fail_contiguous.load(Ordering::Acquire) || self.reservation? < size {
            return None;
        }
        let bytes = self.previous_boot.lock().take().unwrap_or_default();
        Some(self.insert(bytes, size))
    }

    fn allocate_page(&self) -> Option<u64> {
        if self.fail_page.load(Ordering::Acquire) {
            return None;
        }
        Some(self.insert(Vec::new(), PAGE_SIZE))
    }

    fn with_mapping(&self, phys: u64, size: usize, f: &mut dyn FnMut(&mut [u8])) -> bool {
        if self.fail_mapping.load(Ordering::Acquire) {
            return false;
        }
        let mut regions = self.regions.lock();
        let Some(bytes) = regions.get_mut(&phys).and_then(|b| b.get_mut(..size)) else {
            return false;
        };
        f(bytes);
        true
    }
}

/// Payload of the unwind raised by [`RecordingSystemControl::halt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Halted(pub String);

/// System control that records delays instead of sleeping.
///
/// `halt` records the reason and unwinds the calling thread with a
/// [`Halted`] payload.
#[derive(Debug, Default)]
pub struct RecordingSystemControl {
    delay_ns: AtomicU64,
    delays: AtomicU64,
    halt_reason: Mutex<Option<String>>,
}

impl RecordingSystemControl {
    /// Fresh recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all requested delays.
    #[must_use]
    pub fn total_delay(&self) -> Duration {
        Duration::from_nanos(self.delay_ns.load(Ordering::Acquire))
    }

    /// Number of delay calls.
    #[must_use]
    pub fn delay_count(&self) -> u64 {
        self.delays.load(Ordering::Acquire)
    }

    /// Reason passed to the last halt.
    #[must_use]
    pub fn halt_reason(&self) -> Option<String> {
        self.halt_reason.lock().clone()
    }
}

impl SystemControl for RecordingSystemControl {
    fn delay(&self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.delay_ns.fetch_add(ns, Ordering::AcqRel);
        self.delays.fetch_add(1, Ordering::AcqRel);
    }

    fn halt(&self, reason: &str) -> ! {
        error!(reason, "System halted");
        *self.halt_reason.lock() = Some(reason.to_owned());
        std::panic::panic_any(Halted(reason.to_owned()))
    }
}

/// A full set of host collaborators.
#[derive(Clone)]
pub struct HostPlatform {
    /// Simulated timer registers.
    pub registers: Arc<SimulatedRegisters>,
    /// Manual clock.
    pub clock: Arc<ManualClock>,
    /// Cross-core messenger.
    pub cores: Arc<dyn CoreMessenger>,
    /// Secure monitor.
    pub secure_monitor: Arc<RecordingSecureMonitor>,
    /// Panic chain.
    pub panic_chain: Arc<LocalPanicChain>,
    /// Register-save memory.
    pub memory: Arc<HostMemory>,
    /// System control.
    pub system: Arc<RecordingSystemControl>,
    /// Reason for this boot.
    pub power_up_reason: PowerUpReason,
}

impl HostPlatform {
    /// Collaborators around `cores`, with a reservation sized for `layout`.
    #[must_use]
    pub fn new(cores: Arc<dyn CoreMessenger>, layout: &CaptureLayout) -> Self {
        Self {
            registers: Arc::new(SimulatedRegisters::new()),
            clock: Arc::new(ManualClock::new()),
            cores,
            secure_monitor: Arc::new(RecordingSecureMonitor::new()),
            panic_chain: Arc::new(LocalPanicChain::new()),
            memory: Arc::new(HostMemory::for_layout(layout)),
            system: Arc::new(RecordingSystemControl::new()),
            power_up_reason: PowerUpReason::Normal,
        }
    }

    /// `count` inline cores and the default capture layout.
    #[must_use]
    pub fn inline(count: u32) -> Self {
        Self::new(Arc::new(InlineCores::new(count)), &CaptureLayout::default())
    }

    /// Bundle handed to [`Supervisor::attach`](crate::Supervisor::attach).
    #[must_use]
    pub fn platform(&self) -> Platform<Arc<SimulatedRegisters>> {
        Platform {
            registers: Some(Arc::clone(&self.registers)),
            clock: self.clock.clone(),
            cores: Arc::clone(&self.cores),
            secure_monitor: self.secure_monitor.clone(),
            panic_chain: self.panic_chain.clone(),
            memory: self.memory.clone(),
            system: self.system.clone(),
            power_up_reason: self.power_up_reason,
        }
    }
}

impl fmt::Debug for HostPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostPlatform")
            .field("registers", &self.registers)
            .field("online_cores", &self.cores.online_cores())
            .field("secure_monitor", &self.secure_monitor)
            .field("power_up_reason", &self.power_up_reason)
            .finish_non_exhaustive()
    }
}

/// Writes a capture the way the secure firmware would before a bite.
#[derive(Debug, Clone)]
pub struct CaptureImage {
    layout: CaptureLayout,
    bytes: Vec<u8>,
}

impl CaptureImage {
    /// Zeroed region for `layout`.
    #[must_use]
    pub fn new(layout: CaptureLayout) -> Self {
        Self {
            layout,
            bytes: vec![0; layout.total_size()],
        }
    }

    fn put(&mut self, offset: usize, value: u32) -> CaptureResult<()> {
        RegionWriter::new(&mut self.bytes).put_u32(offset, value)
    }

    fn put_words(&mut self, offset: usize, words: &[u32]) -> CaptureResult<()> {
        for (index, word) in words.iter().enumerate() {
            self.put(offset + index * 4, *word)?;
        }
        Ok(())
    }

    /// Write an arbitrary firmware header.
    ///
    /// # Errors
    ///
    /// Returns an error if the region is too small.
    pub fn header(&mut self, magic: u32, version: u32, cpu_count: u32) -> CaptureResult<&mut Self> {
        self.put_words(0, &[magic, version, cpu_count])?;
        Ok(self)
    }

    /// Write the header this kernel expects.
    ///
    /// # Errors
    ///
    /// Returns an error if the region is too small.
    pub fn valid_header(&mut self) -> CaptureResult<&mut Self> {
        self.header(TZ_DUMP_MAGIC, TZ_DUMP_VERSION, self.layout.cpu_count)
    }

    /// Secure-context status flags of `core`.
    ///
    /// # Errors
    ///
    /// Returns an error if `core` is outside the layout.
    pub fn sc_status(&mut self, core: usize, status: u32) -> CaptureResult<&mut Self> {
        let offset = self.layout.sc_status_offset() + core * 4;
        self.put(offset, status)?;
        Ok(self)
    }

    /// Non-secure context of `core`.
    ///
    /// # Errors
    ///
    /// Returns an error if `core` is outside the layout.
    pub fn context(&mut self, core: usize, ctx: &MonitorContext) -> CaptureResult<&mut Self> {
        let offset = self.layout.sc_ns_offset() + core * CPU_CONTEXT_WORDS * 4;
        self.put_words(offset, &ctx.to_words())?;
        Ok(self)
    }

    /// Secure context.
    ///
    /// # Errors
    ///
    /// Returns an error if the region is too small.
    pub fn secure_context(&mut self, ctx: &MonitorContext) -> CaptureResult<&mut Self> {
        let offset = self.layout.sec_offset();
        self.put_words(offset, &ctx.to_words())?;
        Ok(self)
    }

    /// Watchdog status of `core`.
    ///
    /// # Errors
    ///
    /// Returns an error if `core` is outside the layout.
    pub fn wdt_sts(&mut self, core: usize, status: u32) -> CaptureResult<&mut Self> {
        let offset = self.layout.wdt_sts_offset() + core * 4;
        self.put(offset, status)?;
        Ok(self)
    }

    /// Kernel info as the kernel stamped it and the secure side acknowledged it,
    /// with overall copy status `ret`.
    ///
    /// # Errors
    ///
    /// Returns an error if the region is too small.
    pub fn kernel_info(&mut self, ret: u32) -> CaptureResult<&mut Self> {
        let size = u32::try_from(self.layout.total_size()).unwrap_or(u32::MAX);
        let layout = self.layout;
        self.put_words(
            KERNEL_INFO_OFFSET,
            &[
                layout.task_record_size,
                layout.ti_task_offset,
                size,
                CTX_REVISION,
                size,
                layout.cpu_count,
                ret,
                CTX_REVISION,
                CTX_SIGNATURE,
            ],
        )?;
        Ok(self)
    }

    /// Per-core copy record of `core`.
    ///
    /// # Errors
    ///
    /// Returns an error if `core` is outside the layout.
    pub fn per_core(&mut self, core: usize, record: &PerCoreRecord) -> CaptureResult<&mut Self> {
        let offset = self.layout.per_core_offset(core);
        self.put_words(
            offset,
            &[
                record.ret,
                record.stack_va,
                record.stack.from,
                record.stack.to,
                record.stack.size,
                record.task.from,
                record.task.to,
                record.task.size,
            ],
        )?;
        Ok(self)
    }

    /// Task record of `core`.
    ///
    /// # Errors
    ///
    /// Returns an error if `core` is outside the layout.
    pub fn task(
        &mut self,
        core: usize,
        comm: &str,
        state: u32,
        pid: u32,
        tgid: u32,
    ) -> CaptureResult<&mut Self> {
        let base = self.layout.task_offset(core);
        let fields = self.layout.task_fields;
        self.put(base + fields.state as usize, state)?;
        self.put(base + fields.pid as usize, pid)?;
        self.put(base + fields.tgid as usize, tgid)?;
        let mut name = [0u8; 16];
        for (slot, byte) in name.iter_mut().take(15).zip(comm.bytes()) {
            *slot = byte;
        }
        for (index, chunk) in name.chunks_exact(4).enumerate() {
            let word = u32::from_le_bytes([
                chunk.first().copied().unwrap_or(0),
                chunk.get(1).copied().unwrap_or(0),
                chunk.get(2).copied().unwrap_or(0),
                chunk.get(3).copied().unwrap_or(0),
            ]);
            self.put(base + fields.comm as usize + index * 4, word)?;
        }
        Ok(self)
    }

    /// Word at byte `offset` of `core`'s stack image.
    ///
    /// # Errors
    ///
    /// Returns an error if the word leaves the region.
    pub fn stack_word(&mut self, core: usize, offset: usize, value: u32) -> CaptureResult<&mut Self> {
        let base = self.layout.stack_offset(core);
        self.put(base + offset, value)?;
        Ok(self)
    }

    /// Layout this image follows.
    #[must_use]
    pub fn layout(&self) -> &CaptureLayout {
        &self.layout
    }

    /// Raw bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Take the raw bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Copy record marked complete for a core whose stack lived at `stack_va`.
#[must_use]
pub fn complete_record(stack_va: u32) -> PerCoreRecord {
    PerCoreRecord {
        ret: CAPTURE_COMPLETE,
        stack_va,
        ..PerCoreRecord::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        clock.set(10);
        clock.advance(Duration::from_nanos(5));
        assert_eq!(clock.now_ns(), 15);
    }

    #[test]
    fn test_inline_cores_skip_offline() {
        let cores = InlineCores::new(4);
        cores.set_online(CoreMask::from_bits(0b0101));
        let alive = Arc::new(LivenessMask::new());
        for core in 0..4 {
            cores.ping(CoreId(core), &alive);
        }
        assert_eq!(alive.snapshot(), CoreMask::from_bits(0b0101));
        assert_eq!(cores.ping_count(), 2);
    }

    #[test]
    fn test_threaded_cores_answer() -> WatchdogResult<()> {
        let cores = ThreadedCores::new(3)?;
        let alive = Arc::new(LivenessMask::new());
        for core in cores.online_cores().iter() {
            cores.ping(core, &alive);
        }
        assert_eq!(alive.snapshot(), CoreMask::first(3));
        Ok(())
    }

    #[test]
    fn test_threaded_cores_reject_too_many() {
        assert!(ThreadedCores::new(65).is_err());
    }

    #[test]
    fn test_panic_chain_registration() {
        struct Nop;
        impl PanicHook for Nop {
            fn on_panic(&self) {}
        }
        let chain = LocalPanicChain::new();
        let first = chain.register(Arc::new(Nop));
        let second = chain.register(Arc::new(Nop));
        assert_eq!(chain.hook_count(), 2);
        first.unregister();
        assert_eq!(chain.hook_count(), 1);
        drop(second);
        assert_eq!(chain.hook_count(), 0);
    }

    #[test]
    fn test_host_memory_preload_and_page() {
        let memory = HostMemory::new(Some(3 * PAGE_SIZE));
        memory.preload(vec![0xAA; 8]);
        let phys = memory.allocate_contiguous(2 * PAGE_SIZE);
        assert_eq!(phys, Some(HOST_MEMORY_BASE));
        let region = memory.region(HOST_MEMORY_BASE).unwrap_or_default();
        assert_eq!(region.len(), 2 * PAGE_SIZE);
        assert_eq!(region.first(), Some(&0xAA));
        assert_eq!(region.get(8), Some(&0));

        assert_eq!(memory.allocate_contiguous(4 * PAGE_SIZE), None);
        let page = memory.allocate_page();
        assert_eq!(page, Some(HOST_MEMORY_BASE + 2 * PAGE_SIZE as u64));
        memory.fail_mapping(true);
        assert!(!memory.with_mapping(HOST_MEMORY_BASE, 4, &mut |_| {}));
    }

    #[test]
    fn test_secure_monitor_refusal() {
        let monitor = RecordingSecureMonitor::new();
        assert_eq!(monitor.disable_secure_watchdog(), Ok(()));
        monitor.refuse_disable(-5);
        assert_eq!(monitor.disable_secure_watchdog(), Err(-5));
        assert_eq!(monitor.disable_calls(), 2);
    }

    #[test]
    fn test_halt_unwinds_with_reason() {
        let system = RecordingSystemControl::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            system.halt("stop");
        }));
        let payload = result.err().and_then(|p| p.downcast::<Halted>().ok());
        assert_eq!(payload.map(|h| *h), Some(Halted("stop".into())));
        assert_eq!(system.halt_reason().as_deref(), Some("stop"));
    }
}
