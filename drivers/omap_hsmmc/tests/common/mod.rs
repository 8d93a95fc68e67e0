//! Simulated controller and recording collaborators shared by the
//! integration tests.

#![allow(dead_code)]

use std::{
    alloc::Layout,
    collections::HashMap,
    ptr::NonNull,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    },
};

use kdma::{
    ChannelProgram, DMAInfo, DmaBusAddress, DmaChannel, DmaDirection, DmaEngine, DmaError,
    DmaMapping, DmaResult, ScatterEntry,
};
use mmc_base::{
    BusMode, BusWidth, DataFlags, MmcCommand, MmcCore, MmcData, MmcError, MmcHostOps, MmcIos,
    MmcRequest, MmcResult, PowerMode, Regulator, ResponseFlags, Timing, opcode,
};
use omap_hsmmc::{
    HostResources, HsmmcHost, HsmmcIo, HsmmcPlatform, Reg, SenseFn, SlotConfig, Status, bits,
};

pub const PHYS_BASE: u64 = 0x4809_c000;
pub const DMA_TX: u32 = 61;
pub const DMA_RX: u32 = 62;
/// Bus address handed out for the descriptor table.
pub const TABLE_BUS_ADDR: u64 = 0x9ff0_0000;
pub const VDD: u32 = 20;

/// Register file with the side effects the driver relies on: write-1-to-clear
/// status, self-clearing resets, a clock that is stable as soon as it is
/// enabled and an init stream that completes at once.
#[derive(Default)]
pub struct FakeRegs {
    regs: Mutex<HashMap<Reg, u32>>,
    cmds: Mutex<Vec<(u32, u32)>>,
    resets: AtomicUsize,
    stuck_reset: AtomicBool,
}

impl FakeRegs {
    pub fn with_capa(capa: u32) -> Self {
        let regs = Self::default();
        regs.set(Reg::Capa, capa);
        regs
    }

    /// Raw register value, bypassing side effects.
    pub fn get(&self, reg: Reg) -> u32 {
        self.regs.lock().unwrap().get(&reg).copied().unwrap_or(0)
    }

    pub fn set(&self, reg: Reg, val: u32) {
        self.regs.lock().unwrap().insert(reg, val);
    }

    /// Hardware sets status bits.
    pub fn raise(&self, status: Status) {
        let mut regs = self.regs.lock().unwrap();
        *regs.entry(Reg::Stat).or_default() |= status.bits();
    }

    /// `(argument, command word)` of every command written, oldest first.
    pub fn commands(&self) -> Vec<(u32, u32)> {
        self.cmds.lock().unwrap().clone()
    }

    pub fn clear_commands(&self) {
        self.cmds.lock().unwrap().clear();
    }

    /// Command and data line resets requested so far.
    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// Reset bits never clear.
    pub fn stick_resets(&self) {
        self.stuck_reset.store(true, Ordering::SeqCst);
    }
}

impl HsmmcIo for FakeRegs {
    fn read(&self, reg: Reg) -> u32 {
        match reg {
            Reg::Sysstatus => bits::RESETDONE,
            _ => self.get(reg),
        }
    }

    fn write(&self, reg: Reg, val: u32) {
        let mut regs = self.regs.lock().unwrap();
        match reg {
            Reg::Stat => {
                *regs.entry(Reg::Stat).or_default() &= !val;
            }
            Reg::Sysctl => {
                let mut val = val;
                if val & (bits::SRC | bits::SRD) != 0 {
                    self.resets.fetch_add(1, Ordering::SeqCst);
                    if !self.stuck_reset.load(Ordering::SeqCst) {
                        val &= !(bits::SRC | bits::SRD);
                    }
                }
                if val & bits::ICE != 0 {
                    val |= bits::ICS;
                } else {
                    val &= !bits::ICS;
                }
                regs.insert(Reg::Sysctl, val);
            }
            Reg::Sysconfig => {
                regs.insert(Reg::Sysconfig, val & !bits::SOFTRESET);
            }
            Reg::Cmd => {
                regs.insert(Reg::Cmd, val);
                let arg = regs.get(&Reg::Arg).copied().unwrap_or(0);
                let con = regs.get(&Reg::Con).copied().unwrap_or(0);
                if con & bits::INIT_STREAM != 0 {
                    *regs.entry(Reg::Stat).or_default() |= Status::CC.bits();
                } else {
                    self.cmds.lock().unwrap().push((arg, val));
                }
            }
            _ => {
                regs.insert(reg, val);
            }
        }
    }
}

/// Callback run when a fake hands a resource back to the platform.
pub type Hook = Mutex<Option<Box<dyn Fn() + Send + Sync>>>;

fn run_hook(hook: &Hook) {
    if let Some(hook) = hook.lock().unwrap().as_ref() {
        hook();
    }
}

/// System DMA controller that records every call.
#[derive(Default)]
pub struct FakeDma {
    next: AtomicU32,
    pub requested: Mutex<Vec<u32>>,
    pub programs: Mutex<Vec<(DmaChannel, ChannelProgram)>>,
    pub started: Mutex<Vec<DmaChannel>>,
    pub freed: Mutex<Vec<DmaChannel>>,
    pub no_channels: AtomicBool,
    pub on_free: Hook,
}

impl FakeDma {
    pub fn last_channel(&self) -> DmaChannel {
        DmaChannel(self.next.load(Ordering::SeqCst))
    }

    pub fn programs(&self) -> Vec<ChannelProgram> {
        self.programs.lock().unwrap().iter().map(|(_, p)| *p).collect()
    }

    pub fn freed(&self) -> Vec<DmaChannel> {
        self.freed.lock().unwrap().clone()
    }
}

impl DmaEngine for FakeDma {
    fn request_channel(&self, sync_dev: u32) -> DmaResult<DmaChannel> {
        if self.no_channels.load(Ordering::SeqCst) {
            return Err(DmaError::NoChannel);
        }
        self.requested.lock().unwrap().push(sync_dev);
        Ok(DmaChannel(self.next.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn program(&self, ch: DmaChannel, prog: &ChannelProgram) {
        self.programs.lock().unwrap().push((ch, *prog));
    }

    fn start(&self, ch: DmaChannel) {
        self.started.lock().unwrap().push(ch);
    }

    fn free_channel(&self, ch: DmaChannel) {
        self.freed.lock().unwrap().push(ch);
        run_hook(&self.on_free);
    }
}

/// Identity mapping with heap-backed coherent memory.
#[derive(Default)]
pub struct FakeMapping {
    pub maps: AtomicUsize,
    pub unmaps: AtomicUsize,
    pub allocs: AtomicUsize,
    pub frees: AtomicUsize,
    pub fail_alloc: AtomicBool,
    /// Joins entries that are contiguous on the bus, like an IOMMU would.
    pub merge: AtomicBool,
    /// Loses the last mapped entry.
    pub drop_tail: AtomicBool,
    /// Length of every list handed to `unmap_sg`.
    pub unmapped: Mutex<Vec<usize>>,
    pub on_unmap: Hook,
}

impl FakeMapping {
    pub fn merging() -> Self {
        let mapping = Self::default();
        mapping.merge.store(true, Ordering::SeqCst);
        mapping
    }

    pub fn balanced(&self) -> bool {
        self.maps.load(Ordering::SeqCst) == self.unmaps.load(Ordering::SeqCst)
    }

    pub fn unmapped(&self) -> Vec<usize> {
        self.unmapped.lock().unwrap().clone()
    }
}

impl DmaMapping for FakeMapping {
    fn map_sg(&self, sg: &[ScatterEntry], _dir: DmaDirection) -> DmaResult<Vec<ScatterEntry>> {
        self.maps.fetch_add(1, Ordering::SeqCst);
        let mut mapped: Vec<ScatterEntry> = Vec::with_capacity(sg.len());
        for seg in sg {
            match mapped.last_mut() {
                Some(prev)
                    if self.merge.load(Ordering::SeqCst)
                        && prev.addr.add(u64::from(prev.len)) == seg.addr =>
                {
                    prev.len += seg.len;
                }
                _ => mapped.push(*seg),
            }
        }
        if self.drop_tail.load(Ordering::SeqCst) {
            mapped.pop();
        }
        Ok(mapped)
    }

    fn unmap_sg(&self, sg: &[ScatterEntry], _dir: DmaDirection) {
        self.unmaps.fetch_add(1, Ordering::SeqCst);
        self.unmapped.lock().unwrap().push(sg.len());
        run_hook(&self.on_unmap);
    }

    unsafe fn alloc_coherent(&self, layout: Layout) -> DmaResult<DMAInfo> {
        if self.fail_alloc.load(Ordering::SeqCst) {
            return Err(DmaError::NoMemory);
        }
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        let cpu_addr = NonNull::new(ptr).ok_or(DmaError::NoMemory)?;
        self.allocs.fetch_add(1, Ordering::SeqCst);
        Ok(DMAInfo {
            cpu_addr,
            bus_addr: DmaBusAddress::new(TABLE_BUS_ADDR),
        })
    }

    unsafe fn dealloc_coherent(&self, dma: DMAInfo, layout: Layout) {
        self.frees.fetch_add(1, Ordering::SeqCst);
        unsafe { std::alloc::dealloc(dma.cpu_addr.as_ptr(), layout) };
    }
}

#[derive(Default)]
pub struct FakePlatform {
    pub gets: AtomicUsize,
    pub puts: AtomicUsize,
    pub context_lost: AtomicBool,
    pub detects_scheduled: AtomicUsize,
}

impl FakePlatform {
    /// Runtime references currently held.
    pub fn refs(&self) -> isize {
        self.gets.load(Ordering::SeqCst) as isize - self.puts.load(Ordering::SeqCst) as isize
    }
}

impl HsmmcPlatform for FakePlatform {
    fn udelay(&self, _us: u32) {}

    fn runtime_get(&self) {
        self.gets.fetch_add(1, Ordering::SeqCst);
    }

    fn runtime_put(&self) {
        self.puts.fetch_add(1, Ordering::SeqCst);
    }

    fn context_was_lost(&self) -> bool {
        self.context_lost.swap(false, Ordering::SeqCst)
    }

    fn fclk_rate(&self) -> u32 {
        96_000_000
    }

    fn schedule_detect(&self) {
        self.detects_scheduled.fetch_add(1, Ordering::SeqCst);
    }
}

/// Card stack that records completions and notifications.
#[derive(Default)]
pub struct FakeCore {
    pub done: Mutex<Vec<MmcRequest>>,
    pub detects: Mutex<Vec<u32>>,
    claimed: AtomicBool,
    /// Someone else holds the host; `try_claim_host` fails.
    pub busy: AtomicBool,
    pub can_sleep: AtomicBool,
    pub sleep_fails: AtomicBool,
    pub sleeps: AtomicUsize,
    pub awakes: AtomicUsize,
    pub restores: AtomicUsize,
    pub suspend_refused: AtomicBool,
    pub suspends: AtomicUsize,
    pub resumes: AtomicUsize,
}

impl FakeCore {
    pub fn completed(&self) -> usize {
        self.done.lock().unwrap().len()
    }

    pub fn last(&self) -> MmcRequest {
        self.done.lock().unwrap().last().cloned().expect("no completed request")
    }

    pub fn detects(&self) -> Vec<u32> {
        self.detects.lock().unwrap().clone()
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }
}

impl MmcCore for FakeCore {
    fn request_done(&self, req: MmcRequest) {
        self.done.lock().unwrap().push(req);
    }

    fn detect_change(&self, delay_ms: u32) {
        self.detects.lock().unwrap().push(delay_ms);
    }

    fn claim_host(&self) {
        assert!(!self.claimed.swap(true, Ordering::SeqCst), "host claimed twice");
    }

    fn try_claim_host(&self) -> bool {
        !self.busy.load(Ordering::SeqCst)
            && self
                .claimed
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }

    fn release_host(&self) {
        assert!(self.claimed.swap(false, Ordering::SeqCst), "host was not claimed");
    }

    fn card_can_sleep(&self) -> bool {
        self.can_sleep.load(Ordering::SeqCst)
    }

    fn card_sleep(&self) -> MmcResult {
        if self.sleep_fails.load(Ordering::SeqCst) {
            return Err(MmcError::TimedOut);
        }
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn card_awake(&self) -> MmcResult {
        self.awakes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn power_restore(&self) -> MmcResult {
        self.restores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn suspend_host(&self) -> MmcResult {
        self.suspends.fetch_add(1, Ordering::SeqCst);
        if self.suspend_refused.load(Ordering::SeqCst) {
            return Err(MmcError::ResourceBusy);
        }
        Ok(())
    }

    fn resume_host(&self) -> MmcResult {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRegulator {
    pub power: Mutex<Vec<(bool, u32)>>,
    pub sleep: Mutex<Vec<(bool, u32, bool)>>,
    /// Every `set_power` call fails.
    pub broken: AtomicBool,
}

impl FakeRegulator {
    pub fn power_calls(&self) -> Vec<(bool, u32)> {
        self.power.lock().unwrap().clone()
    }

    pub fn sleep_calls(&self) -> Vec<(bool, u32, bool)> {
        self.sleep.lock().unwrap().clone()
    }
}

impl Regulator for FakeRegulator {
    fn set_power(&self, power_on: bool, vdd: u32) -> MmcResult {
        if self.broken.load(Ordering::SeqCst) {
            return Err(MmcError::Io);
        }
        self.power.lock().unwrap().push((power_on, vdd));
        Ok(())
    }

    fn set_sleep(&self, sleep: bool, vdd: u32, card_sleep: bool) -> MmcResult {
        self.sleep.lock().unwrap().push((sleep, vdd, card_sleep));
        Ok(())
    }
}

/// Board sense line backed by a flag the test can flip.
pub fn sense(flag: &Arc<AtomicBool>) -> SenseFn {
    let flag = flag.clone();
    Box::new(move || flag.load(Ordering::SeqCst))
}

/// A host wired to fakes.
pub struct Rig {
    pub host: HsmmcHost<Arc<FakeRegs>>,
    pub regs: Arc<FakeRegs>,
    pub core: Arc<FakeCore>,
    pub dma: Arc<FakeDma>,
    pub mapping: Arc<FakeMapping>,
    pub platform: Arc<FakePlatform>,
    pub regulator: Arc<FakeRegulator>,
}

impl Rig {
    /// Attaches a host. `adma` decides the advertised controller capability.
    pub fn new(adma: bool, setup: impl FnOnce(&mut SlotConfig)) -> Self {
        Self::with_mapping(adma, FakeMapping::default(), setup)
    }

    pub fn with_mapping(
        adma: bool,
        mapping: FakeMapping,
        setup: impl FnOnce(&mut SlotConfig),
    ) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let capa = if adma { bits::CAPA_ADMA_SUPPORT } else { 0 };
        let regs = Arc::new(FakeRegs::with_capa(capa));
        let core = Arc::new(FakeCore::default());
        let dma = Arc::new(FakeDma::default());
        let mapping = Arc::new(mapping);
        let platform = Arc::new(FakePlatform::default());
        let regulator = Arc::new(FakeRegulator::default());

        let mut config = SlotConfig::new("mmc0", PHYS_BASE);
        config.dma_line_tx = DMA_TX;
        config.dma_line_rx = DMA_RX;
        config.ocr_mask = 1 << VDD;
        config.regulator = Some(regulator.clone());
        setup(&mut config);

        let host = HsmmcHost::new(
            regs.clone(),
            config,
            HostResources {
                core: core.clone(),
                dma: dma.clone(),
                mapping: mapping.clone(),
                platform: platform.clone(),
                irq: 83,
            },
        )
        .expect("attach");

        Self {
            host,
            regs,
            core,
            dma,
            mapping,
            platform,
            regulator,
        }
    }

    /// Attached host with card power on and the bus clocked at 400 kHz.
    pub fn powered(adma: bool, setup: impl FnOnce(&mut SlotConfig)) -> Self {
        let rig = Self::new(adma, setup);
        rig.power_on();
        rig
    }

    pub fn power_on(&self) {
        let mut ios = MmcIos {
            clock: 400_000,
            vdd: VDD,
            bus_width: BusWidth::One,
            bus_mode: BusMode::OpenDrain,
            power_mode: PowerMode::Up,
            timing: Timing::Legacy,
        };
        self.host.set_ios(&ios);
        ios.power_mode = PowerMode::On;
        self.host.set_ios(&ios);
        self.regs.clear_commands();
    }

    /// Raises `status` and runs the interrupt handler.
    pub fn irq(&self, status: Status) {
        self.regs.raise(status);
        self.host.handle_irq();
    }
}

/// Scatter list of `n` segments of `seg_len` bytes, 64 KiB apart.
pub fn scatter(n: usize, seg_len: u32) -> Vec<ScatterEntry> {
    (0..n as u64)
        .map(|i| ScatterEntry::new(0x1000_0000 + i * 0x1_0000, seg_len))
        .collect()
}

pub fn status_cmd() -> MmcRequest {
    MmcRequest::command(MmcCommand::new(opcode::SEND_STATUS, 1 << 16, ResponseFlags::R1))
}

pub fn read_multi(blocks: u32, sg: Vec<ScatterEntry>) -> MmcRequest {
    let mut req = MmcRequest::with_data(
        MmcCommand::new(opcode::READ_MULTIPLE_BLOCK, 0x100, ResponseFlags::R1),
        MmcData::new(512, blocks, DataFlags::READ, sg),
    );
    req.stop = Some(MmcCommand::new(
        opcode::STOP_TRANSMISSION,
        0,
        ResponseFlags::R1B,
    ));
    req
}

pub fn write_single(sg: Vec<ScatterEntry>) -> MmcRequest {
    MmcRequest::with_data(
        MmcCommand::new(opcode::WRITE_BLOCK, 0x200, ResponseFlags::R1),
        MmcData::new(512, 1, DataFlags::WRITE, sg),
    )
}

pub fn read_single(sg: Vec<ScatterEntry>) -> MmcRequest {
    MmcRequest::with_data(
        MmcCommand::new(opcode::READ_SINGLE_BLOCK, 0x300, ResponseFlags::R1),
        MmcData::new(512, 1, DataFlags::READ, sg),
    )
}

/// Opcode field of a command word.
pub fn opcode_of(word: u32) -> u32 {
    word >> 24
}
