//! Hardware Memory Context: host memory that holds per-queue state hardware reads directly.
//!
//! Objects of each kind sit back to back in the Function Page Map (FPM), a flat space
//! that hardware translates in two levels: a segment descriptor (SD) covers 2 MB through
//! a page of 512 page descriptors (PDs), each pointing at one 4 KB page.

pub mod context;
pub mod lan;

use std::ops::Range;

use zerocopy::AsBytes;

use crate::env::{DmaPage, Environment};
use crate::error::{Error, Result};
use crate::i40e::device_limits::{HMC_FPM_BASE_UNIT, HMC_L2OBJ_BASE_ALIGNMENT, HMC_MAX_BP_COUNT, HMC_MAX_SD_COUNT, HMC_PAGE_SIZE, HMC_SD_PAGE_SIZE};
use crate::i40e::regs::{self, RegisterFile};
use crate::volatile;

use context::ContextField;
use lan::{RxQueueContext, TxQueueContext, RX_QUEUE_CONTEXT_FIELDS, TX_QUEUE_CONTEXT_FIELDS};

const PD_VALID: u64 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HmcObjectKind {
    LanTx,
    LanRx,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HmcObject {
    /// Byte offset in the FPM.
    pub base: usize,
    pub count: usize,
    pub size: usize,
}

impl HmcObject {
    pub fn end(&self) -> usize {
        self.base + self.count * self.size
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HmcCapabilities {
    pub queue_max: usize,
    pub tx_object_size: usize,
    pub rx_object_size: usize,
}

impl HmcCapabilities {
    /// Object sizes are reported as powers of two.
    pub fn read(bar: &impl RegisterFile) -> HmcCapabilities {
        HmcCapabilities {
            queue_max: regs::read_field(bar, regs::GLHMC_LANQMAX, regs::GLHMC_LANQMAX_MASK) as usize,
            tx_object_size: 1 << regs::read_field(bar, regs::GLHMC_LANTXOBJSZ, regs::GLHMC_OBJSZ_MASK),
            rx_object_size: 1 << regs::read_field(bar, regs::GLHMC_LANRXOBJSZ, regs::GLHMC_OBJSZ_MASK),
        }
    }
}

/// Where one object lives in the SD/PD tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HmcLocation {
    pub sd: usize,
    pub pd: usize,
    pub offset: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HmcLayout {
    pub tx: HmcObject,
    pub rx: HmcObject,
    pub sd_count: usize,
}

fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

impl HmcLayout {
    /// TX objects first, RX objects after them on the next L2 object boundary.
    pub fn compute(caps: &HmcCapabilities) -> Result<HmcLayout> {
        let tx = HmcObject { base: 0, count: caps.queue_max, size: caps.tx_object_size };
        let rx = HmcObject { base: align_up(tx.end(), HMC_L2OBJ_BASE_ALIGNMENT), count: caps.queue_max, size: caps.rx_object_size };
        let sd_count = rx.end().div_ceil(HMC_SD_PAGE_SIZE);
        if sd_count > HMC_MAX_SD_COUNT {
            return Err(Error::OutOfRange { what: "HMC segment descriptor count", index: sd_count, limit: HMC_MAX_SD_COUNT });
        }
        Ok(HmcLayout { tx, rx, sd_count })
    }

    pub fn object(&self, kind: HmcObjectKind) -> &HmcObject {
        match kind {
            HmcObjectKind::LanTx => &self.tx,
            HmcObjectKind::LanRx => &self.rx,
        }
    }

    /// FPM offset of object `index` of `kind`.
    pub fn fpm_offset(&self, kind: HmcObjectKind, index: usize) -> Result<usize> {
        let object = self.object(kind);
        if index >= object.count {
            return Err(Error::OutOfRange { what: "HMC object", index, limit: object.count });
        }
        Ok(object.base + index * object.size)
    }

    /// Where the first byte of object `index` of `kind` lives.
    pub fn locate(&self, kind: HmcObjectKind, index: usize) -> Result<HmcLocation> {
        self.locate_fpm(self.fpm_offset(kind, index)?)
    }

    pub fn locate_fpm(&self, fpm: usize) -> Result<HmcLocation> {
        let page = fpm / HMC_PAGE_SIZE;
        let sd = page / HMC_MAX_BP_COUNT;
        if sd >= self.sd_count {
            return Err(Error::OutOfRange { what: "HMC segment descriptor", index: sd, limit: self.sd_count });
        }
        Ok(HmcLocation { sd, pd: page % HMC_MAX_BP_COUNT, offset: fpm % HMC_PAGE_SIZE })
    }
}

struct SdEntry {
    pd_addr_page: DmaPage,
    pd_pages: Vec<DmaPage>,
}

pub struct Hmc<'a, E: Environment, R: RegisterFile> {
    env: &'a E,
    bar: &'a R,
    layout: HmcLayout,
    pf_id: usize,
    sds: Vec<Option<SdEntry>>,
}

impl<'a, E: Environment, R: RegisterFile> Hmc<'a, E, R> {
    /// Lays out the FPM from the capability registers, programs it, and backs every
    /// segment with memory.
    pub fn init(env: &'a E, bar: &'a R) -> Result<Hmc<'a, E, R>> {
        let caps = HmcCapabilities::read(bar);
        let layout = HmcLayout::compute(&caps)?;
        let pf_id = regs::read_field(bar, regs::PF_FUNC_RID, regs::PF_FUNC_RID_::FUNCTION_NUMBER) as usize;

        let mut hmc = Hmc { env, bar, layout, pf_id, sds: (0..layout.sd_count).map(|_| None).collect() };
        hmc.configure_fpm();

        for index in 0..layout.sd_count {
            if let Err(e) = hmc.sd_allocate(index) {
                warn!("HMC segment {} allocation failed, rolling back", index);
                hmc.shutdown();
                return Err(e);
            }
        }

        info!(
            "HMC ready: {} queues, TX objects {}B at {:#x}, RX objects {}B at {:#x}, {} segments",
            caps.queue_max, layout.tx.size, layout.tx.base, layout.rx.size, layout.rx.base, layout.sd_count
        );
        Ok(hmc)
    }

    fn configure_fpm(&self) {
        for (object, base_reg, count_reg) in [
            (&self.layout.tx, regs::GLHMC_LANTXBASE(self.pf_id), regs::GLHMC_LANTXCNT(self.pf_id)),
            (&self.layout.rx, regs::GLHMC_LANRXBASE(self.pf_id), regs::GLHMC_LANRXCNT(self.pf_id)),
        ] {
            regs::write_field(self.bar, base_reg, regs::GLHMC_LANBASE_MASK, (object.base / HMC_FPM_BASE_UNIT) as u32);
            regs::write_field(self.bar, count_reg, regs::GLHMC_LANCNT_MASK, object.count as u32);
        }
    }

    /// Releases every segment, last first, and unprograms the FPM.
    pub fn shutdown(mut self) {
        for index in (0..self.sds.len()).rev() {
            self.sd_release(index);
        }
        for reg in [regs::GLHMC_LANTXBASE(self.pf_id), regs::GLHMC_LANTXCNT(self.pf_id), regs::GLHMC_LANRXBASE(self.pf_id), regs::GLHMC_LANRXCNT(self.pf_id)] {
            regs::clear(self.bar, reg);
        }
        debug!("HMC released");
    }

    pub fn layout(&self) -> &HmcLayout {
        &self.layout
    }

    pub fn pf_id(&self) -> usize {
        self.pf_id
    }

    pub fn is_allocated(&self, index: usize) -> bool {
        matches!(self.sds.get(index), Some(Some(_)))
    }

    fn check_sd(&self, index: usize) -> Result<()> {
        if index >= self.sds.len() {
            return Err(Error::OutOfRange { what: "HMC segment descriptor", index, limit: self.sds.len() });
        }
        Ok(())
    }

    /// Backs segment `index` with a PD table and its pages, then hands it to hardware.
    pub fn sd_allocate(&mut self, index: usize) -> Result<()> {
        self.check_sd(index)?;
        if self.is_allocated(index) {
            return Ok(());
        }

        let pd_addr_page = self.env.allocate_dma(HMC_PAGE_SIZE)?;
        let mut pd_pages = Vec::with_capacity(HMC_MAX_BP_COUNT);
        for _ in 0..HMC_MAX_BP_COUNT {
            match self.env.allocate_dma(HMC_PAGE_SIZE) {
                Ok(page) => pd_pages.push(page),
                Err(e) => {
                    for page in pd_pages {
                        self.env.free_dma(page);
                    }
                    self.env.free_dma(pd_addr_page);
                    return Err(e);
                }
            }
        }

        for (pd, page) in pd_pages.iter().enumerate() {
            unsafe { volatile::write(pd_addr_page.element::<u64>(pd), (page.phys_addr() | PD_VALID).to_le()) };
        }

        // Data registers first; the command register write is what hardware acts on.
        // PMSDTYPE stays clear, which means paged.
        let phys = pd_addr_page.phys_addr();
        regs::write(self.bar, regs::PFHMC_SDDATAHIGH, (phys >> 32) as u32);
        regs::write(
            self.bar,
            regs::PFHMC_SDDATALOW,
            (phys as u32 & regs::PFHMC_SDDATALOW_::PMSDDATALOW)
                | regs::field_value(regs::PFHMC_SDDATALOW_::PMSDBPCOUNT, HMC_MAX_BP_COUNT as u32)
                | regs::PFHMC_SDDATALOW_::PMSDVALID,
        );
        regs::write(self.bar, regs::PFHMC_SDCMD, (index as u32 & regs::PFHMC_SDCMD_::PMSDIDX) | regs::PFHMC_SDCMD_::PMSDWR);

        debug!("HMC segment {} at {:#x}", index, phys);
        self.sds[index] = Some(SdEntry { pd_addr_page, pd_pages });
        Ok(())
    }

    /// Takes segment `index` away from hardware, then frees its memory. Returns false if
    /// the segment was not backed.
    pub fn sd_release(&mut self, index: usize) -> bool {
        let entry = match self.sds.get_mut(index).and_then(Option::take) {
            Some(entry) => entry,
            None => return false,
        };

        regs::write(self.bar, regs::PFHMC_SDDATAHIGH, 0);
        regs::write(self.bar, regs::PFHMC_SDDATALOW, regs::field_value(regs::PFHMC_SDDATALOW_::PMSDBPCOUNT, HMC_MAX_BP_COUNT as u32));
        regs::write(self.bar, regs::PFHMC_SDCMD, (index as u32 & regs::PFHMC_SDCMD_::PMSDIDX) | regs::PFHMC_SDCMD_::PMSDWR);

        for pd in 0..entry.pd_pages.len() {
            unsafe { volatile::write(entry.pd_addr_page.element::<u64>(pd), 0) };
            regs::write(
                self.bar,
                regs::PFHMC_PDINV,
                (index as u32 & regs::PFHMC_PDINV_::PMSDIDX) | regs::field_value(regs::PFHMC_PDINV_::PMPDIDX, pd as u32),
            );
        }

        for page in entry.pd_pages {
            self.env.free_dma(page);
        }
        self.env.free_dma(entry.pd_addr_page);
        debug!("HMC segment {} released", index);
        true
    }

    fn page(&self, location: &HmcLocation) -> Result<&DmaPage> {
        match self.sds.get(location.sd) {
            Some(Some(entry)) => Ok(&entry.pd_pages[location.pd]),
            _ => Err(Error::OutOfRange { what: "backed HMC segment descriptor", index: location.sd, limit: self.sds.len() }),
        }
    }

    fn page_mut(&mut self, location: &HmcLocation) -> Result<&mut DmaPage> {
        let limit = self.sds.len();
        match self.sds.get_mut(location.sd) {
            Some(Some(entry)) => Ok(&mut entry.pd_pages[location.pd]),
            _ => Err(Error::OutOfRange { what: "backed HMC segment descriptor", index: location.sd, limit }),
        }
    }

    /// Host address of the first byte of object `index` of `kind`. Objects are not
    /// page aligned, so the rest of one may sit on the next PD page, which is not
    /// contiguous in host memory.
    pub fn va_for(&self, kind: HmcObjectKind, index: usize) -> Result<*mut u8> {
        let location = self.layout.locate(kind, index)?;
        let page = self.page(&location)?;
        // offset is below the page size
        Ok(unsafe { page.as_ptr().add(location.offset) })
    }

    /// Splits object `index` of `kind` at PD page boundaries: each piece is where it
    /// lives and which bytes of the object it holds.
    fn pieces(&self, kind: HmcObjectKind, index: usize) -> Result<Vec<(HmcLocation, Range<usize>)>> {
        let start = self.layout.fpm_offset(kind, index)?;
        let size = self.layout.object(kind).size;
        let mut pieces = Vec::new();
        let mut done = 0;
        while done < size {
            let location = self.layout.locate_fpm(start + done)?;
            let len = (HMC_PAGE_SIZE - location.offset).min(size - done);
            pieces.push((location, done..done + len));
            done += len;
        }
        Ok(pieces)
    }

    /// Copies object `index` of `kind` out of HMC memory.
    pub fn read_object(&self, kind: HmcObjectKind, index: usize) -> Result<Vec<u8>> {
        let mut bytes = vec![0; self.layout.object(kind).size];
        for (location, range) in self.pieces(kind, index)? {
            let page = self.page(&location)?;
            let len = range.len();
            bytes[range].copy_from_slice(&page.as_slice()[location.offset..location.offset + len]);
        }
        Ok(bytes)
    }

    /// Overwrites object `index` of `kind`; `bytes` must be exactly one object long.
    pub fn write_object(&mut self, kind: HmcObjectKind, index: usize, bytes: &[u8]) -> Result<()> {
        let size = self.layout.object(kind).size;
        if bytes.len() != size {
            return Err(Error::OutOfRange { what: "HMC object length", index: bytes.len(), limit: size });
        }
        let pieces = self.pieces(kind, index)?;
        // Every page is checked before anything is written
        for (location, _) in &pieces {
            self.page(location)?;
        }
        for (location, range) in pieces {
            let page = self.page_mut(&location)?;
            page.write_bytes(location.offset, &bytes[range])?;
        }
        Ok(())
    }

    /// Zeroes object `index` of `kind`, then packs `src` (the unpacked context's bytes)
    /// into it field by field.
    pub fn set_context(&mut self, kind: HmcObjectKind, index: usize, src: &[u8], table: &[ContextField]) -> Result<()> {
        let mut dest = vec![0; self.layout.object(kind).size];
        for field in table {
            context::write(&mut dest, field, src)?;
        }
        self.write_object(kind, index, &dest)
    }

    /// Unpacks object `index` of `kind` into `dest`, which is zeroed first.
    pub fn get_context(&self, kind: HmcObjectKind, index: usize, dest: &mut [u8], table: &[ContextField]) -> Result<()> {
        let src = self.read_object(kind, index)?;
        dest.fill(0);
        for field in table {
            context::read(&src, field, dest)?;
        }
        Ok(())
    }

    pub fn set_context_tx(&mut self, queue: usize, ctx: &TxQueueContext) -> Result<()> {
        self.set_context(HmcObjectKind::LanTx, queue, ctx.as_bytes(), TX_QUEUE_CONTEXT_FIELDS)
    }

    pub fn set_context_rx(&mut self, queue: usize, ctx: &RxQueueContext) -> Result<()> {
        self.set_context(HmcObjectKind::LanRx, queue, ctx.as_bytes(), RX_QUEUE_CONTEXT_FIELDS)
    }

    pub fn get_context_tx(&self, queue: usize) -> Result<TxQueueContext> {
        context::unpack(&self.read_object(HmcObjectKind::LanTx, queue)?, TX_QUEUE_CONTEXT_FIELDS)
    }

    pub fn get_context_rx(&self, queue: usize) -> Result<RxQueueContext> {
        context::unpack(&self.read_object(HmcObjectKind::LanRx, queue)?, RX_QUEUE_CONTEXT_FIELDS)
    }
}
