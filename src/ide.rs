//! ATA/IDE PIO block driver and MBR/EBR partition scan (C8).
//!
//! Grounded on `examples/original_source/device/ide.c`/`ide.h`. Up to two
//! channels (primary/secondary), two devices each (master/slave); every
//! command on a channel is serialized by that channel's reentrant mutex,
//! and the actual wait for completion happens off the IRQ line through
//! [`crate::sync::Semaphore`] rather than polling `BSY` in a spin loop.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex as SpinMutex;

use crate::config::{
    ATA_BUSY_WAIT_STEP_MS, ATA_BUSY_WAIT_TIMEOUT_MS, ATA_MAX_LBA, ATA_PRIMARY_BASE,
    ATA_PRIMARY_VECTOR, ATA_SECONDARY_BASE, ATA_SECONDARY_VECTOR,
};
use crate::error::{KernelError, KernelResult};
use crate::port::{inb, insw, outb, outsw};
use crate::sync::{Mutex, Semaphore};

const CMD_IDENTIFY: u8 = 0xEC;
const CMD_READ_SECTOR: u8 = 0x20;
const CMD_WRITE_SECTOR: u8 = 0x30;

const BIT_STAT_BSY: u8 = 0x80;
const BIT_STAT_DRQ: u8 = 0x08;

const BIT_DEV_MBS: u8 = 0xA0;
const BIT_DEV_LBA: u8 = 0x40;
const BIT_DEV_DEV: u8 = 0x10;

/// One sector, the unit every request is denominated in.
const SECTOR_BYTES: usize = 512;

/// A device (master or slave) on a channel, identified once at boot.
pub struct Disk {
    pub name: String,
    channel: usize,
    dev_no: u8,
}

/// A partition discovered by [`partition_scan`].
#[derive(Clone)]
pub struct Partition {
    pub name: String,
    pub start_lba: u32,
    pub sec_cnt: u32,
    pub disk_channel: usize,
    pub disk_dev_no: u8,
}

struct Channel {
    port_base: u16,
    irq_no: u8,
    mutex: Mutex,
    expecting_intr: AtomicBool,
    disk_done: Semaphore,
}

impl Channel {
    const fn new(port_base: u16, irq_no: u8) -> Self {
        Self {
            port_base,
            irq_no,
            mutex: Mutex::new(),
            expecting_intr: AtomicBool::new(false),
            disk_done: Semaphore::new(0),
        }
    }

    fn reg_data(&self) -> u16 {
        self.port_base
    }
    fn reg_sect_cnt(&self) -> u16 {
        self.port_base + 2
    }
    fn reg_lba_l(&self) -> u16 {
        self.port_base + 3
    }
    fn reg_lba_m(&self) -> u16 {
        self.port_base + 4
    }
    fn reg_lba_h(&self) -> u16 {
        self.port_base + 5
    }
    fn reg_dev(&self) -> u16 {
        self.port_base + 6
    }
    fn reg_status(&self) -> u16 {
        self.port_base + 7
    }
    fn reg_cmd(&self) -> u16 {
        self.reg_status()
    }
}

static CHANNELS: [Channel; 2] = [
    Channel::new(ATA_PRIMARY_BASE, ATA_PRIMARY_VECTOR),
    Channel::new(ATA_SECONDARY_BASE, ATA_SECONDARY_VECTOR),
];

static PARTITIONS: SpinMutex<Vec<Partition>> = SpinMutex::new(Vec::new());

/// Runs only inside [`partition_scan`], which itself only ever runs from
/// single-threaded boot-time initialization (one disk at a time), so a
/// plain module-global is sound; reset at the top of every disk's scan,
/// fixing the reference's "never reset between disks" bug (§9).
static mut EXT_LBA_BASE: u32 = 0;

fn select_disk(channel: &Channel, dev_no: u8) {
    let mut reg_device = BIT_DEV_MBS | BIT_DEV_LBA;
    if dev_no == 1 {
        reg_device |= BIT_DEV_DEV;
    }
    // SAFETY: `reg_dev` is this channel's own fixed port.
    unsafe { outb(channel.reg_dev(), reg_device) };
}

fn select_sector(channel: &Channel, dev_no: u8, lba: u32, sec_cnt: u8) {
    assert!(lba <= ATA_MAX_LBA, "ide: lba exceeds the 80 MiB debug ceiling");
    // SAFETY: every port below belongs to `channel`, a fixed hardware
    // address; `sec_cnt`/`lba` are caller-validated.
    unsafe {
        outb(channel.reg_sect_cnt(), sec_cnt);
        outb(channel.reg_lba_l(), (lba & 0xFF) as u8);
        outb(channel.reg_lba_m(), ((lba >> 8) & 0xFF) as u8);
        outb(channel.reg_lba_h(), ((lba >> 16) & 0xFF) as u8);
        let dev_bit = if dev_no == 1 { BIT_DEV_DEV } else { 0 };
        outb(
            channel.reg_dev(),
            BIT_DEV_MBS | BIT_DEV_LBA | dev_bit | ((lba >> 24) & 0x0F) as u8,
        );
    }
}

fn cmd_out(channel: &Channel, cmd: u8) {
    channel.expecting_intr.store(true, Ordering::SeqCst);
    // SAFETY: `reg_cmd` is this channel's own fixed port.
    unsafe { outb(channel.reg_cmd(), cmd) };
}

fn read_from_sector(channel: &Channel, buf: &mut [u8], sec_cnt: u8) {
    let words = sector_words(sec_cnt);
    // SAFETY: `buf` is valid for at least `words` u16 writes by the
    // caller's contract (`sec_cnt` sectors worth of bytes).
    unsafe { insw(channel.reg_data(), buf.as_mut_ptr().cast(), words) };
}

fn write_to_sector(channel: &Channel, buf: &[u8], sec_cnt: u8) {
    let words = sector_words(sec_cnt);
    // SAFETY: `buf` is valid for at least `words` u16 reads.
    unsafe { outsw(channel.reg_data(), buf.as_ptr().cast(), words) };
}

fn sector_words(sec_cnt: u8) -> usize {
    // `sec_cnt == 0` means 256 sectors: the hardware register is 8 bits,
    // so the caller already folded 256 down to 0 before writing it.
    let sectors = if sec_cnt == 0 { 256 } else { usize::from(sec_cnt) };
    sectors * SECTOR_BYTES / 2
}

/// Poll up to 30 s (in 10 ms naps) for the drive to clear `BSY`, returning
/// whether `DRQ` is then set.
///
/// The reference's `busy_wait` has a precedence bug, `time_limit -= 10 >=
/// 0`, that assigns the comparison's bool back into a `uint16_t` and so
/// never actually exits via the decrement (§9). This is the intended loop:
/// decrement the budget by 10 ms each pass and stop at or below zero.
fn busy_wait(channel: &Channel) -> bool {
    let mut time_limit: i32 = ATA_BUSY_WAIT_TIMEOUT_MS as i32;
    while time_limit > 0 {
        // SAFETY: `reg_status` is this channel's own fixed port; reading
        // it has no side effect.
        let status = unsafe { inb(channel.reg_status()) };
        if status & BIT_STAT_BSY == 0 {
            return status & BIT_STAT_DRQ != 0;
        }
        crate::timer::msleep(ATA_BUSY_WAIT_STEP_MS);
        time_limit -= ATA_BUSY_WAIT_STEP_MS as i32;
    }
    false
}

/// Read `sec_cnt` sectors starting at `lba` from `disk` into `buf`.
///
/// Chunks the request into at most 256-sector pieces (§8, boundary
/// scenario 1): `513` sectors issues `256 + 256 + 1` commands in order.
/// `buf` must be at least `sec_cnt * 512` bytes.
pub fn ide_read(disk: &Disk, lba: u32, buf: &mut [u8], sec_cnt: u32) -> KernelResult<()> {
    assert!(lba <= ATA_MAX_LBA, "ide_read: lba exceeds the 80 MiB debug ceiling");
    assert!(sec_cnt > 0, "ide_read: sec_cnt must be nonzero");
    assert!(buf.len() >= sec_cnt as usize * SECTOR_BYTES, "ide_read: buf too small");

    let channel = &CHANNELS[disk.channel];
    channel.mutex.acquire();

    select_disk(channel, disk.dev_no);

    let mut secs_done: u32 = 0;
    while secs_done < sec_cnt {
        let secs_op = (sec_cnt - secs_done).min(256);
        let op_u8 = if secs_op == 256 { 0 } else { secs_op as u8 };

        select_sector(channel, disk.dev_no, lba + secs_done, op_u8);
        cmd_out(channel, CMD_READ_SECTOR);

        channel.disk_done.down();

        if !busy_wait(channel) {
            channel.mutex.release();
            return Err(KernelError::DeviceTimeout);
        }

        let byte_off = secs_done as usize * SECTOR_BYTES;
        let byte_len = secs_op as usize * SECTOR_BYTES;
        read_from_sector(channel, &mut buf[byte_off..byte_off + byte_len], op_u8);
        secs_done += secs_op;
    }

    channel.mutex.release();
    Ok(())
}

/// Write `sec_cnt` sectors from `buf` to `disk` starting at `lba`.
pub fn ide_write(disk: &Disk, lba: u32, buf: &[u8], sec_cnt: u32) -> KernelResult<()> {
    assert!(lba <= ATA_MAX_LBA, "ide_write: lba exceeds the 80 MiB debug ceiling");
    assert!(sec_cnt > 0, "ide_write: sec_cnt must be nonzero");
    assert!(buf.len() >= sec_cnt as usize * SECTOR_BYTES, "ide_write: buf too small");

    let channel = &CHANNELS[disk.channel];
    channel.mutex.acquire();

    select_disk(channel, disk.dev_no);

    let mut secs_done: u32 = 0;
    while secs_done < sec_cnt {
        let secs_op = (sec_cnt - secs_done).min(256);
        let op_u8 = if secs_op == 256 { 0 } else { secs_op as u8 };

        select_sector(channel, disk.dev_no, lba + secs_done, op_u8);
        cmd_out(channel, CMD_WRITE_SECTOR);

        if !busy_wait(channel) {
            channel.mutex.release();
            return Err(KernelError::DeviceTimeout);
        }

        let byte_off = secs_done as usize * SECTOR_BYTES;
        let byte_len = secs_op as usize * SECTOR_BYTES;
        write_to_sector(channel, &buf[byte_off..byte_off + byte_len], op_u8);

        channel.disk_done.down();
        secs_done += secs_op;
    }

    channel.mutex.release();
    Ok(())
}

/// IRQ handler for vectors `0x2E`/`0x2F`. A spurious interrupt (no command
/// outstanding) is silently dropped: the mutex around every request already
/// serializes real completions away from false wakeups.
fn intr_hd_handler(vec_no: u32) {
    let ch_no = usize::from(vec_no as u8 == ATA_SECONDARY_VECTOR);
    let channel = &CHANNELS[ch_no];
    assert!(
        u8::try_from(vec_no).unwrap_or(0) == channel.irq_no,
        "ide: irq vector/channel mismatch"
    );
    if channel.expecting_intr.swap(false, Ordering::SeqCst) {
        channel.disk_done.up();
        // SAFETY: reading the status register acts as EOI to the drive
        // itself (separate from the PIC EOI the dispatcher sends), so it
        // will raise future IRQs.
        unsafe { inb(channel.reg_status()) };
    }
}

/// Byte-swap `len` (even) bytes of `src` into `dst`, the IDENTIFY buffer's
/// ATA-string convention (each 16-bit word is byte-swapped). The
/// reference's `swap_pairs_bytes` is off-by-two for odd `len` (§9); this
/// only ever receives the even lengths the IDENTIFY layout specifies (20
/// and 40), so that bug has no surviving callers here.
fn swap_pairs_bytes(src: &[u8], dst: &mut [u8]) {
    let mut idx = 0;
    while idx + 1 < src.len() {
        dst[idx] = src[idx + 1];
        dst[idx + 1] = src[idx];
        idx += 2;
    }
}

fn identify_disk(channel_no: usize, dev_no: u8, name: &str) {
    let channel = &CHANNELS[channel_no];
    select_disk(channel, dev_no);
    cmd_out(channel, CMD_IDENTIFY);
    channel.disk_done.down();

    assert!(busy_wait(channel), "{name}: identify failed");

    let mut id_info = [0_u8; SECTOR_BYTES];
    read_from_sector(channel, &mut id_info, 1);

    let mut serial = [0_u8; 20];
    swap_pairs_bytes(&id_info[20..40], &mut serial);
    let mut model = [0_u8; 40];
    swap_pairs_bytes(&id_info[54..94], &mut model);
    let sectors = u32::from_le_bytes([id_info[120], id_info[121], id_info[122], id_info[123]]);

    crate::serial_println!(
        "    disk {name} info: sectors={sectors} capacity={}MB",
        sectors as u64 * 512 / (1024 * 1024),
    );
    let _ = serial;
    let _ = model;
}

#[repr(C, packed)]
struct PartitionTableEntry {
    bootable: u8,
    start_head: u8,
    start_sec: u8,
    start_chs: u8,
    fs_type: u8,
    end_head: u8,
    end_sec: u8,
    end_chs: u8,
    start_lba: u32,
    sec_cnt: u32,
}

const EXT_PARTITION_TYPE: u8 = 0x05;

/// Scan the boot/extended-boot sector at `ext_lba` on `disk`, recursing
/// through the EBR chain and recording every non-empty entry into
/// [`PARTITIONS`]. The first four entries seen at the top level become
/// primaries ("name1".."name4"); everything else is a logical partition
/// ("name5".."name12", capped at eight).
pub fn partition_scan(disk: &Disk, ext_lba: u32, p_no: &mut u8, l_no: &mut u8) -> KernelResult<()> {
    if ext_lba == 0 {
        // SAFETY: single-threaded boot-time scan, one disk at a time.
        unsafe { EXT_LBA_BASE = 0 };
    }

    let mut boot_sector = [0_u8; SECTOR_BYTES];
    ide_read(disk, ext_lba, &mut boot_sector, 1)?;

    const TABLE_OFFSET: usize = 446;
    const ENTRY_SIZE: usize = 16;

    for i in 0..4 {
        let base = TABLE_OFFSET + i * ENTRY_SIZE;
        // SAFETY: `boot_sector` holds one full in-bounds sector; `base` is
        // always within it for `i in 0..4`.
        let entry = unsafe { &*(boot_sector.as_ptr().add(base).cast::<PartitionTableEntry>()) };
        let fs_type = entry.fs_type;
        let start_lba = entry.start_lba;
        let sec_cnt = entry.sec_cnt;

        if fs_type == EXT_PARTITION_TYPE {
            // SAFETY: same boot-time single-threaded scan as above.
            let base_lba = unsafe { EXT_LBA_BASE };
            if base_lba != 0 {
                partition_scan(disk, start_lba + base_lba, p_no, l_no)?;
            } else {
                // SAFETY: see above.
                unsafe { EXT_LBA_BASE = start_lba };
                partition_scan(disk, start_lba, p_no, l_no)?;
            }
        } else if fs_type != 0 {
            if ext_lba == 0 {
                assert!(*p_no < 4, "ide: too many primary partitions");
                let name = alloc::format!("{}{}", disk.name, *p_no + 1);
                PARTITIONS.lock().push(Partition {
                    name,
                    start_lba: ext_lba + start_lba,
                    sec_cnt,
                    disk_channel: disk.channel,
                    disk_dev_no: disk.dev_no,
                });
                *p_no += 1;
            } else {
                if *l_no >= 8 {
                    return Ok(());
                }
                let name = alloc::format!("{}{}", disk.name, *l_no + 5);
                PARTITIONS.lock().push(Partition {
                    name,
                    start_lba: ext_lba + start_lba,
                    sec_cnt,
                    disk_channel: disk.channel,
                    disk_dev_no: disk.dev_no,
                });
                *l_no += 1;
            }
        }
    }
    Ok(())
}

/// Snapshot of every partition discovered so far.
pub fn partitions() -> Vec<Partition> {
    PARTITIONS.lock().clone()
}

/// Probe both channels' two devices each, identify every present disk, and
/// scan the non-kernel-image disk's partition table. Registers the IRQ
/// handlers and unmasks both channels' lines.
///
/// `hd_cnt` is the number of physical disks this boot environment reports
/// (normally read from the BIOS data area at `0x475`; that address is not
/// available on this boot path, so the caller supplies it directly).
pub fn init(hd_cnt: u8) {
    for channel in &CHANNELS {
        channel.mutex.init();
        channel.disk_done.init();
        crate::interrupt::register_handler(channel.irq_no, intr_hd_handler);
        crate::interrupt::enable_irq(channel.irq_no - crate::config::PIC1_VECTOR_OFFSET);
    }

    let channel_cnt = usize::from(hd_cnt.div_ceil(2)).min(CHANNELS.len());
    for channel_no in 0..channel_cnt {
        for dev_no in 0..2_u8 {
            let name = alloc::format!("sd{}", (b'a' + (channel_no as u8) * 2 + dev_no) as char);
            identify_disk(channel_no, dev_no, &name);

            if dev_no != 0 {
                let disk = Disk { name: name.clone(), channel: channel_no, dev_no };
                let mut p_no = 0_u8;
                let mut l_no = 0_u8;
                if let Err(err) = partition_scan(&disk, 0, &mut p_no, &mut l_no) {
                    crate::serial_println!("ide: partition scan of {name} failed: {err}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #[test_case]
    fn sector_words_folds_256_back_from_zero() {
        assert_eq!(super::sector_words(0), 256 * 512 / 2);
        assert_eq!(super::sector_words(1), 512 / 2);
    }

    #[test_case]
    fn swap_pairs_bytes_swaps_each_word() {
        let src = [b'b', b'a', b'd', b'c'];
        let mut dst = [0_u8; 4];
        super::swap_pairs_bytes(&src, &mut dst);
        assert_eq!(&dst, b"abcd");
    }
}
