//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备，例如磁盘、光盘、U盘等；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 块号是否合法由调用者负责，驱动只管读写恰好一个块。

#![no_std]

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;
use core::any::Any;

use spin::Mutex;

/// 块大小(字节)
pub const BLOCK_SIZE: usize = 512;

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Any {
    fn read_block(&self, block_id: usize, buf: &mut [u8]);
    fn write_block(&self, block_id: usize, buf: &[u8]);
    /// 设备的总块数
    fn block_count(&self) -> usize;
}

/// 内存里的块设备，数据随进程消失
#[derive(Debug)]
pub struct MemoryDisk {
    blocks: Mutex<Vec<[u8; BLOCK_SIZE]>>,
}

impl MemoryDisk {
    pub fn new(block_count: usize) -> Self {
        Self {
            blocks: Mutex::new(vec![[0; BLOCK_SIZE]; block_count]),
        }
    }
}

impl BlockDevice for MemoryDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let blocks = self.blocks.lock();
        let len = buf.len().min(BLOCK_SIZE);
        buf[..len].copy_from_slice(&blocks[block_id][..len]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut blocks = self.blocks.lock();
        let len = buf.len().min(BLOCK_SIZE);
        blocks[block_id][..len].copy_from_slice(&buf[..len]);
    }

    #[inline]
    fn block_count(&self) -> usize {
        self.blocks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockDevice, MemoryDisk, BLOCK_SIZE};

    #[test]
    fn memory_disk() {
        let disk = MemoryDisk::new(4);
        assert_eq!(disk.block_count(), 4);

        disk.write_block(2, &[7; BLOCK_SIZE]);
        let mut buf = [0; BLOCK_SIZE];
        disk.read_block(2, &mut buf);
        assert_eq!(buf, [7; BLOCK_SIZE]);

        disk.read_block(1, &mut buf);
        assert_eq!(buf, [0; BLOCK_SIZE]);
    }
}
