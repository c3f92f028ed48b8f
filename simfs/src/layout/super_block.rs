//! 超级块：
//! - 记录磁盘总块数与 inode 区域的大小；
//! - 管理空闲块链表：每个空闲块的前 2 字节存放下一个空闲块的块号，
//!   末尾空闲块存放 -1。
//!
//! 分配从链表头取，回收挂到链表尾，两者都只需一两次块读写。
//! 格式化时磁盘的最后一块不进链表，保留不用。

use log::{debug, info, warn};

use super::{block_ptr, get_i16, get_i32, put_i16, put_i32, raw_ptr, Inode};
use crate::{Cache, Error, Result};
use crate::{BLOCK_SIZE, INODES_PER_BLOCK, INODE_SIZE, NIL};

/// 块号以 2 字节存放，磁盘块数不能超过它的表示范围
const MAX_BLOCKS: u32 = i16::MAX as u32 + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    /// 磁盘总块数
    pub total_blocks: u32,
    /// inode 区域占据块数
    pub inode_blocks: u32,
    /// 空闲链表头
    free_head: Option<u32>,
    /// 空闲链表尾
    free_tail: Option<u32>,
}

impl SuperBlock {
    /// 尚未格式化的超级块
    pub fn new(total_blocks: u32) -> Result<Self> {
        if total_blocks > MAX_BLOCKS {
            return Err(Error::InvalidArgument);
        }

        Ok(Self {
            total_blocks,
            inode_blocks: 0,
            free_head: None,
            free_tail: None,
        })
    }

    /// 从 0 号块读出超级块
    pub fn load(cache: &Cache) -> Self {
        let mut block = [0; BLOCK_SIZE];
        cache.read(0, &mut block);

        Self {
            total_blocks: get_i32(&block, 0).max(0) as u32,
            inode_blocks: get_i32(&block, 4).max(0) as u32,
            free_head: block_ptr(get_i32(&block, 8)),
            free_tail: block_ptr(get_i32(&block, 12)),
        }
    }

    /// 超级块是否描述了一块大小为 `disk_blocks` 的已格式化磁盘
    pub fn is_valid(&self, disk_blocks: usize) -> bool {
        self.total_blocks as usize == disk_blocks
            && self.total_blocks <= MAX_BLOCKS
            && self.inode_blocks > 0
            && self.data_start() < self.total_blocks
            && self.free_head.map_or(true, |head| self.is_data_block(head))
            && self.free_tail.map_or(true, |tail| self.is_data_block(tail))
            && self.free_head.is_some() == self.free_tail.is_some()
    }

    /// 重建 inode 区域与空闲链表，磁盘上原有的文件全部作废
    pub fn format(&mut self, inode_count: u32, cache: &Cache) -> Result<()> {
        let inode_blocks = inode_count / INODES_PER_BLOCK as u32;
        // 除去超级块、inode 区域和保留的末块，至少还得剩一个可分配块
        if inode_blocks == 0 || inode_blocks + 2 >= self.total_blocks {
            return Err(Error::InvalidArgument);
        }
        self.inode_blocks = inode_blocks;

        let mut inode_block = [0; BLOCK_SIZE];
        let inode = Inode::default();
        for raw in inode_block.chunks_exact_mut(INODE_SIZE) {
            inode.encode(raw);
        }
        for block_id in 1..=inode_blocks {
            cache.write(block_id as usize, &inode_block);
        }

        let first = self.data_start();
        let last = self.total_blocks - 2;
        for block_id in first..self.total_blocks {
            let next = if block_id < last {
                (block_id + 1) as i16
            } else {
                NIL
            };
            let mut block = [0; BLOCK_SIZE];
            put_i16(&mut block, 0, next);
            cache.write(block_id as usize, &block);
        }
        self.free_head = Some(first);
        self.free_tail = Some(last);
        self.sync(cache);

        info!(
            "formatted {} blocks: {} inode blocks, free list {}..={}",
            self.total_blocks, inode_blocks, first, last
        );
        Ok(())
    }

    /// 从链表头取出一个空闲块
    pub fn get_free_block(&mut self, cache: &Cache) -> Result<u32> {
        let Some(head) = self.free_head else {
            return Err(Error::DiskFull);
        };

        if self.free_tail == Some(head) {
            self.free_head = None;
            self.free_tail = None;
        } else {
            let mut block = [0; BLOCK_SIZE];
            cache.read(head as usize, &mut block);
            self.free_head =
                block_ptr(get_i16(&block, 0).into()).filter(|&next| self.is_data_block(next));
            if self.free_head.is_none() {
                // 链表在链表尾之前断开
                warn!("free list broken after block {head}");
                self.free_tail = None;
            }
        }

        debug!("allocate block {head}");
        Ok(head)
    }

    /// 把数据块挂回链表尾
    pub fn return_block(&mut self, block_id: u32, cache: &Cache) -> Result<()> {
        if !self.is_data_block(block_id) {
            return Err(Error::InvalidArgument);
        }

        let mut block = [0; BLOCK_SIZE];
        put_i16(&mut block, 0, NIL);
        cache.write(block_id as usize, &block);

        match self.free_tail {
            Some(tail) => {
                cache.read(tail as usize, &mut block);
                put_i16(&mut block, 0, raw_ptr(Some(block_id)));
                cache.write(tail as usize, &block);
            }
            None => self.free_head = Some(block_id),
        }
        self.free_tail = Some(block_id);

        debug!("return block {block_id}");
        Ok(())
    }

    /// 链表上的空闲块数
    pub fn free_count(&self, cache: &Cache) -> usize {
        let mut count = 0;
        let mut current = self.free_head;
        let mut block = [0; BLOCK_SIZE];

        while let Some(block_id) = current {
            count += 1;
            if current == self.free_tail || count >= self.total_blocks as usize {
                break;
            }
            cache.read(block_id as usize, &mut block);
            current = block_ptr(get_i16(&block, 0).into());
        }

        count
    }

    /// 把超级块写回 0 号块
    pub fn sync(&self, cache: &Cache) {
        let mut block = [0; BLOCK_SIZE];
        put_i32(&mut block, 0, self.total_blocks as i32);
        put_i32(&mut block, 4, self.inode_blocks as i32);
        put_i32(&mut block, 8, self.free_head.map_or(-1, |head| head as i32));
        put_i32(&mut block, 12, self.free_tail.map_or(-1, |tail| tail as i32));
        cache.write(0, &block);
    }

    #[inline]
    pub fn inode_count(&self) -> u32 {
        self.inode_blocks * INODES_PER_BLOCK as u32
    }

    /// 数据区域的首块
    #[inline]
    pub fn data_start(&self) -> u32 {
        self.inode_blocks + 1
    }

    #[inline]
    pub fn is_data_block(&self, block_id: u32) -> bool {
        block_id > self.inode_blocks && block_id < self.total_blocks
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use block_dev::MemoryDisk;

    use super::SuperBlock;
    use crate::{Cache, Error, Inode, InodeState, BLOCK_SIZE};

    fn formatted(total_blocks: u32, inode_count: u32) -> (Cache, SuperBlock) {
        let cache = Cache::new(Arc::new(MemoryDisk::new(total_blocks as usize)), 8);
        let mut super_block = SuperBlock::new(total_blocks).unwrap();
        super_block.format(inode_count, &cache).unwrap();
        (cache, super_block)
    }

    #[test]
    fn format_layout() {
        let (cache, super_block) = formatted(1000, 64);

        assert_eq!(super_block.inode_blocks, 4);
        assert_eq!(super_block.inode_count(), 64);
        assert_eq!(super_block.free_count(&cache), 1000 - 4 - 2);
        assert_eq!(SuperBlock::load(&cache), super_block);
        assert!(super_block.is_valid(1000));
        assert!(!super_block.is_valid(999));

        let mut block = [0; BLOCK_SIZE];
        cache.read(0, &mut block);
        assert_eq!(block[..16], [0, 0, 3, 232, 0, 0, 0, 4, 0, 0, 0, 5, 0, 0, 3, 230]);

        // 空闲块的前 2 字节指向下一块，链表尾为 -1
        cache.read(5, &mut block);
        assert_eq!(block[..2], [0, 6]);
        cache.read(998, &mut block);
        assert_eq!(block[..2], [0xff, 0xff]);

        let inode = Inode::load(63, &cache);
        assert_eq!(inode, Inode::default());
        assert_eq!(inode.state, InodeState::Unused);
    }

    #[test]
    fn allocate_in_order() {
        let (cache, mut super_block) = formatted(1000, 64);

        assert_eq!(super_block.get_free_block(&cache), Ok(5));
        assert_eq!(super_block.free_count(&cache), 993);
        assert_eq!(super_block.get_free_block(&cache), Ok(6));
        assert_eq!(super_block.free_count(&cache), 992);
    }

    #[test]
    fn returned_block_is_reachable_again() {
        let (cache, mut super_block) = formatted(20, 16);
        let before = super_block.free_count(&cache);

        let block_id = super_block.get_free_block(&cache).unwrap();
        super_block.return_block(block_id, &cache).unwrap();
        assert_eq!(super_block.free_count(&cache), before);

        let mut handed_out = Vec::new();
        while let Ok(block_id) = super_block.get_free_block(&cache) {
            handed_out.push(block_id);
        }
        assert_eq!(handed_out.len(), before);
        assert!(handed_out.contains(&block_id));
        assert!(!handed_out.contains(&19));
    }

    #[test]
    fn disk_full() {
        let (cache, mut super_block) = formatted(5, 16);

        // 块 2、3 可分配，4 号保留
        assert_eq!(super_block.free_count(&cache), 2);
        assert_eq!(super_block.get_free_block(&cache), Ok(2));
        assert_eq!(super_block.get_free_block(&cache), Ok(3));
        assert_eq!(super_block.get_free_block(&cache), Err(Error::DiskFull));
        assert_eq!(super_block.free_count(&cache), 0);

        super_block.return_block(3, &cache).unwrap();
        super_block.return_block(2, &cache).unwrap();
        assert_eq!(super_block.free_count(&cache), 2);
        assert_eq!(super_block.get_free_block(&cache), Ok(3));
        assert_eq!(super_block.get_free_block(&cache), Ok(2));
        assert_eq!(super_block.get_free_block(&cache), Err(Error::DiskFull));
    }

    #[test]
    fn reject_non_data_blocks() {
        let (cache, mut super_block) = formatted(100, 32);

        for block_id in [0, 1, 2, 100, 1000] {
            assert_eq!(
                super_block.return_block(block_id, &cache),
                Err(Error::InvalidArgument)
            );
        }
    }

    #[test]
    fn reject_bad_geometry() {
        assert_eq!(SuperBlock::new(40_000), Err(Error::InvalidArgument));

        let cache = Cache::new(Arc::new(MemoryDisk::new(8)), 4);
        let mut super_block = SuperBlock::new(8).unwrap();
        assert_eq!(super_block.format(8, &cache), Err(Error::InvalidArgument));
        assert_eq!(super_block.format(16 * 6, &cache), Err(Error::InvalidArgument));
        assert!(super_block.format(16 * 5, &cache).is_ok());
    }
}
