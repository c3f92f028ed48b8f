//! # 块缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此我们在内存中开辟固定数量的槽位，
//! 把最近操作过的块留在内存里。文件系统的所有块读写都经过块缓存层。
//!
//! 置换策略为二次机会(CLOCK)：槽位按扫描顺序排成队列，
//! 被引用过的块清掉引用位后挪到队尾，第一个未被引用的块被踢走；
//! 脏块先写回块设备，才让出槽位。
//!
//! 缓存与块设备同步后并不会移除块缓存，清空缓存由 [`Cache::flush`] 完成。

use std::collections::VecDeque;
use std::sync::Arc;

use block_dev::BlockDevice;
use log::trace;
use spin::Mutex;

use crate::DataBlock;
use crate::BLOCK_SIZE;

pub struct Cache {
    block_device: Arc<dyn BlockDevice>,
    /// 槽位个数的上限
    capacity: usize,
    /// 已占用的槽位，队首即时钟指针所指
    slots: Mutex<VecDeque<CacheBlock>>,
}

/// 内存中的块缓存
struct CacheBlock {
    /// 对应的块ID
    block_id: usize,
    /// 最近是否被访问过
    referenced: bool,
    /// 是否为脏块
    dirty: bool,
    /// 缓存的数据
    data: DataBlock,
}

impl CacheBlock {
    fn sync(&mut self, block_device: &Arc<dyn BlockDevice>) {
        if self.dirty {
            self.dirty = false;
            block_device.write_block(self.block_id, &self.data);
        }
    }
}

impl Cache {
    pub fn new(block_device: Arc<dyn BlockDevice>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            block_device,
            capacity,
            slots: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// 该块当前是否在缓存中
    pub fn contains(&self, block_id: usize) -> bool {
        self.slots
            .lock()
            .iter()
            .any(|slot| slot.block_id == block_id)
    }

    /// 读出整块；`buf` 超过块大小的部分不会被填充
    pub fn read(&self, block_id: usize, buf: &mut [u8]) {
        let len = buf.len().min(BLOCK_SIZE);
        let mut slots = self.slots.lock();

        if let Some(slot) = slots.iter_mut().find(|slot| slot.block_id == block_id) {
            trace!("cache hit: block {block_id}");
            slot.referenced = true;
            buf[..len].copy_from_slice(&slot.data[..len]);
            return;
        }

        trace!("cache miss: block {block_id}");
        let mut data = [0; BLOCK_SIZE];
        self.block_device.read_block(block_id, &mut data);
        buf[..len].copy_from_slice(&data[..len]);
        self.install(&mut slots, block_id, data, false);
    }

    /// 写入整块：超出块大小的部分截断，不足的部分补零
    pub fn write(&self, block_id: usize, buf: &[u8]) {
        let len = buf.len().min(BLOCK_SIZE);
        let mut data = [0; BLOCK_SIZE];
        data[..len].copy_from_slice(&buf[..len]);

        let mut slots = self.slots.lock();
        if let Some(slot) = slots.iter_mut().find(|slot| slot.block_id == block_id) {
            slot.data = data;
            slot.referenced = true;
            slot.dirty = true;
            return;
        }

        self.install(&mut slots, block_id, data, true);
    }

    /// 写回所有脏块，不移除缓存
    pub fn sync(&self) {
        self.slots
            .lock()
            .iter_mut()
            .for_each(|slot| slot.sync(&self.block_device));
    }

    /// 写回所有脏块并清空缓存
    pub fn flush(&self) {
        let mut slots = self.slots.lock();
        slots
            .iter_mut()
            .for_each(|slot| slot.sync(&self.block_device));
        slots.clear();
    }
}

impl Cache {
    fn install(
        &self,
        slots: &mut VecDeque<CacheBlock>,
        block_id: usize,
        data: DataBlock,
        dirty: bool,
    ) {
        // 槽位用尽，踢走一个块
        if slots.len() == self.capacity {
            if let Some(mut victim) = Self::second_chance(slots) {
                trace!(
                    "evict block {} (dirty: {}) for block {block_id}",
                    victim.block_id,
                    victim.dirty
                );
                // 写回先于新块入住
                victim.sync(&self.block_device);
            }
        }

        slots.push_back(CacheBlock {
            block_id,
            referenced: true,
            dirty,
            data,
        });
    }

    /// 一趟扫描全被引用过时，引用位已经全部清空，继续扫描必定选出牺牲者
    fn second_chance(slots: &mut VecDeque<CacheBlock>) -> Option<CacheBlock> {
        while let Some(mut slot) = slots.pop_front() {
            if !slot.referenced {
                return Some(slot);
            }
            slot.referenced = false;
            slots.push_back(slot);
        }

        None
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        self.sync();
    }
}
