//! 磁盘上的 inode，固定 32 字节，每个 inode 块存放 16 个：
//!
//! | 偏移 | 大小 | 字段 |
//! |------|------|------|
//! | 0    | 4    | 文件长度 |
//! | 4    | 2    | 打开计数 |
//! | 6    | 2    | 状态 |
//! | 8    | 22   | 11 个直接索引 |
//! | 30   | 2    | 间接索引 |
//!
//! 间接索引块整块存放 2 字节块号，-1 表示空。
//! 文件只会在末尾增长，所以第 n 个数据块总是挂在第 n 个索引位置上。

use log::debug;
use spin::Mutex;

use super::{block_ptr, get_i16, get_i32, put_i16, put_i32, raw_ptr, SuperBlock};
use crate::{Cache, Error, Result};
use crate::{BLOCK_SIZE, DIRECT_COUNT, INDIRECT_COUNT, INODES_PER_BLOCK, INODE_SIZE, MAX_FILE_SIZE};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum InodeState {
    #[default]
    Unused,
    Reading,
    Writing,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Inode {
    /// 文件字节数
    pub length: u32,
    /// 引用该 inode 的打开文件表项个数
    pub open_count: u16,
    pub state: InodeState,
    direct: [Option<u32>; DIRECT_COUNT],
    indirect: Option<u32>,
}

impl InodeState {
    #[inline]
    fn from_raw(raw: i16) -> Self {
        match raw {
            1 => Self::Reading,
            2 => Self::Writing,
            _ => Self::Unused,
        }
    }

    #[inline]
    fn raw(self) -> i16 {
        match self {
            Self::Unused => 0,
            Self::Reading => 1,
            Self::Writing => 2,
        }
    }
}

impl Inode {
    /// 通过 inumber 获取 inode 在磁盘上的位置：**块ID**以及**块内偏移**
    #[inline]
    pub fn position(inumber: u32) -> (usize, usize) {
        let inumber = inumber as usize;
        (
            inumber / INODES_PER_BLOCK + 1,
            inumber % INODES_PER_BLOCK * INODE_SIZE,
        )
    }

    pub fn load(inumber: u32, cache: &Cache) -> Self {
        let (block_id, offset) = Self::position(inumber);
        let mut block = [0; BLOCK_SIZE];
        cache.read(block_id, &mut block);
        Self::decode(&block[offset..offset + INODE_SIZE])
    }

    /// 先读出整块再写回，同块的其它 15 个 inode 不受影响
    pub fn save(&self, inumber: u32, cache: &Cache) {
        let (block_id, offset) = Self::position(inumber);
        let mut block = [0; BLOCK_SIZE];
        cache.read(block_id, &mut block);
        self.encode(&mut block[offset..offset + INODE_SIZE]);
        cache.write(block_id, &block);
    }

    pub fn decode(raw: &[u8]) -> Self {
        let mut direct = [None; DIRECT_COUNT];
        for (index, ptr) in direct.iter_mut().enumerate() {
            *ptr = block_ptr(get_i16(raw, 8 + index * 2).into());
        }

        Self {
            length: get_i32(raw, 0).max(0) as u32,
            open_count: get_i16(raw, 4).max(0) as u16,
            state: InodeState::from_raw(get_i16(raw, 6)),
            direct,
            indirect: block_ptr(get_i16(raw, 30).into()),
        }
    }

    pub fn encode(&self, raw: &mut [u8]) {
        put_i32(raw, 0, self.length as i32);
        put_i16(raw, 4, self.open_count as i16);
        put_i16(raw, 6, self.state.raw());
        for (index, &ptr) in self.direct.iter().enumerate() {
            put_i16(raw, 8 + index * 2, raw_ptr(ptr));
        }
        put_i16(raw, 30, raw_ptr(self.indirect));
    }

    /// 字节偏移 `offset` 所在的数据块
    pub fn find_target_block(&self, offset: usize, cache: &Cache) -> Option<u32> {
        let index = offset / BLOCK_SIZE;
        if index < DIRECT_COUNT {
            return self.direct[index];
        }

        let index = index - DIRECT_COUNT;
        if index >= INDIRECT_COUNT {
            return None;
        }
        let mut block = [0; BLOCK_SIZE];
        cache.read(self.indirect? as usize, &mut block);
        block_ptr(get_i16(&block, index * 2).into())
    }

    /// 直接索引已满，追加之前得先挂上间接索引块
    #[inline]
    pub fn needs_indirect(&self) -> bool {
        self.indirect.is_none() && self.direct.iter().all(Option::is_some)
    }

    /// 挂上一个全新的间接索引块
    pub fn set_indirect(&mut self, block_id: u32, cache: &Cache) {
        cache.write(block_id as usize, &[0xff; BLOCK_SIZE]);
        self.indirect = Some(block_id);
    }

    /// 把数据块挂到第一个空索引上，索引全满时返回 `false`
    pub fn add_block(&mut self, block_id: u32, cache: &Cache) -> bool {
        if let Some(ptr) = self.direct.iter_mut().find(|ptr| ptr.is_none()) {
            *ptr = Some(block_id);
            return true;
        }

        let Some(indirect) = self.indirect else {
            return false;
        };
        let mut block = [0; BLOCK_SIZE];
        cache.read(indirect as usize, &mut block);
        let Some(index) = (0..INDIRECT_COUNT).find(|&index| get_i16(&block, index * 2) < 0) else {
            return false;
        };
        put_i16(&mut block, index * 2, raw_ptr(Some(block_id)));
        cache.write(indirect as usize, &block);

        true
    }

    /// 清空文件：长度归零，返回曾经占用的全部块(含间接索引块)，
    /// 打开计数与状态保持不变
    pub fn clear(&mut self, cache: &Cache) -> Vec<u32> {
        let mut blocks: Vec<u32> = self.direct.iter().flatten().copied().collect();

        if let Some(indirect) = self.indirect {
            let mut block = [0; BLOCK_SIZE];
            cache.read(indirect as usize, &mut block);
            blocks.extend(
                (0..INDIRECT_COUNT).filter_map(|index| block_ptr(get_i16(&block, index * 2).into())),
            );
            blocks.push(indirect);
        }

        self.length = 0;
        self.direct = [None; DIRECT_COUNT];
        self.indirect = None;

        blocks
    }

    /// 恢复成格式化时的样子；占用的块需要调用者先行归还
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// 从指定位置(字节偏移)读出数据填充`buf`，到文件末尾为止
    pub fn read_at(&self, offset: usize, buf: &mut [u8], cache: &Cache) -> Result<usize> {
        let mut start = offset;
        let end = (offset + buf.len()).min(self.length as usize);

        let mut read_size = 0;
        let mut block = [0; BLOCK_SIZE];
        while start < end {
            // 长度以内的块一定已分配，否则 inode 已损坏
            let block_id = self
                .find_target_block(start, cache)
                .ok_or(Error::InvalidArgument)?;
            // 当前块的末地址(字节)
            let current_block_end = ((start / BLOCK_SIZE + 1) * BLOCK_SIZE).min(end);
            let block_read_size = current_block_end - start;

            cache.read(block_id as usize, &mut block);
            // 绝对地址 % 块大小 = 块内偏移
            let src = &block[start % BLOCK_SIZE..start % BLOCK_SIZE + block_read_size];
            buf[read_size..read_size + block_read_size].copy_from_slice(src);

            read_size += block_read_size;
            start = current_block_end;
        }

        Ok(read_size)
    }

    /// 从指定位置写入`buf`，遇到未分配的块就从空闲链表取块。
    ///
    /// 中途分配失败时，已写入的部分计入文件长度，然后返回错误；
    /// 分配只会发生在文件末尾，因此此时文件长度正是写到的位置。
    pub fn write_at(
        &mut self,
        offset: usize,
        buf: &[u8],
        cache: &Cache,
        super_block: &Mutex<SuperBlock>,
    ) -> Result<usize> {
        // 文件不能有空洞
        if offset > self.length as usize {
            return Err(Error::InvalidArgument);
        }
        let mut start = offset;
        let end = offset + buf.len();

        let mut written_size = 0;
        while start < end {
            if start >= MAX_FILE_SIZE {
                return Err(Error::FileTooLarge);
            }
            let current_block_end = ((start / BLOCK_SIZE + 1) * BLOCK_SIZE).min(end);
            let block_write_size = current_block_end - start;

            let mut block = [0; BLOCK_SIZE];
            let block_id = match self.find_target_block(start, cache) {
                Some(block_id) => {
                    // 整块覆盖时不必先读
                    if block_write_size < BLOCK_SIZE {
                        cache.read(block_id as usize, &mut block);
                    }
                    block_id
                }
                // 新块从全零开始
                None => self.grow(cache, super_block)?,
            };

            let src = &buf[written_size..written_size + block_write_size];
            block[start % BLOCK_SIZE..start % BLOCK_SIZE + block_write_size].copy_from_slice(src);
            cache.write(block_id as usize, &block);

            written_size += block_write_size;
            start = current_block_end;
            self.length = self.length.max(start as u32);
        }

        Ok(written_size)
    }

    fn grow(&mut self, cache: &Cache, super_block: &Mutex<SuperBlock>) -> Result<u32> {
        let mut super_block = super_block.lock();

        if self.needs_indirect() {
            let indirect = super_block.get_free_block(cache)?;
            self.set_indirect(indirect, cache);
        }

        let block_id = super_block.get_free_block(cache)?;
        if !self.add_block(block_id, cache) {
            super_block.return_block(block_id, cache)?;
            return Err(Error::FileTooLarge);
        }

        debug!("file grows to {} blocks", self.block_count(cache));
        Ok(block_id)
    }

    /// 已挂上的数据块个数
    fn block_count(&self, cache: &Cache) -> usize {
        let direct = self.direct.iter().flatten().count();
        let Some(indirect) = self.indirect else {
            return direct;
        };
        let mut block = [0; BLOCK_SIZE];
        cache.read(indirect as usize, &mut block);
        direct
            + (0..INDIRECT_COUNT)
                .filter(|&index| get_i16(&block, index * 2) >= 0)
                .count()
    }
}
