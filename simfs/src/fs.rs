//! # 文件系统层
//!
//! 把块缓存、超级块、打开文件表组合成面向调用者的接口。
//! 每个调用都显式带上 `open` 返回的句柄，没有隐式的“当前文件”。
//!
//! 句柄拿到手后，inode 的读写者状态机已经排除了冲突的访问者，
//! 这里只需锁住该 inode 的内存副本与句柄自己的读写指针。
//! 加锁顺序：打开文件表 → inode → 读写指针 → 超级块 → 块缓存。

use std::sync::Arc;

use block_dev::BlockDevice;
use log::{info, warn};

use crate::file_table::{Access, FileHandle, FileTable, FileTableEntry, OpenMode};
use crate::layout::{Directory, Inode, SuperBlock};
use crate::{Cache, Error, Result};
use crate::{DEFAULT_INODES, MAX_FILE_SIZE};

/// `seek` 的基准位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// 文件开头
    Absolute,
    /// 当前读写指针
    Relative,
    /// 文件末尾
    FromEnd,
}

impl TryFrom<i32> for Whence {
    type Error = Error;

    fn try_from(whence: i32) -> Result<Self> {
        match whence {
            0 => Ok(Self::Absolute),
            1 => Ok(Self::Relative),
            2 => Ok(Self::FromEnd),
            _ => Err(Error::InvalidArgument),
        }
    }
}

pub struct FileSystem {
    cache: Cache,
    super_block: spin::Mutex<SuperBlock>,
    table: FileTable,
}

impl FileSystem {
    /// 挂载块设备。超级块与设备对不上时，按默认 inode 数重新格式化
    pub fn mount(block_device: Arc<dyn BlockDevice>, cache_blocks: usize) -> Result<Self> {
        let disk_blocks = block_device.block_count();
        let cache = Cache::new(block_device, cache_blocks);

        let mut super_block = SuperBlock::load(&cache);
        if !super_block.is_valid(disk_blocks) {
            warn!("no valid super block on a {disk_blocks}-block device, formatting");
            let total_blocks = u32::try_from(disk_blocks).map_err(|_| Error::InvalidArgument)?;
            super_block = SuperBlock::new(total_blocks)?;
            super_block.format(DEFAULT_INODES, &cache)?;
        }

        let inode_count = super_block.inode_count();
        let directory = Self::load_directory(inode_count, &cache)?;
        info!(
            "mounted: {} blocks, {} inodes, {} files",
            super_block.total_blocks,
            inode_count,
            directory.entries().count()
        );

        Ok(Self {
            cache,
            super_block: spin::Mutex::new(super_block),
            table: FileTable::new(directory, inode_count),
        })
    }

    /// 以 `inode_count` 个 inode 重新格式化，原有文件全部丢失。
    /// 还有文件打开时返回 [`Error::Busy`]
    pub fn format(&self, inode_count: u32) -> Result<()> {
        self.table.format(inode_count, &self.cache, &self.super_block)?;
        self.cache.sync();
        Ok(())
    }

    /// 按 `mode`(`"r"`、`"w"`、`"w+"`、`"a"`)打开文件
    pub fn open(&self, name: &str, mode: &str) -> Result<FileHandle> {
        let mode: OpenMode = mode.parse()?;
        let entry = self.table.open(name, mode, &self.cache)?;

        match mode {
            OpenMode::Write => {
                if let Err(err) = self.truncate(&entry) {
                    self.table.close(&entry, &self.cache)?;
                    return Err(err);
                }
            }
            OpenMode::Append => {
                let length = entry.inode().lock().length;
                *entry.seek_ptr().lock() = length as usize;
            }
            OpenMode::Read | OpenMode::ReadWrite => {}
        }

        Ok(entry)
    }

    /// 从读写指针处读取，返回读到的字节数；位于文件末尾时为 0
    pub fn read(&self, entry: &FileTableEntry, buf: &mut [u8]) -> Result<usize> {
        entry.check(Access::Read.into())?;

        let inode = entry.inode().lock();
        let mut seek_ptr = entry.seek_ptr().lock();
        let read_size = inode.read_at(*seek_ptr, buf, &self.cache)?;
        *seek_ptr += read_size;

        Ok(read_size)
    }

    /// 从读写指针处写入，文件按需增长。
    ///
    /// 中途失败时，已写入的部分保留，读写指针停在写到的位置。
    pub fn write(&self, entry: &FileTableEntry, buf: &[u8]) -> Result<usize> {
        entry.check(Access::Write.into())?;

        let mut inode = entry.inode().lock();
        let mut seek_ptr = entry.seek_ptr().lock();
        let written = inode.write_at(*seek_ptr, buf, &self.cache, &self.super_block);
        *seek_ptr = match written {
            Ok(size) => *seek_ptr + size,
            // 失败只发生在文件末尾
            Err(_) => (*seek_ptr).max(inode.length as usize),
        };
        inode.save(entry.inumber(), &self.cache);

        written
    }

    /// 移动读写指针，结果限制在 `[0, fsize]` 内
    pub fn seek(&self, entry: &FileTableEntry, offset: i64, whence: Whence) -> Result<usize> {
        if !entry.is_open() {
            return Err(Error::InvalidArgument);
        }

        let length = entry.inode().lock().length as i64;
        let mut seek_ptr = entry.seek_ptr().lock();
        let base = match whence {
            Whence::Absolute => 0,
            Whence::Relative => *seek_ptr as i64,
            Whence::FromEnd => length,
        };
        *seek_ptr = base.saturating_add(offset).clamp(0, length) as usize;

        Ok(*seek_ptr)
    }

    pub fn close(&self, entry: &FileTableEntry) -> Result<()> {
        self.table.close(entry, &self.cache)
    }

    /// 复制句柄，两者共享读写指针，各自都需要关闭
    pub fn dup(&self, entry: &FileHandle) -> Result<FileHandle> {
        self.table.dup(entry)
    }

    /// 删除文件并归还它的全部块；文件仍被打开时返回 [`Error::Busy`]
    pub fn delete(&self, name: &str) -> Result<()> {
        self.table.delete(name, &self.cache, &self.super_block)
    }

    pub fn fsize(&self, entry: &FileTableEntry) -> Result<usize> {
        if !entry.is_open() {
            return Err(Error::InvalidArgument);
        }
        Ok(entry.inode().lock().length as usize)
    }

    /// 没有打开的文件
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.table.is_empty()
    }

    /// 依次落盘根目录、超级块，再写回块缓存中的所有脏块。
    ///
    /// 目录因 `/` 仍被打开而没能落盘时返回 [`Error::Busy`]，其余部分照常落盘
    pub fn sync(&self) -> Result<()> {
        let directory = self.table.sync_directory(&self.cache, &self.super_block);
        self.super_block.lock().sync(&self.cache);
        self.cache.sync();
        directory
    }

    pub fn unmount(self) -> Result<()> {
        self.sync()?;
        self.cache.flush();
        info!("unmounted");
        Ok(())
    }

    /// 可分配的空闲块数
    pub fn free_blocks(&self) -> usize {
        self.super_block.lock().free_count(&self.cache)
    }

    pub fn inode_count(&self) -> u32 {
        self.super_block.lock().inode_count()
    }

    /// 根目录下的所有文件：`(inumber, 文件名)`
    pub fn list(&self) -> Vec<(u32, String)> {
        self.table.entries()
    }
}

impl FileSystem {
    fn load_directory(inode_count: u32, cache: &Cache) -> Result<Directory> {
        let root = Inode::load(0, cache);
        let mut data = vec![0; (root.length as usize).min(MAX_FILE_SIZE)];
        let len = root.read_at(0, &mut data, cache)?;
        Ok(Directory::from_bytes(
            Directory::capacity_for(inode_count),
            &data[..len],
        ))
    }

    /// 清空文件并归还它占用的块
    fn truncate(&self, entry: &FileTableEntry) -> Result<()> {
        let mut inode = entry.inode().lock();
        let blocks = inode.clear(&self.cache);
        let returned = {
            let mut super_block = self.super_block.lock();
            blocks
                .iter()
                .try_for_each(|&block_id| super_block.return_block(block_id, &self.cache))
        };
        inode.save(entry.inumber(), &self.cache);
        *entry.seek_ptr().lock() = 0;

        returned
    }
}

impl Drop for FileSystem {
    fn drop(&mut self) {
        if let Err(err) = self.sync() {
            warn!("sync on drop failed: {err}");
        }
    }
}
