//! # 打开文件表
//!
//! 每次 `open` 产生一个表项([`FileTableEntry`])，表项持有私有的读写指针，
//! 并引用该 inumber 在内存中唯一的一份 inode。
//!
//! 每个 inode 有一台读写者状态机：
//!
//! ```text
//! Unused --读--> Reading --最后一个表项关闭--> Unused
//! Unused --写--> Writing --最后一个表项关闭--> Unused
//! ```
//!
//! 读者可以共存，写者独占。判断与改状态在同一把锁下完成，
//! 拿不到就在条件变量上睡眠；inode 回到 Unused 时广播唤醒，
//! 醒来的线程各自重新判断。
//!
//! 表项到手后，状态机就是该 inode 的块读写的唯一守卫。

use std::collections::BTreeMap;
use std::ptr;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use enumflags2::{bitflags, BitFlags};
use log::debug;

use crate::layout::{Directory, Inode, InodeState, SuperBlock};
use crate::{Cache, Error, Result};

/// 访问权限
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read = 0b01,
    Write = 0b10,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// `"r"`
    Read,
    /// `"w"`：打开时清空文件
    Write,
    /// `"w+"`
    ReadWrite,
    /// `"a"`：读写指针从文件末尾开始
    Append,
}

impl OpenMode {
    pub fn access(self) -> BitFlags<Access> {
        match self {
            Self::Read => Access::Read.into(),
            Self::Write | Self::Append => Access::Write.into(),
            Self::ReadWrite => Access::Read | Access::Write,
        }
    }

    /// 是否以写者身份占用 inode
    #[inline]
    pub fn is_writer(self) -> bool {
        self != Self::Read
    }
}

impl FromStr for OpenMode {
    type Err = Error;

    fn from_str(mode: &str) -> Result<Self> {
        match mode {
            "r" => Ok(Self::Read),
            "w" => Ok(Self::Write),
            "w+" => Ok(Self::ReadWrite),
            "a" => Ok(Self::Append),
            _ => Err(Error::InvalidArgument),
        }
    }
}

#[derive(Debug)]
pub struct FileTableEntry {
    inumber: u32,
    mode: OpenMode,
    /// 读写指针，`dup` 出来的句柄共享它
    seek_ptr: spin::Mutex<usize>,
    ref_count: AtomicUsize,
    inode: Arc<spin::Mutex<Inode>>,
}

/// `open` 返回的句柄，之后的每次调用都显式带上它
pub type FileHandle = Arc<FileTableEntry>;

impl FileTableEntry {
    fn new(inumber: u32, mode: OpenMode, inode: Arc<spin::Mutex<Inode>>) -> Self {
        Self {
            inumber,
            mode,
            seek_ptr: spin::Mutex::new(0),
            ref_count: AtomicUsize::new(1),
            inode,
        }
    }

    #[inline]
    pub fn inumber(&self) -> u32 {
        self.inumber
    }

    #[inline]
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.ref_count() > 0
    }

    /// 句柄已经关闭，或不具备 `access` 权限时报错
    pub(crate) fn check(&self, access: BitFlags<Access>) -> Result<()> {
        if self.is_open() && self.mode.access().contains(access) {
            Ok(())
        } else {
            Err(Error::InvalidArgument)
        }
    }

    #[inline]
    pub(crate) fn inode(&self) -> &spin::Mutex<Inode> {
        &self.inode
    }

    #[inline]
    pub(crate) fn seek_ptr(&self) -> &spin::Mutex<usize> {
        &self.seek_ptr
    }
}

pub struct FileTable {
    inner: Mutex<TableInner>,
    /// 有 inode 回到 Unused 时广播
    released: Condvar,
}

struct TableInner {
    directory: Directory,
    /// 用于区分“目录满”与“inode 表满”
    inode_count: u32,
    /// 目录自上次落盘后是否改动过
    directory_dirty: bool,
    /// 打开中的 inode，每个 inumber 只有这一份内存副本
    inodes: BTreeMap<u32, Arc<spin::Mutex<Inode>>>,
    entries: Vec<FileHandle>,
}

impl FileTable {
    pub fn new(directory: Directory, inode_count: u32) -> Self {
        Self {
            inner: Mutex::new(TableInner {
                directory,
                inode_count,
                directory_dirty: false,
                inodes: BTreeMap::new(),
                entries: Vec::new(),
            }),
            released: Condvar::new(),
        }
    }

    /// 打开文件，inode 被占用时阻塞等待。
    ///
    /// 写模式下文件不存在就创建；`/` 只能读。
    pub fn open(&self, name: &str, mode: OpenMode, cache: &Cache) -> Result<FileHandle> {
        let mut inner = self.lock();

        loop {
            // 睡眠期间文件可能被删除或创建，每次醒来都重新解析名字
            let inumber = match inner.directory.lookup(name) {
                Ok(0) if mode.is_writer() => return Err(Error::InvalidArgument),
                Ok(inumber) => inumber,
                Err(Error::NotFound) if mode.is_writer() => inner.create(name, cache)?,
                Err(err) => return Err(err),
            };

            let inode = inner.load(inumber, cache);
            if Self::acquire(&inode, inumber, mode, cache) {
                let entry = Arc::new(FileTableEntry::new(inumber, mode, inode));
                inner.entries.push(entry.clone());
                debug!("open {name:?} (inode {inumber}) with {mode:?}");
                return Ok(entry);
            }

            debug!("open {name:?} with {mode:?}: inode {inumber} busy, waiting");
            inner = self
                .released
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// 引用计数减一；归零时表项出表，inode 没人用了就回到 Unused 并唤醒所有等待者
    pub fn close(&self, entry: &FileTableEntry, cache: &Cache) -> Result<()> {
        let mut inner = self.lock();

        // 引用计数只在表锁下改动
        match entry.ref_count() {
            0 => return Err(Error::InvalidArgument),
            1 => entry.ref_count.store(0, Ordering::Release),
            _ => {
                entry.ref_count.fetch_sub(1, Ordering::AcqRel);
                return Ok(());
            }
        }
        inner
            .entries
            .retain(|opened| !ptr::eq(Arc::as_ptr(opened), entry));

        let released = {
            let mut inode = entry.inode.lock();
            inode.open_count = inode.open_count.saturating_sub(1);
            if inode.open_count == 0 {
                inode.state = InodeState::Unused;
            }
            inode.save(entry.inumber, cache);
            inode.open_count == 0
        };

        debug!("close inode {} (released: {released})", entry.inumber);
        if released {
            inner.inodes.remove(&entry.inumber);
            self.released.notify_all();
        }

        Ok(())
    }

    /// 复制句柄：同一表项，引用计数加一
    pub fn dup(&self, entry: &FileHandle) -> Result<FileHandle> {
        let _inner = self.lock();
        if !entry.is_open() {
            return Err(Error::InvalidArgument);
        }
        entry.ref_count.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::clone(entry))
    }

    /// 表中没有打开的文件
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// 删除文件并归还它的块。文件仍被打开时拒绝删除
    pub fn delete(&self, name: &str, cache: &Cache, super_block: &spin::Mutex<SuperBlock>) -> Result<()> {
        let mut inner = self.lock();

        let inumber = inner.directory.lookup(name)?;
        if inumber == 0 {
            return Err(Error::InvalidArgument);
        }
        if inner.inodes.contains_key(&inumber) {
            return Err(Error::Busy);
        }

        let mut inode = Inode::load(inumber, cache);
        let blocks = inode.clear(cache);
        {
            let mut super_block = super_block.lock();
            for &block_id in &blocks {
                super_block.return_block(block_id, cache)?;
            }
        }
        inode.reset();
        inode.save(inumber, cache);

        inner.directory.free(inumber)?;
        inner.directory_dirty = true;
        debug!("delete {name:?} (inode {inumber}), {} blocks freed", blocks.len());
        Ok(())
    }

    /// 重新格式化；有文件打开时返回 [`Error::Busy`]
    pub fn format(
        &self,
        inode_count: u32,
        cache: &Cache,
        super_block: &spin::Mutex<SuperBlock>,
    ) -> Result<()> {
        let mut inner = self.lock();
        if !inner.entries.is_empty() {
            return Err(Error::Busy);
        }

        let inode_count = {
            let mut super_block = super_block.lock();
            super_block.format(inode_count, cache)?;
            super_block.inode_count()
        };

        inner.directory = Directory::new(Directory::capacity_for(inode_count));
        inner.inode_count = inode_count;
        inner.directory_dirty = false;
        inner.inodes.clear();
        Ok(())
    }

    /// 目录有改动时，把它写成 0 号 inode 的内容。
    ///
    /// `/` 正被读者打开时返回 [`Error::Busy`]，改动留到下次落盘，
    /// 读者因此不会读到新旧混杂的目录。
    pub fn sync_directory(&self, cache: &Cache, super_block: &spin::Mutex<SuperBlock>) -> Result<()> {
        let mut inner = self.lock();
        if !inner.directory_dirty {
            return Ok(());
        }
        if inner.inodes.contains_key(&0) {
            return Err(Error::Busy);
        }

        let data = inner.directory.to_bytes();
        let mut root = Inode::load(0, cache);
        let written = root.write_at(0, &data, cache, super_block);
        root.save(0, cache);
        written?;

        inner.directory_dirty = false;
        debug!("directory synced: {} bytes", data.len());
        Ok(())
    }

    /// 目录中的所有文件
    pub fn entries(&self) -> Vec<(u32, String)> {
        self.lock()
            .directory
            .entries()
            .map(|(inumber, name)| (inumber, name.to_owned()))
            .collect()
    }
}

impl FileTable {
    #[inline]
    fn lock(&self) -> MutexGuard<'_, TableInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 按模式尝试占用 inode，成功则计数加一并落盘
    fn acquire(inode: &spin::Mutex<Inode>, inumber: u32, mode: OpenMode, cache: &Cache) -> bool {
        let mut inode = inode.lock();
        inode.state = match (inode.state, mode.is_writer()) {
            (InodeState::Unused | InodeState::Reading, false) => InodeState::Reading,
            (InodeState::Unused, true) => InodeState::Writing,
            _ => return false,
        };
        inode.open_count += 1;
        inode.save(inumber, cache);
        true
    }
}

impl TableInner {
    fn create(&mut self, name: &str, cache: &Cache) -> Result<u32> {
        let covers_all_inodes = self.directory.capacity() >= self.inode_count as usize;
        let inumber = self.directory.allocate(name).map_err(|err| match err {
            Error::DirectoryFull if covers_all_inodes => Error::InodeTableFull,
            err => err,
        })?;

        Inode::default().save(inumber, cache);
        self.directory_dirty = true;
        debug!("create {name:?} as inode {inumber}");
        Ok(inumber)
    }

    fn load(&mut self, inumber: u32, cache: &Cache) -> Arc<spin::Mutex<Inode>> {
        self.inodes
            .entry(inumber)
            .or_insert_with(|| {
                // 表里没有就说明没人打开，磁盘上残留的状态作废
                let mut inode = Inode::load(inumber, cache);
                inode.open_count = 0;
                inode.state = InodeState::Unused;
                Arc::new(spin::Mutex::new(inode))
            })
            .clone()
    }
}
