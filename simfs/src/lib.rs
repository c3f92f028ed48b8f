/* simfs 的整体架构，自上而下 */

// 文件系统层：open/read/write/seek/close/delete/format
mod fs;

// 打开文件表：文件句柄与每个 inode 的读写者状态机
mod file_table;

// 磁盘数据结构层：超级块、inode、根目录
mod layout;

// 块缓存层：二次机会置换的块缓存
mod block_cache;

mod error;

pub use self::{
    block_cache::Cache,
    error::{Error, Result},
    file_table::{Access, FileHandle, FileTable, FileTableEntry, OpenMode},
    fs::{FileSystem, Whence},
    layout::{Directory, Inode, InodeState, SuperBlock},
};
pub use block_dev::{BlockDevice, BLOCK_SIZE};

/// 磁盘上 inode 的大小
pub const INODE_SIZE: usize = 32;
/// 每个 inode 块容纳的 inode 数
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;
/// 直接索引个数
pub const DIRECT_COUNT: usize = 11;
/// 间接索引块可容纳的块号个数
pub const INDIRECT_COUNT: usize = BLOCK_SIZE / 2;
/// 单个文件的最大字节数
pub const MAX_FILE_SIZE: usize = (DIRECT_COUNT + INDIRECT_COUNT) * BLOCK_SIZE;
/// 文件名最大字节数
pub const NAME_MAX_LEN: usize = 30;
/// 磁盘未格式化时采用的 inode 数
pub const DEFAULT_INODES: u32 = 64;
/// 默认缓存块数
pub const DEFAULT_CACHE_BLOCKS: usize = 10;

type DataBlock = [u8; BLOCK_SIZE];

/// 磁盘上表示“空”的块号
const NIL: i16 = -1;
