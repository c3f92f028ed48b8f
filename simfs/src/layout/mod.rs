//! # 磁盘数据结构层
//!
//! simfs 的磁盘布局：
//! 超级块 | inode 区域 | 数据块区域(含空闲链表)
//!
//! 根目录没有专门的区域，它是 0 号 inode 的文件内容。
//! 磁盘上的整数一律按大端序存放。

mod super_block;
pub use super_block::SuperBlock;

mod inode;
pub use inode::{Inode, InodeState};

mod dir;
pub use dir::Directory;

use crate::NIL;

#[inline]
fn get_i32(raw: &[u8], offset: usize) -> i32 {
    let mut bytes = [0; 4];
    bytes.copy_from_slice(&raw[offset..offset + 4]);
    i32::from_be_bytes(bytes)
}

#[inline]
fn put_i32(raw: &mut [u8], offset: usize, value: i32) {
    raw[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

#[inline]
fn get_i16(raw: &[u8], offset: usize) -> i16 {
    let mut bytes = [0; 2];
    bytes.copy_from_slice(&raw[offset..offset + 2]);
    i16::from_be_bytes(bytes)
}

#[inline]
fn put_i16(raw: &mut [u8], offset: usize, value: i16) {
    raw[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

/// 磁盘上的块号，负数表示空
#[inline]
fn block_ptr(raw: i32) -> Option<u32> {
    (raw >= 0).then_some(raw as u32)
}

#[inline]
fn raw_ptr(ptr: Option<u32>) -> i16 {
    ptr.map_or(NIL, |block_id| block_id as i16)
}
