//! 根目录：扁平的“文件名 → inumber”表，第 i 个槽位对应 i 号 inode。
//!
//! 序列化格式为 N 个 4 字节的名字长度(字符数)，随后是 N 个名字槽，
//! 每槽 30 个 UTF-16 字符、共 60 字节，整体作为 0 号 inode 的文件内容存放。
//! 0 号槽位固定为 `/`，永不释放。

use log::warn;

use super::{get_i16, get_i32, put_i16, put_i32};
use crate::{Error, Result};
use crate::{MAX_FILE_SIZE, NAME_MAX_LEN};

const ROOT: &str = "/";

/// 一个名字槽的字节数
const SLOT_SIZE: usize = NAME_MAX_LEN * 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    /// 空串表示空闲槽位
    names: Vec<String>,
}

impl Directory {
    /// 一个目录项在磁盘上占据的字节数
    pub const ENTRY_SIZE: usize = 4 + SLOT_SIZE;

    pub fn new(capacity: usize) -> Self {
        let mut names = vec![String::new(); capacity.max(1)];
        names[0] = ROOT.to_owned();
        Self { names }
    }

    /// 目录能容纳的项数：既受 inode 数限制，也受单个文件大小限制
    #[inline]
    pub fn capacity_for(inode_count: u32) -> usize {
        (inode_count as usize).min(MAX_FILE_SIZE / Self::ENTRY_SIZE)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.names.len()
    }

    /// 为文件分配第一个空闲槽位，返回其 inumber
    pub fn allocate(&mut self, name: &str) -> Result<u32> {
        Self::check_name(name)?;
        if self.lookup(name).is_ok() {
            return Err(Error::InvalidArgument);
        }

        let (inumber, slot) = self
            .names
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_empty())
            .ok_or(Error::DirectoryFull)?;
        name.clone_into(slot);

        Ok(inumber as u32)
    }

    pub fn free(&mut self, inumber: u32) -> Result<()> {
        match self.names.get_mut(inumber as usize) {
            Some(_) if inumber == 0 => Err(Error::InvalidArgument),
            Some(slot) if !slot.is_empty() => {
                slot.clear();
                Ok(())
            }
            Some(_) => Err(Error::NotFound),
            None => Err(Error::InvalidArgument),
        }
    }

    pub fn lookup(&self, name: &str) -> Result<u32> {
        if name.is_empty() {
            return Err(Error::NotFound);
        }
        self.names
            .iter()
            .position(|slot| slot == name)
            .map(|inumber| inumber as u32)
            .ok_or(Error::NotFound)
    }

    /// 所有普通文件，不含 `/`
    pub fn entries(&self) -> impl Iterator<Item = (u32, &str)> {
        self.names
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, name)| !name.is_empty())
            .map(|(inumber, name)| (inumber as u32, name.as_str()))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let capacity = self.capacity();
        let names_start = capacity * 4;
        let mut data = vec![0; capacity * Self::ENTRY_SIZE];

        for (inumber, name) in self.names.iter().enumerate() {
            let slot = names_start + inumber * SLOT_SIZE;
            let mut len = 0;
            for unit in name.encode_utf16().take(NAME_MAX_LEN) {
                put_i16(&mut data, slot + len * 2, unit as i16);
                len += 1;
            }
            put_i32(&mut data, inumber * 4, len as i32);
        }

        data
    }

    /// 解析 `to_bytes` 的结果；缺失或损坏的槽位视为空闲
    pub fn from_bytes(capacity: usize, data: &[u8]) -> Self {
        let mut dir = Self::new(capacity);
        let names_start = dir.capacity() * 4;

        for inumber in 1..dir.capacity() {
            let slot = names_start + inumber * SLOT_SIZE;
            if slot + SLOT_SIZE > data.len() {
                break;
            }
            let len = get_i32(data, inumber * 4);
            if len == 0 {
                continue;
            }

            let name = usize::try_from(len)
                .ok()
                .filter(|&len| len <= NAME_MAX_LEN)
                .and_then(|len| {
                    let units: Vec<u16> = (0..len)
                        .map(|index| get_i16(data, slot + index * 2) as u16)
                        .collect();
                    String::from_utf16(&units).ok()
                })
                .filter(|name| Self::check_name(name).is_ok());
            match name {
                Some(name) => dir.names[inumber] = name,
                None => warn!("directory slot {inumber} is corrupt, treated as free"),
            }
        }

        dir
    }

    fn check_name(name: &str) -> Result<()> {
        if name.is_empty()
            || name.encode_utf16().count() > NAME_MAX_LEN
            || name.contains('\0')
            || name == ROOT
        {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}
