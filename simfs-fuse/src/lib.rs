#[cfg(test)]
mod tests;

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use block_dev::{BlockDevice, BLOCK_SIZE};
use simfs::FileSystem;

/// 以宿主机上的文件作为块设备
#[derive(Debug)]
pub struct BlockFile {
    file: Mutex<File>,
    block_count: usize,
}

impl BlockFile {
    /// 块数由文件长度决定，不足一块的尾巴不计
    pub fn new(file: File) -> io::Result<Self> {
        let block_count = (file.metadata()?.len() / BLOCK_SIZE as u64) as usize;
        Ok(Self {
            file: Mutex::new(file),
            block_count,
        })
    }

    /// 新建(或清空)一个 `block_count` 块的镜像文件
    pub fn create(path: impl AsRef<Path>, block_count: u32) -> io::Result<Self> {
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        fd.set_len(block_count as u64 * BLOCK_SIZE as u64)?;
        Self::new(fd)
    }

    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let fd = OpenOptions::new().read(true).write(true).open(path)?;
        Self::new(fd)
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .expect("seeking error");
        let len = buf.len().min(BLOCK_SIZE);
        file.read_exact(&mut buf[..len])
            .expect("not a complete block!");
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .expect("seeking error");
        let len = buf.len().min(BLOCK_SIZE);
        file.write_all(&buf[..len])
            .expect("not a complete block!");
    }

    #[inline]
    fn block_count(&self) -> usize {
        self.block_count
    }
}

/// 挂载镜像文件
pub fn mount(block_file: BlockFile, cache_blocks: usize) -> io::Result<FileSystem> {
    Ok(FileSystem::mount(Arc::new(block_file), cache_blocks)?)
}

/// 把宿主机上的数据整个写进镜像中的 `name`，原有内容被替换
pub fn put(fs: &FileSystem, name: &str, data: &[u8]) -> io::Result<()> {
    let file = fs.open(name, "w")?;
    let written = fs.write(&file, data);
    fs.close(&file)?;
    written?;
    Ok(())
}

/// 读出镜像中 `name` 的全部内容
pub fn get(fs: &FileSystem, name: &str) -> io::Result<Vec<u8>> {
    let file = fs.open(name, "r")?;
    let read = fs.fsize(&file).and_then(|size| {
        let mut data = vec![0; size];
        let len = fs.read(&file, &mut data)?;
        data.truncate(len);
        Ok(data)
    });
    fs.close(&file)?;
    Ok(read?)
}
