use std::path::PathBuf;
use std::{env, fs, process};

use simfs::{BlockDevice, Error, BLOCK_SIZE, DEFAULT_CACHE_BLOCKS};

use crate::{get, mount, put, BlockFile};

struct TempImage(PathBuf);

impl TempImage {
    fn new(tag: &str) -> Self {
        Self(env::temp_dir().join(format!("simfs-{tag}-{}.img", process::id())))
    }
}

impl Drop for TempImage {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

#[test]
fn block_file_io() {
    let image = TempImage::new("block-io");
    let block_file = BlockFile::create(&image.0, 8).unwrap();
    assert_eq!(block_file.block_count(), 8);

    block_file.write_block(3, &[0xab; BLOCK_SIZE]);
    let mut buf = [0; BLOCK_SIZE];
    block_file.read_block(3, &mut buf);
    assert_eq!(buf, [0xab; BLOCK_SIZE]);
    block_file.read_block(7, &mut buf);
    assert_eq!(buf, [0; BLOCK_SIZE]);

    assert_eq!(fs::metadata(&image.0).unwrap().len(), 8 * BLOCK_SIZE as u64);
}

#[test]
fn image_keeps_files() {
    let image = TempImage::new("keeps-files");
    let data: Vec<u8> = (0..7000u32).map(|i| (i % 253) as u8).collect();

    {
        let sfs = mount(BlockFile::create(&image.0, 500).unwrap(), DEFAULT_CACHE_BLOCKS).unwrap();
        sfs.format(32).unwrap();
        put(&sfs, "data.bin", &data).unwrap();
        put(&sfs, "note", b"first").unwrap();
        put(&sfs, "note", b"second").unwrap();
        sfs.unmount().unwrap();
    }

    let sfs = mount(BlockFile::open(&image.0).unwrap(), DEFAULT_CACHE_BLOCKS).unwrap();
    assert_eq!(sfs.inode_count(), 32);
    assert_eq!(get(&sfs, "data.bin").unwrap(), data);
    assert_eq!(get(&sfs, "note").unwrap(), b"second");

    let names: Vec<_> = sfs.list().into_iter().map(|(_, name)| name).collect();
    assert_eq!(names, ["data.bin", "note"]);

    let err = get(&sfs, "missing").unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    assert_eq!(
        err.get_ref().and_then(|inner| inner.downcast_ref::<Error>()),
        Some(&Error::NotFound)
    );
}
