mod cli;

use std::fs;
use std::io::{self, Write};

use clap::Parser;
use cli::{Cli, Command};
use simfs_fuse::BlockFile;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let block_file = match cli.command {
        Command::Format { blocks, .. } => BlockFile::create(&cli.image, blocks)?,
        _ => BlockFile::open(&cli.image)?,
    };
    let sfs = simfs_fuse::mount(block_file, cli.cache_blocks)?;

    match cli.command {
        Command::Format { blocks, inodes } => {
            sfs.format(inodes)?;
            println!(
                "image={:?} blocks={blocks} inodes={} free={}",
                cli.image,
                sfs.inode_count(),
                sfs.free_blocks()
            );
        }
        Command::Put { files } => {
            for path in files {
                let name = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "bad file name"))?
                    .to_owned();
                let data = fs::read(&path)?;
                simfs_fuse::put(&sfs, &name, &data)?;
                log::info!("put {path:?} as {name:?}, {} bytes", data.len());
            }
        }
        Command::Get { name, output } => {
            let data = simfs_fuse::get(&sfs, &name)?;
            match output {
                Some(path) => fs::write(path, &data)?,
                None => io::stdout().write_all(&data)?,
            }
        }
        Command::Ls => {
            for (inumber, name) in sfs.list() {
                let file = sfs.open(&name, "r")?;
                let size = sfs.fsize(&file);
                sfs.close(&file)?;
                println!("{inumber:>5} {:>8} {name}", size?);
            }
            println!("free blocks: {}", sfs.free_blocks());
        }
        Command::Rm { names } => {
            for name in names {
                sfs.delete(&name)?;
                log::info!("removed {name:?}");
            }
        }
    }

    sfs.unmount()?;
    Ok(())
}
