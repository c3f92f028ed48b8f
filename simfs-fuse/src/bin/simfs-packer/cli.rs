use std::path::PathBuf;

use clap::{Parser, Subcommand};
use simfs::{DEFAULT_CACHE_BLOCKS, DEFAULT_INODES};

#[derive(Parser)]
#[command(version, about = "Build and inspect simfs disk images")]
pub struct Cli {
    /// Disk image
    #[arg(long, short, default_value = "fs.img")]
    pub image: PathBuf,

    /// Number of block cache slots
    #[arg(long, default_value_t = DEFAULT_CACHE_BLOCKS)]
    pub cache_blocks: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a fresh image, destroying any existing one
    Format {
        /// Disk size in blocks
        #[arg(long, short, default_value_t = 1000)]
        blocks: u32,

        /// Number of inodes, rounded down to a multiple of 16
        #[arg(long, short, default_value_t = DEFAULT_INODES)]
        inodes: u32,
    },

    /// Copy host files into the image, named after their file names
    Put {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Copy a file out of the image
    Get {
        name: String,

        /// Destination on the host, stdout if omitted
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// List the files in the image
    Ls,

    /// Delete files from the image
    Rm {
        #[arg(required = true)]
        names: Vec<String>,
    },
}
