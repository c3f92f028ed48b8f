use derive_more::Display;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[display(fmt = "no such file")]
    NotFound,
    #[display(fmt = "directory is full")]
    DirectoryFull,
    #[display(fmt = "inode table is full")]
    InodeTableFull,
    #[display(fmt = "no free block left on disk")]
    DiskFull,
    #[display(fmt = "invalid argument")]
    InvalidArgument,
    #[display(fmt = "resource busy")]
    Busy,
    #[display(fmt = "file too large")]
    FileTooLarge,
}

impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind;

        let kind = match err {
            Error::NotFound => ErrorKind::NotFound,
            Error::InvalidArgument => ErrorKind::InvalidInput,
            _ => ErrorKind::Other,
        };
        Self::new(kind, err)
    }
}
