//! Tar header blocks.
//!
//! Headers use the GNU layout. Names that do not fit the 100-byte name field
//! are carried by a preceding `././@LongLink` entry, which GNU tar, bsdtar
//! and the `tar` crate all understand.

use std::io;

use tar::{EntryType, Header};

/// Tar block size.
pub const BLOCK_SIZE: usize = 512;

/// End-of-archive marker: two zero blocks.
pub const TRAILER: [u8; 2 * BLOCK_SIZE] = [0; 2 * BLOCK_SIZE];

const NAME_FIELD_LEN: usize = 100;
const LONG_LINK_NAME: &[u8] = b"././@LongLink";

/// Header blocks for a regular file.
pub(crate) fn file_header(name: &str, size: u64, mode: u32, mtime: u64) -> io::Result<Vec<u8>> {
    build(name, EntryType::Regular, size, mode, mtime)
}

/// Header blocks for a directory. The name gets a trailing slash.
pub(crate) fn directory_header(name: &str, mode: u32, mtime: u64) -> io::Result<Vec<u8>> {
    let name = format!("{}/", name.trim_end_matches('/'));
    build(&name, EntryType::Directory, 0, mode, mtime)
}

/// Number of zero bytes needed to align `len` to a block boundary.
pub(crate) fn padding(len: u64) -> usize {
    let block = BLOCK_SIZE as u64;
    // Remainder is always below 512.
    #[allow(clippy::cast_possible_truncation)]
    let pad = ((block - len % block) % block) as usize;
    pad
}

fn build(name: &str, kind: EntryType, size: u64, mode: u32, mtime: u64) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(BLOCK_SIZE);
    let mut header = Header::new_gnu();

    if name.len() > NAME_FIELD_LEN {
        out.extend_from_slice(&long_name_blocks(name));
        header.as_old_mut().name.copy_from_slice(&name.as_bytes()[..NAME_FIELD_LEN]);
    } else if kind == EntryType::Directory {
        // set_path drops trailing slashes; write the field directly.
        let field = &mut header.as_old_mut().name;
        field[..name.len()].copy_from_slice(name.as_bytes());
    } else {
        header.set_path(name)?;
    }

    header.set_entry_type(kind);
    header.set_size(size);
    header.set_mode(mode);
    header.set_mtime(mtime);
    header.set_uid(0);
    header.set_gid(0);
    header.set_cksum();
    out.extend_from_slice(header.as_bytes());
    Ok(out)
}

fn long_name_blocks(name: &str) -> Vec<u8> {
    let mut header = Header::new_gnu();
    header.as_old_mut().name[..LONG_LINK_NAME.len()].copy_from_slice(LONG_LINK_NAME);
    header.set_entry_type(EntryType::GNULongName);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    // NUL terminator included.
    let data_len = name.len() as u64 + 1;
    header.set_size(data_len);
    header.set_cksum();

    let mut out = Vec::with_capacity(BLOCK_SIZE * 2 + name.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    out.resize(out.len() + padding(data_len), 0);
    out
}
