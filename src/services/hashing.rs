//! Hash Verifier: content digest and size check.
//!
//! The digest is stored on the record and served as the download ETag; it is
//! never used as a key.

use md5::Context;
use std::{io, path::Path};
use tokio::{fs::File, io::AsyncReadExt};

const READ_CHUNK: usize = 64 * 1024;

/// Lowercase hex MD5 of `bytes`.
pub fn digest(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Streamed digest of a file, returned together with the number of bytes read.
pub async fn digest_file(path: &Path) -> io::Result<(String, u64)> {
    let mut file = File::open(path).await?;
    let mut context = Context::new();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut total: u64 = 0;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
        total += n as u64;
    }
    Ok((format!("{:x}", context.compute()), total))
}

/// A record without a declared size never verifies.
pub fn size_matches(actual: u64, declared: Option<i64>) -> bool {
    match declared {
        Some(declared) => u64::try_from(declared).is_ok_and(|d| d == actual),
        None => false,
    }
}
