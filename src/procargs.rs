//! Decoder for `KERN_PROCARGS2` buffers
//
// Layout of the buffer as written by the kernel:
//
//   u32 argc, little endian
//   executable path, NUL terminated
//   NUL padding
//   argc argument strings, each NUL terminated
//   KEY=VALUE environment strings, each NUL terminated
//   an empty string, followed by unspecified filler

use crate::{Error, Result};
use object::read::Bytes;
use std::collections::BTreeMap;

/// Room for the count plus an empty, terminated path.
const MIN_LEN: usize = 6;

/// Invocation path, arguments and environment of a process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcArgs {
    pub path: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl ProcArgs {
    /// Decode a buffer in which every byte was written by the kernel.
    pub fn parse(data: &[u8]) -> Result<Self> {
        decode(data, data.len())
    }
}

fn malformed(what: &'static str) -> Error {
    log::warn!("Rejecting argument buffer: {what}");
    Error::MalformedInput(what)
}

fn utf8<'a>(bytes: &'a [u8], what: &'static str) -> Result<&'a str> {
    std::str::from_utf8(bytes).map_err(|_| malformed(what))
}

/// Read the argument count, folding the bytes from the last to the first so
/// the result does not depend on the host byte order.
fn read_count(data: &mut Bytes<'_>) -> Option<u32> {
    let bytes = data.read_bytes(4).ok()?;
    Some(
        bytes
            .0
            .iter()
            .rev()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b)),
    )
}

/// Decode the first `used_len` bytes of `bytes`. Anything past `used_len` is
/// ignored.
pub fn decode(bytes: &[u8], used_len: usize) -> Result<ProcArgs> {
    let used = bytes
        .get(..used_len)
        .ok_or_else(|| malformed("used length exceeds buffer"))?;
    if used.len() < MIN_LEN {
        return Err(malformed("buffer too short"));
    }
    let mut data = Bytes(used);
    let count = read_count(&mut data).ok_or_else(|| malformed("buffer too short"))?;
    log::debug!("Decoding {used_len} byte argument buffer, argc {count}");

    let path = data
        .read_string()
        .map_err(|()| malformed("path is not NUL terminated"))?;
    let path = utf8(path, "path is not valid UTF-8")?.to_owned();

    let padding = data.0.iter().take_while(|&&b| b == 0).count();
    data.0 = &data.0[padding..];

    // The count is untrusted, don't let it drive the allocation.
    let capacity = usize::try_from(count).unwrap_or(usize::MAX).min(data.len());
    let mut args = Vec::with_capacity(capacity);
    for _ in 0..count {
        let arg = data
            .read_string()
            .map_err(|()| malformed("argument count exceeds buffer"))?;
        args.push(utf8(arg, "argument is not valid UTF-8")?.to_owned());
    }

    let mut env = BTreeMap::new();
    for entry in data.0.split(|&b| b == 0) {
        if entry.is_empty() {
            break;
        }
        let entry = utf8(entry, "environment entry is not valid UTF-8")?;
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| malformed("environment entry without '='"))?;
        env.insert(key.to_owned(), value.to_owned());
    }

    log::debug!(
        "Decoded {}: {} arguments, {} environment variables",
        path,
        args.len(),
        env.len()
    );
    Ok(ProcArgs { path, args, env })
}
