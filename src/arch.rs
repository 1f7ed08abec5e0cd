use crate::result::*;

/// A checked cast from u64 to usize
///
/// We could use the `cast` crate,
/// (https://docs.rs/cast/0.2.3/cast/)
/// but these are the only ones we really need.
pub fn usize<I: Into<u64>>(i: I) -> ZipResult<usize> {
    let i: u64 = i.into();
    if cfg!(target_pointer_width = "64") {
        Ok(i as usize)
    } else if i > usize::MAX as u64 {
        Err(ZipError::Zip64Unsupported(
            "value too large for address space",
        ))
    } else {
        Ok(i as usize)
    }
}

/// A checked cast down to the 32-bit fields most ZIP records use.
pub fn u32_from(i: u64, what: &'static str) -> ZipResult<u32> {
    u32::try_from(i).map_err(|_| ZipError::Zip64Unsupported(what))
}

/// A checked cast down to the 16-bit fields (entry counts, name lengths).
pub fn u16_from(i: usize, what: &'static str) -> ZipResult<u16> {
    u16::try_from(i).map_err(|_| ZipError::Zip64Unsupported(what))
}
