use core::fmt;

/// Frames longer than this are cut short when logged.
const PREVIEW_LEN: usize = 32;

/// Lowercase hex rendering of a byte buffer for log lines. Long buffers are
/// truncated and suffixed with the total length.
pub struct HexPreview<'a>(&'a [u8]);

impl fmt::Display for HexPreview<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter().take(PREVIEW_LEN) {
            write!(f, "{:02x}", byte)?;
        }
        if self.0.len() > PREVIEW_LEN {
            write!(f, "..({} bytes)", self.0.len())?;
        }
        Ok(())
    }
}

impl fmt::Debug for HexPreview<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

pub trait HexDisplayExt {
    fn hex(&self) -> HexPreview<'_>;
}

impl<T> HexDisplayExt for T
where
    T: ?Sized + AsRef<[u8]>,
{
    fn hex(&self) -> HexPreview<'_> {
        HexPreview(self.as_ref())
    }
}
