//! NVM/HAL adapter contracts. These are the traits an integrator implements
//! for their transport, NVM store and flash hardware; the core only calls
//! through them, never owns or allocates the underlying resources.

/// Address type for flash/NVM addressing. Matches the reference's
/// `voyager_bootloader_addr_size_t` (a `uintptr_t`).
pub type Addr = usize;

/// The six persisted NVM keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NvmKey {
    AppCrc,
    AppStartAddress,
    AppEndAddress,
    AppSize,
    AppResetVectorAddress,
    VerifyFlashBeforeJumping,
}

/// Tagged NVM payload. One `read`/`write` pair covers all six keys type
/// safely instead of requiring a separate method per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NvmValue {
    Crc(u32),
    Addr(Addr),
    Size(u32),
    Flag(bool),
}

impl NvmValue {
    pub fn as_crc(self) -> Option<u32> {
        match self {
            NvmValue::Crc(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_addr(self) -> Option<Addr> {
        match self {
            NvmValue::Addr(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_size(self) -> Option<u32> {
        match self {
            NvmValue::Size(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_flag(self) -> Option<bool> {
        match self {
            NvmValue::Flag(v) => Some(v),
            _ => None,
        }
    }
}

/// Delivers opaque byte frames to the DFU host.
pub trait Transport {
    type Error;

    /// Sends exactly `data` to the host. The core always calls this with an
    /// 8-byte ACK frame.
    fn send_to_host(&mut self, data: &[u8]) -> Result<(), Self::Error>;
}

/// Keyed access to the integrator's non-volatile store.
pub trait NvmStore {
    type Error;

    fn nvm_read(&mut self, key: NvmKey) -> Result<NvmValue, Self::Error>;
    fn nvm_write(&mut self, key: NvmKey, value: NvmValue) -> Result<(), Self::Error>;
}

/// Flash hardware primitives.
pub trait FlashHal {
    type Error;

    /// Erases flash from `start` to `end`, inclusive of the partition the
    /// addresses describe. Called once on DFU entry and on any mid-session
    /// re-`START`.
    fn flash_erase(&mut self, start: Addr, end: Addr) -> Result<(), Self::Error>;

    /// Writes `data` starting at `addr`. The core only ever calls this with
    /// monotonically increasing, non-overlapping `addr` ranges within one
    /// DFU session.
    fn flash_write(&mut self, addr: Addr, data: &[u8]) -> Result<(), Self::Error>;

    /// Reads `out.len()` bytes starting at `addr`, used only by
    /// `verify_flash` ahead of a jump.
    fn flash_read(&mut self, addr: Addr, out: &mut [u8]) -> Result<(), Self::Error>;

    /// Transfers control to the application reset vector. Returns only if
    /// the jump itself could not be attempted (e.g. the vector could not be
    /// armed); on success control leaves this function and never returns,
    /// hence the `Infallible` ok type. This is the one inherently unsafe
    /// boundary the core exposes, since the type system cannot validate that
    /// `reset_vector` is a legal entry point.
    ///
    /// # Safety
    /// The caller-supplied `reset_vector` must point at a valid application
    /// entry point prepared by a prior successful DFU session or by the
    /// integrator's factory image; an invalid address is undefined
    /// behavior once control transfers.
    unsafe fn jump_to_app(&mut self, reset_vector: Addr) -> Result<core::convert::Infallible, Self::Error>;
}
