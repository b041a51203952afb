//! DFU engine: START validation, sequence tracking, flash erase, incremental
//! write, per-packet acknowledgement, and post-session flash verification.

use crate::codec;
use crate::config::Config;
use crate::crc;
use crate::diag::warn;
use crate::error::Error;
use crate::hal::{Addr, FlashHal, NvmKey, NvmStore};
use crate::session::Session;

/// DFU protocol fault codes, carried on the wire in an ACK's error byte.
/// `None` (wire value `0`) is represented by `Option::None` at the Rust
/// level rather than as a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DfuError {
    PacketOverrun = 1,
    EnterDfuNotRequested = 2,
    OutOfSequence = 3,
    InvalidMessageId = 4,
    SizeTooLarge = 5,
    InternalError = 6,
}

impl DfuError {
    pub const fn wire_code(self) -> u8 {
        self as u8
    }
}

/// The result of a DFU engine operation: a wire-level fault (or none) plus
/// optional ACK metadata. Distinct from [`Error`], which represents a HAL
/// contract violation and stops the current tick.
pub(crate) struct Ack {
    pub error: Option<DfuError>,
    pub metadata: Option<[u8; 4]>,
}

impl Ack {
    pub fn ok(metadata: Option<[u8; 4]>) -> Self {
        Self {
            error: None,
            metadata,
        }
    }

    pub fn err(error: DfuError) -> Self {
        Self {
            error: Some(error),
            metadata: None,
        }
    }

    pub fn wire_error_code(&self) -> u8 {
        self.error.map(DfuError::wire_code).unwrap_or(0)
    }
}

fn read_addr<Hal, E>(hal: &mut Hal, key: NvmKey) -> Result<Addr, Error<E>>
where
    Hal: NvmStore<Error = E>,
{
    hal.nvm_read(key)
        .map_err(Error::HalFailure)?
        .as_addr()
        .ok_or(Error::Generic)
}

/// Resets the per-session counters and erases the configured partition.
/// Runs on `Idle -> DfuReceive` entry and on a mid-session re-`START`.
pub(crate) fn enter<Hal, E, const CAP: usize>(
    hal: &mut Hal,
    session: &mut Session<CAP>,
) -> Result<(), Error<E>>
where
    Hal: NvmStore<Error = E> + FlashHal<Error = E>,
{
    session.dfu_sequence_number = 0;
    session.bytes_written = 0;

    let start = read_addr(hal, NvmKey::AppStartAddress)?;
    let end = read_addr(hal, NvmKey::AppEndAddress)?;
    hal.flash_erase(start, end).map_err(Error::HalFailure)?;
    Ok(())
}

/// Processes a START frame: validates the declared size against the
/// partition, persists `AppSize`/`AppCrc`, and returns the ACK to send. Does
/// not erase; the caller re-runs [`enter`] afterward when appropriate, after
/// the NVM writes above have landed, so a host observing the ACK sees the
/// new size/CRC committed even if the following re-erase then fails.
pub(crate) fn process_start_packet<Hal, E, const CAP: usize>(
    hal: &mut Hal,
    session: &mut Session<CAP>,
    cfg: &Config<'_>,
    app_size: u32,
    app_crc: u32,
    start_payload: &[u8],
) -> Result<Ack, Error<E>>
where
    Hal: NvmStore<Error = E>,
{
    let partition_start = read_addr(hal, NvmKey::AppStartAddress)?;
    let partition_end = read_addr(hal, NvmKey::AppEndAddress)?;
    let partition_size = partition_end.saturating_sub(partition_start) as u32;

    if app_size > partition_size {
        warn!(
            "declared app_size {} exceeds partition size {}",
            app_size, partition_size
        );
        return Ok(Ack::err(DfuError::SizeTooLarge));
    }

    hal.nvm_write(NvmKey::AppSize, crate::hal::NvmValue::Size(app_size))
        .map_err(Error::HalFailure)?;
    session.app_size_cached = app_size;
    hal.nvm_write(NvmKey::AppCrc, crate::hal::NvmValue::Crc(app_crc))
        .map_err(Error::HalFailure)?;

    let crc = crc::compute_with(cfg.custom_crc_stream, start_payload);
    let mut metadata = [0u8; 4];
    codec::pack_crc_into(&mut metadata, crc);
    Ok(Ack::ok(Some(metadata)))
}

/// Processes a DATA frame. On a matching sequence number, writes the
/// payload to flash and advances the session counters; on mismatch, latches
/// `dfu_error = OutOfSequence` so the state machine returns to `Idle` on the
/// next tick.
pub(crate) fn process_data_packet<Hal, E, const CAP: usize>(
    hal: &mut Hal,
    session: &mut Session<CAP>,
    cfg: &Config<'_>,
    sequence_number: u8,
    payload: &[u8],
    seq_and_payload: &[u8],
) -> Result<Ack, Error<E>>
where
    Hal: NvmStore<Error = E> + FlashHal<Error = E>,
{
    if sequence_number != session.dfu_sequence_number {
        warn!(
            "out-of-sequence DATA packet: expected {}, got {}",
            session.dfu_sequence_number, sequence_number
        );
        session.dfu_error = Some(DfuError::OutOfSequence);
        return Ok(Ack::err(DfuError::OutOfSequence));
    }

    let start = read_addr(hal, NvmKey::AppStartAddress)?;
    hal.flash_write(start + session.bytes_written as usize, payload)
        .map_err(Error::HalFailure)?;

    session.dfu_sequence_number = session.dfu_sequence_number.wrapping_add(1);
    session.bytes_written += payload.len() as u32;

    let crc = crc::compute_with(cfg.custom_crc_stream, seq_and_payload);
    let mut metadata = [0u8; 4];
    codec::pack_crc_into(&mut metadata, crc);
    Ok(Ack::ok(Some(metadata)))
}

/// Chunk size used to stream the flashed image through [`verify_flash`]
/// without allocating a buffer the size of the whole image.
pub const VERIFY_CHUNK_SIZE: usize = 64;

/// Recomputes the CRC over the flashed application range and compares it to
/// the stored `AppCrc`. Invoked from `JumpToApp` when
/// `VerifyFlashBeforeJumping` is set.
pub(crate) fn verify_flash<Hal, E>(hal: &mut Hal, cfg: &Config<'_>) -> Result<bool, Error<E>>
where
    Hal: NvmStore<Error = E> + FlashHal<Error = E>,
{
    let app_crc = hal
        .nvm_read(NvmKey::AppCrc)
        .map_err(Error::HalFailure)?
        .as_crc()
        .ok_or(Error::Generic)?;
    let start = read_addr(hal, NvmKey::AppStartAddress)?;
    let size = hal
        .nvm_read(NvmKey::AppSize)
        .map_err(Error::HalFailure)?
        .as_size()
        .ok_or(Error::Generic)?;

    let mut crc = crc::INIT;
    let mut buf = [0u8; VERIFY_CHUNK_SIZE];
    let mut remaining = size as usize;
    let mut addr = start;

    while remaining > 0 {
        let chunk = remaining.min(buf.len());
        hal.flash_read(addr, &mut buf[..chunk])
            .map_err(Error::HalFailure)?;
        for &b in &buf[..chunk] {
            crc = match cfg.custom_crc_stream {
                Some(stream) => stream.step(crc, b),
                None => crc::update(crc, b),
            };
        }
        addr += chunk;
        remaining -= chunk;
    }

    Ok(crc == app_crc)
}
