//! Session state and the single-slot inbound packet handoff between a
//! possibly-interrupt-context producer and the main-loop consumer.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::dfu::DfuError;

/// Bootloader state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    NotInitialized,
    Idle,
    DfuReceive,
    JumpToApp,
}

/// Latched external request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Request {
    KeepIdle,
    EnterDfu,
    JumpToApp,
}

/// The fields shared between the producer (`process_received_packet`,
/// possibly called from an interrupt context) and the consumer (`run`).
/// Bundled behind a [`critical_section::Mutex`] so both contexts observe
/// `pending_data` and the buffer atomically — the same mechanism
/// `cortex-m`/`embassy-stm32`/`w25` targets reach for on ISR/main-loop
/// handoffs, rather than a bespoke atomic scheme.
pub(crate) struct InboundSlot<const CAP: usize> {
    pub message_buffer: [u8; CAP],
    pub packet_size: usize,
    pub pending_data: bool,
    pub packet_overrun: bool,
}

impl<const CAP: usize> InboundSlot<CAP> {
    const fn new() -> Self {
        Self {
            message_buffer: [0; CAP],
            packet_size: 0,
            pending_data: false,
            packet_overrun: false,
        }
    }
}

/// Full session data, reset on every `init`.
pub(crate) struct Session<const CAP: usize> {
    pub state: State,
    pub request: Request,
    pub app_failed_crc_check: bool,
    pub valid_dfu_start_request_received: bool,
    pub slot: Mutex<RefCell<InboundSlot<CAP>>>,
    pub app_size_cached: u32,
    pub dfu_error: Option<DfuError>,
    pub ack_message_buffer: [u8; 8],
    pub dfu_sequence_number: u8,
    pub bytes_written: u32,
}

impl<const CAP: usize> Session<CAP> {
    pub const fn new() -> Self {
        Self {
            state: State::NotInitialized,
            request: Request::KeepIdle,
            app_failed_crc_check: false,
            valid_dfu_start_request_received: false,
            slot: Mutex::new(RefCell::new(InboundSlot::new())),
            app_size_cached: 0,
            dfu_error: None,
            ack_message_buffer: [0; 8],
            dfu_sequence_number: 0,
            bytes_written: 0,
        }
    }
}
