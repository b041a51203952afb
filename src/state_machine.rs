//! Bootloader state machine: the top-level orchestrator that owns
//! configuration, the latched request, the current state, and the single
//! inbound packet slot.

use core::marker::PhantomData;

use crate::codec::{self, Message};
use crate::config::Config;
use crate::diag::{error, trace, warn};
use crate::dfu::{self, Ack, DfuError};
use crate::error::Error;
use crate::hal::{FlashHal, NvmKey, NvmStore, Transport};
use crate::session::{Request, Session, State};

/// The top-level orchestrator. `CAP` is `MAX_RECEIVE_PACKET_SIZE`, a
/// compile-time bound checked in [`BootloaderStateMachine::new`] (an ACK
/// alone is 8 bytes, so `CAP` must be at least that).
pub struct BootloaderStateMachine<'cfg, Hal, E, const CAP: usize> {
    hal: Hal,
    config: Config<'cfg>,
    session: Session<CAP>,
    _error: PhantomData<E>,
}

impl<'cfg, Hal, E, const CAP: usize> BootloaderStateMachine<'cfg, Hal, E, CAP>
where
    Hal: Transport<Error = E> + NvmStore<Error = E> + FlashHal<Error = E>,
{
    /// Builds the state machine around an integrator-supplied HAL and
    /// configuration, in `NotInitialized`. Call [`Self::init`] before the
    /// first [`Self::run`].
    ///
    /// Panics if `CAP < 8`, since an ACK alone is 8 bytes and
    /// `MAX_RECEIVE_PACKET_SIZE` must be able to hold one.
    pub fn new(hal: Hal, config: Config<'cfg>) -> Self {
        assert!(CAP >= 8, "MAX_RECEIVE_PACKET_SIZE must be >= 8");
        Self {
            hal,
            config,
            session: Session::new(),
            _error: PhantomData,
        }
    }

    /// Resets the session and enters `Idle`. Safe to call again at any time
    /// to cancel an in-progress DFU session.
    pub fn init(&mut self) -> Result<(), Error<E>> {
        self.session = Session::new();
        self.session.state = State::Idle;
        Ok(())
    }

    /// Returns the current bootloader state.
    pub fn get_state(&self) -> State {
        self.session.state
    }

    /// Latches an external request, overwriting any previous one.
    pub fn request(&mut self, request: Request) {
        self.session.request = request;
    }

    /// Buffers an inbound host frame. May be called from a different
    /// context than [`Self::run`] (e.g. a link-layer interrupt); only the
    /// single-slot handoff fields are touched, under a critical section, so
    /// this takes `&self` rather than `&mut self`.
    pub fn process_received_packet(&self, data: &[u8]) -> Result<(), Error<E>> {
        if data.len() > CAP {
            return Err(Error::InvalidArgument);
        }

        critical_section::with(|cs| {
            let mut slot = self.session.slot.borrow(cs).borrow_mut();
            if slot.pending_data {
                slot.packet_overrun = true;
                // The first packet's contents are preserved; the second's
                // are discarded.
            } else {
                slot.message_buffer[..data.len()].copy_from_slice(data);
                slot.packet_size = data.len();
                slot.pending_data = true;
            }
        });

        Ok(())
    }

    /// Runs one tick: computes the desired state, transitions if needed,
    /// then runs the current state's tick action.
    pub fn run(&mut self) -> Result<(), Error<E>> {
        let desired = self.desired_state();
        if desired != self.session.state {
            trace!("bootloader state {} -> {}", self.session.state, desired);
            self.exit_state(desired);
            self.enter_state(desired)?;
            self.session.state = desired;
        }
        self.run_state()
    }

    fn desired_state(&self) -> State {
        match self.session.state {
            State::Idle => match self.session.request {
                Request::JumpToApp => State::JumpToApp,
                Request::EnterDfu if self.session.valid_dfu_start_request_received => {
                    State::DfuReceive
                }
                _ => State::Idle,
            },
            State::JumpToApp => {
                if self.session.app_failed_crc_check {
                    State::Idle
                } else {
                    State::JumpToApp
                }
            }
            State::DfuReceive => {
                if self.session.dfu_error.is_some() {
                    State::Idle
                } else if self.session.bytes_written == self.session.app_size_cached {
                    if self.config.jump_to_app_after_dfu_recv_complete {
                        State::JumpToApp
                    } else {
                        State::Idle
                    }
                } else {
                    State::DfuReceive
                }
            }
            State::NotInitialized => State::NotInitialized,
        }
    }

    fn exit_state(&mut self, desired: State) {
        match self.session.state {
            State::Idle => {
                if desired == State::JumpToApp {
                    self.session.request = Request::KeepIdle;
                }
                self.session.valid_dfu_start_request_received = false;
            }
            State::DfuReceive => {
                critical_section::with(|cs| {
                    self.session.slot.borrow(cs).borrow_mut().packet_overrun = false;
                });
            }
            State::JumpToApp | State::NotInitialized => {}
        }
    }

    fn enter_state(&mut self, desired: State) -> Result<(), Error<E>> {
        match desired {
            State::DfuReceive => dfu::enter(&mut self.hal, &mut self.session)?,
            State::Idle => self.session.app_size_cached = 0,
            State::JumpToApp | State::NotInitialized => {}
        }
        Ok(())
    }

    fn run_state(&mut self) -> Result<(), Error<E>> {
        match self.session.state {
            State::Idle => self.run_idle_tick(),
            State::DfuReceive => self.run_dfu_receive_tick(),
            State::JumpToApp => self.run_jump_to_app_tick(),
            State::NotInitialized => Err(Error::NotImplemented),
        }
    }

    /// Copies the pending slot contents out under a single critical
    /// section and reports whether a packet was waiting. Returns
    /// `(packet_overrun, size, buffer)`; the buffer copy is cheap — it is a
    /// fixed `[u8; CAP]`, not a heap allocation — and lets the rest of the
    /// tick run outside the critical section.
    fn take_pending(&self) -> Option<(bool, usize, [u8; CAP])> {
        critical_section::with(|cs| {
            let slot = self.session.slot.borrow(cs).borrow();
            if slot.pending_data {
                Some((slot.packet_overrun, slot.packet_size, slot.message_buffer))
            } else {
                None
            }
        })
    }

    fn clear_pending(&self, clear_overrun: bool) {
        critical_section::with(|cs| {
            let mut slot = self.session.slot.borrow(cs).borrow_mut();
            slot.pending_data = false;
            if clear_overrun {
                slot.packet_overrun = false;
            }
        });
    }

    fn send_ack(&mut self, ack: &Ack) -> Result<(), Error<E>> {
        let mut buf = [0u8; codec::ACK_MESSAGE_SIZE];
        codec::build_ack(ack.wire_error_code(), ack.metadata, &mut buf);
        self.session.ack_message_buffer = buf;
        self.hal.send_to_host(&buf).map_err(Error::HalFailure)
    }

    fn run_idle_tick(&mut self) -> Result<(), Error<E>> {
        self.session.dfu_error = None;

        let Some((packet_overrun, packet_size, buf)) = self.take_pending() else {
            return Ok(());
        };

        let ack = if packet_overrun {
            Ack::err(DfuError::PacketOverrun)
        } else {
            match codec::parse(&buf, packet_size) {
                Message::Start { app_size, app_crc } => {
                    if self.session.request == Request::EnterDfu {
                        let start_payload = &buf[1..8];
                        let ack = dfu::process_start_packet(
                            &mut self.hal,
                            &mut self.session,
                            &self.config,
                            app_size,
                            app_crc,
                            start_payload,
                        )?;
                        if ack.error.is_none() {
                            self.session.valid_dfu_start_request_received = true;
                        }
                        ack
                    } else {
                        Ack::err(DfuError::EnterDfuNotRequested)
                    }
                }
                Message::Data { .. } => Ack::err(DfuError::OutOfSequence),
                Message::Ack | Message::Unknown => Ack::err(DfuError::InvalidMessageId),
            }
        };

        self.send_ack(&ack)?;
        self.clear_pending(packet_overrun);
        Ok(())
    }

    fn run_dfu_receive_tick(&mut self) -> Result<(), Error<E>> {
        let Some((packet_overrun, packet_size, buf)) = self.take_pending() else {
            return Ok(());
        };

        let ack = if packet_overrun {
            self.session.dfu_error = Some(DfuError::PacketOverrun);
            Ack::err(DfuError::PacketOverrun)
        } else {
            match codec::parse(&buf, packet_size) {
                Message::Data {
                    sequence_number,
                    payload,
                } => {
                    let seq_and_payload = &buf[1..1 + 1 + payload.len()];
                    dfu::process_data_packet(
                        &mut self.hal,
                        &mut self.session,
                        &self.config,
                        sequence_number,
                        payload,
                        seq_and_payload,
                    )?
                }
                Message::Start { app_size, app_crc } => {
                    let start_payload = &buf[1..8];
                    let ack = dfu::process_start_packet(
                        &mut self.hal,
                        &mut self.session,
                        &self.config,
                        app_size,
                        app_crc,
                        start_payload,
                    )?;
                    if ack.error.is_none() {
                        // NVM writes already landed (above); re-erase now.
                        // A re-erase failure is fatal for the session but
                        // does not retract the ACK already computed.
                        if dfu::enter(&mut self.hal, &mut self.session).is_err() {
                            warn!("re-erase after mid-session START failed");
                            self.session.dfu_error = Some(DfuError::InternalError);
                        }
                    }
                    ack
                }
                Message::Ack | Message::Unknown => {
                    self.session.dfu_error = Some(DfuError::InvalidMessageId);
                    Ack::err(DfuError::InvalidMessageId)
                }
            }
        };

        self.send_ack(&ack)?;
        self.clear_pending(false);
        Ok(())
    }

    fn run_jump_to_app_tick(&mut self) -> Result<(), Error<E>> {
        let verify = self
            .hal
            .nvm_read(NvmKey::VerifyFlashBeforeJumping)
            .map_err(Error::HalFailure)?
            .as_flag()
            .ok_or(Error::Generic)?;

        if verify {
            let matches = dfu::verify_flash(&mut self.hal, &self.config)?;
            if !matches {
                warn!("flashed image failed post-write CRC verification");
                self.session.app_failed_crc_check = true;
                return Ok(());
            }
        }

        let reset_vector = self
            .hal
            .nvm_read(NvmKey::AppResetVectorAddress)
            .map_err(Error::HalFailure)?
            .as_addr()
            .ok_or(Error::Generic)?;

        // Safety: the reset vector address was programmed into NVM either
        // by a completed DFU session's `process_start_packet`/flash image,
        // or provisioned by the integrator out-of-band; the core cannot
        // validate it further.
        match unsafe { self.hal.jump_to_app(reset_vector) } {
            Ok(never) => match never {},
            Err(e) => {
                error!("jump to application failed");
                Err(Error::HalFailure(e))
            }
        }
    }
}
