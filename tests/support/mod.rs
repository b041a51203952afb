//! Fake HAL used by the integration tests: a `Vec<u8>`-backed flash region,
//! an in-memory NVM map and an outbox of sent ACK frames. Drives the state
//! machine against an in-process stand-in for the transport/NVM/flash
//! hardware so these tests run without any target.
//!
//! `FakeHal` is a thin handle around `Rc<RefCell<Inner>>`: cloning it (as
//! tests do to keep a probe after handing one clone to the state machine)
//! shares the same underlying flash/NVM/outbox state.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use voyager_bootloader::hal::{Addr, FlashHal, NvmKey, NvmStore, NvmValue, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeError {
    FlashOutOfRange,
    NvmKeyMissing,
    JumpRefused,
}

struct Inner {
    flash: Vec<u8>,
    nvm: HashMap<NvmKey, NvmValue>,
    sent: Vec<[u8; 8]>,
    erase_should_fail: bool,
}

#[derive(Clone)]
pub struct FakeHal(Rc<RefCell<Inner>>);

impl FakeHal {
    /// `flash_len` is the size of the whole addressable flash region;
    /// `[partition_start, partition_end)` is the DFU-writable partition.
    pub fn new(flash_len: usize, partition_start: Addr, partition_end: Addr) -> Self {
        let mut nvm = HashMap::new();
        nvm.insert(NvmKey::AppStartAddress, NvmValue::Addr(partition_start));
        nvm.insert(NvmKey::AppEndAddress, NvmValue::Addr(partition_end));
        nvm.insert(NvmKey::AppResetVectorAddress, NvmValue::Addr(partition_start));
        nvm.insert(NvmKey::AppSize, NvmValue::Size(0));
        nvm.insert(NvmKey::AppCrc, NvmValue::Crc(0));
        nvm.insert(NvmKey::VerifyFlashBeforeJumping, NvmValue::Flag(false));
        Self(Rc::new(RefCell::new(Inner {
            flash: vec![0xFF; flash_len],
            nvm,
            sent: Vec::new(),
            erase_should_fail: false,
        })))
    }

    pub fn set_verify_before_jump(&self, verify: bool) {
        self.0
            .borrow_mut()
            .nvm
            .insert(NvmKey::VerifyFlashBeforeJumping, NvmValue::Flag(verify));
    }

    pub fn set_erase_should_fail(&self, fail: bool) {
        self.0.borrow_mut().erase_should_fail = fail;
    }

    pub fn last_ack(&self) -> [u8; 8] {
        *self.0.borrow().sent.last().expect("no ACK sent yet")
    }

    pub fn ack_count(&self) -> usize {
        self.0.borrow().sent.len()
    }

    pub fn corrupt_byte(&self, addr: Addr) {
        let mut inner = self.0.borrow_mut();
        inner.flash[addr] ^= 0xFF;
    }
}

impl Transport for FakeHal {
    type Error = FakeError;

    fn send_to_host(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        let mut frame = [0u8; 8];
        frame.copy_from_slice(data);
        self.0.borrow_mut().sent.push(frame);
        Ok(())
    }
}

impl NvmStore for FakeHal {
    type Error = FakeError;

    fn nvm_read(&mut self, key: NvmKey) -> Result<NvmValue, Self::Error> {
        self.0
            .borrow()
            .nvm
            .get(&key)
            .copied()
            .ok_or(FakeError::NvmKeyMissing)
    }

    fn nvm_write(&mut self, key: NvmKey, value: NvmValue) -> Result<(), Self::Error> {
        self.0.borrow_mut().nvm.insert(key, value);
        Ok(())
    }
}

impl FlashHal for FakeHal {
    type Error = FakeError;

    fn flash_erase(&mut self, start: Addr, end: Addr) -> Result<(), Self::Error> {
        let mut inner = self.0.borrow_mut();
        if inner.erase_should_fail {
            return Err(FakeError::FlashOutOfRange);
        }
        if end > inner.flash.len() {
            return Err(FakeError::FlashOutOfRange);
        }
        inner.flash[start..end].fill(0xFF);
        Ok(())
    }

    fn flash_write(&mut self, addr: Addr, data: &[u8]) -> Result<(), Self::Error> {
        let mut inner = self.0.borrow_mut();
        if addr + data.len() > inner.flash.len() {
            return Err(FakeError::FlashOutOfRange);
        }
        inner.flash[addr..addr + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn flash_read(&mut self, addr: Addr, out: &mut [u8]) -> Result<(), Self::Error> {
        let inner = self.0.borrow();
        if addr + out.len() > inner.flash.len() {
            return Err(FakeError::FlashOutOfRange);
        }
        out.copy_from_slice(&inner.flash[addr..addr + out.len()]);
        Ok(())
    }

    unsafe fn jump_to_app(
        &mut self,
        _reset_vector: Addr,
    ) -> Result<core::convert::Infallible, Self::Error> {
        Err(FakeError::JumpRefused)
    }
}
