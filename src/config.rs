//! Bootloader configuration, immutable over a session.

use crate::crc::CrcStream;

/// Feature flags and call-outs supplied once at `init` time.
pub struct Config<'a> {
    /// When true, a fully received image transitions directly to
    /// `JumpToApp`; when false, it returns to `Idle`.
    pub jump_to_app_after_dfu_recv_complete: bool,
    /// Optional override for the per-byte CRC step. `None` uses the
    /// built-in libiberty-form table.
    pub custom_crc_stream: Option<&'a dyn CrcStream>,
}

impl<'a> Config<'a> {
    /// Convenience constructor for the common case of no custom CRC hook.
    pub const fn new(jump_to_app_after_dfu_recv_complete: bool) -> Self {
        Self {
            jump_to_app_after_dfu_recv_complete,
            custom_crc_stream: None,
        }
    }

    /// Attaches a custom per-byte CRC stream function.
    pub const fn with_custom_crc_stream(mut self, stream: &'a dyn CrcStream) -> Self {
        self.custom_crc_stream = Some(stream);
        self
    }
}
