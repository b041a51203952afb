//! Internal logging macros wrapping `defmt`. Expands to nothing when the
//! `defmt` feature is off, so call sites never need their own `#[cfg]`.

macro_rules! trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "defmt")]
        defmt::trace!($($arg)*);
    };
}

macro_rules! warn {
    ($($arg:tt)*) => {
        #[cfg(feature = "defmt")]
        defmt::warn!($($arg)*);
    };
}

macro_rules! error {
    ($($arg:tt)*) => {
        #[cfg(feature = "defmt")]
        defmt::error!($($arg)*);
    };
}

pub(crate) use {error, trace, warn};
