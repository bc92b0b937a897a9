//! Thread helpers that also compile in `no_std` environments.

use core::num::NonZero;

/// Number of workers to start when none is configured.
///
/// Wraps [`std::thread::available_parallelism`], falling back to one when the
/// query fails or `std` is disabled.
pub fn available_parallelism() -> NonZero<usize> {
    #[cfg(feature = "std")]
    {
        std::thread::available_parallelism().unwrap_or(NonZero::<usize>::MIN)
    }

    #[cfg(not(feature = "std"))]
    {
        NonZero::<usize>::MIN
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn parallelism_is_never_zero() {
        assert!(super::available_parallelism().get() >= 1);
    }
}
