//! Errors reported while building a triple buffer

use thiserror::Error;

/// Boxed error returned by a frame factory
pub type FactoryError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure to build a triple buffer
///
/// When this is returned, the frames which had already been built were
/// dropped, and no buffer exists. The caller may retry or give up.
///
#[derive(Debug, Error)]
pub enum BuildError {
    /// The frame factory failed to produce one of the three frames
    #[error("failed to allocate frame {index} of 3")]
    FrameAllocation {
        /// Index (0, 1 or 2) of the frame that could not be built
        index: usize,

        /// Error reported by the frame factory
        #[source]
        source: FactoryError,
    },
}
