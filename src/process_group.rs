//! Collective operations over a group of cooperating processes.
//!
//! Building a spatial index only ever needs element-wise min and max reductions of small
//! vectors of `f64`, so that is all a [`ProcessGroup`] has to provide. Serial programs use
//! [`SingleProcess`]; with the `mpi` feature, [`MpiGroup`] wraps an MPI communicator.

/// A group of processes that take part in collective reductions.
///
/// Reductions are blocking: every process of the group must make the same sequence of calls,
/// with vectors of the same length.
pub trait ProcessGroup {
    /// Number of processes in the group.
    fn size(&self) -> usize;

    /// Rank of the calling process in the group.
    fn rank(&self) -> usize;

    /// Replaces each entry of `values` by its minimum over all processes.
    fn all_reduce_min(&self, values: &mut [f64]);

    /// Replaces each entry of `values` by its maximum over all processes.
    fn all_reduce_max(&self, values: &mut [f64]);
}

/// The trivial group made of the calling process only.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl ProcessGroup for SingleProcess {
    fn size(&self) -> usize {
        1
    }

    fn rank(&self) -> usize {
        0
    }

    fn all_reduce_min(&self, _values: &mut [f64]) {}

    fn all_reduce_max(&self, _values: &mut [f64]) {}
}

#[cfg(feature = "mpi")]
pub use self::mpi_group::MpiGroup;

#[cfg(feature = "mpi")]
mod mpi_group {
    use mpi::collective::SystemOperation;
    use mpi::traits::{Communicator, CommunicatorCollectives};

    use super::ProcessGroup;

    /// A [`ProcessGroup`] backed by an MPI communicator.
    pub struct MpiGroup<'a, C>(pub &'a C);

    impl<C: CommunicatorCollectives> ProcessGroup for MpiGroup<'_, C> {
        fn size(&self) -> usize {
            self.0.size() as usize
        }

        fn rank(&self) -> usize {
            self.0.rank() as usize
        }

        fn all_reduce_min(&self, values: &mut [f64]) {
            let local = values.to_vec();
            self.0
                .all_reduce_into(&local[..], values, SystemOperation::min());
        }

        fn all_reduce_max(&self, values: &mut [f64]) {
            let local = values.to_vec();
            self.0
                .all_reduce_into(&local[..], values, SystemOperation::max());
        }
    }
}
