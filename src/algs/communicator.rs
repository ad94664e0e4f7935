//! Thin façade over in-process or inter-process (MPI) message passing.
//!
//! Messages are contiguous byte slices. Handles are waitable; callers
//! `.wait()` before trusting a received buffer. Messages between one
//! `(source, destination, tag)` triple are delivered in send order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::mg_error::MgError;

/// Message tags, one per traffic class.
pub mod tags {
    pub const EXCHANGE: u16 = 1;
    pub const RESTRICT: u16 = 2;
    pub const INTERPOLATE: u16 = 3;
    pub const REDUCE: u16 = 4;
}

/// Point-to-point plus the two reductions the solver needs.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// `buf` gives the expected message length; the data is returned by `wait`.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Element-wise global sum, identical on every rank.
    ///
    /// The default exchanges contributions point-to-point and adds them in
    /// rank order.
    fn allreduce_sum(&self, values: &mut [f64]) -> Result<(), MgError> {
        let gathered = self.gather_all(values)?;
        values.fill(0.0);
        for contribution in &gathered {
            for (v, c) in values.iter_mut().zip(contribution) {
                *v += c;
            }
        }
        Ok(())
    }

    /// Global maximum, identical on every rank.
    fn allreduce_max(&self, value: f64) -> Result<f64, MgError> {
        let gathered = self.gather_all(&[value])?;
        Ok(gathered.iter().map(|c| c[0]).fold(f64::NEG_INFINITY, f64::max))
    }

    /// Every rank's copy of `values`, indexed by rank.
    fn gather_all(&self, values: &[f64]) -> Result<Vec<Vec<f64>>, MgError> {
        let me = self.rank();
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let sends: Vec<_> = (0..self.size())
            .filter(|&peer| peer != me)
            .map(|peer| self.isend(peer, tags::REDUCE, bytes))
            .collect();
        let mut gathered = Vec::with_capacity(self.size());
        for peer in 0..self.size() {
            if peer == me {
                gathered.push(values.to_vec());
                continue;
            }
            let mut buf = vec![0.0f64; values.len()];
            let raw = self
                .irecv(peer, tags::REDUCE, bytemuck::cast_slice_mut(&mut buf))
                .wait()
                .ok_or_else(|| MgError::Communication {
                    peer,
                    detail: "no reduction contribution".into(),
                })?;
            copy_f64s(peer, &raw, &mut buf)?;
            gathered.push(buf);
        }
        for s in sends {
            s.wait();
        }
        Ok(gathered)
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Copy a received byte payload into an aligned `f64` buffer of the expected length.
pub(crate) fn copy_f64s(peer: usize, raw: &[u8], dst: &mut [f64]) -> Result<(), MgError> {
    let expected = std::mem::size_of_val(dst);
    if raw.len() != expected {
        return Err(MgError::Communication {
            peer,
            detail: format!("expected {expected} bytes, received {}", raw.len()),
        });
    }
    bytemuck::cast_slice_mut::<f64, u8>(dst).copy_from_slice(raw);
    Ok(())
}

/// Single-rank communicator; nothing is ever sent.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) -> Self::SendHandle {}

    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) -> Self::RecvHandle {}

    fn allreduce_sum(&self, _values: &mut [f64]) -> Result<(), MgError> {
        Ok(())
    }

    fn allreduce_max(&self, value: f64) -> Result<f64, MgError> {
        Ok(value)
    }
}

// --- LocalComm: ranks as threads of one process ---
type Key = (usize, usize, u16); // (src, dst, tag)

/// How long a receive waits before reporting the peer as unreachable.
const RECV_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Default)]
struct Mailbox {
    slots: DashMap<Key, VecDeque<Bytes>>,
    lock: Mutex<()>,
    ready: Condvar,
}

impl Mailbox {
    fn post(&self, key: Key, payload: Bytes) {
        self.slots.entry(key).or_default().push_back(payload);
        let _guard = self.lock.lock();
        self.ready.notify_all();
    }

    fn take(&self, key: &Key) -> Option<Bytes> {
        self.slots.get_mut(key).and_then(|mut q| q.pop_front())
    }

    fn take_blocking(&self, key: &Key) -> Option<Bytes> {
        let mut guard = self.lock.lock();
        loop {
            if let Some(b) = self.take(key) {
                return Some(b);
            }
            if self.ready.wait_for(&mut guard, RECV_TIMEOUT).timed_out() {
                return self.take(key);
            }
        }
    }
}

/// Communicator for `size` ranks running as threads in one process.
#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl LocalComm {
    /// One communicator per rank, all sharing a mailbox.
    pub fn world(size: usize) -> Vec<LocalComm> {
        let mailbox = Arc::new(Mailbox::default());
        (0..size)
            .map(|rank| LocalComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }
}

pub struct LocalRecv {
    mailbox: Arc<Mailbox>,
    key: Key,
}

impl Wait for LocalRecv {
    fn wait(self) -> Option<Vec<u8>> {
        self.mailbox.take_blocking(&self.key).map(|b| b.to_vec())
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalRecv;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        self.mailbox
            .post((self.rank, peer, tag), Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> LocalRecv {
        LocalRecv {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::collective::SystemOperation;
    use mpi::environment::Universe;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// Communicator over `MPI_COMM_WORLD`.
    pub struct MpiComm {
        _universe: Universe,
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        /// Initialize MPI; `None` if it was already initialized.
        pub fn new() -> Option<Self> {
            let universe = mpi::initialize()?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Some(Self {
                _universe: universe,
                world,
                rank,
                size,
            })
        }
    }

    /// Outstanding immediate send; owns its payload until completion.
    pub struct MpiSend {
        request: Request<'static, [u8], StaticScope>,
        payload: *mut [u8],
    }

    impl Wait for MpiSend {
        fn wait(self) -> Option<Vec<u8>> {
            self.request.wait();
            // SAFETY: the request has completed, so MPI no longer reads the
            // leaked buffer created in `isend`.
            drop(unsafe { Box::from_raw(self.payload) });
            None
        }
    }

    /// A completed receive.
    pub struct MpiRecv(Vec<u8>);

    impl Wait for MpiRecv {
        fn wait(self) -> Option<Vec<u8>> {
            Some(self.0)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSend;
        type RecvHandle = MpiRecv;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSend {
            let payload: &'static [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let request = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, payload, tag as i32);
            MpiSend {
                request,
                payload: payload as *const [u8] as *mut [u8],
            }
        }

        /// Blocks until the message arrives; callers post every send of a
        /// round before their first receive.
        fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> MpiRecv {
            let (data, _status) = self
                .world
                .process_at_rank(peer as i32)
                .receive_vec_with_tag::<u8>(tag as i32);
            MpiRecv(data)
        }

        fn allreduce_sum(&self, values: &mut [f64]) -> Result<(), MgError> {
            let local = values.to_vec();
            self.world
                .all_reduce_into(&local[..], values, SystemOperation::sum());
            Ok(())
        }

        fn allreduce_max(&self, value: f64) -> Result<f64, MgError> {
            let mut global = value;
            self.world
                .all_reduce_into(&value, &mut global, SystemOperation::max());
            Ok(global)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
