//! Rank-to-rank collectives.
//!
//! The adaptation core is SPMD: every rank runs the same pass sequence and
//! meets the others at collectives. Two engines share one surface:
//! [`Comm::solo`] for a single rank (every collective is the identity) and
//! [`Comm::threads`] for n ranks inside one process, one thread per rank,
//! exchanging typed payloads over pairwise FIFO mailboxes.
//!
//! Callers state the semantic element type through the [`Word`] parameter
//! and the engine moves the matching payload variant, the same adapter job
//! an MPI wrapper does with datatype constants.

mod stopwatch;
mod threads;

pub use stopwatch::Stopwatch;
pub use threads::ThreadComm;

use crate::error::{Error, Result};

/// Element types that can travel through a collective.
pub trait Word: Copy + Default + Send + 'static {
    fn wrap(values: Vec<Self>) -> Payload;
    fn unwrap(payload: Payload) -> Option<Vec<Self>>;
    fn add(a: Self, b: Self) -> Self;
    fn minimum(a: Self, b: Self) -> Self;
    fn maximum(a: Self, b: Self) -> Self;
}

/// A typed message between two ranks.
#[derive(Debug, Clone)]
pub enum Payload {
    I32(Vec<i32>),
    I64(Vec<i64>),
    F64(Vec<f64>),
    U8(Vec<u8>),
}

macro_rules! word_impl {
    ($ty:ty, $variant:ident, $min:expr, $max:expr) => {
        impl Word for $ty {
            fn wrap(values: Vec<Self>) -> Payload {
                Payload::$variant(values)
            }
            fn unwrap(payload: Payload) -> Option<Vec<Self>> {
                match payload {
                    Payload::$variant(values) => Some(values),
                    _ => None,
                }
            }
            fn add(a: Self, b: Self) -> Self {
                a + b
            }
            fn minimum(a: Self, b: Self) -> Self {
                $min(a, b)
            }
            fn maximum(a: Self, b: Self) -> Self {
                $max(a, b)
            }
        }
    };
}

word_impl!(i32, I32, std::cmp::min, std::cmp::max);
word_impl!(i64, I64, std::cmp::min, std::cmp::max);
word_impl!(u8, U8, std::cmp::min, std::cmp::max);
word_impl!(f64, F64, f64::min, f64::max);

/// Handle to the rank universe this process participates in.
#[derive(Debug)]
pub enum Comm {
    Solo,
    Threads(ThreadComm),
}

impl Comm {
    /// Single-rank universe.
    pub fn solo() -> Self {
        Comm::Solo
    }

    /// One communicator per rank, to be moved into `n` worker threads.
    pub fn threads(n: usize) -> Vec<Self> {
        ThreadComm::universe(n)
            .into_iter()
            .map(Comm::Threads)
            .collect()
    }

    pub fn rank(&self) -> usize {
        match self {
            Comm::Solo => 0,
            Comm::Threads(c) => c.rank(),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Comm::Solo => 1,
            Comm::Threads(c) => c.size(),
        }
    }

    /// True on exactly one rank; gather/report work happens there.
    pub fn once(&self) -> bool {
        self.rank() == 0
    }

    /// True when there is more than one rank to coordinate with.
    pub fn para(&self) -> bool {
        self.size() > 1
    }

    pub fn send<T: Word>(&self, data: &[T], dest: usize) -> Result<()> {
        match self {
            Comm::Solo => Err(Error::Invalid("send on a solo communicator")),
            Comm::Threads(c) => c.send(T::wrap(data.to_vec()), dest),
        }
    }

    pub fn recv<T: Word>(&self, n: usize, source: usize) -> Result<Vec<T>> {
        match self {
            Comm::Solo => Err(Error::Invalid("recv on a solo communicator")),
            Comm::Threads(c) => {
                let values =
                    T::unwrap(c.recv(source)?).ok_or(Error::Invalid("payload type mismatch"))?;
                if values.len() != n {
                    return Err(Error::Invalid("payload length mismatch"));
                }
                Ok(values)
            }
        }
    }

    /// Replace `data` on every rank with rank 0's copy.
    pub fn bcast<T: Word>(&self, data: &mut Vec<T>) -> Result<()> {
        let Comm::Threads(c) = self else {
            return Ok(());
        };
        if c.rank() == 0 {
            for dest in 1..c.size() {
                c.send(T::wrap(data.clone()), dest)?;
            }
        } else {
            *data = T::unwrap(c.recv(0)?).ok_or(Error::Invalid("payload type mismatch"))?;
        }
        Ok(())
    }

    /// Concatenate one fixed-width row per rank, in rank order.
    pub fn allgather<T: Word>(&self, row: &[T]) -> Result<Vec<T>> {
        match self {
            Comm::Solo => Ok(row.to_vec()),
            Comm::Threads(c) => {
                for dest in 0..c.size() {
                    if dest != c.rank() {
                        c.send(T::wrap(row.to_vec()), dest)?;
                    }
                }
                let mut out = Vec::with_capacity(row.len() * c.size());
                for source in 0..c.size() {
                    if source == c.rank() {
                        out.extend_from_slice(row);
                    } else {
                        let values = T::unwrap(c.recv(source)?)
                            .ok_or(Error::Invalid("payload type mismatch"))?;
                        if values.len() != row.len() {
                            return Err(Error::Invalid("allgather row width mismatch"));
                        }
                        out.extend(values);
                    }
                }
                Ok(out)
            }
        }
    }

    /// Concatenate variable-length contributions, in rank order.
    /// Returns the concatenation and the per-rank element counts.
    pub fn allgatherv<T: Word>(&self, local: &[T]) -> Result<(Vec<T>, Vec<usize>)> {
        match self {
            Comm::Solo => Ok((local.to_vec(), vec![local.len()])),
            Comm::Threads(c) => {
                let counts: Vec<usize> = self
                    .allgather(&[local.len() as i64])?
                    .into_iter()
                    .map(|n| n as usize)
                    .collect();
                for dest in 0..c.size() {
                    if dest != c.rank() {
                        c.send(T::wrap(local.to_vec()), dest)?;
                    }
                }
                let mut out = Vec::with_capacity(counts.iter().sum());
                for source in 0..c.size() {
                    if source == c.rank() {
                        out.extend_from_slice(local);
                    } else {
                        let values = T::unwrap(c.recv(source)?)
                            .ok_or(Error::Invalid("payload type mismatch"))?;
                        if values.len() != counts[source] {
                            return Err(Error::Invalid("allgatherv count mismatch"));
                        }
                        out.extend(values);
                    }
                }
                Ok((out, counts))
            }
        }
    }

    /// One element to and from every rank; `send[d]` lands on rank d.
    pub fn alltoall<T: Word>(&self, send: &[T]) -> Result<Vec<T>> {
        if send.len() != self.size() {
            return Err(Error::Invalid("alltoall needs one element per rank"));
        }
        match self {
            Comm::Solo => Ok(send.to_vec()),
            Comm::Threads(c) => {
                for dest in 0..c.size() {
                    if dest != c.rank() {
                        c.send(T::wrap(vec![send[dest]]), dest)?;
                    }
                }
                let mut out = vec![T::default(); c.size()];
                out[c.rank()] = send[c.rank()];
                for source in 0..c.size() {
                    if source != c.rank() {
                        let values = T::unwrap(c.recv(source)?)
                            .ok_or(Error::Invalid("payload type mismatch"))?;
                        out[source] = values[0];
                    }
                }
                Ok(out)
            }
        }
    }

    /// Variable exchange. `send` holds `send_size[d] * ldim` elements per
    /// destination, in rank order; the return holds `recv_size[s] * ldim`
    /// per source, in rank order.
    pub fn alltoallv<T: Word>(
        &self,
        send: &[T],
        send_size: &[usize],
        recv_size: &[usize],
        ldim: usize,
    ) -> Result<Vec<T>> {
        if send_size.len() != self.size() || recv_size.len() != self.size() {
            return Err(Error::Invalid("alltoallv needs one count per rank"));
        }
        if send.len() != send_size.iter().sum::<usize>() * ldim {
            return Err(Error::Invalid("alltoallv send buffer length mismatch"));
        }
        match self {
            Comm::Solo => Ok(send.to_vec()),
            Comm::Threads(c) => {
                let mut offset = 0;
                let mut own = Vec::new();
                for dest in 0..c.size() {
                    let len = send_size[dest] * ldim;
                    let chunk = &send[offset..offset + len];
                    if dest == c.rank() {
                        own = chunk.to_vec();
                    } else {
                        c.send(T::wrap(chunk.to_vec()), dest)?;
                    }
                    offset += len;
                }
                let mut out = Vec::with_capacity(recv_size.iter().sum::<usize>() * ldim);
                for source in 0..c.size() {
                    let values = if source == c.rank() {
                        std::mem::take(&mut own)
                    } else {
                        T::unwrap(c.recv(source)?)
                            .ok_or(Error::Invalid("payload type mismatch"))?
                    };
                    if values.len() != recv_size[source] * ldim {
                        return Err(Error::Invalid("alltoallv recv count mismatch"));
                    }
                    out.extend(values);
                }
                Ok(out)
            }
        }
    }

    /// Elementwise sum over ranks; every rank gets the total.
    pub fn sum<T: Word>(&self, local: &[T]) -> Result<Vec<T>> {
        match self {
            Comm::Solo => Ok(local.to_vec()),
            Comm::Threads(_) => {
                let (all, counts) = self.allgatherv(local)?;
                if counts.iter().any(|&n| n != local.len()) {
                    return Err(Error::Invalid("sum length differs across ranks"));
                }
                let mut out = vec![T::default(); local.len()];
                for (i, value) in all.into_iter().enumerate() {
                    let slot = i % local.len();
                    out[slot] = T::add(out[slot], value);
                }
                Ok(out)
            }
        }
    }

    pub fn min<T: Word>(&self, value: T) -> Result<T> {
        let all = self.allgather(&[value])?;
        Ok(all.into_iter().fold(value, T::minimum))
    }

    pub fn max<T: Word>(&self, value: T) -> Result<T> {
        let all = self.allgather(&[value])?;
        Ok(all.into_iter().fold(value, T::maximum))
    }

    /// Logical OR over ranks.
    pub fn all_or(&self, value: bool) -> Result<bool> {
        let all = self.allgather(&[value as u8])?;
        Ok(all.into_iter().any(|v| v != 0))
    }

    pub fn barrier(&self) -> Result<()> {
        self.allgather(&[0u8])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn in_ranks<F>(n: usize, f: F)
    where
        F: Fn(Comm) + Send + Sync + Clone + 'static,
    {
        let handles: Vec<_> = Comm::threads(n)
            .into_iter()
            .map(|comm| {
                let f = f.clone();
                thread::spawn(move || f(comm))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_solo_identities() {
        let comm = Comm::solo();
        assert_eq!(comm.size(), 1);
        assert!(comm.once());
        assert!(!comm.para());
        assert_eq!(comm.allgather(&[7i64]).unwrap(), vec![7]);
        assert_eq!(comm.sum(&[1.5f64, 2.5]).unwrap(), vec![1.5, 2.5]);
        assert_eq!(comm.alltoall(&[3i32]).unwrap(), vec![3]);
        assert!(!comm.all_or(false).unwrap());
    }

    #[test]
    fn test_bcast() {
        in_ranks(3, |comm| {
            let mut data = if comm.once() {
                vec![1.0f64, 2.0, 3.0]
            } else {
                Vec::new()
            };
            comm.bcast(&mut data).unwrap();
            assert_eq!(data, vec![1.0, 2.0, 3.0]);
        });
    }

    #[test]
    fn test_allgather_and_reductions() {
        in_ranks(4, |comm| {
            let rank = comm.rank() as i64;
            assert_eq!(comm.allgather(&[rank]).unwrap(), vec![0, 1, 2, 3]);
            assert_eq!(comm.sum(&[rank]).unwrap(), vec![6]);
            assert_eq!(comm.min(rank).unwrap(), 0);
            assert_eq!(comm.max(rank).unwrap(), 3);
            assert!(comm.all_or(comm.rank() == 2).unwrap());
        });
    }

    #[test]
    fn test_allgatherv() {
        in_ranks(3, |comm| {
            let local: Vec<i64> = (0..comm.rank() as i64).collect();
            let (all, counts) = comm.allgatherv(&local).unwrap();
            assert_eq!(counts, vec![0, 1, 2]);
            assert_eq!(all, vec![0, 0, 1]);
        });
    }

    #[test]
    fn test_alltoallv_permutes_rows() {
        in_ranks(3, |comm| {
            let rank = comm.rank() as i64;
            // two-wide rows, one per destination
            let send: Vec<i64> = (0..3).flat_map(|d| [rank, d]).collect();
            let sizes = vec![1usize, 1, 1];
            let recv = comm.alltoallv(&send, &sizes, &sizes, 2).unwrap();
            let expect: Vec<i64> = (0..3).flat_map(|s| [s, rank]).collect();
            assert_eq!(recv, expect);
        });
    }
}
