use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::error::{Error, Result};

use super::Payload;

/// One rank of an in-process universe.
///
/// Every ordered rank pair owns a dedicated FIFO channel, so a receive
/// names its source and collectives match in program order without tags.
/// Channels are unbounded; sends never block, which rules out the
/// classic head-of-line deadlock between symmetric exchanges.
#[derive(Debug)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
    tx: Vec<Sender<Payload>>,
    rx: Vec<Receiver<Payload>>,
}

impl ThreadComm {
    /// Build all ranks of an `n`-rank universe at once.
    pub fn universe(n: usize) -> Vec<ThreadComm> {
        assert!(n > 0, "a universe needs at least one rank");
        let mut senders: Vec<Vec<Option<Sender<Payload>>>> = (0..n)
            .map(|_| (0..n).map(|_| None).collect())
            .collect();
        let mut receivers: Vec<Vec<Option<Receiver<Payload>>>> = (0..n)
            .map(|_| (0..n).map(|_| None).collect())
            .collect();
        for from in 0..n {
            for to in 0..n {
                let (tx, rx) = unbounded();
                senders[from][to] = Some(tx);
                receivers[to][from] = Some(rx);
            }
        }
        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (tx, rx))| ThreadComm {
                rank,
                size: n,
                tx: tx.into_iter().map(Option::unwrap).collect(),
                rx: rx.into_iter().map(Option::unwrap).collect(),
            })
            .collect()
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn send(&self, payload: Payload, dest: usize) -> Result<()> {
        if dest >= self.size {
            return Err(Error::Invalid("destination rank out of range"));
        }
        self.tx[dest]
            .send(payload)
            .map_err(|_| Error::Failure("peer rank hung up"))
    }

    pub fn recv(&self, source: usize) -> Result<Payload> {
        if source >= self.size {
            return Err(Error::Invalid("source rank out of range"));
        }
        self.rx[source]
            .recv()
            .map_err(|_| Error::Failure("peer rank hung up"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_pairwise_fifo() {
        let mut universe = ThreadComm::universe(2);
        let c1 = universe.pop().unwrap();
        let c0 = universe.pop().unwrap();

        let sender = thread::spawn(move || {
            c0.send(Payload::I64(vec![1]), 1).unwrap();
            c0.send(Payload::I64(vec![2]), 1).unwrap();
        });
        let Payload::I64(first) = c1.recv(0).unwrap() else {
            panic!("wrong payload type");
        };
        let Payload::I64(second) = c1.recv(0).unwrap() else {
            panic!("wrong payload type");
        };
        assert_eq!(first, vec![1]);
        assert_eq!(second, vec![2]);
        sender.join().unwrap();
    }

    #[test]
    fn test_rank_bounds() {
        let mut universe = ThreadComm::universe(1);
        let c0 = universe.pop().unwrap();
        assert!(c0.send(Payload::U8(vec![0]), 1).is_err());
        assert!(c0.recv(1).is_err());
    }
}
