/*!
Scatter-gather over a fixed pool of worker threads.

A [`SamplerGroup`] describes how to update one unit (a transcript, a
transcription group, a sample) given read-only inputs. A [`WorkQueue`] owns a
pool of threads for one group. [`WorkQueue::scatter`] cuts the unit index
space into contiguous blocks and pushes them onto a bounded tick queue;
[`WorkQueue::gather`] blocks until every block has posted its completion
notification and returns the results in unit order.

Each unit's mutable state (its random number generator, or a whole upstream
sampler) is moved into exactly one block and handed back with that block's
notification, so workers never share mutable data.

# Example

```rust
use shredder::scheduler::{SamplerGroup, WorkQueue};
use shredder::schedule::Phase;
use shredder::Result;
use std::sync::Arc;

struct Square;

impl SamplerGroup for Square {
    type Worker = ();
    type Unit = f64;
    type Inputs = f64;
    type Output = f64;

    fn name(&self) -> &'static str {
        "square"
    }

    fn worker(&self) -> Result<()> {
        Ok(())
    }

    fn update(&self, _: &mut (), offset: &f64, _: usize, unit: &mut f64, _: Phase) -> Result<f64> {
        Ok(*unit * *unit + offset)
    }
}

let queue = WorkQueue::new(Square, 2, 3, 8)?;
let units: Vec<f64> = (0..10).map(f64::from).collect();
let gathered = queue.scatter_gather(Arc::new(1.0), units, Phase::default())?;
assert_eq!(gathered.notifications, 4);
assert_eq!(gathered.outputs[3], 10.0);
# Ok::<(), shredder::ShredderError>(())
```
*/

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

use crate::error::{Result, ShredderError};
use crate::schedule::Phase;

/// A family of independent unit updates that can run in any order.
pub trait SamplerGroup: Send + Sync + 'static {
    /// Thread-local scratch, typically the group's configured samplers.
    type Worker: Send + 'static;
    /// Mutable per-unit state moved into the block that updates the unit.
    type Unit: Send + 'static;
    /// Read-only inputs shared by all units of one sweep.
    type Inputs: Send + Sync + 'static;
    /// New value(s) of one unit.
    type Output: Send + 'static;

    fn name(&self) -> &'static str;

    /// Builds the scratch state of one worker thread.
    fn worker(&self) -> Result<Self::Worker>;

    /// Updates unit `index`.
    fn update(
        &self,
        worker: &mut Self::Worker,
        inputs: &Self::Inputs,
        index: usize,
        unit: &mut Self::Unit,
        phase: Phase,
    ) -> Result<Self::Output>;
}

struct Block<G: SamplerGroup> {
    range: Range<usize>,
    units: Vec<G::Unit>,
    inputs: Arc<G::Inputs>,
    phase: Phase,
}

enum Tick<G: SamplerGroup> {
    Block(Block<G>),
    Stop,
}

struct Done<G: SamplerGroup> {
    range: Range<usize>,
    units: Vec<G::Unit>,
    outputs: Result<Vec<G::Output>>,
}

/// Receipt of a [`WorkQueue::scatter`]; pass it to [`WorkQueue::gather`].
#[must_use = "scattered work must be gathered"]
#[derive(Debug)]
pub struct Pending {
    blocks: usize,
    len: usize,
}

impl Pending {
    pub fn blocks(&self) -> usize {
        self.blocks
    }
}

/// Results of one sweep, in unit order.
#[derive(Debug)]
pub struct Gathered<U, O> {
    pub units: Vec<U>,
    pub outputs: Vec<O>,
    /// Completion notifications received; one per block.
    pub notifications: usize,
}

/// Contiguous `[begin, end)` ranges of at most `block_size` covering `0..len`.
pub fn block_ranges(len: usize, block_size: usize) -> impl Iterator<Item = Range<usize>> {
    let block_size = block_size.max(1);
    (0..len)
        .step_by(block_size)
        .map(move |begin| begin..(begin + block_size).min(len))
}

/// One generator per unit, seeded `seed + offset + index`.
pub fn seeded_rngs(seed: u64, offset: u64, len: usize) -> Vec<SmallRng> {
    (0..len as u64)
        .map(|i| SmallRng::seed_from_u64(seed.wrapping_add(offset).wrapping_add(i)))
        .collect()
}

/// A fixed pool of worker threads serving one [`SamplerGroup`].
pub struct WorkQueue<G: SamplerGroup> {
    name: &'static str,
    block_size: usize,
    ticks: Sender<Tick<G>>,
    notify: Receiver<Done<G>>,
    handles: Vec<JoinHandle<()>>,
}

impl<G: SamplerGroup> WorkQueue<G> {
    /// Spawns `threads` workers for `group`.
    ///
    /// At most `queue_capacity` blocks wait in the tick queue at a time.
    pub fn new(group: G, threads: usize, block_size: usize, queue_capacity: usize) -> Result<Self> {
        if threads == 0 || block_size == 0 {
            return Err(ShredderError::InvalidConfig(format!(
                "work queue `{}` needs at least one thread and a positive block size",
                group.name()
            )));
        }
        let name = group.name();
        let group = Arc::new(group);
        let (tick_tx, tick_rx) = bounded::<Tick<G>>(queue_capacity.max(1));
        let (done_tx, done_rx) = unbounded::<Done<G>>();

        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let worker = group.worker()?;
            let group = Arc::clone(&group);
            let ticks = tick_rx.clone();
            let notify = done_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || work(group, worker, ticks, notify))?;
            handles.push(handle);
        }
        debug!(group = name, threads, block_size, "started work queue");

        Ok(Self {
            name,
            block_size,
            ticks: tick_tx,
            notify: done_rx,
            handles,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Pushes one block per `block_size` units onto the tick queue.
    ///
    /// Blocks while the tick queue is full.
    pub fn scatter(&self, inputs: Arc<G::Inputs>, units: Vec<G::Unit>, phase: Phase) -> Result<Pending> {
        let len = units.len();
        let mut units = units.into_iter();
        let mut blocks = 0;
        for range in block_ranges(len, self.block_size) {
            let block = Block {
                units: units.by_ref().take(range.len()).collect(),
                range,
                inputs: Arc::clone(&inputs),
                phase,
            };
            self.ticks
                .send(Tick::Block(block))
                .map_err(|_| ShredderError::Disconnected { group: self.name })?;
            blocks += 1;
        }
        Ok(Pending { blocks, len })
    }

    /// Waits for every block of `pending` and reassembles the results.
    ///
    /// All notifications are drained before the first error is returned.
    pub fn gather(&self, pending: Pending) -> Result<Gathered<G::Unit, G::Output>> {
        let mut slots: Vec<Option<(Vec<G::Unit>, Vec<G::Output>)>> =
            (0..pending.blocks).map(|_| None).collect();
        let mut first_error = None;

        for _ in 0..pending.blocks {
            let done = self
                .notify
                .recv()
                .map_err(|_| ShredderError::Disconnected { group: self.name })?;
            match done.outputs {
                Ok(outputs) => slots[done.range.start / self.block_size] = Some((done.units, outputs)),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let mut units = Vec::with_capacity(pending.len);
        let mut outputs = Vec::with_capacity(pending.len);
        for slot in slots {
            let (u, o) = slot.ok_or(ShredderError::Disconnected { group: self.name })?;
            units.extend(u);
            outputs.extend(o);
        }
        Ok(Gathered {
            units,
            outputs,
            notifications: pending.blocks,
        })
    }

    pub fn scatter_gather(
        &self,
        inputs: Arc<G::Inputs>,
        units: Vec<G::Unit>,
        phase: Phase,
    ) -> Result<Gathered<G::Unit, G::Output>> {
        let pending = self.scatter(inputs, units, phase)?;
        self.gather(pending)
    }

    /// Stops and joins all workers.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        for _ in 0..self.handles.len() {
            if self.ticks.send(Tick::Stop).is_err() {
                break;
            }
        }
        let mut result = Ok(());
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                result = Err(ShredderError::WorkerPanicked { group: self.name });
            }
        }
        result
    }
}

impl<G: SamplerGroup> Drop for WorkQueue<G> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn work<G: SamplerGroup>(
    group: Arc<G>,
    mut worker: G::Worker,
    ticks: Receiver<Tick<G>>,
    notify: Sender<Done<G>>,
) {
    while let Ok(tick) = ticks.recv() {
        let Block {
            range,
            mut units,
            inputs,
            phase,
        } = match tick {
            Tick::Block(block) => block,
            Tick::Stop => break,
        };

        let outputs = panic::catch_unwind(AssertUnwindSafe(|| {
            range
                .clone()
                .zip(units.iter_mut())
                .map(|(index, unit)| group.update(&mut worker, &inputs, index, unit, phase))
                .collect::<Result<Vec<_>>>()
        }))
        .unwrap_or_else(|_| Err(ShredderError::WorkerPanicked { group: group.name() }));
        drop(inputs);

        if notify.send(Done { range, units, outputs }).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records which thread touched which unit.
    struct Recorder {
        visits: Arc<Vec<AtomicUsize>>,
        threads: Arc<Mutex<Vec<String>>>,
    }

    impl SamplerGroup for Recorder {
        type Worker = ();
        type Unit = usize;
        type Inputs = ();
        type Output = usize;

        fn name(&self) -> &'static str {
            "recorder"
        }

        fn worker(&self) -> Result<()> {
            Ok(())
        }

        fn update(&self, _: &mut (), _: &(), index: usize, unit: &mut usize, _: Phase) -> Result<usize> {
            self.visits[index].fetch_add(1, Ordering::SeqCst);
            if let Some(name) = thread::current().name() {
                self.threads.lock().unwrap().push(name.to_string());
            }
            *unit += 1;
            Ok(index * 10)
        }
    }

    fn recorder(len: usize) -> (Recorder, Arc<Vec<AtomicUsize>>) {
        let visits: Arc<Vec<AtomicUsize>> = Arc::new((0..len).map(|_| AtomicUsize::new(0)).collect());
        (
            Recorder {
                visits: Arc::clone(&visits),
                threads: Arc::new(Mutex::new(Vec::new())),
            },
            visits,
        )
    }

    #[test]
    fn test_block_ranges() {
        let ranges: Vec<_> = block_ranges(7, 3).collect();
        assert_eq!(ranges, vec![0..3, 3..6, 6..7]);
        assert_eq!(block_ranges(0, 250).count(), 0);
        assert_eq!(block_ranges(250, 250).count(), 1);
        assert_eq!(block_ranges(251, 250).count(), 2);
    }

    #[test]
    fn test_every_index_visited_once() {
        for (len, block_size) in [(1_001, 250), (250, 250), (3, 1), (17, 100)] {
            let (group, visits) = recorder(len);
            let queue = WorkQueue::new(group, 4, block_size, 2).unwrap();
            let units = vec![0usize; len];
            let gathered = queue.scatter_gather(Arc::new(()), units, Phase::default()).unwrap();

            assert_eq!(gathered.notifications, len.div_ceil(block_size));
            assert!(visits.iter().all(|v| v.load(Ordering::SeqCst) == 1));
            assert_eq!(gathered.units, vec![1usize; len]);
            let expected: Vec<usize> = (0..len).map(|i| i * 10).collect();
            assert_eq!(gathered.outputs, expected);
            queue.shutdown().unwrap();
        }
    }

    #[test]
    fn test_units_are_returned_across_sweeps() {
        let (group, visits) = recorder(10);
        let queue = WorkQueue::new(group, 3, 4, 1).unwrap();
        let mut units = vec![0usize; 10];
        for _ in 0..5 {
            units = queue
                .scatter_gather(Arc::new(()), units, Phase::default())
                .unwrap()
                .units;
        }
        assert_eq!(units, vec![5usize; 10]);
        assert!(visits.iter().all(|v| v.load(Ordering::SeqCst) == 5));
    }

    #[test]
    fn test_empty_group() {
        let (group, _) = recorder(0);
        let queue = WorkQueue::new(group, 2, 250, 4).unwrap();
        let gathered = queue
            .scatter_gather(Arc::new(()), Vec::new(), Phase::default())
            .unwrap();
        assert_eq!(gathered.notifications, 0);
        assert!(gathered.outputs.is_empty());
    }

    #[test]
    fn test_workers_are_named_after_group() {
        let (group, _) = recorder(50);
        let threads = Arc::clone(&group.threads);
        let queue = WorkQueue::new(group, 2, 5, 4).unwrap();
        queue
            .scatter_gather(Arc::new(()), vec![0; 50], Phase::default())
            .unwrap();
        let names = threads.lock().unwrap();
        assert_eq!(names.len(), 50);
        assert!(names.iter().all(|n| n.starts_with("recorder-")));
    }

    struct Failing;

    impl SamplerGroup for Failing {
        type Worker = ();
        type Unit = ();
        type Inputs = ();
        type Output = ();

        fn name(&self) -> &'static str {
            "failing"
        }

        fn worker(&self) -> Result<()> {
            Ok(())
        }

        fn update(&self, _: &mut (), _: &(), index: usize, _: &mut (), _: Phase) -> Result<()> {
            match index {
                3 => Err(ShredderError::NonFinite {
                    value: f64::NAN,
                    context: "test",
                }),
                7 => panic!("unit 7"),
                _ => Ok(()),
            }
        }
    }

    #[test]
    fn test_errors_and_panics_reach_the_driver() {
        let queue = WorkQueue::new(Failing, 2, 2, 8).unwrap();
        let res = queue.scatter_gather(Arc::new(()), vec![(); 6], Phase::default());
        assert!(matches!(res, Err(ShredderError::NonFinite { .. })), "Got {:?}", res.err());

        let res = queue.scatter_gather(Arc::new(()), vec![(); 12], Phase::default());
        assert!(res.is_err());

        // The pool is still usable afterwards.
        let ok = queue.scatter_gather(Arc::new(()), vec![(); 3], Phase::default());
        assert!(ok.is_ok());
    }

    #[test]
    fn test_rejects_zero_threads() {
        let (group, _) = recorder(1);
        assert!(matches!(
            WorkQueue::new(group, 0, 10, 1),
            Err(ShredderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_seeded_rngs_are_reproducible() {
        use rand::Rng;
        let mut a = seeded_rngs(42, 5, 3);
        let mut b = seeded_rngs(42, 5, 3);
        let mut c = seeded_rngs(42, 6, 3);
        let xa: Vec<u64> = a.iter_mut().map(|r| r.gen()).collect();
        let xb: Vec<u64> = b.iter_mut().map(|r| r.gen()).collect();
        let xc: Vec<u64> = c.iter_mut().map(|r| r.gen()).collect();
        assert_eq!(xa, xb);
        assert_eq!(xa[1], xc[0]);
    }
}
