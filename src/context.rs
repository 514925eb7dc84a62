//! The `Comm` trait (§10.2): the transport contract §6 requires,
//! abstracted away from any concrete fabric so the scheduling logic in
//! `partition`/`segment`/`fill`/`pscan` never depends on it.
//!
//! `MpiComm` is the production implementation, over the `mpi` crate.
//! `LocalComm` is the `P=1` degenerate implementation used by tests and
//! by a program launched with a single rank.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// A waitable non-blocking send.
pub trait SendHandle {
    fn wait(self: Box<Self>);
}

/// A waitable non-blocking receive, yielding a `T` once complete.
pub trait RecvHandle<T> {
    fn wait(self: Box<Self>) -> T;
}

/// The messaging transport every collective in this crate is built on
/// (§6). Every method is a direct analogue of an MPI primitive; none of
/// them retry or recover from failure (§7).
pub trait Comm {
    fn rank(&self) -> usize;
    fn procs(&self) -> usize;

    fn send<T: Serialize>(&self, obj: &T, dest: usize, tag: i32);
    fn recv<T: DeserializeOwned>(&self, source: usize, tag: i32) -> T;

    fn isend<T: Serialize>(&self, obj: &T, dest: usize, tag: i32) -> Box<dyn SendHandle>;
    fn irecv<T: DeserializeOwned + 'static>(
        &self,
        source: usize,
        tag: i32,
    ) -> Box<dyn RecvHandle<T>>;

    /// Gather one value per rank to `root`; `None` on every other rank.
    fn gather<T: Serialize + DeserializeOwned>(&self, obj: &T, root: usize) -> Option<Vec<T>>;

    /// Gather one value per rank to every rank.
    fn all_gather<T: Serialize + DeserializeOwned + Clone>(&self, obj: &T) -> Vec<T>;

    /// Sum-reduce a scalar across all ranks, result known to all ranks.
    fn all_reduce_sum_i64(&self, v: i64) -> i64;

    /// Broadcast a value from `root`. Only `root` needs to supply `obj`.
    fn bcast<T: Serialize + DeserializeOwned + Clone>(&self, obj: Option<T>, root: usize) -> T;

    fn send_bytes(&self, buf: &[u8], dest: usize, tag: i32);
    fn recv_bytes(&self, buf: &mut [u8], source: usize, tag: i32);

    fn barrier(&self);
}

/// Maximum chunk size for the raw-byte bulk transport (§4.E): `2^30 -
/// 1` bytes, working around 32-bit byte-count limits in typical
/// message-passing layers.
pub const BULK_CHUNK_BYTES: usize = (1 << 30) - 1;

/// Tag values below this are reserved for the fixed-constant protocols
/// (tree-reduce levels, scan boundary exchange at 10/11, scan schedule
/// indices); each `repartition` call draws a fresh base above it and
/// advances past the range its segment count could possibly use.
const REPARTITION_TAG_FLOOR: i32 = 1 << 16;
const REPARTITION_TAG_STRIDE: i32 = 1 << 20;

/// Process-wide handle: rank, total process count, and the transport.
/// Created once at program start (§3).
pub struct Context<C: Comm> {
    comm: C,
    next_tag_base: std::cell::Cell<i32>,
}

impl<C: Comm> Context<C> {
    pub fn new(comm: C) -> Self {
        Self {
            comm,
            next_tag_base: std::cell::Cell::new(REPARTITION_TAG_FLOOR),
        }
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn procs(&self) -> usize {
        self.comm.procs()
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    /// Allocate a fresh tag base for one `repartition` call (§9:
    /// "send_items tag collisions"), so concurrently-queued collectives
    /// on the same communicator never see colliding tags.
    pub fn next_tag_base(&self) -> i32 {
        let base = self.next_tag_base.get();
        self.next_tag_base.set(base + REPARTITION_TAG_STRIDE);
        base
    }
}

/// MPI-backed transport over `mpi::topology::SystemCommunicator`
/// (the teacher's `MpiUniverse::world()` pattern). Generic payloads
/// are length-prefixed and `bincode`-serialized over raw-byte
/// send/recv, since rsmpi's typed API requires `Equivalence`.
pub struct MpiComm {
    universe: mpi::environment::Universe,
    world: mpi::topology::SystemCommunicator,
}

impl MpiComm {
    pub fn new() -> Result<Self> {
        let universe = mpi::initialize()
            .ok_or_else(|| Error::Mpi("mpi::initialize failed (already initialized?)".into()))?;
        let world = universe.world();
        Ok(Self { universe, world })
    }

    fn world(&self) -> &mpi::topology::SystemCommunicator {
        &self.world
    }
}

fn encode<T: Serialize>(obj: &T) -> Vec<u8> {
    bincode::serialize(obj).expect("bincode serialization of a user payload failed")
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> T {
    bincode::deserialize(bytes).expect("bincode deserialization of a user payload failed")
}

impl Comm for MpiComm {
    fn rank(&self) -> usize {
        self.world().rank() as usize
    }

    fn procs(&self) -> usize {
        self.world().size() as usize
    }

    fn send<T: Serialize>(&self, obj: &T, dest: usize, tag: i32) {
        use mpi::topology::Communicator;
        let bytes = encode(obj);
        let len = bytes.len() as i64;
        let p = self.world().process_at_rank(dest as i32);
        p.send_with_tag(&len, tag);
        p.send_with_tag(&bytes[..], tag);
    }

    fn recv<T: DeserializeOwned>(&self, source: usize, tag: i32) -> T {
        use mpi::topology::Communicator;
        let p = self.world().process_at_rank(source as i32);
        let (len, _) = p.receive_with_tag::<i64>(tag);
        let mut buf = vec![0u8; len as usize];
        p.receive_into_with_tag(&mut buf[..], tag);
        decode(&buf)
    }

    fn isend<T: Serialize>(&self, obj: &T, dest: usize, tag: i32) -> Box<dyn SendHandle> {
        use mpi::point_to_point::Destination;
        use mpi::request::StaticScope;
        use mpi::topology::Communicator;

        // Two independent non-blocking sends posted up front, so a
        // pairwise swap between two ranks can't deadlock the way a
        // pair of blocking sends could (§4.I).
        let bytes = encode(obj);
        let len: &'static i64 = Box::leak(Box::new(bytes.len() as i64));
        let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
        let p = self.world().process_at_rank(dest as i32);
        let len_req = p.immediate_send_with_tag(StaticScope, len, tag);
        let data_req = p.immediate_send_with_tag(StaticScope, bytes, tag);
        Box::new(MpiSend {
            len_req,
            data_req,
        })
    }

    fn irecv<T: DeserializeOwned + 'static>(
        &self,
        source: usize,
        tag: i32,
    ) -> Box<dyn RecvHandle<T>> {
        use mpi::request::StaticScope;
        use mpi::topology::Communicator;

        // The payload receive can't be sized until the length arrives,
        // so only the length receive is posted now; `wait` posts the
        // payload receive once it knows how big a buffer to leak.
        let len_buf: &'static mut i64 = Box::leak(Box::new(0i64));
        let len_ptr: *const i64 = len_buf;
        let p = self.world().process_at_rank(source as i32);
        let len_req = p.immediate_receive_into_with_tag(StaticScope, len_buf, tag);
        Box::new(MpiRecv {
            world: self.world() as *const mpi::topology::SystemCommunicator,
            source,
            tag,
            len_buf: len_ptr,
            len_req: Some(len_req),
            _marker: std::marker::PhantomData::<T>,
        })
    }

    fn gather<T: Serialize + DeserializeOwned>(&self, obj: &T, root: usize) -> Option<Vec<T>> {
        use mpi::topology::Communicator;
        let rank = self.rank();
        let bytes = encode(obj);
        if rank == root {
            let mut out = Vec::with_capacity(self.procs());
            for r in 0..self.procs() {
                if r == root {
                    out.push(decode(&bytes));
                } else {
                    let (len, _) = self.world().process_at_rank(r as i32).receive_with_tag::<i64>(9_000);
                    let mut buf = vec![0u8; len as usize];
                    self.world()
                        .process_at_rank(r as i32)
                        .receive_into_with_tag(&mut buf[..], 9_001);
                    out.push(decode(&buf));
                }
            }
            Some(out)
        } else {
            let p = self.world().process_at_rank(root as i32);
            p.send_with_tag(&(bytes.len() as i64), 9_000);
            p.send_with_tag(&bytes[..], 9_001);
            None
        }
    }

    fn all_gather<T: Serialize + DeserializeOwned + Clone>(&self, obj: &T) -> Vec<T> {
        (0..self.procs())
            .map(|root| {
                let mine = (root == self.rank()).then(|| obj.clone());
                self.bcast(mine, root)
            })
            .collect()
    }

    fn all_reduce_sum_i64(&self, v: i64) -> i64 {
        use mpi::collective::SystemOperation;
        use mpi::topology::Communicator;
        let mut result = 0i64;
        self.world().all_reduce_into(&v, &mut result, &SystemOperation::sum());
        result
    }

    fn bcast<T: Serialize + DeserializeOwned + Clone>(&self, obj: Option<T>, root: usize) -> T {
        use mpi::topology::Communicator;
        let rank = self.rank();
        let root_process = self.world().process_at_rank(root as i32);

        let mut buf = if rank == root {
            encode(obj.as_ref().expect("bcast: root must supply a value"))
        } else {
            Vec::new()
        };
        let mut len = buf.len() as i64;
        root_process.broadcast_into(&mut len);
        if rank != root {
            buf = vec![0u8; len as usize];
        }
        root_process.broadcast_into(&mut buf[..]);

        if rank == root {
            obj.unwrap()
        } else {
            decode(&buf)
        }
    }

    fn send_bytes(&self, buf: &[u8], dest: usize, tag: i32) {
        use mpi::topology::Communicator;
        self.world().process_at_rank(dest as i32).send_with_tag(buf, tag);
    }

    fn recv_bytes(&self, buf: &mut [u8], source: usize, tag: i32) {
        use mpi::topology::Communicator;
        self.world()
            .process_at_rank(source as i32)
            .receive_into_with_tag(buf, tag);
    }

    fn barrier(&self) {
        use mpi::topology::Communicator;
        self.world().barrier();
    }
}

struct MpiSend {
    len_req: mpi::request::Request<'static, mpi::request::StaticScope>,
    data_req: mpi::request::Request<'static, mpi::request::StaticScope>,
}

impl SendHandle for MpiSend {
    fn wait(self: Box<Self>) {
        self.len_req.wait();
        self.data_req.wait();
    }
}

struct MpiRecv<T> {
    // SAFETY: `world` outlives every in-flight request -- the
    // communicator is created once at program start and torn down
    // only after the computation (and every request it posted) has
    // completed (§3, §5).
    world: *const mpi::topology::SystemCommunicator,
    source: usize,
    tag: i32,
    len_buf: *const i64,
    len_req: Option<mpi::request::Request<'static, mpi::request::StaticScope>>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: DeserializeOwned> RecvHandle<T> for MpiRecv<T> {
    fn wait(mut self: Box<Self>) -> T {
        use mpi::point_to_point::Source;
        use mpi::request::StaticScope;
        use mpi::topology::Communicator;

        self.len_req.take().unwrap().wait();
        // SAFETY: the length request above has completed, so the
        // matching immediate receive has written the length into this
        // leaked buffer.
        let len = unsafe { *self.len_buf } as usize;

        let data_buf: &'static mut [u8] = Box::leak(vec![0u8; len].into_boxed_slice());
        // SAFETY: see the struct-level comment on `world`.
        let world = unsafe { &*self.world };
        let p = world.process_at_rank(self.source as i32);
        let data_req = p.immediate_receive_into_with_tag(StaticScope, data_buf, self.tag);
        data_req.wait();
        decode(data_buf)
    }
}

struct LocalSend;
impl SendHandle for LocalSend {
    fn wait(self: Box<Self>) {}
}

struct LocalRecv<T> {
    bytes: Vec<u8>,
    _marker: std::marker::PhantomData<T>,
}
impl<T: DeserializeOwned> RecvHandle<T> for LocalRecv<T> {
    fn wait(self: Box<Self>) -> T {
        decode(&self.bytes)
    }
}

/// Single-rank transport, for tests and for `P=1` runs. A schedule that
/// is well-formed for one rank still posts self-addressed sends and
/// receives (§4.I) -- `isend`/`irecv` here loop them back through an
/// in-process inbox keyed by tag rather than going unreachable. The
/// object/bulk-byte phases of the tree reducer and scan (§4.E, §4.F)
/// never run their cross-rank branch at `P=1`, so `send`/`recv`/
/// `send_bytes`/`recv_bytes` genuinely are unreachable there.
#[derive(Default)]
pub struct LocalComm {
    inbox: std::cell::RefCell<std::collections::HashMap<i32, Vec<u8>>>,
}

impl Comm for LocalComm {
    fn rank(&self) -> usize {
        0
    }

    fn procs(&self) -> usize {
        1
    }

    fn send<T: Serialize>(&self, _obj: &T, _dest: usize, _tag: i32) {
        unreachable!("LocalComm: send() called with only one rank")
    }

    fn recv<T: DeserializeOwned>(&self, _source: usize, _tag: i32) -> T {
        unreachable!("LocalComm: recv() called with only one rank")
    }

    fn isend<T: Serialize>(&self, obj: &T, dest: usize, tag: i32) -> Box<dyn SendHandle> {
        assert_eq!(dest, 0, "LocalComm: isend targeting a non-existent rank");
        self.inbox.borrow_mut().insert(tag, encode(obj));
        Box::new(LocalSend)
    }

    fn irecv<T: DeserializeOwned + 'static>(
        &self,
        source: usize,
        tag: i32,
    ) -> Box<dyn RecvHandle<T>> {
        assert_eq!(source, 0, "LocalComm: irecv sourced from a non-existent rank");
        let bytes = self
            .inbox
            .borrow_mut()
            .remove(&tag)
            .expect("LocalComm: irecv with no matching posted isend for this tag");
        Box::new(LocalRecv { bytes, _marker: std::marker::PhantomData })
    }

    fn gather<T: Serialize + DeserializeOwned>(&self, obj: &T, root: usize) -> Option<Vec<T>> {
        assert_eq!(root, 0);
        Some(vec![decode(&encode(obj))])
    }

    fn all_gather<T: Serialize + DeserializeOwned + Clone>(&self, obj: &T) -> Vec<T> {
        vec![decode(&encode(obj))]
    }

    fn all_reduce_sum_i64(&self, v: i64) -> i64 {
        v
    }

    fn bcast<T: Serialize + DeserializeOwned + Clone>(&self, obj: Option<T>, root: usize) -> T {
        assert_eq!(root, 0);
        obj.expect("bcast: root must supply a value")
    }

    fn send_bytes(&self, _buf: &[u8], _dest: usize, _tag: i32) {
        unreachable!("LocalComm: send_bytes() called with only one rank")
    }

    fn recv_bytes(&self, _buf: &mut [u8], _source: usize, _tag: i32) {
        unreachable!("LocalComm: recv_bytes() called with only one rank")
    }

    fn barrier(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_comm_reports_single_rank() {
        let ctx = Context::new(LocalComm::default());
        assert_eq!(ctx.rank(), 0);
        assert_eq!(ctx.procs(), 1);
    }

    #[test]
    fn local_comm_gather_and_bcast_roundtrip() {
        let c = LocalComm::default();
        let gathered = c.gather(&42i32, 0).unwrap();
        assert_eq!(gathered, vec![42]);
        let v = c.bcast(Some(7i32), 0);
        assert_eq!(v, 7);
        assert_eq!(c.all_reduce_sum_i64(5), 5);
    }
}
