// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The connection registry.
//!
//! Every tracked connection owns two tuples, one per [`Direction`].
//! The registry indexes a connection under both, so a packet in
//! either direction finds it with a single hash lookup. Which
//! direction matched is recovered by comparing the key against the
//! connection's stored tuples; it is never stored separately.
//!
//! Connections are born as a [`NewConn`], owned by whoever is
//! handling the flow's first packet. NAT may alter its reply tuple
//! freely at that point. [`ConnRegistry::confirm`] then publishes it
//! as an immutable [`Conn`], failing if either tuple is already
//! tracked.

use super::Direction;
use super::Error;
use super::Result;
use crate::ddi::sync::KRwLock;
use crate::ddi::sync::KSpinLock;
use crate::ddi::time::Moment;
use crate::ddi::time::Ttl;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;
use crc32fast::Hasher;
use ctnat_api::ConnDump;
use ctnat_api::DumpConnsResp;
use ctnat_api::IfIndex;
use ctnat_api::Tuple;

pub const DEF_MAX_CONNS: u32 = 8192;
pub const DEF_BUCKETS: u32 = 1024;
pub const DEF_IDLE_TTL: Ttl = Ttl::new_seconds(60);

pub type ConnRef = Arc<Conn>;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ConnId(u64);

impl ConnId {
    pub fn val(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct ConnStatus: u8 {
        /// The original direction has its source rewritten.
        const SRC_NAT = 0x1;
        /// The original direction has its destination rewritten.
        const DST_NAT = 0x2;
        /// The source translation follows an egress interface.
        const MASQUERADE = 0x4;
    }
}

/// Per-connection NAT metadata.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NatMeta {
    /// The interface whose address a masqueraded connection borrows.
    pub ifindex: Option<IfIndex>,
}

/// A connection that has not been published yet.
#[derive(Clone, Debug)]
pub struct NewConn {
    tuples: [Tuple; 2],
    status: ConnStatus,
    nat: NatMeta,
    created: Moment,
}

impl NewConn {
    /// Start tracking the flow `orig`, expecting replies to mirror it.
    pub fn new(orig: Tuple, now: Moment) -> Result<Self> {
        let reply = orig.invert().ok_or(Error::NoInverse(orig))?;
        Ok(Self::with_reply(orig, reply, now))
    }

    pub fn with_reply(orig: Tuple, reply: Tuple, now: Moment) -> Self {
        Self {
            tuples: [orig, reply],
            status: ConnStatus::empty(),
            nat: NatMeta::default(),
            created: now,
        }
    }

    pub fn tuple(&self, dir: Direction) -> &Tuple {
        &self.tuples[dir.idx()]
    }

    pub fn status(&self) -> ConnStatus {
        self.status
    }

    pub fn nat_meta(&self) -> NatMeta {
        self.nat
    }

    pub(crate) fn set_reply(&mut self, reply: Tuple) {
        self.tuples[Direction::Reply.idx()] = reply;
    }

    pub(crate) fn add_status(&mut self, status: ConnStatus) {
        self.status |= status;
    }

    pub(crate) fn set_ifindex(&mut self, ifindex: IfIndex) {
        self.nat.ifindex = Some(ifindex);
    }
}

#[derive(Clone, Copy, Debug)]
struct Activity {
    hits: u64,
    last_hit: Moment,
}

/// A tracked connection.
///
/// The tuples and status are fixed at confirmation. The NAT metadata
/// and activity counters have their own spin locks so that updating
/// them never touches the registry's structural lock.
#[derive(Debug)]
pub struct Conn {
    id: ConnId,
    tuples: [Tuple; 2],
    status: ConnStatus,
    nat: KSpinLock<NatMeta>,
    proto_state: AtomicU32,
    created: Moment,
    activity: KSpinLock<Activity>,
}

impl Conn {
    fn from_new(id: ConnId, new: NewConn) -> Self {
        Self {
            id,
            tuples: new.tuples,
            status: new.status,
            nat: KSpinLock::new(new.nat),
            proto_state: AtomicU32::new(0),
            created: new.created,
            activity: KSpinLock::new(Activity {
                hits: 0,
                last_hit: new.created,
            }),
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn tuple(&self, dir: Direction) -> &Tuple {
        &self.tuples[dir.idx()]
    }

    pub fn status(&self) -> ConnStatus {
        self.status
    }

    /// Which of this connection's tuples is `tuple`, if any?
    pub fn direction_of(&self, tuple: &Tuple) -> Option<Direction> {
        if self.tuples[Direction::Original.idx()] == *tuple {
            Some(Direction::Original)
        } else if self.tuples[Direction::Reply.idx()] == *tuple {
            Some(Direction::Reply)
        } else {
            None
        }
    }

    /// Read the NAT metadata. The read is atomic with respect to any
    /// concurrent writer.
    pub fn nat_meta(&self) -> NatMeta {
        *self.nat.lock()
    }

    /// Bind (or unbind) the connection to an egress interface.
    pub fn set_ifindex(&self, ifindex: Option<IfIndex>) {
        self.nat.lock().ifindex = ifindex;
    }

    /// Opaque protocol state owned by the protocol-state collaborator.
    pub fn proto_state(&self) -> u32 {
        self.proto_state.load(Ordering::Relaxed)
    }

    pub fn set_proto_state(&self, state: u32) {
        self.proto_state.store(state, Ordering::Relaxed);
    }

    pub fn created(&self) -> Moment {
        self.created
    }

    /// Record a packet seen on this connection.
    pub fn hit(&self, now: Moment) {
        let mut act = self.activity.lock();
        act.hits += 1;
        if now > act.last_hit {
            act.last_hit = now;
        }
    }

    pub fn hits(&self) -> u64 {
        self.activity.lock().hits
    }

    pub fn last_hit(&self) -> Moment {
        self.activity.lock().last_hit
    }

    pub fn dump(&self, now: Moment) -> ConnDump {
        let act = *self.activity.lock();
        ConnDump {
            id: self.id.val(),
            original: self.tuples[Direction::Original.idx()],
            reply: self.tuples[Direction::Reply.idx()],
            snat: self.status.contains(ConnStatus::SRC_NAT),
            dnat: self.status.contains(ConnStatus::DST_NAT),
            masquerade: self.status.contains(ConnStatus::MASQUERADE),
            ifindex: self.nat_meta().ifindex,
            hits: act.hits,
            idle_ms: now.delta_as_millis(act.last_hit),
        }
    }
}

/// Answers whether a tuple already belongs to a tracked connection.
///
/// NAT uses this to probe candidate tuples. It is implemented both by
/// the registry, which takes the read lock per query, and by the
/// table itself for callers that already hold the write lock.
pub trait TupleInUse {
    fn tuple_taken(&self, tuple: &Tuple) -> bool;
}

/// The hash table proper. Only reachable through the registry's lock.
pub struct ConnTable {
    buckets: Vec<Vec<ConnRef>>,
    conns: BTreeMap<ConnId, ConnRef>,
    seed: u32,
}

impl ConnTable {
    fn new(nbuckets: u32, seed: u32) -> Self {
        let nbuckets = nbuckets.max(1).next_power_of_two() as usize;
        Self {
            buckets: (0..nbuckets).map(|_| Vec::new()).collect(),
            conns: BTreeMap::new(),
            seed,
        }
    }

    fn bucket(&self, tuple: &Tuple) -> usize {
        let mut hasher = Hasher::new_with_initial(self.seed);
        hasher.update(&tuple.to_bytes());
        hasher.finalize() as usize & (self.buckets.len() - 1)
    }

    fn find(&self, tuple: &Tuple) -> Option<(&ConnRef, Direction)> {
        let mut hits = self.buckets[self.bucket(tuple)]
            .iter()
            .filter_map(|c| c.direction_of(tuple).map(|dir| (c, dir)));
        let found = hits.next();
        debug_assert!(hits.next().is_none(), "tuple tracked twice: {tuple}");
        found
    }

    fn link(&mut self, conn: ConnRef) {
        let orig = self.bucket(conn.tuple(Direction::Original));
        let reply = self.bucket(conn.tuple(Direction::Reply));
        self.buckets[orig].push(Arc::clone(&conn));
        if reply != orig {
            self.buckets[reply].push(Arc::clone(&conn));
        }
        self.conns.insert(conn.id(), conn);
    }

    fn unlink(&mut self, conn: &Conn) -> bool {
        if self.conns.remove(&conn.id()).is_none() {
            return false;
        }

        for dir in [Direction::Original, Direction::Reply] {
            let b = self.bucket(conn.tuple(dir));
            self.buckets[b].retain(|c| c.id() != conn.id());
        }

        true
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }
}

impl TupleInUse for ConnTable {
    fn tuple_taken(&self, tuple: &Tuple) -> bool {
        self.find(tuple).is_some()
    }
}

/// Sizing for a [`ConnRegistry`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RegistryCfg {
    pub max_conns: u32,
    /// Rounded up to a power of two.
    pub buckets: u32,
}

impl Default for RegistryCfg {
    fn default() -> Self {
        Self { max_conns: DEF_MAX_CONNS, buckets: DEF_BUCKETS }
    }
}

/// The authoritative set of live connections.
///
/// Lookups take the table's read lock; anything that changes the
/// table's shape takes the write lock.
pub struct ConnRegistry {
    table: KRwLock<ConnTable>,
    next_id: AtomicU64,
    max_conns: u32,
}

impl Default for ConnRegistry {
    fn default() -> Self {
        Self::new(RegistryCfg::default())
    }
}

impl ConnRegistry {
    pub fn new(cfg: RegistryCfg) -> Self {
        Self::with_seed(cfg, rand::random())
    }

    /// Create a registry with a fixed hash seed, for reproducible
    /// bucket placement.
    pub fn with_seed(cfg: RegistryCfg, seed: u32) -> Self {
        Self {
            table: KRwLock::new(ConnTable::new(cfg.buckets, seed)),
            next_id: AtomicU64::new(1),
            max_conns: cfg.max_conns,
        }
    }

    pub fn max_conns(&self) -> u32 {
        self.max_conns
    }

    pub fn bucket_count(&self) -> usize {
        self.table.read().buckets.len()
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find the connection owning `tuple` and the direction it
    /// matched.
    pub fn lookup(&self, tuple: &Tuple) -> Option<(ConnRef, Direction)> {
        let table = self.table.read();
        table.find(tuple).map(|(c, dir)| (Arc::clone(c), dir))
    }

    /// Track a connection with the given tuples.
    pub fn insert(&self, orig: Tuple, reply: Tuple) -> Result<ConnRef> {
        self.confirm(NewConn::with_reply(orig, reply, Moment::now()))
    }

    /// Publish `new`.
    ///
    /// # Errors
    ///
    /// If either tuple is already tracked, [`Error::DuplicateTuple`]
    /// is returned and the table is unchanged. The caller should look
    /// the flow up again. If the table is full,
    /// [`Error::MaxCapacity`] is returned.
    pub fn confirm(&self, new: NewConn) -> Result<ConnRef> {
        let mut table = self.table.write();
        self.confirm_locked(&mut table, new)
    }

    /// Create and publish a connection for `orig` in one write-side
    /// critical section.
    ///
    /// `setup` receives the unconfirmed connection plus a view of the
    /// table for probing candidate tuples. Because the lock is held
    /// throughout, a tuple `setup` found unused is still unused when
    /// the connection is linked.
    pub fn create_with<F>(
        &self,
        orig: Tuple,
        now: Moment,
        setup: F,
    ) -> Result<ConnRef>
    where
        F: FnOnce(&mut NewConn, &dyn TupleInUse) -> Result<()>,
    {
        let mut table = self.table.write();
        if table.find(&orig).is_some() {
            return Err(Error::DuplicateTuple(orig));
        }

        let mut new = NewConn::new(orig, now)?;
        setup(&mut new, &*table)?;
        self.confirm_locked(&mut table, new)
    }

    fn confirm_locked(
        &self,
        table: &mut ConnTable,
        new: NewConn,
    ) -> Result<ConnRef> {
        for tuple in &new.tuples {
            if table.find(tuple).is_some() {
                return Err(Error::DuplicateTuple(*tuple));
            }
        }

        if table.len() >= self.max_conns as usize {
            return Err(Error::MaxCapacity(u64::from(self.max_conns)));
        }

        let id = ConnId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let conn = Arc::new(Conn::from_new(id, new));
        table.link(Arc::clone(&conn));
        Ok(conn)
    }

    /// Unlink `conn` from both of its tuples. Returns `false` if it was
    /// not tracked.
    pub fn remove(&self, conn: &Conn) -> bool {
        self.table.write().unlink(conn)
    }

    /// Remove every connection matching `pred`, returning how many
    /// were removed.
    ///
    /// The scan takes the write lock one bucket at a time. Every
    /// matching connection in a bucket is unlinked from both of its
    /// tuples before the lock is dropped, so a lookup never observes
    /// a half-removed connection. A connection created after its
    /// buckets were scanned is not considered.
    pub fn evict_where<F>(&self, pred: F) -> usize
    where
        F: Fn(&Conn) -> bool,
    {
        let nbuckets = self.bucket_count();
        let mut evicted = 0;

        for b in 0..nbuckets {
            let mut table = self.table.write();
            let victims: Vec<ConnRef> =
                table.buckets[b].iter().filter(|c| pred(c)).cloned().collect();
            for conn in victims {
                if table.unlink(&conn) {
                    evicted += 1;
                }
            }
        }

        evicted
    }

    /// Remove every connection idle for at least `ttl`.
    pub fn expire_idle(&self, now: Moment, ttl: Ttl) -> usize {
        let mut table = self.table.write();
        let expired: Vec<ConnRef> = table
            .conns
            .values()
            .filter(|c| ttl.is_expired(c.last_hit(), now))
            .cloned()
            .collect();

        for conn in &expired {
            table.unlink(conn);
        }

        expired.len()
    }

    /// Snapshot every connection, for diagnostics.
    pub fn dump(&self, now: Moment) -> DumpConnsResp {
        let table = self.table.read();
        DumpConnsResp {
            conns: table.conns.values().map(|c| c.dump(now)).collect(),
        }
    }
}

impl TupleInUse for ConnRegistry {
    fn tuple_taken(&self, tuple: &Tuple) -> bool {
        self.table.read().find(tuple).is_some()
    }
}
