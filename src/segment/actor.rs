// Copyright (c) 2026-present, journal-log
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The per-segment actor.
//!
//! Every segment file is owned by exactly one thread; all external access
//! goes through a [`SegmentHandle`] and is serialized by the thread's
//! mailbox. The actor carries the two lifecycle phases the bare
//! [`SegmentFile`] cannot: `rolling` (the hash region is being computed
//! by a helper thread while reads keep being served from the in-memory
//! index) and `delete_pending` (the file is retired and the actor polls
//! the inker for permission to remove it).

use super::{
    file::{KeyPresence, ScanControl, SegmentFile},
    index::build_hash_region,
    FetchMode, FetchedRecord, Position, SegmentState, SegmentWriteOutcome,
};
use crate::{Config, Error, InkerClient, JournalKey, SeqNo};
use rand::{rngs::StdRng, SeedableRng};
use std::{
    path::{Path, PathBuf},
    sync::{
        mpsc::{channel, Receiver, RecvTimeoutError, Sender},
        Arc,
    },
    time::Duration,
};

/// Close attempts made while a roll is pending, one per millisecond,
/// before escalating to a kill
const PENDING_ROLL_WAIT: u32 = 30;

/// A point-in-time description of a segment.
#[derive(Clone, Debug)]
pub struct SegmentStatus {
    /// Lifecycle state
    pub state: SegmentState,

    /// Current path of the backing file
    pub path: PathBuf,

    /// Sequence number of the first record
    pub low_sqn: Option<SeqNo>,

    /// Key of the last record
    pub last_key: Option<JournalKey>,
}

/// Acknowledgement of a close request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum CloseAck {
    Closed,
    RollPending,
}

type ScanFilter = Box<dyn FnMut(JournalKey, Vec<u8>, u64) -> ScanControl + Send>;

enum Request {
    Put {
        key: JournalKey,
        value: Vec<u8>,
        reply: Sender<crate::Result<SegmentWriteOutcome>>,
    },
    MPut {
        batch: Vec<(JournalKey, Vec<u8>)>,
        reply: Sender<crate::Result<SegmentWriteOutcome>>,
    },
    Get {
        key: JournalKey,
        reply: Sender<crate::Result<Option<(JournalKey, Vec<u8>)>>>,
    },
    KeyCheck {
        key: JournalKey,
        loose: bool,
        reply: Sender<crate::Result<KeyPresence>>,
    },
    GetPositions {
        sample: Option<usize>,
        reply: Sender<crate::Result<Vec<Position>>>,
    },
    DirectFetch {
        positions: Vec<Position>,
        mode: FetchMode,
        reply: Sender<crate::Result<Vec<FetchedRecord>>>,
    },
    Scan {
        start: Option<u64>,
        filter: ScanFilter,
        reply: Sender<crate::Result<u64>>,
    },
    Complete {
        reply: Sender<crate::Result<()>>,
    },
    Roll {
        reply: Sender<crate::Result<()>>,
    },
    DeletePending {
        man_sqn: SeqNo,
        inker: Arc<dyn InkerClient>,
    },
    Status {
        reply: Sender<SegmentStatus>,
    },
    Close {
        reply: Sender<CloseAck>,
    },
    Kill,
}

/// Hash region bytes plus top index bytes, as computed by the roll helper
type RollResult = (Vec<u8>, Vec<u8>);

enum ActorState {
    Writer(SegmentFile),
    Rolling {
        file: SegmentFile,
        deferred_delete: Option<(SeqNo, Arc<dyn InkerClient>)>,
        helper: Receiver<RollResult>,
    },
    Reader(SegmentFile),
    DeletePending {
        file: SegmentFile,
        man_sqn: SeqNo,
        inker: Arc<dyn InkerClient>,
    },
}

impl ActorState {
    fn state(&self) -> SegmentState {
        match self {
            Self::Writer(_) => SegmentState::Writer,
            Self::Rolling { .. } => SegmentState::Rolling,
            Self::Reader(_) => SegmentState::Reader,
            Self::DeletePending { .. } => SegmentState::DeletePending,
        }
    }

    fn file(&self) -> &SegmentFile {
        match self {
            Self::Writer(file) | Self::Reader(file) => file,
            Self::Rolling { file, .. } | Self::DeletePending { file, .. } => file,
        }
    }
}

/// Handle to a segment actor.
///
/// Cloneable; all clones talk to the same mailbox. Operations turn into
/// [`Error::ActorGone`] once the actor thread has stopped.
#[derive(Clone, Debug)]
pub struct SegmentHandle {
    tx: Sender<Request>,
}

impl SegmentHandle {
    fn call<T>(&self, build: impl FnOnce(Sender<T>) -> Request) -> crate::Result<T> {
        let (reply_tx, reply_rx) = channel();

        self.tx
            .send(build(reply_tx))
            .map_err(|_| Error::ActorGone)?;

        reply_rx.recv().map_err(|_| Error::ActorGone)
    }

    /// Appends one record. See [`SegmentFile::put`].
    pub fn put(&self, key: JournalKey, value: Vec<u8>) -> crate::Result<SegmentWriteOutcome> {
        self.call(|reply| Request::Put { key, value, reply })?
    }

    /// Appends a batch in one physical write. See [`SegmentFile::mput`].
    pub fn mput(&self, batch: Vec<(JournalKey, Vec<u8>)>) -> crate::Result<SegmentWriteOutcome> {
        self.call(|reply| Request::MPut { batch, reply })?
    }

    /// Looks up a key. Served in every state, from the in-memory index
    /// while the segment is writable or rolling.
    pub fn get(&self, key: JournalKey) -> crate::Result<Option<(JournalKey, Vec<u8>)>> {
        self.call(|reply| Request::Get { key, reply })?
    }

    /// Probes for a key. See [`SegmentFile::key_check`].
    pub fn key_check(&self, key: JournalKey, loose: bool) -> crate::Result<KeyPresence> {
        self.call(|reply| Request::KeyCheck { key, loose, reply })?
    }

    /// Returns record positions. See [`SegmentFile::get_positions`].
    pub fn get_positions(&self, sample: Option<usize>) -> crate::Result<Vec<Position>> {
        self.call(|reply| Request::GetPositions { sample, reply })?
    }

    /// Reads records at the given positions. See
    /// [`SegmentFile::direct_fetch`].
    pub fn direct_fetch(
        &self,
        positions: Vec<Position>,
        mode: FetchMode,
    ) -> crate::Result<Vec<FetchedRecord>> {
        self.call(|reply| Request::DirectFetch {
            positions,
            mode,
            reply,
        })?
    }

    /// Folds over the record region; the closure steers and accumulates
    /// through its captures. Returns the position the scan ended at.
    pub fn scan(
        &self,
        start: Option<u64>,
        filter: impl FnMut(JournalKey, Vec<u8>, u64) -> ScanControl + Send + 'static,
    ) -> crate::Result<u64> {
        self.call(|reply| Request::Scan {
            start,
            filter: Box::new(filter),
            reply,
        })?
    }

    /// Seals the segment inline, on the actor thread.
    pub fn complete(&self) -> crate::Result<()> {
        self.call(|reply| Request::Complete { reply })?
    }

    /// Requests a roll: the hash region is computed on a helper thread
    /// and the segment keeps serving reads meanwhile. Returns as soon as
    /// the roll is underway.
    pub fn roll(&self) -> crate::Result<()> {
        self.call(|reply| Request::Roll { reply })?
    }

    /// Retires the segment: records the manifest sequence number and the
    /// inker to poll, then lets the actor delete the file once the inker
    /// confirms. Deferred if a roll is still in flight.
    pub fn delete_pending(&self, man_sqn: SeqNo, inker: Arc<dyn InkerClient>) -> crate::Result<()> {
        self.tx
            .send(Request::DeletePending { man_sqn, inker })
            .map_err(|_| Error::ActorGone)
    }

    /// Returns the segment's current status.
    pub fn status(&self) -> crate::Result<SegmentStatus> {
        self.call(|reply| Request::Status { reply })
    }

    /// Closes the segment and stops the actor.
    ///
    /// While a roll is pending the close is retried once per millisecond,
    /// thirty times; if the helper still has not delivered by then, the
    /// actor is killed instead.
    pub fn close(&self) -> crate::Result<()> {
        for _ in 0..PENDING_ROLL_WAIT {
            match self.call(|reply| Request::Close { reply }) {
                Ok(CloseAck::Closed) | Err(Error::ActorGone) => return Ok(()),
                Ok(CloseAck::RollPending) => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e),
            }
        }

        log::warn!("Roll still pending after close retries; killing segment");
        self.kill();
        Ok(())
    }

    /// Stops the actor unconditionally, abandoning any pending roll. The
    /// file is left on disk as-is.
    pub fn kill(&self) {
        let _ = self.tx.send(Request::Kill);
    }
}

/// Spawns segment actors.
pub struct SegmentActor;

impl SegmentActor {
    /// Opens (or creates) a writable segment and spawns its actor.
    pub fn spawn_writer<P: AsRef<Path>>(path: P, config: &Config) -> crate::Result<SegmentHandle> {
        let file = SegmentFile::open_writer(path, config)?;
        Ok(Self::spawn(ActorState::Writer(file), config))
    }

    /// Opens a sealed segment and spawns its actor.
    pub fn spawn_reader<P: AsRef<Path>>(path: P, config: &Config) -> crate::Result<SegmentHandle> {
        let file = SegmentFile::open_reader(path)?;
        Ok(Self::spawn(ActorState::Reader(file), config))
    }

    /// Wraps an already-open segment file in an actor.
    #[must_use]
    pub fn adopt(file: SegmentFile, config: &Config) -> SegmentHandle {
        let state = match file.state() {
            SegmentState::Reader => ActorState::Reader(file),
            _ => ActorState::Writer(file),
        };

        Self::spawn(state, config)
    }

    fn spawn(state: ActorState, config: &Config) -> SegmentHandle {
        let (tx, rx) = channel();

        let rng = config.prng_seed.map_or_else(StdRng::from_os_rng, |seed| {
            // Decorrelate per-file sampling under a fixed seed
            StdRng::seed_from_u64(seed ^ path_fingerprint(state.file().path()))
        });

        let runtime = ActorRuntime {
            state: Some(state),
            rx,
            rng,
            delete_timeout: config.delete_timeout,
            waste_folder: config.use_waste_folder.then(|| config.waste_path()),
        };

        std::thread::spawn(move || runtime.run());

        SegmentHandle { tx }
    }
}

fn path_fingerprint(path: &Path) -> u64 {
    // FNV-1a over the path, for seed decorrelation only
    path.to_string_lossy()
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
            (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
        })
}

/// Mailbox poll interval while a roll helper is outstanding
const ROLL_POLL: Duration = Duration::from_millis(1);

struct ActorRuntime {
    state: Option<ActorState>,
    rx: Receiver<Request>,
    rng: StdRng,
    delete_timeout: Duration,
    waste_folder: Option<PathBuf>,
}

impl ActorRuntime {
    fn run(mut self) {
        loop {
            match &self.state {
                // The helper owns the hash region computation; keep
                // serving the mailbox while waiting for it
                Some(ActorState::Rolling { .. }) => {
                    if !self.try_finish_roll() {
                        return;
                    }

                    if matches!(self.state, Some(ActorState::Rolling { .. })) {
                        match self.rx.recv_timeout(ROLL_POLL) {
                            Ok(request) => {
                                if !self.handle(request) {
                                    return;
                                }
                            }
                            Err(RecvTimeoutError::Timeout) => {}
                            Err(RecvTimeoutError::Disconnected) => return,
                        }
                    }
                }

                Some(ActorState::DeletePending { .. }) => {
                    match self.rx.recv_timeout(self.delete_timeout) {
                        Ok(request) => {
                            if !self.handle(request) {
                                return;
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            if self.poll_delete() {
                                return;
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => return,
                    }
                }

                _ => match self.rx.recv() {
                    Ok(request) => {
                        if !self.handle(request) {
                            return;
                        }
                    }
                    Err(_) => return,
                },
            }
        }
    }

    /// Checks whether the roll helper has delivered; applies the hash
    /// region if so. Returns `false` when the helper died and the actor
    /// cannot continue.
    fn try_finish_roll(&mut self) -> bool {
        let Some(ActorState::Rolling { helper, .. }) = &self.state else {
            return true;
        };

        match helper.try_recv() {
            Ok((region, top)) => {
                self.finish_roll(&region, &top);
                true
            }

            Err(std::sync::mpsc::TryRecvError::Empty) => true,

            Err(std::sync::mpsc::TryRecvError::Disconnected) => {
                log::error!("Roll helper died before delivering the hash region");
                false
            }
        }
    }

    /// Polls the inker for delete permission. Returns `true` when the
    /// actor should stop.
    fn poll_delete(&mut self) -> bool {
        let (man_sqn, verdict) = match &self.state {
            Some(ActorState::DeletePending { man_sqn, inker, .. }) => {
                (*man_sqn, inker.confirm_delete(*man_sqn))
            }
            _ => return false,
        };

        match verdict {
            Some(true) => {
                let Some(ActorState::DeletePending { file, .. }) = self.state.take() else {
                    return true;
                };

                log::debug!("Delete confirmed at manifest {man_sqn}, removing segment");

                if let Err(e) = file.delete(self.waste_folder.as_deref()) {
                    log::error!("Could not delete retired segment: {e}");
                }

                true
            }

            Some(false) => false,

            // The inker is gone; nobody can confirm anymore
            None => {
                log::debug!("Inker gone while delete-pending, stopping silently");
                true
            }
        }
    }

    /// Handles one request. Returns `false` when the actor should stop.
    #[allow(clippy::too_many_lines)]
    fn handle(&mut self, request: Request) -> bool {
        let Some(state) = &mut self.state else {
            return false;
        };

        match request {
            Request::Put { key, value, reply } => {
                let result = match state {
                    ActorState::Writer(file) => file.put(&key, &value),
                    other => Err(Error::WrongState {
                        op: "put",
                        state: other.state(),
                    }),
                };

                // A failed write leaves the file in an unknown state;
                // the supervisor decides whether to respawn
                let fatal = matches!(result, Err(Error::Io(_)));
                let _ = reply.send(result);

                if fatal {
                    log::error!("Append failed, terminating segment actor");
                    return false;
                }
            }

            Request::MPut { batch, reply } => {
                let result = match state {
                    ActorState::Writer(file) => file.mput(&batch),
                    other => Err(Error::WrongState {
                        op: "mput",
                        state: other.state(),
                    }),
                };

                let fatal = matches!(result, Err(Error::Io(_)));
                let _ = reply.send(result);

                if fatal {
                    log::error!("Append failed, terminating segment actor");
                    return false;
                }
            }

            Request::Get { key, reply } => {
                let _ = reply.send(state.file().get(&key));
            }

            Request::KeyCheck { key, loose, reply } => {
                let _ = reply.send(state.file().key_check(&key, loose));
            }

            Request::GetPositions { sample, reply } => {
                let result = state.file().get_positions(sample, &mut self.rng);
                let _ = reply.send(result);
            }

            Request::DirectFetch {
                positions,
                mode,
                reply,
            } => {
                let _ = reply.send(state.file().direct_fetch(&positions, mode));
            }

            Request::Scan {
                start,
                mut filter,
                reply,
            } => {
                let result = state
                    .file()
                    .scan(
                        start,
                        |key, value, pos, ()| (filter(key, value, pos), ()),
                        (),
                    )
                    .map(|(end, ())| end);
                let _ = reply.send(result);
            }

            Request::Complete { reply } => {
                let result = self.seal_inline();
                let _ = reply.send(result);
            }

            Request::Roll { reply } => {
                let result = self.start_roll();
                let _ = reply.send(result);
            }

            Request::DeletePending { man_sqn, inker } => match self.state.take() {
                Some(ActorState::Reader(file)) => {
                    log::debug!(
                        "Segment {} retired at manifest {man_sqn}",
                        file.path().display(),
                    );
                    self.state = Some(ActorState::DeletePending {
                        file,
                        man_sqn,
                        inker,
                    });
                }

                // A roll is in flight; retire once it lands
                Some(ActorState::Rolling { file, helper, .. }) => {
                    self.state = Some(ActorState::Rolling {
                        file,
                        deferred_delete: Some((man_sqn, inker)),
                        helper,
                    });
                }

                other => self.state = other,
            },

            Request::Status { reply } => {
                let file = state.file();
                let _ = reply.send(SegmentStatus {
                    state: state.state(),
                    path: file.path().into(),
                    low_sqn: file.low_sqn(),
                    last_key: file.last_key().cloned(),
                });
            }

            Request::Close { reply } => {
                if matches!(state, ActorState::Rolling { .. }) {
                    let _ = reply.send(CloseAck::RollPending);
                } else {
                    let _ = reply.send(CloseAck::Closed);
                    return false;
                }
            }

            Request::Kill => return false,
        }

        true
    }

    fn seal_inline(&mut self) -> crate::Result<()> {
        match self.state.take() {
            Some(ActorState::Writer(file)) => match file.complete() {
                Ok(sealed) => {
                    self.state = Some(ActorState::Reader(sealed));
                    Ok(())
                }
                Err(e) => Err(e),
            },

            other => {
                let state = other.as_ref().map_or(SegmentState::Starting, ActorState::state);
                self.state = other;
                Err(Error::WrongState {
                    op: "complete",
                    state,
                })
            }
        }
    }

    fn start_roll(&mut self) -> crate::Result<()> {
        match self.state.take() {
            Some(ActorState::Writer(file)) => {
                let (index, cursor) = file.index_snapshot()?;
                let (result_tx, result_rx) = channel();

                // The heavy serialization happens off this thread so reads
                // keep flowing while the segment is rolling
                std::thread::spawn(move || {
                    let _ = result_tx.send(build_hash_region(&index, cursor));
                });

                self.state = Some(ActorState::Rolling {
                    file,
                    deferred_delete: None,
                    helper: result_rx,
                });

                Ok(())
            }

            other => {
                let state = other.as_ref().map_or(SegmentState::Starting, ActorState::state);
                self.state = other;
                Err(Error::WrongState { op: "roll", state })
            }
        }
    }

    fn finish_roll(&mut self, region: &[u8], top: &[u8]) {
        match self.state.take() {
            Some(ActorState::Rolling {
                file,
                deferred_delete,
                ..
            }) => match file.apply_hash_region(region, top) {
                Ok(sealed) => {
                    self.state = Some(match deferred_delete {
                        Some((man_sqn, inker)) => ActorState::DeletePending {
                            file: sealed,
                            man_sqn,
                            inker,
                        },
                        None => ActorState::Reader(sealed),
                    });
                }
                Err(e) => {
                    log::error!("Sealing rolled segment failed: {e}");
                }
            },

            other => self.state = other,
        }
    }
}
