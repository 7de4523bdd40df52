// Copyright (c) 2026-present, journal-log
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{
    merge::{merge_streams, output_file_path, MAX_MERGE_FILE_ENTRIES},
    LedgerControl, MergeChange, MergeWork, SortedFile,
};
use crate::{file::rewrite_atomic, Config, Error};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender},
    time::Duration,
};

enum Msg {
    Confirm { reply: Sender<()> },
    Close { reply: Sender<()> },
}

/// Handle to a running merge coordinator.
#[derive(Clone, Debug)]
pub struct CoordinatorHandle {
    tx: Sender<Msg>,
}

impl CoordinatorHandle {
    /// The ledger's callback after a staged change has been adopted.
    ///
    /// Returns as soon as the coordinator acknowledged; the displaced
    /// files are marked for deletion right after the acknowledgement.
    pub fn confirm_change(&self) -> crate::Result<()> {
        let (reply_tx, reply_rx) = channel();

        self.tx
            .send(Msg::Confirm { reply: reply_tx })
            .map_err(|_| Error::ActorGone)?;

        reply_rx.recv().map_err(|_| Error::ActorGone)
    }

    /// Stops the coordinator. A pending change is confirmed on the way
    /// out, so its displaced files still get their deletion mark.
    pub fn close(&self) -> crate::Result<()> {
        let (reply_tx, reply_rx) = channel();

        if self.tx.send(Msg::Close { reply: reply_tx }).is_err() {
            // Already gone
            return Ok(());
        }

        let _ = reply_rx.recv();
        Ok(())
    }
}

/// Spawns merge coordinators.
pub struct MergeCoordinator;

impl MergeCoordinator {
    /// Spawns a coordinator over a ledger backend.
    pub fn spawn<C: LedgerControl>(control: C, config: &Config) -> CoordinatorHandle {
        let (tx, rx) = channel();

        let rng = config
            .prng_seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);

        let runtime = Runtime {
            control,
            rx,
            rng,
            poll_interval: config.merge_poll_interval,
        };

        std::thread::spawn(move || runtime.run());

        CoordinatorHandle { tx }
    }
}

enum State<F> {
    Idle,
    ChangePending { displaced: Vec<F> },
}

struct Runtime<C: LedgerControl> {
    control: C,
    rx: Receiver<Msg>,
    rng: StdRng,
    poll_interval: Duration,
}

impl<C: LedgerControl> Runtime<C> {
    fn run(mut self) {
        let mut state: State<C::File> = State::Idle;

        loop {
            match state {
                State::Idle => match self.rx.recv_timeout(self.poll_interval) {
                    Ok(Msg::Confirm { reply }) => {
                        // Nothing staged; acknowledge and carry on
                        let _ = reply.send(());
                    }

                    Ok(Msg::Close { reply }) => {
                        let _ = reply.send(());
                        return;
                    }

                    Err(RecvTimeoutError::Timeout) => {
                        if let Some(work) = self.control.poll_work() {
                            match self.execute(&work) {
                                Ok(Some(displaced)) => {
                                    state = State::ChangePending { displaced };
                                    continue;
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    log::error!("Ledger merge failed: {e}");
                                }
                            }
                        }
                    }

                    Err(RecvTimeoutError::Disconnected) => return,
                },

                State::ChangePending { displaced } => match self.rx.recv() {
                    Ok(Msg::Confirm { reply }) => {
                        let _ = reply.send(());
                        mark_for_delete(&displaced);
                    }

                    Ok(Msg::Close { reply }) => {
                        let _ = reply.send(());
                        mark_for_delete(&displaced);
                        return;
                    }

                    Err(_) => return,
                },
            }

            state = State::Idle;
        }
    }

    /// Runs one merge. Returns the displaced files when a change was
    /// staged, `None` when there was nothing to merge after all.
    fn execute(&mut self, work: &MergeWork) -> crate::Result<Option<Vec<C::File>>> {
        let src_files = self.control.files_at_level(work.src_level);

        if src_files.is_empty() {
            return Ok(None);
        }

        let pick = self.rng.random_range(0..src_files.len());
        let src = src_files.get(pick).cloned().ok_or(Error::Unrecoverable)?;

        let target_level = work.src_level + 1;

        let overlap = self.control.overlapping_files(
            target_level,
            &src.smallest_key(),
            &src.largest_key(),
        );

        let (new_files, displaced) = if overlap.is_empty() {
            // Nothing in the way: the file sinks a level as-is
            log::debug!(
                "No overlap at level {target_level}, re-tagging source file",
            );

            let moved = self.control.retag_file(&src, target_level)?;
            (vec![moved], vec![])
        } else {
            let mut overlap_entries = Vec::new();
            for file in &overlap {
                overlap_entries.extend(file.entries()?);
            }

            let merged = merge_streams(src.entries()?, overlap_entries);

            log::debug!(
                "Merging {} entries into level {target_level} ({} overlap files)",
                merged.len(),
                overlap.len(),
            );

            let mut new_files = vec![];
            let mut counter = work.next_counter;

            for chunk in merged.chunks(MAX_MERGE_FILE_ENTRIES) {
                let path = output_file_path(&work.root_path, target_level, counter);
                new_files.push(self.control.create_file(
                    &path,
                    target_level,
                    work.target_is_basement,
                    chunk.to_vec(),
                )?);
                counter += 1;
            }

            let mut displaced = vec![src];
            displaced.extend(overlap);

            (new_files, displaced)
        };

        let change = MergeChange {
            src_level: work.src_level,
            new_files,
            displaced: displaced.clone(),
        };

        rewrite_atomic(&work.manifest_path, &self.control.manifest_bytes(&change))?;

        self.control.change_ready(change);

        Ok(Some(displaced))
    }
}

fn mark_for_delete<F: SortedFile>(displaced: &[F]) {
    for file in displaced {
        file.set_for_delete();
    }
}
