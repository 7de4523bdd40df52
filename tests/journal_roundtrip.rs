// Copyright (c) 2026-present, journal-log
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use journal_log::{
    segment::{SegmentActor, SegmentState, SegmentWriteOutcome},
    Config, JournalKey, Kind,
};
use std::time::Duration;
use test_log::test;

fn key(sqn: u64, name: &str) -> JournalKey {
    JournalKey::new(sqn, Kind::Standard, name.as_bytes().to_vec())
}

#[test]
fn journal_head_rolls_into_next_segment() -> journal_log::Result<()> {
    let folder = tempfile::tempdir()?;

    let config = Config::new(folder.path())
        .max_file_size(4_096)
        .prng_seed(1);

    let head = SegmentActor::spawn_writer(folder.path().join("journal_1.pnd"), &config)?;

    // Fill the head until it asks for a roll
    let mut sqn = 1u64;
    let value = vec![7u8; 256];

    let rolled_at = loop {
        match head.put(key(sqn, &format!("obj{sqn}")), value.clone())? {
            SegmentWriteOutcome::Ok(_) => sqn += 1,
            SegmentWriteOutcome::Roll => break sqn,
        }
    };

    assert!(rolled_at > 1, "cap should admit at least one record");

    // Seal the full head in the background and open the next one, the
    // way the journal head advances
    head.roll()?;

    let next = SegmentActor::spawn_writer(
        folder.path().join(format!("journal_{rolled_at}.pnd")),
        &config,
    )?;

    assert!(matches!(
        next.put(key(rolled_at, "spillover"), value)?,
        SegmentWriteOutcome::Ok(_),
    ));

    // The rolled segment seals on its own and keeps answering reads
    for _ in 0..500 {
        if head.status()?.state == SegmentState::Reader {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(SegmentState::Reader, head.status()?.state);

    for probe in 1..rolled_at {
        assert!(
            head.get(key(probe, &format!("obj{probe}")))?.is_some(),
            "record {probe} lost across the roll",
        );
    }

    head.close()?;
    next.close()?;

    Ok(())
}

#[test]
fn sealed_segment_survives_reopen() -> journal_log::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = Config::new(folder.path()).prng_seed(1);

    let head = SegmentActor::spawn_writer(folder.path().join("journal_1.pnd"), &config)?;

    let batch: Vec<(JournalKey, Vec<u8>)> = (1..=32)
        .map(|sqn| (key(sqn, &format!("obj{sqn}")), format!("val{sqn}").into_bytes()))
        .collect();

    head.mput(batch.clone())?;
    head.complete()?;

    let sealed_path = head.status()?.path;
    head.close()?;

    // A fresh process would re-open the .cdb by path
    let reader = SegmentActor::spawn_reader(&sealed_path, &config)?;

    let status = reader.status()?;
    assert_eq!(Some(1), status.low_sqn);
    assert_eq!(Some(batch[31].0.clone()), status.last_key);

    for (k, v) in batch {
        let (_, value) = reader.get(k)?.expect("record survives reopen");
        assert_eq!(v, value);
    }

    reader.close()?;
    Ok(())
}
