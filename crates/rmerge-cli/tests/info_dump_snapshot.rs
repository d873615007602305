// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! Exercises the on-disk round trip `info-dump` relies on: a fleet snapshot
//! written to a file, then decoded back out of it.

use std::io::Write;

use rmerge_core::GlobalNodeInfo;

#[test]
fn fleet_snapshot_written_to_file_decodes_back_to_the_same_nodes() {
    let fleet = GlobalNodeInfo::new();
    fleet.node(1).set_host_name("node-1");
    fleet.node(1).set_sync_id(7);
    fleet.node(2).set_host_name("node-2");
    fleet.node(2).set_sync_id(9);
    let (ok, bytes) = fleet.encode();
    assert!(ok);

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&bytes).unwrap();
    file.flush().unwrap();

    let persisted = std::fs::read(file.path()).unwrap();
    let decoded = GlobalNodeInfo::new();
    decoded.decode(&persisted).unwrap();

    assert_eq!(decoded.machine_ids(), vec![1, 2]);
    assert_eq!(*decoded.node(1).host_name.lock(), "node-1");
    assert_eq!(*decoded.node(2).host_name.lock(), "node-2");
}
