// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! Merge-action tracker and the merge-sequence variable-length binary codec
//! (§4.6). Records the merge node's exact decode/merge actions so that MCRT
//! nodes can replay them locally off the feedback channel.

/// One tagged event in the merge-sequence alphabet (§3 "Merge-action record").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeSequenceEvent {
    DecodeSingle(u32),
    DecodeRange(u32, u32),
    MergeTileSingle(u32),
    MergeTileRange(u32, u32),
    MergeAllTiles,
    Eod,
}

mod tag {
    pub const DECODE_SINGLE: u8 = 0;
    pub const DECODE_RANGE: u8 = 1;
    pub const MERGE_TILE_SINGLE: u8 = 2;
    pub const MERGE_TILE_RANGE: u8 = 3;
    pub const MERGE_ALL_TILES: u8 = 4;
    pub const EOD: u8 = 5;
}

/// Append a 7-bit-continuation variable-length unsigned integer to `out`.
fn write_varint(out: &mut Vec<u8>, mut v: u32) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

/// Read one variable-length unsigned integer from `input[*pos..]`, advancing `*pos`.
fn read_varint(input: &[u8], pos: &mut usize) -> Option<u32> {
    let mut result: u32 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *input.get(*pos)?;
        *pos += 1;
        result |= u32::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
        if shift >= 32 {
            return None;
        }
    }
}

/// Append-only encoder for a merge-sequence byte stream.
#[derive(Debug, Default, Clone)]
pub struct MergeSequenceEnqueue {
    buf: Vec<u8>,
}

impl MergeSequenceEnqueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: MergeSequenceEvent) {
        match event {
            MergeSequenceEvent::DecodeSingle(id) => {
                self.buf.push(tag::DECODE_SINGLE);
                write_varint(&mut self.buf, id);
            }
            MergeSequenceEvent::DecodeRange(start, end) => {
                self.buf.push(tag::DECODE_RANGE);
                write_varint(&mut self.buf, start);
                write_varint(&mut self.buf, end);
            }
            MergeSequenceEvent::MergeTileSingle(tile) => {
                self.buf.push(tag::MERGE_TILE_SINGLE);
                write_varint(&mut self.buf, tile);
            }
            MergeSequenceEvent::MergeTileRange(start, end) => {
                self.buf.push(tag::MERGE_TILE_RANGE);
                write_varint(&mut self.buf, start);
                write_varint(&mut self.buf, end);
            }
            MergeSequenceEvent::MergeAllTiles => self.buf.push(tag::MERGE_ALL_TILES),
            MergeSequenceEvent::Eod => self.buf.push(tag::EOD),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Visitor callbacks for [`MergeSequenceDequeue::decode_loop`]. Returning
/// `false` from any callback vetoes further decoding (matches the source's
/// "until EOD or a visitor vetoes" contract).
pub trait MergeSequenceVisitor {
    fn on_decode_single(&mut self, id: u32) -> bool {
        let _ = id;
        true
    }
    fn on_decode_range(&mut self, start: u32, end: u32) -> bool {
        let _ = (start, end);
        true
    }
    fn on_merge_tile_single(&mut self, tile: u32) -> bool {
        let _ = tile;
        true
    }
    fn on_merge_tile_range(&mut self, start: u32, end: u32) -> bool {
        let _ = (start, end);
        true
    }
    fn on_merge_all_tiles(&mut self) -> bool {
        true
    }
    fn on_eod(&mut self) -> bool {
        true
    }
}

/// Collects every decoded event into a `Vec`, for tests and for dumping a
/// replayed sequence (the `infoRecDump`/`decodeMergeActionTrackerAndDump`
/// use case).
#[derive(Debug, Default)]
pub struct CollectingVisitor {
    pub events: Vec<MergeSequenceEvent>,
}

impl MergeSequenceVisitor for CollectingVisitor {
    fn on_decode_single(&mut self, id: u32) -> bool {
        self.events.push(MergeSequenceEvent::DecodeSingle(id));
        true
    }
    fn on_decode_range(&mut self, start: u32, end: u32) -> bool {
        self.events.push(MergeSequenceEvent::DecodeRange(start, end));
        true
    }
    fn on_merge_tile_single(&mut self, tile: u32) -> bool {
        self.events.push(MergeSequenceEvent::MergeTileSingle(tile));
        true
    }
    fn on_merge_tile_range(&mut self, start: u32, end: u32) -> bool {
        self.events.push(MergeSequenceEvent::MergeTileRange(start, end));
        true
    }
    fn on_merge_all_tiles(&mut self) -> bool {
        self.events.push(MergeSequenceEvent::MergeAllTiles);
        true
    }
    fn on_eod(&mut self) -> bool {
        self.events.push(MergeSequenceEvent::Eod);
        true
    }
}

/// Decoder over an in-memory merge-sequence byte slice.
pub struct MergeSequenceDequeue<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> MergeSequenceDequeue<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Dispatch events to `visitor` in order until `EOD`, end of input, or a
    /// visitor callback returns `false`.
    pub fn decode_loop(&mut self, visitor: &mut dyn MergeSequenceVisitor) {
        loop {
            let Some(&raw_tag) = self.input.get(self.pos) else { return };
            self.pos += 1;
            let keep_going = match raw_tag {
                tag::DECODE_SINGLE => match read_varint(self.input, &mut self.pos) {
                    Some(id) => visitor.on_decode_single(id),
                    None => return,
                },
                tag::DECODE_RANGE => {
                    let (Some(start), Some(end)) =
                        (read_varint(self.input, &mut self.pos), read_varint(self.input, &mut self.pos))
                    else {
                        return;
                    };
                    visitor.on_decode_range(start, end)
                }
                tag::MERGE_TILE_SINGLE => match read_varint(self.input, &mut self.pos) {
                    Some(tile) => visitor.on_merge_tile_single(tile),
                    None => return,
                },
                tag::MERGE_TILE_RANGE => {
                    let (Some(start), Some(end)) =
                        (read_varint(self.input, &mut self.pos), read_varint(self.input, &mut self.pos))
                    else {
                        return;
                    };
                    visitor.on_merge_tile_range(start, end)
                }
                tag::MERGE_ALL_TILES => visitor.on_merge_all_tiles(),
                tag::EOD => {
                    visitor.on_eod();
                    return;
                }
                _ => return,
            };
            if !keep_going {
                return;
            }
        }
    }
}

/// Find maximal runs of consecutive (`+1`) values in a sorted slice, emitting
/// a `(start, end)` inclusive span per run. Shared by `decode_all` (over ids)
/// and `merge_partial` (over `true` bitmap indices).
fn run_length_spans(values: &[u32]) -> Vec<(u32, u32)> {
    let mut spans = Vec::new();
    let mut iter = values.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end = iter.next().unwrap();
        }
        spans.push((start, end));
    }
    spans
}

/// Records and replays the merge operation stream for one producer (§4.6).
#[derive(Debug, Default)]
pub struct MergeActionTracker {
    enq: MergeSequenceEnqueue,
    pub last_send_action_id: Option<u32>,
    pub last_partial_merge_tile_id: u32,
}

impl MergeActionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the pending buffer and start a fresh encode cycle.
    pub fn reset_encode(&mut self) {
        self.enq.clear();
    }

    /// Translate a batch of consumed send-action ids into `decodeSingle`/
    /// `decodeRange` events, collapsing maximal `+1` runs.
    pub fn decode_all(&mut self, ids: &[u32]) {
        if ids.is_empty() {
            return;
        }
        if ids.len() == 1 {
            self.enq.push(MergeSequenceEvent::DecodeSingle(ids[0]));
            self.last_send_action_id = Some(ids[0]);
            return;
        }
        for (start, end) in run_length_spans(ids) {
            if start == end {
                self.enq.push(MergeSequenceEvent::DecodeSingle(start));
            } else {
                self.enq.push(MergeSequenceEvent::DecodeRange(start, end));
            }
            self.last_send_action_id = Some(end);
        }
    }

    /// Record a full-frame merge.
    pub fn merge_full(&mut self) {
        self.enq.push(MergeSequenceEvent::MergeAllTiles);
        self.last_partial_merge_tile_id = 0;
    }

    /// Record a partial-tile merge described by a per-tile activation bitmap.
    pub fn merge_partial(&mut self, tile_bitmap: &[bool]) {
        let active: Vec<u32> = tile_bitmap
            .iter()
            .enumerate()
            .filter_map(|(i, &set)| set.then_some(i as u32))
            .collect();
        if active.is_empty() {
            return;
        }
        for (start, end) in run_length_spans(&active) {
            if start == end {
                self.enq.push(MergeSequenceEvent::MergeTileSingle(start));
            } else {
                self.enq.push(MergeSequenceEvent::MergeTileRange(start, end));
            }
            self.last_partial_merge_tile_id = end;
        }
    }

    /// Append `EOD`, return the length-prefixed payload, then reset the encoder.
    pub fn encode_data(&mut self) -> Vec<u8> {
        self.enq.push(MergeSequenceEvent::Eod);
        let payload = self.enq.as_bytes().to_vec();
        let mut out = Vec::with_capacity(payload.len() + 4);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&payload);
        self.reset_encode();
        out
    }

    /// Skip a length-prefixed payload without decoding it.
    pub fn decode_data_skip(input: &[u8]) -> Option<usize> {
        let size = u32::from_le_bytes(input.get(0..4)?.try_into().ok()?) as usize;
        Some(4 + size)
    }

    /// Read a length-prefixed payload and return the raw bytes for later replay.
    pub fn decode_data_capture(input: &[u8]) -> Option<(&[u8], usize)> {
        let size = u32::from_le_bytes(input.get(0..4)?.try_into().ok()?) as usize;
        let payload = input.get(4..4 + size)?;
        Some((payload, 4 + size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_arbitrary_sequence() {
        // S1: literal op stream from spec.md section 8.
        let events = [
            MergeSequenceEvent::DecodeSingle(10),
            MergeSequenceEvent::MergeAllTiles,
            MergeSequenceEvent::DecodeSingle(11),
            MergeSequenceEvent::MergeTileRange(123, 234),
            MergeSequenceEvent::DecodeRange(12, 21),
            MergeSequenceEvent::MergeTileSingle(235),
            MergeSequenceEvent::MergeTileRange(236, 456),
            MergeSequenceEvent::DecodeSingle(22),
            MergeSequenceEvent::MergeAllTiles,
            MergeSequenceEvent::Eod,
        ];
        let mut enq = MergeSequenceEnqueue::new();
        for e in events {
            enq.push(e);
        }
        let bytes = enq.into_bytes();
        let mut deq = MergeSequenceDequeue::new(&bytes);
        let mut visitor = CollectingVisitor::default();
        deq.decode_loop(&mut visitor);
        assert_eq!(visitor.events, events);
    }

    #[test]
    fn contiguous_ids_collapse_to_one_range() {
        let mut tracker = MergeActionTracker::new();
        let ids: Vec<u32> = (100..120).collect();
        tracker.decode_all(&ids);
        let bytes = tracker.encode_data();
        let (payload, _) = MergeActionTracker::decode_data_capture(&bytes).unwrap();
        let mut deq = MergeSequenceDequeue::new(payload);
        let mut visitor = CollectingVisitor::default();
        deq.decode_loop(&mut visitor);
        assert_eq!(
            visitor.events,
            vec![MergeSequenceEvent::DecodeRange(100, 119), MergeSequenceEvent::Eod]
        );
    }

    #[test]
    fn s2_scenario_collapses_as_expected() {
        // S2 from spec.md section 8.
        let mut tracker = MergeActionTracker::new();
        tracker.decode_all(&[12, 13, 15, 16, 17]);
        tracker.merge_full();
        let bitmap = [
            true, true, false, false, false, true, false, false, true, true, true, false,
        ];
        tracker.merge_partial(&bitmap);
        let bytes = tracker.encode_data();
        let (payload, _) = MergeActionTracker::decode_data_capture(&bytes).unwrap();
        let mut deq = MergeSequenceDequeue::new(payload);
        let mut visitor = CollectingVisitor::default();
        deq.decode_loop(&mut visitor);
        assert_eq!(
            visitor.events,
            vec![
                MergeSequenceEvent::DecodeRange(12, 13),
                MergeSequenceEvent::DecodeRange(15, 17),
                MergeSequenceEvent::MergeAllTiles,
                MergeSequenceEvent::MergeTileRange(0, 1),
                MergeSequenceEvent::MergeTileSingle(5),
                MergeSequenceEvent::MergeTileRange(8, 10),
                MergeSequenceEvent::Eod,
            ]
        );
    }

    #[test]
    fn disjoint_runs_emit_one_record_each() {
        // Property #2 second half: K disjoint runs -> K records.
        let bitmap = [true, true, false, true, false, false, true, true, true];
        let mut tracker = MergeActionTracker::new();
        tracker.merge_partial(&bitmap);
        let bytes = tracker.encode_data();
        let (payload, _) = MergeActionTracker::decode_data_capture(&bytes).unwrap();
        let mut deq = MergeSequenceDequeue::new(payload);
        let mut visitor = CollectingVisitor::default();
        deq.decode_loop(&mut visitor);
        // 4 runs: [0,1], [3], [6,8], plus trailing EOD.
        assert_eq!(visitor.events.len(), 4);
    }
}
