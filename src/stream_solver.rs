//! Multi-stream reassembly of classified fragments.
//!
//! Fragments are visited once, in ascending offset order. Every recognized
//! header opens its own stream; every later fragment is offered to each open
//! stream and joins the ones whose guard chain accepts it. Decisions are
//! never revisited, so a stream only ever grows until its footer closes it.

use std::sync::Arc;

use ahash::AHashSet;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::oracle::{NoOracle, ScoringOracle};
use crate::search::contains_pattern;
use crate::signatures::footer_marker;
use crate::types::{FileKind, Fragment, IdentificationSource, ReassemblyConfig};

/// A candidate file under reconstruction
#[derive(Debug, Clone)]
pub struct Stream {
    id: usize,
    kind: FileKind,
    /// Indices into the solver's fragment store, in attach order
    members: Vec<usize>,
    offsets: AHashSet<u64>,
    last_offset: u64,
    complete: bool,
}

impl Stream {
    fn open(id: usize, kind: FileKind, seed_index: usize, seed_offset: u64) -> Self {
        let mut offsets = AHashSet::new();
        offsets.insert(seed_offset);
        Self {
            id,
            kind,
            members: vec![seed_index],
            offsets,
            last_offset: seed_offset,
            complete: false,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn last_offset(&self) -> u64 {
        self.last_offset
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn fragment_count(&self) -> usize {
        self.members.len()
    }

    pub fn contains_offset(&self, offset: u64) -> bool {
        self.offsets.contains(&offset)
    }
}

/// Finalized output of one stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReassembledFile {
    pub id: usize,
    pub kind: FileKind,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub fragment_offsets: Vec<u64>,
    pub completed: bool,
    /// Zero bytes inserted for missing blocks
    pub gap_bytes: u64,
}

impl ReassembledFile {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn start_offset(&self) -> Option<u64> {
        self.fragment_offsets.first().copied()
    }

    pub fn sha256(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.data);
        format!("{:x}", hasher.finalize())
    }
}

/// Incremental reconstruction engine.
///
/// Fragments must be pushed in ascending offset order; stopping early and
/// calling [`StreamSolver::finish`] still yields every stream opened so far.
/// Only fragments that seed or join a stream are retained, and streams that
/// are complete or have fallen out of the search window stop being visited.
pub struct StreamSolver {
    config: ReassemblyConfig,
    oracle: Arc<dyn ScoringOracle>,
    /// Fragments referenced by at least one stream
    fragments: Vec<Fragment>,
    streams: Vec<Stream>,
    /// Indices of streams that can still grow, in id order
    active: Vec<usize>,
    seen: usize,
    last_pushed: Option<u64>,
}

impl StreamSolver {
    pub fn new(config: ReassemblyConfig, oracle: Arc<dyn ScoringOracle>) -> Self {
        Self {
            config,
            oracle,
            fragments: Vec::new(),
            streams: Vec::new(),
            active: Vec::new(),
            seen: 0,
            last_pushed: None,
        }
    }

    pub fn without_oracle(config: ReassemblyConfig) -> Self {
        Self::new(config, Arc::new(NoOracle))
    }

    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    pub fn open_streams(&self) -> usize {
        self.streams.iter().filter(|s| !s.complete).count()
    }

    /// Streams still offered new fragments
    pub fn active_streams(&self) -> usize {
        self.active.len()
    }

    pub fn fragments_seen(&self) -> usize {
        self.seen
    }

    /// Fragments kept because a stream references them, in push order
    pub fn retained_fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Offer the next fragment to every active stream
    pub fn push(&mut self, fragment: Fragment) {
        if let Some(previous) = self.last_pushed {
            if fragment.offset < previous {
                warn!(
                    offset = fragment.offset,
                    previous,
                    "fragment pushed out of offset order"
                );
            }
        }
        self.last_pushed = Some(fragment.offset);
        self.seen += 1;

        self.retire_streams(fragment.offset);

        let targets: Vec<usize> = self
            .active
            .iter()
            .copied()
            .filter(|&id| {
                let stream = &self.streams[id];
                !stream.offsets.contains(&fragment.offset)
                    && should_attach(&self.config, self.oracle.as_ref(), &fragment, stream)
            })
            .collect();
        let seeds = fragment.identification.is_header();

        if targets.is_empty() && !seeds {
            return;
        }

        let index = self.fragments.len();
        let offset = fragment.offset;
        let kind = fragment.kind();
        let closes = has_footer(kind, &fragment.data);
        self.fragments.push(fragment);

        for id in targets {
            let stream = &mut self.streams[id];
            stream.offsets.insert(offset);
            stream.members.push(index);
            stream.last_offset = offset;

            if kind == stream.kind && closes {
                stream.complete = true;
                debug!(
                    stream = stream.id,
                    kind = %stream.kind,
                    fragments = stream.members.len(),
                    "stream completed on footer"
                );
            }
        }

        if seeds {
            let id = self.streams.len();
            debug!(stream = id, kind = %kind, offset, "stream opened");
            self.streams.push(Stream::open(id, kind, index, offset));
            self.active.push(id);
        }
    }

    /// Drop streams that can no longer accept a fragment at `offset` or later
    fn retire_streams(&mut self, offset: u64) {
        let radius = self.config.search_radius;
        let streams = &self.streams;
        self.active.retain(|&id| {
            let stream = &streams[id];
            !stream.complete && offset.saturating_sub(stream.last_offset) <= radius
        });
    }

    /// Reassemble every stream, in id order
    pub fn finish(self) -> Vec<ReassembledFile> {
        let completed = self.streams.iter().filter(|s| s.complete).count();
        info!(
            streams = self.streams.len(),
            completed,
            fragments = self.seen,
            retained = self.fragments.len(),
            "stream reconstruction finished"
        );

        self.streams
            .iter()
            .map(|stream| finalize(stream, &self.fragments))
            .collect()
    }
}

/// Ordered guard chain deciding whether `fragment` continues `stream`
fn should_attach(
    config: &ReassemblyConfig,
    oracle: &dyn ScoringOracle,
    fragment: &Fragment,
    stream: &Stream,
) -> bool {
    // strictly forward and inside the search window
    if fragment.offset <= stream.last_offset {
        return false;
    }
    let dist = fragment.offset - stream.last_offset;
    if dist > config.search_radius {
        return false;
    }

    let kind = fragment.kind();
    let is_sequential = dist == config.block_size as u64;
    let type_match = kind == stream.kind;
    let ai_score = if !type_match && oracle.is_available() {
        oracle.score(&fragment.data, stream.kind)
    } else {
        0.0
    };

    let mut attach = is_sequential && (type_match || kind == FileKind::Other);

    if fragment.identification.source == IdentificationSource::ZeroBlock {
        attach = false;
    } else if type_match {
        attach = true;
    } else if ai_score > config.ai_attach_threshold {
        attach = true;
    }

    // a confidently different type never joins
    if kind.is_concrete() && kind != stream.kind {
        attach = false;
    }

    attach
}

fn has_footer(kind: FileKind, data: &[u8]) -> bool {
    footer_marker(kind).map_or(false, |footer| contains_pattern(data, footer))
}

fn finalize(stream: &Stream, store: &[Fragment]) -> ReassembledFile {
    let mut members: Vec<&Fragment> = stream.members.iter().map(|&i| &store[i]).collect();
    members.sort_by_key(|f| f.offset);

    let (data, gap_bytes) = stitch(&members);

    ReassembledFile {
        id: stream.id,
        kind: stream.kind,
        data,
        fragment_offsets: members.iter().map(|f| f.offset).collect(),
        completed: stream.complete,
        gap_bytes,
    }
}

/// Concatenate offset-sorted fragments, zero-filling gaps and dropping
/// bytes already written. Returns the buffer and the zero-filled count.
fn stitch(fragments: &[&Fragment]) -> (Vec<u8>, u64) {
    let Some(first) = fragments.first() else {
        return (Vec::new(), 0);
    };

    let mut data = Vec::new();
    let mut gap_bytes = 0u64;
    let mut position = first.offset;

    for fragment in fragments {
        if fragment.offset > position {
            let gap = fragment.offset - position;
            data.resize(data.len() + gap as usize, 0);
            gap_bytes += gap;
            position = fragment.offset;
        }

        let skip = (position - fragment.offset) as usize;
        if skip < fragment.data.len() {
            data.extend_from_slice(&fragment.data[skip..]);
        }
        position = position.max(fragment.end_offset());
    }

    (data, gap_bytes)
}

/// Reconstruct with default settings and no oracle
pub fn reconstruct_streams(fragments: Vec<Fragment>) -> Vec<ReassembledFile> {
    reconstruct_streams_with(fragments, &ReassemblyConfig::default(), Arc::new(NoOracle))
}

pub fn reconstruct_streams_with(
    mut fragments: Vec<Fragment>,
    config: &ReassemblyConfig,
    oracle: Arc<dyn ScoringOracle>,
) -> Vec<ReassembledFile> {
    if fragments.is_empty() {
        return Vec::new();
    }

    fragments.sort_by_key(|fragment| fragment.offset);

    let mut solver = StreamSolver::new(config.clone(), oracle);
    for fragment in fragments {
        solver.push(fragment);
    }
    solver.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ClassProbabilities;
    use crate::types::Identification;

    const BS: u64 = 512;

    fn filled(byte: u8) -> Vec<u8> {
        vec![byte; BS as usize]
    }

    fn header(offset: u64, kind: FileKind) -> Fragment {
        let mut data = filled(0x41);
        match kind {
            FileKind::Jpeg => data[..4].copy_from_slice(b"\xff\xd8\xff\xe0"),
            _ => data[..4].copy_from_slice(b"%PDF"),
        }
        Fragment::new(offset, data, Identification::signature(kind))
    }

    fn body(offset: u64, kind: FileKind, byte: u8) -> Fragment {
        let source = if kind == FileKind::Other {
            IdentificationSource::AiLowConfidence
        } else {
            IdentificationSource::AiHighConfidence
        };
        Fragment::new(offset, filled(byte), Identification::new(kind, 0.9, source))
    }

    fn with_footer(mut fragment: Fragment, footer: &[u8]) -> Fragment {
        fragment.data[100..100 + footer.len()].copy_from_slice(footer);
        fragment
    }

    fn zero(offset: u64) -> Fragment {
        Fragment::new(offset, vec![0u8; BS as usize], Identification::zero_block())
    }

    /// Oracle that scores every fragment the same for every target
    struct FixedScore(f64);

    impl ScoringOracle for FixedScore {
        fn classify(&self, _data: &[u8]) -> ClassProbabilities {
            ClassProbabilities::new(self.0, self.0, 1.0 - self.0)
        }

        fn score(&self, _data: &[u8], _target: FileKind) -> f64 {
            self.0
        }
    }

    fn solve_with_score(fragments: Vec<Fragment>, score: f64) -> Vec<ReassembledFile> {
        reconstruct_streams_with(fragments, &ReassemblyConfig::default(), Arc::new(FixedScore(score)))
    }

    #[test]
    fn test_empty_input() {
        assert!(reconstruct_streams(Vec::new()).is_empty());
    }

    #[test]
    fn test_sequential_pair_without_gap() {
        let files = reconstruct_streams(vec![header(0, FileKind::Jpeg), body(BS, FileKind::Jpeg, 0x42)]);

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].len(), 2 * BS as usize);
        assert_eq!(files[0].gap_bytes, 0);
        assert_eq!(files[0].fragment_offsets, vec![0, BS]);
        assert!(!files[0].completed);
        assert!(files[0].data.starts_with(b"\xff\xd8"));
    }

    #[test]
    fn test_one_block_gap_is_zero_filled() {
        let files = reconstruct_streams(vec![header(0, FileKind::Jpeg), body(2 * BS, FileKind::Jpeg, 0x44)]);

        assert_eq!(files.len(), 1);
        let data = &files[0].data;
        assert_eq!(data.len(), 3 * BS as usize);
        assert!(data[BS as usize..2 * BS as usize].iter().all(|&b| b == 0));
        assert!(data[2 * BS as usize..].iter().all(|&b| b == 0x44));
        assert_eq!(files[0].gap_bytes, BS);
    }

    #[test]
    fn test_interleaved_kinds_stay_separate() {
        let files = reconstruct_streams(vec![
            header(0, FileKind::Jpeg),
            header(BS, FileKind::Pdf),
            body(2 * BS, FileKind::Jpeg, 0x4A),
            body(3 * BS, FileKind::Pdf, 0x50),
        ]);

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].kind, FileKind::Jpeg);
        assert_eq!(files[0].fragment_offsets, vec![0, 2 * BS]);
        assert_eq!(files[1].kind, FileKind::Pdf);
        assert_eq!(files[1].fragment_offsets, vec![BS, 3 * BS]);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let files = reconstruct_streams(vec![
            body(3 * BS, FileKind::Pdf, 0x50),
            body(2 * BS, FileKind::Jpeg, 0x4A),
            header(BS, FileKind::Pdf),
            header(0, FileKind::Jpeg),
        ]);

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].fragment_offsets, vec![0, 2 * BS]);
        assert_eq!(files[1].fragment_offsets, vec![BS, 3 * BS]);
    }

    #[test]
    fn test_search_radius_bounds_attachment() {
        let config = ReassemblyConfig {
            search_radius: 4 * BS,
            ..ReassemblyConfig::default()
        };
        let files = reconstruct_streams_with(
            vec![header(0, FileKind::Jpeg), body(5 * BS, FileKind::Jpeg, 0x42)],
            &config,
            Arc::new(FixedScore(1.0)),
        );

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].fragment_offsets, vec![0]);
        assert_eq!(files[0].len(), BS as usize);
    }

    #[test]
    fn test_radius_edge_is_inclusive() {
        let config = ReassemblyConfig {
            search_radius: 4 * BS,
            ..ReassemblyConfig::default()
        };
        let files = reconstruct_streams_with(
            vec![header(0, FileKind::Jpeg), body(4 * BS, FileKind::Jpeg, 0x42)],
            &config,
            Arc::new(NoOracle),
        );
        assert_eq!(files[0].fragment_offsets, vec![0, 4 * BS]);
    }

    #[test]
    fn test_hard_guard_rejects_other_concrete_kind() {
        let files = solve_with_score(
            vec![header(0, FileKind::Jpeg), body(BS, FileKind::Pdf, 0x50)],
            1.0,
        );

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].fragment_offsets, vec![0]);
    }

    #[test]
    fn test_sequential_other_attaches() {
        let files = reconstruct_streams(vec![header(0, FileKind::Jpeg), body(BS, FileKind::Other, 0x33)]);
        assert_eq!(files[0].fragment_offsets, vec![0, BS]);
    }

    #[test]
    fn test_distant_other_needs_oracle() {
        let fragments = vec![header(0, FileKind::Jpeg), body(3 * BS, FileKind::Other, 0x33)];

        let files = reconstruct_streams(fragments.clone());
        assert_eq!(files[0].fragment_offsets, vec![0]);

        let files = solve_with_score(fragments.clone(), 0.9);
        assert_eq!(files[0].fragment_offsets, vec![0, 3 * BS]);
        assert_eq!(files[0].gap_bytes, 2 * BS);
    }

    #[test]
    fn test_ai_threshold_is_strict() {
        let fragments = vec![header(0, FileKind::Jpeg), body(3 * BS, FileKind::Other, 0x33)];
        let files = solve_with_score(fragments, 0.8);
        assert_eq!(files[0].fragment_offsets, vec![0]);
    }

    #[test]
    fn test_zero_block_never_attaches() {
        let files = solve_with_score(vec![header(0, FileKind::Jpeg), zero(BS)], 1.0);
        assert_eq!(files[0].fragment_offsets, vec![0]);
    }

    #[test]
    fn test_zero_block_does_not_move_stream() {
        let files = reconstruct_streams(vec![
            header(0, FileKind::Jpeg),
            zero(BS),
            body(2 * BS, FileKind::Jpeg, 0x42),
        ]);
        assert_eq!(files[0].fragment_offsets, vec![0, 2 * BS]);
        assert_eq!(files[0].gap_bytes, BS);
    }

    #[test]
    fn test_footer_closes_stream() {
        let files = reconstruct_streams(vec![
            header(0, FileKind::Jpeg),
            with_footer(body(BS, FileKind::Jpeg, 0x42), b"\xff\xd9"),
            body(2 * BS, FileKind::Jpeg, 0x43),
        ]);

        assert_eq!(files.len(), 1);
        assert!(files[0].completed);
        assert_eq!(files[0].fragment_offsets, vec![0, BS]);
    }

    #[test]
    fn test_footer_in_other_fragment_does_not_complete() {
        let files = reconstruct_streams(vec![
            header(0, FileKind::Jpeg),
            with_footer(body(BS, FileKind::Other, 0x42), b"\xff\xd9"),
            body(2 * BS, FileKind::Jpeg, 0x43),
        ]);

        assert!(!files[0].completed);
        assert_eq!(files[0].fragment_offsets, vec![0, BS, 2 * BS]);
    }

    #[test]
    fn test_pdf_footer() {
        let files = reconstruct_streams(vec![
            header(0, FileKind::Pdf),
            with_footer(body(BS, FileKind::Pdf, 0x20), b"%%EOF"),
        ]);
        assert!(files[0].completed);
    }

    #[test]
    fn test_fragment_shared_by_parallel_streams() {
        let files = reconstruct_streams(vec![
            header(0, FileKind::Jpeg),
            header(BS, FileKind::Jpeg),
            body(2 * BS, FileKind::Jpeg, 0x42),
        ]);

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].id, 0);
        assert_eq!(files[0].fragment_offsets, vec![0, BS, 2 * BS]);
        assert_eq!(files[1].id, 1);
        assert_eq!(files[1].fragment_offsets, vec![BS, 2 * BS]);
    }

    #[test]
    fn test_solver_can_stop_early() {
        let mut solver = StreamSolver::without_oracle(ReassemblyConfig::default());
        solver.push(header(0, FileKind::Jpeg));
        solver.push(body(BS, FileKind::Jpeg, 0x42));
        assert_eq!(solver.open_streams(), 1);
        assert_eq!(solver.fragments_seen(), 2);
        assert_eq!(solver.streams()[0].last_offset(), BS);
        assert!(solver.streams()[0].contains_offset(0));

        let files = solver.finish();
        assert_eq!(files.len(), 1);
        assert!(!files[0].completed);
        assert_eq!(files[0].len(), 2 * BS as usize);
    }

    #[test]
    fn test_stitch_skips_overlap() {
        let a = Fragment::new(0, vec![1u8; 8], Identification::signature(FileKind::Jpeg));
        let b = Fragment::new(4, vec![2u8; 8], Identification::signature(FileKind::Jpeg));
        let c = Fragment::new(2, vec![3u8; 4], Identification::signature(FileKind::Jpeg));
        let (data, gaps) = stitch(&[&a, &c, &b]);

        assert_eq!(data, vec![1, 1, 1, 1, 1, 1, 1, 1, 2, 2, 2, 2]);
        assert_eq!(gaps, 0);
    }

    #[test]
    fn test_streams_out_of_window_are_retired() {
        let config = ReassemblyConfig {
            search_radius: 4 * BS,
            ..ReassemblyConfig::default()
        };
        let mut solver = StreamSolver::without_oracle(config);
        for i in 0..1000u64 {
            solver.push(header(i * 8 * BS, FileKind::Jpeg));
        }

        assert_eq!(solver.streams().len(), 1000);
        assert_eq!(solver.active_streams(), 1);

        let files = solver.finish();
        assert_eq!(files.len(), 1000);
        assert!(files.iter().all(|f| f.fragment_offsets.len() == 1));
        assert_eq!(files[999].start_offset(), Some(999 * 8 * BS));
    }

    #[test]
    fn test_completed_stream_is_retired() {
        let mut solver = StreamSolver::without_oracle(ReassemblyConfig::default());
        solver.push(header(0, FileKind::Jpeg));
        solver.push(with_footer(body(BS, FileKind::Jpeg, 0x42), b"\xff\xd9"));
        solver.push(body(2 * BS, FileKind::Jpeg, 0x43));

        assert_eq!(solver.active_streams(), 0);
        assert_eq!(solver.open_streams(), 0);
        assert_eq!(solver.retained_fragments().len(), 2);
    }

    #[test]
    fn test_unattached_fragments_are_not_retained() {
        let mut solver = StreamSolver::without_oracle(ReassemblyConfig::default());
        for i in 0..1000u64 {
            solver.push(zero(i * BS));
        }
        assert_eq!(solver.fragments_seen(), 1000);
        assert!(solver.retained_fragments().is_empty());

        solver.push(header(1000 * BS, FileKind::Pdf));
        solver.push(body(1001 * BS, FileKind::Jpeg, 0x4A));
        solver.push(body(1002 * BS, FileKind::Pdf, 0x50));

        let offsets: Vec<u64> = solver.retained_fragments().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![1000 * BS, 1002 * BS]);
        assert!(solver.finish()[0].data.starts_with(b"%PDF"));
    }

    #[test]
    fn test_replaying_retained_fragments_restores_state() {
        let fragments = vec![
            header(0, FileKind::Jpeg),
            zero(BS),
            header(2 * BS, FileKind::Pdf),
            body(3 * BS, FileKind::Jpeg, 0x4A),
            body(4 * BS, FileKind::Other, 0x33),
            body(5 * BS, FileKind::Pdf, 0x50),
            with_footer(body(6 * BS, FileKind::Jpeg, 0x4B), b"\xff\xd9"),
            with_footer(body(7 * BS, FileKind::Pdf, 0x51), b"%%EOF"),
        ];
        let expected = reconstruct_streams(fragments.clone());

        let mut first = StreamSolver::without_oracle(ReassemblyConfig::default());
        for fragment in fragments[..4].iter().cloned() {
            first.push(fragment);
        }

        let mut resumed = StreamSolver::without_oracle(ReassemblyConfig::default());
        for fragment in first.retained_fragments().iter().cloned() {
            resumed.push(fragment);
        }
        for fragment in fragments[4..].iter().cloned() {
            resumed.push(fragment);
        }

        assert_eq!(resumed.finish(), expected);
    }

    #[test]
    fn test_reassembled_digest() {
        let files = reconstruct_streams(vec![header(0, FileKind::Jpeg)]);
        assert_eq!(files[0].sha256().len(), 64);
        assert_eq!(files[0].start_offset(), Some(0));
    }
}
