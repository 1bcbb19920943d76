use alloc::vec::Vec;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::config::Config;
use crate::crc::CrcEngine;
use crate::header::SlidingWindow;
use crate::output::{
    Annotation, AnnotationData, AnnotationKind, CrcStatus, PendingBuffer, TriggerClass,
};
use crate::HEADER_SLOTS;

/// Framing state, one per packet segment.
///
/// ```text
/// StreamStart -> TimeToHeader -> Preamble -> Header -> HeaderPad
///     -> Length -> LengthPad -> Data -> DataPad -> Crc -> CrcPad
///     -> PacketPad -> PacketEnd
/// ```
///
/// Zero-width segments are skipped by re-dispatching the same byte into the
/// following state. A failed header comparison or a mid-packet timeout drops
/// back to `TimeToHeader`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum FrameState {
    StreamStart = 0,
    TimeToHeader,
    Preamble,
    Header,
    HeaderPad,
    Length,
    LengthPad,
    Data,
    DataPad,
    Crc,
    CrcPad,
    PacketPad,
    PacketEnd,
}

impl FrameState {
    const fn next(self) -> Self {
        match self {
            FrameState::StreamStart => FrameState::TimeToHeader,
            FrameState::TimeToHeader => FrameState::Preamble,
            FrameState::Preamble => FrameState::Header,
            FrameState::Header => FrameState::HeaderPad,
            FrameState::HeaderPad => FrameState::Length,
            FrameState::Length => FrameState::LengthPad,
            FrameState::LengthPad => FrameState::Data,
            FrameState::Data => FrameState::DataPad,
            FrameState::DataPad => FrameState::Crc,
            FrameState::Crc => FrameState::CrcPad,
            FrameState::CrcPad => FrameState::PacketPad,
            FrameState::PacketPad => FrameState::PacketEnd,
            FrameState::PacketEnd => FrameState::PacketEnd,
        }
    }
}

/// One timestamped stream byte as delivered by the capture host.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ByteEvent {
    pub byte: u8,
    /// Start of the byte on the wire, in seconds.
    pub start: f64,
    /// End of the byte on the wire, in seconds.
    pub end: f64,
    /// Idle time in seconds since the end of the previous byte.
    pub gap: f64,
}

#[derive(Clone, Copy, Debug, Default)]
struct CrcState {
    initialized: bool,
    accumulating: bool,
    field_done: bool,
    matched: bool,
    sum: u32,
    result: u32,
    expected: u32,
}

/// Per-packet parse state, reassigned as a whole on every restart so no
/// flag can leak into the next attempt.
#[derive(Clone, Debug)]
struct ParseContext {
    state: FrameState,
    ref_pos: i64,
    pos: i64,
    packet_length: i64,
    length_bytes: [u8; 2],
    alive: [bool; HEADER_SLOTS],
    time_to_head: bool,
    header_found: bool,
    length_found: bool,
    ended: bool,
    crc: CrcState,
}

impl ParseContext {
    fn initial() -> Self {
        Self {
            state: FrameState::StreamStart,
            ..Self::fresh()
        }
    }

    fn fresh() -> Self {
        Self {
            state: FrameState::TimeToHeader,
            ref_pos: 0,
            pos: 0,
            packet_length: 0,
            length_bytes: [0; 2],
            alive: [true; HEADER_SLOTS],
            time_to_head: false,
            header_found: false,
            length_found: false,
            ended: false,
            crc: CrcState::default(),
        }
    }
}

// Right shift that drops the zero bits below the highest set bit of the mask.
const fn normalize_shift(mask: u8) -> u32 {
    if mask == 0 {
        0
    } else {
        (8 - mask.leading_zeros()) - mask.count_ones()
    }
}

/// Streaming packet dissector.
///
/// Bytes go in one at a time through [`push`](Dissector::push); annotations
/// come back out once the header decision for the surrounding bytes is made.
/// Until then they are held in an internal pending buffer, so a byte's
/// annotations may be returned several calls after the byte itself, or be
/// discarded entirely when no packet materializes around it.
#[derive(Debug)]
pub struct Dissector {
    config: Config,
    crc_engine: Option<CrcEngine>,
    ctx: ParseContext,
    window: SlidingWindow,
    pending: PendingBuffer,
    timed_out: bool,
    gap: f64,
    trigger_search: bool,
    trigger_found: bool,
    trigger_pend: bool,
    trigger_anchor: f64,
}

impl Dissector {
    pub fn new(config: Config) -> Self {
        let crc_engine = config.crc.enabled.then(|| CrcEngine::new(config.crc.params));
        Self {
            config,
            crc_engine,
            ctx: ParseContext::initial(),
            window: SlidingWindow::new(),
            pending: PendingBuffer::default(),
            timed_out: false,
            gap: 0.0,
            trigger_search: false,
            trigger_found: false,
            trigger_pend: false,
            trigger_anchor: 0.0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> FrameState {
        self.ctx.state
    }

    /// Drops all parse state and buffered annotations, as if no byte had
    /// been seen yet.
    pub fn reset(&mut self) {
        self.ctx = ParseContext::initial();
        self.window.reset();
        self.pending.clear();
        self.timed_out = false;
        self.trigger_search = false;
        self.trigger_found = false;
        self.trigger_pend = false;
    }

    /// Processes one stream byte and returns every annotation that became
    /// final with it.
    pub fn push(&mut self, ev: ByteEvent) -> Vec<Annotation> {
        let mut forced = Vec::new();
        let mut batch = Vec::new();
        let mut force_output = false;

        self.timed_out = false;
        if self.ctx.state != FrameState::StreamStart
            && self.config.timeout > 0.0
            && ev.gap > self.config.timeout
        {
            if self.ctx.time_to_head {
                force_output = true;
                forced.push(Annotation::new(
                    AnnotationKind::PacketTimeout,
                    ev.start,
                    ev.end,
                    AnnotationData::Position(self.ctx.pos),
                ));
            }
            self.window.reset();
            self.ctx = ParseContext::fresh();
            self.timed_out = true;
        }

        // Trigger timing is measured at the first byte after the packet end,
        // against the end of the packet that carried the trigger.
        if self.trigger_found && self.trigger_pend {
            self.trigger_found = false;
            self.trigger_pend = false;
            let class = if ev.start - self.trigger_anchor > self.config.trigger_tmax {
                TriggerClass::Out
            } else {
                TriggerClass::In
            };
            force_output = true;
            forced.push(Annotation::new(
                AnnotationKind::TriggerStream,
                ev.start,
                ev.end,
                AnnotationData::Trigger(class),
            ));
        }

        // No previous byte exists at stream start; substitute a 1 s gap so
        // the idle condition is satisfied.
        self.gap = if self.ctx.state == FrameState::StreamStart {
            1.0
        } else {
            ev.gap
        };
        self.ctx.pos += 1;

        loop {
            let again = match self.ctx.state {
                FrameState::StreamStart => self.s_stream_start(&ev, &mut batch),
                FrameState::TimeToHeader => self.s_time_to_header(&ev, &mut batch),
                FrameState::Preamble => self.s_preamble(&ev, &mut batch),
                FrameState::Header => self.s_header(&ev, &mut batch),
                FrameState::HeaderPad => self.s_header_pad(&ev, &mut batch),
                FrameState::Length => self.s_length(&ev, &mut batch),
                FrameState::LengthPad => self.s_length_pad(&ev, &mut batch),
                FrameState::Data => self.s_data(&ev, &mut batch),
                FrameState::DataPad => self.s_data_pad(&ev, &mut batch),
                FrameState::Crc => self.s_crc(&ev, &mut batch),
                FrameState::CrcPad => self.s_crc_pad(&ev, &mut batch),
                FrameState::PacketPad => self.s_packet_pad(&ev, &mut batch),
                FrameState::PacketEnd => {
                    self.s_packet_end(&ev, &mut batch);
                    false
                }
            };
            if !again {
                break;
            }
        }

        self.do_crc(&ev, &mut batch);

        if self.ctx.time_to_head {
            self.check_packet_end(&ev, &mut batch);
        }

        if force_output || self.ctx.time_to_head {
            self.pending.push(forced, batch);
        }

        if self.ctx.time_to_head {
            if self.ctx.header_found || self.ctx.ended || self.timed_out {
                return self.flush();
            }
            Vec::new()
        } else if force_output {
            self.flush()
        } else {
            self.pending.clear();
            Vec::new()
        }
    }

    fn flush(&mut self) -> Vec<Annotation> {
        let out = self.pending.drain();
        if self.ctx.ended {
            self.ctx = ParseContext::fresh();
            self.window.reset();
        }
        out
    }

    fn s_stream_start(&mut self, ev: &ByteEvent, out: &mut Vec<Annotation>) -> bool {
        self.ctx = ParseContext::fresh();
        self.ctx.pos = 1;
        out.push(Annotation::new(
            AnnotationKind::StreamStart,
            ev.start,
            ev.end,
            AnnotationData::None,
        ));
        true
    }

    fn s_time_to_header(&mut self, ev: &ByteEvent, out: &mut Vec<Annotation>) -> bool {
        if self.config.start_idle <= self.gap {
            self.ctx.time_to_head = true;
            self.ctx.state = self.ctx.state.next();
            self.ctx.ref_pos += self.config.preamble_len;
            if self.config.start_idle > 0.0 {
                out.push(Annotation::new(
                    AnnotationKind::TimeToHeader,
                    ev.start,
                    ev.end,
                    AnnotationData::Millis(self.gap * 1000.0),
                ));
            }
            true
        } else {
            self.ctx = ParseContext::fresh();
            false
        }
    }

    fn s_preamble(&mut self, ev: &ByteEvent, out: &mut Vec<Annotation>) -> bool {
        if self.ctx.pos > self.ctx.ref_pos {
            self.trigger_search = true;
            self.trigger_found = false;
            self.trigger_pend = false;
            self.ctx.state = self.ctx.state.next();
            self.ctx.ref_pos += self.config.header_len;
            true
        } else {
            out.push(Annotation::new(
                AnnotationKind::Preamble,
                ev.start,
                ev.end,
                AnnotationData::Byte(ev.byte),
            ));
            false
        }
    }

    fn s_header(&mut self, ev: &ByteEvent, out: &mut Vec<Annotation>) -> bool {
        if self.config.is_flex() {
            self.s_header_flex(ev, out);
            false
        } else {
            self.s_header_fixed(ev, out)
        }
    }

    // Fixed-offset comparison: the header starts right after the idle gap
    // and the preamble, every candidate is compared byte by byte.
    fn s_header_fixed(&mut self, ev: &ByteEvent, out: &mut Vec<Annotation>) -> bool {
        if self.config.header_len > 0 {
            let idx = (self.ctx.pos - self.ctx.ref_pos + self.config.header_len - 1) as usize;
            if ev.byte & self.config.trigger_mask[idx]
                != self.config.trigger_value[idx] & self.config.trigger_mask[idx]
            {
                self.trigger_search = false;
            }
            let masked = ev.byte & self.config.header_mask[idx];
            let mut no_match = 0;
            for (slot, cand) in self.config.headers.iter().enumerate() {
                if !cand.active || cand.pattern().get(idx) != Some(&masked) {
                    self.ctx.alive[slot] = false;
                    no_match += 1;
                }
            }
            if no_match == HEADER_SLOTS {
                self.ctx = ParseContext::fresh();
                return false;
            }
            out.push(Annotation::new(
                AnnotationKind::Header,
                ev.start,
                ev.end,
                AnnotationData::Byte(masked),
            ));
        }
        if self.ctx.pos >= self.ctx.ref_pos {
            if self.ctx.alive.iter().any(|&a| a) {
                out.push(Annotation::new(
                    AnnotationKind::PacketStart,
                    ev.start,
                    ev.end,
                    AnnotationData::None,
                ));
                if self.trigger_search {
                    out.push(Annotation::new(
                        AnnotationKind::TriggerFound,
                        ev.start,
                        ev.end,
                        AnnotationData::None,
                    ));
                    self.trigger_found = true;
                }
                self.trigger_search = false;
                self.ctx.header_found = true;
                self.ctx.state = self.ctx.state.next();
                self.ctx.ref_pos += self.config.header_pad;
                // A zero-length header has not consumed this byte yet.
                return self.config.header_len == 0;
            }
            self.ctx = ParseContext::fresh();
        }
        false
    }

    // Flexible search: candidates of differing lengths are matched against a
    // sliding window, the packet start is wherever a candidate lines up.
    fn s_header_flex(&mut self, ev: &ByteEvent, out: &mut Vec<Annotation>) {
        self.window.push(ev.byte, self.timed_out);
        if let Some(m) = self.window.find(&self.config) {
            log::trace!("header candidate {} matched at {} s", m.candidate, ev.start);
            self.ctx.header_found = true;
            self.ctx.state = self.ctx.state.next();
            out.push(Annotation::new(
                AnnotationKind::Header,
                ev.start,
                ev.end,
                AnnotationData::Byte(ev.byte),
            ));
            out.push(Annotation::new(
                AnnotationKind::PacketStart,
                ev.start,
                ev.end,
                AnnotationData::None,
            ));
            if m.trigger {
                out.push(Annotation::new(
                    AnnotationKind::TriggerFound,
                    ev.start,
                    ev.end,
                    AnnotationData::None,
                ));
                self.trigger_found = true;
            }
            self.trigger_search = false;
            // Rebase positions onto the matched header; bytes buffered
            // before it did not belong to this packet.
            let matched = m.len as i64;
            self.ctx.pos = matched;
            self.ctx.ref_pos = matched + self.config.header_pad;
            self.pending.trim(m.len - 1);
        } else if self.timed_out {
            out.push(Annotation::new(
                AnnotationKind::HeaderQm,
                ev.start,
                ev.end,
                AnnotationData::Byte(ev.byte),
            ));
            self.pending.trim(0);
        } else {
            out.push(Annotation::new(
                AnnotationKind::Header,
                ev.start,
                ev.end,
                AnnotationData::Byte(ev.byte),
            ));
            self.pending.trim(crate::HEADER_MAX_LEN);
        }
    }

    fn s_header_pad(&mut self, ev: &ByteEvent, out: &mut Vec<Annotation>) -> bool {
        if self.ctx.pos > self.ctx.ref_pos {
            self.ctx.state = self.ctx.state.next();
            self.ctx.ref_pos += self.config.length.width as i64;
            true
        } else {
            out.push(Annotation::new(
                AnnotationKind::HeaderPad,
                ev.start,
                ev.end,
                AnnotationData::Byte(ev.byte),
            ));
            false
        }
    }

    fn s_length(&mut self, ev: &ByteEvent, out: &mut Vec<Annotation>) -> bool {
        let length = self.config.length;
        if self.ctx.pos > self.ctx.ref_pos {
            let raw = match length.width {
                0 => length.fix as i64,
                1 => self.ctx.length_bytes[0] as i64,
                _ => {
                    let high = self.ctx.length_bytes[length.order.high_index()] as i64;
                    let low = self.ctx.length_bytes[length.order.low_index()] as i64;
                    let shift = 8 - length.mask[length.order.low_index()].count_ones();
                    (high << shift) | low
                }
            };
            self.ctx.packet_length = raw + length.offset as i64;
            out.push(Annotation::new(
                AnnotationKind::Length,
                ev.start,
                ev.end,
                AnnotationData::PacketLength(self.ctx.packet_length),
            ));
            self.ctx.packet_length += length.shift;
            if self.ctx.packet_length < 0 {
                self.ctx.packet_length = 0;
            }
            self.ctx.length_found = true;
            self.ctx.state = self.ctx.state.next();
            self.ctx.ref_pos += length.pad;
            true
        } else {
            let idx = (self.ctx.pos - self.ctx.ref_pos + length.width as i64 - 1) as usize;
            let mask = length.mask[idx];
            let val = (ev.byte & mask) >> normalize_shift(mask);
            self.ctx.length_bytes[idx] = val;
            out.push(Annotation::new(
                AnnotationKind::Length,
                ev.start,
                ev.end,
                AnnotationData::Byte(val),
            ));
            false
        }
    }

    fn s_length_pad(&mut self, ev: &ByteEvent, out: &mut Vec<Annotation>) -> bool {
        if self.ctx.pos > self.ctx.ref_pos {
            self.ctx.state = self.ctx.state.next();
            // From here the reference is the end of the data segment.
            self.ctx.ref_pos = self.ctx.packet_length
                - self.config.data_pad
                - self.config.crc.len
                - self.config.crc.pad;
            true
        } else {
            out.push(Annotation::new(
                AnnotationKind::LengthPad,
                ev.start,
                ev.end,
                AnnotationData::Byte(ev.byte),
            ));
            false
        }
    }

    fn s_data(&mut self, ev: &ByteEvent, out: &mut Vec<Annotation>) -> bool {
        if self.ctx.pos > self.ctx.ref_pos {
            self.ctx.crc.accumulating = false;
            self.ctx.state = self.ctx.state.next();
            self.ctx.ref_pos += self.config.data_pad;
            true
        } else {
            out.push(Annotation::new(
                AnnotationKind::Data,
                ev.start,
                ev.end,
                AnnotationData::Byte(ev.byte),
            ));
            false
        }
    }

    fn s_data_pad(&mut self, ev: &ByteEvent, out: &mut Vec<Annotation>) -> bool {
        if self.ctx.pos > self.ctx.ref_pos {
            self.ctx.state = self.ctx.state.next();
            self.ctx.ref_pos += self.config.crc.len;
            true
        } else {
            out.push(Annotation::new(
                AnnotationKind::DataPad,
                ev.start,
                ev.end,
                AnnotationData::Byte(ev.byte),
            ));
            false
        }
    }

    fn s_crc(&mut self, ev: &ByteEvent, out: &mut Vec<Annotation>) -> bool {
        if self.ctx.pos > self.ctx.ref_pos {
            self.ctx.ref_pos += self.config.crc.pad;
            self.ctx.state = self.ctx.state.next();
            true
        } else {
            let idx = (self.ctx.pos - self.ctx.ref_pos + self.config.crc.len - 1) as usize;
            let significance = self.config.crc.order.significance(idx);
            self.ctx.crc.expected = self
                .ctx
                .crc
                .expected
                .wrapping_add((ev.byte as u32) << (significance * 8));
            if self.ctx.pos >= self.ctx.ref_pos {
                self.ctx.crc.field_done = true;
            }
            out.push(Annotation::new(
                AnnotationKind::CrcValue,
                ev.start,
                ev.end,
                AnnotationData::Byte(ev.byte),
            ));
            false
        }
    }

    fn s_crc_pad(&mut self, ev: &ByteEvent, out: &mut Vec<Annotation>) -> bool {
        if self.ctx.pos > self.ctx.ref_pos {
            self.ctx.state = self.ctx.state.next();
            true
        } else {
            out.push(Annotation::new(
                AnnotationKind::CrcPad,
                ev.start,
                ev.end,
                AnnotationData::Byte(ev.byte),
            ));
            false
        }
    }

    fn s_packet_pad(&mut self, ev: &ByteEvent, out: &mut Vec<Annotation>) -> bool {
        let fix = self.config.packet_fix_length;
        if fix == 0 {
            self.ctx.state = self.ctx.state.next();
            true
        } else if self.ctx.pos < fix {
            out.push(Annotation::new(
                AnnotationKind::PacketPad,
                ev.start,
                ev.end,
                AnnotationData::Byte(ev.byte),
            ));
            false
        } else if self.ctx.pos == fix {
            self.ctx.state = self.ctx.state.next();
            out.push(Annotation::new(
                AnnotationKind::PacketPad,
                ev.start,
                ev.end,
                AnnotationData::Byte(ev.byte),
            ));
            false
        } else {
            self.ctx.state = self.ctx.state.next();
            true
        }
    }

    fn s_packet_end(&mut self, ev: &ByteEvent, out: &mut Vec<Annotation>) {
        self.ctx.ended = true;
        self.trigger_pend = true;
        self.trigger_anchor = ev.end;
        out.push(Annotation::new(
            AnnotationKind::PacketEnd,
            ev.start,
            ev.end,
            AnnotationData::None,
        ));
    }

    // Evaluated after every byte once the length is known; the declared
    // length can end the packet while the state machine still expects more
    // fields, which shows up as a second PacketEnd.
    fn check_packet_end(&mut self, ev: &ByteEvent, out: &mut Vec<Annotation>) {
        if !self.ctx.length_found {
            return;
        }
        let fix = self.config.packet_fix_length;
        let done = if fix == 0 {
            self.ctx.pos >= self.ctx.packet_length
        } else {
            self.ctx.pos >= self.ctx.packet_length && self.ctx.pos >= fix
        };
        if done {
            self.s_packet_end(ev, out);
        }
    }

    fn do_crc(&mut self, ev: &ByteEvent, out: &mut Vec<Annotation>) {
        let Some(engine) = self.crc_engine.as_ref() else {
            return;
        };
        if self.ctx.pos <= self.config.crc.shift {
            return;
        }
        let crc = &mut self.ctx.crc;
        if !crc.initialized {
            crc.initialized = true;
            crc.accumulating = true;
            crc.field_done = false;
            crc.matched = false;
            crc.sum = engine.init_sum();
        }
        if crc.accumulating {
            crc.sum = engine.update(crc.sum, ev.byte);
            // Finalized after every byte so intermediate sums are shown.
            crc.result = engine.finalize(crc.sum);
            out.push(Annotation::new(
                AnnotationKind::CrcAdd,
                ev.start,
                ev.end,
                AnnotationData::CrcRunning(crc.result),
            ));
        }
        if crc.field_done {
            crc.matched = crc.result == crc.expected;
            crc.field_done = false;
            let status = if crc.matched {
                CrcStatus::Ok
            } else {
                CrcStatus::Error
            };
            out.push(Annotation::new(
                AnnotationKind::CrcEnd,
                ev.start,
                ev.end,
                AnnotationData::CrcCheck {
                    status,
                    computed: crc.result,
                    expected: crc.expected,
                },
            ));
        }
    }
}
