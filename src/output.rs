use alloc::vec::Vec;
use core::fmt;

/// Kind of a produced annotation. Each maps to one display form.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AnnotationKind {
    StreamStart,
    TimeToHeader,
    Preamble,
    Header,
    /// Byte that might belong to a header but cannot be decided yet.
    HeaderQm,
    HeaderPad,
    Length,
    LengthPad,
    Data,
    DataPad,
    /// Running CRC after absorbing one byte.
    CrcAdd,
    /// One received byte of the CRC field.
    CrcValue,
    /// Final comparison of computed against received CRC.
    CrcEnd,
    CrcPad,
    PacketPad,
    PacketStart,
    PacketEnd,
    PacketTimeout,
    /// Trigger comparison matched on the header bytes.
    TriggerFound,
    /// Trigger-to-trigger timing classification.
    TriggerStream,
}

/// Outcome of the CRC field comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CrcStatus {
    Ok,
    Error,
}

impl fmt::Display for CrcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrcStatus::Ok => write!(f, "OK"),
            CrcStatus::Error => write!(f, "ER"),
        }
    }
}

/// Whether the trigger-to-trigger time stayed inside the configured window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TriggerClass {
    In,
    Out,
}

impl fmt::Display for TriggerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerClass::In => write!(f, "IN"),
            TriggerClass::Out => write!(f, "OUT"),
        }
    }
}

/// Payload attached to an [`Annotation`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AnnotationData {
    None,
    Byte(u8),
    Millis(f64),
    PacketLength(i64),
    Position(i64),
    CrcRunning(u32),
    CrcCheck {
        status: CrcStatus,
        computed: u32,
        expected: u32,
    },
    Trigger(TriggerClass),
}

/// One dissection result spanning `start..end` seconds of the stream.
#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    pub kind: AnnotationKind,
    pub start: f64,
    pub end: f64,
    pub data: AnnotationData,
}

impl Annotation {
    pub fn new(kind: AnnotationKind, start: f64, end: f64, data: AnnotationData) -> Self {
        Self {
            kind,
            start,
            end,
            data,
        }
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use AnnotationData as D;
        use AnnotationKind as K;
        match (self.kind, &self.data) {
            (K::StreamStart, _) => write!(f, "STREAM"),
            (K::TimeToHeader, D::Millis(ms)) => write!(f, "TtH: {ms:.3}"),
            (K::Preamble, D::Byte(b)) => write!(f, "p: {b:02x}"),
            (K::Header, D::Byte(b)) => write!(f, "H: {b:02x}"),
            (K::HeaderQm, D::Byte(b)) => write!(f, "H?: {b:02x}"),
            (K::HeaderPad, D::Byte(b)) => write!(f, "hp: {b:02x}"),
            (K::Length, D::Byte(b)) => write!(f, "L: {b:02x}"),
            (K::Length, D::PacketLength(len)) => write!(f, "L: {len}"),
            (K::LengthPad, D::Byte(b)) => write!(f, "lp: {b:02x}"),
            (K::Data, D::Byte(b)) => write!(f, "D: {b:02x}"),
            (K::DataPad, D::Byte(b)) => write!(f, "dp: {b:02x}"),
            (K::CrcAdd, D::CrcRunning(v)) => write!(f, "C({v:x})"),
            (K::CrcValue, D::Byte(b)) => write!(f, "CV: {b:02x}"),
            (
                K::CrcEnd,
                D::CrcCheck {
                    status,
                    computed,
                    expected,
                },
            ) => write!(f, "CRC: {status}, S: {computed:08x}, V: {expected:08x}"),
            (K::CrcPad, D::Byte(b)) => write!(f, "cp: {b:02x}"),
            (K::PacketPad, D::Byte(b)) => write!(f, "pp: {b:02x}"),
            (K::PacketStart, _) => write!(f, "P-START"),
            (K::PacketEnd, _) => write!(f, "P-END"),
            (K::PacketTimeout, D::Position(pos)) => write!(f, "P-T_OUT: {pos}"),
            (K::TriggerFound, _) => write!(f, "TRIG"),
            (K::TriggerStream, D::Trigger(class)) => write!(f, "Trig: {class}"),
            _ => write!(f, "?"),
        }
    }
}

/// Spreads the annotations of one input byte evenly over its time span,
/// so overlapping results stay readable.
pub(crate) fn squeeze(batch: &mut [Annotation]) {
    let n = batch.len();
    if n <= 1 {
        return;
    }
    let span_start = batch[0].start;
    let dt = (batch[0].end - span_start) / n as f64;
    for (i, a) in batch.iter_mut().enumerate() {
        a.start = span_start + dt * i as f64;
        a.end = span_start + dt * (i + 1) as f64;
    }
}

#[derive(Clone, Debug, Default)]
struct PendingEntry {
    forced: Vec<Annotation>,
    optional: Vec<Annotation>,
}

/// Per-byte annotation batches held back until the header decision is made.
///
/// Forced annotations survive trimming; optional ones are dropped oldest
/// first when the buffer is cut down to the bytes a matched header spans.
#[derive(Clone, Debug, Default)]
pub(crate) struct PendingBuffer {
    entries: Vec<PendingEntry>,
}

impl PendingBuffer {
    pub fn push(&mut self, forced: Vec<Annotation>, optional: Vec<Annotation>) {
        self.entries.push(PendingEntry { forced, optional });
    }

    /// Drops the oldest entries without forced annotations until at most
    /// `keep` entries beyond the protected prefix remain.
    pub fn trim(&mut self, keep: usize) {
        let mut idx = 0;
        while idx < self.entries.len() && self.entries.len() > keep + idx {
            if self.entries[idx].forced.is_empty() {
                self.entries.remove(idx);
            } else {
                idx += 1;
            }
        }
    }

    /// Flushes all entries in arrival order, squeezing each byte's batch
    /// into its time span.
    pub fn drain(&mut self) -> Vec<Annotation> {
        let mut out = Vec::new();
        for mut entry in self.entries.drain(..) {
            let mut batch = core::mem::take(&mut entry.forced);
            batch.append(&mut entry.optional);
            squeeze(&mut batch);
            out.extend(batch);
        }
        out
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn ann(kind: AnnotationKind, start: f64, end: f64) -> Annotation {
        Annotation::new(kind, start, end, AnnotationData::None)
    }

    #[test]
    fn test_squeeze_redistributes_evenly() {
        let mut batch = vec![
            ann(AnnotationKind::Header, 1.0, 2.0),
            ann(AnnotationKind::PacketStart, 1.0, 2.0),
            ann(AnnotationKind::TriggerFound, 1.0, 2.0),
            ann(AnnotationKind::PacketEnd, 1.0, 2.0),
        ];
        squeeze(&mut batch);
        for (i, a) in batch.iter().enumerate() {
            assert!((a.start - (1.0 + 0.25 * i as f64)).abs() < 1e-12);
            assert!((a.end - (1.25 + 0.25 * i as f64)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_squeeze_leaves_single_annotation_alone() {
        let mut batch = vec![ann(AnnotationKind::Data, 3.0, 4.0)];
        squeeze(&mut batch);
        assert_eq!(batch[0].start, 3.0);
        assert_eq!(batch[0].end, 4.0);
    }

    #[test]
    fn test_trim_drops_oldest_optional_entries() {
        let mut buf = PendingBuffer::default();
        for i in 0..5 {
            buf.push(vec![], vec![ann(AnnotationKind::Header, i as f64, i as f64 + 1.0)]);
        }
        buf.trim(2);
        assert_eq!(buf.len(), 2);
        let out = buf.drain();
        assert_eq!(out[0].start, 3.0);
        assert_eq!(out[1].start, 4.0);
    }

    #[test]
    fn test_trim_keeps_forced_entries() {
        let mut buf = PendingBuffer::default();
        buf.push(
            vec![ann(AnnotationKind::PacketTimeout, 0.0, 1.0)],
            vec![],
        );
        for i in 1..4 {
            buf.push(vec![], vec![ann(AnnotationKind::Header, i as f64, i as f64 + 1.0)]);
        }
        buf.trim(0);
        let out = buf.drain();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, AnnotationKind::PacketTimeout);
    }

    #[test]
    fn test_drain_preserves_arrival_order() {
        let mut buf = PendingBuffer::default();
        buf.push(vec![], vec![ann(AnnotationKind::Header, 0.0, 1.0)]);
        buf.push(
            vec![ann(AnnotationKind::TriggerStream, 1.0, 2.0)],
            vec![ann(AnnotationKind::Data, 1.0, 2.0)],
        );
        let out = buf.drain();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].kind, AnnotationKind::Header);
        assert_eq!(out[1].kind, AnnotationKind::TriggerStream);
        assert_eq!(out[2].kind, AnnotationKind::Data);
        assert!(buf.drain().is_empty());
    }

    #[test]
    fn test_display_forms() {
        use alloc::string::ToString;
        let a = Annotation::new(AnnotationKind::Header, 0.0, 1.0, AnnotationData::Byte(0xa5));
        assert_eq!(a.to_string(), "H: a5");
        let a = Annotation::new(
            AnnotationKind::CrcEnd,
            0.0,
            1.0,
            AnnotationData::CrcCheck {
                status: CrcStatus::Ok,
                computed: 0x29b1,
                expected: 0x29b1,
            },
        );
        assert_eq!(a.to_string(), "CRC: OK, S: 000029b1, V: 000029b1");
        let a = Annotation::new(
            AnnotationKind::TriggerStream,
            0.0,
            1.0,
            AnnotationData::Trigger(TriggerClass::Out),
        );
        assert_eq!(a.to_string(), "Trig: OUT");
    }
}
