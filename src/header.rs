use crate::config::Config;
use crate::HEADER_MAX_LEN;

/// Result of a flexible header search hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FlexMatch {
    pub candidate: usize,
    pub len: usize,
    pub trigger: bool,
}

/// Sliding window over the most recent stream bytes for the flexible
/// header search. A slot is tainted while its byte is unknown or was
/// separated from its successor by a timeout, so a candidate never
/// matches across a gap.
#[derive(Clone, Debug)]
pub(crate) struct SlidingWindow {
    bytes: [u8; HEADER_MAX_LEN],
    tainted: [bool; HEADER_MAX_LEN],
}

impl SlidingWindow {
    pub fn new() -> Self {
        Self {
            bytes: [0; HEADER_MAX_LEN],
            tainted: [true; HEADER_MAX_LEN],
        }
    }

    pub fn reset(&mut self) {
        self.tainted = [true; HEADER_MAX_LEN];
    }

    /// Shifts the window left by one and appends `byte`. A timed out byte
    /// also taints its predecessor, since the pair no longer forms a
    /// contiguous run.
    pub fn push(&mut self, byte: u8, timed_out: bool) {
        self.bytes.copy_within(1.., 0);
        self.tainted.copy_within(1.., 0);
        self.bytes[HEADER_MAX_LEN - 1] = byte;
        self.tainted[HEADER_MAX_LEN - 1] = timed_out;
        self.tainted[HEADER_MAX_LEN - 2] = timed_out;
    }

    /// Compares every active candidate against the window tail. Returns the
    /// first hit together with its trigger comparison.
    pub fn find(&self, config: &Config) -> Option<FlexMatch> {
        for (slot, cand) in config.headers.iter().enumerate() {
            if !cand.active || cand.len == 0 {
                continue;
            }
            let start = HEADER_MAX_LEN - cand.len;
            let hit = cand
                .pattern()
                .iter()
                .enumerate()
                .all(|(i, &p)| !self.tainted[start + i] && self.bytes[start + i] == p);
            if !hit {
                continue;
            }
            let trigger = (0..cand.len).all(|i| {
                self.bytes[start + i] & config.trigger_mask[i]
                    == config.trigger_value[i] & config.trigger_mask[i]
            });
            return Some(FlexMatch {
                candidate: slot,
                len: cand.len,
                trigger,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn flex_config(pattern: &str) -> Config {
        let mut settings = Settings::default();
        settings.headers[0].active = true;
        settings.headers[0].value_high = pattern.into();
        settings.resolve().unwrap()
    }

    #[test]
    fn test_match_on_contiguous_bytes() {
        let config = flex_config("AABB");
        let mut window = SlidingWindow::new();
        window.push(0xaa, false);
        window.push(0xbb, false);
        let m = window.find(&config).unwrap();
        assert_eq!(m.candidate, 0);
        assert_eq!(m.len, 2);
    }

    #[test]
    fn test_timeout_taints_previous_byte() {
        let config = flex_config("AABB");
        let mut window = SlidingWindow::new();
        window.push(0xaa, false);
        window.push(0xbb, true);
        assert_eq!(window.find(&config), None);
        // A fresh contiguous run matches again
        window.push(0xaa, false);
        window.push(0xbb, false);
        assert!(window.find(&config).is_some());
    }

    #[test]
    fn test_trigger_comparison_over_matched_bytes() {
        let mut settings = Settings::default();
        settings.headers[0].active = true;
        settings.headers[0].value_high = "AABB".into();
        settings.trigger_value_high = "AA00".into();
        settings.trigger_mask_high = "FF00".into();
        let config = settings.resolve().unwrap();

        let mut window = SlidingWindow::new();
        window.push(0xaa, false);
        window.push(0xbb, false);
        assert!(window.find(&config).unwrap().trigger);

        let mut settings = settings;
        settings.trigger_value_high = "BB00".into();
        let config = settings.resolve().unwrap();
        let mut window = SlidingWindow::new();
        window.push(0xaa, false);
        window.push(0xbb, false);
        assert!(!window.find(&config).unwrap().trigger);
    }

    #[test]
    fn test_inactive_candidate_never_matches() {
        let mut settings = Settings::default();
        settings.headers[0].value_high = "AA".into();
        let config = settings.resolve().unwrap();
        let mut window = SlidingWindow::new();
        window.push(0xaa, false);
        assert_eq!(window.find(&config), None);
    }
}
