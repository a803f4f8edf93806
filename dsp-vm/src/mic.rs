//! Microphone control hub.
//!
//! There are multiple ways the guest can listen to the mic (the legacy
//! touch controller path, the console mic interface, and the DSP's serial
//! input port). This hub centralizes start/stop refcounting and keeps the
//! shared input ring: the host feeds frames in, and consumers read the
//! current sample at the mic feed rate.

/// Consumers of the mic input, refcounted by a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicSource {
    Nds = 0,
    Dsi = 1,
    DsiDsp = 2,
}

const INPUT_BUFFER_SIZE: usize = 4096;

/// One mic sample is consumed every 704 cycles, matching the highest
/// sample rate the console uses.
const CYCLES_PER_SAMPLE: u32 = 704;

pub struct Mic {
    open_mask: u8,

    input: Vec<i16>,
    write_pos: usize,
    read_pos: usize,
    level: usize,

    cycle_count: u32,
    cur_sample: i16,
}

impl Mic {
    pub fn new() -> Self {
        Self {
            open_mask: 0,
            input: vec![0; INPUT_BUFFER_SIZE],
            write_pos: 0,
            read_pos: 0,
            level: 0,
            cycle_count: 0,
            cur_sample: 0,
        }
    }

    pub fn reset(&mut self) {
        self.stop_all();
        self.input.fill(0);
        self.write_pos = 0;
        self.read_pos = 0;
        self.level = 0;
        self.cycle_count = 0;
        self.cur_sample = 0;
    }

    pub fn start(&mut self, source: MicSource) {
        let bit = 1u8 << source as u8;
        if self.open_mask & bit != 0 {
            return;
        }

        if self.open_mask == 0 {
            self.input.fill(0);
            self.write_pos = 0;
            self.read_pos = 0;
            self.level = 0;
            log::debug!("[MIC] capture started");
        }
        self.open_mask |= bit;
    }

    pub fn stop(&mut self, source: MicSource) {
        let bit = 1u8 << source as u8;
        if self.open_mask & bit == 0 {
            return;
        }

        self.open_mask &= !bit;
        if self.open_mask == 0 {
            log::debug!("[MIC] capture stopped");
        }
    }

    pub fn stop_all(&mut self) {
        self.open_mask = 0;
    }

    pub fn is_open(&self) -> bool {
        self.open_mask != 0
    }

    /// Host-side feed. Samples beyond the ring capacity are discarded.
    pub fn feed_frame(&mut self, samples: &[i16]) {
        for &s in samples {
            if self.level >= INPUT_BUFFER_SIZE {
                break;
            }
            self.input[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) % INPUT_BUFFER_SIZE;
            self.level += 1;
        }
    }

    /// Consume input at the mic feed rate. The current sample holds its
    /// value between consumption points.
    pub fn advance(&mut self, cycles: u32) {
        if self.open_mask == 0 {
            self.cycle_count = 0;
            return;
        }

        self.cycle_count += cycles;
        while self.cycle_count >= CYCLES_PER_SAMPLE {
            self.cycle_count -= CYCLES_PER_SAMPLE;

            if self.level == 0 {
                continue;
            }
            self.cur_sample = self.input[self.read_pos];
            self.read_pos = (self.read_pos + 1) % INPUT_BUFFER_SIZE;
            self.level -= 1;
        }
    }

    pub fn read_sample(&self) -> i16 {
        if self.open_mask == 0 {
            return 0;
        }
        self.cur_sample
    }

    // Snapshot support

    pub fn snapshot_state(&self) -> (u8, u32, i16) {
        (self.open_mask, self.cycle_count, self.cur_sample)
    }

    pub fn restore_state(&mut self, open_mask: u8, cycle_count: u32, cur_sample: i16) {
        self.open_mask = open_mask;
        self.cycle_count = cycle_count;
        self.cur_sample = cur_sample;
        // the input ring is transient host-side data and starts empty
        self.write_pos = 0;
        self.read_pos = 0;
        self.level = 0;
        self.input.fill(0);
    }
}

impl Default for Mic {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refcounted_start_stop() {
        let mut mic = Mic::new();
        assert!(!mic.is_open());
        mic.start(MicSource::Dsi);
        mic.start(MicSource::DsiDsp);
        mic.stop(MicSource::Dsi);
        assert!(mic.is_open());
        mic.stop(MicSource::DsiDsp);
        assert!(!mic.is_open());
    }

    #[test]
    fn sample_cadence() {
        let mut mic = Mic::new();
        mic.start(MicSource::DsiDsp);
        mic.feed_frame(&[100, 200, 300]);
        assert_eq!(mic.read_sample(), 0);
        mic.advance(704);
        assert_eq!(mic.read_sample(), 100);
        mic.advance(1408);
        assert_eq!(mic.read_sample(), 300);
        // ring drained, sample holds
        mic.advance(704);
        assert_eq!(mic.read_sample(), 300);
    }

    #[test]
    fn closed_hub_reads_zero() {
        let mut mic = Mic::new();
        mic.feed_frame(&[42]);
        mic.advance(10_000);
        assert_eq!(mic.read_sample(), 0);
    }
}
