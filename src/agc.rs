use rustfft::num_complex::Complex64;

const DEFAULT_TARGET: f64 = 0.7;
const DEFAULT_BANDWIDTH: f64 = 0.7;
const MIN_GAIN_DB: f64 = 0.0;
const MAX_GAIN_DB: f64 = 90.0;

/// Gain sink injected by the radio front end: takes the requested gain in dB,
/// returns the gain actually applied.
pub type SetGainFn = dyn FnMut(f64) -> f64;

/// Peak-amplitude AGC. Drives the external gain so that the strongest sample
/// of each processed window approaches the target envelope.
pub struct Agc {
    target: f64,
    bandwidth: f64,
    gain_db: f64,
    nof_frames_delay: u32,
    frame_cnt: u32,
    set_gain_fn: Box<SetGainFn>,
}

impl Agc {
    pub fn new(mut set_gain_fn: Box<SetGainFn>, init_gain_db: f64, nof_frames_delay: u32) -> Self {
        let gain_db = set_gain_fn(init_gain_db);
        Self {
            target: DEFAULT_TARGET,
            bandwidth: DEFAULT_BANDWIDTH,
            gain_db,
            nof_frames_delay,
            frame_cnt: 0,
            set_gain_fn,
        }
    }

    pub fn set_target(&mut self, target: f64) {
        self.target = target;
    }

    pub fn gain_db(&self) -> f64 {
        self.gain_db
    }

    pub fn process(&mut self, buf: &[Complex64]) {
        if self.frame_cnt < self.nof_frames_delay {
            self.frame_cnt += 1;
            return;
        }

        let peak = buf.iter().map(|x| x.norm()).fold(0.0, f64::max);
        if peak <= 0.0 {
            return;
        }

        let err_db = 20.0 * (self.target / peak).log10();
        let wanted = (self.gain_db + self.bandwidth * err_db).clamp(MIN_GAIN_DB, MAX_GAIN_DB);
        self.gain_db = (self.set_gain_fn)(wanted);
        log::debug!(
            "agc: peak={:.4} err={:.2} dB gain={:.2} dB",
            peak,
            err_db,
            self.gain_db
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell as StdCell;
    use std::rc::Rc;

    fn window(amplitude: f64) -> Vec<Complex64> {
        vec![Complex64::new(amplitude, 0.0); 64]
    }

    #[test]
    fn test_converges_to_target_envelope() {
        // front end modeled as amplitude = source * 10^(gain/20)
        let gain = Rc::new(StdCell::new(0.0));
        let gain_cb = gain.clone();
        let mut agc = Agc::new(Box::new(move |g| {
            gain_cb.set(g);
            g
        }), 20.0, 0);

        let source = 0.001;
        for _ in 0..50 {
            let amplitude = source * 10f64.powf(gain.get() / 20.0);
            agc.process(&window(amplitude));
        }
        let amplitude = source * 10f64.powf(gain.get() / 20.0);
        assert!((amplitude - DEFAULT_TARGET).abs() < 0.05);
    }

    #[test]
    fn test_startup_delay() {
        let calls = Rc::new(StdCell::new(0u32));
        let calls_cb = calls.clone();
        let mut agc = Agc::new(Box::new(move |g| {
            calls_cb.set(calls_cb.get() + 1);
            g
        }), 10.0, 3);
        assert_eq!(calls.get(), 1); // initial gain push

        for _ in 0..3 {
            agc.process(&window(1.0));
        }
        assert_eq!(calls.get(), 1); // still waiting out the delay
        agc.process(&window(1.0));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_ignores_empty_window() {
        let mut agc = Agc::new(Box::new(|g| g), 30.0, 0);
        agc.process(&window(0.0));
        assert_eq!(agc.gain_db(), 30.0);
    }
}
