use rustfft::num_complex::Complex64;

use crate::constants::PI;

/// In-place frequency shift with phase carried across calls, so consecutive
/// subframes see one continuous rotation instead of a phase step at each
/// buffer boundary.
pub struct CfoCorrector {
    phase: f64,
}

impl CfoCorrector {
    pub fn new() -> Self {
        Self { phase: 0.0 }
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }

    /// Rotate `buf` by `freq` cycles per sample, continuing from the phase the
    /// previous call ended on.
    pub fn correct(&mut self, buf: &mut [Complex64], freq: f64) {
        let step = 2.0 * PI * freq;
        for x in buf.iter_mut() {
            *x *= Complex64::new(self.phase.cos(), self.phase.sin());
            self.phase += step;
            if self.phase > PI {
                self.phase -= 2.0 * PI;
            } else if self.phase < -PI {
                self.phase += 2.0 * PI;
            }
        }
    }
}

impl Default for CfoCorrector {
    fn default() -> Self {
        Self::new()
    }
}
