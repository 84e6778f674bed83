use rustfft::FftPlanner;
use rustfft::num_complex::Complex64;

use crate::cell::CpKind;
use crate::cell::cp_ext_len;
use crate::cell::cp_norm_len;
use crate::constants::NOF_PSS_ROOTS;
use crate::pss;
use crate::sss::Sss;
use crate::sss::SssDecision;
use crate::util::calc_correlation;
use crate::util::get_max_with_idx;
use crate::util::peak_to_sidelobe;
use crate::util::rotate;

// Correlation replicas for one PSS root, one per integer-CFO hypothesis.
struct PssReplica {
    n_id_2: u32,
    shifts: Vec<(i32, Vec<Complex64>, Vec<Complex64>)>, // (shift, time, padded fft)
}

struct Peak {
    lag: usize,
    mag: f64,
    psr: f64,
    n_id_2: u32,
    shift: i32,
}

/// PSS/SSS detector. Cross-correlates a buffer against the candidate PSS root
/// sequences, thresholds the peak on its peak-to-sidelobe ratio, tracks a CFO
/// EMA and optionally decodes the SSS symbol preceding the peak.
pub struct Sync {
    fft_size: usize,
    max_offset: usize,
    threshold: f64,
    n_id_2: Option<u32>,
    cp: CpKind,
    detect_cp: bool,
    sss_en: bool,
    detect_cfo_i: bool,
    cfo_ema_alpha: f64,
    mean_cfo: f64,
    cfo_i: i32,
    peak_value: f64,
    last_peak: Option<usize>,
    found_n_id_2: Option<u32>,
    sss_decision: Option<SssDecision>,
    sss: Sss,
    replicas: Vec<PssReplica>,
    planner: FftPlanner<f64>,
}

impl Sync {
    pub fn new(max_offset: usize, fft_size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let conv_len = (max_offset + fft_size).next_power_of_two();

        let mut replicas = Vec::with_capacity(NOF_PSS_ROOTS);
        for n_id_2 in 0..NOF_PSS_ROOTS as u32 {
            let mut shifts = vec![];
            for shift in [-1i32, 0, 1] {
                let time = pss::pss_time_shifted(&mut planner, n_id_2, fft_size, shift);
                let fft = crate::util::fft_code(&mut planner, &time, conv_len);
                shifts.push((shift, time, fft));
            }
            replicas.push(PssReplica { n_id_2, shifts });
        }

        Self {
            fft_size,
            max_offset,
            threshold: 1.0,
            n_id_2: None,
            cp: CpKind::Norm,
            detect_cp: false,
            sss_en: true,
            detect_cfo_i: false,
            cfo_ema_alpha: 0.9,
            mean_cfo: 0.0,
            cfo_i: 0,
            peak_value: 0.0,
            last_peak: None,
            found_n_id_2: None,
            sss_decision: None,
            sss: Sss::new(),
            replicas,
            planner,
        }
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    pub fn set_cfo_ema_alpha(&mut self, alpha: f64) {
        self.cfo_ema_alpha = alpha;
    }

    pub fn set_n_id_2(&mut self, n_id_2: u32) {
        assert!(n_id_2 < 3);
        self.n_id_2 = Some(n_id_2);
    }

    pub fn set_cp(&mut self, cp: CpKind) {
        self.cp = cp;
    }

    pub fn cp(&self) -> CpKind {
        self.cp
    }

    pub fn set_cp_detect(&mut self, enabled: bool) {
        self.detect_cp = enabled;
    }

    pub fn set_cfo_i_detect(&mut self, enabled: bool) {
        self.detect_cfo_i = enabled;
    }

    pub fn set_sss_en(&mut self, enabled: bool) {
        self.sss_en = enabled;
    }

    pub fn max_offset(&self) -> usize {
        self.max_offset
    }

    /// Running CFO estimate in subcarrier-spacing units, integer part included.
    pub fn get_cfo(&self) -> f64 {
        self.mean_cfo + self.cfo_i as f64
    }

    pub fn set_cfo(&mut self, cfo: f64) {
        self.mean_cfo = cfo;
        self.cfo_i = 0;
    }

    /// FIND -> TRACK handover: the coarse detector's estimate seeds the fine one.
    pub fn copy_cfo_from(&mut self, other: &Sync) {
        self.mean_cfo = other.mean_cfo;
        self.cfo_i = other.cfo_i;
    }

    pub fn peak_value(&self) -> f64 {
        self.peak_value
    }

    pub fn last_peak(&self) -> Option<usize> {
        self.last_peak
    }

    pub fn sss_detected(&self) -> bool {
        self.sss_decision.is_some()
    }

    pub fn sss_decision(&self) -> Option<SssDecision> {
        self.sss_decision
    }

    pub fn found_n_id_2(&self) -> Option<u32> {
        self.found_n_id_2
    }

    pub fn cell_id(&self) -> Option<u32> {
        match (self.sss_decision, self.found_n_id_2) {
            (Some(dec), Some(n_id_2)) => Some(3 * dec.n_id_1 + n_id_2),
            _ => None,
        }
    }

    /// Clears the last peak and SSS verdict. The CFO EMA survives, it is the
    /// long-lived part of the detector state.
    pub fn reset(&mut self) {
        self.peak_value = 0.0;
        self.last_peak = None;
        self.found_n_id_2 = None;
        self.sss_decision = None;
    }

    /// Search `[find_offset, find_offset + max_offset)` for a PSS peak. The
    /// buffer is first de-rotated by the running CFO estimate, so SSS-bearing
    /// subframes leave this call frequency-corrected. Returns the peak sample
    /// index relative to `find_offset` (pointing one past the PSS symbol), or
    /// None when the peak fails the threshold.
    pub fn find(
        &mut self,
        input: &mut [Complex64],
        find_offset: usize,
    ) -> Result<Option<usize>, Box<dyn std::error::Error>> {
        if find_offset + self.fft_size >= input.len() {
            return Err(format!(
                "find offset {} out of bounds for buffer of {}",
                find_offset,
                input.len()
            )
            .into());
        }

        let cfo = self.get_cfo();
        if cfo != 0.0 {
            rotate(input, -cfo / self.fft_size as f64);
        }

        let slice_end = usize::min(input.len(), find_offset + self.max_offset + self.fft_size);
        let nof_lags = usize::min(self.max_offset, slice_end - find_offset);

        let mut best: Option<Peak> = None;
        for replica in &self.replicas {
            if let Some(fixed) = self.n_id_2 {
                if replica.n_id_2 != fixed {
                    continue;
                }
            }
            for (shift, _time, fft) in &replica.shifts {
                if *shift != 0 && !self.detect_cfo_i {
                    continue;
                }
                let corr = calc_correlation(
                    &mut self.planner,
                    &input[find_offset..slice_end],
                    fft,
                );
                let mag: Vec<f64> = corr[..nof_lags].iter().map(|c| c.norm()).collect();
                let (lag, peak_mag) = get_max_with_idx(&mag);
                // hypotheses compete on the raw peak response; the sidelobe
                // ratio only gates acceptance of the winner
                let better = match &best {
                    Some(b) => peak_mag > b.mag,
                    None => true,
                };
                if better && peak_mag > 0.0 {
                    best = Some(Peak {
                        lag,
                        mag: peak_mag,
                        psr: peak_to_sidelobe(&mag, lag),
                        n_id_2: replica.n_id_2,
                        shift: *shift,
                    });
                }
            }
        }

        let Some(best) = best else {
            self.peak_value = 0.0;
            self.sss_decision = None;
            return Ok(None);
        };
        self.peak_value = best.psr;
        self.last_peak = Some(best.lag + self.fft_size);

        if best.psr < self.threshold {
            self.sss_decision = None;
            return Ok(None);
        }

        self.found_n_id_2 = Some(best.n_id_2);
        if self.detect_cfo_i {
            self.cfo_i += best.shift;
        }

        let pss_start = find_offset + best.lag;
        if pss_start + self.fft_size <= input.len() {
            let replica = &self.replicas[best.n_id_2 as usize];
            let (_, time, _) = &replica.shifts[(best.shift + 1) as usize];
            let residual =
                pss::cfo_estimate(&input[pss_start..pss_start + self.fft_size], time);
            // input was already de-rotated by mean_cfo, so this is a residual
            self.mean_cfo += self.cfo_ema_alpha * residual;
        }

        if self.sss_en {
            self.decode_sss(input, pss_start, best.n_id_2);
        } else {
            self.sss_decision = None;
        }

        Ok(Some(best.lag + self.fft_size))
    }

    fn decode_sss(&mut self, input: &[Complex64], pss_start: usize, n_id_2: u32) {
        let candidates: &[CpKind] = if self.detect_cp {
            &[CpKind::Norm, CpKind::Ext]
        } else {
            std::slice::from_ref(&self.cp)
        };

        let mut best: Option<(SssDecision, CpKind)> = None;
        for &cp_kind in candidates {
            let cp = match cp_kind {
                CpKind::Norm => cp_norm_len(self.fft_size),
                CpKind::Ext => cp_ext_len(self.fft_size),
            };
            let Some(sss_start) = pss_start.checked_sub(self.fft_size + cp) else {
                continue;
            };

            let mut sym = input[sss_start..sss_start + self.fft_size].to_vec();
            self.planner.plan_fft_forward(self.fft_size).process(&mut sym);
            let received = pss::extract_central(&sym);

            if let Some(dec) = self.sss.decode(&received, n_id_2) {
                let better = match &best {
                    Some((b, _)) => dec.quality > b.quality,
                    None => true,
                };
                if better {
                    best = Some((dec, cp_kind));
                }
            }
        }

        match best {
            Some((dec, cp_kind)) => {
                self.sss_decision = Some(dec);
                if self.detect_cp {
                    self.cp = cp_kind;
                }
            }
            None => self.sss_decision = None,
        }
    }
}
