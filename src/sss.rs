use rustfft::num_complex::Complex64;

use crate::constants::NOF_CELL_ID_GROUPS;
use crate::constants::SSS_M_LEN;

// Quality gate: strongest cyclic-shift correlation must dominate the runner-up
// by this factor before the decode is trusted.
const DETECT_FACTOR: f64 = 2.0;

/// Decoded SSS verdict: cell-identity group and which of the two SSS-bearing
/// subframes the symbol came from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SssDecision {
    pub n_id_1: u32,
    pub sf_idx: u32,
    pub quality: f64,
}

/// SSS scrambling/interleaving tables, built once per detector.
pub struct Sss {
    s_tilde: [i8; SSS_M_LEN],
    c_tilde: [i8; SSS_M_LEN],
    z_tilde: [i8; SSS_M_LEN],
    // (m0, m1) -> N_id_1; only 168 of the 961 slots are occupied
    group_table: [[Option<u16>; SSS_M_LEN]; SSS_M_LEN],
}

fn m_sequence(taps: &[usize]) -> [i8; SSS_M_LEN] {
    let mut x = [0u8; SSS_M_LEN];
    x[4] = 1;
    for i in 0..SSS_M_LEN - 5 {
        x[i + 5] = taps.iter().map(|&t| x[i + t]).sum::<u8>() % 2;
    }
    let mut seq = [0i8; SSS_M_LEN];
    for i in 0..SSS_M_LEN {
        seq[i] = 1 - 2 * x[i] as i8;
    }
    seq
}

/// (m0, m1) pair for a cell-identity group.
pub fn m0m1(n_id_1: u32) -> (usize, usize) {
    let qp = n_id_1 / 30;
    let q = (n_id_1 + qp * (qp + 1) / 2) / 30;
    let mp = n_id_1 + q * (q + 1) / 2;
    let m0 = mp % 31;
    let m1 = (m0 + mp / 31 + 1) % 31;
    (m0 as usize, m1 as usize)
}

impl Sss {
    pub fn new() -> Self {
        let mut group_table = [[None; SSS_M_LEN]; SSS_M_LEN];
        for n_id_1 in 0..NOF_CELL_ID_GROUPS {
            let (m0, m1) = m0m1(n_id_1);
            group_table[m0][m1] = Some(n_id_1 as u16);
        }
        Self {
            s_tilde: m_sequence(&[0, 2]),
            c_tilde: m_sequence(&[0, 3]),
            z_tilde: m_sequence(&[0, 1, 2, 4]),
            group_table,
        }
    }

    fn s(&self, m: usize, n: usize) -> f64 {
        self.s_tilde[(n + m) % SSS_M_LEN] as f64
    }

    fn c0(&self, n_id_2: u32, n: usize) -> f64 {
        self.c_tilde[(n + n_id_2 as usize) % SSS_M_LEN] as f64
    }

    fn c1(&self, n_id_2: u32, n: usize) -> f64 {
        self.c_tilde[(n + n_id_2 as usize + 3) % SSS_M_LEN] as f64
    }

    fn z1(&self, m: usize, n: usize) -> f64 {
        self.z_tilde[(n + (m % 8)) % SSS_M_LEN] as f64
    }

    /// The 62 BPSK chips transmitted on the SSS subcarriers of subframe 0 or 5.
    pub fn generate(&self, n_id_1: u32, n_id_2: u32, sf_idx: u32) -> Vec<f64> {
        assert!(sf_idx == 0 || sf_idx == 5);
        let (m0, m1) = m0m1(n_id_1);
        let (m_even, m_odd) = if sf_idx == 0 { (m0, m1) } else { (m1, m0) };

        let mut d = vec![0.0; 2 * SSS_M_LEN];
        for n in 0..SSS_M_LEN {
            d[2 * n] = self.s(m_even, n) * self.c0(n_id_2, n);
            d[2 * n + 1] = self.s(m_odd, n) * self.c1(n_id_2, n) * self.z1(m_even, n);
        }
        d
    }

    // Strongest cyclic shift of the s-sequence against a descrambled half,
    // with the runner-up for the quality gate.
    fn best_shift(&self, half: &[Complex64]) -> (usize, f64, f64) {
        let mut best = 0;
        let mut best_mag = 0.0;
        let mut second = 0.0;
        for m in 0..SSS_M_LEN {
            let mut acc = Complex64::default();
            for n in 0..SSS_M_LEN {
                acc += half[n] * self.s(m, n);
            }
            let mag = acc.norm();
            if mag > best_mag {
                second = best_mag;
                best_mag = mag;
                best = m;
            } else if mag > second {
                second = mag;
            }
        }
        (best, best_mag, second)
    }

    /// Decode a received 62-subcarrier SSS observation given the PSS-derived
    /// N_id_2. Returns None when the correlation is not decisive.
    pub fn decode(&self, received: &[Complex64], n_id_2: u32) -> Option<SssDecision> {
        assert_eq!(received.len(), 2 * SSS_M_LEN);

        let even: Vec<Complex64> = (0..SSS_M_LEN)
            .map(|n| received[2 * n] * self.c0(n_id_2, n))
            .collect();
        let (m_even, mag_even, second_even) = self.best_shift(&even);
        if mag_even < DETECT_FACTOR * second_even {
            return None;
        }

        let odd: Vec<Complex64> = (0..SSS_M_LEN)
            .map(|n| received[2 * n + 1] * self.c1(n_id_2, n) * self.z1(m_even, n))
            .collect();
        let (m_odd, mag_odd, second_odd) = self.best_shift(&odd);
        if mag_odd < DETECT_FACTOR * second_odd {
            return None;
        }

        let quality = (mag_even + mag_odd) / (2.0 * SSS_M_LEN as f64);
        if let Some(n_id_1) = self.group_table[m_even][m_odd] {
            Some(SssDecision {
                n_id_1: n_id_1 as u32,
                sf_idx: 0,
                quality,
            })
        } else if let Some(n_id_1) = self.group_table[m_odd][m_even] {
            Some(SssDecision {
                n_id_1: n_id_1 as u32,
                sf_idx: 5,
                quality,
            })
        } else {
            None
        }
    }
}

impl Default for Sss {
    fn default() -> Self {
        Self::new()
    }
}
