use rustfft::FftPlanner;
use rustfft::num_complex::Complex64;

use crate::constants::PI;
use crate::constants::PSS_SEQ_LEN;

/// Zadoff-Chu root per N_id_2.
pub const PSS_ROOTS: [u32; 3] = [25, 29, 34];

/// Frequency-domain PSS sequence for one of the three roots.
pub fn pss_seq(n_id_2: u32) -> Vec<Complex64> {
    assert!(n_id_2 < 3);
    let u = PSS_ROOTS[n_id_2 as usize] as f64;
    let mut d = Vec::with_capacity(PSS_SEQ_LEN);
    for n in 0..PSS_SEQ_LEN as u32 {
        let arg = if n < 31 {
            -PI * u * (n * (n + 1)) as f64 / 63.0
        } else {
            -PI * u * ((n + 1) * (n + 2)) as f64 / 63.0
        };
        d.push(Complex64::new(arg.cos(), arg.sin()));
    }
    d
}

/// Scatter a 62-symbol central sequence onto the FFT grid: 31 symbols below
/// DC, 31 above, DC itself unused.
pub fn place_central(seq: &[Complex64], freq: &mut [Complex64]) {
    let n = freq.len();
    assert_eq!(seq.len(), PSS_SEQ_LEN);
    for x in freq.iter_mut() {
        *x = Complex64::default();
    }
    for k in 0..31 {
        freq[n - 31 + k] = seq[k];
    }
    for k in 31..PSS_SEQ_LEN {
        freq[k - 30] = seq[k];
    }
}

/// Gather the 62 central subcarriers back out of an FFT output.
pub fn extract_central(freq: &[Complex64]) -> Vec<Complex64> {
    let n = freq.len();
    let mut seq = Vec::with_capacity(PSS_SEQ_LEN);
    for k in 0..31 {
        seq.push(freq[n - 31 + k]);
    }
    for k in 31..PSS_SEQ_LEN {
        seq.push(freq[k - 30]);
    }
    seq
}

/// Unit-energy time-domain PSS replica at the given FFT size.
pub fn pss_time(planner: &mut FftPlanner<f64>, n_id_2: u32, fft_size: usize) -> Vec<Complex64> {
    let mut freq = vec![Complex64::default(); fft_size];
    place_central(&pss_seq(n_id_2), &mut freq);
    planner.plan_fft_inverse(fft_size).process(&mut freq);

    let energy: f64 = freq.iter().map(|x| x.norm_sqr()).sum();
    let scale = 1.0 / energy.sqrt();
    for x in freq.iter_mut() {
        *x *= scale;
    }
    freq
}

/// Time replica pre-shifted by an integer number of subcarriers, used by the
/// integer-CFO search.
pub fn pss_time_shifted(
    planner: &mut FftPlanner<f64>,
    n_id_2: u32,
    fft_size: usize,
    shift: i32,
) -> Vec<Complex64> {
    let mut replica = pss_time(planner, n_id_2, fft_size);
    for (n, x) in replica.iter_mut().enumerate() {
        let phi = 2.0 * PI * shift as f64 * n as f64 / fft_size as f64;
        *x *= Complex64::new(phi.cos(), phi.sin());
    }
    replica
}

/// Fractional CFO, in subcarrier-spacing units, from the phase drift between
/// the two halves of a received PSS symbol.
pub fn cfo_estimate(input: &[Complex64], replica: &[Complex64]) -> f64 {
    assert_eq!(input.len(), replica.len());
    let half = input.len() / 2;

    let mut y0 = Complex64::default();
    let mut y1 = Complex64::default();
    for n in 0..half {
        y0 += input[n] * replica[n].conj();
    }
    for n in half..input.len() {
        y1 += input[n] * replica[n].conj();
    }
    (y1 * y0.conj()).arg() / PI
}
