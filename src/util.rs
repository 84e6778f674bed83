use rustfft::FftPlanner;
use rustfft::num_complex::Complex64;

use crate::constants::PI;

/// Forward FFT of a code sequence zero-padded to `conv_len`, ready for
/// frequency-domain cross-correlation.
pub fn fft_code(planner: &mut FftPlanner<f64>, code: &[Complex64], conv_len: usize) -> Vec<Complex64> {
    assert!(conv_len >= code.len());
    let mut v = code.to_vec();
    v.resize(conv_len, Complex64::default());
    planner.plan_fft_forward(conv_len).process(&mut v);
    v
}

/// Cross-correlation of `input` against the code whose padded FFT is `code_fft`.
/// Output lag l holds sum(input[l+k] * conj(code[k])).
pub fn calc_correlation(
    planner: &mut FftPlanner<f64>,
    input: &[Complex64],
    code_fft: &[Complex64],
) -> Vec<Complex64> {
    let conv_len = code_fft.len();
    assert!(input.len() <= conv_len);

    let mut v = input.to_vec();
    v.resize(conv_len, Complex64::default());
    planner.plan_fft_forward(conv_len).process(&mut v);
    for i in 0..conv_len {
        v[i] *= code_fft[i].conj();
    }
    planner.plan_fft_inverse(conv_len).process(&mut v);
    let scale = 1.0 / conv_len as f64;
    for x in v.iter_mut() {
        *x *= scale;
    }
    v
}

pub fn get_max_with_idx(v: &[f64]) -> (usize, f64) {
    let mut idx = 0;
    let mut max = f64::MIN;
    for (i, &x) in v.iter().enumerate() {
        if x > max {
            max = x;
            idx = i;
        }
    }
    (idx, max)
}

/// Ratio of the peak power to the strongest sidelobe power in a correlation
/// magnitude profile. The main lobe is the contiguous non-increasing run on
/// each side of the peak; the reference sidelobe is the strongest magnitude
/// outside it.
pub fn peak_to_sidelobe(corr: &[f64], peak: usize) -> f64 {
    let peak_value = corr[peak];
    if peak_value <= 0.0 {
        return 0.0;
    }

    let mut ub = peak;
    while ub + 1 < corr.len() && corr[ub + 1] <= corr[ub] {
        ub += 1;
    }
    let mut lb = peak;
    while lb > 0 && corr[lb - 1] <= corr[lb] {
        lb -= 1;
    }

    let mut side = 0.0;
    for (i, &x) in corr.iter().enumerate() {
        if (i < lb || i > ub) && x > side {
            side = x;
        }
    }
    if side > 0.0 {
        (peak_value / side) * (peak_value / side)
    } else {
        f64::INFINITY
    }
}

/// Cumulative moving average after n prior observations.
pub fn cma(new: f64, avg: f64, n: u32) -> f64 {
    (new + n as f64 * avg) / (n as f64 + 1.0)
}

pub fn ema(new: f64, avg: f64, alpha: f64) -> f64 {
    alpha * new + (1.0 - alpha) * avg
}

/// One-shot rotation by `freq` cycles per sample, phase zero at buf[0].
pub fn rotate(buf: &mut [Complex64], freq: f64) {
    for (n, x) in buf.iter_mut().enumerate() {
        let phi = 2.0 * PI * freq * n as f64;
        *x *= Complex64::new(phi.cos(), phi.sin());
    }
}
